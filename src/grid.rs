//! Maze cells, coordinates and directions.
//!
//! Positions are 1-indexed: `(1, 1)` is the top-left cell, which is also how
//! positions are stored in saved games.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{GameError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "char", into = "char")]
pub enum Symbol {
    Wall,
    Empty,
    Coin,
    PowerItem,
    Agent,
}

impl Symbol {
    pub fn as_char(self) -> char {
        match self {
            Symbol::Wall => '#',
            Symbol::Empty => ' ',
            Symbol::Coin => '.',
            Symbol::PowerItem => 'o',
            Symbol::Agent => 'G',
        }
    }
}

impl TryFrom<char> for Symbol {
    type Error = GameError;

    fn try_from(c: char) -> Result<Self> {
        match c {
            '#' => Ok(Symbol::Wall),
            ' ' => Ok(Symbol::Empty),
            '.' => Ok(Symbol::Coin),
            'o' => Ok(Symbol::PowerItem),
            'G' => Ok(Symbol::Agent),
            other => Err(GameError::InvalidSymbol(other)),
        }
    }
}

impl From<Symbol> for char {
    fn from(symbol: Symbol) -> char {
        symbol.as_char()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "[usize; 2]", into = "[usize; 2]")]
pub struct Pos {
    pub x: usize,
    pub y: usize,
}

impl Pos {
    pub const fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }

    /// The neighbouring position in `dir`, or `None` when it would leave the
    /// positive quadrant. Bounds on the far side are checked by the grid.
    pub fn step(self, dir: Dir) -> Option<Pos> {
        let (dx, dy) = dir.delta();
        let x = self.x.checked_add_signed(dx)?;
        let y = self.y.checked_add_signed(dy)?;
        Some(Pos { x, y })
    }
}

impl From<[usize; 2]> for Pos {
    fn from([x, y]: [usize; 2]) -> Self {
        Pos { x, y }
    }
}

impl From<Pos> for [usize; 2] {
    fn from(pos: Pos) -> Self {
        [pos.x, pos.y]
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dir {
    East,
    West,
    South,
    North,
}

impl Dir {
    /// Enumeration order used wherever directions are tried in turn.
    pub const ALL: [Dir; 4] = [Dir::East, Dir::West, Dir::South, Dir::North];

    pub fn delta(self) -> (isize, isize) {
        match self {
            Dir::East => (1, 0),
            Dir::West => (-1, 0),
            Dir::South => (0, 1),
            Dir::North => (0, -1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct Grid {
    width: usize,
    cells: Vec<Vec<Symbol>>,
}

impl Grid {
    pub fn from_rows<S: AsRef<str>>(rows: &[S]) -> Result<Self> {
        let mut cells = Vec::with_capacity(rows.len());
        for row in rows {
            let parsed = row
                .as_ref()
                .chars()
                .map(Symbol::try_from)
                .collect::<Result<Vec<_>>>()?;
            cells.push(parsed);
        }
        let width = cells.first().map_or(0, Vec::len);
        if cells.iter().any(|row| row.len() != width) {
            return Err(GameError::RaggedGrid);
        }
        Ok(Grid { width, cells })
    }

    pub fn rows(&self) -> Vec<String> {
        self.cells
            .iter()
            .map(|row| row.iter().map(|s| s.as_char()).collect())
            .collect()
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.cells.len()
    }

    pub fn contains(&self, pos: Pos) -> bool {
        pos.x >= 1 && pos.y >= 1 && pos.x <= self.width && pos.y <= self.height()
    }

    pub fn get(&self, pos: Pos) -> Option<Symbol> {
        if !self.contains(pos) {
            return None;
        }
        Some(self.cells[pos.y - 1][pos.x - 1])
    }

    /// Only the grid store writes to the live maze; everything else works on
    /// snapshots.
    pub(crate) fn set(&mut self, pos: Pos, symbol: Symbol) -> Result<()> {
        if !self.contains(pos) {
            return Err(GameError::OutOfBounds(pos));
        }
        self.cells[pos.y - 1][pos.x - 1] = symbol;
        Ok(())
    }

    /// In bounds and not a wall.
    pub fn is_open(&self, pos: Pos) -> bool {
        matches!(self.get(pos), Some(symbol) if symbol != Symbol::Wall)
    }

    pub fn neighbor(&self, pos: Pos, dir: Dir) -> Option<Pos> {
        pos.step(dir).filter(|next| self.contains(*next))
    }

    pub fn cells_matching(&self, allowed: &[Symbol]) -> Vec<Pos> {
        let mut cells = Vec::new();
        for (y, row) in self.cells.iter().enumerate() {
            for (x, symbol) in row.iter().enumerate() {
                if allowed.contains(symbol) {
                    cells.push(Pos { x: x + 1, y: y + 1 });
                }
            }
        }
        cells
    }

    pub fn count(&self, symbol: Symbol) -> usize {
        self.cells.iter().flatten().filter(|s| **s == symbol).count()
    }
}

impl TryFrom<Vec<String>> for Grid {
    type Error = GameError;

    fn try_from(rows: Vec<String>) -> Result<Self> {
        Grid::from_rows(&rows)
    }
}

impl From<Grid> for Vec<String> {
    fn from(grid: Grid) -> Self {
        grid.rows()
    }
}

impl fmt::Display for Grid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in self.rows() {
            writeln!(f, "{row}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_round_trip_through_symbols() {
        let rows = ["#####", "#.oG#", "#   #", "#####"];
        let grid = Grid::from_rows(&rows).unwrap();
        assert_eq!(grid.width(), 5);
        assert_eq!(grid.height(), 4);
        assert_eq!(grid.get(Pos::new(2, 2)), Some(Symbol::Coin));
        assert_eq!(grid.get(Pos::new(3, 2)), Some(Symbol::PowerItem));
        assert_eq!(grid.get(Pos::new(4, 2)), Some(Symbol::Agent));
        assert_eq!(grid.rows(), rows);
    }

    #[test]
    fn positions_are_one_indexed() {
        let grid = Grid::from_rows(&["#."]).unwrap();
        assert_eq!(grid.get(Pos::new(1, 1)), Some(Symbol::Wall));
        assert_eq!(grid.get(Pos::new(0, 1)), None);
        assert_eq!(grid.get(Pos::new(3, 1)), None);
        assert_eq!(grid.get(Pos::new(1, 2)), None);
    }

    #[test]
    fn rejects_unknown_symbols_and_ragged_rows() {
        assert!(matches!(
            Grid::from_rows(&["#x#"]),
            Err(GameError::InvalidSymbol('x'))
        ));
        assert!(matches!(
            Grid::from_rows(&["###", "##"]),
            Err(GameError::RaggedGrid)
        ));
    }

    #[test]
    fn neighbors_stay_inside_the_grid() {
        let grid = Grid::from_rows(&["  ", "  "]).unwrap();
        let origin = Pos::new(1, 1);
        assert_eq!(grid.neighbor(origin, Dir::West), None);
        assert_eq!(grid.neighbor(origin, Dir::North), None);
        assert_eq!(grid.neighbor(origin, Dir::East), Some(Pos::new(2, 1)));
        assert_eq!(grid.neighbor(origin, Dir::South), Some(Pos::new(1, 2)));
        assert_eq!(Pos::new(0, 3).step(Dir::West), None);
    }

    #[test]
    fn set_out_of_bounds_leaves_grid_untouched() {
        let mut grid = Grid::from_rows(&[" ."]).unwrap();
        let before = grid.clone();
        assert!(grid.set(Pos::new(3, 1), Symbol::Coin).is_err());
        assert_eq!(grid, before);
    }

    #[test]
    fn serde_uses_row_strings_and_pairs() {
        let grid = Grid::from_rows(&["# .", "o G"]).unwrap();
        let json = serde_json::to_value(&grid).unwrap();
        assert_eq!(json, serde_json::json!(["# .", "o G"]));
        let back: Grid = serde_json::from_value(json).unwrap();
        assert_eq!(back, grid);

        let pos: Pos = serde_json::from_str("[4, 7]").unwrap();
        assert_eq!(pos, Pos::new(4, 7));
    }
}
