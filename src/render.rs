//! Terminal drawing with crossterm. Only cells that changed since the last
//! frame are redrawn; a resize or a failed size check forces a full redraw.

use std::io::{self, Stdout, Write};

use crossterm::cursor::MoveTo;
use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use crossterm::terminal::{self, Clear, ClearType};
use crossterm::QueueableCommand;
use unicode_width::UnicodeWidthStr;

use crate::grid::{Pos, Symbol};
use crate::redraw::{Frame, Renderer};

const CELL_W: usize = 2;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Glyph {
    Player,
    Agent,
    Wall,
    Empty,
    Coin,
    PowerItem,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct Cell {
    glyph: Glyph,
    color: Color,
}

const BLANK: Cell = Cell {
    glyph: Glyph::Empty,
    color: Color::Reset,
};

pub struct TerminalRenderer {
    out: Stdout,
    last: Vec<Cell>,
    last_hud: String,
    needs_full: bool,
    origin_x: u16,
    origin_y: u16,
}

impl TerminalRenderer {
    pub fn new() -> Self {
        Self {
            out: io::stdout(),
            last: Vec::new(),
            last_hud: String::new(),
            needs_full: true,
            origin_x: 0,
            origin_y: 1,
        }
    }
}

impl Default for TerminalRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for TerminalRenderer {
    fn draw(&mut self, frame: &Frame) -> io::Result<()> {
        let (width, height) = (frame.grid.width(), frame.grid.height());
        // Maze, HUD line above it, status line below it.
        let needed_h = (height + 2) as u16;
        let needed_w = (width * CELL_W) as u16;

        self.out.queue(MoveTo(0, 0))?;
        let (term_w, term_h) = terminal::size()?;
        if term_w < needed_w || term_h < needed_h {
            self.out.queue(Clear(ClearType::All))?;
            let msg = format!(
                "Terminal too small. Need at least {}x{} (cols x rows). Current: {}x{}.",
                needed_w, needed_h, term_w, term_h
            );
            self.out.queue(Print(msg))?;
            self.out.flush()?;
            self.needs_full = true;
            return Ok(());
        }

        let origin_x = (term_w - needed_w) / 2;
        let origin_y = (term_h - needed_h) / 2 + 1;
        if origin_x != self.origin_x || origin_y != self.origin_y || self.last.len() != width * height
        {
            self.origin_x = origin_x;
            self.origin_y = origin_y;
            self.last = vec![BLANK; width * height];
            self.needs_full = true;
            self.out.queue(Clear(ClearType::All))?;
        }

        let hud = hud_line(frame);
        if self.needs_full || hud != self.last_hud {
            self.out.queue(MoveTo(self.origin_x, self.origin_y - 1))?;
            self.out.queue(SetForegroundColor(Color::White))?;
            self.out.queue(Clear(ClearType::CurrentLine))?;
            self.out.queue(Print(&hud))?;
            self.out.queue(ResetColor)?;
            self.last_hud = hud;
        }

        for y in 1..=height {
            for x in 1..=width {
                let cell = cell_for(frame, Pos::new(x, y));
                let idx = (y - 1) * width + (x - 1);
                if self.needs_full || cell != self.last[idx] {
                    self.last[idx] = cell;
                    self.draw_cell(x - 1, y - 1, cell)?;
                }
            }
        }
        self.needs_full = false;

        if !frame.alive {
            self.out.queue(MoveTo(self.origin_x, self.origin_y + height as u16))?;
            self.out.queue(Print(format!(
                "GAME OVER - Final Score: {} (press q to quit)",
                frame.score
            )))?;
        }
        self.out.flush()
    }
}

impl TerminalRenderer {
    fn draw_cell(&mut self, x: usize, y: usize, cell: Cell) -> io::Result<()> {
        let text = match cell.glyph {
            Glyph::Player => "😃",
            Glyph::Agent => "👻",
            Glyph::Wall => "██",
            Glyph::Empty => "  ",
            Glyph::Coin => "· ",
            Glyph::PowerItem => "● ",
        };
        let x_pos = self.origin_x + (x * CELL_W) as u16;
        let y_pos = self.origin_y + y as u16;
        self.out.queue(MoveTo(x_pos, y_pos))?;
        self.out.queue(SetForegroundColor(cell.color))?;
        self.out.queue(Print(text))?;
        let w = UnicodeWidthStr::width(text);
        for _ in w..CELL_W {
            self.out.queue(Print(' '))?;
        }
        self.out.queue(ResetColor)?;
        Ok(())
    }
}

fn hud_line(frame: &Frame) -> String {
    format!(
        "Score: {}  Highscore: {}  Last: {}  Level: {}  (q to quit)",
        frame.score, frame.highscore, frame.last_score, frame.level
    )
}

fn cell_for(frame: &Frame, pos: Pos) -> Cell {
    if pos == frame.player {
        return Cell {
            glyph: Glyph::Player,
            color: if frame.alive { Color::Yellow } else { Color::DarkGrey },
        };
    }
    match frame.grid.get(pos).unwrap_or(Symbol::Empty) {
        Symbol::Agent => Cell {
            glyph: Glyph::Agent,
            color: Color::Red,
        },
        Symbol::Wall => Cell {
            glyph: Glyph::Wall,
            color: Color::Blue,
        },
        Symbol::Empty => BLANK,
        Symbol::Coin => Cell {
            glyph: Glyph::Coin,
            color: Color::White,
        },
        Symbol::PowerItem => Cell {
            glyph: Glyph::PowerItem,
            color: Color::Magenta,
        },
    }
}
