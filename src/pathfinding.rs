//! Exhaustive shortest-path search used by the agents.
//!
//! This is a depth-first backtracking search over the 4-connected maze, not
//! a heuristic one. Three rules keep it tractable:
//!
//! * branch-and-bound: a partial path that cannot reach the goal within the
//!   best known length (steps taken plus Manhattan distance left) is
//!   abandoned; equal length is still explored so ties are collected;
//! * corners: a cell with three or more open exits is a corner, and every
//!   cell entered from a corner joins the branch's barrier set until the
//!   search backtracks out of that corner;
//! * no stepping straight back to the previous cell.
//!
//! A branch also never re-enters a cell it already passes through, which
//! caps its depth at the number of open cells and ends the search on mazes
//! with corner-free rings. Frames live on an explicit stack; the barrier set
//! is a vector truncated back to each frame's entry length on pop.
//!
//! The bound starts at the breadth-first distance. Pruning never removes a
//! minimal path, so this only skips work; if the corner rule happens to rule
//! out every path of that length the search runs again unbounded.

use std::collections::VecDeque;
use std::time::Instant;

use log::{debug, log_enabled, Level};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::config::Difficulty;
use crate::grid::{Dir, Grid, Pos, Symbol};

/// Which exits of a cell the search may take, indexed like `Dir::ALL`.
type Exits = [Option<Pos>; 4];

struct Frame {
    pos: Pos,
    came_from: Option<Pos>,
    exits: Exits,
    corner: bool,
    next: usize,
    barrier_len: usize,
}

impl Frame {
    fn enter(grid: &Grid, goal: Pos, pos: Pos, came_from: Option<Pos>, barrier_len: usize) -> Self {
        let exits = open_exits(grid, goal, pos);
        let open = exits.iter().filter(|e| e.is_some()).count();
        Frame {
            pos,
            came_from,
            exits,
            corner: open >= 3,
            next: 0,
            barrier_len,
        }
    }
}

/// Neighbours an agent may step onto: inside the maze, not a wall, and not
/// another agent unless it stands on the goal.
fn open_exits(grid: &Grid, goal: Pos, pos: Pos) -> Exits {
    let mut exits = [None; 4];
    for (slot, dir) in exits.iter_mut().zip(Dir::ALL) {
        *slot = grid.neighbor(pos, dir).filter(|next| match grid.get(*next) {
            Some(Symbol::Wall) | None => false,
            Some(Symbol::Agent) => *next == goal,
            Some(_) => true,
        });
    }
    exits
}

fn manhattan(a: Pos, b: Pos) -> usize {
    a.x.abs_diff(b.x) + a.y.abs_diff(b.y)
}

/// Breadth-first step count over the same cells the search may use.
fn distance(grid: &Grid, start: Pos, goal: Pos) -> Option<usize> {
    let mut dist = vec![usize::MAX; (grid.width() + 1) * (grid.height() + 1)];
    let idx = |p: Pos| p.y * (grid.width() + 1) + p.x;
    let mut q = VecDeque::new();
    dist[idx(start)] = 0;
    q.push_back(start);
    while let Some(pos) = q.pop_front() {
        let base = dist[idx(pos)];
        if pos == goal {
            return Some(base);
        }
        for next in open_exits(grid, goal, pos).into_iter().flatten() {
            if dist[idx(next)] == usize::MAX {
                dist[idx(next)] = base + 1;
                q.push_back(next);
            }
        }
    }
    None
}

/// Every complete path the search recorded, in discovery order.
fn search(grid: &Grid, start: Pos, goal: Pos, bound: Option<usize>) -> Vec<Vec<Dir>> {
    let mut hits: Vec<Vec<Dir>> = Vec::new();
    let mut best: Option<usize> = bound;
    let mut barrier: Vec<Pos> = Vec::new();
    let mut path: Vec<Dir> = Vec::new();
    let mut stack = vec![Frame::enter(grid, goal, start, None, 0)];

    while let Some(frame) = stack.last_mut() {
        if frame.next == Dir::ALL.len() {
            barrier.truncate(frame.barrier_len);
            stack.pop();
            if !stack.is_empty() {
                path.pop();
            }
            continue;
        }
        let idx = frame.next;
        frame.next += 1;
        let (here, came_from, corner) = (frame.pos, frame.came_from, frame.corner);

        let Some(next) = frame.exits[idx] else {
            continue;
        };
        if Some(next) == came_from
            || barrier.contains(&next)
            || stack.iter().any(|f| f.pos == next)
        {
            continue;
        }
        if corner {
            barrier.push(next);
        }

        let steps = path.len() + 1;
        if best.is_some_and(|b| steps + manhattan(next, goal) > b) {
            continue;
        }
        let dir = Dir::ALL[idx];
        if next == goal {
            debug!(target: "pathfinding", "hit, steps: {steps}");
            let mut found = path.clone();
            found.push(dir);
            hits.push(found);
            best = Some(best.map_or(steps, |b| b.min(steps)));
            continue;
        }
        path.push(dir);
        stack.push(Frame::enter(grid, goal, next, Some(here), barrier.len()));
    }
    hits
}

/// Directions leading from `start` to `goal`, or `None` when the goal cannot
/// be reached. `start == goal` needs no movement and returns an empty path.
///
/// Among equally short paths, `Hard` picks one at random; the other
/// difficulties take the first one found in `Dir::ALL` order.
pub fn shortest_steps(
    grid: &Grid,
    start: Pos,
    goal: Pos,
    difficulty: Difficulty,
    rng: &mut impl Rng,
) -> Option<Vec<Dir>> {
    if start == goal {
        return Some(Vec::new());
    }
    let began = Instant::now();
    let Some(bound) = distance(grid, start, goal) else {
        debug!(target: "pathfinding", "no way found from {start} to {goal}");
        return None;
    };
    let mut hits = search(grid, start, goal, Some(bound));
    if hits.is_empty() {
        debug!(target: "pathfinding", "no path of length {bound}, searching unbounded");
        hits = search(grid, start, goal, None);
    }
    let Some(min) = hits.iter().map(Vec::len).min() else {
        debug!(target: "pathfinding", "no way found from {start} to {goal}");
        return None;
    };

    let shortest: Vec<&Vec<Dir>> = hits.iter().filter(|p| p.len() == min).collect();
    let chosen = if difficulty.randomizes_ties() {
        shortest.choose(rng).copied()
    } else {
        shortest.first().copied()
    }?;

    if log_enabled!(target: "pathfinding", Level::Debug) {
        debug!(
            target: "pathfinding",
            "required steps: {min} ({} candidates) in {:?}, directions: {:?}",
            shortest.len(),
            began.elapsed(),
            chosen
        );
    }
    Some(chosen.clone())
}
