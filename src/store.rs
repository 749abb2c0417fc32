//! The live maze and its single-writer mutation queue.
//!
//! One thread owns the grid. Every write is an op on an ordered channel and
//! every read is a request on that same channel, answered only after all ops
//! submitted before it were applied (drain-then-read). No caller ever sees a
//! half-applied swap, and writes land in submission order.

use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use log::{debug, error, log_enabled, warn, Level};

use crate::error::{GameError, Result};
use crate::grid::{Grid, Pos, Symbol};
use crate::redraw::RedrawSender;

enum Op {
    Set {
        pos: Pos,
        symbol: Symbol,
    },
    Swap {
        a: (Pos, Symbol),
        b: (Pos, Symbol),
    },
    /// Writes `symbol` only while `pos` still holds `expected`.
    ReplaceIf {
        pos: Pos,
        expected: Symbol,
        symbol: Symbol,
        reply: Sender<bool>,
    },
    /// Agent step: `to` becomes an agent marker and `from` gets `restore`,
    /// unless `to` already holds an agent. Replies with what `to` held.
    MoveAgent {
        from: Pos,
        to: Pos,
        restore: Symbol,
        reply: Sender<Option<Symbol>>,
    },
    Drain(Sender<()>),
    Snapshot(Sender<Grid>),
    Cell(Pos, Sender<Option<Symbol>>),
    Shutdown,
}

/// Cloneable submission handle. Cheap to hand to every task.
#[derive(Clone)]
pub struct GridStore {
    tx: Sender<Op>,
}

/// Owner of the mutation thread; consumed by `shutdown`.
pub struct StoreHandle {
    tx: Sender<Op>,
    thread: JoinHandle<Grid>,
}

impl GridStore {
    pub fn spawn(grid: Grid, redraw: RedrawSender) -> (GridStore, StoreHandle) {
        let (tx, rx) = mpsc::channel();
        let thread = thread::spawn(move || run_store(grid, rx, redraw));
        (
            GridStore { tx: tx.clone() },
            StoreHandle { tx, thread },
        )
    }

    fn submit(&self, op: Op) -> Result<()> {
        self.tx.send(op).map_err(|_| GameError::ShutDown)
    }

    fn request<T>(&self, make: impl FnOnce(Sender<T>) -> Op) -> Result<T> {
        let (reply, answer) = mpsc::channel();
        self.submit(make(reply))?;
        answer.recv().map_err(|_| GameError::ShutDown)
    }

    pub fn set(&self, pos: Pos, symbol: Symbol) -> Result<()> {
        self.submit(Op::Set { pos, symbol })
    }

    /// Both cells change together or not at all.
    pub fn swap(&self, a: Pos, sym_a: Symbol, b: Pos, sym_b: Symbol) -> Result<()> {
        self.submit(Op::Swap {
            a: (a, sym_a),
            b: (b, sym_b),
        })
    }

    pub fn replace_if(&self, pos: Pos, expected: Symbol, symbol: Symbol) -> Result<bool> {
        self.request(|reply| Op::ReplaceIf {
            pos,
            expected,
            symbol,
            reply,
        })
    }

    /// `None` means the destination already holds an agent and nothing changed.
    pub fn move_agent(&self, from: Pos, to: Pos, restore: Symbol) -> Result<Option<Symbol>> {
        self.request(|reply| Op::MoveAgent {
            from,
            to,
            restore,
            reply,
        })
    }

    /// Block until every op submitted before this call has been applied.
    pub fn drain(&self) -> Result<()> {
        self.request(Op::Drain)
    }

    pub fn snapshot(&self) -> Result<Grid> {
        self.request(Op::Snapshot)
    }

    pub fn cell(&self, pos: Pos) -> Result<Option<Symbol>> {
        self.request(|reply| Op::Cell(pos, reply))
    }
}

impl StoreHandle {
    /// Apply everything already queued, stop the thread and return the final
    /// grid. Later submissions fail with `GameError::ShutDown`.
    pub fn shutdown(self) -> Result<Grid> {
        let _ = self.tx.send(Op::Shutdown);
        self.thread.join().map_err(|_| {
            error!(target: "map", "grid store thread panicked");
            GameError::ShutDown
        })
    }
}

fn run_store(mut grid: Grid, rx: Receiver<Op>, redraw: RedrawSender) -> Grid {
    while let Ok(op) = rx.recv() {
        if let Op::Shutdown = op {
            while let Ok(late) = rx.try_recv() {
                apply(&mut grid, late, &redraw);
            }
            break;
        }
        apply(&mut grid, op, &redraw);
    }
    debug!(target: "map", "grid store exiting");
    grid
}

fn apply(grid: &mut Grid, op: Op, redraw: &RedrawSender) {
    let changed = match op {
        Op::Set { pos, symbol } => match grid.set(pos, symbol) {
            Ok(()) => true,
            Err(e) => {
                warn!(target: "map", "rejected set: {e}");
                false
            }
        },
        Op::Swap { a, b } => {
            if !grid.contains(a.0) || !grid.contains(b.0) {
                warn!(target: "map", "rejected swap {} <-> {}: out of bounds", a.0, b.0);
                false
            } else {
                write_pair(grid, a, b);
                true
            }
        }
        Op::ReplaceIf {
            pos,
            expected,
            symbol,
            reply,
        } => {
            let hit = grid.get(pos) == Some(expected) && grid.set(pos, symbol).is_ok();
            let _ = reply.send(hit);
            hit
        }
        Op::MoveAgent {
            from,
            to,
            restore,
            reply,
        } => {
            let previous = match (grid.get(from), grid.get(to)) {
                (Some(_), Some(Symbol::Agent)) | (None, _) | (_, None) => None,
                (Some(_), Some(previous)) => Some(previous),
            };
            if previous.is_some() {
                write_pair(grid, (to, Symbol::Agent), (from, restore));
            }
            let _ = reply.send(previous);
            previous.is_some()
        }
        Op::Drain(reply) => {
            let _ = reply.send(());
            false
        }
        Op::Snapshot(reply) => {
            let _ = reply.send(grid.clone());
            false
        }
        Op::Cell(pos, reply) => {
            let _ = reply.send(grid.get(pos));
            false
        }
        Op::Shutdown => false,
    };

    if changed {
        if log_enabled!(target: "map", Level::Debug) {
            debug!(target: "map", "updated maze:\n{grid}");
        }
        redraw.request();
    }
}

/// Both positions are already known to be in bounds.
fn write_pair(grid: &mut Grid, a: (Pos, Symbol), b: (Pos, Symbol)) {
    for (pos, symbol) in [a, b] {
        if let Err(e) = grid.set(pos, symbol) {
            error!(target: "map", "in-bounds write failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redraw;

    fn open_store(rows: &[&str]) -> (GridStore, StoreHandle) {
        let (sender, _rx) = redraw::channel();
        GridStore::spawn(Grid::from_rows(rows).unwrap(), sender)
    }

    #[test]
    fn reads_see_every_earlier_write() {
        let (store, handle) = open_store(&["   ", "   "]);
        store.set(Pos::new(1, 1), Symbol::Coin).unwrap();
        store
            .swap(Pos::new(2, 2), Symbol::Agent, Pos::new(3, 2), Symbol::PowerItem)
            .unwrap();
        assert_eq!(store.cell(Pos::new(1, 1)).unwrap(), Some(Symbol::Coin));
        assert_eq!(store.snapshot().unwrap().rows(), vec![".  ", " Go"]);
        handle.shutdown().unwrap();
    }

    #[test]
    fn out_of_bounds_swap_is_rejected_whole() {
        let (store, handle) = open_store(&["  "]);
        store
            .swap(Pos::new(1, 1), Symbol::Coin, Pos::new(9, 9), Symbol::Coin)
            .unwrap();
        assert_eq!(store.snapshot().unwrap().rows(), vec!["  "]);
        handle.shutdown().unwrap();
    }

    #[test]
    fn move_agent_yields_to_an_occupied_cell() {
        let (store, handle) = open_store(&["G.G"]);
        let from = Pos::new(1, 1);
        assert_eq!(
            store.move_agent(from, Pos::new(2, 1), Symbol::Empty).unwrap(),
            Some(Symbol::Coin)
        );
        assert_eq!(
            store.move_agent(Pos::new(2, 1), Pos::new(3, 1), Symbol::Coin).unwrap(),
            None
        );
        assert_eq!(store.snapshot().unwrap().rows(), vec![" GG"]);
        handle.shutdown().unwrap();
    }

    #[test]
    fn replace_if_only_writes_expected_cells() {
        let (store, handle) = open_store(&[" ."]);
        assert!(store.replace_if(Pos::new(1, 1), Symbol::Empty, Symbol::Coin).unwrap());
        assert!(!store.replace_if(Pos::new(2, 1), Symbol::Empty, Symbol::Coin).unwrap());
        assert_eq!(store.snapshot().unwrap().rows(), vec![".."]);
        handle.shutdown().unwrap();
    }

    #[test]
    fn shutdown_applies_queued_writes_then_refuses_more() {
        let (store, handle) = open_store(&["   "]);
        for x in 1..=3 {
            store.set(Pos::new(x, 1), Symbol::Coin).unwrap();
        }
        let last = handle.shutdown().unwrap();
        assert_eq!(last.rows(), vec!["..."]);
        assert!(matches!(store.drain(), Err(GameError::ShutDown)));
        assert!(matches!(
            store.set(Pos::new(1, 1), Symbol::Empty),
            Err(GameError::ShutDown)
        ));
    }

    #[test]
    fn each_mutation_requests_a_redraw() {
        let (sender, rx) = redraw::channel();
        let (store, handle) = GridStore::spawn(Grid::from_rows(&["  "]).unwrap(), sender);
        store.set(Pos::new(1, 1), Symbol::Coin).unwrap();
        store.set(Pos::new(5, 5), Symbol::Coin).unwrap();
        store.drain().unwrap();
        handle.shutdown().unwrap();
        assert_eq!(rx.try_iter().count(), 1);
    }
}
