//! Single consumer of "something changed" signals.
//!
//! Producers (the grid store, the player, the session) only enqueue signals;
//! one thread pulls them, coalesces whatever queued up meanwhile, takes a
//! drained snapshot and hands it to the renderer. Two draws never overlap.

use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use log::{debug, trace, warn};

use crate::config::Difficulty;
use crate::error::{GameError, Result};
use crate::grid::{Grid, Pos};

/// Everything a renderer needs for one picture, captured at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub grid: Grid,
    pub player: Pos,
    pub alive: bool,
    pub score: u32,
    pub highscore: u32,
    pub last_score: u32,
    pub level: Difficulty,
}

pub trait Renderer: Send {
    fn draw(&mut self, frame: &Frame) -> io::Result<()>;
}

/// Called with the frame that was just drawn.
pub type Overlay = Box<dyn FnOnce(&Frame) + Send>;

pub enum RedrawSignal {
    Requested,
    Overlay(Overlay),
    Exit,
}

#[derive(Clone)]
pub struct RedrawSender {
    tx: Sender<RedrawSignal>,
}

impl RedrawSender {
    pub fn request(&self) {
        if self.tx.send(RedrawSignal::Requested).is_err() {
            trace!(target: "main", "redraw requested after dispatcher exit");
        }
    }

    pub fn overlay(&self, overlay: Overlay) {
        if self.tx.send(RedrawSignal::Overlay(overlay)).is_err() {
            trace!(target: "main", "overlay dropped after dispatcher exit");
        }
    }
}

pub fn channel() -> (RedrawSender, Receiver<RedrawSignal>) {
    let (tx, rx) = mpsc::channel();
    (RedrawSender { tx }, rx)
}

pub struct RedrawDispatcher {
    tx: Sender<RedrawSignal>,
    thread: Option<JoinHandle<()>>,
}

impl RedrawDispatcher {
    /// `source` must build the frame from a drained read of the grid store.
    pub fn spawn<F>(
        sender: &RedrawSender,
        rx: Receiver<RedrawSignal>,
        mut renderer: Box<dyn Renderer>,
        source: F,
    ) -> Self
    where
        F: Fn() -> Result<Frame> + Send + 'static,
    {
        let thread = thread::spawn(move || run_dispatcher(rx, renderer.as_mut(), source));
        Self {
            tx: sender.tx.clone(),
            thread: Some(thread),
        }
    }

    pub fn shutdown(mut self) {
        let _ = self.tx.send(RedrawSignal::Exit);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!(target: "main", "redraw thread panicked");
            }
        }
    }
}

fn run_dispatcher<F>(rx: Receiver<RedrawSignal>, renderer: &mut dyn Renderer, source: F)
where
    F: Fn() -> Result<Frame>,
{
    let mut store_open = true;
    while let Ok(signal) = rx.recv() {
        let mut overlays = Vec::new();
        let mut exit = false;
        match signal {
            RedrawSignal::Requested => {}
            RedrawSignal::Overlay(f) => overlays.push(f),
            RedrawSignal::Exit => break,
        }
        while let Ok(next) = rx.try_recv() {
            match next {
                RedrawSignal::Requested => {}
                RedrawSignal::Overlay(f) => overlays.push(f),
                RedrawSignal::Exit => {
                    exit = true;
                    break;
                }
            }
        }

        if store_open {
            match source() {
                Ok(frame) => {
                    if let Err(e) = renderer.draw(&frame) {
                        warn!(target: "main", "draw failed: {e}");
                    }
                    for overlay in overlays {
                        overlay(&frame);
                    }
                }
                Err(GameError::ShutDown) => {
                    debug!(target: "main", "grid store closed, redraws stop");
                    store_open = false;
                }
                Err(e) => warn!(target: "main", "could not build frame: {e}"),
            }
        }
        if exit {
            break;
        }
    }
    debug!(target: "main", "redraw thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct Counting(Arc<AtomicUsize>);

    impl Renderer for Counting {
        fn draw(&mut self, _frame: &Frame) -> io::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn frame() -> Frame {
        Frame {
            grid: Grid::from_rows(&[" ."]).unwrap(),
            player: Pos::new(1, 1),
            alive: true,
            score: 3,
            highscore: 9,
            last_score: 1,
            level: Difficulty::Easy,
        }
    }

    #[test]
    fn draws_and_runs_overlays_then_exits() {
        let draws = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(None));
        let (sender, rx) = channel();
        let dispatcher =
            RedrawDispatcher::spawn(&sender, rx, Box::new(Counting(draws.clone())), || Ok(frame()));

        let slot = seen.clone();
        sender.overlay(Box::new(move |f: &Frame| {
            *slot.lock().unwrap() = Some(f.score);
        }));
        sender.request();
        dispatcher.shutdown();

        let n = draws.load(Ordering::SeqCst);
        assert!((1..=2).contains(&n), "coalesced draws, got {n}");
        assert_eq!(*seen.lock().unwrap(), Some(3));
        // Requests after exit are silently dropped.
        sender.request();
    }

    #[test]
    fn stops_drawing_once_the_store_is_gone() {
        let draws = Arc::new(AtomicUsize::new(0));
        let (sender, rx) = channel();
        let dispatcher = RedrawDispatcher::spawn(&sender, rx, Box::new(Counting(draws.clone())), || {
            Err(GameError::ShutDown)
        });
        for _ in 0..5 {
            sender.request();
        }
        dispatcher.shutdown();
        assert_eq!(draws.load(Ordering::SeqCst), 0);
    }
}
