#![allow(dead_code)]

use std::fs;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use pacman_chase::redraw::{Frame, Renderer};
use pacman_chase::{ConfigStore, Dir, Game, MoveOutcome};

/// Counts frames instead of touching the terminal.
#[derive(Clone, Default)]
pub struct NullRenderer(pub Arc<AtomicUsize>);

impl Renderer for NullRenderer {
    fn draw(&mut self, _frame: &Frame) -> io::Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn write_config(doc: &Value) -> (tempfile::TempDir, ConfigStore) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    fs::write(&path, serde_json::to_string_pretty(doc).unwrap()).unwrap();
    let store = ConfigStore::open(&path).unwrap();
    (dir, store)
}

/// A document holding a running easy game on `maze` with the player at
/// `position`, so `StartMode::Continue` picks it up without spawning agents.
pub fn saved_game(maze: &[&str], position: [usize; 2], pending: Value) -> Value {
    json!({
        "userdata": {
            "current_play": {
                "is_alive": true,
                "score": 0,
                "position": position,
                "maze": maze,
                "pending_respawns": pending,
                "lvl": "easy"
            },
            "score": { "easy": { "highscore": 5, "last_score": 2 } },
            "settings": { "difficulty_set": "easy", "scaling_factor": 1.0 }
        },
        "maps": {
            "easy": { "data": maze, "spawn": position }
        }
    })
}

pub fn renderer() -> Box<NullRenderer> {
    Box::new(NullRenderer::default())
}

/// Retry through the move cooldown.
pub fn step(game: &Game, dir: Dir) -> MoveOutcome {
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let outcome = game.move_player(dir).unwrap();
        if outcome != MoveOutcome::CoolingDown || Instant::now() > deadline {
            return outcome;
        }
        thread::sleep(Duration::from_millis(1));
    }
}

pub fn wait_for(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(2));
    }
}
