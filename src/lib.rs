//! Core of a terminal maze-chase game: a single-writer maze store, agents
//! chasing the player along exhaustive shortest paths, respawning items,
//! a redraw dispatcher and JSON-backed persistence with resumable saves.

pub mod agent;
pub mod config;
pub mod error;
pub mod grid;
pub mod items;
pub mod pathfinding;
pub mod persist;
pub mod redraw;
pub mod render;
pub mod session;
pub mod store;

pub use config::{Difficulty, Timing};
pub use error::{GameError, Result};
pub use grid::{Dir, Grid, Pos, Symbol};
pub use persist::{ConfigStore, SaveSnapshot};
pub use session::{Game, MoveOutcome, StartMode};
