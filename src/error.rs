use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::grid::Pos;

#[derive(Debug, Error)]
pub enum GameError {
    /// The grid store (or another session task) has already been shut down.
    #[error("session is shutting down")]
    ShutDown,
    #[error("config file not found: {}", .0.display())]
    ConfigMissing(PathBuf),
    #[error("config I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("config is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("config has no entry at `{0}`")]
    MissingPath(String),
    #[error("unknown level `{0}`")]
    UnknownLevel(String),
    #[error("invalid cell symbol {0:?}")]
    InvalidSymbol(char),
    #[error("maze rows have uneven widths")]
    RaggedGrid,
    #[error("position ({}, {}) is outside the maze", .0.x, .0.y)]
    OutOfBounds(Pos),
    #[error("no free cell to place the player")]
    NoSpawnCell,
}

pub type Result<T> = std::result::Result<T, GameError>;
