use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::GameError;

pub const COIN_VALUE: u32 = 1;
pub const POWER_ITEM_VALUE: u32 = 10;
/// Game seconds before an eaten coin comes back.
pub const COIN_RESPAWN_SECS: u32 = 30;
/// Countdown given to items rehomed from under agents at shutdown.
pub const REHOME_RESPAWN_SECS: u32 = 1;
pub const POWER_ITEM_SPAWN_MIN_SECS: u32 = 20;
pub const POWER_ITEM_SPAWN_MAX_SECS: u32 = 40;
pub const POWER_ITEM_LIMIT: usize = 2;
pub const AUTOSAVE_SECS: u32 = 10;
pub const AGENT_SPAWN_LOCK_SECS: u32 = 5;
pub const PLAYER_MOVE_COOLDOWN: f32 = 0.5;

const DEFAULT_SECOND_MS: u64 = 1000;
const DEFAULT_RENDER_FPS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn name(self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }

    /// Agents placed when a fresh game starts.
    pub fn initial_agents(self) -> usize {
        match self {
            Difficulty::Easy => 2,
            Difficulty::Medium => 3,
            Difficulty::Hard => 4,
        }
    }

    /// Game seconds between additional agent spawns.
    pub fn spawn_interval_secs(self) -> u32 {
        match self {
            Difficulty::Easy => 60,
            Difficulty::Medium => 45,
            Difficulty::Hard => 30,
        }
    }

    /// Pause between two agent moves, in game seconds.
    pub fn agent_cooldown(self) -> f32 {
        match self {
            Difficulty::Easy => 0.6,
            Difficulty::Medium => 0.5,
            Difficulty::Hard => 0.4,
        }
    }

    /// Whether equally short paths are picked at random instead of in
    /// search order.
    pub fn randomizes_ties(self) -> bool {
        self == Difficulty::Hard
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Difficulty {
    type Err = GameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => Err(GameError::UnknownLevel(other.to_string())),
        }
    }
}

/// Wall-clock length of the game's time units.
///
/// Every countdown in the game is expressed in game seconds; tests shrink
/// `second` to run whole sessions in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timing {
    pub second: Duration,
}

impl Timing {
    pub fn new(second: Duration) -> Self {
        Self { second }
    }

    pub fn secs(&self, n: u32) -> Duration {
        self.second * n
    }

    pub fn secs_f32(&self, n: f32) -> Duration {
        self.second.mul_f32(n)
    }

    /// Granularity at which sleeping tasks re-check the running flag.
    pub fn poll_slice(&self) -> Duration {
        (self.second / 10).clamp(Duration::from_millis(1), Duration::from_millis(50))
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_SECOND_MS))
    }
}

/// Environment overrides: `PACMAN_SECOND_MS` and `PACMAN_FPS`.
pub fn read_speed_settings() -> (Timing, u64) {
    let second_ms = std::env::var("PACMAN_SECOND_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(DEFAULT_SECOND_MS);
    let render_fps = std::env::var("PACMAN_FPS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(DEFAULT_RENDER_FPS);
    (Timing::new(Duration::from_millis(second_ms)), render_fps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn harder_levels_spawn_faster_and_move_quicker() {
        assert!(Difficulty::Hard.spawn_interval_secs() < Difficulty::Medium.spawn_interval_secs());
        assert!(Difficulty::Medium.spawn_interval_secs() < Difficulty::Easy.spawn_interval_secs());
        assert!(Difficulty::Hard.agent_cooldown() < Difficulty::Easy.agent_cooldown());
        assert_eq!(Difficulty::Hard.initial_agents(), 4);
    }

    #[test]
    fn difficulty_parses_config_names() {
        assert_eq!("medium".parse::<Difficulty>().unwrap(), Difficulty::Medium);
        assert!("nightmare".parse::<Difficulty>().is_err());
        let d: Difficulty = serde_json::from_str("\"hard\"").unwrap();
        assert_eq!(d, Difficulty::Hard);
    }

    #[test]
    fn poll_slice_is_bounded() {
        let t = Timing::new(Duration::from_millis(5));
        assert_eq!(t.poll_slice(), Duration::from_millis(1));
        assert_eq!(Timing::default().poll_slice(), Duration::from_millis(50));
        assert_eq!(t.secs(4), Duration::from_millis(20));
    }
}
