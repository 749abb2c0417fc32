//! Collectibles: coin respawn countdowns and the power-item spawner.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use log::{debug, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::{
    COIN_RESPAWN_SECS, POWER_ITEM_LIMIT, POWER_ITEM_SPAWN_MAX_SECS, POWER_ITEM_SPAWN_MIN_SECS,
};
use crate::error::{GameError, Result};
use crate::grid::{Pos, Symbol};
use crate::session::{lock, Session};

/// A symbol waiting to reappear. `remaining` is rewritten every game second
/// so a save taken mid-countdown resumes where it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRespawn {
    pub symbol: Symbol,
    pub position: Pos,
    pub remaining: u32,
    /// Set on records written at shutdown for what an agent was covering.
    #[serde(default, skip_serializing_if = "is_false")]
    pub rehomed: bool,
}

impl PendingRespawn {
    pub fn new(symbol: Symbol, position: Pos, remaining: u32) -> Self {
        Self {
            symbol,
            position,
            remaining,
            rehomed: false,
        }
    }
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

/// Hands out respawn keys. Keys only grow, so a finished record's key is
/// never given to a later one.
#[derive(Debug)]
pub struct RespawnKeys(AtomicU64);

impl RespawnKeys {
    /// Starts one past the largest key in `table`.
    pub fn after(table: &BTreeMap<u64, PendingRespawn>) -> Self {
        Self(AtomicU64::new(table.keys().next_back().map_or(0, |k| k + 1)))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// Register a respawn and start its countdown task.
pub fn schedule_respawn(session: &Arc<Session>, symbol: Symbol, position: Pos, countdown: u32) -> u64 {
    let key = session.respawn_keys.next();
    lock(&session.respawns).insert(key, PendingRespawn::new(symbol, position, countdown));
    start_countdown(session, key);
    key
}

/// Re-register records loaded from a save under fresh keys, keeping their
/// remaining counts.
pub fn resume_respawns(session: &Arc<Session>, pending: BTreeMap<u64, PendingRespawn>) {
    for record in pending.into_values() {
        let key = session.respawn_keys.next();
        lock(&session.respawns).insert(key, record);
        debug!(
            target: "coin",
            "resuming respawn of {:?} at {} in {}",
            record.symbol, record.position, record.remaining
        );
        start_countdown(session, key);
    }
}

fn start_countdown(session: &Arc<Session>, key: u64) {
    let task = Arc::clone(session);
    let handle = thread::spawn(move || run_countdown(&task, key));
    session.track_respawn_task(handle);
}

/// One game second passed for `key`. Returns the count left, or `None` when
/// the record is gone.
fn tick(session: &Session, key: u64) -> Option<u32> {
    let mut table = lock(&session.respawns);
    let record = table.get_mut(&key)?;
    record.remaining = record.remaining.saturating_sub(1);
    Some(record.remaining)
}

fn run_countdown(session: &Session, key: u64) {
    let second = session.timing().second;
    loop {
        let remaining = match lock(&session.respawns).get(&key) {
            Some(record) => record.remaining,
            None => return,
        };
        if remaining == 0 {
            break;
        }
        // Stopping leaves the record in the table for the final save.
        if !session.pause(second) {
            return;
        }
        tick(session, key);
    }
    match place(session, key) {
        Ok(()) | Err(GameError::ShutDown) => {}
        Err(e) => warn!(target: "coin", "respawn {key} failed: {e}"),
    }
}

/// Put the symbol back if its cell is free, then forget the record either way.
fn place(session: &Session, key: u64) -> Result<()> {
    let Some(record) = lock(&session.respawns).get(&key).copied() else {
        return Ok(());
    };
    // Held through the commit so the player can't step onto the cell between
    // the check and the write.
    let player = lock(&session.player);
    let placed = player.pos != record.position
        && session
            .store
            .replace_if(record.position, Symbol::Empty, record.symbol)?;
    drop(player);
    lock(&session.respawns).remove(&key);
    if placed {
        debug!(target: "coin", "respawned {:?} at {}", record.symbol, record.position);
    } else {
        debug!(target: "coin", "couldn't respawn {:?} at {}", record.symbol, record.position);
    }
    Ok(())
}

pub fn run_power_spawner(session: Arc<Session>) {
    let mut rng = rand::thread_rng();
    loop {
        let wait = rng.gen_range(POWER_ITEM_SPAWN_MIN_SECS..=POWER_ITEM_SPAWN_MAX_SECS);
        if !session.pause(session.timing().secs(wait)) {
            break;
        }
        match place_power_item(&session, &mut rng) {
            Ok(_) => {}
            Err(GameError::ShutDown) => break,
            Err(e) => warn!(target: "coin", "power item spawn failed: {e}"),
        }
    }
    debug!(target: "coin", "power item spawner exiting");
}

/// Drop a power item on a random free cell, unless the maze already holds
/// the maximum. A coin it lands on comes back later.
pub fn place_power_item(session: &Arc<Session>, rng: &mut impl Rng) -> Result<Option<Pos>> {
    let grid = session.store.snapshot()?;
    if grid.count(Symbol::PowerItem) >= POWER_ITEM_LIMIT {
        return Ok(None);
    }
    let player = session.player().pos;
    let mut cells = grid.cells_matching(&[Symbol::Empty, Symbol::Coin]);
    cells.retain(|p| *p != player);
    let Some(&pos) = cells.choose(rng) else {
        debug!(target: "coin", "no free cell for a power item");
        return Ok(None);
    };
    let previous = grid.get(pos).unwrap_or(Symbol::Empty);
    if !session.store.replace_if(pos, previous, Symbol::PowerItem)? {
        return Ok(None);
    }
    debug!(target: "coin", "power item at {pos}");
    if previous == Symbol::Coin {
        schedule_respawn(session, Symbol::Coin, pos, COIN_RESPAWN_SECS);
    }
    Ok(Some(pos))
}
