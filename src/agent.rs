//! Chasing agents: spawning, adoption on resume and the per-agent move loop.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use log::{debug, info, warn};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::config::AGENT_SPAWN_LOCK_SECS;
use crate::error::{GameError, Result};
use crate::grid::{Pos, Symbol};
use crate::items::{self, PendingRespawn};
use crate::pathfinding;
use crate::session::{lock, Session};

/// Attempts at claiming a random free cell before giving up on a spawn.
const SPAWN_ATTEMPTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Agent {
    pub id: u32,
    pub pos: Pos,
    /// What the agent's marker is covering, put back when it leaves.
    pub under: Symbol,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Moved(Pos),
    /// No route to the player right now.
    Waiting,
    /// Another agent took the cell first.
    Yielded,
    Caught,
    Gone,
}

fn register(session: &Session, pos: Pos, under: Symbol) -> u32 {
    let mut agents = lock(&session.agents);
    let id = agents.keys().next_back().map_or(0, |k| k + 1);
    agents.insert(id, Agent { id, pos, under });
    id
}

fn start(session: &Arc<Session>, id: u32) {
    let task = Arc::clone(session);
    let handle = thread::spawn(move || run_agent(task, id));
    session.track_agent_task(handle);
}

/// Place a new agent on a random empty or coin cell away from the player.
pub fn spawn_agent(session: &Arc<Session>, rng: &mut impl Rng) -> Result<Option<u32>> {
    for _ in 0..SPAWN_ATTEMPTS {
        let grid = session.store.snapshot()?;
        let player = session.player().pos;
        let mut cells = grid.cells_matching(&[Symbol::Empty, Symbol::Coin]);
        cells.retain(|p| *p != player);
        let Some(&pos) = cells.choose(rng) else {
            debug!(target: "main", "no free cell for an agent");
            return Ok(None);
        };
        let under = grid.get(pos).unwrap_or(Symbol::Empty);
        if session.store.replace_if(pos, under, Symbol::Agent)? {
            let id = register(session, pos, under);
            info!(target: "main", "spawning agent{id} at {pos}");
            start(session, id);
            return Ok(Some(id));
        }
    }
    Ok(None)
}

/// Give every agent marker in a resumed maze its own task. A record rehomed
/// at shutdown on the marker's cell is what the agent was covering, so it
/// becomes the agent's `under`. Every other record keeps its countdown.
pub fn adopt_agents(
    session: &Arc<Session>,
    mut pending: BTreeMap<u64, PendingRespawn>,
) -> Result<Vec<u32>> {
    let grid = session.store.snapshot()?;
    let mut adopted = Vec::new();
    for pos in grid.cells_matching(&[Symbol::Agent]) {
        let covered = pending
            .iter()
            .find(|(_, r)| r.rehomed && r.position == pos)
            .map(|(key, r)| (*key, r.symbol));
        let under = match covered {
            Some((key, symbol)) => {
                pending.remove(&key);
                symbol
            }
            None => Symbol::Empty,
        };
        let id = register(session, pos, under);
        debug!(target: "main", "adopting agent{id} at {pos}");
        start(session, id);
        adopted.push(id);
    }
    items::resume_respawns(session, pending);
    Ok(adopted)
}

/// One chase step for agent `id`: route to the player on a drained grid and
/// move one cell along it.
pub fn agent_step(session: &Session, id: u32, rng: &mut impl Rng) -> Result<StepOutcome> {
    let Some(agent) = lock(&session.agents).get(&id).copied() else {
        return Ok(StepOutcome::Gone);
    };
    let grid = session.store.snapshot()?;
    let target = session.player().pos;

    let began = Instant::now();
    let first = pathfinding::shortest_steps(&grid, agent.pos, target, session.level(), rng)
        .and_then(|path| path.first().copied());
    debug!(target: "main", "agent{id} time to calculate way: {:?}", began.elapsed());
    let Some(to) = first.and_then(|dir| grid.neighbor(agent.pos, dir)) else {
        return Ok(StepOutcome::Waiting);
    };

    let Some(previous) = session.store.move_agent(agent.pos, to, agent.under)? else {
        return Ok(StepOutcome::Yielded);
    };
    if let Some(a) = lock(&session.agents).get_mut(&id) {
        a.pos = to;
        a.under = previous;
    }

    let player = session.player();
    if player.alive && player.pos == to {
        info!(target: "main", "agent{id} caught the player at {to}");
        session.kill_player();
        return Ok(StepOutcome::Caught);
    }
    Ok(StepOutcome::Moved(to))
}

fn run_agent(session: Arc<Session>, id: u32) {
    let timing = session.timing();
    if !session.pause(timing.secs(AGENT_SPAWN_LOCK_SECS)) {
        return;
    }
    let cooldown = timing.secs_f32(session.level().agent_cooldown());
    let mut rng = rand::thread_rng();
    while session.is_running() {
        match agent_step(&session, id, &mut rng) {
            Ok(StepOutcome::Gone) | Err(GameError::ShutDown) => break,
            Ok(_) => {}
            Err(e) => warn!(target: "main", "agent{id} step failed: {e}"),
        }
        if !session.pause(cooldown) {
            break;
        }
    }
    debug!(target: "main", "agent{id} exiting");
}

/// Places the difficulty's starting agents on a fresh game, then one more
/// every spawn interval until the session stops.
pub fn run_spawner(session: Arc<Session>, fresh: bool) {
    let level = session.level();
    let mut rng = rand::thread_rng();
    if fresh {
        for _ in 0..level.initial_agents() {
            if !session.is_running() {
                return;
            }
            if let Err(e) = spawn_agent(&session, &mut rng) {
                warn!(target: "main", "initial agent spawn failed: {e}");
            }
        }
    }
    let interval = session.timing().secs(level.spawn_interval_secs());
    while session.pause(interval) {
        match spawn_agent(&session, &mut rng) {
            Ok(_) => {}
            Err(GameError::ShutDown) => break,
            Err(e) => warn!(target: "main", "agent spawn failed: {e}"),
        }
    }
    debug!(target: "main", "agent spawner exiting");
}
