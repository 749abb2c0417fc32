//! One running game: the shared session context and its task lifecycle.
//!
//! Every background task gets an `Arc<Session>` at creation. The grid is only
//! reachable through the store inside it; the player, the agent table and the
//! pending-respawn table sit behind their own mutexes, each with one writer
//! (the session owner for the player, each agent's own task for its entry,
//! the respawn tasks for their records).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::agent::{self, Agent};
use crate::config::{
    Difficulty, Timing, AUTOSAVE_SECS, COIN_RESPAWN_SECS, COIN_VALUE, PLAYER_MOVE_COOLDOWN,
    POWER_ITEM_VALUE, REHOME_RESPAWN_SECS,
};
use crate::error::{GameError, Result};
use crate::grid::{Dir, Grid, Pos, Symbol};
use crate::items::{self, PendingRespawn, RespawnKeys};
use crate::persist::{
    ConfigStore, PersistHandle, Persistence, SaveSnapshot, ScoreRecord, SpawnRule,
};
use crate::redraw::{self, Frame, RedrawDispatcher, RedrawSender, Renderer};
use crate::store::{GridStore, StoreHandle};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Player {
    pub pos: Pos,
    /// Cells per move.
    pub speed: usize,
    /// Game seconds between two moves.
    pub move_cooldown: f32,
    pub alive: bool,
    pub score: u32,
    ready_at: Option<Instant>,
}

impl Player {
    pub fn new(pos: Pos, score: u32) -> Self {
        Self {
            pos,
            speed: 1,
            move_cooldown: PLAYER_MOVE_COOLDOWN,
            alive: true,
            score,
            ready_at: None,
        }
    }

    fn can_move(&self, now: Instant) -> bool {
        self.ready_at.map_or(true, |t| now >= t)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    NewGame,
    /// Continue the saved game, or start a new one when there is none.
    Continue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    Moved,
    Collected(Symbol),
    Blocked,
    CoolingDown,
    Killed,
    Dead,
}

pub struct Session {
    running: AtomicBool,
    pub(crate) store: GridStore,
    redraw: RedrawSender,
    persist: Persistence,
    level: Difficulty,
    timing: Timing,
    pub(crate) player: Mutex<Player>,
    scores: Mutex<ScoreRecord>,
    pub(crate) agents: Mutex<BTreeMap<u32, Agent>>,
    pub(crate) respawns: Mutex<BTreeMap<u64, PendingRespawn>>,
    pub(crate) respawn_keys: RespawnKeys,
    agent_tasks: Mutex<Vec<JoinHandle<()>>>,
    respawn_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Session {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.redraw.request();
    }

    pub fn level(&self) -> Difficulty {
        self.level
    }

    pub fn timing(&self) -> Timing {
        self.timing
    }

    pub fn store(&self) -> &GridStore {
        &self.store
    }

    pub fn player(&self) -> Player {
        *lock(&self.player)
    }

    pub fn scores(&self) -> ScoreRecord {
        *lock(&self.scores)
    }

    pub fn agents(&self) -> Vec<Agent> {
        lock(&self.agents).values().copied().collect()
    }

    pub fn pending_respawns(&self) -> BTreeMap<u64, PendingRespawn> {
        lock(&self.respawns).clone()
    }

    /// Sleep for `total`, waking early when the session stops. Returns
    /// whether the session is still running.
    pub fn pause(&self, total: Duration) -> bool {
        let slice = self.timing.poll_slice();
        let deadline = Instant::now() + total;
        loop {
            if !self.is_running() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(slice.min(deadline - now));
        }
    }

    pub(crate) fn track_agent_task(&self, handle: JoinHandle<()>) {
        track(&self.agent_tasks, handle, "agent");
    }

    pub(crate) fn track_respawn_task(&self, handle: JoinHandle<()>) {
        track(&self.respawn_tasks, handle, "respawn");
    }

    /// Countdown threads not yet joined.
    pub fn respawn_task_count(&self) -> usize {
        lock(&self.respawn_tasks).len()
    }

    /// Drained picture of the game for the renderer.
    pub fn frame(&self) -> Result<Frame> {
        let grid = self.store.snapshot()?;
        let player = self.player();
        let scores = self.scores();
        Ok(Frame {
            grid,
            player: player.pos,
            alive: player.alive,
            score: player.score,
            highscore: scores.highscore,
            last_score: scores.last_score,
            level: self.level,
        })
    }

    pub fn snapshot_of(&self, maze: Grid) -> SaveSnapshot {
        let player = self.player();
        SaveSnapshot {
            is_alive: player.alive,
            score: player.score,
            position: player.pos,
            maze,
            pending_respawns: self.pending_respawns(),
            lvl: self.level,
        }
    }

    pub fn current_snapshot(&self) -> Result<SaveSnapshot> {
        let maze = self.store.snapshot()?;
        Ok(self.snapshot_of(maze))
    }

    pub fn save(&self) -> Result<()> {
        let snapshot = self.current_snapshot()?;
        self.persist.submit_blocking(snapshot.to_batch()?)
    }

    /// Ends the run: scores are recorded once, the session stops.
    pub fn kill_player(&self) {
        let score = {
            let mut player = lock(&self.player);
            if !player.alive {
                return;
            }
            player.alive = false;
            player.score
        };
        info!(target: "main", "Player killed");
        match self.persist.record_death(self.level, score) {
            Ok(record) => *lock(&self.scores) = record,
            Err(e) => error!(target: "main", "could not record score: {e}"),
        }
        self.stop();
    }

    /// Move the player one step, handling whatever it walks into.
    pub fn move_player(self: &Arc<Self>, dir: Dir) -> Result<MoveOutcome> {
        let now = Instant::now();
        // A respawn commit holds this lock too, so nothing lands on the
        // target between reading it and moving there.
        let (to, symbol) = {
            let mut player = lock(&self.player);
            if !player.alive {
                return Ok(MoveOutcome::Dead);
            }
            if !player.can_move(now) {
                return Ok(MoveOutcome::CoolingDown);
            }
            let mut target = Some(player.pos);
            for _ in 0..player.speed {
                target = target.and_then(|p| p.step(dir));
            }
            let Some(to) = target else {
                return Ok(MoveOutcome::Blocked);
            };
            let symbol = match self.store.cell(to)? {
                None | Some(Symbol::Wall) => return Ok(MoveOutcome::Blocked),
                Some(symbol) => symbol,
            };
            player.pos = to;
            player.ready_at = Some(now + self.timing.secs_f32(player.move_cooldown));
            (to, symbol)
        };
        debug!(target: "main", "player move: {to}");

        let outcome = self.enter_cell(to, symbol)?;
        self.redraw.request();
        Ok(outcome)
    }

    /// The player now stands on `pos`, which held `seen` a moment ago.
    fn enter_cell(self: &Arc<Self>, pos: Pos, seen: Symbol) -> Result<MoveOutcome> {
        match seen {
            Symbol::Coin | Symbol::PowerItem => {
                if !self.store.replace_if(pos, seen, Symbol::Empty)? {
                    // Someone got there first; look again.
                    return match self.store.cell(pos)? {
                        Some(Symbol::Agent) => {
                            self.kill_player();
                            Ok(MoveOutcome::Killed)
                        }
                        _ => Ok(MoveOutcome::Moved),
                    };
                }
                let value = if seen == Symbol::Coin {
                    COIN_VALUE
                } else {
                    POWER_ITEM_VALUE
                };
                lock(&self.player).score += value;
                if seen == Symbol::Coin {
                    debug!(target: "coin", "collected coin at {pos}");
                    items::schedule_respawn(self, Symbol::Coin, pos, COIN_RESPAWN_SECS);
                } else {
                    debug!(target: "coin", "collected power item at {pos}");
                }
                Ok(MoveOutcome::Collected(seen))
            }
            Symbol::Agent => {
                self.kill_player();
                Ok(MoveOutcome::Killed)
            }
            Symbol::Empty | Symbol::Wall => Ok(MoveOutcome::Moved),
        }
    }

    /// Turn what agents are standing on into pending respawns so the next
    /// session puts it back.
    fn rehome_agents(&self) {
        let agents = self.agents();
        let mut table = lock(&self.respawns);
        for agent in agents {
            if agent.under == Symbol::Empty {
                continue;
            }
            let mut record = PendingRespawn::new(agent.under, agent.pos, REHOME_RESPAWN_SECS);
            record.rehomed = true;
            table.insert(self.respawn_keys.next(), record);
        }
    }
}

/// A started session plus the handles needed to stop it in order.
pub struct Game {
    session: Arc<Session>,
    store: StoreHandle,
    dispatcher: RedrawDispatcher,
    persist: PersistHandle,
    workers: Vec<JoinHandle<()>>,
}

impl Game {
    pub fn start(
        config: ConfigStore,
        mode: StartMode,
        timing: Timing,
        renderer: Box<dyn Renderer>,
    ) -> Result<Game> {
        let mut rng = rand::thread_rng();
        info!(target: "main", "loading config {}", config.path().display());
        let doc = config.read()?;
        let saved = match mode {
            StartMode::Continue => doc.userdata.current_play.resumable(),
            StartMode::NewGame => None,
        };

        let fresh = saved.is_none();
        info!(target: "main", "loading map");
        let (level, grid, spawn, score, pending) = match saved {
            Some(snapshot) => {
                info!(target: "main", "continuing saved {} game", snapshot.lvl);
                (
                    snapshot.lvl,
                    snapshot.maze,
                    snapshot.position,
                    snapshot.score,
                    snapshot.pending_respawns,
                )
            }
            None => {
                let level = doc.userdata.settings.difficulty_set;
                let def = config.level(level)?;
                let spawn = match def.spawn {
                    SpawnRule::Fixed(pos) => pos,
                    SpawnRule::Random(_) => random_spawn(&def.data, &mut rng)?,
                };
                (level, def.data, spawn, 0, BTreeMap::new())
            }
        };
        if !grid.is_open(spawn) {
            return Err(GameError::NoSpawnCell);
        }
        let scores = doc
            .userdata
            .score
            .get(level.name())
            .copied()
            .unwrap_or_default();

        let respawn_keys = RespawnKeys::after(&pending);

        let (redraw_tx, redraw_rx) = redraw::channel();
        let (store, store_handle) = GridStore::spawn(grid, redraw_tx.clone());
        let (persist, persist_handle) = Persistence::spawn(config);

        let session = Arc::new(Session {
            running: AtomicBool::new(true),
            store,
            redraw: redraw_tx.clone(),
            persist,
            level,
            timing,
            player: Mutex::new(Player::new(spawn, score)),
            scores: Mutex::new(scores),
            agents: Mutex::new(BTreeMap::new()),
            respawns: Mutex::new(BTreeMap::new()),
            respawn_keys,
            agent_tasks: Mutex::new(Vec::new()),
            respawn_tasks: Mutex::new(Vec::new()),
        });

        let source = Arc::clone(&session);
        let dispatcher =
            RedrawDispatcher::spawn(&redraw_tx, redraw_rx, renderer, move || source.frame());

        info!(target: "main", "spawning player at {spawn}");
        let under_player = session.store.cell(spawn)?.unwrap_or(Symbol::Empty);
        session.enter_cell(spawn, under_player)?;

        let adopted = agent::adopt_agents(&session, pending)?;
        if !adopted.is_empty() {
            info!(target: "main", "resumed {} agents", adopted.len());
        }

        session.store.drain()?;
        session.redraw.request();

        let mut workers = Vec::new();
        let s = Arc::clone(&session);
        workers.push(thread::spawn(move || agent::run_spawner(s, fresh)));
        let s = Arc::clone(&session);
        workers.push(thread::spawn(move || items::run_power_spawner(s)));
        let s = Arc::clone(&session);
        workers.push(thread::spawn(move || run_autosave(s)));

        Ok(Game {
            session,
            store: store_handle,
            dispatcher,
            persist: persist_handle,
            workers,
        })
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn is_running(&self) -> bool {
        self.session.is_running()
    }

    pub fn move_player(&self, dir: Dir) -> Result<MoveOutcome> {
        self.session.move_player(dir)
    }

    /// Stop every task in dependency order and write the final save.
    ///
    /// Producers stop first, then the respawn countdowns, then the grid store
    /// and the redraw thread. Only once nothing can touch the grid any more is
    /// the final snapshot taken and written.
    pub fn shutdown(self) -> Result<SaveSnapshot> {
        let Game {
            session,
            store,
            dispatcher,
            persist,
            workers,
        } = self;
        session.stop();

        join_all(workers, "worker");
        let agents = std::mem::take(&mut *lock(&session.agent_tasks));
        join_all(agents, "agent");
        loop {
            let respawns = std::mem::take(&mut *lock(&session.respawn_tasks));
            if respawns.is_empty() {
                break;
            }
            join_all(respawns, "respawn");
        }

        let grid = store.shutdown();
        dispatcher.shutdown();
        let grid = match grid {
            Ok(grid) => grid,
            Err(e) => {
                persist.close();
                return Err(e);
            }
        };

        session.rehome_agents();
        let snapshot = session.snapshot_of(grid);
        info!(target: "main", "doing final save, please wait");
        let saved = snapshot
            .to_batch()
            .and_then(|batch| session.persist.submit_blocking(batch));
        persist.close();
        saved?;
        Ok(snapshot)
    }
}

/// Keep `handle`, joining the tasks that already finished.
fn track(tasks: &Mutex<Vec<JoinHandle<()>>>, handle: JoinHandle<()>, what: &str) {
    let finished = {
        let mut tasks = lock(tasks);
        let (finished, live): (Vec<_>, Vec<_>) = std::mem::take(&mut *tasks)
            .into_iter()
            .partition(|h| h.is_finished());
        *tasks = live;
        tasks.push(handle);
        finished
    };
    join_all(finished, what);
}

fn join_all(handles: Vec<JoinHandle<()>>, what: &str) {
    for handle in handles {
        if handle.join().is_err() {
            warn!(target: "main", "{what} thread panicked");
        }
    }
}

fn random_spawn(grid: &Grid, rng: &mut impl Rng) -> Result<Pos> {
    grid.cells_matching(&[Symbol::Empty, Symbol::Coin])
        .choose(rng)
        .copied()
        .ok_or(GameError::NoSpawnCell)
}

fn run_autosave(session: Arc<Session>) {
    let every = session.timing.secs(AUTOSAVE_SECS);
    while session.pause(every) {
        debug!(target: "main", "saving ...");
        match session.save() {
            Ok(()) => debug!(target: "main", "saved"),
            Err(GameError::ShutDown) => break,
            Err(e) => warn!(target: "main", "autosave failed: {e}"),
        }
    }
    debug!(target: "main", "exiting save thread ...");
}
