//! The JSON config document and the thread that writes it.
//!
//! Nothing here ever overwrites the document wholesale from memory: every
//! write is a batch of named-path updates applied to a freshly read copy and
//! written back in one go through a temporary file and a rename. Other
//! writers (the settings screen, a previous run) may touch the file between
//! batches.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::Difficulty;
use crate::error::{GameError, Result};
use crate::grid::{Grid, Pos};
use crate::items::PendingRespawn;

#[derive(Debug, Clone, Deserialize)]
pub struct ConfigDoc {
    pub userdata: UserData,
    #[serde(default)]
    pub maps: BTreeMap<String, LevelDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserData {
    #[serde(default)]
    pub current_play: StoredPlay,
    #[serde(default)]
    pub score: BTreeMap<String, ScoreRecord>,
    pub settings: Settings,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreRecord {
    pub highscore: u32,
    pub last_score: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub difficulty_set: Difficulty,
    pub scaling_factor: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LevelDef {
    pub data: Grid,
    pub spawn: SpawnRule,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SpawnRule {
    Fixed(Pos),
    Random(RandomSpawn),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum RandomSpawn {
    #[serde(rename = "random")]
    Random,
}

/// `userdata.current_play` as found on disk; a fresh install leaves most of
/// it empty.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoredPlay {
    pub is_alive: bool,
    pub score: u32,
    pub position: Option<Pos>,
    pub maze: Option<Grid>,
    pub pending_respawns: BTreeMap<u64, PendingRespawn>,
    pub lvl: Option<Difficulty>,
}

impl StoredPlay {
    /// A complete snapshot of a game that can be continued.
    pub fn resumable(&self) -> Option<SaveSnapshot> {
        if !self.is_alive {
            return None;
        }
        Some(SaveSnapshot {
            is_alive: true,
            score: self.score,
            position: self.position?,
            maze: self.maze.clone()?,
            pending_respawns: self.pending_respawns.clone(),
            lvl: self.lvl?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveSnapshot {
    pub is_alive: bool,
    pub score: u32,
    pub position: Pos,
    pub maze: Grid,
    pub pending_respawns: BTreeMap<u64, PendingRespawn>,
    pub lvl: Difficulty,
}

impl SaveSnapshot {
    pub fn to_batch(&self) -> Result<Batch> {
        Batch::new()
            .set("userdata.current_play.is_alive", &self.is_alive)?
            .set("userdata.current_play.score", &self.score)?
            .set("userdata.current_play.position", &self.position)?
            .set("userdata.current_play.maze", &self.maze)?
            .set("userdata.current_play.pending_respawns", &self.pending_respawns)?
            .set("userdata.current_play.lvl", &self.lvl)
    }
}

/// Named-path updates that land on disk together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    entries: Vec<(String, Value)>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<T: Serialize + ?Sized>(mut self, path: &str, value: &T) -> Result<Self> {
        self.entries.push((path.to_string(), serde_json::to_value(value)?));
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(p, _)| p.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    /// Fails when the file is missing or is not a valid config document.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            error!(target: "main", "Couldn't find config file {}", path.display());
            return Err(GameError::ConfigMissing(path));
        }
        let store = ConfigStore { path };
        store.read()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> Result<ConfigDoc> {
        Ok(serde_json::from_value(self.read_value()?)?)
    }

    pub fn read_value(&self) -> Result<Value> {
        if !self.path.exists() {
            return Err(GameError::ConfigMissing(self.path.clone()));
        }
        let text = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn level(&self, difficulty: Difficulty) -> Result<LevelDef> {
        self.read()?
            .maps
            .remove(difficulty.name())
            .ok_or_else(|| GameError::UnknownLevel(difficulty.name().to_string()))
    }

    pub fn scores(&self, difficulty: Difficulty) -> Result<ScoreRecord> {
        Ok(self
            .read()?
            .userdata
            .score
            .get(difficulty.name())
            .copied()
            .unwrap_or_default())
    }

    /// Re-read, patch every path of the batch, write back once.
    pub fn apply(&self, batch: &Batch) -> Result<()> {
        let mut doc = self.read_value()?;
        for (path, value) in &batch.entries {
            set_path(&mut doc, path, value.clone())?;
        }
        let text = serde_json::to_string_pretty(&doc)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Replace the value at a dotted path, creating missing objects on the way.
fn set_path(doc: &mut Value, path: &str, value: Value) -> Result<()> {
    let mut parts: Vec<&str> = path.split('.').collect();
    let Some(last) = parts.pop() else {
        return Err(GameError::MissingPath(path.to_string()));
    };
    let mut current = doc;
    for part in parts {
        if current.is_null() {
            *current = Value::Object(Map::new());
        }
        current = match current {
            Value::Object(map) => map
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new())),
            _ => return Err(GameError::MissingPath(path.to_string())),
        };
    }
    if current.is_null() {
        *current = Value::Object(Map::new());
    }
    match current {
        Value::Object(map) => {
            map.insert(last.to_string(), value);
            Ok(())
        }
        _ => Err(GameError::MissingPath(path.to_string())),
    }
}

enum PersistMsg {
    Apply(Batch, Option<Sender<Result<()>>>),
    Close,
}

/// Cloneable handle for submitting batches to the writer thread.
#[derive(Clone)]
pub struct Persistence {
    tx: Sender<PersistMsg>,
    store: ConfigStore,
}

pub struct PersistHandle {
    tx: Sender<PersistMsg>,
    thread: JoinHandle<()>,
}

impl Persistence {
    pub fn spawn(store: ConfigStore) -> (Persistence, PersistHandle) {
        let (tx, rx) = mpsc::channel();
        let writer_store = store.clone();
        let thread = thread::spawn(move || run_writer(writer_store, rx));
        (
            Persistence {
                tx: tx.clone(),
                store,
            },
            PersistHandle { tx, thread },
        )
    }

    pub fn submit(&self, batch: Batch) -> Result<()> {
        self.tx
            .send(PersistMsg::Apply(batch, None))
            .map_err(|_| GameError::ShutDown)
    }

    /// Returns once the batch is on disk (or failed to get there).
    pub fn submit_blocking(&self, batch: Batch) -> Result<()> {
        let (done, wait) = mpsc::channel();
        self.tx
            .send(PersistMsg::Apply(batch, Some(done)))
            .map_err(|_| GameError::ShutDown)?;
        wait.recv().map_err(|_| GameError::ShutDown)?
    }

    /// Score bookkeeping for a finished run: `last_score` always, `highscore`
    /// only when beaten. Also marks the saved game as over.
    pub fn record_death(&self, level: Difficulty, score: u32) -> Result<ScoreRecord> {
        let stored = self.store.scores(level)?;
        let mut batch = Batch::new()
            .set("userdata.current_play.is_alive", &false)?
            .set(&format!("userdata.score.{level}.last_score"), &score)?;
        let mut record = ScoreRecord {
            highscore: stored.highscore,
            last_score: score,
        };
        if score > stored.highscore {
            batch = batch.set(&format!("userdata.score.{level}.highscore"), &score)?;
            record.highscore = score;
        }
        self.submit(batch)?;
        Ok(record)
    }

    pub fn save_settings(&self, settings: Settings) -> Result<()> {
        let batch = Batch::new()
            .set("userdata.settings.scaling_factor", &settings.scaling_factor)?
            .set("userdata.settings.difficulty_set", &settings.difficulty_set)?;
        self.submit_blocking(batch)
    }
}

impl PersistHandle {
    /// Finish every queued batch, then stop the writer.
    pub fn close(self) {
        let _ = self.tx.send(PersistMsg::Close);
        if self.thread.join().is_err() {
            error!(target: "main", "persistence writer panicked");
        }
    }
}

fn run_writer(store: ConfigStore, rx: Receiver<PersistMsg>) {
    while let Ok(msg) = rx.recv() {
        match msg {
            PersistMsg::Apply(batch, done) => {
                let result = if batch.is_empty() {
                    Ok(())
                } else {
                    store.apply(&batch)
                };
                match &result {
                    Ok(()) if !batch.is_empty() => debug!(
                        target: "main",
                        "wrote {}",
                        batch.paths().collect::<Vec<_>>().join(", ")
                    ),
                    Ok(()) => {}
                    Err(e) => error!(target: "main", "config write failed: {e}"),
                }
                if let Some(done) = done {
                    let _ = done.send(result);
                }
            }
            PersistMsg::Close => break,
        }
    }
    info!(target: "main", "Saved game");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config_file(doc: &Value) -> (tempfile::TempDir, ConfigStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, serde_json::to_string(doc).unwrap()).unwrap();
        let store = ConfigStore::open(&path).unwrap();
        (dir, store)
    }

    fn base_doc() -> Value {
        json!({
            "userdata": {
                "current_play": { "is_alive": false },
                "score": { "easy": { "highscore": 12, "last_score": 3 } },
                "settings": { "difficulty_set": "easy", "scaling_factor": 1.0 }
            },
            "maps": {
                "easy": { "data": ["#####", "#. .#", "#####"], "spawn": [3, 2] },
                "hard": { "data": ["   "], "spawn": "random" }
            }
        })
    }

    #[test]
    fn missing_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = ConfigStore::open(dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, GameError::ConfigMissing(_)));
    }

    #[test]
    fn levels_parse_both_spawn_rules() {
        let (_dir, store) = config_file(&base_doc());
        let easy = store.level(Difficulty::Easy).unwrap();
        assert_eq!(easy.spawn, SpawnRule::Fixed(Pos::new(3, 2)));
        assert_eq!(easy.data.width(), 5);
        let hard = store.level(Difficulty::Hard).unwrap();
        assert_eq!(hard.spawn, SpawnRule::Random(RandomSpawn::Random));
        assert!(matches!(
            store.level(Difficulty::Medium),
            Err(GameError::UnknownLevel(_))
        ));
    }

    #[test]
    fn batch_updates_only_named_paths() {
        let (_dir, store) = config_file(&base_doc());
        let batch = Batch::new()
            .set("userdata.score.hard.highscore", &40)
            .unwrap()
            .set("userdata.current_play.score", &7)
            .unwrap();
        store.apply(&batch).unwrap();

        let doc = store.read_value().unwrap();
        assert_eq!(doc["userdata"]["score"]["hard"]["highscore"], json!(40));
        assert_eq!(doc["userdata"]["score"]["easy"]["highscore"], json!(12));
        assert_eq!(doc["userdata"]["current_play"]["score"], json!(7));
        assert_eq!(doc["userdata"]["current_play"]["is_alive"], json!(false));
        assert_eq!(doc["maps"]["hard"]["spawn"], json!("random"));
    }

    #[test]
    fn path_through_a_scalar_is_refused() {
        let mut doc = json!({ "a": 1 });
        assert!(set_path(&mut doc, "a.b", json!(2)).is_err());
        assert_eq!(doc, json!({ "a": 1 }));
    }

    #[test]
    fn death_updates_highscore_only_when_beaten() {
        let (_dir, store) = config_file(&base_doc());
        let (persist, handle) = Persistence::spawn(store.clone());

        let record = persist.record_death(Difficulty::Easy, 5).unwrap();
        assert_eq!(record, ScoreRecord { highscore: 12, last_score: 5 });
        persist.submit_blocking(Batch::new()).unwrap();
        assert_eq!(store.scores(Difficulty::Easy).unwrap(), record);

        let record = persist.record_death(Difficulty::Easy, 30).unwrap();
        assert_eq!(record, ScoreRecord { highscore: 30, last_score: 30 });
        handle.close();
        assert_eq!(store.scores(Difficulty::Easy).unwrap(), record);
        assert!(!store.read().unwrap().userdata.current_play.is_alive);
    }

    #[test]
    fn settings_are_written_back() {
        let (_dir, store) = config_file(&base_doc());
        let (persist, handle) = Persistence::spawn(store.clone());
        persist
            .save_settings(Settings {
                difficulty_set: Difficulty::Hard,
                scaling_factor: 1.5,
            })
            .unwrap();
        handle.close();
        let settings = store.read().unwrap().userdata.settings;
        assert_eq!(settings.difficulty_set, Difficulty::Hard);
        assert_eq!(settings.scaling_factor, 1.5);
    }

    #[test]
    fn snapshot_round_trips_through_the_document() {
        let (_dir, store) = config_file(&base_doc());
        let mut pending = BTreeMap::new();
        pending.insert(
            3,
            PendingRespawn::new(crate::grid::Symbol::Coin, Pos::new(2, 2), 20),
        );
        let snapshot = SaveSnapshot {
            is_alive: true,
            score: 9,
            position: Pos::new(4, 2),
            maze: Grid::from_rows(&["#####", "#  G#", "#####"]).unwrap(),
            pending_respawns: pending,
            lvl: Difficulty::Easy,
        };
        store.apply(&snapshot.to_batch().unwrap()).unwrap();
        let play = store.read().unwrap().userdata.current_play;
        assert_eq!(play.resumable(), Some(snapshot));
    }
}
