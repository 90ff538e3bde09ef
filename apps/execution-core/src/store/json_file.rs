//! File-backed store with atomic replace.
//!
//! Layout of a profile directory:
//!
//! ```text
//! <dir>/state.json       positions + cooldowns
//! <dir>/state.json.tmp   transient, only during a write
//! <dir>/trades.jsonl     append-only trade history
//! ```
//!
//! Every mutation serialises the whole document to `state.json.tmp`,
//! fsyncs it and renames it over `state.json`. The in-memory copy only
//! advances after the rename, so a failed write leaves both at the previous
//! state.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{PositionStore, StoreError};
use crate::models::{CooldownEntry, PosKey, Position, TradeRecord};

const STATE_FILE: &str = "state.json";
const TMP_FILE: &str = "state.json.tmp";
const TRADES_FILE: &str = "trades.jsonl";
const DOCUMENT_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StateDocument {
    version: u32,
    #[serde(default)]
    positions: BTreeMap<String, Position>,
    #[serde(default)]
    cooldowns: BTreeMap<String, CooldownEntry>,
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// One profile's state on disk.
#[derive(Debug)]
pub struct JsonFileStore {
    dir: PathBuf,
    state: Mutex<StateDocument>,
}

impl JsonFileStore {
    /// Open (or create) the store in `dir`.
    ///
    /// A leftover temp file from an interrupted write is discarded; the
    /// last completed document wins.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(io_err(&dir))?;

        let tmp = dir.join(TMP_FILE);
        if tmp.is_file() {
            warn!(path = %tmp.display(), "Discarding incomplete state write");
            fs::remove_file(&tmp).map_err(io_err(&tmp))?;
        }

        let path = dir.join(STATE_FILE);
        let document = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice::<StateDocument>(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StateDocument {
                version: DOCUMENT_VERSION,
                ..StateDocument::default()
            },
            Err(e) => return Err(io_err(&path)(e)),
        };

        info!(
            dir = %dir.display(),
            positions = document.positions.len(),
            cooldowns = document.cooldowns.len(),
            "Opened position store"
        );

        Ok(Self {
            dir,
            state: Mutex::new(document),
        })
    }

    /// Profile directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn commit(&self, mutate: impl FnOnce(&mut StateDocument)) -> Result<(), StoreError> {
        let mut current = self.state.lock();
        let mut next = current.clone();
        mutate(&mut next);
        self.write_atomic(&next)?;
        *current = next;
        Ok(())
    }

    fn write_atomic(&self, document: &StateDocument) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(document)?;
        let tmp = self.dir.join(TMP_FILE);
        let path = self.dir.join(STATE_FILE);

        {
            let mut file = File::create(&tmp).map_err(io_err(&tmp))?;
            file.write_all(&bytes).map_err(io_err(&tmp))?;
            file.sync_all().map_err(io_err(&tmp))?;
        }
        fs::rename(&tmp, &path).map_err(io_err(&path))?;

        if let Err(e) = sync_dir(&self.dir) {
            warn!(
                path = %self.dir.display(),
                error = %e,
                "Directory fsync failed, rename may not survive a crash"
            );
        }

        debug!(path = %path.display(), bytes = bytes.len(), "State written");
        Ok(())
    }
}

/// Persist a rename inside `dir`.
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

impl PositionStore for JsonFileStore {
    fn get(&self, key: &PosKey) -> Result<Option<Position>, StoreError> {
        Ok(self.state.lock().positions.get(key.as_str()).cloned())
    }

    fn put(&self, position: &Position) -> Result<(), StoreError> {
        self.commit(|doc| {
            doc.positions
                .insert(position.key.to_string(), position.clone());
        })
    }

    fn delete(&self, key: &PosKey) -> Result<(), StoreError> {
        if !self.state.lock().positions.contains_key(key.as_str()) {
            return Ok(());
        }
        self.commit(|doc| {
            doc.positions.remove(key.as_str());
        })
    }

    fn list_all(&self) -> Result<Vec<Position>, StoreError> {
        Ok(self.state.lock().positions.values().cloned().collect())
    }

    fn get_cooldown(&self, symbol: &str) -> Result<Option<CooldownEntry>, StoreError> {
        Ok(self.state.lock().cooldowns.get(symbol).cloned())
    }

    fn put_cooldown(&self, entry: &CooldownEntry) -> Result<(), StoreError> {
        self.commit(|doc| {
            doc.cooldowns.insert(entry.symbol.clone(), entry.clone());
        })
    }

    fn delete_cooldown(&self, symbol: &str) -> Result<(), StoreError> {
        if !self.state.lock().cooldowns.contains_key(symbol) {
            return Ok(());
        }
        self.commit(|doc| {
            doc.cooldowns.remove(symbol);
        })
    }

    fn list_cooldowns(&self) -> Result<Vec<CooldownEntry>, StoreError> {
        Ok(self.state.lock().cooldowns.values().cloned().collect())
    }

    fn append_trade(&self, record: &TradeRecord) -> Result<(), StoreError> {
        let path = self.dir.join(TRADES_FILE);
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_err(&path))?;
        file.write_all(&line).map_err(io_err(&path))?;
        file.sync_data().map_err(io_err(&path))?;
        Ok(())
    }

    fn recent_trades(&self, limit: usize) -> Result<Vec<TradeRecord>, StoreError> {
        let path = self.dir.join(TRADES_FILE);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&path)(e)),
        };

        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(io_err(&path))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TradeRecord>(&line) {
                Ok(record) => records.push(record),
                // A torn final line from a crash mid-append is skipped.
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable trade line"),
            }
        }

        let skip = records.len().saturating_sub(limit);
        Ok(records.split_off(skip))
    }
}
