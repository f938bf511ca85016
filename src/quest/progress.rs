//! Quest Progress Tracking
//!
//! Tracks the single active quest of each player and how far they got.
//! Records survive disconnects and restarts; they are only removed when the
//! quest completes or is replaced by another one.

use std::collections::HashMap;
use std::path::Path;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{PersistenceError, QuestError};
use crate::storage::JsonSnapshot;

/// Normalized key for a player: player names are case-insensitive
pub fn player_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// A player's advancement toward their active quest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    /// Active quest ID
    pub quest: String,
    /// Matching actions counted so far
    pub progress: u32,
}

#[derive(Default)]
struct ProgressState {
    records: HashMap<String, ProgressRecord>,
    /// Bumped on every mutation
    revision: u64,
}

/// All active quest progress, keyed by player key
pub struct ProgressStore {
    state: RwLock<ProgressState>,
    snapshot: JsonSnapshot,
}

impl ProgressStore {
    /// Empty store persisted to `path`
    pub fn new(path: &Path) -> Self {
        Self {
            state: RwLock::new(ProgressState::default()),
            snapshot: JsonSnapshot::new(path),
        }
    }

    /// Load the progress file. Entries that do not parse are dropped with a
    /// warning; only an unreadable file is an error.
    pub async fn load(path: &Path) -> Result<Self, PersistenceError> {
        let store = Self::new(path);
        let mut records = HashMap::new();

        match store.snapshot.read().await? {
            Some(serde_json::Value::Object(entries)) => {
                for (player, entry) in entries {
                    match serde_json::from_value::<ProgressRecord>(entry) {
                        Ok(record) => {
                            records.insert(player_key(&player), record);
                        }
                        Err(e) => {
                            warn!("Dropping malformed progress entry for '{}': {}", player, e);
                        }
                    }
                }
            }
            Some(_) => warn!("Progress file {:?} is not a JSON object, ignoring it", path),
            None => {}
        }

        info!("Loaded quest progress for {} player(s)", records.len());
        store.state.write().await.records = records;
        Ok(store)
    }

    /// Make `quest_id` the player's active quest at progress 0.
    /// Returns the record it replaced, if any.
    pub async fn start(&self, player: &str, quest_id: &str) -> Option<ProgressRecord> {
        let mut state = self.state.write().await;
        state.revision += 1;
        state.records.insert(
            player_key(player),
            ProgressRecord {
                quest: quest_id.to_string(),
                progress: 0,
            },
        )
    }

    /// Add `delta` to the player's progress and return the new count
    pub async fn increment(&self, player: &str, delta: u32) -> Result<u32, QuestError> {
        let mut state = self.state.write().await;
        let record = state
            .records
            .get_mut(&player_key(player))
            .ok_or_else(|| QuestError::NoActiveQuest(player.to_string()))?;
        record.progress = record.progress.saturating_add(delta);
        let progress = record.progress;
        state.revision += 1;
        Ok(progress)
    }

    /// Remove the player's record
    pub async fn clear(&self, player: &str) -> Option<ProgressRecord> {
        let mut state = self.state.write().await;
        let removed = state.records.remove(&player_key(player));
        if removed.is_some() {
            state.revision += 1;
        }
        removed
    }

    pub async fn get(&self, player: &str) -> Option<ProgressRecord> {
        let state = self.state.read().await;
        state.records.get(&player_key(player)).cloned()
    }

    /// Copy of every record
    pub async fn snapshot(&self) -> HashMap<String, ProgressRecord> {
        self.state.read().await.records.clone()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Write the store if it changed since the last successful write.
    /// Returns whether a write happened.
    pub async fn flush_if_dirty(&self) -> Result<bool, PersistenceError> {
        let (revision, records) = {
            let state = self.state.read().await;
            if self.snapshot.is_flushed(state.revision) {
                return Ok(false);
            }
            (state.revision, state.records.clone())
        };

        let written = self.snapshot.write(revision, &records).await?;
        if written {
            debug!("Saved progress for {} player(s)", records.len());
        }
        Ok(written)
    }

    /// Write the store unconditionally
    pub async fn flush(&self) -> Result<(), PersistenceError> {
        let (revision, records) = {
            let state = self.state.read().await;
            (state.revision, state.records.clone())
        };
        self.snapshot.write(revision, &records).await.map(|_| ())
    }
}
