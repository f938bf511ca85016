//! Quest Cooldowns
//!
//! Remembers when each player last completed each quest so repeatable
//! quests can enforce a waiting period. Entries are only ever overwritten;
//! entries for deleted quests simply stop being consulted.

use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::progress::player_key;
use crate::error::PersistenceError;
use crate::storage::JsonSnapshot;

/// player key -> quest ID -> unix timestamp of last completion
pub type CompletionTimes = HashMap<String, HashMap<String, i64>>;

#[derive(Default)]
struct LedgerState {
    completions: CompletionTimes,
    revision: u64,
}

/// Last-completion timestamps for every (player, quest) pair
pub struct CooldownLedger {
    state: RwLock<LedgerState>,
    snapshot: JsonSnapshot,
}

impl CooldownLedger {
    pub fn new(path: &Path) -> Self {
        Self {
            state: RwLock::new(LedgerState::default()),
            snapshot: JsonSnapshot::new(path),
        }
    }

    /// Load the cooldown file, dropping any player or quest entry that is
    /// not a timestamp
    pub async fn load(path: &Path) -> Result<Self, PersistenceError> {
        let ledger = Self::new(path);
        let mut completions = CompletionTimes::new();

        match ledger.snapshot.read().await? {
            Some(serde_json::Value::Object(players)) => {
                for (player, quests) in players {
                    let serde_json::Value::Object(quests) = quests else {
                        warn!("Dropping malformed cooldown entry for '{}'", player);
                        continue;
                    };

                    let entry = completions.entry(player_key(&player)).or_default();
                    for (quest_id, timestamp) in quests {
                        match timestamp.as_i64() {
                            Some(ts) => {
                                entry.insert(quest_id, ts);
                            }
                            None => warn!(
                                "Dropping malformed cooldown for '{}' on quest '{}'",
                                player, quest_id
                            ),
                        }
                    }
                }
            }
            Some(_) => warn!("Cooldown file {:?} is not a JSON object, ignoring it", path),
            None => {}
        }

        completions.retain(|_, quests| !quests.is_empty());
        info!("Loaded quest cooldowns for {} player(s)", completions.len());
        ledger.state.write().await.completions = completions;
        Ok(ledger)
    }

    /// Record a completion at `timestamp`, replacing any earlier one
    pub async fn stamp(&self, player: &str, quest_id: &str, timestamp: i64) {
        let mut state = self.state.write().await;
        state
            .completions
            .entry(player_key(player))
            .or_default()
            .insert(quest_id.to_string(), timestamp);
        state.revision += 1;
    }

    /// When the player last completed the quest, if ever
    pub async fn last_completion(&self, player: &str, quest_id: &str) -> Option<i64> {
        let state = self.state.read().await;
        state
            .completions
            .get(&player_key(player))
            .and_then(|quests| quests.get(quest_id))
            .copied()
    }

    /// Seconds left before the quest may be started again; 0 if none
    pub async fn remaining_cooldown(
        &self,
        player: &str,
        quest_id: &str,
        cooldown_secs: u64,
        now: i64,
    ) -> u64 {
        let last = self.last_completion(player, quest_id).await.unwrap_or(0);
        remaining_secs(last, cooldown_secs, now)
    }

    pub async fn snapshot(&self) -> CompletionTimes {
        self.state.read().await.completions.clone()
    }

    /// Write the ledger if it changed since the last successful write
    pub async fn flush_if_dirty(&self) -> Result<bool, PersistenceError> {
        let (revision, completions) = {
            let state = self.state.read().await;
            if self.snapshot.is_flushed(state.revision) {
                return Ok(false);
            }
            (state.revision, state.completions.clone())
        };

        let written = self.snapshot.write(revision, &completions).await?;
        if written {
            debug!("Saved quest cooldowns for {} player(s)", completions.len());
        }
        Ok(written)
    }

    /// Write the ledger unconditionally
    pub async fn flush(&self) -> Result<(), PersistenceError> {
        let (revision, completions) = {
            let state = self.state.read().await;
            (state.revision, state.completions.clone())
        };
        self.snapshot.write(revision, &completions).await.map(|_| ())
    }
}

/// `max(0, last + cooldown - now)`
pub fn remaining_secs(last: i64, cooldown_secs: u64, now: i64) -> u64 {
    let cooldown = i64::try_from(cooldown_secs).unwrap_or(i64::MAX);
    let ready_at = last.saturating_add(cooldown);
    u64::try_from(ready_at.saturating_sub(now)).unwrap_or(0)
}
