//! Error Types
//!
//! Failures surfaced by the quest engine and its stores.

use std::path::PathBuf;
use thiserror::Error;

/// Errors returned to the callers of the quest engine and catalog
#[derive(Debug, Error)]
pub enum QuestError {
    /// Malformed quest fields; nothing was changed
    #[error("invalid quest: {0}")]
    Validation(String),

    #[error("no quest found with ID: {0}")]
    QuestNotFound(String),

    #[error("player '{0}' has no active quest")]
    NoActiveQuest(String),

    /// The quest was completed too recently to be started again
    #[error("quest '{quest_id}' is on cooldown for another {remaining_secs}s")]
    OnCooldown { quest_id: String, remaining_secs: u64 },

    /// The engine has been shut down and accepts no more mutations
    #[error("quest engine is shut down")]
    Closed,

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Errors from reading or writing persisted state
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to encode {path:?}: {message}")]
    Encode { path: PathBuf, message: String },

    #[error("failed to parse {path:?}: {message}")]
    Decode { path: PathBuf, message: String },
}
