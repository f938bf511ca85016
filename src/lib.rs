//! Quest server library.
//!
//! - [`quest`]: catalog, progress and cooldown stores, the quest engine and
//!   its background persistence
//! - [`duration`]: cooldown duration parsing and formatting
//! - [`console`]: the stdin console host used by the binary
//! - [`config`]: `config.toml` loading
//! - [`storage`]: atomic file writes and JSON snapshots

pub mod config;
pub mod console;
pub mod duration;
pub mod error;
pub mod quest;
pub mod storage;

pub use error::{PersistenceError, QuestError};
