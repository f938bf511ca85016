//! Quest System Module
//!
//! Repeatable block-breaking and block-placing quests. Definitions live in
//! an operator-editable TOML catalog; per-player progress and completion
//! times are kept in memory and persisted periodically as JSON.

pub mod definition;
pub mod catalog;
pub mod progress;
pub mod cooldown;
pub mod events;
pub mod reward;
pub mod engine;
pub mod scheduler;

pub use definition::{ProgressType, QuestDefinition, QuestFields};
pub use catalog::{QuestCatalog, HotReloadEvent};
pub use progress::{ProgressStore, ProgressRecord, player_key};
pub use cooldown::CooldownLedger;
pub use events::{QuestEvent, ActionOutcome, Completion, ProgressDisplay};
pub use reward::{RewardDispatcher, RewardRequest, RewardSpec};
pub use engine::{Clock, SystemClock, FeedbackSink, ProgressSnapshot, QuestEngine};
pub use scheduler::{PersistenceScheduler, SchedulerHandle};
