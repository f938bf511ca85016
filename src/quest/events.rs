//! Quest Event Types
//!
//! Player actions reported by the game that can advance quest progress, and
//! the results of processing them.

use serde::{Deserialize, Serialize};

use super::definition::{ProgressType, QuestDefinition};
use super::reward::RewardRequest;

/// Events that can trigger quest progress
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum QuestEvent {
    /// Player broke a block
    BlockBroken {
        player_id: String,
        /// Block identifier (e.g., "STONE", "minecraft:oak_log")
        block: String,
    },

    /// Player placed a block
    BlockPlaced {
        player_id: String,
        block: String,
    },
}

impl QuestEvent {
    /// Get the player ID associated with this event
    pub fn player_id(&self) -> &str {
        match self {
            QuestEvent::BlockBroken { player_id, .. } => player_id,
            QuestEvent::BlockPlaced { player_id, .. } => player_id,
        }
    }

    /// The quest progress type this event counts toward
    pub fn progress_type(&self) -> ProgressType {
        match self {
            QuestEvent::BlockBroken { .. } => ProgressType::BreakBlock,
            QuestEvent::BlockPlaced { .. } => ProgressType::PlaceBlock,
        }
    }

    pub fn block(&self) -> &str {
        match self {
            QuestEvent::BlockBroken { block, .. } => block,
            QuestEvent::BlockPlaced { block, .. } => block,
        }
    }

    /// Get event type as string (for logging/debugging)
    pub fn event_type(&self) -> &'static str {
        match self {
            QuestEvent::BlockBroken { .. } => "block_broken",
            QuestEvent::BlockPlaced { .. } => "block_placed",
        }
    }
}

/// What a player sees about their active quest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressDisplay {
    pub quest_id: String,
    pub quest_name: String,
    pub current: u32,
    pub target: u32,
    /// 0..=100
    pub percent: u8,
}

impl ProgressDisplay {
    pub fn new(quest: &QuestDefinition, current: u32) -> Self {
        Self {
            quest_id: quest.id.clone(),
            quest_name: quest.name.clone(),
            current,
            target: quest.target,
            percent: progress_percent(current, quest.target),
        }
    }
}

/// `min(100, floor(current * 100 / max(target, 1)))`
pub fn progress_percent(current: u32, target: u32) -> u8 {
    let percent = u64::from(current) * 100 / u64::from(target.max(1));
    percent.min(100) as u8
}

/// Everything that happened when a quest was completed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub quest_id: String,
    pub quest_name: String,
    /// Unix timestamp written to the cooldown ledger
    pub completed_at: i64,
    /// Progress as it stood on the completing action (at or past 100%)
    pub display: ProgressDisplay,
    /// The request handed to the reward dispatcher
    pub reward: RewardRequest,
}

/// Result of reporting a player action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The player has no active quest
    Idle,
    /// The active quest no longer exists in the catalog
    QuestMissing { quest_id: String },
    /// The action does not count toward the active quest
    Unmatched,
    /// Progress advanced but the quest is not finished
    Progressed(ProgressDisplay),
    /// Progress reached the target and the quest was completed
    Completed(Completion),
    /// The engine is shut down
    Closed,
}
