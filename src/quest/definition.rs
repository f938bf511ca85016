//! Quest Definition Structures
//!
//! Raw entries are deserialized from the `[quests.<id>]` tables of the
//! catalog file and validated into [`QuestDefinition`]s. Edits coming from
//! the admin forms arrive as [`QuestFields`] and go through the same checks.

use serde::{Deserialize, Serialize};

use crate::duration::parse_duration;
use crate::error::QuestError;

/// Quest data as it appears in TOML.
///
/// Every field is optional so that a partially written entry can still be
/// read, reported and written back unchanged.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawQuest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub progress_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block: Option<String>,
    /// Integer, or a numeric string when hand edited
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<toml::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reward: Option<String>,
    #[serde(default, rename = "rewardMessage", skip_serializing_if = "Option::is_none")]
    pub reward_message: Option<String>,
    /// Seconds, or a duration string such as "5m"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown: Option<toml::Value>,
}

// ============================================================================
// Resolved Quest Structures
// ============================================================================

/// Player actions a quest can count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProgressType {
    /// Break N blocks of a type
    BreakBlock,
    /// Place N blocks of a type
    PlaceBlock,
}

impl ProgressType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressType::BreakBlock => "BREAK_BLOCK",
            ProgressType::PlaceBlock => "PLACE_BLOCK",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "break_block" | "count_block_break" | "break" => Some(ProgressType::BreakBlock),
            "place_block" | "count_block_place" | "place" => Some(ProgressType::PlaceBlock),
            _ => None,
        }
    }

    /// Verb used in player-facing text
    pub fn verb(&self) -> &'static str {
        match self {
            ProgressType::BreakBlock => "Break",
            ProgressType::PlaceBlock => "Place",
        }
    }
}

/// Canonical form of a block identifier: trimmed, upper-case, no namespace
pub fn normalize_block(block: &str) -> String {
    let block = block.trim();
    let block = block
        .strip_prefix("minecraft:")
        .or_else(|| block.strip_prefix("MINECRAFT:"))
        .unwrap_or(block);
    block.to_uppercase()
}

/// A fully validated quest definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Fixed at creation; edits never change it
    pub progress_type: ProgressType,
    /// Normalized block identifier (see [`normalize_block`])
    pub block: String,
    /// Number of matching actions required, always > 0
    pub target: u32,
    /// Item alias + quantity, or a command template using `{player}`
    pub reward: String,
    pub reward_message: String,
    /// Seconds before the same player may repeat the quest; 0 = none
    pub cooldown_secs: u64,
}

impl QuestDefinition {
    /// Validate a raw catalog entry
    pub fn from_raw(id: &str, raw: &RawQuest) -> Result<Self, String> {
        let name = required(&raw.name, "name")?;
        let description = required(&raw.description, "description")?;
        let type_str = required(&raw.progress_type, "type")?;
        let progress_type = ProgressType::from_str(type_str)
            .ok_or_else(|| format!("unknown quest type '{}'", type_str))?;
        let block = required(&raw.block, "block")?;
        let reward = required(&raw.reward, "reward")?;
        let reward_message = required(&raw.reward_message, "rewardMessage")?;

        let target = match &raw.target {
            Some(toml::Value::Integer(n)) => u32::try_from(*n)
                .map_err(|_| format!("target {} is out of range", n))?,
            Some(toml::Value::String(s)) => parse_target(s)?,
            Some(other) => return Err(format!("target must be a number, got {}", other.type_str())),
            None => return Err("missing field 'target'".to_string()),
        };
        if target == 0 {
            return Err("target must be greater than 0".to_string());
        }

        // Older catalogs may omit the cooldown entirely
        let cooldown_secs = match &raw.cooldown {
            None => 0,
            Some(toml::Value::Integer(n)) => u64::try_from(*n)
                .map_err(|_| format!("cooldown {} must not be negative", n))?,
            Some(toml::Value::String(s)) => parse_duration(s),
            Some(other) => return Err(format!("cooldown must be a number, got {}", other.type_str())),
        };

        Ok(Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            progress_type,
            block: normalize_block(block),
            target,
            reward: reward.trim().to_string(),
            reward_message: reward_message.trim().to_string(),
            cooldown_secs,
        })
    }

    /// Convert back to the stored representation
    pub fn to_raw(&self) -> RawQuest {
        RawQuest {
            name: Some(self.name.clone()),
            description: Some(self.description.clone()),
            progress_type: Some(self.progress_type.as_str().to_string()),
            block: Some(self.block.clone()),
            target: Some(toml::Value::Integer(i64::from(self.target))),
            reward: Some(self.reward.clone()),
            reward_message: Some(self.reward_message.clone()),
            cooldown: Some(toml::Value::Integer(
                i64::try_from(self.cooldown_secs).unwrap_or(i64::MAX),
            )),
        }
    }

    /// Whether an action of `kind` on `block` counts toward this quest
    pub fn matches(&self, kind: ProgressType, block: &str) -> bool {
        self.progress_type == kind && self.block == normalize_block(block)
    }
}

fn required<'a>(field: &'a Option<String>, name: &str) -> Result<&'a str, String> {
    field
        .as_deref()
        .ok_or_else(|| format!("missing field '{}'", name))
}

fn parse_target(s: &str) -> Result<u32, String> {
    s.trim()
        .parse::<u32>()
        .map_err(|_| "Target must be a number.".to_string())
}

// ============================================================================
// Admin Form Input
// ============================================================================

/// The values an add/edit form submits, before validation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuestFields {
    pub name: String,
    pub description: String,
    pub block: String,
    /// Must parse as a positive integer
    pub target: String,
    pub reward: String,
    pub reward_message: String,
    /// Duration string, e.g. "0", "30s", "5m", "2h"
    pub cooldown: String,
}

impl QuestFields {
    /// Validate into a definition with the given identity and type
    pub fn into_definition(
        self,
        id: &str,
        progress_type: ProgressType,
    ) -> Result<QuestDefinition, QuestError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(QuestError::Validation("Name must not be empty.".to_string()));
        }

        let block = normalize_block(&self.block);
        if block.is_empty() {
            return Err(QuestError::Validation("Block must not be empty.".to_string()));
        }

        let target = parse_target(&self.target).map_err(QuestError::Validation)?;
        if target == 0 {
            return Err(QuestError::Validation(
                "Target must be greater than 0.".to_string(),
            ));
        }

        Ok(QuestDefinition {
            id: id.to_string(),
            name: name.to_string(),
            description: self.description.trim().to_string(),
            progress_type,
            block,
            target,
            reward: self.reward.trim().to_string(),
            reward_message: self.reward_message.trim().to_string(),
            cooldown_secs: parse_duration(&self.cooldown),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_stone_quest() -> RawQuest {
        RawQuest {
            name: Some("Stone Miner".to_string()),
            description: Some("Break 10 stone".to_string()),
            progress_type: Some("BREAK_BLOCK".to_string()),
            block: Some("stone".to_string()),
            target: Some(toml::Value::Integer(10)),
            reward: Some("diamond 2".to_string()),
            reward_message: Some("Well done!".to_string()),
            cooldown: Some(toml::Value::Integer(300)),
        }
    }

    #[test]
    fn test_progress_type_parsing() {
        assert_eq!(ProgressType::from_str("BREAK_BLOCK"), Some(ProgressType::BreakBlock));
        assert_eq!(ProgressType::from_str("count_block_break"), Some(ProgressType::BreakBlock));
        assert_eq!(ProgressType::from_str("place"), Some(ProgressType::PlaceBlock));
        assert_eq!(ProgressType::from_str("COUNT_BLOCK_PLACE"), Some(ProgressType::PlaceBlock));
        assert_eq!(ProgressType::from_str("kill_monster"), None);
    }

    #[test]
    fn test_from_raw_valid() {
        let quest = QuestDefinition::from_raw("quest_1", &raw_stone_quest()).unwrap();
        assert_eq!(quest.id, "quest_1");
        assert_eq!(quest.progress_type, ProgressType::BreakBlock);
        assert_eq!(quest.block, "STONE");
        assert_eq!(quest.target, 10);
        assert_eq!(quest.cooldown_secs, 300);
    }

    #[test]
    fn test_from_raw_rejects_missing_field() {
        let mut raw = raw_stone_quest();
        raw.reward_message = None;
        let err = QuestDefinition::from_raw("quest_1", &raw).unwrap_err();
        assert!(err.contains("rewardMessage"));
    }

    #[test]
    fn test_from_raw_defaults_cooldown_and_accepts_strings() {
        let mut raw = raw_stone_quest();
        raw.cooldown = None;
        raw.target = Some(toml::Value::String(" 12 ".to_string()));
        let quest = QuestDefinition::from_raw("quest_1", &raw).unwrap();
        assert_eq!(quest.cooldown_secs, 0);
        assert_eq!(quest.target, 12);

        raw.cooldown = Some(toml::Value::String("2h".to_string()));
        let quest = QuestDefinition::from_raw("quest_1", &raw).unwrap();
        assert_eq!(quest.cooldown_secs, 7200);
    }

    #[test]
    fn test_from_raw_rejects_bad_target() {
        let mut raw = raw_stone_quest();
        raw.target = Some(toml::Value::Integer(0));
        assert!(QuestDefinition::from_raw("q", &raw).is_err());

        raw.target = Some(toml::Value::Integer(-4));
        assert!(QuestDefinition::from_raw("q", &raw).is_err());

        raw.target = Some(toml::Value::Boolean(true));
        assert!(QuestDefinition::from_raw("q", &raw).is_err());
    }

    #[test]
    fn test_raw_round_trip_preserves_definition() {
        let quest = QuestDefinition::from_raw("quest_1", &raw_stone_quest()).unwrap();
        let again = QuestDefinition::from_raw("quest_1", &quest.to_raw()).unwrap();
        assert_eq!(quest, again);
    }

    #[test]
    fn test_matches_normalizes_block() {
        let quest = QuestDefinition::from_raw("quest_1", &raw_stone_quest()).unwrap();
        assert!(quest.matches(ProgressType::BreakBlock, "stone"));
        assert!(quest.matches(ProgressType::BreakBlock, " minecraft:stone "));
        assert!(!quest.matches(ProgressType::PlaceBlock, "stone"));
        assert!(!quest.matches(ProgressType::BreakBlock, "dirt"));
    }

    #[test]
    fn test_fields_validation() {
        let fields = QuestFields {
            name: "Digger".to_string(),
            description: "Dig dirt".to_string(),
            block: " dirt ".to_string(),
            target: "abc".to_string(),
            reward: "say Congratulations {player}!".to_string(),
            reward_message: "Done".to_string(),
            cooldown: "5m".to_string(),
        };
        let err = fields.clone().into_definition("q", ProgressType::BreakBlock).unwrap_err();
        assert!(matches!(err, QuestError::Validation(msg) if msg == "Target must be a number."));

        let quest = QuestFields { target: "25".to_string(), ..fields }
            .into_definition("q", ProgressType::BreakBlock)
            .unwrap();
        assert_eq!(quest.block, "DIRT");
        assert_eq!(quest.target, 25);
        assert_eq!(quest.cooldown_secs, 300);
    }
}
