//! Quest Rewards
//!
//! The engine does not grant rewards itself. On completion it hands a
//! [`RewardRequest`] to a [`RewardDispatcher`] supplied by the host, which
//! decides whether the reward names an item or a console command.

/// Placeholder replaced by the player's name in command rewards
pub const PLAYER_PLACEHOLDER: &str = "{player}";

/// A reward to hand out for one quest completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardRequest {
    /// Player name as reported by the game (not the lower-cased key)
    pub player: String,
    pub quest_id: String,
    /// Raw reward specification from the quest definition
    pub reward: String,
    /// Message to show the player after the reward
    pub message: String,
}

impl RewardRequest {
    pub fn spec(&self) -> RewardSpec {
        RewardSpec::parse(&self.reward)
    }
}

/// Receives exactly one request per completed quest
pub trait RewardDispatcher: Send + Sync {
    fn dispatch(&self, request: RewardRequest);
}

/// Reward string split the way dispatchers interpret it: `"<item alias>
/// [quantity]"` when the first word names a known item, otherwise a
/// command template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardSpec {
    raw: String,
    alias: String,
    quantity: u32,
}

impl RewardSpec {
    pub fn parse(reward: &str) -> Self {
        let raw = reward.trim().to_string();
        let mut parts = raw.split_whitespace();
        let alias = parts.next().unwrap_or_default().to_lowercase();
        let quantity = parts
            .next()
            .and_then(|q| q.parse::<u32>().ok())
            .unwrap_or(1);

        Self { raw, alias, quantity }
    }

    /// First word, lower-cased; the item to grant if it names one
    pub fn item_alias(&self) -> &str {
        &self.alias
    }

    /// Item count; 1 when absent or not a number
    pub fn quantity(&self) -> u32 {
        self.quantity
    }

    /// The reward as a command for `player`
    pub fn command_for(&self, player: &str) -> String {
        self.raw.replace(PLAYER_PLACEHOLDER, player)
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}
