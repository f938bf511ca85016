//! Console Host
//!
//! A line-oriented stand-in for a game server: each stdin line is either a
//! server command (`join`, `leave`, `save`, `help`, `stop`) or a command
//! issued by a player (`<player> quest 2`, `<player> break stone`, ...).
//! Messages for players are written to an output channel as
//! `[player] message` lines.

use std::collections::HashSet;
use std::sync::Arc;
use dashmap::DashSet;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::duration::format_duration;
use crate::error::QuestError;
use crate::quest::{
    ActionOutcome, Completion, FeedbackSink, ProgressDisplay, ProgressType, QuestEngine, QuestFields,
    RewardDispatcher, RewardRequest, player_key,
};

/// Segments in a progress bar
const BAR_WIDTH: usize = 20;

// ============================================================================
// Commands
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Join(String),
    Leave(String),
    Player { player: String, command: PlayerCommand },
    Save,
    Help,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerCommand {
    /// `quest`
    ListQuests,
    /// `quest <n|id>`: a 1-based position in the quest list, or a quest ID
    StartQuest(String),
    Progress,
    Break(String),
    Place(String),
    AddQuest { kind: ProgressType, fields: QuestFields },
    EditQuest { quest_id: String, fields: QuestFields },
    DeleteQuest(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty command")]
    Empty,

    #[error("unknown command '{0}', type 'help' for a list")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let (head, rest) = split_word(line);
        match head.to_lowercase().as_str() {
            "" => Err(ParseError::Empty),
            "save" => Ok(ConsoleCommand::Save),
            "help" => Ok(ConsoleCommand::Help),
            "stop" => Ok(ConsoleCommand::Stop),
            "join" => single_word(rest, "join <player>").map(ConsoleCommand::Join),
            "leave" => single_word(rest, "leave <player>").map(ConsoleCommand::Leave),
            _ => {
                let command = PlayerCommand::parse(rest)?;
                Ok(ConsoleCommand::Player {
                    player: head.to_string(),
                    command,
                })
            }
        }
    }
}

impl PlayerCommand {
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let (name, rest) = split_word(input);
        match name.to_lowercase().as_str() {
            "" => Err(ParseError::Empty),
            "quest" => Ok(if rest.is_empty() {
                PlayerCommand::ListQuests
            } else {
                PlayerCommand::StartQuest(single_word(rest, "<player> quest [n|id]")?)
            }),
            "progress" => Ok(PlayerCommand::Progress),
            "break" => single_word(rest, "<player> break <block>").map(PlayerCommand::Break),
            "place" => single_word(rest, "<player> place <block>").map(PlayerCommand::Place),
            "addquest" => {
                const USAGE: &str = "<player> addquest <break|place> <name>|<description>|<block>|<target>|<reward>|<reward message>|<cooldown>";
                let (kind, fields) = split_word(rest);
                let kind = ProgressType::from_str(kind).ok_or(ParseError::Usage(USAGE))?;
                let fields = parse_fields(fields).ok_or(ParseError::Usage(USAGE))?;
                Ok(PlayerCommand::AddQuest { kind, fields })
            }
            "editquest" => {
                const USAGE: &str = "<player> editquest <id> <name>|<description>|<block>|<target>|<reward>|<reward message>|<cooldown>";
                let (quest_id, fields) = split_word(rest);
                if quest_id.is_empty() {
                    return Err(ParseError::Usage(USAGE));
                }
                let fields = parse_fields(fields).ok_or(ParseError::Usage(USAGE))?;
                Ok(PlayerCommand::EditQuest {
                    quest_id: quest_id.to_string(),
                    fields,
                })
            }
            "deletequest" => {
                single_word(rest, "<player> deletequest <id>").map(PlayerCommand::DeleteQuest)
            }
            other => Err(ParseError::Unknown(other.to_string())),
        }
    }

    /// Permission needed to run the command, if any
    pub fn permission(&self) -> Option<Permission> {
        match self {
            PlayerCommand::ListQuests | PlayerCommand::StartQuest(_) => Some(Permission::Quest),
            PlayerCommand::AddQuest { .. } => Some(Permission::AddQuest),
            PlayerCommand::EditQuest { .. } => Some(Permission::EditQuest),
            PlayerCommand::DeleteQuest(_) => Some(Permission::DeleteQuest),
            PlayerCommand::Progress | PlayerCommand::Break(_) | PlayerCommand::Place(_) => None,
        }
    }
}

fn split_word(input: &str) -> (&str, &str) {
    let input = input.trim();
    match input.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (input, ""),
    }
}

fn single_word(input: &str, usage: &'static str) -> Result<String, ParseError> {
    let mut words = input.split_whitespace();
    match (words.next(), words.next()) {
        (Some(word), None) => Ok(word.to_string()),
        _ => Err(ParseError::Usage(usage)),
    }
}

/// Seven `|`-separated fields; a missing cooldown means none
fn parse_fields(input: &str) -> Option<QuestFields> {
    let parts: Vec<&str> = input.split('|').map(str::trim).collect();
    let cooldown = match parts.len() {
        6 => "0",
        7 => parts[6],
        _ => return None,
    };

    Some(QuestFields {
        name: parts[0].to_string(),
        description: parts[1].to_string(),
        block: parts[2].to_string(),
        target: parts[3].to_string(),
        reward: parts[4].to_string(),
        reward_message: parts[5].to_string(),
        cooldown: cooldown.to_string(),
    })
}

// ============================================================================
// Permissions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    Quest,
    AddQuest,
    EditQuest,
    DeleteQuest,
}

impl Permission {
    pub fn command(&self) -> &'static str {
        match self {
            Permission::Quest => "quest",
            Permission::AddQuest => "addquest",
            Permission::EditQuest => "editquest",
            Permission::DeleteQuest => "deletequest",
        }
    }

    /// Permission node, e.g. `quests.command.addquest`
    pub fn node(&self) -> String {
        format!("quests.command.{}", self.command())
    }

    pub fn is_admin(&self) -> bool {
        !matches!(self, Permission::Quest)
    }
}

/// `quest` is open to everyone; quest editing is reserved for operators
#[derive(Debug, Clone, Default)]
pub struct PermissionSet {
    operators: HashSet<String>,
}

impl PermissionSet {
    pub fn new<I, S>(operators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            operators: operators.into_iter().map(|o| player_key(o.as_ref())).collect(),
        }
    }

    pub fn has(&self, player: &str, permission: Permission) -> bool {
        !permission.is_admin() || self.operators.contains(&player_key(player))
    }
}

// ============================================================================
// Output
// ============================================================================

/// Online-player table and message output for the console host. Also the
/// engine's reward dispatcher and feedback sink.
pub struct ConsoleSink {
    online: DashSet<String>,
    /// Item aliases granted directly instead of run as commands
    items: HashSet<String>,
    out: UnboundedSender<String>,
}

impl ConsoleSink {
    pub fn new<I, S>(items: I, out: UnboundedSender<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            online: DashSet::new(),
            items: items.into_iter().map(|i| i.as_ref().to_lowercase()).collect(),
            out,
        }
    }

    pub fn join(&self, player: &str) -> bool {
        self.online.insert(player_key(player))
    }

    pub fn leave(&self, player: &str) -> bool {
        self.online.remove(&player_key(player)).is_some()
    }

    pub fn online_count(&self) -> usize {
        self.online.len()
    }

    /// Send a line to a player
    pub fn tell(&self, player: &str, message: impl AsRef<str>) {
        self.print(format!("[{}] {}", player, message.as_ref()));
    }

    /// Send a line to the console itself
    pub fn print(&self, line: impl Into<String>) {
        if self.out.send(line.into()).is_err() {
            debug!("Console output closed");
        }
    }
}

impl RewardDispatcher for ConsoleSink {
    fn dispatch(&self, request: RewardRequest) {
        let spec = request.spec();
        if spec.is_empty() {
            warn!("Quest '{}' has an empty reward", request.quest_id);
        } else if self.items.contains(spec.item_alias()) {
            info!(
                "Giving {} {}x {} for quest '{}'",
                request.player,
                spec.quantity(),
                spec.item_alias(),
                request.quest_id
            );
            self.tell(
                &request.player,
                format!("You got {}x {}!", spec.quantity(), spec.item_alias()),
            );
        } else {
            let command = spec.command_for(&request.player);
            info!("Running reward command for quest '{}': {}", request.quest_id, command);
            self.print(format!("> {}", command));
        }

        if !request.message.is_empty() {
            self.tell(&request.player, &request.message);
        }
    }
}

impl FeedbackSink for ConsoleSink {
    fn is_online(&self, player: &str) -> bool {
        self.online.contains(&player_key(player))
    }

    fn show_progress(&self, player: &str, display: &ProgressDisplay) {
        self.tell(player, render_progress(display));
    }

    fn show_completion(&self, player: &str, completion: &Completion) {
        self.tell(player, format!("Quest '{}' completed!", completion.quest_name));
    }
}

/// `[#####---------------]` with one segment per 5%
pub fn render_progress_bar(percent: u8) -> String {
    let filled = (usize::from(percent.min(100)) / 5).min(BAR_WIDTH);
    format!("[{}{}]", "#".repeat(filled), "-".repeat(BAR_WIDTH - filled))
}

/// `<name>: [bar] cur/target (pct%)`
pub fn render_progress(display: &ProgressDisplay) -> String {
    format!(
        "{}: {} {}/{} ({}%)",
        display.quest_name,
        render_progress_bar(display.percent),
        display.current,
        display.target,
        display.percent
    )
}

// ============================================================================
// Host
// ============================================================================

/// What the input loop should do after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleControl {
    Continue,
    Stop,
}

pub struct ConsoleHost {
    engine: Arc<QuestEngine>,
    sink: Arc<ConsoleSink>,
    permissions: PermissionSet,
}

impl ConsoleHost {
    pub fn new(engine: Arc<QuestEngine>, sink: Arc<ConsoleSink>, permissions: PermissionSet) -> Self {
        Self { engine, sink, permissions }
    }

    pub fn from_config(config: &ServerConfig, engine: Arc<QuestEngine>, sink: Arc<ConsoleSink>) -> Self {
        Self::new(engine, sink, PermissionSet::new(&config.permissions.operators))
    }

    /// Run one input line
    pub async fn execute(&self, line: &str) -> ConsoleControl {
        let command = match ConsoleCommand::parse(line) {
            Ok(command) => command,
            Err(ParseError::Empty) => return ConsoleControl::Continue,
            Err(e) => {
                self.sink.print(e.to_string());
                return ConsoleControl::Continue;
            }
        };

        match command {
            ConsoleCommand::Join(player) => {
                if self.sink.join(&player) {
                    info!("{} joined", player);
                    self.sink.print(format!("{} joined the game", player));
                }
            }
            ConsoleCommand::Leave(player) => {
                if self.sink.leave(&player) {
                    info!("{} left", player);
                    self.sink.print(format!("{} left the game", player));
                }
            }
            ConsoleCommand::Player { player, command } => {
                self.run_player_command(&player, command).await;
            }
            ConsoleCommand::Save => match self.engine.flush_all().await {
                Ok(()) => self.sink.print("Saved quest progress and cooldowns."),
                Err(e) => {
                    error!("Manual save failed: {}", e);
                    self.sink.print(format!("Save failed: {}", e));
                }
            },
            ConsoleCommand::Help => {
                for line in HELP {
                    self.sink.print(*line);
                }
            }
            ConsoleCommand::Stop => return ConsoleControl::Stop,
        }

        ConsoleControl::Continue
    }

    async fn run_player_command(&self, player: &str, command: PlayerCommand) {
        if !self.sink.is_online(player) {
            self.sink
                .print(format!("{} is not online. Use 'join {}' first.", player, player));
            return;
        }

        if let Some(permission) = command.permission() {
            if !self.permissions.has(player, permission) {
                debug!("{} lacks {}", player, permission.node());
                self.sink.tell(
                    player,
                    format!("You don't have permission to use /{}.", permission.command()),
                );
                return;
            }
        }

        match command {
            PlayerCommand::ListQuests => self.list_quests(player).await,
            PlayerCommand::StartQuest(choice) => self.start_quest(player, &choice).await,
            PlayerCommand::Progress => self.show_progress(player).await,
            PlayerCommand::Break(block) => {
                self.report(player, ProgressType::BreakBlock, &block).await
            }
            PlayerCommand::Place(block) => {
                self.report(player, ProgressType::PlaceBlock, &block).await
            }
            PlayerCommand::AddQuest { kind, fields } => {
                let name = fields.name.trim().to_string();
                match self.engine.define_quest(kind, fields).await {
                    Ok(quest_id) => self.sink.tell(
                        player,
                        format!("Quest '{}' added! Type: {} (ID: {})", name, kind.as_str(), quest_id),
                    ),
                    Err(e) => self.report_error(player, e),
                }
            }
            PlayerCommand::EditQuest { quest_id, fields } => {
                let name = fields.name.trim().to_string();
                match self.engine.update_quest(&quest_id, fields).await {
                    Ok(()) => self
                        .sink
                        .tell(player, format!("Quest '{}' updated successfully.", name)),
                    Err(e) => self.report_error(player, e),
                }
            }
            PlayerCommand::DeleteQuest(quest_id) => {
                match self.engine.delete_quest(&quest_id).await {
                    Ok(()) => self.sink.tell(
                        player,
                        format!("Quest with ID '{}' has been deleted.", quest_id),
                    ),
                    Err(e) => self.report_error(player, e),
                }
            }
        }
    }

    async fn list_quests(&self, player: &str) {
        let quests = self.engine.catalog().list_valid().await;
        if quests.is_empty() {
            self.sink.tell(player, "There are no quests available.");
            return;
        }

        self.sink.tell(player, "Available quests:");
        for (n, (quest_id, quest)) in quests.iter().enumerate() {
            let mut line = format!(
                "  {}. {} - {} ({} {} {})",
                n + 1,
                quest.name,
                quest.description,
                quest.progress_type.verb(),
                quest.target,
                quest.block
            );
            if quest.cooldown_secs > 0 {
                line.push_str(&format!(", cooldown {}", format_duration(quest.cooldown_secs)));
            }
            line.push_str(&format!(" [{}]", quest_id));
            self.sink.tell(player, line);
        }
    }

    async fn start_quest(&self, player: &str, choice: &str) {
        // A list position wins; anything else, including an out-of-range number, is an ID
        let position = match choice.parse::<usize>() {
            Ok(n) if n >= 1 => self.engine.catalog().list_valid().await.into_iter().nth(n - 1),
            _ => None,
        };
        let quest_id = match position {
            Some((quest_id, _)) => quest_id,
            None => choice.to_string(),
        };

        match self.engine.request_start(player, &quest_id).await {
            Ok(quest) => self.sink.tell(player, format!("Started quest: {}", quest.name)),
            Err(e) => self.report_error(player, e),
        }
    }

    async fn show_progress(&self, player: &str) {
        match self.engine.progress_snapshot(player).await {
            Ok(snapshot) => self.sink.tell(
                player,
                render_progress(&ProgressDisplay::new(&snapshot.quest, snapshot.current)),
            ),
            Err(e) => self.report_error(player, e),
        }
    }

    async fn report(&self, player: &str, kind: ProgressType, block: &str) {
        match self.engine.report_action(player, kind, block).await {
            ActionOutcome::QuestMissing { .. } => {
                self.sink.tell(player, "Your active quest no longer exists.")
            }
            ActionOutcome::Closed => self.sink.tell(player, "The quest server is shutting down."),
            // Completion feedback already went through the sink
            ActionOutcome::Idle
            | ActionOutcome::Unmatched
            | ActionOutcome::Progressed(_)
            | ActionOutcome::Completed(_) => {}
        }
    }

    fn report_error(&self, player: &str, err: QuestError) {
        let message = match err {
            QuestError::Validation(message) => message,
            QuestError::QuestNotFound(quest_id) => format!("No quest found with ID: {}", quest_id),
            QuestError::NoActiveQuest(_) => "You have no active quest.".to_string(),
            QuestError::OnCooldown { remaining_secs, .. } => format!(
                "You must wait {} before doing this quest again.",
                format_duration(remaining_secs)
            ),
            QuestError::Closed => "The quest server is shutting down.".to_string(),
            QuestError::Persistence(e) => {
                error!("Quest change by {} could not be saved: {}", player, e);
                "The quest file could not be saved; nothing was changed.".to_string()
            }
        };
        self.sink.tell(player, message);
    }
}

const HELP: &[&str] = &[
    "Server commands:",
    "  join <player> | leave <player> | save | help | stop",
    "Player commands (<player> <command>):",
    "  quest                 list quests",
    "  quest <n|id>          start a quest",
    "  progress              show your active quest",
    "  break <block>         break a block",
    "  place <block>         place a block",
    "  addquest <break|place> <fields>",
    "  editquest <id> <fields>",
    "  deletequest <id>",
    "Fields: <name>|<description>|<block>|<target>|<reward>|<reward message>|<cooldown>",
];
