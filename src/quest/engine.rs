//! Quest Engine
//!
//! The per-player quest state machine. A player is either idle (no progress
//! record) or working on exactly one quest. Matching actions advance the
//! active quest; reaching the target runs the completion protocol: stamp
//! the cooldown, clear the record, hand the reward to the dispatcher.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::catalog::QuestCatalog;
use super::cooldown::CooldownLedger;
use super::definition::{ProgressType, QuestDefinition, QuestFields};
use super::events::{ActionOutcome, Completion, ProgressDisplay, QuestEvent, progress_percent};
use super::progress::{ProgressStore, player_key};
use super::reward::{RewardDispatcher, RewardRequest};
use crate::config::ServerConfig;
use crate::error::{PersistenceError, QuestError};

/// Source of the current unix time
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Where progress feedback goes. Offline players are skipped.
pub trait FeedbackSink: Send + Sync {
    fn is_online(&self, player: &str) -> bool;
    fn show_progress(&self, player: &str, display: &ProgressDisplay);

    /// Announce a completed quest, before its reward is handed out
    fn show_completion(&self, _player: &str, _completion: &Completion) {}
}

/// A player's progress on their active quest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub quest: Arc<QuestDefinition>,
    pub current: u32,
    pub target: u32,
    pub percent: u8,
}

pub struct QuestEngine {
    catalog: Arc<QuestCatalog>,
    progress: Arc<ProgressStore>,
    cooldowns: Arc<CooldownLedger>,
    rewards: Arc<dyn RewardDispatcher>,
    feedback: Arc<dyn FeedbackSink>,
    clock: Arc<dyn Clock>,
    /// Foreground mutations run one at a time
    gate: Mutex<()>,
    closed: AtomicBool,
}

impl QuestEngine {
    pub fn new(
        catalog: Arc<QuestCatalog>,
        progress: Arc<ProgressStore>,
        cooldowns: Arc<CooldownLedger>,
        rewards: Arc<dyn RewardDispatcher>,
        feedback: Arc<dyn FeedbackSink>,
    ) -> Self {
        Self {
            catalog,
            progress,
            cooldowns,
            rewards,
            feedback,
            clock: Arc::new(SystemClock),
            gate: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Load the catalog and both stores from the configured data directory
    pub async fn open(
        config: &ServerConfig,
        rewards: Arc<dyn RewardDispatcher>,
        feedback: Arc<dyn FeedbackSink>,
    ) -> Result<Self, QuestError> {
        let catalog = QuestCatalog::load(&config.catalog_path()).await?;
        let progress = ProgressStore::load(&config.progress_path()).await?;
        let cooldowns = CooldownLedger::load(&config.cooldown_path()).await?;

        Ok(Self::new(
            Arc::new(catalog),
            Arc::new(progress),
            Arc::new(cooldowns),
            rewards,
            feedback,
        ))
    }

    pub fn catalog(&self) -> &Arc<QuestCatalog> {
        &self.catalog
    }

    pub fn progress(&self) -> &Arc<ProgressStore> {
        &self.progress
    }

    pub fn cooldowns(&self) -> &Arc<CooldownLedger> {
        &self.cooldowns
    }

    /// Add a quest to the catalog; refused once the engine is closed
    pub async fn define_quest(
        &self,
        progress_type: ProgressType,
        fields: QuestFields,
    ) -> Result<String, QuestError> {
        self.ensure_open()?;
        self.catalog.define(progress_type, fields).await
    }

    pub async fn update_quest(&self, quest_id: &str, fields: QuestFields) -> Result<(), QuestError> {
        self.ensure_open()?;
        self.catalog.update(quest_id, fields).await
    }

    pub async fn delete_quest(&self, quest_id: &str) -> Result<(), QuestError> {
        self.ensure_open()?;
        self.catalog.delete(quest_id).await
    }

    fn ensure_open(&self) -> Result<(), QuestError> {
        if self.is_closed() {
            Err(QuestError::Closed)
        } else {
            Ok(())
        }
    }

    /// Make `quest_id` the player's active quest, replacing any other.
    /// Fails if the quest is unknown or still on cooldown for this player.
    pub async fn request_start(
        &self,
        player: &str,
        quest_id: &str,
    ) -> Result<Arc<QuestDefinition>, QuestError> {
        let _gate = self.gate.lock().await;
        if self.is_closed() {
            return Err(QuestError::Closed);
        }

        let quest = self
            .catalog
            .get(quest_id)
            .await
            .ok_or_else(|| QuestError::QuestNotFound(quest_id.to_string()))?;

        if quest.cooldown_secs > 0 {
            let remaining = self
                .cooldowns
                .remaining_cooldown(player, quest_id, quest.cooldown_secs, self.clock.now())
                .await;
            if remaining > 0 {
                debug!("{} tried to start '{}' with {}s cooldown left", player, quest_id, remaining);
                return Err(QuestError::OnCooldown {
                    quest_id: quest_id.to_string(),
                    remaining_secs: remaining,
                });
            }
        }

        if let Some(previous) = self.progress.start(player, quest_id).await {
            debug!(
                "{} abandoned quest '{}' at {} progress",
                player, previous.quest, previous.progress
            );
        }

        info!("{} started quest '{}' ({})", player, quest.name, quest_id);
        Ok(quest)
    }

    /// Count one player action toward their active quest
    pub async fn report_action(
        &self,
        player: &str,
        kind: ProgressType,
        target: &str,
    ) -> ActionOutcome {
        let outcome = self.advance(player, kind, target).await;

        // Collaborators are called without any lock held
        match &outcome {
            ActionOutcome::Completed(completion) => {
                info!("{} completed quest '{}'", player, completion.quest_name);
                if self.feedback.is_online(player) {
                    let key = player_key(player);
                    self.feedback.show_progress(&key, &completion.display);
                    self.feedback.show_completion(&key, completion);
                }
                self.rewards.dispatch(completion.reward.clone());
            }
            ActionOutcome::Progressed(display) => {
                if self.feedback.is_online(player) {
                    self.feedback.show_progress(&player_key(player), display);
                }
            }
            _ => {}
        }

        outcome
    }

    async fn advance(&self, player: &str, kind: ProgressType, target: &str) -> ActionOutcome {
        let _gate = self.gate.lock().await;
        if self.is_closed() {
            return ActionOutcome::Closed;
        }

        let Some(record) = self.progress.get(player).await else {
            return ActionOutcome::Idle;
        };
        let Some(quest) = self.catalog.get(&record.quest).await else {
            debug!("{} is on quest '{}' which no longer exists", player, record.quest);
            return ActionOutcome::QuestMissing { quest_id: record.quest };
        };
        if !quest.matches(kind, target) {
            return ActionOutcome::Unmatched;
        }

        let current = match self.progress.increment(player, 1).await {
            Ok(current) => current,
            Err(e) => {
                warn!("Progress record for {} vanished: {}", player, e);
                return ActionOutcome::Idle;
            }
        };

        let display = ProgressDisplay::new(&quest, current);
        if current < quest.target {
            return ActionOutcome::Progressed(display);
        }

        let completed_at = self.clock.now();
        self.cooldowns.stamp(player, &quest.id, completed_at).await;
        self.progress.clear(player).await;

        ActionOutcome::Completed(Completion {
            quest_id: quest.id.clone(),
            quest_name: quest.name.clone(),
            completed_at,
            display,
            reward: RewardRequest {
                player: player.to_string(),
                quest_id: quest.id.clone(),
                reward: quest.reward.clone(),
                message: quest.reward_message.clone(),
            },
        })
    }

    pub async fn handle_event(&self, event: &QuestEvent) -> ActionOutcome {
        debug!("{} event from {}", event.event_type(), event.player_id());
        self.report_action(event.player_id(), event.progress_type(), event.block())
            .await
    }

    /// The player's active quest and how far along they are
    pub async fn progress_snapshot(&self, player: &str) -> Result<ProgressSnapshot, QuestError> {
        let record = self
            .progress
            .get(player)
            .await
            .ok_or_else(|| QuestError::NoActiveQuest(player.to_string()))?;
        let quest = self
            .catalog
            .get(&record.quest)
            .await
            .ok_or_else(|| QuestError::QuestNotFound(record.quest.clone()))?;

        Ok(ProgressSnapshot {
            current: record.progress,
            target: quest.target,
            percent: progress_percent(record.progress, quest.target),
            quest,
        })
    }

    /// Display rows for every player with a live quest, keyed by player key
    pub async fn progress_displays(&self) -> Vec<(String, ProgressDisplay)> {
        let records = self.progress.snapshot().await;
        let mut displays = Vec::with_capacity(records.len());
        for (player, record) in records {
            if let Some(quest) = self.catalog.get(&record.quest).await {
                displays.push((player, ProgressDisplay::new(&quest, record.progress)));
            }
        }
        displays
    }

    /// Push every online player's progress to the feedback sink.
    /// Returns how many players were shown.
    pub async fn broadcast_progress(&self) -> usize {
        let mut shown = 0;
        for (player, display) in self.progress_displays().await {
            if self.feedback.is_online(&player) {
                self.feedback.show_progress(&player, &display);
                shown += 1;
            }
        }
        shown
    }

    /// Stop accepting mutations. Waits for an in-flight mutation to finish.
    pub async fn close(&self) {
        let _gate = self.gate.lock().await;
        self.closed.store(true, Ordering::SeqCst);
        info!("Quest engine closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Write both stores, attempting each even if the other fails
    pub async fn flush_all(&self) -> Result<(), PersistenceError> {
        let progress = self.progress.flush().await;
        let cooldowns = self.cooldowns.flush().await;
        progress.and(cooldowns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicI64;
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    struct ManualClock(AtomicI64);

    impl Clock for ManualClock {
        fn now(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct RecordingRewards(StdMutex<Vec<RewardRequest>>);

    impl RewardDispatcher for RecordingRewards {
        fn dispatch(&self, request: RewardRequest) {
            self.0.lock().unwrap().push(request);
        }
    }

    #[derive(Default)]
    struct RecordingFeedback {
        online: StdMutex<HashSet<String>>,
        shown: StdMutex<Vec<(String, ProgressDisplay)>>,
        completed: StdMutex<Vec<(String, String)>>,
    }

    impl FeedbackSink for RecordingFeedback {
        fn is_online(&self, player: &str) -> bool {
            self.online.lock().unwrap().contains(&player_key(player))
        }

        fn show_progress(&self, player: &str, display: &ProgressDisplay) {
            self.shown.lock().unwrap().push((player.to_string(), display.clone()));
        }

        fn show_completion(&self, player: &str, completion: &Completion) {
            self.completed
                .lock()
                .unwrap()
                .push((player.to_string(), completion.quest_id.clone()));
        }
    }

    const NOW: i64 = 1_700_000_000;

    struct Harness {
        _dir: TempDir,
        engine: QuestEngine,
        rewards: Arc<RecordingRewards>,
        feedback: Arc<RecordingFeedback>,
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let rewards = Arc::new(RecordingRewards::default());
        let feedback = Arc::new(RecordingFeedback::default());
        let engine = QuestEngine::new(
            Arc::new(QuestCatalog::new(&dir.path().join("quests.toml"))),
            Arc::new(ProgressStore::new(&dir.path().join("progress.json"))),
            Arc::new(CooldownLedger::new(&dir.path().join("cooldowns.json"))),
            rewards.clone(),
            feedback.clone(),
        )
        .with_clock(Arc::new(ManualClock(AtomicI64::new(NOW))));

        Harness { _dir: dir, engine, rewards, feedback }
    }

    fn fields(block: &str, target: u32, cooldown: &str) -> QuestFields {
        QuestFields {
            name: format!("Collect {}", block),
            description: "Test quest".to_string(),
            block: block.to_string(),
            target: target.to_string(),
            reward: "diamond 2".to_string(),
            reward_message: "Well done!".to_string(),
            cooldown: cooldown.to_string(),
        }
    }

    async fn define(engine: &QuestEngine, block: &str, target: u32, cooldown: &str) -> String {
        engine
            .catalog()
            .define(ProgressType::BreakBlock, fields(block, target, cooldown))
            .await
            .unwrap()
    }

    async fn break_n(engine: &QuestEngine, player: &str, block: &str, n: u32) -> ActionOutcome {
        let mut outcome = ActionOutcome::Idle;
        for _ in 0..n {
            outcome = engine.report_action(player, ProgressType::BreakBlock, block).await;
        }
        outcome
    }

    #[tokio::test]
    async fn test_start_overwrites_active_quest() {
        let h = harness();
        let stone = define(&h.engine, "STONE", 10, "0").await;
        let dirt = define(&h.engine, "DIRT", 10, "0").await;

        h.engine.request_start("steve", &stone).await.unwrap();
        break_n(&h.engine, "steve", "stone", 3).await;
        h.engine.request_start("Steve", &dirt).await.unwrap();

        assert_eq!(h.engine.progress().len().await, 1);
        let record = h.engine.progress().get("steve").await.unwrap();
        assert_eq!(record.quest, dirt);
        assert_eq!(record.progress, 0);
    }

    #[tokio::test]
    async fn test_unknown_quest() {
        let h = harness();
        let err = h.engine.request_start("steve", "quest_nope").await.unwrap_err();
        assert!(matches!(err, QuestError::QuestNotFound(id) if id == "quest_nope"));
        assert!(h.engine.progress().is_empty().await);
    }

    #[tokio::test]
    async fn test_unmatched_action_changes_nothing() {
        let h = harness();
        let stone = define(&h.engine, "STONE", 10, "0").await;

        assert_eq!(
            h.engine.report_action("steve", ProgressType::BreakBlock, "STONE").await,
            ActionOutcome::Idle
        );

        h.engine.request_start("steve", &stone).await.unwrap();
        break_n(&h.engine, "steve", "STONE", 2).await;

        let outcome = h.engine.report_action("steve", ProgressType::BreakBlock, "DIRT").await;
        assert_eq!(outcome, ActionOutcome::Unmatched);
        let outcome = h.engine.report_action("steve", ProgressType::PlaceBlock, "STONE").await;
        assert_eq!(outcome, ActionOutcome::Unmatched);

        assert_eq!(h.engine.progress().get("steve").await.unwrap().progress, 2);
    }

    #[tokio::test]
    async fn test_completion_protocol() {
        let h = harness();
        let stone = define(&h.engine, "STONE", 5, "1h").await;

        h.feedback.online.lock().unwrap().insert("steve".to_string());
        h.engine.request_start("Steve", &stone).await.unwrap();
        let outcome = break_n(&h.engine, "Steve", "minecraft:stone", 4).await;
        assert!(matches!(outcome, ActionOutcome::Progressed(ref d) if d.current == 4 && d.percent == 80));
        assert!(h.rewards.0.lock().unwrap().is_empty());
        assert!(h.feedback.completed.lock().unwrap().is_empty());

        let outcome = h.engine.report_action("Steve", ProgressType::BreakBlock, "STONE").await;
        let ActionOutcome::Completed(completion) = outcome else {
            panic!("expected the fifth action to complete the quest");
        };
        assert_eq!(completion.completed_at, NOW);
        assert_eq!((completion.display.current, completion.display.percent), (5, 100));

        // The final 5/5 display and the completion are shown to the player
        {
            let shown = h.feedback.shown.lock().unwrap();
            assert_eq!(shown.len(), 5);
            let (player, last) = shown.last().unwrap();
            assert_eq!(player, "steve");
            assert_eq!((last.current, last.target, last.percent), (5, 5, 100));
        }
        assert_eq!(
            *h.feedback.completed.lock().unwrap(),
            vec![("steve".to_string(), stone.clone())]
        );

        assert_eq!(h.engine.cooldowns().last_completion("steve", &stone).await, Some(NOW));
        assert!(h.engine.progress().get("steve").await.is_none());

        let rewards = h.rewards.0.lock().unwrap();
        assert_eq!(rewards.len(), 1);
        assert_eq!(rewards[0].player, "Steve");
        assert_eq!(rewards[0].reward, "diamond 2");
        assert_eq!(rewards[0].message, "Well done!");
    }

    #[tokio::test]
    async fn test_actions_after_completion_are_idle() {
        let h = harness();
        let stone = define(&h.engine, "STONE", 1, "0").await;

        h.engine.request_start("steve", &stone).await.unwrap();
        break_n(&h.engine, "steve", "STONE", 3).await;
        assert_eq!(h.rewards.0.lock().unwrap().len(), 1);

        // No cooldown: the quest can be repeated immediately
        h.engine.request_start("steve", &stone).await.unwrap();
    }

    #[tokio::test]
    async fn test_cooldown_blocks_restart() {
        let h = harness();
        let stone = define(&h.engine, "STONE", 5, "60").await;

        h.engine.cooldowns().stamp("steve", &stone, NOW - 30).await;
        let err = h.engine.request_start("steve", &stone).await.unwrap_err();
        assert!(matches!(err, QuestError::OnCooldown { remaining_secs: 30, .. }));
        assert!(h.engine.progress().get("steve").await.is_none());

        h.engine.cooldowns().stamp("steve", &stone, NOW - 61).await;
        h.engine.request_start("steve", &stone).await.unwrap();

        // Cooldowns are per player
        h.engine.cooldowns().stamp("alex", &stone, NOW).await;
        assert!(h.engine.request_start("alex", &stone).await.is_err());
        h.engine.request_start("notch", &stone).await.unwrap();
    }

    #[tokio::test]
    async fn test_progress_snapshot_percent() {
        let h = harness();
        let stone = define(&h.engine, "STONE", 7, "0").await;

        let err = h.engine.progress_snapshot("steve").await.unwrap_err();
        assert!(matches!(err, QuestError::NoActiveQuest(_)));

        h.engine.request_start("steve", &stone).await.unwrap();
        break_n(&h.engine, "steve", "STONE", 3).await;

        let snapshot = h.engine.progress_snapshot("steve").await.unwrap();
        assert_eq!(snapshot.quest.id, stone);
        assert_eq!((snapshot.current, snapshot.target, snapshot.percent), (3, 7, 42));
    }

    #[tokio::test]
    async fn test_deleted_quest_leaves_record() {
        let h = harness();
        let stone = define(&h.engine, "STONE", 5, "0").await;

        h.engine.request_start("steve", &stone).await.unwrap();
        break_n(&h.engine, "steve", "STONE", 2).await;
        h.engine.catalog().delete(&stone).await.unwrap();

        let outcome = h.engine.report_action("steve", ProgressType::BreakBlock, "STONE").await;
        assert_eq!(outcome, ActionOutcome::QuestMissing { quest_id: stone.clone() });

        let err = h.engine.progress_snapshot("steve").await.unwrap_err();
        assert!(matches!(err, QuestError::QuestNotFound(id) if id == stone));

        let record = h.engine.progress().get("steve").await.unwrap();
        assert_eq!(record.progress, 2);
        assert!(h.engine.progress_displays().await.is_empty());
    }

    #[tokio::test]
    async fn test_feedback_only_for_online_players() {
        let h = harness();
        let stone = define(&h.engine, "STONE", 5, "0").await;

        h.engine.request_start("steve", &stone).await.unwrap();
        h.engine.request_start("alex", &stone).await.unwrap();
        h.feedback.online.lock().unwrap().insert("steve".to_string());

        break_n(&h.engine, "Steve", "STONE", 1).await;
        break_n(&h.engine, "alex", "STONE", 1).await;
        {
            let shown = h.feedback.shown.lock().unwrap();
            assert_eq!(shown.len(), 1);
            assert_eq!(shown[0].0, "steve");
            assert_eq!(shown[0].1.percent, 20);
        }

        assert_eq!(h.engine.progress_displays().await.len(), 2);
        assert_eq!(h.engine.broadcast_progress().await, 1);
    }

    #[tokio::test]
    async fn test_closed_engine_rejects_mutations() {
        let h = harness();
        let stone = define(&h.engine, "STONE", 5, "0").await;
        h.engine.request_start("steve", &stone).await.unwrap();

        h.engine.close().await;
        assert!(h.engine.is_closed());

        let err = h.engine.request_start("alex", &stone).await.unwrap_err();
        assert!(matches!(err, QuestError::Closed));
        let outcome = h.engine.report_action("steve", ProgressType::BreakBlock, "STONE").await;
        assert_eq!(outcome, ActionOutcome::Closed);
        assert_eq!(h.engine.progress().get("steve").await.unwrap().progress, 0);

        // The catalog is frozen too
        let err = h
            .engine
            .define_quest(ProgressType::BreakBlock, fields("DIRT", 3, "0"))
            .await
            .unwrap_err();
        assert!(matches!(err, QuestError::Closed));
        let err = h.engine.update_quest(&stone, fields("DIRT", 3, "0")).await.unwrap_err();
        assert!(matches!(err, QuestError::Closed));
        let err = h.engine.delete_quest(&stone).await.unwrap_err();
        assert!(matches!(err, QuestError::Closed));
        assert_eq!(h.engine.catalog().get(&stone).await.unwrap().block, "STONE");
    }

    #[tokio::test]
    async fn test_handle_event() {
        let h = harness();
        let stone = define(&h.engine, "STONE", 5, "0").await;
        h.engine.request_start("steve", &stone).await.unwrap();

        let outcome = h
            .engine
            .handle_event(&QuestEvent::BlockBroken {
                player_id: "steve".to_string(),
                block: "stone".to_string(),
            })
            .await;
        assert!(matches!(outcome, ActionOutcome::Progressed(_)));

        let outcome = h
            .engine
            .handle_event(&QuestEvent::BlockPlaced {
                player_id: "steve".to_string(),
                block: "stone".to_string(),
            })
            .await;
        assert_eq!(outcome, ActionOutcome::Unmatched);
    }
}
