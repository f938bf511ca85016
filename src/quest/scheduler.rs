//! Background Persistence
//!
//! Periodic tasks that write the progress store and cooldown ledger to disk
//! and refresh every online player's progress display. Failures are logged
//! and retried on the next tick; in-memory state is never touched.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::engine::QuestEngine;
use crate::config::PersistenceConfig;
use crate::error::PersistenceError;

pub struct PersistenceScheduler {
    engine: Arc<QuestEngine>,
    config: PersistenceConfig,
}

impl PersistenceScheduler {
    pub fn new(engine: Arc<QuestEngine>, config: PersistenceConfig) -> Self {
        Self { engine, config }
    }

    /// Start the progress flush, cooldown flush and display tasks
    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::with_capacity(3);

        let engine = self.engine.clone();
        tasks.push(spawn_periodic(
            "progress flush",
            self.config.progress_interval(),
            shutdown_rx.clone(),
            move || {
                let engine = engine.clone();
                async move {
                    if let Err(e) = engine.progress().flush_if_dirty().await {
                        warn!("Failed to save quest progress: {}", e);
                    }
                }
            },
        ));

        let engine = self.engine.clone();
        tasks.push(spawn_periodic(
            "cooldown flush",
            self.config.cooldown_interval(),
            shutdown_rx.clone(),
            move || {
                let engine = engine.clone();
                async move {
                    if let Err(e) = engine.cooldowns().flush_if_dirty().await {
                        warn!("Failed to save quest cooldowns: {}", e);
                    }
                }
            },
        ));

        let engine = self.engine.clone();
        tasks.push(spawn_periodic(
            "progress display",
            self.config.display_interval(),
            shutdown_rx,
            move || {
                let engine = engine.clone();
                async move {
                    engine.broadcast_progress().await;
                }
            },
        ));

        info!(
            "Persistence scheduler started (progress every {:?}, cooldowns every {:?})",
            self.config.progress_interval(),
            self.config.cooldown_interval()
        );

        SchedulerHandle {
            engine: self.engine,
            shutdown_tx,
            tasks,
        }
    }
}

/// Stops the background tasks and performs the final save
pub struct SchedulerHandle {
    engine: Arc<QuestEngine>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Close the engine, stop every task, then write both stores
    pub async fn shutdown(self) -> Result<(), PersistenceError> {
        self.engine.close().await;

        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("Persistence task ended abnormally: {}", e);
            }
        }

        self.engine.flush_all().await?;
        info!("Quest progress and cooldowns saved");
        Ok(())
    }
}

fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut job: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => job().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("{} task stopped", name);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QuestError;
    use crate::quest::catalog::QuestCatalog;
    use crate::quest::cooldown::CooldownLedger;
    use crate::quest::definition::{ProgressType, QuestFields};
    use crate::quest::engine::FeedbackSink;
    use crate::quest::events::ProgressDisplay;
    use crate::quest::progress::ProgressStore;
    use crate::quest::reward::{RewardDispatcher, RewardRequest};
    use tempfile::TempDir;

    struct Quiet;

    impl RewardDispatcher for Quiet {
        fn dispatch(&self, _request: RewardRequest) {}
    }

    impl FeedbackSink for Quiet {
        fn is_online(&self, _player: &str) -> bool {
            false
        }

        fn show_progress(&self, _player: &str, _display: &ProgressDisplay) {}
    }

    async fn engine_with_quest(dir: &TempDir) -> (Arc<QuestEngine>, String) {
        let engine = Arc::new(QuestEngine::new(
            Arc::new(QuestCatalog::new(&dir.path().join("quests.toml"))),
            Arc::new(ProgressStore::new(&dir.path().join("progress.json"))),
            Arc::new(CooldownLedger::new(&dir.path().join("cooldowns.json"))),
            Arc::new(Quiet),
            Arc::new(Quiet),
        ));
        let fields = QuestFields {
            name: "Stonecutter".to_string(),
            description: "Break stone".to_string(),
            block: "STONE".to_string(),
            target: "2".to_string(),
            reward: "diamond".to_string(),
            reward_message: "Nice".to_string(),
            cooldown: "5m".to_string(),
        };
        let quest_id = engine
            .catalog()
            .define(ProgressType::BreakBlock, fields)
            .await
            .unwrap();
        (engine, quest_id)
    }

    #[tokio::test]
    async fn test_shutdown_flushes_both_stores() {
        let dir = TempDir::new().unwrap();
        let (engine, quest_id) = engine_with_quest(&dir).await;

        let handle = PersistenceScheduler::new(engine.clone(), PersistenceConfig::default()).spawn();

        engine.request_start("steve", &quest_id).await.unwrap();
        engine.request_start("alex", &quest_id).await.unwrap();
        for _ in 0..2 {
            engine.report_action("alex", ProgressType::BreakBlock, "STONE").await;
        }

        handle.shutdown().await.unwrap();

        let progress = ProgressStore::load(&dir.path().join("progress.json")).await.unwrap();
        assert_eq!(progress.get("steve").await.unwrap().quest, quest_id);
        assert!(progress.get("alex").await.is_none());

        let cooldowns = CooldownLedger::load(&dir.path().join("cooldowns.json")).await.unwrap();
        assert!(cooldowns.last_completion("alex", &quest_id).await.is_some());

        let err = engine.request_start("notch", &quest_id).await.unwrap_err();
        assert!(matches!(err, QuestError::Closed));
    }

    #[tokio::test]
    async fn test_periodic_progress_flush() {
        let dir = TempDir::new().unwrap();
        let (engine, quest_id) = engine_with_quest(&dir).await;
        let path = dir.path().join("progress.json");

        let handle = PersistenceScheduler::new(engine.clone(), PersistenceConfig::default()).spawn();
        engine.request_start("steve", &quest_id).await.unwrap();
        assert!(!path.exists());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(path.exists());

        handle.shutdown().await.unwrap();
    }
}
