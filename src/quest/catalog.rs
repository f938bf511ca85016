//! Quest Catalog
//!
//! Loads, caches, and edits quest definitions stored in a TOML file.
//! Every edit is written through to disk before it becomes visible.
//! Supports hot-reloading when the file is edited by hand.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::definition::{ProgressType, QuestDefinition, QuestFields, RawQuest};
use crate::error::{PersistenceError, QuestError};
use crate::storage;

/// On-disk layout of the catalog file
#[derive(Debug, Default, Deserialize, Serialize)]
struct CatalogFile {
    #[serde(default)]
    quests: BTreeMap<String, toml::Value>,
}

/// A catalog slot: either a usable quest or an entry that failed validation
#[derive(Debug, Clone)]
pub enum CatalogEntry {
    Valid(Arc<QuestDefinition>),
    /// Kept verbatim so write-through does not destroy it
    Invalid { raw: toml::Value, reason: String },
}

impl CatalogEntry {
    /// Validate one `[quests.<id>]` value
    pub fn from_value(id: &str, value: toml::Value) -> Self {
        let raw: RawQuest = match value.clone().try_into() {
            Ok(raw) => raw,
            Err(e) => {
                return CatalogEntry::Invalid {
                    raw: value,
                    reason: format!("not a quest table: {}", e),
                };
            }
        };

        match QuestDefinition::from_raw(id, &raw) {
            Ok(quest) => CatalogEntry::Valid(Arc::new(quest)),
            Err(reason) => CatalogEntry::Invalid { raw: value, reason },
        }
    }

    fn to_value(&self, path: &Path) -> Result<toml::Value, PersistenceError> {
        match self {
            CatalogEntry::Valid(quest) => {
                toml::Value::try_from(quest.to_raw()).map_err(|e| PersistenceError::Encode {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })
            }
            CatalogEntry::Invalid { raw, .. } => Ok(raw.clone()),
        }
    }
}

/// Registry for all quest definitions
pub struct QuestCatalog {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, CatalogEntry>>,
    /// Serializes edits so two write-throughs never interleave
    edit_lock: Mutex<()>,
}

impl QuestCatalog {
    /// Create an empty catalog backed by `path` without touching the disk
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            entries: RwLock::new(BTreeMap::new()),
            edit_lock: Mutex::new(()),
        }
    }

    /// Load the catalog file. A missing file is an empty catalog; a file that
    /// is not valid TOML is an error.
    pub async fn load(path: &Path) -> Result<Self, QuestError> {
        let catalog = Self::new(path);
        let entries = catalog.read_entries().await?;
        *catalog.entries.write().await = entries;
        Ok(catalog)
    }

    /// Re-read the file, replacing the in-memory catalog
    pub async fn reload(&self) -> Result<(), QuestError> {
        let _guard = self.edit_lock.lock().await;
        let entries = self.read_entries().await?;
        *self.entries.write().await = entries;
        Ok(())
    }

    async fn read_entries(&self) -> Result<BTreeMap<String, CatalogEntry>, QuestError> {
        info!("Loading quests from {:?}", self.path);

        let content = match storage::read_optional(&self.path).await? {
            Some(content) => content,
            None => {
                warn!("Quest catalog does not exist yet: {:?}", self.path);
                return Ok(BTreeMap::new());
            }
        };

        let file: CatalogFile = toml::from_str(&content).map_err(|e| PersistenceError::Decode {
            path: self.path.clone(),
            message: e.to_string(),
        })?;

        let mut entries = BTreeMap::new();
        let mut valid = 0;
        for (id, value) in file.quests {
            let entry = CatalogEntry::from_value(&id, value);
            match &entry {
                CatalogEntry::Valid(_) => valid += 1,
                CatalogEntry::Invalid { reason, .. } => {
                    warn!("Quest '{}' is invalid and will be hidden: {}", id, reason);
                }
            }
            entries.insert(id, entry);
        }

        info!("Loaded {} quest definitions ({} invalid)", valid, entries.len() - valid);
        Ok(entries)
    }

    /// Get a valid quest by ID
    pub async fn get(&self, quest_id: &str) -> Option<Arc<QuestDefinition>> {
        let entries = self.entries.read().await;
        match entries.get(quest_id) {
            Some(CatalogEntry::Valid(quest)) => Some(quest.clone()),
            _ => None,
        }
    }

    /// All valid quests, in ID order (creation order for generated IDs)
    pub async fn list_valid(&self) -> Vec<(String, Arc<QuestDefinition>)> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .filter_map(|(id, entry)| match entry {
                CatalogEntry::Valid(quest) => Some((id.clone(), quest.clone())),
                CatalogEntry::Invalid { .. } => None,
            })
            .collect()
    }

    /// Create a new quest and return its freshly generated ID
    pub async fn define(
        &self,
        progress_type: ProgressType,
        fields: QuestFields,
    ) -> Result<String, QuestError> {
        let quest_id = new_quest_id();
        let quest = fields.into_definition(&quest_id, progress_type)?;
        let name = quest.name.clone();

        self.commit(|entries| {
            entries.insert(quest_id.clone(), CatalogEntry::Valid(Arc::new(quest)));
            Ok(())
        })
        .await?;

        info!("Quest '{}' added ({}, {})", name, quest_id, progress_type.as_str());
        Ok(quest_id)
    }

    /// Replace every field of a quest except its progress type
    pub async fn update(&self, quest_id: &str, fields: QuestFields) -> Result<(), QuestError> {
        self.commit(|entries| {
            let progress_type = match entries.get(quest_id) {
                Some(CatalogEntry::Valid(quest)) => quest.progress_type,
                Some(CatalogEntry::Invalid { raw, .. }) => raw
                    .get("type")
                    .and_then(|v| v.as_str())
                    .and_then(ProgressType::from_str)
                    .ok_or_else(|| {
                        QuestError::Validation(format!("quest '{}' has no usable type", quest_id))
                    })?,
                None => return Err(QuestError::QuestNotFound(quest_id.to_string())),
            };

            let quest = fields.into_definition(quest_id, progress_type)?;
            entries.insert(quest_id.to_string(), CatalogEntry::Valid(Arc::new(quest)));
            Ok(())
        })
        .await?;

        info!("Quest '{}' updated", quest_id);
        Ok(())
    }

    /// Remove a quest. Progress records and cooldowns that still name it are
    /// left alone and resolve as "quest not found" from now on.
    pub async fn delete(&self, quest_id: &str) -> Result<(), QuestError> {
        self.commit(|entries| {
            entries
                .remove(quest_id)
                .map(|_| ())
                .ok_or_else(|| QuestError::QuestNotFound(quest_id.to_string()))
        })
        .await?;

        info!("Quest '{}' deleted", quest_id);
        Ok(())
    }

    /// Apply an edit to a copy of the catalog, write it to disk, then swap
    /// it in. Nothing changes in memory if validation or the write fails.
    async fn commit<F>(&self, edit: F) -> Result<(), QuestError>
    where
        F: FnOnce(&mut BTreeMap<String, CatalogEntry>) -> Result<(), QuestError>,
    {
        let _guard = self.edit_lock.lock().await;

        let mut next = self.entries.read().await.clone();
        edit(&mut next)?;

        let mut file = CatalogFile::default();
        for (id, entry) in &next {
            file.quests.insert(id.clone(), entry.to_value(&self.path)?);
        }
        let content = toml::to_string_pretty(&file).map_err(|e| PersistenceError::Encode {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        storage::write_atomic(&self.path, &content).await?;

        *self.entries.write().await = next;
        Ok(())
    }

    /// Number of valid quests
    pub async fn count(&self) -> usize {
        let entries = self.entries.read().await;
        entries
            .values()
            .filter(|e| matches!(e, CatalogEntry::Valid(_)))
            .count()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start file watcher for hot-reload
    /// Returns a channel receiver that signals when reloads occur
    pub fn start_file_watcher(
        self: &Arc<Self>,
    ) -> tokio::sync::mpsc::Receiver<HotReloadEvent> {
        use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
        use std::time::Duration;

        let (tx, rx) = tokio::sync::mpsc::channel(32);
        let catalog = Arc::clone(self);
        let rt = tokio::runtime::Handle::current();

        // Watch the directory: atomic writes replace the file inode
        let file_name = self.path.file_name().map(|n| n.to_os_string());
        let watch_dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };

        std::thread::spawn(move || {
            let (notify_tx, notify_rx) = std::sync::mpsc::channel();

            let mut watcher = match RecommendedWatcher::new(
                move |res: Result<notify::Event, notify::Error>| {
                    if let Ok(event) = res {
                        let _ = notify_tx.send(event);
                    }
                },
                Config::default().with_poll_interval(Duration::from_secs(1)),
            ) {
                Ok(w) => w,
                Err(e) => {
                    error!("Failed to create file watcher: {}", e);
                    return;
                }
            };

            if let Err(e) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
                error!("Failed to watch quest catalog directory {:?}: {}", watch_dir, e);
                return;
            }

            info!("Quest hot-reload watcher started for {:?}", watch_dir);

            while let Ok(event) = notify_rx.recv() {
                if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    continue;
                }
                let touches_catalog = event
                    .paths
                    .iter()
                    .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                if !touches_catalog {
                    continue;
                }

                // Receiver dropped, nobody is listening anymore
                if tx.is_closed() {
                    break;
                }

                let catalog = Arc::clone(&catalog);
                let tx = tx.clone();
                rt.spawn(async move {
                    let event = match catalog.reload().await {
                        Ok(()) => {
                            info!("Quest catalog reloaded from {:?}", catalog.path());
                            HotReloadEvent::Reloaded(catalog.path().to_string_lossy().to_string())
                        }
                        Err(e) => {
                            error!("Quest catalog reload failed: {}", e);
                            HotReloadEvent::Error(e.to_string())
                        }
                    };
                    let _ = tx.send(event).await;
                });
            }
        });

        rx
    }
}

/// Events from the hot-reload watcher
#[derive(Debug, Clone)]
pub enum HotReloadEvent {
    /// The catalog was reloaded successfully
    Reloaded(String),
    /// An error occurred during reload
    Error(String),
}

/// Opaque, never reused quest ID. UUIDv7 is time ordered, so sorted IDs
/// list quests in creation order.
fn new_quest_id() -> String {
    format!("quest_{}", Uuid::now_v7().simple())
}
