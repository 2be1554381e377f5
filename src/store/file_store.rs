// =============================================================================
// SubscriberStore — JSON document keyed by subscriber id
// =============================================================================
//
// Whole-record get/set plus a closure-based `update` used by configuration
// commands.  Every mutation is applied and persisted while the write lock is
// held, so the monitor never observes a torn field group and two writers can
// never reorder their saves.  Memory only moves ahead of disk on a successful
// save.
//
// Persistence uses the same tmp + rename pattern as the runtime config.
// =============================================================================

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::store::subscriber::SubscriberConfig;
use crate::types::SubscriberId;

type Document = BTreeMap<SubscriberId, SubscriberConfig>;

/// Concurrency-safe subscriber settings, optionally backed by a file.
pub struct SubscriberStore {
    /// `None` keeps the store purely in memory.
    path: Option<PathBuf>,
    subscribers: RwLock<Document>,
}

impl SubscriberStore {
    /// Open the document at `path`; a missing file starts an empty store.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let subscribers: Document = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read subscriber data from {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("failed to parse subscriber data from {}", path.display()))?
        } else {
            Document::new()
        };

        info!(
            path = %path.display(),
            subscribers = subscribers.len(),
            "subscriber store opened"
        );

        Ok(Self {
            path: Some(path.to_path_buf()),
            subscribers: RwLock::new(subscribers),
        })
    }

    /// Store without persistence.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            subscribers: RwLock::new(Document::new()),
        }
    }

    pub fn get(&self, id: &str) -> Option<SubscriberConfig> {
        self.subscribers.read().get(id).cloned()
    }

    /// Return the record for `id`, creating and persisting the default record
    /// on first contact.
    pub fn get_or_create(&self, id: &str) -> Result<SubscriberConfig> {
        if let Some(cfg) = self.get(id) {
            return Ok(cfg);
        }
        self.update(id, |cfg| cfg.clone())
    }

    /// Replace the whole record for `id` and persist.
    pub fn set(&self, id: &str, config: SubscriberConfig) -> Result<()> {
        let mut subscribers = self.subscribers.write();
        self.commit(&mut subscribers, id, config)
    }

    /// Apply `f` to a copy of the record for `id` (default record if absent)
    /// and, when anything changed, persist and publish the copy.  A failed
    /// save leaves the in-memory record untouched.
    pub fn update<F, R>(&self, id: &str, f: F) -> Result<R>
    where
        F: FnOnce(&mut SubscriberConfig) -> R,
    {
        let mut subscribers = self.subscribers.write();
        let current = subscribers.get(id);
        let created = current.is_none();
        let mut record = current.cloned().unwrap_or_default();
        let out = f(&mut record);
        let changed = created || subscribers.get(id) != Some(&record);

        if changed {
            self.commit(&mut subscribers, id, record)?;
            debug!(subscriber = id, created, "subscriber record updated");
        }
        Ok(out)
    }

    /// Subscriber ids in stable (sorted) order.
    pub fn ids(&self) -> Vec<SubscriberId> {
        self.subscribers.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Install `record` and persist the document; on a failed save the
    /// previous record (or its absence) is restored.
    fn commit(&self, subscribers: &mut Document, id: &str, record: SubscriberConfig) -> Result<()> {
        let previous = subscribers.insert(id.to_string(), record);
        if let Err(e) = self.persist(subscribers) {
            match previous {
                Some(old) => subscribers.insert(id.to_string(), old),
                None => subscribers.remove(id),
            };
            return Err(e);
        }
        Ok(())
    }

    fn persist(&self, subscribers: &Document) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let content = serde_json::to_string_pretty(subscribers)
            .context("failed to serialise subscriber data to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp subscriber data to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp subscriber data to {}", path.display()))?;

        debug!(path = %path.display(), "subscriber data saved (atomic)");
        Ok(())
    }
}

impl std::fmt::Debug for SubscriberStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberStore")
            .field("path", &self.path)
            .field("subscribers", &self.len())
            .finish()
    }
}
