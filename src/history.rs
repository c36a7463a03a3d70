//! Persistent record of processed item identifiers.

use async_trait::async_trait;
use chrono::{Local, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::Result;

/// On-disk shape of the history file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedVideoRecord {
    pub processed_videos: BTreeSet<String>,
    /// RFC 3339 time of the last write
    #[serde(default)]
    pub last_updated: Option<String>,
}

impl ProcessedVideoRecord {
    pub fn contains(&self, item_id: &str) -> bool {
        self.processed_videos.contains(item_id)
    }

    pub fn len(&self) -> usize {
        self.processed_videos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processed_videos.is_empty()
    }
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Current record. Never fails on unreadable content.
    async fn snapshot(&self) -> Result<ProcessedVideoRecord>;

    /// Add `item_id` and persist.
    async fn record(&self, item_id: &str) -> Result<()>;

    /// Drop `item_id`; returns whether it was present.
    async fn remove(&self, item_id: &str) -> Result<bool>;
}

/// JSON file store. Writes go to a sibling temp file renamed over the target.
pub struct JsonHistoryStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonHistoryStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<ProcessedVideoRecord> {
        if !self.path.exists() {
            debug!("History file {} does not exist yet", self.path.display());
            return Ok(ProcessedVideoRecord::default());
        }

        let raw = fs::read(&self.path).await?;
        let parsed = std::str::from_utf8(&raw)
            .map_err(|e| e.to_string())
            .and_then(|text| serde_json::from_str::<ProcessedVideoRecord>(text).map_err(|e| e.to_string()));

        match parsed {
            Ok(record) => {
                debug!("Loaded history: {} processed items", record.len());
                Ok(record)
            }
            Err(reason) => {
                warn!("History file {} is corrupted: {}", self.path.display(), reason);
                self.isolate_corrupted().await;
                Ok(ProcessedVideoRecord::default())
            }
        }
    }

    /// Move the unreadable file aside so the next write starts clean.
    async fn isolate_corrupted(&self) {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "history".to_string());
        let mut target = self.path.with_file_name(format!("{}.corrupted", name));
        if target.exists() {
            let stamp = Local::now().format("%Y%m%d%H%M%S");
            target = self.path.with_file_name(format!("{}.corrupted-{}", name, stamp));
        }

        match fs::rename(&self.path, &target).await {
            Ok(()) => warn!("Moved corrupted history to {}", target.display()),
            Err(e) => warn!("Could not move corrupted history aside: {}", e),
        }
    }

    async fn save(&self, record: &mut ProcessedVideoRecord) -> Result<()> {
        record.last_updated = Some(Utc::now().to_rfc3339());
        let content = serde_json::to_string_pretty(record)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for JsonHistoryStore {
    async fn snapshot(&self) -> Result<ProcessedVideoRecord> {
        let _guard = self.write_lock.lock().await;
        self.load().await
    }

    async fn record(&self, item_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut record = self.load().await?;
        if record.processed_videos.insert(item_id.to_string()) {
            self.save(&mut record).await?;
            info!("Recorded {} as processed ({} total)", item_id, record.len());
        }
        Ok(())
    }

    async fn remove(&self, item_id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut record = self.load().await?;
        let removed = record.processed_videos.remove(item_id);
        if removed {
            self.save(&mut record).await?;
        }
        Ok(removed)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonHistoryStore::new(dir.path().join("history.json"));
        assert!(store.snapshot().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_record_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        let store = JsonHistoryStore::new(&path);

        store.record("b").await.unwrap();
        store.record("a").await.unwrap();
        store.record("a").await.unwrap();

        let reopened = JsonHistoryStore::new(&path);
        let record = reopened.snapshot().await.unwrap();
        assert_eq!(record.len(), 2);
        assert!(record.contains("a"));
        assert!(record.last_updated.is_some());

        let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["processed_videos"], serde_json::json!(["a", "b"]));
        assert!(!dir.path().join("history.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_reads_file_with_naive_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, r#"{"processed_videos": ["x", "y"], "last_updated": "2024-05-01T10:00:00.123456"}"#).unwrap();

        let record = JsonHistoryStore::new(&path).snapshot().await.unwrap();
        assert!(record.contains("x") && record.contains("y"));
    }

    #[tokio::test]
    async fn test_corrupted_file_is_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subscription_history.json");
        std::fs::write(&path, "{ this is not json").unwrap();

        let store = JsonHistoryStore::new(&path);
        let record = store.snapshot().await.unwrap();

        assert!(record.is_empty());
        assert!(!path.exists());
        let aside = dir.path().join("subscription_history.json.corrupted");
        assert_eq!(std::fs::read_to_string(aside).unwrap(), "{ this is not json");

        store.record("fresh").await.unwrap();
        assert!(store.snapshot().await.unwrap().contains("fresh"));
    }

    #[tokio::test]
    async fn test_second_corruption_gets_timestamped_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("h.json");
        std::fs::write(dir.path().join("h.json.corrupted"), "old").unwrap();
        std::fs::write(&path, [0xff, 0xfe, 0x00]).unwrap();

        JsonHistoryStore::new(&path).snapshot().await.unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert!(names.iter().any(|n| n.starts_with("h.json.corrupted-")));
    }

    #[tokio::test]
    async fn test_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonHistoryStore::new(dir.path().join("history.json"));
        store.record("a").await.unwrap();

        assert!(store.remove("a").await.unwrap());
        assert!(!store.remove("a").await.unwrap());
        assert!(store.snapshot().await.unwrap().is_empty());
    }
}
