//! History storage backends.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};

use super::{HistoryError, HistoryRecord, Identity};

/// Append-only storage for [`HistoryRecord`]s.
///
/// Implementations must tolerate concurrent appends for the same identity
/// and return each identity's records in insertion order.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append a record to its identity's log.
    async fn append(&self, record: HistoryRecord) -> Result<(), HistoryError>;

    /// All records for `identity`, oldest first.
    async fn list(&self, identity: &Identity) -> Result<Vec<HistoryRecord>, HistoryError>;

    /// At most `limit` records for `identity`, skipping the first `offset`.
    async fn page(
        &self,
        identity: &Identity,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<HistoryRecord>, HistoryError> {
        Ok(self
            .list(identity)
            .await?
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect())
    }

    /// Number of records for `identity`.
    async fn count(&self, identity: &Identity) -> Result<usize, HistoryError> {
        Ok(self.list(identity).await?.len())
    }
}

/// History kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryHistoryStore {
    records: RwLock<HashMap<Identity, Vec<HistoryRecord>>>,
}

impl InMemoryHistoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn append(&self, record: HistoryRecord) -> Result<(), HistoryError> {
        let mut records = self.records.write().await;
        records
            .entry(record.identity.clone())
            .or_default()
            .push(record);
        Ok(())
    }

    async fn list(&self, identity: &Identity) -> Result<Vec<HistoryRecord>, HistoryError> {
        let records = self.records.read().await;
        Ok(records.get(identity).cloned().unwrap_or_default())
    }

    async fn page(
        &self,
        identity: &Identity,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<HistoryRecord>, HistoryError> {
        let records = self.records.read().await;
        Ok(records
            .get(identity)
            .map(|log| log.iter().skip(offset).take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn count(&self, identity: &Identity) -> Result<usize, HistoryError> {
        let records = self.records.read().await;
        Ok(records.get(identity).map_or(0, Vec::len))
    }
}

/// History in a JSON-lines file, one record per line.
///
/// Appends go through a single async lock, so concurrent writers never
/// interleave partial lines. Lines that fail to parse (e.g. a write torn by
/// a crash) are skipped on read.
#[derive(Debug)]
pub struct JsonlHistoryStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlHistoryStore {
    /// Use the file at `path`, creating it on first append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// The backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<Vec<HistoryRecord>, HistoryError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for (index, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<HistoryRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(
                    path = %self.path.display(),
                    line = index + 1,
                    error = %e,
                    "skipping unreadable history line"
                ),
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl HistoryStore for JsonlHistoryStore {
    async fn append(&self, record: HistoryRecord) -> Result<(), HistoryError> {
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    async fn list(&self, identity: &Identity) -> Result<Vec<HistoryRecord>, HistoryError> {
        let _guard = self.lock.lock().await;
        Ok(self
            .read_all()
            .await?
            .into_iter()
            .filter(|record| &record.identity == identity)
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn record(who: &str, code: &str) -> HistoryRecord {
        HistoryRecord::now(who.into(), code, format!("{code} ran"))
    }

    #[tokio::test]
    async fn test_in_memory_keeps_insertion_order_per_identity() {
        let store = InMemoryHistoryStore::new();
        store.append(record("a", "one")).await.unwrap();
        store.append(record("b", "other")).await.unwrap();
        store.append(record("a", "two")).await.unwrap();

        let log = store.list(&"a".into()).await.unwrap();
        let codes: Vec<_> = log.iter().map(|r| r.code.as_str()).collect();
        assert_eq!(codes, vec!["one", "two"]);
        assert_eq!(store.count(&"b".into()).await.unwrap(), 1);
        assert!(store.list(&"nobody".into()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_in_memory_paging() {
        let store = InMemoryHistoryStore::new();
        for i in 0..5 {
            store.append(record("a", &i.to_string())).await.unwrap();
        }

        let page = store.page(&"a".into(), 1, 2).await.unwrap();
        let codes: Vec<_> = page.iter().map(|r| r.code.as_str()).collect();
        assert_eq!(codes, vec!["1", "2"]);
        assert!(store.page(&"a".into(), 10, 2).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_in_memory_concurrent_appends() {
        let store = Arc::new(InMemoryHistoryStore::new());
        let mut handles = Vec::new();
        for i in 0..50 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.append(record("a", &i.to_string())).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.count(&"a".into()).await.unwrap(), 50);
    }

    #[tokio::test]
    async fn test_jsonl_round_trip_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");

        let store = JsonlHistoryStore::new(&path);
        assert!(store.list(&"a".into()).await.unwrap().is_empty());
        store.append(record("a", "first")).await.unwrap();
        store.append(record("b", "theirs")).await.unwrap();
        store.append(record("a", "second")).await.unwrap();

        let reopened = JsonlHistoryStore::new(&path);
        let log = reopened.list(&"a".into()).await.unwrap();
        let codes: Vec<_> = log.iter().map(|r| r.code.as_str()).collect();
        assert_eq!(codes, vec!["first", "second"]);
        assert_eq!(reopened.count(&"b".into()).await.unwrap(), 1);
        assert_eq!(reopened.page(&"a".into(), 1, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_jsonl_skips_torn_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");

        let store = JsonlHistoryStore::new(&path);
        store.append(record("a", "kept")).await.unwrap();
        tokio::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .unwrap()
            .write_all(b"{\"identity\":\"a\",\"times")
            .await
            .unwrap();

        let log = store.list(&"a".into()).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].code, "kept");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_jsonl_concurrent_appends_do_not_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonlHistoryStore::new(dir.path().join("history.jsonl")));

        let mut handles = Vec::new();
        for i in 0..20 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.append(record("a", &"x".repeat(i * 100))).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.count(&"a".into()).await.unwrap(), 20);
    }
}
