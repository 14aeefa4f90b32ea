//! In-memory stores for tests and dry runs.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{AppError, Result};
use crate::models::{ParsedRecord, RegistryRecord};
use crate::storage::{DetailStore, RecordStore, RecordTransaction};

/// A stored registry row plus its last write time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub record: RegistryRecord,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    rows: BTreeMap<String, StoredRecord>,
    commits: usize,
    unavailable: bool,
}

/// Registry table held in memory.
///
/// Writes are staged per transaction and applied on commit, so a dropped
/// transaction leaves the table untouched.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordStore {
    inner: Arc<Mutex<Inner>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn unreachable_store() -> AppError {
    AppError::Database(sqlx::Error::PoolTimedOut)
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `records`.
    pub fn with_records(records: impl IntoIterator<Item = RegistryRecord>) -> Self {
        let store = Self::new();
        {
            let mut inner = lock(&store.inner);
            let now = Utc::now();
            for record in records {
                inner.rows.insert(
                    record.type_id.clone(),
                    StoredRecord {
                        record,
                        updated_at: now,
                    },
                );
            }
        }
        store
    }

    /// Make every call fail with a transient connectivity error.
    pub fn set_unavailable(&self, unavailable: bool) {
        lock(&self.inner).unavailable = unavailable;
    }

    pub fn get(&self, type_id: &str) -> Option<StoredRecord> {
        lock(&self.inner).rows.get(type_id).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of committed transactions.
    pub fn commits(&self) -> usize {
        lock(&self.inner).commits
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn load_all(&self) -> Result<Vec<RegistryRecord>> {
        let inner = lock(&self.inner);
        if inner.unavailable {
            return Err(unreachable_store());
        }
        Ok(inner.rows.values().map(|s| s.record.clone()).collect())
    }

    async fn begin(&self) -> Result<Box<dyn RecordTransaction>> {
        if lock(&self.inner).unavailable {
            return Err(unreachable_store());
        }
        Ok(Box::new(MemoryTransaction {
            store: Arc::clone(&self.inner),
            staged: Vec::new(),
        }))
    }
}

enum Staged {
    Insert(RegistryRecord),
    Update(RegistryRecord),
}

struct MemoryTransaction {
    store: Arc<Mutex<Inner>>,
    staged: Vec<Staged>,
}

#[async_trait]
impl RecordTransaction for MemoryTransaction {
    async fn insert(&mut self, record: &RegistryRecord) -> Result<()> {
        self.staged.push(Staged::Insert(record.clone()));
        Ok(())
    }

    async fn update(&mut self, record: &RegistryRecord) -> Result<()> {
        self.staged.push(Staged::Update(record.clone()));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut inner = lock(&self.store);
        if inner.unavailable {
            return Err(unreachable_store());
        }
        let now = Utc::now();
        for change in self.staged {
            match change {
                Staged::Insert(record) => {
                    inner.rows.insert(
                        record.type_id.clone(),
                        StoredRecord {
                            record,
                            updated_at: now,
                        },
                    );
                }
                // Same as an UPDATE ... WHERE type_id = $1 matching nothing.
                Staged::Update(record) => match inner.rows.get_mut(&record.type_id) {
                    Some(row) => {
                        row.record = record;
                        row.updated_at = now;
                    }
                    None => log::warn!("Update of {} matched no row", record.type_id),
                },
            }
        }
        inner.commits += 1;
        Ok(())
    }
}

/// Detail table held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryDetailStore {
    rows: Arc<Mutex<BTreeMap<String, ParsedRecord>>>,
}

impl MemoryDetailStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, type_id: &str) -> Option<ParsedRecord> {
        lock(&self.rows).get(type_id).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.rows).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DetailStore for MemoryDetailStore {
    async fn upsert(&self, record: &ParsedRecord) -> Result<()> {
        lock(&self.rows).insert(record.type_id.clone(), record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, status: &str) -> RegistryRecord {
        RegistryRecord {
            type_id: id.into(),
            status: status.into(),
            ..RegistryRecord::default()
        }
    }

    #[tokio::test]
    async fn test_update_of_missing_row_changes_nothing() {
        let store = MemoryRecordStore::with_records([record("T1", "Active")]);
        let mut tx = store.begin().await.unwrap();
        tx.update(&record("T2", "Withdrawn")).await.unwrap();
        tx.update(&record("T1", "Withdrawn")).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.len(), 1);
        assert!(store.get("T2").is_none());
        assert_eq!(store.get("T1").unwrap().record.status, "Withdrawn");
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let store = MemoryRecordStore::new();
        {
            let mut tx = store.begin().await.unwrap();
            tx.insert(&record("T1", "Active")).await.unwrap();
        }
        assert!(store.is_empty());
        assert_eq!(store.commits(), 0);
    }

    #[tokio::test]
    async fn test_commit_applies_and_stamps() {
        let store = MemoryRecordStore::with_records([record("T1", "Active")]);
        let before = store.get("T1").unwrap().updated_at;

        let mut tx = store.begin().await.unwrap();
        tx.update(&record("T1", "Withdrawn")).await.unwrap();
        tx.commit().await.unwrap();

        let after = store.get("T1").unwrap();
        assert_eq!(after.record.status, "Withdrawn");
        assert!(after.updated_at >= before);
        assert_eq!(store.commits(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_is_transient() {
        let store = MemoryRecordStore::new();
        store.set_unavailable(true);
        let err = store.load_all().await.unwrap_err();
        assert!(err.is_transient());
    }
}
