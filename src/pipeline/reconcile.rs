//! List reconciler: snapshot in, registry writes and change notifications out.
//!
//! One run:
//! 1. Read and validate the snapshot (before touching the store or broker)
//! 2. Load the persisted registry, with bounded retries
//! 3. Classify every record (insert / update / unchanged)
//! 4. Write the changes inside one transaction
//! 5. Publish one notification per changed record
//! 6. Commit
//!
//! A failed publish drops the transaction, which rolls it back, so the
//! redelivered message starts from the same state. A commit that fails after
//! publishing can only cause duplicate notifications downstream.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::broker::Publisher;
use crate::error::{AppError, Result};
use crate::models::{ChangeNotification, ColumnMapping, Config, ListReady, Snapshot};
use crate::pipeline::diff::{DiffCalculator, ReconcilePlan};
use crate::pipeline::worker::MessageHandler;
use crate::storage::{LocalStorage, RecordStore};
use crate::utils::log;
use crate::utils::retry::RetryPolicy;

/// Counters for one reconcile run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub total_rows: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub duplicates: usize,
    pub notified: usize,
}

impl ReconcileReport {
    fn new(snapshot: &Snapshot, plan: &ReconcilePlan) -> Self {
        Self {
            total_rows: snapshot.total_rows,
            inserted: plan.inserts.len(),
            updated: plan.updates.len(),
            unchanged: plan.unchanged.len(),
            skipped: snapshot.skipped_rows,
            duplicates: snapshot.duplicate_rows,
            notified: 0,
        }
    }

    pub fn items(&self) -> Vec<(&'static str, String)> {
        vec![
            ("rows", self.total_rows.to_string()),
            ("inserted", self.inserted.to_string()),
            ("updated", self.updated.to_string()),
            ("unchanged", self.unchanged.to_string()),
            ("skipped", self.skipped.to_string()),
            ("duplicates", self.duplicates.to_string()),
            ("notified", self.notified.to_string()),
        ]
    }
}

/// Reconciles snapshots against the registry table.
pub struct Reconciler {
    store: Arc<dyn RecordStore>,
    publisher: Arc<dyn Publisher>,
    mapping: ColumnMapping,
    notify_queue: String,
    ready_marker: String,
    retry: RetryPolicy,
    calculator: DiffCalculator,
}

impl Reconciler {
    pub fn new(store: Arc<dyn RecordStore>, publisher: Arc<dyn Publisher>, config: &Config) -> Self {
        Self {
            store,
            publisher,
            mapping: config.columns.clone(),
            notify_queue: config.queues.vehicle_pages.clone(),
            ready_marker: config.queues.ready_marker.clone(),
            retry: config.retry.connect_policy(),
            calculator: DiffCalculator::new(),
        }
    }

    /// Override the retry budget used for store access.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Read a snapshot file and reconcile it.
    pub async fn reconcile_file(&self, path: &Path) -> Result<ReconcileReport> {
        log::header(&format!("RECONCILE {}", path.display()));
        let snapshot = LocalStorage::read_snapshot(path, &self.mapping).await?;
        self.reconcile(&snapshot).await
    }

    /// Compute the plan for a snapshot file without writing or publishing.
    pub async fn plan_file(&self, path: &Path) -> Result<(ReconcilePlan, ReconcileReport)> {
        let snapshot = LocalStorage::read_snapshot(path, &self.mapping).await?;
        let plan = self.plan(&snapshot).await?;
        let report = ReconcileReport::new(&snapshot, &plan);
        Ok((plan, report))
    }

    async fn plan(&self, snapshot: &Snapshot) -> Result<ReconcilePlan> {
        let persisted = self
            .retry
            .run_if("load registry", AppError::is_transient, || {
                self.store.load_all()
            })
            .await?;
        ::log::debug!(
            "Loaded {} persisted records, {} in snapshot",
            persisted.len(),
            snapshot.len()
        );
        Ok(self.calculator.calculate(&persisted, snapshot))
    }

    /// Reconcile an already-parsed snapshot.
    pub async fn reconcile(&self, snapshot: &Snapshot) -> Result<ReconcileReport> {
        log::step(1, 3, "Classifying snapshot");
        let plan = self.plan(snapshot).await?;
        let mut report = ReconcileReport::new(snapshot, &plan);

        if !plan.has_changes() {
            log::sub_item(&format!("No changes ({})", log::inline_summary(&report.items())));
            return Ok(report);
        }

        log::step(2, 3, &format!("Writing {} changes", plan.change_count()));
        let mut tx = self
            .retry
            .run_if("begin transaction", AppError::is_transient, || {
                self.store.begin()
            })
            .await?;
        for record in &plan.inserts {
            tx.insert(record).await?;
        }
        for update in &plan.updates {
            ::log::debug!("{} changed: {:?}", update.record.type_id, update.changed);
            tx.update(&update.record).await?;
        }

        log::step(3, 3, "Publishing change notifications");
        for record in plan.changed_records() {
            let notification = ChangeNotification::new(&record.type_id, &record.url);
            self.publisher
                .publish(&self.notify_queue, &notification.encode())
                .await?;
            report.notified += 1;
        }

        tx.commit().await?;
        log::summary("Reconcile", &report.items());
        Ok(report)
    }
}

#[async_trait]
impl MessageHandler for Reconciler {
    fn name(&self) -> &str {
        "reconcile"
    }

    async fn handle(&self, payload: &[u8]) -> Result<()> {
        let message = ListReady::parse(payload, &self.ready_marker)?;
        self.reconcile_file(&message.path).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::models::RegistryRecord;
    use crate::storage::MemoryRecordStore;

    fn record(id: &str, status: &str) -> RegistryRecord {
        RegistryRecord {
            type_id: id.into(),
            ein: format!("E-{id}"),
            type_name: "Regio".into(),
            status: status.into(),
            last_update: "2025-01-01".into(),
            url: format!("https://eratv.test/{id}"),
        }
    }

    fn reconciler(store: &MemoryRecordStore, broker: &MemoryBroker) -> Reconciler {
        Reconciler::new(
            Arc::new(store.clone()),
            Arc::new(broker.clone()),
            &Config::default(),
        )
        .with_retry(RetryPolicy::none())
    }

    #[tokio::test]
    async fn test_unchanged_run_opens_no_transaction() {
        let store = MemoryRecordStore::with_records([record("T1", "Active")]);
        let broker = MemoryBroker::new();
        let report = reconciler(&store, &broker)
            .reconcile(&Snapshot::from_records([record("T1", "Active")]))
            .await
            .unwrap();

        assert_eq!(report.unchanged, 1);
        assert_eq!(report.notified, 0);
        assert_eq!(store.commits(), 0);
    }

    #[tokio::test]
    async fn test_rejected_publish_rolls_back() {
        let store = MemoryRecordStore::new();
        let broker = MemoryBroker::new();
        broker.set_reject_publishes(true);

        let err = reconciler(&store, &broker)
            .reconcile(&Snapshot::from_records([record("T1", "Active")]))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::PublishRejected { .. }));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_plan_file_writes_and_publishes_nothing() {
        let store = MemoryRecordStore::with_records([record("T1", "Active")]);
        let broker = MemoryBroker::new();
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("liste_vehicules_2026-10-19.csv");
        std::fs::write(
            &path,
            "TypeID,EIN,TypeName,Status,LastUpdate,URL\n\
             T1,E-T1,Regio,Withdrawn,2025-01-01,https://eratv.test/T1\n\
             T2,E-T2,Regio,Active,2025-01-01,https://eratv.test/T2\n",
        )
        .unwrap();

        let (plan, report) = reconciler(&store, &broker).plan_file(&path).await.unwrap();

        assert_eq!(plan.inserts.len(), 1);
        assert_eq!(plan.updates[0].record.type_id, "T1");
        assert_eq!((report.inserted, report.updated, report.notified), (1, 1, 0));
        assert_eq!(store.get("T1").unwrap().record.status, "Active");
        assert_eq!(store.commits(), 0);
        assert!(broker.peek(&Config::default().queues.vehicle_pages).is_empty());
    }

    #[tokio::test]
    async fn test_handler_acks_unparseable_message() {
        let store = MemoryRecordStore::new();
        let broker = MemoryBroker::new();
        let err = reconciler(&store, &broker)
            .handle(b"CSV ready:")
            .await
            .unwrap_err();
        assert!(err.is_data_error());
    }

    #[test]
    fn test_report_items() {
        let report = ReconcileReport {
            inserted: 2,
            notified: 2,
            ..ReconcileReport::default()
        };
        assert_eq!(
            log::inline_summary(&report.items()),
            "rows=0 inserted=2 updated=0 unchanged=0 skipped=0 duplicates=0 notified=2"
        );
    }
}
