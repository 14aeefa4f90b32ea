//! Diff calculation between the persisted registry and a snapshot.
//!
//! Every snapshot record lands in exactly one bucket: insert, update or
//! unchanged. Persisted rows missing from the snapshot are left alone
//! (records are never deleted).

use std::collections::HashMap;

use serde::Serialize;

use crate::models::{RegistryRecord, Snapshot, TrackedField};

/// A persisted record whose tracked fields differ from the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldUpdate {
    /// Normalized snapshot values to persist
    pub record: RegistryRecord,
    /// Fields that differ, in canonical order
    #[serde(serialize_with = "serialize_fields")]
    pub changed: Vec<TrackedField>,
}

fn serialize_fields<S: serde::Serializer>(
    fields: &[TrackedField],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_seq(fields.iter().map(|f| f.canonical_name()))
}

/// Classification of one snapshot against the persisted table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcilePlan {
    pub inserts: Vec<RegistryRecord>,
    pub updates: Vec<FieldUpdate>,
    /// TypeIDs already up to date
    pub unchanged: Vec<String>,
}

impl ReconcilePlan {
    /// Check if there are any changes.
    pub fn has_changes(&self) -> bool {
        !self.inserts.is_empty() || !self.updates.is_empty()
    }

    /// Records that need a write and a notification, inserts first.
    pub fn changed_records(&self) -> impl Iterator<Item = &RegistryRecord> {
        self.inserts
            .iter()
            .chain(self.updates.iter().map(|u| &u.record))
    }

    pub fn change_count(&self) -> usize {
        self.inserts.len() + self.updates.len()
    }
}

/// Calculator for computing reconcile plans.
#[derive(Debug, Clone)]
pub struct DiffCalculator {
    tracked: Vec<TrackedField>,
}

impl Default for DiffCalculator {
    fn default() -> Self {
        Self::new()
    }
}

impl DiffCalculator {
    /// Compare every tracked field, URL included.
    pub fn new() -> Self {
        Self {
            tracked: TrackedField::ALL.to_vec(),
        }
    }

    /// Fields of `current` that differ from `previous`, after trimming.
    pub fn changed_fields(
        &self,
        previous: &RegistryRecord,
        current: &RegistryRecord,
    ) -> Vec<TrackedField> {
        self.tracked
            .iter()
            .copied()
            .filter(|&f| previous.field(f).trim() != current.field(f).trim())
            .collect()
    }

    /// Classify every snapshot record against the persisted rows.
    pub fn calculate(&self, persisted: &[RegistryRecord], snapshot: &Snapshot) -> ReconcilePlan {
        let existing: HashMap<&str, &RegistryRecord> = persisted
            .iter()
            .map(|r| (r.type_id.trim(), r))
            .collect();

        let mut plan = ReconcilePlan::default();
        for record in &snapshot.records {
            match existing.get(record.type_id.as_str()) {
                None => plan.inserts.push(record.clone()),
                Some(previous) => {
                    let changed = self.changed_fields(previous, record);
                    if changed.is_empty() {
                        plan.unchanged.push(record.type_id.clone());
                    } else {
                        plan.updates.push(FieldUpdate {
                            record: record.clone(),
                            changed,
                        });
                    }
                }
            }
        }
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calculate_plan(persisted: &[RegistryRecord], snapshot: &Snapshot) -> ReconcilePlan {
        DiffCalculator::new().calculate(persisted, snapshot)
    }

    fn make_record(id: &str, status: &str) -> RegistryRecord {
        RegistryRecord {
            type_id: id.to_string(),
            ein: format!("EIN-{id}"),
            type_name: "Regio".into(),
            status: status.to_string(),
            last_update: "2025-01-01".into(),
            url: format!("https://eratv.test/{id}"),
        }
    }

    #[test]
    fn test_no_changes() {
        let persisted = vec![make_record("001", "Active"), make_record("002", "Active")];
        let snapshot = Snapshot::from_records(persisted.clone());

        let plan = calculate_plan(&persisted, &snapshot);
        assert!(!plan.has_changes());
        assert_eq!(plan.unchanged.len(), 2);
    }

    #[test]
    fn test_empty_store_inserts_everything() {
        let snapshot = Snapshot::from_records(vec![make_record("001", "Active")]);
        let plan = calculate_plan(&[], &snapshot);
        assert_eq!(plan.inserts.len(), 1);
        assert_eq!(plan.change_count(), 1);
    }

    #[test]
    fn test_update_lists_changed_fields() {
        let persisted = vec![make_record("001", "Active")];
        let mut moved = make_record("001", "Withdrawn");
        moved.url = "https://eratv.test/new".into();
        let snapshot = Snapshot::from_records(vec![moved]);

        let plan = calculate_plan(&persisted, &snapshot);
        assert_eq!(plan.updates.len(), 1);
        assert_eq!(
            plan.updates[0].changed,
            vec![TrackedField::Status, TrackedField::Url]
        );
    }

    #[test]
    fn test_whitespace_is_not_a_change() {
        let mut stored = make_record("001", "Active");
        stored.type_name = "  Regio ".into();
        stored.ein = "EIN-001\t".into();
        let snapshot = Snapshot::from_records(vec![make_record("001", "Active")]);

        let plan = calculate_plan(&[stored], &snapshot);
        assert_eq!(plan.unchanged, vec!["001"]);
    }

    #[test]
    fn test_url_change_is_an_update() {
        let persisted = vec![make_record("001", "Active")];
        let mut moved = make_record("001", "Active");
        moved.url = "https://eratv.test/elsewhere".into();
        let snapshot = Snapshot::from_records(vec![moved]);

        let plan = calculate_plan(&persisted, &snapshot);
        assert_eq!(plan.updates[0].changed, vec![TrackedField::Url]);
    }

    #[test]
    fn test_persisted_rows_absent_from_snapshot_are_kept_out_of_plan() {
        let persisted = vec![make_record("001", "Active"), make_record("002", "Active")];
        let snapshot = Snapshot::from_records(vec![make_record("001", "Active")]);

        let plan = calculate_plan(&persisted, &snapshot);
        assert_eq!(plan.unchanged, vec!["001"]);
        assert!(plan.inserts.is_empty() && plan.updates.is_empty());
    }

    #[test]
    fn test_mixed_changes() {
        let persisted = vec![make_record("001", "Active"), make_record("002", "Active")];
        let snapshot = Snapshot::from_records(vec![
            make_record("001", "Active"),
            make_record("002", "Suspended"),
            make_record("003", "Active"),
        ]);

        let plan = calculate_plan(&persisted, &snapshot);
        let changed: Vec<&str> = plan.changed_records().map(|r| r.type_id.as_str()).collect();
        assert_eq!(changed, vec!["003", "002"]);
        assert_eq!(plan.unchanged, vec!["001"]);
    }
}
