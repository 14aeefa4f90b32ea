//! Snapshot: one scrape pass worth of registry rows.

use std::collections::HashMap;
use std::io::{Read, Write};

use crate::error::{AppError, Result};
use crate::models::{ColumnMapping, RegistryRecord, TrackedField, normalize};

/// Registry records from one extract, keyed uniquely by `type_id`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Records in first-seen order, normalized
    pub records: Vec<RegistryRecord>,
    /// Data rows read from the source
    pub total_rows: usize,
    /// Rows dropped for an empty identifier
    pub skipped_rows: usize,
    /// Rows replaced by a later row with the same identifier
    pub duplicate_rows: usize,
}

impl Snapshot {
    /// Build a snapshot from already-scraped records.
    pub fn from_records(records: impl IntoIterator<Item = RegistryRecord>) -> Self {
        let mut snapshot = Snapshot::default();
        let mut index: HashMap<String, usize> = HashMap::new();
        for record in records {
            snapshot.total_rows += 1;
            snapshot.push(record.normalized(), &mut index);
        }
        snapshot
    }

    fn push(&mut self, record: RegistryRecord, index: &mut HashMap<String, usize>) {
        if !record.has_identity() {
            self.skipped_rows += 1;
            log::warn!("Skipping snapshot row without TypeID: {record:?}");
            return;
        }
        match index.get(&record.type_id) {
            Some(&pos) => {
                self.duplicate_rows += 1;
                log::warn!(
                    "Duplicate TypeID {} in snapshot, keeping the later row",
                    record.type_id
                );
                self.records[pos] = record;
            }
            None => {
                index.insert(record.type_id.clone(), self.records.len());
                self.records.push(record);
            }
        }
    }

    /// Read a comma-separated extract with a header row.
    ///
    /// `source` only labels errors. Any unreadable row or unresolvable
    /// column makes the whole snapshot malformed.
    pub fn read_csv<R: Read>(reader: R, mapping: &ColumnMapping, source: &str) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .from_reader(reader);

        let headers: Vec<String> = rdr
            .headers()
            .map_err(|e| AppError::snapshot(source, format!("unreadable header: {e}")))?
            .iter()
            .map(str::to_string)
            .collect();

        let type_id_col = ColumnMapping::locate(&headers, &mapping.type_id).ok_or_else(|| {
            AppError::snapshot(
                source,
                format!("no TypeID column (accepted {:?}, found {headers:?})", mapping.type_id),
            )
        })?;

        let mut field_cols = Vec::with_capacity(TrackedField::ALL.len());
        for field in TrackedField::ALL {
            let names = mapping.names_for(field);
            let col = ColumnMapping::locate(&headers, names).ok_or_else(|| {
                AppError::snapshot(
                    source,
                    format!("no {field} column (accepted {names:?}, found {headers:?})"),
                )
            })?;
            field_cols.push((field, col));
        }

        let mut snapshot = Snapshot::default();
        let mut index: HashMap<String, usize> = HashMap::new();

        for (row, result) in rdr.records().enumerate() {
            let raw = result.map_err(|e| {
                AppError::snapshot(source, format!("row {}: {e}", row + 2))
            })?;
            snapshot.total_rows += 1;

            let mut record = RegistryRecord {
                type_id: normalize(raw.get(type_id_col)),
                ..RegistryRecord::default()
            };
            for &(field, col) in &field_cols {
                let value = normalize(raw.get(col));
                match field {
                    TrackedField::Ein => record.ein = value,
                    TrackedField::TypeName => record.type_name = value,
                    TrackedField::Status => record.status = value,
                    TrackedField::LastUpdate => record.last_update = value,
                    TrackedField::Url => record.url = value,
                }
            }
            snapshot.push(record, &mut index);
        }

        Ok(snapshot)
    }

    /// Write the snapshot with canonical headers.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        let mut header = vec!["TypeID"];
        header.extend(TrackedField::ALL.iter().map(|f| f.canonical_name()));
        wtr.write_record(&header)?;
        for record in &self.records {
            let mut row = vec![record.type_id.as_str()];
            row.extend(TrackedField::ALL.iter().map(|&f| record.field(f)));
            wtr.write_record(&row)?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENGLISH: &str = "TypeID,EIN,TypeName,Status,LastUpdate,URL\n\
        T1,E1,Regio,Active,2025-01-01,https://eratv.test/T1\n\
        T2, E2 ,Coradia,  Withdrawn ,2025-02-01,https://eratv.test/T2\n";

    #[test]
    fn test_read_english_headers() {
        let snap = Snapshot::read_csv(ENGLISH.as_bytes(), &ColumnMapping::default(), "en.csv")
            .unwrap();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.records[1].ein, "E2");
        assert_eq!(snap.records[1].status, "Withdrawn");
    }

    #[test]
    fn test_read_localized_headers_in_other_order() {
        let csv = "Statut,Identifiant du type,Lien,Nom du type,Numéro EIN,Dernière mise à jour\n\
            Active,T7,https://eratv.test/T7,Desiro,E7,2025-05-05\n";
        let snap = Snapshot::read_csv(csv.as_bytes(), &ColumnMapping::default(), "fr.csv").unwrap();
        let r = &snap.records[0];
        assert_eq!(r.type_id, "T7");
        assert_eq!(r.status, "Active");
        assert_eq!(r.type_name, "Desiro");
        assert_eq!(r.last_update, "2025-05-05");
    }

    #[test]
    fn test_missing_key_column_is_malformed() {
        let csv = "EIN,TypeName,Status,LastUpdate,URL\nE1,Regio,Active,x,y\n";
        let err = Snapshot::read_csv(csv.as_bytes(), &ColumnMapping::default(), "bad.csv")
            .unwrap_err();
        assert!(matches!(err, AppError::Snapshot { .. }));
    }

    #[test]
    fn test_ragged_row_is_malformed() {
        let csv = "TypeID,EIN,TypeName,Status,LastUpdate,URL\nT1,E1\n";
        assert!(Snapshot::read_csv(csv.as_bytes(), &ColumnMapping::default(), "r.csv").is_err());
    }

    #[test]
    fn test_empty_type_id_skipped_and_duplicates_collapsed() {
        let csv = "TypeID,EIN,TypeName,Status,LastUpdate,URL\n\
            T1,E1,A,Active,d,u\n\
            ,E2,B,Active,d,u\n\
            T1,E1,A,Withdrawn,d,u\n";
        let snap = Snapshot::read_csv(csv.as_bytes(), &ColumnMapping::default(), "d.csv").unwrap();
        assert_eq!(snap.total_rows, 3);
        assert_eq!(snap.skipped_rows, 1);
        assert_eq!(snap.duplicate_rows, 1);
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.records[0].status, "Withdrawn");
    }

    #[test]
    fn test_write_then_read_keeps_canonical_headers() {
        let snap = Snapshot::read_csv(ENGLISH.as_bytes(), &ColumnMapping::default(), "en.csv")
            .unwrap();
        let mut out = Vec::new();
        snap.write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("TypeID,EIN,TypeName,Status,LastUpdate,URL\n"));
        let again = Snapshot::read_csv(text.as_bytes(), &ColumnMapping::default(), "x").unwrap();
        assert_eq!(again.records, snap.records);
    }
}
