//! Local filesystem storage for extracts and detail documents.
//!
//! Files land on a volume shared between stages, so every write goes to a
//! temporary file first and is renamed into place. A consumer never sees a
//! half-written extract.
//!
//! ## Storage Layout
//!
//! ```text
//! {snapshot_dir}/liste_vehicules_YYYY-MM-DD.csv
//! {document_dir}/{TypeID}_YYYY-MM-DD.xml
//! ```

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::{ColumnMapping, PathsConfig, Snapshot};
use crate::utils::file_component;

/// Prefix of dated list extracts.
pub const SNAPSHOT_PREFIX: &str = "liste_vehicules_";

/// Local filesystem storage backend.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    snapshot_dir: PathBuf,
    document_dir: PathBuf,
}

impl LocalStorage {
    /// Create storage rooted at the given directories.
    pub fn new(snapshot_dir: impl Into<PathBuf>, document_dir: impl Into<PathBuf>) -> Self {
        Self {
            snapshot_dir: snapshot_dir.into(),
            document_dir: document_dir.into(),
        }
    }

    pub fn from_config(paths: &PathsConfig) -> Self {
        Self::new(&paths.snapshot_dir, &paths.document_dir)
    }

    /// Path of the extract for a given day.
    pub fn snapshot_path(&self, date: NaiveDate) -> PathBuf {
        self.snapshot_dir
            .join(format!("{SNAPSHOT_PREFIX}{}.csv", date.format("%Y-%m-%d")))
    }

    /// Path of a detail document for a given record and day.
    pub fn document_path(&self, type_id: &str, date: NaiveDate) -> PathBuf {
        self.document_dir.join(format!(
            "{}_{}.xml",
            file_component(type_id),
            date.format("%Y-%m-%d")
        ))
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    pub async fn write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
        Self::ensure_dir(path).await?;

        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Write a dated extract and return its path.
    pub async fn write_snapshot(&self, snapshot: &Snapshot, date: NaiveDate) -> Result<PathBuf> {
        let mut buf = Vec::new();
        snapshot.write_csv(&mut buf)?;
        let path = self.snapshot_path(date);
        Self::write_bytes(&path, &buf).await?;
        log::info!("Snapshot of {} records written to {}", snapshot.len(), path.display());
        Ok(path)
    }

    /// Read and parse an extract.
    ///
    /// Any failure is reported as a snapshot error so the run fails closed.
    pub async fn read_snapshot(path: &Path, mapping: &ColumnMapping) -> Result<Snapshot> {
        let source = path.display().to_string();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| AppError::snapshot(&source, format!("unreadable: {e}")))?;
        Snapshot::read_csv(bytes.as_slice(), mapping, &source)
    }

    /// Save a downloaded detail document and return its path.
    pub async fn write_document(
        &self,
        type_id: &str,
        date: NaiveDate,
        bytes: &[u8],
    ) -> Result<PathBuf> {
        let path = self.document_path(type_id, date);
        Self::write_bytes(&path, bytes).await?;
        Ok(path)
    }

    /// Read a detail document as text.
    pub async fn read_document(path: &Path) -> Result<String> {
        let context = path.display().to_string();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| AppError::document(&context, format!("unreadable: {e}")))?;
        String::from_utf8(bytes).map_err(|e| AppError::document(&context, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RegistryRecord;
    use tempfile::TempDir;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    #[tokio::test]
    async fn test_write_and_read_snapshot() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path().join("csv"), tmp.path().join("xml"));

        let snapshot = Snapshot::from_records(vec![RegistryRecord {
            type_id: "T1".into(),
            status: "Active".into(),
            ..RegistryRecord::default()
        }]);
        let path = storage.write_snapshot(&snapshot, day()).await.unwrap();
        assert!(path.ends_with("liste_vehicules_2026-10-19.csv"));
        assert!(!path.with_extension("tmp").exists());

        let loaded = LocalStorage::read_snapshot(&path, &ColumnMapping::default())
            .await
            .unwrap();
        assert_eq!(loaded.records, snapshot.records);
    }

    #[tokio::test]
    async fn test_read_missing_snapshot_is_snapshot_error() {
        let tmp = TempDir::new().unwrap();
        let err = LocalStorage::read_snapshot(&tmp.path().join("nope.csv"), &ColumnMapping::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Snapshot { .. }));
    }

    #[tokio::test]
    async fn test_document_name_is_sanitized() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path(), tmp.path());
        let path = storage
            .write_document("12/345", day(), b"<Type/>")
            .await
            .unwrap();
        assert_eq!(path.file_name().unwrap(), "12-345_2026-10-19.xml");
        assert_eq!(LocalStorage::read_document(&path).await.unwrap(), "<Type/>");
    }
}
