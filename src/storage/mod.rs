//! Storage abstractions for the pipeline.
//!
//! Two relational concerns and one filesystem concern:
//! - `RecordStore`: the reconciled registry table, keyed by `type_id`
//! - `DetailStore`: finalized rows written by the ingest stage
//! - `LocalStorage`: dated extracts and downloaded detail documents
//!
//! ## Directory Structure
//!
//! ```text
//! data/
//! ├── csv_listes/
//! │   └── liste_vehicules_2026-10-19.csv
//! └── xml_types_vehicules/
//!     └── 12-345-0001_2026-10-19.xml
//! ```

pub mod local;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{ParsedRecord, RegistryRecord};

// Re-export for convenience
pub use local::LocalStorage;
pub use memory::{MemoryDetailStore, MemoryRecordStore};
pub use postgres::{PgDetailStore, PgRecordStore};

/// Persisted registry table. Rows are never deleted.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Full scan of the table.
    async fn load_all(&self) -> Result<Vec<RegistryRecord>>;

    /// Open a transaction. Dropping it without `commit` rolls back.
    async fn begin(&self) -> Result<Box<dyn RecordTransaction>>;
}

/// Pending writes against a [`RecordStore`].
#[async_trait]
pub trait RecordTransaction: Send {
    /// Insert a new record (an existing key is overwritten).
    async fn insert(&mut self, record: &RegistryRecord) -> Result<()>;

    /// Overwrite the tracked fields of an existing record.
    async fn update(&mut self, record: &RegistryRecord) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;
}

/// Finalized detail rows, upserted by `type_id`.
#[async_trait]
pub trait DetailStore: Send + Sync {
    async fn upsert(&self, record: &ParsedRecord) -> Result<()>;
}
