//! Domain models for the pipeline.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod message;
mod record;
mod snapshot;

// Re-export all public types
pub use config::{
    BrokerConfig, ColumnMapping, Config, CrawlerConfig, DatabaseConfig, FieldRule,
    ListSelectors, LoggingConfig, ParserConfig, PathsConfig, QueueConfig, RetryConfig,
};
pub use message::{ChangeNotification, DocumentReady, ListReady, ParsedRecord};
pub use record::{RegistryRecord, TrackedField, normalize};
pub use snapshot::Snapshot;
