//! Pipeline stages.
//!
//! - `list`: scrape the registry listing into a dated extract
//! - `reconcile`: diff an extract against the registry table and notify changes
//! - `detail`: download the XML document of each changed record
//! - `parse`: extract fields from downloaded documents
//! - `ingest`: persist parsed records

pub mod detail;
pub mod diff;
pub mod ingest;
pub mod list;
pub mod parse;
pub mod reconcile;
pub mod worker;

pub use detail::DetailFetchHandler;
pub use diff::{DiffCalculator, FieldUpdate, ReconcilePlan};
pub use ingest::IngestHandler;
pub use list::run_list_fetch;
pub use parse::DetailParseHandler;
pub use reconcile::{ReconcileReport, Reconciler};
pub use worker::MessageHandler;
