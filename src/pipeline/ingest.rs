//! Stage 5: parsed record in, details row out.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::ParsedRecord;
use crate::pipeline::worker::MessageHandler;
use crate::storage::DetailStore;
use crate::utils::retry::RetryPolicy;

/// Upserts parsed records into the details table.
pub struct IngestHandler {
    store: Arc<dyn DetailStore>,
    retry: RetryPolicy,
}

impl IngestHandler {
    pub fn new(store: Arc<dyn DetailStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }
}

#[async_trait]
impl MessageHandler for IngestHandler {
    fn name(&self) -> &str {
        "ingest"
    }

    async fn handle(&self, payload: &[u8]) -> Result<()> {
        let record = ParsedRecord::decode(payload)?;
        self.retry
            .run_if(
                &format!("upsert details for {}", record.type_id),
                AppError::is_transient,
                || self.store.upsert(&record),
            )
            .await?;
        log::info!("Ingested {} from {}", record.type_id, record.document_path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryDetailStore;

    #[tokio::test]
    async fn test_invalid_json_is_data_error() {
        let handler = IngestHandler::new(Arc::new(MemoryDetailStore::new()), RetryPolicy::none());
        let err = handler.handle(b"{not json").await.unwrap_err();
        assert!(err.is_data_error());
    }
}
