//! Stage 3: change notification in, detail document on disk out.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::broker::Publisher;
use crate::error::Result;
use crate::models::{ChangeNotification, DocumentReady};
use crate::pipeline::worker::MessageHandler;
use crate::services::DetailFetcher;

/// Consumes change notifications and publishes saved document paths.
pub struct DetailFetchHandler {
    fetcher: DetailFetcher,
    publisher: Arc<dyn Publisher>,
    out_queue: String,
    /// Pause after each download to stay polite with the registry
    delay: Duration,
}

impl DetailFetchHandler {
    pub fn new(
        fetcher: DetailFetcher,
        publisher: Arc<dyn Publisher>,
        out_queue: impl Into<String>,
        delay: Duration,
    ) -> Self {
        Self {
            fetcher,
            publisher,
            out_queue: out_queue.into(),
            delay,
        }
    }
}

#[async_trait]
impl MessageHandler for DetailFetchHandler {
    fn name(&self) -> &str {
        "fetch-details"
    }

    async fn handle(&self, payload: &[u8]) -> Result<()> {
        let notification = ChangeNotification::parse(payload)?;
        let today = chrono::Local::now().date_naive();
        let path = self.fetcher.fetch(&notification, today).await?;

        let message = DocumentReady::new(&notification.type_id, path);
        self.publisher
            .publish(&self.out_queue, &message.encode())
            .await?;
        log::info!(
            "Published {} on {}",
            message.path.display(),
            self.out_queue
        );

        if !self.delay.is_zero() {
            log::debug!("Waiting {:?} before the next document", self.delay);
            tokio::time::sleep(self.delay).await;
        }
        Ok(())
    }
}
