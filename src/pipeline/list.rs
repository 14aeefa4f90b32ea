//! Stage 1: scrape the listing, write the dated extract, announce it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;

use crate::broker::Publisher;
use crate::error::{AppError, Result};
use crate::models::{Config, ListReady, Snapshot};
use crate::services::ListScraper;
use crate::storage::LocalStorage;
use crate::utils::http::create_async_client;
use crate::utils::log;

/// Result of one listing run.
#[derive(Debug, Clone)]
pub struct ListOutcome {
    pub path: PathBuf,
    pub records: usize,
    pub skipped: usize,
}

/// Write `snapshot` for `date` and publish the list-ready message.
pub async fn publish_snapshot(
    snapshot: &Snapshot,
    date: NaiveDate,
    storage: &LocalStorage,
    publisher: &dyn Publisher,
    config: &Config,
) -> Result<PathBuf> {
    let path = storage.write_snapshot(snapshot, date).await?;
    let message = ListReady { path: path.clone() };
    publisher
        .publish(
            &config.queues.list_ready,
            &message.encode(&config.queues.ready_marker),
        )
        .await?;
    ::log::info!(
        "Announced {} on {}",
        path.display(),
        config.queues.list_ready
    );
    Ok(path)
}

/// Run the list fetcher once.
pub async fn run_list_fetch(config: &Config, publisher: Arc<dyn Publisher>) -> Result<ListOutcome> {
    let start = Instant::now();
    log::header("REGISTRY LIST FETCH");

    log::step(1, 2, &format!("Scraping {}", config.crawler.list_url));
    let client = create_async_client(&config.crawler)?;
    let scraper = ListScraper::new(client, &config.crawler, config.retry.fetch_policy())?;
    let snapshot = scraper.fetch_all().await?;
    if snapshot.is_empty() {
        return Err(AppError::validation("listing returned no records"));
    }

    log::step(2, 2, "Writing extract");
    let storage = LocalStorage::from_config(&config.paths);
    let today = chrono::Local::now().date_naive();
    let path = publish_snapshot(&snapshot, today, &storage, publisher.as_ref(), config).await?;

    log::summary(
        "List fetch",
        &[
            ("records", snapshot.len().to_string()),
            ("skipped", snapshot.skipped_rows.to_string()),
            ("duplicates", snapshot.duplicate_rows.to_string()),
            ("file", path.display().to_string()),
            ("elapsed", format!("{:.1}s", start.elapsed().as_secs_f64())),
        ],
    );

    Ok(ListOutcome {
        path,
        records: snapshot.len(),
        skipped: snapshot.skipped_rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::models::RegistryRecord;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_publish_snapshot_announces_path() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path(), tmp.path());
        let broker = MemoryBroker::new();
        let config = Config::default();
        let snapshot = Snapshot::from_records([RegistryRecord {
            type_id: "T1".into(),
            ..RegistryRecord::default()
        }]);
        let date = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();

        let path = publish_snapshot(&snapshot, date, &storage, &broker, &config)
            .await
            .unwrap();

        let sent = broker.peek_text(&config.queues.list_ready);
        assert_eq!(sent, vec![format!("CSV ready: {}", path.display())]);
        let parsed = ListReady::parse(sent[0].as_bytes(), "CSV ready:").unwrap();
        assert_eq!(parsed.path, path);
    }
}
