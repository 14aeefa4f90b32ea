// src/services/detail_fetcher.rs

//! Detail page fetcher: locate the XML export link and download it.

use std::path::PathBuf;

use chrono::NaiveDate;
use reqwest::Client;
use scraper::{Html, Selector};

use crate::error::{AppError, Result};
use crate::models::ChangeNotification;
use crate::storage::LocalStorage;
use crate::utils::http;
use crate::utils::resolve;
use crate::utils::retry::RetryPolicy;

/// First `a[href]` whose href contains `marker`, resolved against `page_url`.
pub fn find_export_link(html: &str, page_url: &str, marker: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let links = Selector::parse("a[href]").ok()?;
    document
        .select(&links)
        .filter_map(|a| a.value().attr("href"))
        .map(str::trim)
        .find(|href| href.contains(marker))
        .map(|href| resolve(page_url, href))
}

/// Downloads detail documents into local storage.
pub struct DetailFetcher {
    client: Client,
    storage: LocalStorage,
    marker: String,
    retry: RetryPolicy,
}

impl DetailFetcher {
    pub fn new(
        client: Client,
        storage: LocalStorage,
        marker: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            storage,
            marker: marker.into(),
            retry,
        }
    }

    /// Fetch the document for one notification and return where it was saved.
    pub async fn fetch(&self, notification: &ChangeNotification, date: NaiveDate) -> Result<PathBuf> {
        let page = http::fetch_text_with_retry(&self.client, &notification.url, &self.retry).await?;
        let export_url = find_export_link(&page, &notification.url, &self.marker).ok_or_else(|| {
            AppError::document(
                &notification.type_id,
                format!("no link containing {:?} on {}", self.marker, notification.url),
            )
        })?;
        log::debug!("Export link for {}: {export_url}", notification.type_id);

        let bytes = http::fetch_bytes_with_retry(&self.client, &export_url, &self.retry).await?;
        if bytes.is_empty() {
            return Err(AppError::document(&notification.type_id, "empty export"));
        }
        let path = self
            .storage
            .write_document(&notification.type_id, date, &bytes)
            .await?;
        log::info!(
            "Saved {} ({} bytes) to {}",
            notification.type_id,
            bytes.len(),
            path.display()
        );
        Ok(path)
    }
}
