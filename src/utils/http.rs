// src/utils/http.rs

//! HTTP client utilities.

use std::time::Duration;

use reqwest::Client;

use crate::error::{AppError, Result};
use crate::models::CrawlerConfig;
use crate::utils::retry::RetryPolicy;

/// Create a configured asynchronous HTTP client.
///
/// Cookies are kept so that paged form submissions stay in one session.
pub fn create_async_client(config: &CrawlerConfig) -> Result<Client> {
    let client = Client::builder()
        .user_agent(&config.user_agent)
        .timeout(Duration::from_secs(config.timeout_secs))
        .cookie_store(true)
        .build()?;
    Ok(client)
}

/// Turn a non-success status into [`AppError::HttpStatus`].
fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(AppError::HttpStatus {
            url: response.url().to_string(),
            status: status.as_u16(),
        })
    }
}

/// GET a URL and return the body as text.
pub async fn fetch_text(client: &Client, url: &str) -> Result<String> {
    let response = check_status(client.get(url).send().await?)?;
    Ok(response.text().await?)
}

/// GET a URL and return the raw body.
pub async fn fetch_bytes(client: &Client, url: &str) -> Result<Vec<u8>> {
    let response = check_status(client.get(url).send().await?)?;
    Ok(response.bytes().await?.to_vec())
}

/// POST a urlencoded form and return the body as text.
pub async fn post_form(client: &Client, url: &str, fields: &[(String, String)]) -> Result<String> {
    let response = check_status(client.post(url).form(fields).send().await?)?;
    Ok(response.text().await?)
}

/// GET with bounded retries on transient failures only.
pub async fn fetch_text_with_retry(
    client: &Client,
    url: &str,
    policy: &RetryPolicy,
) -> Result<String> {
    policy
        .run_if(&format!("GET {url}"), AppError::is_transient, || {
            fetch_text(client, url)
        })
        .await
}

/// GET raw bytes with bounded retries on transient failures only.
pub async fn fetch_bytes_with_retry(
    client: &Client,
    url: &str,
    policy: &RetryPolicy,
) -> Result<Vec<u8>> {
    policy
        .run_if(&format!("GET {url}"), AppError::is_transient, || {
            fetch_bytes(client, url)
        })
        .await
}
