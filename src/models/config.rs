//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::TrackedField;
use crate::utils::retry::RetryPolicy;
use crate::utils::sql_identifier;

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// AMQP connection settings
    #[serde(default)]
    pub broker: BrokerConfig,

    /// PostgreSQL connection settings
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Queue names shared by the stages
    #[serde(default)]
    pub queues: QueueConfig,

    /// Retry budgets
    #[serde(default)]
    pub retry: RetryConfig,

    /// HTTP and scraping behavior settings
    #[serde(default)]
    pub crawler: CrawlerConfig,

    /// Where extracts and documents are written
    #[serde(default)]
    pub paths: PathsConfig,

    /// Snapshot header names per canonical field
    #[serde(default)]
    pub columns: ColumnMapping,

    /// Fields extracted from detail documents
    #[serde(default)]
    pub parser: ParserConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Apply the deployment environment variables on top of file values.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup (the environment in production).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("RABBITMQ_HOST") {
            self.broker.host = v;
        }
        if let Some(v) = get("RABBITMQ_USER") {
            self.broker.user = v;
        }
        if let Some(v) = get("RABBITMQ_PASS") {
            self.broker.password = v;
        }
        if let Some(v) = get("DB_HOST") {
            self.database.host = v;
        }
        if let Some(v) = get("DB_NAME") {
            self.database.name = v;
        }
        if let Some(v) = get("DB_USER") {
            self.database.user = v;
        }
        if let Some(v) = get("DB_PASS") {
            self.database.password = v;
        }
        if let Some(v) = get("DATA_DIR") {
            self.paths.snapshot_dir = PathBuf::from(v);
        }
        if let Some(v) = get("DOCUMENT_DIR") {
            self.paths.document_dir = PathBuf::from(v);
        }
        if let Some(secs) = get("CRAWL_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.crawler.timeout_secs = secs;
        }
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.crawler.user_agent.trim().is_empty() {
            return Err(AppError::validation("crawler.user_agent is empty"));
        }
        if self.crawler.timeout_secs == 0 {
            return Err(AppError::validation("crawler.timeout_secs must be > 0"));
        }
        if self.crawler.page_size == 0 {
            return Err(AppError::validation("crawler.page_size must be > 0"));
        }
        if self.crawler.max_pages == 0 {
            return Err(AppError::validation("crawler.max_pages must be > 0"));
        }
        url::Url::parse(&self.crawler.list_url)?;
        if self.retry.connect_attempts == 0 || self.retry.fetch_attempts == 0 {
            return Err(AppError::validation("retry attempts must be > 0"));
        }
        if self.broker.prefetch == 0 {
            return Err(AppError::validation("broker.prefetch must be > 0"));
        }
        sql_identifier(&self.database.registry_table)?;
        sql_identifier(&self.database.details_table)?;
        for queue in self.queues.all() {
            if queue.trim().is_empty() {
                return Err(AppError::validation("queue names must not be empty"));
            }
        }
        self.columns.validate()?;
        if self.parser.fields.is_empty() {
            return Err(AppError::validation("parser.fields is empty"));
        }
        Ok(())
    }
}

/// AMQP broker connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "defaults::broker_host")]
    pub host: String,

    #[serde(default = "defaults::broker_port")]
    pub port: u16,

    #[serde(default = "defaults::guest")]
    pub user: String,

    #[serde(default = "defaults::guest")]
    pub password: String,

    /// Virtual host, `/` by default
    #[serde(default = "defaults::vhost")]
    pub vhost: String,

    /// Heartbeat interval in seconds
    #[serde(default = "defaults::heartbeat")]
    pub heartbeat_secs: u16,

    /// Unacknowledged deliveries per consumer
    #[serde(default = "defaults::prefetch")]
    pub prefetch: u16,
}

impl BrokerConfig {
    /// AMQP URI for this configuration.
    pub fn uri(&self) -> String {
        let vhost = if self.vhost == "/" {
            "%2f".to_string()
        } else {
            self.vhost.trim_start_matches('/').to_string()
        };
        format!(
            "amqp://{}:{}@{}:{}/{}?heartbeat={}",
            self.user, self.password, self.host, self.port, vhost, self.heartbeat_secs
        )
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: defaults::broker_host(),
            port: defaults::broker_port(),
            user: defaults::guest(),
            password: defaults::guest(),
            vhost: defaults::vhost(),
            heartbeat_secs: defaults::heartbeat(),
            prefetch: defaults::prefetch(),
        }
    }
}

/// PostgreSQL connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "defaults::db_host")]
    pub host: String,

    #[serde(default = "defaults::db_port")]
    pub port: u16,

    #[serde(default = "defaults::db_name")]
    pub name: String,

    #[serde(default = "defaults::guest")]
    pub user: String,

    #[serde(default = "defaults::guest")]
    pub password: String,

    #[serde(default = "defaults::max_connections")]
    pub max_connections: u32,

    /// Bound on waiting for a pooled connection
    #[serde(default = "defaults::acquire_timeout")]
    pub acquire_timeout_secs: u64,

    /// Table holding reconciled registry records
    #[serde(default = "defaults::registry_table")]
    pub registry_table: String,

    /// Table holding ingested detail records
    #[serde(default = "defaults::details_table")]
    pub details_table: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: defaults::db_host(),
            port: defaults::db_port(),
            name: defaults::db_name(),
            user: defaults::guest(),
            password: defaults::guest(),
            max_connections: defaults::max_connections(),
            acquire_timeout_secs: defaults::acquire_timeout(),
            registry_table: defaults::registry_table(),
            details_table: defaults::details_table(),
        }
    }
}

/// Queue names, one per hop of the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// List fetcher → reconciler
    #[serde(default = "defaults::queue_list_ready")]
    pub list_ready: String,

    /// Reconciler → detail fetcher
    #[serde(default = "defaults::queue_vehicle_pages")]
    pub vehicle_pages: String,

    /// Detail fetcher → detail parser
    #[serde(default = "defaults::queue_documents")]
    pub documents: String,

    /// Detail parser → ingest
    #[serde(default = "defaults::queue_parsed")]
    pub parsed: String,

    /// Marker prefixed to list-ready payloads
    #[serde(default = "defaults::ready_marker")]
    pub ready_marker: String,
}

impl QueueConfig {
    pub fn all(&self) -> [&str; 4] {
        [
            &self.list_ready,
            &self.vehicle_pages,
            &self.documents,
            &self.parsed,
        ]
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            list_ready: defaults::queue_list_ready(),
            vehicle_pages: defaults::queue_vehicle_pages(),
            documents: defaults::queue_documents(),
            parsed: defaults::queue_parsed(),
            ready_marker: defaults::ready_marker(),
        }
    }
}

/// Retry budgets for connectivity and fetches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts when reaching the broker or the store
    #[serde(default = "defaults::connect_attempts")]
    pub connect_attempts: u32,

    #[serde(default = "defaults::connect_delay")]
    pub connect_delay_secs: u64,

    /// Attempts per HTTP fetch
    #[serde(default = "defaults::fetch_attempts")]
    pub fetch_attempts: u32,

    #[serde(default = "defaults::fetch_delay")]
    pub fetch_delay_secs: u64,
}

impl RetryConfig {
    pub fn connect_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.connect_attempts,
            Duration::from_secs(self.connect_delay_secs),
        )
    }

    pub fn fetch_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.fetch_attempts,
            Duration::from_secs(self.fetch_delay_secs),
        )
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            connect_attempts: defaults::connect_attempts(),
            connect_delay_secs: defaults::connect_delay(),
            fetch_attempts: defaults::fetch_attempts(),
            fetch_delay_secs: defaults::fetch_delay(),
        }
    }
}

/// HTTP client and scraping behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Registry listing page
    #[serde(default = "defaults::list_url")]
    pub list_url: String,

    /// Rows requested per listing page
    #[serde(default = "defaults::page_size")]
    pub page_size: usize,

    /// Upper bound on listing pages; a larger announced count is rejected
    #[serde(default = "defaults::max_pages")]
    pub max_pages: usize,

    /// Delay between listing pages in milliseconds
    #[serde(default = "defaults::request_delay")]
    pub request_delay_ms: u64,

    /// Pause after each detail document, in seconds
    #[serde(default = "defaults::detail_delay")]
    pub detail_delay_secs: u64,

    /// Substring identifying the XML export link on detail pages
    #[serde(default = "defaults::export_marker")]
    pub export_link_marker: String,

    #[serde(default)]
    pub selectors: ListSelectors,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            list_url: defaults::list_url(),
            page_size: defaults::page_size(),
            max_pages: defaults::max_pages(),
            request_delay_ms: defaults::request_delay(),
            detail_delay_secs: defaults::detail_delay(),
            export_link_marker: defaults::export_marker(),
            selectors: ListSelectors::default(),
        }
    }
}

/// CSS selectors and form field ids of the registry listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListSelectors {
    #[serde(default = "defaults::sel_total")]
    pub total_count: String,

    #[serde(default = "defaults::sel_rows")]
    pub rows: String,

    #[serde(default = "defaults::sel_form")]
    pub form: String,

    /// `id` of the page size input
    #[serde(default = "defaults::page_size_field")]
    pub page_size_field: String,

    /// `id` of the current page input
    #[serde(default = "defaults::current_page_field")]
    pub current_page_field: String,
}

impl Default for ListSelectors {
    fn default() -> Self {
        Self {
            total_count: defaults::sel_total(),
            rows: defaults::sel_rows(),
            form: defaults::sel_form(),
            page_size_field: defaults::page_size_field(),
            current_page_field: defaults::current_page_field(),
        }
    }
}

/// Output locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Dated list extracts
    #[serde(default = "defaults::snapshot_dir")]
    pub snapshot_dir: PathBuf,

    /// Downloaded detail documents
    #[serde(default = "defaults::document_dir")]
    pub document_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            snapshot_dir: defaults::snapshot_dir(),
            document_dir: defaults::document_dir(),
        }
    }
}

/// Accepted snapshot header names for every canonical field.
///
/// Matching ignores case and surrounding whitespace, so both the English
/// export and the localized one resolve without code changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMapping {
    #[serde(default = "defaults::col_type_id")]
    pub type_id: Vec<String>,

    #[serde(default = "defaults::col_ein")]
    pub ein: Vec<String>,

    #[serde(default = "defaults::col_type_name")]
    pub type_name: Vec<String>,

    #[serde(default = "defaults::col_status")]
    pub status: Vec<String>,

    #[serde(default = "defaults::col_last_update")]
    pub last_update: Vec<String>,

    #[serde(default = "defaults::col_url")]
    pub url: Vec<String>,
}

impl ColumnMapping {
    /// Accepted names for a tracked field.
    pub fn names_for(&self, field: TrackedField) -> &[String] {
        match field {
            TrackedField::Ein => &self.ein,
            TrackedField::TypeName => &self.type_name,
            TrackedField::Status => &self.status,
            TrackedField::LastUpdate => &self.last_update,
            TrackedField::Url => &self.url,
        }
    }

    /// Position of the first header matching any of `names`.
    pub fn locate(headers: &[String], names: &[String]) -> Option<usize> {
        headers.iter().position(|h| {
            let h = h.trim().trim_start_matches('\u{feff}');
            names.iter().any(|n| n.trim().eq_ignore_ascii_case(h))
        })
    }

    fn validate(&self) -> Result<()> {
        if self.type_id.is_empty() {
            return Err(AppError::validation("columns.type_id is empty"));
        }
        for field in TrackedField::ALL {
            if self.names_for(field).is_empty() {
                return Err(AppError::validation(format!(
                    "columns mapping for {field} is empty"
                )));
            }
        }
        Ok(())
    }
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            type_id: defaults::col_type_id(),
            ein: defaults::col_ein(),
            type_name: defaults::col_type_name(),
            status: defaults::col_status(),
            last_update: defaults::col_last_update(),
            url: defaults::col_url(),
        }
    }
}

/// Detail document extraction rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserConfig {
    #[serde(default = "defaults::parser_fields")]
    pub fields: Vec<FieldRule>,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            fields: defaults::parser_fields(),
        }
    }
}

/// Output field name and the XML element it is read from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldRule {
    pub name: String,
    pub element: String,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    use super::FieldRule;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    // Broker defaults
    pub fn broker_host() -> String {
        "rabbitmq".into()
    }
    pub fn broker_port() -> u16 {
        5672
    }
    pub fn guest() -> String {
        "guest".into()
    }
    pub fn vhost() -> String {
        "/".into()
    }
    pub fn heartbeat() -> u16 {
        600
    }
    pub fn prefetch() -> u16 {
        1
    }

    // Database defaults
    pub fn db_host() -> String {
        "postgres".into()
    }
    pub fn db_port() -> u16 {
        5432
    }
    pub fn db_name() -> String {
        "DB_type_vehicule".into()
    }
    pub fn max_connections() -> u32 {
        4
    }
    pub fn acquire_timeout() -> u64 {
        30
    }
    pub fn registry_table() -> String {
        "vehicles".into()
    }
    pub fn details_table() -> String {
        "vehicle_type_details".into()
    }

    // Queue defaults
    pub fn queue_list_ready() -> String {
        "csv_list.queue".into()
    }
    pub fn queue_vehicle_pages() -> String {
        "vehicle_pages.queue".into()
    }
    pub fn queue_documents() -> String {
        "xml_vehicle.queue".into()
    }
    pub fn queue_parsed() -> String {
        "parsed.queue".into()
    }
    pub fn ready_marker() -> String {
        "CSV ready:".into()
    }

    // Retry defaults
    pub fn connect_attempts() -> u32 {
        10
    }
    pub fn connect_delay() -> u64 {
        5
    }
    pub fn fetch_attempts() -> u32 {
        3
    }
    pub fn fetch_delay() -> u64 {
        5
    }

    // Crawler defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; eratv-sync/0.1)".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn list_url() -> String {
        "https://eratv.era.europa.eu/Eratv/Home/List".into()
    }
    pub fn page_size() -> usize {
        100
    }
    pub fn max_pages() -> usize {
        1000
    }
    pub fn request_delay() -> u64 {
        2000
    }
    pub fn detail_delay() -> u64 {
        180
    }
    pub fn export_marker() -> String {
        "exportTo=XML".into()
    }
    pub fn sel_total() -> String {
        "div.Pagination p.Matches strong".into()
    }
    pub fn sel_rows() -> String {
        "table.Tabular tbody tr".into()
    }
    pub fn sel_form() -> String {
        "form#SearchForm".into()
    }
    pub fn page_size_field() -> String {
        "PagedGrid_PageSize".into()
    }
    pub fn current_page_field() -> String {
        "PagedGrid_CurrentPage".into()
    }

    // Path defaults
    pub fn snapshot_dir() -> PathBuf {
        PathBuf::from("data/csv_listes")
    }
    pub fn document_dir() -> PathBuf {
        PathBuf::from("data/xml_types_vehicules")
    }

    // Column defaults: English export first, then the localized headers
    pub fn col_type_id() -> Vec<String> {
        names(&["TypeID", "Type ID", "Type_ID", "Identifiant du type", "ID du type"])
    }
    pub fn col_ein() -> Vec<String> {
        names(&["EIN", "Numéro EIN", "Numero EIN"])
    }
    pub fn col_type_name() -> Vec<String> {
        names(&["TypeName", "Type Name", "Nom du type", "Nom"])
    }
    pub fn col_status() -> Vec<String> {
        names(&["Status", "Statut", "État", "Etat"])
    }
    pub fn col_last_update() -> Vec<String> {
        names(&[
            "LastUpdate",
            "Last Update",
            "Dernière mise à jour",
            "Derniere mise a jour",
            "Mise à jour",
        ])
    }
    pub fn col_url() -> Vec<String> {
        names(&["URL", "Url", "Lien", "Adresse"])
    }

    // Parser defaults
    pub fn parser_fields() -> Vec<FieldRule> {
        [
            ("title", "TypeName"),
            ("summary", "Description"),
            ("date", "LastUpdate"),
            ("status", "Status"),
            ("ein", "EIN"),
        ]
        .into_iter()
        .map(|(name, element)| FieldRule {
            name: name.into(),
            element: element.into(),
        })
        .collect()
    }

    pub fn log_level() -> String {
        "info".into()
    }
}
