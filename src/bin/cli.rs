//! ERATV registry sync CLI
//!
//! One subcommand per pipeline stage. Consumers run until the broker closes
//! the stream; every fatal error exits with a non-zero status.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use eratv::{
    broker::{AmqpBroker, MemoryBroker, Publisher},
    error::Result,
    models::Config,
    pipeline::{
        self, DetailFetchHandler, DetailParseHandler, IngestHandler, MessageHandler, Reconciler,
    },
    services::DetailFetcher,
    storage::{LocalStorage, PgDetailStore, PgRecordStore, postgres},
    utils::{http, log as banner},
};

/// ERATV - vehicle-type registry sync
#[derive(Parser, Debug)]
#[command(
    name = "eratv",
    version,
    about = "Scrape, reconcile and ingest the ERATV vehicle-type registry"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "eratv.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scrape the registry listing and announce the dated extract
    FetchList,

    /// Reconcile extracts against the registry table
    Reconcile {
        /// Reconcile this extract once instead of consuming the queue
        #[arg(long)]
        file: Option<PathBuf>,

        /// Print the plan without writing or publishing (requires --file)
        #[arg(long, requires = "file")]
        dry_run: bool,
    },

    /// Download XML documents for changed records
    FetchDetails,

    /// Parse downloaded XML documents
    ParseDetails,

    /// Persist parsed records into the details table
    Ingest,

    /// Validate the configuration
    Validate,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool, default_level: &str) {
    let level = if verbose { "debug" } else { default_level };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Load the file (or defaults), then environment overrides, then validate.
fn load_config(cli: &Cli) -> Result<Config> {
    let loaded = Config::load(&cli.config);
    let level = loaded
        .as_ref()
        .map(|c| c.logging.level.clone())
        .unwrap_or_else(|_| "info".to_string());
    init_logging(cli.verbose, &level);

    let mut config = loaded.unwrap_or_else(|e| {
        log::warn!(
            "Config load failed from {}: {}. Using defaults.",
            cli.config.display(),
            e
        );
        Config::default()
    });
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

async fn connect_broker(config: &Config) -> Result<Arc<AmqpBroker>> {
    let broker = AmqpBroker::connect(&config.broker, &config.retry.connect_policy()).await?;
    broker.declare(&config.queues.all()).await?;
    Ok(Arc::new(broker))
}

/// Consume `queue` with `handler`, closing the broker on the way out.
async fn consume(broker: Arc<AmqpBroker>, queue: &str, handler: &dyn MessageHandler) -> Result<()> {
    let result = broker.consume(queue, handler).await;
    broker.close().await;
    result
}

async fn fetch_list(config: &Config) -> Result<()> {
    let broker = connect_broker(config).await?;
    let result = pipeline::run_list_fetch(config, broker.clone()).await;
    broker.close().await;
    result.map(|_| ())
}

async fn reconcile(config: &Config, file: Option<PathBuf>, dry_run: bool) -> Result<()> {
    let pool = postgres::connect(&config.database, &config.retry.connect_policy()).await?;
    let result = reconcile_with_pool(config, pool.clone(), file, dry_run).await;
    pool.close().await;
    result
}

async fn reconcile_with_pool(
    config: &Config,
    pool: sqlx::PgPool,
    file: Option<PathBuf>,
    dry_run: bool,
) -> Result<()> {
    postgres::ensure_schema(&pool, &config.database).await?;
    let store = Arc::new(PgRecordStore::new(pool, &config.database.registry_table)?);

    match file {
        Some(path) if dry_run => {
            let reconciler = Reconciler::new(store, Arc::new(MemoryBroker::new()), config);
            let (plan, report) = reconciler.plan_file(&path).await?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
            banner::summary("Dry run (nothing written)", &report.items());
            Ok(())
        }
        Some(path) => {
            let broker = connect_broker(config).await?;
            let reconciler = Reconciler::new(store, broker.clone(), config);
            let result = reconciler.reconcile_file(&path).await;
            broker.close().await;
            result.map(|_| ())
        }
        None => {
            let broker = connect_broker(config).await?;
            let reconciler = Reconciler::new(store, broker.clone(), config);
            consume(broker, &config.queues.list_ready, &reconciler).await
        }
    }
}

async fn fetch_details(config: &Config) -> Result<()> {
    let broker = connect_broker(config).await?;
    let fetcher = DetailFetcher::new(
        http::create_async_client(&config.crawler)?,
        LocalStorage::from_config(&config.paths),
        &config.crawler.export_link_marker,
        config.retry.fetch_policy(),
    );
    let publisher: Arc<dyn Publisher> = broker.clone();
    let handler = DetailFetchHandler::new(
        fetcher,
        publisher,
        &config.queues.documents,
        Duration::from_secs(config.crawler.detail_delay_secs),
    );
    consume(broker, &config.queues.vehicle_pages, &handler).await
}

async fn parse_details(config: &Config) -> Result<()> {
    let broker = connect_broker(config).await?;
    let publisher: Arc<dyn Publisher> = broker.clone();
    let handler = DetailParseHandler::new(
        config.parser.fields.clone(),
        publisher,
        &config.queues.parsed,
    );
    consume(broker, &config.queues.documents, &handler).await
}

async fn ingest(config: &Config) -> Result<()> {
    let pool = postgres::connect(&config.database, &config.retry.connect_policy()).await?;
    let result: Result<()> = async {
        postgres::ensure_schema(&pool, &config.database).await?;
        let store = PgDetailStore::new(pool.clone(), &config.database.details_table)?;
        let handler = IngestHandler::new(Arc::new(store), config.retry.fetch_policy());
        let broker = connect_broker(config).await?;
        consume(broker, &config.queues.parsed, &handler).await
    }
    .await;
    pool.close().await;
    result
}

fn validate(config: &Config) -> Result<()> {
    banner::summary(
        "Configuration OK",
        &[
            ("broker", format!("{}:{}", config.broker.host, config.broker.port)),
            (
                "database",
                format!("{}@{}:{}", config.database.name, config.database.host, config.database.port),
            ),
            ("queues", config.queues.all().join(", ")),
            ("extracts", config.paths.snapshot_dir.display().to_string()),
            ("documents", config.paths.document_dir.display().to_string()),
            ("parser fields", config.parser.fields.len().to_string()),
        ],
    );
    Ok(())
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            log::error!("Config validation failed: {e}");
            return Err(e);
        }
    };

    let result = match cli.command {
        Command::FetchList => fetch_list(&config).await,
        Command::Reconcile { file, dry_run } => reconcile(&config, file, dry_run).await,
        Command::FetchDetails => fetch_details(&config).await,
        Command::ParseDetails => parse_details(&config).await,
        Command::Ingest => ingest(&config).await,
        Command::Validate => validate(&config),
    };

    if let Err(e) = &result {
        log::error!("Stage failed: {e}");
    }
    result
}
