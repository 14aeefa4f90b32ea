//! PostgreSQL implementation of the record and detail stores.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{Postgres, Transaction};

use crate::error::Result;
use crate::models::{DatabaseConfig, ParsedRecord, RegistryRecord};
use crate::storage::{DetailStore, RecordStore, RecordTransaction};
use crate::utils::retry::RetryPolicy;
use crate::utils::sql_identifier;

/// Open a connection pool, retrying while the server is unreachable.
pub async fn connect(config: &DatabaseConfig, policy: &RetryPolicy) -> Result<PgPool> {
    let options = PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .database(&config.name)
        .username(&config.user)
        .password(&config.password);

    let pool = policy
        .run(&format!("connect to postgres at {}", config.host), || {
            let options = options.clone();
            async move {
                let pool = PgPoolOptions::new()
                    .max_connections(config.max_connections)
                    .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
                    .connect_with(options)
                    .await?;
                Ok(pool)
            }
        })
        .await?;

    log::info!("Connected to database {} on {}", config.name, config.host);
    Ok(pool)
}

/// Create both tables if they do not exist yet.
pub async fn ensure_schema(pool: &PgPool, config: &DatabaseConfig) -> Result<()> {
    let registry = sql_identifier(&config.registry_table)?;
    let details = sql_identifier(&config.details_table)?;

    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {registry} (
            type_id     TEXT PRIMARY KEY,
            ein         TEXT NOT NULL DEFAULT '',
            type_name   TEXT NOT NULL DEFAULT '',
            status      TEXT NOT NULL DEFAULT '',
            last_update TEXT NOT NULL DEFAULT '',
            url         TEXT NOT NULL DEFAULT '',
            updated_at  TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {details} (
            type_id       TEXT PRIMARY KEY,
            document_path TEXT NOT NULL,
            fields        JSONB NOT NULL DEFAULT '{{}}'::jsonb,
            status        TEXT NOT NULL DEFAULT 'parsed',
            parsed_at     TIMESTAMPTZ NOT NULL,
            updated_at    TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#
    ))
    .execute(pool)
    .await?;

    log::debug!("Schema ensured for {registry} and {details}");
    Ok(())
}

/// Registry table backed by PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgRecordStore {
    pool: PgPool,
    table: String,
}

impl PgRecordStore {
    pub fn new(pool: PgPool, table: &str) -> Result<Self> {
        Ok(Self {
            pool,
            table: sql_identifier(table)?.to_string(),
        })
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn load_all(&self) -> Result<Vec<RegistryRecord>> {
        // Tables created by older loaders may hold NULLs.
        let sql = format!(
            r#"
            SELECT type_id,
                   COALESCE(ein, '') AS ein,
                   COALESCE(type_name, '') AS type_name,
                   COALESCE(status, '') AS status,
                   COALESCE(last_update, '') AS last_update,
                   COALESCE(url, '') AS url
            FROM {}
            "#,
            self.table
        );
        let rows = sqlx::query_as::<_, RegistryRecord>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn begin(&self) -> Result<Box<dyn RecordTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgRecordTransaction {
            tx,
            table: self.table.clone(),
        }))
    }
}

/// Open transaction on the registry table. Rolls back on drop.
pub struct PgRecordTransaction {
    tx: Transaction<'static, Postgres>,
    table: String,
}

#[async_trait]
impl RecordTransaction for PgRecordTransaction {
    async fn insert(&mut self, record: &RegistryRecord) -> Result<()> {
        // A concurrent reconciler may have inserted the same key since our scan.
        let sql = format!(
            r#"
            INSERT INTO {} (type_id, ein, type_name, status, last_update, url, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, now())
            ON CONFLICT (type_id) DO UPDATE SET
                ein = EXCLUDED.ein,
                type_name = EXCLUDED.type_name,
                status = EXCLUDED.status,
                last_update = EXCLUDED.last_update,
                url = EXCLUDED.url,
                updated_at = now()
            "#,
            self.table
        );
        sqlx::query(&sql)
            .bind(&record.type_id)
            .bind(&record.ein)
            .bind(&record.type_name)
            .bind(&record.status)
            .bind(&record.last_update)
            .bind(&record.url)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn update(&mut self, record: &RegistryRecord) -> Result<()> {
        let sql = format!(
            r#"
            UPDATE {}
            SET ein = $2, type_name = $3, status = $4, last_update = $5, url = $6,
                updated_at = now()
            WHERE type_id = $1
            "#,
            self.table
        );
        let result = sqlx::query(&sql)
            .bind(&record.type_id)
            .bind(&record.ein)
            .bind(&record.type_name)
            .bind(&record.status)
            .bind(&record.last_update)
            .bind(&record.url)
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            log::warn!("Update of {} matched no row", record.type_id);
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

/// Detail table backed by PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgDetailStore {
    pool: PgPool,
    table: String,
}

impl PgDetailStore {
    pub fn new(pool: PgPool, table: &str) -> Result<Self> {
        Ok(Self {
            pool,
            table: sql_identifier(table)?.to_string(),
        })
    }
}

#[async_trait]
impl DetailStore for PgDetailStore {
    async fn upsert(&self, record: &ParsedRecord) -> Result<()> {
        let sql = format!(
            r#"
            INSERT INTO {} (type_id, document_path, fields, status, parsed_at, updated_at)
            VALUES ($1, $2, $3, 'parsed', $4, now())
            ON CONFLICT (type_id) DO UPDATE SET
                document_path = EXCLUDED.document_path,
                fields = EXCLUDED.fields,
                status = EXCLUDED.status,
                parsed_at = EXCLUDED.parsed_at,
                updated_at = now()
            "#,
            self.table
        );
        sqlx::query(&sql)
            .bind(&record.type_id)
            .bind(&record.document_path)
            .bind(Json(&record.fields))
            .bind(record.parsed_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
