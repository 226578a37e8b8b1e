//! Postgres backend.
//!
//! Implements every trait in [`crate::store`]. The unique indexes created by
//! the migrations carry the deduplication guarantees; queries lean on
//! `ON CONFLICT` rather than check-then-insert.

pub mod assets;
pub mod idempotency;
pub mod orders;

use crate::error::{Error, Result};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

const MAX_CONNECTIONS: u32 = 10;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Owns the connection pool shared by the store implementations.
pub struct Db {
    pool: PgPool,
}

impl Db {
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Connect and bring the schema up to date.
    pub async fn open(url: &str) -> Result<Self> {
        let db = Self::connect(url).await?;
        db.migrate().await?;
        Ok(db)
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Other(format!("migration failed: {e}")))
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Priority and status columns are stored as their `Display` text.
pub(crate) fn parse_column<T>(column: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr<Err = Error>,
{
    raw.parse()
        .map_err(|e| Error::Other(format!("corrupt {column} column value '{raw}': {e}")))
}
