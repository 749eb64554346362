//! Persistence layer.
//!
//! SQLite via `sqlx`. The store is the single source of truth for round
//! state: nothing about a round is cached in process between calls. Every
//! state-changing write carries its precondition in the same statement or
//! transaction (compare-and-set), so overlapping triggers cannot lose an
//! update.

mod prizes;
mod rosters;
mod rounds;

pub use rosters::ScoreRow;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use tracing::info;

use crate::types::{League, PrizeSplit, SettlementError};

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) the database at `url` and run migrations.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid database url: {url}"))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database: {url}"))?;

        Self::migrate(&pool).await?;
        info!(url, max_connections, "Store ready");
        Ok(Self { pool })
    }

    /// Fresh in-memory database. One connection, kept alive for the life of
    /// the pool, since every SQLite memory connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory database")?;

        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .context("Failed to run database migrations")
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Connectivity check for the health endpoint.
    pub async fn ping(&self) -> Result<(), SettlementError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // -- Leagues ----------------------------------------------------------

    pub async fn insert_league(&self, league: &League) -> Result<(), SettlementError> {
        let parts: Vec<String> = league.prize_split.as_slice().iter().map(|p| p.to_string()).collect();
        let split =
            serde_json::to_string(&parts).map_err(|e| SettlementError::Config(e.to_string()))?;

        sqlx::query("INSERT INTO leagues (id, name, prize_split) VALUES (?1, ?2, ?3)")
            .bind(&league.id)
            .bind(&league.name)
            .bind(split)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn league(&self, id: &str) -> Result<Option<League>, SettlementError> {
        let row = sqlx::query("SELECT id, name, prize_split FROM leagues WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let raw: String = row.try_get("prize_split")?;
        let parts: Vec<String> = serde_json::from_str(&raw).map_err(|e| decode_err(e.to_string()))?;
        let percentages = parts
            .iter()
            .map(|p| parse_decimal(p))
            .collect::<Result<Vec<_>, _>>()?;
        let prize_split = PrizeSplit::new(percentages).map_err(|e| decode_err(e.to_string()))?;

        Ok(Some(League {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            prize_split,
        }))
    }
}

// ---------------------------------------------------------------------------
// Column encoding helpers
// ---------------------------------------------------------------------------

pub(crate) fn to_ms(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

pub(crate) fn from_ms(ms: i64) -> Result<DateTime<Utc>, sqlx::Error> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| decode_err(format!("timestamp out of range: {ms}")))
}

pub(crate) fn parse_decimal(raw: &str) -> Result<Decimal, sqlx::Error> {
    Decimal::from_str(raw).map_err(|e| decode_err(format!("bad decimal {raw:?}: {e}")))
}

pub(crate) fn parse_opt_decimal(raw: Option<String>) -> Result<Option<Decimal>, sqlx::Error> {
    raw.as_deref().map(parse_decimal).transpose()
}

pub(crate) fn decode_err(msg: String) -> sqlx::Error {
    sqlx::Error::Decode(msg.into())
}
