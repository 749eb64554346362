//! Rounds, the frozen draft universe and the end-of-round snapshot.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::collections::HashMap;
use tracing::debug;

use super::{decode_err, from_ms, parse_decimal, parse_opt_decimal, to_ms, Store};
use crate::types::{AssetSymbol, DraftEntry, Round, RoundStatus, SettlementError};

const ROUND_COLUMNS: &str =
    "id, league_id, start_time, end_time, status, prize_pool, distributed";

fn round_from_row(row: &SqliteRow) -> Result<Round, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let prize_pool: String = row.try_get("prize_pool")?;
    Ok(Round {
        id: row.try_get("id")?,
        league_id: row.try_get("league_id")?,
        start_time: from_ms(row.try_get("start_time")?)?,
        end_time: from_ms(row.try_get("end_time")?)?,
        status: status.parse::<RoundStatus>().map_err(decode_err)?,
        prize_pool: parse_decimal(&prize_pool)?,
        distributed: row.try_get("distributed")?,
    })
}

fn entry_from_row(row: &SqliteRow) -> Result<DraftEntry, sqlx::Error> {
    let symbol: String = row.try_get("symbol")?;
    let rank: Option<i64> = row.try_get("market_cap_rank")?;
    Ok(DraftEntry {
        round_id: row.try_get("round_id")?,
        asset_id: row.try_get("asset_id")?,
        symbol: AssetSymbol::new(&symbol).map_err(|e| decode_err(e.to_string()))?,
        name: row.try_get("name")?,
        image: row.try_get("image")?,
        market_cap_rank: rank.and_then(|r| u32::try_from(r).ok()),
        price_at_lock: parse_opt_decimal(row.try_get("price_at_lock")?)?,
        price_at_end: parse_opt_decimal(row.try_get("price_at_end")?)?,
    })
}

impl Store {
    // -- Rounds -----------------------------------------------------------

    pub async fn insert_round(&self, round: &Round) -> Result<(), SettlementError> {
        sqlx::query(
            r"
            INSERT INTO rounds (id, league_id, start_time, end_time, status, prize_pool, distributed)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ",
        )
        .bind(&round.id)
        .bind(&round.league_id)
        .bind(to_ms(round.start_time))
        .bind(to_ms(round.end_time))
        .bind(round.status.as_str())
        .bind(round.prize_pool.to_string())
        .bind(round.distributed)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn round(&self, id: &str) -> Result<Option<Round>, SettlementError> {
        let sql = format!("SELECT {ROUND_COLUMNS} FROM rounds WHERE id = ?1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(self.pool()).await?;
        Ok(row.as_ref().map(round_from_row).transpose()?)
    }

    /// Like [`Store::round`], but a missing round is an error.
    pub async fn require_round(&self, id: &str) -> Result<Round, SettlementError> {
        self.round(id)
            .await?
            .ok_or_else(|| SettlementError::RoundNotFound(id.to_string()))
    }

    /// `pending` rounds whose start falls in `[from, to]`, earliest first.
    pub async fn rounds_due_to_start(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Round>, SettlementError> {
        self.rounds_in_window(RoundStatus::Pending, "start_time", from, to).await
    }

    /// `active` rounds whose end falls in `[from, to]`, earliest first.
    pub async fn rounds_due_to_end(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Round>, SettlementError> {
        self.rounds_in_window(RoundStatus::Active, "end_time", from, to).await
    }

    async fn rounds_in_window(
        &self,
        status: RoundStatus,
        column: &'static str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Round>, SettlementError> {
        let sql = format!(
            "SELECT {ROUND_COLUMNS} FROM rounds \
             WHERE status = ?1 AND {column} BETWEEN ?2 AND ?3 \
             ORDER BY {column}, id"
        );
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(to_ms(from))
            .bind(to_ms(to))
            .fetch_all(self.pool())
            .await?;
        Ok(rows.iter().map(round_from_row).collect::<Result<Vec<_>, _>>()?)
    }

    /// Compare-and-set on round status. `false` means the round was not in
    /// `from` when the write ran.
    pub async fn advance_status(
        &self,
        id: &str,
        from: RoundStatus,
        to: RoundStatus,
    ) -> Result<bool, SettlementError> {
        let result = sqlx::query("UPDATE rounds SET status = ?3 WHERE id = ?1 AND status = ?2")
            .bind(id)
            .bind(from.as_str())
            .bind(to.as_str())
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() == 1)
    }

    // -- Draft universe ---------------------------------------------------

    pub async fn is_universe_locked(&self, round_id: &str) -> Result<bool, SettlementError> {
        let row = sqlx::query("SELECT 1 FROM universe_locks WHERE round_id = ?1")
            .bind(round_id)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.is_some())
    }

    /// Freeze the universe: lock marker plus every entry, all or nothing.
    ///
    /// Fails with `AlreadyLocked` and writes nothing when a lock exists.
    pub async fn lock_universe(
        &self,
        round_id: &str,
        entries: &[DraftEntry],
        now: DateTime<Utc>,
    ) -> Result<(), SettlementError> {
        let mut tx = self.pool().begin().await?;

        let marker = sqlx::query(
            "INSERT OR IGNORE INTO universe_locks (round_id, asset_count, locked_at) VALUES (?1, ?2, ?3)",
        )
        .bind(round_id)
        .bind(entries.len() as i64)
        .bind(to_ms(now))
        .execute(&mut *tx)
        .await?;

        if marker.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(SettlementError::AlreadyLocked(round_id.to_string()));
        }

        for entry in entries {
            sqlx::query(
                r"
                INSERT INTO draft_entries
                    (round_id, asset_id, symbol, name, image, market_cap_rank, price_at_lock, price_at_end)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL)
                ",
            )
            .bind(round_id)
            .bind(&entry.asset_id)
            .bind(entry.symbol.as_str())
            .bind(&entry.name)
            .bind(&entry.image)
            .bind(entry.market_cap_rank.map(i64::from))
            .bind(entry.price_at_lock.map(|p| p.to_string()))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(round_id, count = entries.len(), "Draft universe written");
        Ok(())
    }

    /// The frozen universe, best market-cap rank first.
    pub async fn draft_entries(&self, round_id: &str) -> Result<Vec<DraftEntry>, SettlementError> {
        let rows = sqlx::query(
            r"
            SELECT round_id, asset_id, symbol, name, image, market_cap_rank, price_at_lock, price_at_end
            FROM draft_entries
            WHERE round_id = ?1
            ORDER BY market_cap_rank IS NULL, market_cap_rank, asset_id
            ",
        )
        .bind(round_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.iter().map(entry_from_row).collect::<Result<Vec<_>, _>>()?)
    }

    // -- End snapshot -----------------------------------------------------

    pub async fn has_end_snapshot(&self, round_id: &str) -> Result<bool, SettlementError> {
        let row = sqlx::query("SELECT 1 FROM end_snapshots WHERE round_id = ?1")
            .bind(round_id)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.is_some())
    }

    /// Write end prices (by asset id) exactly once per round.
    ///
    /// Returns `false` without writing when a snapshot already exists; the
    /// stored prices win.
    pub async fn record_end_snapshot(
        &self,
        round_id: &str,
        prices: &HashMap<String, Option<Decimal>>,
        now: DateTime<Utc>,
    ) -> Result<bool, SettlementError> {
        let mut tx = self.pool().begin().await?;

        let marker = sqlx::query(
            "INSERT OR IGNORE INTO end_snapshots (round_id, captured_at) VALUES (?1, ?2)",
        )
        .bind(round_id)
        .bind(to_ms(now))
        .execute(&mut *tx)
        .await?;

        if marker.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        for (asset_id, price) in prices {
            sqlx::query(
                "UPDATE draft_entries SET price_at_end = ?3 WHERE round_id = ?1 AND asset_id = ?2",
            )
            .bind(round_id)
            .bind(asset_id)
            .bind(price.map(|p| p.to_string()))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }
}
