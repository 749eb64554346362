//! Round completion and the prize ledger.

use chrono::{DateTime, Utc};
use sqlx::{Row, Sqlite, Transaction};
use tracing::debug;

use super::rosters::{apply_scores, ScoreRow};
use super::{decode_err, from_ms, parse_decimal, to_ms, Store};
use crate::types::{Prize, PrizeRecord, SettlementError};

impl Store {
    /// Complete a round in one transaction: final scores, `active →
    /// completed`, and (when given) the prize record with `distributed`
    /// set.
    ///
    /// Returns `false` and writes nothing when the round was no longer
    /// `active`.
    pub async fn finalize_round(
        &self,
        round_id: &str,
        scores: &[ScoreRow],
        record: Option<&PrizeRecord>,
        now: DateTime<Utc>,
    ) -> Result<bool, SettlementError> {
        let mut tx = self.pool().begin().await?;

        let advanced = sqlx::query(
            r"
            UPDATE rounds SET status = 'completed', distributed = ?2
            WHERE id = ?1 AND status = 'active'
            ",
        )
        .bind(round_id)
        .bind(record.is_some())
        .execute(&mut *tx)
        .await?;

        if advanced.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        apply_scores(&mut tx, round_id, scores, now).await?;
        if let Some(record) = record {
            insert_record(&mut tx, record).await?;
        }

        tx.commit().await?;
        debug!(round_id, scored = scores.len(), distributed = record.is_some(), "Round finalized");
        Ok(true)
    }

    /// Write a prize record for a completed, undistributed round and set
    /// `distributed` in the same transaction.
    ///
    /// Fails with `AlreadyDistributed` when the flag is already set.
    pub async fn record_distribution(&self, record: &PrizeRecord) -> Result<(), SettlementError> {
        let mut tx = self.pool().begin().await?;

        let flagged = sqlx::query(
            r"
            UPDATE rounds SET distributed = 1
            WHERE id = ?1 AND status = 'completed' AND distributed = 0
            ",
        )
        .bind(&record.round_id)
        .execute(&mut *tx)
        .await?;

        if flagged.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(SettlementError::AlreadyDistributed(record.round_id.clone()));
        }

        insert_record(&mut tx, record).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn prize_record(&self, round_id: &str) -> Result<Option<PrizeRecord>, SettlementError> {
        let head = sqlx::query(
            "SELECT id, round_id, total_paid, distributed_at FROM prize_records WHERE round_id = ?1",
        )
        .bind(round_id)
        .fetch_optional(self.pool())
        .await?;

        let Some(head) = head else {
            return Ok(None);
        };
        let record_id: String = head.try_get("id")?;
        let total_paid: String = head.try_get("total_paid")?;

        let rows = sqlx::query(
            r"
            SELECT position, roster_id, participant_id, score, amount
            FROM prize_payouts WHERE record_id = ?1 ORDER BY position
            ",
        )
        .bind(&record_id)
        .fetch_all(self.pool())
        .await?;

        let mut prizes = Vec::with_capacity(rows.len());
        for row in &rows {
            let position: i64 = row.try_get("position")?;
            let score: String = row.try_get("score")?;
            let amount: String = row.try_get("amount")?;
            prizes.push(Prize {
                position: u32::try_from(position).map_err(|e| decode_err(e.to_string()))?,
                roster_id: row.try_get("roster_id")?,
                participant_id: row.try_get("participant_id")?,
                score: parse_decimal(&score)?,
                amount: parse_decimal(&amount)?,
            });
        }

        Ok(Some(PrizeRecord {
            id: record_id,
            round_id: head.try_get("round_id")?,
            prizes,
            total_paid: parse_decimal(&total_paid)?,
            distributed_at: from_ms(head.try_get("distributed_at")?)?,
        }))
    }
}

async fn insert_record(
    tx: &mut Transaction<'_, Sqlite>,
    record: &PrizeRecord,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO prize_records (id, round_id, total_paid, distributed_at) VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(&record.id)
    .bind(&record.round_id)
    .bind(record.total_paid.to_string())
    .bind(to_ms(record.distributed_at))
    .execute(&mut **tx)
    .await?;

    for prize in &record.prizes {
        sqlx::query(
            r"
            INSERT INTO prize_payouts (record_id, position, roster_id, participant_id, score, amount)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
        )
        .bind(&record.id)
        .bind(i64::from(prize.position))
        .bind(&prize.roster_id)
        .bind(&prize.participant_id)
        .bind(prize.score.to_string())
        .bind(prize.amount.to_string())
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}
