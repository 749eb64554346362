//! Rosters, league entries and persisted scores.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};

use super::{decode_err, from_ms, parse_decimal, parse_opt_decimal, to_ms, Store};
use crate::types::{EntryStatus, LeagueEntry, RankedTeam, Roster, SettlementError};

/// A score to persist for one roster. `rank` is `None` for rosters that
/// could not be scored.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreRow {
    pub roster_id: String,
    pub total_score: Decimal,
    pub rank: Option<u32>,
}

const ROSTER_COLUMNS: &str =
    "r.id, r.round_id, r.participant_id, r.name, r.symbols, r.total_score, r.rank, r.has_valid_entry, r.created_at";

fn roster_from_row(row: &SqliteRow) -> Result<Roster, sqlx::Error> {
    let rank: Option<i64> = row.try_get("rank")?;
    Ok(Roster {
        id: row.try_get("id")?,
        round_id: row.try_get("round_id")?,
        participant_id: row.try_get("participant_id")?,
        name: row.try_get("name")?,
        raw_symbols: row.try_get("symbols")?,
        total_score: parse_opt_decimal(row.try_get("total_score")?)?,
        rank: rank.and_then(|r| u32::try_from(r).ok()),
        has_valid_entry: row.try_get("has_valid_entry")?,
        created_at: from_ms(row.try_get("created_at")?)?,
    })
}

impl Store {
    // -- League entries ---------------------------------------------------

    pub async fn insert_league_entry(&self, entry: &LeagueEntry) -> Result<(), SettlementError> {
        sqlx::query(
            r"
            INSERT INTO league_entries (id, league_id, participant_id, payment_ref, amount, status)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
        )
        .bind(&entry.id)
        .bind(&entry.league_id)
        .bind(&entry.participant_id)
        .bind(&entry.payment_ref)
        .bind(entry.amount.to_string())
        .bind(entry.status.as_str())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn league_entry(&self, id: &str) -> Result<Option<LeagueEntry>, SettlementError> {
        let row = sqlx::query(
            "SELECT id, league_id, participant_id, payment_ref, amount, status FROM league_entries WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let amount: String = row.try_get("amount")?;
        let status: String = row.try_get("status")?;
        Ok(Some(LeagueEntry {
            id: row.try_get("id")?,
            league_id: row.try_get("league_id")?,
            participant_id: row.try_get("participant_id")?,
            payment_ref: row.try_get("payment_ref")?,
            amount: parse_decimal(&amount)?,
            status: status.parse::<EntryStatus>().map_err(decode_err)?,
        }))
    }

    /// Compare-and-set on entry status, optionally recording the payment
    /// reference. `false` means the entry was not in `from`.
    pub async fn set_entry_status(
        &self,
        entry_id: &str,
        from: EntryStatus,
        to: EntryStatus,
        payment_ref: Option<&str>,
    ) -> Result<bool, SettlementError> {
        let result = sqlx::query(
            r"
            UPDATE league_entries
            SET status = ?3, payment_ref = COALESCE(?4, payment_ref)
            WHERE id = ?1 AND status = ?2
            ",
        )
        .bind(entry_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(payment_ref)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    // -- Rosters ----------------------------------------------------------

    /// Insert or replace a participant's roster, only while the round is
    /// `pending`. Returns `false` when the round has moved on.
    pub async fn save_roster(&self, roster: &Roster) -> Result<bool, SettlementError> {
        let result = sqlx::query(
            r"
            INSERT INTO rosters
                (id, round_id, participant_id, name, symbols, total_score, rank, has_valid_entry, created_at)
            SELECT ?1, ?2, ?3, ?4, ?5, NULL, NULL, ?6, ?7
            WHERE EXISTS (SELECT 1 FROM rounds WHERE id = ?2 AND status = 'pending')
            ON CONFLICT (round_id, participant_id) DO UPDATE SET
                name = excluded.name,
                symbols = excluded.symbols,
                has_valid_entry = excluded.has_valid_entry
            ",
        )
        .bind(&roster.id)
        .bind(&roster.round_id)
        .bind(&roster.participant_id)
        .bind(&roster.name)
        .bind(&roster.raw_symbols)
        .bind(roster.has_valid_entry)
        .bind(to_ms(roster.created_at))
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn roster_for(
        &self,
        round_id: &str,
        participant_id: &str,
    ) -> Result<Option<Roster>, SettlementError> {
        let sql = format!(
            "SELECT {ROSTER_COLUMNS} FROM rosters r WHERE r.round_id = ?1 AND r.participant_id = ?2"
        );
        let row = sqlx::query(&sql)
            .bind(round_id)
            .bind(participant_id)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.as_ref().map(roster_from_row).transpose()?)
    }

    /// Rosters that count toward scoring: a CONFIRMED league entry for the
    /// round's league and `has_valid_entry` set. Oldest first.
    pub async fn eligible_rosters(&self, round_id: &str) -> Result<Vec<Roster>, SettlementError> {
        let sql = format!(
            r"
            SELECT {ROSTER_COLUMNS}
            FROM rosters r
            JOIN rounds ro ON ro.id = r.round_id
            JOIN league_entries e
                ON e.league_id = ro.league_id AND e.participant_id = r.participant_id
            WHERE r.round_id = ?1 AND r.has_valid_entry = 1 AND e.status = 'CONFIRMED'
            ORDER BY r.created_at, r.id
            "
        );
        let rows = sqlx::query(&sql).bind(round_id).fetch_all(self.pool()).await?;
        Ok(rows.iter().map(roster_from_row).collect::<Result<Vec<_>, _>>()?)
    }

    /// Persist scores and ranks while the round is still `active`.
    ///
    /// Returns `false` and writes nothing once the round has completed.
    pub async fn write_scores(
        &self,
        round_id: &str,
        scores: &[ScoreRow],
        now: DateTime<Utc>,
    ) -> Result<bool, SettlementError> {
        let mut tx = self.pool().begin().await?;

        // Touch the round row under the guard; this takes the write lock
        // before any roster is updated.
        let guard = sqlx::query("UPDATE rounds SET status = status WHERE id = ?1 AND status = 'active'")
            .bind(round_id)
            .execute(&mut *tx)
            .await?;
        if guard.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        apply_scores(&mut tx, round_id, scores, now).await?;
        tx.commit().await?;
        Ok(true)
    }

    /// Persisted ranking, rank 1 first.
    pub async fn ranked_teams(&self, round_id: &str) -> Result<Vec<RankedTeam>, SettlementError> {
        let rows = sqlx::query(
            r"
            SELECT id, participant_id, name, total_score, rank
            FROM rosters
            WHERE round_id = ?1 AND rank IS NOT NULL
            ORDER BY rank
            ",
        )
        .bind(round_id)
        .fetch_all(self.pool())
        .await?;

        let mut teams = Vec::with_capacity(rows.len());
        for row in &rows {
            let score: Option<String> = row.try_get("total_score")?;
            let rank: i64 = row.try_get("rank")?;
            teams.push(RankedTeam {
                roster_id: row.try_get("id")?,
                participant_id: row.try_get("participant_id")?,
                name: row.try_get("name")?,
                total_score: parse_opt_decimal(score)?.unwrap_or(Decimal::ZERO),
                rank: u32::try_from(rank).map_err(|e| decode_err(e.to_string()))?,
            });
        }
        Ok(teams)
    }

    /// Rosters that carry a persisted score, ranked or not. Oldest first.
    pub async fn scored_rosters(&self, round_id: &str) -> Result<Vec<Roster>, SettlementError> {
        let sql = format!(
            "SELECT {ROSTER_COLUMNS} FROM rosters r \
             WHERE r.round_id = ?1 AND r.total_score IS NOT NULL \
             ORDER BY r.created_at, r.id"
        );
        let rows = sqlx::query(&sql).bind(round_id).fetch_all(self.pool()).await?;
        Ok(rows.iter().map(roster_from_row).collect::<Result<Vec<_>, _>>()?)
    }

    /// When the round's standing was last written, if ever.
    pub async fn last_scored_at(&self, round_id: &str) -> Result<Option<DateTime<Utc>>, SettlementError> {
        let ms: Option<i64> =
            sqlx::query_scalar("SELECT MAX(scored_at) FROM rosters WHERE round_id = ?1")
                .bind(round_id)
                .fetch_one(self.pool())
                .await?;
        Ok(ms.map(from_ms).transpose()?)
    }
}

/// Clear the round's previous ranks, then write the new scores.
pub(super) async fn apply_scores(
    tx: &mut Transaction<'_, Sqlite>,
    round_id: &str,
    scores: &[ScoreRow],
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE rosters SET rank = NULL WHERE round_id = ?1")
        .bind(round_id)
        .execute(&mut **tx)
        .await?;

    for score in scores {
        sqlx::query(
            r"
            UPDATE rosters SET total_score = ?3, rank = ?4, scored_at = ?5
            WHERE id = ?1 AND round_id = ?2
            ",
        )
        .bind(&score.roster_id)
        .bind(round_id)
        .bind(score.total_score.to_string())
        .bind(score.rank.map(i64::from))
        .bind(to_ms(now))
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}
