//! Prize distribution engine.
//!
//! Pure planning: a final ranking, a pool and a league split in, a list of
//! payouts out. Writing the ledger entry is the store's job.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use crate::types::{Ineligible, Prize, PrizeRecord, PrizeSplit, RankedTeam, Round, RoundStatus};

/// Decimal places kept on each payout (lamport precision).
pub const PRIZE_DP: u32 = 9;

/// Read-only view of what a round would pay.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrizePreview {
    pub round_id: String,
    pub prize_pool: Decimal,
    pub split: Vec<Decimal>,
    pub prizes: Vec<Prize>,
    pub total_paid: Decimal,
    pub distributed: bool,
}

/// Check whether a round may be paid out now.
///
/// The round must be `completed`, not yet `distributed`, and have at least
/// one ranked team. An already-distributed round is reported by the caller
/// as `AlreadyDistributed`, so it is not an `Ineligible` reason here.
pub fn can_distribute(round: &Round, ranked_teams: usize) -> Result<(), Ineligible> {
    if round.status != RoundStatus::Completed {
        return Err(Ineligible::NotCompleted { status: round.status });
    }
    if ranked_teams == 0 {
        return Err(Ineligible::NoRankedTeams);
    }
    Ok(())
}

/// Payout for one share of the pool, truncated to [`PRIZE_DP`] places.
pub fn prize_amount(pool: Decimal, percentage: Decimal) -> Decimal {
    pool.checked_mul(percentage)
        .and_then(|v| v.checked_div(Decimal::ONE_HUNDRED))
        .map(|v| v.round_dp_with_strategy(PRIZE_DP, RoundingStrategy::ToZero))
        .unwrap_or(Decimal::ZERO)
}

/// Assign the split to the ranking, best rank first. Positions past the
/// split, and teams past the split, get nothing.
pub fn plan_prizes(pool: Decimal, split: &PrizeSplit, ranking: &[RankedTeam]) -> Vec<Prize> {
    let mut ordered: Vec<&RankedTeam> = ranking.iter().collect();
    ordered.sort_by_key(|t| t.rank);

    ordered
        .into_iter()
        .filter_map(|team| {
            let share = split.share(team.rank)?;
            Some(Prize {
                position: team.rank,
                roster_id: team.roster_id.clone(),
                participant_id: team.participant_id.clone(),
                score: team.total_score,
                amount: prize_amount(pool, share),
            })
        })
        .collect()
}

/// Build the immutable ledger entry for a round.
pub fn build_record(
    round_id: &str,
    pool: Decimal,
    split: &PrizeSplit,
    ranking: &[RankedTeam],
    now: DateTime<Utc>,
) -> PrizeRecord {
    let prizes = plan_prizes(pool, split, ranking);
    let total_paid = prizes.iter().map(|p| p.amount).sum();
    PrizeRecord {
        id: uuid::Uuid::new_v4().to_string(),
        round_id: round_id.to_string(),
        prizes,
        total_paid,
        distributed_at: now,
    }
}

/// Preview without writing anything.
pub fn preview(round: &Round, split: &PrizeSplit, ranking: &[RankedTeam]) -> PrizePreview {
    let prizes = plan_prizes(round.prize_pool, split, ranking);
    let total_paid = prizes.iter().map(|p| p.amount).sum();
    PrizePreview {
        round_id: round.id.clone(),
        prize_pool: round.prize_pool,
        split: split.as_slice().to_vec(),
        prizes,
        total_paid,
        distributed: round.distributed,
    }
}
