//! Competition state machine.
//!
//! Drives a round `pending → active → completed` and answers ranking and
//! prize queries against it. Every operation takes the current time as an
//! argument; only the HTTP boundary reads the clock.
//!
//! Each transition re-reads the round from the store and ends in a
//! compare-and-set write, so a duplicate or racing trigger degrades to
//! `AlreadyProcessed` instead of a second transition.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::universe::UniverseLocker;
use crate::draft_window;
use crate::feed::{bounded, PriceFeed};
use crate::prizes::{self, PrizePreview};
use crate::scoring::{AssetScore, PriceBook, PricePair, ScoringEngine, ScoringOutcome};
use crate::storage::{ScoreRow, Store};
use crate::types::{
    AssetSymbol, DraftEntry, EntryStatus, Ineligible, League, PrizeRecord, RankedTeam, Roster,
    RosterError, RosterSymbols, Round, RoundStatus, SettlementError,
};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result of a start or end transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionOutcome {
    Transitioned,
    /// The round was already past this transition. Not an error.
    AlreadyProcessed,
}

/// Result of a payout request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "record", rename_all = "snake_case")]
pub enum DistributionOutcome {
    Recorded(PrizeRecord),
    /// A record already existed; it is returned unchanged.
    AlreadyRecorded(PrizeRecord),
}

impl DistributionOutcome {
    pub fn record(&self) -> &PrizeRecord {
        match self {
            DistributionOutcome::Recorded(r) | DistributionOutcome::AlreadyRecorded(r) => r,
        }
    }
}

/// Where a ranking's end prices came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingSource {
    /// Live feed prices, persisted as the round's current standing.
    Live,
    /// The last persisted standing; no prices were fetched.
    Persisted,
    /// The final ranking stored when the round completed.
    FinalSnapshot,
}

/// One team in a ranking, with its per-asset breakdown when computed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Standing {
    #[serde(flatten)]
    pub team: RankedTeam,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub breakdown: Vec<AssetScore>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankingReport {
    pub round_id: String,
    pub status: RoundStatus,
    pub source: RankingSource,
    pub teams: Vec<Standing>,
    /// Rosters excluded because their stored symbols were unusable.
    pub excluded: Vec<String>,
    /// When this standing was scored. `None` if no score was ever stored.
    pub last_updated: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

pub struct RoundLifecycle {
    store: Store,
    feed: Arc<dyn PriceFeed>,
    locker: UniverseLocker,
    scoring: ScoringEngine,
    feed_timeout: Duration,
}

impl RoundLifecycle {
    pub fn new(
        store: Store,
        feed: Arc<dyn PriceFeed>,
        scoring: ScoringEngine,
        universe_size: usize,
        feed_timeout: Duration,
    ) -> Self {
        let locker = UniverseLocker::new(store.clone(), feed.clone(), universe_size, feed_timeout);
        Self { store, feed, locker, scoring, feed_timeout }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    // -- Transitions -------------------------------------------------------

    /// `pending → active`: lock the universe (if needed), then advance.
    pub async fn start_round(
        &self,
        round_id: &str,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, SettlementError> {
        let round = self.store.require_round(round_id).await?;
        if round.status != RoundStatus::Pending {
            debug!(round_id, status = %round.status, "Start already processed");
            return Ok(TransitionOutcome::AlreadyProcessed);
        }
        if !round.has_started(now) {
            return Err(SettlementError::not_eligible(
                round_id,
                Ineligible::NotStarted { starts_at: round.start_time },
            ));
        }

        self.ensure_universe(round_id, now).await?;

        if self
            .store
            .advance_status(round_id, RoundStatus::Pending, RoundStatus::Active)
            .await?
        {
            info!(round_id, "Round started");
            Ok(TransitionOutcome::Transitioned)
        } else {
            debug!(round_id, "Lost start race, already active");
            Ok(TransitionOutcome::AlreadyProcessed)
        }
    }

    /// Freeze the draft universe of a `pending` round so rosters can be
    /// drafted against it. `AlreadyProcessed` if it was already frozen.
    pub async fn open_draft(
        &self,
        round_id: &str,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, SettlementError> {
        let round = self.store.require_round(round_id).await?;
        if round.status != RoundStatus::Pending {
            return Err(SettlementError::not_eligible(
                round_id,
                Ineligible::DraftClosed { status: round.status },
            ));
        }
        if self.ensure_universe(round_id, now).await? {
            info!(round_id, "Draft opened");
            Ok(TransitionOutcome::Transitioned)
        } else {
            Ok(TransitionOutcome::AlreadyProcessed)
        }
    }

    /// Lock the universe unless it already is. `true` if this call locked it.
    async fn ensure_universe(&self, round_id: &str, now: DateTime<Utc>) -> Result<bool, SettlementError> {
        match self.locker.lock(round_id, now).await {
            Ok(count) => {
                debug!(round_id, count, "Universe locked");
                Ok(true)
            }
            Err(e) if e.is_idempotent_success() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// `active → completed`: end snapshot, final scores, prizes, then one
    /// atomic write that completes the round and records the payout.
    ///
    /// A round with no ranked team completes without a prize record.
    pub async fn end_round(
        &self,
        round_id: &str,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, SettlementError> {
        let round = self.store.require_round(round_id).await?;
        match round.status {
            RoundStatus::Completed => {
                debug!(round_id, "End already processed");
                return Ok(TransitionOutcome::AlreadyProcessed);
            }
            RoundStatus::Pending => {
                return Err(SettlementError::not_eligible(
                    round_id,
                    Ineligible::NotActive { status: round.status },
                ));
            }
            RoundStatus::Active => {}
        }
        if !round.has_ended(now) {
            return Err(SettlementError::not_eligible(
                round_id,
                Ineligible::NotEnded { ends_at: round.end_time },
            ));
        }

        let league = self.league_for(&round).await?;
        let entries = self.capture_end_snapshot(&round, now).await?;

        let rosters = self.store.eligible_rosters(round_id).await?;
        let outcome = self.scoring.score_rosters(&rosters, &snapshot_book(&entries));
        let ranking = outcome.ranking();
        let rows = score_rows(&outcome, &ranking);

        let record = if ranking.is_empty() {
            warn!(round_id, rosters = rosters.len(), "No ranked teams, completing without payout");
            None
        } else {
            Some(prizes::build_record(round_id, round.prize_pool, &league.prize_split, &ranking, now))
        };

        if !self
            .store
            .finalize_round(round_id, &rows, record.as_ref(), now)
            .await?
        {
            debug!(round_id, "Lost end race, already completed");
            return Ok(TransitionOutcome::AlreadyProcessed);
        }

        info!(
            round_id,
            teams = ranking.len(),
            excluded = outcome.malformed.len(),
            total_paid = %record.as_ref().map(|r| r.total_paid).unwrap_or_default(),
            "Round completed"
        );
        Ok(TransitionOutcome::Transitioned)
    }

    /// Fetch and store end prices unless a snapshot already exists, then
    /// return the universe with end prices filled in.
    async fn capture_end_snapshot(
        &self,
        round: &Round,
        now: DateTime<Utc>,
    ) -> Result<Vec<DraftEntry>, SettlementError> {
        let entries = self.store.draft_entries(&round.id).await?;
        if entries.is_empty() {
            return Err(SettlementError::not_eligible(&round.id, Ineligible::UniverseNotLocked));
        }
        if self.store.has_end_snapshot(&round.id).await? {
            debug!(round_id = %round.id, "Reusing stored end snapshot");
            return Ok(entries);
        }

        let live = self.live_prices(&entries).await?;
        let prices: HashMap<String, Option<Decimal>> = entries
            .iter()
            .map(|e| (e.asset_id.clone(), live.get(&e.asset_id).copied().flatten()))
            .collect();

        let missing = prices.values().filter(|p| p.is_none()).count();
        if missing > 0 {
            warn!(round_id = %round.id, missing, "End snapshot has assets without a price");
        }

        self.store.record_end_snapshot(&round.id, &prices, now).await?;
        self.store.draft_entries(&round.id).await
    }

    /// Current prices for the universe, keyed by asset id. Ids the feed
    /// does not return are absent.
    async fn live_prices(
        &self,
        entries: &[DraftEntry],
    ) -> Result<HashMap<String, Option<Decimal>>, SettlementError> {
        let ids: Vec<String> = entries.iter().map(|e| e.asset_id.clone()).collect();
        let quotes = bounded(self.feed_timeout, "get_market_data", self.feed.get_market_data(&ids)).await?;
        Ok(quotes.into_iter().map(|q| (q.id, q.current_price)).collect())
    }

    // -- Ranking -----------------------------------------------------------

    /// Current ranking for a round.
    ///
    /// `active` rounds are scored against live prices when `live` is set
    /// (and the result persisted), otherwise the stored standing is
    /// returned. `completed` rounds return their frozen final ranking and
    /// are never written.
    pub async fn compute_ranking(
        &self,
        round_id: &str,
        live: bool,
        now: DateTime<Utc>,
    ) -> Result<RankingReport, SettlementError> {
        let round = self.store.require_round(round_id).await?;

        match round.status {
            RoundStatus::Pending => Err(SettlementError::not_eligible(
                round_id,
                Ineligible::NotActive { status: round.status },
            )),
            RoundStatus::Active if live => {
                let entries = self.store.draft_entries(round_id).await?;
                let end = self.live_prices(&entries).await?;
                let book = live_book(&entries, &end);
                let rosters = self.store.eligible_rosters(round_id).await?;
                let outcome = self.scoring.score_rosters(&rosters, &book);
                let ranking = outcome.ranking();

                let written = self
                    .store
                    .write_scores(round_id, &score_rows(&outcome, &ranking), now)
                    .await?;
                if !written {
                    debug!(round_id, "Round completed while scoring, live standing not stored");
                }
                info!(round_id, teams = ranking.len(), "Live ranking computed");
                Ok(report(&round, RankingSource::Live, &outcome, ranking, now))
            }
            RoundStatus::Active => {
                let teams = self
                    .store
                    .ranked_teams(round_id)
                    .await?
                    .into_iter()
                    .map(|team| Standing { team, breakdown: Vec::new() })
                    .collect();
                Ok(RankingReport {
                    round_id: round.id.clone(),
                    status: round.status,
                    source: RankingSource::Persisted,
                    teams,
                    excluded: Vec::new(),
                    last_updated: self.store.last_scored_at(round_id).await?,
                })
            }
            RoundStatus::Completed => self.final_ranking(&round).await,
        }
    }

    /// The frozen ranking of a completed round: the persisted ranks, with
    /// breakdowns rebuilt from the end snapshot for the ranked rosters only.
    /// Entries confirmed after completion never enter it.
    async fn final_ranking(&self, round: &Round) -> Result<RankingReport, SettlementError> {
        let ranked = self.store.ranked_teams(&round.id).await?;
        let book = snapshot_book(&self.store.draft_entries(&round.id).await?);

        let ranked_ids: HashSet<&str> = ranked.iter().map(|t| t.roster_id.as_str()).collect();
        let mut breakdowns: HashMap<String, Vec<AssetScore>> = HashMap::new();
        let mut excluded = Vec::new();
        for roster in self.store.scored_rosters(&round.id).await? {
            if !ranked_ids.contains(roster.id.as_str()) {
                excluded.push(roster.id);
                continue;
            }
            if let Ok(symbols) = roster.symbols() {
                let (_, breakdown) = self.scoring.score_symbols(&symbols, &book);
                breakdowns.insert(roster.id, breakdown);
            }
        }

        let teams = ranked
            .into_iter()
            .map(|team| {
                let breakdown = breakdowns.remove(&team.roster_id).unwrap_or_default();
                Standing { team, breakdown }
            })
            .collect();

        Ok(RankingReport {
            round_id: round.id.clone(),
            status: round.status,
            source: RankingSource::FinalSnapshot,
            teams,
            excluded,
            last_updated: self.store.last_scored_at(&round.id).await?,
        })
    }

    // -- Prizes ------------------------------------------------------------

    /// What the round pays, from the persisted ranking. Writes nothing.
    pub async fn calculate_prize_distribution(
        &self,
        round_id: &str,
    ) -> Result<PrizePreview, SettlementError> {
        let round = self.store.require_round(round_id).await?;
        let league = self.league_for(&round).await?;
        let ranking = self.store.ranked_teams(round_id).await?;
        if ranking.is_empty() {
            return Err(SettlementError::not_eligible(round_id, Ineligible::NoRankedTeams));
        }
        Ok(prizes::preview(&round, &league.prize_split, &ranking))
    }

    /// Pay out a completed round exactly once.
    ///
    /// Rounds normally pay out as part of [`RoundLifecycle::end_round`];
    /// this is the recovery path. A second call returns the stored record.
    pub async fn distribute_prizes(
        &self,
        round_id: &str,
        now: DateTime<Utc>,
    ) -> Result<DistributionOutcome, SettlementError> {
        let round = self.store.require_round(round_id).await?;
        if round.distributed {
            return self.existing_record(round_id).await;
        }

        let ranking = self.store.ranked_teams(round_id).await?;
        prizes::can_distribute(&round, ranking.len())
            .map_err(|reason| SettlementError::not_eligible(round_id, reason))?;

        let league = self.league_for(&round).await?;
        let record = prizes::build_record(round_id, round.prize_pool, &league.prize_split, &ranking, now);

        match self.store.record_distribution(&record).await {
            Ok(()) => {
                info!(round_id, winners = record.prizes.len(), total_paid = %record.total_paid, "Prizes distributed");
                Ok(DistributionOutcome::Recorded(record))
            }
            Err(SettlementError::AlreadyDistributed(_)) => self.existing_record(round_id).await,
            Err(e) => Err(e),
        }
    }

    async fn existing_record(&self, round_id: &str) -> Result<DistributionOutcome, SettlementError> {
        match self.store.prize_record(round_id).await? {
            Some(record) => Ok(DistributionOutcome::AlreadyRecorded(record)),
            None => Err(SettlementError::AlreadyDistributed(round_id.to_string())),
        }
    }

    pub async fn prize_record(&self, round_id: &str) -> Result<Option<PrizeRecord>, SettlementError> {
        self.store.require_round(round_id).await?;
        self.store.prize_record(round_id).await
    }

    // -- Drafting ----------------------------------------------------------

    /// Create or replace a participant's roster.
    ///
    /// Only accepted while the edit window is open and the round is still
    /// `pending`; the write itself re-checks the status. The first
    /// submission freezes the round's universe, and every symbol must be
    /// part of it.
    pub async fn submit_roster(
        &self,
        round_id: &str,
        participant_id: &str,
        name: &str,
        symbols: Vec<String>,
        now: DateTime<Utc>,
    ) -> Result<Roster, SettlementError> {
        if draft_window::is_round_in_progress(now) {
            return Err(SettlementError::not_eligible(round_id, Ineligible::EditWindowClosed));
        }
        let round = self.store.require_round(round_id).await?;
        if round.status != RoundStatus::Pending {
            return Err(SettlementError::not_eligible(
                round_id,
                Ineligible::DraftClosed { status: round.status },
            ));
        }

        let malformed = |source| SettlementError::MalformedRoster {
            roster_id: participant_id.to_string(),
            source,
        };
        let symbols = RosterSymbols::try_from(symbols).map_err(malformed)?;

        self.ensure_universe(round_id, now).await?;
        let universe: HashSet<AssetSymbol> = self
            .store
            .draft_entries(round_id)
            .await?
            .into_iter()
            .map(|e| e.symbol)
            .collect();
        if let Some(missing) = symbols.iter().find(|s| !universe.contains(*s)) {
            return Err(malformed(RosterError::NotInUniverse(missing.to_string())));
        }

        let roster = Roster::new(round_id, participant_id, name, &symbols, now);
        if !self.store.save_roster(&roster).await? {
            let status = self.store.require_round(round_id).await?.status;
            return Err(SettlementError::not_eligible(round_id, Ineligible::DraftClosed { status }));
        }

        info!(round_id, participant_id, "Roster saved");
        self.store
            .roster_for(round_id, participant_id)
            .await?
            .ok_or_else(|| SettlementError::RoundNotFound(round_id.to_string()))
    }

    /// Mark a league entry's payment as confirmed. Confirming twice is a
    /// no-op; a FAILED entry stays failed.
    pub async fn confirm_entry(
        &self,
        entry_id: &str,
        payment_ref: Option<&str>,
    ) -> Result<EntryStatus, SettlementError> {
        let changed = self
            .store
            .set_entry_status(entry_id, EntryStatus::Pending, EntryStatus::Confirmed, payment_ref)
            .await?;
        let entry = self
            .store
            .league_entry(entry_id)
            .await?
            .ok_or_else(|| SettlementError::EntryNotFound(entry_id.to_string()))?;
        if changed {
            info!(entry_id, league_id = %entry.league_id, "League entry confirmed");
        }
        Ok(entry.status)
    }

    async fn league_for(&self, round: &Round) -> Result<League, SettlementError> {
        self.store.league(&round.league_id).await?.ok_or_else(|| {
            SettlementError::Config(format!("round {} references unknown league {}", round.id, round.league_id))
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Start and end prices from the stored snapshots.
fn snapshot_book(entries: &[DraftEntry]) -> PriceBook {
    entries
        .iter()
        .map(|e| (e.symbol.clone(), PricePair { start: e.price_at_lock, end: e.price_at_end }))
        .collect()
}

/// Stored start prices against live end prices (by asset id).
fn live_book(entries: &[DraftEntry], live: &HashMap<String, Option<Decimal>>) -> PriceBook {
    entries
        .iter()
        .map(|e| {
            let end = live.get(&e.asset_id).copied().flatten();
            (e.symbol.clone(), PricePair { start: e.price_at_lock, end })
        })
        .collect()
}

/// Rows to persist: ranked teams with their rank, malformed rosters at 0
/// with no rank.
fn score_rows(outcome: &ScoringOutcome, ranking: &[RankedTeam]) -> Vec<ScoreRow> {
    let mut rows: Vec<ScoreRow> = ranking
        .iter()
        .map(|t| ScoreRow {
            roster_id: t.roster_id.clone(),
            total_score: t.total_score,
            rank: Some(t.rank),
        })
        .collect();
    rows.extend(outcome.malformed.iter().map(|(roster_id, _)| ScoreRow {
        roster_id: roster_id.clone(),
        total_score: Decimal::ZERO,
        rank: None,
    }));
    rows
}

fn report(
    round: &Round,
    source: RankingSource,
    outcome: &ScoringOutcome,
    ranking: Vec<RankedTeam>,
    now: DateTime<Utc>,
) -> RankingReport {
    let mut breakdowns: HashMap<&str, &Vec<AssetScore>> = outcome
        .scored
        .iter()
        .map(|t| (t.roster_id.as_str(), &t.breakdown))
        .collect();

    let teams = ranking
        .into_iter()
        .map(|team| {
            let breakdown = breakdowns
                .remove(team.roster_id.as_str())
                .cloned()
                .unwrap_or_default();
            Standing { team, breakdown }
        })
        .collect();

    RankingReport {
        round_id: round.id.clone(),
        status: round.status,
        source,
        teams,
        excluded: outcome.malformed.iter().map(|(id, _)| id.clone()).collect(),
        last_updated: Some(now),
    }
}
