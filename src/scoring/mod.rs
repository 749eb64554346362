//! Scoring engine.
//!
//! Pure computation: turns each roster's ten symbols plus a start/end price
//! book into a weighted team score, then orders the scored teams into a
//! dense 1..K ranking. Nothing here touches the store or the network.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::types::{AssetSymbol, RankedTeam, Roster, RosterError, RosterSymbols, Slot};

/// Decimal places kept on a team total before ranking.
pub const SCORE_DP: u32 = 8;

// ---------------------------------------------------------------------------
// Multipliers
// ---------------------------------------------------------------------------

/// Per-slot score multipliers. Loaded from the `[scoring]` config table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotMultipliers {
    #[serde(default = "default_attack")]
    pub attack: Decimal,
    #[serde(default = "default_defense")]
    pub defense: Decimal,
    #[serde(default = "default_support")]
    pub support: Decimal,
    #[serde(default = "default_wildcard")]
    pub wildcard: Decimal,
}

fn default_attack() -> Decimal {
    Decimal::new(15, 1)
}

fn default_defense() -> Decimal {
    Decimal::new(12, 1)
}

fn default_support() -> Decimal {
    Decimal::new(13, 1)
}

fn default_wildcard() -> Decimal {
    Decimal::new(20, 1)
}

impl Default for SlotMultipliers {
    fn default() -> Self {
        Self {
            attack: default_attack(),
            defense: default_defense(),
            support: default_support(),
            wildcard: default_wildcard(),
        }
    }
}

impl SlotMultipliers {
    pub fn for_slot(&self, slot: Slot) -> Decimal {
        match slot {
            Slot::Attack => self.attack,
            Slot::Defense => self.defense,
            Slot::Support => self.support,
            Slot::Wildcard => self.wildcard,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, value) in [
            ("attack", self.attack),
            ("defense", self.defense),
            ("support", self.support),
            ("wildcard", self.wildcard),
        ] {
            if value.is_sign_negative() && !value.is_zero() {
                anyhow::bail!("scoring.{name} must not be negative, got {value}");
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Price book
// ---------------------------------------------------------------------------

/// Start and end price of one asset for a round.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PricePair {
    pub start: Option<Decimal>,
    pub end: Option<Decimal>,
}

/// Prices keyed by roster symbol. A missing symbol scores 0.
pub type PriceBook = HashMap<AssetSymbol, PricePair>;

/// Percentage change from `start` to `end`.
///
/// Returns exactly 0 when either price is missing, when `start` is zero,
/// or when the arithmetic would overflow.
pub fn asset_change(start: Option<Decimal>, end: Option<Decimal>) -> Decimal {
    let (Some(start), Some(end)) = (start, end) else {
        return Decimal::ZERO;
    };
    if start.is_zero() {
        return Decimal::ZERO;
    }
    end.checked_sub(start)
        .and_then(|delta| delta.checked_div(start))
        .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
        .unwrap_or(Decimal::ZERO)
}

// ---------------------------------------------------------------------------
// Scored output
// ---------------------------------------------------------------------------

/// One asset's contribution to a team score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetScore {
    pub symbol: AssetSymbol,
    pub slot: Slot,
    pub price_at_start: Option<Decimal>,
    pub price_at_end: Option<Decimal>,
    pub change_pct: Decimal,
    pub multiplier: Decimal,
    pub weighted: Decimal,
}

/// A roster with its computed total, before ranking.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamScore {
    pub roster_id: String,
    pub participant_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub total: Decimal,
    pub breakdown: Vec<AssetScore>,
}

/// Result of scoring every eligible roster in a round.
#[derive(Debug, Clone, Default)]
pub struct ScoringOutcome {
    pub scored: Vec<TeamScore>,
    /// Rosters whose stored symbols could not be parsed. They score 0 and
    /// take no rank.
    pub malformed: Vec<(String, RosterError)>,
}

impl ScoringOutcome {
    /// Dense ranking of the well-formed teams.
    pub fn ranking(&self) -> Vec<RankedTeam> {
        rank(&self.scored)
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ScoringEngine {
    multipliers: SlotMultipliers,
}

impl ScoringEngine {
    pub fn new(multipliers: SlotMultipliers) -> Self {
        Self { multipliers }
    }

    /// Weighted total and per-asset breakdown for one roster.
    ///
    /// The total is the plain sum of the ten weighted changes, rounded to
    /// [`SCORE_DP`] places.
    pub fn score_symbols(
        &self,
        symbols: &RosterSymbols,
        prices: &PriceBook,
    ) -> (Decimal, Vec<AssetScore>) {
        let mut total = Decimal::ZERO;
        let mut breakdown = Vec::with_capacity(crate::types::ROSTER_SIZE);

        for (slot, symbol) in symbols.slots() {
            let pair = prices.get(symbol).copied().unwrap_or_default();
            if pair.end.is_none() {
                debug!(symbol = %symbol, "No end price, asset contributes 0");
            }
            let change_pct = asset_change(pair.start, pair.end);
            let multiplier = self.multipliers.for_slot(slot);
            let weighted = change_pct.checked_mul(multiplier).unwrap_or(Decimal::ZERO);
            total = total.checked_add(weighted).unwrap_or(total);

            breakdown.push(AssetScore {
                symbol: symbol.clone(),
                slot,
                price_at_start: pair.start,
                price_at_end: pair.end,
                change_pct,
                multiplier,
                weighted,
            });
        }

        let total = total.round_dp_with_strategy(SCORE_DP, RoundingStrategy::MidpointAwayFromZero);
        (total, breakdown)
    }

    /// Score every roster. Malformed rosters are logged and set aside.
    pub fn score_rosters(&self, rosters: &[Roster], prices: &PriceBook) -> ScoringOutcome {
        let mut outcome = ScoringOutcome::default();

        for roster in rosters {
            match roster.symbols() {
                Ok(symbols) => {
                    let (total, breakdown) = self.score_symbols(&symbols, prices);
                    outcome.scored.push(TeamScore {
                        roster_id: roster.id.clone(),
                        participant_id: roster.participant_id.clone(),
                        name: roster.name.clone(),
                        created_at: roster.created_at,
                        total,
                        breakdown,
                    });
                }
                Err(e) => {
                    warn!(roster_id = %roster.id, error = %e, "Malformed roster, scoring 0");
                    outcome.malformed.push((roster.id.clone(), e));
                }
            }
        }

        outcome
    }
}

// ---------------------------------------------------------------------------
// Ranking
// ---------------------------------------------------------------------------

/// Order teams by score (desc), creation time (asc), then id, and number
/// them 1..K with no gaps.
pub fn rank(teams: &[TeamScore]) -> Vec<RankedTeam> {
    let mut ordered: Vec<&TeamScore> = teams.iter().collect();
    ordered.sort_by(|a, b| {
        b.total
            .cmp(&a.total)
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.roster_id.cmp(&b.roster_id))
    });

    ordered
        .into_iter()
        .zip(1u32..)
        .map(|(team, rank)| RankedTeam {
            roster_id: team.roster_id.clone(),
            participant_id: team.participant_id.clone(),
            name: team.name.clone(),
            total_score: team.total,
            rank,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
