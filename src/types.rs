//! Shared types for the settlement core.
//!
//! These types form the data model used across all modules: rounds and
//! their lifecycle status, the frozen draft universe, typed rosters, league
//! entries, rankings and prize records, plus the error taxonomy.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Number of assets on every roster.
pub const ROSTER_SIZE: usize = 10;

// ---------------------------------------------------------------------------
// Round
// ---------------------------------------------------------------------------

/// Round lifecycle status. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundStatus {
    Pending,
    Active,
    Completed,
}

impl RoundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoundStatus::Pending => "pending",
            RoundStatus::Active => "active",
            RoundStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoundStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RoundStatus::Pending),
            "active" => Ok(RoundStatus::Active),
            "completed" => Ok(RoundStatus::Completed),
            other => Err(format!("Unknown round status: {other}")),
        }
    }
}

/// One scored cycle of a league.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Round {
    pub id: String,
    pub league_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: RoundStatus,
    pub prize_pool: Decimal,
    pub distributed: bool,
}

impl Round {
    /// A fresh `pending` round.
    pub fn new(
        league_id: &str,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        prize_pool: Decimal,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            league_id: league_id.to_string(),
            start_time,
            end_time,
            status: RoundStatus::Pending,
            prize_pool,
            distributed: false,
        }
    }

    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        now >= self.start_time
    }

    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        now >= self.end_time
    }
}

impl fmt::Display for Round {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "round {} [{}] {} → {} pool={}",
            self.id,
            self.status,
            self.start_time.to_rfc3339(),
            self.end_time.to_rfc3339(),
            self.prize_pool,
        )
    }
}

// ---------------------------------------------------------------------------
// League & prize split
// ---------------------------------------------------------------------------

/// Percentage of the pool paid to each finishing position, best first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Decimal>", into = "Vec<Decimal>")]
pub struct PrizeSplit(Vec<Decimal>);

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SplitError {
    #[error("prize split is empty")]
    Empty,
    #[error("prize split has a negative share at position {0}")]
    Negative(usize),
    #[error("prize split sums to {0}, expected 100")]
    BadTotal(Decimal),
}

impl PrizeSplit {
    /// Validate a split: non-empty, non-negative, summing to exactly 100.
    pub fn new(percentages: Vec<Decimal>) -> Result<Self, SplitError> {
        if percentages.is_empty() {
            return Err(SplitError::Empty);
        }
        if let Some(pos) = percentages.iter().position(|p| p.is_sign_negative() && !p.is_zero()) {
            return Err(SplitError::Negative(pos + 1));
        }
        let total: Decimal = percentages.iter().copied().sum();
        if total != Decimal::ONE_HUNDRED {
            return Err(SplitError::BadTotal(total));
        }
        Ok(Self(percentages))
    }

    /// Percentage for a 1-based position; `None` past the configured split.
    pub fn share(&self, position: u32) -> Option<Decimal> {
        let idx = usize::try_from(position).ok()?.checked_sub(1)?;
        self.0.get(idx).copied()
    }

    pub fn positions(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[Decimal] {
        &self.0
    }
}

impl TryFrom<Vec<Decimal>> for PrizeSplit {
    type Error = SplitError;

    fn try_from(value: Vec<Decimal>) -> Result<Self, Self::Error> {
        PrizeSplit::new(value)
    }
}

impl From<PrizeSplit> for Vec<Decimal> {
    fn from(split: PrizeSplit) -> Self {
        split.0
    }
}

/// Grouping of rounds and participants sharing a prize split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct League {
    pub id: String,
    pub name: String,
    pub prize_split: PrizeSplit,
}

// ---------------------------------------------------------------------------
// Draft universe & market data
// ---------------------------------------------------------------------------

/// One asset frozen into a round's draft universe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftEntry {
    pub round_id: String,
    pub asset_id: String,
    pub symbol: AssetSymbol,
    pub name: String,
    pub image: Option<String>,
    /// Market-cap rank at lock time. Never refreshed.
    pub market_cap_rank: Option<u32>,
    /// Start-of-round price snapshot.
    pub price_at_lock: Option<Decimal>,
    /// End-of-round price snapshot, filled when the round ends.
    pub price_at_end: Option<Decimal>,
}

/// A single asset quote from the price feed. Every metric may be missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketQuote {
    pub id: String,
    pub symbol: String,
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub current_price: Option<Decimal>,
    #[serde(default)]
    pub change_24h: Option<Decimal>,
    #[serde(default)]
    pub change_7d: Option<Decimal>,
    #[serde(default)]
    pub market_cap: Option<Decimal>,
    #[serde(default)]
    pub market_cap_rank: Option<u32>,
}

// ---------------------------------------------------------------------------
// Rosters
// ---------------------------------------------------------------------------

/// Upper-cased ticker symbol (`BTC`, `1INCH`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AssetSymbol(String);

impl AssetSymbol {
    pub fn new(raw: &str) -> Result<Self, RosterError> {
        let sym = raw.trim().to_ascii_uppercase();
        if sym.is_empty() || sym.len() > 20 || !sym.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(RosterError::InvalidSymbol(raw.to_string()));
        }
        Ok(Self(sym))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for AssetSymbol {
    type Error = RosterError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        AssetSymbol::new(&value)
    }
}

impl From<AssetSymbol> for String {
    fn from(sym: AssetSymbol) -> Self {
        sym.0
    }
}

impl fmt::Display for AssetSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a roster could not be turned into ten draftable symbols.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RosterError {
    #[error("roster is not a JSON array of strings: {0}")]
    NotJson(String),
    #[error("roster has {0} assets, expected 10")]
    WrongLength(usize),
    #[error("invalid asset symbol {0:?}")]
    InvalidSymbol(String),
    #[error("asset {0} appears more than once")]
    Duplicate(String),
    /// Only checked at submission, against the round's locked universe.
    #[error("asset {0} is not in this round's draft universe")]
    NotInUniverse(String),
}

/// Exactly ten distinct symbols in slot order.
///
/// Built only through [`RosterSymbols::parse`] or `TryFrom<Vec<String>>`;
/// every other module takes the length and uniqueness as given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterSymbols([AssetSymbol; ROSTER_SIZE]);

impl RosterSymbols {
    /// Parse the stored JSON encoding (`["BTC","ETH",...]`).
    pub fn parse(raw: &str) -> Result<Self, RosterError> {
        let list: Vec<String> =
            serde_json::from_str(raw).map_err(|e| RosterError::NotJson(e.to_string()))?;
        Self::try_from(list)
    }

    /// Stored JSON encoding.
    pub fn to_json(&self) -> String {
        let list: Vec<&str> = self.0.iter().map(AssetSymbol::as_str).collect();
        // A Vec<&str> always serializes.
        serde_json::to_string(&list).unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AssetSymbol> {
        self.0.iter()
    }

    /// Symbols paired with the slot category of their position.
    pub fn slots(&self) -> impl Iterator<Item = (Slot, &AssetSymbol)> {
        self.0.iter().enumerate().map(|(i, s)| (Slot::for_position(i), s))
    }
}

impl TryFrom<Vec<String>> for RosterSymbols {
    type Error = RosterError;

    fn try_from(list: Vec<String>) -> Result<Self, Self::Error> {
        if list.len() != ROSTER_SIZE {
            return Err(RosterError::WrongLength(list.len()));
        }
        let mut seen = HashSet::with_capacity(ROSTER_SIZE);
        let mut symbols = Vec::with_capacity(ROSTER_SIZE);
        for raw in &list {
            let sym = AssetSymbol::new(raw)?;
            if !seen.insert(sym.clone()) {
                return Err(RosterError::Duplicate(sym.0));
            }
            symbols.push(sym);
        }
        let array: [AssetSymbol; ROSTER_SIZE] = symbols
            .try_into()
            .map_err(|v: Vec<AssetSymbol>| RosterError::WrongLength(v.len()))?;
        Ok(Self(array))
    }
}

/// Roster position category, which selects the score multiplier.
///
/// Position 1 is the wildcard, 2–5 defense, 6–8 support, 9–10 attack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Slot {
    Wildcard,
    Defense,
    Support,
    Attack,
}

impl Slot {
    /// Slot for a zero-based roster index.
    pub fn for_position(index: usize) -> Self {
        match index {
            0 => Slot::Wildcard,
            1..=4 => Slot::Defense,
            5..=7 => Slot::Support,
            _ => Slot::Attack,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Wildcard => write!(f, "WILDCARD"),
            Slot::Defense => write!(f, "DEFENSE"),
            Slot::Support => write!(f, "SUPPORT"),
            Slot::Attack => write!(f, "ATTACK"),
        }
    }
}

/// A participant's team for one round, as stored.
///
/// `raw_symbols` is the stored encoding; it is only interpreted through
/// [`Roster::symbols`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Roster {
    pub id: String,
    pub round_id: String,
    pub participant_id: String,
    pub name: String,
    pub raw_symbols: String,
    pub total_score: Option<Decimal>,
    pub rank: Option<u32>,
    pub has_valid_entry: bool,
    pub created_at: DateTime<Utc>,
}

impl Roster {
    /// A new, unscored roster.
    pub fn new(
        round_id: &str,
        participant_id: &str,
        name: &str,
        symbols: &RosterSymbols,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            round_id: round_id.to_string(),
            participant_id: participant_id.to_string(),
            name: name.to_string(),
            raw_symbols: symbols.to_json(),
            total_score: None,
            rank: None,
            has_valid_entry: true,
            created_at,
        }
    }

    pub fn symbols(&self) -> Result<RosterSymbols, RosterError> {
        RosterSymbols::parse(&self.raw_symbols)
    }
}

// ---------------------------------------------------------------------------
// League entries
// ---------------------------------------------------------------------------

/// Payment status of a league entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntryStatus {
    Pending,
    Confirmed,
    Failed,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Pending => "PENDING",
            EntryStatus::Confirmed => "CONFIRMED",
            EntryStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(EntryStatus::Pending),
            "CONFIRMED" => Ok(EntryStatus::Confirmed),
            "FAILED" => Ok(EntryStatus::Failed),
            other => Err(format!("Unknown entry status: {other}")),
        }
    }
}

/// Participant ↔ league link with its entry-fee payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeagueEntry {
    pub id: String,
    pub league_id: String,
    pub participant_id: String,
    pub payment_ref: Option<String>,
    pub amount: Decimal,
    pub status: EntryStatus,
}

// ---------------------------------------------------------------------------
// Rankings & prizes
// ---------------------------------------------------------------------------

/// A scored team with its dense rank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedTeam {
    pub roster_id: String,
    pub participant_id: String,
    pub name: String,
    pub total_score: Decimal,
    pub rank: u32,
}

/// Payout for one finishing position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prize {
    pub position: u32,
    pub roster_id: String,
    pub participant_id: String,
    pub score: Decimal,
    pub amount: Decimal,
}

/// Immutable ledger entry, written at most once per round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrizeRecord {
    pub id: String,
    pub round_id: String,
    pub prizes: Vec<Prize>,
    pub total_paid: Decimal,
    pub distributed_at: DateTime<Utc>,
}

impl fmt::Display for PrizeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "prizes for {}: {} winners, {} paid at {}",
            self.round_id,
            self.prizes.len(),
            self.total_paid,
            self.distributed_at.to_rfc3339(),
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Precondition that kept a round from a transition or a payout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Ineligible {
    #[error("round starts at {starts_at}")]
    NotStarted { starts_at: DateTime<Utc> },
    #[error("round ends at {ends_at}")]
    NotEnded { ends_at: DateTime<Utc> },
    #[error("round is {status}, expected active")]
    NotActive { status: RoundStatus },
    #[error("round is {status}, expected completed")]
    NotCompleted { status: RoundStatus },
    #[error("round is {status}, rosters are frozen")]
    DraftClosed { status: RoundStatus },
    #[error("draft edit window is closed")]
    EditWindowClosed,
    #[error("no ranked teams")]
    NoRankedTeams,
    #[error("draft universe not locked")]
    UniverseNotLocked,
}

/// Domain error taxonomy for the settlement core.
#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    /// Price feed unreachable, slow, or empty. Retryable; nothing written.
    #[error("Price feed unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Universe already frozen. Idempotency guard, treated as success.
    #[error("Draft universe already locked for round {0}")]
    AlreadyLocked(String),

    /// Prize record already written. Idempotency guard, treated as success.
    #[error("Prizes already distributed for round {0}")]
    AlreadyDistributed(String),

    #[error("Round {round_id} not eligible: {reason}")]
    NotEligible { round_id: String, reason: Ineligible },

    #[error("Malformed roster {roster_id}: {source}")]
    MalformedRoster {
        roster_id: String,
        #[source]
        source: RosterError,
    },

    #[error("Unauthorized")]
    Unauthorized,

    /// Store unreachable or a write failed. Aborts the whole batch.
    #[error("Persistence failure: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("Round not found: {0}")]
    RoundNotFound(String),

    #[error("League entry not found: {0}")]
    EntryNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SettlementError {
    pub fn not_eligible(round_id: &str, reason: Ineligible) -> Self {
        SettlementError::NotEligible { round_id: round_id.to_string(), reason }
    }

    /// Guards that mean "someone already did this".
    pub fn is_idempotent_success(&self) -> bool {
        matches!(
            self,
            SettlementError::AlreadyLocked(_) | SettlementError::AlreadyDistributed(_)
        )
    }

    /// Worth another attempt on the next scheduler tick.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SettlementError::UpstreamUnavailable(_) | SettlementError::Persistence(_)
        )
    }

    /// Failures that make any further batch progress pointless.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, SettlementError::Persistence(_) | SettlementError::Config(_))
    }

    /// Stable machine-readable kind, used in API bodies and batch reports.
    pub fn kind(&self) -> &'static str {
        match self {
            SettlementError::UpstreamUnavailable(_) => "upstream_unavailable",
            SettlementError::AlreadyLocked(_) => "already_locked",
            SettlementError::AlreadyDistributed(_) => "already_distributed",
            SettlementError::NotEligible { .. } => "not_eligible",
            SettlementError::MalformedRoster { .. } => "malformed_roster",
            SettlementError::Unauthorized => "unauthorized",
            SettlementError::Persistence(_) => "persistence_failure",
            SettlementError::RoundNotFound(_) => "round_not_found",
            SettlementError::EntryNotFound(_) => "entry_not_found",
            SettlementError::Config(_) => "config",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
