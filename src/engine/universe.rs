//! Draft universe locker.
//!
//! Freezes, once per round, the top-N assets by market cap together with
//! their starting prices. Once written, the universe never changes: later
//! market movement cannot invalidate rosters drafted against it.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::feed::{bounded, PriceFeed};
use crate::storage::Store;
use crate::types::{AssetSymbol, DraftEntry, MarketQuote, SettlementError};

pub struct UniverseLocker {
    store: Store,
    feed: Arc<dyn PriceFeed>,
    size: usize,
    timeout: Duration,
}

impl UniverseLocker {
    pub fn new(store: Store, feed: Arc<dyn PriceFeed>, size: usize, timeout: Duration) -> Self {
        Self { store, feed, size, timeout }
    }

    /// Freeze the universe for `round_id`.
    ///
    /// `AlreadyLocked` if a universe exists (checked before any network
    /// call). `UpstreamUnavailable` if the feed is down, slow or empty, in
    /// which case nothing is written. Returns the number of assets locked.
    pub async fn lock(&self, round_id: &str, now: DateTime<Utc>) -> Result<usize, SettlementError> {
        if self.store.is_universe_locked(round_id).await? {
            debug!(round_id, "Universe already locked");
            return Err(SettlementError::AlreadyLocked(round_id.to_string()));
        }

        let quotes = bounded(self.timeout, "top_assets", self.feed.top_assets(self.size)).await?;
        if quotes.is_empty() {
            warn!(round_id, "Price feed returned no assets");
            return Err(SettlementError::UpstreamUnavailable(
                "top_assets returned an empty list".to_string(),
            ));
        }

        let entries = build_entries(round_id, quotes, self.size);
        if entries.is_empty() {
            return Err(SettlementError::UpstreamUnavailable(
                "top_assets returned no usable symbols".to_string(),
            ));
        }

        self.store.lock_universe(round_id, &entries, now).await?;
        info!(round_id, count = entries.len(), "Draft universe locked");
        Ok(entries.len())
    }
}

/// Turn feed quotes into draft entries, keeping the best-ranked asset per
/// symbol and at most `size` entries.
fn build_entries(round_id: &str, quotes: Vec<MarketQuote>, size: usize) -> Vec<DraftEntry> {
    let mut best: HashMap<AssetSymbol, MarketQuote> = HashMap::new();

    for quote in quotes {
        let symbol = match AssetSymbol::new(&quote.symbol) {
            Ok(s) => s,
            Err(e) => {
                debug!(asset_id = %quote.id, error = %e, "Skipping asset with unusable symbol");
                continue;
            }
        };
        let better = match best.get(&symbol) {
            Some(existing) => rank_key(&quote) < rank_key(existing),
            None => true,
        };
        if better {
            best.insert(symbol, quote);
        }
    }

    let mut entries: Vec<DraftEntry> = best
        .into_iter()
        .map(|(symbol, q)| DraftEntry {
            round_id: round_id.to_string(),
            asset_id: q.id,
            symbol,
            name: q.name,
            image: q.image,
            market_cap_rank: q.market_cap_rank,
            price_at_lock: q.current_price,
            price_at_end: None,
        })
        .collect();

    entries.sort_by(|a, b| {
        (a.market_cap_rank.unwrap_or(u32::MAX), &a.asset_id)
            .cmp(&(b.market_cap_rank.unwrap_or(u32::MAX), &b.asset_id))
    });
    entries.truncate(size);
    entries
}

/// Unranked assets sort last; ties fall back to the id.
fn rank_key(q: &MarketQuote) -> (u32, &str) {
    (q.market_cap_rank.unwrap_or(u32::MAX), q.id.as_str())
}
