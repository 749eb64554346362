//! Price feed gateway.
//!
//! Defines the `PriceFeed` trait the settlement core reads prices through,
//! and the CoinGecko implementation used in production. Every call the core
//! makes goes through [`bounded`], so a slow feed surfaces as
//! `UpstreamUnavailable` instead of a partial answer.

pub mod coingecko;

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::types::{MarketQuote, SettlementError};

/// Failure talking to the price feed.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Http(String),
    #[error("feed returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("could not decode feed response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for FeedError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FeedError::Timeout
        } else if e.is_decode() {
            FeedError::Decode(e.to_string())
        } else {
            FeedError::Http(e.to_string())
        }
    }
}

/// Abstraction over the external market-data source.
///
/// Implementations must tolerate partial misses: an id the feed does not
/// know is simply absent from the answer, never an error.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Current quotes for the given asset ids.
    async fn get_market_data(&self, ids: &[String]) -> Result<Vec<MarketQuote>, FeedError>;

    /// The top `limit` assets by market cap, best first.
    async fn top_assets(&self, limit: usize) -> Result<Vec<MarketQuote>, FeedError>;
}

/// Run a feed call under a hard deadline.
///
/// Both a timeout and a feed error become `UpstreamUnavailable`.
pub async fn bounded<T, F>(limit: Duration, what: &str, call: F) -> Result<T, SettlementError>
where
    F: Future<Output = Result<T, FeedError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            warn!(call = what, error = %e, "Price feed call failed");
            Err(SettlementError::UpstreamUnavailable(format!("{what}: {e}")))
        }
        Err(_) => {
            warn!(call = what, timeout_ms = limit.as_millis() as u64, "Price feed call timed out");
            Err(SettlementError::UpstreamUnavailable(format!(
                "{what}: no answer within {}ms",
                limit.as_millis()
            )))
        }
    }
}
