//! CoinGecko market-data client.
//!
//! API docs: https://docs.coingecko.com/reference/coins-markets
//! Base URL: https://api.coingecko.com/api/v3
//! Auth: optional demo key in the `x-cg-demo-api-key` header.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{FeedError, PriceFeed};
use crate::types::MarketQuote;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Largest page `/coins/markets` will return.
const MAX_PER_PAGE: usize = 250;

const API_KEY_HEADER: &str = "x-cg-demo-api-key";

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

/// One row of `/coins/markets`. Any metric can be `null`.
#[derive(Debug, Deserialize)]
struct CoinMarket {
    id: String,
    symbol: String,
    name: String,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    current_price: Option<Decimal>,
    #[serde(default)]
    price_change_percentage_24h: Option<Decimal>,
    #[serde(default)]
    price_change_percentage_7d_in_currency: Option<Decimal>,
    #[serde(default)]
    market_cap: Option<Decimal>,
    #[serde(default)]
    market_cap_rank: Option<u32>,
}

impl From<CoinMarket> for MarketQuote {
    fn from(c: CoinMarket) -> Self {
        MarketQuote {
            id: c.id,
            symbol: c.symbol.to_ascii_uppercase(),
            name: c.name,
            image: c.image,
            current_price: c.current_price,
            change_24h: c.price_change_percentage_24h,
            change_7d: c.price_change_percentage_7d_in_currency,
            market_cap: c.market_cap,
            market_cap_rank: c.market_cap_rank,
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct CoinGeckoFeed {
    http: Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl CoinGeckoFeed {
    pub fn new(base_url: &str, timeout: Duration, api_key: Option<SecretString>) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent("ROUNDKEEPER/0.1.0 (settlement-core)")
            .build()
            .context("Failed to build HTTP client for CoinGecko")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn markets_url(&self, query: &str) -> String {
        format!(
            "{}/coins/markets?vs_currency=usd&price_change_percentage=24h,7d&{query}",
            self.base_url
        )
    }

    async fn fetch(&self, url: &str) -> Result<Vec<MarketQuote>, FeedError> {
        debug!(url = %url, "Fetching CoinGecko markets");

        let mut req = self.http.get(url);
        if let Some(key) = &self.api_key {
            req = req.header(API_KEY_HEADER, key.expose_secret().as_str());
        }

        let resp = req.send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(FeedError::Status { status, body });
        }

        let rows: Vec<CoinMarket> = resp.json().await?;
        Ok(rows.into_iter().map(MarketQuote::from).collect())
    }
}

#[async_trait]
impl PriceFeed for CoinGeckoFeed {
    async fn get_market_data(&self, ids: &[String]) -> Result<Vec<MarketQuote>, FeedError> {
        let mut quotes = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(MAX_PER_PAGE) {
            let joined = chunk.join(",");
            let url = self.markets_url(&format!(
                "ids={}&per_page={MAX_PER_PAGE}",
                urlencoding::encode(&joined)
            ));
            quotes.extend(self.fetch(&url).await?);
        }
        debug!(requested = ids.len(), returned = quotes.len(), "CoinGecko market data");
        Ok(quotes)
    }

    async fn top_assets(&self, limit: usize) -> Result<Vec<MarketQuote>, FeedError> {
        let mut quotes = Vec::with_capacity(limit);
        let mut page = 1;
        while quotes.len() < limit {
            let per_page = (limit - quotes.len()).min(MAX_PER_PAGE);
            let url = self.markets_url(&format!(
                "order=market_cap_desc&per_page={per_page}&page={page}"
            ));
            let batch = self.fetch(&url).await?;
            let exhausted = batch.len() < per_page;
            quotes.extend(batch);
            if exhausted {
                break;
            }
            page += 1;
        }
        quotes.truncate(limit);
        Ok(quotes)
    }
}
