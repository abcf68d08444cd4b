//! Binance market-data module
//! Fetches kline close series and spot ticker prices from the public REST API

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::indicators::RSI_PERIOD;

/// Configuration constants
const KLINE_LIMIT: usize = RSI_PERIOD + 1; // candles requested per series
const MAX_ATTEMPTS: u32 = 3;               // retry budget, original attempt included
const RETRY_DELAY_SECS: u64 = 2;
const REQUEST_TIMEOUT_SECS: u64 = 10;
const BINANCE_BASE_URL: &str = "https://api.binance.com";

/// Market-data port consumed by the signal engine.
///
/// Both reads are idempotent; `None` means "data unavailable this cycle"
/// after the retry budget is spent, never a fatal condition.
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Close prices for `symbol`/`interval`, oldest first.
    async fn closing_prices(&self, symbol: &str, interval: &str) -> Option<Vec<f64>>;

    /// Current ticker price for `symbol`.
    async fn spot_price(&self, symbol: &str) -> Option<f64>;
}

/// Ticker response from the REST API
#[derive(Debug, Deserialize)]
struct TickerResponse {
    #[allow(dead_code)]
    symbol: String,
    price: String,
}

pub struct BinanceClient {
    client: reqwest::Client,
    base_url: String,
}

impl BinanceClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .expect("Failed to create HTTP client"),
            base_url: BINANCE_BASE_URL.to_string(),
        }
    }

    async fn request_klines(&self, symbol: &str, interval: &str) -> Result<Vec<f64>> {
        let url = format!("{}/api/v3/klines", self.base_url);
        let limit = KLINE_LIMIT.to_string();

        let response = self
            .client
            .get(&url)
            .query(&[
                ("symbol", symbol),
                ("interval", interval),
                ("limit", limit.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "klines {} {} returned {}",
                symbol,
                interval,
                response.status()
            ));
        }

        // Rows arrive oldest first; close price is field 4
        let rows: Vec<Vec<serde_json::Value>> = response.json().await?;
        parse_closes(&rows)
    }

    async fn request_ticker(&self, symbol: &str) -> Result<f64> {
        let url = format!("{}/api/v3/ticker/price", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[("symbol", symbol)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("ticker {} returned {}", symbol, response.status()));
        }

        let data: TickerResponse = response.json().await?;
        data.price
            .parse::<f64>()
            .map_err(|e| anyhow!("bad ticker price for {}: {}", symbol, e))
    }
}

#[async_trait]
impl MarketData for BinanceClient {
    async fn closing_prices(&self, symbol: &str, interval: &str) -> Option<Vec<f64>> {
        for attempt in 1..=MAX_ATTEMPTS {
            match self.request_klines(symbol, interval).await {
                Ok(closes) => return Some(closes),
                Err(e) => log_attempt("klines", symbol, attempt, &e),
            }
            if attempt < MAX_ATTEMPTS {
                tokio::time::sleep(Duration::from_secs(RETRY_DELAY_SECS)).await;
            }
        }
        None
    }

    async fn spot_price(&self, symbol: &str) -> Option<f64> {
        for attempt in 1..=MAX_ATTEMPTS {
            match self.request_ticker(symbol).await {
                Ok(price) => return Some(price),
                Err(e) => log_attempt("ticker", symbol, attempt, &e),
            }
            if attempt < MAX_ATTEMPTS {
                tokio::time::sleep(Duration::from_secs(RETRY_DELAY_SECS)).await;
            }
        }
        None
    }
}

/// Extract close prices from raw kline rows (field 4, quoted decimal).
fn parse_closes(rows: &[Vec<serde_json::Value>]) -> Result<Vec<f64>> {
    rows.iter()
        .map(|row| {
            row.get(4)
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<f64>().ok())
                .ok_or_else(|| anyhow!("kline row missing close price"))
        })
        .collect()
}

/// Connection resets get their own log line; handling is identical either way.
fn log_attempt(what: &str, symbol: &str, attempt: u32, err: &anyhow::Error) {
    let text = format!("{:#}", err);
    if text.contains("reset") {
        eprintln!(
            "[BINANCE] connection reset on {} for {} (attempt {}/{})",
            what, symbol, attempt, MAX_ATTEMPTS
        );
    } else {
        eprintln!(
            "[BINANCE] {} for {} failed (attempt {}/{}): {}",
            what, symbol, attempt, MAX_ATTEMPTS, text
        );
    }
}
