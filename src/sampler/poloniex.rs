use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use crate::error::FetchError;
use crate::model::TickerSnapshot;
use crate::notification::{market_pair, percent_display};
use crate::sampler::Sampler;

pub const POLONIEX_BASE_URL: &str = "https://poloniex.com";
const EXCHANGE: &str = "poloniex";

pub struct PoloniexSampler {
    client: reqwest::Client,
    base_url: String,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
}

impl PoloniexSampler {
    /// `timeout` bounds each request end to end; `requests_per_second` is
    /// shared by every watcher using this sampler.
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        requests_per_second: NonZeroU32,
    ) -> Result<Self, Report<FetchError>> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .change_context(network_error())
            .attach("failed to build HTTP client")?;
        let base_url: String = base_url.into();

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            rate_limiter: Arc::new(RateLimiter::direct(Quota::per_second(requests_per_second))),
        })
    }

    fn ticker_url(&self) -> String {
        format!("{}/public", self.base_url)
    }
}

impl Sampler for PoloniexSampler {
    fn name(&self) -> &'static str {
        EXCHANGE
    }

    fn fetch(&self, instrument: &str) -> BoxFuture<'_, Result<TickerSnapshot, Report<FetchError>>> {
        let instrument = instrument.to_owned();
        Box::pin(async move {
            // Wait for rate limiter before making the request
            self.rate_limiter.until_ready().await;

            let url = self.ticker_url();
            let response = self
                .client
                .get(&url)
                .query(&[("command", "returnTicker")])
                .send()
                .await
                .change_context(network_error())
                .attach_with(|| format!("url: {url}"))?;

            if response.status() != StatusCode::OK {
                return Err(Report::new(network_error())
                    .attach(format!("HTTP status: {}", response.status())));
            }

            let body = response
                .bytes()
                .await
                .change_context(network_error())
                .attach("failed to read response body")?;

            let tickers: serde_json::Map<String, serde_json::Value> =
                serde_json::from_slice(&body).change_context(malformed_data())?;

            debug!(instrument = %instrument, pairs = tickers.len(), "poloniex ticker received");

            parse_ticker(&instrument, tickers)
        })
    }
}

fn network_error() -> FetchError {
    FetchError::Network {
        exchange: EXCHANGE.into(),
    }
}

fn malformed_data() -> FetchError {
    FetchError::MalformedData {
        exchange: EXCHANGE.into(),
    }
}

/// Pick `instrument`'s entry out of a `returnTicker` response.
fn parse_ticker(
    instrument: &str,
    mut tickers: serde_json::Map<String, serde_json::Value>,
) -> Result<TickerSnapshot, Report<FetchError>> {
    let pair = market_pair(instrument);

    let raw = tickers.remove(&pair).ok_or_else(|| {
        Report::new(FetchError::NotFound {
            exchange: EXCHANGE.into(),
            pair: pair.clone(),
        })
    })?;

    let raw: PoloniexTicker = serde_json::from_value(raw)
        .change_context(malformed_data())
        .attach_with(|| format!("pair: {pair}"))?;

    raw.into_snapshot(instrument)
        .attach_with(|| format!("pair: {pair}"))
}

fn parse_decimal(field: &str, value: &str) -> Result<Decimal, Report<FetchError>> {
    Decimal::from_str(value)
        .change_context(malformed_data())
        .attach_with(|| format!("{field}: {value:?}"))
}

// ── REST response types ───────────────────────────────────────────────────────

/// Numeric fields arrive as strings so they can be parsed without going
/// through binary floating point.
#[derive(Debug, Deserialize)]
struct PoloniexTicker {
    last: String,
    #[serde(rename = "percentChange")]
    percent_change: String,
    #[serde(rename = "baseVolume")]
    base_volume: String,
    #[serde(rename = "high24hr")]
    high_24hr: String,
    #[serde(rename = "low24hr")]
    low_24hr: String,
}

impl PoloniexTicker {
    fn into_snapshot(self, instrument: &str) -> Result<TickerSnapshot, Report<FetchError>> {
        let percent_change = parse_decimal("percentChange", &self.percent_change)?;
        if percent_display(percent_change).is_none() {
            return Err(Report::new(malformed_data())
                .attach(format!("percentChange out of range: {:?}", self.percent_change)));
        }

        Ok(TickerSnapshot {
            instrument: instrument.to_owned(),
            last: parse_decimal("last", &self.last)?,
            volume: parse_decimal("baseVolume", &self.base_volume)?,
            high_24h: parse_decimal("high24hr", &self.high_24hr)?,
            low_24h: parse_decimal("low24hr", &self.low_24hr)?,
            percent_change_24h: percent_change,
            fetched_at: Utc::now(),
        })
    }
}
