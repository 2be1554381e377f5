// =============================================================================
// Binance REST API Client — public kline history
// =============================================================================
//
// Only the unsigned `GET /api/v3/klines` endpoint is used.  An API key, when
// configured, is sent as `X-MBX-APIKEY` so requests are attributed to the
// account; it is never logged or serialized.
//
// A lookback longer than one page (1000 klines) is fetched by walking
// `endTime` backwards from now, bounded by `max_pages`.  When the cap cuts a
// fetch short it is the oldest part of the lookback that goes missing, never
// the newest candles.
// =============================================================================

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use tracing::{debug, instrument, warn};

use crate::binance::rate_limit::RateLimitTracker;
use crate::market_data::{Candle, MarketDataSource};
use crate::types::Interval;

/// Request weight of one klines call.
const KLINES_WEIGHT: u32 = 2;

const DEFAULT_BASE_URL: &str = "https://api.binance.com";

/// Binance REST API client for market data.
#[derive(Clone)]
pub struct BinanceClient {
    base_url: String,
    client: reqwest::Client,
    rate_limit: Arc<RateLimitTracker>,
    page_limit: u32,
    max_pages: u32,
}

impl BinanceClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Create a new `BinanceClient`.
    ///
    /// * `api_key` — optional Binance API key (empty string means anonymous).
    /// * `page_limit` — klines per request, Binance caps this at 1000.
    /// * `max_pages` — most requests one `get_candles` call may issue.
    pub fn new(api_key: &str, page_limit: u32, max_pages: u32) -> Result<Self> {
        let mut default_headers = HeaderMap::new();
        if !api_key.is_empty() {
            let val = HeaderValue::from_str(api_key).context("API key is not a valid header value")?;
            default_headers.insert("X-MBX-APIKEY", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build reqwest client")?;

        debug!(base_url = DEFAULT_BASE_URL, "BinanceClient initialised");

        Ok(Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            client,
            rate_limit: Arc::new(RateLimitTracker::new()),
            page_limit: page_limit.clamp(1, 1000),
            max_pages: max_pages.max(1),
        })
    }

    /// Point the client at another REST endpoint (testnet or a test double).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn rate_limit(&self) -> Arc<RateLimitTracker> {
        Arc::clone(&self.rate_limit)
    }

    /// Current UNIX timestamp in milliseconds.
    pub fn timestamp_ms() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    }

    // -------------------------------------------------------------------------
    // Public market data
    // -------------------------------------------------------------------------

    /// GET /api/v3/klines for the `limit` most recent klines opening at or
    /// before `end_time` (ms), oldest first.
    #[instrument(skip(self), name = "binance::get_klines")]
    pub async fn get_klines(
        &self,
        symbol: &str,
        interval: Interval,
        end_time: i64,
        limit: u32,
    ) -> Result<Vec<Candle>> {
        if !self.rate_limit.can_send_request(KLINES_WEIGHT) {
            anyhow::bail!("local rate-limit budget exhausted, skipping klines for {symbol}");
        }

        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&endTime={}&limit={}",
            self.base_url, symbol, interval, end_time, limit
        );

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /api/v3/klines request failed")?;

        self.rate_limit.update_from_headers(resp.headers());

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse klines response")?;

        if !status.is_success() {
            anyhow::bail!(
                "Binance GET /api/v3/klines returned {}: {}",
                status,
                body
            );
        }

        let candles = parse_klines(&body)?;
        debug!(symbol, %interval, count = candles.len(), "klines fetched");
        Ok(candles)
    }
}

#[async_trait]
impl MarketDataSource for BinanceClient {
    async fn get_candles(
        &self,
        symbol: &str,
        interval: Interval,
        lookback: Duration,
    ) -> Result<Vec<Candle>> {
        let now = Self::timestamp_ms();
        let start_time = now.saturating_sub(i64::try_from(lookback.as_millis()).unwrap_or(i64::MAX));
        let mut end_time = now;
        let mut pages: Vec<Vec<Candle>> = Vec::new();

        for page in 0..self.max_pages {
            let batch = self
                .get_klines(symbol, interval, end_time, self.page_limit)
                .await?;
            let full_page = batch.len() as u32 >= self.page_limit;

            let Some(first) = batch.first() else { break };
            let reached_start = first.open_time <= start_time;
            end_time = first.open_time - 1;
            pages.push(batch);

            if !full_page || reached_start {
                break;
            }
            if page + 1 == self.max_pages {
                warn!(symbol, %interval, pages = self.max_pages, "kline pagination cap reached, oldest history dropped");
            }
        }

        // Pages were fetched newest first.
        Ok(pages
            .into_iter()
            .rev()
            .flatten()
            .filter(|c| c.open_time >= start_time)
            .collect())
    }
}

// -----------------------------------------------------------------------------
// Response parsing
// -----------------------------------------------------------------------------

/// Parse Binance's array-of-arrays kline response.
///
/// Array indices:
///   [0] openTime, [1] open, [2] high, [3] low, [4] close, [5] volume,
///   [6] closeTime, [7..] quote volume, trade count, taker volumes (unused)
fn parse_klines(body: &serde_json::Value) -> Result<Vec<Candle>> {
    let raw = body.as_array().context("klines response is not an array")?;

    let mut candles = Vec::with_capacity(raw.len());

    for entry in raw {
        let arr = entry.as_array().context("kline entry is not an array")?;

        if arr.len() < 7 {
            warn!("skipping malformed kline entry with {} elements", arr.len());
            continue;
        }

        let open_time = arr[0].as_i64().context("kline openTime is not an integer")?;
        let open = parse_str_f64(&arr[1])?;
        let high = parse_str_f64(&arr[2])?;
        let low = parse_str_f64(&arr[3])?;
        let close = parse_str_f64(&arr[4])?;
        let volume = parse_str_f64(&arr[5])?;
        let close_time = arr[6].as_i64().context("kline closeTime is not an integer")?;

        candles.push(Candle::new(open_time, open, high, low, close, volume, close_time));
    }

    Ok(candles)
}

/// Parse a JSON value that may be either a string or a number into `f64`.
fn parse_str_f64(val: &serde_json::Value) -> Result<f64> {
    if let Some(s) = val.as_str() {
        s.parse::<f64>()
            .with_context(|| format!("failed to parse '{s}' as f64"))
    } else if let Some(n) = val.as_f64() {
        Ok(n)
    } else {
        anyhow::bail!("expected string or number, got: {val}")
    }
}

impl std::fmt::Debug for BinanceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceClient")
            .field("base_url", &self.base_url)
            .field("page_limit", &self.page_limit)
            .field("max_pages", &self.max_pages)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_binance_kline_rows() {
        let body = serde_json::json!([
            [1_700_000_000_000_i64, "100.0", "101.5", "99.5", "101.0", "12.5",
             1_700_000_899_999_i64, "1262.5", 42, "6.0", "606.0", "0"],
            [1_700_000_900_000_i64, "101.0", "102.0", "100.0", "100.5", "8",
             1_700_001_799_999_i64, "804", 17, "3", "301.5", "0"]
        ]);
        let candles = parse_klines(&body).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].open_time, 1_700_000_000_000);
        assert_eq!(candles[0].close, 101.0);
        assert_eq!(candles[1].volume, 8.0);
        assert_eq!(candles[1].close_time, 1_700_001_799_999);
    }

    #[test]
    fn short_rows_are_skipped() {
        let body = serde_json::json!([[1, "1", "1"]]);
        assert!(parse_klines(&body).unwrap().is_empty());
    }

    #[test]
    fn non_numeric_price_is_an_error() {
        let body = serde_json::json!([[1, "x", "1", "1", "1", "1", 2]]);
        assert!(parse_klines(&body).is_err());
    }

    #[test]
    fn error_object_is_not_an_array() {
        let body = serde_json::json!({ "code": -1121, "msg": "Invalid symbol." });
        assert!(parse_klines(&body).is_err());
    }

    #[test]
    fn numeric_prices_are_accepted() {
        assert_eq!(parse_str_f64(&serde_json::json!(3.5)).unwrap(), 3.5);
        assert_eq!(parse_str_f64(&serde_json::json!("3.5")).unwrap(), 3.5);
        assert!(parse_str_f64(&serde_json::json!(null)).is_err());
    }

    #[test]
    fn page_limit_is_clamped() {
        let client = BinanceClient::new("", 5000, 0).unwrap();
        assert_eq!(client.page_limit, 1000);
        assert_eq!(client.max_pages, 1);
    }

    // ---- paging against a local klines endpoint -------------------------

    const MINUTE_MS: i64 = 60_000;

    /// Serves an unbounded 1m history: the `limit` klines up to `endTime`.
    async fn klines_server() -> String {
        use axum::{extract::Query, routing::get, Json, Router};
        use std::collections::HashMap;

        async fn klines(Query(q): Query<HashMap<String, String>>) -> Json<serde_json::Value> {
            let end: i64 = q["endTime"].parse().unwrap();
            let limit: i64 = q["limit"].parse().unwrap();
            let last_open = end - end.rem_euclid(MINUTE_MS);
            let first_open = last_open - (limit - 1) * MINUTE_MS;
            let rows: Vec<serde_json::Value> = (0..limit)
                .map(|i| {
                    let t = first_open + i * MINUTE_MS;
                    let close = format!("{}", 100 + i % 7);
                    serde_json::json!([t, "100", "107", "99", close, "1", t + MINUTE_MS - 1])
                })
                .collect();
            Json(serde_json::Value::from(rows))
        }

        let app = Router::new().route("/api/v3/klines", get(klines));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    fn assert_ordered_and_fresh(candles: &[Candle]) {
        assert!(candles.windows(2).all(|w| w[1].open_time == w[0].open_time + MINUTE_MS));
        let newest = candles.last().unwrap().open_time;
        assert!(BinanceClient::timestamp_ms() - newest < 2 * MINUTE_MS);
    }

    #[tokio::test]
    async fn capped_fetch_keeps_newest_candles() {
        let base = klines_server().await;
        let client = BinanceClient::new("", 1000, 5).unwrap().with_base_url(base);

        let lookback = Duration::from_secs(6_003 * 60);
        let candles = client
            .get_candles("BTCUSDT", Interval::OneMinute, lookback)
            .await
            .unwrap();

        assert_eq!(candles.len(), 5000);
        assert_ordered_and_fresh(&candles);
    }

    #[tokio::test]
    async fn fetch_stops_at_lookback_start() {
        let base = klines_server().await;
        let client = BinanceClient::new("", 1000, 5).unwrap().with_base_url(base);

        let lookback = Duration::from_secs(2 * 86_400);
        let started = BinanceClient::timestamp_ms();
        let candles = client
            .get_candles("ETHUSDT", Interval::OneMinute, lookback)
            .await
            .unwrap();

        assert!((2879..=2881).contains(&candles.len()), "got {}", candles.len());
        assert!(candles[0].open_time >= started - 2 * 86_400_000 - MINUTE_MS);
        assert_ordered_and_fresh(&candles);
    }
}
