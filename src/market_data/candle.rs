use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::Interval;

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// A single OHLCV candle as returned by the kline REST endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn new(
        open_time: i64,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
        close_time: i64,
    ) -> Self {
        Self {
            open_time,
            close_time,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

/// Extract close prices from a slice of candles (oldest first).
pub fn close_prices(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close).collect()
}

// ---------------------------------------------------------------------------
// MarketDataSource
// ---------------------------------------------------------------------------

/// Anything that can hand back a time-ordered candle history for a symbol.
///
/// Errors are transient by contract (network, rate limit, malformed body); the
/// caller skips the symbol for the current tick and tries again on the next.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Return candles covering at least `lookback` of wall-clock time up to
    /// now, oldest first.
    async fn get_candles(
        &self,
        symbol: &str,
        interval: Interval,
        lookback: Duration,
    ) -> Result<Vec<Candle>>;
}
