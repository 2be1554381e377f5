// =============================================================================
// Runtime Configuration — Engine cadence and I/O settings
// =============================================================================
//
// Every tunable of the monitoring engine lives here so that cadence can be
// changed without touching the algorithm.  Per-subscriber settings (watchlist,
// thresholds) are NOT here; they live in the subscriber store.
//
// The file is operator-edited and read once at startup; the process never
// writes it.  All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
//
// =============================================================================

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_startup_delay_secs() -> u64 {
    15
}

fn default_symbol_delay_secs() -> u64 {
    5
}

fn default_tick_delay_secs() -> u64 {
    60
}

fn default_lookback_days() -> u64 {
    2
}

fn default_fetch_timeout_secs() -> u64 {
    20
}

fn default_delivery_timeout_secs() -> u64 {
    10
}

fn default_max_klines_per_request() -> u32 {
    1000
}

fn default_max_pages_per_fetch() -> u32 {
    5
}

fn default_data_file() -> PathBuf {
    PathBuf::from("user_data.json")
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration for the sentinel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Cadence -------------------------------------------------------------

    /// Delay before the first tick, lets the rest of the process come up.
    #[serde(default = "default_startup_delay_secs")]
    pub startup_delay_secs: u64,

    /// Pause after every symbol (exchange rate-limit courtesy).
    #[serde(default = "default_symbol_delay_secs")]
    pub symbol_delay_secs: u64,

    /// Pause between two full ticks.
    #[serde(default = "default_tick_delay_secs")]
    pub tick_delay_secs: u64,

    // --- Market data ---------------------------------------------------------

    /// Minimum history requested per fetch, regardless of granularity.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u64,

    /// Upper bound on one symbol's market-data fetch (all pages).
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Upper bound on one alert delivery.
    #[serde(default = "default_delivery_timeout_secs")]
    pub delivery_timeout_secs: u64,

    /// Binance caps `limit` at 1000 klines per request.
    #[serde(default = "default_max_klines_per_request")]
    pub max_klines_per_request: u32,

    /// Hard cap on pagination so a huge lookback cannot stall a tick.
    #[serde(default = "default_max_pages_per_fetch")]
    pub max_pages_per_fetch: u32,

    // --- Persistence ---------------------------------------------------------

    /// Subscriber document location.
    #[serde(default = "default_data_file")]
    pub data_file: PathBuf,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            startup_delay_secs: default_startup_delay_secs(),
            symbol_delay_secs: default_symbol_delay_secs(),
            tick_delay_secs: default_tick_delay_secs(),
            lookback_days: default_lookback_days(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            delivery_timeout_secs: default_delivery_timeout_secs(),
            max_klines_per_request: default_max_klines_per_request(),
            max_pages_per_fetch: default_max_pages_per_fetch(),
            data_file: default_data_file(),
        }
    }
}

impl RuntimeConfig {
    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }

    pub fn symbol_delay(&self) -> Duration {
        Duration::from_secs(self.symbol_delay_secs)
    }

    pub fn tick_delay(&self) -> Duration {
        Duration::from_secs(self.tick_delay_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs)
    }

    pub fn min_lookback(&self) -> Duration {
        Duration::from_secs(self.lookback_days * 24 * 60 * 60)
    }

    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            tick_delay_secs = config.tick_delay_secs,
            symbol_delay_secs = config.symbol_delay_secs,
            "runtime config loaded"
        );

        Ok(config)
    }
}
