// =============================================================================
// SubscriberConfig — per-subscriber watchlist and RSI parameters
// =============================================================================
//
// Field names are the on-disk names of the subscriber document:
//
//   { "<chat id>": { "coins": [...], "active": true, "interval": "15m",
//                    "rsi_period": 14, "rsi_overbought": 70, "rsi_oversold": 30 } }
//
// Thresholds and interval are stored exactly as entered.  Nothing validates
// their ordering or range; a bad pair just never (or always) alerts.
// =============================================================================

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::types::Interval;

fn default_true() -> bool {
    true
}

fn default_interval() -> String {
    Interval::default().as_str().to_string()
}

fn default_rsi_period() -> u32 {
    14
}

fn default_rsi_overbought() -> i64 {
    70
}

fn default_rsi_oversold() -> i64 {
    30
}

/// Settings of one subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriberConfig {
    /// Watchlist in display order, no duplicates.
    #[serde(default)]
    pub coins: Vec<String>,

    /// When false the monitor skips this subscriber but keeps its state.
    #[serde(default = "default_true")]
    pub active: bool,

    /// Kline granularity code, e.g. "15m".
    #[serde(default = "default_interval")]
    pub interval: String,

    /// RSI smoothing window.
    #[serde(default = "default_rsi_period")]
    pub rsi_period: u32,

    #[serde(default = "default_rsi_overbought")]
    pub rsi_overbought: i64,

    #[serde(default = "default_rsi_oversold")]
    pub rsi_oversold: i64,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            coins: Vec::new(),
            active: true,
            interval: default_interval(),
            rsi_period: default_rsi_period(),
            rsi_overbought: default_rsi_overbought(),
            rsi_oversold: default_rsi_oversold(),
        }
    }
}

impl SubscriberConfig {
    /// Parsed kline granularity; fails for codes outside the supported set.
    pub fn interval(&self) -> Result<Interval> {
        self.interval.parse()
    }

    pub fn window(&self) -> usize {
        self.rsi_period as usize
    }

    pub fn overbought(&self) -> f64 {
        self.rsi_overbought as f64
    }

    pub fn oversold(&self) -> f64 {
        self.rsi_oversold as f64
    }

    /// Watchlist with any duplicate entries of a hand-edited document dropped,
    /// first occurrence wins.
    pub fn watchlist(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.coins
            .iter()
            .filter(|c| seen.insert(c.as_str()))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_first_contact_record() {
        let cfg = SubscriberConfig::default();
        assert!(cfg.coins.is_empty());
        assert!(cfg.active);
        assert_eq!(cfg.interval().unwrap(), Interval::FifteenMinutes);
        assert_eq!(cfg.window(), 14);
        assert_eq!(cfg.rsi_overbought, 70);
        assert_eq!(cfg.rsi_oversold, 30);
    }

    #[test]
    fn serialises_with_document_field_names() {
        let cfg = SubscriberConfig {
            coins: vec!["BTCUSDT".into()],
            ..SubscriberConfig::default()
        };
        let value = serde_json::to_value(&cfg).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "coins": ["BTCUSDT"],
                "active": true,
                "interval": "15m",
                "rsi_period": 14,
                "rsi_overbought": 70,
                "rsi_oversold": 30
            })
        );
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let cfg: SubscriberConfig = serde_json::from_str(r#"{ "coins": ["ETHUSDT"] }"#).unwrap();
        assert_eq!(cfg.coins, vec!["ETHUSDT"]);
        assert!(cfg.active);
        assert_eq!(cfg.interval, "15m");
    }

    #[test]
    fn unknown_interval_loads_but_does_not_parse() {
        let cfg: SubscriberConfig = serde_json::from_str(r#"{ "interval": "7m" }"#).unwrap();
        assert_eq!(cfg.interval, "7m");
        assert!(cfg.interval().is_err());
    }

    #[test]
    fn watchlist_drops_duplicates_keeping_order() {
        let cfg = SubscriberConfig {
            coins: vec!["ETHUSDT".into(), "BTCUSDT".into(), "ETHUSDT".into()],
            ..SubscriberConfig::default()
        };
        assert_eq!(cfg.watchlist(), vec!["ETHUSDT", "BTCUSDT"]);
    }
}
