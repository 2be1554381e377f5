// =============================================================================
// Alert Message — notification text and the auditable alert record
// =============================================================================

use chrono::Utc;
use serde::Serialize;

use crate::alerts::status::AlertKind;
use crate::types::SubscriberId;

/// Markdown text delivered to the subscriber when a pair enters an extreme.
///
/// The reading is always rendered with two decimals.
pub fn format_alert(symbol: &str, kind: AlertKind, value: f64, threshold: f64) -> String {
    match kind {
        AlertKind::Overbought => format!(
            "🔔 *RSI Overbought* 🔔\n\nSymbol: `{symbol}`\n*Current RSI: {value:.2}* (>{threshold})"
        ),
        AlertKind::Oversold => format!(
            "💰 *RSI Oversold* 💰\n\nSymbol: `{symbol}`\n*Current RSI: {value:.2}* (<{threshold})"
        ),
    }
}

/// Record of one emitted alert, kept for the API and the live feed.
#[derive(Debug, Clone, Serialize)]
pub struct AlertEvent {
    /// Unique identifier (UUID v4).
    pub id: String,
    pub subscriber: SubscriberId,
    pub symbol: String,
    pub kind: AlertKind,
    pub rsi: f64,
    pub threshold: f64,
    /// Whether the sink accepted the message.
    pub delivered: bool,
    /// ISO 8601 timestamp.
    pub created_at: String,
}

impl AlertEvent {
    pub fn new(
        subscriber: impl Into<SubscriberId>,
        symbol: impl Into<String>,
        kind: AlertKind,
        rsi: f64,
        threshold: f64,
        delivered: bool,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            subscriber: subscriber.into(),
            symbol: symbol.into(),
            kind,
            rsi,
            threshold,
            delivered,
            created_at: Utc::now().to_rfc3339(),
        }
    }
}
