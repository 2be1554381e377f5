// =============================================================================
// Configuration Commands — watchlist and parameter edits
// =============================================================================
//
// Typed versions of the edits a subscriber can make from the chat surface.
// Input normalisation follows what users actually type: symbols are trimmed
// and uppercased, intervals trimmed and lowercased.  Thresholds are accepted
// as given; ordering is never checked.
//
// All mutations go through `SubscriberStore::update`, one field group per
// call.
// =============================================================================

use tracing::info;

use crate::store::{SubscriberConfig, SubscriberStore};
use crate::types::Interval;

/// Reasons a command is refused.
#[derive(Debug)]
pub enum CommandError {
    /// Symbol text is empty or is not a USDT pair.
    InvalidSymbol(String),
    /// Interval text is not one of the supported kline codes.
    InvalidInterval(String),
    /// RSI text is not three comma-separated integers.
    InvalidRsiParams(String),
    /// No settings exist for this id yet.
    UnknownSubscriber(String),
    /// The store could not persist the change.
    Store(anyhow::Error),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidSymbol(s) => {
                write!(f, "invalid symbol '{s}': expected a USDT pair such as BTCUSDT")
            }
            Self::InvalidInterval(s) => write!(
                f,
                "invalid interval '{s}': expected one of {}",
                Interval::ALL.map(|i| i.as_str()).join(", ")
            ),
            Self::InvalidRsiParams(s) => write!(
                f,
                "invalid RSI parameters '{s}': expected period,overbought,oversold e.g. 14,75,25"
            ),
            Self::UnknownSubscriber(id) => write!(f, "no settings for subscriber '{id}'"),
            Self::Store(e) => write!(f, "failed to save settings: {e:#}"),
        }
    }
}

impl std::error::Error for CommandError {}

impl From<anyhow::Error> for CommandError {
    fn from(e: anyhow::Error) -> Self {
        Self::Store(e)
    }
}

pub type CommandResult<T> = Result<T, CommandError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    Added(String),
    AlreadyPresent(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed(String),
    NotPresent(String),
}

/// Normalise a typed symbol; `None` when it is not a USDT pair.
pub fn normalize_symbol(text: &str) -> Option<String> {
    let symbol = text.trim().to_uppercase();
    (!symbol.is_empty() && symbol.contains("USDT")).then_some(symbol)
}

pub fn add_symbol(store: &SubscriberStore, id: &str, text: &str) -> CommandResult<AddOutcome> {
    let symbol =
        normalize_symbol(text).ok_or_else(|| CommandError::InvalidSymbol(text.trim().to_string()))?;

    let outcome = store.update(id, |cfg| {
        if cfg.coins.contains(&symbol) {
            AddOutcome::AlreadyPresent(symbol.clone())
        } else {
            cfg.coins.push(symbol.clone());
            AddOutcome::Added(symbol.clone())
        }
    })?;

    if let AddOutcome::Added(sym) = &outcome {
        info!(subscriber = id, symbol = %sym, "symbol added to watchlist");
    }
    Ok(outcome)
}

pub fn remove_symbol(store: &SubscriberStore, id: &str, symbol: &str) -> CommandResult<RemoveOutcome> {
    let symbol = symbol.trim().to_uppercase();
    if store.get(id).is_none() {
        return Ok(RemoveOutcome::NotPresent(symbol));
    }

    let outcome = store.update(id, |cfg| match cfg.coins.iter().position(|c| *c == symbol) {
        Some(idx) => {
            cfg.coins.remove(idx);
            RemoveOutcome::Removed(symbol.clone())
        }
        None => RemoveOutcome::NotPresent(symbol.clone()),
    })?;

    if let RemoveOutcome::Removed(sym) = &outcome {
        info!(subscriber = id, symbol = %sym, "symbol removed from watchlist");
    }
    Ok(outcome)
}

/// Read-only; an id with no record is reported, not created.
pub fn list_symbols(store: &SubscriberStore, id: &str) -> CommandResult<Vec<String>> {
    Ok(settings(store, id)?.coins)
}

/// Flip the active flag; returns the new value.
pub fn toggle_active(store: &SubscriberStore, id: &str) -> CommandResult<bool> {
    let active = store.update(id, |cfg| {
        cfg.active = !cfg.active;
        cfg.active
    })?;
    info!(subscriber = id, active, "monitoring toggled");
    Ok(active)
}

pub fn set_interval(store: &SubscriberStore, id: &str, text: &str) -> CommandResult<Interval> {
    let code = text.trim().to_lowercase();
    let interval: Interval = code
        .parse()
        .map_err(|_| CommandError::InvalidInterval(code.clone()))?;

    store.update(id, |cfg| cfg.interval = interval.as_str().to_string())?;
    info!(subscriber = id, %interval, "kline interval updated");
    Ok(interval)
}

/// Parse `"period,overbought,oversold"` and store all three together.
pub fn set_rsi(store: &SubscriberStore, id: &str, text: &str) -> CommandResult<(u32, i64, i64)> {
    let params = parse_rsi_params(text)
        .ok_or_else(|| CommandError::InvalidRsiParams(text.trim().to_string()))?;
    let (period, overbought, oversold) = params;

    store.update(id, |cfg| {
        cfg.rsi_period = period;
        cfg.rsi_overbought = overbought;
        cfg.rsi_oversold = oversold;
    })?;
    info!(subscriber = id, period, overbought, oversold, "RSI parameters updated");
    Ok(params)
}

pub fn settings(store: &SubscriberStore, id: &str) -> CommandResult<SubscriberConfig> {
    store
        .get(id)
        .ok_or_else(|| CommandError::UnknownSubscriber(id.to_string()))
}

fn parse_rsi_params(text: &str) -> Option<(u32, i64, i64)> {
    let parts: Vec<&str> = text.trim().split(',').map(str::trim).collect();
    let [period, overbought, oversold] = parts.as_slice() else {
        return None;
    };
    Some((period.parse().ok()?, overbought.parse().ok()?, oversold.parse().ok()?))
}
