// =============================================================================
// Status Tracker — three-state RSI hysteresis per (subscriber, symbol)
// =============================================================================
//
//            value > overbought                value < oversold
//   normal ──────────────────────► overbought ◄──────────────► oversold
//     ▲      (alert)                  │          (alert both ways)   │
//     └───────────────────────────────┴──────────────────────────────┘
//              oversold <= value <= overbought (silent reset)
//
// Each reading is compared against the previously stored state only; there is
// no requirement to pass through `normal` between the two extremes.  Staying
// in an extreme across polls never re-alerts.
//
// State is process-lifetime only and created lazily as `normal`.
// =============================================================================

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::types::{AlertState, PairKey};

/// Which extreme an emitted alert is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Overbought,
    Oversold,
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Overbought => write!(f, "overbought"),
            Self::Oversold => write!(f, "oversold"),
        }
    }
}

/// Outcome of one `evaluate` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub previous: AlertState,
    pub current: AlertState,
    pub alert: Option<AlertKind>,
}

/// Classify a reading against the threshold pair.
///
/// The overbought test runs first, so an inverted pair (oversold >= overbought)
/// degrades deterministically instead of panicking.
pub fn classify(value: f64, overbought: f64, oversold: f64) -> AlertState {
    if value > overbought {
        AlertState::Overbought
    } else if value < oversold {
        AlertState::Oversold
    } else {
        AlertState::Normal
    }
}

/// Per-pair alert state shared between the monitor and the API.
#[derive(Debug, Default)]
pub struct StatusTracker {
    states: Mutex<HashMap<PairKey, AlertState>>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare `value` against the stored state for `key`, store the new state
    /// and report whether an alert must be delivered.
    ///
    /// The read, decision and write happen under one lock acquisition.
    pub fn evaluate(
        &self,
        key: &PairKey,
        value: f64,
        overbought: f64,
        oversold: f64,
    ) -> Transition {
        let current = classify(value, overbought, oversold);

        let previous = {
            let mut states = self.states.lock();
            let slot = states.entry(key.clone()).or_default();
            std::mem::replace(slot, current)
        };

        let alert = match current {
            AlertState::Overbought if previous != AlertState::Overbought => {
                Some(AlertKind::Overbought)
            }
            AlertState::Oversold if previous != AlertState::Oversold => Some(AlertKind::Oversold),
            _ => None,
        };

        if previous != current {
            debug!(pair = %key, from = %previous, to = %current, value, "alert state changed");
        }

        Transition {
            previous,
            current,
            alert,
        }
    }

    /// Stored state for `key`; pairs never evaluated read as `normal`.
    pub fn get(&self, key: &PairKey) -> AlertState {
        self.states.lock().get(key).copied().unwrap_or_default()
    }

    /// Drop the state of a pair that is no longer watched.
    pub fn forget(&self, key: &PairKey) -> Option<AlertState> {
        self.states.lock().remove(key)
    }

    /// Copy of every tracked pair.
    pub fn snapshot(&self) -> Vec<(PairKey, AlertState)> {
        let states = self.states.lock();
        states.iter().map(|(k, v)| (k.clone(), *v)).collect()
    }
}
