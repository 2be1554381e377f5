// =============================================================================
// Central Application State — RSI Sentinel
// =============================================================================
//
// The explicit store object shared by the monitoring loop and the interactive
// API.  Neither side reaches for process-wide globals; both hold an
// `Arc<AppState>`.
//
// Thread safety:
//   - Atomic counters for lock-free version and tick tracking.
//   - parking_lot locks for every mutable collection; no lock is held across
//     an `.await`.
//   - The subscriber store and status tracker manage their own interior
//     mutability.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::alerts::{AlertEvent, StatusTracker};
use crate::binance::{RateLimitSnapshot, RateLimitTracker};
use crate::runtime_config::RuntimeConfig;
use crate::store::SubscriberStore;
use crate::types::{AlertState, PairKey};

// =============================================================================
// Records
// =============================================================================

/// A per-symbol failure kept for the API error log.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscriber: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    /// ISO 8601 timestamp.
    pub at: String,
}

/// Most recent RSI computed for a pair.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Reading {
    pub rsi: f64,
    pub at_ms: i64,
}

// =============================================================================
// AppState
// =============================================================================

const MAX_RECENT_ERRORS: usize = 50;
const MAX_RECENT_ALERTS: usize = 100;
const ALERT_FEED_CAPACITY: usize = 64;

/// Central application state shared across all async tasks via `Arc<AppState>`.
pub struct AppState {
    /// Incremented on every meaningful mutation.
    pub state_version: AtomicU64,

    // ── Configuration ───────────────────────────────────────────────────
    pub runtime_config: Arc<RwLock<RuntimeConfig>>,
    pub store: Arc<SubscriberStore>,

    // ── Monitoring ──────────────────────────────────────────────────────
    pub tracker: Arc<StatusTracker>,
    pub latest_readings: RwLock<HashMap<PairKey, Reading>>,
    pub tick_count: AtomicU64,
    pub last_tick_at: RwLock<Option<String>>,
    pub rate_limit: Arc<RateLimitTracker>,

    // ── Audit ───────────────────────────────────────────────────────────
    pub recent_alerts: RwLock<Vec<AlertEvent>>,
    pub recent_errors: RwLock<Vec<ErrorRecord>>,
    alert_feed: broadcast::Sender<AlertEvent>,

    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(
        config: RuntimeConfig,
        store: Arc<SubscriberStore>,
        rate_limit: Arc<RateLimitTracker>,
    ) -> Self {
        let (alert_feed, _) = broadcast::channel(ALERT_FEED_CAPACITY);

        Self {
            state_version: AtomicU64::new(1),
            runtime_config: Arc::new(RwLock::new(config)),
            store,
            tracker: Arc::new(StatusTracker::new()),
            latest_readings: RwLock::new(HashMap::new()),
            tick_count: AtomicU64::new(0),
            last_tick_at: RwLock::new(None),
            rate_limit,
            recent_alerts: RwLock::new(Vec::new()),
            recent_errors: RwLock::new(Vec::new()),
            alert_feed,
            start_time: std::time::Instant::now(),
        }
    }

    // ── Version Management ──────────────────────────────────────────────

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Monitoring bookkeeping ──────────────────────────────────────────

    pub fn record_reading(&self, key: PairKey, rsi: f64) {
        let reading = Reading {
            rsi,
            at_ms: Utc::now().timestamp_millis(),
        };
        self.latest_readings.write().insert(key, reading);
    }

    /// Drop alert state and the last reading of a pair that left its
    /// watchlist.
    pub fn forget_pair(&self, key: &PairKey) {
        self.tracker.forget(key);
        self.latest_readings.write().remove(key);
        self.increment_version();
    }

    pub fn mark_tick_complete(&self) {
        self.tick_count.fetch_add(1, Ordering::Relaxed);
        *self.last_tick_at.write() = Some(Utc::now().to_rfc3339());
        self.increment_version();
    }

    // ── Error Logging ───────────────────────────────────────────────────

    /// Record a failure; the ring keeps the last [`MAX_RECENT_ERRORS`].
    pub fn push_error(&self, subscriber: Option<&str>, symbol: Option<&str>, msg: String) {
        let record = ErrorRecord {
            message: msg,
            subscriber: subscriber.map(str::to_string),
            symbol: symbol.map(str::to_string),
            at: Utc::now().to_rfc3339(),
        };

        let mut errors = self.recent_errors.write();
        errors.push(record);
        while errors.len() > MAX_RECENT_ERRORS {
            errors.remove(0);
        }
        drop(errors);

        self.increment_version();
    }

    // ── Alert Audit ─────────────────────────────────────────────────────

    /// Record an emitted alert and publish it to live feed subscribers.
    pub fn push_alert(&self, event: AlertEvent) {
        {
            let mut alerts = self.recent_alerts.write();
            alerts.push(event.clone());
            while alerts.len() > MAX_RECENT_ALERTS {
                alerts.remove(0);
            }
        }

        // No receivers is fine; the feed is best-effort.
        let _ = self.alert_feed.send(event);
        self.increment_version();
    }

    pub fn subscribe_alerts(&self) -> broadcast::Receiver<AlertEvent> {
        self.alert_feed.subscribe()
    }

    // ── Snapshot Builder ────────────────────────────────────────────────

    /// Serialisable view of the whole engine for `GET /api/v1/state`.
    pub fn build_snapshot(&self) -> StateSnapshot {
        let readings = self.latest_readings.read();

        let mut pairs: Vec<PairStatus> = self
            .tracker
            .snapshot()
            .into_iter()
            .map(|(key, state)| {
                let reading = readings.get(&key).copied();
                PairStatus {
                    subscriber: key.subscriber,
                    symbol: key.symbol,
                    state,
                    rsi: reading.map(|r| r.rsi),
                    updated_at_ms: reading.map(|r| r.at_ms),
                }
            })
            .collect();
        pairs.sort_by(|a, b| (&a.subscriber, &a.symbol).cmp(&(&b.subscriber, &b.symbol)));

        StateSnapshot {
            state_version: self.current_state_version(),
            server_time: Utc::now().timestamp_millis(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            tick_count: self.tick_count.load(Ordering::Relaxed),
            last_tick_at: self.last_tick_at.read().clone(),
            subscribers: self.store.len(),
            pairs,
            recent_alerts: self.recent_alerts.read().clone(),
            recent_errors: self.recent_errors.read().clone(),
            rate_limit: self.rate_limit.snapshot(),
            runtime_config: self.runtime_config.read().clone(),
        }
    }
}

// =============================================================================
// Serialisable snapshot types
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub state_version: u64,
    pub server_time: i64,
    pub uptime_secs: u64,
    pub tick_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_tick_at: Option<String>,
    pub subscribers: usize,
    pub pairs: Vec<PairStatus>,
    pub recent_alerts: Vec<AlertEvent>,
    pub recent_errors: Vec<ErrorRecord>,
    pub rate_limit: RateLimitSnapshot,
    pub runtime_config: RuntimeConfig,
}

/// Alert state plus the latest reading of one pair.
#[derive(Debug, Clone, Serialize)]
pub struct PairStatus {
    pub subscriber: String,
    pub symbol: String,
    pub state: AlertState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rsi: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at_ms: Option<i64>,
}
