// =============================================================================
// Rate-Limit Tracker — keeps kline polling under the Binance weight budget
// =============================================================================
//
// Binance allows 6000 request weight per minute per IP on the spot API; we
// hard-cap ourselves well below that since the sentinel may share an IP with
// other tools.
//
// The tracker reads the `X-MBX-USED-WEIGHT-1M` response header after every
// request and keeps an atomic counter any task may query lock-free.  Binance
// resets that counter at every wall-clock minute, so a reading is only
// trusted within the minute it was reported in; after that the budget is
// considered free again and the next request refreshes it.
// =============================================================================

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use tracing::{debug, warn};

/// Hard ceiling at which we refuse to send additional requests.
const WEIGHT_HARD_LIMIT: u32 = 1000;
/// Soft warning threshold.
const WEIGHT_WARN_THRESHOLD: u32 = 800;

/// Thread-safe rate-limit tracker backed by atomic counters.
pub struct RateLimitTracker {
    used_weight_1m: AtomicU32,
    /// Unix minute in which `used_weight_1m` was reported.
    weight_minute: AtomicI64,
    blocked_requests: AtomicU64,
}

fn current_minute() -> i64 {
    Utc::now().timestamp().div_euclid(60)
}

/// Immutable snapshot of the current rate-limit state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    pub used_weight_1m: u32,
    pub blocked_requests: u64,
}

impl RateLimitTracker {
    pub fn new() -> Self {
        Self {
            used_weight_1m: AtomicU32::new(0),
            weight_minute: AtomicI64::new(i64::MIN),
            blocked_requests: AtomicU64::new(0),
        }
    }

    /// Update the weight counter from Binance response headers.
    pub fn update_from_headers(&self, headers: &reqwest::header::HeaderMap) {
        let weight = headers
            .get("X-MBX-USED-WEIGHT-1M")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u32>().ok());

        if let Some(w) = weight {
            self.record_weight(w, current_minute());
        }
    }

    fn record_weight(&self, w: u32, minute: i64) {
        let prev = self.weight_at(minute);
        self.weight_minute.store(minute, Ordering::Relaxed);
        self.used_weight_1m.store(w, Ordering::Relaxed);
        if w >= WEIGHT_WARN_THRESHOLD && prev < WEIGHT_WARN_THRESHOLD {
            warn!(
                used_weight = w,
                hard_limit = WEIGHT_HARD_LIMIT,
                "rate-limit weight crossed warning threshold"
            );
        }
        debug!(used_weight_1m = w, "rate-limit weight updated from header");
    }

    /// Return `true` if `weight` more request weight stays under the hard
    /// limit.  A refusal is counted and logged.
    pub fn can_send_request(&self, weight: u32) -> bool {
        self.can_send_request_at(weight, current_minute())
    }

    /// Weight used in `minute`; a reading from an earlier minute has expired.
    fn weight_at(&self, minute: i64) -> u32 {
        if self.weight_minute.load(Ordering::Relaxed) == minute {
            self.used_weight_1m.load(Ordering::Relaxed)
        } else {
            0
        }
    }

    fn can_send_request_at(&self, weight: u32, minute: i64) -> bool {
        let current = self.weight_at(minute);
        let allowed = current.saturating_add(weight) <= WEIGHT_HARD_LIMIT;
        if !allowed {
            self.blocked_requests.fetch_add(1, Ordering::Relaxed);
            warn!(
                current_weight = current,
                requested_weight = weight,
                hard_limit = WEIGHT_HARD_LIMIT,
                "request blocked — would exceed rate-limit"
            );
        }
        allowed
    }

    pub fn snapshot(&self) -> RateLimitSnapshot {
        RateLimitSnapshot {
            used_weight_1m: self.weight_at(current_minute()),
            blocked_requests: self.blocked_requests.load(Ordering::Relaxed),
        }
    }
}

impl Default for RateLimitTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RateLimitTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitTracker")
            .field("used_weight_1m", &self.used_weight_1m.load(Ordering::Relaxed))
            .field("blocked_requests", &self.blocked_requests.load(Ordering::Relaxed))
            .finish()
    }
}
