// =============================================================================
// RSI Monitor Loop — periodic watchlist evaluation
// =============================================================================
//
// Runs as a single background Tokio task for the life of the process:
//   1. Wait `startup_delay` once.
//   2. Every tick, walk the subscribers in id order.  Inactive subscribers are
//      skipped but keep their alert state.
//   3. For each watchlist symbol, in list order:
//        fetch candles (bounded by `fetch_timeout`)
//        → latest RSI (skip quietly when history is too short)
//        → status transition
//        → deliver the alert, if any (bounded by `delivery_timeout`)
//      then sleep `symbol_delay`.
//   4. Sleep `tick_delay` and start over.
//
// A symbol's failure, including a panic inside its processing, is logged with
// subscriber and symbol and never leaves the symbol scope.
//
//   tokio::spawn(Monitor::new(state, source, sink).run());
//
// =============================================================================

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::FutureExt;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::alerts::{format_alert, AlertEvent, AlertKind, Transition};
use crate::app_state::AppState;
use crate::indicators::latest_rsi;
use crate::market_data::MarketDataSource;
use crate::notify::AlertSink;
use crate::runtime_config::RuntimeConfig;
use crate::store::SubscriberConfig;
use crate::types::{Interval, PairKey, ParseMode};

/// Candle-count margin over `window + 1` when sizing the lookback.
const LOOKBACK_MARGIN: u32 = 3;

/// What happened to one symbol in one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SymbolOutcome {
    Evaluated { rsi: f64, transition: Transition },
    InsufficientData { candles: usize },
}

/// Counters for one pass over all subscribers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub subscribers: usize,
    pub inactive: usize,
    pub evaluated: usize,
    pub not_ready: usize,
    pub failed: usize,
    pub alerts: usize,
}

/// Wall-clock history to request: at least `min_lookback`, and enough for
/// `window + 1` candles with a generous margin for exchange gaps.
pub fn lookback_for(interval: Interval, window: usize, min_lookback: Duration) -> Duration {
    let candles = u32::try_from(window.saturating_add(1))
        .unwrap_or(u32::MAX)
        .saturating_mul(LOOKBACK_MARGIN);
    interval.duration().saturating_mul(candles).max(min_lookback)
}

pub struct Monitor {
    state: Arc<AppState>,
    source: Arc<dyn MarketDataSource>,
    sink: Arc<dyn AlertSink>,
}

impl Monitor {
    pub fn new(
        state: Arc<AppState>,
        source: Arc<dyn MarketDataSource>,
        sink: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            state,
            source,
            sink,
        }
    }

    /// Run forever.  Spawn this as a background task.
    pub async fn run(self) {
        let startup_delay = self.state.runtime_config.read().startup_delay();
        info!(startup_delay_secs = startup_delay.as_secs(), "RSI monitor starting");
        sleep(startup_delay).await;

        loop {
            let summary = self.run_tick().await;
            info!(
                subscribers = summary.subscribers,
                evaluated = summary.evaluated,
                not_ready = summary.not_ready,
                failed = summary.failed,
                alerts = summary.alerts,
                "tick complete"
            );

            let tick_delay = self.state.runtime_config.read().tick_delay();
            sleep(tick_delay).await;
        }
    }

    /// One pass over every subscriber's watchlist.
    pub async fn run_tick(&self) -> TickSummary {
        let config = self.state.runtime_config.read().clone();
        let mut summary = TickSummary::default();

        for id in self.state.store.ids() {
            let Some(subscriber) = self.state.store.get(&id) else {
                continue;
            };
            summary.subscribers += 1;

            if !subscriber.active {
                debug!(subscriber = %id, "monitoring paused, skipping subscriber");
                summary.inactive += 1;
                continue;
            }

            let interval = match subscriber.interval() {
                Ok(interval) => interval,
                Err(e) => {
                    warn!(subscriber = %id, error = %e, "unusable interval, skipping subscriber");
                    self.state.push_error(Some(&id), None, format!("{e:#}"));
                    continue;
                }
            };

            for symbol in subscriber.watchlist() {
                let work = self.process_symbol(&config, &id, &symbol, &subscriber, interval);

                match AssertUnwindSafe(work).catch_unwind().await {
                    Ok(Ok(SymbolOutcome::Evaluated { transition, .. })) => {
                        summary.evaluated += 1;
                        if transition.alert.is_some() {
                            summary.alerts += 1;
                        }
                    }
                    Ok(Ok(SymbolOutcome::InsufficientData { .. })) => summary.not_ready += 1,
                    Ok(Err(e)) => {
                        summary.failed += 1;
                        warn!(subscriber = %id, symbol = %symbol, error = %format!("{e:#}"), "symbol evaluation failed");
                        self.state.push_error(Some(&id), Some(&symbol), format!("{e:#}"));
                    }
                    Err(_) => {
                        summary.failed += 1;
                        error!(subscriber = %id, symbol = %symbol, "symbol evaluation panicked");
                        self.state.push_error(
                            Some(&id),
                            Some(&symbol),
                            "symbol evaluation panicked".to_string(),
                        );
                    }
                }

                sleep(config.symbol_delay()).await;
            }
        }

        self.state.mark_tick_complete();
        summary
    }

    async fn process_symbol(
        &self,
        config: &RuntimeConfig,
        id: &str,
        symbol: &str,
        subscriber: &SubscriberConfig,
        interval: Interval,
    ) -> Result<SymbolOutcome> {
        let window = subscriber.window();
        let lookback = lookback_for(interval, window, config.min_lookback());

        let candles = timeout(
            config.fetch_timeout(),
            self.source.get_candles(symbol, interval, lookback),
        )
        .await
        .with_context(|| format!("market data fetch timed out after {:?}", config.fetch_timeout()))?
        .context("market data fetch failed")?;

        let Some(rsi) = latest_rsi(&candles, window) else {
            debug!(subscriber = id, symbol, candles = candles.len(), window, "not enough history yet");
            return Ok(SymbolOutcome::InsufficientData {
                candles: candles.len(),
            });
        };

        let key = PairKey::new(id, symbol);
        self.state.record_reading(key.clone(), rsi);

        let transition =
            self.state
                .tracker
                .evaluate(&key, rsi, subscriber.overbought(), subscriber.oversold());
        debug!(subscriber = id, symbol, rsi, state = %transition.current, "symbol evaluated");

        if let Some(kind) = transition.alert {
            let threshold = match kind {
                AlertKind::Overbought => subscriber.overbought(),
                AlertKind::Oversold => subscriber.oversold(),
            };
            self.deliver(config, id, symbol, kind, rsi, threshold).await;
        }

        Ok(SymbolOutcome::Evaluated { rsi, transition })
    }

    /// Send one alert.  Failures are logged and recorded, never retried.
    async fn deliver(
        &self,
        config: &RuntimeConfig,
        id: &str,
        symbol: &str,
        kind: AlertKind,
        rsi: f64,
        threshold: f64,
    ) {
        let text = format_alert(symbol, kind, rsi, threshold);

        let delivered = match timeout(
            config.delivery_timeout(),
            self.sink.send(id, &text, ParseMode::Markdown),
        )
        .await
        {
            Ok(Ok(())) => {
                info!(subscriber = id, symbol, %kind, rsi, "alert sent");
                true
            }
            Ok(Err(e)) => {
                warn!(subscriber = id, symbol, %kind, error = %format!("{e:#}"), "alert delivery failed");
                self.state
                    .push_error(Some(id), Some(symbol), format!("alert delivery failed: {e:#}"));
                false
            }
            Err(_) => {
                warn!(subscriber = id, symbol, %kind, "alert delivery timed out");
                self.state
                    .push_error(Some(id), Some(symbol), "alert delivery timed out".to_string());
                false
            }
        };

        self.state
            .push_alert(AlertEvent::new(id, symbol, kind, rsi, threshold, delivered));
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use std::collections::{HashMap, VecDeque};

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::binance::RateLimitTracker;
    use crate::market_data::Candle;
    use crate::store::SubscriberStore;
    use crate::types::AlertState;

    const ID: &str = "1001";

    // ---- fakes -----------------------------------------------------------

    /// Hands out queued responses per symbol; an empty queue is an error.
    #[derive(Default)]
    struct ScriptedSource {
        responses: Mutex<HashMap<String, VecDeque<Result<Vec<Candle>>>>>,
        calls: Mutex<Vec<(String, Interval, Duration)>>,
    }

    impl ScriptedSource {
        fn push(&self, symbol: &str, response: Result<Vec<Candle>>) {
            self.responses
                .lock()
                .entry(symbol.to_string())
                .or_default()
                .push_back(response);
        }

        fn calls_for(&self, symbol: &str) -> usize {
            self.calls.lock().iter().filter(|(s, _, _)| s == symbol).count()
        }
    }

    #[async_trait]
    impl MarketDataSource for ScriptedSource {
        async fn get_candles(
            &self,
            symbol: &str,
            interval: Interval,
            lookback: Duration,
        ) -> Result<Vec<Candle>> {
            self.calls.lock().push((symbol.to_string(), interval, lookback));
            if symbol == "PANICUSDT" {
                panic!("exchange client blew up");
            }
            self.responses
                .lock()
                .get_mut(symbol)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| Err(anyhow::anyhow!("no scripted response for {symbol}")))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl AlertSink for RecordingSink {
        async fn send(&self, subscriber: &str, text: &str, _parse_mode: ParseMode) -> Result<()> {
            if self.fail {
                anyhow::bail!("chat unreachable");
            }
            self.sent.lock().push((subscriber.to_string(), text.to_string()));
            Ok(())
        }
    }

    // ---- helpers ---------------------------------------------------------

    /// 15 candles whose 14-period RSI is exactly `rsi`: one gain of `rsi`,
    /// one loss of `100 - rsi`, then a flat tail.
    fn candles_with_rsi(rsi: f64) -> Vec<Candle> {
        let mut closes = vec![1000.0, 1000.0 + rsi, 1000.0 + rsi - (100.0 - rsi)];
        let last = closes[2];
        closes.extend(std::iter::repeat(last).take(12));
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                let t = i as i64 * 900_000;
                Candle::new(t, c, c, c, c, 1.0, t + 899_999)
            })
            .collect()
    }

    fn fast_config() -> RuntimeConfig {
        RuntimeConfig {
            startup_delay_secs: 0,
            symbol_delay_secs: 0,
            tick_delay_secs: 0,
            ..RuntimeConfig::default()
        }
    }

    fn setup(
        coins: &[&str],
        sink: RecordingSink,
    ) -> (Monitor, Arc<AppState>, Arc<ScriptedSource>, Arc<RecordingSink>) {
        let store = Arc::new(SubscriberStore::in_memory());
        store
            .set(
                ID,
                SubscriberConfig {
                    coins: coins.iter().map(|c| c.to_string()).collect(),
                    ..SubscriberConfig::default()
                },
            )
            .unwrap();

        let state = Arc::new(AppState::new(
            fast_config(),
            store,
            Arc::new(RateLimitTracker::new()),
        ));
        let source = Arc::new(ScriptedSource::default());
        let sink = Arc::new(sink);
        let monitor = Monitor::new(state.clone(), source.clone(), sink.clone());
        (monitor, state, source, sink)
    }

    // ---- tests -----------------------------------------------------------

    #[tokio::test]
    async fn overbought_hold_reset_oversold_scenario() {
        let (monitor, state, source, sink) = setup(&["BTCUSDT"], RecordingSink::default());
        let key = PairKey::new(ID, "BTCUSDT");

        for rsi in [75.0, 72.0, 50.0, 25.0] {
            source.push("BTCUSDT", Ok(candles_with_rsi(rsi)));
        }

        let t1 = monitor.run_tick().await;
        assert_eq!(t1.alerts, 1);
        assert_eq!(state.tracker.get(&key), AlertState::Overbought);
        {
            let sent = sink.sent.lock();
            assert_eq!(sent.len(), 1);
            assert_eq!(sent[0].0, ID);
            assert!(sent[0].1.contains("75.00"), "text was {}", sent[0].1);
            assert!(sent[0].1.contains("Overbought"));
        }

        let t2 = monitor.run_tick().await;
        assert_eq!(t2.alerts, 0);
        assert_eq!(state.tracker.get(&key), AlertState::Overbought);
        assert_eq!(sink.sent.lock().len(), 1);

        let t3 = monitor.run_tick().await;
        assert_eq!(t3.alerts, 0);
        assert_eq!(state.tracker.get(&key), AlertState::Normal);
        assert_eq!(sink.sent.lock().len(), 1);

        let t4 = monitor.run_tick().await;
        assert_eq!(t4.alerts, 1);
        assert_eq!(state.tracker.get(&key), AlertState::Oversold);
        let sent = sink.sent.lock();
        assert_eq!(sent.len(), 2);
        assert!(sent[1].1.contains("25.00"));
        assert!(sent[1].1.contains("Oversold"));

        assert_eq!(state.recent_alerts.read().len(), 2);
        assert_eq!(state.tick_count.load(std::sync::atomic::Ordering::Relaxed), 4);
    }

    #[tokio::test]
    async fn failing_symbol_does_not_block_the_next() {
        let (monitor, state, source, sink) =
            setup(&["BADUSDT", "ETHUSDT"], RecordingSink::default());
        source.push("BADUSDT", Err(anyhow::anyhow!("HTTP 429 Too Many Requests")));
        source.push("ETHUSDT", Ok(candles_with_rsi(80.0)));

        let summary = monitor.run_tick().await;
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.evaluated, 1);
        assert_eq!(sink.sent.lock().len(), 1);
        assert!(sink.sent.lock()[0].1.contains("ETHUSDT"));

        let errors = state.recent_errors.read();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].symbol.as_deref(), Some("BADUSDT"));
        assert_eq!(errors[0].subscriber.as_deref(), Some(ID));
        assert!(errors[0].message.contains("429"));
    }

    #[tokio::test]
    async fn panicking_symbol_is_contained() {
        let (monitor, state, source, _sink) =
            setup(&["PANICUSDT", "BTCUSDT"], RecordingSink::default());
        source.push("BTCUSDT", Ok(candles_with_rsi(50.0)));

        let summary = monitor.run_tick().await;
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.evaluated, 1);
        assert_eq!(state.recent_errors.read().len(), 1);
    }

    #[tokio::test]
    async fn short_history_is_not_a_failure() {
        let (monitor, state, source, sink) = setup(&["NEWUSDT"], RecordingSink::default());
        let mut candles = candles_with_rsi(90.0);
        candles.truncate(10);
        source.push("NEWUSDT", Ok(candles));

        let summary = monitor.run_tick().await;
        assert_eq!(summary.not_ready, 1);
        assert_eq!(summary.failed, 0);
        assert!(state.recent_errors.read().is_empty());
        assert!(sink.sent.lock().is_empty());
        assert_eq!(
            state.tracker.get(&PairKey::new(ID, "NEWUSDT")),
            AlertState::Normal
        );
    }

    #[tokio::test]
    async fn pause_and_resume_keeps_alert_state() {
        let (monitor, state, source, sink) = setup(&["BTCUSDT"], RecordingSink::default());
        source.push("BTCUSDT", Ok(candles_with_rsi(75.0)));
        source.push("BTCUSDT", Ok(candles_with_rsi(78.0)));

        monitor.run_tick().await;
        assert_eq!(sink.sent.lock().len(), 1);

        state.store.update(ID, |cfg| cfg.active = false).unwrap();
        let paused = monitor.run_tick().await;
        assert_eq!(paused.inactive, 1);
        assert_eq!(source.calls_for("BTCUSDT"), 1);

        state.store.update(ID, |cfg| cfg.active = true).unwrap();
        let resumed = monitor.run_tick().await;
        assert_eq!(resumed.evaluated, 1);
        assert_eq!(resumed.alerts, 0);
        assert_eq!(sink.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn failed_delivery_still_updates_state() {
        let sink = RecordingSink {
            fail: true,
            ..RecordingSink::default()
        };
        let (monitor, state, source, _sink) = setup(&["BTCUSDT"], sink);
        source.push("BTCUSDT", Ok(candles_with_rsi(75.0)));
        source.push("BTCUSDT", Ok(candles_with_rsi(76.0)));

        let first = monitor.run_tick().await;
        assert_eq!(first.alerts, 1);
        assert_eq!(
            state.tracker.get(&PairKey::new(ID, "BTCUSDT")),
            AlertState::Overbought
        );
        {
            let alerts = state.recent_alerts.read();
            assert_eq!(alerts.len(), 1);
            assert!(!alerts[0].delivered);
        }
        assert_eq!(state.recent_errors.read().len(), 1);

        let second = monitor.run_tick().await;
        assert_eq!(second.alerts, 0);
    }

    #[tokio::test]
    async fn unknown_interval_skips_subscriber() {
        let (monitor, state, source, _sink) = setup(&["BTCUSDT"], RecordingSink::default());
        state
            .store
            .update(ID, |cfg| cfg.interval = "7m".to_string())
            .unwrap();

        let summary = monitor.run_tick().await;
        assert_eq!(summary.evaluated, 0);
        assert_eq!(source.calls_for("BTCUSDT"), 0);
        assert_eq!(state.recent_errors.read().len(), 1);
    }

    #[tokio::test]
    async fn fetch_uses_subscriber_interval_and_lookback() {
        let (monitor, state, source, _sink) = setup(&["BTCUSDT"], RecordingSink::default());
        state
            .store
            .update(ID, |cfg| cfg.interval = "1d".to_string())
            .unwrap();
        source.push("BTCUSDT", Ok(candles_with_rsi(50.0)));

        monitor.run_tick().await;
        let calls = source.calls.lock();
        assert_eq!(calls[0].1, Interval::OneDay);
        assert_eq!(calls[0].2, Duration::from_secs(45 * 86_400));
    }

    #[tokio::test]
    async fn subscribers_are_isolated() {
        let (monitor, state, source, sink) = setup(&["BTCUSDT"], RecordingSink::default());
        state
            .store
            .set(
                "2002",
                SubscriberConfig {
                    coins: vec!["BTCUSDT".into()],
                    rsi_overbought: 80,
                    ..SubscriberConfig::default()
                },
            )
            .unwrap();
        source.push("BTCUSDT", Ok(candles_with_rsi(75.0)));
        source.push("BTCUSDT", Ok(candles_with_rsi(75.0)));

        let summary = monitor.run_tick().await;
        assert_eq!(summary.subscribers, 2);
        assert_eq!(summary.alerts, 1);
        assert_eq!(sink.sent.lock()[0].0, ID);
        assert_eq!(
            state.tracker.get(&PairKey::new("2002", "BTCUSDT")),
            AlertState::Normal
        );
    }

    #[test]
    fn lookback_never_below_minimum() {
        let two_days = Duration::from_secs(2 * 86_400);
        assert_eq!(lookback_for(Interval::FifteenMinutes, 14, two_days), two_days);
        assert_eq!(
            lookback_for(Interval::OneWeek, 14, two_days),
            Duration::from_secs(45 * 7 * 86_400)
        );
        assert_eq!(
            lookback_for(Interval::FourHours, 14, two_days),
            Duration::from_secs(45 * 4 * 3_600)
        );
    }
}
