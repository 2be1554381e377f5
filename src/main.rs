// =============================================================================
// RSI Sentinel — Main Entry Point
// =============================================================================
//
// Polls Binance klines for every subscriber's watchlist, tracks each pair's
// RSI zone and sends a Telegram message when a pair enters overbought or
// oversold territory.  Settings are edited through the REST API.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod alerts;
mod api;
mod app_state;
mod binance;
mod commands;
mod indicators;
mod market_data;
mod monitor;
mod notify;
mod runtime_config;
mod store;
mod types;

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::binance::BinanceClient;
use crate::monitor::Monitor;
use crate::notify::TelegramSink;
use crate::runtime_config::RuntimeConfig;
use crate::store::SubscriberStore;

const RUNTIME_CONFIG_PATH: &str = "runtime_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        RSI Sentinel — Starting Up                       ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config = RuntimeConfig::load(RUNTIME_CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });

    let bot_token = std::env::var("TELEGRAM_BOT_TOKEN")
        .ok()
        .filter(|t| !t.is_empty())
        .context("TELEGRAM_BOT_TOKEN must be set")?;

    // ── 2. Subscriber store ──────────────────────────────────────────────
    let store = Arc::new(
        SubscriberStore::load(&config.data_file)
            .with_context(|| format!("failed to open {}", config.data_file.display()))?,
    );

    // The bot's own chat is the first subscriber; it starts with defaults.
    if let Ok(chat_id) = std::env::var("TELEGRAM_CHAT_ID") {
        let chat_id = chat_id.trim();
        if !chat_id.is_empty() {
            store.get_or_create(chat_id)?;
            info!(subscriber = chat_id, "first-contact subscriber ready");
        }
    }
    info!(subscribers = store.len(), file = %config.data_file.display(), "Subscriber store loaded");

    // ── 3. Collaborators ─────────────────────────────────────────────────
    let api_key = std::env::var("BINANCE_API_KEY").unwrap_or_default();
    let mut binance_client = BinanceClient::new(
        &api_key,
        config.max_klines_per_request,
        config.max_pages_per_fetch,
    )?;
    if let Ok(url) = std::env::var("BINANCE_API_URL") {
        binance_client = binance_client.with_base_url(url);
    }
    let binance_client = Arc::new(binance_client);

    let mut sink = TelegramSink::new(bot_token)?;
    if let Ok(url) = std::env::var("TELEGRAM_API_URL") {
        sink = sink.with_base_url(url);
    }
    let sink = Arc::new(sink);

    // ── 4. Build shared state ────────────────────────────────────────────
    let state = Arc::new(AppState::new(config, store, binance_client.rate_limit()));

    // ── 5. Monitoring loop ───────────────────────────────────────────────
    let monitor = Monitor::new(state.clone(), binance_client, sink);
    tokio::spawn(monitor.run());

    // ── 6. Start the API server ──────────────────────────────────────────
    let api_state = state.clone();
    let bind_addr =
        std::env::var("SENTINEL_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".into());

    tokio::spawn(async move {
        let app = api::rest::router(api_state);
        let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(addr = %bind_addr, error = %e, "Failed to bind API server");
                return;
            }
        };
        info!(addr = %bind_addr, "API server listening");
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server failed");
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 7. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    info!("RSI Sentinel shut down complete.");
    Ok(())
}
