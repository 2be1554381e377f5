// =============================================================================
// Notification sinks
// =============================================================================

pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::ParseMode;

pub use telegram::TelegramSink;

/// Fire-and-forget delivery of a text notification to one subscriber.
///
/// Failures are reported to the caller, which logs and drops them; nothing
/// retries synchronously.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, subscriber: &str, text: &str, parse_mode: ParseMode) -> Result<()>;
}
