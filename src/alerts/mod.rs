// =============================================================================
// Alerts — hysteresis tracking and notification text
// =============================================================================

pub mod message;
pub mod status;

pub use message::{format_alert, AlertEvent};
pub use status::{AlertKind, StatusTracker, Transition};
