// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free indicator math.  Public functions return `Option<T>`
// so callers are forced to handle the insufficient-data case, which is a
// normal "not ready yet" condition rather than an error.

pub mod rsi;

pub use rsi::latest_rsi;
