// =============================================================================
// Subscriber configuration store
// =============================================================================

pub mod file_store;
pub mod subscriber;

pub use file_store::SubscriberStore;
pub use subscriber::SubscriberConfig;
