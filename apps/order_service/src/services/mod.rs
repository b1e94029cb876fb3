// order_service/src/services/mod.rs

pub mod notifier;
pub mod seed;

pub use notifier::LogNotifier;
