// Core modules
pub mod config;
pub mod db;
pub mod error;
pub mod exchange;
pub mod execution;
pub mod models;
pub mod persistence;
pub mod signal;

// Re-export commonly used types
pub use error::{BotError, ConfigError, ExchangeError, StoreError};
pub use models::*;
pub use signal::{Signal, SignalEvaluator, SignalRegistry};

// Error handling
pub type Result<T> = std::result::Result<T, BotError>;
