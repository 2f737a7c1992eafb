// Core modules
pub mod config;
pub mod db;
pub mod error;
pub mod execution;
pub mod indicators;
pub mod models;
pub mod params;
pub mod pipeline;
pub mod ports;
pub mod steps;

// Re-export commonly used types
pub use error::ServiceError;
pub use models::*;
pub use pipeline::{StepResult, TradingContext, TradingStep};

// Error handling
pub type Result<T> = std::result::Result<T, ServiceError>;
