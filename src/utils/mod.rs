//! Shared utilities: errors, logging, and amount scaling

pub mod error;
pub mod logging;
pub mod units;

pub use error::{ExecutionError, ExecutionErrorKind, LineError, OrchestratorError, Result};
