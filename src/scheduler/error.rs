//! Error types for the scheduler module

use std::fmt;

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Scheduler-specific errors
#[derive(Debug)]
pub enum SchedulerError {
    /// The item store rejected an operation
    Store {
        operation: String,
        reason: String,
    },

    /// The scheduler was asked to run after shutdown
    ShutDown,
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store { operation, reason } => {
                write!(f, "Store error during '{}': {}", operation, reason)
            }
            Self::ShutDown => write!(f, "Scheduler is shut down"),
        }
    }
}

impl std::error::Error for SchedulerError {}

impl SchedulerError {
    /// Create a store error with the failing operation
    pub fn store(operation: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Store {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    /// Check if the error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Store { .. })
    }
}
