//! Unified error handling for the tidewatch crate
//!
//! Domain modules keep their own error types ([`FetchError`] for remote
//! calls, [`SchedulerError`] for the control loop). [`Error`] wraps them at
//! the binary boundary so callers can decide how to react from one place.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tidewatch::error::{Error, TidewatchError};
//!
//! fn report(err: &Error) {
//!     if err.is_recoverable() {
//!         tracing::warn!(category = ?err.category(), "{err}");
//!     } else {
//!         tracing::error!(category = ?err.category(), "{err}");
//!     }
//! }
//! ```

use thiserror::Error;

pub use crate::scheduler::error::SchedulerError;
pub use crate::utils::error::FetchError;

/// Common interface of tidewatch error types
pub trait TidewatchError: std::error::Error {
    /// Whether retrying the same operation later can succeed
    fn is_recoverable(&self) -> bool;

    /// Error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Remote source errors (HTTP, timeout, rate limit)
    Network,
    /// Database and file errors
    Storage,
    /// Configuration and validation errors
    Config,
    /// Scheduler errors
    Scheduler,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Storage => "storage",
            Self::Config => "config",
            Self::Scheduler => "scheduler",
            Self::Other => "other",
        }
    }
}

impl TidewatchError for FetchError {
    fn is_recoverable(&self) -> bool {
        self.is_retryable()
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Network
    }
}

impl TidewatchError for SchedulerError {
    fn is_recoverable(&self) -> bool {
        SchedulerError::is_recoverable(self)
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Store { .. } => ErrorCategory::Storage,
            Self::ShutDown => ErrorCategory::Scheduler,
        }
    }
}

/// Unified error type for the tidewatch crate
#[derive(Error, Debug)]
pub enum Error {
    /// Remote source errors
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Scheduler errors
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Store and setup failures reported through anyhow
    #[error("{0}")]
    Other(String),
}

impl TidewatchError for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Fetch(e) => e.is_retryable(),
            Self::Scheduler(e) => e.is_recoverable(),
            Self::Config(_) => false,
            Self::Other(_) => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Fetch(_) => ErrorCategory::Network,
            Self::Scheduler(e) => TidewatchError::category(e),
            Self::Config(_) => ErrorCategory::Config,
            Self::Other(_) => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(format!("{err:#}"))
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
