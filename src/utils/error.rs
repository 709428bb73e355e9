//! Error types for remote fetching
//!
//! Every call against the content source reports failures through
//! [`FetchError`]. The variants are the classification the backoff wrapper
//! dispatches on, so adapters must pick the variant carefully.

use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

/// Wait used when a rate-limit message carries no parsable duration
pub const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_secs(60);

/// Errors that can occur while talking to the content source
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The source asked us to slow down for a given duration
    #[error("Rate limited, retry after {}s", wait.as_secs())]
    RateLimited { wait: Duration },

    /// Connection-level failure (connect, timeout, reset)
    #[error("Transient network error: {0}")]
    Transient(String),

    /// Retryable upstream failure without a wait hint (5xx and friends)
    #[error("Upstream error: {0}")]
    Backoff(String),

    /// Anything that will not get better by retrying
    #[error("Fatal fetch error: {0}")]
    Fatal(String),
}

impl FetchError {
    /// Build a rate-limit error from a human readable message such as
    /// `"Take a break for 5 minutes before trying again."`
    pub fn rate_limited_from_message(message: &str, default_wait: Duration) -> Self {
        Self::RateLimited {
            wait: parse_rate_limit_wait(message).unwrap_or(default_wait),
        }
    }

    /// Classify a reqwest error
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::from_status(status.as_u16(), &err.to_string());
        }

        if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
            Self::Transient(err.to_string())
        } else {
            Self::Fatal(err.to_string())
        }
    }

    /// Classify a non-success HTTP status
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            429 => Self::rate_limited_from_message(body, DEFAULT_RATE_LIMIT_WAIT),
            500 | 502 | 503 | 504 => Self::Backoff(format!("HTTP {status}")),
            _ => Self::Fatal(format!("HTTP {status}")),
        }
    }

    /// Whether the backoff wrapper should absorb this error
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Fatal(_))
    }

    /// Short label used for logging and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::Transient(_) => "transient",
            Self::Backoff(_) => "backoff",
            Self::Fatal(_) => "fatal",
        }
    }
}

/// Extract a wait duration from a rate-limit message.
///
/// Understands `"<n> minute(s)"` and `"<n> second(s)"`. Returns `None` when
/// neither is present or the number does not fit in a `Duration`.
pub fn parse_rate_limit_wait(message: &str) -> Option<Duration> {
    static MINUTES_RE: OnceLock<Regex> = OnceLock::new();
    static SECONDS_RE: OnceLock<Regex> = OnceLock::new();

    let minutes =
        MINUTES_RE.get_or_init(|| Regex::new(r"(\d+)\s+minute").expect("Invalid regex pattern"));
    if let Some(caps) = minutes.captures(message) {
        return caps[1]
            .parse::<u64>()
            .ok()
            .and_then(|n| n.checked_mul(60))
            .map(Duration::from_secs);
    }

    let seconds =
        SECONDS_RE.get_or_init(|| Regex::new(r"(\d+)\s+second").expect("Invalid regex pattern"));
    if let Some(caps) = seconds.captures(message) {
        return caps[1].parse::<u64>().ok().map(Duration::from_secs);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minutes() {
        let wait = parse_rate_limit_wait("Take a break for 5 minutes before trying again.");
        assert_eq!(wait, Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_parse_single_minute() {
        assert_eq!(
            parse_rate_limit_wait("try again in 1 minute"),
            Some(Duration::from_secs(60))
        );
    }

    #[test]
    fn test_parse_seconds() {
        assert_eq!(
            parse_rate_limit_wait("try again in 9 seconds"),
            Some(Duration::from_secs(9))
        );
    }

    #[test]
    fn test_unparsable_falls_back() {
        let err = FetchError::rate_limited_from_message("slow down", DEFAULT_RATE_LIMIT_WAIT);
        assert_eq!(
            err,
            FetchError::RateLimited {
                wait: Duration::from_secs(60)
            }
        );
    }

    #[test]
    fn test_oversized_minutes_fall_back_to_default() {
        let message = "try again in 1000000000000000000 minutes";
        assert_eq!(parse_rate_limit_wait(message), None);
        assert_eq!(
            FetchError::rate_limited_from_message(message, Duration::from_secs(90)),
            FetchError::RateLimited {
                wait: Duration::from_secs(90)
            }
        );
    }

    #[test]
    fn test_unparsable_number_falls_back() {
        // more digits than u64 holds
        let message = "try again in 99999999999999999999999 seconds";
        assert_eq!(parse_rate_limit_wait(message), None);
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            FetchError::from_status(429, ""),
            FetchError::RateLimited { .. }
        ));
        assert!(matches!(
            FetchError::from_status(503, ""),
            FetchError::Backoff(_)
        ));
        assert!(matches!(
            FetchError::from_status(403, ""),
            FetchError::Fatal(_)
        ));
    }

    #[test]
    fn test_is_retryable() {
        assert!(FetchError::Transient("reset".into()).is_retryable());
        assert!(FetchError::Backoff("HTTP 502".into()).is_retryable());
        assert!(!FetchError::Fatal("HTTP 404".into()).is_retryable());
    }
}
