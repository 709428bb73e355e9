//! Configuration management for tidewatch
//!
//! Configuration is fixed at process start. Values are layered: built-in
//! defaults, then an optional TOML file, then environment variables (a
//! `.env` file in the working directory is loaded first when present).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::error::DEFAULT_RATE_LIMIT_WAIT;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Dispatch loop and worker pool settings
    pub scheduler: SchedulerConfig,

    /// Poll-rate estimation settings
    pub estimator: EstimatorConfig,

    /// Retry and backoff settings for remote calls
    pub backoff: BackoffConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Reddit API configuration
    pub reddit: RedditConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Dispatch loop and worker pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of concurrent scrape jobs
    pub workers: usize,

    /// Minimum spacing between two dispatch decisions, in seconds
    pub dispatch_spacing_secs: u64,

    /// Sleep while the queue is empty, in milliseconds
    pub idle_poll_ms: u64,

    /// Interval used to reschedule a term after a failed job, in seconds
    pub fallback_interval_secs: u64,

    /// Number of most recent items used to estimate a term's velocity
    pub sample_window: usize,
}

/// Poll-rate estimation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Lower bound on polls per day for any term
    pub min_scrapes_per_day: u32,

    /// Upper bound on polls per day for any term
    pub max_scrapes_per_day: u32,

    /// Headroom factor against sudden bursts
    pub buffer_multiplier: f64,

    /// How many new items one poll is assumed to retrieve
    pub items_per_poll: f64,
}

/// Retry and backoff settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// First delay of the exponential backoff, in seconds
    pub base_delay_secs: u64,

    /// Cap on the exponential backoff delay, in seconds
    pub max_delay_secs: u64,

    /// Fixed delay after a transient network error, in seconds
    pub transient_delay_secs: u64,

    /// Wait used when a rate-limit signal carries no duration, in seconds
    pub rate_limit_default_secs: u64,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database path
    pub sqlite_path: PathBuf,
}

/// Reddit API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedditConfig {
    /// OAuth client id
    pub client_id: String,

    /// OAuth client secret
    pub client_secret: String,

    /// User agent string
    pub user_agent: String,

    /// API base URL
    pub api_base: String,

    /// Token endpoint base URL
    pub auth_base: String,

    /// Request budget per minute
    pub requests_per_minute: u32,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,

    /// Page size for search listings (Reddit caps this at 100)
    pub page_size: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            dispatch_spacing_secs: 5,
            idle_poll_ms: 1000,
            fallback_interval_secs: 300,
            sample_window: 50,
        }
    }
}

impl SchedulerConfig {
    /// Minimum spacing between dispatches
    #[must_use]
    pub fn dispatch_spacing(&self) -> Duration {
        Duration::from_secs(self.dispatch_spacing_secs)
    }

    /// Sleep while idle
    #[must_use]
    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    /// Reschedule interval after a failed job
    #[must_use]
    pub fn fallback_interval(&self) -> Duration {
        Duration::from_secs(self.fallback_interval_secs)
    }
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            min_scrapes_per_day: 1,
            max_scrapes_per_day: 500,
            buffer_multiplier: 2.0,
            items_per_poll: 250.0,
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: 2,
            max_delay_secs: 300,
            transient_delay_secs: 5,
            rate_limit_default_secs: DEFAULT_RATE_LIMIT_WAIT.as_secs(),
        }
    }
}

impl BackoffConfig {
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        Duration::from_secs(self.base_delay_secs)
    }

    #[must_use]
    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_secs)
    }

    #[must_use]
    pub fn transient_delay(&self) -> Duration {
        Duration::from_secs(self.transient_delay_secs)
    }

    #[must_use]
    pub fn rate_limit_default(&self) -> Duration {
        Duration::from_secs(self.rate_limit_default_secs)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("data/tidewatch.db"),
        }
    }
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            user_agent: format!("tidewatch/{}", env!("CARGO_PKG_VERSION")),
            api_base: String::from("https://oauth.reddit.com"),
            auth_base: String::from("https://www.reddit.com"),
            requests_per_minute: 60,
            request_timeout_secs: 30,
            page_size: 100,
        }
    }
}

impl RedditConfig {
    /// Get request timeout as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Whether OAuth credentials are present
    pub fn has_credentials(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

impl Config {
    /// Load configuration: defaults, then optional file, then environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        // A missing .env file is not an error
        let _ = dotenvy::dotenv();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate().context("Invalid configuration")?;

        Ok(config)
    }

    /// Load configuration from environment variables on top of defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env();
        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Override values from environment variables
    pub fn apply_env(&mut self) {
        env_parse("TIDEWATCH_WORKERS", &mut self.scheduler.workers);
        env_parse(
            "TIDEWATCH_DISPATCH_SPACING_SECS",
            &mut self.scheduler.dispatch_spacing_secs,
        );
        env_parse(
            "TIDEWATCH_FALLBACK_INTERVAL_SECS",
            &mut self.scheduler.fallback_interval_secs,
        );
        env_parse("TIDEWATCH_SAMPLE_WINDOW", &mut self.scheduler.sample_window);

        env_parse(
            "TIDEWATCH_MIN_SCRAPES_PER_DAY",
            &mut self.estimator.min_scrapes_per_day,
        );
        env_parse(
            "TIDEWATCH_MAX_SCRAPES_PER_DAY",
            &mut self.estimator.max_scrapes_per_day,
        );
        env_parse(
            "TIDEWATCH_BUFFER_MULTIPLIER",
            &mut self.estimator.buffer_multiplier,
        );
        env_parse("TIDEWATCH_ITEMS_PER_POLL", &mut self.estimator.items_per_poll);

        env_parse(
            "TIDEWATCH_BACKOFF_BASE_SECS",
            &mut self.backoff.base_delay_secs,
        );
        env_parse("TIDEWATCH_BACKOFF_MAX_SECS", &mut self.backoff.max_delay_secs);
        env_parse(
            "TIDEWATCH_RATE_LIMIT_DEFAULT_SECS",
            &mut self.backoff.rate_limit_default_secs,
        );

        if let Ok(path) = std::env::var("TIDEWATCH_SQLITE_PATH") {
            self.database.sqlite_path = PathBuf::from(path);
        }

        if let Ok(id) = std::env::var("REDDIT_ID") {
            self.reddit.client_id = id;
        }
        if let Ok(secret) = std::env::var("REDDIT_SECRET") {
            self.reddit.client_secret = secret;
        }
        if let Ok(ua) = std::env::var("REDDIT_UA") {
            self.reddit.user_agent = ua;
        }
        env_parse(
            "TIDEWATCH_REQUESTS_PER_MINUTE",
            &mut self.reddit.requests_per_minute,
        );

        if let Ok(level) = std::env::var("TIDEWATCH_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("TIDEWATCH_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.workers == 0 {
            anyhow::bail!("workers must be greater than 0");
        }

        if self.scheduler.sample_window < 2 {
            anyhow::bail!("sample_window must be at least 2");
        }

        let est = &self.estimator;
        if est.min_scrapes_per_day == 0 {
            anyhow::bail!("min_scrapes_per_day must be greater than 0");
        }
        if est.min_scrapes_per_day > est.max_scrapes_per_day {
            anyhow::bail!(
                "min_scrapes_per_day ({}) exceeds max_scrapes_per_day ({})",
                est.min_scrapes_per_day,
                est.max_scrapes_per_day
            );
        }
        if !(est.buffer_multiplier > 0.0) {
            anyhow::bail!("buffer_multiplier must be positive");
        }
        if !(est.items_per_poll > 0.0) {
            anyhow::bail!("items_per_poll must be positive");
        }

        if self.backoff.base_delay_secs == 0 {
            anyhow::bail!("backoff base delay must be greater than 0");
        }
        if self.backoff.base_delay_secs > self.backoff.max_delay_secs {
            anyhow::bail!("backoff base delay exceeds max delay");
        }

        if self.reddit.requests_per_minute == 0 {
            anyhow::bail!("requests_per_minute must be greater than 0");
        }

        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, target: &mut T) {
    if let Some(value) = std::env::var(key).ok().and_then(|v| v.parse::<T>().ok()) {
        *target = value;
    }
}
