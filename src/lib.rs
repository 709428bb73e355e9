//! tidewatch - adaptive per-term feed poller
//!
//! Keeps a set of search terms up to date against a remote content source.
//! Each term is polled at a rate derived from how quickly new items appear for
//! it, and each poll stops as soon as it reaches an item that is already
//! stored.
//!
//! # Architecture
//!
//! - [`scheduler`] - rate estimation, task queue, worker pool and dispatch loop
//! - [`crawler`] - content sources (Reddit, scripted) and the dedup-stop stream
//! - [`storage`] - item store trait with SQLite and in-memory implementations
//! - [`config`] - layered configuration (defaults, TOML, environment)
//! - [`metrics`] - Prometheus counters and gauges
//! - [`models`] - terms, items and samples
//! - [`utils`] - fetch errors, retry/backoff policy and small helpers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tidewatch::config::Config;
//! use tidewatch::crawler::RedditSource;
//! use tidewatch::scheduler::{JobContext, Scheduler, TaskQueue};
//! use tidewatch::storage::SqliteItemStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(None)?;
//!     let store = Arc::new(SqliteItemStore::open(&config.database.sqlite_path)?);
//!     let source = Arc::new(RedditSource::new(
//!         config.reddit.clone(),
//!         config.backoff.rate_limit_default(),
//!     )?);
//!
//!     let ctx = JobContext::new(&config, store, source, Arc::new(TaskQueue::new()));
//!     let mut scheduler = Scheduler::new(&config, ctx);
//!     scheduler.setup().await?;
//!     scheduler.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod crawler;
pub mod error;
pub mod metrics;
pub mod models;
pub mod scheduler;
pub mod storage;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::crawler::{ContentSource, RedditSource, ScriptedSource, SearchCursor};
    pub use crate::error::{Error, ErrorCategory, Result, TidewatchError};
    pub use crate::models::{Item, Sample, ScrapeOutcome, Term};
    pub use crate::scheduler::{JobContext, RateEstimator, Scheduler, SchedulerHandle, TaskQueue};
    pub use crate::storage::{ItemStore, MemoryItemStore, SqliteItemStore};
    pub use crate::utils::error::FetchError;
    pub use crate::utils::retry::Backoff;
}

// Direct re-exports for convenience
pub use models::{Item, Sample, Term};
