//! Adaptive per-term scheduling
//!
//! Every tracked term is polled at a rate derived from how fast new items
//! show up for it. The moving parts:
//!
//! ```text
//!  ┌────────────┐ due term  ┌────────────┐  fetch_new   ┌──────────────┐
//!  │ TaskQueue  │──────────▶│ WorkerPool │─────────────▶│ContentSource │
//!  └─────▲──────┘           └─────┬──────┘              └──────────────┘
//!        │                        │ persist / samples
//!        │   re-add with          ▼
//!        │   new interval   ┌────────────┐   samples   ┌──────────────┐
//!        └──────────────────│    job     │◀───────────▶│  ItemStore   │
//!                           └─────┬──────┘             └──────────────┘
//!                                 │
//!                          RateEstimator
//! ```
//!
//! # Modules
//!
//! - [`estimate`] - polls-per-day from recent samples
//! - [`queue`] - due-time ordered queue with per-term membership
//! - [`worker`] - scrape jobs and the bounded pool that runs them
//! - [`runner`] - the dispatch loop and its stop handle
//!
//! # Invariants
//!
//! - A term is either queued or inside exactly one running job, never both.
//!   Only a finishing job puts its term back.
//! - A failing or panicking job still re-adds its term, using the fallback
//!   interval (300s by default).
//! - Two dispatches are always at least `dispatch_spacing` apart.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tidewatch::config::Config;
//! use tidewatch::scheduler::{JobContext, Scheduler, TaskQueue};
//!
//! let config = Config::load(None)?;
//! let ctx = JobContext::new(&config, store, source, Arc::new(TaskQueue::new()));
//! let mut scheduler = Scheduler::new(&config, ctx);
//!
//! scheduler.setup().await?;
//! let handle = scheduler.handle();
//! tokio::spawn(async move {
//!     tokio::signal::ctrl_c().await.ok();
//!     handle.stop();
//! });
//! scheduler.run().await?;
//! ```

pub mod error;
pub mod estimate;
pub mod queue;
pub mod runner;
pub mod worker;

pub use error::{SchedulerError, SchedulerResult};
pub use estimate::{interval_from_polls, RateEstimator, SECONDS_PER_DAY};
pub use queue::{Task, TaskQueue};
pub use runner::{Scheduler, SchedulerHandle};
pub use worker::{run_job, scrape_term, JobContext, WorkerPool};
