//! Scrape jobs and the bounded worker pool
//!
//! A job fetches new items for one term, persists them, recomputes the
//! term's interval from fresh samples and puts the term back on the queue.
//! The re-add happens in a drop guard, so a term is rescheduled whether the
//! job succeeds, fails or panics.

use anyhow::{Context, Result};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::estimate::RateEstimator;
use super::queue::TaskQueue;
use crate::config::Config;
use crate::crawler::{collect_new, ContentSource};
use crate::metrics;
use crate::models::{ScrapeOutcome, Term};
use crate::storage::ItemStore;
use crate::utils::retry::Backoff;

/// Everything a scrape job needs. Shared read-only between jobs.
pub struct JobContext {
    pub store: Arc<dyn ItemStore>,
    pub source: Arc<dyn ContentSource>,
    pub queue: Arc<TaskQueue>,
    pub estimator: RateEstimator,
    pub backoff: Backoff,
    pub sample_window: usize,
    pub fallback_interval: Duration,
}

impl JobContext {
    pub fn new(
        config: &Config,
        store: Arc<dyn ItemStore>,
        source: Arc<dyn ContentSource>,
        queue: Arc<TaskQueue>,
    ) -> Self {
        Self {
            store,
            source,
            queue,
            estimator: RateEstimator::new(config.estimator.clone()),
            backoff: Backoff::new(config.backoff.clone()),
            sample_window: config.scheduler.sample_window,
            fallback_interval: config.scheduler.fallback_interval(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Scrape one term: fetch new items, persist them and compute the next
/// interval.
///
/// Items fetched before a fatal error are still persisted, then the error is
/// returned.
pub async fn scrape_term(ctx: &JobContext, term: &Term) -> Result<ScrapeOutcome> {
    let known_ids = ctx
        .store
        .known_ids(term)
        .await
        .with_context(|| format!("Failed to load known ids for '{term}'"))?;

    let (items, fetch_error) =
        collect_new(ctx.source.as_ref(), term, &known_ids, &ctx.backoff).await;

    let persisted = if items.is_empty() {
        0
    } else {
        ctx.store
            .persist_items(term, &items)
            .await
            .with_context(|| format!("Failed to persist {} items for '{term}'", items.len()))?
    };
    metrics::record_items_persisted(persisted);

    if let Some(err) = fetch_error {
        return Err(anyhow::Error::new(err))
            .with_context(|| format!("Fetch for '{term}' aborted after {} items", items.len()));
    }

    let samples = ctx
        .store
        .recent_samples(term, ctx.sample_window)
        .await
        .with_context(|| format!("Failed to load samples for '{term}'"))?;

    let polls_per_day = ctx.estimator.estimate(&samples);
    Ok(ScrapeOutcome {
        new_items: items.len(),
        persisted,
        polls_per_day,
        interval: super::estimate::interval_from_polls(polls_per_day),
    })
}

/// Puts a term back on the queue when dropped
struct RescheduleGuard {
    queue: Arc<TaskQueue>,
    term: Term,
    interval: Duration,
}

impl RescheduleGuard {
    fn new(queue: Arc<TaskQueue>, term: Term, fallback: Duration) -> Self {
        Self {
            queue,
            term,
            interval: fallback,
        }
    }
}

impl Drop for RescheduleGuard {
    fn drop(&mut self) {
        let due = Instant::now() + self.interval;
        self.queue.add(self.term.clone(), due);
        tracing::debug!(
            term = %self.term,
            interval_secs = self.interval.as_secs(),
            "Term rescheduled"
        );
    }
}

/// Run a scrape job and reschedule the term afterwards
pub async fn run_job(ctx: &JobContext, term: Term) {
    let mut guard = RescheduleGuard::new(
        Arc::clone(&ctx.queue),
        term.clone(),
        ctx.fallback_interval,
    );
    let started = Instant::now();

    match scrape_term(ctx, &term).await {
        Ok(outcome) => {
            tracing::info!(
                term = %term,
                new_items = outcome.new_items,
                persisted = outcome.persisted,
                polls_per_day = outcome.polls_per_day,
                interval_secs = outcome.interval.as_secs(),
                "Scrape finished"
            );
            guard.interval = outcome.interval;
            metrics::record_job(true, started.elapsed());
        }
        Err(e) => {
            tracing::error!(
                term = %term,
                error = format!("{e:#}"),
                retry_in_secs = ctx.fallback_interval.as_secs(),
                "Scrape failed, using fallback interval"
            );
            metrics::record_job(false, started.elapsed());
        }
    }
}

/// Bounded pool of scrape jobs
///
/// `submit` never waits: jobs are spawned immediately and wait for one of
/// the pool's permits before doing any work. Once `shutdown` closes the
/// pool, jobs that never got a permit are skipped and their term stays
/// scheduled at the fallback interval.
pub struct WorkerPool {
    ctx: Arc<JobContext>,
    permits: Arc<Semaphore>,
    size: usize,
    jobs: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(ctx: Arc<JobContext>, size: usize) -> Self {
        let size = size.max(1);
        Self {
            ctx,
            permits: Arc::new(Semaphore::new(size)),
            size,
            jobs: Mutex::new(Vec::new()),
        }
    }

    pub fn context(&self) -> &Arc<JobContext> {
        &self.ctx
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Spawn a job for `term`
    pub fn submit(&self, term: Term) {
        if self.permits.is_closed() {
            tracing::warn!(term = %term, "Pool is shut down, scrape skipped");
            drop(RescheduleGuard::new(
                Arc::clone(&self.ctx.queue),
                term,
                self.ctx.fallback_interval,
            ));
            return;
        }

        let ctx = Arc::clone(&self.ctx);
        let permits = Arc::clone(&self.permits);

        let handle = tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                // pool closed: skip the scrape but keep the term scheduled
                drop(RescheduleGuard::new(
                    Arc::clone(&ctx.queue),
                    term,
                    ctx.fallback_interval,
                ));
                return;
            };
            run_job(&ctx, term).await;
        });

        let mut jobs = self.lock_jobs();
        jobs.retain(|job| !job.is_finished());
        jobs.push(handle);
    }

    /// Jobs spawned and not yet finished
    pub fn in_flight(&self) -> usize {
        self.lock_jobs()
            .iter()
            .filter(|job| !job.is_finished())
            .count()
    }

    /// Jobs currently holding a permit
    pub fn active(&self) -> usize {
        self.size - self.permits.available_permits()
    }

    /// Stop accepting work and wait for every submitted job to finish.
    /// Returns the number drained.
    pub async fn shutdown(&self) -> usize {
        self.permits.close();
        let jobs: Vec<JoinHandle<()>> = std::mem::take(&mut *self.lock_jobs());
        let count = jobs.len();

        for job in jobs {
            if let Err(e) = job.await {
                if e.is_panic() {
                    tracing::error!(error = %e, "Scrape job panicked");
                } else {
                    tracing::warn!(error = %e, "Scrape job cancelled");
                }
            }
        }

        count
    }

    fn lock_jobs(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }
}
