//! Scheduler control loop
//!
//! A single loop drains the [`TaskQueue`] into the [`WorkerPool`]. Each turn
//! is in one of three states:
//!
//! - **Idle**: the queue is empty, sleep briefly and look again
//! - **Waiting**: the earliest task is not due yet, sleep until it is
//! - **Dispatching**: the earliest task is due, hand it to the pool and then
//!   sleep for the global dispatch spacing
//!
//! Jobs re-add their own term when they finish, so the loop never waits on a
//! job. Stopping is cooperative: [`SchedulerHandle::stop`] interrupts any
//! sleep, the loop exits and in-flight jobs are drained.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use super::error::{SchedulerError, SchedulerResult};
use super::estimate::RateEstimator;
use super::queue::TaskQueue;
use super::worker::{JobContext, WorkerPool};
use crate::config::{Config, SchedulerConfig};
use crate::metrics;
use crate::models::Term;
use crate::storage::{filter_super_terms, ItemStore};

/// Loop state for one turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Idle,
    Waiting(Instant),
    Dispatching,
}

/// Stops a running [`Scheduler`]
#[derive(Clone)]
pub struct SchedulerHandle {
    stop_tx: Arc<watch::Sender<bool>>,
}

impl SchedulerHandle {
    /// Ask the loop to stop. In-flight jobs still finish.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }
}

/// Adaptive per-term scheduler
pub struct Scheduler {
    config: SchedulerConfig,
    queue: Arc<TaskQueue>,
    store: Arc<dyn ItemStore>,
    estimator: RateEstimator,
    pool: WorkerPool,
    stop_tx: Arc<watch::Sender<bool>>,
    stop_rx: watch::Receiver<bool>,
}

impl Scheduler {
    /// Build a scheduler around a job context. The queue and store are the
    /// ones the jobs use.
    pub fn new(config: &Config, ctx: JobContext) -> Self {
        let queue = Arc::clone(&ctx.queue);
        let store = Arc::clone(&ctx.store);
        let estimator = ctx.estimator.clone();
        let pool = WorkerPool::new(Arc::new(ctx), config.scheduler.workers);
        let (stop_tx, stop_rx) = watch::channel(false);

        Self {
            config: config.scheduler.clone(),
            queue,
            store,
            estimator,
            pool,
            stop_tx: Arc::new(stop_tx),
            stop_rx,
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            stop_tx: Arc::clone(&self.stop_tx),
        }
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Load tracked terms and queue them with staggered first due-times.
    ///
    /// Terms are ranked by interval, shortest first, and term `i` of `n`
    /// becomes due `interval * i / n` from now so startup does not fire every
    /// term at once. A term whose samples cannot be loaded is queued at the
    /// fallback interval instead. Returns the number of terms queued.
    pub async fn setup(&self) -> SchedulerResult<usize> {
        let terms = self
            .store
            .list_terms()
            .await
            .map_err(|e| SchedulerError::store("list_terms", format!("{e:#}")))?;

        let terms = filter_super_terms(&terms);
        if terms.is_empty() {
            tracing::warn!("No search terms to schedule");
            return Ok(0);
        }

        let now = Instant::now();
        let mut planned: Vec<(Duration, Term)> = Vec::with_capacity(terms.len());
        let mut deferred = 0;
        for term in terms {
            match self
                .store
                .recent_samples(&term, self.config.sample_window)
                .await
            {
                Ok(samples) => planned.push((self.estimator.interval_for(&samples), term)),
                Err(e) => {
                    tracing::warn!(
                        term = %term,
                        error = format!("{e:#}"),
                        retry_in_secs = self.config.fallback_interval_secs,
                        "Failed to load samples, using fallback interval"
                    );
                    self.queue.add(term, now + self.config.fallback_interval());
                    deferred += 1;
                }
            }
        }
        planned.sort();

        let ranked = planned.len();
        for (rank, (interval, term)) in planned.into_iter().enumerate() {
            let offset = interval * rank as u32 / ranked as u32;
            tracing::debug!(
                term = %term,
                interval_secs = interval.as_secs(),
                first_due_in_secs = offset.as_secs(),
                "Scheduling term"
            );
            self.queue.add(term, now + offset);
        }

        let total = ranked + deferred;
        metrics::set_queue_depth(self.queue.len());
        tracing::info!(terms = total, deferred, "Scheduler setup complete");
        Ok(total)
    }

    /// Run the loop until stopped, then drain in-flight jobs
    pub async fn run(&mut self) -> SchedulerResult<()> {
        if *self.stop_rx.borrow() {
            return Err(SchedulerError::ShutDown);
        }

        tracing::info!(
            workers = self.pool.size(),
            spacing_secs = self.config.dispatch_spacing().as_secs(),
            "Scheduler started"
        );

        loop {
            let running = match self.state() {
                LoopState::Idle => {
                    tracing::trace!("Queue empty");
                    self.pause_until(Instant::now() + self.config.idle_poll(), true)
                        .await
                }
                LoopState::Waiting(due) => self.pause_until(due, true).await,
                LoopState::Dispatching => {
                    self.dispatch();
                    self.pause_until(Instant::now() + self.config.dispatch_spacing(), false)
                        .await
                }
            };

            if !running {
                break;
            }
        }

        tracing::info!(in_flight = self.pool.in_flight(), "Scheduler stopping, draining jobs");
        let drained = self.pool.shutdown().await;
        metrics::set_queue_depth(self.queue.len());
        tracing::info!(drained, "Scheduler stopped");
        Ok(())
    }

    fn state(&self) -> LoopState {
        match self.queue.peek_due() {
            None => LoopState::Idle,
            Some(due) if due > Instant::now() => LoopState::Waiting(due),
            Some(_) => LoopState::Dispatching,
        }
    }

    fn dispatch(&self) {
        let Some(task) = self.queue.pop_due() else {
            return;
        };

        let late = Instant::now().saturating_duration_since(task.due);
        tracing::info!(term = %task.term, late_ms = late.as_millis() as u64, "Dispatching scrape");

        self.pool.submit(task.term);
        metrics::record_dispatch();
        metrics::set_queue_depth(self.queue.len());
    }

    /// Sleep until `deadline`. With `wake_on_queue`, a task added ahead of
    /// the current head cuts the sleep short. Returns `false` once stopped.
    async fn pause_until(&mut self, deadline: Instant, wake_on_queue: bool) -> bool {
        if *self.stop_rx.borrow_and_update() {
            return false;
        }

        let queue = Arc::clone(&self.queue);
        let head_changed = async move {
            if wake_on_queue {
                queue.head_changed().await;
            } else {
                std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => true,
            _ = head_changed => true,
            // only `stop` ever changes the value
            _ = self.stop_rx.changed() => false,
        }
    }
}
