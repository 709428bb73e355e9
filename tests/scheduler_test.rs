//! End-to-end scheduler tests on virtual time
//!
//! The scheduler runs against an in-memory store and a scripted source, with
//! the tokio clock paused so intervals of minutes pass instantly.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tidewatch::config::{BackoffConfig, Config};
use tidewatch::crawler::scripted::Step;
use tidewatch::crawler::ScriptedSource;
use tidewatch::models::{Item, Term};
use tidewatch::scheduler::{JobContext, Scheduler, TaskQueue};
use tidewatch::storage::{ItemStore, MemoryItemStore};
use tidewatch::utils::error::FetchError;
use tidewatch::utils::retry::{Backoff, Sleeper};

struct NoopSleeper;

#[async_trait]
impl Sleeper for NoopSleeper {
    async fn sleep(&self, _duration: Duration) {}
}

fn scheduler(store: Arc<MemoryItemStore>, source: Arc<ScriptedSource>) -> Scheduler {
    let config = Config::default();
    let backoff = Backoff::with_sleeper(BackoffConfig::default(), Arc::new(NoopSleeper));
    let ctx =
        JobContext::new(&config, store, source, Arc::new(TaskQueue::new())).with_backoff(backoff);
    Scheduler::new(&config, ctx)
}

#[tokio::test(start_paused = true)]
async fn test_fast_term_is_polled_again_after_its_interval() {
    let fast = Term::new("fast");
    let slow = Term::new("slow");
    let store = Arc::new(
        MemoryItemStore::new()
            .with_items(&fast, Vec::new())
            .with_items(&slow, Vec::new()),
    );
    // one item per second: clamps to 500 polls/day, a 172.8s interval
    let source = Arc::new(ScriptedSource::new().with_items(
        &fast,
        vec![Item::new("f3", 2), Item::new("f2", 1), Item::new("f1", 0)],
    ));

    let mut sched = scheduler(Arc::clone(&store), Arc::clone(&source));
    assert_eq!(sched.setup().await.unwrap(), 2);
    let queue = Arc::clone(sched.queue());
    let handle = sched.handle();
    let runner = tokio::spawn(async move { sched.run().await });

    tokio::time::sleep(Duration::from_secs(12)).await;
    assert_eq!(source.searches(&fast), 1);
    assert_eq!(source.searches(&slow), 0);
    assert_eq!(store.len(&fast), 3);
    assert!(queue.contains(&fast));

    // new posts arrive; the next poll picks up only those
    source.prepend_items(&fast, vec![Item::new("f4", 3)]);
    tokio::time::sleep(Duration::from_secs(190)).await;
    assert_eq!(source.searches(&fast), 2);
    assert_eq!(store.len(&fast), 4);
    // "f3" was the first known item, so nothing older was pulled
    assert_eq!(source.pulls(&fast), 4 + 2);

    handle.stop();
    runner.await.unwrap().unwrap();
    assert!(queue.contains(&fast));
    assert!(queue.contains(&slow));
}

#[tokio::test(start_paused = true)]
async fn test_failing_term_is_retried_after_fallback() {
    let term = Term::new("broken");
    let store = Arc::new(MemoryItemStore::new().with_items(&term, Vec::new()));
    store.set_fail_persist(true);
    let source = Arc::new(ScriptedSource::new().with_items(&term, vec![Item::new("a", 1)]));

    let mut sched = scheduler(Arc::clone(&store), Arc::clone(&source));
    sched.setup().await.unwrap();
    let queue = Arc::clone(sched.queue());
    let handle = sched.handle();
    let runner = tokio::spawn(async move { sched.run().await });

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(source.searches(&term), 1);
    assert!(queue.contains(&term));

    tokio::time::sleep(Duration::from_secs(295)).await;
    assert_eq!(source.searches(&term), 2);

    // once the store recovers the term goes back to its estimated rate
    store.set_fail_persist(false);
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(source.searches(&term), 3);
    assert_eq!(store.len(&term), 1);

    handle.stop();
    runner.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_fatal_fetch_does_not_stop_other_terms() {
    let bad = Term::new("bad");
    let good = Term::new("good");
    let store = Arc::new(
        MemoryItemStore::new()
            .with_items(&bad, Vec::new())
            .with_items(&good, Vec::new()),
    );
    let source = Arc::new(
        ScriptedSource::new()
            .with_steps(&bad, vec![Step::Fail(FetchError::Fatal("HTTP 403".into()))])
            .with_items(&good, vec![Item::new("g1", 5)]),
    );

    let mut sched = scheduler(Arc::clone(&store), Arc::clone(&source));
    let queue = Arc::clone(sched.queue());
    let now = tokio::time::Instant::now();
    queue.add(bad.clone(), now);
    queue.add(good.clone(), now);

    let handle = sched.handle();
    let runner = tokio::spawn(async move { sched.run().await });

    tokio::time::sleep(Duration::from_secs(8)).await;
    assert_eq!(source.searches(&bad), 1);
    assert_eq!(source.searches(&good), 1);
    assert_eq!(store.len(&good), 1);
    assert!(queue.contains(&bad));

    handle.stop();
    runner.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_terms_added_while_running_are_picked_up() {
    let store = Arc::new(MemoryItemStore::new());
    let source = Arc::new(ScriptedSource::new());

    let mut sched = scheduler(Arc::clone(&store), Arc::clone(&source));
    let queue = Arc::clone(sched.queue());
    let handle = sched.handle();
    let runner = tokio::spawn(async move { sched.run().await });

    tokio::time::sleep(Duration::from_secs(3)).await;
    let term = Term::new("late arrival");
    store.add_term(&term).await.unwrap();
    queue.add(term.clone(), tokio::time::Instant::now());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(source.searches(&term), 1);

    handle.stop();
    runner.await.unwrap().unwrap();
}
