//! Dedup-stop streaming fetch
//!
//! [`fetch_new`] issues one newest-first search and yields items one at a
//! time, wrapping every pull in the backoff policy. It stops, without
//! yielding, at the first item whose identifier is already known: everything
//! after it in the result set is older and therefore already stored. This
//! keeps per-poll work bounded even for high-velocity terms.
//!
//! The stream carries no state between calls. Calling `fetch_new` again runs
//! a fresh query.

use futures::stream::{self, BoxStream, StreamExt};
use std::collections::HashSet;

use super::{ContentSource, SearchCursor};
use crate::metrics;
use crate::models::{Item, Term};
use crate::utils::error::FetchError;
use crate::utils::retry::Backoff;

struct FetchState {
    cursor: Option<Box<dyn SearchCursor>>,
    done: bool,
}

/// Lazily fetch items newer than every identifier in `known_ids`.
///
/// Retryable errors are absorbed by `backoff`. A fatal error ends the stream
/// with one final `Err`; items yielded before it stay with the caller.
pub fn fetch_new<'a>(
    source: &'a dyn ContentSource,
    term: &'a Term,
    known_ids: &'a HashSet<String>,
    backoff: &'a Backoff,
) -> BoxStream<'a, Result<Item, FetchError>> {
    let state = FetchState {
        cursor: None,
        done: false,
    };

    stream::unfold(state, move |mut state| async move {
        if state.done {
            return None;
        }

        let mut cursor = match state.cursor.take() {
            Some(cursor) => cursor,
            None => {
                tracing::info!(term = %term, "Starting newest-first search");
                match backoff.run(|| source.search_newest(term)).await {
                    Ok(cursor) => cursor,
                    Err(err) => {
                        state.done = true;
                        return Some((Err(err), state));
                    }
                }
            }
        };

        let mut attempt = backoff.start();
        let next = loop {
            match cursor.next().await {
                Ok(next) => break next,
                Err(err) => {
                    if let Err(fatal) = backoff.absorb(&mut attempt, err).await {
                        state.done = true;
                        return Some((Err(fatal), state));
                    }
                }
            }
        };

        match next {
            None => {
                tracing::debug!(term = %term, "Search results exhausted");
                None
            }
            Some(item) if known_ids.contains(&item.id) => {
                tracing::info!(term = %term, id = %item.id, "Stopping: item already known");
                metrics::record_dedup_stop();
                None
            }
            Some(item) => {
                tracing::debug!(term = %term, id = %item.id, "Yielded new item");
                state.cursor = Some(cursor);
                Some((Ok(item), state))
            }
        }
    })
    .boxed()
}

/// Drain [`fetch_new`] into a vector.
///
/// Returns every item yielded together with the error that ended the stream,
/// if any, so callers can persist partial results before reporting failure.
pub async fn collect_new(
    source: &dyn ContentSource,
    term: &Term,
    known_ids: &HashSet<String>,
    backoff: &Backoff,
) -> (Vec<Item>, Option<FetchError>) {
    let mut items = Vec::new();
    let mut stream = fetch_new(source, term, known_ids, backoff);

    while let Some(next) = stream.next().await {
        match next {
            Ok(item) => items.push(item),
            Err(err) => return (items, Some(err)),
        }
    }

    (items, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::scripted::{ScriptedSource, Step};
    use crate::utils::retry::testing::recording_backoff;
    use std::time::Duration;

    fn ids(items: &[Item]) -> Vec<&str> {
        items.iter().map(|i| i.id.as_str()).collect()
    }

    fn known(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_stops_before_first_known_item() {
        let term = Term::new("rust");
        let source = ScriptedSource::new().with_items(
            &term,
            vec![
                Item::new("i1", 50),
                Item::new("i2", 40),
                Item::new("k", 30),
                Item::new("i4", 20),
            ],
        );
        let (backoff, _) = recording_backoff();

        let (items, err) = collect_new(&source, &term, &known(&["k"]), &backoff).await;

        assert!(err.is_none());
        assert_eq!(ids(&items), vec!["i1", "i2"]);
        // i4 must never be requested
        assert_eq!(source.pulls(&term), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_without_known_items() {
        let term = Term::new("rust");
        let source = ScriptedSource::new()
            .with_items(&term, vec![Item::new("a", 2), Item::new("b", 1)]);
        let (backoff, _) = recording_backoff();

        let (items, err) = collect_new(&source, &term, &HashSet::new(), &backoff).await;

        assert!(err.is_none());
        assert_eq!(ids(&items), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_first_item_known_yields_nothing() {
        let term = Term::new("rust");
        let source = ScriptedSource::new()
            .with_items(&term, vec![Item::new("a", 2), Item::new("b", 1)]);
        let (backoff, _) = recording_backoff();

        let (items, err) = collect_new(&source, &term, &known(&["a"]), &backoff).await;

        assert!(err.is_none());
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn test_retryable_errors_are_absorbed_per_pull() {
        let term = Term::new("rust");
        let source = ScriptedSource::new().with_steps(
            &term,
            vec![
                Step::Item(Item::new("a", 3)),
                Step::Fail(FetchError::Transient("reset".into())),
                Step::Fail(FetchError::RateLimited {
                    wait: Duration::from_secs(120),
                }),
                Step::Item(Item::new("b", 2)),
            ],
        );
        let (backoff, sleeper) = recording_backoff();

        let (items, err) = collect_new(&source, &term, &HashSet::new(), &backoff).await;

        assert!(err.is_none());
        assert_eq!(ids(&items), vec!["a", "b"]);
        assert_eq!(
            sleeper.waits(),
            vec![Duration::from_secs(5), Duration::from_secs(120)]
        );
    }

    #[tokio::test]
    async fn test_fatal_error_keeps_yielded_items() {
        let term = Term::new("rust");
        let source = ScriptedSource::new().with_steps(
            &term,
            vec![
                Step::Item(Item::new("a", 3)),
                Step::Fail(FetchError::Fatal("HTTP 403".into())),
                Step::Item(Item::new("b", 2)),
            ],
        );
        let (backoff, _) = recording_backoff();

        let (items, err) = collect_new(&source, &term, &HashSet::new(), &backoff).await;

        assert_eq!(ids(&items), vec!["a"]);
        assert_eq!(err, Some(FetchError::Fatal("HTTP 403".into())));
    }

    #[tokio::test]
    async fn test_stream_is_lazy() {
        let term = Term::new("rust");
        let source = ScriptedSource::new().with_items(
            &term,
            vec![Item::new("a", 3), Item::new("b", 2), Item::new("c", 1)],
        );
        let (backoff, _) = recording_backoff();
        let known_ids = HashSet::new();

        let mut stream = fetch_new(&source, &term, &known_ids, &backoff);
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.id, "a");
        assert_eq!(source.pulls(&term), 1);
    }

    #[tokio::test]
    async fn test_restart_runs_fresh_query() {
        let term = Term::new("rust");
        let source = ScriptedSource::new()
            .with_items(&term, vec![Item::new("a", 2), Item::new("b", 1)]);
        let (backoff, _) = recording_backoff();

        let (first, _) = collect_new(&source, &term, &HashSet::new(), &backoff).await;
        let (second, _) = collect_new(&source, &term, &known(&["a"]), &backoff).await;

        assert_eq!(ids(&first), vec!["a", "b"]);
        assert!(second.is_empty());
        assert_eq!(source.searches(&term), 2);
    }
}
