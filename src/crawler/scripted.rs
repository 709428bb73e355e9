//! Scripted in-memory content source
//!
//! Plays back a fixed, newest-first sequence of results (or failures) per
//! term. Used by tests and for dry runs without API credentials.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use super::{ContentSource, SearchCursor};
use crate::models::{Item, Term};
use crate::utils::error::FetchError;

/// One scripted result for a cursor pull
#[derive(Debug, Clone)]
pub enum Step {
    Item(Item),
    Fail(FetchError),
}

#[derive(Default)]
struct ScriptState {
    steps: HashMap<Term, Arc<Vec<Step>>>,
    search_errors: HashMap<Term, VecDeque<FetchError>>,
    searches: HashMap<Term, usize>,
    pulls: HashMap<Term, usize>,
}

/// Content source that replays scripted results
#[derive(Clone, Default)]
pub struct ScriptedSource {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a plain newest-first result list for a term
    pub fn with_items(self, term: &Term, items: Vec<Item>) -> Self {
        self.set_items(term, items);
        self
    }

    /// Script a sequence of results and failures for a term
    pub fn with_steps(self, term: &Term, steps: Vec<Step>) -> Self {
        self.lock().steps.insert(term.clone(), Arc::new(steps));
        self
    }

    /// Make the next `search_newest` calls for a term fail, in order
    pub fn with_search_errors(self, term: &Term, errors: Vec<FetchError>) -> Self {
        self.lock()
            .search_errors
            .insert(term.clone(), errors.into_iter().collect());
        self
    }

    /// Replace the result list for a term
    pub fn set_items(&self, term: &Term, items: Vec<Item>) {
        let steps = items.into_iter().map(Step::Item).collect();
        self.lock().steps.insert(term.clone(), Arc::new(steps));
    }

    /// Simulate new posts: put items in front of the existing results
    pub fn prepend_items(&self, term: &Term, items: Vec<Item>) {
        let mut state = self.lock();
        let existing = state.steps.get(term).cloned().unwrap_or_default();
        let mut steps: Vec<Step> = items.into_iter().map(Step::Item).collect();
        steps.extend(existing.iter().cloned());
        state.steps.insert(term.clone(), Arc::new(steps));
    }

    /// Number of searches started for a term
    pub fn searches(&self, term: &Term) -> usize {
        self.lock().searches.get(term).copied().unwrap_or(0)
    }

    /// Number of cursor pulls for a term, across all searches
    pub fn pulls(&self, term: &Term) -> usize {
        self.lock().pulls.get(term).copied().unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

struct ScriptedCursor {
    term: Term,
    steps: Arc<Vec<Step>>,
    position: usize,
    state: Arc<Mutex<ScriptState>>,
}

#[async_trait]
impl SearchCursor for ScriptedCursor {
    async fn next(&mut self) -> Result<Option<Item>, FetchError> {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            *state.pulls.entry(self.term.clone()).or_default() += 1;
        }

        let Some(step) = self.steps.get(self.position) else {
            return Ok(None);
        };
        self.position += 1;

        match step {
            Step::Item(item) => Ok(Some(item.clone())),
            Step::Fail(err) => Err(err.clone()),
        }
    }
}

#[async_trait]
impl ContentSource for ScriptedSource {
    async fn search_newest(&self, term: &Term) -> Result<Box<dyn SearchCursor>, FetchError> {
        let steps = {
            let mut state = self.lock();
            *state.searches.entry(term.clone()).or_default() += 1;

            if let Some(err) = state
                .search_errors
                .get_mut(term)
                .and_then(VecDeque::pop_front)
            {
                return Err(err);
            }

            state.steps.get(term).cloned().unwrap_or_default()
        };

        Ok(Box::new(ScriptedCursor {
            term: term.clone(),
            steps,
            position: 0,
            state: Arc::clone(&self.state),
        }))
    }

    async fn lookup(&self, id: &str) -> Result<Option<Item>, FetchError> {
        let state = self.lock();
        let found = state.steps.values().flat_map(|steps| steps.iter()).find_map(
            |step| match step {
                Step::Item(item) if item.id == id => Some(item.clone()),
                _ => None,
            },
        );
        Ok(found)
    }
}
