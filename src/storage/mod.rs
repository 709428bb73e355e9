//! Item storage
//!
//! The scheduler never caches store state between jobs: every job re-reads
//! known identifiers and recent samples through [`ItemStore`]. Two
//! implementations live in [`repository`]: SQLite for production and an
//! in-memory store for tests.

pub mod repository;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;

use crate::models::{Item, Sample, Term};

pub use repository::{MemoryItemStore, SqliteItemStore};

/// Durable record of terms and the items found for them
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// All tracked terms
    async fn list_terms(&self) -> Result<Vec<Term>>;

    /// Register a term. Returns `false` when it already existed.
    async fn add_term(&self, term: &Term) -> Result<bool>;

    /// Most recent items for a term, newest first, at most `limit`
    async fn recent_samples(&self, term: &Term, limit: usize) -> Result<Vec<Sample>>;

    /// Every identifier stored for a term
    async fn known_ids(&self, term: &Term) -> Result<HashSet<String>>;

    /// Insert items for a term. Duplicates are ignored, not errors.
    /// Returns the number of newly linked items.
    async fn persist_items(&self, term: &Term, items: &[Item]) -> Result<usize>;
}

/// Whether `b` is a super-term of `a`: `b` has strictly more words and
/// contains every word of `a`.
pub fn is_super_term(a: &Term, b: &Term) -> bool {
    let b_words: Vec<&str> = b.words().collect();
    let a_words: Vec<&str> = a.words().collect();

    if b_words.len() <= a_words.len() {
        return false;
    }
    a_words.iter().all(|w| b_words.contains(w))
}

/// Drop every term that is a super-term of another tracked term.
///
/// A search for "rust" already returns everything a search for "rust async"
/// would, so polling the longer term is wasted budget. Hyphenated names are
/// single words: "pneu-c-13" is not a super-term of "pneu-c".
pub fn filter_super_terms(terms: &[Term]) -> Vec<Term> {
    let mut kept: Vec<Term> = terms
        .iter()
        .filter(|candidate| {
            !terms
                .iter()
                .any(|other| other != *candidate && is_super_term(other, candidate))
        })
        .cloned()
        .collect();
    kept.sort();
    kept.dedup();
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms(names: &[&str]) -> Vec<Term> {
        names.iter().map(|n| Term::new(n)).collect()
    }

    #[test]
    fn test_super_term_detection() {
        assert!(is_super_term(&Term::new("rust"), &Term::new("rust async")));
        assert!(is_super_term(&Term::new("async rust"), &Term::new("rust tokio async")));
        assert!(!is_super_term(&Term::new("rust async"), &Term::new("rust")));
        assert!(!is_super_term(&Term::new("rust"), &Term::new("rust")));
    }

    #[test]
    fn test_hyphenated_terms_are_distinct() {
        assert!(!is_super_term(&Term::new("pneu-c"), &Term::new("pneu-c-13")));
    }

    #[test]
    fn test_filter_super_terms() {
        let kept = filter_super_terms(&terms(&["rust", "rust async", "go", "pneu-c", "pneu-c-13"]));
        assert_eq!(kept, terms(&["go", "pneu-c", "pneu-c-13", "rust"]));
    }

    #[test]
    fn test_filter_keeps_unrelated_multiword_terms() {
        let kept = filter_super_terms(&terms(&["machine learning", "deep learning"]));
        assert_eq!(kept.len(), 2);
    }
}
