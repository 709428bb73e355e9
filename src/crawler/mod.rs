//! Remote content sources and the dedup-stop fetch
//!
//! A [`ContentSource`] exposes a newest-first search per term as a pull-based
//! [`SearchCursor`]. [`stream::fetch_new`] turns such a cursor into a lazy
//! stream of items that ends as soon as an already known item shows up.

pub mod reddit;
pub mod scripted;
pub mod stream;

use async_trait::async_trait;

use crate::models::{Item, Term};
use crate::utils::error::FetchError;

pub use reddit::RedditSource;
pub use scripted::ScriptedSource;
pub use stream::{collect_new, fetch_new};

/// Pull-based cursor over a newest-first result set
///
/// Each call to `next` performs at most one upstream request. `Ok(None)`
/// means the result set is exhausted.
#[async_trait]
pub trait SearchCursor: Send {
    async fn next(&mut self) -> Result<Option<Item>, FetchError>;
}

/// Remote content source
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Start a "search by term, newest first" query
    async fn search_newest(&self, term: &Term) -> Result<Box<dyn SearchCursor>, FetchError>;

    /// Look up a single item by identifier
    async fn lookup(&self, id: &str) -> Result<Option<Item>, FetchError>;
}
