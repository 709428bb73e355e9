//! Item store implementations
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Scheduler / Worker jobs                     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ItemStore trait                        │
//! └─────────────────────────────────────────────────────────────┘
//!                    │                       │
//!                    ▼                       ▼
//!          ┌─────────────────┐     ┌─────────────────┐
//!          │     SQLite      │     │    In-memory    │
//!          │ Implementation  │     │ Implementation  │
//!          └─────────────────┘     └─────────────────┘
//! ```
//!
//! Schema (SQLite):
//!
//! - `search_term (id, name UNIQUE)`
//! - `item (id PRIMARY KEY, created_utc, title, ..., raw_json)`
//! - `search_term_match (item_id, search_term_id)`, primary key on both
//!
//! Inserts use `INSERT OR IGNORE` so re-persisting an item is harmless.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use super::ItemStore;
use crate::models::{Item, Sample, Term};

// ============================================================================
// SQLite Implementation
// ============================================================================

/// SQLite implementation of [`ItemStore`]
///
/// The connection sits behind a `Mutex`; statements run on the blocking
/// thread pool so worker tasks never stall the async runtime.
#[derive(Clone)]
pub struct SqliteItemStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteItemStore {
    /// Open (or create) a database file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path).context("Failed to open SQLite database")?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self::from_connection(conn)?;
        tracing::info!(path = %path.display(), "SQLite item store initialized");
        Ok(store)
    }

    /// Create in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to create in-memory SQLite")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        create_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| anyhow!("SQLite connection mutex poisoned"))?;
            f(&mut guard)
        })
        .await
        .context("SQLite task panicked")?
    }
}

fn create_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
            CREATE TABLE IF NOT EXISTS search_term (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS item (
                id TEXT PRIMARY KEY,
                created_utc INTEGER NOT NULL,
                title TEXT NOT NULL DEFAULT '',
                subreddit TEXT,
                permalink TEXT,
                url TEXT,
                score INTEGER NOT NULL DEFAULT 0,
                num_comments INTEGER NOT NULL DEFAULT 0,
                over_18 INTEGER NOT NULL DEFAULT 0,
                raw_json TEXT,
                scraped_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_item_created
                ON item(created_utc);

            CREATE TABLE IF NOT EXISTS search_term_match (
                item_id TEXT NOT NULL REFERENCES item(id),
                search_term_id INTEGER NOT NULL REFERENCES search_term(id),
                PRIMARY KEY (item_id, search_term_id)
            );

            CREATE INDEX IF NOT EXISTS idx_match_term
                ON search_term_match(search_term_id);
            "#,
    )
    .context("Failed to create SQLite schema")?;

    Ok(())
}

fn term_id(conn: &Connection, term: &Term) -> Result<Option<i64>> {
    conn.query_row(
        "SELECT id FROM search_term WHERE name = ?1",
        params![term.as_str()],
        |row| row.get(0),
    )
    .optional()
    .context("Failed to look up search term")
}

#[async_trait]
impl ItemStore for SqliteItemStore {
    async fn list_terms(&self) -> Result<Vec<Term>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT name FROM search_term ORDER BY name")?;
            let terms = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .map(|r| r.map(|name| Term::new(&name)))
                .collect::<rusqlite::Result<Vec<_>>>()
                .context("Failed to list search terms")?;
            Ok(terms)
        })
        .await
    }

    async fn add_term(&self, term: &Term) -> Result<bool> {
        if term.is_empty() {
            anyhow::bail!("Search term must not be empty");
        }
        let term = term.clone();
        self.with_conn(move |conn| {
            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO search_term (name) VALUES (?1)",
                    params![term.as_str()],
                )
                .context("Failed to insert search term")?;
            Ok(inserted > 0)
        })
        .await
    }

    async fn recent_samples(&self, term: &Term, limit: usize) -> Result<Vec<Sample>> {
        let term = term.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                r#"
                    SELECT i.id, i.created_utc
                    FROM search_term s
                    JOIN search_term_match m ON s.id = m.search_term_id
                    JOIN item i ON m.item_id = i.id
                    WHERE s.name = ?1
                    ORDER BY i.created_utc DESC
                    LIMIT ?2
                    "#,
            )?;
            let samples = stmt
                .query_map(params![term.as_str(), limit as i64], |row| {
                    Ok(Sample::new(row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()
                .context("Failed to load recent samples")?;
            Ok(samples)
        })
        .await
    }

    async fn known_ids(&self, term: &Term) -> Result<HashSet<String>> {
        let term = term.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                r#"
                    SELECT m.item_id
                    FROM search_term s
                    JOIN search_term_match m ON s.id = m.search_term_id
                    WHERE s.name = ?1
                    "#,
            )?;
            let ids = stmt
                .query_map(params![term.as_str()], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<HashSet<_>>>()
                .context("Failed to load known ids")?;
            Ok(ids)
        })
        .await
    }

    async fn persist_items(&self, term: &Term, items: &[Item]) -> Result<usize> {
        if items.is_empty() {
            return Ok(0);
        }

        let term = term.clone();
        let items = items.to_vec();
        self.with_conn(move |conn| {
            let term_id = term_id(conn, &term)?.ok_or_else(|| {
                anyhow!("Search term '{term}' does not exist and cannot be persisted")
            })?;

            let now = Utc::now().to_rfc3339();
            let tx = conn.transaction()?;
            let mut linked = 0;
            {
                let mut insert_item = tx.prepare(
                    r#"
                        INSERT OR IGNORE INTO item
                            (id, created_utc, title, subreddit, permalink, url,
                             score, num_comments, over_18, raw_json, scraped_at)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                        "#,
                )?;
                let mut insert_match = tx.prepare(
                    "INSERT OR IGNORE INTO search_term_match (item_id, search_term_id) VALUES (?1, ?2)",
                )?;

                for item in &items {
                    let raw = item.raw.as_ref().map(|v| v.to_string());
                    insert_item.execute(params![
                        item.id,
                        item.created_at,
                        item.title,
                        item.subreddit,
                        item.permalink,
                        item.url,
                        item.score,
                        item.num_comments,
                        item.over_18,
                        raw,
                        now,
                    ])?;
                    linked += insert_match.execute(params![item.id, term_id])?;
                }
            }
            tx.commit().context("Failed to commit items")?;

            tracing::debug!(term = %term, linked, total = items.len(), "Persisted items");
            Ok(linked)
        })
        .await
    }
}

// ============================================================================
// In-memory Implementation (for testing)
// ============================================================================

/// In-memory implementation of [`ItemStore`]
///
/// Useful for testing without database dependencies. Persistence and
/// sample loading can be made to fail on demand to exercise failure handling.
#[derive(Default)]
pub struct MemoryItemStore {
    items: RwLock<HashMap<Term, HashMap<String, Item>>>,
    fail_persist: AtomicBool,
    fail_samples: RwLock<HashSet<Term>>,
}

impl MemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a term with existing items
    pub fn with_items(self, term: &Term, items: impl IntoIterator<Item = Item>) -> Self {
        {
            let mut all = self.items.write().unwrap_or_else(|e| e.into_inner());
            let entry = all.entry(term.clone()).or_default();
            for item in items {
                entry.insert(item.id.clone(), item);
            }
        }
        self
    }

    /// Make every subsequent `persist_items` call fail
    pub fn set_fail_persist(&self, fail: bool) {
        self.fail_persist.store(fail, Ordering::SeqCst);
    }

    /// Make `recent_samples` fail for one term
    pub fn fail_samples_for(&self, term: &Term) {
        self.fail_samples
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(term.clone());
    }

    /// Number of items stored for a term
    pub fn len(&self, term: &Term) -> usize {
        self.items
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(term)
            .map_or(0, HashMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.items
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .all(HashMap::is_empty)
    }
}

#[async_trait]
impl ItemStore for MemoryItemStore {
    async fn list_terms(&self) -> Result<Vec<Term>> {
        let items = self.items.read().unwrap_or_else(|e| e.into_inner());
        let mut terms: Vec<Term> = items.keys().cloned().collect();
        terms.sort();
        Ok(terms)
    }

    async fn add_term(&self, term: &Term) -> Result<bool> {
        if term.is_empty() {
            anyhow::bail!("Search term must not be empty");
        }
        let mut items = self.items.write().unwrap_or_else(|e| e.into_inner());
        if items.contains_key(term) {
            return Ok(false);
        }
        items.insert(term.clone(), HashMap::new());
        Ok(true)
    }

    async fn recent_samples(&self, term: &Term, limit: usize) -> Result<Vec<Sample>> {
        if self
            .fail_samples
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(term)
        {
            anyhow::bail!("Simulated sample failure for '{term}'");
        }

        let items = self.items.read().unwrap_or_else(|e| e.into_inner());
        let mut samples: Vec<Sample> = items
            .get(term)
            .map(|stored| stored.values().map(Item::sample).collect())
            .unwrap_or_default();
        samples.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        samples.truncate(limit);
        Ok(samples)
    }

    async fn known_ids(&self, term: &Term) -> Result<HashSet<String>> {
        let items = self.items.read().unwrap_or_else(|e| e.into_inner());
        Ok(items
            .get(term)
            .map(|stored| stored.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn persist_items(&self, term: &Term, new_items: &[Item]) -> Result<usize> {
        if self.fail_persist.load(Ordering::SeqCst) {
            anyhow::bail!("Simulated persistence failure for '{term}'");
        }

        let mut items = self.items.write().unwrap_or_else(|e| e.into_inner());
        let stored = items
            .get_mut(term)
            .ok_or_else(|| anyhow!("Search term '{term}' does not exist and cannot be persisted"))?;

        let mut linked = 0;
        for item in new_items {
            if !stored.contains_key(&item.id) {
                stored.insert(item.id.clone(), item.clone());
                linked += 1;
            }
        }
        Ok(linked)
    }
}

// ============================================================================
// Tests
// ============================================================================
