//! Reddit search adapter
//!
//! Implements [`ContentSource`] on top of the Reddit OAuth API:
//!
//! - application-only OAuth token (client credentials), refreshed before expiry
//! - `GET /r/all/search?q=<term>&sort=new` paged with the `after` cursor
//! - `GET /api/info?id=t3_<id>` for single item lookup
//! - request pacing with governor
//!
//! Failures are classified for the backoff wrapper: HTTP 429 and `RATELIMIT`
//! API errors become `RateLimited`, connection problems `Transient`, 5xx
//! `Backoff`, and everything else `Fatal`.

use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::{Client, Response};
use serde::Deserialize;
use std::collections::VecDeque;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{ContentSource, SearchCursor};
use crate::config::RedditConfig;
use crate::models::{Item, Term};
use crate::utils::error::FetchError;

/// Tokens are refreshed this long before Reddit says they expire
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_token_lifetime")]
    expires_in: u64,
}

fn default_token_lifetime() -> u64 {
    3600
}

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    after: Option<String>,
    #[serde(default)]
    children: Vec<ListingChild>,
}

#[derive(Debug, Deserialize)]
struct ListingChild {
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct PostData {
    id: String,
    created_utc: f64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    subreddit: Option<String>,
    #[serde(default)]
    permalink: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    num_comments: i64,
    #[serde(default)]
    over_18: bool,
}

impl From<PostData> for Item {
    fn from(post: PostData) -> Self {
        Item {
            id: post.id,
            created_at: post.created_utc as i64,
            title: post.title,
            subreddit: post.subreddit,
            permalink: post.permalink,
            url: post.url,
            score: post.score,
            num_comments: post.num_comments,
            over_18: post.over_18,
            raw: None,
        }
    }
}

/// Decode one post and keep the payload it came from
fn item_from_raw(raw: serde_json::Value) -> Result<Item, FetchError> {
    let post = PostData::deserialize(&raw)
        .map_err(|e| FetchError::Fatal(format!("Unexpected post shape: {e}")))?;
    let mut item = Item::from(post);
    item.raw = Some(raw);
    Ok(item)
}

/// One page of search results
#[derive(Debug)]
struct Page {
    items: Vec<Item>,
    after: Option<String>,
}

// ============================================================================
// Client
// ============================================================================

struct AccessToken {
    value: String,
    refresh_at: Instant,
}

struct RedditInner {
    client: Client,
    config: RedditConfig,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    token: Mutex<Option<AccessToken>>,
    rate_limit_default: Duration,
}

/// Reddit API content source
#[derive(Clone)]
pub struct RedditSource {
    inner: Arc<RedditInner>,
}

impl RedditSource {
    /// Create a new Reddit source. `rate_limit_default` is the wait used
    /// when Reddit rate-limits without saying for how long.
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Fatal` if credentials are missing or the HTTP
    /// client cannot be built
    pub fn new(config: RedditConfig, rate_limit_default: Duration) -> Result<Self, FetchError> {
        if !config.has_credentials() {
            return Err(FetchError::Fatal(
                "Missing Reddit credentials: set REDDIT_ID and REDDIT_SECRET".to_string(),
            ));
        }

        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.request_timeout())
            .gzip(true)
            .build()
            .map_err(|e| FetchError::Fatal(format!("Failed to create HTTP client: {e}")))?;

        let rate = NonZeroU32::new(config.requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_minute(rate));

        Ok(Self {
            inner: Arc::new(RedditInner {
                client,
                config,
                rate_limiter,
                token: Mutex::new(None),
                rate_limit_default,
            }),
        })
    }
}

impl RedditInner {
    async fn access_token(&self) -> Result<String, FetchError> {
        let mut token = self.token.lock().await;
        if let Some(current) = token.as_ref() {
            if Instant::now() < current.refresh_at {
                return Ok(current.value.clone());
            }
        }

        tracing::debug!("Requesting Reddit access token");
        let url = format!("{}/api/v1/access_token", self.config.auth_base);
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(&e))?;

        if matches!(response.status().as_u16(), 401 | 403) {
            return Err(FetchError::Fatal(
                "Reddit rejected the client credentials".to_string(),
            ));
        }
        let response = self.check_status(response).await?;
        let body = response.text().await.map_err(|e| FetchError::from_reqwest(&e))?;
        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| FetchError::Fatal(format!("Invalid token response: {e}")))?;

        let lifetime = Duration::from_secs(parsed.expires_in).saturating_sub(TOKEN_REFRESH_MARGIN);
        *token = Some(AccessToken {
            value: parsed.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });

        Ok(parsed.access_token)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    /// Map a non-success response to a classified error
    async fn check_status(&self, response: Response) -> Result<Response, FetchError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let reset_hint = response
            .headers()
            .get("x-ratelimit-reset")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|secs| *secs > 0.0)
            .and_then(|secs| Duration::try_from_secs_f64(secs.ceil()).ok());
        let body = response.text().await.unwrap_or_default();

        let err = match status.as_u16() {
            429 => match reset_hint {
                Some(wait) => FetchError::RateLimited { wait },
                None => FetchError::rate_limited_from_message(&body, self.rate_limit_default),
            },
            code => FetchError::from_status(code, &body),
        };

        tracing::warn!(status = status.as_u16(), kind = err.kind(), "Reddit request failed");
        Err(err)
    }

    /// Authenticated, rate-limited GET returning a parsed JSON body
    async fn get_json(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<serde_json::Value, FetchError> {
        self.rate_limiter.until_ready().await;
        let token = self.access_token().await?;

        let url = format!("{}{}", self.config.api_base, path);
        tracing::debug!(url = %url, "Fetching Reddit listing");

        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .query(&[("raw_json", "1")])
            .query(query)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(&e))?;

        if response.status().as_u16() == 401 {
            self.invalidate_token().await;
            return Err(FetchError::Transient(
                "Access token rejected, refreshing".to_string(),
            ));
        }
        let response = self.check_status(response).await?;
        let body = response.text().await.map_err(|e| FetchError::from_reqwest(&e))?;
        let value: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| FetchError::Fatal(format!("Invalid JSON from Reddit: {e}")))?;

        check_api_errors(&value, self.rate_limit_default)?;
        Ok(value)
    }

    async fn search_page(&self, term: &Term, after: Option<&str>) -> Result<Page, FetchError> {
        let mut query = vec![
            ("q", term.as_str().to_string()),
            ("sort", "new".to_string()),
            ("restrict_sr", "false".to_string()),
            ("limit", self.config.page_size.to_string()),
        ];
        if let Some(after) = after {
            query.push(("after", after.to_string()));
        }

        let value = self.get_json("/r/all/search", &query).await?;
        parse_listing(value)
    }
}

/// Reddit reports some failures inside a 200 body:
/// `{"json": {"errors": [["RATELIMIT", "try again in 5 minutes.", "ratelimit"]]}}`
fn check_api_errors(value: &serde_json::Value, default_wait: Duration) -> Result<(), FetchError> {
    let Some(errors) = value
        .get("json")
        .and_then(|j| j.get("errors"))
        .and_then(|e| e.as_array())
    else {
        return Ok(());
    };

    for error in errors {
        let fields: Vec<&str> = error
            .as_array()
            .map(|f| f.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();

        match fields.as_slice() {
            ["RATELIMIT", message, ..] => {
                tracing::warn!(message = %message, "Rate limit hit");
                return Err(FetchError::rate_limited_from_message(message, default_wait));
            }
            [code, message, ..] => {
                return Err(FetchError::Fatal(format!("Reddit API error {code}: {message}")));
            }
            _ => {}
        }
    }

    Ok(())
}

fn parse_listing(value: serde_json::Value) -> Result<Page, FetchError> {
    let listing: Listing = serde_json::from_value(value)
        .map_err(|e| FetchError::Fatal(format!("Unexpected listing shape: {e}")))?;

    let items = listing
        .data
        .children
        .into_iter()
        .map(|child| item_from_raw(child.data))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Page {
        items,
        after: listing.data.after,
    })
}

// ============================================================================
// Cursor
// ============================================================================

/// Newest-first search cursor. Pages are fetched on demand, one request per
/// page, and a failed page fetch leaves the cursor where it was.
struct RedditCursor {
    inner: Arc<RedditInner>,
    term: Term,
    buffer: VecDeque<Item>,
    after: Option<String>,
    exhausted: bool,
}

#[async_trait]
impl SearchCursor for RedditCursor {
    async fn next(&mut self) -> Result<Option<Item>, FetchError> {
        if let Some(item) = self.buffer.pop_front() {
            return Ok(Some(item));
        }
        if self.exhausted {
            return Ok(None);
        }

        let page = self
            .inner
            .search_page(&self.term, self.after.as_deref())
            .await?;

        tracing::debug!(
            term = %self.term,
            count = page.items.len(),
            has_more = page.after.is_some(),
            "Fetched search page"
        );

        self.exhausted = page.after.is_none() || page.items.is_empty();
        self.after = page.after;
        self.buffer.extend(page.items);

        Ok(self.buffer.pop_front())
    }
}

#[async_trait]
impl ContentSource for RedditSource {
    async fn search_newest(&self, term: &Term) -> Result<Box<dyn SearchCursor>, FetchError> {
        Ok(Box::new(RedditCursor {
            inner: Arc::clone(&self.inner),
            term: term.clone(),
            buffer: VecDeque::new(),
            after: None,
            exhausted: false,
        }))
    }

    async fn lookup(&self, id: &str) -> Result<Option<Item>, FetchError> {
        let fullname = if id.starts_with("t3_") {
            id.to_string()
        } else {
            format!("t3_{id}")
        };

        let value = self
            .inner
            .get_json("/api/info", &[("id", fullname)])
            .await?;
        Ok(parse_listing(value)?.items.into_iter().next())
    }
}
