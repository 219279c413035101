//! Scroll (cursor) protocol adapter.
//!
//! Elasticsearch pagination takes two distinct wire calls:
//! - the initial search, which opens a server-side cursor and returns the
//!   first page together with its `_scroll_id`
//! - follow-up `_search/scroll` calls, which return the next page for a
//!   scroll id until a page with no hits signals exhaustion
//!
//! A third call releases the cursor once the export is done with it.

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::elastic::client::ElasticClient;
use crate::error::AppError;
use crate::record::Batch;

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// Opaque server-side pagination handle.
#[derive(Clone, PartialEq, Eq)]
pub struct CursorToken(String);

impl CursorToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Scroll ids run to hundreds of characters; logs only need to tell them apart.
impl std::fmt::Debug for CursorToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CursorToken({})", redact_id(&self.0))
    }
}

impl std::fmt::Display for CursorToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&redact_id(&self.0))
    }
}

/// One page of results plus the cursor to continue from.
#[derive(Debug, Clone)]
pub struct ScrollPage {
    /// Cursor to pass to the next `next_batch` call.
    pub cursor: CursorToken,
    /// Hits in server order. Empty means the cursor is exhausted.
    pub records: Batch,
    /// Total matching documents, when the server reports it.
    pub total_hits: Option<u64>,
}

/// Static parameters of a scroll session.
#[derive(Debug, Clone)]
pub struct ScrollSettings {
    /// Index name or pattern to search.
    pub index: String,
    /// Hits per page.
    pub page_size: u32,
    /// Cursor keep-alive, in Elasticsearch time units (e.g. `1m`).
    pub keep_alive: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal Wire Types
// ─────────────────────────────────────────────────────────────────────────────

/// Body of a follow-up scroll call.
#[derive(Debug, Serialize)]
struct ScrollRequest<'a> {
    scroll_id: &'a str,
    scroll: &'a str,
}

/// Body of a clear-scroll call.
#[derive(Debug, Serialize)]
struct ClearScrollRequest<'a> {
    scroll_id: Vec<&'a str>,
}

/// Search / scroll response, reduced to the fields the exporter reads.
#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(rename = "_scroll_id")]
    scroll_id: Option<String>,
    hits: Option<HitsEnvelope>,
}

#[derive(Debug, Deserialize)]
struct HitsEnvelope {
    #[serde(default)]
    total: Option<TotalHits>,
    hits: Option<Batch>,
}

/// `hits.total` is a bare number before 7.0 and an object since.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TotalHits {
    Count(u64),
    Object { value: u64 },
}

impl TotalHits {
    fn value(&self) -> u64 {
        match self {
            TotalHits::Count(n) => *n,
            TotalHits::Object { value } => *value,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ScrollClient
// ─────────────────────────────────────────────────────────────────────────────

/// Client for the Elasticsearch scroll API.
#[derive(Debug, Clone)]
pub struct ScrollClient {
    client: ElasticClient,
    settings: ScrollSettings,
}

impl ScrollClient {
    pub fn new(client: ElasticClient, settings: ScrollSettings) -> Self {
        Self { client, settings }
    }

    /// Issues the initial search and opens the cursor.
    ///
    /// With a `query` body the search is a POST; without one it is a bodiless
    /// GET that matches every document.
    ///
    /// # Errors
    ///
    /// - `AppError::ConnectionFailed` / `AppError::Remote` - transport failure
    /// - `AppError::Decode` - body is not JSON
    /// - `AppError::Protocol` - `_scroll_id` or `hits.hits` missing
    pub async fn open_cursor(&self, query: Option<&Value>) -> Result<ScrollPage, AppError> {
        let url = self.build_search_url()?;

        let (method, body) = match query {
            Some(query) => (Method::POST, Some(encode_body(query)?)),
            None => (Method::GET, None),
        };

        info!("[SCROLL] opening cursor on index '{}'", self.settings.index);

        let bytes = self.client.request_bytes(method, url, body).await?;
        let response = decode_response(&bytes)?;

        let cursor = response
            .scroll_id
            .map(CursorToken::new)
            .ok_or_else(|| AppError::Protocol("search response has no _scroll_id".to_string()))?;
        let (records, total_hits) = extract_hits(response.hits)?;

        info!(
            "[SCROLL] cursor {} opened: {} hits in first page, {} total",
            cursor,
            records.len(),
            total_hits.map_or_else(|| "unknown".to_string(), |n| n.to_string())
        );

        Ok(ScrollPage {
            cursor,
            records,
            total_hits,
        })
    }

    /// Fetches the page after `cursor`.
    ///
    /// An empty `records` vector means the cursor is exhausted. When the
    /// response omits `_scroll_id` the previous cursor stays valid.
    pub async fn next_batch(&self, cursor: &CursorToken) -> Result<ScrollPage, AppError> {
        let url = self.client.build_url("_search/scroll")?;
        let body = encode_body(&ScrollRequest {
            scroll_id: cursor.as_str(),
            scroll: &self.settings.keep_alive,
        })?;

        let bytes = self.client.request_bytes(Method::POST, url, Some(body)).await?;
        let response = decode_response(&bytes)?;

        let next_cursor = response
            .scroll_id
            .map(CursorToken::new)
            .unwrap_or_else(|| cursor.clone());
        let (records, total_hits) = extract_hits(response.hits)?;

        debug!("[SCROLL] cursor {} returned {} hits", next_cursor, records.len());

        Ok(ScrollPage {
            cursor: next_cursor,
            records,
            total_hits,
        })
    }

    /// Releases the server-side cursor.
    ///
    /// A 404 means the cursor already expired, which counts as released.
    pub async fn release_cursor(&self, cursor: &CursorToken) -> Result<(), AppError> {
        let url = self.client.build_url("_search/scroll")?;
        let body = encode_body(&ClearScrollRequest {
            scroll_id: vec![cursor.as_str()],
        })?;

        match self.client.request_bytes(Method::DELETE, url, Some(body)).await {
            Ok(_) => {
                info!("[SCROLL] cursor {} released", cursor);
                Ok(())
            }
            Err(AppError::Remote { status: 404, .. }) => {
                info!("[SCROLL] cursor {} already expired", cursor);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // URL Builders
    // ─────────────────────────────────────────────────────────────────────────

    /// Builds `<base>/<index>/_search?scroll=<ttl>&size=<n>`.
    fn build_search_url(&self) -> Result<url::Url, AppError> {
        let mut url = self
            .client
            .build_segment_url(&[self.settings.index.as_str(), "_search"])?;
        url.query_pairs_mut()
            .append_pair("scroll", &self.settings.keep_alive)
            .append_pair("size", &self.settings.page_size.to_string());
        Ok(url)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helper Functions
// ─────────────────────────────────────────────────────────────────────────────

fn encode_body<T: Serialize + ?Sized>(body: &T) -> Result<Vec<u8>, AppError> {
    serde_json::to_vec(body)
        .map_err(|e| AppError::Internal(format!("Failed to encode request body: {}", e)))
}

/// Decodes a response body: invalid JSON is a decode error, valid JSON of
/// the wrong shape is a protocol error.
fn decode_response(bytes: &[u8]) -> Result<SearchResponse, AppError> {
    let value: Value = serde_json::from_slice(bytes).map_err(|e| AppError::Decode(e.to_string()))?;
    serde_json::from_value(value)
        .map_err(|e| AppError::Protocol(format!("unexpected search response shape: {}", e)))
}

fn extract_hits(hits: Option<HitsEnvelope>) -> Result<(Batch, Option<u64>), AppError> {
    let envelope =
        hits.ok_or_else(|| AppError::Protocol("search response has no hits".to_string()))?;
    let total = envelope.total.as_ref().map(TotalHits::value);
    let records = envelope
        .hits
        .ok_or_else(|| AppError::Protocol("search response has no hits.hits".to_string()))?;
    Ok((records, total))
}

/// Redacts a cursor id for logging (shows first 8 chars).
fn redact_id(id: &str) -> String {
    match id.char_indices().nth(8) {
        Some((idx, _)) => format!("{}...", &id[..idx]),
        None => id.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
