//! The source adapter contract.
//!
//! A [`Source`] knows three things about one upstream collection of
//! documents: how to enumerate its discovery requests (listing pages,
//! search result pages, directories), how to turn one discovery request into
//! [`Entry`] pointers, and how to materialize one entry into a [`Document`].
//! Everything else (caching, staleness, deduplication, corpus repair) is the
//! engine's job.
//!
//! # Lifecycle
//!
//! ```text
//! get_index_requests()  ──▶  {Request}          cached in indices/<name>.json
//!         │
//!         ▼
//! get_index(request)    ──▶  {Entry}            appended to index/<name>.jsonl
//!         │
//!         ▼
//! get_document(entry)   ──▶  Document | None    appended to corpus.jsonl
//! ```
//!
//! # Contract
//!
//! - `get_index` must return a non-empty set whenever the page it fetched
//!   had items. An adapter that parses zero entries out of a non-empty page
//!   returns [`SourceError::EmptyIndex`].
//! - `get_document` returns `Ok(None)` when the document is gone upstream.
//!   That is not an error and is retried on the next run.
//! - [`SourceError::Unparseable`] is retried with backoff by
//!   [`fetch_document`].

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::SourceError;
use crate::models::{Document, Entry, Request};
use crate::retry::RetryPolicy;

// ═══════════════════════════════════════════════════════════════════════
// Refresh policy
// ═══════════════════════════════════════════════════════════════════════

/// When a cached artifact (discovery request set, index batch) goes stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum RefreshPolicy {
    /// Regenerate on every run.
    Always,
    /// Never regenerate once cached.
    Never,
    /// Regenerate once older than the interval.
    Every(Duration),
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        RefreshPolicy::Every(Duration::from_secs(24 * 60 * 60))
    }
}

impl RefreshPolicy {
    /// Whether an artifact of the given age must be regenerated.
    pub fn is_stale(&self, age: Duration) -> bool {
        match self {
            RefreshPolicy::Always => true,
            RefreshPolicy::Never => false,
            RefreshPolicy::Every(interval) => age > *interval,
        }
    }
}

impl FromStr for RefreshPolicy {
    type Err = String;

    /// Parses `always`, `never`, or `<n><unit>` with unit `s`, `m`, `h` or `d`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.to_ascii_lowercase().as_str() {
            "always" => return Ok(RefreshPolicy::Always),
            "never" => return Ok(RefreshPolicy::Never),
            _ => {}
        }

        let invalid = || {
            format!(
                "invalid refresh interval '{}': expected 'always', 'never' or e.g. '30m', '12h', '7d'",
                s
            )
        };
        let unit_at = s.len().checked_sub(1).ok_or_else(invalid)?;
        if !s.is_char_boundary(unit_at) {
            return Err(invalid());
        }
        let (count, unit) = s.split_at(unit_at);
        let count: u64 = count.parse().map_err(|_| invalid())?;
        let secs = match unit {
            "s" => count,
            "m" => count.saturating_mul(60),
            "h" => count.saturating_mul(60 * 60),
            "d" => count.saturating_mul(24 * 60 * 60),
            _ => return Err(invalid()),
        };
        Ok(RefreshPolicy::Every(Duration::from_secs(secs)))
    }
}

impl TryFrom<String> for RefreshPolicy {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for RefreshPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshPolicy::Always => write!(f, "always"),
            RefreshPolicy::Never => write!(f, "never"),
            RefreshPolicy::Every(d) => {
                let secs = d.as_secs();
                if secs != 0 && secs % 86_400 == 0 {
                    write!(f, "{}d", secs / 86_400)
                } else if secs != 0 && secs % 3_600 == 0 {
                    write!(f, "{}h", secs / 3_600)
                } else if secs != 0 && secs % 60 == 0 {
                    write!(f, "{}m", secs / 60)
                } else {
                    write!(f, "{}s", secs)
                }
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Source trait
// ═══════════════════════════════════════════════════════════════════════

/// An upstream collection of documents.
///
/// # Example
///
/// ```rust
/// use std::collections::HashSet;
/// use async_trait::async_trait;
/// use corpus_harvest::error::SourceError;
/// use corpus_harvest::models::{Document, Entry, Request};
/// use corpus_harvest::source::Source;
///
/// pub struct Gazette;
///
/// #[async_trait]
/// impl Source for Gazette {
///     fn name(&self) -> &str { "gazette" }
///
///     async fn get_index_requests(&self) -> Result<HashSet<Request>, SourceError> {
///         Ok(HashSet::from([Request::get("https://gazette.test/list?page=1")]))
///     }
///
///     async fn get_index(&self, request: &Request) -> Result<HashSet<Entry>, SourceError> {
///         let _ = request;
///         Ok(HashSet::new())
///     }
///
///     async fn get_document(&self, entry: &Entry) -> Result<Option<Document>, SourceError> {
///         Ok(Some(Document::from_entry(entry, "text/plain", "")))
///     }
/// }
/// ```
#[async_trait]
pub trait Source: Send + Sync {
    /// Unique name. Used as the version-id prefix and as the state file name.
    fn name(&self) -> &str;

    /// Kind shown by `mkcorpus sources` (e.g. `"filesystem"`, `"http"`).
    fn kind(&self) -> &str {
        "custom"
    }

    /// Staleness policy for the cached discovery request set.
    fn indices_refresh(&self) -> RefreshPolicy {
        RefreshPolicy::default()
    }

    /// Staleness policy for indexed batches.
    fn index_refresh(&self) -> RefreshPolicy {
        RefreshPolicy::default()
    }

    /// Backoff applied when a document comes back [`SourceError::Unparseable`].
    fn document_retry(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    /// Enumerate the discovery requests whose results, together, list every
    /// document in the source.
    async fn get_index_requests(&self) -> Result<HashSet<Request>, SourceError>;

    /// Fetch one discovery request and return the entries it lists.
    async fn get_index(&self, request: &Request) -> Result<HashSet<Entry>, SourceError>;

    /// Materialize one entry, or `None` if it no longer exists upstream.
    async fn get_document(&self, entry: &Entry) -> Result<Option<Document>, SourceError>;
}

/// [`Source::get_document`], retrying unparseable content per
/// [`Source::document_retry`].
pub async fn fetch_document(
    source: &dyn Source,
    entry: &Entry,
) -> Result<Option<Document>, SourceError> {
    source
        .document_retry()
        .run(
            || source.get_document(entry),
            |err| matches!(err, SourceError::Unparseable(_)),
        )
        .await
}
