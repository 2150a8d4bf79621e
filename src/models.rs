//! Core data models used throughout the harvester.
//!
//! These types describe what flows between the phases of a run: outbound
//! [`Request`]s and their raw [`Response`]s, the lightweight [`Entry`]
//! pointers produced by discovery, the [`IndexedBatch`] records appended to
//! per-source index logs, and the final [`Document`] records of the corpus.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};

use crate::error::FetchError;

pub const DEFAULT_ENCODING: &str = "utf-8";

fn default_encoding() -> String {
    DEFAULT_ENCODING.to_string()
}

/// How a [`Request`] is executed.
///
/// `Open` reads a local file instead of touching the network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    #[default]
    Get,
    Post,
    Open,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
            Method::Open => write!(f, "OPEN"),
        }
    }
}

/// An outbound fetch.
///
/// Equality and hashing are structural over every field, so requests can be
/// set members and index keys. The payload and header maps are ordered so
/// the hash does not depend on insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Request {
    /// URL, or a local path when `method` is [`Method::Open`].
    pub path: String,
    #[serde(default)]
    pub method: Method,
    /// Form payload for POST-style discovery requests.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Text encoding label used by [`Response::text`].
    #[serde(default = "default_encoding")]
    pub encoding: String,
}

impl Request {
    pub fn new(path: impl Into<String>, method: Method) -> Self {
        Self {
            path: path.into(),
            method,
            data: BTreeMap::new(),
            headers: BTreeMap::new(),
            encoding: default_encoding(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(url, Method::Get)
    }

    pub fn post<K, V>(url: impl Into<String>, data: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut req = Self::new(url, Method::Post);
        req.data = data.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        req
    }

    pub fn open(path: impl Into<String>) -> Self {
        Self::new(path, Method::Open)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = encoding.into();
        self
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// Raw result of a fetch.
///
/// The body is never mutated; the text and JSON views are decoded on first
/// use and cached.
#[derive(Debug)]
pub struct Response {
    body: Vec<u8>,
    encoding: String,
    content_type: Option<String>,
    status: u16,
    text: OnceLock<String>,
    json: OnceLock<serde_json::Value>,
}

impl Response {
    pub fn new(body: Vec<u8>, encoding: impl Into<String>) -> Self {
        Self {
            body,
            encoding: encoding.into(),
            content_type: None,
            status: 200,
            text: OnceLock::new(),
            json: OnceLock::new(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_content_type(mut self, content_type: Option<String>) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.body
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.body
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The declared content type without parameters (`text/html; charset=x` → `text/html`).
    pub fn content_type(&self) -> Option<&str> {
        self.content_type
            .as_deref()
            .map(|ct| ct.split(';').next().unwrap_or(ct).trim())
    }

    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    /// Body decoded with the request's declared encoding.
    ///
    /// Malformed sequences are an error, never silently replaced.
    pub fn text(&self) -> Result<&str, FetchError> {
        if let Some(text) = self.text.get() {
            return Ok(text);
        }
        let decode_error = || FetchError::Decode {
            encoding: self.encoding.clone(),
        };
        let encoding = Encoding::for_label(self.encoding.as_bytes()).ok_or_else(decode_error)?;
        let decoded = encoding
            .decode_without_bom_handling_and_without_replacement(&self.body)
            .ok_or_else(decode_error)?;
        Ok(self.text.get_or_init(|| decoded.into_owned()))
    }

    pub fn json(&self) -> Result<&serde_json::Value, FetchError> {
        if let Some(value) = self.json.get() {
            return Ok(value);
        }
        let value: serde_json::Value = serde_json::from_slice(&self.body)?;
        Ok(self.json.get_or_init(|| value))
    }
}

/// Prefix `version_id` with `source:` unless it already carries that prefix.
pub fn format_version_id(source: &str, version_id: &str) -> String {
    match version_id.strip_prefix(source) {
        Some(rest) if rest.starts_with(':') => version_id.to_string(),
        _ => format!("{}:{}", source, version_id),
    }
}

/// A discovered, not yet fetched, document.
///
/// Fields are private so the `source:` prefix on `version_id` always holds,
/// including for entries decoded from an index log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "EntryRecord")]
pub struct Entry {
    request: Request,
    version_id: String,
    source: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    doc_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    jurisdiction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    date: Option<String>,
}

#[derive(Deserialize)]
struct EntryRecord {
    request: Request,
    version_id: String,
    source: String,
    #[serde(rename = "type", default)]
    doc_type: Option<String>,
    #[serde(default)]
    jurisdiction: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    date: Option<String>,
}

impl From<EntryRecord> for Entry {
    fn from(record: EntryRecord) -> Self {
        Entry::new(record.request, &record.version_id, record.source)
            .with_hints(record.doc_type, record.jurisdiction, record.title, record.date)
    }
}

impl Entry {
    pub fn new(request: Request, version_id: &str, source: impl Into<String>) -> Self {
        let source = source.into();
        Self {
            request,
            version_id: format_version_id(&source, version_id),
            source,
            doc_type: None,
            jurisdiction: None,
            title: None,
            date: None,
        }
    }

    fn with_hints(
        mut self,
        doc_type: Option<String>,
        jurisdiction: Option<String>,
        title: Option<String>,
        date: Option<String>,
    ) -> Self {
        self.doc_type = doc_type;
        self.jurisdiction = jurisdiction;
        self.title = title;
        self.date = date;
        self
    }

    pub fn with_type(mut self, doc_type: impl Into<String>) -> Self {
        self.doc_type = Some(doc_type.into());
        self
    }

    pub fn with_jurisdiction(mut self, jurisdiction: impl Into<String>) -> Self {
        self.jurisdiction = Some(jurisdiction.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn version_id(&self) -> &str {
        &self.version_id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn doc_type(&self) -> Option<&str> {
        self.doc_type.as_deref()
    }

    pub fn jurisdiction(&self) -> Option<&str> {
        self.jurisdiction.as_deref()
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn date(&self) -> Option<&str> {
        self.date.as_deref()
    }
}

/// The outcome of indexing one discovery request. One line of `index/<source>.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedBatch {
    pub request: Request,
    pub entries: Vec<Entry>,
    pub when_indexed: DateTime<Utc>,
}

impl IndexedBatch {
    /// Build a batch stamped with the current time. Entries are stored
    /// sorted by version id with duplicates collapsed.
    pub fn new(request: Request, entries: impl IntoIterator<Item = Entry>) -> Self {
        let mut entries: Vec<Entry> = entries.into_iter().collect();
        entries.sort_by(|a, b| a.version_id.cmp(&b.version_id));
        entries.dedup_by(|a, b| a.version_id == b.version_id);
        Self {
            request,
            entries,
            when_indexed: Utc::now(),
        }
    }
}

/// A fully materialized corpus record. One line of `corpus.jsonl`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub version_id: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub jurisdiction: String,
    pub source: String,
    pub citation: String,
    pub url: String,
    pub mime: String,
    pub date: Option<String>,
    pub when_scraped: DateTime<Utc>,
    pub text: String,
}

impl Document {
    /// Materialize `entry` with the given text, carrying over its hints.
    ///
    /// The citation defaults to the entry's title and the URL to its request path.
    pub fn from_entry(entry: &Entry, mime: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            version_id: entry.version_id.clone(),
            doc_type: entry.doc_type.clone().unwrap_or_default(),
            jurisdiction: entry.jurisdiction.clone().unwrap_or_default(),
            source: entry.source.clone(),
            citation: entry.title.clone().unwrap_or_default(),
            url: entry.request.path.clone(),
            mime: mime.into(),
            date: entry.date.clone(),
            when_scraped: Utc::now(),
            text: text.into(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_citation(mut self, citation: impl Into<String>) -> Self {
        self.citation = citation.into();
        self
    }
}
