//! Paginated JSON listing source.
//!
//! Covers the common shape of public document APIs: a listing endpoint paged
//! by number, each page returning a JSON array of items with an id, and a
//! per-document URL built from that id. The number of pages is either fixed
//! in config or derived from a count endpoint.
//!
//! Documents are served as JSON (text at `text_pointer`), plain text/HTML, PDF
//! or DOCX. A 404 or 410 on a document means it is gone upstream.

use std::collections::HashSet;
use std::ops::Range;

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::config::HttpSourceConfig;
use crate::error::SourceError;
use crate::extract;
use crate::fetch::Fetcher;
use crate::models::{Document, Entry, Request, Response};
use crate::retry::RetryPolicy;
use crate::source::{RefreshPolicy, Source};
use crate::workers::WorkerPool;

pub struct HttpListingSource {
    name: String,
    config: HttpSourceConfig,
    fetcher: Fetcher,
    workers: WorkerPool,
}

impl HttpListingSource {
    pub fn new(
        name: impl Into<String>,
        config: HttpSourceConfig,
        fetcher: Fetcher,
        workers: WorkerPool,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            fetcher,
            workers,
        }
    }

    pub fn listing_url(&self) -> &str {
        &self.config.listing_url
    }

    fn listing_request(&self, page: u64) -> Request {
        Request::get(self.config.listing_url.replace("{page}", &page.to_string()))
            .with_header("accept", "application/json")
    }

    async fn page_count(&self) -> Result<u64, SourceError> {
        if let Some(pages) = self.config.pages {
            return Ok(pages);
        }
        let (Some(url), Some(pointer), Some(page_size)) = (
            &self.config.count_url,
            &self.config.count_pointer,
            self.config.page_size,
        ) else {
            return Err(anyhow!("source {} has no page count configured", self.name).into());
        };

        let request = Request::get(url.as_str()).with_header("accept", "application/json");
        let response = self.expect_success(&request).await?;
        let total = response
            .json()?
            .pointer(pointer)
            .and_then(as_count)
            .ok_or_else(|| {
                SourceError::Unparseable(format!("{}: no document count at {}", request, pointer))
            })?;
        Ok(total.div_ceil(page_size.max(1)))
    }

    async fn expect_success(&self, request: &Request) -> Result<Response, SourceError> {
        let response = self.fetcher.fetch(request).await?;
        if !response.is_success() {
            return Err(anyhow!("{} returned status {}", request, response.status()).into());
        }
        Ok(response)
    }

    fn entry_from_item(&self, item: &Value) -> Option<Entry> {
        let id = item.get(&self.config.id_field).and_then(as_id)?;
        let url = self.config.document_url.replace("{id}", &id);

        let mut entry = Entry::new(Request::get(url), &id, self.name.as_str())
            .with_type(self.config.doc_type.as_str());
        if !self.config.jurisdiction.is_empty() {
            entry = entry.with_jurisdiction(self.config.jurisdiction.as_str());
        }
        if let Some(title) = self.field_str(item, self.config.title_field.as_deref()) {
            entry = entry.with_title(title);
        }
        if let Some(date) = self.field_str(item, self.config.date_field.as_deref()) {
            entry = entry.with_date(date);
        }
        Some(entry)
    }

    fn field_str(&self, item: &Value, field: Option<&str>) -> Option<String> {
        item.get(field?)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    async fn document_text(&self, response: Response, mime: &str) -> Result<String, SourceError> {
        if mime == "application/json" {
            let pointer = self.config.text_pointer.as_deref().unwrap_or("");
            return response
                .json()
                .ok()
                .and_then(|v| v.pointer(pointer))
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| SourceError::Unparseable(format!("no text at '{}'", pointer)));
        }
        if mime.starts_with("text/") {
            return Ok(response.text()?.to_string());
        }
        if extract::is_supported(mime) {
            let mime_owned = mime.to_string();
            return self
                .workers
                .run(move || extract::extract_text(response.into_bytes(), &mime_owned))
                .await?
                .map_err(|e| SourceError::Unparseable(e.to_string()));
        }
        Err(anyhow!("unsupported content type {}", mime).into())
    }
}

fn as_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Listing page numbers `first..first + pages`, if the last one fits in a `u64`.
fn page_range(first: u64, pages: u64) -> Option<Range<u64>> {
    first.checked_add(pages).map(|end| first..end)
}

fn as_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().replace(',', "").parse().ok(),
        _ => None,
    }
}

#[async_trait]
impl Source for HttpListingSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        "http"
    }

    fn indices_refresh(&self) -> RefreshPolicy {
        self.config.indices_refresh
    }

    fn index_refresh(&self) -> RefreshPolicy {
        self.config.index_refresh
    }

    fn document_retry(&self) -> RetryPolicy {
        self.fetcher.profile().policy.clone()
    }

    async fn get_index_requests(&self) -> Result<HashSet<Request>, SourceError> {
        let pages = self.page_count().await?;
        debug!(source = %self.name, pages, "listing pages");
        let first = self.config.first_page;
        let range = page_range(first, pages).ok_or_else(|| {
            SourceError::Unparseable(format!(
                "{}: {} listing pages from page {} overflow the page number",
                self.name, pages, first
            ))
        })?;
        Ok(range.map(|page| self.listing_request(page)).collect())
    }

    async fn get_index(&self, request: &Request) -> Result<HashSet<Entry>, SourceError> {
        let response = self.expect_success(request).await?;
        let json = response.json()?;
        let items = json
            .pointer(&self.config.items_pointer)
            .and_then(Value::as_array)
            .ok_or_else(|| {
                SourceError::Unparseable(format!(
                    "{}: no item array at '{}'",
                    request, self.config.items_pointer
                ))
            })?;

        let entries: HashSet<Entry> = items
            .iter()
            .filter_map(|item| self.entry_from_item(item))
            .collect();
        if !items.is_empty() && entries.is_empty() {
            return Err(SourceError::EmptyIndex {
                request: request.clone(),
            });
        }
        Ok(entries)
    }

    async fn get_document(&self, entry: &Entry) -> Result<Option<Document>, SourceError> {
        let response = self.fetcher.fetch(entry.request()).await?;
        match response.status() {
            404 | 410 => return Ok(None),
            _ if !response.is_success() => {
                return Err(anyhow!(
                    "{} returned status {}",
                    entry.request(),
                    response.status()
                )
                .into());
            }
            _ => {}
        }

        let mime = response
            .content_type()
            .map(str::to_ascii_lowercase)
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let text = self.document_text(response, &mime).await?;
        Ok(Some(Document::from_entry(entry, mime, text)))
    }
}
