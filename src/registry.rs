//! Registry of configured sources.
//!
//! Use [`SourceRegistry::from_config`] to build every source declared in the
//! TOML config, then optionally [`register`](SourceRegistry::register) custom
//! [`Source`] implementations before handing a selection to the engine.
//!
//! ```rust
//! use std::collections::HashSet;
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use corpus_harvest::error::SourceError;
//! use corpus_harvest::models::{Document, Entry, Request};
//! use corpus_harvest::registry::SourceRegistry;
//! use corpus_harvest::source::Source;
//!
//! struct Gazette;
//!
//! #[async_trait]
//! impl Source for Gazette {
//!     fn name(&self) -> &str { "gazette" }
//!
//!     async fn get_index_requests(&self) -> Result<HashSet<Request>, SourceError> {
//!         Ok(HashSet::new())
//!     }
//!
//!     async fn get_index(&self, _: &Request) -> Result<HashSet<Entry>, SourceError> {
//!         Ok(HashSet::new())
//!     }
//!
//!     async fn get_document(&self, _: &Entry) -> Result<Option<Document>, SourceError> {
//!         Ok(None)
//!     }
//! }
//!
//! let mut sources = SourceRegistry::new();
//! sources.register(Arc::new(Gazette))?;
//! assert_eq!(sources.names(), vec!["gazette"]);
//! assert!(sources.register(Arc::new(Gazette)).is_err());
//! # Ok::<(), anyhow::Error>(())
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};

use crate::config::Config;
use crate::fetch::{build_client, Fetcher, RetryProfile};
use crate::source::Source;
use crate::source_fs::FilesystemSource;
use crate::source_http::HttpListingSource;
use crate::workers::WorkerPool;

#[derive(Default)]
pub struct SourceRegistry {
    sources: BTreeMap<String, Arc<dyn Source>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every source declared in `config`.
    ///
    /// All sources share one HTTP client; each gets its own [`Fetcher`] so
    /// concurrency limits and retry profiles stay per source.
    pub fn from_config(config: &Config, workers: &WorkerPool) -> Result<Self> {
        let client = build_client(
            Duration::from_secs(config.fetch.timeout_secs),
            &config.fetch.user_agent,
        )?;
        let base_profile = RetryProfile::default()
            .with_policy(config.retry.policy())
            .with_statuses(config.retry.statuses.iter().copied());

        let mut registry = Self::new();

        for (name, cfg) in &config.sources.filesystem {
            let fetcher = Fetcher::new(
                client.clone(),
                config.fetch.concurrency,
                base_profile.clone(),
            );
            registry.register(Arc::new(FilesystemSource::new(
                name.clone(),
                cfg.clone(),
                fetcher,
                workers.clone(),
            )?))?;
        }

        for (name, cfg) in &config.sources.http {
            let profile = base_profile
                .clone()
                .with_policy(cfg.fetch.policy(&config.retry))
                .with_statuses(cfg.fetch.statuses(&config.retry));
            let fetcher = Fetcher::new(
                client.clone(),
                cfg.fetch.concurrency.unwrap_or(config.fetch.concurrency),
                profile,
            );
            registry.register(Arc::new(HttpListingSource::new(
                name.clone(),
                cfg.clone(),
                fetcher,
                workers.clone(),
            )))?;
        }

        Ok(registry)
    }

    /// Register a source. Names must be unique.
    pub fn register(&mut self, source: Arc<dyn Source>) -> Result<()> {
        let name = source.name().to_string();
        if self.sources.contains_key(&name) {
            bail!("Source '{}' is already registered", name);
        }
        self.sources.insert(name, source);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Source>> {
        self.sources.get(name)
    }

    /// All sources in name order.
    pub fn all(&self) -> Vec<Arc<dyn Source>> {
        self.sources.values().cloned().collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.sources.keys().map(String::as_str).collect()
    }

    /// The named sources, or every source when `names` is empty.
    pub fn select(&self, names: &[String]) -> Result<Vec<Arc<dyn Source>>> {
        if names.is_empty() {
            return Ok(self.all());
        }
        let mut selected: Vec<Arc<dyn Source>> = Vec::with_capacity(names.len());
        for name in names {
            let Some(source) = self.sources.get(name) else {
                bail!(
                    "Unknown source '{}'. Available: {}",
                    name,
                    self.names().join(", ")
                );
            };
            if !selected.iter().any(|s| s.name() == name) {
                selected.push(Arc::clone(source));
            }
        }
        Ok(selected)
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }
}
