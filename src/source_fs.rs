//! Filesystem source.
//!
//! Walks a local directory tree. Every directory containing at least one
//! matching file is a discovery request; indexing a directory lists its
//! matching files. A file's version id is its root-relative path plus a short
//! hash of its size and modification time, so an edited file becomes a new
//! version and the old one is dropped from the corpus.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use tracing::warn;
use walkdir::WalkDir;

use crate::config::FilesystemSourceConfig;
use crate::error::SourceError;
use crate::extract;
use crate::fetch::Fetcher;
use crate::models::{Document, Entry, Request};
use crate::source::{RefreshPolicy, Source};
use crate::workers::WorkerPool;

pub struct FilesystemSource {
    name: String,
    config: FilesystemSourceConfig,
    filter: Arc<PathFilter>,
    fetcher: Fetcher,
    workers: WorkerPool,
}

/// Include/exclude globs matched against root-relative paths.
struct PathFilter {
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
}

impl PathFilter {
    fn new(config: &FilesystemSourceConfig) -> Result<Self> {
        let mut excludes = vec!["**/.git/**".to_string()];
        excludes.extend(config.exclude_globs.iter().cloned());
        Ok(Self {
            root: config.root.clone(),
            include: build_globset(&config.include_globs)?,
            exclude: build_globset(&excludes)?,
        })
    }

    fn relative(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    fn matches(&self, path: &Path) -> bool {
        let rel = self.relative(path);
        !self.exclude.is_match(&rel) && self.include.is_match(&rel)
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("invalid glob '{}'", pattern))?);
    }
    Ok(builder.build()?)
}

impl FilesystemSource {
    pub fn new(
        name: impl Into<String>,
        config: FilesystemSourceConfig,
        fetcher: Fetcher,
        workers: WorkerPool,
    ) -> Result<Self> {
        let name = name.into();
        let filter = Arc::new(PathFilter::new(&config)?);
        Ok(Self {
            name,
            config,
            filter,
            fetcher,
            workers,
        })
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    fn entry_for(&self, path: &Path, meta: &std::fs::Metadata) -> Entry {
        let rel = self.filter.relative(path);
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let mtime_ns = modified
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();

        let mut hasher = Sha256::new();
        hasher.update(meta.len().to_le_bytes());
        hasher.update(mtime_ns.to_le_bytes());
        let digest = hex::encode(hasher.finalize());

        let title = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| rel.clone());
        let date = DateTime::<Utc>::from(modified).format("%Y-%m-%d").to_string();

        let mut entry = Entry::new(
            Request::open(path.to_string_lossy()),
            &format!("{}@{}", rel, &digest[..12]),
            self.name.as_str(),
        )
        .with_type(self.config.doc_type.as_str())
        .with_title(title)
        .with_date(date);
        if !self.config.jurisdiction.is_empty() {
            entry = entry.with_jurisdiction(self.config.jurisdiction.as_str());
        }
        entry
    }
}

#[async_trait]
impl Source for FilesystemSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        "filesystem"
    }

    fn indices_refresh(&self) -> RefreshPolicy {
        self.config.indices_refresh
    }

    fn index_refresh(&self) -> RefreshPolicy {
        self.config.index_refresh
    }

    async fn get_index_requests(&self) -> Result<HashSet<Request>, SourceError> {
        if !self.config.root.is_dir() {
            return Err(anyhow!(
                "Filesystem source '{}' root does not exist: {}",
                self.name,
                self.config.root.display()
            )
            .into());
        }
        let filter = Arc::clone(&self.filter);
        let follow = self.config.follow_symlinks;
        let dirs = self
            .workers
            .run(move || -> Result<BTreeSet<PathBuf>> {
                let mut dirs = BTreeSet::new();
                for entry in WalkDir::new(&filter.root).follow_links(follow) {
                    let entry = entry?;
                    if entry.file_type().is_file() && filter.matches(entry.path()) {
                        if let Some(parent) = entry.path().parent() {
                            dirs.insert(parent.to_path_buf());
                        }
                    }
                }
                Ok(dirs)
            })
            .await??;

        Ok(dirs
            .into_iter()
            .map(|dir| Request::open(dir.to_string_lossy()))
            .collect())
    }

    async fn get_index(&self, request: &Request) -> Result<HashSet<Entry>, SourceError> {
        let filter = Arc::clone(&self.filter);
        let dir = PathBuf::from(&request.path);
        let follow = self.config.follow_symlinks;
        let files = self
            .workers
            .run(move || -> Result<Vec<(PathBuf, std::fs::Metadata)>> {
                let mut files = Vec::new();
                if !dir.is_dir() {
                    return Ok(files);
                }
                let walker = WalkDir::new(&dir)
                    .min_depth(1)
                    .max_depth(1)
                    .follow_links(follow);
                for entry in walker {
                    let entry = entry?;
                    if entry.file_type().is_file() && filter.matches(entry.path()) {
                        let meta = entry.metadata()?;
                        files.push((entry.into_path(), meta));
                    }
                }
                Ok(files)
            })
            .await??;

        Ok(files
            .iter()
            .map(|(path, meta)| self.entry_for(path, meta))
            .collect())
    }

    async fn get_document(&self, entry: &Entry) -> Result<Option<Document>, SourceError> {
        let path = PathBuf::from(&entry.request().path);
        let response = match self.fetcher.fetch(entry.request()).await {
            Ok(response) => response,
            Err(err) if err.io_kind() == Some(std::io::ErrorKind::NotFound) => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let Some(mime) = extract::mime_for_path(&path) else {
            warn!(path = %path.display(), "no extractor for file type; treating as missing");
            return Ok(None);
        };

        let text = match self
            .workers
            .run(move || extract::extract_text(response.into_bytes(), mime))
            .await?
        {
            Ok(text) => text,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "extraction failed; treating as missing");
                return Ok(None);
            }
        };

        Ok(Some(
            Document::from_entry(entry, mime, text).with_url(format!("file://{}", path.display())),
        ))
    }
}
