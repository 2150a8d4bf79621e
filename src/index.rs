//! Discovery caching, index staleness and the indexing phase.
//!
//! Each source's discovery requests are cached in `indices/<source>.json`
//! and regenerated when the file's age exceeds the source's
//! `indices_refresh`. Indexing results are appended to
//! `index/<source>.jsonl`, one [`IndexedBatch`] per discovery request; a
//! batch is dropped (and so re-indexed) once its request leaves the current
//! set or its age exceeds `index_refresh`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, error, info};

use crate::jsonl::{self, JsonlAppender};
use crate::models::{Entry, IndexedBatch, Request};
use crate::progress::{ProgressReporter, RunProgressEvent};
use crate::source::Source;
use crate::state::StateLayout;

/// Load the cached discovery requests for `source`, regenerating them when
/// the cache is missing or stale.
pub async fn load_index_requests(
    layout: &StateLayout,
    source: &dyn Source,
) -> Result<HashSet<Request>> {
    let path = layout.indices(source.name());

    let stale = match tokio::fs::metadata(&path).await {
        Ok(meta) => {
            let age = meta
                .modified()
                .ok()
                .and_then(|m| SystemTime::now().duration_since(m).ok())
                .unwrap_or(Duration::ZERO);
            source.indices_refresh().is_stale(age)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to stat {}", path.display()));
        }
    };

    if !stale {
        let requests: Vec<Request> = jsonl::read_json(&path).await?;
        debug!(source = source.name(), count = requests.len(), "using cached discovery requests");
        return Ok(requests.into_iter().collect());
    }

    let requests = source.get_index_requests().await.map_err(|err| {
        error!(source = source.name(), error = %err, "discovery failed");
        err
    })?;

    let mut sorted: Vec<&Request> = requests.iter().collect();
    sorted.sort();
    jsonl::write_json(&path, &sorted).await?;
    info!(source = source.name(), count = requests.len(), "regenerated discovery requests");
    Ok(requests)
}

/// Outcome of reconciling a source's index log with its current requests.
#[derive(Debug, Default)]
pub struct Reconciled {
    /// Requests with no surviving batch.
    pub unindexed: HashSet<Request>,
    /// Batches dropped as stale or orphaned.
    pub dropped: usize,
}

/// Drop batches whose request is no longer current or whose age exceeds the
/// source's `index_refresh`, and return the requests left to index.
///
/// The log is rewritten only when something was dropped.
pub async fn reconcile_index(
    layout: &StateLayout,
    source: &dyn Source,
    requests: &HashSet<Request>,
) -> Result<Reconciled> {
    let path = layout.index(source.name());
    let loaded: jsonl::Loaded<IndexedBatch> = jsonl::read_records(&path).await?;
    let total = loaded.records.len();

    let policy = source.index_refresh();
    let now = Utc::now();
    let kept: Vec<IndexedBatch> = loaded
        .records
        .into_iter()
        .filter(|batch| {
            let age = (now - batch.when_indexed).to_std().unwrap_or(Duration::ZERO);
            requests.contains(&batch.request) && !policy.is_stale(age)
        })
        .collect();

    let dropped = total - kept.len();
    if dropped > 0 || loaded.skipped > 0 {
        jsonl::write_records(&path, &kept).await?;
        debug!(source = source.name(), dropped, "rewrote index log");
    }

    let indexed: HashSet<&Request> = kept.iter().map(|b| &b.request).collect();
    let unindexed = requests
        .iter()
        .filter(|r| !indexed.contains(r))
        .cloned()
        .collect();

    Ok(Reconciled { unindexed, dropped })
}

/// Index every `(source, request)` pair concurrently, appending each batch
/// to its source's log as soon as it completes.
///
/// The first failure aborts the phase: pending requests are cancelled and
/// batches already appended stay on disk.
pub async fn run_indexing(
    layout: &StateLayout,
    work: Vec<(Arc<dyn Source>, Request)>,
    progress: &dyn ProgressReporter,
) -> Result<u64> {
    let total = work.len() as u64;
    if total == 0 {
        return Ok(0);
    }

    let mut logs: HashMap<String, JsonlAppender> = HashMap::new();
    for (source, _) in &work {
        if !logs.contains_key(source.name()) {
            let appender = JsonlAppender::open(&layout.index(source.name())).await?;
            logs.insert(source.name().to_string(), appender);
        }
    }

    let mut pending: FuturesUnordered<_> = work
        .into_iter()
        .map(|(source, request)| async move {
            let result = source.get_index(&request).await;
            (source, request, result)
        })
        .collect();

    let mut done = 0u64;
    while let Some((source, request, result)) = pending.next().await {
        let entries = result
            .map_err(|err| {
                error!(source = source.name(), request = %request, error = %err, "indexing failed");
                err
            })
            .with_context(|| format!("{}: failed to index {}", source.name(), request))?;

        let batch = IndexedBatch::new(request, entries);
        debug!(source = source.name(), request = %batch.request, entries = batch.entries.len(), "indexed");
        if let Some(log) = logs.get(source.name()) {
            log.append(&batch).await?;
        }

        done += 1;
        progress.report(RunProgressEvent::Indexing { n: done, total });
    }

    Ok(done)
}

/// An entry paired with the source that can materialize it.
#[derive(Clone)]
pub struct LocatedEntry {
    pub source: Arc<dyn Source>,
    pub entry: Entry,
}

/// Collapse every source's index log into a map from version id to entry.
/// When a version id appears more than once, the last occurrence wins.
pub async fn flatten_entries(
    layout: &StateLayout,
    sources: &[Arc<dyn Source>],
) -> Result<HashMap<String, LocatedEntry>> {
    let mut entries = HashMap::new();
    for source in sources {
        let loaded: jsonl::Loaded<IndexedBatch> =
            jsonl::read_records(&layout.index(source.name())).await?;
        for batch in loaded.records {
            for entry in batch.entries {
                entries.insert(
                    entry.version_id().to_string(),
                    LocatedEntry {
                        source: Arc::clone(source),
                        entry,
                    },
                );
            }
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::models::Document;
    use crate::progress::NoProgress;
    use crate::source::RefreshPolicy;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Pages {
        name: &'static str,
        pages: u32,
        discoveries: AtomicU32,
        indices_refresh: RefreshPolicy,
        index_refresh: RefreshPolicy,
    }

    impl Pages {
        fn new(name: &'static str, pages: u32) -> Self {
            Self {
                name,
                pages,
                discoveries: AtomicU32::new(0),
                indices_refresh: RefreshPolicy::default(),
                index_refresh: RefreshPolicy::default(),
            }
        }
    }

    #[async_trait]
    impl Source for Pages {
        fn name(&self) -> &str {
            self.name
        }

        fn indices_refresh(&self) -> RefreshPolicy {
            self.indices_refresh
        }

        fn index_refresh(&self) -> RefreshPolicy {
            self.index_refresh
        }

        async fn get_index_requests(&self) -> Result<HashSet<Request>, SourceError> {
            self.discoveries.fetch_add(1, Ordering::SeqCst);
            Ok((0..self.pages)
                .map(|p| Request::get(format!("https://x/{}?page={}", self.name, p)))
                .collect())
        }

        async fn get_index(&self, request: &Request) -> Result<HashSet<Entry>, SourceError> {
            let page = request.path.rsplit('=').next().unwrap_or_default().to_string();
            Ok(HashSet::from([Entry::new(
                Request::get(format!("https://x/doc/{}", page)),
                &page,
                self.name,
            )]))
        }

        async fn get_document(&self, entry: &Entry) -> Result<Option<Document>, SourceError> {
            Ok(Some(Document::from_entry(entry, "text/plain", "")))
        }
    }

    async fn layout() -> (tempfile::TempDir, StateLayout) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StateLayout::new(dir.path().join("data"), dir.path().join("corpus.jsonl"));
        layout.prepare().await.unwrap();
        (dir, layout)
    }

    #[tokio::test]
    async fn discovery_is_cached_while_fresh() {
        let (_dir, layout) = layout().await;
        let source = Pages::new("a", 3);

        let first = load_index_requests(&layout, &source).await.unwrap();
        let second = load_index_requests(&layout, &source).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
        assert_eq!(source.discoveries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn indexing_then_reconcile_leaves_nothing_to_do() {
        let (_dir, layout) = layout().await;
        let source: Arc<dyn Source> = Arc::new(Pages::new("a", 4));
        let requests = load_index_requests(&layout, source.as_ref()).await.unwrap();

        let todo = reconcile_index(&layout, source.as_ref(), &requests).await.unwrap();
        assert_eq!(todo.unindexed.len(), 4);

        let work = todo
            .unindexed
            .into_iter()
            .map(|r| (Arc::clone(&source), r))
            .collect();
        assert_eq!(run_indexing(&layout, work, &NoProgress).await.unwrap(), 4);

        let again = reconcile_index(&layout, source.as_ref(), &requests).await.unwrap();
        assert!(again.unindexed.is_empty());
        assert_eq!(again.dropped, 0);

        let flat = flatten_entries(&layout, &[source]).await.unwrap();
        let mut ids: Vec<_> = flat.keys().cloned().collect();
        ids.sort();
        assert_eq!(ids, vec!["a:0", "a:1", "a:2", "a:3"]);
    }

    #[tokio::test]
    async fn orphaned_and_always_refreshed_batches_are_dropped() {
        let (_dir, layout) = layout().await;
        let source: Arc<dyn Source> = Arc::new(Pages::new("a", 2));
        let requests = load_index_requests(&layout, source.as_ref()).await.unwrap();
        let work = requests.iter().map(|r| (Arc::clone(&source), r.clone())).collect();
        run_indexing(&layout, work, &NoProgress).await.unwrap();

        // One request leaves the current set.
        let mut fewer = requests.clone();
        let gone = fewer.iter().next().cloned().unwrap();
        fewer.remove(&gone);
        let r = reconcile_index(&layout, source.as_ref(), &fewer).await.unwrap();
        assert_eq!(r.dropped, 1);
        assert!(r.unindexed.is_empty());

        let mut always = Pages::new("a", 2);
        always.index_refresh = RefreshPolicy::Always;
        let r = reconcile_index(&layout, &always, &fewer).await.unwrap();
        assert_eq!(r.dropped, 1);
        assert_eq!(r.unindexed, fewer);
        assert_eq!(std::fs::read_to_string(layout.index("a")).unwrap(), "");
    }

    const HOUR: Duration = Duration::from_secs(60 * 60);

    #[tokio::test]
    async fn discovery_cache_older_than_interval_is_regenerated() {
        let (_dir, layout) = layout().await;
        let mut source = Pages::new("a", 2);
        source.indices_refresh = RefreshPolicy::Every(HOUR);

        load_index_requests(&layout, &source).await.unwrap();
        let age = |secs: u64| {
            let file = std::fs::File::options()
                .write(true)
                .open(layout.indices("a"))
                .unwrap();
            file.set_modified(SystemTime::now() - Duration::from_secs(secs))
                .unwrap();
        };

        age(30 * 60);
        load_index_requests(&layout, &source).await.unwrap();
        assert_eq!(source.discoveries.load(Ordering::SeqCst), 1);

        age(2 * 60 * 60);
        let requests = load_index_requests(&layout, &source).await.unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(source.discoveries.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn batches_older_than_interval_are_reindexed() {
        let (_dir, layout) = layout().await;
        let mut pages = Pages::new("a", 2);
        pages.index_refresh = RefreshPolicy::Every(HOUR);
        let source: Arc<dyn Source> = Arc::new(pages);
        let requests = load_index_requests(&layout, source.as_ref()).await.unwrap();
        let work = requests.iter().map(|r| (Arc::clone(&source), r.clone())).collect();
        run_indexing(&layout, work, &NoProgress).await.unwrap();

        // Backdate one batch past the interval and another just inside it.
        let path = layout.index("a");
        let mut batches = jsonl::read_records::<IndexedBatch>(&path).await.unwrap().records;
        batches.sort_by(|a, b| a.request.cmp(&b.request));
        batches[0].when_indexed = Utc::now() - chrono::Duration::hours(2);
        batches[1].when_indexed = Utc::now() - chrono::Duration::minutes(30);
        let old = batches[0].request.clone();
        jsonl::write_records(&path, &batches).await.unwrap();

        let r = reconcile_index(&layout, source.as_ref(), &requests).await.unwrap();
        assert_eq!(r.dropped, 1);
        assert_eq!(r.unindexed, HashSet::from([old.clone()]));

        let work = vec![(Arc::clone(&source), old)];
        run_indexing(&layout, work, &NoProgress).await.unwrap();
        let r = reconcile_index(&layout, source.as_ref(), &requests).await.unwrap();
        assert!(r.unindexed.is_empty());
        assert_eq!(r.dropped, 0);
    }
}
