//! The harvest run.
//!
//! A run takes the corpus and per-source state from whatever a previous
//! (possibly interrupted) run left behind to a corpus holding exactly one
//! document per live entry of the selected sources:
//!
//! ```text
//! discover ─▶ reconcile index ─▶ index ─▶ flatten ─▶ repair corpus ─▶ backfill
//! ```
//!
//! Every phase persists its progress as it goes, so killing the process at
//! any point and rerunning resumes without redoing finished work.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use rand::seq::SliceRandom;
use tracing::info;

use crate::corpus;
use crate::index::{self, LocatedEntry};
use crate::models::Request;
use crate::progress::{NoProgress, ProgressReporter, RunProgressEvent};
use crate::source::Source;
use crate::state::StateLayout;
use crate::versions;

/// Counts from one run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub sources: usize,
    pub discovery_requests: usize,
    pub batches_dropped: usize,
    pub requests_indexed: u64,
    pub entries: usize,
    pub corpus_kept: usize,
    pub corpus_dropped: usize,
    pub corpus_corrupted: usize,
    pub documents_added: u64,
    pub documents_missing: u64,
}

impl RunReport {
    /// Whether the corpus already matched the index before this run fetched anything.
    pub fn was_up_to_date(&self) -> bool {
        self.requests_indexed == 0 && self.documents_added == 0 && self.documents_missing == 0
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  sources: {}", self.sources)?;
        writeln!(f, "  discovery requests: {}", self.discovery_requests)?;
        writeln!(f, "  batches dropped: {}", self.batches_dropped)?;
        writeln!(f, "  requests indexed: {}", self.requests_indexed)?;
        writeln!(f, "  entries: {}", self.entries)?;
        writeln!(f, "  corpus kept: {}", self.corpus_kept)?;
        writeln!(f, "  corpus dropped: {}", self.corpus_dropped)?;
        writeln!(f, "  corpus corrupted: {}", self.corpus_corrupted)?;
        writeln!(f, "  documents added: {}", self.documents_added)?;
        write!(f, "  documents missing: {}", self.documents_missing)
    }
}

pub struct Harvester {
    sources: Vec<Arc<dyn Source>>,
    layout: StateLayout,
    progress: Box<dyn ProgressReporter>,
}

impl Harvester {
    /// Reconcile format versions and create the state layout.
    pub async fn open(sources: Vec<Arc<dyn Source>>, layout: StateLayout) -> Result<Self> {
        let mut seen = HashSet::new();
        for source in &sources {
            if !seen.insert(source.name().to_string()) {
                bail!("Source '{}' selected more than once", source.name());
            }
        }

        versions::reconcile(&layout).await?;
        layout.prepare().await?;
        Ok(Self {
            sources,
            layout,
            progress: Box::new(NoProgress),
        })
    }

    pub fn with_progress(mut self, progress: Box<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn layout(&self) -> &StateLayout {
        &self.layout
    }

    pub async fn run(&self) -> Result<RunReport> {
        let mut report = RunReport {
            sources: self.sources.len(),
            ..RunReport::default()
        };

        // Discovery runs concurrently across sources.
        let discovered = futures::future::try_join_all(self.sources.iter().map(|source| {
            self.progress.report(RunProgressEvent::Discovering {
                source: source.name().to_string(),
            });
            async move {
                index::load_index_requests(&self.layout, source.as_ref())
                    .await
                    .with_context(|| format!("{}: discovery failed", source.name()))
            }
        }))
        .await?;

        let mut work: Vec<(Arc<dyn Source>, Request)> = Vec::new();
        for (source, requests) in self.sources.iter().zip(&discovered) {
            report.discovery_requests += requests.len();
            let reconciled = index::reconcile_index(&self.layout, source.as_ref(), requests).await?;
            report.batches_dropped += reconciled.dropped;
            work.extend(
                reconciled
                    .unindexed
                    .into_iter()
                    .map(|request| (Arc::clone(source), request)),
            );
        }

        work.shuffle(&mut rand::rng());
        info!(requests = work.len(), "indexing");
        report.requests_indexed =
            index::run_indexing(&self.layout, work, self.progress.as_ref()).await?;

        let entries = index::flatten_entries(&self.layout, &self.sources).await?;
        report.entries = entries.len();

        let active: HashSet<String> = self.sources.iter().map(|s| s.name().to_string()).collect();
        let repair = corpus::repair_corpus(self.layout.corpus(), &entries, &active).await?;
        report.corpus_kept = repair.kept.len();
        report.corpus_dropped = repair.dropped;
        report.corpus_corrupted = repair.corrupted;

        let missing: Vec<LocatedEntry> = entries
            .into_iter()
            .filter(|(id, _)| !repair.kept.contains(id))
            .map(|(_, located)| located)
            .collect();

        if missing.is_empty() {
            info!("corpus is up to date");
            return Ok(report);
        }

        info!(documents = missing.len(), "fetching documents");
        let backfill =
            corpus::backfill(self.layout.corpus(), missing, self.progress.as_ref()).await?;
        report.documents_added = backfill.added;
        report.documents_missing = backfill.missing;

        Ok(report)
    }
}
