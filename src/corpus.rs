//! Corpus repair and backfill.
//!
//! The corpus is an append-only JSONL file of [`Document`]s. Each run first
//! repairs it (dropping corrupt lines, duplicates and documents whose entry
//! disappeared from a processed source) and then backfills the entries that
//! have no document yet.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{bail, Context, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use rand::seq::SliceRandom;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, error, info, warn};

use crate::index::LocatedEntry;
use crate::jsonl::{self, JsonlAppender, LineReader};
use crate::models::Document;
use crate::progress::{ProgressReporter, RunProgressEvent};
use crate::source::fetch_document;

#[derive(Debug, Default)]
pub struct Repair {
    /// Version ids present in the corpus after repair.
    pub kept: HashSet<String>,
    /// Lines removed because they could not be decoded.
    pub corrupted: usize,
    /// Documents removed as duplicates or no longer indexed.
    pub dropped: usize,
}

/// Rewrite the corpus keeping, for each line in order, only documents that
/// decode, whose id has not been kept already, and whose id is live or whose
/// source is not part of this run.
///
/// Surviving lines are copied byte-for-byte. The rewrite goes through
/// `<corpus>.tmp` and an atomic rename.
pub async fn repair_corpus<V>(
    path: &Path,
    live: &HashMap<String, V>,
    active_sources: &HashSet<String>,
) -> Result<Repair> {
    let mut repair = Repair::default();
    if !tokio::fs::try_exists(path).await? {
        return Ok(repair);
    }

    let tmp = jsonl::tmp_path(path);
    let file = File::create(&tmp)
        .await
        .with_context(|| format!("Failed to create {}", tmp.display()))?;
    let mut out = BufWriter::new(file);

    let mut lines = LineReader::open(path).await?;
    while let Some((line_no, line)) = lines.next_line().await? {
        let body = jsonl::trim_newline(line);
        if body.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let document: Document = match serde_json::from_slice(body) {
            Ok(document) => document,
            Err(err) => {
                warn!(
                    path = %path.display(),
                    line = line_no,
                    error = %err,
                    "dropping corrupted corpus line"
                );
                repair.corrupted += 1;
                continue;
            }
        };

        let keep = !repair.kept.contains(&document.version_id)
            && (live.contains_key(&document.version_id)
                || !active_sources.contains(&document.source));
        if !keep {
            debug!(version_id = %document.version_id, "dropping document");
            repair.dropped += 1;
            continue;
        }

        out.write_all(body).await?;
        out.write_all(b"\n").await?;
        repair.kept.insert(document.version_id);
    }

    out.flush().await?;
    out.into_inner().sync_all().await?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to replace {}", path.display()))?;

    info!(
        kept = repair.kept.len(),
        dropped = repair.dropped,
        corrupted = repair.corrupted,
        "repaired corpus"
    );
    Ok(repair)
}

#[derive(Debug, Default)]
pub struct Backfill {
    pub added: u64,
    /// Entries whose document no longer exists upstream.
    pub missing: u64,
}

/// Fetch every entry in `missing` in random order and append each document
/// as it arrives.
///
/// The first unclassified failure stops the phase; documents already
/// appended stay in the corpus.
pub async fn backfill(
    path: &Path,
    mut missing: Vec<LocatedEntry>,
    progress: &dyn ProgressReporter,
) -> Result<Backfill> {
    let mut report = Backfill::default();
    let total = missing.len() as u64;
    if total == 0 {
        return Ok(report);
    }

    missing.shuffle(&mut rand::rng());
    let corpus = JsonlAppender::open(path).await?;

    let mut pending: FuturesUnordered<_> = missing
        .into_iter()
        .map(|located| async move {
            let result = fetch_document(located.source.as_ref(), &located.entry).await;
            (located, result)
        })
        .collect();

    while let Some((located, result)) = pending.next().await {
        let entry = &located.entry;
        let document = result
            .map_err(|err| {
                error!(
                    source = entry.source(),
                    version_id = entry.version_id(),
                    request = %entry.request(),
                    error = %err,
                    "document fetch failed"
                );
                err
            })
            .with_context(|| format!("failed to fetch {}", entry.version_id()))?;

        match document {
            Some(document) => {
                if document.version_id != entry.version_id() {
                    bail!(
                        "source {} returned document {} for entry {}",
                        entry.source(),
                        document.version_id,
                        entry.version_id()
                    );
                }
                corpus.append(&document).await?;
                report.added += 1;
            }
            None => {
                info!(version_id = entry.version_id(), "document missing upstream");
                report.missing += 1;
            }
        }

        progress.report(RunProgressEvent::Fetching {
            n: report.added + report.missing,
            total,
        });
    }

    Ok(report)
}
