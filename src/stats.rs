//! Corpus and index statistics.
//!
//! Provides a quick summary of what has been harvested: documents per source,
//! corrupted corpus lines, and index log coverage. Used by `mkcorpus stats`
//! to give confidence that runs are converging.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::jsonl::{self, LineReader};
use crate::models::{Document, IndexedBatch};
use crate::state::StateLayout;

/// Per-source counts gathered from the corpus and index log.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SourceStats {
    pub documents: u64,
    pub batches: u64,
    pub entries: u64,
    pub last_indexed: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct CorpusStats {
    pub corpus_bytes: u64,
    pub documents: u64,
    pub corrupted: u64,
    pub by_source: BTreeMap<String, SourceStats>,
}

/// Read the corpus and every configured source's index log.
pub async fn collect_stats(config: &Config) -> Result<CorpusStats> {
    let layout = StateLayout::new(&config.state.data_dir, &config.corpus.path);
    let mut stats = CorpusStats::default();

    for name in config.sources.names() {
        stats.by_source.entry(name).or_default();
    }

    if tokio::fs::try_exists(layout.corpus()).await? {
        stats.corpus_bytes = tokio::fs::metadata(layout.corpus()).await?.len();
        let mut lines = LineReader::open(layout.corpus()).await?;
        while let Some((_, line)) = lines.next_line().await? {
            let body = jsonl::trim_newline(line);
            if body.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<Document>(body) {
                Ok(doc) => {
                    stats.documents += 1;
                    stats.by_source.entry(doc.source).or_default().documents += 1;
                }
                Err(_) => stats.corrupted += 1,
            }
        }
    }

    let names: Vec<String> = stats.by_source.keys().cloned().collect();
    for name in names {
        let loaded: jsonl::Loaded<IndexedBatch> = jsonl::read_records(&layout.index(&name)).await?;
        let entry = stats.by_source.entry(name).or_default();
        for batch in loaded.records {
            entry.batches += 1;
            entry.entries += batch.entries.len() as u64;
            entry.last_indexed = entry.last_indexed.max(Some(batch.when_indexed));
        }
    }

    Ok(stats)
}

/// Run the stats command: read state and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let stats = collect_stats(config).await?;

    println!("mkcorpus: Corpus Stats");
    println!("======================");
    println!();
    println!("  Corpus:      {}", config.corpus.path.display());
    println!("  Size:        {}", format_bytes(stats.corpus_bytes));
    println!("  Data dir:    {}", config.state.data_dir.display());
    println!();
    println!("  Documents:   {}", stats.documents);
    println!("  Corrupted:   {}", stats.corrupted);

    if !stats.by_source.is_empty() {
        println!();
        println!("  By source:");
        println!(
            "  {:<24} {:>8} {:>8} {:>8}   {}",
            "SOURCE", "DOCS", "PAGES", "ENTRIES", "LAST INDEXED"
        );
        println!("  {}", "-".repeat(72));
        for (name, s) in &stats.by_source {
            let indexed = match s.last_indexed {
                Some(ts) => format_ts_relative(ts.timestamp()),
                None => "never".to_string(),
            };
            println!(
                "  {:<24} {:>8} {:>8} {:>8}   {}",
                name, s.documents, s.batches, s.entries, indexed
            );
        }
    }

    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = Utc::now().timestamp() - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }
    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
