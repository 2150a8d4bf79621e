//! Run progress reporting.
//!
//! Reports observable progress during `mkcorpus create` so users see which
//! source is being discovered and how many index pages and documents are
//! left. Progress is emitted on **stderr** so stdout remains parseable for
//! scripts.

use std::io::Write;

/// A single progress event for a run.
#[derive(Clone, Debug)]
pub enum RunProgressEvent {
    /// Discovery requests are being loaded or regenerated for this source.
    Discovering { source: String },
    /// Index phase: n discovery requests indexed out of total.
    Indexing { n: u64, total: u64 },
    /// Document phase: n entries resolved (added or missing) out of total.
    Fetching { n: u64, total: u64 },
}

/// Reports run progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: RunProgressEvent);
}

/// Human-friendly progress on stderr: "fetching  1,234 / 5,000 documents (24%)".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: RunProgressEvent) {
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr, "{}", human_line(&event));
        let _ = stderr.flush();
    }
}

fn human_line(event: &RunProgressEvent) -> String {
    let counted = |phase: &str, n: u64, total: u64, unit: &str| {
        let percent = if total == 0 { 100 } else { n * 100 / total };
        format!(
            "{:<9} {} / {} {} ({}%)",
            phase,
            format_number(n),
            format_number(total),
            unit,
            percent
        )
    };
    match event {
        RunProgressEvent::Discovering { source } => format!("{:<9} {}", "discover", source),
        RunProgressEvent::Indexing { n, total } => counted("indexing", *n, *total, "pages"),
        RunProgressEvent::Fetching { n, total } => counted("fetching", *n, *total, "documents"),
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: RunProgressEvent) {
        let obj = match &event {
            RunProgressEvent::Discovering { source } => serde_json::json!({
                "event": "progress",
                "source": source,
                "phase": "discovering"
            }),
            RunProgressEvent::Indexing { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "indexing",
                "n": n,
                "total": total
            }),
            RunProgressEvent::Fetching { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "fetching",
                "n": n,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: RunProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
