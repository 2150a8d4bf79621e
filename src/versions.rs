//! Format-version guard for persisted artifacts.
//!
//! `versions.json` records the format version each artifact kind was written
//! with. When the code's version for a kind differs from the recorded one,
//! that artifact is deleted so it is rebuilt from scratch by the run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::jsonl;
use crate::state::StateLayout;

/// Current format version of each artifact kind.
pub const DATA_VERSIONS: [(&str, u32); 3] = [("corpus", 1), ("index", 1), ("indices", 1)];

fn artifact_path(layout: &StateLayout, kind: &str) -> Option<PathBuf> {
    match kind {
        "corpus" => Some(layout.corpus().to_path_buf()),
        "index" => Some(layout.index_dir()),
        "indices" => Some(layout.indices_dir()),
        _ => None,
    }
}

fn current() -> BTreeMap<String, u32> {
    DATA_VERSIONS
        .iter()
        .map(|(kind, version)| (kind.to_string(), *version))
        .collect()
}

/// Delete artifacts whose recorded version differs from [`DATA_VERSIONS`],
/// then record the current versions. Returns the kinds that were reset.
///
/// Kinds missing from `versions.json` are left alone.
pub async fn reconcile(layout: &StateLayout) -> Result<Vec<String>> {
    let path = layout.versions();
    let mut reset = Vec::new();

    if tokio::fs::try_exists(&path).await? {
        let recorded: BTreeMap<String, u32> = jsonl::read_json(&path).await?;
        for (kind, version) in DATA_VERSIONS {
            let Some(&found) = recorded.get(kind) else {
                continue;
            };
            if found == version {
                continue;
            }
            let Some(artifact) = artifact_path(layout, kind) else {
                continue;
            };
            warn!(
                kind,
                recorded = found,
                current = version,
                path = %artifact.display(),
                "format version changed; discarding artifact"
            );
            remove_artifact(&artifact).await?;
            reset.push(kind.to_string());
        }
    }

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    jsonl::write_json(&path, &current()).await?;
    if !reset.is_empty() {
        info!(kinds = ?reset, "reset artifacts");
    }
    Ok(reset)
}

async fn remove_artifact(path: &Path) -> Result<()> {
    let meta = match tokio::fs::metadata(path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e).with_context(|| format!("Failed to stat {}", path.display())),
    };
    let removed = if meta.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };
    removed.with_context(|| format!("Failed to remove {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_state_records_current_versions() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StateLayout::new(dir.path().join("data"), dir.path().join("corpus.jsonl"));

        let reset = reconcile(&layout).await.unwrap();
        assert!(reset.is_empty());

        let recorded: BTreeMap<String, u32> = jsonl::read_json(&layout.versions()).await.unwrap();
        assert_eq!(recorded, current());
    }

    #[tokio::test]
    async fn mismatched_artifacts_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StateLayout::new(dir.path().join("data"), dir.path().join("corpus.jsonl"));
        layout.prepare().await.unwrap();
        std::fs::write(layout.corpus(), "old\n").unwrap();
        std::fs::write(layout.index("a"), "old\n").unwrap();
        std::fs::write(layout.indices("a"), "[]").unwrap();
        std::fs::write(
            layout.versions(),
            r#"{"corpus": 0, "index": 1, "indices": 7}"#,
        )
        .unwrap();

        let reset = reconcile(&layout).await.unwrap();
        assert_eq!(reset, vec!["corpus".to_string(), "indices".to_string()]);
        assert!(!layout.corpus().exists());
        assert!(!layout.indices_dir().exists());
        assert!(layout.index("a").exists());

        let recorded: BTreeMap<String, u32> = jsonl::read_json(&layout.versions()).await.unwrap();
        assert_eq!(recorded, current());
    }
}
