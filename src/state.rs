//! On-disk layout of the harvester's state.
//!
//! ```text
//! <data_dir>/
//!   versions.json            format version of each artifact kind
//!   indices/<source>.json    cached discovery requests
//!   index/<source>.jsonl     indexed batches, one per line
//! <corpus path>              corpus.jsonl, one document per line
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct StateLayout {
    data_dir: PathBuf,
    corpus: PathBuf,
}

impl StateLayout {
    pub fn new(data_dir: impl Into<PathBuf>, corpus: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            corpus: corpus.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn corpus(&self) -> &Path {
        &self.corpus
    }

    pub fn versions(&self) -> PathBuf {
        self.data_dir.join("versions.json")
    }

    pub fn indices_dir(&self) -> PathBuf {
        self.data_dir.join("indices")
    }

    pub fn index_dir(&self) -> PathBuf {
        self.data_dir.join("index")
    }

    pub fn indices(&self, source: &str) -> PathBuf {
        self.indices_dir().join(format!("{}.json", source))
    }

    pub fn index(&self, source: &str) -> PathBuf {
        self.index_dir().join(format!("{}.jsonl", source))
    }

    /// Create the state directories and an empty corpus if absent.
    pub async fn prepare(&self) -> Result<()> {
        for dir in [self.indices_dir(), self.index_dir()] {
            tokio::fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        if let Some(parent) = self.corpus.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.corpus)
            .await
            .with_context(|| format!("Failed to create corpus {}", self.corpus.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn prepare_creates_layout() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StateLayout::new(dir.path().join("data"), dir.path().join("out/corpus.jsonl"));
        layout.prepare().await.unwrap();

        assert!(layout.indices_dir().is_dir());
        assert!(layout.index_dir().is_dir());
        assert!(layout.corpus().is_file());
        assert_eq!(
            layout.index("hca"),
            dir.path().join("data").join("index").join("hca.jsonl")
        );

        // Idempotent and leaves existing content alone.
        std::fs::write(layout.corpus(), "x\n").unwrap();
        layout.prepare().await.unwrap();
        assert_eq!(std::fs::read_to_string(layout.corpus()).unwrap(), "x\n");
    }
}
