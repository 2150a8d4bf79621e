//! Line-delimited JSON files: streaming reads, atomic rewrites and a
//! shared appender.
//!
//! Every durable artifact the harvester keeps is either a JSONL log or a
//! small JSON document. Rewrites go through a sibling `.tmp` file followed by
//! a rename, so a crash mid-write leaves the previous file intact.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::Mutex;
use tracing::warn;

/// `path` with `.tmp` appended to its file name.
pub fn tmp_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Serialize `value` as one line, newline included.
pub fn encode_line<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    Ok(line)
}

/// Reads a file line by line as raw bytes, without decoding.
pub struct LineReader {
    reader: BufReader<File>,
    buf: Vec<u8>,
    line_no: usize,
}

impl LineReader {
    pub async fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;
        Ok(Self {
            reader: BufReader::new(file),
            buf: Vec::new(),
            line_no: 0,
        })
    }

    /// The next line with its 1-based number, or `None` at end of file.
    /// The trailing newline, if any, is included.
    pub async fn next_line(&mut self) -> Result<Option<(usize, &[u8])>> {
        self.buf.clear();
        let n = self.reader.read_until(b'\n', &mut self.buf).await?;
        if n == 0 {
            return Ok(None);
        }
        self.line_no += 1;
        Ok(Some((self.line_no, &self.buf)))
    }
}

/// Strip a trailing `\n` or `\r\n`.
pub fn trim_newline(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Records decoded from a JSONL file, plus how many lines were skipped.
#[derive(Debug)]
pub struct Loaded<T> {
    pub records: Vec<T>,
    pub skipped: usize,
}

/// Decode every line of `path`. Undecodable lines are logged and skipped;
/// a missing file reads as empty.
pub async fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Loaded<T>> {
    let mut loaded = Loaded {
        records: Vec::new(),
        skipped: 0,
    };
    if !tokio::fs::try_exists(path).await? {
        return Ok(loaded);
    }

    let mut lines = LineReader::open(path).await?;
    while let Some((line_no, line)) = lines.next_line().await? {
        let line = trim_newline(line);
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<T>(line) {
            Ok(record) => loaded.records.push(record),
            Err(err) => {
                warn!(
                    path = %path.display(),
                    line = line_no,
                    error = %err,
                    "skipping undecodable line"
                );
                loaded.skipped += 1;
            }
        }
    }
    Ok(loaded)
}

/// Replace `path` with `records`, one per line.
pub async fn write_records<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    let tmp = tmp_path(path);
    let file = File::create(&tmp)
        .await
        .with_context(|| format!("Failed to create {}", tmp.display()))?;
    let mut writer = BufWriter::new(file);
    for record in records {
        writer.write_all(&encode_line(record)?).await?;
    }
    writer.flush().await?;
    writer.into_inner().sync_all().await?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

/// Replace `path` with `value` as a single JSON document.
pub async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let tmp = tmp_path(path);
    let body = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(&tmp, body)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let body = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_slice(&body).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Appends records to a JSONL file, one whole line per write.
///
/// Serialization happens before the lock is taken; the lock only covers the
/// write so concurrent appenders never interleave partial lines.
#[derive(Debug)]
pub struct JsonlAppender {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlAppender {
    pub async fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("Failed to open {} for append", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append<T: Serialize>(&self, record: &T) -> Result<()> {
        let line = encode_line(record)?;
        let mut file = self.file.lock().await;
        file.write_all(&line)
            .await
            .with_context(|| format!("Failed to append to {}", self.path.display()))?;
        file.flush().await?;
        Ok(())
    }
}
