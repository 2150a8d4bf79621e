//! Failure classes raised by fetching and by source adapters.
//!
//! Fetch-level failures ([`FetchError`]) are what the network retry loop
//! inspects; source-level failures ([`SourceError`]) are what the
//! document-parse retry loop inspects. Everything above the source boundary
//! (engine, config, CLI) works in `anyhow::Result`.

use std::path::PathBuf;

use thiserror::Error;

use crate::models::Request;

/// Transport-level failure kinds a [`FetchError::Transport`] can carry.
///
/// Each source's retry profile names which of these are worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportFailure {
    /// The request or response timed out.
    Timeout,
    /// The connection could not be established.
    Connect,
    /// The request was sent but the connection was reset or dropped.
    Request,
    /// The response body could not be read to completion.
    Body,
    /// Anything else `reqwest` reports (redirect loops, builder errors, ...).
    Other,
}

impl TransportFailure {
    /// Classify a `reqwest` error.
    pub fn classify(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportFailure::Timeout
        } else if err.is_connect() {
            TransportFailure::Connect
        } else if err.is_body() || err.is_decode() {
            TransportFailure::Body
        } else if err.is_request() {
            TransportFailure::Request
        } else {
            TransportFailure::Other
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{request}: transport failure ({kind:?}): {source}")]
    Transport {
        request: Request,
        kind: TransportFailure,
        #[source]
        source: reqwest::Error,
    },

    #[error("{request}: server answered with retryable status {status}")]
    Status { request: Request, status: u16 },

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("response body is not valid {encoding}")]
    Decode { encoding: String },

    #[error("response body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl FetchError {
    /// The local I/O error kind, if this failure came from an `open` request.
    pub fn io_kind(&self) -> Option<std::io::ErrorKind> {
        match self {
            FetchError::Io { source, .. } => Some(source.kind()),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Downloaded content could not be parsed. The server may be overloaded,
    /// so the document phase retries this with backoff.
    #[error("unable to parse downloaded content: {0}")]
    Unparseable(String),

    /// A non-empty index page yielded zero entries. Treated as a parsing
    /// regression in the adapter, never as an empty source.
    #[error("index page {request} is not empty but yielded no entries")]
    EmptyIndex { request: Request },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
