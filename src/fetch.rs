//! Rate-limited, retrying fetches.
//!
//! Each source owns a [`Fetcher`]: a shared `reqwest::Client`, a semaphore
//! bounding that source's in-flight requests, and a [`RetryProfile`] naming
//! which failures are worth waiting out. `Open` requests read local files and
//! bypass both the semaphore and the retry loop.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::CONTENT_TYPE;
use tokio::sync::Semaphore;

use crate::error::{FetchError, TransportFailure};
use crate::models::{Method, Request, Response};
use crate::retry::RetryPolicy;

/// What a source retries, and how long it is willing to wait.
#[derive(Debug, Clone)]
pub struct RetryProfile {
    pub policy: RetryPolicy,
    /// Transport failures retried.
    pub transport: HashSet<TransportFailure>,
    /// HTTP statuses retried. A response with any other status is returned
    /// to the caller as-is.
    pub statuses: BTreeSet<u16>,
}

impl Default for RetryProfile {
    fn default() -> Self {
        Self {
            policy: RetryPolicy::default(),
            transport: HashSet::from([
                TransportFailure::Timeout,
                TransportFailure::Connect,
                TransportFailure::Request,
                TransportFailure::Body,
            ]),
            statuses: BTreeSet::from([429]),
        }
    }
}

impl RetryProfile {
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.statuses = statuses.into_iter().collect();
        self
    }

    pub fn is_retryable(&self, err: &FetchError) -> bool {
        match err {
            FetchError::Transport { kind, .. } => self.transport.contains(kind),
            FetchError::Status { status, .. } => self.statuses.contains(status),
            _ => false,
        }
    }
}

/// Build the HTTP client shared by every source in a run.
pub fn build_client(timeout: Duration, user_agent: &str) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(user_agent)
        .build()
        .context("Failed to build HTTP client")
}

#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    semaphore: Arc<Semaphore>,
    profile: RetryProfile,
}

impl Fetcher {
    pub fn new(client: reqwest::Client, concurrency: usize, profile: RetryProfile) -> Self {
        Self {
            client,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            profile,
        }
    }

    pub fn profile(&self) -> &RetryProfile {
        &self.profile
    }

    /// Fetch `request`, retrying per the profile.
    ///
    /// Statuses outside the profile's retry set come back as a [`Response`];
    /// callers decide whether e.g. a 404 means "missing".
    pub async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        match request.method {
            Method::Open => read_local(request).await,
            Method::Get | Method::Post => {
                self.profile
                    .policy
                    .run(
                        || self.attempt(request),
                        |err| self.profile.is_retryable(err),
                    )
                    .await
            }
        }
    }

    async fn attempt(&self, request: &Request) -> Result<Response, FetchError> {
        // The semaphore is never closed, so acquisition only fails if it is.
        let _permit = self.semaphore.acquire().await.ok();

        let method = match request.method {
            Method::Post => reqwest::Method::POST,
            _ => reqwest::Method::GET,
        };
        let mut builder = self.client.request(method, &request.path);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if !request.data.is_empty() {
            builder = builder.form(&request.data);
        }

        let transport = |source: reqwest::Error| FetchError::Transport {
            request: request.clone(),
            kind: TransportFailure::classify(&source),
            source,
        };

        let response = builder.send().await.map_err(transport)?;
        let status = response.status().as_u16();
        if self.profile.statuses.contains(&status) {
            return Err(FetchError::Status {
                request: request.clone(),
                status,
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(transport)?;

        Ok(Response::new(body.to_vec(), request.encoding.clone())
            .with_status(status)
            .with_content_type(content_type))
    }
}

async fn read_local(request: &Request) -> Result<Response, FetchError> {
    let body = tokio::fs::read(&request.path)
        .await
        .map_err(|source| FetchError::Io {
            path: request.path.clone().into(),
            source,
        })?;
    Ok(Response::new(body, request.encoding.clone()))
}
