//! TOML configuration.
//!
//! ```toml
//! [corpus]
//! path = "corpus.jsonl"
//!
//! [state]
//! data_dir = "./data"
//!
//! [fetch]
//! concurrency = 30
//!
//! [sources.filesystem.acts]
//! root = "/srv/acts"
//! include_globs = ["**/*.docx"]
//! index_refresh = "7d"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryPolicy;
use crate::source::RefreshPolicy;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    #[serde(default = "default_corpus_path")]
    pub path: PathBuf,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            path: default_corpus_path(),
        }
    }
}

fn default_corpus_path() -> PathBuf {
    PathBuf::from("corpus.jsonl")
}

#[derive(Debug, Deserialize, Clone)]
pub struct StateConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    /// Default per-source limit on in-flight requests.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_concurrency() -> usize {
    30
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_user_agent() -> String {
    format!("mkcorpus/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_wait_base")]
    pub wait_base: f64,
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: f64,
    #[serde(default = "default_stop_after_waiting_secs")]
    pub stop_after_waiting_secs: f64,
    /// HTTP statuses retried for every source.
    #[serde(default = "default_retry_statuses")]
    pub statuses: BTreeSet<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            wait_base: default_wait_base(),
            max_wait_secs: default_max_wait_secs(),
            stop_after_waiting_secs: default_stop_after_waiting_secs(),
            statuses: default_retry_statuses(),
        }
    }
}

fn default_wait_base() -> f64 {
    1.25
}
fn default_max_wait_secs() -> f64 {
    150.0
}
fn default_stop_after_waiting_secs() -> f64 {
    900.0
}
fn default_retry_statuses() -> BTreeSet<u16> {
    BTreeSet::from([429])
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            wait_base: self.wait_base,
            max_wait: Duration::from_secs_f64(self.max_wait_secs),
            stop_after_waiting: Duration::from_secs_f64(self.stop_after_waiting_secs),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct WorkersConfig {
    /// Threads for CPU-bound extraction. `0` picks logical CPUs minus one.
    #[serde(default)]
    pub threads: usize,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourcesConfig {
    #[serde(default)]
    pub filesystem: BTreeMap<String, FilesystemSourceConfig>,
    #[serde(default)]
    pub http: BTreeMap<String, HttpSourceConfig>,
}

impl SourcesConfig {
    /// Every configured source name, in name order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .filesystem
            .keys()
            .chain(self.http.keys())
            .cloned()
            .collect();
        names.sort();
        names
    }
}

/// Per-source overrides layered on top of `[fetch]` and `[retry]`.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct FetchOverrides {
    #[serde(default)]
    pub concurrency: Option<usize>,
    /// Extra statuses retried for this source only (e.g. `[502, 400]`).
    #[serde(default)]
    pub retry_statuses: BTreeSet<u16>,
    #[serde(default)]
    pub wait_base: Option<f64>,
    #[serde(default)]
    pub max_wait_secs: Option<f64>,
    #[serde(default)]
    pub stop_after_waiting_secs: Option<f64>,
}

impl FetchOverrides {
    pub fn policy(&self, base: &RetryConfig) -> RetryPolicy {
        RetryPolicy {
            wait_base: self.wait_base.unwrap_or(base.wait_base),
            max_wait: Duration::from_secs_f64(self.max_wait_secs.unwrap_or(base.max_wait_secs)),
            stop_after_waiting: Duration::from_secs_f64(
                self.stop_after_waiting_secs
                    .unwrap_or(base.stop_after_waiting_secs),
            ),
        }
    }

    pub fn statuses(&self, base: &RetryConfig) -> BTreeSet<u16> {
        base.statuses.union(&self.retry_statuses).copied().collect()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilesystemSourceConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default = "default_doc_type")]
    pub doc_type: String,
    #[serde(default)]
    pub jurisdiction: String,
    #[serde(default = "default_refresh")]
    pub indices_refresh: RefreshPolicy,
    #[serde(default = "default_refresh")]
    pub index_refresh: RefreshPolicy,
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.txt".to_string(),
        "**/*.md".to_string(),
        "**/*.pdf".to_string(),
        "**/*.docx".to_string(),
    ]
}

fn default_doc_type() -> String {
    "document".to_string()
}

fn default_refresh() -> RefreshPolicy {
    RefreshPolicy::default()
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpSourceConfig {
    /// Listing page URL; `{page}` is replaced by the page number.
    pub listing_url: String,
    #[serde(default)]
    pub first_page: u64,
    /// Fixed number of listing pages. Alternative to `count_url`.
    #[serde(default)]
    pub pages: Option<u64>,
    /// Endpoint whose JSON body holds the total number of documents.
    #[serde(default)]
    pub count_url: Option<String>,
    #[serde(default)]
    pub count_pointer: Option<String>,
    #[serde(default)]
    pub page_size: Option<u64>,
    /// JSON pointer to the array of items on a listing page.
    #[serde(default)]
    pub items_pointer: String,
    #[serde(default = "default_id_field")]
    pub id_field: String,
    #[serde(default)]
    pub title_field: Option<String>,
    #[serde(default)]
    pub date_field: Option<String>,
    /// Document URL; `{id}` is replaced by the item's id.
    pub document_url: String,
    /// JSON pointer to the text when a document is served as JSON.
    #[serde(default)]
    pub text_pointer: Option<String>,
    #[serde(default = "default_doc_type")]
    pub doc_type: String,
    #[serde(default)]
    pub jurisdiction: String,
    #[serde(default = "default_refresh")]
    pub indices_refresh: RefreshPolicy,
    #[serde(default = "default_refresh")]
    pub index_refresh: RefreshPolicy,
    #[serde(flatten)]
    pub fetch: FetchOverrides,
}

fn default_id_field() -> String {
    "id".to_string()
}

impl Config {
    /// Defaults only, no sources.
    pub fn minimal() -> Self {
        Self::default()
    }

    /// Resolve `[workers].threads`, replacing `0` with logical CPUs minus one.
    pub fn worker_threads(&self) -> usize {
        if self.workers.threads > 0 {
            return self.workers.threads;
        }
        std::thread::available_parallelism()
            .map(|n| n.get().saturating_sub(1))
            .unwrap_or(1)
            .max(1)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.fetch.concurrency == 0 {
        bail!("fetch.concurrency must be > 0");
    }

    validate_retry_limits(
        "retry",
        config.retry.wait_base,
        config.retry.max_wait_secs,
        config.retry.stop_after_waiting_secs,
    )?;

    for name in config.sources.filesystem.keys() {
        if config.sources.http.contains_key(name) {
            bail!(
                "Source name '{}' is used by more than one source kind",
                name
            );
        }
    }

    for name in config.sources.names() {
        validate_source_name(&name)?;
    }

    for (name, http) in &config.sources.http {
        if !http.listing_url.contains("{page}") {
            bail!("sources.http.{}.listing_url must contain {{page}}", name);
        }
        if !http.document_url.contains("{id}") {
            bail!("sources.http.{}.document_url must contain {{id}}", name);
        }
        match (&http.pages, &http.count_url) {
            (Some(_), None) => {}
            (None, Some(_)) => {
                if http.count_pointer.is_none() || http.page_size.unwrap_or(0) == 0 {
                    bail!(
                        "sources.http.{} needs count_pointer and a page_size > 0 with count_url",
                        name
                    );
                }
            }
            _ => bail!(
                "sources.http.{} must set exactly one of pages or count_url",
                name
            ),
        }
        if http.fetch.concurrency == Some(0) {
            bail!("sources.http.{}.concurrency must be > 0", name);
        }
        let fetch = &http.fetch;
        validate_retry_limits(
            &format!("sources.http.{}", name),
            fetch.wait_base.unwrap_or(config.retry.wait_base),
            fetch.max_wait_secs.unwrap_or(config.retry.max_wait_secs),
            fetch
                .stop_after_waiting_secs
                .unwrap_or(config.retry.stop_after_waiting_secs),
        )?;
    }

    Ok(())
}

/// Wait limits must convert to a `Duration`, and a policy that keeps
/// retrying needs a non-zero `max_wait` to make progress towards its stop.
fn validate_retry_limits(
    scope: &str,
    wait_base: f64,
    max_wait_secs: f64,
    stop_after_waiting_secs: f64,
) -> Result<()> {
    if !wait_base.is_finite() || wait_base < 1.0 {
        bail!("{}.wait_base must be a finite number >= 1.0", scope);
    }
    for (key, secs) in [
        ("max_wait_secs", max_wait_secs),
        ("stop_after_waiting_secs", stop_after_waiting_secs),
    ] {
        if Duration::try_from_secs_f64(secs).is_err() {
            bail!(
                "{}.{} must be a finite, non-negative number of seconds (got {})",
                scope,
                key,
                secs
            );
        }
    }
    if stop_after_waiting_secs > 0.0 && max_wait_secs <= 0.0 {
        bail!(
            "{}.max_wait_secs must be > 0 when stop_after_waiting_secs is set",
            scope
        );
    }
    Ok(())
}

/// Source names become file names under the state directory.
fn validate_source_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        bail!(
            "Invalid source name '{}': use letters, digits, '_' or '-'",
            name
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.corpus.path, PathBuf::from("corpus.jsonl"));
        assert_eq!(config.fetch.concurrency, 30);
        assert_eq!(config.retry.policy(), RetryPolicy::default());
        assert!(config.retry.statuses.contains(&429));
        assert!(config.sources.names().is_empty());
    }

    #[test]
    fn http_source_overrides_widen_retry() {
        let config = parse(
            r#"
[retry]
wait_base = 1.25

[sources.http.hca]
listing_url = "https://example.test/list?page={page}"
pages = 3
items_pointer = "/results"
document_url = "https://example.test/doc/{id}"
concurrency = 4
retry_statuses = [502, 400]
wait_base = 2.25
stop_after_waiting_secs = 2700
index_refresh = "never"
"#,
        )
        .unwrap();

        let hca = &config.sources.http["hca"];
        assert_eq!(hca.fetch.concurrency, Some(4));
        assert_eq!(
            hca.fetch.statuses(&config.retry),
            BTreeSet::from([400, 429, 502])
        );
        let policy = hca.fetch.policy(&config.retry);
        assert_eq!(policy.wait_base, 2.25);
        assert_eq!(policy.max_wait, Duration::from_secs(150));
        assert_eq!(policy.stop_after_waiting, Duration::from_secs(2700));
        assert_eq!(hca.index_refresh, RefreshPolicy::Never);
        assert_eq!(hca.indices_refresh, RefreshPolicy::default());
    }

    #[test]
    fn rejects_duplicate_names_across_kinds() {
        let err = parse(
            r#"
[sources.filesystem.acts]
root = "/tmp"

[sources.http.acts]
listing_url = "https://example.test/?page={page}"
pages = 1
document_url = "https://example.test/{id}"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("more than one"));
    }

    #[test]
    fn rejects_unsafe_source_names() {
        let err = parse(
            r#"
[sources.filesystem."../escape"]
root = "/tmp"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Invalid source name"));
    }

    #[test]
    fn http_source_needs_a_page_count() {
        let err = parse(
            r#"
[sources.http.nsw]
listing_url = "https://example.test/?page={page}"
document_url = "https://example.test/{id}"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("exactly one of"));
    }

    #[test]
    fn zero_max_wait_with_a_stop_is_rejected() {
        let err = parse("[retry]\nmax_wait_secs = 0").unwrap_err();
        assert!(err.to_string().contains("retry.max_wait_secs must be > 0"));

        let config = parse("[retry]\nmax_wait_secs = 0\nstop_after_waiting_secs = 0").unwrap();
        assert_eq!(config.retry.policy().max_wait, Duration::ZERO);
    }

    #[test]
    fn per_source_wait_limits_are_checked() {
        let source = |extra: &str| {
            format!(
                r#"
[sources.http.hca]
listing_url = "https://example.test/list?page={{page}}"
pages = 1
document_url = "https://example.test/doc/{{id}}"
{extra}
"#
            )
        };

        let err = parse(&source("max_wait_secs = -1.0")).unwrap_err();
        assert!(
            err.to_string().contains("sources.http.hca.max_wait_secs"),
            "{err}"
        );
        let err = parse(&source("stop_after_waiting_secs = inf")).unwrap_err();
        assert!(err.to_string().contains("stop_after_waiting_secs"), "{err}");
        let err = parse(&source("wait_base = nan")).unwrap_err();
        assert!(err.to_string().contains("sources.http.hca.wait_base"), "{err}");
        let err = parse(&source("max_wait_secs = 0")).unwrap_err();
        assert!(err.to_string().contains("must be > 0"), "{err}");

        let config = parse(&source("max_wait_secs = 2.5")).unwrap();
        let http = &config.sources.http["hca"];
        assert_eq!(
            http.fetch.policy(&config.retry).max_wait,
            Duration::from_millis(2500)
        );
    }

    #[test]
    fn non_finite_global_limits_are_rejected() {
        assert!(parse("[retry]\nmax_wait_secs = nan").is_err());
        assert!(parse("[retry]\nstop_after_waiting_secs = 1e300").is_err());
        assert!(parse("[retry]\nwait_base = inf").is_err());
    }

    #[test]
    fn example_config_is_valid() {
        let config = parse(include_str!("../config/mkcorpus.example.toml")).unwrap();
        assert_eq!(config.sources.names(), vec!["acts", "decisions"]);
        let decisions = &config.sources.http["decisions"];
        assert_eq!(decisions.page_size, Some(50));
        assert_eq!(decisions.fetch.concurrency, Some(8));
    }

    #[test]
    fn worker_threads_is_at_least_one() {
        let config = Config::minimal();
        assert!(config.worker_threads() >= 1);
    }
}
