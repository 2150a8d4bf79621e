//! Fetcher and HTTP listing source against a local axum server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde_json::json;
use tempfile::TempDir;

use corpus_harvest::config::Config;
use corpus_harvest::engine::Harvester;
use corpus_harvest::error::{FetchError, SourceError};
use corpus_harvest::fetch::{build_client, Fetcher, RetryProfile};
use corpus_harvest::models::{Document, Request};
use corpus_harvest::registry::SourceRegistry;
use corpus_harvest::retry::RetryPolicy;
use corpus_harvest::source::Source;
use corpus_harvest::state::StateLayout;
use corpus_harvest::workers::WorkerPool;

#[derive(Clone, Default)]
struct Hits {
    flaky: Arc<AtomicU32>,
    limited: Arc<AtomicU32>,
    garbled: Arc<AtomicU32>,
}

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn quick_profile() -> RetryProfile {
    RetryProfile::default().with_policy(RetryPolicy {
        wait_base: 1.0,
        max_wait: Duration::from_millis(10),
        stop_after_waiting: Duration::from_millis(100),
    })
}

fn fetcher(profile: RetryProfile) -> Fetcher {
    let client = build_client(Duration::from_secs(5), "mkcorpus-test").unwrap();
    Fetcher::new(client, 4, profile)
}

async fn flaky(State(hits): State<Hits>) -> impl IntoResponse {
    if hits.flaky.fetch_add(1, Ordering::SeqCst) < 2 {
        (StatusCode::TOO_MANY_REQUESTS, "slow down").into_response()
    } else {
        "finally".into_response()
    }
}

async fn limited(State(hits): State<Hits>) -> impl IntoResponse {
    hits.limited.fetch_add(1, Ordering::SeqCst);
    StatusCode::TOO_MANY_REQUESTS
}

async fn echo(Form(form): Form<HashMap<String, String>>) -> String {
    let mut pairs: Vec<_> = form.into_iter().map(|(k, v)| format!("{k}={v}")).collect();
    pairs.sort();
    pairs.join("&")
}

async fn latin1() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=iso-8859-1")],
        vec![0x63u8, 0x61, 0x66, 0xe9],
    )
}

async fn count() -> Json<serde_json::Value> {
    Json(json!({"meta": {"total": "5"}}))
}

async fn list(Query(q): Query<HashMap<String, String>>) -> Json<serde_json::Value> {
    let page: u64 = q.get("page").and_then(|p| p.parse().ok()).unwrap_or(0);
    let ids: Vec<u64> = match page {
        1 => vec![1, 2],
        2 => vec![3, 4],
        3 => vec![5],
        _ => vec![],
    };
    let items: Vec<_> = ids
        .iter()
        .map(|id| json!({"id": id, "name": format!("Case {id}"), "decided": "2021-03-04"}))
        .collect();
    Json(json!({ "results": items }))
}

async fn doc(Path(id): Path<u64>, State(hits): State<Hits>) -> axum::response::Response {
    match id {
        3 => StatusCode::NOT_FOUND.into_response(),
        4 if hits.garbled.fetch_add(1, Ordering::SeqCst) == 0 => {
            Json(json!({"body": {"html": "<p>half a page"}})).into_response()
        }
        5 => ([(header::CONTENT_TYPE, "text/plain")], "plain five").into_response(),
        _ => Json(json!({"body": {"text": format!("judgment {id}")}})).into_response(),
    }
}

async fn broken_list() -> Json<serde_json::Value> {
    Json(json!({"results": [{"uuid": "a"}, {"uuid": "b"}]}))
}

fn app(hits: Hits) -> Router {
    Router::new()
        .route("/flaky", get(flaky))
        .route("/limited", get(limited))
        .route("/echo", post(echo))
        .route("/latin1", get(latin1))
        .route("/gone", get(|| async { StatusCode::GONE }))
        .route("/count", get(count))
        .route("/list", get(list))
        .route("/broken", get(broken_list))
        .route("/doc/{id}", get(doc))
        .with_state(hits)
}

#[tokio::test]
async fn retries_listed_statuses_until_success() {
    let hits = Hits::default();
    let base = serve(app(hits.clone())).await;

    let resp = fetcher(quick_profile())
        .fetch(&Request::get(format!("{base}/flaky")))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().unwrap(), "finally");
    assert_eq!(hits.flaky.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn gives_up_on_persistent_rate_limiting() {
    let hits = Hits::default();
    let base = serve(app(hits.clone())).await;

    let err = fetcher(quick_profile())
        .fetch(&Request::get(format!("{base}/limited")))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Status { status: 429, .. }));
    assert!(hits.limited.load(Ordering::SeqCst) > 1);
}

#[tokio::test]
async fn other_statuses_are_returned_not_retried() {
    let base = serve(app(Hits::default())).await;
    let resp = fetcher(quick_profile())
        .fetch(&Request::get(format!("{base}/gone")))
        .await
        .unwrap();
    assert_eq!(resp.status(), 410);
    assert!(!resp.is_success());
}

#[tokio::test]
async fn post_requests_send_form_data() {
    let base = serve(app(Hits::default())).await;
    let resp = fetcher(quick_profile())
        .fetch(&Request::post(
            format!("{base}/echo"),
            [("q", "act"), ("page", "2")],
        ))
        .await
        .unwrap();
    assert_eq!(resp.text().unwrap(), "page=2&q=act");
}

#[tokio::test]
async fn text_uses_the_request_encoding() {
    let base = serve(app(Hits::default())).await;
    let resp = fetcher(quick_profile())
        .fetch(&Request::get(format!("{base}/latin1")).with_encoding("latin1"))
        .await
        .unwrap();
    assert_eq!(resp.content_type(), Some("text/plain"));
    assert_eq!(resp.text().unwrap(), "café");
}

#[tokio::test]
async fn connection_failures_are_transport_errors() {
    // Bind then drop to get a port nobody listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = fetcher(quick_profile())
        .fetch(&Request::get(format!("http://{addr}/")))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Transport { .. }));
}

fn http_config(base: &str, tmp: &TempDir) -> Config {
    let toml = format!(
        r#"
[corpus]
path = {corpus:?}

[state]
data_dir = {data:?}

[retry]
wait_base = 1.0
max_wait_secs = 0.01
stop_after_waiting_secs = 0.5

[sources.http.court]
count_url = "{base}/count"
count_pointer = "/meta/total"
page_size = 2
first_page = 1
listing_url = "{base}/list?page={{page}}"
items_pointer = "/results"
title_field = "name"
date_field = "decided"
document_url = "{base}/doc/{{id}}"
text_pointer = "/body/text"
doc_type = "decision"
jurisdiction = "commonwealth"
concurrency = 2

[sources.http.broken]
pages = 1
listing_url = "{base}/broken?page={{page}}"
items_pointer = "/results"
document_url = "{base}/doc/{{id}}"
"#,
        corpus = tmp.path().join("corpus.jsonl").to_string_lossy(),
        data = tmp.path().join("data").to_string_lossy(),
    );
    let config: Config = toml::from_str(&toml).unwrap();
    corpus_harvest::config::validate(&config).unwrap();
    config
}

#[tokio::test]
async fn listing_source_harvests_through_the_engine() {
    let hits = Hits::default();
    let base = serve(app(hits.clone())).await;
    let tmp = TempDir::new().unwrap();
    let config = http_config(&base, &tmp);

    let registry = SourceRegistry::from_config(&config, &WorkerPool::new(1)).unwrap();
    let layout = StateLayout::new(&config.state.data_dir, &config.corpus.path);
    let harvester = Harvester::open(registry.select(&["court".to_string()]).unwrap(), layout)
        .await
        .unwrap();

    let report = harvester.run().await.unwrap();
    assert_eq!(report.discovery_requests, 3);
    assert_eq!(report.entries, 5);
    assert_eq!(report.documents_added, 4);
    assert_eq!(report.documents_missing, 1);
    // Document 4 was unparseable once and retried.
    assert_eq!(hits.garbled.load(Ordering::SeqCst), 2);

    let mut docs: Vec<Document> = std::fs::read_to_string(&config.corpus.path)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    docs.sort_by(|a, b| a.version_id.cmp(&b.version_id));
    let ids: Vec<_> = docs.iter().map(|d| d.version_id.as_str()).collect();
    assert_eq!(ids, vec!["court:1", "court:2", "court:4", "court:5"]);

    assert_eq!(docs[0].text, "judgment 1");
    assert_eq!(docs[0].citation, "Case 1");
    assert_eq!(docs[0].date.as_deref(), Some("2021-03-04"));
    assert_eq!(docs[0].doc_type, "decision");
    assert_eq!(docs[0].mime, "application/json");
    assert_eq!(docs[3].text, "plain five");
    assert_eq!(docs[3].mime, "text/plain");
}

#[tokio::test]
async fn pages_without_ids_are_empty_index_errors() {
    let base = serve(app(Hits::default())).await;
    let tmp = TempDir::new().unwrap();
    let config = http_config(&base, &tmp);
    let registry = SourceRegistry::from_config(&config, &WorkerPool::new(1)).unwrap();
    let broken = registry.get("broken").unwrap();

    let requests = broken.get_index_requests().await.unwrap();
    let request = requests.into_iter().next().unwrap();
    let err = broken.get_index(&request).await.unwrap_err();
    assert!(matches!(err, SourceError::EmptyIndex { .. }));
}
