use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::{DateTime, TimeZone, Utc};
use pretty_assertions::assert_eq;
use tower::ServiceExt;

use promgraph::{
    api::{router, AppState},
    prometheus::{Matrix, RangeQuery, Sample, Series},
    render::Renderer,
    RenderError, Result,
};

#[derive(Clone)]
enum Reply {
    Matrix(Matrix),
    UpstreamError(String),
}

struct FakeBackend {
    calls: AtomicUsize,
    last_range: Mutex<Option<(DateTime<Utc>, DateTime<Utc>, Duration)>>,
    reply: Reply,
}

impl FakeBackend {
    fn new(reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            last_range: Mutex::new(None),
            reply,
        })
    }

    fn matrix(matrix: Matrix) -> Arc<Self> {
        Self::new(Reply::Matrix(matrix))
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RangeQuery for FakeBackend {
    async fn query_range(
        &self,
        _query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
    ) -> Result<Matrix> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_range.lock().unwrap() = Some((start, end, step));
        match &self.reply {
            Reply::Matrix(matrix) => Ok(matrix.clone()),
            Reply::UpstreamError(msg) => Err(RenderError::Upstream(msg.clone())),
        }
    }
}

fn sample_matrix() -> Matrix {
    vec![Series {
        metric: BTreeMap::from([("instance".to_string(), "a".to_string())]),
        samples: vec![
            Sample {
                timestamp: 1_700_000_000.0,
                value: 1.0,
            },
            Sample {
                timestamp: 1_700_000_060.0,
                value: 2.0,
            },
            Sample {
                timestamp: 1_700_000_120.0,
                value: 1.5,
            },
        ],
    }]
}

fn app_with(root: &str, token: &str, backend: Arc<FakeBackend>) -> Router {
    let state = AppState {
        renderer: Arc::new(Renderer::with_client(backend)),
        token: token.to_string(),
    };
    router(root, state)
}

fn app(backend: Arc<FakeBackend>) -> Router {
    app_with("", "", backend)
}

async fn get(app: Router, uri: &str) -> (StatusCode, Option<String>, Vec<u8>) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .map(|v| v.to_str().unwrap().to_string());
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec();
    (status, content_type, body)
}

#[test_log::test(tokio::test)]
async fn test_graph_returns_png_with_default_dimensions() {
    let backend = FakeBackend::matrix(sample_matrix());

    let (status, content_type, body) = get(app(backend.clone()), "/graph?q=up").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("image/png"));
    let img = image::load_from_memory(&body).unwrap();
    assert_eq!((img.width(), img.height()), (360, 360));
    assert_eq!(backend.calls(), 1);
}

#[test_log::test(tokio::test)]
async fn test_graph_honors_requested_dimensions() {
    let backend = FakeBackend::matrix(sample_matrix());

    let (status, _, body) = get(app(backend), "/graph?q=up&w=200&h=150").await;

    assert_eq!(status, StatusCode::OK);
    let img = image::load_from_memory(&body).unwrap();
    assert_eq!((img.width(), img.height()), (200, 150));
}

#[test_log::test(tokio::test)]
async fn test_graph_legend_param_counts_even_when_empty() {
    let backend = FakeBackend::matrix(sample_matrix());

    let (status, _, body) = get(app(backend), "/graph?q=up&l").await;

    assert_eq!(status, StatusCode::OK);
    assert!(image::load_from_memory(&body).is_ok());
}

#[test_log::test(tokio::test)]
async fn test_graph_passes_end_and_range_to_backend() {
    let backend = FakeBackend::matrix(sample_matrix());

    let (status, _, _) = get(
        app(backend.clone()),
        "/graph?q=up&e=1700000120&s=120",
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let (start, end, step) = backend.last_range.lock().unwrap().unwrap();
    assert_eq!(end, Utc.timestamp_opt(1_700_000_120, 0).unwrap());
    assert_eq!(start, Utc.timestamp_opt(1_700_000_000, 0).unwrap());
    assert_eq!(step, Duration::from_secs(60));
}

#[test_log::test(tokio::test)]
async fn test_graph_empty_matrix_renders_empty_chart() {
    let backend = FakeBackend::matrix(vec![]);

    let (status, content_type, body) = get(app(backend), "/graph?q=up").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("image/png"));
    let img = image::load_from_memory(&body).unwrap();
    assert_eq!((img.width(), img.height()), (360, 360));
}

#[test_log::test(tokio::test)]
async fn test_graph_requires_query_param() {
    for uri in ["/graph", "/graph?q="] {
        let backend = FakeBackend::matrix(sample_matrix());

        let (status, _, body) = get(app(backend.clone()), uri).await;

        assert_eq!(status, StatusCode::BAD_REQUEST, "uri: {uri}");
        let err: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(err["error"].as_str().unwrap().contains("q parameter"));
        assert_eq!(backend.calls(), 0, "uri: {uri}");
    }
}

#[test_log::test(tokio::test)]
async fn test_graph_rejects_bad_numeric_params() {
    for uri in [
        "/graph?q=up&w=abc",
        "/graph?q=up&h=12.5",
        "/graph?q=up&s=tomorrow",
        "/graph?q=up&e=notatime",
    ] {
        let backend = FakeBackend::matrix(sample_matrix());

        let (status, _, _) = get(app(backend.clone()), uri).await;

        assert_eq!(status, StatusCode::BAD_REQUEST, "uri: {uri}");
        assert_eq!(backend.calls(), 0, "uri: {uri}");
    }
}

#[test_log::test(tokio::test)]
async fn test_graph_rejects_non_positive_dimensions() {
    let backend = FakeBackend::matrix(sample_matrix());

    let (status, _, _) = get(app(backend.clone()), "/graph?q=up&w=0").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(backend.calls(), 0);
}

#[test_log::test(tokio::test)]
async fn test_graph_rejects_non_positive_range() {
    let backend = FakeBackend::matrix(sample_matrix());

    let (status, _, _) = get(app(backend.clone()), "/graph?q=up&s=0").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(backend.calls(), 0);
}

#[test_log::test(tokio::test)]
async fn test_graph_token_mismatch_is_forbidden() {
    let backend = FakeBackend::matrix(sample_matrix());

    let (status, _, body) = get(
        app_with("", "secret", backend.clone()),
        "/graph?q=up&t=wrong",
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    let err: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(err["error"], "Invalid auth token (t)");
    assert_eq!(backend.calls(), 0);
}

#[test_log::test(tokio::test)]
async fn test_graph_token_checked_before_params() {
    // No q and no t: the auth failure wins.
    let backend = FakeBackend::matrix(sample_matrix());

    let (status, _, _) = get(app_with("", "secret", backend.clone()), "/graph").await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(backend.calls(), 0);
}

#[test_log::test(tokio::test)]
async fn test_graph_accepts_matching_token() {
    let backend = FakeBackend::matrix(sample_matrix());

    let (status, _, _) = get(
        app_with("", "secret", backend.clone()),
        "/graph?q=up&t=secret",
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(backend.calls(), 1);
}

#[test_log::test(tokio::test)]
async fn test_graph_upstream_failure_is_opaque() {
    let backend = FakeBackend::new(Reply::UpstreamError(
        "connection refused to 10.0.0.1:9090".to_string(),
    ));

    let (status, _, body) = get(app(backend.clone()), "/graph?q=up").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let err: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(err["error"], "Internal server error");
    assert!(!String::from_utf8_lossy(&body).contains("10.0.0.1"));
    assert_eq!(backend.calls(), 1);
}

#[test_log::test(tokio::test)]
async fn test_graph_served_under_http_root() {
    let backend = FakeBackend::matrix(sample_matrix());
    let (status, _, _) = get(
        app_with("/metrics-ui", "", backend),
        "/metrics-ui/graph?q=up",
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let backend = FakeBackend::matrix(sample_matrix());
    let (status, _, _) = get(app_with("/metrics-ui", "", backend), "/graph?q=up").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
