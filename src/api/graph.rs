use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::header,
    response::IntoResponse,
    routing::get,
    Router,
};
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use subtle::ConstantTimeEq;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    config::ServeConfig,
    render::{RenderRequest, Renderer, TimeRange},
    RenderError, Result,
};

const DEFAULT_WIDTH: u32 = 360;
const DEFAULT_HEIGHT: u32 = 360;
const DEFAULT_RANGE_SECONDS: i64 = 3600;

#[derive(Clone)]
pub struct AppState {
    pub renderer: Arc<Renderer>,
    pub token: String,
}

/// Query parameters for `GET {root}/graph`. Everything arrives as an
/// optional string so defaulting and validation live in one place.
#[derive(Debug, Default, Deserialize)]
pub struct GraphParams {
    pub q: Option<String>,
    pub w: Option<String>,
    pub h: Option<String>,
    pub s: Option<String>,
    pub e: Option<String>,
    pub l: Option<String>,
    pub t: Option<String>,
}

/// Builds the graph route under `http_root`, normalized so axum always
/// sees a leading slash.
pub fn router(http_root: &str, state: AppState) -> Router {
    let root = http_root.trim_end_matches('/');
    let path = if root.is_empty() {
        "/graph".to_string()
    } else if root.starts_with('/') {
        format!("{root}/graph")
    } else {
        format!("/{root}/graph")
    };

    Router::new()
        .route(&path, get(graph))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds the configured listener and serves graph requests until the
/// process is stopped.
pub async fn serve(cfg: &ServeConfig, renderer: Renderer) -> Result<()> {
    let state = AppState {
        renderer: Arc::new(renderer),
        token: cfg.token.clone(),
    };
    let app = router(&cfg.http_root, state);

    info!("Listening on {}", cfg.listen_addr);
    let listener = TcpListener::bind(&cfg.listen_addr).await.map_err(|e| {
        RenderError::Connection(format!("failed to bind {}: {}", cfg.listen_addr, e))
    })?;

    axum::serve(listener, app)
        .await
        .map_err(|e| RenderError::Connection(format!("server error: {e}")))?;

    Ok(())
}

async fn graph(
    State(state): State<AppState>,
    Query(params): Query<GraphParams>,
) -> Result<impl IntoResponse> {
    // Token check comes before any parameter is even looked at.
    authorize(&state.token, params.t.as_deref())?;

    let query = match params.q {
        Some(q) if !q.is_empty() => q,
        _ => {
            return Err(RenderError::Validation(
                "q parameter is required".to_string(),
            ))
        }
    };

    let height = parse_or_default(params.h.as_deref(), "h", DEFAULT_HEIGHT)?;
    let width = parse_or_default(params.w.as_deref(), "w", DEFAULT_WIDTH)?;
    let range_secs = parse_or_default(params.s.as_deref(), "s", DEFAULT_RANGE_SECONDS)?;
    let lookback = chrono::Duration::try_seconds(range_secs).ok_or_else(|| {
        RenderError::Validation(format!("s parameter {range_secs} out of range"))
    })?;
    let show_legend = params.l.is_some();

    let end = match params.e.as_deref() {
        None | Some("") => Utc::now(),
        Some(raw) => {
            let secs: i64 = raw.parse().map_err(|e| {
                RenderError::Validation(format!("bad e parameter {raw:?}: {e}"))
            })?;
            Utc.timestamp_opt(secs, 0).single().ok_or_else(|| {
                RenderError::Validation(format!("e parameter {raw} out of range"))
            })?
        }
    };

    let request = RenderRequest {
        query,
        range: TimeRange::ending_at(end, lookback),
        width,
        height,
        show_legend,
    };
    info!(
        "Rendering graph: {} ({}x{})",
        request.query, request.width, request.height
    );

    let png = state.renderer.render(&request).await?;
    Ok(([(header::CONTENT_TYPE, "image/png")], png))
}

/// Constant-time comparison of the configured token against the caller's.
/// A missing `t` compares as the empty string, so an empty configured
/// token admits only requests that omit it.
fn authorize(expected: &str, provided: Option<&str>) -> Result<()> {
    let provided = provided.unwrap_or("");
    if bool::from(expected.as_bytes().ct_eq(provided.as_bytes())) {
        Ok(())
    } else {
        Err(RenderError::Forbidden)
    }
}

/// Missing or empty parameters fall back to the default; anything else
/// must parse.
fn parse_or_default<T: FromStr>(value: Option<&str>, name: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match value {
        None | Some("") => Ok(default),
        Some(raw) => raw.parse().map_err(|e| {
            RenderError::Validation(format!("bad {name} parameter {raw:?}: {e}"))
        }),
    }
}
