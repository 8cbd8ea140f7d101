//! Client for the Prometheus range-query HTTP API.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::Deserialize;

use crate::error::{RenderError, Result};

/// One timestamped value within a series. Timestamps are Unix seconds as
/// returned by the range API.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub timestamp: f64,
    pub value: f64,
}

/// A labeled time series covering the queried range. Label keys are kept
/// sorted so derived output is deterministic.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub metric: BTreeMap<String, String>,
    pub samples: Vec<Sample>,
}

pub type Matrix = Vec<Series>;

/// Narrow capability the renderer needs from the metrics backend: one
/// range query returning a matrix of labeled series.
#[async_trait]
pub trait RangeQuery: Send + Sync {
    async fn query_range(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
    ) -> Result<Matrix>;
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    #[serde(default)]
    data: Option<ApiData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiData {
    #[serde(rename = "resultType")]
    result_type: String,
    // Held as a raw value until the result type is known; scalar and
    // string results are not arrays of series objects.
    #[serde(default)]
    result: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiSeries {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    #[serde(default)]
    values: Vec<(f64, String)>,
}

/// Checks the response envelope and decodes a matrix result into samples.
fn parse_matrix(resp: ApiResponse) -> Result<Matrix> {
    if resp.status != "success" {
        return Err(RenderError::Upstream(
            resp.error.unwrap_or_else(|| "unknown error".to_string()),
        ));
    }

    let data = resp
        .data
        .ok_or_else(|| RenderError::Upstream("missing data field".to_string()))?;

    if data.result_type != "matrix" {
        return Err(RenderError::UnexpectedShape(data.result_type));
    }

    let rows: Vec<ApiSeries> = serde_json::from_value(data.result)
        .map_err(|e| RenderError::Upstream(format!("undecodable matrix result: {e}")))?;

    let mut matrix = Vec::with_capacity(rows.len());
    for row in rows {
        let mut samples = Vec::with_capacity(row.values.len());
        for (timestamp, value) in row.values {
            let value = value.parse::<f64>().map_err(|e| {
                RenderError::Upstream(format!("bad sample value {value:?}: {e}"))
            })?;
            samples.push(Sample { timestamp, value });
        }
        matrix.push(Series {
            metric: row.metric,
            samples,
        });
    }
    Ok(matrix)
}

/// HTTP client for a Prometheus server. Cheap to clone and safe to share
/// across concurrent renders.
#[derive(Debug, Clone)]
pub struct PrometheusClient {
    base_url: Url,
    client: reqwest::Client,
}

impl PrometheusClient {
    /// Creates a client for the server at `base_url`. Only syntactic
    /// validation happens here; no network call is made.
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|e| {
            RenderError::Connection(format!("invalid Prometheus URL {base_url:?}: {e}"))
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| RenderError::Connection(e.to_string()))?;

        Ok(Self { base_url, client })
    }
}

#[async_trait]
impl RangeQuery for PrometheusClient {
    async fn query_range(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
    ) -> Result<Matrix> {
        let url = format!(
            "{}/api/v1/query_range",
            self.base_url.as_str().trim_end_matches('/')
        );
        let params = [
            ("query", query.to_string()),
            ("start", start.timestamp().to_string()),
            ("end", end.timestamp().to_string()),
            ("step", step.as_secs().to_string()),
        ];

        let response = self.client.get(&url).query(&params).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(RenderError::Upstream(format!("HTTP {status}: {text}")));
        }

        let body: ApiResponse = response.json().await?;
        parse_matrix(body)
    }
}
