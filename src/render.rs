//! Core chart rendering: fetch a range of series and rasterize a PNG.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use image::{codecs::png::PngEncoder, ColorType, ImageEncoder};
use plotters::prelude::*;
use tracing::debug;

use crate::error::{RenderError, Result};
use crate::prometheus::{Matrix, PrometheusClient, RangeQuery, Series};

/// Sampling interval for range queries.
pub const QUERY_STEP: Duration = Duration::from_secs(60);

/// Half-open query interval. `end` is the rightmost plotted instant.
#[derive(Debug, Clone, Copy)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Range covering `lookback` up to now.
    pub fn since(lookback: chrono::Duration) -> Self {
        Self::ending_at(Utc::now(), lookback)
    }

    /// Range covering `lookback` up to the given end instant. A lookback
    /// reaching past the representable epoch clamps to the earliest instant.
    pub fn ending_at(end: DateTime<Utc>, lookback: chrono::Duration) -> Self {
        let start = end
            .checked_sub_signed(lookback)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self { start, end }
    }
}

/// Parameters for one chart render.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub query: String,
    pub range: TimeRange,
    pub width: u32,
    pub height: u32,
    pub show_legend: bool,
}

/// A named trace ready for plotting. x is minutes relative to the range
/// end, y is the sample value.
#[derive(Debug, Clone, PartialEq)]
struct PointSeries {
    name: String,
    points: Vec<(f64, f64)>,
}

/// Fetches range data for a query and renders it as a PNG line chart.
///
/// The backend handle is shared; concurrent renders each build their own
/// chart and buffer.
#[derive(Clone)]
pub struct Renderer {
    client: Arc<dyn RangeQuery>,
}

impl Renderer {
    /// Creates a renderer backed by the Prometheus server at `base_url`.
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            client: Arc::new(PrometheusClient::new(base_url)?),
        })
    }

    /// Creates a renderer over any range-query implementation.
    pub fn with_client(client: Arc<dyn RangeQuery>) -> Self {
        Self { client }
    }

    /// Renders `request` to PNG bytes. The buffer is only returned once
    /// the image is complete; no partial output exists on failure.
    pub async fn render(&self, request: &RenderRequest) -> Result<Vec<u8>> {
        validate(request)?;

        let matrix = self
            .client
            .query_range(
                &request.query,
                request.range.start,
                request.range.end,
                QUERY_STEP,
            )
            .await?;
        debug!(series = matrix.len(), query = %request.query, "fetched range data");

        let traces = to_point_series(&matrix, request.range.end);
        render_chart(&traces, request)
    }
}

fn validate(request: &RenderRequest) -> Result<()> {
    if request.range.end <= request.range.start {
        return Err(RenderError::Validation(format!(
            "range end {} must be after start {}",
            request.range.end, request.range.start
        )));
    }
    if request.width == 0 || request.height == 0 {
        return Err(RenderError::Validation(format!(
            "dimensions must be positive, got {}x{}",
            request.width, request.height
        )));
    }
    Ok(())
}

/// Display name for a series: label values joined by `|` in key order,
/// with newlines flattened to spaces.
fn display_name(series: &Series) -> String {
    series
        .metric
        .values()
        .map(|v| v.replace('\n', " "))
        .collect::<Vec<_>>()
        .join("|")
}

fn to_point_series(matrix: &Matrix, end: DateTime<Utc>) -> Vec<PointSeries> {
    let end_secs = end.timestamp() as f64;
    matrix
        .iter()
        .map(|series| PointSeries {
            name: display_name(series),
            points: series
                .samples
                .iter()
                .map(|s| ((s.timestamp - end_secs) / 60.0, s.value))
                .collect(),
        })
        .collect()
}

/// Axis bounds: X spans the data domain, falling back to the full query
/// range when there are no points; Y gets 20% headroom beyond the data
/// extremes and never clips the zero line.
fn plot_bounds(traces: &[PointSeries], range: &TimeRange) -> ((f64, f64), (f64, f64)) {
    let mut x_min = f64::INFINITY;
    let mut x_max = f64::NEG_INFINITY;
    let mut y_min = f64::INFINITY;
    let mut y_max = f64::NEG_INFINITY;

    for trace in traces {
        for &(x, y) in &trace.points {
            x_min = x_min.min(x);
            x_max = x_max.max(x);
            if y.is_finite() {
                y_min = y_min.min(y);
                y_max = y_max.max(y);
            }
        }
    }

    let (mut x_lo, mut x_hi) = if x_min.is_finite() && x_max.is_finite() {
        (x_min, x_max)
    } else {
        let span_minutes = (range.end - range.start).num_seconds() as f64 / 60.0;
        (-span_minutes, 0.0)
    };
    if x_lo == x_hi {
        x_lo -= 1.0;
        x_hi += 1.0;
    }

    let mut y_hi = if y_max.is_finite() {
        if y_max > 0.0 {
            y_max * 1.2
        } else {
            0.0
        }
    } else {
        1.0
    };
    let y_lo = if y_min.is_finite() {
        if y_min < 0.0 {
            y_min * 1.2
        } else {
            0.0
        }
    } else {
        0.0
    };
    if y_lo == y_hi {
        y_hi = y_lo + 1.0;
    }

    ((x_lo, x_hi), (y_lo, y_hi))
}

fn encoding_err<E: std::fmt::Display>(err: E) -> RenderError {
    RenderError::Encoding(err.to_string())
}

fn render_chart(traces: &[PointSeries], request: &RenderRequest) -> Result<Vec<u8>> {
    let (width, height) = (request.width, request.height);
    let buf_len = (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(3))
        .ok_or_else(|| {
            RenderError::Encoding(format!("image dimensions {width}x{height} overflow"))
        })?;
    let mut rgb_buf = vec![0u8; buf_len];

    let ((x_lo, x_hi), (y_lo, y_hi)) = plot_bounds(traces, &request.range);

    {
        let root = BitMapBackend::with_buffer(&mut rgb_buf, (width, height)).into_drawing_area();
        root.fill(&WHITE).map_err(encoding_err)?;

        let mut chart = ChartBuilder::on(&root)
            .margin(10)
            .x_label_area_size(40)
            .y_label_area_size(50)
            .build_cartesian_2d(x_lo..x_hi, y_lo..y_hi)
            .map_err(encoding_err)?;

        chart
            .configure_mesh()
            .light_line_style(&WHITE)
            .draw()
            .map_err(encoding_err)?;

        for (idx, trace) in traces.iter().enumerate() {
            let color = Palette99::pick(idx).to_rgba();

            chart
                .draw_series(LineSeries::new(
                    trace.points.iter().copied(),
                    color.stroke_width(1),
                ))
                .map_err(encoding_err)?;
            let markers = chart
                .draw_series(
                    trace
                        .points
                        .iter()
                        .map(|&(x, y)| Circle::new((x, y), 2, color.filled())),
                )
                .map_err(encoding_err)?;

            if request.show_legend {
                markers.label(trace.name.clone()).legend(move |(x, y)| {
                    PathElement::new(vec![(x, y), (x + 10, y)], color)
                });
            }
        }

        if request.show_legend && !traces.is_empty() {
            chart
                .configure_series_labels()
                .position(SeriesLabelPosition::UpperMiddle)
                .background_style(WHITE.mix(0.8))
                .border_style(BLACK)
                .draw()
                .map_err(encoding_err)?;
        }

        root.present().map_err(encoding_err)?;
    }

    let mut png = Vec::new();
    PngEncoder::new(&mut png)
        .write_image(&rgb_buf, width, height, ColorType::Rgb8)
        .map_err(|e| RenderError::Encoding(e.to_string()))?;
    Ok(png)
}
