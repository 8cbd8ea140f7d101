use std::path::PathBuf;

use chrono::Duration;
use clap::Parser;

use crate::error::{RenderError, Result};

pub const DEFAULT_PROMETHEUS_URL: &str = "http://localhost:9090";

/// Flags for the one-shot `promgraph` binary.
#[derive(Parser, Debug)]
#[command(name = "promgraph", version)]
#[command(about = "Render a Prometheus range query to a PNG file")]
pub struct RenderConfig {
    /// PromQL expression to graph
    pub query: Option<String>,

    /// URL of prometheus server
    #[arg(short = 'u', long = "url", default_value = DEFAULT_PROMETHEUS_URL)]
    pub prometheus_url: String,

    /// Path to output file
    #[arg(short = 'f', long = "file", default_value = "out.png")]
    pub file: PathBuf,

    /// Graph range (e.g. 90s, 30m, 6h, 2d)
    #[arg(short = 's', long = "since", default_value = "1h")]
    pub since: String,

    /// Image width in pixels
    #[arg(short = 'w', long, default_value_t = 800)]
    pub width: u32,

    /// Image height in pixels
    #[arg(long, default_value_t = 600)]
    pub height: u32,

    /// Omit the legend
    #[arg(long)]
    pub no_legend: bool,
}

/// Flags for the `promgraphd` daemon.
#[derive(Parser, Debug)]
#[command(name = "promgraphd", version)]
#[command(about = "Serve Prometheus range queries as PNG charts over HTTP")]
pub struct ServeConfig {
    /// URL of prometheus server
    #[arg(short = 'u', long = "url", default_value = DEFAULT_PROMETHEUS_URL)]
    pub prometheus_url: String,

    /// Address to listen on
    #[arg(short = 'l', long = "listen", default_value = "0.0.0.0:8080")]
    pub listen_addr: String,

    /// Root path for HTTP endpoints; use when behind a proxy
    #[arg(short = 'r', long = "root", default_value = "")]
    pub http_root: String,

    /// Auth token to require for access
    #[arg(short = 't', long = "token", default_value = "")]
    pub token: String,
}

/// Parses a lookback string such as `90s`, `30m`, `6h` or `2d` into a
/// positive duration.
pub fn parse_lookback(lookback: &str) -> Result<Duration> {
    let lookback = lookback.trim();

    let (num_str, unit) = match lookback.find(|c: char| !c.is_ascii_digit()) {
        Some(pos) if pos > 0 => lookback.split_at(pos),
        _ => {
            return Err(RenderError::Validation(format!(
                "bad lookback {:?}, expected forms like 30m or 6h",
                lookback
            )))
        }
    };

    let num: i64 = num_str.parse().map_err(|_| {
        RenderError::Validation(format!("bad lookback amount {:?}", num_str))
    })?;

    let unit_secs = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86400,
        _ => {
            return Err(RenderError::Validation(format!(
                "bad lookback unit {:?}, expected s, m, h or d",
                unit
            )))
        }
    };

    num.checked_mul(unit_secs)
        .filter(|secs| *secs > 0 && secs.checked_mul(1000).is_some())
        .map(Duration::seconds)
        .ok_or_else(|| {
            RenderError::Validation(format!("lookback {:?} out of range", lookback))
        })
}
