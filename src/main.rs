use std::fs;
use std::process;

use clap::Parser;
use tracing::{error, info};

use promgraph::{
    config::{parse_lookback, RenderConfig},
    logging,
    render::{RenderRequest, Renderer, TimeRange},
};

#[tokio::main]
async fn main() {
    let cfg = RenderConfig::parse();
    logging::init_logger("promgraph");

    info!("Starting up, prometheus API at {}", cfg.prometheus_url);

    let Some(query) = cfg.query.clone() else {
        error!("Query required");
        process::exit(1);
    };

    let lookback = match parse_lookback(&cfg.since) {
        Ok(lookback) => lookback,
        Err(e) => {
            error!("Bad graph range: {}", e);
            process::exit(1);
        }
    };

    let renderer = match Renderer::new(&cfg.prometheus_url) {
        Ok(renderer) => renderer,
        Err(e) => {
            error!("Couldn't create renderer: {}", e);
            process::exit(1);
        }
    };

    let request = RenderRequest {
        query,
        range: TimeRange::since(lookback),
        width: cfg.width,
        height: cfg.height,
        show_legend: !cfg.no_legend,
    };

    let png = match renderer.render(&request).await {
        Ok(png) => png,
        Err(e) => {
            error!("Couldn't render expression: {}", e);
            process::exit(1);
        }
    };

    // The file is only created once a complete image exists.
    if let Err(e) = fs::write(&cfg.file, &png) {
        error!("Couldn't write {}: {}", cfg.file.display(), e);
        process::exit(1);
    }
    info!("Wrote {} bytes to {}", png.len(), cfg.file.display());
}
