use std::process;

use clap::Parser;
use tracing::{error, info};

use promgraph::{api, config::ServeConfig, logging, render::Renderer};

#[tokio::main]
async fn main() {
    let cfg = ServeConfig::parse();
    logging::init_logger("promgraphd");

    info!("Starting up, prometheus API at {}", cfg.prometheus_url);

    let renderer = match Renderer::new(&cfg.prometheus_url) {
        Ok(renderer) => renderer,
        Err(e) => {
            error!("Couldn't create renderer: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = api::serve(&cfg, renderer).await {
        error!("Couldn't serve: {}", e);
        process::exit(1);
    }
}
