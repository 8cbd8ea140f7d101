use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Sets up the tracing subscriber for the process.
///
/// # Arguments
/// * `service` - Binary name (`promgraph` or `promgraphd`), used as the
///   default filter target alongside the library crate.
pub fn init_logger(service: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{}={},promgraph={},tower_http={}",
            service,
            Level::INFO,
            Level::INFO,
            Level::INFO
        ))
    });

    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_thread_names(true)
        .with_level(true)
        .with_ansi(true)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .expect("Failed to initialize logger");
}
