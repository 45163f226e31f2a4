use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    // Diagnostics go to stderr: in stdio server mode, stdout belongs to the
    // protocol. CONSTELLATION_DEBUG_LOGGING=true raises the default filter.
    let default_filter = if constellation_fs::config::debug_logging_enabled() {
        "debug"
    } else {
        "info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.parse().unwrap());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    constellation_fs::cli::run().await
}
