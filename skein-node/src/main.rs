use clap::Parser;
use tracing_subscriber::EnvFilter;

use skein_node::cli;

fn main() {
    let cli = cli::Cli::parse();

    // RUST_LOG wins over the config file's logging level.
    let level = cli.log_level();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    let rt = tokio::runtime::Runtime::new().expect("Failed to create Tokio runtime");
    rt.block_on(async {
        if let Err(e) = cli::run(cli).await {
            tracing::error!("Fatal error: {}", e);
            std::process::exit(1);
        }
    });
}
