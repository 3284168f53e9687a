mod bootstrap;
mod broker;
mod config;
mod error;
mod exporter;
mod iban;
mod ingestor;
mod ledger;
mod messages;
mod reconciler;
mod republisher;
mod responder;
mod seed;
mod server;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Initialize logging and tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,ledger_recon=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    info!("🚀 Starting cross-ledger payment reconciliation");

    dotenv::dotenv().ok();
    let config = config::Config::from_env()?;

    let pipeline = bootstrap::initialize_pipeline(&config).await?;

    // Serve the read-only monitoring endpoints; the reconciliation
    // components run as background tasks until the process exits.
    let app = server::create_app(pipeline.state);
    server::run_server(app, &config.bind_address).await?;

    Ok(())
}
