mod config;
mod error;
mod graylog;
mod highlight;
mod log_entry;
mod query_executor;
mod rca;
mod server;
mod session;
mod types;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, LevelFilter};
use simple_logger::SimpleLogger;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .env()
        .init()
        .context("Failed to initialise logger")?;

    info!("Starting issue-tracer");

    // Parse command-line arguments
    let cli = config::Cli::parse();

    // Load configuration
    let config = Arc::new(config::load_config(&cli)?);
    info!(
        "Configuration loaded: {} query sets, {} output fields, {} filter keywords",
        config.query_sets.len(),
        config.output_fields.len(),
        config.filter_keywords.len()
    );

    let graylog = graylog::GraylogClient::new(config.graylog.clone())
        .context("Failed to create Graylog client")?;
    let rca = rca::RcaClient::new(config.ai.clone()).context("Failed to create AI client")?;

    let state = server::AppState::new(Arc::clone(&config), Arc::new(graylog), rca);
    server::serve(state, config.bind_addr).await
}
