//! Fabulae MCP Server
//!
//! MCP server for two-voice conversation audio using Cloud Text-to-Speech.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use fabulae::FabulaeServer;
use fabulae_common::tracing::init_tracing;
use fabulae_common::{Config, McpServerBuilder, TransportArgs};

/// Command-line arguments for the MCP server.
#[derive(Parser, Debug)]
#[command(name = "fabulae-mcp")]
#[command(about = "MCP server for two-voice conversation audio")]
struct Args {
    /// Transport configuration
    #[command(flatten)]
    transport: TransportArgs,

    /// Directory for audio produced by requests
    #[arg(long, env = "FABULAE_WORK_DIR", default_value = "fabulae-output")]
    work_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("info");
    tracing::info!("fabulae-mcp server starting...");

    let args = Args::parse();

    let config = Config::from_env()?;
    tracing::info!(
        project_id = %config.project_id,
        location = %config.location,
        gcs_bucket = ?config.gcs_bucket,
        "Configuration loaded"
    );

    let server = FabulaeServer::new(config, args.work_dir);

    let transport = args.transport.into_transport();
    McpServerBuilder::new(server)
        .with_transport(transport)
        .run()
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}
