mod args;
mod runner;

use aegis_core::OrchestratorConfig;
use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::args::{Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over -v
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = OrchestratorConfig::load(args.config.as_deref())?;
    config.validate()?;

    match args.command {
        Command::Scan(scan) => {
            let json = scan.json;
            let session = runner::run_scan(config, scan).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&session)?);
            } else {
                print!("{}", runner::render_summary(&session));
            }
        }
        Command::Status { scan_id, json } => {
            let session = runner::load_status(&config, scan_id.as_deref())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&session)?);
            } else {
                print!("{}", runner::render_summary(&session));
            }
        }
    }
    Ok(())
}
