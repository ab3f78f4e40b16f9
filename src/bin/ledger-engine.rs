use std::fs::File;

use anyhow::{Context, Result};
use ledger_engine::{
    bin_utils::{ReplayError, Service},
    config::EngineConfig,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let filename = std::env::args()
        .nth(1)
        .context("Expected a file name as the first argument")?;
    let file = File::open(&filename).with_context(|| format!("Failed to open `{filename}`"))?;
    let config = EngineConfig::from_env().context("Invalid engine configuration")?;

    let service = Service {
        input: file,
        output: &mut std::io::stdout(),
        config,
        error_printer: Box::new(|line, err| match err {
            ReplayError::Ledger(err) if err.is_business() => {
                // rejected operations are expected outcomes, not failures of the replay
            }
            err => eprintln!("Error at line {line}: {err}"),
        }),
    };
    service.run().await
}
