use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use coherence_operator::flags::{Cli, OperatorFlags};
use coherence_operator::CoherenceOperator;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if cli.log_json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    let flags = OperatorFlags::load(&cli)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "启动 Coherence Operator");

    CoherenceOperator::new(flags).await?.run().await
}
