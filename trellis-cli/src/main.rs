use std::sync::Arc;

use clap::Parser;
use trellis_cli::{commands, telemetry, Cli, CliConfig, CliError, JsonDirReader};
use trellis_storage::RecordCache;

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();

    let config = CliConfig::load(cli.config)?;
    telemetry::init_tracing(config.log_format)?;

    let reader = Arc::new(JsonDirReader::new(&config.source_dir));
    let cache = RecordCache::open(config.cache, reader).await?;

    let output = commands::run(&cli.command, &cache).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
