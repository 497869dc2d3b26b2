use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use leadgen_aggregator::fixtures::FixtureFile;
use leadgen_aggregator::Aggregator;
use leadgen_common::{snapshot_schema, AppConfig, Query};

/// Replay recorded source output through the aggregation engine.
#[derive(Debug, Parser)]
#[command(name = "leadgen-aggregator", version)]
struct Cli {
    /// Business category, e.g. "Plumbers".
    #[arg(long, required_unless_present = "print_schema")]
    category: Option<String>,

    /// Free-text location, e.g. "Austin, TX".
    #[arg(long, required_unless_present = "print_schema")]
    location: Option<String>,

    /// JSON fixture file describing the sources to replay.
    #[arg(long, required_unless_present = "print_schema")]
    fixtures: Option<PathBuf>,

    /// TOML schema/aggregator config. Falls back to LEADGEN_CONFIG, then
    /// the built-in lead schema.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the JSON Schema of the snapshot output and exit.
    #[arg(long)]
    print_schema: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("leadgen=info".parse()?))
        .init();

    let cli = Cli::parse();
    if cli.print_schema {
        println!("{}", serde_json::to_string_pretty(&snapshot_schema())?);
        return Ok(());
    }

    info!("Leadgen aggregator starting...");
    let fixtures = cli.fixtures.context("--fixtures is required")?;
    let query = Query::new(
        cli.category.context("--category is required")?,
        cli.location.context("--location is required")?,
    );

    let app = AppConfig::from_env()?;
    let config = app.resolve(cli.config.as_deref())?;
    let progress_every = config.aggregator.poll_interval().max(Duration::from_millis(250));

    let sources = FixtureFile::load(&fixtures)?.into_sources();
    let aggregator = Aggregator::from_file_config(config)?;
    let handle = aggregator.start(query, sources)?;

    let snapshot = loop {
        tokio::select! {
            snapshot = handle.wait() => break snapshot,
            _ = tokio::time::sleep(progress_every) => {
                let snapshot = handle.poll();
                let running = snapshot.sources.iter().filter(|s| s.in_progress).count();
                info!(
                    canonical = snapshot.processed_data.len(),
                    raw = snapshot.total_scraped,
                    running,
                    elapsed_secs = snapshot.elapsed_time,
                    "Progress"
                );
            }
        }
    };

    println!("{}", serde_json::to_string_pretty(snapshot.as_ref())?);
    Ok(())
}
