use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;
use vaultnav::clock::{format_stamp, SystemClock};
use vaultnav::config::{Environment, ResolvedConfig, PAYLOAD_ENV};
use vaultnav::error::NavError;
use vaultnav::format::{format_usd, format_with_ticker, DisplayOptions};
use vaultnav::models::NavRecord;
use vaultnav::pipeline::{Pipeline, Stage, StageError};
use vaultnav::storage::PublishOutcome;

#[derive(Parser)]
#[command(name = "vaultnav")]
#[command(about = "Net asset value snapshots for DeFi vaults")]
struct Cli {
    /// Path to config file (.toml or .json)
    #[arg(short, long, default_value = "vaultnav.toml")]
    config: PathBuf,

    /// Full JSON configuration; takes precedence over --config
    #[arg(long, env = PAYLOAD_ENV)]
    payload: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch, read supply, compute and publish (default)
    Run,
    /// Fetch wallet holdings into portfolio_snapshot.json
    Fetch,
    /// Read vault share supply into vault_supply.json
    Supply,
    /// Compute NAV from saved artifacts into nav_record.json
    Compute,
    /// Publish the saved nav_record.json
    Publish,
    /// Show resolved configuration
    Config,
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().with_writer(std::io::stderr).json())
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .init();
    }
}

fn print_record(record: &NavRecord, decimals: Option<u32>) {
    let options = DisplayOptions::new(decimals);
    let ticker = &record.reference_asset_ticker;
    println!("Run:            {}", record.run_id);
    println!("Timestamp:      {}", format_stamp(record.timestamp));
    println!("Vault:          {} ({})", record.vault_address, record.chain_id);
    println!(
        "Total value:    {} ({})",
        format_with_ticker(record.total_value_reference_asset, ticker, options),
        format_usd(record.total_value_usd, options)
    );
    println!(
        "NAV per share:  {} ({})",
        format_with_ticker(record.nav_per_share, ticker, DisplayOptions::new(None)),
        format_usd(record.share_price_usd, DisplayOptions::new(None))
    );
    for position in record.raw_breakdown.positions.iter().take(10) {
        println!(
            "  {:<40} {}",
            position.key,
            format_with_ticker(position.value, ticker, options)
        );
    }
    if !record.is_complete() {
        println!(
            "Omitted legs:   {}",
            record.raw_breakdown.omissions.len()
        );
    }
}

fn print_outcome(outcome: &PublishOutcome) {
    if let Some(path) = &outcome.local_path {
        println!("Saved:          {}", path.display());
    }
    if let Some(id) = &outcome.document_id {
        println!("Document id:    {id}");
    }
    if let Some(err) = &outcome.remote_error {
        println!("Document store: FAILED ({err})");
    }
    if let Some(err) = &outcome.local_error {
        println!("Local artifact: FAILED ({err})");
    }
}

fn build_pipeline(resolved: &ResolvedConfig) -> Result<Pipeline, StageError> {
    let env = Environment::from_env().map_err(|source| StageError {
        stage: Stage::Config,
        source,
    })?;
    Pipeline::from_settings(resolved, &env, Arc::new(SystemClock))
}

async fn execute(cli: Cli) -> Result<(), StageError> {
    let config_error = |e: anyhow::Error| StageError {
        stage: Stage::Config,
        source: NavError::config(format!("{e:#}")),
    };

    let resolved = ResolvedConfig::load_with_payload(&cli.config, cli.payload.as_deref())
        .map_err(config_error)?;
    let decimals = resolved.config.display.currency_decimals;

    let command = cli.command.unwrap_or(Command::Run);
    if let Command::Config = command {
        println!("Source:         {}", resolved.source);
        println!("Data directory: {}", resolved.data_dir.display());
        let shown = serde_json::to_string_pretty(&resolved.config)
            .map_err(|e| config_error(e.into()))?;
        println!("{shown}");
        return Ok(());
    }

    let pipeline = build_pipeline(&resolved)?;
    match command {
        Command::Run => {
            let summary = pipeline.run().await?;
            print_record(&summary.record, decimals);
            print_outcome(&summary.outcome);
        }
        Command::Fetch => {
            let snapshot = pipeline.fetch().await?;
            println!(
                "Fetched {} chain(s) into {}",
                snapshot.chains.len(),
                pipeline.artifacts().snapshot_file().display()
            );
        }
        Command::Supply => {
            let supply = pipeline.supply().await?;
            println!(
                "Total supply {} ({} decimals) at block {}",
                supply.total_supply, supply.decimals, supply.block_number
            );
        }
        Command::Compute => {
            let record = pipeline.compute_saved(&Uuid::new_v4().to_string()).await?;
            print_record(&record, decimals);
        }
        Command::Publish => {
            let (record, outcome) = pipeline.publish_saved().await?;
            print_record(&record, decimals);
            print_outcome(&outcome);
        }
        Command::Config => {}
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_logging(cli.log_json);

    match execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(stage = %err.stage, error = %err.source, "run failed");
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}
