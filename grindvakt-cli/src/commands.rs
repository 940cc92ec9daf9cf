use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use grindvakt_config::GrindvaktConfig;
use grindvakt_core::{Outcome, RuleSetId};
use grindvakt_engine::{RuleRotationEngine, SignalHandler};
use grindvakt_signal::StaticSegmentResolver;
use grindvakt_telemetry::EventLogger;

use crate::backends;

#[derive(Parser)]
#[command(version, about)]
pub struct Cli {
    /// Configuration file; defaults to the layered `config/` lookup
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Print Prometheus metrics after the command
    #[arg(long, global = true)]
    pub metrics: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a finding (JSON event file) through the signal handler
    Handle(HandleArgs),
    /// Give a host a deny slot directly
    Block(BlockArgs),
    /// Print the records of a rule set, oldest first
    List(RuleSetArgs),
    /// Compare the metadata table with the firewall rule set
    Audit(RuleSetArgs),
}

#[derive(Args, Debug, Clone)]
pub struct HandleArgs {
    pub event_file: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct BlockArgs {
    #[arg(long)]
    pub rule_set: String,
    #[arg(long)]
    pub host: Ipv4Addr,
}

#[derive(Args, Debug, Clone)]
pub struct RuleSetArgs {
    #[arg(long)]
    pub rule_set: String,
}

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => GrindvaktConfig::load_from_path(path),
        None => GrindvaktConfig::load(),
    }
    .context("Failed to load configuration")?;
    EventLogger::init(&config.telemetry.log_filter);

    let engine = Arc::new(
        RuleRotationEngine::from_config(
            &config,
            backends::metadata_store(&config.metadata),
            backends::firewall_store(&config.firewall),
        )
        .context("Invalid rotation settings")?,
    );

    let result = match cli.command {
        Commands::Handle(args) => handle(&config, engine.clone(), args).await,
        Commands::Block(args) => block(&engine, args).await,
        Commands::List(args) => list(&engine, args).await,
        Commands::Audit(args) => audit(&engine, args).await,
    };

    if cli.metrics {
        print!("{}", engine.metrics().gather_metrics()?);
    }
    result
}

async fn handle(
    config: &GrindvaktConfig,
    engine: Arc<RuleRotationEngine>,
    args: HandleArgs,
) -> anyhow::Result<()> {
    let raw = tokio::fs::read(&args.event_file)
        .await
        .with_context(|| format!("Failed to read {}", args.event_file.display()))?;
    let event: serde_json::Value = serde_json::from_slice(&raw)
        .with_context(|| format!("{} is not valid JSON", args.event_file.display()))?;

    let resolver = StaticSegmentResolver::from_map(&config.segments.associations);
    info!(segments = resolver.len(), "Loaded segment associations");
    let handler = SignalHandler::new(Arc::new(resolver), engine);

    let outcome = handler.handle(&event).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn block(engine: &RuleRotationEngine, args: BlockArgs) -> anyhow::Result<()> {
    let rule_set_id = RuleSetId::from(args.rule_set);
    match engine.allocate(&rule_set_id, args.host).await? {
        Outcome::Blocked {
            slot,
            evicted: Some(evicted),
        } => println!(
            "{} blocked at rule {slot} in {rule_set_id}, evicted {}",
            args.host, evicted.remote_host
        ),
        Outcome::Blocked { slot, evicted: None } => {
            println!("{} blocked at rule {slot} in {rule_set_id}", args.host)
        }
        Outcome::AlreadyBlocked => println!("{} is already blocked in {rule_set_id}", args.host),
    }
    Ok(())
}

async fn list(engine: &RuleRotationEngine, args: RuleSetArgs) -> anyhow::Result<()> {
    let rule_set_id = RuleSetId::from(args.rule_set);
    let records = engine.records(&rule_set_id).await?;
    if records.is_empty() {
        println!("No hosts blocked in {rule_set_id}");
        return Ok(());
    }
    println!("{:<6} {:<16} {}", "RULE", "HOST", "CREATED_AT");
    for record in records {
        println!(
            "{:<6} {:<16} {}",
            record.slot_number, record.remote_host, record.created_at
        );
    }
    Ok(())
}

async fn audit(engine: &RuleRotationEngine, args: RuleSetArgs) -> anyhow::Result<()> {
    let rule_set_id = RuleSetId::from(args.rule_set);
    match engine.audit(&rule_set_id).await {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Err(err) => bail!("Audit of {rule_set_id} failed: {err}"),
    }
}
