//! # Queue Reconciler CLI
//!
//! Entry point for the scheduler. Runs one job (or the whole pipeline), prints the
//! JSON result on stdout and exits non-zero when any run did not succeed.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use queue_reconciler::config::ConfigManager;
use queue_reconciler::context::ReconcilerContext;
use queue_reconciler::logging::init_structured_logging;
use queue_reconciler::reconciliation::{JobKind, JobOptions, Reconciler};

#[derive(Parser)]
#[command(name = "queue-reconciler")]
#[command(about = "Reconcile the call queue with the operational database")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Environment overlay to load (development, test, production)
    #[arg(short, long)]
    environment: Option<String>,

    /// Configuration directory (default: $RECONCILER_CONFIG_DIR or ./config)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Seed score rows for recently registered users
    NewUsers(RunArgs),
    /// Prioritize signed users with new actionable requirements
    NewRequirements(RunArgs),
    /// Convert unsigned-queue users who have since signed
    SignatureCleanup(RunArgs),
    /// Convert outstanding-queue users whose requirements are complete
    OutstandingCleanup(RunArgs),
    /// Credit recent conversions to agents
    Attribution(RunArgs),
    /// Run every job in pipeline order
    All(RunArgs),
    /// Probe both databases and report circuit breaker state
    Health,
    /// Print the effective configuration with credentials masked
    Config,
}

#[derive(Args, Clone)]
struct RunArgs {
    /// Look-back window in hours (discovery and attribution jobs)
    #[arg(long)]
    hours_back: Option<i64>,

    /// Read and compute everything, write nothing
    #[arg(long)]
    dry_run: bool,

    /// Candidates per batch
    #[arg(long)]
    batch_size: Option<usize>,
}

impl From<RunArgs> for JobOptions {
    fn from(args: RunArgs) -> Self {
        JobOptions {
            hours_back: args.hours_back,
            dry_run: args.dry_run,
            batch_size: args.batch_size,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "queue-reconciler failed");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    let config_manager = match &cli.environment {
        Some(environment) => ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), environment),
        None => ConfigManager::load_from_directory(cli.config_dir.clone()),
    }
    .context("failed to load configuration")?;

    init_structured_logging(&config_manager.config().logging);

    if let Commands::Config = cli.command {
        println!("{}", serde_json::to_string_pretty(&config_manager.debug_config())?);
        return Ok(true);
    }

    let context = ReconcilerContext::from_config(config_manager)
        .await
        .context("failed to initialize database connections")?;

    let succeeded = match cli.command {
        Commands::Health => {
            let report = context.health_check().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            report.healthy
        }
        Commands::All(args) => {
            let reports = Reconciler::new(context.clone())
                .run_pipeline(&args.into())
                .await;
            println!("{}", serde_json::to_string_pretty(&reports)?);
            reports.iter().all(|report| report.success())
        }
        Commands::NewUsers(args) => run_job(&context, JobKind::NewUsers, args).await?,
        Commands::NewRequirements(args) => run_job(&context, JobKind::NewRequirements, args).await?,
        Commands::SignatureCleanup(args) => run_job(&context, JobKind::SignatureCleanup, args).await?,
        Commands::OutstandingCleanup(args) => {
            run_job(&context, JobKind::OutstandingCleanup, args).await?
        }
        Commands::Attribution(args) => run_job(&context, JobKind::Attribution, args).await?,
        Commands::Config => true,
    };

    context.close().await;
    Ok(succeeded)
}

async fn run_job(
    context: &std::sync::Arc<ReconcilerContext>,
    job: JobKind,
    args: RunArgs,
) -> anyhow::Result<bool> {
    let report = Reconciler::new(context.clone()).run(job, &args.into()).await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(report.success())
}
