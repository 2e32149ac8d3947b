//! # Datachain Rope Run Lab CLI
//!
//! Command-line interface for driving a single run through the engine.
//!
//! ## Usage
//!
//! ```bash
//! # HTTP run against a health endpoint
//! rope-runlab run --name api-smoke --target https://dcscan.io/api/v1/health --duration 60 --rps 100
//!
//! # Scripted run, exported as CSV
//! rope-runlab run --name replay --script steps.json --export csv --output replay.csv
//!
//! # Check a run configuration without running it
//! rope-runlab validate --config run.toml
//! ```

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use rope_runlab::{
    EngineConfig, ExportFormat, HttpProber, RunConfig, RunEngine, RunKind, RunState, ScriptedProber,
    TargetProber,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "rope-runlab")]
#[command(author = "Datachain Rope Team")]
#[command(version)]
#[command(about = "Run lifecycle and live metrics engine for Datachain Rope", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Engine configuration file (TOML)
    #[arg(long, global = true)]
    engine_config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute one run and print its report
    Run(RunArgs),

    /// Validate a run configuration file
    Validate {
        /// Run configuration file (TOML)
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    /// Run configuration file (TOML); flags below are ignored when set
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run name
    #[arg(short, long, default_value = "adhoc")]
    name: String,

    /// Run kind: load, stress, spike, endurance or protocol:<name>
    #[arg(short, long, default_value = "load")]
    kind: RunKind,

    /// Run duration in seconds
    #[arg(short, long, default_value = "60")]
    duration: u64,

    /// Target events per second
    #[arg(short, long, default_value = "10")]
    rps: u64,

    /// Maximum requests in flight
    #[arg(short, long, default_value = "10")]
    concurrency: usize,

    /// Ramp-up duration in seconds
    #[arg(long, default_value = "0")]
    ramp_up: u64,

    /// Per-request timeout in seconds
    #[arg(long, default_value = "30")]
    timeout: u64,

    /// Retries per request
    #[arg(long, default_value = "0")]
    retries: u32,

    /// Target URL
    #[arg(short, long, default_value = "")]
    target: String,

    /// Replay a JSON script instead of probing the target
    #[arg(long)]
    script: Option<PathBuf>,

    /// Export format (csv or json)
    #[arg(long, requires = "output")]
    export: Option<ExportFormat>,

    /// Export destination
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print engine metrics in Prometheus text format after the run
    #[arg(long)]
    metrics: bool,
}

impl RunArgs {
    fn run_config(&self) -> anyhow::Result<RunConfig> {
        if let Some(path) = &self.config {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            return Ok(RunConfig::from_toml_str(&content)?);
        }

        Ok(RunConfig {
            name: self.name.clone(),
            kind: self.kind.clone(),
            duration_secs: self.duration,
            target_rate_per_sec: self.rps,
            concurrency: self.concurrency,
            ramp_up_secs: self.ramp_up,
            per_event_timeout_secs: self.timeout,
            retries: self.retries,
            target: self.target.clone(),
            ..Default::default()
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    if cli.json_logs {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }

    let engine_config = match &cli.engine_config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Commands::Run(args) => {
            let state = run(engine_config, args).await?;
            if state == RunState::Failed {
                std::process::exit(1);
            }
        }
        Commands::Validate { config } => validate(&engine_config, &config)?,
    }

    Ok(())
}

async fn run(engine_config: EngineConfig, args: RunArgs) -> anyhow::Result<RunState> {
    let config = args.run_config()?;
    let prober: Arc<dyn TargetProber> = match &args.script {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            Arc::new(ScriptedProber::from_json(&json)?)
        }
        None => {
            if config.target.is_empty() {
                bail!("either --target or --script is required");
            }
            Arc::new(HttpProber::new()?)
        }
    };

    let engine = RunEngine::new(engine_config)?;
    let id = engine.create_run(config)?;
    info!(run_id = %id, prober = prober.name(), "Run lab ready");

    let mut driver = engine.launch(id, prober)?;
    let state = tokio::select! {
        joined = &mut driver => joined.context("driver task panicked")??,
        _ = tokio::signal::ctrl_c() => {
            warn!(run_id = %id, "Interrupted, stopping run");
            let state = engine.stop(id)?;
            driver.await.context("driver task panicked")??;
            state
        }
    };

    let snapshot = engine.snapshot(id)?;
    print!("{}", snapshot.render_report());

    if let (Some(format), Some(output)) = (args.export, &args.output) {
        let payload = engine.export(id, format)?;
        std::fs::write(output, payload).with_context(|| format!("writing {}", output.display()))?;
        info!("Results saved to {}", output.display());
    }

    if args.metrics {
        print!("{}", engine.telemetry().encode()?);
    }

    Ok(state)
}

fn validate(engine_config: &EngineConfig, path: &Path) -> anyhow::Result<()> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let config = RunConfig::from_toml_str(&content)?;

    match config.validate(engine_config.max_concurrency) {
        Ok(()) => {
            println!("✅ {} is a valid run configuration", path.display());
            Ok(())
        }
        Err(e) => {
            for violation in &e.violations {
                println!("❌ {}", violation);
            }
            bail!("{} failed validation", path.display())
        }
    }
}
