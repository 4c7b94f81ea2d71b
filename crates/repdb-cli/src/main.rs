//! `repdb` command-line runner.
//!
//! Runs operation scripts against the transaction manager and prints the
//! resulting events, or runs seeded random workloads with invariant
//! checking.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use repdb_kernel::EngineConfig;
use repdb_sim::{SimConfig, SimSummary, Simulation, TranscriptEntry, run_seeds};
use serde_json::json;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Available-copies replicated database simulator.
#[derive(Parser)]
#[command(name = "repdb")]
#[command(about = "Available-copies replicated database simulator", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an operation script.
    Run {
        /// Script file, or `-` for stdin.
        script: PathBuf,

        /// Engine configuration (JSON).
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print events as JSON lines.
        #[arg(long)]
        json: bool,

        /// Skip invariant checks after each operation.
        #[arg(long)]
        no_check: bool,
    },

    /// Run seeded random workloads and check invariants.
    Simulate {
        /// Simulation configuration (JSON). Flags override its fields.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// First seed.
        #[arg(short, long)]
        seed: Option<u64>,

        /// Number of seeds to run.
        #[arg(short, long)]
        iterations: Option<u64>,

        /// Generated operations per run.
        #[arg(long)]
        steps: Option<usize>,

        /// Maximum transactions per run.
        #[arg(long)]
        transactions: Option<u64>,

        /// Per-step probability of a site failure or recovery.
        #[arg(long)]
        fail_probability: Option<f64>,

        /// Print summaries as JSON lines.
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    match cli.command {
        Commands::Run {
            script,
            config,
            json,
            no_check,
        } => {
            let engine = match config {
                Some(path) => load_json::<EngineConfig>(&path)?,
                None => EngineConfig::default(),
            };
            let sim_config = SimConfig::default()
                .with_engine(engine)
                .with_invariant_checks(!no_check);
            run_script(&script, sim_config, json)
        }

        Commands::Simulate {
            config,
            seed,
            iterations,
            steps,
            transactions,
            fail_probability,
            json,
        } => {
            let mut sim_config = match config {
                Some(path) => load_json::<SimConfig>(&path)?,
                None => SimConfig::default(),
            };
            if let Some(seed) = seed {
                sim_config = sim_config.with_seed(seed);
            }
            if let Some(iterations) = iterations {
                sim_config = sim_config.with_iterations(iterations);
            }
            if let Some(steps) = steps {
                sim_config = sim_config.with_steps(steps);
            }
            if let Some(transactions) = transactions {
                sim_config = sim_config.with_transactions(transactions);
            }
            if let Some(probability) = fail_probability {
                sim_config = sim_config.with_fail_probability(probability);
            }
            simulate(&sim_config, json)
        }
    }
}

fn init_tracing(verbose: u8) -> Result<()> {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_level).context("invalid log filter")?,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .init();
    Ok(())
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("failed to parse config {}", path.display()))
}

fn read_script(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut source = String::new();
        io::stdin()
            .read_to_string(&mut source)
            .context("failed to read script from stdin")?;
        return Ok(source);
    }
    std::fs::read_to_string(path)
        .with_context(|| format!("failed to read script {}", path.display()))
}

// ============================================================================
// run
// ============================================================================

fn run_script(path: &Path, config: SimConfig, json: bool) -> Result<()> {
    let source = read_script(path)?;
    let mut sim = Simulation::new(config).context("failed to start engine")?;
    tracing::info!(script = %path.display(), "running script");

    let transcript = sim
        .run_script(&source)
        .with_context(|| format!("script {} stopped", path.display()))?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for entry in &transcript {
        if json {
            write_json_entry(&mut out, entry)?;
        } else {
            write_text_entry(&mut out, entry)?;
        }
    }
    out.flush()?;
    Ok(())
}

fn write_text_entry(out: &mut impl Write, entry: &TranscriptEntry) -> io::Result<()> {
    match &entry.line.parsed {
        Ok(_) => {
            for event in &entry.events {
                writeln!(out, "{event}")?;
            }
        }
        Err(error) => {
            eprintln!("line {}: {error} (skipped)", entry.line.line_number);
        }
    }
    Ok(())
}

fn write_json_entry(out: &mut impl Write, entry: &TranscriptEntry) -> Result<()> {
    let line = entry.line.line_number;
    let tick = entry.line.tick;
    match &entry.line.parsed {
        Ok(_) => {
            for event in &entry.events {
                let record = json!({ "line": line, "tick": tick, "event": event });
                writeln!(out, "{record}")?;
            }
        }
        Err(error) => {
            let record = json!({ "line": line, "tick": tick, "error": error.to_string() });
            writeln!(out, "{record}")?;
        }
    }
    Ok(())
}

// ============================================================================
// simulate
// ============================================================================

fn simulate(config: &SimConfig, json: bool) -> Result<()> {
    if config.iterations == 0 {
        bail!("iterations must be at least 1");
    }

    let summaries = run_seeds(config).context("simulation failed")?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut totals = SimSummary::default();

    for summary in &summaries {
        if json {
            writeln!(out, "{}", serde_json::to_string(summary)?)?;
        } else {
            writeln!(
                out,
                "seed {}: {} ops, {} commits, {} aborts ({} deadlock, {} failure), {} waiting",
                summary.seed,
                summary.operations,
                summary.commits,
                summary.aborts,
                summary.deadlock_aborts,
                summary.failure_aborts,
                summary.waiting_at_end,
            )?;
        }

        totals.operations += summary.operations;
        totals.commits += summary.commits;
        totals.aborts += summary.aborts;
    }

    if !json {
        writeln!(
            out,
            "{} seeds passed: {} ops, {} commits, {} aborts",
            config.iterations, totals.operations, totals.commits, totals.aborts
        )?;
    }
    out.flush()?;
    Ok(())
}
