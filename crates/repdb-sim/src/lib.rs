//! # repdb-sim: Deterministic simulation for `repdb`
//!
//! Drives the engine with operation sequences, either from a script or
//! from a seeded [`WorkloadGenerator`], and checks correctness invariants
//! after every operation.
//!
//! - **Reproducibility**: same seed, same workload, same outcome
//! - **Invariant checking**: lock tables, wait-for graph and version
//!   histories are verified continuously
//!
//! ## Quick Start
//!
//! ```ignore
//! use repdb_sim::{SimConfig, Simulation};
//!
//! let config = SimConfig::default().with_seed(12345);
//! let mut sim = Simulation::new(config)?;
//! let summary = sim.run_workload()?;
//! println!("{} commits", summary.commits);
//! ```

mod error;
mod invariant;
mod rng;
mod workload;


use repdb_kernel::{AbortReason, Engine, EngineConfig, Event};
use repdb_script::{ScriptLine, ScriptReader};
use repdb_types::{Operation, Tick};
use serde::{Deserialize, Serialize};

pub use error::SimError;
pub use invariant::{
    InvariantChecker, InvariantResult, LockTableChecker, VersionOrderChecker, WaitForChecker,
    default_checkers,
};
pub use rng::SimRng;
pub use workload::WorkloadGenerator;

// ============================================================================
// Simulation Configuration
// ============================================================================

/// Configuration for a simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Seed for the workload generator. Iteration `i` uses `seed + i`.
    pub seed: u64,
    /// Number of seeds to run.
    pub iterations: u64,
    /// Generated operations per run, before the closing `end`s.
    pub steps: usize,
    /// Maximum number of transactions per run.
    pub transactions: u64,
    /// Probability that a step fails or recovers a site.
    pub fail_probability: f64,
    /// Probability that a new transaction is read-only.
    pub read_only_probability: f64,
    /// Whether to run invariant checkers after every operation.
    pub check_invariants: bool,
    pub engine: EngineConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            iterations: 100,
            steps: 200,
            transactions: 20,
            fail_probability: 0.05,
            read_only_probability: 0.2,
            check_invariants: true,
            engine: EngineConfig::default(),
        }
    }
}

impl SimConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_iterations(mut self, iterations: u64) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_steps(mut self, steps: usize) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_transactions(mut self, transactions: u64) -> Self {
        self.transactions = transactions;
        self
    }

    /// Sets the per-step probability of a site failure or recovery.
    pub fn with_fail_probability(mut self, probability: f64) -> Self {
        self.fail_probability = probability.clamp(0.0, 1.0);
        self
    }

    pub fn with_read_only_probability(mut self, probability: f64) -> Self {
        self.read_only_probability = probability.clamp(0.0, 1.0);
        self
    }

    pub fn with_invariant_checks(mut self, enabled: bool) -> Self {
        self.check_invariants = enabled;
        self
    }

    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// Checks fields that bypass the builders, e.g. when loaded from JSON.
    pub fn validate(&self) -> Result<(), SimError> {
        for (name, probability) in [
            ("fail_probability", self.fail_probability),
            ("read_only_probability", self.read_only_probability),
        ] {
            if !(0.0..=1.0).contains(&probability) {
                return Err(SimError::InvalidConfig(format!(
                    "{name} must be within [0, 1], got {probability}"
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Simulation
// ============================================================================

/// A script line and the events it produced.
#[derive(Debug, Clone)]
pub struct TranscriptEntry {
    pub line: ScriptLine,
    pub events: Vec<Event>,
}

/// Feeds operations to an [`Engine`] and checks invariants.
pub struct Simulation {
    config: SimConfig,
    engine: Engine,
    checkers: Vec<Box<dyn InvariantChecker>>,
    tick: Tick,
    summary: SimSummary,
}

impl Simulation {
    pub fn new(config: SimConfig) -> Result<Self, SimError> {
        config.validate()?;
        let engine = Engine::new(config.engine.clone()).map_err(SimError::Setup)?;
        let summary = SimSummary {
            seed: config.seed,
            ..SimSummary::default()
        };
        Ok(Self {
            config,
            engine,
            checkers: default_checkers(),
            tick: Tick::ZERO,
            summary,
        })
    }

    /// Adds a checker that runs after the built-in ones.
    pub fn add_checker(&mut self, checker: Box<dyn InvariantChecker>) {
        self.checkers.push(checker);
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Counters accumulated so far.
    pub fn summary(&self) -> &SimSummary {
        &self.summary
    }

    /// Applies `op` at the next tick.
    pub fn step(&mut self, op: Operation) -> Result<Vec<Event>, SimError> {
        self.apply_at(self.tick.next(), op)
    }

    /// Applies `op` at `tick` and checks invariants.
    pub fn apply_at(&mut self, tick: Tick, op: Operation) -> Result<Vec<Event>, SimError> {
        let events = self
            .engine
            .apply(tick, op)
            .map_err(|source| SimError::Rejected { op, tick, source })?;
        self.tick = tick;
        self.summary.record(tick, &events);

        if self.config.check_invariants {
            for checker in &mut self.checkers {
                if let Some(err) = checker.check(&self.engine).into_error(tick) {
                    tracing::error!(checker = checker.name(), %err, "invariant violated");
                    return Err(err);
                }
            }
            self.summary.invariant_checks += 1;
        }
        Ok(events)
    }

    /// Runs a script. Malformed lines are kept in the transcript with no
    /// events; a rejected operation stops the run.
    pub fn run_script(&mut self, source: &str) -> Result<Vec<TranscriptEntry>, SimError> {
        let mut transcript = Vec::new();
        for line in ScriptReader::new(source) {
            let events = match &line.parsed {
                Ok(op) => self.apply_at(line.tick, *op)?,
                Err(_) => {
                    self.summary.skipped_lines += 1;
                    Vec::new()
                }
            };
            transcript.push(TranscriptEntry { line, events });
        }
        Ok(transcript)
    }

    /// Generates and runs a workload from the configured seed.
    pub fn run_workload(&mut self) -> Result<SimSummary, SimError> {
        let mut generator = WorkloadGenerator::new(SimRng::new(self.config.seed), &self.config);
        for op in generator.generate(self.config.steps) {
            self.step(op)?;
        }
        self.summary.waiting_at_end = self.engine.queue().len();

        tracing::info!(
            seed = self.config.seed,
            operations = self.summary.operations,
            commits = self.summary.commits,
            aborts = self.summary.aborts,
            "workload complete"
        );
        Ok(self.summary.clone())
    }
}

/// Runs `config.iterations` workloads with consecutive seeds and stops at
/// the first failing seed.
pub fn run_seeds(config: &SimConfig) -> Result<Vec<SimSummary>, SimError> {
    config.validate()?;
    (0..config.iterations)
        .map(|i| {
            let seed = config.seed.wrapping_add(i);
            Simulation::new(config.clone().with_seed(seed))
                .and_then(|mut sim| sim.run_workload())
                .map_err(|source| SimError::SeedFailed {
                    seed,
                    source: Box::new(source),
                })
        })
        .collect()
}

// ============================================================================
// Simulation Summary
// ============================================================================

/// Counters for a simulation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimSummary {
    pub seed: u64,
    pub operations: u64,
    pub skipped_lines: u64,
    pub commits: u64,
    pub aborts: u64,
    pub deadlock_aborts: u64,
    pub failure_aborts: u64,
    pub site_failures: u64,
    pub reads: u64,
    /// Operations still queued when the run ended.
    pub waiting_at_end: usize,
    pub invariant_checks: u64,
    pub final_tick: Tick,
}

impl SimSummary {
    fn record(&mut self, tick: Tick, events: &[Event]) {
        self.operations += 1;
        self.final_tick = tick;
        for event in events {
            match event {
                Event::Committed { .. } => self.commits += 1,
                Event::Aborted { reason, .. } => {
                    self.aborts += 1;
                    match reason {
                        AbortReason::Deadlock => self.deadlock_aborts += 1,
                        AbortReason::SiteFailure(_) => self.failure_aborts += 1,
                    }
                }
                Event::SiteFailed { .. } => self.site_failures += 1,
                Event::ReadValue { .. } => self.reads += 1,
                _ => {}
            }
        }
    }
}
