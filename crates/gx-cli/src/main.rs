//! genexpi CLI

mod config;
mod io;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::RunSpec;
use gx_compute::{Device, RuntimeProbe};
use gx_core::TaskMonitor;
use gx_inference::{FitStatus, InferenceEngine, validate_batch};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Parser)]
#[command(name = "genexpi")]
#[command(about = "genexpi - Batched inference of gene-regulation weights")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit every task of a run spec and write a results table
    Infer {
        /// Run spec (JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file for results (CSV). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Override the device thread count (0 = auto).
        #[arg(long)]
        threads: Option<usize>,

        /// Override the base seed and enable fixed seeding.
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Validate a run spec against its dataset without fitting
    CheckConfig {
        /// Run spec (JSON)
        #[arg(short, long)]
        input: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Infer { input, output, threads, seed } => {
            cmd_infer(&input, output.as_deref(), threads, seed)
        }
        Commands::CheckConfig { input } => cmd_check_config(&input),
    }
}

/// Logs batch progress in tenths.
#[derive(Default)]
struct ProgressLog {
    last_decile: AtomicUsize,
}

impl TaskMonitor for ProgressLog {
    fn report_progress(&self, fraction: f64) {
        let decile = (fraction.clamp(0.0, 1.0) * 10.0) as usize;
        if self.last_decile.fetch_max(decile, Ordering::Relaxed) < decile {
            tracing::info!(percent = decile * 10, "batch progress");
        }
    }

    fn is_cancellation_requested(&self) -> bool {
        false
    }
}

fn load(input: &Path) -> Result<(RunSpec, gx_core::ExpressionDataset)> {
    tracing::info!(path = %input.display(), "loading run spec");
    let spec = RunSpec::load(input)?;
    spec.check()?;
    let dataset = io::read_dataset(&spec.dataset)?;
    Ok((spec, dataset))
}

fn cmd_infer(
    input: &Path,
    output: Option<&Path>,
    threads: Option<usize>,
    seed: Option<u64>,
) -> Result<()> {
    let (mut spec, dataset) = load(input)?;
    if let Some(threads) = threads {
        spec.device.threads = threads;
    }
    if let Some(seed) = seed {
        spec.search.use_fixed_seed = true;
        spec.search.fixed_seed = seed;
    }
    let resolved = spec.tasks(&dataset);

    let device = Device::new(spec.device).context("failed to start device")?;
    let engine = InferenceEngine::new(&device, RuntimeProbe::new(spec.device));
    tracing::info!(
        tasks = resolved.tasks.len(),
        skipped = resolved.unresolved.len(),
        threads = engine.device().threads(),
        "submitting batch"
    );
    let results = engine.submit(&dataset, &resolved.tasks, &ProgressLog::default())?;

    let converged = results.iter().filter(|r| r.status == FitStatus::Converged).count();
    let failed = results.iter().filter(|r| r.is_failed()).count();
    tracing::info!(results = results.len(), converged, failed, "batch complete");
    for r in results.iter().filter(|r| r.is_failed()) {
        tracing::warn!(task = %r.task_id, status = ?r.status, "task diverged");
    }

    io::write_results(output, &dataset, spec.model.model(), &results, &resolved.unresolved)
}

fn cmd_check_config(input: &Path) -> Result<()> {
    let (spec, dataset) = load(input)?;
    let problems = RuntimeProbe::new(spec.device).diagnose();
    if !problems.is_empty() {
        anyhow::bail!("runtime environment is not ready: {}", problems.join("; "));
    }
    let resolved = spec.tasks(&dataset);
    validate_batch(&dataset, &resolved.tasks)?;
    let mut summary = format!(
        "ok: {} tasks, {} genes, {} time points",
        resolved.tasks.len(),
        dataset.n_genes(),
        dataset.n_times()
    );
    if !resolved.unresolved.is_empty() {
        summary.push_str(&format!(", {} unresolved", resolved.unresolved.len()));
    }
    println!("{summary}");
    Ok(())
}
