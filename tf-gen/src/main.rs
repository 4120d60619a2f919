#![deny(
    clippy::nursery,
    clippy::pedantic,
    missing_docs,
    clippy::missing_docs_in_private_items,
)]
//! Tokenflow event-log generator command line interface
//!
//! `tf-gen generate` plays out a Petri net described as a JSON graph and writes the resulting event
//! log; `tf-gen noise` perturbs an existing log. See binary --help for more information.

use std::path::PathBuf;

use anyhow::Result;
use clap::{
    Parser,
    Subcommand,
};
use rand::rngs::StdRng;
use rand::{
    Rng,
    SeedableRng,
};
use tf_gen::engine::GuardPolicy;
use tf_gen::noise::{
    self,
    NoiseKind,
    NoisePass,
};
use tf_gen::utils::{
    create_timestamped_output_dir,
    load_case_data,
    load_graph,
};
use tf_gen::{
    CaseDataSupplier,
    EventLog,
    RunConfig,
};
use tracing::info;

/// tf-gen command-line interface to generate synthetic event logs from stochastic Petri nets
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Logging verbosity level (`trace`, `debug`, `info`, `warn`, `error`).
    #[arg(short, long, default_value = "info", global = true)]
    verbosity: String,

    /// What to do.
    #[command(subcommand)]
    command: Command,
}

/// Subcommands.
#[derive(Subcommand)]
enum Command {
    /// Play out a net and write the event log.
    Generate(GenerateArgs),
    /// Apply one noise pass to an existing event log.
    Noise(NoiseArgs),
}

/// Arguments of `generate`.
#[derive(clap::Args)]
struct GenerateArgs {
    /// JSON graph description of the net.
    #[arg(short, long)]
    graph: PathBuf,

    /// YAML run configuration; flags below override it.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of traces to generate.
    #[arg(short, long)]
    num_traces: Option<usize>,

    /// Maximum number of events per trace.
    #[arg(short = 'l', long)]
    max_trace_length: Option<usize>,

    /// Run seed; drawn at random and logged when absent.
    #[arg(short, long)]
    seed: Option<u64>,

    /// How the guards of one transition combine.
    #[arg(long, value_enum)]
    guard_policy: Option<GuardPolicy>,

    /// JSON file with per-case external data.
    #[arg(long)]
    case_data: Option<PathBuf>,

    /// Where to write the log; defaults to `runs/<timestamp>/log.json`.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

/// Arguments of `noise`.
#[derive(clap::Args)]
struct NoiseArgs {
    /// Perturbation to apply.
    #[arg(value_enum)]
    kind: NoiseKind,

    /// Event log written by `generate`.
    #[arg(long)]
    log: PathBuf,

    /// Fraction of eligible cases to perturb (0.0–1.0).
    #[arg(short, long)]
    probability: f64,

    /// Maximum events stripped, or repetitions of the other perturbations.
    #[arg(short, long, default_value_t = 1)]
    count: usize,

    /// Trace attribute holding the case identifier, if the log was written with a different one.
    #[arg(long)]
    case_key: Option<String>,

    /// Seed; drawn at random and logged when absent.
    #[arg(short, long)]
    seed: Option<u64>,

    /// Where to write the perturbed log; defaults to overwriting the input.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

/// Play out the net and write the log.
fn generate(args: GenerateArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::default(),
    };
    if let Some(n) = args.num_traces {
        config.num_traces = n;
    }
    if let Some(n) = args.max_trace_length {
        config.max_trace_length = n;
    }
    if let Some(policy) = args.guard_policy {
        config.guard_policy = policy;
    }
    let seed = args.seed.or(config.seed).unwrap_or_else(|| rand::thread_rng().gen());
    config.seed = Some(seed);

    let records = load_graph(&args.graph)?;
    let case_data = args.case_data.as_deref().map(load_case_data).transpose()?;
    let supplier = case_data.as_ref().map(|t| t as &dyn CaseDataSupplier);

    let log = tf_gen::simulation::run(&records, &config, supplier)?;

    let output = match args.output {
        Some(path) => path,
        None => create_timestamped_output_dir(seed)?.join("log.json"),
    };
    log.write_json(&output)?;
    info!(traces = log.len(), events = log.event_count(), "log written to {}", output.display());
    Ok(())
}

/// Perturb an existing log.
fn perturb(args: NoiseArgs) -> Result<()> {
    let pass = NoisePass { kind: args.kind, probability: args.probability, count: args.count };
    pass.validate()?;

    let seed = args.seed.unwrap_or_else(|| rand::thread_rng().gen());
    info!(seed, ?pass.kind, "applying noise");
    let mut rng = StdRng::seed_from_u64(seed);

    let mut log = EventLog::read_json(&args.log)?;
    if let Some(key) = args.case_key {
        log.keys.case = key;
    }
    let touched = noise::apply(&mut log, &pass, &mut rng)?;
    let output = args.output.unwrap_or(args.log);
    log.write_json(&output)?;
    info!(touched, cases = noise::distinct_cases(&log), "log written to {}", output.display());
    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();

    // Conform to crate-standard logging.
    tf_core::logging::setup(&args.verbosity);

    match args.command {
        Command::Generate(generate_args) => generate(generate_args),
        Command::Noise(noise_args) => perturb(noise_args),
    }
}
