//! Batched latent-space search driver.
//!
//! Runs EfficientZero-style batched MCTS either against a seeded synthetic
//! model (for benchmarking the search itself) or against exported ONNX
//! models, and saves per-root visit counts in MessagePack format for the
//! Python training pipeline.

mod record;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ez_core::{LatentBatch, RecurrentMemory};
use ez_inference::{ModelShape, OnnxOracle};
use ez_mcts::{sample_dirichlet_noise, BatchedMcts, Roots, SearchConfig, SyntheticOracle};
use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use record::{ObservationBatch, SearchRecord};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Batched MCTS planner over learned latent dynamics.
#[derive(Parser)]
#[command(name = "ez-planner")]
#[command(about = "Run batched latent MCTS searches and save the visit counts")]
struct Cli {
    /// Log each search round.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Search settings shared by every subcommand.
#[derive(Args, Clone, Debug)]
struct SearchArgs {
    /// YAML search config; flags below override it.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Total simulations per root.
    #[arg(short, long)]
    simulations: Option<usize>,

    /// Parallel simulation lanes per round.
    #[arg(long)]
    searches: Option<usize>,

    /// Recurrent memory is cleared every this many steps.
    #[arg(long)]
    horizon: Option<usize>,

    /// Disable Dirichlet noise at the roots.
    #[arg(long)]
    no_noise: bool,

    /// Random seed for reproducibility.
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Output directory for search records.
    #[arg(short, long, default_value = "data/searches")]
    output: PathBuf,
}

impl SearchArgs {
    /// Config file (or defaults) with command-line overrides, validated.
    fn search_config(&self) -> Result<SearchConfig> {
        let mut config = match &self.config {
            Some(path) => SearchConfig::from_yaml_file(path)
                .with_context(|| format!("Failed to load config from {:?}", path))?,
            None => {
                let simulations = self
                    .simulations
                    .unwrap_or(SearchConfig::default().num_simulations);
                if self.no_noise {
                    SearchConfig::for_evaluation(simulations)
                } else {
                    SearchConfig::with_simulations(simulations)
                }
            }
        };
        if let Some(simulations) = self.simulations {
            config.num_simulations = simulations;
        }
        if let Some(searches) = self.searches {
            config.searches = searches;
        }
        if let Some(horizon) = self.horizon {
            config.horizon = horizon;
        }
        if self.no_noise {
            config.root_exploration_fraction = 0.0;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Search random roots with a seeded synthetic model.
    Synthetic {
        #[command(flatten)]
        search: SearchArgs,

        /// Number of independent batched searches.
        #[arg(short, long, default_value = "4")]
        runs: usize,

        /// Roots per batched search.
        #[arg(short, long, default_value = "8")]
        batch: usize,

        /// Size of the action space.
        #[arg(short, long, default_value = "6")]
        actions: usize,

        /// Width of the flattened latent state.
        #[arg(long, default_value = "32")]
        hidden_width: usize,

        /// Width of the reward LSTM state.
        #[arg(long, default_value = "16")]
        memory_width: usize,
    },

    /// Search from observations with exported ONNX models.
    Model {
        #[command(flatten)]
        search: SearchArgs,

        /// Directory containing ONNX models (initial_inference.onnx, recurrent_inference.onnx).
        #[arg(short, long)]
        model: PathBuf,

        /// MessagePack file with an observation batch.
        #[arg(long)]
        observations: PathBuf,

        /// Per-sample observation shape, e.g. 12,96,96.
        #[arg(long, value_delimiter = ',', required = true)]
        observation_shape: Vec<usize>,

        /// Per-sample latent shape, e.g. 64,6,6.
        #[arg(long, value_delimiter = ',', required = true)]
        hidden_shape: Vec<usize>,

        /// Width of the reward LSTM state.
        #[arg(long, default_value = "512")]
        memory_width: usize,

        /// ONNX Runtime intra-op threads.
        #[arg(long)]
        threads: Option<usize>,
    },
}

/// Shape of a synthetic search.
#[derive(Clone, Copy, Debug)]
struct SyntheticShape {
    batch: usize,
    actions: usize,
    hidden_width: usize,
    memory_width: usize,
}

/// Expand `roots` from logits, with Dirichlet noise unless disabled.
fn prepare_roots(
    roots: &mut Roots,
    config: &SearchConfig,
    value_prefixes: &[f32],
    logits: &[Vec<f32>],
    rng: &mut ChaCha8Rng,
) -> Result<()> {
    if config.root_exploration_fraction > 0.0 {
        let noises = sample_dirichlet_noise(roots, config.root_dirichlet_alpha, rng)?;
        roots.prepare(config.root_exploration_fraction, &noises, value_prefixes, logits)?;
    } else {
        roots.prepare_no_noise(value_prefixes, logits)?;
    }
    Ok(())
}

/// Run one batched search over random roots.
fn run_synthetic(config: &SearchConfig, shape: SyntheticShape, seed: u64) -> Result<SearchRecord> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let hidden = Array2::from_shape_fn((shape.batch, shape.hidden_width), |_| {
        rng.gen_range(-1.0f32..1.0)
    });
    let latents = LatentBatch::new(hidden, RecurrentMemory::zeros(shape.batch, shape.memory_width))?;
    let logits: Vec<Vec<f32>> = (0..shape.batch)
        .map(|_| (0..shape.actions).map(|_| rng.gen_range(-1.0f32..1.0)).collect())
        .collect();

    let mut roots = Roots::with_action_space(shape.batch, shape.actions);
    prepare_roots(&mut roots, config, &vec![0.0; shape.batch], &logits, &mut rng)?;

    let oracle = SyntheticOracle::new(seed.wrapping_add(1), shape.actions);
    let mut mcts = BatchedMcts::new(config.clone(), oracle)?;
    let summary = mcts.search(&mut roots, &latents)?;

    let mut record = SearchRecord::new(roots.results(&summary.stats, config.discount), &summary, seed);
    record
        .metadata
        .insert("oracle".to_string(), serde_json::json!("synthetic"));
    Ok(record)
}

/// Run the synthetic command.
fn cmd_synthetic(search: &SearchArgs, runs: usize, shape: SyntheticShape) -> Result<()> {
    let config = search.search_config()?;
    fs::create_dir_all(&search.output)
        .with_context(|| format!("Failed to create output directory: {:?}", search.output))?;

    println!(
        "Running {} batched searches: {} roots x {} simulations ({} lanes)",
        runs, shape.batch, config.num_simulations, config.searches
    );
    println!("Output directory: {:?}", search.output);
    println!("Seed: {}", search.seed);

    let start = Instant::now();
    let records: Vec<SearchRecord> = (0..runs)
        .into_par_iter()
        .map(|i| run_synthetic(&config, shape, search.seed.wrapping_add(i as u64 * 1000)))
        .collect::<Result<_>>()?;

    for (i, record) in records.iter().enumerate() {
        record.write(&search.output, i)?;
    }

    print_summary(&records, start.elapsed().as_secs_f64(), &search.output);
    Ok(())
}

/// Run the model command.
fn cmd_model(
    search: &SearchArgs,
    model_dir: &Path,
    observations: &Path,
    shape: ModelShape,
    threads: Option<usize>,
) -> Result<()> {
    let config = search.search_config()?;
    fs::create_dir_all(&search.output)
        .with_context(|| format!("Failed to create output directory: {:?}", search.output))?;

    println!("Loading neural network from {:?}", model_dir);
    let oracle = OnnxOracle::from_directory(model_dir, shape, threads)
        .with_context(|| format!("Failed to load neural network from {:?}", model_dir))?;

    let batch = ObservationBatch::read(observations)?;
    let start = Instant::now();
    let initial = oracle.initial_inference(&batch.to_array()?)?;
    let num_actions = initial.policy_logits.ncols();
    let num = initial.latents.rows();
    info!(num, num_actions, "initial inference done");

    let legal_actions = batch
        .legal_actions
        .clone()
        .unwrap_or_else(|| vec![(0..num_actions).collect(); num]);
    let logits: Vec<Vec<f32>> = initial
        .policy_logits
        .rows()
        .into_iter()
        .map(|row| row.to_vec())
        .collect();

    let mut rng = ChaCha8Rng::seed_from_u64(search.seed);
    let mut roots = Roots::new(legal_actions);
    prepare_roots(&mut roots, &config, &initial.value_prefixes, &logits, &mut rng)?;

    let mut mcts = BatchedMcts::new(config.clone(), oracle)?;
    let summary = mcts.search(&mut roots, &initial.latents)?;

    let mut record = SearchRecord::new(roots.results(&summary.stats, config.discount), &summary, search.seed);
    record
        .metadata
        .insert("oracle".to_string(), serde_json::json!("onnx"));
    record.metadata.insert(
        "oracle_calls".to_string(),
        serde_json::json!(mcts.oracle().calls() + 1),
    );
    record.write(&search.output, 0)?;

    print_summary(&[record], start.elapsed().as_secs_f64(), &search.output);
    Ok(())
}

fn print_summary(records: &[SearchRecord], elapsed: f64, output: &Path) {
    let roots: usize = records.iter().map(SearchRecord::num_roots).sum();
    let mean_value = if roots > 0 {
        records
            .iter()
            .flat_map(|r| r.root_values.iter())
            .sum::<f32>()
            / roots as f32
    } else {
        0.0
    };
    let max_depth = records
        .iter()
        .filter_map(|r| r.metadata.get("max_search_len"))
        .filter_map(|v| v.as_u64())
        .max()
        .unwrap_or(0);

    println!("\nCompleted in {:.2}s", elapsed);
    println!("Searches: {}", records.len());
    println!("Roots searched: {}", roots);
    println!("Mean root value: {:.4}", mean_value);
    println!("Max search depth: {}", max_depth);
    println!("Files saved to: {:?}", output);
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Synthetic {
            search,
            runs,
            batch,
            actions,
            hidden_width,
            memory_width,
        } => cmd_synthetic(
            &search,
            runs,
            SyntheticShape {
                batch,
                actions,
                hidden_width,
                memory_width,
            },
        ),

        Commands::Model {
            search,
            model,
            observations,
            observation_shape,
            hidden_shape,
            memory_width,
            threads,
        } => cmd_model(
            &search,
            &model,
            &observations,
            ModelShape {
                observation_shape,
                hidden_shape,
                memory_width,
            },
            threads,
        ),
    }
}
