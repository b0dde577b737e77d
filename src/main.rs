use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info};

use canopy_io::{
    ChunkRecord, ExperimentName, LabeledCsvReader, LabeledDataset, PredictionRecord, ReportWriter,
};
use canopy_online::{Aggregation, ClassDistribution, OnlineForest, OnlineForestConfig};

/// Probability floor applied before taking logs in the log-loss.
const PROB_FLOOR: f64 = 1e-15;

#[derive(Parser)]
#[command(name = "canopy")]
#[command(about = "Streaming classification with online random forests")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// RNG seed for reproducibility
    #[arg(long, default_value_t = 42, global = true)]
    seed: u64,

    /// Enable verbose (debug-level) logging
    #[arg(long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(long, global = true)]
    quiet: bool,

    /// Number of threads for parallel computation (defaults to all cores)
    #[arg(long, global = true)]
    threads: Option<usize>,
}

/// Forest hyperparameters shared by every subcommand.
#[derive(Args, Debug, Clone)]
struct ForestArgs {
    /// Number of classes; labels must lie in [0, n_classes)
    #[arg(long)]
    n_classes: usize,

    /// Number of trees in the forest
    #[arg(long, default_value_t = 10)]
    n_trees: usize,

    /// Step size of the exponential-weights update
    #[arg(long, default_value_t = 1.0)]
    step: f64,

    /// Predict with each tree's leaf only instead of the weighted path blend
    #[arg(long, default_value_t = false)]
    no_aggregation: bool,

    /// Rows fed to the forest per `fit` call
    #[arg(long, default_value_t = 100)]
    chunk_size: usize,

    /// Header name of the label column
    #[arg(long, default_value = "label")]
    label_column: String,
}

/// Where reports go.
#[derive(Args, Debug, Clone)]
struct OutputArgs {
    /// Experiment name for output files (must match [a-zA-Z0-9_-]+)
    #[arg(long, default_value = "canopy")]
    experiment: String,

    /// Output directory for result files
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,
}

#[derive(Subcommand)]
enum Command {
    /// Prequential evaluation: score each chunk before training on it
    Stream {
        /// Path to the labelled CSV file
        #[arg(long)]
        data: PathBuf,

        #[command(flatten)]
        forest: ForestArgs,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Train on one file, then score a held-out file
    Evaluate {
        /// Path to the labelled training CSV file
        #[arg(long)]
        train: PathBuf,

        /// Path to the labelled test CSV file
        #[arg(long)]
        test: PathBuf,

        #[command(flatten)]
        forest: ForestArgs,

        #[command(flatten)]
        output: OutputArgs,
    },
}

// --- JSON stdout output structs ---

#[derive(Serialize)]
struct StreamOutput {
    experiment: String,
    n_samples: usize,
    n_scored: usize,
    n_trees: usize,
    n_nodes: usize,
    accuracy: f64,
    log_loss: f64,
}

#[derive(Serialize)]
struct EvaluateOutput {
    experiment: String,
    n_train: usize,
    n_test: usize,
    n_trees: usize,
    n_nodes: usize,
    accuracy: f64,
    log_loss: f64,
}

/// Running accuracy and log-loss over scored rows.
#[derive(Debug, Default, Clone, Copy)]
struct Score {
    n: usize,
    correct: usize,
    loss_sum: f64,
}

impl Score {
    fn add(&mut self, dist: &ClassDistribution, class: usize) {
        let p = dist.as_slice().get(class).copied().unwrap_or(0.0);
        self.n += 1;
        self.loss_sum -= p.max(PROB_FLOOR).ln();
        if dist.predicted_class() == class {
            self.correct += 1;
        }
    }

    fn merge(&mut self, other: Score) {
        self.n += other.n;
        self.correct += other.correct;
        self.loss_sum += other.loss_sum;
    }

    fn accuracy(&self) -> f64 {
        if self.n == 0 {
            0.0
        } else {
            self.correct as f64 / self.n as f64
        }
    }

    fn log_loss(&self) -> f64 {
        if self.n == 0 {
            0.0
        } else {
            self.loss_sum / self.n as f64
        }
    }
}

/// Convert CSV labels to class ids, rejecting any that do not truncate into
/// `[0, n_classes)`. Errors name the zero-based data row.
fn class_ids(labels: &[f64], n_classes: usize) -> Result<Vec<usize>> {
    labels
        .iter()
        .enumerate()
        .map(|(row, &label)| {
            anyhow::ensure!(
                label.is_finite() && label >= 0.0 && label.trunc() < n_classes as f64,
                "row {row}: label {label} is not a class id in [0, {n_classes})"
            );
            Ok(label.trunc() as usize)
        })
        .collect()
}

fn build_forest(args: &ForestArgs, seed: u64) -> Result<OnlineForest> {
    let aggregation = if args.no_aggregation {
        Aggregation::Disabled
    } else {
        Aggregation::Enabled
    };
    let config = OnlineForestConfig::new(args.n_trees, args.n_classes)?
        .with_step(args.step)
        .with_seed(seed)
        .with_aggregation(aggregation);
    OnlineForest::new(config).context("invalid forest configuration")
}

fn read_dataset(path: &Path, label_column: &str) -> Result<LabeledDataset> {
    LabeledCsvReader::new(path)
        .with_label_column(label_column)
        .read()
        .with_context(|| format!("failed to read {}", path.display()))
}

/// Feed `dataset` to the forest `chunk_size` rows at a time.
///
/// With `score` set, every chunk after the first is predicted before the
/// forest trains on it. Returns the per-chunk records and their total.
fn run_stream(
    forest: &mut OnlineForest,
    dataset: &LabeledDataset,
    chunk_size: usize,
    score: bool,
) -> Result<(Vec<ChunkRecord>, Score)> {
    anyhow::ensure!(chunk_size > 0, "--chunk-size must be at least 1");
    let classes = class_ids(&dataset.labels, forest.n_classes())?;
    let mut records = Vec::new();
    let mut overall = Score::default();
    let mut n_seen = 0;

    for (chunk, ((rows, labels), chunk_classes)) in dataset
        .features
        .chunks(chunk_size)
        .zip(dataset.labels.chunks(chunk_size))
        .zip(classes.chunks(chunk_size))
        .enumerate()
    {
        if score && forest.iteration() > 0 {
            let dists = forest
                .predict_proba_batch(rows)
                .with_context(|| format!("prediction failed on chunk {chunk}"))?;
            let mut s = Score::default();
            for (dist, &class) in dists.iter().zip(chunk_classes) {
                s.add(dist, class);
            }
            debug!(chunk, accuracy = s.accuracy(), log_loss = s.log_loss(), "chunk scored");
            records.push(ChunkRecord {
                chunk,
                n_samples: rows.len(),
                n_seen,
                accuracy: s.accuracy(),
                log_loss: s.log_loss(),
            });
            overall.merge(s);
        }
        forest.fit(rows, labels).with_context(|| {
            format!("training failed on chunk {chunk} (rows {n_seen}..{})", n_seen + rows.len())
        })?;
        n_seen += rows.len();
    }
    Ok((records, overall))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match (cli.verbose, cli.quiet) {
        (true, _) => "debug",
        (_, true) => "error",
        _ => "info",
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Configure Rayon thread pool
    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("failed to configure thread pool")?;
        info!(threads, "thread pool configured");
    }

    match cli.command {
        Command::Stream {
            data,
            forest: forest_args,
            output,
        } => {
            let experiment_name = ExperimentName::new(output.experiment.clone())?;
            let dataset = read_dataset(&data, &forest_args.label_column)?;
            let mut forest = build_forest(&forest_args, cli.seed)?;

            let (records, overall) =
                run_stream(&mut forest, &dataset, forest_args.chunk_size, true)?;
            info!(
                n_chunks = records.len(),
                accuracy = overall.accuracy(),
                log_loss = overall.log_loss(),
                "stream finished"
            );

            let writer = ReportWriter::new(&output.output_dir, experiment_name)?;
            writer.write_stream(
                forest.n_trees(),
                forest.n_classes(),
                &records,
                overall.accuracy(),
                overall.log_loss(),
            )?;

            let summary = StreamOutput {
                experiment: output.experiment,
                n_samples: dataset.len(),
                n_scored: overall.n,
                n_trees: forest.n_trees(),
                n_nodes: forest.n_nodes(),
                accuracy: overall.accuracy(),
                log_loss: overall.log_loss(),
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }

        Command::Evaluate {
            train,
            test,
            forest: forest_args,
            output,
        } => {
            let experiment_name = ExperimentName::new(output.experiment.clone())?;
            let train_set = read_dataset(&train, &forest_args.label_column)?;
            let test_set = read_dataset(&test, &forest_args.label_column)?;
            let test_classes = class_ids(&test_set.labels, forest_args.n_classes)
                .with_context(|| format!("invalid label in {}", test.display()))?;
            anyhow::ensure!(
                train_set.feature_names == test_set.feature_names,
                "feature columns differ between {} and {}",
                train.display(),
                test.display()
            );

            let mut forest = build_forest(&forest_args, cli.seed)?;
            run_stream(&mut forest, &train_set, forest_args.chunk_size, false)?;
            info!(n_nodes = forest.n_nodes(), "training finished");

            let dists = forest
                .predict_proba_batch(&test_set.features)
                .context("prediction on test set failed")?;

            let mut score = Score::default();
            let predictions: Vec<PredictionRecord> = dists
                .into_iter()
                .zip(test_set.labels.iter().zip(&test_classes))
                .enumerate()
                .map(|(row, (dist, (&label, &class)))| {
                    score.add(&dist, class);
                    PredictionRecord {
                        row,
                        label,
                        predicted_class: dist.predicted_class(),
                        probabilities: dist.into_vec(),
                    }
                })
                .collect();
            info!(
                accuracy = score.accuracy(),
                log_loss = score.log_loss(),
                "evaluation finished"
            );

            let writer = ReportWriter::new(&output.output_dir, experiment_name)?;
            writer.write_predictions(
                forest.n_trees(),
                forest.n_classes(),
                score.accuracy(),
                &predictions,
            )?;

            let summary = EvaluateOutput {
                experiment: output.experiment,
                n_train: train_set.len(),
                n_test: test_set.len(),
                n_trees: forest.n_trees(),
                n_nodes: forest.n_nodes(),
                accuracy: score.accuracy(),
                log_loss: score.log_loss(),
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}
