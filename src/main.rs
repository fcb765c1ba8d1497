use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use ferrite_scrub::artifacts::{artifact_stem, checkpoint_path, ordering_path, scrubbed_checkpoint_path};
use ferrite_scrub::data::{DatasetName, DatasetSource};
use ferrite_scrub::network::{Architecture, TrainingRecipe};
use ferrite_scrub::optim::OptimizerKind;
use ferrite_scrub::scrub::{
    scrub_model, ApproxType, Device, FociType, HessType, Order, PerturbConfig, ScrubConfig, ScrubJob, SelectionType,
};
use ferrite_scrub::train::{train_model, TrainOptions};

#[derive(Parser)]
#[command(name = "ferrite-scrub", about = "Train small classifiers and scrub samples out of them")]
struct Cli {
    /// Tracing filter, e.g. `info` or `ferrite_scrub=debug`.
    #[arg(long, default_value = "info", global = true)]
    log: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train a model and write its checkpoint and ordering.
    Train(TrainArgs),
    /// Scrub samples out of a trained checkpoint.
    Scrub(ScrubArgs),
}

#[derive(Args)]
#[command(rename_all = "snake_case")]
struct DataArgs {
    #[arg(long, default_value = "blobs")]
    dataset: DatasetName,
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,
    /// Seed and sizes of the synthetic `blobs` source.
    #[arg(long, default_value_t = 0)]
    data_seed: u64,
    #[arg(long, default_value_t = 1000)]
    blob_train: usize,
    #[arg(long, default_value_t = 200)]
    blob_val: usize,
}

impl DataArgs {
    fn source(&self) -> DatasetSource {
        let mut source = DatasetSource::new(self.dataset, &self.data_dir);
        source.seed = self.data_seed;
        source.synthetic_sizes = (self.blob_train, self.blob_val);
        source
    }
}

#[derive(Args)]
#[command(rename_all = "snake_case")]
struct TrainArgs {
    #[command(flatten)]
    data: DataArgs,
    #[arg(long, default_value = "mlp")]
    model: Architecture,
    #[arg(long, default_value_t = 10)]
    epochs: usize,
    #[arg(long, default_value_t = 0.0001)]
    learning_rate: f64,
    #[arg(long, default_value_t = 0.9)]
    momentum: f64,
    #[arg(long, default_value_t = 0.01)]
    weight_decay: f64,
    #[arg(long, default_value_t = 32)]
    batch_size: usize,
    #[arg(long, default_value = "sgd")]
    optim: OptimizerKind,
    #[arg(long, default_value_t = 0)]
    train_seed: u64,
    /// Train on this many samples from the front of the ordering.
    #[arg(long)]
    used_training_size: Option<usize>,
    #[arg(long, value_delimiter = ',')]
    exclude_indices: Vec<usize>,
    #[arg(long)]
    data_augment: bool,
    #[arg(long, default_value = "trained_models")]
    out_dir: PathBuf,
}

#[derive(Args)]
#[command(rename_all = "snake_case")]
struct ScrubArgs {
    #[command(flatten)]
    data: DataArgs,
    #[arg(long, default_value = "mlp")]
    model: Architecture,
    /// Recipe of the trained model; locates its checkpoint.
    #[arg(long, default_value_t = 10)]
    train_epochs: usize,
    #[arg(long, default_value_t = 0.0001)]
    train_lr: f64,
    #[arg(long, default_value_t = 0.01)]
    train_wd: f64,
    #[arg(long, default_value_t = 32)]
    train_bs: usize,
    #[arg(long, default_value = "sgd")]
    train_optim: OptimizerKind,
    #[arg(long)]
    data_augment: bool,
    #[arg(long, default_value = "trained_models")]
    model_dir: PathBuf,
    /// Explicit checkpoint, overriding the recipe-derived name.
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    #[arg(long, default_value_t = 10000)]
    n_removals: usize,
    #[arg(long)]
    orig_trainset_size: Option<usize>,
    #[arg(long, default_value_t = 0.1)]
    epsilon: f64,
    #[arg(long, default_value_t = 0.01)]
    delta: f64,
    #[arg(long, default_value_t = 0.001)]
    l2_reg: f64,
    #[arg(long, default_value_t = 1.0)]
    lr: f64,
    #[arg(long, default_value_t = 128)]
    batch_size: usize,
    #[arg(long = "HessType", default_value = "Sekhari")]
    hess_type: HessType,
    #[arg(long = "approxType", default_value = "FD")]
    approx_type: ApproxType,
    #[arg(long, default_value_t = 200)]
    n_perturbations: usize,
    #[arg(long, default_value_t = 0.01)]
    perturb_scale: f64,
    #[arg(long, default_value = "Hessian")]
    order: Order,
    #[arg(long = "selectionType", default_value = "FOCI")]
    selection_type: SelectionType,
    #[arg(long = "FOCIType", default_value = "full")]
    foci_type: FociType,
    #[arg(long, default_value_t = 32)]
    foci_candidates: usize,
    #[arg(long, default_value_t = 16)]
    n_select: usize,
    #[arg(long, default_value_t = 0.05)]
    cheap_foci_thresh: f64,
    #[arg(long, default_value_t = 10)]
    max_foci_iters: usize,
    #[arg(long, default_value_t = 5)]
    max_consecutive_failures: usize,
    #[arg(long, default_value_t = 1)]
    run: u64,
    #[arg(long, default_value = "scrub_ablate_results.csv")]
    outfile: PathBuf,
    /// Where to save the scrubbed model; defaults next to the checkpoint.
    #[arg(long)]
    updated_model: Option<PathBuf>,
    #[arg(long, default_value = "cpu")]
    hessian_device: Device,
    #[arg(long, default_value_t = 0.05)]
    val_gap_skip: f64,
    #[arg(long)]
    scrub_batch_size: Option<usize>,
    #[arg(long)]
    removal_class: Option<usize>,
    /// Draw a fresh ordering from `run` instead of replaying the training one.
    #[arg(long)]
    fresh_ordering: bool,
    /// Drop reverted candidates from the scrubbed bookkeeping.
    #[arg(long)]
    forget_reverted: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cli.log))
        .init();

    match cli.command {
        Command::Train(args) => train(args)?,
        Command::Scrub(args) => scrub(args)?,
    }
    Ok(())
}

fn train(args: TrainArgs) -> ferrite_scrub::Result<()> {
    let recipe = TrainingRecipe {
        dataset: args.data.dataset,
        architecture: args.model,
        epochs: args.epochs,
        learning_rate: args.learning_rate,
        weight_decay: args.weight_decay,
        batch_size: args.batch_size,
        optimizer: args.optim,
        data_augment: args.data_augment,
    };
    let mut opts = TrainOptions::new(recipe, args.data.source(), args.out_dir);
    opts.momentum = args.momentum;
    opts.train_seed = args.train_seed;
    opts.used_training_size = args.used_training_size;
    opts.exclude_indices = args.exclude_indices;

    let artifacts = train_model(&opts)?;
    info!(
        checkpoint = %artifacts.checkpoint_path.display(),
        ordering = %artifacts.ordering_path.display(),
        val_acc = artifacts.val.accuracy,
        "training complete"
    );
    Ok(())
}

fn scrub(args: ScrubArgs) -> ferrite_scrub::Result<()> {
    let recipe = TrainingRecipe {
        dataset: args.data.dataset,
        architecture: args.model,
        epochs: args.train_epochs,
        learning_rate: args.train_lr,
        weight_decay: args.train_wd,
        batch_size: args.train_bs,
        optimizer: args.train_optim,
        data_augment: args.data_augment,
    };
    let stem = artifact_stem(&args.model_dir, &recipe);

    // Replaced with the trained set size inside `scrub_model` unless given.
    let mut perturb = PerturbConfig::new(args.orig_trainset_size.unwrap_or(1));
    perturb.hess_type = args.hess_type;
    perturb.approx_type = args.approx_type;
    perturb.selection = args.selection_type;
    perturb.foci_type = args.foci_type;
    perturb.order = args.order;
    perturb.device = args.hessian_device;
    perturb.lr = args.lr;
    perturb.l2_reg = args.l2_reg;
    perturb.epsilon = args.epsilon;
    perturb.delta = args.delta;
    perturb.n_perturbations = args.n_perturbations;
    perturb.perturb_scale = args.perturb_scale;
    perturb.foci_candidates = args.foci_candidates;
    perturb.n_select = args.n_select;
    perturb.seed = args.run;

    let mut config = ScrubConfig::new(perturb, args.n_removals);
    config.labels.run = args.run;
    config.scrub_batch_size = args.scrub_batch_size;
    config.removal_class = args.removal_class;
    config.val_gap_skip = args.val_gap_skip;
    config.cheap_foci_thresh = args.cheap_foci_thresh;
    config.max_foci_iters = args.max_foci_iters;
    config.max_consecutive_failures = args.max_consecutive_failures;
    config.keep_reverted_in_scrubbed = !args.forget_reverted;
    config.eval_batch_size = args.batch_size;
    config.validate()?;

    let job = ScrubJob {
        checkpoint_path: args.checkpoint.unwrap_or_else(|| checkpoint_path(&stem)),
        source: args.data.source(),
        config,
        ordering_path: (!args.fresh_ordering).then(|| ordering_path(&stem)),
        outfile: Some(args.outfile),
        updated_model_path: args.updated_model.unwrap_or_else(|| scrubbed_checkpoint_path(&stem)),
        orig_trainset_size: args.orig_trainset_size,
    };

    let report = scrub_model(job)?;
    info!(
        removed = report.outcome.removed_count,
        rounds = report.outcome.rounds.len(),
        residual_size = report.outcome.residual_size,
        end = ?report.outcome.end,
        saved = %report.saved_to.display(),
        "scrub complete"
    );
    Ok(())
}
