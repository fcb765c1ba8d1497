use std::path::PathBuf;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::info;

use crate::artifacts::{artifact_stem, checkpoint_path, ordering_path, save_ordering, Checkpoint};
use crate::data::provider::{get_datasets, DatasetSource};
use crate::error::{ConfigError, Result};
use crate::loss::loss_type::LossType;
use crate::network::metadata::{ModelMetadata, TrainingRecipe};
use crate::network::spec::NetworkSpec;
use crate::optim::{CosineAnnealing, Optimizer};
use crate::scrub::ordering::Ordering;
use crate::train::epoch::{run_epoch, EpochMode, EpochResult};
use crate::train::loop_fn::train_loop;
use crate::train::train_config::TrainConfig;

/// Everything the train command needs.
#[derive(Debug, Clone)]
pub struct TrainOptions {
    pub recipe: TrainingRecipe,
    pub source: DatasetSource,
    /// SGD momentum; ignored by Adam.
    pub momentum: f64,
    pub train_seed: u64,
    /// Train on the first `n` entries of the ordering; all when `None`.
    pub used_training_size: Option<usize>,
    pub exclude_indices: Vec<usize>,
    pub out_dir: PathBuf,
    pub loss: LossType,
    pub description: Option<String>,
}

impl TrainOptions {
    pub fn new(recipe: TrainingRecipe, source: DatasetSource, out_dir: impl Into<PathBuf>) -> Self {
        TrainOptions {
            recipe,
            source,
            momentum: 0.9,
            train_seed: 0,
            used_training_size: None,
            exclude_indices: Vec::new(),
            out_dir: out_dir.into(),
            loss: LossType::CrossEntropy,
            description: None,
        }
    }
}

/// What a training run left on disk.
#[derive(Debug, Clone)]
pub struct TrainArtifacts {
    pub checkpoint_path: PathBuf,
    pub ordering_path: PathBuf,
    pub checkpoint: Checkpoint,
    /// Validation metrics of the final model.
    pub val: EpochResult,
}

/// Trains a fresh network and writes its checkpoint and ordering.
///
/// The ordering is a seeded permutation of the full training collection; the
/// model sees its first `used_training_size` entries minus `exclude_indices`,
/// so the scrub run can replay the same order without depending on seeds.
pub fn train_model(opts: &TrainOptions) -> Result<TrainArtifacts> {
    let recipe = &opts.recipe;
    if recipe.epochs == 0 || recipe.batch_size == 0 {
        return Err(ConfigError::invalid("epochs/batch_size", "must both be at least 1").into());
    }

    let (full, val) = get_datasets(&opts.source, true, None, None, false)?;
    let val = val.unwrap_or_else(|| full.include(&[]));
    let mut rng = ChaCha8Rng::seed_from_u64(opts.train_seed);

    let ordering = Ordering::generate(full.len(), opts.train_seed);
    let used = ordering.prefix(opts.used_training_size.unwrap_or(full.len()));
    let train = full.include(used).exclude(&opts.exclude_indices).with_augment(recipe.data_augment);
    if train.is_empty() {
        return Err(ConfigError::invalid("used_training_size", "no training samples left after selection").into());
    }
    info!(
        dataset = %recipe.dataset,
        model = %recipe.architecture,
        full = full.len(),
        used = train.len(),
        val = val.len(),
        "training"
    );

    let spec = NetworkSpec::new(recipe.architecture, full.input_size(), full.n_classes);
    let mut network = spec.build(&mut rng);
    let mut optimizer = Optimizer::build(recipe.optimizer, recipe.learning_rate, opts.momentum, recipe.weight_decay);
    let config = TrainConfig::new(recipe.epochs, recipe.batch_size, opts.loss)
        .with_schedule(CosineAnnealing::new(recipe.learning_rate, CosineAnnealing::DEFAULT_T_MAX));

    train_loop(&mut network, &train, (!val.is_empty()).then_some(&val), &mut optimizer, &config, &mut rng);
    let final_val = run_epoch(&mut network, &val, opts.loss, recipe.batch_size, EpochMode::Eval, &mut rng);

    let mut trained_indices = train.indices.clone();
    trained_indices.sort_unstable();
    let checkpoint = Checkpoint {
        metadata: ModelMetadata {
            recipe: recipe.clone(),
            spec,
            train_seed: opts.train_seed,
            orig_trainset_size: full.len(),
            trained_indices,
            scrubbed_indices: Vec::new(),
            description: opts.description.clone(),
        },
        network,
    };

    let stem = artifact_stem(&opts.out_dir, recipe);
    let ckpt_path = checkpoint_path(&stem);
    let ord_path = ordering_path(&stem);
    save_ordering(&ord_path, &ordering)?;
    checkpoint.save(&ckpt_path)?;
    info!(
        checkpoint = %ckpt_path.display(),
        val_acc = final_val.accuracy,
        val_loss = final_val.mean_loss,
        "saved trained model"
    );

    Ok(TrainArtifacts { checkpoint_path: ckpt_path, ordering_path: ord_path, checkpoint, val: final_val })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::load_ordering;
    use crate::data::provider::DatasetName;
    use crate::network::spec::Architecture;
    use crate::optim::OptimizerKind;

    fn recipe() -> TrainingRecipe {
        TrainingRecipe {
            dataset: DatasetName::Blobs,
            architecture: Architecture::Logistic,
            epochs: 4,
            learning_rate: 0.1,
            weight_decay: 5e-4,
            batch_size: 16,
            optimizer: OptimizerKind::Sgd,
            data_augment: false,
        }
    }

    #[test]
    fn trains_on_the_ordering_prefix_and_persists_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = TrainOptions::new(recipe(), DatasetSource::blobs(100, 40, 3), dir.path());
        opts.train_seed = 7;
        opts.used_training_size = Some(60);

        let artifacts = train_model(&opts).unwrap();
        let ordering = load_ordering(&artifacts.ordering_path).unwrap();
        assert_eq!(ordering, Ordering::generate(100, 7));

        let mut expected = ordering.prefix(60).to_vec();
        expected.sort_unstable();
        assert_eq!(artifacts.checkpoint.metadata.trained_indices, expected);
        assert_eq!(artifacts.checkpoint.metadata.orig_trainset_size, 100);
        assert!(artifacts.val.accuracy > 0.8);

        let reloaded = Checkpoint::load(&artifacts.checkpoint_path).unwrap();
        assert_eq!(reloaded.network.digest(), artifacts.checkpoint.network.digest());
    }

    #[test]
    fn excluded_indices_are_never_trained_on() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = TrainOptions::new(recipe(), DatasetSource::blobs(50, 10, 1), dir.path());
        opts.exclude_indices = vec![0, 1, 2];
        let artifacts = train_model(&opts).unwrap();
        let trained = &artifacts.checkpoint.metadata.trained_indices;
        assert_eq!(trained.len(), 47);
        assert!(!trained.contains(&1));
    }
}
