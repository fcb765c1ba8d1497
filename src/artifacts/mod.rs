pub mod checkpoint;

use std::path::{Path, PathBuf};

use crate::network::metadata::TrainingRecipe;

pub use checkpoint::{load_ordering, save_ordering, Checkpoint};

/// Deterministic artifact stem for a training recipe:
/// `{dir}/{dataset}_{model}_epochs_{E}_lr_{LR}_wd_{WD}_bs_{BS}_optim_{OPT}_{transform|notransform}`.
pub fn artifact_stem(dir: &Path, recipe: &TrainingRecipe) -> PathBuf {
    let name = format!(
        "{}_{}_epochs_{}_lr_{}_wd_{}_bs_{}_optim_{}_{}",
        recipe.dataset,
        recipe.architecture,
        recipe.epochs,
        recipe.learning_rate,
        recipe.weight_decay,
        recipe.batch_size,
        recipe.optimizer,
        if recipe.data_augment { "transform" } else { "notransform" },
    );
    dir.join(name)
}

pub fn checkpoint_path(stem: &Path) -> PathBuf {
    with_suffix(stem, ".json")
}

pub fn ordering_path(stem: &Path) -> PathBuf {
    with_suffix(stem, "_ordering.json")
}

pub fn scrubbed_checkpoint_path(stem: &Path) -> PathBuf {
    with_suffix(stem, "_scrubbed.json")
}

fn with_suffix(stem: &Path, suffix: &str) -> PathBuf {
    let mut name = stem.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}
