use serde::{Deserialize, Serialize};

use crate::data::provider::DatasetName;
use crate::network::spec::{Architecture, NetworkSpec};
use crate::optim::OptimizerKind;

/// The training hyperparameters that identify a trained model. Two runs with
/// the same recipe share a checkpoint name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRecipe {
    pub dataset: DatasetName,
    pub architecture: Architecture,
    pub epochs: usize,
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub batch_size: usize,
    pub optimizer: OptimizerKind,
    pub data_augment: bool,
}

/// Annotations stored next to the weights in a checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub recipe: TrainingRecipe,
    pub spec: NetworkSpec,
    pub train_seed: u64,
    /// Size of the full, index-addressable training collection.
    pub orig_trainset_size: usize,
    /// Original indices the model was trained on, ascending.
    pub trained_indices: Vec<usize>,
    /// Indices scrubbed out of this model so far, in removal order.
    #[serde(default)]
    pub scrubbed_indices: Vec<usize>,
    #[serde(default)]
    pub description: Option<String>,
}
