pub mod activation;
pub mod artifacts;
pub mod data;
pub mod error;
pub mod grad;
pub mod layers;
pub mod loss;
pub mod math;
pub mod network;
pub mod optim;
pub mod scrub;
pub mod train;

// Convenience re-exports
pub use activation::activation::ActivationFunction;
pub use data::{get_datasets, Dataset, DatasetName, DatasetSource};
pub use error::{ConfigError, DataError, PerturbError, Result, ScrubError};
pub use grad::Objective;
pub use layers::dense::Layer;
pub use loss::loss_type::LossType;
pub use math::matrix::Matrix;
pub use network::{Architecture, ModelMetadata, Network, NetworkSpec, TrainingRecipe};
pub use optim::{Optimizer, OptimizerKind};
pub use scrub::{scrub_model, InfluencePerturber, Perturber, ScrubConfig, ScrubController, ScrubJob, ScrubOutcome};
pub use train::{run_epoch, train_loop, train_model, EpochMode, TrainConfig, TrainOptions};
