pub mod epoch;
pub mod epoch_stats;
pub mod loop_fn;
pub mod train_config;
pub mod trainer;

pub use epoch::{run_epoch, EpochMode, EpochResult};
pub use epoch_stats::EpochStats;
pub use loop_fn::train_loop;
pub use train_config::TrainConfig;
pub use trainer::{train_model, TrainArtifacts, TrainOptions};
