use std::sync::atomic::Ordering;
use std::time::Instant;

use rand::Rng;
use tracing::info;

use crate::data::dataset::Dataset;
use crate::network::network::Network;
use crate::optim::Optimizer;
use crate::train::epoch::{run_epoch, EpochMode};
use crate::train::epoch_stats::EpochStats;
use crate::train::train_config::TrainConfig;

/// Trains `network` for `config.epochs` epochs and returns the mean training
/// loss of the **last completed epoch**.
///
/// Before every epoch the learning rate is taken from `config.schedule` when
/// one is set. Each epoch is logged and, when `progress_tx` is configured,
/// reported as an `EpochStats`.
///
/// # Early termination
/// The loop breaks early if:
/// - the `progress_tx` receiver has been dropped, **or**
/// - `config.stop_flag` is set to `true`.
///
/// # Panics
/// Panics if `train` is empty or `batch_size == 0`.
pub fn train_loop<R: Rng + ?Sized>(
    network: &mut Network,
    train: &Dataset,
    val: Option<&Dataset>,
    optimizer: &mut Optimizer,
    config: &TrainConfig,
    rng: &mut R,
) -> f64 {
    assert!(!train.is_empty(), "training set must not be empty");
    assert!(config.batch_size > 0, "batch_size must be at least 1");

    let mut last_train_loss = 0.0;

    for epoch in 1..=config.epochs {
        if stop_requested(config) {
            break;
        }

        if let Some(schedule) = config.schedule {
            optimizer.set_learning_rate(schedule.lr_at(epoch - 1));
        }
        let learning_rate = optimizer.learning_rate();

        let t_start = Instant::now();
        let train_result = run_epoch(
            network,
            train,
            config.loss_type,
            config.batch_size,
            EpochMode::Train(&mut *optimizer),
            rng,
        );
        last_train_loss = train_result.mean_loss;
        let elapsed_ms = t_start.elapsed().as_millis() as u64;

        let val_result = val.map(|v| run_epoch(network, v, config.loss_type, config.batch_size, EpochMode::Eval, rng));

        let stats = EpochStats {
            epoch,
            total_epochs: config.epochs,
            learning_rate,
            train_loss: train_result.mean_loss,
            train_accuracy: train_result.accuracy,
            val_loss: val_result.map(|r| r.mean_loss),
            val_accuracy: val_result.map(|r| r.accuracy),
            elapsed_ms,
        };
        info!(
            epoch,
            total = config.epochs,
            lr = learning_rate,
            train_loss = stats.train_loss,
            train_acc = stats.train_accuracy,
            val_loss = ?stats.val_loss,
            val_acc = ?stats.val_accuracy,
            elapsed_ms,
            "epoch finished"
        );

        if let Some(ref tx) = config.progress_tx {
            // If the receiver has been dropped, stop training.
            if tx.send(stats).is_err() {
                break;
            }
        }
    }

    last_train_loss
}

fn stop_requested(config: &TrainConfig) -> bool {
    config.stop_flag.as_ref().map_or(false, |flag| flag.load(Ordering::Relaxed))
}
