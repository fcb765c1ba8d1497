use rand::seq::SliceRandom;
use rand::Rng;

use crate::data::augment::augment;
use crate::data::dataset::Dataset;
use crate::loss::loss_type::LossType;
use crate::math::linalg::norm;
use crate::network::network::{argmax, Network};
use crate::optim::Optimizer;

/// What one pass over a dataset does besides measuring loss and accuracy.
pub enum EpochMode<'o> {
    /// Shuffled mini-batches, augmentation when the dataset asks for it, one
    /// optimizer step per batch.
    Train(&'o mut Optimizer),
    /// Forward passes only.
    Eval,
    /// Per-batch mean gradients are computed and their norms averaged; the
    /// network is left untouched.
    GradNorm,
}

/// Aggregate metrics of one pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochResult {
    pub mean_loss: f64,
    /// Fraction of rows whose argmax prediction matches the label.
    pub accuracy: f64,
    /// Mean over batches of ‖mean batch gradient‖; only in `GradNorm` mode.
    pub mean_gradnorm: Option<f64>,
}

/// Runs one pass of `network` over `data`.
///
/// Loss and accuracy are measured on the rows as fed (augmented rows in
/// training mode) and at the parameters in force when each row is seen.
///
/// # Panics
/// Panics if `batch_size == 0`.
pub fn run_epoch<R: Rng + ?Sized>(
    network: &mut Network,
    data: &Dataset,
    loss: LossType,
    batch_size: usize,
    mut mode: EpochMode<'_>,
    rng: &mut R,
) -> EpochResult {
    assert!(batch_size > 0, "batch_size must be at least 1");

    let n = data.len();
    if n == 0 {
        return EpochResult { mean_loss: 0.0, accuracy: 0.0, mean_gradnorm: None };
    }

    let mut order: Vec<usize> = (0..n).collect();
    let training = matches!(mode, EpochMode::Train(_));
    if training {
        order.shuffle(rng);
    }
    let needs_grads = !matches!(mode, EpochMode::Eval);

    let mut total_loss = 0.0;
    let mut correct = 0usize;
    let mut gradnorms: Vec<f64> = Vec::new();

    for batch in order.chunks(batch_size) {
        let mut acc_grad = if needs_grads { vec![0.0; network.param_count()] } else { Vec::new() };

        for &row in batch {
            let input = if training && data.augment {
                augment(&data.inputs[row], data.shape, rng)
            } else {
                data.inputs[row].clone()
            };
            let expected = data.target(row);

            let output = network.forward(&input);
            total_loss += loss.loss(&output, &expected);
            if argmax(&output) == data.labels[row] {
                correct += 1;
            }

            if needs_grads {
                let grad = network.backward(&input, loss.derivative(&output, &expected));
                for (acc, g) in acc_grad.iter_mut().zip(grad) {
                    *acc += g;
                }
            }
        }

        if !needs_grads {
            continue;
        }

        // Average over the actual batch size.
        let inv_batch = 1.0 / batch.len() as f64;
        acc_grad.iter_mut().for_each(|g| *g *= inv_batch);

        match mode {
            EpochMode::Train(ref mut optimizer) => optimizer.step(network, &acc_grad),
            EpochMode::GradNorm => gradnorms.push(norm(&acc_grad)),
            EpochMode::Eval => {}
        }
    }

    let mean_gradnorm = matches!(mode, EpochMode::GradNorm)
        .then(|| gradnorms.iter().sum::<f64>() / gradnorms.len() as f64);

    EpochResult {
        mean_loss: total_loss / n as f64,
        accuracy: correct as f64 / n as f64,
        mean_gradnorm,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::synthetic::blobs;
    use crate::network::spec::{Architecture, NetworkSpec};
    use crate::optim::OptimizerKind;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn eval_and_gradnorm_leave_the_network_untouched() {
        let (train, _) = blobs(40, 8, 2);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let mut net = NetworkSpec::new(Architecture::Logistic, 8, 4).build(&mut rng);
        let before = net.digest();

        let eval = run_epoch(&mut net, &train, LossType::CrossEntropy, 16, EpochMode::Eval, &mut rng);
        assert!(eval.mean_gradnorm.is_none());
        let gn = run_epoch(&mut net, &train, LossType::CrossEntropy, 16, EpochMode::GradNorm, &mut rng);
        assert!(gn.mean_gradnorm.unwrap() > 0.0);
        assert_eq!(eval.mean_loss, gn.mean_loss);
        assert_eq!(net.digest(), before);
    }

    #[test]
    fn training_epochs_reduce_loss_on_blobs() {
        let (train, _) = blobs(200, 8, 3);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut net = NetworkSpec::new(Architecture::Logistic, 8, 4).build(&mut rng);
        let mut opt = Optimizer::build(OptimizerKind::Sgd, 0.1, 0.9, 0.0);

        let first = run_epoch(&mut net, &train, LossType::CrossEntropy, 16, EpochMode::Train(&mut opt), &mut rng);
        for _ in 0..5 {
            run_epoch(&mut net, &train, LossType::CrossEntropy, 16, EpochMode::Train(&mut opt), &mut rng);
        }
        let last = run_epoch(&mut net, &train, LossType::CrossEntropy, 16, EpochMode::Eval, &mut rng);
        assert!(last.mean_loss < first.mean_loss);
        assert!(last.accuracy > 0.9);
    }
}
