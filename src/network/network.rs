use rand::Rng;
use serde::{Serialize, Deserialize};
use sha2::{Digest, Sha256};

use crate::{activation::activation::ActivationFunction, layers::dense::Layer};
use crate::loss::loss_type::LossType;
use crate::math::matrix::Matrix;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub layers: Vec<Layer>,
}

impl Network {
    /// Builds a network from (size, input_size, activation) tuples.
    pub fn new<R: Rng + ?Sized>(layer_specs: Vec<(usize, usize, ActivationFunction)>, rng: &mut R) -> Network {
        let layers = layer_specs.into_iter()
            .map(|(size, input_size, activation)| Layer::new(size, input_size, activation, rng))
            .collect();
        Network { layers }
    }

    pub fn input_size(&self) -> usize {
        self.layers.first().map_or(0, |l| l.input_size())
    }

    pub fn output_size(&self) -> usize {
        self.layers.last().map_or(0, |l| l.size)
    }

    /// Forward pass; stores activations in each layer for backprop.
    pub fn forward(&mut self, input: &[f64]) -> Vec<f64> {
        let mut current = Matrix::row(input.to_vec());
        for layer in &mut self.layers {
            current = layer.feed_from(&current);
        }
        current.data.swap_remove(0)
    }

    /// Index of the highest-scoring output.
    pub fn predict(&mut self, input: &[f64]) -> usize {
        argmax(&self.forward(input))
    }

    /// Backpropagates `output_delta` (∂L/∂output) through the activations left
    /// by the last `forward(input)` call. Returns the gradient laid out like
    /// `params()`.
    pub fn backward(&self, input: &[f64], output_delta: Vec<f64>) -> Vec<f64> {
        let mut delta = Matrix::row(output_delta);
        let mut per_layer: Vec<(Matrix, Matrix)> = Vec::with_capacity(self.layers.len());

        for i in (0..self.layers.len()).rev() {
            let input_for_layer = if i == 0 {
                Matrix::row(input.to_vec())
            } else {
                self.layers[i - 1].neurons.clone()
            };

            let (w_grad, b_grad) = self.layers[i].compute_gradients(&delta, &input_for_layer);

            if i > 0 {
                // Propagate δ_i through weights to get ∂L/∂a_{i-1}
                delta = &b_grad * &self.layers[i].weights.transpose();
            }
            per_layer.push((w_grad, b_grad));
        }

        let mut flat = Vec::with_capacity(self.param_count());
        for (w_grad, b_grad) in per_layer.iter().rev() {
            w_grad.flatten_into(&mut flat);
            b_grad.flatten_into(&mut flat);
        }
        flat
    }

    /// Loss and parameter gradient for a single sample.
    pub fn sample_gradient(&mut self, input: &[f64], expected: &[f64], loss: LossType) -> (f64, Vec<f64>) {
        let output = self.forward(input);
        let value = loss.loss(&output, expected);
        let delta = loss.derivative(&output, expected);
        (value, self.backward(input, delta))
    }

    pub fn param_count(&self) -> usize {
        self.layers.iter().map(|l| l.param_count()).sum()
    }

    /// Flat parameter vector: per layer, weights (row-major) then biases.
    pub fn params(&self) -> Vec<f64> {
        let mut flat = Vec::with_capacity(self.param_count());
        for layer in &self.layers {
            layer.flatten_into(&mut flat);
        }
        flat
    }

    /// Inverse of `params()`.
    pub fn set_params(&mut self, values: &[f64]) {
        assert_eq!(values.len(), self.param_count(), "parameter vector has the wrong length");
        let mut offset = 0;
        for layer in &mut self.layers {
            offset += layer.load_from(&values[offset..]);
        }
    }

    /// SHA-256 over the little-endian bytes of every parameter, hex encoded.
    /// Two networks with equal digests hold bit-identical parameters.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for value in self.params() {
            hasher.update(value.to_le_bytes());
        }
        hasher.finalize().iter().map(|b| format!("{:02x}", b)).collect()
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Network> {
        let mut network: Network = serde_json::from_slice(bytes)?;
        network.reset_activations();
        Ok(network)
    }

    /// Activation caches are not persisted; size them after a reload.
    pub(crate) fn reset_activations(&mut self) {
        for layer in &mut self.layers {
            layer.neurons = Matrix::zeros(1, layer.size);
        }
    }
}

/// Index of the maximum element in a slice.
pub fn argmax(v: &[f64]) -> usize {
    v.iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn small_net(seed: u64) -> Network {
        Network::new(
            vec![
                (4, 3, ActivationFunction::Tanh),
                (2, 4, ActivationFunction::Softmax),
            ],
            &mut ChaCha8Rng::seed_from_u64(seed),
        )
    }

    #[test]
    fn backprop_matches_finite_differences() {
        let mut net = small_net(11);
        let input = [0.2, -0.4, 0.9];
        let target = [0.0, 1.0];
        let (_, grad) = net.sample_gradient(&input, &target, LossType::CrossEntropy);

        let base = net.params();
        let h = 1e-6;
        for k in [0, 5, 12, base.len() - 1] {
            let mut plus = base.clone();
            plus[k] += h;
            net.set_params(&plus);
            let lp = LossType::CrossEntropy.loss(&net.forward(&input), &target);
            let mut minus = base.clone();
            minus[k] -= h;
            net.set_params(&minus);
            let lm = LossType::CrossEntropy.loss(&net.forward(&input), &target);
            let fd = (lp - lm) / (2.0 * h);
            assert!((grad[k] - fd).abs() < 1e-6, "param {k}: {} vs {}", grad[k], fd);
        }
    }

    #[test]
    fn digest_tracks_every_bit() {
        let mut net = small_net(3);
        let before = net.digest();
        let mut params = net.params();
        params[0] = f64::from_bits(params[0].to_bits() ^ 1);
        net.set_params(&params);
        assert_ne!(before, net.digest());
    }

    #[test]
    fn bytes_round_trip_keeps_parameters() {
        let mut net = small_net(5);
        let mut restored = Network::from_bytes(&net.to_bytes().unwrap()).unwrap();
        assert_eq!(net.digest(), restored.digest());
        assert_eq!((restored.input_size(), restored.output_size()), (3, 2));
        let x = [0.1, 0.7, -0.3];
        assert_eq!(net.predict(&x), restored.predict(&x));
    }
}
