use crate::data::dataset::Dataset;
use crate::loss::loss_type::LossType;
use crate::math::matrix::Matrix;
use crate::network::network::Network;

/// Loss, gradient and curvature quantities of a network over a fixed batch.
///
/// Methods take a scratch `&mut Network` because the forward pass caches
/// activations; callers that must not disturb a live model pass a clone.
/// Methods that evaluate at other parameter values leave the scratch network
/// at `params` when they return.
#[derive(Debug, Clone, Copy)]
pub struct Objective<'a> {
    pub data: &'a Dataset,
    pub loss: LossType,
}

impl<'a> Objective<'a> {
    pub fn new(data: &'a Dataset, loss: LossType) -> Self {
        Objective { data, loss }
    }

    /// Mean loss over the batch.
    pub fn loss(&self, network: &mut Network) -> f64 {
        let n = self.data.len();
        if n == 0 {
            return 0.0;
        }
        (0..n)
            .map(|row| {
                let output = network.forward(&self.data.inputs[row]);
                self.loss.loss(&output, &self.data.target(row))
            })
            .sum::<f64>() / n as f64
    }

    /// Mean loss at `params`.
    pub fn loss_at(&self, network: &mut Network, params: &[f64]) -> f64 {
        network.set_params(params);
        self.loss(network)
    }

    /// Per-sample `(loss, gradient)` pairs.
    pub fn per_sample(&self, network: &mut Network) -> Vec<(f64, Vec<f64>)> {
        (0..self.data.len())
            .map(|row| network.sample_gradient(&self.data.inputs[row], &self.data.target(row), self.loss))
            .collect()
    }

    /// Mean loss and mean gradient over the batch.
    pub fn gradient(&self, network: &mut Network) -> (f64, Vec<f64>) {
        let mut total_loss = 0.0;
        let mut grad = vec![0.0; network.param_count()];
        for (loss, g) in self.per_sample(network) {
            total_loss += loss;
            for (acc, v) in grad.iter_mut().zip(g) {
                *acc += v;
            }
        }
        let n = self.data.len().max(1) as f64;
        grad.iter_mut().for_each(|v| *v /= n);
        (total_loss / n, grad)
    }

    /// Mean gradient at `params`.
    pub fn gradient_at(&self, network: &mut Network, params: &[f64]) -> Vec<f64> {
        network.set_params(params);
        self.gradient(network).1
    }

    /// Hessian of the mean loss restricted to `selection`, by central
    /// differences of the gradient with step `h`, symmetrised.
    pub fn fd_hessian(&self, network: &mut Network, params: &[f64], selection: &[usize], h: f64) -> Matrix {
        let s = selection.len();
        let mut hess = Matrix::zeros(s, s);
        let mut probe = params.to_vec();
        for (col, &j) in selection.iter().enumerate() {
            probe[j] = params[j] + h;
            let plus = restrict(&self.gradient_at(network, &probe), selection);
            probe[j] = params[j] - h;
            let minus = restrict(&self.gradient_at(network, &probe), selection);
            probe[j] = params[j];
            for row in 0..s {
                hess.data[row][col] = (plus[row] - minus[row]) / (2.0 * h);
            }
        }
        network.set_params(params);
        hess.symmetrize();
        hess
    }

    /// Diagonal Hessian entries for `coords` from second differences of the
    /// loss: (L(θ+h·e_j) − 2L(θ) + L(θ−h·e_j)) / h².
    pub fn fd_hessian_diagonal(&self, network: &mut Network, params: &[f64], coords: &[usize], h: f64) -> Vec<f64> {
        let center = self.loss_at(network, params);
        let mut probe = params.to_vec();
        let diag = coords.iter()
            .map(|&j| {
                probe[j] = params[j] + h;
                let plus = self.loss_at(network, &probe);
                probe[j] = params[j] - h;
                let minus = self.loss_at(network, &probe);
                probe[j] = params[j];
                (plus - 2.0 * center + minus) / (h * h)
            })
            .collect();
        network.set_params(params);
        diag
    }
}

/// Empirical Fisher `mean_i g_i g_iᵀ` of already-restricted gradients.
pub fn fisher_matrix(gradients: &[Vec<f64>]) -> Matrix {
    let s = gradients.first().map_or(0, |g| g.len());
    let mut fisher = Matrix::zeros(s, s);
    for g in gradients {
        for i in 0..s {
            if g[i] == 0.0 {
                continue;
            }
            for j in 0..s {
                fisher.data[i][j] += g[i] * g[j];
            }
        }
    }
    let n = gradients.len().max(1) as f64;
    fisher.map(|x| x / n)
}

/// Gathers the entries of `v` at `selection`.
pub fn restrict(v: &[f64], selection: &[usize]) -> Vec<f64> {
    selection.iter().map(|&j| v[j]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::activation::ActivationFunction;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn setup() -> (Network, Dataset) {
        let net = Network::new(
            vec![(3, 2, ActivationFunction::Tanh), (2, 3, ActivationFunction::Softmax)],
            &mut ChaCha8Rng::seed_from_u64(21),
        );
        let data = Dataset::new(vec![vec![0.5, -1.0], vec![-0.3, 0.8]], vec![0, 1], 2);
        (net, data)
    }

    #[test]
    fn fd_hessian_is_symmetric_and_matches_loss_curvature() {
        let (mut net, data) = setup();
        let obj = Objective::new(&data, LossType::CrossEntropy);
        let params = net.params();
        let selection = [0, 4, 9];
        let hess = obj.fd_hessian(&mut net, &params, &selection, 1e-4);
        assert_eq!(hess.data[0][2], hess.data[2][0]);

        let diag = obj.fd_hessian_diagonal(&mut net, &params, &selection, 1e-4);
        for (k, d) in diag.iter().enumerate() {
            assert!((hess.data[k][k] - d).abs() < 1e-3, "{} vs {}", hess.data[k][k], d);
        }
        assert_eq!(net.params(), params);
    }

    #[test]
    fn fisher_of_one_gradient_is_its_outer_product() {
        let f = fisher_matrix(&[vec![1.0, 2.0]]);
        assert_eq!(f.data, vec![vec![1.0, 2.0], vec![2.0, 4.0]]);
    }

    #[test]
    fn mean_gradient_averages_samples() {
        let (mut net, data) = setup();
        let obj = Objective::new(&data, LossType::CrossEntropy);
        let per = obj.per_sample(&mut net);
        let (_, mean) = obj.gradient(&mut net);
        assert!((mean[3] - 0.5 * (per[0].1[3] + per[1].1[3])).abs() < 1e-15);
    }
}
