//! Influence-function weight perturbation.
//!
//! One pass computes the forget batch's gradient at the current parameters,
//! restricts it to a selected coordinate set, solves against the (damped,
//! L2-regularised) Hessian of that coordinate block and adds the scaled
//! Newton step plus calibrated Gaussian noise. The input network is never
//! touched; the result carries a fresh copy.
//!
//! Numerical contract: the solve always runs on `H + l2_reg·I`. When the
//! curvature estimate is indefinite the extra damping is raised tenfold up to
//! six times before the pass fails with [`PerturbError::Singular`].

use rand::seq::index::sample;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};
use tracing::debug;

use crate::data::dataset::Dataset;
use crate::error::PerturbError;
use crate::grad::objectives::{fisher_matrix, restrict, Objective};
use crate::math::linalg::{axpy, damped_solve, norm};
use crate::math::matrix::Matrix;
use crate::network::network::Network;
use crate::scrub::config::{ApproxType, HessType, Order, PerturbConfig, SelectionType};
use crate::scrub::foci::foci;

/// Per-call facts the perturbation needs from the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerturbContext {
    /// Samples counted as removed, including the current batch (`k`).
    pub removed_so_far: usize,
    /// Inner-loop iteration within the current round, from 0.
    pub iteration: usize,
}

/// Result of one pass.
#[derive(Debug, Clone)]
pub struct Perturbation {
    /// FOCI value: dependence of the forget loss left unselected.
    pub stop_metric: f64,
    pub network: Network,
    pub sample_loss_before: f64,
    pub sample_loss_after: f64,
    pub gradnorm_before: f64,
    pub gradnorm_after: f64,
    /// Number of coordinates the step touched.
    pub selected: usize,
    /// Noise standard deviation used (0 when disabled).
    pub noise_sigma: f64,
}

/// A weight update that forgets a batch of samples.
pub trait Perturber {
    fn perturb(
        &mut self,
        network: &Network,
        forget: &Dataset,
        ctx: &PerturbContext,
    ) -> Result<Perturbation, PerturbError>;
}

/// Newton-step perturbation with selectable pooling, curvature estimator and
/// coordinate selection.
#[derive(Debug, Clone)]
pub struct InfluencePerturber {
    config: PerturbConfig,
    rng: ChaCha8Rng,
}

impl InfluencePerturber {
    pub fn new(config: PerturbConfig) -> Self {
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        InfluencePerturber { config, rng }
    }

    pub fn config(&self) -> &PerturbConfig {
        &self.config
    }

    /// Coordinates the step is restricted to, and the stop metric.
    fn select(
        &mut self,
        scratch: &mut Network,
        params: &[f64],
        objective: &Objective<'_>,
        grad: &[f64],
    ) -> Result<(Vec<usize>, f64), PerturbError> {
        let p = params.len();
        let cfg = &self.config;
        match cfg.selection {
            SelectionType::Full => Ok(((0..p).collect(), 0.0)),
            SelectionType::One => Ok((top_by_magnitude(grad, 1), 0.0)),
            SelectionType::Random => {
                let mut coords = sample(&mut self.rng, p, cfg.n_select.min(p)).into_vec();
                coords.sort_unstable();
                Ok((coords, 0.0))
            }
            SelectionType::Foci => {
                let scores = match cfg.order {
                    Order::Bp => grad.to_vec(),
                    Order::Hessian => {
                        let all: Vec<usize> = (0..p).collect();
                        objective.fd_hessian_diagonal(scratch, params, &all, cfg.fd_step)
                    }
                };
                let candidates = top_by_magnitude(&scores, cfg.foci_candidates.min(p));

                let base = objective.loss_at(scratch, params);
                let mut columns = vec![Vec::with_capacity(cfg.n_perturbations); candidates.len()];
                let mut responses = Vec::with_capacity(cfg.n_perturbations);
                let mut probe = params.to_vec();
                for _ in 0..cfg.n_perturbations {
                    for (col, &j) in columns.iter_mut().zip(&candidates) {
                        let z: f64 = StandardNormal.sample(&mut self.rng);
                        let xi = cfg.perturb_scale * z;
                        probe[j] = params[j] + xi;
                        col.push(xi);
                    }
                    let y = objective.loss_at(scratch, &probe) - base;
                    if !y.is_finite() {
                        scratch.set_params(params);
                        return Err(PerturbError::NonFinite { what: "perturbed forget loss", value: y });
                    }
                    responses.push(y);
                }
                scratch.set_params(params);

                let outcome = foci(&responses, &columns, cfg.n_select, cfg.foci_type);
                let coords: Vec<usize> = outcome.selected.iter().map(|&c| candidates[c]).collect();
                Ok((coords, outcome.remaining_signal))
            }
        }
    }

    /// Restricted curvature of `data` at `params`, L2 term included.
    fn curvature(
        &self,
        scratch: &mut Network,
        params: &[f64],
        data: &Dataset,
        restricted_grads: &[Vec<f64>],
        selection: &[usize],
    ) -> Result<Matrix, PerturbError> {
        let mut h = match self.config.approx_type {
            ApproxType::FiniteDifference => {
                Objective::new(data, self.config.loss).fd_hessian(scratch, params, selection, self.config.fd_step)
            }
            ApproxType::Fisher => fisher_matrix(restricted_grads),
        };
        h.add_diagonal(self.config.l2_reg);
        if !h.is_finite() {
            return Err(PerturbError::NonFinite { what: "hessian", value: f64::NAN });
        }
        Ok(h)
    }
}

impl Perturber for InfluencePerturber {
    fn perturb(
        &mut self,
        network: &Network,
        forget: &Dataset,
        ctx: &PerturbContext,
    ) -> Result<Perturbation, PerturbError> {
        if forget.is_empty() {
            return Err(PerturbError::EmptyBatch);
        }
        let mut scratch = network.clone();
        let params = scratch.params();
        let objective = Objective::new(forget, self.config.loss);

        let per_sample = objective.per_sample(&mut scratch);
        let (sample_loss_before, grad) = mean_loss_and_gradient(&per_sample, params.len());
        if !sample_loss_before.is_finite() {
            return Err(PerturbError::NonFinite { what: "forget loss", value: sample_loss_before });
        }
        let gradnorm_before = norm(&grad);

        let (selection, stop_metric) = self.select(&mut scratch, &params, &objective, &grad)?;
        if selection.is_empty() {
            return Err(PerturbError::EmptySelection);
        }

        let restricted: Vec<Vec<f64>> = per_sample.iter().map(|(_, g)| restrict(g, &selection)).collect();
        let lambda = self.config.l2_reg;

        let mut direction = vec![0.0; selection.len()];
        match self.config.hess_type {
            HessType::Sekhari => {
                let h = self.curvature(&mut scratch, &params, forget, &restricted, &selection)?;
                let rhs = sum_vectors(&restricted, selection.len());
                let (x, extra) = damped_solve(&h, &rhs, lambda)?;
                if extra > 0.0 {
                    debug!(extra_damping = extra, "hessian needed extra damping");
                }
                direction = x;
            }
            HessType::ConditionalRisk => {
                for (row, g) in restricted.iter().enumerate() {
                    let single = forget.select_rows(&[row]);
                    let h = self.curvature(&mut scratch, &params, &single, std::slice::from_ref(g), &selection)?;
                    let (x, extra) = damped_solve(&h, g, lambda)?;
                    if extra > 0.0 {
                        debug!(row, extra_damping = extra, "conditional hessian needed extra damping");
                    }
                    axpy(1.0, &x, &mut direction);
                }
            }
        }

        let remaining = self.config.orig_trainset_size.saturating_sub(ctx.removed_so_far).max(1) as f64;
        let scale = self.config.lr / remaining;

        let noise_sigma = if self.config.noise_enabled() {
            let lipschitz = restricted.iter().map(|g| norm(g)).fold(0.0, f64::max);
            forget.len() as f64 * lipschitz / (lambda * remaining)
                * (2.0 * (1.25 / self.config.delta).ln()).sqrt()
                / self.config.epsilon
        } else {
            0.0
        };

        let mut updated = params.clone();
        for (&j, d) in selection.iter().zip(&direction) {
            let noise = if noise_sigma > 0.0 {
                let z: f64 = StandardNormal.sample(&mut self.rng);
                noise_sigma * z
            } else {
                0.0
            };
            updated[j] += scale * d + noise;
        }
        if let Some(&bad) = updated.iter().find(|v| !v.is_finite()) {
            return Err(PerturbError::NonFinite { what: "updated parameter", value: bad });
        }

        scratch.set_params(&updated);
        let after = objective.per_sample(&mut scratch);
        let (sample_loss_after, grad_after) = mean_loss_and_gradient(&after, updated.len());
        let gradnorm_after = norm(&grad_after);

        debug!(
            iteration = ctx.iteration,
            selected = selection.len(),
            stop_metric,
            noise_sigma,
            sample_loss_before,
            sample_loss_after,
            "perturbation pass"
        );

        Ok(Perturbation {
            stop_metric,
            network: scratch,
            sample_loss_before,
            sample_loss_after,
            gradnorm_before,
            gradnorm_after,
            selected: selection.len(),
            noise_sigma,
        })
    }
}

/// Positions of the `k` largest `|v|`, lowest index first on ties.
fn top_by_magnitude(v: &[f64], k: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..v.len()).collect();
    order.sort_by(|&a, &b| v[b].abs().total_cmp(&v[a].abs()).then(a.cmp(&b)));
    order.truncate(k);
    order
}

fn sum_vectors(vs: &[Vec<f64>], len: usize) -> Vec<f64> {
    let mut total = vec![0.0; len];
    for v in vs {
        axpy(1.0, v, &mut total);
    }
    total
}

fn mean_loss_and_gradient(per_sample: &[(f64, Vec<f64>)], len: usize) -> (f64, Vec<f64>) {
    let n = per_sample.len().max(1) as f64;
    let loss = per_sample.iter().map(|(l, _)| l).sum::<f64>() / n;
    let mut grad = vec![0.0; len];
    for (_, g) in per_sample {
        axpy(1.0 / n, g, &mut grad);
    }
    (loss, grad)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::synthetic::blobs;
    use crate::loss::loss_type::LossType;
    use crate::network::spec::{Architecture, NetworkSpec};
    use crate::optim::{Optimizer, OptimizerKind};
    use crate::scrub::config::FociType;
    use crate::train::epoch::{run_epoch, EpochMode};

    fn trained() -> (Network, Dataset) {
        let (train, _) = blobs(120, 8, 5);
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let mut net = NetworkSpec::new(Architecture::Logistic, 8, 4).build(&mut rng);
        let mut opt = Optimizer::build(OptimizerKind::Sgd, 0.1, 0.9, 0.0);
        for _ in 0..10 {
            run_epoch(&mut net, &train, LossType::CrossEntropy, 16, EpochMode::Train(&mut opt), &mut rng);
        }
        (net, train)
    }

    fn noiseless(n: usize) -> PerturbConfig {
        let mut cfg = PerturbConfig::new(n);
        cfg.epsilon = f64::INFINITY;
        cfg.n_perturbations = 60;
        cfg.foci_candidates = 8;
        cfg.n_select = 4;
        cfg
    }

    #[test]
    fn forgetting_raises_the_forget_loss_and_leaves_the_input_alone() {
        let (net, train) = trained();
        let forget = train.subset(&[3, 17]).unwrap();
        let digest = net.digest();
        let ctx = PerturbContext { removed_so_far: 2, iteration: 0 };

        for selection in [SelectionType::Full, SelectionType::Foci, SelectionType::One] {
            let mut cfg = noiseless(train.len());
            cfg.selection = selection;
            cfg.lr = 20.0;
            let out = InfluencePerturber::new(cfg).perturb(&net, &forget, &ctx).unwrap();
            assert!(out.sample_loss_after > out.sample_loss_before, "{selection}");
            assert_ne!(out.network.digest(), digest);
        }
        assert_eq!(net.digest(), digest);
    }

    #[test]
    fn selection_sizes_follow_the_configuration() {
        let (net, train) = trained();
        let forget = train.subset(&[0]).unwrap();
        let ctx = PerturbContext { removed_so_far: 1, iteration: 0 };
        let p = net.param_count();

        let mut cfg = noiseless(train.len());
        cfg.selection = SelectionType::Full;
        assert_eq!(InfluencePerturber::new(cfg.clone()).perturb(&net, &forget, &ctx).unwrap().selected, p);

        cfg.selection = SelectionType::Random;
        cfg.n_select = 5;
        assert_eq!(InfluencePerturber::new(cfg.clone()).perturb(&net, &forget, &ctx).unwrap().selected, 5);

        cfg.selection = SelectionType::One;
        let one = InfluencePerturber::new(cfg.clone()).perturb(&net, &forget, &ctx).unwrap();
        assert_eq!(one.selected, 1);
        assert_eq!(one.stop_metric, 0.0);

        cfg.selection = SelectionType::Foci;
        cfg.foci_type = FociType::Cheap;
        let cheap = InfluencePerturber::new(cfg).perturb(&net, &forget, &ctx).unwrap();
        assert!(cheap.selected >= 1 && cheap.selected <= 5);
    }

    #[test]
    fn conditional_risk_and_fisher_produce_finite_updates() {
        let (net, train) = trained();
        let forget = train.subset(&[4, 9, 30]).unwrap();
        let ctx = PerturbContext { removed_so_far: 3, iteration: 0 };
        let mut cfg = noiseless(train.len());
        cfg.selection = SelectionType::Full;
        cfg.hess_type = HessType::ConditionalRisk;
        cfg.approx_type = ApproxType::Fisher;
        let out = InfluencePerturber::new(cfg).perturb(&net, &forget, &ctx).unwrap();
        assert!(out.network.params().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn every_hessian_and_approximation_pairing_forgets() {
        // One sample and a convex model: any step with H positive definite
        // moves up the sample's loss.
        let (net, train) = trained();
        let forget = train.subset(&[3]).unwrap();
        let ctx = PerturbContext { removed_so_far: 1, iteration: 0 };

        for (hess, approx) in [
            (HessType::ConditionalRisk, ApproxType::FiniteDifference),
            (HessType::Sekhari, ApproxType::Fisher),
        ] {
            let mut cfg = noiseless(train.len());
            cfg.selection = SelectionType::Full;
            cfg.hess_type = hess;
            cfg.approx_type = approx;
            cfg.lr = 20.0;
            let out = InfluencePerturber::new(cfg).perturb(&net, &forget, &ctx).unwrap();
            assert!(out.network.params().iter().all(|v| v.is_finite()), "{hess} {approx}");
            assert!(out.sample_loss_after > out.sample_loss_before, "{hess} {approx}");
        }
    }

    #[test]
    fn noise_scale_follows_the_gaussian_mechanism() {
        let (net, train) = trained();
        let forget = train.subset(&[1]).unwrap();
        let ctx = PerturbContext { removed_so_far: 1, iteration: 0 };
        let mut cfg = noiseless(train.len());
        cfg.selection = SelectionType::Full;
        cfg.epsilon = 0.5;
        cfg.delta = 0.01;
        cfg.l2_reg = 0.01;

        let mut scratch = net.clone();
        let (_, g) = Objective::new(&forget, cfg.loss).per_sample(&mut scratch).remove(0);
        let mechanism = (2.0 * (1.25f64 / 0.01).ln()).sqrt() / 0.5;
        let expected = norm(&g) / (0.01 * (train.len() - 1) as f64) * mechanism;

        let out = InfluencePerturber::new(cfg).perturb(&net, &forget, &ctx).unwrap();
        assert!((out.noise_sigma - expected).abs() < 1e-12 * expected.max(1.0));
    }

    #[test]
    fn empty_batch_is_an_error_not_a_panic() {
        let (net, train) = trained();
        let empty = train.include(&[]);
        let ctx = PerturbContext { removed_so_far: 0, iteration: 0 };
        let err = InfluencePerturber::new(noiseless(10)).perturb(&net, &empty, &ctx).unwrap_err();
        assert_eq!(err, PerturbError::EmptyBatch);
    }

    #[test]
    fn top_by_magnitude_breaks_ties_by_index() {
        assert_eq!(top_by_magnitude(&[1.0, -3.0, 3.0, 0.5], 2), vec![1, 2]);
    }
}
