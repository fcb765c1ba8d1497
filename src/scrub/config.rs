use std::fmt;
use std::str::FromStr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::loss::loss_type::LossType;

/// Closed, string-named option set with `FromStr`/`Display` over its CLI names.
macro_rules! named_options {
    ($(#[$meta:meta])* $name:ident, $kind:literal { $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        pub enum $name {
            $($(#[$vmeta])* #[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const NAMES: &'static [&'static str] = &[$($text),+];

            pub fn name(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }

        impl FromStr for $name {
            type Err = ConfigError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(ConfigError::unknown($kind, other, $name::NAMES)),
                }
            }
        }
    };
}

named_options!(
    /// How the Newton step pools the forget batch.
    HessType, "HessType" {
        /// One pooled step with the batch Hessian.
        Sekhari => "Sekhari",
        /// One conditional step per forgotten sample, summed.
        ConditionalRisk => "CR",
    }
);

named_options!(
    /// Second-order estimator.
    ApproxType, "approxType" {
        FiniteDifference => "FD",
        Fisher => "Fisher",
    }
);

named_options!(
    /// Which parameters the update is restricted to.
    SelectionType, "selectionType" {
        Full => "Full",
        Foci => "FOCI",
        Random => "Random",
        One => "One",
    }
);

named_options!(
    FociType, "FOCIType" {
        /// Greedy conditional forward selection.
        Full => "full",
        /// One marginal ranking pass.
        Cheap => "cheap",
    }
);

named_options!(
    /// Ranking used to pre-screen FOCI candidates.
    Order, "order" {
        /// |gradient| of the forget batch.
        Bp => "BP",
        /// |finite-difference Hessian diagonal|.
        Hessian => "Hessian",
    }
);

named_options!(
    /// Where Hessian work runs. Only the host CPU is available.
    Device, "device" {
        Cpu => "cpu",
    }
);

/// Hyperparameters of one influence perturbation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerturbConfig {
    pub hess_type: HessType,
    pub approx_type: ApproxType,
    pub selection: SelectionType,
    pub foci_type: FociType,
    pub order: Order,
    pub device: Device,
    pub loss: LossType,
    /// Scale applied to the Newton step.
    pub lr: f64,
    /// L2 coefficient added to the Hessian; also the noise calibration's
    /// strong-convexity constant.
    pub l2_reg: f64,
    /// Privacy parameters of the Gaussian mechanism. `epsilon = inf` disables
    /// the noise.
    pub epsilon: f64,
    pub delta: f64,
    /// Size of the original training collection.
    pub orig_trainset_size: usize,
    /// Random weight perturbations drawn for FOCI.
    pub n_perturbations: usize,
    /// Standard deviation of those perturbations.
    pub perturb_scale: f64,
    /// Candidate pool size for FOCI.
    pub foci_candidates: usize,
    /// Upper bound on selected parameters for FOCI and `Random`.
    pub n_select: usize,
    /// Finite-difference step.
    pub fd_step: f64,
    /// `Full` selection is refused above this many parameters.
    pub max_hessian_dim: usize,
    pub seed: u64,
}

impl PerturbConfig {
    pub fn new(orig_trainset_size: usize) -> Self {
        PerturbConfig {
            hess_type: HessType::Sekhari,
            approx_type: ApproxType::FiniteDifference,
            selection: SelectionType::Foci,
            foci_type: FociType::Full,
            order: Order::Bp,
            device: Device::Cpu,
            loss: LossType::CrossEntropy,
            lr: 1.0,
            l2_reg: 0.001,
            epsilon: 0.1,
            delta: 0.01,
            orig_trainset_size,
            n_perturbations: 200,
            perturb_scale: 0.01,
            foci_candidates: 32,
            n_select: 16,
            fd_step: 1e-4,
            max_hessian_dim: 2048,
            seed: 0,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.l2_reg > 0.0 && self.l2_reg.is_finite()) {
            return Err(ConfigError::invalid(
                "l2_reg",
                "must be positive; it bounds the Hessian spectrum away from zero",
            ));
        }
        if !(self.epsilon > 0.0) {
            return Err(ConfigError::invalid("epsilon", "must be positive (use inf to disable noise)"));
        }
        if !self.lr.is_finite() {
            return Err(ConfigError::invalid("lr", "must be finite"));
        }
        if !(self.perturb_scale > 0.0 && self.perturb_scale.is_finite()) {
            return Err(ConfigError::invalid("perturb_scale", "must be positive and finite"));
        }
        if !(self.delta > 0.0 && self.delta < 1.0) {
            return Err(ConfigError::invalid("delta", "must lie in (0, 1)"));
        }
        if !(self.fd_step > 0.0) {
            return Err(ConfigError::invalid("fd_step", "must be positive"));
        }
        if self.n_perturbations < 2 {
            return Err(ConfigError::invalid("n_perturbations", "need at least 2 perturbations"));
        }
        if self.foci_candidates == 0 || self.n_select == 0 {
            return Err(ConfigError::invalid(
                "n_select",
                "candidate and selection sizes must be at least 1",
            ));
        }
        if self.orig_trainset_size == 0 {
            return Err(ConfigError::invalid("orig_trainset_size", "must be at least 1"));
        }
        Ok(())
    }

    /// Rejects `Full` selection on networks too large for a dense Hessian.
    pub fn check_param_count(&self, param_count: usize) -> Result<(), ConfigError> {
        if self.selection == SelectionType::Full && param_count > self.max_hessian_dim {
            return Err(ConfigError::invalid(
                "selectionType",
                format!(
                    "Full needs a {param_count}x{param_count} Hessian; the limit is {} parameters \
                     (use FOCI, Random or One)",
                    self.max_hessian_dim
                ),
            ));
        }
        Ok(())
    }

    /// Noise is on unless `epsilon` is infinite.
    pub fn noise_enabled(&self) -> bool {
        self.epsilon.is_finite()
    }
}

/// Identifiers copied into every round record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RunLabels {
    pub dataset: String,
    pub model: String,
    pub train_epochs: usize,
    pub run: u64,
}

/// Configuration of a scrub run.
#[derive(Debug, Clone)]
pub struct ScrubConfig {
    pub perturb: PerturbConfig,
    pub labels: RunLabels,
    /// Accepted removals to reach.
    pub n_removals: usize,
    /// Batch mode: collect up to this many candidates per round. `None`
    /// removes one sample per round.
    pub scrub_batch_size: Option<usize>,
    /// Batch mode only: restrict candidates to this class.
    pub removal_class: Option<usize>,
    /// Largest tolerated validation-accuracy drop per round.
    pub val_gap_skip: f64,
    /// Inner loop stops once the FOCI value is at or below this.
    pub cheap_foci_thresh: f64,
    /// Inner loop iteration cap.
    pub max_foci_iters: usize,
    /// Consecutive numerically failed rounds tolerated before giving up.
    pub max_consecutive_failures: usize,
    /// Keep reverted candidates in the scrubbed set (they are then excluded
    /// from later residual sets even though the model never forgot them).
    pub keep_reverted_in_scrubbed: bool,
    /// Batch size of validation and residual evaluation passes.
    pub eval_batch_size: usize,
    /// Checked between rounds; when set the run stops early.
    pub stop_flag: Option<Arc<AtomicBool>>,
    /// Samples already forgotten by earlier runs on the same checkpoint.
    /// They count towards `k` in the `1/(n - k)` scaling.
    pub previously_removed: usize,
}

impl ScrubConfig {
    pub fn new(perturb: PerturbConfig, n_removals: usize) -> Self {
        ScrubConfig {
            perturb,
            labels: RunLabels::default(),
            n_removals,
            scrub_batch_size: None,
            removal_class: None,
            val_gap_skip: 0.05,
            cheap_foci_thresh: 0.05,
            max_foci_iters: 10,
            max_consecutive_failures: 5,
            keep_reverted_in_scrubbed: true,
            eval_batch_size: 128,
            stop_flag: None,
            previously_removed: 0,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.perturb.validate()?;
        if !self.val_gap_skip.is_finite() {
            return Err(ConfigError::invalid("val_gap_skip", "must be finite"));
        }
        if self.cheap_foci_thresh.is_nan() {
            return Err(ConfigError::invalid("cheap_foci_thresh", "must be a number"));
        }
        if self.scrub_batch_size == Some(0) {
            return Err(ConfigError::invalid("scrub_batch_size", "must be at least 1"));
        }
        if self.max_foci_iters == 0 {
            return Err(ConfigError::invalid("max_foci_iters", "must be at least 1"));
        }
        if self.max_consecutive_failures == 0 {
            return Err(ConfigError::invalid("max_consecutive_failures", "must be at least 1"));
        }
        if self.eval_batch_size == 0 {
            return Err(ConfigError::invalid("eval_batch_size", "must be at least 1"));
        }
        Ok(())
    }
}
