pub mod adam;
pub mod schedule;
pub mod sgd;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::network::network::Network;

pub use adam::Adam;
pub use schedule::CosineAnnealing;
pub use sgd::Sgd;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    Sgd,
    Adam,
}

impl OptimizerKind {
    pub const NAMES: [&'static str; 2] = ["sgd", "adam"];

    pub fn name(self) -> &'static str {
        match self {
            OptimizerKind::Sgd => "sgd",
            OptimizerKind::Adam => "adam",
        }
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OptimizerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sgd" => Ok(OptimizerKind::Sgd),
            "adam" => Ok(OptimizerKind::Adam),
            other => Err(ConfigError::unknown("optimizer", other, &OptimizerKind::NAMES)),
        }
    }
}

/// The optimizer driving a training epoch.
#[derive(Debug, Clone)]
pub enum Optimizer {
    Sgd(Sgd),
    Adam(Adam),
}

impl Optimizer {
    /// SGD gets `momentum`; Adam ignores it.
    pub fn build(kind: OptimizerKind, learning_rate: f64, momentum: f64, weight_decay: f64) -> Optimizer {
        match kind {
            OptimizerKind::Sgd => Optimizer::Sgd(
                Sgd::new(learning_rate).with_momentum(momentum).with_weight_decay(weight_decay),
            ),
            OptimizerKind::Adam => Optimizer::Adam(Adam::new(learning_rate).with_weight_decay(weight_decay)),
        }
    }

    pub fn learning_rate(&self) -> f64 {
        match self {
            Optimizer::Sgd(o) => o.learning_rate,
            Optimizer::Adam(o) => o.learning_rate,
        }
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        match self {
            Optimizer::Sgd(o) => o.learning_rate = lr,
            Optimizer::Adam(o) => o.learning_rate = lr,
        }
    }

    /// Applies one update to every parameter of `network`.
    pub fn step(&mut self, network: &mut Network, grads: &[f64]) {
        let mut params = network.params();
        match self {
            Optimizer::Sgd(o) => o.step(&mut params, grads),
            Optimizer::Adam(o) => o.step(&mut params, grads),
        }
        network.set_params(&params);
    }
}
