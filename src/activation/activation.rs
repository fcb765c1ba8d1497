use serde::{Serialize, Deserialize};

use crate::math::matrix::Matrix;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ActivationFunction {
    ReLU,
    Tanh,
    Identity,
    /// Vector-valued; always paired with cross-entropy so the combined
    /// gradient `predicted - expected` is fed in directly.
    Softmax,
}

impl ActivationFunction {
    /// Applies the activation to a row of pre-activations.
    pub fn apply(&self, z: &Matrix) -> Matrix {
        match self {
            ActivationFunction::Softmax => Matrix::from_data(
                z.data.iter().map(|row| softmax(row)).collect(),
            ),
            _ => z.map(|x| self.function(x)),
        }
    }

    /// Element-wise activation. `Softmax` is handled row-wise in `apply`.
    pub fn function(&self, x: f64) -> f64 {
        match self {
            ActivationFunction::ReLU => if x > 0.0 { x } else { 0.0 },
            ActivationFunction::Tanh => x.tanh(),
            ActivationFunction::Identity | ActivationFunction::Softmax => x,
        }
    }

    /// Element-wise derivative at the pre-activation `x`.
    ///
    /// `Softmax` returns `1.0` so that the Softmax+CE delta passes through
    /// `Layer::backward` unchanged.
    pub fn derivative(&self, x: f64) -> f64 {
        match self {
            ActivationFunction::ReLU => if x > 0.0 { 1.0 } else { 0.0 },
            ActivationFunction::Tanh => {
                let t = x.tanh();
                1.0 - t * t
            }
            ActivationFunction::Identity | ActivationFunction::Softmax => 1.0,
        }
    }
}

/// Numerically stable softmax (max-shifted).
pub fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|&z| (z - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}
