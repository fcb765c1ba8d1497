use serde::{Serialize, Deserialize};

use crate::loss::cross_entropy::CrossEntropyLoss;

/// Selects which loss function the epoch runner and the gradient objectives use.
///
/// Every architecture ends in a Softmax layer whose backward pass is the
/// identity, so only losses whose derivative is taken w.r.t. the logits
/// belong here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossType {
    /// Categorical cross-entropy; gradient is softmax+CE combined (predicted - expected).
    #[default]
    CrossEntropy,
}

impl LossType {
    /// Scalar loss for one sample.
    pub fn loss(self, predicted: &[f64], expected: &[f64]) -> f64 {
        match self {
            LossType::CrossEntropy => CrossEntropyLoss::loss(predicted, expected),
        }
    }

    /// Per-output gradient for one sample, w.r.t. the output layer's logits.
    pub fn derivative(self, predicted: &[f64], expected: &[f64]) -> Vec<f64> {
        match self {
            LossType::CrossEntropy => CrossEntropyLoss::derivative(predicted, expected),
        }
    }
}
