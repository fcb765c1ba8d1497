/// Categorical cross-entropy over softmax probabilities.
pub struct CrossEntropyLoss;

/// Keeps `ln` finite when a class probability underflows to zero.
const LOG_FLOOR: f64 = 1e-12;

impl CrossEntropyLoss {
    /// `-Σ target_c · ln(p_c)` for one sample.
    pub fn loss(predicted: &[f64], expected: &[f64]) -> f64 {
        predicted
            .iter()
            .zip(expected)
            .filter(|(_, t)| **t != 0.0)
            .map(|(p, t)| -t * (p + LOG_FLOOR).ln())
            .sum()
    }

    /// Softmax and cross-entropy differentiated together, w.r.t. the logits:
    /// `p - target`. The softmax layer passes this through unchanged.
    pub fn derivative(predicted: &[f64], expected: &[f64]) -> Vec<f64> {
        predicted.iter().zip(expected).map(|(p, t)| p - t).collect()
    }
}
