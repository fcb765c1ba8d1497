use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;

use crate::data::dataset::Dataset;

pub const BLOB_CLASSES: usize = 4;
pub const BLOB_FEATURES: usize = 8;

/// Spread of the class centres relative to the unit-variance clusters.
const CENTER_SCALE: f64 = 2.5;

/// Seeded Gaussian blobs: `BLOB_CLASSES` clusters in `BLOB_FEATURES`
/// dimensions. Train and validation rows are drawn around the same centres;
/// classes are assigned round-robin so both splits are balanced.
pub fn blobs(n_train: usize, n_val: usize, seed: u64) -> (Dataset, Dataset) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let centers: Vec<Vec<f64>> = (0..BLOB_CLASSES)
        .map(|_| gaussian_row(&mut rng, CENTER_SCALE, None))
        .collect();

    let mut draw = |n: usize| {
        let labels: Vec<usize> = (0..n).map(|i| i % BLOB_CLASSES).collect();
        let inputs = labels.iter()
            .map(|&c| gaussian_row(&mut rng, 1.0, Some(&centers[c])))
            .collect();
        Dataset::new(inputs, labels, BLOB_CLASSES)
    };

    let train = draw(n_train);
    let val = draw(n_val);
    (train, val)
}

fn gaussian_row<R: Rng>(rng: &mut R, scale: f64, mean: Option<&[f64]>) -> Vec<f64> {
    (0..BLOB_FEATURES)
        .map(|j| {
            let z: f64 = rng.sample(StandardNormal);
            mean.map_or(0.0, |m| m[j]) + scale * z
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_blobs() {
        let (a, _) = blobs(20, 5, 9);
        let (b, _) = blobs(20, 5, 9);
        assert_eq!(a.inputs, b.inputs);
        assert_eq!(a.labels.iter().filter(|&&l| l == 0).count(), 5);
    }
}
