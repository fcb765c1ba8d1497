use rand::Rng;
use rand_distr::StandardNormal;

use crate::data::dataset::ImageShape;

/// Standard deviation of the additive pixel/feature jitter.
const JITTER_STD: f64 = 0.02;

/// Training-time augmentation of one sample.
///
/// Image-shaped rows are mirrored left-right with probability 1/2 and
/// jittered, then clamped to [0, 1]. Plain feature rows are only jittered.
pub fn augment<R: Rng + ?Sized>(row: &[f64], shape: Option<ImageShape>, rng: &mut R) -> Vec<f64> {
    let mut out = match shape {
        Some(s) if rng.gen_bool(0.5) => hflip(row, s),
        _ => row.to_vec(),
    };
    for v in out.iter_mut() {
        let z: f64 = rng.sample(StandardNormal);
        *v += JITTER_STD * z;
        if shape.is_some() {
            *v = v.clamp(0.0, 1.0);
        }
    }
    out
}

/// Mirrors every channel of a channel-major image row left-right.
pub fn hflip(row: &[f64], shape: ImageShape) -> Vec<f64> {
    let mut out = row.to_vec();
    for c in 0..shape.channels {
        for y in 0..shape.height {
            let base = (c * shape.height + y) * shape.width;
            out[base..base + shape.width].reverse();
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn hflip_mirrors_rows() {
        let shape = ImageShape { channels: 1, height: 2, width: 3 };
        assert_eq!(hflip(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], shape), vec![3.0, 2.0, 1.0, 6.0, 5.0, 4.0]);
    }

    #[test]
    fn image_rows_stay_in_unit_range() {
        let shape = ImageShape { channels: 1, height: 1, width: 4 };
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        for _ in 0..50 {
            let out = augment(&[0.0, 1.0, 0.0, 1.0], Some(shape), &mut rng);
            assert!(out.iter().all(|v| (0.0..=1.0).contains(v)));
        }
    }
}
