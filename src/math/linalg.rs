use crate::error::PerturbError;
use crate::math::matrix::Matrix;

/// Number of extra damping attempts before a solve is declared singular.
const DAMPING_RETRIES: u32 = 6;

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub fn norm(v: &[f64]) -> f64 {
    dot(v, v).sqrt()
}

/// `y += alpha * x`
pub fn axpy(alpha: f64, x: &[f64], y: &mut [f64]) {
    for (yi, xi) in y.iter_mut().zip(x) {
        *yi += alpha * xi;
    }
}

/// Lower-triangular Cholesky factor of a symmetric matrix, or `None` when the
/// matrix is not (numerically) positive definite.
pub fn cholesky(a: &Matrix) -> Option<Matrix> {
    assert_eq!(a.rows, a.cols, "cholesky needs a square matrix");
    let n = a.rows;
    let mut l = Matrix::zeros(n, n);
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a.data[i][j];
            for k in 0..j {
                sum -= l.data[i][k] * l.data[j][k];
            }
            if i == j {
                if !(sum > 0.0) || !sum.is_finite() {
                    return None;
                }
                l.data[i][i] = sum.sqrt();
            } else {
                l.data[i][j] = sum / l.data[j][j];
            }
        }
    }
    Some(l)
}

/// Solves `L Lᵀ x = b` given the Cholesky factor `L`.
pub fn cholesky_solve(l: &Matrix, b: &[f64]) -> Vec<f64> {
    let n = l.rows;
    let mut y = vec![0.0; n];
    for i in 0..n {
        let mut sum = b[i];
        for k in 0..i {
            sum -= l.data[i][k] * y[k];
        }
        y[i] = sum / l.data[i][i];
    }
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = y[i];
        for k in (i + 1)..n {
            sum -= l.data[k][i] * x[k];
        }
        x[i] = sum / l.data[i][i];
    }
    x
}

/// Solves `(H + damping·I) x = b`.
///
/// `h` is expected to already carry the L2 term, which bounds its smallest
/// eigenvalue away from zero for convex losses. Finite-difference curvature
/// can still be indefinite, so on a failed factorisation the extra damping is
/// raised tenfold (starting from `base_damping`) up to `DAMPING_RETRIES`
/// times. Returns the solution and the extra damping that was needed.
pub fn damped_solve(h: &Matrix, b: &[f64], base_damping: f64) -> Result<(Vec<f64>, f64), PerturbError> {
    let mut damping = 0.0;
    let mut step = base_damping.max(1e-8);
    for _ in 0..=DAMPING_RETRIES {
        let mut a = h.clone();
        a.add_diagonal(damping);
        if let Some(l) = cholesky(&a) {
            let x = cholesky_solve(&l, b);
            if x.iter().all(|v| v.is_finite()) {
                return Ok((x, damping));
            }
        }
        damping = step;
        step *= 10.0;
    }
    Err(PerturbError::Singular { damping })
}
