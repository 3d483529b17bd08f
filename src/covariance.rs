//! Post-update sanitization of an estimator covariance.
//!
//! Runs after every correction so that the matrix stays symmetric and its
//! entries stay inside `[COVARIANCE_FLOOR, COVARIANCE_CEILING]` on the
//! diagonal (off-diagonal entries are only capped from above). A NaN anywhere
//! is replaced by the ceiling, which re-inflates the uncertainty instead of
//! letting the filter lock up.

use nalgebra::SMatrix;

/// Smallest allowed variance on the diagonal.
pub const COVARIANCE_FLOOR: f64 = 1e-6;

/// Largest allowed entry anywhere in the matrix.
pub const COVARIANCE_CEILING: f64 = 100.0;

/// Symmetrizes `p` in place and clamps it into the allowed envelope.
///
/// For every pair `(i, j)` with `i <= j` the mean of `p[i][j]` and `p[j][i]`
/// is written to both entries, except that a NaN or anything above the
/// ceiling becomes the ceiling, and a diagonal entry under the floor becomes
/// the floor.
pub fn sanitize<const N: usize>(p: &mut SMatrix<f64, N, N>) {
    for i in 0..N {
        for j in i..N {
            let mean = 0.5 * p[(i, j)] + 0.5 * p[(j, i)];
            let value = if mean.is_nan() || mean > COVARIANCE_CEILING {
                COVARIANCE_CEILING
            } else if i == j && mean < COVARIANCE_FLOOR {
                COVARIANCE_FLOOR
            } else {
                mean
            };
            p[(i, j)] = value;
            p[(j, i)] = value;
        }
    }
}

/// Covariance used at start-up and after a reset: the floor on the diagonal.
pub fn floored<const N: usize>() -> SMatrix<f64, N, N> {
    SMatrix::<f64, N, N>::identity() * COVARIANCE_FLOOR
}

/// True when `p` is symmetric within `tolerance` and its diagonal lies
/// inside the allowed envelope.
pub fn is_within_bounds<const N: usize>(p: &SMatrix<f64, N, N>, tolerance: f64) -> bool {
    (0..N).all(|i| {
        let diag = p[(i, i)];
        (COVARIANCE_FLOOR..=COVARIANCE_CEILING).contains(&diag)
            && (0..N).all(|j| (p[(i, j)] - p[(j, i)]).abs() <= tolerance)
    })
}
