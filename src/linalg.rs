//! ndarray <-> nalgebra bridge for the two decompositions the estimators need:
//! SVD pseudo-inverse (aalen's per-time least squares) & cholesky inversion
//! with escalating ridge (cox's newton steps & covariance)

use log::warn;
use nalgebra::DMatrix;
use ndarray::{Array2, ArrayView2};

use crate::error::{Result, SurvivalError};

const MAX_RIDGE_ATTEMPTS: usize = 20;
const INITIAL_RIDGE: f64 = 1e-10;

pub(crate) fn to_dmatrix(a: ArrayView2<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(a.nrows(), a.ncols(), |i, j| a[[i, j]])
}

pub(crate) fn from_dmatrix(m: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

/// Moore-Penrose pseudo-inverse via SVD, plus the numerical rank of `a`.
///
/// Singular values below `max(sv) * max(rows, cols) * eps` are treated as
/// zero, so rank-deficient designs still give the minimum-norm solution.
pub fn pseudo_inverse(a: ArrayView2<f64>) -> Result<(Array2<f64>, usize)> {
    let (rows, cols) = a.dim();
    if rows == 0 || cols == 0 {
        return Ok((Array2::zeros((cols, rows)), 0));
    }
    if a.iter().any(|v| !v.is_finite()) {
        return Err(SurvivalError::numerical_error("pseudo-inverse of non-finite matrix"));
    }

    let svd = to_dmatrix(a).svd(true, true);
    let largest = svd.singular_values.max();
    let cutoff = largest * rows.max(cols) as f64 * f64::EPSILON;
    let rank = svd.singular_values.iter().filter(|&&s| s > cutoff).count();

    let pinv = svd
        .pseudo_inverse(cutoff)
        .map_err(|e| SurvivalError::numerical_error(format!("svd failed: {e}")))?;
    Ok((from_dmatrix(&pinv), rank))
}

/// invert a symmetric positive (semi-)definite matrix, adding a growing
/// diagonal ridge until the cholesky factorization goes through
///
/// Returns the inverse and the ridge that was needed (0 when none).
pub fn invert_with_ridge(a: ArrayView2<f64>) -> Result<(Array2<f64>, f64)> {
    let n = a.nrows();
    if a.ncols() != n {
        return Err(SurvivalError::invalid_dimensions(format!(
            "can't invert a {}x{} matrix",
            n,
            a.ncols()
        )));
    }
    if a.iter().any(|v| !v.is_finite()) {
        return Err(SurvivalError::numerical_error("matrix has non-finite entries"));
    }

    let base = to_dmatrix(a);
    if let Some(chol) = base.clone().cholesky() {
        return Ok((from_dmatrix(&chol.inverse()), 0.0));
    }

    // scale the jitter to the matrix so tiny & huge informations behave alike
    let scale = (0..n).map(|i| base[(i, i)].abs()).sum::<f64>() / n.max(1) as f64;
    let mut ridge = INITIAL_RIDGE * scale.max(1.0);
    for _ in 0..MAX_RIDGE_ATTEMPTS {
        let mut jittered = base.clone();
        for i in 0..n {
            jittered[(i, i)] += ridge;
        }
        if let Some(chol) = jittered.cholesky() {
            warn!("matrix not positive definite, inverted with ridge {ridge:.3e}");
            return Ok((from_dmatrix(&chol.inverse()), ridge));
        }
        ridge *= 10.0;
    }

    Err(SurvivalError::numerical_error(format!(
        "matrix stayed singular after {MAX_RIDGE_ATTEMPTS} ridge attempts"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_pseudo_inverse_full_rank() {
        let a = array![[2.0, 0.0], [0.0, 4.0], [0.0, 0.0]];
        let (pinv, rank) = pseudo_inverse(a.view()).unwrap();
        assert_eq!(rank, 2);
        assert_eq!(pinv.dim(), (2, 3));
        assert_relative_eq!(pinv[[0, 0]], 0.5, epsilon = 1e-12);
        assert_relative_eq!(pinv[[1, 1]], 0.25, epsilon = 1e-12);
        assert_relative_eq!(pinv[[0, 2]], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_pseudo_inverse_rank_deficient() {
        let a = array![[1.0, 1.0], [1.0, 1.0]];
        let (pinv, rank) = pseudo_inverse(a.view()).unwrap();
        assert_eq!(rank, 1);
        for v in pinv.iter() {
            assert_relative_eq!(*v, 0.25, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_pseudo_inverse_of_zeros() {
        let a = Array2::<f64>::zeros((3, 2));
        let (pinv, rank) = pseudo_inverse(a.view()).unwrap();
        assert_eq!(rank, 0);
        assert!(pinv.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_invert_without_ridge() {
        let a = array![[4.0, 2.0], [2.0, 3.0]];
        let (inv, ridge) = invert_with_ridge(a.view()).unwrap();
        assert_eq!(ridge, 0.0);
        let identity = a.dot(&inv);
        assert_relative_eq!(identity[[0, 0]], 1.0, epsilon = 1e-12);
        assert_relative_eq!(identity[[0, 1]], 0.0, epsilon = 1e-12);
        assert_relative_eq!(identity[[1, 1]], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_singular_matrix_gets_ridge() {
        let a = array![[1.0, 1.0], [1.0, 1.0]];
        let (inv, ridge) = invert_with_ridge(a.view()).unwrap();
        assert!(ridge > 0.0);
        assert!(inv.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_non_square_rejected() {
        let a = Array2::<f64>::zeros((2, 3));
        assert!(invert_with_ridge(a.view()).is_err());
    }
}
