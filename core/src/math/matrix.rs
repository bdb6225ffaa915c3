use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

pub struct MatrixHelper;

impl MatrixHelper {
    /// Normal equations `(JᵀJ, Jᵀr)` of a linear least-squares step.
    pub fn normal_equations(
        jacobian: ArrayView2<f64>,
        residuals: ArrayView1<f64>,
    ) -> (Array2<f64>, Array1<f64>) {
        (jacobian.t().dot(&jacobian), jacobian.t().dot(&residuals))
    }

    /// Solves the square system `a · x = b` through nalgebra's LU
    /// decomposition with partial pivoting. Returns `None` for singular or
    /// non-finite systems.
    pub fn solve(a: Array2<f64>, b: Array1<f64>) -> Option<Array1<f64>> {
        let n = b.len();
        if a.nrows() != n || a.ncols() != n || a.iter().any(|v| !v.is_finite()) {
            return None;
        }

        let matrix = DMatrix::from_fn(n, n, |row, col| a[[row, col]]);
        let rhs = DVector::from_iterator(n, b.iter().copied());
        let lu = matrix.lu();

        let pivots = lu.u().diagonal();
        let largest = pivots.iter().fold(0.0_f64, |max, p| max.max(p.abs()));
        let threshold = largest * f64::EPSILON * n as f64;
        if largest == 0.0 || pivots.iter().any(|p| p.abs() <= threshold) {
            return None;
        }

        let x = lu.solve(&rhs)?;
        if x.iter().all(|v| v.is_finite()) {
            Some(Array1::from_iter(x.iter().copied()))
        } else {
            None
        }
    }
}
