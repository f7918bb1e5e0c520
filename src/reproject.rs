use faer::{ColRef, Mat};
use tracing::debug;

use crate::{
    error::{Result, SamplerError},
    problem::Problem,
};

/// Projects points back onto the equality constraints `A_eq x = b`.
///
/// Built once per sampler from a thin SVD of `A_eq^T = U S V^T`. The columns
/// of `U` belonging to non-zero singular values span the row space of
/// `A_eq`, so removing that component of a point solves the homogeneous case.
/// The inhomogeneous case applies the minimum-norm correction
/// `U S^-1 V^T (A_eq x - b)`.
#[derive(Debug, Clone)]
pub struct Reprojector {
    equalities: Mat<f64>,
    rhs: Box<[f64]>,
    basis: Mat<f64>,
    scaled_left: Mat<f64>,
    homogeneous: bool,
    feasibility_tol: f64,
}

impl Reprojector {
    pub fn new(problem: &Problem, feasibility_tol: f64) -> Result<Self> {
        let rows = problem.equality_rows();
        let dim = problem.dim();
        let matrix = problem.matrix();
        let (row_lb, _) = problem.row_bounds();

        let equalities = Mat::from_fn(rows.len(), dim, |k, j| matrix[(rows[k], j)]);
        let rhs: Box<[f64]> = rows.iter().map(|&i| row_lb[i]).collect();

        if rows.is_empty() {
            return Ok(Self {
                equalities,
                rhs,
                basis: Mat::zeros(dim, 0),
                scaled_left: Mat::zeros(0, 0),
                homogeneous: problem.is_homogeneous(),
                feasibility_tol,
            });
        }

        let transposed = equalities.transpose().to_owned();
        let svd = transposed
            .thin_svd()
            .map_err(|_| SamplerError::Decomposition)?;
        let singular: Vec<f64> = svd.S().column_vector().iter().copied().collect();
        let largest = singular.iter().fold(0f64, |acc, &val| acc.max(val));
        let cutoff = largest * (dim.max(rows.len()) as f64) * f64::EPSILON;
        let rank = singular.iter().filter(|&&val| val > cutoff).count();

        let u = svd.U();
        let v = svd.V();
        let basis = Mat::from_fn(dim, rank, |j, k| u[(j, k)]);
        let scaled_left = Mat::from_fn(rows.len(), rank, |i, k| v[(i, k)] / singular[k]);

        debug!(rank, equalities = rows.len(), "prepared reprojection");

        Ok(Self {
            equalities,
            rhs,
            basis,
            scaled_left,
            homogeneous: problem.is_homogeneous(),
            feasibility_tol,
        })
    }

    /// Largest absolute violation of the equality constraints.
    #[cfg(test)]
    fn residual(&self, point: &[f64]) -> f64 {
        self.residuals(point)
            .iter()
            .fold(0f64, |acc, &val| acc.max(val.abs()))
    }

    fn residuals(&self, point: &[f64]) -> Vec<f64> {
        if self.rhs.is_empty() {
            return Vec::new();
        }
        let prod = self.equalities.as_ref() * ColRef::from_slice(point);
        prod.iter()
            .zip(self.rhs.iter())
            .map(|(&ax, &b)| ax - b)
            .collect()
    }

    /// Project `point` onto the equality manifold.
    ///
    /// Points already within `feasibility_tol` of it are returned unchanged.
    pub fn reproject(&self, point: &[f64]) -> Box<[f64]> {
        let residuals = self.residuals(point);
        let violation = residuals.iter().fold(0f64, |acc, &val| acc.max(val.abs()));
        if violation <= self.feasibility_tol {
            return point.into();
        }

        let coefficients = if self.homogeneous {
            self.basis.transpose() * ColRef::from_slice(point)
        } else {
            self.scaled_left.transpose() * ColRef::from_slice(&residuals)
        };
        let correction = self.basis.as_ref() * coefficients.as_ref();

        point
            .iter()
            .zip(correction.iter())
            .map(|(&x, &c)| x - c)
            .collect()
    }
}
