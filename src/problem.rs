//! Read-only description of the sampling polytope.
//!
//! A [`Problem`] is produced by the optimization layer that owns the
//! thermodynamic model. The samplers only consume it: they never modify the
//! constraints, and they keep it alive behind an `Arc` for the lifetime of a
//! sampling session.

use faer::{ColRef, Mat, MatRef};
use itertools::izip;

use crate::{
    error::{Result, SamplerError},
    stepper::Tolerances,
};

/// The polytope `{x : lb_row <= A x <= ub_row, lb_var <= x <= ub_var}`
/// over log-concentration variables.
///
/// Rows with identical lower and upper bounds are equality constraints.
#[derive(Debug, Clone)]
pub struct Problem {
    variables: Vec<String>,
    included_metabolites: Vec<String>,
    matrix: Mat<f64>,
    row_lb: Box<[f64]>,
    row_ub: Box<[f64]>,
    variable_lb: Box<[f64]>,
    variable_ub: Box<[f64]>,
    equality_rows: Vec<usize>,
    homogeneous: bool,
}

/// Largest constraint violations of a point, split by constraint kind.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Violation {
    pub variables: f64,
    pub equalities: f64,
    pub inequalities: f64,
}

impl Violation {
    pub fn rows(&self) -> f64 {
        self.equalities.max(self.inequalities)
    }

    pub fn is_within(&self, tolerances: &Tolerances) -> bool {
        (self.variables <= tolerances.bounds_tol) & (self.rows() <= tolerances.feasibility_tol)
    }
}

impl Problem {
    /// Create a new problem description.
    ///
    /// `matrix` has one row per constraint and one column per variable.
    /// Infinite bounds are allowed and mean the side is unconstrained.
    pub fn new(
        variables: Vec<String>,
        matrix: Mat<f64>,
        row_bounds: Vec<(f64, f64)>,
        variable_bounds: Vec<(f64, f64)>,
        homogeneous: bool,
    ) -> Result<Self> {
        let dim = variables.len();
        if dim == 0 {
            return Err(SamplerError::MalformedProblem(
                "the problem has no variables".into(),
            ));
        }
        if matrix.ncols() != dim {
            return Err(SamplerError::MalformedProblem(format!(
                "constraint matrix has {} columns but there are {} variables",
                matrix.ncols(),
                dim
            )));
        }
        if matrix.nrows() != row_bounds.len() {
            return Err(SamplerError::MalformedProblem(format!(
                "constraint matrix has {} rows but {} row bounds were given",
                matrix.nrows(),
                row_bounds.len()
            )));
        }
        if variable_bounds.len() != dim {
            return Err(SamplerError::MalformedProblem(format!(
                "{} variable bounds given for {} variables",
                variable_bounds.len(),
                dim
            )));
        }
        check_bounds("row", &row_bounds)?;
        check_bounds("variable", &variable_bounds)?;
        let all_finite = (0..matrix.ncols())
            .all(|col| matrix.col(col).iter().all(|val| val.is_finite()));
        if !all_finite {
            return Err(SamplerError::MalformedProblem(
                "constraint matrix contains non-finite entries".into(),
            ));
        }

        let equality_rows: Vec<usize> = row_bounds
            .iter()
            .enumerate()
            .filter(|(_, (lb, ub))| lb == ub)
            .map(|(i, _)| i)
            .collect();

        if homogeneous && equality_rows.iter().any(|&i| row_bounds[i].0 != 0.) {
            return Err(SamplerError::MalformedProblem(
                "problem is flagged homogeneous but has equalities with a non-zero right hand side"
                    .into(),
            ));
        }

        let (row_lb, row_ub) = row_bounds.into_iter().unzip::<_, _, Vec<_>, Vec<_>>();
        let (variable_lb, variable_ub) = variable_bounds
            .into_iter()
            .unzip::<_, _, Vec<_>, Vec<_>>();

        Ok(Self {
            included_metabolites: variables.clone(),
            variables,
            matrix,
            row_lb: row_lb.into(),
            row_ub: row_ub.into(),
            variable_lb: variable_lb.into(),
            variable_ub: variable_ub.into(),
            equality_rows,
            homogeneous,
        })
    }

    /// Restrict the concentration columns returned by the samplers.
    ///
    /// By default every variable counts as a metabolite. Names that are not
    /// variables of the problem are rejected.
    pub fn with_included_metabolites(mut self, metabolites: Vec<String>) -> Result<Self> {
        if let Some(name) = metabolites
            .iter()
            .find(|name| !self.variables.contains(name))
        {
            return Err(SamplerError::MalformedProblem(format!(
                "included metabolite {} is not a problem variable",
                name
            )));
        }
        self.included_metabolites = metabolites;
        Ok(self)
    }

    pub fn dim(&self) -> usize {
        self.variables.len()
    }

    pub fn num_rows(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn included_metabolites(&self) -> &[String] {
        &self.included_metabolites
    }

    pub fn matrix(&self) -> MatRef<'_, f64> {
        self.matrix.as_ref()
    }

    pub fn row_bounds(&self) -> (&[f64], &[f64]) {
        (&self.row_lb, &self.row_ub)
    }

    pub fn variable_bounds(&self) -> (&[f64], &[f64]) {
        (&self.variable_lb, &self.variable_ub)
    }

    pub fn equality_rows(&self) -> &[usize] {
        &self.equality_rows
    }

    pub fn is_homogeneous(&self) -> bool {
        self.homogeneous
    }

    /// Write `A x` into `out`.
    pub fn row_products(&self, x: &[f64], out: &mut [f64]) {
        assert!(x.len() == self.dim());
        assert!(out.len() == self.num_rows());
        if self.num_rows() == 0 {
            return;
        }
        let prod = self.matrix.as_ref() * ColRef::from_slice(x);
        out.iter_mut()
            .zip(prod.iter())
            .for_each(|(out, &val)| *out = val);
    }

    pub fn violation(&self, x: &[f64]) -> Violation {
        let mut variables = 0f64;
        for (&x, &lb, &ub) in izip!(x, self.variable_lb.iter(), self.variable_ub.iter()) {
            variables = variables.max(lb - x).max(x - ub);
        }

        let mut products = vec![0f64; self.num_rows()];
        self.row_products(x, &mut products);
        let mut equalities = 0f64;
        let mut inequalities = 0f64;
        for (&ax, &lb, &ub) in izip!(products.iter(), self.row_lb.iter(), self.row_ub.iter()) {
            let violation = (lb - ax).max(ax - ub).max(0.);
            if lb == ub {
                equalities = equalities.max(violation);
            } else {
                inequalities = inequalities.max(violation);
            }
        }

        Violation {
            variables,
            equalities,
            inequalities,
        }
    }

    pub fn is_feasible(&self, x: &[f64], tolerances: &Tolerances) -> bool {
        self.violation(x).is_within(tolerances)
    }

    /// Clamp every variable of `x` into its bounds.
    pub(crate) fn clamp_to_bounds(&self, x: &mut [f64]) {
        x.iter_mut()
            .zip(self.variable_lb.iter().zip(self.variable_ub.iter()))
            .for_each(|(x, (&lb, &ub))| *x = x.clamp(lb, ub));
    }

    /// Variables whose bounds leave no room to move.
    pub(crate) fn is_fixed(&self, variable: usize, tolerances: &Tolerances) -> bool {
        self.variable_ub[variable] - self.variable_lb[variable] <= tolerances.bounds_tol
    }
}

fn check_bounds(kind: &str, bounds: &[(f64, f64)]) -> Result<()> {
    for (i, &(lb, ub)) in bounds.iter().enumerate() {
        if lb.is_nan() | ub.is_nan() | (lb > ub) {
            return Err(SamplerError::MalformedProblem(format!(
                "{} bound {} is invalid: [{}, {}]",
                kind, i, lb, ub
            )));
        }
    }
    Ok(())
}
