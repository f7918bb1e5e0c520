use faer::MatRef;
use rand::Rng;
use tracing::{info, warn};

use crate::{
    math::{axpy_out, max_abs, sub_out},
    problem::Problem,
};

/// Tolerances used to decide whether a point is feasible.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerances {
    /// Allowed violation of the constraint rows `lb <= A x <= ub`.
    pub feasibility_tol: f64,
    /// Allowed violation of the per-variable bounds.
    pub bounds_tol: f64,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            feasibility_tol: 1e-7,
            bounds_tol: 1e-7,
        }
    }
}

/// Feasible step lengths along a direction, `[lower, upper]` with
/// `lower <= 0 <= upper` for a feasible start point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlphaRange {
    pub lower: f64,
    pub upper: f64,
}

impl AlphaRange {
    pub fn is_empty(&self) -> bool {
        self.lower > self.upper
    }

    fn scaled(self, fraction: f64) -> Self {
        Self {
            lower: self.lower * fraction,
            upper: self.upper * fraction,
        }
    }

    fn widest(&self) -> f64 {
        self.lower.abs().max(self.upper.abs())
    }
}

/// Where a failed step restarts from: the running center, moving toward a
/// random warmup point.
#[derive(Debug, Clone, Copy)]
pub struct Restart<'a> {
    pub center: &'a [f64],
    pub warmup: MatRef<'a, f64>,
}

impl Restart<'_> {
    pub(crate) fn direction<R: Rng + ?Sized>(&self, rng: &mut R, out: &mut [f64]) {
        let row = rng.random_range(0..self.warmup.nrows());
        out.iter_mut()
            .zip(self.warmup.row(row).iter())
            .zip(self.center)
            .for_each(|((out, &w), &c)| *out = w - c);
    }
}

/// Moves a point along a direction while keeping it inside the polytope.
#[derive(Debug, Clone, Copy)]
pub struct FeasibilityStepper<'a> {
    problem: &'a Problem,
    tolerances: Tolerances,
    max_tries: u32,
}

impl<'a> FeasibilityStepper<'a> {
    pub fn new(problem: &'a Problem, tolerances: Tolerances, max_tries: u32) -> Self {
        Self {
            problem,
            tolerances,
            max_tries,
        }
    }

    /// Ratio test: how far can `x` travel along `delta` before it hits a
    /// variable bound or a constraint row bound.
    ///
    /// Variable bounds are pulled inward by `bounds_tol` and row bounds by
    /// `feasibility_tol`. Directions that barely move a variable or row are
    /// ignored and so are infinite bounds. A side
    /// without any limiting bound gets length zero.
    pub fn alpha_interval(&self, x: &[f64], delta: &[f64]) -> AlphaRange {
        let problem = self.problem;
        let Tolerances {
            feasibility_tol,
            bounds_tol,
        } = self.tolerances;

        let mut upper = f64::INFINITY;
        let mut lower = f64::NEG_INFINITY;
        let mut update = |value: f64, direction: f64, lb: f64, ub: f64, tol: f64| {
            let (lb, ub) = shrink(lb, ub, tol);
            for bound in [lb, ub] {
                if !bound.is_finite() {
                    continue;
                }
                let alpha = (bound - value) / direction;
                if alpha > 0. {
                    upper = upper.min(alpha);
                } else {
                    lower = lower.max(alpha);
                }
            }
        };

        let (var_lb, var_ub) = problem.variable_bounds();
        for (j, (&value, &direction)) in x.iter().zip(delta).enumerate() {
            if (direction.abs() <= feasibility_tol) | problem.is_fixed(j, &self.tolerances) {
                continue;
            }
            update(value, direction, var_lb[j], var_ub[j], bounds_tol);
        }

        let num_rows = problem.num_rows();
        if num_rows > 0 {
            let mut ax = vec![0f64; num_rows];
            let mut ad = vec![0f64; num_rows];
            problem.row_products(x, &mut ax);
            problem.row_products(delta, &mut ad);
            let (row_lb, row_ub) = problem.row_bounds();
            for i in 0..num_rows {
                if ad[i].abs() <= feasibility_tol {
                    continue;
                }
                update(ax[i], ad[i], row_lb[i], row_ub[i], feasibility_tol);
            }
        }

        AlphaRange {
            lower: if lower.is_finite() { lower } else { 0. },
            upper: if upper.is_finite() { upper } else { 0. },
        }
    }

    /// Return `x + alpha * delta` for a supplied step length.
    pub fn step_by(&self, x: &[f64], delta: &[f64], alpha: f64) -> Box<[f64]> {
        let mut out = vec![0f64; x.len()];
        axpy_out(delta, x, alpha, &mut out);
        out.into()
    }

    /// One hit-and-run move from `x` along `delta`.
    ///
    /// The step length is drawn uniformly from the feasible interval, scaled
    /// by `fraction` if given. If the result leaves the polytope or the
    /// interval collapsed, the move is retried from the center of `restart`
    /// along a fresh warmup direction. Every retry is added to `retries`.
    /// After `max_tries` retries the current point is clamped into its
    /// variable bounds instead, so this never fails.
    pub fn step<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        x: &[f64],
        delta: &[f64],
        fraction: Option<f64>,
        restart: &Restart<'_>,
        retries: &mut u64,
    ) -> Box<[f64]> {
        let dim = x.len();
        let mut start = x.to_vec();
        let mut direction = delta.to_vec();
        let mut fraction = fraction;
        let mut candidate = vec![0f64; dim];

        for tries in 0..=self.max_tries {
            let mut range = self.alpha_interval(&start, &direction);
            if let Some(fraction) = fraction {
                range = range.scaled(fraction);
            }

            if !range.is_empty() {
                let alpha = range.lower + (range.upper - range.lower) * rng.random::<f64>();
                axpy_out(&direction, &start, alpha, &mut candidate);

                let stuck = range.widest() * max_abs(&direction) < self.tolerances.bounds_tol;
                if !stuck && self.problem.is_feasible(&candidate, &self.tolerances) {
                    return candidate.into();
                }
            }

            if tries == self.max_tries {
                break;
            }
            *retries += 1;
            info!("found bounds infeasibility in sample, restarting from center");
            start.copy_from_slice(restart.center);
            restart.direction(rng, &mut direction);
            fraction = None;
        }

        warn!(
            max_tries = self.max_tries,
            "could not escape the sampling region, clamping the point into its bounds"
        );
        *retries += 1;
        let mut clamped = x.to_vec();
        self.problem.clamp_to_bounds(&mut clamped);
        clamped.into()
    }

    /// Direction from `center` toward `target`.
    pub fn direction(&self, target: &[f64], center: &[f64]) -> Box<[f64]> {
        let mut out = vec![0f64; target.len()];
        sub_out(target, center, &mut out);
        out.into()
    }
}

fn shrink(lb: f64, ub: f64, tol: f64) -> (f64, f64) {
    let margin = tol.min((ub - lb) / 2.);
    (lb + margin, ub - margin)
}
