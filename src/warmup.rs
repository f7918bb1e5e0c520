//! Warmup points spread across the polytope.
//!
//! Warmup points are the extremes of linear objectives over the polytope. They
//! are computed once by an external LP solver before any chain starts and are
//! used afterwards as targets for new random-walk directions.

use faer::Mat;
use rand::Rng;
use rand_distr::StandardNormal;
use tracing::{debug, info};

use crate::{
    error::{Result, SamplerError},
    math::max_abs,
    problem::Problem,
    stepper::Tolerances,
};

/// The optimization layer as seen by the samplers.
///
/// Implementations maximize `objective . x` over the polytope described by
/// `problem`. `Ok(None)` means the solver found no optimal point for that
/// objective, which only causes a retry with a different objective. An
/// `Err` aborts warmup.
pub trait WarmupSolver {
    fn maximize(
        &mut self,
        problem: &Problem,
        objective: &[f64],
    ) -> anyhow::Result<Option<Box<[f64]>>>;
}

impl<S: WarmupSolver + ?Sized> WarmupSolver for &mut S {
    fn maximize(
        &mut self,
        problem: &Problem,
        objective: &[f64],
    ) -> anyhow::Result<Option<Box<[f64]>>> {
        (**self).maximize(problem, objective)
    }
}

/// How the objectives of the warmup problems are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WarmupStrategy {
    /// One random Gaussian objective per warmup point.
    #[default]
    RandomObjectives,
    /// Maximize and minimize every non-fixed variable once.
    VariableExtremes,
}

pub struct WarmupGenerator<'a, S: WarmupSolver> {
    problem: &'a Problem,
    solver: S,
    tolerances: Tolerances,
    strategy: WarmupStrategy,
    n_warmup: usize,
    max_tries: u32,
}

impl<'a, S: WarmupSolver> WarmupGenerator<'a, S> {
    pub fn new(
        problem: &'a Problem,
        solver: S,
        tolerances: Tolerances,
        strategy: WarmupStrategy,
        n_warmup: usize,
        max_tries: u32,
    ) -> Self {
        Self {
            problem,
            solver,
            tolerances,
            strategy,
            n_warmup,
            max_tries,
        }
    }

    /// Solve for all warmup points and return them as rows of a matrix.
    ///
    /// Every returned row passes the feasibility check.
    pub fn generate<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<Mat<f64>> {
        let rows = match self.strategy {
            WarmupStrategy::RandomObjectives => self.random_objectives(rng)?,
            WarmupStrategy::VariableExtremes => self.variable_extremes(rng)?,
        };

        if rows.len() < 2 {
            return Err(SamplerError::InsufficientWarmup {
                found: rows.len(),
                required: 2,
            });
        }

        info!(n_warmup = rows.len(), "generated warmup points");
        let dim = self.problem.dim();
        Ok(Mat::from_fn(rows.len(), dim, |i, j| rows[i][j]))
    }

    fn random_objectives<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<Vec<Box<[f64]>>> {
        let mut rows = Vec::with_capacity(self.n_warmup);
        let mut objective = vec![0f64; self.problem.dim()];
        for row in 0..self.n_warmup {
            let point = self.solve_with_retries(rng, row, &mut objective, true)?;
            rows.push(point);
        }
        Ok(rows)
    }

    fn variable_extremes<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<Vec<Box<[f64]>>> {
        let dim = self.problem.dim();
        let mut rows: Vec<Box<[f64]>> = Vec::with_capacity(2 * dim);
        let mut objective = vec![0f64; dim];
        for variable in 0..dim {
            if self.problem.is_fixed(variable, &self.tolerances) {
                continue;
            }
            for sense in [1f64, -1f64] {
                objective.fill(0.);
                objective[variable] = sense;
                let point = self.solve_with_retries(rng, rows.len(), &mut objective, false)?;
                let duplicate = rows.iter().any(|row| {
                    row.iter()
                        .zip(point.iter())
                        .all(|(a, b)| (a - b).abs() <= self.tolerances.bounds_tol)
                });
                if duplicate {
                    debug!(variable, "skipping duplicate warmup point");
                    continue;
                }
                rows.push(point);
            }
        }
        Ok(rows)
    }

    /// Solve for one warmup row. If the solver finds nothing, or the point it
    /// returns is not feasible, a new random objective is tried.
    fn solve_with_retries<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        row: usize,
        objective: &mut [f64],
        randomize_first: bool,
    ) -> Result<Box<[f64]>> {
        if randomize_first {
            random_objective(rng, objective);
        }
        for tries in 0..self.max_tries {
            if tries > 0 {
                random_objective(rng, objective);
            }
            let solution = self
                .solver
                .maximize(self.problem, objective)
                .map_err(SamplerError::Solver)?;
            let Some(point) = solution else {
                debug!(row, tries, "warmup objective infeasible, retrying");
                continue;
            };
            if point.len() != self.problem.dim() {
                return Err(SamplerError::Solver(anyhow::anyhow!(
                    "solver returned a point of length {} for {} variables",
                    point.len(),
                    self.problem.dim()
                )));
            }
            if !self.problem.is_feasible(&point, &self.tolerances) {
                debug!(row, tries, "warmup point violates constraints, retrying");
                continue;
            }
            return Ok(point);
        }
        Err(SamplerError::WarmupExhausted {
            row,
            tries: self.max_tries,
        })
    }
}

fn random_objective<R: Rng + ?Sized>(rng: &mut R, objective: &mut [f64]) {
    loop {
        objective
            .iter_mut()
            .for_each(|val| *val = rng.sample(StandardNormal));
        if max_abs(objective) > 0. {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_polytopes::{cut_square, unit_box, VertexSolver};
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    /// Reports every `every`-th objective as infeasible.
    struct FlakySolver {
        inner: VertexSolver,
        calls: usize,
        every: usize,
    }

    impl WarmupSolver for FlakySolver {
        fn maximize(
            &mut self,
            problem: &Problem,
            objective: &[f64],
        ) -> anyhow::Result<Option<Box<[f64]>>> {
            self.calls += 1;
            if self.calls % self.every == 0 {
                return Ok(None);
            }
            self.inner.maximize(problem, objective)
        }
    }

    /// Answers every other objective with a point outside the bounds.
    struct OutOfBoundsSolver {
        inner: VertexSolver,
        calls: usize,
    }

    impl WarmupSolver for OutOfBoundsSolver {
        fn maximize(
            &mut self,
            problem: &Problem,
            objective: &[f64],
        ) -> anyhow::Result<Option<Box<[f64]>>> {
            self.calls += 1;
            if self.calls % 2 == 1 {
                return Ok(Some(vec![5.; problem.dim()].into()));
            }
            self.inner.maximize(problem, objective)
        }
    }

    struct ShortSolver;

    impl WarmupSolver for ShortSolver {
        fn maximize(&mut self, _: &Problem, _: &[f64]) -> anyhow::Result<Option<Box<[f64]>>> {
            Ok(Some(vec![0.].into()))
        }
    }

    struct BrokenSolver;

    impl WarmupSolver for BrokenSolver {
        fn maximize(&mut self, _: &Problem, _: &[f64]) -> anyhow::Result<Option<Box<[f64]>>> {
            anyhow::bail!("solver crashed")
        }
    }

    #[test]
    fn random_warmup_is_feasible() {
        let (problem, solver) = cut_square();
        let tol = Tolerances::default();
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let strategy = WarmupStrategy::RandomObjectives;
        let mut generator = WarmupGenerator::new(&problem, solver, tol, strategy, 9, 10);
        let warmup = generator.generate(&mut rng).unwrap();
        assert_eq!(warmup.nrows(), 9);
        assert_eq!(warmup.ncols(), 3);
        for i in 0..warmup.nrows() {
            let row = warmup.row(i).iter().copied().collect::<Vec<_>>();
            assert!(problem.is_feasible(&row, &tol));
        }
    }

    #[test]
    fn infeasible_objectives_are_retried() {
        let problem = unit_box(3);
        let solver = FlakySolver {
            inner: VertexSolver::for_box(&problem),
            calls: 0,
            every: 2,
        };
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut generator = WarmupGenerator::new(
            &problem,
            solver,
            Tolerances::default(),
            WarmupStrategy::RandomObjectives,
            9,
            10,
        );
        let warmup = generator.generate(&mut rng).unwrap();
        assert_eq!(warmup.nrows(), 9);
    }

    #[test]
    fn infeasible_points_are_retried() {
        let problem = unit_box(2);
        let tol = Tolerances::default();
        let mut solver = OutOfBoundsSolver {
            inner: VertexSolver::for_box(&problem),
            calls: 0,
        };
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let strategy = WarmupStrategy::RandomObjectives;
        let warmup = WarmupGenerator::new(&problem, &mut solver, tol, strategy, 6, 10)
            .generate(&mut rng)
            .unwrap();

        assert_eq!(warmup.nrows(), 6);
        assert_eq!(solver.calls, 12);
        for i in 0..warmup.nrows() {
            let row = warmup.row(i).iter().copied().collect::<Vec<_>>();
            assert!(problem.is_feasible(&row, &tol));
        }
    }

    #[test]
    fn wrong_length_is_a_solver_error() {
        let problem = unit_box(2);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let tol = Tolerances::default();
        let strategy = WarmupStrategy::RandomObjectives;
        let mut generator = WarmupGenerator::new(&problem, ShortSolver, tol, strategy, 6, 5);
        assert!(matches!(
            generator.generate(&mut rng),
            Err(SamplerError::Solver(_))
        ));
    }

    #[test]
    fn exhausted_retries_fail() {
        let problem = unit_box(2);
        let solver = FlakySolver {
            inner: VertexSolver::for_box(&problem),
            calls: 0,
            every: 1,
        };
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut generator = WarmupGenerator::new(
            &problem,
            solver,
            Tolerances::default(),
            WarmupStrategy::RandomObjectives,
            6,
            5,
        );
        assert!(matches!(
            generator.generate(&mut rng),
            Err(SamplerError::WarmupExhausted { row: 0, tries: 5 })
        ));
    }

    #[test]
    fn solver_errors_are_fatal() {
        let problem = unit_box(2);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut generator = WarmupGenerator::new(
            &problem,
            BrokenSolver,
            Tolerances::default(),
            WarmupStrategy::RandomObjectives,
            6,
            5,
        );
        assert!(matches!(
            generator.generate(&mut rng),
            Err(SamplerError::Solver(_))
        ));
    }

    #[test]
    fn variable_extremes_skip_duplicates() {
        let problem = unit_box(2);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut generator = WarmupGenerator::new(
            &problem,
            VertexSolver::for_box(&problem),
            Tolerances::default(),
            WarmupStrategy::VariableExtremes,
            0,
            5,
        );
        let warmup = generator.generate(&mut rng).unwrap();
        // Maximizing a single coordinate of a box hits the first vertex with
        // that coordinate at its bound, so some of the four solves coincide.
        assert!(warmup.nrows() >= 2);
        assert!(warmup.nrows() <= 4);
    }
}
