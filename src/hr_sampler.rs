//! State shared by the hit-and-run samplers.

use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use arrow::array::StructArray;
use faer::{Mat, MatRef};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::info;

use crate::{
    error::{Result, SamplerError},
    math::fold_mean,
    problem::Problem,
    reproject::Reprojector,
    sampler::SamplerSettings,
    stepper::{FeasibilityStepper, Restart, Tolerances},
    table::{to_table, Columns},
    warmup::{WarmupGenerator, WarmupSolver, WarmupStrategy},
};

const WARMUP_STREAM: u64 = u64::MAX;

/// Per-sample feasibility flags returned by [`HrSampler::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleCheck {
    pub equalities: bool,
    pub inequalities: bool,
    pub bounds: bool,
}

impl SampleCheck {
    pub fn is_valid(&self) -> bool {
        self.equalities & self.inequalities & self.bounds
    }
}

/// Problem, warmup points, running center and counters of a sampler.
///
/// `n_samples` always equals the number of points folded into `center`.
#[derive(Debug)]
pub struct HrSampler {
    problem: Arc<Problem>,
    tolerances: Tolerances,
    thinning: u64,
    nproj: u64,
    seed: u64,
    max_step_tries: u32,
    warmup: Mat<f64>,
    reprojector: Reprojector,
    center: Box<[f64]>,
    n_samples: u64,
    retries: u64,
}

impl HrSampler {
    /// Validate the settings and generate the warmup points.
    pub(crate) fn new<S: WarmupSolver>(
        problem: Arc<Problem>,
        settings: &SamplerSettings,
        solver: S,
    ) -> Result<Self> {
        let dim = problem.dim();
        check_settings(settings)?;

        let nproj = settings.nproj.unwrap_or_else(|| default_nproj(dim));
        let seed = settings.seed.unwrap_or_else(time_seed);
        let n_warmup = match settings.warmup {
            WarmupStrategy::RandomObjectives => settings.n_warmup.unwrap_or((3 * dim).max(3)),
            WarmupStrategy::VariableExtremes => 2 * dim,
        };

        let reprojector = Reprojector::new(&problem, settings.tolerances.feasibility_tol)?;

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        rng.set_stream(WARMUP_STREAM);
        let warmup = WarmupGenerator::new(
            &problem,
            solver,
            settings.tolerances,
            settings.warmup,
            n_warmup,
            settings.max_warmup_tries,
        )
        .generate(&mut rng)?;

        let center = mean_rows(warmup.as_ref());

        Ok(Self {
            problem,
            tolerances: settings.tolerances,
            thinning: settings.thinning,
            nproj,
            seed,
            max_step_tries: settings.max_step_tries,
            warmup,
            reprojector,
            center,
            n_samples: 0,
            retries: 0,
        })
    }

    pub(crate) fn context(&self) -> ChainContext<'_> {
        ChainContext {
            problem: &self.problem,
            warmup: self.warmup.as_ref(),
            reprojector: &self.reprojector,
            tolerances: self.tolerances,
            max_step_tries: self.max_step_tries,
            thinning: self.thinning,
            nproj: self.nproj,
        }
    }

    pub fn problem(&self) -> &Problem {
        &self.problem
    }

    pub fn warmup(&self) -> MatRef<'_, f64> {
        self.warmup.as_ref()
    }

    pub fn n_warmup(&self) -> usize {
        self.warmup.nrows()
    }

    pub fn center(&self) -> &[f64] {
        &self.center
    }

    pub fn n_samples(&self) -> u64 {
        self.n_samples
    }

    /// Number of times a step had to be restarted. Large values point to
    /// numerical trouble in the problem.
    pub fn retries(&self) -> u64 {
        self.retries
    }

    pub fn thinning(&self) -> u64 {
        self.thinning
    }

    pub fn nproj(&self) -> u64 {
        self.nproj
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn tolerances(&self) -> &Tolerances {
        &self.tolerances
    }

    #[cfg(test)]
    pub(crate) fn clear_warmup(&mut self) {
        self.warmup = Mat::zeros(0, self.problem.dim());
    }

    pub(crate) fn add_retries(&mut self, retries: u64) {
        self.retries += retries;
    }

    /// Fold one point into the running center.
    pub(crate) fn fold(&mut self, point: &[f64]) {
        fold_mean(&mut self.center, point, self.n_samples);
        self.n_samples += 1;
    }

    /// Fold every row of `samples` into the running center.
    pub(crate) fn fold_rows(&mut self, samples: MatRef<'_, f64>) {
        let mut row = vec![0f64; samples.ncols()];
        for i in 0..samples.nrows() {
            row.iter_mut()
                .zip(samples.row(i).iter())
                .for_each(|(out, &val)| *out = val);
            self.fold(&row);
        }
    }

    /// Check every row of a log-space sample matrix against the constraints.
    pub fn validate(&self, samples: MatRef<'_, f64>) -> Vec<SampleCheck> {
        let mut row = vec![0f64; samples.ncols()];
        (0..samples.nrows())
            .map(|i| {
                row.iter_mut()
                    .zip(samples.row(i).iter())
                    .for_each(|(out, &val)| *out = val);
                let violation = self.problem.violation(&row);
                SampleCheck {
                    equalities: violation.equalities <= self.tolerances.feasibility_tol,
                    inequalities: violation.inequalities <= self.tolerances.feasibility_tol,
                    bounds: violation.variables <= self.tolerances.bounds_tol,
                }
            })
            .collect()
    }

    /// Exponentiate log-space samples and select the requested columns.
    pub fn to_table(&self, samples: MatRef<'_, f64>, columns: Columns) -> Result<StructArray> {
        to_table(&self.problem, samples, columns)
    }
}

/// Everything a single chain needs, borrowed from the sampler.
///
/// The external solver is not part of it, so it can be handed to worker
/// threads as is.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ChainContext<'a> {
    pub problem: &'a Problem,
    pub warmup: MatRef<'a, f64>,
    pub reprojector: &'a Reprojector,
    pub tolerances: Tolerances,
    pub max_step_tries: u32,
    pub thinning: u64,
    pub nproj: u64,
}

impl<'a> ChainContext<'a> {
    pub fn stepper(&self) -> FeasibilityStepper<'a> {
        FeasibilityStepper::new(self.problem, self.tolerances, self.max_step_tries)
    }

    pub fn restart<'b>(&self, center: &'b [f64]) -> Restart<'b>
    where
        'a: 'b,
    {
        Restart {
            center,
            warmup: self.warmup,
        }
    }

    pub fn warmup_row(&self, row: usize) -> Box<[f64]> {
        self.warmup.row(row).iter().copied().collect()
    }

    /// Mean of a few random warmup points, an interior point of the polytope.
    pub fn random_point<R: Rng + ?Sized>(&self, rng: &mut R) -> Box<[f64]> {
        let n_warmup = self.warmup.nrows();
        let count = ((n_warmup as f64).sqrt().ceil() as usize).clamp(1, 2);
        let mut point = vec![0f64; self.warmup.ncols()];
        for folded in 0..count {
            let row = self.warmup_row(rng.random_range(0..n_warmup));
            fold_mean(&mut point, &row, folded as u64);
        }
        point.into()
    }

    /// Reproject onto the equalities. If that pushes the point out of its
    /// bounds, an interior point is returned instead.
    pub fn reproject<R: Rng + ?Sized>(&self, rng: &mut R, point: &[f64]) -> Box<[f64]> {
        let projected = self.reprojector.reproject(point);
        if self.problem.violation(&projected).variables > self.tolerances.bounds_tol {
            info!("reprojection failed, using random point in space");
            return self.random_point(rng);
        }
        projected
    }
}

fn check_settings(settings: &SamplerSettings) -> Result<()> {
    let invalid = |msg: &str| Err(SamplerError::InvalidSettings(msg.into()));
    if settings.thinning == 0 {
        return invalid("thinning must be at least 1");
    }
    if settings.nproj == Some(0) {
        return invalid("nproj must be at least 1");
    }
    if settings.processes == Some(0) {
        return invalid("processes must be at least 1");
    }
    if settings.n_warmup.is_some_and(|n| n < 2) {
        return invalid("at least 2 warmup points are needed");
    }
    let Tolerances {
        feasibility_tol,
        bounds_tol,
    } = settings.tolerances;
    if !((feasibility_tol > 0.) & (bounds_tol > 0.)) {
        return invalid("tolerances must be positive");
    }
    Ok(())
}

/// `min(d^3, 1e6)`
pub(crate) fn default_nproj(dim: usize) -> u64 {
    (dim as u64).saturating_pow(3).clamp(1, 1_000_000)
}

fn time_seed() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or(0);
    (nanos % (i32::MAX as u128)) as u64
}

fn mean_rows(matrix: MatRef<'_, f64>) -> Box<[f64]> {
    let mut mean = vec![0f64; matrix.ncols()];
    let mut row = vec![0f64; matrix.ncols()];
    for i in 0..matrix.nrows() {
        row.iter_mut()
            .zip(matrix.row(i).iter())
            .for_each(|(out, &val)| *out = val);
        fold_mean(&mut mean, &row, i as u64);
    }
    mean.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_polytopes::{cut_square, unit_box, VertexSolver};
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;

    fn settings() -> SamplerSettings {
        SamplerSettings {
            seed: Some(7),
            ..Default::default()
        }
    }

    #[test]
    fn defaults() {
        assert_eq!(default_nproj(2), 8);
        assert_eq!(default_nproj(150), 1_000_000);

        let problem = Arc::new(unit_box(2));
        let solver = VertexSolver::for_box(&problem);
        let sampler = HrSampler::new(problem, &settings(), solver).unwrap();
        assert_eq!(sampler.n_warmup(), 6);
        assert_eq!(sampler.nproj(), 8);
        assert_eq!(sampler.thinning(), 100);
        assert_eq!(sampler.n_samples(), 0);
        assert_eq!(sampler.retries(), 0);
    }

    #[test]
    fn invalid_settings() {
        let problem = Arc::new(unit_box(2));
        for settings in [
            SamplerSettings {
                thinning: 0,
                ..settings()
            },
            SamplerSettings {
                nproj: Some(0),
                ..settings()
            },
            SamplerSettings {
                processes: Some(0),
                ..settings()
            },
            SamplerSettings {
                n_warmup: Some(1),
                ..settings()
            },
        ] {
            let solver = VertexSolver::for_box(&problem);
            let err = HrSampler::new(problem.clone(), &settings, solver);
            assert!(matches!(err, Err(SamplerError::InvalidSettings(_))));
        }
    }

    #[test]
    fn center_is_warmup_mean() {
        let (problem, solver) = cut_square();
        let sampler = HrSampler::new(Arc::new(problem), &settings(), solver).unwrap();
        let warmup = sampler.warmup();
        for j in 0..warmup.ncols() {
            let mean = warmup.col(j).iter().sum::<f64>() / warmup.nrows() as f64;
            assert_relative_eq!(sampler.center()[j], mean, epsilon = 1e-12);
        }
        let checks = sampler.validate(warmup);
        assert!(checks.iter().all(|check| check.is_valid()));
    }

    #[test]
    fn validate_flags_violations() {
        let (problem, solver) = cut_square();
        let sampler = HrSampler::new(Arc::new(problem), &settings(), solver).unwrap();
        let samples = Mat::from_fn(3, 3, |i, j| {
            [[0., 0., 0.], [0.5, 0.5, 0.], [1., -1., 0.]][i][j]
        });
        let checks = sampler.validate(samples.as_ref());
        assert!(checks[0].is_valid());
        assert_eq!(
            checks[1],
            SampleCheck {
                equalities: false,
                inequalities: true,
                bounds: true
            }
        );
        assert_eq!(
            checks[2],
            SampleCheck {
                equalities: true,
                inequalities: false,
                bounds: true
            }
        );
    }

    #[test]
    fn failed_reprojection_uses_interior_point() {
        let (problem, solver) = cut_square();
        let sampler = HrSampler::new(Arc::new(problem), &settings(), solver).unwrap();
        let context = sampler.context();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        // Projecting this point onto the plane leaves the bounds of atp_c.
        let point = context.reproject(&mut rng, &[1., 1., 4.]);
        assert!(sampler.problem().is_feasible(&point, sampler.tolerances()));
    }
}
