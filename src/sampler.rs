use std::sync::Arc;

use anyhow::Result;
use arrow::array::StructArray;
use faer::Mat;

use crate::{
    achr::AchrSampler,
    hr_sampler::HrSampler,
    optgp::OptGpSampler,
    problem::Problem,
    stepper::Tolerances,
    table::Columns,
    warmup::{WarmupSolver, WarmupStrategy},
};

/// Which hit-and-run variant to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// A single chain with artificial centering (ACHR).
    ArtificialCentering,
    /// Several chains in parallel sharing one center (OptGP).
    #[default]
    OptimizedParallel,
}

/// Settings for the concentration samplers
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerSettings {
    pub strategy: Strategy,
    /// Number of steps per returned sample.
    pub thinning: u64,
    /// Reproject onto the equalities every `nproj` steps. Defaults to
    /// `min(d^3, 1e6)` for `d` variables.
    pub nproj: Option<u64>,
    /// Random seed. Derived from the current time if not set.
    pub seed: Option<u64>,
    /// Number of parallel chains of the OptGP sampler. Defaults to the
    /// available parallelism of the machine.
    pub processes: Option<usize>,
    /// Number of warmup points for random objectives. Defaults to `3 * d`.
    pub n_warmup: Option<usize>,
    pub warmup: WarmupStrategy,
    pub tolerances: Tolerances,
    /// Restarts of a single step before it falls back to clamping.
    pub max_step_tries: u32,
    /// Objectives tried per warmup point before warmup fails.
    pub max_warmup_tries: u32,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            thinning: 100,
            nproj: None,
            seed: None,
            processes: None,
            n_warmup: None,
            warmup: WarmupStrategy::default(),
            tolerances: Tolerances::default(),
            max_step_tries: 100,
            max_warmup_tries: 100,
        }
    }
}

pub(crate) fn default_processes() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// A sampler of either strategy, chosen once from the settings.
pub enum ConcSampler {
    Achr(AchrSampler),
    OptGp(OptGpSampler),
}

impl ConcSampler {
    pub fn new<S: WarmupSolver>(
        problem: Arc<Problem>,
        settings: &SamplerSettings,
        solver: S,
    ) -> Result<Self> {
        Ok(match settings.strategy {
            Strategy::ArtificialCentering => {
                Self::Achr(AchrSampler::new(problem, settings, solver)?)
            }
            Strategy::OptimizedParallel => {
                Self::OptGp(OptGpSampler::new(problem, settings, solver)?)
            }
        })
    }

    pub fn base(&self) -> &HrSampler {
        match self {
            Self::Achr(sampler) => sampler.base(),
            Self::OptGp(sampler) => sampler.base(),
        }
    }

    pub fn sample_log(&mut self, n: usize) -> Result<Mat<f64>> {
        match self {
            Self::Achr(sampler) => sampler.sample_log(n),
            Self::OptGp(sampler) => sampler.sample_log(n),
        }
    }

    pub fn sample(&mut self, n: usize, columns: Columns) -> Result<StructArray> {
        match self {
            Self::Achr(sampler) => sampler.sample(n, columns),
            Self::OptGp(sampler) => sampler.sample(n, columns),
        }
    }
}

/// Generate warmup points and draw `n` concentration samples in one go.
pub fn sample_concentrations<S: WarmupSolver>(
    problem: Arc<Problem>,
    n: usize,
    settings: &SamplerSettings,
    solver: S,
    columns: Columns,
) -> Result<StructArray> {
    let mut sampler = ConcSampler::new(problem, settings, solver)?;
    sampler.sample(n, columns)
}
