//! Parallel optimized general parametrization sampler (OptGP).
//!
//! Every worker runs its own ACHR-like chain starting from a distinct warmup
//! point. All chains share a single running center.

use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use anyhow::{Context, Result};
use arrow::array::StructArray;
use faer::Mat;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::{prelude::*, ThreadPoolBuilder};
use tracing::debug;

use crate::{
    error::SamplerError,
    hr_sampler::{ChainContext, HrSampler},
    math::fold_mean,
    problem::Problem,
    sampler::{default_processes, SamplerSettings},
    table::Columns,
    warmup::WarmupSolver,
};

/// Step fraction used to pull the first point of a chain toward the center.
const START_FRACTION: f64 = 0.95;

/// Running center visible to every chain of one `sample` call.
///
/// Values are stored as `f64` bit patterns. Updates are plain loads and
/// stores, so concurrent folds can lose each other's contributions. The
/// center only steers directions; feasibility is always checked against the
/// polytope itself.
pub(crate) struct SharedCenter {
    values: Box<[AtomicU64]>,
    count: AtomicU64,
}

impl SharedCenter {
    pub fn new(center: &[f64], count: u64) -> Self {
        Self {
            values: center
                .iter()
                .map(|val| AtomicU64::new(val.to_bits()))
                .collect(),
            count: AtomicU64::new(count),
        }
    }

    pub fn load(&self, out: &mut [f64]) {
        for (out, val) in out.iter_mut().zip(self.values.iter()) {
            *out = f64::from_bits(val.load(Ordering::Relaxed));
        }
    }

    pub fn store(&self, center: &[f64]) {
        for (val, out) in center.iter().zip(self.values.iter()) {
            out.store(val.to_bits(), Ordering::Relaxed);
        }
    }

    /// Fold `point` into the center. Returns the number of points in the
    /// center afterwards.
    ///
    /// `scratch` must have the dimension of the center.
    pub fn fold(&self, point: &[f64], scratch: &mut [f64]) -> u64 {
        let count = self.count.fetch_add(1, Ordering::Relaxed);
        self.load(scratch);
        fold_mean(scratch, point, count);
        self.store(scratch);
        count + 1
    }
}

struct ChainOutput {
    samples: Mat<f64>,
    retries: u64,
}

pub struct OptGpSampler {
    base: HrSampler,
    processes: usize,
}

impl OptGpSampler {
    pub fn new<S: WarmupSolver>(
        problem: Arc<Problem>,
        settings: &SamplerSettings,
        solver: S,
    ) -> Result<Self> {
        let base = HrSampler::new(problem, settings, solver).context("Warmup failed")?;
        let processes = settings.processes.unwrap_or_else(default_processes);
        Ok(Self { base, processes })
    }

    pub fn base(&self) -> &HrSampler {
        &self.base
    }

    pub fn processes(&self) -> usize {
        self.processes
    }

    /// Number of rows `sample_log(n)` returns: `n` rounded up to a multiple
    /// of the number of processes.
    pub fn rounded_size(&self, n: usize) -> usize {
        if self.processes > 1 {
            n.div_ceil(self.processes) * self.processes
        } else {
            n
        }
    }

    /// Draw log-space samples from `processes` chains in parallel.
    ///
    /// The result holds the samples of chain 0 first, then chain 1 and so
    /// on. If any chain fails the whole call fails and the sampler state is
    /// left untouched.
    pub fn sample_log(&mut self, n: usize) -> Result<Mat<f64>> {
        let n = self.rounded_size(n);
        let chains = self.processes.max(1);
        let per_chain = n / chains;
        let thinning = self.base.thinning();
        debug!(n, chains, thinning, "sampling with OptGP");

        let shared = SharedCenter::new(self.base.center(), self.base.n_samples().max(1));
        let context = self.base.context();
        let seed = self.base.seed();
        let run = |chain| run_guarded(&context, &shared, seed, chain, per_chain);

        let outputs: Vec<_> = if chains > 1 {
            let pool = ThreadPoolBuilder::new()
                .num_threads(chains)
                .thread_name(|i| format!("conc-sampler-worker-{}", i))
                .build()
                .context("Could not start thread pool")?;

            pool.install(|| (0..chains).into_par_iter().map(run).collect())
        } else {
            vec![run(0)]
        };

        let outputs: Vec<ChainOutput> = outputs
            .into_iter()
            .enumerate()
            .map(|(chain, output)| {
                output.with_context(|| format!("Sampling chain {} failed", chain))
            })
            .collect::<Result<_>>()?;

        let dim = self.base.problem().dim();
        let mut samples = Mat::zeros(n, dim);
        let mut retries = 0;
        for (chain, output) in outputs.iter().enumerate() {
            let offset = chain * per_chain;
            for i in 0..per_chain {
                samples
                    .row_mut(offset + i)
                    .iter_mut()
                    .zip(output.samples.row(i).iter())
                    .for_each(|(out, &val)| *out = val);
            }
            retries += output.retries;
        }

        self.base.add_retries(retries);
        self.base.fold_rows(samples.as_ref());
        Ok(samples)
    }

    /// Draw samples and return them in linear space.
    pub fn sample(&mut self, n: usize, columns: Columns) -> Result<StructArray> {
        let samples = self.sample_log(n)?;
        self.base
            .to_table(samples.as_ref(), columns)
            .context("Could not build the sample table")
    }
}

/// Run one chain, turning a panic into an error.
fn run_guarded(
    context: &ChainContext<'_>,
    shared: &SharedCenter,
    seed: u64,
    chain: usize,
    n: usize,
) -> Result<ChainOutput, SamplerError> {
    let chain_run = AssertUnwindSafe(|| run_chain(context, shared, seed, chain, n));
    catch_unwind(chain_run).map_err(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|msg| msg.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        SamplerError::WorkerFailed { chain, message }
    })
}

pub(crate) fn chain_seed(seed: u64, chain: usize) -> u64 {
    seed.wrapping_add(chain as u64) % (i32::MAX as u64)
}

fn run_chain(
    context: &ChainContext<'_>,
    shared: &SharedCenter,
    seed: u64,
    chain: usize,
    n: usize,
) -> ChainOutput {
    let mut rng = ChaCha8Rng::seed_from_u64(chain_seed(seed, chain));
    let dim = context.problem.dim();
    let stepper = context.stepper();
    let homogeneous = context.problem.is_homogeneous();

    let mut center = vec![0f64; dim];
    let mut scratch = vec![0f64; dim];
    let mut delta = vec![0f64; dim];
    let mut retries = 0;

    shared.load(&mut center);
    let first = rng.random_range(0..context.warmup.nrows());
    let start = context.warmup_row(first);
    let to_start = stepper.direction(&start, &center);
    let mut prev = stepper.step(
        &mut rng,
        &center,
        &to_start,
        Some(START_FRACTION),
        &context.restart(&center),
        &mut retries,
    );

    let mut samples = Mat::zeros(n, dim);
    for i in 1..=(context.thinning * n as u64) {
        shared.load(&mut center);
        let restart = context.restart(&center);
        restart.direction(&mut rng, &mut delta);
        prev = stepper.step(&mut rng, &prev, &delta, None, &restart, &mut retries);

        let count = shared.fold(&prev, &mut scratch);
        if homogeneous && count % context.nproj == 0 {
            prev = context.reproject(&mut rng, &prev);
            shared.load(&mut center);
            let projected = context.reproject(&mut rng, &center);
            shared.store(&projected);
        }

        if i % context.thinning == 0 {
            let row = (i / context.thinning - 1) as usize;
            samples
                .row_mut(row)
                .iter_mut()
                .zip(prev.iter())
                .for_each(|(out, &val)| *out = val);
        }
    }

    ChainOutput { samples, retries }
}
