//! Artificial centering hit-and-run (ACHR).
//!
//! A single chain. New directions point from the running center of all
//! visited points toward a random warmup point. Only the warmup points are
//! used as targets, never earlier iterates: they span the polytope widely,
//! and because the center converges quickly the chain is close to Markovian.

use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::StructArray;
use faer::Mat;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use crate::{
    hr_sampler::HrSampler, problem::Problem, sampler::SamplerSettings, table::Columns,
    warmup::WarmupSolver,
};

pub struct AchrSampler {
    base: HrSampler,
    prev: Box<[f64]>,
    rng: ChaCha8Rng,
}

impl AchrSampler {
    /// Generate warmup points and start the chain at their mean.
    pub fn new<S: WarmupSolver>(
        problem: Arc<Problem>,
        settings: &SamplerSettings,
        solver: S,
    ) -> Result<Self> {
        let base = HrSampler::new(problem, settings, solver).context("Warmup failed")?;
        let prev = base.center().into();
        let rng = ChaCha8Rng::seed_from_u64(base.seed());
        Ok(Self { base, prev, rng })
    }

    pub fn base(&self) -> &HrSampler {
        &self.base
    }

    /// The current point of the chain.
    pub fn current(&self) -> &[f64] {
        &self.prev
    }

    /// Draw `n` log-space samples, one every `thinning` steps.
    ///
    /// Returns an `n x d` matrix with one sample per row.
    pub fn sample_log(&mut self, n: usize) -> Result<Mat<f64>> {
        let thinning = self.base.thinning();
        let dim = self.base.problem().dim();
        debug!(n, thinning, "sampling with artificial centering");

        let mut samples = Mat::zeros(n, dim);
        for i in 1..=(thinning * n as u64) {
            self.single_iteration();

            if i % thinning == 0 {
                let row = (i / thinning - 1) as usize;
                samples
                    .row_mut(row)
                    .iter_mut()
                    .zip(self.prev.iter())
                    .for_each(|(out, &val)| *out = val);
            }
        }
        Ok(samples)
    }

    /// Draw `n` samples and return them in linear space.
    pub fn sample(&mut self, n: usize, columns: Columns) -> Result<StructArray> {
        let samples = self.sample_log(n)?;
        self.base
            .to_table(samples.as_ref(), columns)
            .context("Could not build the sample table")
    }

    fn single_iteration(&mut self) {
        let context = self.base.context();
        let stepper = context.stepper();
        let restart = context.restart(self.base.center());

        let mut delta = vec![0f64; self.prev.len()];
        restart.direction(&mut self.rng, &mut delta);

        let mut retries = 0;
        let next = stepper.step(
            &mut self.rng,
            &self.prev,
            &delta,
            None,
            &restart,
            &mut retries,
        );

        self.prev = next;
        self.base.add_retries(retries);
        self.base.fold(&self.prev);
    }
}
