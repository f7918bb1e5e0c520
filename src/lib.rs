//! Sample steady-state metabolite log-concentrations with hit-and-run.
//!
//! The feasible log-concentrations of a reaction network form a convex
//! polytope described by a [`Problem`]. Warmup points are computed with an
//! external LP solver ([`WarmupSolver`]), and then either a single ACHR chain
//! ([`AchrSampler`]) or several OptGP chains in parallel ([`OptGpSampler`])
//! walk through the polytope. Samples are returned as arrow tables in linear
//! concentration space.

pub(crate) mod achr;
pub(crate) mod error;
pub(crate) mod hr_sampler;
pub(crate) mod math;
pub(crate) mod optgp;
pub(crate) mod problem;
pub(crate) mod reproject;
pub(crate) mod sampler;
pub(crate) mod stepper;
pub(crate) mod table;
pub mod test_polytopes;
pub(crate) mod warmup;

pub use achr::AchrSampler;
pub use error::SamplerError;
pub use hr_sampler::{HrSampler, SampleCheck};
pub use optgp::OptGpSampler;
pub use problem::{Problem, Violation};
pub use reproject::Reprojector;
pub use sampler::{sample_concentrations, ConcSampler, SamplerSettings, Strategy};
pub use stepper::{AlphaRange, FeasibilityStepper, Restart, Tolerances};
pub use table::{to_table, Columns};
pub use warmup::{WarmupGenerator, WarmupSolver, WarmupStrategy};
