use thiserror::Error;

/// Errors raised while setting up or running a concentration sampler.
///
/// Feasibility violations during a random-walk step are not part of this
/// enum: they are recovered in place and only counted as retries.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SamplerError {
    #[error("Malformed problem: {0}")]
    MalformedProblem(String),
    #[error("Invalid sampler settings: {0}")]
    InvalidSettings(String),
    #[error("Warmup failed: no feasible point for warmup row {row} after {tries} objectives")]
    WarmupExhausted { row: usize, tries: u32 },
    #[error("Warmup produced {found} distinct points, at least {required} are needed")]
    InsufficientWarmup { found: usize, required: usize },
    #[error("External solver failed during warmup")]
    Solver(#[source] anyhow::Error),
    #[error("Could not decompose the equality constraints")]
    Decomposition,
    #[error("Sampling chain {chain} failed: {message}")]
    WorkerFailed { chain: usize, message: String },
    #[error("Could not build the sample table")]
    Arrow(#[from] arrow::error::ArrowError),
}

pub type Result<T> = std::result::Result<T, SamplerError>;
