//! Error types for the multilevel Monte Carlo driver.
//!
//! [`ConfigError`] covers invalid model or driver parameters and is raised
//! at construction time. [`MlmcError`] covers failures while the estimator
//! is running.

use thiserror::Error;

/// Invalid model or driver parameters.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Initial per-level sample request below the variance-estimate minimum.
    #[error("invalid initial sample count {0}: at least 2 paths per level are required")]
    InvalidInitialSamples(usize),

    /// Target accuracy must be positive and finite.
    #[error("invalid target accuracy epsilon = {0}: must be positive and finite")]
    InvalidEpsilon(f64),

    /// Any other invalid parameter, with its name and a description.
    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// Description of the invalid value.
        reason: String,
    },
}

/// Failure while running the estimator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MlmcError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A variance estimate was requested for a level with fewer than two paths.
    #[error("level {level} has {samples} samples; a variance estimate needs at least 2")]
    InsufficientSamples {
        /// Level index.
        level: usize,
        /// Paths accumulated at that level.
        samples: usize,
    },

    /// The bias did not fall below tolerance before the level budget ran out.
    #[error("weak convergence not reached within {max_levels} levels (bias estimate {bias:e})")]
    ConvergenceFailure {
        /// Level budget that was exhausted.
        max_levels: usize,
        /// Last bias estimate.
        bias: f64,
    },

    /// A level's accumulators picked up NaN or infinity.
    #[error("non-finite path values accumulated at level {level}")]
    NonFinite {
        /// Level index.
        level: usize,
    },
}
