//! Adaptive multilevel Monte Carlo for terminal wealth under stochastic volatility.
//!
//! The crate estimates `E[W_T]` and `sd(W_T)` for a constant-proportion
//! portfolio whose risky asset has a mean-reverting square-root variance.
//! Coarse, cheap path simulations are corrected by a hierarchy of coupled
//! fine/coarse differences, each estimated with fewer paths, until the
//! root-mean-square error target is met.
//!
//! - [`sde`]: model parameters, the single-step integrator and increment sources
//! - [`scheme`]: plain and antithetic two-step fine-grid schemes
//! - [`level`]: level hierarchy, moment accumulators and per-level sampling
//! - [`mlmc`]: the adaptive driver and its one-call entry point
//! - [`diagnostics`]: convergence-rate fits for a finished run

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod level;
pub mod mlmc;
pub mod scheme;
pub mod sde;
pub mod utility;

pub use config::MlmcConfig;
pub use error::{ConfigError, MlmcError};
pub use mlmc::{mlmc, MlmcDriver, MlmcResult};
pub use sde::{GaussianIncrements, WealthParams};
