//! Wealth dynamics under mean-reverting stochastic volatility.
//!
//! Wealth `W` is invested with a constant fraction `p` in a risky asset whose
//! instantaneous variance `v` follows a square-root process. The variance is
//! carried in the transformed coordinate `X = 2 sqrt(v)`, which has additive
//! noise:
//!
//! ```text
//! dW = W (r + p xi v) dt + p sqrt(v) W dB
//! dX = (2 kappa A / X - kappa X / 2) dt + sigma dZ2,   A = theta - sigma^2 / (4 kappa)
//! dB = rho dZ2 + sqrt(1 - rho^2) dZ1
//! ```
//!
//! `W` is advanced with a Milstein step, `X` with a drift-implicit step that
//! keeps it strictly positive for any step size.

use ndarray::{Array2, ArrayView1, ArrayViewMut1, Zip};
use ndarray_rand::rand::rngs::StdRng;
use ndarray_rand::rand::{Rng, SeedableRng};
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;

use crate::error::ConfigError;

/// Model parameters for the controlled wealth process.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WealthParams {
    /// Initial wealth.
    pub w0: f64,
    /// Initial variance.
    pub v0: f64,
    /// Riskless rate.
    pub r: f64,
    /// Mean-reversion speed of the variance.
    pub kappa: f64,
    /// Long-run variance.
    pub theta: f64,
    /// Market price of variance risk.
    pub xi: f64,
    /// Volatility of the variance.
    pub sigma: f64,
    /// Correlation between asset and variance noise.
    pub rho: f64,
    /// Fraction of wealth held in the risky asset.
    pub p_opt: f64,
    /// Terminal time `T`.
    pub horizon: f64,
}

impl WealthParams {
    /// Checks the parameters describe a well-posed model.
    ///
    /// Besides the obvious sign constraints this requires
    /// `4 kappa theta > sigma^2`, so that the drift constant `A` of the
    /// transformed variance is positive.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let finite = [
            ("w0", self.w0),
            ("r", self.r),
            ("xi", self.xi),
            ("p_opt", self.p_opt),
        ];
        for (name, value) in finite {
            if !value.is_finite() {
                return Err(invalid(name, format!("must be finite, got {value}")));
            }
        }

        let positive = [
            ("v0", self.v0),
            ("kappa", self.kappa),
            ("theta", self.theta),
            ("horizon", self.horizon),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(invalid(name, format!("must be positive, got {value}")));
            }
        }

        if !(self.sigma.is_finite() && self.sigma >= 0.0) {
            return Err(invalid(
                "sigma",
                format!("must be non-negative, got {}", self.sigma),
            ));
        }
        if !(-1.0..=1.0).contains(&self.rho) {
            return Err(invalid("rho", format!("must lie in [-1, 1], got {}", self.rho)));
        }
        if 4.0 * self.kappa * self.theta <= self.sigma * self.sigma {
            return Err(invalid(
                "theta",
                "4 kappa theta must exceed sigma^2".to_string(),
            ));
        }
        Ok(())
    }
}

fn invalid(name: &'static str, reason: String) -> ConfigError {
    ConfigError::InvalidParameter { name, reason }
}

/// Validated model with precomputed step constants.
#[derive(Clone, Debug)]
pub struct WealthModel {
    params: WealthParams,
    rho_root: f64,
    a: f64,
    x0: f64,
}

impl WealthModel {
    /// Validates `params` and precomputes the step constants.
    pub fn new(params: WealthParams) -> Result<Self, ConfigError> {
        params.validate()?;
        let rho_root = (1.0 - params.rho * params.rho).sqrt();
        let a = params.theta - params.sigma * params.sigma / (4.0 * params.kappa);
        let x0 = 2.0 * params.v0.sqrt();
        Ok(Self {
            params,
            rho_root,
            a,
            x0,
        })
    }

    #[inline]
    pub fn params(&self) -> &WealthParams {
        &self.params
    }

    /// Terminal time `T`.
    #[inline]
    pub fn horizon(&self) -> f64 {
        self.params.horizon
    }

    /// Initial wealth.
    #[inline]
    pub fn w0(&self) -> f64 {
        self.params.w0
    }

    /// Initial transformed variance `2 sqrt(v0)`.
    #[inline]
    pub fn x0(&self) -> f64 {
        self.x0
    }

    /// Advances one path `(w, x)` by a step of size `h`.
    ///
    /// `dz1` and `dz2` are independent `N(0, h)` increments; `dz2` drives the
    /// variance.
    #[inline]
    pub fn step(&self, w: f64, x: f64, h: f64, dz1: f64, dz2: f64) -> (f64, f64) {
        let WealthParams {
            r,
            kappa,
            xi,
            sigma,
            rho,
            p_opt: p,
            ..
        } = self.params;

        let v = 0.25 * x * x;
        let db = rho * dz2 + self.rho_root * dz1;

        let w_next = w
            + w * (r + p * xi * v) * h
            + p * 0.5 * x * w * db
            + 0.5 * p * p * v * w * (db * db - h)
            + 0.25 * sigma * p * w * (dz2 * db - rho * h);

        // X' (1 + kappa h / 2) - 2 kappa A h / X' = X + sigma dZ2, positive root
        let damp = 1.0 + 0.5 * kappa * h;
        let b = x + sigma * dz2;
        let x_next = (b + (b * b + 8.0 * kappa * self.a * h * damp).sqrt()) / (2.0 * damp);

        (w_next, x_next)
    }

    /// Applies [`step`](Self::step) to every path of a batch in place.
    pub fn advance(
        &self,
        h: f64,
        w: ArrayViewMut1<'_, f64>,
        x: ArrayViewMut1<'_, f64>,
        dz1: ArrayView1<'_, f64>,
        dz2: ArrayView1<'_, f64>,
    ) {
        Zip::from(w)
            .and(x)
            .and(dz1)
            .and(dz2)
            .for_each(|w, x, &z1, &z2| {
                let (w_next, x_next) = self.step(*w, *x, h, z1, z2);
                *w = w_next;
                *x = x_next;
            });
    }
}

/// Source of Brownian increments for a batch of paths.
///
/// The driver draws all of its randomness through this trait, so callers
/// control seeding and can substitute a deterministic stream.
pub trait IncrementSource {
    /// Returns a `(paths, columns)` array of independent `N(0, sq_h^2)` draws.
    fn draw(&mut self, paths: usize, columns: usize, sq_h: f64) -> Array2<f64>;
}

/// Gaussian increments from an owned random generator.
#[derive(Clone, Debug)]
pub struct GaussianIncrements<R = StdRng> {
    rng: R,
}

impl GaussianIncrements<StdRng> {
    /// Seeded `StdRng`; equal seeds give identical increment streams.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl<R: Rng> GaussianIncrements<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl<R: Rng> IncrementSource for GaussianIncrements<R> {
    fn draw(&mut self, paths: usize, columns: usize, sq_h: f64) -> Array2<f64> {
        Array2::<f64>::random_using((paths, columns), StandardNormal, &mut self.rng) * sq_h
    }
}

/// All-zero increments: every path follows the noiseless evolution.
#[derive(Clone, Copy, Debug, Default)]
pub struct ZeroIncrements;

impl IncrementSource for ZeroIncrements {
    fn draw(&mut self, paths: usize, columns: usize, _sq_h: f64) -> Array2<f64> {
        Array2::zeros((paths, columns))
    }
}
