//! Adaptive multilevel Monte Carlo driver.
//!
//! The driver starts from a single level and alternates two loops:
//!
//! 1. The sampling loop draws the outstanding paths on every level, re-estimates
//!    the per-level variances and recomputes the optimal sample allocation,
//!    until no level requests more paths.
//! 2. The level loop checks the bias of the finest levels and either appends a
//!    level or stops. Fewer than three levels always extend.
//!
//! [`mlmc`] runs the whole thing; [`MlmcDriver`] exposes the individual steps.

use tracing::{debug, info, warn};

use crate::config::MlmcConfig;
use crate::error::MlmcError;
use crate::level::{sample_level, Level, LevelHierarchy};
use crate::scheme::{Antithetic, Plain, TwoStepScheme};
use crate::sde::{IncrementSource, WealthModel, WealthParams};
use crate::utility::round_to;

/// Per-level refinement factor of the weak error (first-order convergence).
const WEAK_RATE: f64 = 2.0;

/// Decimal digits kept in the reported estimate and standard deviation.
const REPORT_DIGITS: i32 = 4;

/// Optimal total sample count per level for target accuracy `epsilon`.
///
/// `N_ℓ = ceil(2 ε⁻² sqrt(V_ℓ T / M_ℓ) Σ_k sqrt(V_k M_k / T))`, which gives
/// estimator variance `ε²/2` at minimal cost. Non-positive or non-finite
/// variances count as zero, so such levels request no further paths.
pub fn optimal_samples(variances: &[f64], steps: &[usize], epsilon: f64, horizon: f64) -> Vec<usize> {
    let usable = |v: f64| if v.is_finite() && v > 0.0 { v } else { 0.0 };

    let total: f64 = variances
        .iter()
        .zip(steps)
        .map(|(&v, &m)| (usable(v) * m as f64 / horizon).sqrt())
        .sum();

    variances
        .iter()
        .zip(steps)
        .map(|(&v, &m)| {
            let n = 2.0 / (epsilon * epsilon) * (usable(v) * horizon / m as f64).sqrt() * total;
            n.ceil() as usize
        })
        .collect()
}

/// Bias estimate from the level means, assuming first-order weak convergence.
///
/// Returns `None` with fewer than three levels, where the extrapolation is
/// not trusted.
pub fn bias_estimate(means: &[f64]) -> Option<f64> {
    if means.len() < 3 {
        return None;
    }
    let finest = means.len() - 1;
    let denom = 1.0 - WEAK_RATE;
    let previous = (means[finest - 1] / denom).powi(2) / 2.0;
    let last = (means[finest] / denom).powi(2);
    Some(previous.max(last))
}

/// Where the level-extension state machine currently stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriverState {
    /// Running with levels `0..=L`.
    Active(usize),
    /// Bias within tolerance; the estimate is final.
    Terminal,
}

/// Outcome of an MLMC run.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MlmcResult {
    /// Σ_ℓ mean_ℓ, rounded to 4 decimals.
    pub estimate: f64,
    /// Standard deviation of the terminal value at the finest level, rounded to 4 decimals.
    pub std_dev: f64,
    /// Total simulation cost.
    pub cost: f64,
    /// Paths drawn per level.
    pub samples: Vec<usize>,
    /// Variance of the fine − coarse difference per level.
    pub variances: Vec<f64>,
    /// Variance of the fine terminal value per level.
    pub raw_variances: Vec<f64>,
    /// Mean of the fine − coarse difference per level.
    pub means: Vec<f64>,
    /// Cost spent per level.
    pub level_costs: Vec<f64>,
    /// Sampling passes executed.
    pub passes: usize,
}

impl MlmcResult {
    /// Index of the finest level.
    pub fn finest_level(&self) -> usize {
        self.samples.len().saturating_sub(1)
    }

    /// `(estimate, std_dev, cost, samples, variances, raw_variances)`
    pub fn into_tuple(self) -> (f64, f64, f64, Vec<usize>, Vec<f64>, Vec<f64>) {
        (
            self.estimate,
            self.std_dev,
            self.cost,
            self.samples,
            self.variances,
            self.raw_variances,
        )
    }
}

/// Step-wise MLMC driver over a fixed two-step scheme and increment source.
pub struct MlmcDriver<'m, S, I> {
    model: &'m WealthModel,
    config: MlmcConfig,
    scheme: S,
    source: I,
    hierarchy: LevelHierarchy,
    cost: f64,
    passes: usize,
    state: DriverState,
}

impl<'m, S, I> MlmcDriver<'m, S, I>
where
    S: TwoStepScheme,
    I: IncrementSource,
{
    /// Starts in `Active(0)` with N₀ paths requested at level 0.
    pub fn new(model: &'m WealthModel, config: MlmcConfig, scheme: S, source: I) -> Self {
        let hierarchy = LevelHierarchy::new(config.initial_samples());
        Self {
            model,
            config,
            scheme,
            source,
            hierarchy,
            cost: 0.0,
            passes: 0,
            state: DriverState::Active(0),
        }
    }

    #[inline]
    pub fn hierarchy(&self) -> &LevelHierarchy {
        &self.hierarchy
    }

    #[inline]
    pub fn cost(&self) -> f64 {
        self.cost
    }

    #[inline]
    pub fn state(&self) -> DriverState {
        self.state
    }

    #[inline]
    pub fn config(&self) -> &MlmcConfig {
        &self.config
    }

    /// One iteration of the sampling loop.
    ///
    /// Draws the outstanding paths on every level, then recomputes the
    /// allocation. Returns the number of paths now outstanding across all
    /// levels.
    pub fn sampling_pass(&mut self) -> Result<usize, MlmcError> {
        for level in self.hierarchy.levels_mut() {
            let pending = level.pending();
            if pending == 0 {
                continue;
            }
            let batch = sample_level(
                level.index(),
                pending,
                self.model,
                &self.scheme,
                &mut self.source,
            );
            self.cost += batch.cost;
            level.absorb(batch)?;
        }
        self.passes += 1;

        let variances = self
            .hierarchy
            .levels()
            .iter()
            .map(Level::variance)
            .collect::<Result<Vec<_>, _>>()?;
        for (index, v) in variances.iter().enumerate() {
            if !(v.is_finite() && *v > 0.0) {
                warn!(level = index, variance = v, "degenerate level variance, no refill");
            }
        }
        let steps: Vec<usize> = self.hierarchy.levels().iter().map(Level::steps).collect();
        let optimal = optimal_samples(
            &variances,
            &steps,
            self.config.epsilon(),
            self.model.horizon(),
        );

        let max_refill = self.config.max_refill();
        for (level, target) in self.hierarchy.levels_mut().iter_mut().zip(optimal) {
            level.set_pending(target.saturating_sub(level.samples()).min(max_refill));
        }

        let outstanding = self.hierarchy.total_pending();
        debug!(pass = self.passes, outstanding, cost = self.cost, "sampling pass");
        Ok(outstanding)
    }

    /// Repeats [`sampling_pass`](Self::sampling_pass) until no level needs more paths.
    pub fn run_sampling_loop(&mut self) -> Result<(), MlmcError> {
        while self.hierarchy.total_pending() > 0 {
            self.sampling_pass()?;
        }
        Ok(())
    }

    /// Converges the current hierarchy, then extends it or terminates.
    ///
    /// # Errors
    ///
    /// `ConvergenceFailure` when another level is needed but the level
    /// budget is exhausted.
    pub fn advance(&mut self) -> Result<DriverState, MlmcError> {
        if self.state == DriverState::Terminal {
            return Ok(self.state);
        }
        self.run_sampling_loop()?;

        let finest = self.hierarchy.finest();
        let means: Vec<f64> = self.hierarchy.levels().iter().map(Level::mean).collect();
        let bias = bias_estimate(&means);
        let tolerance = 0.5 * self.config.epsilon().powi(2);

        match bias {
            Some(bias) if bias <= tolerance => {
                info!(levels = finest + 1, bias, cost = self.cost, "converged");
                self.state = DriverState::Terminal;
            }
            _ => {
                if finest + 1 >= self.config.max_levels() {
                    return Err(MlmcError::ConvergenceFailure {
                        max_levels: self.config.max_levels(),
                        bias: bias.unwrap_or(f64::NAN),
                    });
                }
                self.hierarchy.push_level(self.config.initial_samples());
                info!(level = finest + 1, ?bias, "adding level");
                self.state = DriverState::Active(finest + 1);
            }
        }
        Ok(self.state)
    }

    /// Aggregates the accumulators into an [`MlmcResult`].
    pub fn result(&self) -> Result<MlmcResult, MlmcError> {
        let levels = self.hierarchy.levels();
        let means: Vec<f64> = levels.iter().map(Level::mean).collect();
        let variances = levels
            .iter()
            .map(Level::variance)
            .collect::<Result<Vec<_>, _>>()?;
        let raw_variances = levels
            .iter()
            .map(Level::raw_variance)
            .collect::<Result<Vec<_>, _>>()?;

        let top = raw_variances[self.hierarchy.finest()].max(0.0);

        Ok(MlmcResult {
            estimate: round_to(means.iter().sum(), REPORT_DIGITS),
            std_dev: round_to(top.sqrt(), REPORT_DIGITS),
            cost: self.cost,
            samples: levels.iter().map(Level::samples).collect(),
            variances,
            raw_variances,
            means,
            level_costs: levels.iter().map(Level::cost).collect(),
            passes: self.passes,
        })
    }

    /// Drives the state machine to `Terminal` and returns the result.
    pub fn run(mut self) -> Result<MlmcResult, MlmcError> {
        while self.advance()? != DriverState::Terminal {}
        self.result()
    }
}

/// Estimates `E[W_T]` and `sd(W_T)` with adaptive MLMC.
///
/// The antithetic flag in `config` selects the two-step scheme on levels ≥ 1.
///
/// # Examples
///
/// ```rust,no_run
/// use mlmc_wealth::config::MlmcConfig;
/// use mlmc_wealth::mlmc::mlmc;
/// use mlmc_wealth::sde::{GaussianIncrements, WealthParams};
///
/// let params = WealthParams {
///     w0: 100.0, v0: 0.0457, r: 0.03, kappa: 5.07, theta: 0.0457,
///     xi: 1.605, sigma: 0.48, rho: -0.767, p_opt: 0.1, horizon: 10.0,
/// };
/// let config = MlmcConfig::builder()
///     .initial_samples(1000)
///     .epsilon(0.05)
///     .antithetic(true)
///     .build()
///     .unwrap();
///
/// let result = mlmc(&params, &config, GaussianIncrements::from_seed(42)).unwrap();
/// println!("{} ± {}", result.estimate, result.std_dev);
/// ```
pub fn mlmc<I: IncrementSource>(
    params: &WealthParams,
    config: &MlmcConfig,
    source: I,
) -> Result<MlmcResult, MlmcError> {
    let model = WealthModel::new(params.clone())?;
    config.validate()?;

    if config.antithetic() {
        MlmcDriver::new(&model, config.clone(), Antithetic, source).run()
    } else {
        MlmcDriver::new(&model, config.clone(), Plain, source).run()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sde::tests::demo_params;
    use crate::sde::{GaussianIncrements, ZeroIncrements};
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn config(n0: usize, eps: f64, antithetic: bool) -> MlmcConfig {
        MlmcConfig::builder()
            .initial_samples(n0)
            .epsilon(eps)
            .antithetic(antithetic)
            .build()
            .unwrap()
    }

    #[test]
    fn test_optimal_samples_single_level() {
        // 2 / 0.25 * sqrt(4 * 1 / 1) * sqrt(4 * 1 / 1) = 32
        let n = optimal_samples(&[4.0], &[1], 0.5, 1.0);
        assert_eq!(n, vec![32]);
    }

    #[test]
    fn test_optimal_samples_degenerate_variance() {
        let n = optimal_samples(&[1.0, 0.0, -1e-12, f64::NAN], &[1, 2, 4, 8], 0.1, 1.0);
        assert!(n[0] > 0);
        assert_eq!(&n[1..], &[0, 0, 0]);
    }

    #[test]
    fn test_bias_needs_three_levels() {
        assert_eq!(bias_estimate(&[1.0]), None);
        assert_eq!(bias_estimate(&[1.0, 0.5]), None);
    }

    #[test]
    fn test_bias_formula() {
        assert_relative_eq!(bias_estimate(&[5.0, 0.4, 0.2]).unwrap(), 0.08);
        assert_relative_eq!(bias_estimate(&[5.0, 0.1, 0.2]).unwrap(), 0.04);
        assert_relative_eq!(bias_estimate(&[5.0, -0.4, 0.0]).unwrap(), 0.08);
    }

    #[test]
    fn test_sampling_pass_accumulates_monotonically() {
        let model = WealthModel::new(demo_params()).unwrap();
        let mut driver = MlmcDriver::new(
            &model,
            config(50, 0.5, false),
            Plain,
            GaussianIncrements::from_seed(17),
        );

        for _ in 0..3 {
            let before = driver.hierarchy().levels()[0].clone();
            driver.sampling_pass().unwrap();
            let after = &driver.hierarchy().levels()[0];

            assert_eq!(after.samples(), before.samples() + before.pending());
            assert!(after.samples() >= before.samples());
            if before.pending() == 0 {
                assert_eq!(after.sums(), before.sums());
            }
        }
    }

    #[test]
    fn test_refill_is_capped() {
        let model = WealthModel::new(demo_params()).unwrap();
        let config = MlmcConfig::builder()
            .initial_samples(10)
            .epsilon(0.01)
            .max_refill(500)
            .build()
            .unwrap();
        let mut driver = MlmcDriver::new(&model, config, Plain, GaussianIncrements::from_seed(2));

        let outstanding = driver.sampling_pass().unwrap();
        assert_eq!(outstanding, 500);
    }

    #[test]
    fn test_first_two_advances_always_extend() {
        let model = WealthModel::new(demo_params()).unwrap();
        let mut driver = MlmcDriver::new(
            &model,
            config(20, 10.0, false),
            Plain,
            GaussianIncrements::from_seed(4),
        );
        assert_eq!(driver.state(), DriverState::Active(0));

        assert_eq!(driver.advance().unwrap(), DriverState::Active(1));
        assert_eq!(driver.hierarchy().len(), 2);
        assert_eq!(driver.hierarchy().levels()[1].pending(), 20);

        assert_eq!(driver.advance().unwrap(), DriverState::Active(2));
        assert_eq!(driver.hierarchy().len(), 3);
    }

    #[test]
    fn test_cost_matches_level_costs() {
        let model = WealthModel::new(demo_params()).unwrap();
        let mut driver = MlmcDriver::new(
            &model,
            config(30, 5.0, true),
            Antithetic,
            GaussianIncrements::from_seed(8),
        );
        driver.advance().unwrap();
        driver.advance().unwrap();
        driver.run_sampling_loop().unwrap();

        let result = driver.result().unwrap();
        let expected: f64 = result
            .samples
            .iter()
            .enumerate()
            .map(|(l, &n)| {
                if l == 0 {
                    2.0 * n as f64
                } else {
                    let m_fine = (1usize << l) as f64;
                    2.0 * n as f64 * (2.0 * m_fine + m_fine / 2.0)
                }
            })
            .sum();
        assert_relative_eq!(result.cost, expected);
        assert_relative_eq!(result.level_costs.iter().sum::<f64>(), result.cost);
    }

    #[test]
    fn test_noiseless_level_zero_estimate() {
        let model = WealthModel::new(demo_params()).unwrap();
        let mut driver = MlmcDriver::new(&model, config(2, 0.1, false), Plain, ZeroIncrements);
        driver.run_sampling_loop().unwrap();

        let (w, _) = model.step(model.w0(), model.x0(), model.horizon(), 0.0, 0.0);
        let result = driver.result().unwrap();
        assert_eq!(result.samples, vec![2]);
        assert_relative_eq!(result.estimate, round_to(w, 4));
        assert_eq!(result.std_dev, 0.0);
    }

    #[test]
    fn test_level_budget_exhausted() {
        let config = MlmcConfig::builder()
            .initial_samples(2)
            .epsilon(1e-6)
            .max_levels(3)
            .build()
            .unwrap();
        let model = WealthModel::new(demo_params()).unwrap();
        // Noiseless paths converge instantly, leaving only the bias test.
        let driver = MlmcDriver::new(&model, config, Plain, ZeroIncrements);

        assert!(matches!(
            driver.run(),
            Err(MlmcError::ConvergenceFailure { max_levels: 3, .. })
        ));
    }

    #[test]
    fn test_invalid_params_rejected() {
        let params = WealthParams {
            v0: -1.0,
            ..demo_params()
        };
        let result = mlmc(&params, &config(10, 0.1, false), ZeroIncrements);
        assert!(matches!(result, Err(MlmcError::Config(_))));
    }

    proptest! {
        #[test]
        fn prop_looser_epsilon_never_needs_more_paths(
            variances in prop::collection::vec(0.0f64..100.0, 1..8),
            eps in 0.01f64..1.0,
            factor in 1.0f64..10.0,
        ) {
            let steps: Vec<usize> = (0..variances.len()).map(|l| 1 << l).collect();
            let tight = optimal_samples(&variances, &steps, eps, 10.0);
            let loose = optimal_samples(&variances, &steps, eps * factor, 10.0);
            for (t, l) in tight.iter().zip(&loose) {
                prop_assert!(l <= t);
            }
        }
    }
}
