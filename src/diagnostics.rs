//! Convergence-rate estimates for a finished run.
//!
//! MLMC theory describes a hierarchy by three rates: the weak order α
//! (`|E[P_ℓ − P_ℓ₋₁]| ~ 2^(−αℓ)`), the variance decay β (`V_ℓ ~ 2^(−βℓ)`)
//! and the cost growth γ (`C_ℓ ~ 2^(γℓ)`). They are fitted by least squares
//! on levels ℓ ≥ 1; level 0 estimates `E[P_0]` itself and is left out.

use crate::mlmc::MlmcResult;
use crate::utility::linear_regression;

/// Fitted convergence rates of an MLMC hierarchy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConvergenceRates {
    /// Weak order α.
    pub alpha: f64,
    /// Variance decay β.
    pub beta: f64,
    /// Cost growth per path γ.
    pub gamma: f64,
}

impl ConvergenceRates {
    /// Fits α, β and γ to the levels `1..=L` of `result`.
    ///
    /// Levels whose mean or variance is zero carry no rate information and
    /// are skipped for that fit.
    ///
    /// # Errors
    ///
    /// Fails when fewer than two usable levels remain for any of the fits.
    pub fn estimate(result: &MlmcResult) -> Result<Self, &'static str> {
        let finest = result.finest_level();
        let alpha = -fit_slope(finest, |l| result.means[l].abs())?;
        let beta = -fit_slope(finest, |l| result.variances[l])?;
        let gamma = fit_slope(finest, |l| {
            result.level_costs[l] / result.samples[l] as f64
        })?;

        Ok(Self { alpha, beta, gamma })
    }
}

/// Slope of `log2 value(ℓ)` against ℓ over `1..=finest`.
fn fit_slope(finest: usize, value: impl Fn(usize) -> f64) -> Result<f64, &'static str> {
    let (x, y): (Vec<f64>, Vec<f64>) = (1..=finest)
        .filter_map(|l| {
            let v = value(l);
            (v.is_finite() && v > 0.0).then(|| (l as f64, v.log2()))
        })
        .unzip();
    linear_regression(&x, &y).map(|(_, slope)| slope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn synthetic(levels: usize) -> MlmcResult {
        let samples: Vec<usize> = (0..levels).map(|l| 1000 >> l).collect();
        MlmcResult {
            estimate: 0.0,
            std_dev: 0.0,
            cost: 0.0,
            means: (0..levels).map(|l| 8.0 * 0.5f64.powi(l as i32)).collect(),
            variances: (0..levels).map(|l| 0.25f64.powi(l as i32)).collect(),
            raw_variances: vec![1.0; levels],
            level_costs: samples
                .iter()
                .enumerate()
                .map(|(l, &n)| n as f64 * 2f64.powi(l as i32))
                .collect(),
            samples,
            passes: 1,
        }
    }

    #[test]
    fn test_exact_rates_recovered() {
        let rates = ConvergenceRates::estimate(&synthetic(5)).unwrap();
        assert_relative_eq!(rates.alpha, 1.0, epsilon = 1e-10);
        assert_relative_eq!(rates.beta, 2.0, epsilon = 1e-10);
        assert_relative_eq!(rates.gamma, 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_too_few_levels() {
        assert!(ConvergenceRates::estimate(&synthetic(2)).is_err());
    }
}
