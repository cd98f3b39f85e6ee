//! Driver configuration.
//!
//! [`MlmcConfig`] holds the knobs of the adaptive loop: the initial
//! per-level sample request, the target accuracy, the coupling scheme and
//! the two throttles (per-iteration refill cap and level budget). Use
//! [`MlmcConfig::builder`] to construct a validated instance.

use crate::error::ConfigError;

/// Largest number of new paths drawn at one level in one outer iteration.
pub const DEFAULT_MAX_REFILL: usize = 70_000;

/// Level budget before the driver gives up with `ConvergenceFailure`.
pub const DEFAULT_MAX_LEVELS: usize = 20;

/// Levels 0, 1 and 2 must exist before the bias test can terminate the run.
pub const MIN_LEVELS: usize = 3;

/// Adaptive MLMC driver configuration.
///
/// # Examples
///
/// ```rust
/// use mlmc_wealth::config::MlmcConfig;
///
/// let config = MlmcConfig::builder()
///     .initial_samples(1000)
///     .epsilon(0.05)
///     .antithetic(true)
///     .build()
///     .expect("valid configuration");
///
/// assert_eq!(config.initial_samples(), 1000);
/// assert_eq!(config.max_refill(), 70_000);
/// ```
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MlmcConfig {
    initial_samples: usize,
    epsilon: f64,
    antithetic: bool,
    max_refill: usize,
    max_levels: usize,
}

impl MlmcConfig {
    /// Creates a new configuration builder.
    #[inline]
    pub fn builder() -> MlmcConfigBuilder {
        MlmcConfigBuilder::default()
    }

    /// Paths requested at a level the first time it is sampled (N₀).
    #[inline]
    pub fn initial_samples(&self) -> usize {
        self.initial_samples
    }

    /// Target root-mean-square accuracy ε.
    #[inline]
    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Whether levels ≥ 1 use the antithetic two-step scheme.
    #[inline]
    pub fn antithetic(&self) -> bool {
        self.antithetic
    }

    /// Cap on new paths per level per outer iteration.
    #[inline]
    pub fn max_refill(&self) -> usize {
        self.max_refill
    }

    /// Maximum number of levels (indices `0..max_levels`).
    #[inline]
    pub fn max_levels(&self) -> usize {
        self.max_levels
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - the initial sample count is below 2
    /// - ε is not positive and finite
    /// - the refill cap is zero
    /// - the level budget is below 3
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_samples < 2 {
            return Err(ConfigError::InvalidInitialSamples(self.initial_samples));
        }
        if !(self.epsilon.is_finite() && self.epsilon > 0.0) {
            return Err(ConfigError::InvalidEpsilon(self.epsilon));
        }
        if self.max_refill == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "max_refill",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_levels < MIN_LEVELS {
            return Err(ConfigError::InvalidParameter {
                name: "max_levels",
                reason: format!("must be at least {MIN_LEVELS}, got {}", self.max_levels),
            });
        }
        Ok(())
    }
}

/// Builder for [`MlmcConfig`].
#[derive(Clone, Debug)]
pub struct MlmcConfigBuilder {
    initial_samples: Option<usize>,
    epsilon: Option<f64>,
    antithetic: bool,
    max_refill: usize,
    max_levels: usize,
}

impl Default for MlmcConfigBuilder {
    fn default() -> Self {
        Self {
            initial_samples: None,
            epsilon: None,
            antithetic: false,
            max_refill: DEFAULT_MAX_REFILL,
            max_levels: DEFAULT_MAX_LEVELS,
        }
    }
}

impl MlmcConfigBuilder {
    /// Sets the initial per-level sample request N₀.
    #[inline]
    pub fn initial_samples(mut self, n0: usize) -> Self {
        self.initial_samples = Some(n0);
        self
    }

    /// Sets the target accuracy ε.
    #[inline]
    pub fn epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = Some(epsilon);
        self
    }

    /// Selects the antithetic two-step scheme on levels ≥ 1.
    #[inline]
    pub fn antithetic(mut self, antithetic: bool) -> Self {
        self.antithetic = antithetic;
        self
    }

    /// Overrides the per-iteration refill cap (default 70,000).
    #[inline]
    pub fn max_refill(mut self, max_refill: usize) -> Self {
        self.max_refill = max_refill;
        self
    }

    /// Overrides the level budget (default 20).
    #[inline]
    pub fn max_levels(mut self, max_levels: usize) -> Self {
        self.max_levels = max_levels;
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required value is missing or
    /// [`MlmcConfig::validate`] rejects the result.
    pub fn build(self) -> Result<MlmcConfig, ConfigError> {
        let initial_samples = self.initial_samples.ok_or(ConfigError::InvalidParameter {
            name: "initial_samples",
            reason: "must be specified".to_string(),
        })?;
        let epsilon = self.epsilon.ok_or(ConfigError::InvalidParameter {
            name: "epsilon",
            reason: "must be specified".to_string(),
        })?;

        let config = MlmcConfig {
            initial_samples,
            epsilon,
            antithetic: self.antithetic,
            max_refill: self.max_refill,
            max_levels: self.max_levels,
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = MlmcConfig::builder()
            .initial_samples(100)
            .epsilon(0.1)
            .build()
            .unwrap();

        assert_eq!(config.initial_samples(), 100);
        assert_eq!(config.epsilon(), 0.1);
        assert!(!config.antithetic());
        assert_eq!(config.max_refill(), DEFAULT_MAX_REFILL);
        assert_eq!(config.max_levels(), DEFAULT_MAX_LEVELS);
    }

    #[test]
    fn test_single_initial_sample_rejected() {
        let result = MlmcConfig::builder().initial_samples(1).epsilon(0.1).build();
        assert!(matches!(result, Err(ConfigError::InvalidInitialSamples(1))));
    }

    #[test]
    fn test_bad_epsilon_rejected() {
        for eps in [0.0, -0.5, f64::NAN, f64::INFINITY] {
            let result = MlmcConfig::builder().initial_samples(10).epsilon(eps).build();
            assert!(matches!(result, Err(ConfigError::InvalidEpsilon(_))));
        }
    }

    #[test]
    fn test_level_budget_floor() {
        let result = MlmcConfig::builder()
            .initial_samples(10)
            .epsilon(0.1)
            .max_levels(2)
            .build();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidParameter {
                name: "max_levels",
                ..
            })
        ));
    }

    #[test]
    fn test_zero_refill_rejected() {
        let result = MlmcConfig::builder()
            .initial_samples(10)
            .epsilon(0.1)
            .max_refill(0)
            .build();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidParameter {
                name: "max_refill",
                ..
            })
        ));
    }

    #[test]
    fn test_missing_epsilon() {
        let result = MlmcConfig::builder().initial_samples(10).build();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidParameter { name: "epsilon", .. })
        ));
    }
}
