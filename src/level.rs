//! Level hierarchy and per-level path sampling.
//!
//! Level ℓ runs `2^ℓ` fine steps. Level 0 has no coarse partner; on levels
//! ℓ ≥ 1 each path is simulated on the fine grid and on a coarse grid with
//! twice the step size, both driven by the same Brownian increments.

use ndarray::{Array1, Axis};
use tracing::debug;

use crate::error::MlmcError;
use crate::scheme::{FineState, TwoStepScheme};
use crate::sde::{IncrementSource, WealthModel};

/// Running moment sums over every path drawn at one level.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LevelSums {
    /// Σ (fine − coarse)
    pub diff: f64,
    /// Σ (fine − coarse)²
    pub diff_sq: f64,
    /// Σ fine
    pub fine: f64,
    /// Σ fine²
    pub fine_sq: f64,
}

impl LevelSums {
    fn from_paths(fine: &Array1<f64>, coarse: Option<&Array1<f64>>) -> Self {
        let diff = match coarse {
            Some(coarse) => fine - coarse,
            None => fine.clone(),
        };
        Self {
            diff: diff.sum(),
            diff_sq: diff.mapv(|d| d * d).sum(),
            fine: fine.sum(),
            fine_sq: fine.mapv(|f| f * f).sum(),
        }
    }

    fn is_finite(&self) -> bool {
        self.diff.is_finite()
            && self.diff_sq.is_finite()
            && self.fine.is_finite()
            && self.fine_sq.is_finite()
    }
}

impl std::ops::AddAssign for LevelSums {
    fn add_assign(&mut self, rhs: Self) {
        self.diff += rhs.diff;
        self.diff_sq += rhs.diff_sq;
        self.fine += rhs.fine;
        self.fine_sq += rhs.fine_sq;
    }
}

/// Contribution of one sampling batch at one level.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LevelBatch {
    pub paths: usize,
    pub sums: LevelSums,
    pub cost: f64,
}

/// Unbiased sample variance from a sum and a sum of squares.
fn sample_variance(sum: f64, sum_sq: f64, n: usize, level: usize) -> Result<f64, MlmcError> {
    if n < 2 {
        return Err(MlmcError::InsufficientSamples { level, samples: n });
    }
    let n = n as f64;
    let mean = sum / n;
    Ok(sum_sq / (n - 1.0) - mean * mean * n / (n - 1.0))
}

/// One rung of the hierarchy.
#[derive(Clone, Debug, PartialEq)]
pub struct Level {
    index: usize,
    steps: usize,
    samples: usize,
    sums: LevelSums,
    pending: usize,
    cost: f64,
}

impl Level {
    fn new(index: usize, pending: usize) -> Self {
        Self {
            index,
            steps: 1 << index,
            samples: 0,
            sums: LevelSums::default(),
            pending,
            cost: 0.0,
        }
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Fine steps at this level (`2^ℓ`).
    #[inline]
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Paths accumulated so far (N_ℓ).
    #[inline]
    pub fn samples(&self) -> usize {
        self.samples
    }

    #[inline]
    pub fn sums(&self) -> &LevelSums {
        &self.sums
    }

    /// Paths still requested before the next re-evaluation (dN_ℓ).
    #[inline]
    pub fn pending(&self) -> usize {
        self.pending
    }

    #[inline]
    pub fn set_pending(&mut self, pending: usize) {
        self.pending = pending;
    }

    /// Cost spent at this level so far.
    #[inline]
    pub fn cost(&self) -> f64 {
        self.cost
    }

    /// Mean of the fine − coarse difference. Zero before any path is drawn.
    pub fn mean(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.sums.diff / self.samples as f64
        }
    }

    /// Sample variance of the fine − coarse difference (V_ℓ).
    pub fn variance(&self) -> Result<f64, MlmcError> {
        sample_variance(self.sums.diff, self.sums.diff_sq, self.samples, self.index)
    }

    /// Sample variance of the fine terminal value.
    pub fn raw_variance(&self) -> Result<f64, MlmcError> {
        sample_variance(self.sums.fine, self.sums.fine_sq, self.samples, self.index)
    }

    /// Folds a batch into the running accumulators and clears the request.
    pub fn absorb(&mut self, batch: LevelBatch) -> Result<(), MlmcError> {
        if !batch.sums.is_finite() {
            return Err(MlmcError::NonFinite { level: self.index });
        }
        self.samples += batch.paths;
        self.sums += batch.sums;
        self.cost += batch.cost;
        self.pending = 0;
        Ok(())
    }
}

/// Ordered, growable sequence of levels `0..=L`.
#[derive(Clone, Debug, PartialEq)]
pub struct LevelHierarchy {
    levels: Vec<Level>,
}

impl LevelHierarchy {
    /// A single level 0 with `initial` paths requested.
    pub fn new(initial: usize) -> Self {
        Self {
            levels: vec![Level::new(0, initial)],
        }
    }

    /// Appends level `L + 1` with empty accumulators and `initial` paths requested.
    pub fn push_level(&mut self, initial: usize) -> &Level {
        let index = self.levels.len();
        self.levels.push(Level::new(index, initial));
        &self.levels[index]
    }

    /// Index of the finest level (L).
    #[inline]
    pub fn finest(&self) -> usize {
        self.levels.len() - 1
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    #[inline]
    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    #[inline]
    pub fn levels_mut(&mut self) -> &mut [Level] {
        &mut self.levels
    }

    /// Σ dN_ℓ
    pub fn total_pending(&self) -> usize {
        self.levels.iter().map(Level::pending).sum()
    }
}

/// Simulates `paths` coupled fine/coarse paths at `level`.
///
/// Cost is `2 · paths` on level 0 and `2 · paths · (branches · M_f + M_c)`
/// above it, where `M_f = 2^ℓ` and `M_c = 2^(ℓ-1)`.
pub fn sample_level<S, I>(
    level: usize,
    paths: usize,
    model: &WealthModel,
    scheme: &S,
    source: &mut I,
) -> LevelBatch
where
    S: TwoStepScheme + ?Sized,
    I: IncrementSource + ?Sized,
{
    let t = model.horizon();
    let m_fine = 1_usize << level;
    let h_fine = t / m_fine as f64;
    let sq_h_fine = h_fine.sqrt();

    if level == 0 {
        let mut w = Array1::from_elem(paths, model.w0());
        let mut x = Array1::from_elem(paths, model.x0());
        let dz1 = source.draw(paths, 1, sq_h_fine);
        let dz2 = source.draw(paths, 1, sq_h_fine);
        model.advance(
            h_fine,
            w.view_mut(),
            x.view_mut(),
            dz1.column(0),
            dz2.column(0),
        );

        return LevelBatch {
            paths,
            sums: LevelSums::from_paths(&w, None),
            cost: 2.0 * paths as f64,
        };
    }

    let m_coarse = m_fine / 2;
    let h_coarse = t / m_coarse as f64;
    let branches = scheme.branches();

    let mut fine = FineState::new(paths, branches, model.w0(), model.x0());
    let mut w_coarse = Array1::from_elem(paths, model.w0());
    let mut x_coarse = Array1::from_elem(paths, model.x0());

    for _ in 0..m_coarse {
        let dz1 = source.draw(paths, 2, sq_h_fine);
        let dz2 = source.draw(paths, 2, sq_h_fine);

        scheme.advance_two_step(model, h_fine, &mut fine, dz1.view(), dz2.view());

        let dz1_coarse = dz1.sum_axis(Axis(1));
        let dz2_coarse = dz2.sum_axis(Axis(1));
        model.advance(
            h_coarse,
            w_coarse.view_mut(),
            x_coarse.view_mut(),
            dz1_coarse.view(),
            dz2_coarse.view(),
        );
    }

    let w_fine = fine.terminal_wealth();
    let cost = 2.0 * paths as f64 * (branches * m_fine + m_coarse) as f64;
    debug!(level, paths, cost, "sampled level batch");

    LevelBatch {
        paths,
        sums: LevelSums::from_paths(&w_fine, Some(&w_coarse)),
        cost,
    }
}
