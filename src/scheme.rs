//! Two-step fine-grid schemes used on levels ≥ 1.
//!
//! A level ℓ ≥ 1 advances its fine paths two sub-steps at a time, so the
//! caller can sum the two sub-step increments into one coarse increment.
//! [`Plain`] carries one fine branch per path; [`Antithetic`] carries a
//! second, mirrored branch that consumes the same two increments in swapped
//! order. Swapping leaves the summed coarse increment unchanged, so both
//! branches stay coupled to the same coarse path.

use ndarray::{Array1, Array2, ArrayView2, Axis};

use crate::sde::WealthModel;

/// Fine-grid state of a batch: `(paths, branches)` arrays of `W` and `X`.
#[derive(Clone, Debug)]
pub struct FineState {
    pub w: Array2<f64>,
    pub x: Array2<f64>,
}

impl FineState {
    /// Every branch of every path starts at `(w0, x0)`.
    pub fn new(paths: usize, branches: usize, w0: f64, x0: f64) -> Self {
        Self {
            w: Array2::from_elem((paths, branches), w0),
            x: Array2::from_elem((paths, branches), x0),
        }
    }

    /// Averages the branches into one fine value per path.
    pub fn terminal_wealth(&self) -> Array1<f64> {
        let branches = self.w.ncols() as f64;
        self.w.sum_axis(Axis(1)) / branches
    }
}

/// Capability to advance fine paths by two sub-steps.
pub trait TwoStepScheme {
    /// Fine branches carried per path.
    fn branches(&self) -> usize;

    /// Advances `state` by two sub-steps of size `h`.
    ///
    /// `dz1` and `dz2` are `(paths, 2)`; column `k` holds the increments of
    /// sub-step `k`.
    fn advance_two_step(
        &self,
        model: &WealthModel,
        h: f64,
        state: &mut FineState,
        dz1: ArrayView2<'_, f64>,
        dz2: ArrayView2<'_, f64>,
    );
}

/// One fine branch, sub-steps in drawn order.
#[derive(Clone, Copy, Debug, Default)]
pub struct Plain;

impl TwoStepScheme for Plain {
    fn branches(&self) -> usize {
        1
    }

    fn advance_two_step(
        &self,
        model: &WealthModel,
        h: f64,
        state: &mut FineState,
        dz1: ArrayView2<'_, f64>,
        dz2: ArrayView2<'_, f64>,
    ) {
        for k in 0..2 {
            model.advance(
                h,
                state.w.column_mut(0),
                state.x.column_mut(0),
                dz1.column(k),
                dz2.column(k),
            );
        }
    }
}

/// Primary branch plus its mirror with swapped sub-step increments.
#[derive(Clone, Copy, Debug, Default)]
pub struct Antithetic;

impl TwoStepScheme for Antithetic {
    fn branches(&self) -> usize {
        2
    }

    fn advance_two_step(
        &self,
        model: &WealthModel,
        h: f64,
        state: &mut FineState,
        dz1: ArrayView2<'_, f64>,
        dz2: ArrayView2<'_, f64>,
    ) {
        for (branch, order) in [(0, [0, 1]), (1, [1, 0])] {
            for k in order {
                model.advance(
                    h,
                    state.w.column_mut(branch),
                    state.x.column_mut(branch),
                    dz1.column(k),
                    dz2.column(k),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sde::tests::demo_params;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn model() -> WealthModel {
        WealthModel::new(demo_params()).unwrap()
    }

    #[test]
    fn test_plain_applies_both_substeps() {
        let model = model();
        let dz1 = array![[0.1, -0.3]];
        let dz2 = array![[0.2, 0.05]];
        let mut state = FineState::new(1, 1, 100.0, model.x0());

        Plain.advance_two_step(&model, 0.5, &mut state, dz1.view(), dz2.view());

        let (w, x) = model.step(100.0, model.x0(), 0.5, 0.1, 0.2);
        let (w, x) = model.step(w, x, 0.5, -0.3, 0.05);
        assert_relative_eq!(state.w[[0, 0]], w);
        assert_relative_eq!(state.x[[0, 0]], x);
    }

    #[test]
    fn test_antithetic_mirror_swaps_substeps() {
        let model = model();
        let dz1 = array![[0.1, -0.3]];
        let dz2 = array![[0.2, 0.05]];
        let mut state = FineState::new(1, 2, 100.0, model.x0());

        Antithetic.advance_two_step(&model, 0.5, &mut state, dz1.view(), dz2.view());

        let (w, x) = model.step(100.0, model.x0(), 0.5, -0.3, 0.05);
        let (w, x) = model.step(w, x, 0.5, 0.1, 0.2);
        assert_relative_eq!(state.w[[0, 1]], w);
        assert_relative_eq!(state.x[[0, 1]], x);
        assert!((state.w[[0, 0]] - state.w[[0, 1]]).abs() > 0.0);
    }

    #[test]
    fn test_branches_agree_without_noise() {
        let model = model();
        let zeros = Array2::zeros((4, 2));
        let mut state = FineState::new(4, 2, 100.0, model.x0());

        Antithetic.advance_two_step(&model, 1.0, &mut state, zeros.view(), zeros.view());

        for row in state.w.rows() {
            assert_relative_eq!(row[0], row[1]);
        }
        let averaged = state.terminal_wealth();
        assert_relative_eq!(averaged[0], state.w[[0, 0]]);
    }
}
