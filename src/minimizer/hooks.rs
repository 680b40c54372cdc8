//! Caller-supplied hooks around each minimization step.
//!
//! A [`GradientModifier`] may rewrite the gradients in place before the step
//! (e.g. to keep some atoms fixed). A [`StepObserver`] only looks.

use nalgebra::{DMatrix, Vector3};
use num_complex::Complex64;
use super::history::MinimizationHistory;
use super::state::MinimizerState;

/// Mutates the dynamical-matrix and structure gradients in place.
///
/// Array shapes must be left untouched; the assembler checks them afterwards.
pub trait GradientModifier {
    fn modify(&mut self, dyn_grad: &mut [DMatrix<Complex64>], struct_grad: &mut [Vector3<f64>]);
}

impl<F> GradientModifier for F
where
    F: FnMut(&mut [DMatrix<Complex64>], &mut [Vector3<f64>]),
{
    fn modify(&mut self, dyn_grad: &mut [DMatrix<Complex64>], struct_grad: &mut [Vector3<f64>]) {
        self(dyn_grad, struct_grad)
    }
}

/// Read-only view handed to observers.
#[derive(Debug, Clone, Copy)]
pub struct StepInfo<'a> {
    /// Steps completed so far
    pub iteration: usize,
    pub state: &'a MinimizerState,
    pub history: &'a MinimizationHistory,
}

/// Called before or after every step. Cannot influence the run.
pub trait StepObserver {
    fn observe(&mut self, info: &StepInfo<'_>);
}

impl<F> StepObserver for F
where
    F: FnMut(&StepInfo<'_>),
{
    fn observe(&mut self, info: &StepInfo<'_>) {
        self(info)
    }
}

/// Optional hooks for [`super::SschaMinimizer::run`].
#[derive(Default)]
pub struct RunHooks<'a> {
    pub pre: Option<&'a mut dyn StepObserver>,
    pub post: Option<&'a mut dyn StepObserver>,
    pub gradient: Option<&'a mut dyn GradientModifier>,
}
