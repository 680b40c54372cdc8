//! Mutable state of a minimization.

use nalgebra::DMatrix;
use num_complex::Complex64;
use crate::phonons::DynamicalMatrix;

/// Everything a step changes, kept together so a rejected step is undone by
/// restoring a single snapshot.
#[derive(Debug, Clone)]
pub struct MinimizerState {
    /// Trial dynamical matrix, carrying the trial structure
    pub dynmat: DynamicalMatrix,
    /// Gradient of the last step, kept for conjugate-gradient style updates
    pub prev_grad: Option<Vec<DMatrix<Complex64>>>,
    /// Scale applied to `lambda_w` for the structure step
    pub struct_step: f64,
}

impl MinimizerState {
    pub fn new(dynmat: DynamicalMatrix) -> Self {
        Self {
            dynmat,
            prev_grad: None,
            struct_step: 1.0,
        }
    }
}
