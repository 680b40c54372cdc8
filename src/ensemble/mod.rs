//! Ensemble module - the stochastic estimators the minimizer consumes.
//!
//! The real ensemble of configurations (loading, force evaluation,
//! reweighting) lives outside this crate. The minimizer sees it through the
//! [`Ensemble`] trait; [`QuadraticEnsemble`] is a synthetic surface with a
//! known minimum, used by the CLI demo and the tests.

mod quadratic;

use nalgebra::{DMatrix, Matrix3, Vector3};
use num_complex::Complex64;
use crate::error::Result;
use crate::phonons::DynamicalMatrix;

pub use quadratic::{QuadraticEnsemble, QuadraticSurface};

/// Statistical estimators over a population of configurations.
///
/// All estimators refer to the dynamical matrix passed to the last
/// `update_weights` call. Free energies are per supercell.
pub trait Ensemble {
    /// Free-energy gradient with respect to the dynamical matrix and its error.
    fn preconditioned_gradient(
        &self,
        preconditioned: bool,
    ) -> Result<(Vec<DMatrix<Complex64>>, Vec<DMatrix<Complex64>>)>;

    /// Average forces on the atoms and their error.
    fn average_forces(&self) -> Result<(Vec<Vector3<f64>>, Vec<Vector3<f64>>)>;

    /// Free energy and its error (Ry).
    fn free_energy(&self) -> Result<(f64, f64)>;

    /// Kong-Liu effective sample size.
    fn effective_sample_size(&self) -> f64;

    /// Recompute the importance-sampling weights for a new trial matrix.
    fn update_weights(&mut self, dynmat: &DynamicalMatrix, temperature: f64) -> Result<()>;

    /// Stress tensor and its error (Ry/bohr³), with `offset` subtracted.
    fn stress_tensor(&self, offset: &Matrix3<f64>) -> Result<(Matrix3<f64>, Matrix3<f64>)>;

    /// Number of configurations in the population.
    fn n_configs(&self) -> usize;

    fn current_temperature(&self) -> f64;

    /// Temperature the configurations were generated at.
    fn reference_temperature(&self) -> f64;

    fn supercell(&self) -> [usize; 3];

    fn has_stress(&self) -> bool;

    /// Matrix the weights currently refer to.
    fn current_dyn(&self) -> &DynamicalMatrix;

    /// Matrix the configurations were generated from.
    fn reference_dyn(&self) -> &DynamicalMatrix;
}
