//! Symmetry module - crystal symmetries and the acoustic sum rule.
//!
//! The minimizer only talks to the [`Symmetry`] trait; the full space-group
//! engine lives outside this crate. [`SumRuleSymmetry`] covers the identity
//! group and enforces translational invariance.

mod sum_rule;

use nalgebra::{DMatrix, Vector3};
use num_complex::Complex64;
use crate::error::Result;

pub use sum_rule::SumRuleSymmetry;

/// Flavour of acoustic sum rule to impose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsrMode {
    /// Orthogonal projection out of the translational subspace
    Custom,
    /// As `Custom`, keeping the matrix real as crystal force constants at Γ are
    Crystal,
}

/// Symmetry collaborator used to keep gradients compatible with the crystal.
pub trait Symmetry {
    /// Symmetrize force constants over every star of q-points.
    fn symmetrize_fc_q(
        &self,
        blocks: &mut [DMatrix<Complex64>],
        q_stars: &[Vec<usize>],
        asr: AsrMode,
    ) -> Result<()>;

    /// Impose the acoustic sum rule on a single block.
    fn impose_sum_rule(&self, block: &mut DMatrix<Complex64>, asr: AsrMode) -> Result<()>;

    /// Symmetrize a per-atom vector field (forces, displacements).
    fn symmetrize_vector(&self, vectors: &mut [Vector3<f64>]) -> Result<()>;

    /// Prepare the q-point symmetries needed by `symmetrize_vector`.
    fn setup_q_point(&mut self) -> Result<()>;

    /// Number of symmetry operations of the small group of q.
    fn n_symmetries(&self) -> usize;
}
