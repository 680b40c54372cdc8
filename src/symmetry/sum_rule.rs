//! Identity-group symmetry with the acoustic sum rule.

use nalgebra::{DMatrix, Vector3};
use num_complex::Complex64;
use crate::error::{Result, SschaError};
use super::{AsrMode, Symmetry};

/// Symmetry engine for a crystal whose only operation is the identity.
///
/// Every block is kept Hermitian and the Γ block is projected onto the
/// subspace orthogonal to the three uniform translations:
///
///   Φ ← P Φ P,  P = 1 - Σ_α t̂_α t̂_αᵀ
#[derive(Debug, Clone)]
pub struct SumRuleSymmetry {
    n_atoms: usize,
    q_ready: bool,
}

impl SumRuleSymmetry {
    pub fn new(n_atoms: usize) -> Self {
        Self { n_atoms, q_ready: false }
    }

    fn projector(&self) -> DMatrix<Complex64> {
        let dim = 3 * self.n_atoms;
        let weight = 1.0 / self.n_atoms as f64;
        DMatrix::from_fn(dim, dim, |i, j| {
            let delta = if i == j { 1.0 } else { 0.0 };
            let trans = if i % 3 == j % 3 { weight } else { 0.0 };
            Complex64::new(delta - trans, 0.0)
        })
    }
}

impl Symmetry for SumRuleSymmetry {
    fn symmetrize_fc_q(
        &self,
        blocks: &mut [DMatrix<Complex64>],
        q_stars: &[Vec<usize>],
        asr: AsrMode,
    ) -> Result<()> {
        for &iq in q_stars.iter().flatten() {
            let block = blocks.get_mut(iq)
                .ok_or_else(|| SschaError::Collaborator(format!("q-star index {} out of range", iq)))?;
            let hermitian = (&*block + block.adjoint()) * Complex64::new(0.5, 0.0);
            *block = hermitian;
        }
        if q_stars.iter().flatten().any(|&iq| iq == 0) {
            self.impose_sum_rule(&mut blocks[0], asr)?;
        }
        Ok(())
    }

    fn impose_sum_rule(&self, block: &mut DMatrix<Complex64>, asr: AsrMode) -> Result<()> {
        let dim = 3 * self.n_atoms;
        if block.nrows() != dim || block.ncols() != dim {
            return Err(SschaError::mismatch("sum rule block", dim, block.nrows()));
        }
        let p = self.projector();
        let projected = &p * &*block * &p;
        *block = match asr {
            AsrMode::Custom => projected,
            AsrMode::Crystal => projected.map(|z| Complex64::new(z.re, 0.0)),
        };
        Ok(())
    }

    fn symmetrize_vector(&self, vectors: &mut [Vector3<f64>]) -> Result<()> {
        if !self.q_ready {
            return Err(SschaError::Collaborator("setup_q_point must run before symmetrize_vector".into()));
        }
        if vectors.len() != self.n_atoms {
            return Err(SschaError::mismatch("symmetrized vector", self.n_atoms, vectors.len()));
        }
        Ok(())
    }

    fn setup_q_point(&mut self) -> Result<()> {
        self.q_ready = true;
        Ok(())
    }

    fn n_symmetries(&self) -> usize {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn random_hermitian(dim: usize) -> DMatrix<Complex64> {
        let m = DMatrix::from_fn(dim, dim, |i, j| {
            Complex64::new((i * 7 + j * 3) as f64 * 0.1 + 1.0, (i as f64 - j as f64) * 0.05)
        });
        (&m + m.adjoint()) * Complex64::new(0.5, 0.0)
    }

    #[test]
    fn test_sum_rule_kills_translations() {
        let sym = SumRuleSymmetry::new(3);
        let mut block = random_hermitian(9);
        sym.impose_sum_rule(&mut block, AsrMode::Custom).unwrap();

        for row in 0..9 {
            for beta in 0..3 {
                let total: Complex64 = (0..3).map(|j| block[(row, 3 * j + beta)]).sum();
                assert_relative_eq!(total.norm(), 0.0, epsilon = 1e-12);
            }
        }
        assert_relative_eq!((&block - block.adjoint()).norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_projection_is_idempotent() {
        let sym = SumRuleSymmetry::new(2);
        let mut once = random_hermitian(6);
        sym.impose_sum_rule(&mut once, AsrMode::Custom).unwrap();
        let mut twice = once.clone();
        sym.impose_sum_rule(&mut twice, AsrMode::Custom).unwrap();
        assert_relative_eq!((once - twice).norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_crystal_mode_is_real() {
        let sym = SumRuleSymmetry::new(2);
        let mut block = random_hermitian(6);
        sym.impose_sum_rule(&mut block, AsrMode::Crystal).unwrap();
        assert!(block.iter().all(|z| z.im == 0.0));
    }

    #[test]
    fn test_symmetrize_fc_q_hermitizes() {
        let sym = SumRuleSymmetry::new(1);
        let skew = DMatrix::from_fn(3, 3, |i, j| Complex64::new(i as f64 - j as f64, 0.0));
        let mut blocks = vec![DMatrix::zeros(3, 3), skew];
        sym.symmetrize_fc_q(&mut blocks, &[vec![0], vec![1]], AsrMode::Custom).unwrap();
        assert_relative_eq!(blocks[1].norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_vector_needs_q_setup() {
        let mut sym = SumRuleSymmetry::new(2);
        let mut forces = vec![Vector3::new(1.0, 0.0, 0.0); 2];
        assert!(sym.symmetrize_vector(&mut forces).is_err());
        sym.setup_q_point().unwrap();
        sym.symmetrize_vector(&mut forces).unwrap();
        assert_eq!(sym.n_symmetries(), 1);
    }
}
