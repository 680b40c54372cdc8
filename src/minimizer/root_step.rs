//! Minimization step in the root representation.
//!
//! Following Monacelli, Errea, Calandra, Mauri (PRB 2017) the step is taken
//! on a matrix root of the dynamical matrix rather than on Φ itself:
//!
//!   Φ → Φ^(1/x),  ∂F/∂Φ → ∂F/∂Φ^(1/x),  Φ^(1/x) → Φ^(1/x) - λ ∂F/∂Φ^(1/x),  Φ' = (Φ^(1/x))^x
//!
//! with x = 1, 2, 4 for the normal, sqrt and root4 representations. Squaring
//! the updated root keeps the new matrix positive semi-definite.

use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;
use crate::error::{Result, SschaError};
use crate::phonons::{hermitian_eigen, spectral_map};
use super::config::{MinimizationAlgorithm, RootRepresentation};

/// Relative size of a negative eigenvalue still accepted as numerical zero away from Γ.
const NEGATIVE_TOLERANCE: f64 = 1e-10;

/// Update every q block of `dyn_q` against `grad_q`.
///
/// At Γ (index 0) negative eigenvalues are set to zero before anything else,
/// so acoustic or marginally unstable branches are never amplified.
pub fn perform_root_step(
    dyn_q: &[DMatrix<Complex64>],
    grad_q: &[DMatrix<Complex64>],
    step_size: f64,
    representation: RootRepresentation,
    algorithm: MinimizationAlgorithm,
) -> Result<Vec<DMatrix<Complex64>>> {
    match algorithm {
        MinimizationAlgorithm::SteepestDescent => {}
        other => {
            return Err(SschaError::NotImplemented(format!(
                "the minimization algorithm {:?} is not implemented", other
            )));
        }
    }

    if dyn_q.len() != grad_q.len() {
        return Err(SschaError::mismatch("q-points of gradient and dynamical matrix", dyn_q.len(), grad_q.len()));
    }
    for (phi, grad) in dyn_q.iter().zip(grad_q.iter()) {
        if phi.shape() != grad.shape() {
            return Err(SschaError::mismatch("gradient block size", phi.nrows(), grad.nrows()));
        }
    }

    let step = Complex64::new(step_size, 0.0);
    if representation == RootRepresentation::Normal {
        return Ok(dyn_q.iter()
            .zip(grad_q.iter())
            .map(|(phi, grad)| phi - grad * step)
            .collect());
    }

    let mut new_dyn = Vec::with_capacity(dyn_q.len());
    for (iq, (phi, grad)) in dyn_q.iter().zip(grad_q.iter()).enumerate() {
        let (eigvals, eigvects) = regularized_eigen(phi, iq == 0)?;

        // Product rule for a matrix square: d(R²) = R dR + dR R
        let mut root = spectral_map(&eigvals, &eigvects, f64::sqrt);
        let mut root_grad = &root * grad + grad * &root;
        if representation == RootRepresentation::Root4 {
            root = spectral_map(&eigvals, &eigvects, |l| l.sqrt().sqrt());
            root_grad = &root * &root_grad + &root_grad * &root;
        }

        let mut updated = root - root_grad * step;
        updated = &updated * &updated;
        if representation == RootRepresentation::Root4 {
            updated = &updated * &updated;
        }
        new_dyn.push(updated);
    }
    Ok(new_dyn)
}

/// The root Φ^(1/x) of a single block, built from its eigen-decomposition.
///
/// With `at_gamma` negative eigenvalues are clamped to zero; elsewhere they are
/// an error unless they are rounding noise.
pub fn root_matrix(
    block: &DMatrix<Complex64>,
    representation: RootRepresentation,
    at_gamma: bool,
) -> Result<DMatrix<Complex64>> {
    if representation == RootRepresentation::Normal {
        return Ok(block.clone());
    }
    let (eigvals, eigvects) = regularized_eigen(block, at_gamma)?;
    let root = match representation {
        RootRepresentation::Root4 => spectral_map(&eigvals, &eigvects, |l| l.sqrt().sqrt()),
        _ => spectral_map(&eigvals, &eigvects, f64::sqrt),
    };
    Ok(root)
}

fn regularized_eigen(block: &DMatrix<Complex64>, at_gamma: bool) -> Result<(DVector<f64>, DMatrix<Complex64>)> {
    let (mut eigvals, eigvects) = hermitian_eigen(block);
    let scale = eigvals.iter().fold(0.0_f64, |m, l| m.max(l.abs()));

    for l in eigvals.iter_mut() {
        if *l >= 0.0 {
            continue;
        }
        if !at_gamma && *l < -NEGATIVE_TOLERANCE * scale {
            return Err(SschaError::Numerical(format!(
                "negative eigenvalue {:.6e} away from Γ has no real root", l
            )));
        }
        *l = 0.0;
    }
    Ok((eigvals, eigvects))
}
