//! Preconditioning of the structure gradient.
//!
//! Φ is in Ry/bohr² while forces are in Ry/Å, so both the preconditioner and
//! the fallback step come out in Å²/Ry.

use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;
use crate::error::{Result, SschaError};
use crate::phonons::{hermitian_eigen, translation_modes, DynamicalMatrix};
use crate::units::BOHR_TO_ANGSTROM;

/// Largest eigenvalue, relative to the spectrum scale, still taken as zero.
const STIFFNESS_TOLERANCE: f64 = 1e-10;

/// Pseudo-inverse of the Γ force constants with the translations projected out:
///
///   Φ⁻¹_αβ = 1/sqrt(Mα Mβ) Σ_μ e_μ^α e_μ^β / ω_μ²
///
/// The sum runs over non-translational modes. Applied to the forces it turns
/// the structure gradient into an approximate Newton step.
pub fn struct_preconditioner(dynmat: &DynamicalMatrix) -> Result<DMatrix<f64>> {
    let (freqs, pols) = dynmat.diagonalize(0)?;
    let masses = &dynmat.structure.masses;
    let trans = translation_modes(&pols, masses);
    let dim = pols.nrows();

    // Sum u u† over whole degenerate subspaces so the eigenvector phases drop out
    let mut precond = DMatrix::<Complex64>::zeros(dim, dim);
    for (mu, _) in trans.iter().enumerate().filter(|(_, t)| !**t) {
        let w2 = freqs[mu] * freqs[mu];
        if w2 == 0.0 {
            return Err(SschaError::Numerical(format!(
                "mode {} has zero frequency but is not a translation", mu
            )));
        }
        let u = DVector::from_fn(dim, |a, _| pols[(a, mu)] / masses[a / 3].sqrt());
        precond += (&u * u.adjoint()) * Complex64::new(1.0 / w2, 0.0);
    }

    Ok(precond.map(|z| z.re) * BOHR_TO_ANGSTROM.powi(2))
}

/// Scalar structure step 1 / max λ(Φ) at the reference cell.
///
/// Used in place of [`struct_preconditioner`] to keep the step commensurate
/// with the stiffest mode.
pub fn best_wyckoff_step(dynmat: &DynamicalMatrix) -> Result<f64> {
    let (eigvals, _) = hermitian_eigen(&dynmat.blocks[0]);
    let stiffest = eigvals.max();
    if !(stiffest > STIFFNESS_TOLERANCE * eigvals.amax()) {
        return Err(SschaError::Numerical(format!(
            "the force constants have no positive eigenvalue (max {:.6e})", stiffest
        )));
    }
    Ok(BOHR_TO_ANGSTROM.powi(2) / stiffest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use crate::phonons::Structure;
    use crate::symmetry::{AsrMode, SumRuleSymmetry, Symmetry};
    use crate::tests::dimer;
    use nalgebra::{Matrix3, Vector3};

    /// Three atoms with sum-rule force constants and positive optical modes.
    fn trimer() -> DynamicalMatrix {
        let structure = Structure::new(
            vec!["A".into(), "B".into(), "C".into()],
            vec![Vector3::zeros(), Vector3::new(1.0, 0.0, 0.0), Vector3::new(0.0, 1.2, 0.0)],
            vec![1.0, 2.5, 4.0],
            Matrix3::identity() * 5.0,
        ).unwrap();
        let b = DMatrix::from_fn(9, 9, |i, j| Complex64::new(((i * 5 + j * 11) % 7) as f64 * 0.1, 0.0));
        let mut block = &b * b.transpose() + DMatrix::identity(9, 9);
        SumRuleSymmetry::new(3).impose_sum_rule(&mut block, AsrMode::Crystal).unwrap();
        DynamicalMatrix::gamma_only(structure, block).unwrap()
    }

    #[test]
    fn test_precond_symmetric_and_positive() {
        for dynmat in [dimer(0.5, 1.0, 3.0), trimer()] {
            let p = struct_preconditioner(&dynmat).unwrap();
            let asym = (&p - p.transpose()).amax();
            assert!(asym < 1e-10, "asymmetry {}", asym);

            let eig = p.clone().symmetric_eigen();
            assert!(eig.eigenvalues.min() > -1e-10);
        }
    }

    #[test]
    fn test_precond_is_pseudo_inverse() {
        let dynmat = trimer();
        let phi = dynmat.blocks[0].map(|z| z.re);
        let p = struct_preconditioner(&dynmat).unwrap() / BOHR_TO_ANGSTROM.powi(2);
        assert_relative_eq!((&phi * &p * &phi - &phi).amax(), 0.0, epsilon = 1e-8);
    }

    #[test]
    fn test_precond_ignores_translations() {
        let dynmat = dimer(0.5, 2.0, 2.0);
        let p = struct_preconditioner(&dynmat).unwrap();
        let uniform = DVector::from_vec(vec![1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
        assert_relative_eq!((&p * uniform).norm(), 0.0, epsilon = 1e-10);
    }

    #[test]
    fn test_best_wyckoff_step() {
        let step = best_wyckoff_step(&dimer(0.5, 1.0, 1.0)).unwrap();
        assert_relative_eq!(step, BOHR_TO_ANGSTROM.powi(2), epsilon = 1e-10);
        assert!(best_wyckoff_step(&dimer(-0.5, 1.0, 1.0)).is_err());
    }

    #[test]
    fn test_best_wyckoff_step_rejects_rounding_noise() {
        // Largest eigenvalue is zero up to rounding
        let mut dynmat = dimer(-0.5, 1.0, 1.0);
        dynmat.blocks[0][(0, 0)] += Complex64::new(1e-16, 0.0);
        let err = best_wyckoff_step(&dynmat);
        assert!(matches!(err, Err(SschaError::Numerical(_))), "got {:?}", err);

        // An all-zero matrix has no stiff mode either
        assert!(best_wyckoff_step(&dimer(0.0, 1.0, 1.0)).is_err());
    }
}
