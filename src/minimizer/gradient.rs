//! Assembly of the free-energy gradients for one step.

use nalgebra::{DMatrix, DVector, Vector3};
use num_complex::Complex64;
use crate::ensemble::Ensemble;
use crate::error::{Result, SschaError};
use crate::phonons::{check_blocks, DynamicalMatrix};
use crate::symmetry::{AsrMode, Symmetry};
use super::config::MinimizerConfig;
use super::history::MinimizationHistory;
use super::hooks::GradientModifier;
use super::precond::struct_preconditioner;

/// Gradients with respect to the dynamical matrix and the atomic positions.
#[derive(Debug, Clone)]
pub struct GradientPair {
    pub dyn_grad: Vec<DMatrix<Complex64>>,
    pub dyn_grad_err: Vec<DMatrix<Complex64>>,
    /// Zero when the structure is not relaxed
    pub struct_grad: Vec<Vector3<f64>>,
    pub struct_grad_err: Vec<Vector3<f64>>,
}

/// Collects the gradients from the ensemble and makes them symmetric.
pub struct GradientAssembler<'a> {
    config: &'a MinimizerConfig,
}

impl<'a> GradientAssembler<'a> {
    pub fn new(config: &'a MinimizerConfig) -> Self {
        Self { config }
    }

    /// Gradients at the matrix the ensemble weights refer to.
    ///
    /// Appends the structure gradient modulus and the dynamical-matrix
    /// metric Re Σ_q tr(G_q G_q), each with its error, to `history`.
    pub fn assemble<E, S>(
        &self,
        ensemble: &E,
        symmetry: &mut S,
        dynmat: &DynamicalMatrix,
        history: &mut MinimizationHistory,
        modifier: Option<&mut (dyn GradientModifier + '_)>,
    ) -> Result<GradientPair>
    where
        E: Ensemble + ?Sized,
        S: Symmetry + ?Sized,
    {
        let (mut dyn_grad, mut dyn_grad_err) = ensemble.preconditioned_gradient(self.config.precond_dyn)?;
        let dim = 3 * dynmat.n_atoms();
        check_blocks(&dyn_grad, dynmat.nq(), dim, "dynamical-matrix gradient")?;
        check_blocks(&dyn_grad_err, dynmat.nq(), dim, "dynamical-matrix gradient error")?;

        if self.config.neglect_symmetries {
            for block in dyn_grad.iter_mut().chain(dyn_grad_err.iter_mut()) {
                symmetry.impose_sum_rule(block, AsrMode::Custom)?;
            }
        } else {
            symmetry.symmetrize_fc_q(&mut dyn_grad, &dynmat.q_stars, AsrMode::Custom)?;
            symmetry.symmetrize_fc_q(&mut dyn_grad_err, &dynmat.q_stars, AsrMode::Crystal)?;
        }

        let nat = dynmat.n_atoms();
        let (mut struct_grad, struct_grad_err) = if self.config.minim_struct {
            self.structure_gradient(ensemble, symmetry, dynmat)?
        } else {
            (vec![Vector3::zeros(); nat], vec![Vector3::zeros(); nat])
        };

        if let Some(modifier) = modifier {
            modifier.modify(&mut dyn_grad, &mut struct_grad);
            check_blocks(&dyn_grad, dynmat.nq(), dim, "dynamical-matrix gradient after the hook")?;
            if struct_grad.len() != nat {
                return Err(SschaError::mismatch("structure gradient after the hook", nat, struct_grad.len()));
            }
        }

        if self.config.minim_struct {
            let gw = struct_grad.iter().map(|v| v.norm_squared()).sum::<f64>().sqrt();
            let gw_err = (struct_grad_err.iter().map(|v| v.norm_squared()).sum::<f64>()
                / symmetry.n_symmetries().max(1) as f64).sqrt();
            history.push_struct_gradient(gw, gw_err);
        } else {
            history.push_struct_gradient(0.0, 0.0);
        }
        history.push_dyn_gradient(trace_metric(&dyn_grad), trace_metric(&dyn_grad_err));

        Ok(GradientPair { dyn_grad, dyn_grad_err, struct_grad, struct_grad_err })
    }

    /// Minus the average forces, turned into a Newton-like step if requested.
    fn structure_gradient<E, S>(
        &self,
        ensemble: &E,
        symmetry: &mut S,
        dynmat: &DynamicalMatrix,
    ) -> Result<(Vec<Vector3<f64>>, Vec<Vector3<f64>>)>
    where
        E: Ensemble + ?Sized,
        S: Symmetry + ?Sized,
    {
        let nat = dynmat.n_atoms();
        let (forces, forces_err) = ensemble.average_forces()?;
        if forces.len() != nat || forces_err.len() != nat {
            return Err(SschaError::mismatch("average forces", nat, forces.len().min(forces_err.len())));
        }

        let mut grad = DVector::from_iterator(3 * nat, forces.iter().flat_map(|f| [-f.x, -f.y, -f.z]));
        let mut err = DVector::from_iterator(3 * nat, forces_err.iter().flat_map(|f| [f.x, f.y, f.z]));

        if self.config.precond_wyck {
            let precond = struct_preconditioner(ensemble.current_dyn())?;
            grad = &precond * grad;
            // Independent components: σ'_i² = Σ_j P_ij² σ_j²
            err = precond.map(|p| p * p) * err.map(|s| s * s);
            err.apply(|s| *s = s.sqrt());
        }

        let mut struct_grad = unflatten(&grad);
        let mut struct_grad_err = unflatten(&err);
        if !self.config.neglect_symmetries {
            symmetry.setup_q_point()?;
            symmetry.symmetrize_vector(&mut struct_grad)?;
            symmetry.symmetrize_vector(&mut struct_grad_err)?;
        }
        Ok((struct_grad, struct_grad_err))
    }
}

/// Re Σ_q tr(A_q A_q), the squared modulus of a Hermitian gradient.
pub fn trace_metric(blocks: &[DMatrix<Complex64>]) -> f64 {
    blocks.iter()
        .map(|a| a.component_mul(&a.transpose()).sum().re)
        .sum()
}

fn unflatten(v: &DVector<f64>) -> Vec<Vector3<f64>> {
    v.as_slice()
        .chunks_exact(3)
        .map(Vector3::from_column_slice)
        .collect()
}
