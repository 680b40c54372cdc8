//! Synthetic ensemble on a quadratic free-energy surface.
//!
//! The surface has a known minimum (Φ*, R*):
//!
//!   F(Φ, R) = F₀ + κ/2 Σ_q ‖Φ_q - Φ*_q‖² + k/2 Σ_i ‖R_i - R*_i‖²
//!
//! Error bars grow as the trial matrix drifts away from the matrix the
//! configurations were generated from, and the Kong-Liu effective sample
//! size decays as a Gaussian of that distance.

use nalgebra::{DMatrix, Matrix3, Vector3};
use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::Normal;
use crate::error::{Result, SschaError};
use crate::phonons::{check_blocks, DynamicalMatrix};
use super::Ensemble;

/// The exact surface behind a [`QuadraticEnsemble`].
#[derive(Debug, Clone)]
pub struct QuadraticSurface {
    /// Force constants at the minimum, one block per q-point
    pub target: Vec<DMatrix<Complex64>>,
    /// Equilibrium positions at the minimum (Å)
    pub target_coords: Vec<Vector3<f64>>,
    /// κ, curvature along the force constants
    pub curvature: f64,
    /// k, curvature along the atomic positions (Ry/Å²)
    pub stiffness: f64,
    /// F₀ (Ry per supercell)
    pub free_energy_offset: f64,
}

/// Gaussian noise drawn consistently with the reported error bars.
#[derive(Debug, Clone)]
struct Noise {
    rng: StdRng,
    gradient: Vec<DMatrix<Complex64>>,
    forces: Vec<Vector3<f64>>,
}

/// Ensemble whose estimators are evaluated on a [`QuadraticSurface`].
#[derive(Debug, Clone)]
pub struct QuadraticEnsemble {
    surface: QuadraticSurface,
    reference: DynamicalMatrix,
    current: DynamicalMatrix,
    n_configs: usize,
    temperature: f64,
    reference_temperature: f64,
    supercell: [usize; 3],
    gradient_error: f64,
    force_error: f64,
    free_energy_error: f64,
    weight_width: Option<f64>,
    stress: Option<Matrix3<f64>>,
    noise: Option<Noise>,
}

impl QuadraticEnsemble {
    /// Ensemble generated from `reference` at 0 K, Γ-point supercell.
    pub fn new(reference: DynamicalMatrix, surface: QuadraticSurface, n_configs: usize) -> Result<Self> {
        let dim = 3 * reference.n_atoms();
        check_blocks(&surface.target, reference.nq(), dim, "quadratic surface target")?;
        if surface.target_coords.len() != reference.n_atoms() {
            return Err(SschaError::mismatch(
                "quadratic surface positions",
                reference.n_atoms(),
                surface.target_coords.len(),
            ));
        }
        if n_configs == 0 {
            return Err(SschaError::Configuration("the ensemble needs at least one configuration".into()));
        }

        Ok(Self {
            surface,
            current: reference.clone(),
            reference,
            n_configs,
            temperature: 0.0,
            reference_temperature: 0.0,
            supercell: [1, 1, 1],
            gradient_error: 1e-6,
            force_error: 1e-6,
            free_energy_error: 1e-6,
            weight_width: None,
            stress: None,
            noise: None,
        })
    }

    /// Set the generation temperature; the current temperature follows it.
    pub fn with_temperature(mut self, t: f64) -> Self {
        self.temperature = t;
        self.reference_temperature = t;
        self
    }

    /// Set the supercell multiplicity.
    pub fn with_supercell(mut self, supercell: [usize; 3]) -> Self {
        self.supercell = supercell;
        self
    }

    /// Set the error bars of the gradient, forces and free energy at full sampling.
    pub fn with_errors(mut self, gradient: f64, forces: f64, free_energy: f64) -> Self {
        self.gradient_error = gradient;
        self.force_error = forces;
        self.free_energy_error = free_energy;
        self
    }

    /// Set the width of the Gaussian decay of the effective sample size.
    pub fn with_weight_width(mut self, width: f64) -> Self {
        self.weight_width = Some(width);
        self
    }

    /// Attach a stress tensor (Ry/bohr³).
    pub fn with_stress(mut self, stress: Matrix3<f64>) -> Self {
        self.stress = Some(stress);
        self
    }

    /// Add Gaussian noise to gradients and forces, redrawn at every weight update.
    pub fn with_noise(mut self, seed: u64) -> Result<Self> {
        let mut noise = Noise {
            rng: StdRng::seed_from_u64(seed),
            gradient: Vec::new(),
            forces: Vec::new(),
        };
        self.draw_noise(&mut noise)?;
        self.noise = Some(noise);
        Ok(self)
    }

    pub fn surface(&self) -> &QuadraticSurface {
        &self.surface
    }

    /// Squared distance between the current and the reference model.
    fn drift(&self) -> f64 {
        let fc: f64 = self.current.blocks.iter()
            .zip(self.reference.blocks.iter())
            .map(|(c, r)| (c - r).norm_squared())
            .sum();
        let pos: f64 = self.current.structure.coords.iter()
            .zip(self.reference.structure.coords.iter())
            .map(|(c, r)| (c - r).norm_squared())
            .sum();
        fc + pos
    }

    /// Inflation of the error bars due to reweighting.
    fn error_scale(&self) -> f64 {
        (self.n_configs as f64 / self.effective_sample_size()).sqrt()
    }

    fn draw_noise(&self, noise: &mut Noise) -> Result<()> {
        let scale = self.error_scale();
        let dim = 3 * self.current.n_atoms();

        let grad_dist = Normal::new(0.0, self.gradient_error * scale)
            .map_err(|e| SschaError::Configuration(format!("gradient noise: {}", e)))?;
        noise.gradient = (0..self.current.nq())
            .map(|_| {
                let m = DMatrix::<f64>::from_distribution(dim, dim, &grad_dist, &mut noise.rng);
                (&m + m.transpose()).map(|x| Complex64::new(0.5 * x, 0.0))
            })
            .collect();

        let force_dist = Normal::new(0.0, self.force_error * scale)
            .map_err(|e| SschaError::Configuration(format!("force noise: {}", e)))?;
        noise.forces = (0..self.current.n_atoms())
            .map(|_| Vector3::from_distribution(&force_dist, &mut noise.rng))
            .collect();
        Ok(())
    }
}

impl Ensemble for QuadraticEnsemble {
    fn preconditioned_gradient(
        &self,
        preconditioned: bool,
    ) -> Result<(Vec<DMatrix<Complex64>>, Vec<DMatrix<Complex64>>)> {
        let factor = if preconditioned { 1.0 } else { self.surface.curvature };
        let dim = 3 * self.current.n_atoms();
        let sigma = Complex64::new(self.gradient_error * self.error_scale(), 0.0);

        let mut grad: Vec<DMatrix<Complex64>> = self.current.blocks.iter()
            .zip(self.surface.target.iter())
            .map(|(phi, target)| (phi - target) * Complex64::new(factor, 0.0))
            .collect();
        if let Some(noise) = &self.noise {
            for (g, n) in grad.iter_mut().zip(noise.gradient.iter()) {
                *g += n;
            }
        }
        let err = (0..self.current.nq())
            .map(|_| DMatrix::<Complex64>::identity(dim, dim) * sigma)
            .collect();
        Ok((grad, err))
    }

    fn average_forces(&self) -> Result<(Vec<Vector3<f64>>, Vec<Vector3<f64>>)> {
        let sigma = self.force_error * self.error_scale();
        let mut forces: Vec<Vector3<f64>> = self.current.structure.coords.iter()
            .zip(self.surface.target_coords.iter())
            .map(|(r, target)| -(r - target) * self.surface.stiffness)
            .collect();
        if let Some(noise) = &self.noise {
            for (f, n) in forces.iter_mut().zip(noise.forces.iter()) {
                *f += n;
            }
        }
        let err = vec![Vector3::from_element(sigma); forces.len()];
        Ok((forces, err))
    }

    fn free_energy(&self) -> Result<(f64, f64)> {
        let fc: f64 = self.current.blocks.iter()
            .zip(self.surface.target.iter())
            .map(|(phi, target)| (phi - target).norm_squared())
            .sum();
        let pos: f64 = self.current.structure.coords.iter()
            .zip(self.surface.target_coords.iter())
            .map(|(r, target)| (r - target).norm_squared())
            .sum();

        let n_cells = self.supercell.iter().product::<usize>() as f64;
        let per_cell = self.surface.free_energy_offset
            + 0.5 * self.surface.curvature * fc
            + 0.5 * self.surface.stiffness * pos;
        Ok((per_cell * n_cells, self.free_energy_error * self.error_scale()))
    }

    fn effective_sample_size(&self) -> f64 {
        let n = self.n_configs as f64;
        match self.weight_width {
            Some(w) => n * (-self.drift() / (2.0 * w * w)).exp(),
            None => n,
        }
    }

    fn update_weights(&mut self, dynmat: &DynamicalMatrix, temperature: f64) -> Result<()> {
        check_blocks(&dynmat.blocks, self.reference.nq(), 3 * self.reference.n_atoms(), "reweighted matrix")?;
        self.current = dynmat.clone();
        self.temperature = temperature;

        if let Some(mut noise) = self.noise.take() {
            let drawn = self.draw_noise(&mut noise);
            self.noise = Some(noise);
            drawn?;
        }
        Ok(())
    }

    fn stress_tensor(&self, offset: &Matrix3<f64>) -> Result<(Matrix3<f64>, Matrix3<f64>)> {
        let stress = self.stress
            .ok_or_else(|| SschaError::Collaborator("the ensemble carries no stress tensors".into()))?;
        Ok((stress - offset, Matrix3::zeros()))
    }

    fn n_configs(&self) -> usize {
        self.n_configs
    }

    fn current_temperature(&self) -> f64 {
        self.temperature
    }

    fn reference_temperature(&self) -> f64 {
        self.reference_temperature
    }

    fn supercell(&self) -> [usize; 3] {
        self.supercell
    }

    fn has_stress(&self) -> bool {
        self.stress.is_some()
    }

    fn current_dyn(&self) -> &DynamicalMatrix {
        &self.current
    }

    fn reference_dyn(&self) -> &DynamicalMatrix {
        &self.reference
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use crate::tests::{dimer, dimer_surface};

    #[test]
    fn test_gradient_points_away_from_minimum() {
        let start = dimer(0.6, 1.0, 1.0);
        let ensemble = QuadraticEnsemble::new(start.clone(), dimer_surface(0.5, 2.0, 1.0), 100).unwrap();

        let (raw, err) = ensemble.preconditioned_gradient(false).unwrap();
        let (pre, _) = ensemble.preconditioned_gradient(true).unwrap();
        let diff = &start.blocks[0] - &ensemble.surface().target[0];
        assert_relative_eq!((&raw[0] - &diff * Complex64::new(2.0, 0.0)).norm(), 0.0, epsilon = 1e-12);
        assert_relative_eq!((&pre[0] - &diff).norm(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(err[0][(0, 0)].re, 1e-6, epsilon = 1e-15);
    }

    #[test]
    fn test_effective_sample_size_decays() {
        let start = dimer(0.5, 1.0, 1.0);
        let mut ensemble = QuadraticEnsemble::new(start, dimer_surface(0.5, 1.0, 1.0), 100)
            .unwrap()
            .with_weight_width(0.1);
        assert_relative_eq!(ensemble.effective_sample_size(), 100.0, epsilon = 1e-12);

        let moved = dimer(0.6, 1.0, 1.0);
        ensemble.update_weights(&moved, 0.0).unwrap();
        assert!(ensemble.effective_sample_size() < 50.0);

        // Error bars inflate with the lost statistics
        let (_, err) = ensemble.free_energy().unwrap();
        assert!(err > 1e-6);
    }

    #[test]
    fn test_noise_is_reproducible() {
        let start = dimer(0.6, 1.0, 1.0);
        let make = || {
            QuadraticEnsemble::new(start.clone(), dimer_surface(0.5, 1.0, 1.0), 100)
                .unwrap()
                .with_errors(1e-3, 1e-3, 1e-3)
                .with_noise(7)
                .unwrap()
        };
        let (g1, _) = make().preconditioned_gradient(false).unwrap();
        let (g2, _) = make().preconditioned_gradient(false).unwrap();
        assert_eq!(g1, g2);
        assert_relative_eq!((&g1[0] - g1[0].adjoint()).norm(), 0.0, epsilon = 1e-15);
    }

    #[test]
    fn test_stress_requires_data() {
        let start = dimer(0.5, 1.0, 1.0);
        let ensemble = QuadraticEnsemble::new(start.clone(), dimer_surface(0.5, 1.0, 1.0), 10).unwrap();
        assert!(!ensemble.has_stress());
        assert!(ensemble.stress_tensor(&Matrix3::zeros()).is_err());

        let ensemble = ensemble.with_stress(Matrix3::identity() * 2.0);
        let (stress, _) = ensemble.stress_tensor(&Matrix3::identity()).unwrap();
        assert_relative_eq!(stress[(0, 0)], 1.0, epsilon = 1e-12);
        assert_relative_eq!(stress[(0, 1)], 0.0, epsilon = 1e-12);
    }
}
