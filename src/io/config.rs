//! YAML run files.
//!
//! A run file has a `minimizer` section with the namelist keywords and a
//! `model` section with the starting structure, its force constants and the
//! quadratic surface the synthetic ensemble samples:
//!
//! ```yaml
//! minimizer:
//!   lambda_a: 1.0
//!   max_ka: 50
//! model:
//!   structure:
//!     atoms: [A, B]
//!     coords: [[0, 0, 0], [1, 0, 0]]
//!     masses: [1.0, 1.0]
//!     unit_cell: [[5, 0, 0], [0, 5, 0], [0, 0, 5]]
//!   force_constants:
//!     - [[...], ...]        # one real 3N×3N matrix per q-point
//!   target:
//!     force_constants: [...]
//!     coords: [[0, 0, 0], [1, 0, 0]]
//!   ensemble:
//!     n_configs: 100
//! ```

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use nalgebra::{DMatrix, Matrix3, Vector3};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use crate::ensemble::{QuadraticEnsemble, QuadraticSurface};
use crate::error::{Result, SschaError};
use crate::minimizer::{MinimizerInput, SschaMinimizer};
use crate::phonons::{DynamicalMatrix, Structure};
use crate::symmetry::SumRuleSymmetry;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureInput {
    pub atoms: Vec<String>,
    /// Cartesian positions (Å)
    pub coords: Vec<[f64; 3]>,
    /// Masses (Ry units)
    pub masses: Vec<f64>,
    /// Lattice vectors as rows (Å)
    pub unit_cell: [[f64; 3]; 3],
}

/// Minimum of the quadratic free-energy surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetInput {
    pub force_constants: Vec<Vec<Vec<f64>>>,
    pub coords: Vec<[f64; 3]>,
    #[serde(default = "one")]
    pub curvature: f64,
    #[serde(default = "one")]
    pub stiffness: f64,
    /// Free energy at the minimum (Ry per supercell)
    #[serde(default)]
    pub free_energy: f64,
}

/// Error bars of the estimators at full sampling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorsInput {
    pub gradient: f64,
    pub forces: f64,
    pub free_energy: f64,
}

impl Default for ErrorsInput {
    fn default() -> Self {
        Self { gradient: 1e-6, forces: 1e-6, free_energy: 1e-6 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleInput {
    pub n_configs: usize,
    #[serde(default)]
    pub temperature: f64,
    #[serde(default = "gamma_supercell")]
    pub supercell: [usize; 3],
    #[serde(default)]
    pub errors: ErrorsInput,
    /// Width of the Gaussian decay of the Kong-Liu size, no decay when absent
    pub weight_width: Option<f64>,
    /// Stress tensor (Ry/bohr³)
    pub stress: Option<[[f64; 3]; 3]>,
    /// Seed of the statistical noise, noiseless when absent
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInput {
    pub structure: StructureInput,
    /// Cartesian q-points (2π/Å), Γ only when absent
    pub q_points: Option<Vec<[f64; 3]>>,
    /// Stars of equivalent q-points, every q on its own when absent
    pub q_stars: Option<Vec<Vec<usize>>>,
    /// Starting force constants (Ry/bohr²), one real matrix per q-point
    pub force_constants: Vec<Vec<Vec<f64>>>,
    pub target: TargetInput,
    pub ensemble: EnsembleInput,
}

/// Content of a run file.
#[derive(Debug, Clone, Deserialize)]
pub struct RunInput {
    #[serde(default)]
    pub minimizer: MinimizerInput,
    pub model: ModelInput,
}

fn one() -> f64 {
    1.0
}

fn gamma_supercell() -> [usize; 3] {
    [1, 1, 1]
}

impl RunInput {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_yaml::from_reader(reader)?)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Build the minimizer on a quadratic ensemble with the sum-rule symmetry.
    pub fn into_minimizer(self) -> Result<SschaMinimizer<QuadraticEnsemble, SumRuleSymmetry>> {
        let config = self.minimizer.into_config()?;
        let model = self.model;

        let structure = Structure::new(
            model.structure.atoms,
            model.structure.coords.iter().map(|r| Vector3::from(*r)).collect(),
            model.structure.masses,
            Matrix3::from_fn(|i, j| model.structure.unit_cell[i][j]),
        )?;
        let nat = structure.n_atoms();

        let q_points: Vec<Vector3<f64>> = match model.q_points {
            Some(qs) => qs.iter().map(|q| Vector3::from(*q)).collect(),
            None => vec![Vector3::zeros()],
        };
        let q_stars = model.q_stars.unwrap_or_else(|| (0..q_points.len()).map(|iq| vec![iq]).collect());
        let blocks = to_blocks(&model.force_constants, 3 * nat)?;
        let reference = DynamicalMatrix::new(structure, q_points, q_stars, blocks)?;

        let surface = QuadraticSurface {
            target: to_blocks(&model.target.force_constants, 3 * nat)?,
            target_coords: model.target.coords.iter().map(|r| Vector3::from(*r)).collect(),
            curvature: model.target.curvature,
            stiffness: model.target.stiffness,
            free_energy_offset: model.target.free_energy,
        };

        let sampling = model.ensemble;
        let mut ensemble = QuadraticEnsemble::new(reference, surface, sampling.n_configs)?
            .with_temperature(sampling.temperature)
            .with_supercell(sampling.supercell)
            .with_errors(sampling.errors.gradient, sampling.errors.forces, sampling.errors.free_energy);
        if let Some(width) = sampling.weight_width {
            ensemble = ensemble.with_weight_width(width);
        }
        if let Some(stress) = sampling.stress {
            ensemble = ensemble.with_stress(Matrix3::from_fn(|i, j| stress[i][j]));
        }
        if let Some(seed) = sampling.seed {
            ensemble = ensemble.with_noise(seed)?;
        }

        SschaMinimizer::new(ensemble, SumRuleSymmetry::new(nat), config)
    }
}

/// Nested real matrices to complex q blocks.
fn to_blocks(matrices: &[Vec<Vec<f64>>], dim: usize) -> Result<Vec<DMatrix<Complex64>>> {
    matrices.iter()
        .map(|rows| {
            if rows.len() != dim {
                return Err(SschaError::mismatch("force-constant rows", dim, rows.len()));
            }
            if let Some(row) = rows.iter().find(|row| row.len() != dim) {
                return Err(SschaError::mismatch("force-constant columns", dim, row.len()));
            }
            Ok(DMatrix::from_fn(dim, dim, |i, j| Complex64::new(rows[i][j], 0.0)))
        })
        .collect()
}
