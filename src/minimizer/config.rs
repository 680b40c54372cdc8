//! Minimizer settings.
//!
//! Everything here is read-only once the minimizer is built. The names follow
//! the `inputscha` namelist keywords so old input files translate one to one.

use std::fs;
use std::path::Path;
use std::str::FromStr;
use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};
use crate::error::{Result, SschaError};

/// Nonlinear change of variables used to take the step on the dynamical matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RootRepresentation {
    /// Step directly on Φ
    #[default]
    Normal,
    /// Step on Φ^(1/2)
    #[serde(alias = "root2")]
    Sqrt,
    /// Step on Φ^(1/4)
    Root4,
}

impl FromStr for RootRepresentation {
    type Err = SschaError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "normal" => Ok(RootRepresentation::Normal),
            "sqrt" | "root2" => Ok(RootRepresentation::Sqrt),
            "root4" => Ok(RootRepresentation::Root4),
            other => Err(SschaError::Configuration(format!(
                "root_representation is {}, must be one of normal, sqrt, root2, root4", other
            ))),
        }
    }
}

/// Update rule applied in the root variable.
///
/// Only steepest descent has an implementation; the others can be selected
/// but the step fails as soon as it is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MinimizationAlgorithm {
    #[default]
    #[serde(rename = "sdes", alias = "steepest-descent")]
    SteepestDescent,
    #[serde(rename = "cgrf", alias = "conjugate-gradient")]
    ConjugateGradient,
    /// Conjugate gradient when the gradient dominates its error, steepest descent otherwise
    #[serde(rename = "auto")]
    Auto,
}

/// Which gradient decides convergence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GradientOperator {
    /// Dynamical-matrix gradient only
    #[default]
    Gc,
    /// Structure gradient only
    Gw,
    /// Both
    All,
}

/// Stress subtracted from the ensemble stress tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StressOffset {
    /// Isotropic offset, times the identity
    Scalar(f64),
    /// Full tensor, row by row
    Tensor([[f64; 3]; 3]),
    /// A number written as text, or the path of a 3×3 table
    Text(String),
}

impl Default for StressOffset {
    fn default() -> Self {
        StressOffset::Scalar(0.0)
    }
}

impl StressOffset {
    /// Offset tensor in Ry/bohr³.
    pub fn resolve(&self) -> Result<Matrix3<f64>> {
        match self {
            StressOffset::Scalar(x) => Ok(Matrix3::identity() * *x),
            StressOffset::Tensor(rows) => Ok(Matrix3::from_fn(|i, j| rows[i][j])),
            StressOffset::Text(text) => match text.trim().parse::<f64>() {
                Ok(x) => Ok(Matrix3::identity() * x),
                Err(_) => read_tensor(Path::new(text)),
            },
        }
    }
}

/// Read a whitespace-separated 3×3 table.
fn read_tensor(path: &Path) -> Result<Matrix3<f64>> {
    if !path.exists() {
        return Err(SschaError::Configuration(format!(
            "the file {} specified as a stress_offset cannot be open", path.display()
        )));
    }
    let content = fs::read_to_string(path)?;
    let values: Vec<f64> = content.lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty())
        .flat_map(|line| line.split_whitespace())
        .map(|tok| tok.parse::<f64>().map_err(|e| {
            SschaError::Configuration(format!("bad value '{}' in {}: {}", tok, path.display(), e))
        }))
        .collect::<Result<_>>()?;

    if values.len() != 9 {
        return Err(SschaError::mismatch("stress_offset table entries", 9, values.len()));
    }
    Ok(Matrix3::from_row_slice(&values))
}

/// Parameters of one minimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinimizerConfig {
    pub root_representation: RootRepresentation,
    /// Stop when N_eff / N falls below this ratio
    pub kong_liu_ratio: f64,
    /// Converged when the gradient is below its error times this factor
    pub meaningful_factor: f64,
    pub minimization_algorithm: MinimizationAlgorithm,
    /// Step on the dynamical matrix
    pub lambda_a: f64,
    /// Step on the atomic positions
    pub lambda_w: f64,
    /// Precondition the structure gradient with the inverse force constants
    pub precond_wyck: bool,
    /// Ask the ensemble for the preconditioned dynamical-matrix gradient
    #[serde(alias = "preconditioning")]
    pub precond_dyn: bool,
    /// Relax the atomic positions together with the force constants
    pub minim_struct: bool,
    pub neglect_symmetries: bool,
    /// Maximum number of steps, unbounded when not positive
    pub max_ka: i64,
    pub gradi_op: GradientOperator,
    pub stress_offset: StressOffset,
    /// Subtracted from every reported free energy (Ry)
    pub eq_energy: f64,
}

impl Default for MinimizerConfig {
    fn default() -> Self {
        Self {
            root_representation: RootRepresentation::Normal,
            kong_liu_ratio: 0.5,
            meaningful_factor: 0.1,
            minimization_algorithm: MinimizationAlgorithm::SteepestDescent,
            lambda_a: 1.0,
            lambda_w: 1.0,
            precond_wyck: true,
            precond_dyn: true,
            minim_struct: true,
            neglect_symmetries: false,
            max_ka: -1,
            gradi_op: GradientOperator::Gc,
            stress_offset: StressOffset::default(),
            eq_energy: 0.0,
        }
    }
}

impl MinimizerConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.kong_liu_ratio > 0.0 && self.kong_liu_ratio <= 1.0) {
            return Err(SschaError::Configuration(format!(
                "kong_liu_ratio must be in (0, 1], got {}", self.kong_liu_ratio
            )));
        }
        let positive = [
            ("meaningful_factor", self.meaningful_factor),
            ("lambda_a", self.lambda_a),
            ("lambda_w", self.lambda_w),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(SschaError::Configuration(format!("{} must be positive, got {}", name, value)));
            }
        }
        if !self.eq_energy.is_finite() {
            return Err(SschaError::Configuration("eq_energy must be finite".into()));
        }
        Ok(())
    }

    /// Step budget, `None` when unbounded.
    pub fn max_steps(&self) -> Option<usize> {
        if self.max_ka > 0 {
            Some(self.max_ka as usize)
        } else {
            None
        }
    }
}

/// Namelist-style input: the settings plus keywords that only make sense together.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MinimizerInput {
    #[serde(flatten)]
    pub config: MinimizerConfig,
    /// Minimum Kong-Liu effective sample size (needs `n_random`)
    pub n_random_eff: Option<f64>,
    /// Number of configurations in the ensemble
    pub n_random: Option<usize>,
}

impl MinimizerInput {
    pub fn into_config(self) -> Result<MinimizerConfig> {
        let mut config = self.config;
        if let Some(n_eff) = self.n_random_eff {
            let n_random = self.n_random.ok_or_else(|| SschaError::Configuration(
                "to impose the minimum KL effective sample size, n_random must be given too".into()
            ))?;
            if n_random == 0 {
                return Err(SschaError::Configuration("n_random must be positive".into()));
            }
            config.kong_liu_ratio = n_eff / n_random as f64;
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn parse(yaml: &str) -> Result<MinimizerConfig> {
        let input: MinimizerInput = serde_yaml::from_str(yaml)?;
        input.into_config()
    }

    #[test]
    fn test_defaults() {
        let config = parse("{}").unwrap();
        assert_eq!(config, MinimizerConfig::default());
        assert_eq!(config.max_steps(), None);
    }

    #[test]
    fn test_namelist_keywords() {
        let config = parse(
            "root_representation: root2\n\
             minimization_algorithm: cgrf\n\
             preconditioning: false\n\
             gradi_op: all\n\
             max_ka: 20\n\
             lambda_a: 0.5\n",
        ).unwrap();
        assert_eq!(config.root_representation, RootRepresentation::Sqrt);
        assert_eq!(config.minimization_algorithm, MinimizationAlgorithm::ConjugateGradient);
        assert!(!config.precond_dyn);
        assert_eq!(config.gradi_op, GradientOperator::All);
        assert_eq!(config.max_steps(), Some(20));
        assert_relative_eq!(config.lambda_a, 0.5);
    }

    #[test]
    fn test_unknown_gradi_op_is_rejected() {
        assert!(matches!(parse("gradi_op: gx\n"), Err(SschaError::Yaml(_))));
        assert!("sqrt4".parse::<RootRepresentation>().is_err());
        assert_eq!("root2".parse::<RootRepresentation>().unwrap(), RootRepresentation::Sqrt);
    }

    #[test]
    fn test_kong_liu_needs_companion() {
        assert!(matches!(parse("n_random_eff: 50\n"), Err(SschaError::Configuration(_))));
        let config = parse("n_random_eff: 50\nn_random: 200\n").unwrap();
        assert_relative_eq!(config.kong_liu_ratio, 0.25);
    }

    #[test]
    fn test_invalid_values() {
        assert!(parse("kong_liu_ratio: 1.5\n").is_err());
        assert!(parse("meaningful_factor: 0\n").is_err());
        assert!(parse("lambda_w: -1\n").is_err());
    }

    #[test]
    fn test_stress_offset_forms() {
        let scalar = parse("stress_offset: 2.0\n").unwrap().stress_offset.resolve().unwrap();
        assert_relative_eq!(scalar, Matrix3::identity() * 2.0);

        let text = parse("stress_offset: \"0.5\"\n").unwrap().stress_offset.resolve().unwrap();
        assert_relative_eq!(text, Matrix3::identity() * 0.5);

        let tensor = parse("stress_offset: [[1, 2, 3], [4, 5, 6], [7, 8, 9]]\n")
            .unwrap().stress_offset.resolve().unwrap();
        assert_relative_eq!(tensor[(0, 1)], 2.0);
        assert_relative_eq!(tensor[(2, 0)], 7.0);

        let path = std::env::temp_dir().join("rust_sscha_stress_offset.dat");
        fs::write(&path, "# offset\n1 0 0\n0 2 0\n0 0 3\n").unwrap();
        let from_file = StressOffset::Text(path.display().to_string()).resolve().unwrap();
        assert_relative_eq!(from_file, Matrix3::from_diagonal(&nalgebra::Vector3::new(1.0, 2.0, 3.0)));
        fs::remove_file(&path).unwrap();

        let missing = StressOffset::Text("/nonexistent/offset.dat".into()).resolve();
        assert!(matches!(missing, Err(SschaError::Configuration(_))));
    }
}
