//! Error type shared by the minimizer and its collaborators.

use thiserror::Error;

/// Errors raised while setting up or running a minimization.
///
/// Imaginary frequencies and an exhausted ensemble are not errors: they end the
/// run with a [`crate::MinimizationStatus`] and the last good state restored.
#[derive(Error, Debug)]
pub enum SschaError {
    /// Invalid option value or a missing companion option.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Arrays whose shapes must agree do not.
    #[error("Dimension mismatch in {what}: expected {expected}, found {found}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    /// A selectable branch that has no implementation yet.
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// A numerical operation has no meaningful result (e.g. a singular operator).
    #[error("Numerical error: {0}")]
    Numerical(String),

    /// Failure reported by the ensemble or symmetry collaborator.
    #[error("Collaborator error: {0}")]
    Collaborator(String),

    /// I/O error when reading input files
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed YAML input
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Type alias for results across the crate
pub type Result<T> = std::result::Result<T, SschaError>;

impl SschaError {
    pub(crate) fn mismatch(what: &'static str, expected: usize, found: usize) -> Self {
        SschaError::DimensionMismatch { what, expected, found }
    }
}
