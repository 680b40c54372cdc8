//! Rust SSCHA - free-energy minimization in the stochastic self-consistent
//! harmonic approximation.
//!
//! The crate optimizes a trial harmonic model (a dynamical matrix plus the
//! atomic positions) against free-energy gradients estimated on a stochastic
//! ensemble. The ensemble and the crystal symmetries are collaborators seen
//! through the [`Ensemble`] and [`Symmetry`] traits.

pub mod error;
pub mod units;
pub mod phonons;
pub mod symmetry;
pub mod ensemble;
pub mod minimizer;
pub mod io;

// Re-export commonly used types at crate root
pub use error::{Result, SschaError};
pub use phonons::{DynamicalMatrix, Structure};
pub use symmetry::{AsrMode, SumRuleSymmetry, Symmetry};
pub use ensemble::{Ensemble, QuadraticEnsemble, QuadraticSurface};
pub use minimizer::{
    MinimizationHistory, MinimizationReport, MinimizationStatus, MinimizerConfig, RunHooks, SschaMinimizer,
};
pub use io::RunInput;
