//! Minimizer module - the SSCHA free-energy minimization engine.
//!
//! Bottom-up: [`perform_root_step`] updates the dynamical matrix,
//! [`struct_preconditioner`] shapes the structure step, [`GradientAssembler`]
//! collects symmetric gradients from the ensemble, [`ConvergenceMonitor`]
//! decides when to stop and [`SschaMinimizer`] drives the loop.

mod config;
mod convergence;
mod driver;
mod gradient;
mod history;
mod hooks;
mod precond;
mod root_step;
mod state;

pub use config::{
    GradientOperator, MinimizationAlgorithm, MinimizerConfig, MinimizerInput, RootRepresentation, StressOffset,
};
pub use convergence::{check_imaginary_frequencies, ConvergenceMonitor, MinimizationStatus};
pub use driver::{MinimizationReport, SschaMinimizer};
pub use gradient::{trace_metric, GradientAssembler, GradientPair};
pub use history::MinimizationHistory;
pub use hooks::{GradientModifier, RunHooks, StepInfo, StepObserver};
pub use precond::{best_wyckoff_step, struct_preconditioner};
pub use root_step::{perform_root_step, root_matrix};
pub use state::MinimizerState;
