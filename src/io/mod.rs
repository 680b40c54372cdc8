//! IO module - run files for the minimizer.

mod config;

pub use config::{EnsembleInput, ErrorsInput, ModelInput, RunInput, StructureInput, TargetInput};
