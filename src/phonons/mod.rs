//! Phonons module - structure and dynamical-matrix representation.

mod structure;
mod dynmat;

pub use structure::Structure;
pub use dynmat::{DynamicalMatrix, check_blocks, translation_modes};
pub(crate) use dynmat::{hermitian_eigen, spectral_map};
