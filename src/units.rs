//! Unit conversion factors (Rydberg atomic units).

/// Rydberg to cm⁻¹
pub const RY_TO_CM: f64 = 109691.40235;
/// Rydberg to meV
pub const RY_TO_MEV: f64 = 13605.698066;
/// Ry/bohr³ to GPa
pub const RY_BOHR3_TO_GPA: f64 = 14710.513242194795;
/// Kelvin to Rydberg (Boltzmann constant)
pub const K_TO_RY: f64 = 6.336857346553283e-06;
/// Bohr radius in Å
pub const BOHR_TO_ANGSTROM: f64 = 0.52917721067;
