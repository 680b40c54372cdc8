//! Atomic structure: positions, masses and lattice.

use nalgebra::{Matrix3, Vector3};
use crate::error::{Result, SschaError};

/// A periodic atomic structure.
///
/// Positions are Cartesian in Å, masses in Rydberg units and the rows of
/// `unit_cell` are the lattice vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct Structure {
    pub atoms: Vec<String>,
    pub coords: Vec<Vector3<f64>>,
    pub masses: Vec<f64>,
    pub unit_cell: Matrix3<f64>,
}

impl Structure {
    pub fn new(
        atoms: Vec<String>,
        coords: Vec<Vector3<f64>>,
        masses: Vec<f64>,
        unit_cell: Matrix3<f64>,
    ) -> Result<Self> {
        let nat = atoms.len();
        if coords.len() != nat {
            return Err(SschaError::mismatch("structure coordinates", nat, coords.len()));
        }
        if masses.len() != nat {
            return Err(SschaError::mismatch("structure masses", nat, masses.len()));
        }
        if let Some(m) = masses.iter().find(|m| **m <= 0.0) {
            return Err(SschaError::Configuration(format!("atomic masses must be positive, got {}", m)));
        }
        Ok(Self { atoms, coords, masses, unit_cell })
    }

    pub fn n_atoms(&self) -> usize {
        self.atoms.len()
    }

    /// Lattice translations of every cell in a supercell, `i` slowest and `k` fastest.
    pub fn cell_shifts(&self, supercell: [usize; 3]) -> Vec<Vector3<f64>> {
        let a1: Vector3<f64> = self.unit_cell.row(0).transpose();
        let a2: Vector3<f64> = self.unit_cell.row(1).transpose();
        let a3: Vector3<f64> = self.unit_cell.row(2).transpose();

        let mut shifts = Vec::with_capacity(supercell.iter().product());
        for i in 0..supercell[0] {
            for j in 0..supercell[1] {
                for k in 0..supercell[2] {
                    shifts.push(a1 * i as f64 + a2 * j as f64 + a3 * k as f64);
                }
            }
        }
        shifts
    }

    /// Replicate the cell. Atom `a` of cell `c` lands at index `c * n_atoms + a`.
    pub fn generate_supercell(&self, supercell: [usize; 3]) -> Structure {
        let shifts = self.cell_shifts(supercell);
        let mut atoms = Vec::with_capacity(shifts.len() * self.n_atoms());
        let mut coords = Vec::with_capacity(shifts.len() * self.n_atoms());
        let mut masses = Vec::with_capacity(shifts.len() * self.n_atoms());

        for shift in shifts.iter() {
            for i in 0..self.n_atoms() {
                atoms.push(self.atoms[i].clone());
                coords.push(self.coords[i] + shift);
                masses.push(self.masses[i]);
            }
        }

        let mut unit_cell = self.unit_cell;
        for (axis, &n) in supercell.iter().enumerate() {
            let scaled = unit_cell.row(axis) * n as f64;
            unit_cell.set_row(axis, &scaled);
        }

        Structure { atoms, coords, masses, unit_cell }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_supercell_ordering() {
        let s = Structure::new(
            vec!["H".into(), "D".into()],
            vec![Vector3::zeros(), Vector3::new(0.5, 0.0, 0.0)],
            vec![1.0, 2.0],
            Matrix3::identity() * 2.0,
        ).unwrap();

        let sc = s.generate_supercell([2, 1, 1]);
        assert_eq!(sc.n_atoms(), 4);
        assert_eq!(sc.atoms[3], "D");
        assert_relative_eq!(sc.coords[3].x, 2.5, epsilon = 1e-12);
        assert_relative_eq!(sc.masses[2], 1.0, epsilon = 1e-12);
        assert_relative_eq!(sc.unit_cell[(0, 0)], 4.0, epsilon = 1e-12);
        assert_relative_eq!(sc.unit_cell[(1, 1)], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rejects_inconsistent_lengths() {
        let err = Structure::new(
            vec!["H".into()],
            vec![Vector3::zeros(), Vector3::zeros()],
            vec![1.0],
            Matrix3::identity(),
        );
        assert!(matches!(err, Err(SschaError::DimensionMismatch { .. })));
    }
}
