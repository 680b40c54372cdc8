//! Dynamical matrix in reciprocal space.
//!
//! The blocks hold the Fourier-transformed force constants Φ(q) in Ry/bohr².
//! Frequencies come from the mass-scaled matrix D(q) = Φ(q) / sqrt(Mα Mβ):
//!
//!   ω = sign(λ) sqrt(|λ|),  λ eigenvalue of D(q)
//!
//! so an unstable mode shows up as a negative frequency.

use std::f64::consts::PI;
use nalgebra::{DMatrix, DVector, Vector3};
use num_complex::Complex64;
use crate::error::{Result, SschaError};
use crate::units::K_TO_RY;
use super::Structure;

/// Frequencies at or below this value (Ry) carry no free energy.
const ZERO_FREQUENCY: f64 = 1e-8;
/// Relative tolerance for two atoms to move by the same displacement.
const TRANSLATION_TOLERANCE: f64 = 1e-6;

/// Force constants indexed by q-point, together with the structure they refer to.
///
/// Index 0 of `q_points` and `blocks` is always the zone center.
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicalMatrix {
    pub structure: Structure,
    /// Cartesian q-points in 2π/Å
    pub q_points: Vec<Vector3<f64>>,
    /// Stars of symmetry-equivalent q-points (indices into `q_points`)
    pub q_stars: Vec<Vec<usize>>,
    /// One 3N×3N Hermitian block per q-point
    pub blocks: Vec<DMatrix<Complex64>>,
}

impl DynamicalMatrix {
    pub fn new(
        structure: Structure,
        q_points: Vec<Vector3<f64>>,
        q_stars: Vec<Vec<usize>>,
        blocks: Vec<DMatrix<Complex64>>,
    ) -> Result<Self> {
        if q_points.is_empty() {
            return Err(SschaError::Configuration("a dynamical matrix needs at least the Γ point".into()));
        }
        if q_points[0].norm() > 1e-10 {
            return Err(SschaError::Configuration("the first q-point must be Γ".into()));
        }
        check_blocks(&blocks, q_points.len(), 3 * structure.n_atoms(), "dynamical matrix")?;
        if let Some(&iq) = q_stars.iter().flatten().find(|&&iq| iq >= q_points.len()) {
            return Err(SschaError::Configuration(format!(
                "q-star index {} out of range ({} q-points)", iq, q_points.len()
            )));
        }
        Ok(Self { structure, q_points, q_stars, blocks })
    }

    /// A matrix defined only at the zone center.
    pub fn gamma_only(structure: Structure, block: DMatrix<Complex64>) -> Result<Self> {
        Self::new(structure, vec![Vector3::zeros()], vec![vec![0]], vec![block])
    }

    pub fn n_atoms(&self) -> usize {
        self.structure.n_atoms()
    }

    pub fn nq(&self) -> usize {
        self.blocks.len()
    }

    /// Frequencies (ascending, Ry) and polarization vectors (columns) at `iq`.
    pub fn diagonalize(&self, iq: usize) -> Result<(DVector<f64>, DMatrix<Complex64>)> {
        let block = self.blocks.get(iq)
            .ok_or_else(|| SschaError::mismatch("q-point index", self.nq(), iq))?;
        let masses = &self.structure.masses;

        let dim = block.nrows();
        let scaled = DMatrix::from_fn(dim, dim, |i, j| {
            block[(i, j)] / (masses[i / 3] * masses[j / 3]).sqrt()
        });

        let (eigvals, pols) = hermitian_eigen(&scaled);
        let freqs = eigvals.map(|l| l.signum() * l.abs().sqrt());
        Ok((freqs, pols))
    }

    /// Real-space force constants of the supercell, returned as a Γ-only matrix.
    ///
    /// The q-points must form the full grid commensurate with `supercell`:
    ///
    ///   Φ(Ia, Jb) = 1/Nq Σ_q Φ_ab(q) exp(2πi q·(R_J - R_I))
    ///
    /// with q in 2π/Å and the lattice shifts R in Å.
    pub fn generate_supercell_dyn(&self, supercell: [usize; 3]) -> Result<DynamicalMatrix> {
        let n_cells: usize = supercell.iter().product();
        if n_cells != self.nq() {
            return Err(SschaError::mismatch("q grid for the supercell", n_cells, self.nq()));
        }

        let dim = 3 * self.n_atoms();
        let shifts = self.structure.cell_shifts(supercell);
        let norm = Complex64::new(1.0 / n_cells as f64, 0.0);
        let mut fc = DMatrix::<Complex64>::zeros(dim * n_cells, dim * n_cells);

        for (ci, ri) in shifts.iter().enumerate() {
            for (cj, rj) in shifts.iter().enumerate() {
                let r = rj - ri;
                let mut block = DMatrix::<Complex64>::zeros(dim, dim);
                for (q, phi) in self.q_points.iter().zip(self.blocks.iter()) {
                    block += phi * Complex64::from_polar(1.0, 2.0 * PI * q.dot(&r));
                }
                let block = (block * norm).map(|z| Complex64::new(z.re, 0.0));
                fc.view_mut((ci * dim, cj * dim), (dim, dim)).copy_from(&block);
            }
        }

        DynamicalMatrix::gamma_only(self.structure.generate_supercell(supercell), fc)
    }

    /// Harmonic free energy (Ry) summed over all q-points at `temperature` (K).
    ///
    /// Translations and unstable modes are left out.
    pub fn harmonic_free_energy(&self, temperature: f64) -> Result<f64> {
        let kt = K_TO_RY * temperature;
        let mut free_energy = 0.0;
        for iq in 0..self.nq() {
            let (freqs, _) = self.diagonalize(iq)?;
            for &w in freqs.iter().filter(|&&w| w > ZERO_FREQUENCY) {
                free_energy += 0.5 * w;
                if kt > 0.0 {
                    free_energy += kt * (-(-w / kt).exp()).ln_1p();
                }
            }
        }
        Ok(free_energy)
    }
}

/// Check that `blocks` holds `nq` square blocks of size `dim`.
pub fn check_blocks(blocks: &[DMatrix<Complex64>], nq: usize, dim: usize, what: &'static str) -> Result<()> {
    if blocks.len() != nq {
        return Err(SschaError::mismatch(what, nq, blocks.len()));
    }
    for block in blocks.iter() {
        if block.nrows() != dim {
            return Err(SschaError::mismatch(what, dim, block.nrows()));
        }
        if block.ncols() != dim {
            return Err(SschaError::mismatch(what, dim, block.ncols()));
        }
    }
    Ok(())
}

/// Flag the modes that rigidly translate the whole cell.
///
/// `pols` holds mass-scaled polarization vectors as columns; the mode is a
/// translation when every atom is displaced by the same vector.
pub fn translation_modes(pols: &DMatrix<Complex64>, masses: &[f64]) -> Vec<bool> {
    let nat = masses.len();
    pols.column_iter()
        .map(|mode| {
            let disp: Vec<[Complex64; 3]> = (0..nat)
                .map(|i| {
                    let s = 1.0 / masses[i].sqrt();
                    [mode[3 * i] * s, mode[3 * i + 1] * s, mode[3 * i + 2] * s]
                })
                .collect();

            let scale = disp.iter()
                .map(|d| d.iter().map(|c| c.norm_sqr()).sum::<f64>().sqrt())
                .fold(0.0, f64::max);
            if scale == 0.0 {
                return false;
            }

            disp.iter().all(|d| {
                (0..3).all(|a| (d[a] - disp[0][a]).norm() < TRANSLATION_TOLERANCE * scale)
            })
        })
        .collect()
}

/// Eigen-decomposition of a Hermitian matrix, eigenvalues ascending.
pub(crate) fn hermitian_eigen(block: &DMatrix<Complex64>) -> (DVector<f64>, DMatrix<Complex64>) {
    let eigen = block.clone().symmetric_eigen();
    let n = eigen.eigenvalues.len();

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| eigen.eigenvalues[a].total_cmp(&eigen.eigenvalues[b]));

    let values = DVector::from_iterator(n, order.iter().map(|&i| eigen.eigenvalues[i]));
    let vectors = DMatrix::from_fn(n, n, |r, c| eigen.eigenvectors[(r, order[c])]);
    (values, vectors)
}

/// Rebuild Σ f(λ) v v† from an eigen-decomposition.
pub(crate) fn spectral_map<F>(values: &DVector<f64>, vectors: &DMatrix<Complex64>, f: F) -> DMatrix<Complex64>
where
    F: Fn(f64) -> f64,
{
    let mut scaled = vectors.clone();
    for (mut col, &l) in scaled.column_iter_mut().zip(values.iter()) {
        col *= Complex64::new(f(l), 0.0);
    }
    scaled * vectors.adjoint()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use crate::tests::dimer;

    #[test]
    fn test_diagonalize_sorted_and_mass_scaled() {
        let dynmat = dimer(0.5, 1.0, 4.0);
        let (w, pols) = dynmat.diagonalize(0).unwrap();

        // Three translations then the optical triplet at k (1/m1 + 1/m2)
        let optical = (0.5_f64 * (1.0 + 0.25)).sqrt();
        for i in 0..3 {
            assert_relative_eq!(w[i], 0.0, epsilon = 1e-7);
            assert_relative_eq!(w[i + 3], optical, epsilon = 1e-10);
        }
        let trans = translation_modes(&pols, &dynmat.structure.masses);
        assert_eq!(trans, vec![true, true, true, false, false, false]);
    }

    #[test]
    fn test_negative_eigenvalue_gives_negative_frequency() {
        let dynmat = dimer(-0.2, 1.0, 1.0);
        let (w, pols) = dynmat.diagonalize(0).unwrap();
        assert_relative_eq!(w[0], -(0.4_f64).sqrt(), epsilon = 1e-10);
        let trans = translation_modes(&pols, &dynmat.structure.masses);
        assert_eq!(trans.iter().filter(|t| **t).count(), 3);
        assert!(!trans[0]);
    }

    #[test]
    fn test_gamma_supercell_is_identity() {
        let dynmat = dimer(0.5, 1.0, 2.0);
        let sc = dynmat.generate_supercell_dyn([1, 1, 1]).unwrap();
        assert_eq!(sc.blocks[0], dynmat.blocks[0]);
        assert_eq!(sc.structure, dynmat.structure);
    }

    #[test]
    fn test_supercell_requires_full_grid() {
        let dynmat = dimer(0.5, 1.0, 2.0);
        let err = dynmat.generate_supercell_dyn([2, 1, 1]);
        assert!(matches!(err, Err(SschaError::DimensionMismatch { .. })));
    }

    /// Monoatomic chain along x with nearest-neighbour springs, Φ(q) = 2k(1 - cos 2πqa),
    /// on the Γ and zone-boundary points of a two-cell supercell.
    fn chain(k: f64, a: f64) -> DynamicalMatrix {
        let structure = Structure::new(
            vec!["X".into()],
            vec![Vector3::zeros()],
            vec![1.0],
            nalgebra::Matrix3::identity() * a,
        ).unwrap();

        let block_at = |q: f64| {
            let v = 2.0 * k * (1.0 - (2.0 * PI * q * a).cos());
            DMatrix::from_diagonal(&DVector::from_element(3, Complex64::new(v, 0.0)))
        };
        let q_x = 1.0 / (2.0 * a);
        DynamicalMatrix::new(
            structure,
            vec![Vector3::zeros(), Vector3::new(q_x, 0.0, 0.0)],
            vec![vec![0], vec![1]],
            vec![block_at(0.0), block_at(q_x)],
        ).unwrap()
    }

    #[test]
    fn test_two_cell_supercell_preserves_sum_rule() {
        let k = 0.3;
        let sc = chain(k, 2.0).generate_supercell_dyn([2, 1, 1]).unwrap();
        let fc = &sc.blocks[0];
        assert_eq!(fc.nrows(), 6);

        // Rows sum to zero over atoms for each Cartesian pair
        for row in 0..6 {
            let total: f64 = (0..2).map(|j| fc[(row, 3 * j + row % 3)].re).sum();
            assert_relative_eq!(total, 0.0, epsilon = 1e-12);
        }
        assert_relative_eq!(fc[(0, 0)].re, 2.0 * k, epsilon = 1e-12);
        assert_relative_eq!(fc[(0, 3)].re, -2.0 * k, epsilon = 1e-12);
        assert_relative_eq!((fc - fc.adjoint()).norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_two_cell_supercell_modes() {
        let k = 0.3;
        let sc = chain(k, 2.0).generate_supercell_dyn([2, 1, 1]).unwrap();
        let (w, pols) = sc.diagonalize(0).unwrap();

        // Acoustic triplet from Γ, zone-boundary triplet at sqrt(4k)
        let trans = translation_modes(&pols, &sc.structure.masses);
        assert_eq!(trans, vec![true, true, true, false, false, false]);
        for i in 3..6 {
            assert_relative_eq!(w[i], (4.0 * k).sqrt(), epsilon = 1e-10);
        }
    }

    #[test]
    fn test_harmonic_free_energy() {
        // Soft spring so that the thermal term is not lost next to ω/2 at 300 K
        let dynmat = dimer(1e-5, 1.0, 1.0);
        let (w, _) = dynmat.diagonalize(0).unwrap();
        let optical: Vec<f64> = w.iter().copied().filter(|w| *w > 1e-8).collect();
        assert_eq!(optical.len(), 3);

        let zero_point: f64 = optical.iter().map(|w| 0.5 * w).sum();
        assert_relative_eq!(dynmat.harmonic_free_energy(0.0).unwrap(), zero_point, epsilon = 1e-12);

        let kt = K_TO_RY * 300.0;
        let expected: f64 = optical.iter()
            .map(|w| 0.5 * w + kt * (1.0 - (-w / kt).exp()).ln())
            .sum();
        let thermal = dynmat.harmonic_free_energy(300.0).unwrap();
        assert_relative_eq!(thermal, expected, max_relative = 1e-10);
        assert!(thermal < zero_point);
    }

    #[test]
    fn test_spectral_map_identity() {
        let dynmat = dimer(0.5, 1.0, 3.0);
        let (l, v) = hermitian_eigen(&dynmat.blocks[0]);
        let rebuilt = spectral_map(&l, &v, |x| x);
        assert_relative_eq!((rebuilt - &dynmat.blocks[0]).norm(), 0.0, epsilon = 1e-12);
    }
}
