//! Per-step record of a minimization.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use crate::error::Result;
use crate::units::RY_TO_MEV;

/// Append-only series collected during a run.
///
/// `fe` and `kl` get one entry per accepted matrix, including the starting
/// one; the gradient series get one entry per step, measured at the matrix the
/// step started from. Energies and gradients are in Ry units.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MinimizationHistory {
    pub fe: Vec<f64>,
    pub fe_err: Vec<f64>,
    pub gc: Vec<f64>,
    pub gc_err: Vec<f64>,
    pub gw: Vec<f64>,
    pub gw_err: Vec<f64>,
    pub kl: Vec<f64>,
}

impl MinimizationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn push_free_energy(&mut self, fe: f64, err: f64) {
        self.fe.push(fe);
        self.fe_err.push(err);
    }

    pub fn push_dyn_gradient(&mut self, gc: f64, err: f64) {
        self.gc.push(gc);
        self.gc_err.push(err);
    }

    pub fn push_struct_gradient(&mut self, gw: f64, err: f64) {
        self.gw.push(gw);
        self.gw_err.push(err);
    }

    pub fn push_kong_liu(&mut self, n_eff: f64) {
        self.kl.push(n_eff);
    }

    /// Number of steps recorded.
    pub fn n_steps(&self) -> usize {
        self.gc.len()
    }

    pub fn last_free_energy(&self) -> Option<(f64, f64)> {
        Some((*self.fe.last()?, *self.fe_err.last()?))
    }

    pub fn last_dyn_gradient(&self) -> Option<(f64, f64)> {
        Some((*self.gc.last()?, *self.gc_err.last()?))
    }

    pub fn last_struct_gradient(&self) -> Option<(f64, f64)> {
        Some((*self.gw.last()?, *self.gw_err.last()?))
    }

    pub fn last_kong_liu(&self) -> Option<f64> {
        self.kl.last().copied()
    }

    /// Write the history as a whitespace table, energies and gradients in meV.
    ///
    /// One row per free-energy entry; gradient columns missing for the last
    /// matrix are written as NaN.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        writeln!(
            out,
            "# Steps; Free energy +- error [meV]; FC gradient +- error [bohr^2]; \
             Structure gradient +- error [meV / A]; Kong-Liu N_eff"
        )?;

        let column = |v: &[f64], i: usize| v.get(i).map_or(f64::NAN, |x| x * RY_TO_MEV);
        for i in 0..self.fe.len() {
            writeln!(
                out,
                "{:6} {:>22.12e} {:>22.12e} {:>22.12e} {:>22.12e} {:>22.12e} {:>22.12e} {:>22.12e}",
                i,
                column(&self.fe, i),
                column(&self.fe_err, i),
                column(&self.gc, i),
                column(&self.gc_err, i),
                column(&self.gw, i),
                column(&self.gw_err, i),
                self.kl.get(i).copied().unwrap_or(f64::NAN),
            )?;
        }
        out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_save_aligns_gradients_with_free_energy() {
        let mut history = MinimizationHistory::new();
        history.push_free_energy(1.0, 0.1);
        history.push_kong_liu(100.0);
        history.push_dyn_gradient(2.0, 0.2);
        history.push_struct_gradient(3.0, 0.3);
        history.push_free_energy(0.5, 0.1);
        history.push_kong_liu(90.0);
        assert_eq!(history.n_steps(), 1);

        let path = std::env::temp_dir().join("rust_sscha_history.dat");
        history.save(&path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        let rows: Vec<Vec<f64>> = content.lines()
            .filter(|l| !l.starts_with('#'))
            .map(|l| l.split_whitespace().map(|t| t.parse().unwrap()).collect())
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].len(), 8);
        assert_relative_eq!(rows[0][1], RY_TO_MEV, epsilon = 1e-6);
        assert_relative_eq!(rows[0][3], 2.0 * RY_TO_MEV, epsilon = 1e-6);
        assert_relative_eq!(rows[1][7], 90.0);
        assert!(rows[1][3].is_nan());
    }

    #[test]
    fn test_clear() {
        let mut history = MinimizationHistory::new();
        history.push_free_energy(1.0, 0.1);
        history.push_dyn_gradient(2.0, 0.2);
        assert_eq!(history.last_dyn_gradient(), Some((2.0, 0.2)));
        history.clear();
        assert_eq!(history, MinimizationHistory::default());
        assert_eq!(history.last_free_energy(), None);
    }
}
