//! Stopping criteria of the minimization.

use log::{info, warn};
use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;
use crate::error::Result;
use crate::phonons::{translation_modes, DynamicalMatrix};
use crate::units::RY_TO_CM;
use super::config::{GradientOperator, MinimizerConfig};
use super::history::MinimizationHistory;

/// Where a run stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinimizationStatus {
    Running,
    /// The selected gradients are below their statistical noise
    Converged,
    /// The trial matrix has an unstable mode in the supercell
    AbortedImaginary,
    /// Too few effective configurations are left; a new ensemble is needed
    AbortedSampling,
    /// The step budget is used up
    AbortedMaxSteps,
}

impl MinimizationStatus {
    pub fn is_terminal(&self) -> bool {
        *self != MinimizationStatus::Running
    }
}

/// Decides after each step whether the run goes on.
pub struct ConvergenceMonitor<'a> {
    config: &'a MinimizerConfig,
}

impl<'a> ConvergenceMonitor<'a> {
    pub fn new(config: &'a MinimizerConfig) -> Self {
        Self { config }
    }

    /// Gradient test on the latest history entries, combined per `gradi_op`.
    pub fn gradient_converged(&self, history: &MinimizationHistory) -> bool {
        let mf = self.config.meaningful_factor;
        let gc_cond = history.last_dyn_gradient().is_some_and(|(g, err)| g < err * mf);
        let gw_cond = history.last_struct_gradient().is_some_and(|(g, err)| g < err * mf);

        if gc_cond {
            info!("The gc gradient satisfies the convergence condition");
        }
        if gw_cond {
            info!("The gw gradient satisfies the convergence condition");
        }

        match self.config.gradi_op {
            GradientOperator::Gc => gc_cond,
            GradientOperator::Gw => gw_cond,
            GradientOperator::All => gc_cond && gw_cond,
        }
    }

    /// Status after `iterations` completed steps.
    ///
    /// Checked in order: imaginary frequencies, gradients, Kong-Liu ratio,
    /// step budget.
    pub fn evaluate(
        &self,
        history: &MinimizationHistory,
        imaginary: bool,
        n_eff: f64,
        n_configs: usize,
        iterations: usize,
    ) -> MinimizationStatus {
        if imaginary {
            warn!("Imaginary frequencies found, minimization aborted");
            return MinimizationStatus::AbortedImaginary;
        }

        if self.gradient_converged(history) {
            info!("The system satisfies the convergence criteria");
            return MinimizationStatus::Converged;
        }

        let ratio = n_eff / n_configs as f64;
        if ratio < self.config.kong_liu_ratio {
            warn!(
                "Kong-Liu N_eff = {:.2} (N_eff/N = {:.4} < {:.4}): out of the statistical sampling",
                n_eff, ratio, self.config.kong_liu_ratio
            );
            return MinimizationStatus::AbortedSampling;
        }

        if let Some(max_steps) = self.config.max_steps() {
            if iterations >= max_steps {
                warn!("Maximum number of steps reached ({})", max_steps);
                return MinimizationStatus::AbortedMaxSteps;
            }
        }

        MinimizationStatus::Running
    }
}

/// True when the supercell matrix has a negative non-translational frequency.
///
/// When it does, the unstable spectrum is logged next to the `reference`
/// spectrum, pairing modes by maximal eigenvector overlap.
pub fn check_imaginary_frequencies(
    dynmat: &DynamicalMatrix,
    reference: &DynamicalMatrix,
    supercell: [usize; 3],
) -> Result<bool> {
    let super_dyn = dynmat.generate_supercell_dyn(supercell)?;
    let (freqs, pols) = super_dyn.diagonalize(0)?;
    let trans = translation_modes(&pols, &super_dyn.structure.masses);

    let kept: Vec<usize> = (0..freqs.len()).filter(|&i| !trans[i]).collect();
    let unstable = kept.first().is_some_and(|&i| freqs[i] < 0.0);
    if unstable {
        if let Err(e) = report_mode_correlation(&freqs, &pols, &kept, reference, supercell) {
            warn!("Could not compare with the reference frequencies: {}", e);
        }
    }
    Ok(unstable)
}

fn report_mode_correlation(
    freqs: &DVector<f64>,
    pols: &DMatrix<Complex64>,
    kept: &[usize],
    reference: &DynamicalMatrix,
    supercell: [usize; 3],
) -> Result<()> {
    let super_ref = reference.generate_supercell_dyn(supercell)?;
    let (ref_freqs, ref_pols) = super_ref.diagonalize(0)?;
    let ref_trans = translation_modes(&ref_pols, &super_ref.structure.masses);
    let mut free: Vec<usize> = (0..ref_freqs.len()).filter(|&j| !ref_trans[j]).collect();

    // Greedy matching, lowest current mode first
    let mut paired = vec![f64::NAN; ref_freqs.len()];
    for &i in kept {
        let best = free.iter()
            .enumerate()
            .map(|(slot, &j)| (slot, pols.column(i).dotc(&ref_pols.column(j)).norm()))
            .max_by(|a, b| a.1.total_cmp(&b.1));
        if let Some((slot, _)) = best {
            let j = free.remove(slot);
            paired[j] = freqs[i];
        }
    }

    warn!("Frequencies excluding translations (current | reference) [cm-1]:");
    let ref_kept = (0..ref_freqs.len()).filter(|&j| !ref_trans[j]);
    for (n, j) in ref_kept.enumerate() {
        warn!("{:4}) {:12.4} | {:12.4}", n, paired[j] * RY_TO_CM, ref_freqs[j] * RY_TO_CM);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::dimer;

    fn history_with(gc: (f64, f64), gw: (f64, f64)) -> MinimizationHistory {
        let mut history = MinimizationHistory::new();
        history.push_dyn_gradient(gc.0, gc.1);
        history.push_struct_gradient(gw.0, gw.1);
        history
    }

    #[test]
    fn test_gradient_operator_combination() {
        // gc well below its noise, gw not
        let history = history_with((1e-6, 1.0), (1.0, 1.0));

        let gc = MinimizerConfig { gradi_op: GradientOperator::Gc, ..Default::default() };
        let gw = MinimizerConfig { gradi_op: GradientOperator::Gw, ..Default::default() };
        let all = MinimizerConfig { gradi_op: GradientOperator::All, ..Default::default() };

        assert!(ConvergenceMonitor::new(&gc).gradient_converged(&history));
        assert!(!ConvergenceMonitor::new(&gw).gradient_converged(&history));
        assert!(!ConvergenceMonitor::new(&all).gradient_converged(&history));
        assert!(!ConvergenceMonitor::new(&all).gradient_converged(&MinimizationHistory::new()));
    }

    #[test]
    fn test_evaluation_order() {
        let config = MinimizerConfig { max_ka: 3, ..Default::default() };
        let monitor = ConvergenceMonitor::new(&config);
        let converged = history_with((1e-6, 1.0), (0.0, 0.0));
        let running = history_with((1.0, 1.0), (0.0, 0.0));

        // Imaginary frequencies win over everything
        assert_eq!(monitor.evaluate(&converged, true, 100.0, 100, 5), MinimizationStatus::AbortedImaginary);
        // Convergence wins over exhausted statistics and budget
        assert_eq!(monitor.evaluate(&converged, false, 10.0, 100, 5), MinimizationStatus::Converged);
        assert_eq!(monitor.evaluate(&running, false, 10.0, 100, 5), MinimizationStatus::AbortedSampling);
        assert_eq!(monitor.evaluate(&running, false, 100.0, 100, 3), MinimizationStatus::AbortedMaxSteps);
        assert_eq!(monitor.evaluate(&running, false, 100.0, 100, 2), MinimizationStatus::Running);
        assert!(!MinimizationStatus::Running.is_terminal());
    }

    #[test]
    fn test_imaginary_frequency_detection() {
        let stable = dimer(0.5, 1.0, 1.0);
        let unstable = dimer(-0.2, 1.0, 1.0);
        assert!(!check_imaginary_frequencies(&stable, &stable, [1, 1, 1]).unwrap());
        assert!(check_imaginary_frequencies(&unstable, &stable, [1, 1, 1]).unwrap());
        assert!(check_imaginary_frequencies(&stable, &stable, [2, 1, 1]).is_err());
    }
}
