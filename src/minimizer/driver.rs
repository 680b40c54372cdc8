//! The SSCHA minimization loop.
//!
//! Each step assembles the gradients at the current trial matrix, moves the
//! matrix (in the chosen root representation) and the atomic positions, and
//! reweights the ensemble. A run that stops for any reason other than
//! convergence puts back the state held before its last step.

use std::time::Instant;
use log::{debug, info, warn};
use nalgebra::Matrix3;
use crate::ensemble::Ensemble;
use crate::error::{Result, SschaError};
use crate::phonons::{translation_modes, DynamicalMatrix, Structure};
use crate::symmetry::{AsrMode, Symmetry};
use crate::units::{RY_BOHR3_TO_GPA, RY_TO_CM, RY_TO_MEV};
use super::config::{MinimizerConfig, RootRepresentation};
use super::convergence::{check_imaginary_frequencies, ConvergenceMonitor, MinimizationStatus};
use super::gradient::GradientAssembler;
use super::history::MinimizationHistory;
use super::hooks::{GradientModifier, RunHooks, StepInfo};
use super::precond::best_wyckoff_step;
use super::root_step::perform_root_step;
use super::state::MinimizerState;

/// Summary of a finished run.
#[derive(Debug, Clone)]
pub struct MinimizationReport {
    pub status: MinimizationStatus,
    pub steps: usize,
    /// Free energy per unit cell minus `eq_energy`, with error (Ry)
    pub free_energy: (f64, f64),
    /// Last dynamical-matrix gradient metric and error
    pub dyn_gradient: Option<(f64, f64)>,
    /// Last structure gradient modulus and error
    pub struct_gradient: Option<(f64, f64)>,
    pub kong_liu: f64,
    /// Stress tensor and error (GPa)
    pub stress: Option<(Matrix3<f64>, Matrix3<f64>)>,
    pub structure: Option<Structure>,
    /// Supercell frequencies (cm-1) with their translation flag
    pub frequencies: Option<Vec<(f64, bool)>>,
}

/// Minimizer of the SSCHA free energy over an ensemble.
pub struct SschaMinimizer<E: Ensemble, S: Symmetry> {
    ensemble: E,
    symmetry: S,
    config: MinimizerConfig,
    state: MinimizerState,
    history: MinimizationHistory,
    status: MinimizationStatus,
    iterations: usize,
    initialized: bool,
}

impl<E: Ensemble, S: Symmetry> SschaMinimizer<E, S> {
    /// Start from the matrix the ensemble weights currently refer to.
    pub fn new(ensemble: E, symmetry: S, config: MinimizerConfig) -> Result<Self> {
        config.validate()?;
        let state = MinimizerState::new(ensemble.current_dyn().clone());
        Ok(Self {
            ensemble,
            symmetry,
            config,
            state,
            history: MinimizationHistory::new(),
            status: MinimizationStatus::Running,
            iterations: 0,
            initialized: false,
        })
    }

    /// Prepare a fresh minimization on the current matrix.
    ///
    /// Symmetrizes the starting matrix, resets the history and records the
    /// starting free energy and Kong-Liu size.
    pub fn init(&mut self) -> Result<()> {
        if self.config.root_representation != RootRepresentation::Normal && self.config.precond_dyn {
            return Err(SschaError::Configuration(
                "deactivate precond_dyn when a root_representation other than normal is used".into(),
            ));
        }

        let dynmat = &mut self.state.dynmat;
        self.symmetry.symmetrize_fc_q(&mut dynmat.blocks, &dynmat.q_stars, AsrMode::Custom)?;
        self.update()?;

        if check_imaginary_frequencies(&self.state.dynmat, self.ensemble.reference_dyn(), self.ensemble.supercell())? {
            warn!("The starting dynamical matrix has imaginary frequencies");
        }

        self.history.clear();
        let (fe, err) = self.get_free_energy()?;
        self.history.push_free_energy(fe - self.config.eq_energy, err);
        self.history.push_kong_liu(self.ensemble.effective_sample_size());

        let (grad, _) = self.ensemble.preconditioned_gradient(self.config.precond_dyn)?;
        self.state.prev_grad = Some(grad);

        self.state.struct_step = 1.0;
        if !self.config.precond_wyck {
            self.state.struct_step *= best_wyckoff_step(&self.state.dynmat)?;
        }

        self.status = MinimizationStatus::Running;
        self.iterations = 0;
        self.initialized = true;
        Ok(())
    }

    /// One step on the dynamical matrix and on the structure, then reweight.
    pub fn minimization_step(&mut self, modifier: Option<&mut (dyn GradientModifier + '_)>) -> Result<()> {
        let started = Instant::now();
        let pair = GradientAssembler::new(&self.config).assemble(
            &self.ensemble,
            &mut self.symmetry,
            &self.state.dynmat,
            &mut self.history,
            modifier,
        )?;
        debug!("Gradients assembled in {:.3} s", started.elapsed().as_secs_f64());

        let new_blocks = perform_root_step(
            &self.state.dynmat.blocks,
            &pair.dyn_grad,
            self.config.lambda_a,
            self.config.root_representation,
            self.config.minimization_algorithm,
        )?;

        if self.config.minim_struct {
            let step = self.config.lambda_w * self.state.struct_step;
            for (r, g) in self.state.dynmat.structure.coords.iter_mut().zip(pair.struct_grad.iter()) {
                *r -= g * step;
            }
        }
        self.state.dynmat.blocks = new_blocks;

        self.update()?;
        self.state.prev_grad = Some(pair.dyn_grad);
        Ok(())
    }

    /// Iterate until a stopping criterion is met.
    ///
    /// Errors from the collaborators abort the run after restoring the state
    /// held before the failing step.
    pub fn run(&mut self, verbose: u8, mut hooks: RunHooks<'_>) -> Result<MinimizationStatus> {
        if !self.initialized {
            self.init()?;
        }
        self.status = MinimizationStatus::Running;

        loop {
            if let Some(pre) = hooks.pre.as_deref_mut() {
                pre.observe(&self.step_info());
            }

            let snapshot = self.state.clone();
            if verbose >= 1 {
                info!("# ---------------- NEW MINIMIZATION STEP --------------------");
                info!("Step ka = {}", self.history.fe.len());
            }

            let started = Instant::now();
            let outcome = self.minimization_step(hooks.gradient.as_deref_mut())
                .and_then(|()| self.finish_step(verbose, started));
            match outcome {
                Ok(status) => self.status = status,
                Err(e) => {
                    self.restore(snapshot);
                    return Err(e);
                }
            }

            if let Some(post) = hooks.post.as_deref_mut() {
                post.observe(&self.step_info());
            }

            if self.status.is_terminal() {
                if !self.is_converged() {
                    info!("Restoring the last good dynamical matrix");
                    self.state = snapshot;
                    self.update()?;
                }
                break;
            }
        }
        Ok(self.status)
    }

    pub fn is_converged(&self) -> bool {
        self.status == MinimizationStatus::Converged
    }

    pub fn status(&self) -> MinimizationStatus {
        self.status
    }

    /// Point the ensemble weights at the current trial matrix.
    pub fn update(&mut self) -> Result<()> {
        let temperature = self.ensemble.current_temperature();
        self.ensemble.update_weights(&self.state.dynmat, temperature)
    }

    /// Free energy per unit cell and its error (Ry).
    pub fn get_free_energy(&self) -> Result<(f64, f64)> {
        let (fe, err) = self.ensemble.free_energy()?;
        let n_cells = self.ensemble.supercell().iter().product::<usize>() as f64;
        Ok((fe / n_cells, err / n_cells))
    }

    /// Stress tensor with the configured offset removed (Ry/bohr³).
    pub fn get_stress_tensor(&self) -> Result<(Matrix3<f64>, Matrix3<f64>)> {
        let offset = self.config.stress_offset.resolve()?;
        self.ensemble.stress_tensor(&offset)
    }

    /// Log the settings and the current/starting supercell frequencies.
    pub fn log_settings(&self) -> Result<()> {
        let supercell = self.ensemble.supercell();
        let n_configs = self.ensemble.n_configs();
        info!(" ====== MINIMIZER SETTINGS ====== ");
        info!(" --- GENERAL SETTINGS --- ");
        info!(" original temperature = {}", self.ensemble.reference_temperature());
        info!(" current temperature = {}", self.ensemble.current_temperature());
        info!(" number of configurations = {}", n_configs);
        info!(" max number of steps (infinity if negative) = {}", self.config.max_ka);
        info!(" meaningful factor = {}", self.config.meaningful_factor);
        info!(" gradient to watch (for stopping) = {:?}", self.config.gradi_op);
        info!(" Kong-Liu minimum effective sample size = {}", n_configs as f64 * self.config.kong_liu_ratio);
        info!(" (Kong-Liu ratio = {})", self.config.kong_liu_ratio);
        info!(" compute the stress tensor = {}", self.ensemble.has_stress());
        info!(" total number of atoms = {}", self.state.dynmat.n_atoms() * supercell.iter().product::<usize>());
        info!(" --- STRUCT MINIMIZATION --- ");
        info!(" minim_struct = {}", self.config.minim_struct);
        info!(" preconditioning = {}", self.config.precond_wyck);
        info!(" minimization step (lambda_w) = {}", self.config.lambda_w * self.state.struct_step);
        info!(" --- FC MINIMIZATION --- ");
        info!(" preconditioning = {}", self.config.precond_dyn);
        info!(" minimization step (lambda_a) = {}", self.config.lambda_a);
        info!(" root representation = {:?}", self.config.root_representation);
        info!(" supercell size = {} {} {}", supercell[0], supercell[1], supercell[2]);

        info!(" Current dyn frequencies [cm-1] = {}", format_frequencies(&self.state.dynmat, supercell)?);
        info!(" Start dyn frequencies [cm-1] = {}", format_frequencies(self.ensemble.reference_dyn(), supercell)?);
        Ok(())
    }

    /// Report the outcome. Verbosity 1 adds the stress tensor, 2 the final
    /// structure and frequencies.
    pub fn finalize(&self, verbose: u8) -> Result<MinimizationReport> {
        let free_energy = self.history.last_free_energy()
            .ok_or_else(|| SschaError::Configuration("finalize called before init".into()))?;
        let dyn_gradient = self.history.last_dyn_gradient();
        let struct_gradient = self.history.last_struct_gradient();
        let kong_liu = self.history.last_kong_liu().unwrap_or_else(|| self.ensemble.effective_sample_size());

        info!(" * * * * * * * * ");
        info!(" *   RESULTS   * ");
        info!(" * * * * * * * * ");
        info!("Minimization ended after {} steps ({:?})", self.history.n_steps(), self.status);
        info!("Free energy = {:16.8} +- {:16.8} meV", free_energy.0 * RY_TO_MEV, free_energy.1 * RY_TO_MEV);
        if let Some((g, e)) = dyn_gradient {
            info!("FC gradient modulus = {:16.8} +- {:16.8} bohr^2", g * RY_TO_MEV, e * RY_TO_MEV);
        }
        if let Some((g, e)) = struct_gradient {
            info!("Struct gradient modulus = {:16.8} +- {:16.8} meV/A", g * RY_TO_MEV, e * RY_TO_MEV);
        }
        info!("Kong-Liu effective sample size = {}", kong_liu);

        let stress = if self.ensemble.has_stress() && verbose >= 1 {
            let (stress, err) = self.get_stress_tensor()?;
            let (stress, err) = (stress * RY_BOHR3_TO_GPA, err * RY_BOHR3_TO_GPA);
            info!(" ==== STRESS TENSOR [GPa] ==== ");
            for i in 0..3 {
                let sep = if i == 1 { "    +-    " } else { "" };
                info!(
                    "{:16.8}{:16.8}{:16.8}{:>10}{:16.8}{:16.8}{:16.8}",
                    stress[(i, 0)], stress[(i, 1)], stress[(i, 2)], sep,
                    err[(i, 0)], err[(i, 1)], err[(i, 2)]
                );
            }
            Some((stress, err))
        } else {
            None
        };

        let (structure, frequencies) = if verbose >= 2 {
            let structure = self.state.dynmat.structure.clone();
            info!(" ==== FINAL STRUCTURE [A] ==== ");
            for (atom, r) in structure.atoms.iter().zip(structure.coords.iter()) {
                info!("{:>5} {:16.8}{:16.8}{:16.8}", atom, r.x, r.y, r.z);
            }

            let frequencies = supercell_frequencies(&self.state.dynmat, self.ensemble.supercell())?;
            info!(" ==== FINAL FREQUENCIES [cm-1] ==== ");
            for (i, (w, trans)) in frequencies.iter().enumerate() {
                info!("Mode {:5}:   freq {:16.8} cm-1  | is translation? {}", i + 1, w, trans);
            }
            (Some(structure), Some(frequencies))
        } else {
            (None, None)
        };

        Ok(MinimizationReport {
            status: self.status,
            steps: self.history.n_steps(),
            free_energy,
            dyn_gradient,
            struct_gradient,
            kong_liu,
            stress,
            structure,
            frequencies,
        })
    }

    pub fn dynmat(&self) -> &DynamicalMatrix {
        &self.state.dynmat
    }

    pub fn state(&self) -> &MinimizerState {
        &self.state
    }

    pub fn history(&self) -> &MinimizationHistory {
        &self.history
    }

    pub fn ensemble(&self) -> &E {
        &self.ensemble
    }

    pub fn config(&self) -> &MinimizerConfig {
        &self.config
    }

    /// Steps completed since `init`, the rejected one included.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Record the free energy after a step and decide whether to go on.
    fn finish_step(&mut self, verbose: u8, started: Instant) -> Result<MinimizationStatus> {
        self.iterations += 1;
        if verbose >= 1 {
            info!("Time elapsed to perform the minimization step: {:.3} s", started.elapsed().as_secs_f64());
        }

        let imaginary = check_imaginary_frequencies(
            &self.state.dynmat,
            self.ensemble.reference_dyn(),
            self.ensemble.supercell(),
        )?;

        let (fe, err) = self.get_free_energy()?;
        self.history.push_free_energy(fe - self.config.eq_energy, err);
        let n_eff = self.ensemble.effective_sample_size();
        self.history.push_kong_liu(n_eff);
        if verbose >= 1 {
            self.log_step(verbose)?;
        }

        Ok(ConvergenceMonitor::new(&self.config).evaluate(
            &self.history,
            imaginary,
            n_eff,
            self.ensemble.n_configs(),
            self.iterations,
        ))
    }

    fn step_info(&self) -> StepInfo<'_> {
        StepInfo {
            iteration: self.iterations,
            state: &self.state,
            history: &self.history,
        }
    }

    fn log_step(&self, verbose: u8) -> Result<()> {
        let n_cells = self.ensemble.supercell().iter().product::<usize>() as f64;
        let harm_fe = self.state.dynmat.harmonic_free_energy(self.ensemble.current_temperature())? / n_cells;
        let (fe, err) = self.history.last_free_energy().unwrap_or((f64::NAN, f64::NAN));
        let (gc, gc_err) = self.history.last_dyn_gradient().unwrap_or((f64::NAN, f64::NAN));
        let (gw, gw_err) = self.history.last_struct_gradient().unwrap_or((f64::NAN, f64::NAN));

        info!("Harmonic contribution to free energy = {:16.8} meV", harm_fe * RY_TO_MEV);
        info!("Anharmonic contribution to free energy = {:16.8} +- {:16.8} meV",
            (fe - harm_fe) * RY_TO_MEV, err * RY_TO_MEV);
        info!("Free energy = {:16.8} +- {:16.8} meV", fe * RY_TO_MEV, err * RY_TO_MEV);
        info!("FC gradient modulus = {:16.8} +- {:16.8} bohr^2", gc * RY_TO_MEV, gc_err * RY_TO_MEV);
        info!("Struct gradient modulus = {:16.8} +- {:16.8} meV/A", gw * RY_TO_MEV, gw_err * RY_TO_MEV);
        info!("Kong-Liu effective sample size = {}", self.history.last_kong_liu().unwrap_or(f64::NAN));

        if verbose >= 2 {
            info!("Frequencies [cm-1] = {}", format_frequencies(&self.state.dynmat, self.ensemble.supercell())?);
        }
        Ok(())
    }

    fn restore(&mut self, snapshot: MinimizerState) {
        self.state = snapshot;
        if let Err(e) = self.update() {
            warn!("Could not reweight the ensemble on the restored matrix: {}", e);
        }
    }
}

/// Supercell frequencies in cm-1 with translation flags.
fn supercell_frequencies(dynmat: &DynamicalMatrix, supercell: [usize; 3]) -> Result<Vec<(f64, bool)>> {
    let super_dyn = dynmat.generate_supercell_dyn(supercell)?;
    let (freqs, pols) = super_dyn.diagonalize(0)?;
    let trans = translation_modes(&pols, &super_dyn.structure.masses);
    Ok(freqs.iter().zip(trans).map(|(w, t)| (w * RY_TO_CM, t)).collect())
}

fn format_frequencies(dynmat: &DynamicalMatrix, supercell: [usize; 3]) -> Result<String> {
    let freqs = supercell_frequencies(dynmat, supercell)?;
    Ok(freqs.iter().map(|(w, _)| format!("{:.2}", w)).collect::<Vec<_>>().join("\t"))
}
