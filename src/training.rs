//! The emulator aggregate and its training control loop.
//!
//! Training runs in two phases. First, round by round, the hyperparameters
//! are optimized against the current training block and judged against the
//! current validation block; acceptable rounds fold the validation block into
//! training and move on. Once every validation block is consumed, a final
//! build re-optimizes over the entire dataset so the deployed emulator uses
//! all available data with honestly cross-validated hyperparameters.

use std::rc::Rc;

use ndarray::{Array1, Array2};

use crate::beliefs::{save_round_beliefs, save_round_diagnostics, Beliefs, RoundRecord};
use crate::config::EmulatorConfig;
use crate::errors::Result;
use crate::hyperparameters::{shared, SharedHyperParams};
use crate::io;
use crate::optimization::{optimize_hyperparameters, OptimizeOpts, OptimizeReport};
use crate::partition::{DatasetPartition, PartitionState};
use crate::posterior::{Posterior, ValidationReport};
use crate::state::RegressionState;

/// One Gaussian process emulator: configuration, beliefs, the partitioned
/// dataset and the training regression state, all sharing a single
/// hyperparameter vector.
pub struct Emulator {
    config: EmulatorConfig,
    beliefs: Beliefs,
    params: SharedHyperParams,
    partition: DatasetPartition,
    scaling: Option<io::InputScaling>,
    training: RegressionState,
    round: usize,
    records: Vec<RoundRecord>,
}

impl Emulator {
    /// Build an emulator from the files named in `config`.
    pub fn setup(config: EmulatorConfig) -> Result<Emulator> {
        let beliefs = Beliefs::load(&config.beliefs)?;
        let inputs = io::load_matrix(&config.inputs)?;
        let outputs = io::load_vector(&config.outputs)?;
        Emulator::from_data(config, beliefs, inputs, outputs)
    }

    /// Build an emulator from in-memory data, applying the configured
    /// shuffling and input scaling.
    pub fn from_data(
        config: EmulatorConfig,
        beliefs: Beliefs,
        mut inputs: Array2<f64>,
        mut outputs: Array1<f64>,
    ) -> Result<Emulator> {
        if config.shuffle {
            io::shuffle_dataset(&mut inputs, &mut outputs, config.seed);
        }
        let scaling = if config.scale_inputs {
            let scaling = io::InputScaling::fit(&inputs);
            inputs = scaling.apply(&inputs);
            Some(scaling)
        } else {
            None
        };

        let params = shared(beliefs.to_hyperparams(inputs.ncols())?);
        let partition = DatasetPartition::new(inputs, outputs, config.split)?;
        let (xt, yt) = partition.training_block();
        let mut training =
            RegressionState::new(xt, yt, beliefs.trend, beliefs.kernel, Rc::clone(&params))?;
        training.rebuild()?;

        Ok(Emulator {
            config,
            beliefs,
            params,
            partition,
            scaling,
            training,
            round: 0,
            records: Vec::new(),
        })
    }

    /// Configuration this emulator was set up from
    pub fn config(&self) -> &EmulatorConfig {
        &self.config
    }

    /// Current beliefs (updated after every optimized round)
    pub fn beliefs(&self) -> &Beliefs {
        &self.beliefs
    }

    /// Dataset partition and its training/validation state
    pub fn partition(&self) -> &DatasetPartition {
        &self.partition
    }

    /// Regression state over the current training block
    pub fn training_state(&self) -> &RegressionState {
        &self.training
    }

    /// Records of every round run so far, in order
    pub fn records(&self) -> &[RoundRecord] {
        &self.records
    }

    /// Posterior over the current training state
    pub fn posterior(&self) -> Result<Posterior<'_>> {
        Posterior::of(&self.training)
    }

    /// Predictive mean and variance at raw (unscaled) input points.
    pub fn predict(&mut self, x: &Array2<f64>) -> Result<(Array1<f64>, Array1<f64>)> {
        self.training.ensure_current()?;
        let x = match &self.scaling {
            Some(scaling) => scaling.apply(x),
            None => x.to_owned(),
        };
        let post = Posterior::of(&self.training)?;
        Ok((post.predict(&x)?, post.predict_var(&x)?))
    }

    /// Run validation rounds while validation blocks remain, then the final
    /// full-data build. With `auto` unset only one round runs and nothing is
    /// promoted, so diagnostics can be inspected before continuing.
    pub fn train(&mut self, auto: bool) -> Result<()> {
        while let PartitionState::Validating(k) = self.partition.state() {
            log::info!(
                "round {}: validating block {k} of {} ({} training points)",
                self.round,
                self.partition.plan().n_sets,
                self.partition.n_training()
            );
            let report = self.optimize_round()?;
            let (xv, yv) = self.partition.validation_block()?;
            let diag = Posterior::of(&self.training)?.validate(&xv, &yv)?;
            log::info!(
                "round {}: likelihood {:.6}, mahalanobis {:.3} (expected {:.0}), {} flagged",
                self.round,
                report.likelihood,
                diag.mahalanobis,
                diag.mahalanobis_expected,
                diag.flagged.len()
            );

            self.persist_round(&report, Some(&diag), false)?;
            self.round += 1;

            if !auto {
                return Ok(());
            }
            self.partition.promote()?;
            self.refresh_training_state()?;
        }
        self.final_build()
    }

    /// Fold everything into training, re-optimize over the full dataset and
    /// persist the final beliefs and diagnostics. A covariance failure here
    /// is fatal: it would mean persisting a broken model.
    pub fn final_build(&mut self) -> Result<()> {
        self.partition.finalize();
        self.refresh_training_state()?;
        log::info!(
            "final build over all {} points",
            self.partition.n_training()
        );
        let report = self.optimize_round()?;
        self.persist_round(&report, None, true)?;
        Ok(())
    }

    /// Write the fitted beliefs of the current round to disk.
    pub fn final_beliefs(&self, is_final: bool) -> Result<()> {
        let fitted = self.beliefs.with_fitted(&self.params.borrow());
        save_round_beliefs(&self.config.output_stem, self.round, is_final, &fitted)?;
        Ok(())
    }

    /// Write the diagnostic record of the current round to disk.
    pub fn final_design_points(&self, record: &RoundRecord, is_final: bool) -> Result<()> {
        save_round_diagnostics(&self.config.output_stem, record.round, is_final, record)?;
        Ok(())
    }

    fn optimize_round(&mut self) -> Result<OptimizeReport> {
        if self.beliefs.fixed {
            self.training.ensure_current()?;
            return Ok(OptimizeReport {
                theta: self.params.borrow().theta().to_owned(),
                likelihood: self.training.log_likelihood()?,
                n_evals: 0,
                converged: true,
            });
        }
        let opts = OptimizeOpts {
            n_start: self.config.n_start,
            max_eval: self.config.max_eval,
            seed: self.config.seed,
        };
        optimize_hyperparameters(&mut self.training, &opts)
    }

    fn refresh_training_state(&mut self) -> Result<()> {
        let (xt, yt) = self.partition.training_block();
        self.training = RegressionState::new(
            xt,
            yt,
            self.beliefs.trend,
            self.beliefs.kernel,
            Rc::clone(&self.params),
        )?;
        self.training.rebuild()
    }

    fn persist_round(
        &mut self,
        report: &OptimizeReport,
        diag: Option<&ValidationReport>,
        is_final: bool,
    ) -> Result<()> {
        if !report.converged {
            log::warn!("round {}: optimizer stopped on its budget", self.round);
        }
        let record = RoundRecord {
            round: self.round,
            final_build: is_final,
            theta: report.theta.to_vec(),
            nugget: self.params.borrow().nugget(),
            likelihood: report.likelihood,
            converged: report.converged,
            n_evals: report.n_evals,
            mahalanobis: diag.map(|d| d.mahalanobis),
            mahalanobis_expected: diag.map(|d| d.mahalanobis_expected),
            standard_errors: diag.map(|d| d.standard_errors.to_vec()).unwrap_or_default(),
            flagged: diag.map(|d| d.flagged.clone()).unwrap_or_default(),
        };
        self.final_beliefs(is_final)?;
        self.final_design_points(&record, is_final)?;
        self.records.push(record);
        Ok(())
    }
}
