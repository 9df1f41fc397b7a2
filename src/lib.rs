//! A [Gaussian Process](https://en.wikipedia.org/wiki/Gaussian_process)
//! emulator for expensive simulators, trained by cross-validated maximum
//! likelihood.
//!
//! The dataset is partitioned into one training block and an ordered
//! sequence of validation blocks. Each training round maximizes the reduced
//! log-likelihood of the training block over the kernel hyperparameters
//! (multistart Cobyla on `log10(theta)`), then judges the fit against the
//! current validation block with two diagnostics: the Mahalanobis distance
//! of the held-out outputs under the full predictive covariance, and the
//! per-point standardized errors. Validated blocks are folded into training
//! and a final build re-estimates the hyperparameters on the whole dataset.
//!
//! The training sequence is driven by [`Emulator`]; the pieces (the
//! [`RegressionState`], the optimizer, the [`Posterior`] and the
//! [`DatasetPartition`]) are usable on their own.
//!
//! ```
//! use gp_emulator::{Beliefs, Emulator, EmulatorConfig, SplitPlan};
//! use ndarray::{Array, Axis};
//!
//! // 20 noiseless samples of sin(2*pi*x) on [0, 1]
//! let x = Array::linspace(0., 1., 20).insert_axis(Axis(1));
//! let y = x.column(0).mapv(|v| (2. * std::f64::consts::PI * v).sin());
//!
//! let config = EmulatorConfig {
//!     beliefs: Default::default(),
//!     inputs: Default::default(),
//!     outputs: Default::default(),
//!     split: SplitPlan { n_sets: 2, first_index: 12, per_set: 4 },
//!     n_start: 3,
//!     max_eval: 100,
//!     seed: 42,
//!     shuffle: false,
//!     scale_inputs: false,
//!     output_stem: std::env::temp_dir().join("gp-emulator-doc"),
//! };
//! let beliefs = Beliefs { nugget: 1e-8, ..Beliefs::default() };
//!
//! let mut emulator = Emulator::from_data(config, beliefs, x.clone(), y.clone()).unwrap();
//! emulator.train(true).unwrap();
//!
//! let (mean, variance) = emulator.predict(&x).unwrap();
//! assert!((&mean - &y).mapv(f64::abs).sum() < 1e-2);
//! assert!(variance.iter().all(|v| *v >= 0.));
//! ```
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]

mod beliefs;
mod config;
pub mod correlation_models;
mod errors;
mod hyperparameters;
mod io;
pub mod mean_models;
mod optimization;
mod partition;
mod posterior;
mod state;
mod training;
mod utils;

pub use beliefs::{save_round_beliefs, save_round_diagnostics, Beliefs, RoundRecord};
pub use config::EmulatorConfig;
pub use correlation_models::Kernel;
pub use errors::{EmulatorError, Result};
pub use hyperparameters::{
    shared, HyperParams, SharedHyperParams, DEFAULT_NUGGET, DEFAULT_THETA_BOUNDS,
    DEFAULT_THETA_INIT,
};
pub use io::{load_matrix, load_vector, shuffle_dataset, InputScaling};
pub use mean_models::Trend;
pub use optimization::{optimize_hyperparameters, OptimizeOpts, OptimizeReport};
pub use partition::{DatasetPartition, PartitionState, SplitPlan};
pub use posterior::{
    prediction_grid, GridSweep, Posterior, ValidationReport, ISE_THRESHOLD,
};
pub use state::RegressionState;
pub use training::Emulator;
pub use utils::DiffMatrix;
