//! Belief records: what is assumed about the process before training, and
//! what gets persisted after each round and after the final build.

use std::fs;
use std::path::{Path, PathBuf};

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::correlation_models::Kernel;
use crate::errors::Result;
use crate::hyperparameters::{
    HyperParams, DEFAULT_NUGGET, DEFAULT_THETA_BOUNDS, DEFAULT_THETA_INIT,
};
use crate::mean_models::Trend;

fn default_theta() -> Vec<f64> {
    vec![DEFAULT_THETA_INIT]
}

fn default_bounds() -> (f64, f64) {
    DEFAULT_THETA_BOUNDS
}

fn default_nugget() -> f64 {
    DEFAULT_NUGGET
}

/// Prior beliefs about the emulated process: basis, kernel and the
/// hyperparameter starting point. Loaded at setup, written back with fitted
/// values after each training round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Beliefs {
    #[serde(default)]
    pub trend: Trend,
    #[serde(default)]
    pub kernel: Kernel,
    /// Initial theta; a single value is broadcast to every input dimension
    #[serde(default = "default_theta")]
    pub theta: Vec<f64>,
    #[serde(default = "default_bounds")]
    pub theta_bounds: (f64, f64),
    #[serde(default = "default_nugget")]
    pub nugget: f64,
    /// Skip hyperparameter optimization and keep theta as given
    #[serde(default)]
    pub fixed: bool,
}

impl Default for Beliefs {
    fn default() -> Self {
        Beliefs {
            trend: Trend::default(),
            kernel: Kernel::default(),
            theta: default_theta(),
            theta_bounds: default_bounds(),
            nugget: default_nugget(),
            fixed: false,
        }
    }
}

impl Beliefs {
    /// Read beliefs from a JSON file.
    pub fn load(path: &Path) -> Result<Beliefs> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Write the beliefs as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Validated hyperparameter vector for a `dim`-dimensional input space.
    pub fn to_hyperparams(&self, dim: usize) -> Result<HyperParams> {
        HyperParams::new(
            &Array1::from_vec(self.theta.clone()),
            self.nugget,
            self.theta_bounds,
            dim,
        )
    }

    /// Beliefs updated with the hyperparameters fitted during training.
    pub fn with_fitted(&self, params: &HyperParams) -> Beliefs {
        Beliefs {
            theta: params.theta().to_vec(),
            nugget: params.nugget(),
            ..self.clone()
        }
    }
}

/// Everything worth keeping from one training round: the fitted
/// hyperparameters, the optimizer outcome and the validation diagnostics.
/// Optimizer non-convergence and covariance trouble stay distinguishable in
/// this record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundRecord {
    /// Zero-based round counter
    pub round: usize,
    /// Whether this record comes from the final full-data build
    pub final_build: bool,
    /// Fitted length scales
    pub theta: Vec<f64>,
    /// Nugget used for the fit
    pub nugget: f64,
    /// Reduced log-likelihood at the fitted hyperparameters
    pub likelihood: f64,
    /// Whether the likelihood search stopped before its budget
    pub converged: bool,
    /// Objective evaluations spent by the search
    pub n_evals: usize,
    /// Mahalanobis distance of the validation block; absent on the final build
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mahalanobis: Option<f64>,
    /// Its expected value (the validation block size)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mahalanobis_expected: Option<f64>,
    /// Standardized error of each validation point
    #[serde(default)]
    pub standard_errors: Vec<f64>,
    /// Indices of the validation points exceeding the error threshold
    #[serde(default)]
    pub flagged: Vec<usize>,
}

fn stamped(stem: &Path, kind: &str, round: usize, is_final: bool) -> PathBuf {
    let name = if is_final {
        format!("{}-{kind}-final.json", stem.display())
    } else {
        format!("{}-{kind}-round-{round}.json", stem.display())
    };
    PathBuf::from(name)
}

/// Persist the belief record of a round (or of the final build) next to the
/// configured output stem, returning the written path.
pub fn save_round_beliefs(
    stem: &Path,
    round: usize,
    is_final: bool,
    beliefs: &Beliefs,
) -> Result<PathBuf> {
    let path = stamped(stem, "beliefs", round, is_final);
    beliefs.save(&path)?;
    Ok(path)
}

/// Persist the per-point diagnostics of a round, returning the written path.
pub fn save_round_diagnostics(
    stem: &Path,
    round: usize,
    is_final: bool,
    record: &RoundRecord,
) -> Result<PathBuf> {
    let path = stamped(stem, "diagnostics", round, is_final);
    fs::write(&path, serde_json::to_string_pretty(record)?)?;
    Ok(path)
}
