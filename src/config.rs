//! Emulator configuration, read once at setup time.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::partition::SplitPlan;

fn default_n_start() -> usize {
    10
}

fn default_max_eval() -> usize {
    200
}

fn default_seed() -> u64 {
    42
}

fn default_output_stem() -> PathBuf {
    PathBuf::from("emulator")
}

/// Everything the setup phase needs: file locations, the train/validation
/// split plan and the optimizer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmulatorConfig {
    /// Beliefs file (trend, kernel, hyperparameter priors)
    pub beliefs: PathBuf,
    /// Input points, one per line
    pub inputs: PathBuf,
    /// Output values, one per line
    pub outputs: PathBuf,
    /// Train/validation split plan
    pub split: SplitPlan,
    /// Number of random optimizer restarts
    #[serde(default = "default_n_start")]
    pub n_start: usize,
    /// Evaluation budget per optimizer start
    #[serde(default = "default_max_eval")]
    pub max_eval: usize,
    /// Seed for shuffling and optimizer restarts
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Shuffle the dataset rows before partitioning
    #[serde(default)]
    pub shuffle: bool,
    /// Scale inputs to the unit cube before training
    #[serde(default)]
    pub scale_inputs: bool,
    /// Stem of the per-round and final output files
    #[serde(default = "default_output_stem")]
    pub output_stem: PathBuf,
}

impl EmulatorConfig {
    /// Read a configuration from a JSON file.
    pub fn load(path: &Path) -> Result<EmulatorConfig> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Write the configuration as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
