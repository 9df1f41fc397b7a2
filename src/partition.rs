//! Dataset partition state machine.
//!
//! The full dataset is split into one training block and an ordered sequence
//! of validation blocks. The partition starts at `Validating(0)` (or
//! `TrainingOnly` when no validation sets are configured), folds each
//! validation block into training on promotion, and ends in `Exhausted` or
//! `FinalBuild`. Training only ever grows: a folded block is never taken
//! back.

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::errors::{EmulatorError, Result};

/// How the dataset rows are split between training and validation.
///
/// Validation block `k` occupies the contiguous rows
/// `[first_index + k * per_set, first_index + (k + 1) * per_set)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitPlan {
    /// Number of validation blocks
    pub n_sets: usize,
    /// Row index of the first validation block
    pub first_index: usize,
    /// Number of rows per validation block
    pub per_set: usize,
}

impl SplitPlan {
    /// Split with no validation blocks at all
    pub fn training_only() -> SplitPlan {
        SplitPlan {
            n_sets: 0,
            first_index: 0,
            per_set: 0,
        }
    }
}

/// Where the partition currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionState {
    /// No validation blocks were configured
    TrainingOnly,
    /// Block `k` is the current validation block
    Validating(usize),
    /// Every validation block has been folded into training
    Exhausted,
    /// Terminal: the whole dataset is training data for the final refit
    FinalBuild,
}

/// The full dataset plus the bookkeeping of which rows are training.
#[derive(Debug, Clone)]
pub struct DatasetPartition {
    inputs: Array2<f64>,
    outputs: Array1<f64>,
    plan: SplitPlan,
    state: PartitionState,
    /// Validation blocks folded into training so far
    consumed: usize,
}

impl DatasetPartition {
    /// Take ownership of a validated dataset and its split plan.
    pub fn new(inputs: Array2<f64>, outputs: Array1<f64>, plan: SplitPlan) -> Result<Self> {
        if inputs.nrows() != outputs.len() {
            return Err(EmulatorError::InvalidValue(format!(
                "dataset size mismatch: {} input points vs {} outputs",
                inputs.nrows(),
                outputs.len()
            )));
        }
        if inputs.ncols() == 0 {
            return Err(EmulatorError::InvalidValue(
                "dataset inputs need at least one dimension".to_string(),
            ));
        }
        if plan.n_sets > 0 {
            if plan.per_set == 0 {
                return Err(EmulatorError::InvalidValue(
                    "a validation block cannot be empty".to_string(),
                ));
            }
            let end = plan.first_index + plan.n_sets * plan.per_set;
            if end > inputs.nrows() {
                return Err(EmulatorError::InvalidValue(format!(
                    "split plan overflows the dataset: needs rows up to {}, have {}",
                    end,
                    inputs.nrows()
                )));
            }
        }
        let state = if plan.n_sets > 0 {
            PartitionState::Validating(0)
        } else {
            PartitionState::TrainingOnly
        };
        Ok(DatasetPartition {
            inputs,
            outputs,
            plan,
            state,
            consumed: 0,
        })
    }

    /// Current state of the partition
    pub fn state(&self) -> PartitionState {
        self.state
    }

    /// The split plan the partition was built with
    pub fn plan(&self) -> SplitPlan {
        self.plan
    }

    /// Total number of dataset rows
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    /// Whether the dataset has no rows at all
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Input dimension
    pub fn dim(&self) -> usize {
        self.inputs.ncols()
    }

    /// Number of rows currently in the training block
    pub fn n_training(&self) -> usize {
        self.len() - (self.plan.n_sets - self.consumed) * self.plan.per_set
    }

    /// Validation blocks not yet folded into training
    pub fn n_validation_remaining(&self) -> usize {
        self.plan.n_sets - self.consumed
    }

    /// Rows of validation block `k`
    fn block_range(&self, k: usize) -> std::ops::Range<usize> {
        let start = self.plan.first_index + k * self.plan.per_set;
        start..start + self.plan.per_set
    }

    /// Training rows: everything except the not-yet-consumed blocks
    fn training_indices(&self) -> Vec<usize> {
        let held_out: Vec<std::ops::Range<usize>> = (self.consumed..self.plan.n_sets)
            .map(|k| self.block_range(k))
            .collect();
        (0..self.len())
            .filter(|i| !held_out.iter().any(|r| r.contains(i)))
            .collect()
    }

    /// Current training block as owned arrays
    pub fn training_block(&self) -> (Array2<f64>, Array1<f64>) {
        let idx = self.training_indices();
        (
            self.inputs.select(Axis(0), &idx),
            self.outputs.select(Axis(0), &idx),
        )
    }

    /// Current validation block; fails unless the state is `Validating(k)`
    pub fn validation_block(&self) -> Result<(Array2<f64>, Array1<f64>)> {
        match self.state {
            PartitionState::Validating(k) => {
                let idx: Vec<usize> = self.block_range(k).collect();
                Ok((
                    self.inputs.select(Axis(0), &idx),
                    self.outputs.select(Axis(0), &idx),
                ))
            }
            _ => Err(EmulatorError::PartitionExhausted(format!(
                "no current validation block in state {:?}",
                self.state
            ))),
        }
    }

    /// Fold the current validation block into training and advance.
    pub fn promote(&mut self) -> Result<PartitionState> {
        match self.state {
            PartitionState::Validating(k) => {
                self.consumed += 1;
                self.state = if k + 1 < self.plan.n_sets {
                    PartitionState::Validating(k + 1)
                } else {
                    PartitionState::Exhausted
                };
                Ok(self.state)
            }
            _ => Err(EmulatorError::PartitionExhausted(format!(
                "cannot promote in state {:?}",
                self.state
            ))),
        }
    }

    /// Move to `FinalBuild`: every remaining validation block is folded into
    /// training so the final refit sees the entire dataset. When no
    /// validation blocks were ever configured there is nothing to fold.
    pub fn finalize(&mut self) -> PartitionState {
        if self.plan.n_sets != 0 {
            self.consumed = self.plan.n_sets;
        }
        self.state = PartitionState::FinalBuild;
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array, Array2};

    fn dataset(n: usize) -> (Array2<f64>, Array1<f64>) {
        let x = Array::linspace(0., 1., n).insert_axis(Axis(1));
        let y = x.column(0).mapv(|v| (2. * std::f64::consts::PI * v).sin());
        (x, y)
    }

    fn three_set_partition() -> DatasetPartition {
        let (x, y) = dataset(20);
        DatasetPartition::new(
            x,
            y,
            SplitPlan {
                n_sets: 3,
                first_index: 8,
                per_set: 4,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_promotion_walk() {
        let mut part = three_set_partition();
        assert_eq!(part.state(), PartitionState::Validating(0));
        assert_eq!(part.n_training(), 8);

        let mut sizes = vec![part.n_training()];
        assert_eq!(part.promote().unwrap(), PartitionState::Validating(1));
        sizes.push(part.n_training());
        assert_eq!(part.promote().unwrap(), PartitionState::Validating(2));
        sizes.push(part.n_training());
        assert_eq!(part.promote().unwrap(), PartitionState::Exhausted);
        sizes.push(part.n_training());

        // each promotion grows training by exactly one block
        assert_eq!(sizes, vec![8, 12, 16, 20]);
        assert!(part.promote().is_err());
    }

    #[test]
    fn test_blocks_cover_dataset_without_overlap() {
        let mut part = three_set_partition();
        while let PartitionState::Validating(_) = part.state() {
            let (xt, _) = part.training_block();
            let (xv, _) = part.validation_block().unwrap();
            assert_eq!(
                xt.nrows() + xv.nrows() + (part.n_validation_remaining() - 1) * 4,
                part.len()
            );
            part.promote().unwrap();
        }
        let (xt, yt) = part.training_block();
        assert_eq!(xt.nrows(), 20);
        assert_eq!(yt.len(), 20);
    }

    #[test]
    fn test_exhausted_has_no_validation_block() {
        let mut part = three_set_partition();
        for _ in 0..3 {
            part.promote().unwrap();
        }
        let err = part.validation_block().unwrap_err();
        assert!(matches!(err, EmulatorError::PartitionExhausted(_)));
    }

    #[test]
    fn test_finalize_folds_everything() {
        let mut part = three_set_partition();
        part.promote().unwrap();
        assert_eq!(part.finalize(), PartitionState::FinalBuild);
        assert_eq!(part.n_training(), 20);
        assert!(part.validation_block().is_err());
        assert!(part.promote().is_err());
    }

    #[test]
    fn test_training_only_plan() {
        let (x, y) = dataset(10);
        let mut part = DatasetPartition::new(x, y, SplitPlan::training_only()).unwrap();
        assert_eq!(part.state(), PartitionState::TrainingOnly);
        assert_eq!(part.n_training(), 10);
        assert!(part.validation_block().is_err());
        assert_eq!(part.finalize(), PartitionState::FinalBuild);
        assert_eq!(part.n_training(), 10);
    }

    #[test]
    fn test_overflowing_plan_rejected() {
        let (x, y) = dataset(10);
        let res = DatasetPartition::new(
            x,
            y,
            SplitPlan {
                n_sets: 3,
                first_index: 5,
                per_set: 2,
            },
        );
        assert!(res.is_err());
    }
}
