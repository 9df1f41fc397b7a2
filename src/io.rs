//! Loading and preparing the raw dataset files.
//!
//! Data files are plain text, one point per line, whitespace separated.
//! Lines that are empty or start with `#` are skipped.

use std::fs;
use std::path::Path;

use ndarray::{Array1, Array2, Axis};
use ndarray_rand::rand::seq::SliceRandom;
use ndarray_rand::rand::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;

use crate::errors::{EmulatorError, Result};

fn parse_rows(path: &Path) -> Result<Vec<Vec<f64>>> {
    let text = fs::read_to_string(path)?;
    let mut rows = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let row = line
            .split_whitespace()
            .map(|tok| {
                tok.parse::<f64>().map_err(|_| {
                    EmulatorError::InvalidValue(format!(
                        "{}:{}: not a number: {tok:?}",
                        path.display(),
                        lineno + 1
                    ))
                })
            })
            .collect::<Result<Vec<f64>>>()?;
        rows.push(row);
    }
    if rows.is_empty() {
        return Err(EmulatorError::InvalidValue(format!(
            "{}: no data rows",
            path.display()
        )));
    }
    Ok(rows)
}

/// Load a whitespace-delimited matrix; every row must have the same width.
pub fn load_matrix(path: &Path) -> Result<Array2<f64>> {
    let rows = parse_rows(path)?;
    let ncols = rows[0].len();
    if ncols == 0 || rows.iter().any(|r| r.len() != ncols) {
        return Err(EmulatorError::InvalidValue(format!(
            "{}: rows have inconsistent widths",
            path.display()
        )));
    }
    let mut out = Array2::zeros((rows.len(), ncols));
    for (i, row) in rows.iter().enumerate() {
        for (j, v) in row.iter().enumerate() {
            out[[i, j]] = *v;
        }
    }
    Ok(out)
}

/// Load a whitespace-delimited vector, one value per line.
pub fn load_vector(path: &Path) -> Result<Array1<f64>> {
    let rows = parse_rows(path)?;
    if rows.iter().any(|r| r.len() != 1) {
        return Err(EmulatorError::InvalidValue(format!(
            "{}: expected one value per line",
            path.display()
        )));
    }
    Ok(rows.iter().map(|r| r[0]).collect())
}

/// Shuffle the dataset rows in place, keeping inputs and outputs paired.
pub fn shuffle_dataset(inputs: &mut Array2<f64>, outputs: &mut Array1<f64>, seed: u64) {
    let mut idx: Vec<usize> = (0..inputs.nrows()).collect();
    let mut rng = Xoshiro256Plus::seed_from_u64(seed);
    idx.shuffle(&mut rng);
    *inputs = inputs.select(Axis(0), &idx);
    *outputs = outputs.select(Axis(0), &idx);
}

/// Per-dimension (min, max) ranges recorded when inputs are scaled, so that
/// later prediction points can be mapped into the same unit cube.
#[derive(Debug, Clone)]
pub struct InputScaling {
    /// (min, max) of each input dimension over the fitted dataset
    pub ranges: Vec<(f64, f64)>,
}

impl InputScaling {
    /// Scale dataset inputs to the unit cube, column by column. A constant
    /// column is left untouched.
    pub fn fit(inputs: &Array2<f64>) -> InputScaling {
        let ranges = inputs
            .columns()
            .into_iter()
            .map(|col| {
                let min = col.iter().cloned().fold(f64::INFINITY, f64::min);
                let max = col.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                (min, max)
            })
            .collect();
        InputScaling { ranges }
    }

    /// Map `inputs` into the recorded ranges, column by column.
    pub fn apply(&self, inputs: &Array2<f64>) -> Array2<f64> {
        let mut out = inputs.to_owned();
        for (j, (min, max)) in self.ranges.iter().enumerate() {
            let span = max - min;
            if span > 0. {
                out.column_mut(j).mapv_inplace(|v| (v - min) / span);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use std::io::Write;

    fn temp_file(name: &str, content: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("gp-emulator-io-{name}-{}", std::process::id()));
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_matrix() {
        let path = temp_file("mx", "# two columns\n0.0 1.0\n\n2.5  -3.0\n");
        let mx = load_matrix(&path).unwrap();
        assert_abs_diff_eq!(mx, array![[0.0, 1.0], [2.5, -3.0]]);
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_load_matrix_ragged_rejected() {
        let path = temp_file("ragged", "0.0 1.0\n2.5\n");
        assert!(load_matrix(&path).is_err());
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_load_vector() {
        let path = temp_file("vec", "1.0\n-2.0\n0.5\n");
        let v = load_vector(&path).unwrap();
        assert_abs_diff_eq!(v, array![1.0, -2.0, 0.5]);
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_load_garbage_rejected() {
        let path = temp_file("bad", "1.0\nnope\n");
        assert!(load_vector(&path).is_err());
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_shuffle_keeps_pairs() {
        let mut x = array![[0.], [1.], [2.], [3.], [4.]];
        let mut y = array![0., 10., 20., 30., 40.];
        shuffle_dataset(&mut x, &mut y, 7);
        for i in 0..5 {
            assert_abs_diff_eq!(y[i], x[[i, 0]] * 10.);
        }
        // deterministic for a given seed
        let mut x2 = array![[0.], [1.], [2.], [3.], [4.]];
        let mut y2 = array![0., 10., 20., 30., 40.];
        shuffle_dataset(&mut x2, &mut y2, 7);
        assert_abs_diff_eq!(x, x2);
    }

    #[test]
    fn test_unit_scaling() {
        let x = array![[0., 5.], [2., 5.], [4., 5.]];
        let scaling = InputScaling::fit(&x);
        let scaled = scaling.apply(&x);
        assert_abs_diff_eq!(scaled.column(0).to_owned(), array![0., 0.5, 1.]);
        // constant column untouched
        assert_abs_diff_eq!(scaled.column(1).to_owned(), array![5., 5., 5.]);
    }
}
