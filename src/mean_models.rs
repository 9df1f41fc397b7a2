//! A module for basis models giving the mean term of the emulator.
//! In practice small degree (<= 2) polynomial bases are used, as the
//! gaussian process is then fitted on the correlated residual term.
//!
//! The following models are implemented:
//! * constant,
//! * linear,
//! * quadratic

use linfa::Float;
use ndarray::{concatenate, s, Array2, ArrayBase, Axis, Data, Ix2};
use paste::paste;
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;

/// A trait for mean models used in emulator regression
pub trait RegressionModel<F: Float>: Clone + Copy + Default + fmt::Display + Sync {
    /// Compute the design matrix defining the mean behaviour of the emulator
    /// for the given `x` data points specified as an (n, dim) matrix.
    fn value(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array2<F>;
}

/// A constant function as mean of the emulator
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct ConstantMean();

impl<F: Float> RegressionModel<F> for ConstantMean {
    /// Zero order polynomial (constant) regression model.
    /// regr(x) = [1, ..., 1].T
    fn value(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array2<F> {
        Array2::<F>::ones((x.nrows(), 1))
    }
}

/// An affine function as mean of the emulator
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct LinearMean();

impl<F: Float> RegressionModel<F> for LinearMean {
    /// First order polynomial (linear) regression model.
    /// regr(x) = [ 1, x_1, ..., x_n ].T
    fn value(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array2<F> {
        concatenate![Axis(1), Array2::ones((x.nrows(), 1)), x.to_owned()]
    }
}

/// A 2-degree polynomial as mean of the emulator
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct QuadraticMean();

impl<F: Float> RegressionModel<F> for QuadraticMean {
    /// Second order polynomial (quadratic) regression model.
    /// regr(x) = [ 1, { x_i, i = 1,...,n }, { x_i * x_j,  (i,j) = 1,...,n  , j >= i } ].T
    fn value(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array2<F> {
        let mut res = concatenate![Axis(1), Array2::ones((x.nrows(), 1)), x.to_owned()];
        for k in 0..x.ncols() {
            let part = x.slice(s![.., k..]).to_owned() * x.slice(s![.., k..k + 1]);
            res = concatenate![Axis(1), res, part]
        }
        res
    }
}

macro_rules! declare_mean_util_impls {
    ($regr:ident) => {
        paste! {
            impl fmt::Display for [<$regr Mean>] {
                fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                    write!(f, "{}Mean", stringify!($regr))
                }
            }

            impl From<[<$regr Mean>]> for String {
                fn from(_item: [<$regr Mean>]) -> Self {
                    [<$regr Mean>]().to_string()
                }
            }

            impl TryFrom<String> for [<$regr Mean>] {
                type Error = &'static str;
                fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
                    if s == concat!(stringify!($regr), "Mean") {
                        Ok(Self::default())
                    } else {
                        Err(concat!(
                            "Bad string value for ",
                            stringify!($regr),
                            "Mean, should be '",
                            stringify!($regr),
                            "Mean'"
                        ))
                    }
                }
            }
        }
    };
}

declare_mean_util_impls!(Constant);
declare_mean_util_impls!(Linear);
declare_mean_util_impls!(Quadratic);

/// The closed set of basis (mean function) models, fixed at configuration
/// time from the beliefs file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Trend {
    /// Constant mean (default)
    Constant,
    /// Linear mean
    Linear,
    /// Quadratic mean
    Quadratic,
}

impl Default for Trend {
    fn default() -> Self {
        Trend::Constant
    }
}

impl Trend {
    /// Evaluate the basis design matrix on the given (n, dim) inputs
    pub fn value(&self, x: &Array2<f64>) -> Array2<f64> {
        match self {
            Trend::Constant => ConstantMean().value(x),
            Trend::Linear => LinearMean().value(x),
            Trend::Quadratic => QuadraticMean().value(x),
        }
    }

    /// Number of basis functions for inputs of dimension `dim`
    pub fn n_basis(&self, dim: usize) -> usize {
        match self {
            Trend::Constant => 1,
            Trend::Linear => 1 + dim,
            Trend::Quadratic => 1 + dim + dim * (dim + 1) / 2,
        }
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Trend::Constant => ConstantMean().fmt(f),
            Trend::Linear => LinearMean().fmt(f),
            Trend::Quadratic => QuadraticMean().fmt(f),
        }
    }
}

impl From<Trend> for String {
    fn from(item: Trend) -> String {
        item.to_string()
    }
}

impl TryFrom<String> for Trend {
    type Error = &'static str;
    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        match s.as_str() {
            "ConstantMean" => Ok(Trend::Constant),
            "LinearMean" => Ok(Trend::Linear),
            "QuadraticMean" => Ok(Trend::Quadratic),
            _ => Err("Bad mean name, should be one of 'ConstantMean', 'LinearMean', 'QuadraticMean'"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_quadratic() {
        let a = array![[1., 2., 3.], [3., 4., 5.]];
        let actual = QuadraticMean::default().value(&a);
        let expected = array![
            [1.0, 1.0, 2.0, 3.0, 1.0, 2.0, 3.0, 4.0, 6.0, 9.0],
            [1.0, 3.0, 4.0, 5.0, 9.0, 12.0, 15.0, 16.0, 20.0, 25.0]
        ];
        assert_abs_diff_eq!(expected, actual);
    }

    #[test]
    fn test_quadratic2() {
        let a = array![[0.], [7.], [25.]];
        let actual = QuadraticMean::default().value(&a);
        let expected = array![[1., 0., 0.], [1., 7., 49.], [1., 25., 625.]];
        assert_abs_diff_eq!(expected, actual);
    }

    #[test]
    fn test_n_basis() {
        assert_eq!(Trend::Constant.n_basis(3), 1);
        assert_eq!(Trend::Linear.n_basis(3), 4);
        assert_eq!(Trend::Quadratic.n_basis(3), 10);
        let x = array![[1., 2., 3.], [3., 4., 5.]];
        for trend in [Trend::Constant, Trend::Linear, Trend::Quadratic] {
            assert_eq!(trend.value(&x).ncols(), trend.n_basis(3));
        }
    }

    #[test]
    fn test_trend_name_roundtrip() {
        for t in [Trend::Constant, Trend::Linear, Trend::Quadratic] {
            let s: String = t.into();
            assert_eq!(Trend::try_from(s).unwrap(), t);
        }
        assert!(Trend::try_from("CubicMean".to_string()).is_err());
    }

    #[test]
    fn test_utils() {
        assert_eq!("ConstantMean", ConstantMean().to_string());
    }
}
