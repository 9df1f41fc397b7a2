//! A module for correlation kernels modeling the error term of the emulator.
//!
//! The following kernels are implemented:
//! * squared exponential,
//! * matern 3/2,
//! * matern 5/2.
//!
//! All kernels use one inverse length scale parameter per input dimension.

use crate::errors::{EmulatorError, Result};
use linfa::Float;
use ndarray::{Array1, Array2, ArrayBase, Data, Ix1, Ix2, Zip};
use paste::paste;
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;

/// A trait for using a correlation kernel in emulator regression.
///
/// A kernel computes the correlation column r(x, x') from the componentwise
/// differences `d` between x and x' given `theta`, the inverse length scale
/// per input dimension. The output has shape (d.nrows(), 1).
pub trait CorrelationModel<F: Float>: Clone + Copy + Default + fmt::Display + Sync {
    /// Compute correlation values given differences `d` (n, dim) and
    /// hyperparameters `theta` (dim,)
    fn value(
        &self,
        d: &ArrayBase<impl Data<Elem = F>, Ix2>,
        theta: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Array2<F>;
}

/// Squared exponential correlation kernel
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct SquaredExponentialCorr();

impl<F: Float> CorrelationModel<F> for SquaredExponentialCorr {
    ///   d
    /// prod exp( - |theta_j * d_j|^2 / 2 )
    ///  j=1
    fn value(
        &self,
        d: &ArrayBase<impl Data<Elem = F>, Ix2>,
        theta: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Array2<F> {
        let theta2 = theta.mapv(|v| v * v);
        let r = d.mapv(|v| v * v).dot(&theta2);
        r.mapv(|v| F::exp(F::cast(-0.5) * v))
            .into_shape((d.nrows(), 1))
            .unwrap()
    }
}

/// Matern 3/2 correlation kernel
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Matern32Corr();

impl<F: Float> CorrelationModel<F> for Matern32Corr {
    ///   d
    /// prod (1 + sqrt(3) * theta_j * |d_j|) exp( - sqrt(3) * theta_j * |d_j| )
    ///  j=1
    fn value(
        &self,
        d: &ArrayBase<impl Data<Elem = F>, Ix2>,
        theta: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Array2<F> {
        let sqrt3 = F::cast(3.).sqrt();
        let abs_d = d.mapv(|v| v.abs());

        let mut a = Array1::ones(d.nrows());
        Zip::from(&mut a).and(abs_d.rows()).for_each(|a_i, d_i| {
            *a_i = d_i
                .iter()
                .zip(theta.iter())
                .fold(F::one(), |acc, (d_ij, t_j)| {
                    acc * (F::one() + sqrt3 * *t_j * *d_ij)
                });
        });
        let b = abs_d.dot(theta).mapv(|v| F::exp(-sqrt3 * v));

        (a * b).into_shape((d.nrows(), 1)).unwrap()
    }
}

/// Matern 5/2 correlation kernel
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Matern52Corr();

impl<F: Float> CorrelationModel<F> for Matern52Corr {
    ///   d
    /// prod (1 + sqrt(5) * theta_j * |d_j| + (5/3) * theta_j^2 * d_j^2) exp( - sqrt(5) * theta_j * |d_j| )
    ///  j=1
    fn value(
        &self,
        d: &ArrayBase<impl Data<Elem = F>, Ix2>,
        theta: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Array2<F> {
        let sqrt5 = F::cast(5.).sqrt();
        let div5_3 = F::cast(5. / 3.);
        let abs_d = d.mapv(|v| v.abs());

        let mut a = Array1::ones(d.nrows());
        Zip::from(&mut a).and(abs_d.rows()).for_each(|a_i, d_i| {
            *a_i = d_i
                .iter()
                .zip(theta.iter())
                .fold(F::one(), |acc, (d_ij, t_j)| {
                    let v = *t_j * *d_ij;
                    acc * (F::one() + sqrt5 * v + div5_3 * v * v)
                });
        });
        let b = abs_d.dot(theta).mapv(|v| F::exp(-sqrt5 * v));

        (a * b).into_shape((d.nrows(), 1)).unwrap()
    }
}

macro_rules! declare_corr_util_impls {
    ($corr:ident) => {
        paste! {
            impl fmt::Display for [<$corr Corr>] {
                fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                    write!(f, "{}", stringify!($corr))
                }
            }

            impl From<[<$corr Corr>]> for String {
                fn from(_item: [<$corr Corr>]) -> Self {
                    [<$corr Corr>]().to_string()
                }
            }

            impl TryFrom<String> for [<$corr Corr>] {
                type Error = &'static str;
                fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
                    if s == stringify!($corr) {
                        Ok(Self::default())
                    } else {
                        Err(concat!(
                            "Bad string value for ",
                            stringify!($corr),
                            "Corr, should be '",
                            stringify!($corr),
                            "'"
                        ))
                    }
                }
            }
        }
    };
}

declare_corr_util_impls!(SquaredExponential);
declare_corr_util_impls!(Matern32);
declare_corr_util_impls!(Matern52);

/// The closed set of correlation kernels an emulator can be configured with.
///
/// The kernel is chosen once, at configuration time, from the beliefs file;
/// callers go through this enum so that swapping the kernel never touches them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Kernel {
    /// Squared exponential (default)
    SquaredExponential,
    /// Matern 3/2
    Matern32,
    /// Matern 5/2
    Matern52,
}

impl Default for Kernel {
    fn default() -> Self {
        Kernel::SquaredExponential
    }
}

impl Kernel {
    /// Check hyperparameter domain constraints for this kernel: one strictly
    /// positive, finite inverse length scale per input dimension.
    ///
    /// Called before any matrix computation is attempted.
    pub fn check_theta(&self, theta: &Array1<f64>, dim: usize) -> Result<()> {
        if theta.len() != dim {
            return Err(EmulatorError::InvalidHyperparameter(format!(
                "expected {} length scale parameters, got {}",
                dim,
                theta.len()
            )));
        }
        if let Some(v) = theta.iter().find(|v| !v.is_finite() || **v <= 0.) {
            return Err(EmulatorError::InvalidHyperparameter(format!(
                "length scale parameters must be finite and > 0, got {v}"
            )));
        }
        Ok(())
    }

    /// Compute correlation values given differences `d` (n, dim) and
    /// checked hyperparameters `theta` (dim,)
    pub fn value(&self, d: &Array2<f64>, theta: &Array1<f64>) -> Result<Array2<f64>> {
        self.check_theta(theta, d.ncols())?;
        Ok(match self {
            Kernel::SquaredExponential => SquaredExponentialCorr().value(d, theta),
            Kernel::Matern32 => Matern32Corr().value(d, theta),
            Kernel::Matern52 => Matern52Corr().value(d, theta),
        })
    }
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Kernel::SquaredExponential => SquaredExponentialCorr().fmt(f),
            Kernel::Matern32 => Matern32Corr().fmt(f),
            Kernel::Matern52 => Matern52Corr().fmt(f),
        }
    }
}

impl From<Kernel> for String {
    fn from(item: Kernel) -> String {
        item.to_string()
    }
}

impl TryFrom<String> for Kernel {
    type Error = &'static str;
    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        match s.as_str() {
            "SquaredExponential" => Ok(Kernel::SquaredExponential),
            "Matern32" => Ok(Kernel::Matern32),
            "Matern52" => Ok(Kernel::Matern52),
            _ => Err("Bad kernel name, should be one of 'SquaredExponential', 'Matern32', 'Matern52'"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::DiffMatrix;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, array};

    #[test]
    fn test_squared_exponential() {
        let xt = array![[4.5], [1.2], [2.0], [3.0], [4.0]];
        let dm = DiffMatrix::new(&xt);
        let res = SquaredExponentialCorr::default().value(&dm.d, &arr1(&[f64::sqrt(0.2)]));
        let expected = array![
            [0.336552878364737],
            [0.5352614285189903],
            [0.7985162187593771],
            [0.9753099120283326],
            [0.9380049995307295],
            [0.7232502423798424],
            [0.4565760496233148],
            [0.9048374180359595],
            [0.6703200460356393],
            [0.9048374180359595]
        ];
        assert_abs_diff_eq!(res, expected, epsilon = 1e-6);
    }

    #[test]
    fn test_squared_exponential_2d() {
        let xt = array![[0., 1.], [2., 3.], [4., 5.]];
        let dm = DiffMatrix::new(&xt);
        let res = SquaredExponentialCorr::default().value(&dm.d, &arr1(&[f64::sqrt(2.), 2.]));
        let expected = array![[6.14421235e-06], [1.42516408e-21], [6.14421235e-06]];
        assert_abs_diff_eq!(res, expected, epsilon = 1e-6);
    }

    #[test]
    fn test_matern32_2d() {
        let xt = array![[0., 1.], [2., 3.], [4., 5.]];
        let dm = DiffMatrix::new(&xt);
        let res = Matern32Corr::default().value(&dm.d, &arr1(&[1., 2.]));
        let expected = array![[1.08539595e-03], [1.10776401e-07], [1.08539595e-03]];
        assert_abs_diff_eq!(res, expected, epsilon = 1e-6);
    }

    #[test]
    fn test_matern52_2d() {
        let xt = array![[0., 1.], [2., 3.], [4., 5.]];
        let dm = DiffMatrix::new(&xt);
        let res = Matern52Corr::default().value(&dm.d, &arr1(&[1., 2.]));
        let expected = array![[6.62391590e-04], [1.02117882e-08], [6.62391590e-04]];
        assert_abs_diff_eq!(res, expected, epsilon = 1e-6);
    }

    #[test]
    fn test_negative_length_scale_rejected() {
        let kernel = Kernel::SquaredExponential;
        let theta = array![0.5, -1.0];
        let err = kernel.check_theta(&theta, 2).unwrap_err();
        assert!(matches!(
            err,
            crate::EmulatorError::InvalidHyperparameter(_)
        ));
        // value() must refuse before any matrix computation
        let d = array![[0.1, 0.2], [0.3, 0.4]];
        assert!(kernel.value(&d, &theta).is_err());
    }

    #[test]
    fn test_zero_length_scale_rejected() {
        let kernel = Kernel::Matern52;
        assert!(kernel.check_theta(&array![0.], 1).is_err());
        assert!(kernel.check_theta(&array![f64::NAN], 1).is_err());
        assert!(kernel.check_theta(&array![1.], 2).is_err());
        assert!(kernel.check_theta(&array![1., 2.], 2).is_ok());
    }

    #[test]
    fn test_kernel_name_roundtrip() {
        for k in [
            Kernel::SquaredExponential,
            Kernel::Matern32,
            Kernel::Matern52,
        ] {
            let s: String = k.into();
            assert_eq!(Kernel::try_from(s).unwrap(), k);
        }
        assert!(Kernel::try_from("Gaussian".to_string()).is_err());
    }
}
