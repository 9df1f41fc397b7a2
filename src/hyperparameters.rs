//! The shared hyperparameter vector of an emulator.
//!
//! One [`HyperParams`] instance is shared (reference counted) between the
//! training regression state, the optimizer and the posterior computations,
//! so that every component always reads the same values. All mutation goes
//! through setters that validate the domain and bump a version counter;
//! regression states compare that counter against the version they were
//! built with and rebuild lazily when it moved.

use crate::errors::{EmulatorError, Result};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;

/// Default initial theta value
pub const DEFAULT_THETA_INIT: f64 = 1e-1;
/// Default search bounds for theta values
pub const DEFAULT_THETA_BOUNDS: (f64, f64) = (1e-2, 1e1);
/// Default nugget, a small diagonal term improving numerical stability
pub const DEFAULT_NUGGET: f64 = 100.0 * f64::EPSILON;

/// Kernel hyperparameters of an emulator: one inverse length scale per input
/// dimension plus the nugget. The process variance and the basis coefficients
/// are concentrated out of the likelihood and live in the fitted regression
/// state, not here.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HyperParams {
    theta: Array1<f64>,
    nugget: f64,
    bounds: (f64, f64),
    #[serde(skip)]
    version: u64,
}

impl HyperParams {
    /// Build a validated hyperparameter vector for `dim` input dimensions.
    /// A 1-element `theta` is broadcast to all dimensions.
    pub fn new(theta: &Array1<f64>, nugget: f64, bounds: (f64, f64), dim: usize) -> Result<Self> {
        let theta = if theta.len() == 1 {
            Array1::from_elem(dim, theta[0])
        } else if theta.len() == dim {
            theta.to_owned()
        } else {
            return Err(EmulatorError::InvalidHyperparameter(format!(
                "initial theta should be either 1-dim or dim of inputs ({}), got {}",
                dim,
                theta.len()
            )));
        };
        check_theta(&theta)?;
        check_nugget(nugget)?;
        if !(bounds.0 > 0. && bounds.1 > bounds.0) {
            return Err(EmulatorError::InvalidHyperparameter(format!(
                "theta bounds must satisfy 0 < lower < upper, got {bounds:?}"
            )));
        }
        Ok(HyperParams {
            theta,
            nugget,
            bounds,
            version: 0,
        })
    }

    /// Current theta values
    pub fn theta(&self) -> &Array1<f64> {
        &self.theta
    }

    /// Nugget value
    pub fn nugget(&self) -> f64 {
        self.nugget
    }

    /// Search bounds for theta
    pub fn bounds(&self) -> (f64, f64) {
        self.bounds
    }

    /// Version counter, bumped on every mutation
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Replace theta, validating the domain and bumping the version.
    pub fn set_theta(&mut self, theta: Array1<f64>) -> Result<()> {
        if theta.len() != self.theta.len() {
            return Err(EmulatorError::InvalidHyperparameter(format!(
                "theta length cannot change ({} != {})",
                theta.len(),
                self.theta.len()
            )));
        }
        check_theta(&theta)?;
        self.theta = theta;
        self.version += 1;
        Ok(())
    }

    /// Replace the nugget, bumping the version.
    pub fn set_nugget(&mut self, nugget: f64) -> Result<()> {
        check_nugget(nugget)?;
        self.nugget = nugget;
        self.version += 1;
        Ok(())
    }
}

fn check_theta(theta: &Array1<f64>) -> Result<()> {
    if let Some(v) = theta.iter().find(|v| !v.is_finite() || **v <= 0.) {
        return Err(EmulatorError::InvalidHyperparameter(format!(
            "length scale parameters must be finite and > 0, got {v}"
        )));
    }
    Ok(())
}

fn check_nugget(nugget: f64) -> Result<()> {
    if !nugget.is_finite() || nugget < 0. {
        return Err(EmulatorError::InvalidHyperparameter(format!(
            "nugget must be finite and >= 0, got {nugget}"
        )));
    }
    Ok(())
}

/// The shared handle every regression state holds. Single-threaded by
/// design: the training loop mutates in strict sequence.
pub type SharedHyperParams = Rc<RefCell<HyperParams>>;

/// Wrap validated hyperparameters into a shared handle.
pub fn shared(params: HyperParams) -> SharedHyperParams {
    Rc::new(RefCell::new(params))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_broadcast_init() {
        let hp = HyperParams::new(&array![0.5], DEFAULT_NUGGET, DEFAULT_THETA_BOUNDS, 3).unwrap();
        assert_eq!(hp.theta(), &array![0.5, 0.5, 0.5]);
        assert_eq!(hp.version(), 0);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(HyperParams::new(&array![-0.5], 1e-8, (1e-2, 1e1), 1).is_err());
        assert!(HyperParams::new(&array![0.5], -1e-8, (1e-2, 1e1), 1).is_err());
        assert!(HyperParams::new(&array![0.5, 0.5], 1e-8, (1e-2, 1e1), 3).is_err());
        assert!(HyperParams::new(&array![0.5], 1e-8, (1e1, 1e-2), 1).is_err());
    }

    #[test]
    fn test_version_bumps_on_mutation() {
        let hp = shared(HyperParams::new(&array![0.5], 1e-8, (1e-2, 1e1), 2).unwrap());
        hp.borrow_mut().set_theta(array![1., 2.]).unwrap();
        assert_eq!(hp.borrow().version(), 1);
        assert!(hp.borrow_mut().set_theta(array![1., -2.]).is_err());
        // failed mutation leaves value and version untouched
        assert_eq!(hp.borrow().version(), 1);
        assert_eq!(hp.borrow().theta(), &array![1., 2.]);
        hp.borrow_mut().set_nugget(1e-6).unwrap();
        assert_eq!(hp.borrow().version(), 2);
    }
}
