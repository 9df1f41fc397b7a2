//! Posterior prediction and validation diagnostics.
//!
//! A [`Posterior`] borrows a freshly built [`RegressionState`] and evaluates
//! the predictive mean, variance and full covariance at new points. It also
//! computes the two diagnostics used to decide whether a trained emulator is
//! trustworthy on held-out data: the Mahalanobis distance of the validation
//! outputs under the full predictive covariance, and the individual
//! standardized errors.

use ndarray::{Array, Array1, Array2, Axis};

use linfa_linalg::{cholesky::*, triangular::*};

use crate::errors::{EmulatorError, Result};
use crate::state::RegressionState;
use crate::utils::pairwise_differences;

/// Default flagging threshold on the individual standardized errors
pub const ISE_THRESHOLD: f64 = 2.0;

/// Diagnostics of one validation round.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    /// Mahalanobis distance of the validation outputs
    pub mahalanobis: f64,
    /// Its expected value under a correct emulator (the number of points)
    pub mahalanobis_expected: f64,
    /// Standardized error of each validation point
    pub standard_errors: Array1<f64>,
    /// Indices of the points whose |standardized error| exceeds the threshold
    pub flagged: Vec<usize>,
    /// Threshold the errors were compared against
    pub threshold: f64,
}

/// Predictive distribution of a built regression state.
pub struct Posterior<'a> {
    state: &'a RegressionState,
}

impl<'a> Posterior<'a> {
    /// Borrow the posterior of `state`. Fails if the state was never rebuilt
    /// or is stale with respect to the shared hyperparameters.
    pub fn of(state: &'a RegressionState) -> Result<Posterior<'a>> {
        state.artifacts()?;
        Ok(Posterior { state })
    }

    /// Predict output values at n given `x` points of nx components specified
    /// as a (n, nx) matrix. Returns n scalar output values as a vector (n,).
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        self.check_points(x)?;
        let inners = self.state.artifacts()?;
        let xnorm = self.state.normalize_inputs(x);
        // Compute the mean term at x
        let f = self.state.trend().value(&xnorm);
        // Compute the correlation term at x
        let corr = self.compute_correlation(&xnorm)?;
        // Scaled predictor
        let y_ = &f.dot(&inners.beta) + &corr.dot(&inners.gamma);
        // Predictor
        let yt = self.state.yt();
        Ok((&y_ * &yt.std + &yt.mean).remove_axis(Axis(1)))
    }

    /// Predict variance values at n given `x` points of nx components
    /// specified as a (n, nx) matrix. Returns n variance values as a (n,)
    /// vector.
    pub fn predict_var(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        self.check_points(x)?;
        let inners = self.state.artifacts()?;
        let xnorm = self.state.normalize_inputs(x);
        let corr = self.compute_correlation(&xnorm)?;
        let (rt, u) = self.compute_rt_u(&xnorm, &corr)?;

        let mut mse = Array::ones(rt.ncols()) - rt.mapv(|v| v * v).sum_axis(Axis(0))
            + u.mapv(|v: f64| v * v).sum_axis(Axis(0));
        mse.mapv_inplace(|v| inners.sigma2 * v);

        // Mean Squared Error might be slightly negative depending on
        // machine precision: set to zero in that case
        Ok(mse.mapv(|v| if v < 0. { 0. } else { v }))
    }

    /// Full predictive covariance matrix over the given `x` points.
    pub fn predict_cov(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.check_points(x)?;
        let inners = self.state.artifacts()?;
        let xnorm = self.state.normalize_inputs(x);
        let corr = self.compute_correlation(&xnorm)?;
        let (rt, u) = self.compute_rt_u(&xnorm, &corr)?;

        let theta = self.state.params().borrow().theta().to_owned();
        let cross_dx = pairwise_differences(&xnorm, &xnorm);
        let k = self.state.kernel().value(&cross_dx, &theta)?;
        let k = k.into_shape((xnorm.nrows(), xnorm.nrows())).unwrap();

        let mut cov_mx = k - rt.t().to_owned().dot(&rt) + u.t().dot(&u);
        cov_mx.mapv_inplace(|v| inners.sigma2 * v);
        Ok(cov_mx)
    }

    /// Diagnose the emulator against held-out outputs, with the default
    /// flagging threshold.
    pub fn validate(&self, x: &Array2<f64>, y: &Array1<f64>) -> Result<ValidationReport> {
        self.validate_with_threshold(x, y, ISE_THRESHOLD)
    }

    /// Diagnose the emulator against held-out outputs.
    ///
    /// The Mahalanobis distance accounts for the correlation between
    /// validation points through the full predictive covariance; its expected
    /// value for a well-specified emulator is the number of validation
    /// points. The standardized errors use the marginal variances only.
    pub fn validate_with_threshold(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        threshold: f64,
    ) -> Result<ValidationReport> {
        if x.nrows() != y.len() {
            return Err(EmulatorError::InvalidValue(format!(
                "validation size mismatch: {} input points vs {} outputs",
                x.nrows(),
                y.len()
            )));
        }
        if y.is_empty() {
            return Err(EmulatorError::InvalidValue(
                "validation needs at least 1 point".to_string(),
            ));
        }
        let inners = self.state.artifacts()?;
        let nugget = self.state.params().borrow().nugget();

        let mean = self.predict(x)?;
        let var = self.predict_var(x)?;
        let mut cov = self.predict_cov(x)?;

        let resid = (y - &mean).insert_axis(Axis(1));

        // Stabilize the factorization against clamped covariances
        let jitter = inners.sigma2 * nugget;
        for i in 0..cov.nrows() {
            cov[[i, i]] += jitter;
        }
        let cov_chol = cov
            .cholesky()
            .map_err(|e| EmulatorError::NonPositiveDefiniteCovariance(e.to_string()))?;
        let w = cov_chol.solve_triangular(&resid, UPLO::Lower)?;
        let mahalanobis = w.mapv(|v| v * v).sum();

        let floor = f64::EPSILON * inners.sigma2;
        let standard_errors = (y - &mean) / var.mapv(|v| v.max(floor).sqrt());
        let flagged = standard_errors
            .iter()
            .enumerate()
            .filter(|(_, e)| e.abs() > threshold)
            .map(|(i, _)| i)
            .collect::<Vec<_>>();

        Ok(ValidationReport {
            mahalanobis,
            mahalanobis_expected: y.len() as f64,
            standard_errors,
            flagged,
            threshold,
        })
    }

    /// Whitened-residual quadratic form of the held-out outputs.
    pub fn mahalanobis_distance(&self, x: &Array2<f64>, y: &Array1<f64>) -> Result<f64> {
        Ok(self.validate(x, y)?.mahalanobis)
    }

    /// Indices of the held-out points whose |standardized error| exceeds
    /// `threshold`.
    pub fn indiv_standard_error(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        threshold: f64,
    ) -> Result<Vec<usize>> {
        Ok(self.validate_with_threshold(x, y, threshold)?.flagged)
    }

    fn check_points(&self, x: &Array2<f64>) -> Result<()> {
        if x.ncols() != self.state.dim() {
            return Err(EmulatorError::InvalidValue(format!(
                "point dimension mismatch: expected {}, got {}",
                self.state.dim(),
                x.ncols()
            )));
        }
        Ok(())
    }

    /// Correlation matrix between `xnorm` and the (normalized) block inputs
    fn compute_correlation(&self, xnorm: &Array2<f64>) -> Result<Array2<f64>> {
        let xt = self.state.xt();
        // Get pairwise componentwise L1-distances to the input training set
        let dx = pairwise_differences(xnorm, &xt.data);
        let theta = self.state.params().borrow().theta().to_owned();
        let r = self.state.kernel().value(&dx, &theta)?;
        Ok(r.into_shape((xnorm.nrows(), xt.data.nrows())).unwrap())
    }

    /// Compute `rt` and `u` matrices, the shared parts of the variance and
    /// covariance computations.
    fn compute_rt_u(
        &self,
        xnorm: &Array2<f64>,
        corr: &Array2<f64>,
    ) -> Result<(Array2<f64>, Array2<f64>)> {
        let inners = self.state.artifacts()?;

        let corr_t = corr.t().to_owned();
        let rt = inners.r_chol.solve_triangular(&corr_t, UPLO::Lower)?;

        let rhs = inners.ft.t().dot(&rt) - self.state.trend().value(xnorm).t();
        let u = inners.ft_qr_r.t().solve_triangular(&rhs, UPLO::Lower)?;
        Ok((rt, u))
    }
}

/// One swept dimension of a prediction grid.
#[derive(Debug, Clone, Copy)]
pub struct GridSweep {
    /// Index of the input dimension to sweep
    pub dim: usize,
    /// Sweep range, inclusive on both ends
    pub range: (f64, f64),
    /// Number of grid values along this dimension
    pub n: usize,
}

/// Build a prediction grid by sweeping one or two input dimensions while
/// holding the remaining components at the values of `base`.
pub fn prediction_grid(base: &Array1<f64>, sweeps: &[GridSweep]) -> Result<Array2<f64>> {
    if sweeps.is_empty() || sweeps.len() > 2 {
        return Err(EmulatorError::InvalidValue(format!(
            "a prediction grid sweeps 1 or 2 dimensions, got {}",
            sweeps.len()
        )));
    }
    for s in sweeps {
        if s.dim >= base.len() {
            return Err(EmulatorError::InvalidValue(format!(
                "swept dimension {} out of range for {}-dimensional inputs",
                s.dim,
                base.len()
            )));
        }
        if s.n < 2 {
            return Err(EmulatorError::InvalidValue(
                "a grid sweep needs at least 2 values".to_string(),
            ));
        }
    }
    if sweeps.len() == 2 && sweeps[0].dim == sweeps[1].dim {
        return Err(EmulatorError::InvalidValue(
            "grid sweeps must cover distinct dimensions".to_string(),
        ));
    }

    let axis = |s: &GridSweep| Array::linspace(s.range.0, s.range.1, s.n);
    let grid: Vec<Array1<f64>> = match sweeps {
        [s0] => axis(s0)
            .iter()
            .map(|v| {
                let mut p = base.to_owned();
                p[s0.dim] = *v;
                p
            })
            .collect(),
        [s0, s1] => {
            let (a0, a1) = (axis(s0), axis(s1));
            let mut pts = Vec::with_capacity(s0.n * s1.n);
            for v0 in a0.iter() {
                for v1 in a1.iter() {
                    let mut p = base.to_owned();
                    p[s0.dim] = *v0;
                    p[s1.dim] = *v1;
                    pts.push(p);
                }
            }
            pts
        }
        _ => unreachable!(),
    };

    let mut out = Array2::zeros((grid.len(), base.len()));
    for (i, p) in grid.iter().enumerate() {
        out.row_mut(i).assign(p);
    }
    Ok(out)
}
