//! The regression state over one block of input/output data.
//!
//! A [`RegressionState`] materializes everything the likelihood optimizer and
//! the posterior need for its block: the covariance matrix under the current
//! hyperparameters, its Cholesky factorization, the basis design matrix and
//! the generalized least-squares trend fit. The cached artifacts are tagged
//! with the hyperparameter version they were built from and go stale the
//! instant the shared vector changes; [`RegressionState::ensure_current`]
//! rebuilds them lazily.

use crate::correlation_models::Kernel;
use crate::errors::{EmulatorError, Result};
use crate::hyperparameters::SharedHyperParams;
use crate::mean_models::Trend;
use crate::utils::{DiffMatrix, NormalizedData};

use linfa_linalg::{cholesky::*, qr::*, svd::*, triangular::*};
use ndarray::{Array1, Array2, Axis};
use ndarray_stats::QuantileExt;

/// Artifacts of one generalized least-squares fit, valid for the
/// hyperparameter values they were computed from.
#[derive(Debug, Clone)]
pub(crate) struct FittedArtifacts {
    /// Process variance (on the raw output scale)
    pub sigma2: f64,
    /// Generalized least-squares basis coefficients
    pub beta: Array2<f64>,
    /// Gaussian process weights
    pub gamma: Array2<f64>,
    /// Cholesky decomposition of the correlation matrix \[R\]
    pub r_chol: Array2<f64>,
    /// Solution of the linear equation system : \[R\] x Ft = F
    pub ft: Array2<f64>,
    /// R upper triangle matrix of QR decomposition of the matrix Ft
    pub ft_qr_r: Array2<f64>,
    /// Reduced log-likelihood of the fit
    pub likelihood: f64,
}

/// Compute the reduced likelihood and the fit artifacts.
/// fx: basis design matrix at the block inputs,
/// rxx: correlation values for the pairwise differences,
/// x_distances: pairwise differences between the block inputs,
/// ytrain: normalized block outputs,
/// nugget: diagonal term to improve numerical stability
pub(crate) fn gls_fit(
    fx: &Array2<f64>,
    rxx: &Array2<f64>,
    x_distances: &DiffMatrix<f64>,
    ytrain: &NormalizedData<f64>,
    nugget: f64,
) -> Result<FittedArtifacts> {
    // Set up R
    let mut r_mx: Array2<f64> = Array2::<f64>::eye(x_distances.n_obs).mapv(|v| v + v * nugget);
    for (i, ij) in x_distances.d_indices.outer_iter().enumerate() {
        r_mx[[ij[0], ij[1]]] = rxx[[i, 0]];
        r_mx[[ij[1], ij[0]]] = rxx[[i, 0]];
    }

    // R cholesky decomposition
    let r_chol = r_mx
        .cholesky()
        .map_err(|e| EmulatorError::NonPositiveDefiniteCovariance(e.to_string()))?;

    // Solve generalized least squared problem
    let ft = r_chol.solve_triangular(fx, UPLO::Lower)?;
    let (ft_qr_q, ft_qr_r) = ft.qr()?.into_decomp();

    // Check whether we have an ill-conditionned problem
    let (_, sv_qr_r, _) = ft_qr_r.svd(false, false)?;
    let cond_ft = sv_qr_r[sv_qr_r.len() - 1] / sv_qr_r[0];
    if cond_ft < 1e-10 {
        let (_, sv_f, _) = fx.svd(false, false)?;
        let cond_fx = sv_f[0] / sv_f[sv_f.len() - 1];
        if cond_fx > 1e15 {
            return Err(EmulatorError::LikelihoodComputation(
                "F is too ill conditioned. Poor combination \
                of mean model and observations."
                    .to_string(),
            ));
        } else {
            // ft is too ill conditioned, get out (try different theta)
            return Err(EmulatorError::LikelihoodComputation(
                "ft is too ill conditioned, try another theta again".to_string(),
            ));
        }
    }
    let yt = r_chol.solve_triangular(&ytrain.data, UPLO::Lower)?;

    let beta = ft_qr_r.solve_triangular_into(ft_qr_q.t().dot(&yt), UPLO::Upper)?;
    let rho = yt - ft.dot(&beta);
    let rho_sqr = rho.mapv(|v| v * v).sum_axis(Axis(0));

    let gamma = r_chol.t().solve_triangular_into(rho, UPLO::Upper)?;

    // The determinant of R is equal to the squared product of
    // the diagonal elements of its Cholesky decomposition r_chol
    let n_obs = x_distances.n_obs as f64;
    let logdet = r_chol.diag().mapv(f64::log10).sum() * 2. / n_obs;

    // Reduced likelihood
    let sigma2 = rho_sqr / n_obs;
    let likelihood = -n_obs * (sigma2.sum().log10() + logdet);

    Ok(FittedArtifacts {
        sigma2: sigma2[0] * ytrain.std[0] * ytrain.std[0],
        beta,
        gamma,
        r_chol,
        ft,
        ft_qr_r,
        likelihood,
    })
}

/// Regression state over one block of inputs and outputs, bound to the
/// shared hyperparameter vector of its emulator.
#[derive(Debug, Clone)]
pub struct RegressionState {
    inputs: Array2<f64>,
    outputs: Array1<f64>,
    trend: Trend,
    kernel: Kernel,
    params: SharedHyperParams,
    xt: NormalizedData<f64>,
    yt: NormalizedData<f64>,
    distances: DiffMatrix<f64>,
    fx: Array2<f64>,
    fitted: Option<FittedArtifacts>,
    built_version: Option<u64>,
}

impl RegressionState {
    /// Assign a block of data to a new regression state. The derived
    /// artifacts are not built yet; call [`RegressionState::rebuild`] or
    /// [`RegressionState::ensure_current`] before using them.
    pub fn new(
        inputs: Array2<f64>,
        outputs: Array1<f64>,
        trend: Trend,
        kernel: Kernel,
        params: SharedHyperParams,
    ) -> Result<RegressionState> {
        if inputs.nrows() != outputs.len() {
            return Err(EmulatorError::InvalidValue(format!(
                "block size mismatch: {} input points vs {} outputs",
                inputs.nrows(),
                outputs.len()
            )));
        }
        if inputs.nrows() < 2 {
            return Err(EmulatorError::InvalidValue(
                "a regression block needs at least 2 points".to_string(),
            ));
        }
        let xt = NormalizedData::new(&inputs);
        let yt = NormalizedData::new(&outputs.to_owned().insert_axis(Axis(1)));
        let distances = DiffMatrix::new(&xt.data);
        let sums = distances.d.mapv(f64::abs).sum_axis(Axis(1));
        if let Ok(min) = sums.min() {
            if *min == 0. {
                log::warn!("multiple input points have the same value (at least same row twice)");
            }
        }
        let fx = trend.value(&xt.data);
        Ok(RegressionState {
            inputs,
            outputs,
            trend,
            kernel,
            params,
            xt,
            yt,
            distances,
            fx,
            fitted: None,
            built_version: None,
        })
    }

    /// Number of points in the block
    pub fn n_points(&self) -> usize {
        self.inputs.nrows()
    }

    /// Input dimension
    pub fn dim(&self) -> usize {
        self.inputs.ncols()
    }

    /// Block inputs
    pub fn inputs(&self) -> &Array2<f64> {
        &self.inputs
    }

    /// Block outputs
    pub fn outputs(&self) -> &Array1<f64> {
        &self.outputs
    }

    /// Basis model
    pub fn trend(&self) -> Trend {
        self.trend
    }

    /// Correlation kernel
    pub fn kernel(&self) -> Kernel {
        self.kernel
    }

    /// Shared hyperparameter handle
    pub fn params(&self) -> &SharedHyperParams {
        &self.params
    }

    /// Basis design matrix evaluated on the (normalized) block inputs
    pub fn design_matrix(&self) -> &Array2<f64> {
        &self.fx
    }

    pub(crate) fn xt(&self) -> &NormalizedData<f64> {
        &self.xt
    }

    pub(crate) fn yt(&self) -> &NormalizedData<f64> {
        &self.yt
    }

    /// Whether the cached artifacts match the current hyperparameter version
    pub fn is_current(&self) -> bool {
        self.built_version == Some(self.params.borrow().version())
    }

    /// Recompute covariance, factorization and the trend fit from the
    /// current hyperparameters, unconditionally.
    pub fn rebuild(&mut self) -> Result<()> {
        let (theta, nugget, version) = {
            let p = self.params.borrow();
            (p.theta().to_owned(), p.nugget(), p.version())
        };
        self.kernel.check_theta(&theta, self.dim())?;
        let rxx = self.kernel.value(&self.distances.d, &theta)?;
        let fitted = gls_fit(&self.fx, &rxx, &self.distances, &self.yt, nugget)?;
        self.fitted = Some(fitted);
        self.built_version = Some(version);
        Ok(())
    }

    /// Rebuild only if the hyperparameters changed since the last build.
    pub fn ensure_current(&mut self) -> Result<()> {
        if self.is_current() {
            return Ok(());
        }
        self.rebuild()
    }

    /// Evaluate the reduced log-likelihood for a candidate theta without
    /// touching the cached artifacts or the shared vector.
    pub fn likelihood_of(&self, theta: &Array1<f64>) -> Result<f64> {
        self.kernel.check_theta(theta, self.dim())?;
        let nugget = self.params.borrow().nugget();
        let rxx = self.kernel.value(&self.distances.d, theta)?;
        let fitted = gls_fit(&self.fx, &rxx, &self.distances, &self.yt, nugget)?;
        Ok(fitted.likelihood)
    }

    /// Reduced log-likelihood of the last build
    pub fn log_likelihood(&self) -> Result<f64> {
        Ok(self.artifacts()?.likelihood)
    }

    /// Process variance of the last build (raw output scale)
    pub fn sigma2(&self) -> Result<f64> {
        Ok(self.artifacts()?.sigma2)
    }

    /// Generalized least-squares basis coefficients of the last build
    /// (normalized output scale)
    pub fn beta(&self) -> Result<Array1<f64>> {
        Ok(self.artifacts()?.beta.column(0).to_owned())
    }

    /// Cholesky factor of the correlation matrix of the last build
    pub fn correlation_cholesky(&self) -> Result<&Array2<f64>> {
        Ok(&self.artifacts()?.r_chol)
    }

    /// Residuals after the fitted mean function is subtracted, on the raw
    /// output scale.
    pub fn residuals(&self) -> Result<Array1<f64>> {
        let arts = self.artifacts()?;
        let res = (&self.yt.data - &self.fx.dot(&arts.beta)) * self.yt.std[0];
        Ok(res.remove_axis(Axis(1)))
    }

    pub(crate) fn artifacts(&self) -> Result<&FittedArtifacts> {
        if !self.is_current() {
            return Err(EmulatorError::InvalidValue(
                "regression state is stale: hyperparameters changed since the last rebuild"
                    .to_string(),
            ));
        }
        self.fitted.as_ref().ok_or_else(|| {
            EmulatorError::InvalidValue("regression state has never been rebuilt".to_string())
        })
    }

    pub(crate) fn normalize_inputs(&self, x: &Array2<f64>) -> Array2<f64> {
        (x - &self.xt.mean) / &self.xt.std
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hyperparameters::{shared, HyperParams, DEFAULT_NUGGET, DEFAULT_THETA_BOUNDS};
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array, Array1, Axis};

    fn xsinx(x: &Array2<f64>) -> Array1<f64> {
        ((x - 3.5) * (x - 3.5).mapv(|v| (v / std::f64::consts::PI).sin())).remove_axis(Axis(1))
    }

    fn sample_state(theta: f64) -> RegressionState {
        let xt = Array::linspace(0., 25., 12).insert_axis(Axis(1));
        let yt = xsinx(&xt);
        let params = shared(
            HyperParams::new(&array![theta], DEFAULT_NUGGET, DEFAULT_THETA_BOUNDS, 1).unwrap(),
        );
        RegressionState::new(
            xt,
            yt,
            Trend::Constant,
            Kernel::SquaredExponential,
            params,
        )
        .unwrap()
    }

    #[test]
    fn test_rebuild_idempotent() {
        let mut state = sample_state(1.0);
        state.rebuild().unwrap();
        let chol_1 = state.correlation_cholesky().unwrap().to_owned();
        let lkh_1 = state.log_likelihood().unwrap();
        state.rebuild().unwrap();
        assert_abs_diff_eq!(chol_1, state.correlation_cholesky().unwrap().to_owned());
        assert_abs_diff_eq!(lkh_1, state.log_likelihood().unwrap());
    }

    #[test]
    fn test_staleness_tracking() {
        let mut state = sample_state(1.0);
        assert!(state.artifacts().is_err());
        state.rebuild().unwrap();
        assert!(state.is_current());
        let lkh_1 = state.log_likelihood().unwrap();

        state.params().borrow_mut().set_theta(array![2.0]).unwrap();
        assert!(!state.is_current());
        assert!(state.log_likelihood().is_err());

        state.ensure_current().unwrap();
        let lkh_2 = state.log_likelihood().unwrap();
        assert!((lkh_1 - lkh_2).abs() > 0.);
    }

    #[test]
    fn test_likelihood_of_does_not_mutate() {
        let mut state = sample_state(1.0);
        state.rebuild().unwrap();
        let lkh = state.log_likelihood().unwrap();
        let _ = state.likelihood_of(&array![0.3]).unwrap();
        assert!(state.is_current());
        assert_abs_diff_eq!(lkh, state.log_likelihood().unwrap());
    }

    #[test]
    fn test_mismatched_block_rejected() {
        let params = shared(
            HyperParams::new(&array![1.0], DEFAULT_NUGGET, DEFAULT_THETA_BOUNDS, 1).unwrap(),
        );
        let res = RegressionState::new(
            array![[0.], [1.], [2.]],
            array![0., 1.],
            Trend::Constant,
            Kernel::SquaredExponential,
            params,
        );
        assert!(res.is_err());
    }

    #[test]
    fn test_non_positive_definite_covariance() {
        // A correlation value > 1 makes R indefinite whatever the nugget
        let x = array![[0.], [1.]];
        let distances = DiffMatrix::new(&x);
        let rxx = array![[2.0]];
        let fx = Array2::ones((2, 1));
        let ytrain = NormalizedData::new(&array![[0.], [1.]]);
        let err = gls_fit(&fx, &rxx, &distances, &ytrain, 0.).unwrap_err();
        assert!(matches!(
            err,
            EmulatorError::NonPositiveDefiniteCovariance(_)
        ));
    }

    #[test]
    fn test_residuals_sum_small_for_constant_trend() {
        // With a constant trend the GLS residuals are centered
        let mut state = sample_state(0.5);
        state.rebuild().unwrap();
        let res = state.residuals().unwrap();
        assert_eq!(res.len(), state.n_points());
        assert!(res.mapv(f64::abs).sum() > 0.);
    }
}
