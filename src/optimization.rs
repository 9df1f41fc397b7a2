//! Multistart maximum-likelihood search for the kernel hyperparameters.
//!
//! The search works on `log10(theta)` so that length scales spanning several
//! orders of magnitude are explored evenly. Each start runs Cobyla on the
//! negated reduced likelihood; the best finite incumbent over all starts is
//! committed to the shared hyperparameter vector.

use std::cell::Cell;

use ndarray::{arr1, s, Array, Array1, Array2};
use ndarray_rand::rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;

use crate::errors::{EmulatorError, Result};
use crate::state::RegressionState;

/// Minimum evaluation budget handed to a single Cobyla start
pub(crate) const COBYLA_MIN_EVAL: usize = 25;

pub(crate) struct CobylaParams {
    pub rhobeg: f64,
    pub ftol_rel: f64,
    pub maxeval: usize,
}

impl Default for CobylaParams {
    fn default() -> Self {
        CobylaParams {
            rhobeg: 0.5,
            ftol_rel: 1e-4,
            maxeval: 200,
        }
    }
}

/// Settings of the multistart likelihood search.
#[derive(Debug, Clone)]
pub struct OptimizeOpts {
    /// Number of random starts in addition to the current theta
    pub n_start: usize,
    /// Evaluation budget per start
    pub max_eval: usize,
    /// Seed of the random start generator
    pub seed: u64,
}

impl Default for OptimizeOpts {
    fn default() -> Self {
        OptimizeOpts {
            n_start: 10,
            max_eval: 200,
            seed: 42,
        }
    }
}

impl OptimizeOpts {
    /// Cheaper single-start search from the current theta only
    pub fn single() -> OptimizeOpts {
        OptimizeOpts {
            n_start: 0,
            ..OptimizeOpts::default()
        }
    }
}

/// Outcome of one multistart search.
#[derive(Debug, Clone)]
pub struct OptimizeReport {
    /// Best hyperparameters found (natural scale)
    pub theta: Array1<f64>,
    /// Reduced log-likelihood at the optimum
    pub likelihood: f64,
    /// Total objective evaluations over all starts
    pub n_evals: usize,
    /// Whether the winning start stopped before hitting its budget
    pub converged: bool,
}

pub(crate) fn prepare_multistart(
    n_start: usize,
    theta0: &Array1<f64>,
    bounds: &[(f64, f64)],
    seed: u64,
) -> (Array2<f64>, Vec<(f64, f64)>) {
    // Use log10 theta as optimization parameter
    let bounds: Vec<(f64, f64)> = bounds
        .iter()
        .map(|(lo, up)| (lo.log10(), up.log10()))
        .collect();

    // Multistart: current theta + random values on log10 scale
    let mut theta0s = Array2::zeros((n_start + 1, theta0.len()));
    theta0s.row_mut(0).assign(&theta0.mapv(f64::log10));

    let mut rng = Xoshiro256Plus::seed_from_u64(seed);
    for mut row in theta0s.slice_mut(s![1.., ..]).rows_mut() {
        let vals = bounds
            .iter()
            .map(|(a, b)| rng.gen_range(*a..*b))
            .collect::<Vec<_>>();
        row.assign(&Array::from_vec(vals));
    }
    (theta0s, bounds)
}

/// Minimize the objective from one start with Cobyla.
pub(crate) fn optimize_params<ObjF>(
    objfn: ObjF,
    param0: &Array1<f64>,
    bounds: &[(f64, f64)],
    cobyla: CobylaParams,
) -> (f64, Array1<f64>)
where
    ObjF: Fn(&[f64], Option<&mut [f64]>, &mut ()) -> f64,
{
    use cobyla::{minimize, Func, StopTols};

    let cons: Vec<&dyn Func<()>> = vec![];
    let param0 = param0.to_vec();

    match minimize(
        |x, u| objfn(x, None, u),
        &param0,
        bounds,
        &cons,
        (),
        cobyla.maxeval,
        cobyla::RhoBeg::All(cobyla.rhobeg),
        Some(StopTols {
            ftol_rel: cobyla.ftol_rel,
            ..StopTols::default()
        }),
    ) {
        Ok((_, x_opt, fval)) => {
            let params_opt = arr1(&x_opt);
            let fval = if f64::is_nan(fval) {
                f64::INFINITY
            } else {
                fval
            };
            (fval, params_opt)
        }
        Err((status, x_opt, _)) => {
            log::warn!("Cobyla start failed with status={status:?}");
            (f64::INFINITY, arr1(&x_opt))
        }
    }
}

/// Run the multistart likelihood search for `state` and commit the winning
/// theta to its shared hyperparameter vector. The state is rebuilt under the
/// new hyperparameters before returning.
pub fn optimize_hyperparameters(
    state: &mut RegressionState,
    opts: &OptimizeOpts,
) -> Result<OptimizeReport> {
    let (theta0, bounds) = {
        let p = state.params().borrow();
        let (lo, up) = p.bounds();
        (p.theta().to_owned(), vec![(lo, up); state.dim()])
    };

    let base: f64 = 10.;
    let n_evals = Cell::new(0usize);
    let objfn = |x: &[f64], _gradient: Option<&mut [f64]>, _params: &mut ()| -> f64 {
        n_evals.set(n_evals.get() + 1);
        // the optimizer may hand over nan values
        if x.iter().any(|v| v.is_nan()) {
            // shortcut: worst value wrt likelihood maximization
            return f64::INFINITY;
        }
        let theta = arr1(x).mapv(|v| base.powf(v));
        match state.likelihood_of(&theta) {
            Ok(lkh) => -lkh,
            Err(_) => f64::INFINITY,
        }
    };

    let (theta_inits, log_bounds) = prepare_multistart(opts.n_start, &theta0, &bounds, opts.seed);
    log::debug!("Optimize with multistart theta = {theta_inits:?} and bounds = {log_bounds:?}");

    // A configured budget below the Cobyla minimum is floored, not rejected
    let budget = COBYLA_MIN_EVAL.max(opts.max_eval);
    let maxeval = (10 * theta_inits.ncols()).clamp(COBYLA_MIN_EVAL, budget);
    let mut best: (f64, Array1<f64>, bool) =
        (f64::INFINITY, Array::ones((theta_inits.ncols(),)), false);
    for i in 0..theta_inits.nrows() {
        let before = n_evals.get();
        let (fval, x_opt) = optimize_params(
            &objfn,
            &theta_inits.row(i).to_owned(),
            &log_bounds,
            CobylaParams {
                maxeval,
                ..CobylaParams::default()
            },
        );
        let used = n_evals.get() - before;
        if fval < best.0 {
            best = (fval, x_opt, used < maxeval);
        }
    }

    let (fval, x_opt, converged) = best;
    if !fval.is_finite() {
        return Err(EmulatorError::LikelihoodComputation(format!(
            "every start of the likelihood search failed ({} starts)",
            theta_inits.nrows()
        )));
    }
    if !converged {
        log::warn!("likelihood search stopped on its evaluation budget ({maxeval} evals per start)");
    }

    let theta_opt = x_opt.mapv(|v| base.powf(v));
    state.params().borrow_mut().set_theta(theta_opt.clone())?;
    state.rebuild()?;

    Ok(OptimizeReport {
        theta: theta_opt,
        likelihood: state.log_likelihood()?,
        n_evals: n_evals.get(),
        converged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation_models::Kernel;
    use crate::hyperparameters::{shared, HyperParams, DEFAULT_NUGGET, DEFAULT_THETA_BOUNDS};
    use crate::mean_models::Trend;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array, Array1, Array2, Axis};

    fn xsinx(x: &Array2<f64>) -> Array1<f64> {
        ((x - 3.5) * (x - 3.5).mapv(|v| (v / std::f64::consts::PI).sin())).remove_axis(Axis(1))
    }

    fn sample_state(theta: f64) -> RegressionState {
        let xt = Array::linspace(0., 25., 15).insert_axis(Axis(1));
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
    fn test_prepare_multistart() {
        let theta0 = array![1.0, 0.1];
        let bounds = vec![(1e-2, 1e1); 2];
        let (starts, log_bounds) = prepare_multistart(5, &theta0, &bounds, 7);
        assert_eq!(starts.nrows(), 6);
        assert_abs_diff_eq!(starts.row(0), array![0., -1.], epsilon = 1e-12);
        for row in starts.rows() {
            for (v, (lo, up)) in row.iter().zip(&log_bounds) {
                assert!(*v >= *lo && *v <= *up);
            }
        }
        // same seed, same starts
        let (again, _) = prepare_multistart(5, &theta0, &bounds, 7);
        assert_abs_diff_eq!(starts, again);

        // single mode keeps only the current theta
        let (single, _) = prepare_multistart(0, &theta0, &bounds, 7);
        assert_eq!(single.nrows(), 1);
    }

    #[test]
    fn test_optimize_improves_likelihood() {
        let mut state = sample_state(0.1);
        state.rebuild().unwrap();
        let lkh_before = state.log_likelihood().unwrap();

        let report = optimize_hyperparameters(&mut state, &OptimizeOpts::default()).unwrap();
        assert!(report.likelihood >= lkh_before - 1e-8);
        assert!(report.n_evals > 0);
        assert!(state.is_current());
        assert_abs_diff_eq!(
            report.theta,
            state.params().borrow().theta().to_owned(),
            epsilon = 1e-12
        );
        let (lo, up) = state.params().borrow().bounds();
        for v in report.theta.iter() {
            assert!(*v >= lo * 0.99 && *v <= up * 1.01);
        }
    }

    #[test]
    fn test_single_start_runs_from_current_theta() {
        let mut state = sample_state(0.5);
        state.rebuild().unwrap();
        let lkh_before = state.log_likelihood().unwrap();
        let report = optimize_hyperparameters(&mut state, &OptimizeOpts::single()).unwrap();
        assert!(report.likelihood >= lkh_before - 1e-8);
    }

    #[test]
    fn test_small_eval_budget_is_floored() {
        let mut state = sample_state(0.1);
        state.rebuild().unwrap();
        let lkh_before = state.log_likelihood().unwrap();
        let opts = OptimizeOpts {
            n_start: 1,
            max_eval: 10,
            ..OptimizeOpts::default()
        };
        let report = optimize_hyperparameters(&mut state, &opts).unwrap();
        assert!(report.likelihood >= lkh_before - 1e-8);
        assert!(report.n_evals > 0);
    }

    #[test]
    fn test_optimize_is_reproducible() {
        let mut s1 = sample_state(0.1);
        let mut s2 = sample_state(0.1);
        let opts = OptimizeOpts {
            n_start: 4,
            ..OptimizeOpts::default()
        };
        let r1 = optimize_hyperparameters(&mut s1, &opts).unwrap();
        let r2 = optimize_hyperparameters(&mut s2, &opts).unwrap();
        assert_abs_diff_eq!(r1.theta, r2.theta, epsilon = 1e-12);
        assert_abs_diff_eq!(r1.likelihood, r2.likelihood, epsilon = 1e-12);
    }
}
