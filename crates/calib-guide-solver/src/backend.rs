//! Levenberg–Marquardt back-end for the solvers in this crate.
//!
//! Problems describe their residuals (and optionally a Jacobian) as a
//! function of a dense parameter vector; [`solve`] adapts them to the
//! `levenberg-marquardt` crate.

use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use log::trace;
use nalgebra::{storage::Owned, DMatrix, DVector, Dyn};
use serde::{Deserialize, Serialize};

/// Residual substituted for non-finite entries so that a bad trial step is
/// rejected instead of aborting the solve.
const NON_FINITE_RESIDUAL: f64 = 1e8;

/// Nonlinear least-squares problem `min |r(x)|²`.
pub trait NllsProblem {
    fn residuals(&self, params: &DVector<f64>) -> DVector<f64>;

    /// `∂r/∂x` at `params`. Central differences unless overridden.
    fn jacobian(&self, params: &DVector<f64>) -> DMatrix<f64> {
        numeric_jacobian(|x| self.residuals(x), params)
    }
}

/// Central-difference Jacobian of `f` at `x`.
pub fn numeric_jacobian<F>(f: F, x: &DVector<f64>) -> DMatrix<f64>
where
    F: Fn(&DVector<f64>) -> DVector<f64>,
{
    let rows = f(x).len();
    let mut jac = DMatrix::zeros(rows, x.len());
    let mut xp = x.clone();
    for c in 0..x.len() {
        let h = step_size(x[c]);
        xp[c] = x[c] + h;
        let rp = f(&xp);
        xp[c] = x[c] - h;
        let rm = f(&xp);
        xp[c] = x[c];
        jac.set_column(c, &((rp - rm) / (2.0 * h)));
    }
    jac
}

/// Finite-difference step scaled to the parameter magnitude.
#[inline]
pub fn step_size(x: f64) -> f64 {
    1e-6 * (1.0 + x.abs())
}

/// Stopping criteria handed to the LM solver.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolveOptions {
    /// Evaluation budget factor (`patience` of the LM solver).
    pub max_iters: usize,
    pub ftol: f64,
    pub xtol: f64,
    pub gtol: f64,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            max_iters: 100,
            ftol: 1e-12,
            xtol: 1e-12,
            gtol: 1e-12,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SolveReport {
    pub params: DVector<f64>,
    /// Sum of squared residuals at `params`.
    pub cost: f64,
    pub initial_cost: f64,
    pub evaluations: usize,
    pub converged: bool,
}

struct LmWrapper<'a, P: ?Sized> {
    problem: &'a P,
    params: DVector<f64>,
}

impl<P: NllsProblem + ?Sized> LeastSquaresProblem<f64, Dyn, Dyn> for LmWrapper<'_, P> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.params.clone_from(x);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        let r = self.problem.residuals(&self.params);
        Some(r.map(|v| if v.is_finite() { v } else { NON_FINITE_RESIDUAL }))
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let jac = self.problem.jacobian(&self.params);
        jac.iter().all(|v| v.is_finite()).then_some(jac)
    }
}

/// Minimize `problem` from `x0`.
pub fn solve<P>(problem: &P, x0: DVector<f64>, opts: &SolveOptions) -> SolveReport
where
    P: NllsProblem + ?Sized,
{
    let initial_cost = problem.residuals(&x0).norm_squared();
    let lm = LevenbergMarquardt::new()
        .with_ftol(opts.ftol)
        .with_xtol(opts.xtol)
        .with_gtol(opts.gtol)
        .with_patience(opts.max_iters.max(1));

    let (wrapper, report) = lm.minimize(LmWrapper {
        problem,
        params: x0,
    });
    trace!(
        "lm finished after {} evaluations: {:?}",
        report.number_of_evaluations,
        report.termination
    );

    let params = wrapper.params;
    let cost = problem.residuals(&params).norm_squared();
    SolveReport {
        params,
        cost,
        initial_cost,
        evaluations: report.number_of_evaluations,
        converged: report.termination.was_successful(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// `y = a * exp(b * t)`
    struct ExpFit {
        t: Vec<f64>,
        y: Vec<f64>,
    }

    impl NllsProblem for ExpFit {
        fn residuals(&self, p: &DVector<f64>) -> DVector<f64> {
            DVector::from_iterator(
                self.t.len(),
                self.t
                    .iter()
                    .zip(&self.y)
                    .map(|(&t, &y)| p[0] * (p[1] * t).exp() - y),
            )
        }
    }

    #[test]
    fn fits_exponential_curve() {
        let t: Vec<f64> = (0..20).map(|i| i as f64 * 0.1).collect();
        let y = t.iter().map(|&t| 2.5 * (-1.3 * t).exp()).collect();
        let problem = ExpFit { t, y };

        let report = solve(&problem, DVector::from_vec(vec![1.0, 0.0]), &SolveOptions::default());
        assert_abs_diff_eq!(report.params[0], 2.5, epsilon = 1e-6);
        assert_abs_diff_eq!(report.params[1], -1.3, epsilon = 1e-6);
        assert!(report.cost < report.initial_cost);
    }

    #[test]
    fn numeric_jacobian_of_linear_map() {
        let f = |x: &DVector<f64>| DVector::from_vec(vec![2.0 * x[0] + x[1], -x[1]]);
        let jac = numeric_jacobian(f, &DVector::from_vec(vec![0.3, 4.0]));
        assert_abs_diff_eq!(jac[(0, 0)], 2.0, epsilon = 1e-8);
        assert_abs_diff_eq!(jac[(0, 1)], 1.0, epsilon = 1e-8);
        assert_abs_diff_eq!(jac[(1, 0)], 0.0, epsilon = 1e-8);
        assert_abs_diff_eq!(jac[(1, 1)], -1.0, epsilon = 1e-8);
    }
}
