//! Bounded Levenberg-Marquardt minimizer.

use nalgebra::{DMatrix, DVector};
use tracing::debug;

use super::{FitContext, Optimizer, OptimizerOutcome};
use crate::data::FitParams;

/// Damped least-squares minimizer with forward-difference Jacobians and
/// bound projection on every trial step.
#[derive(Clone, Debug)]
pub struct LevMarOptimizer {
    /// Hard budget of residual evaluations; bounds per-pixel latency.
    pub max_calls: usize,
    /// Relative cost-reduction tolerance.
    pub ftol: f64,
    /// Relative step-size tolerance.
    pub xtol: f64,
    /// Starting damping factor.
    pub initial_lambda: f64,
}

impl Default for LevMarOptimizer {
    fn default() -> Self {
        Self {
            max_calls: 500,
            ftol: 1e-10,
            xtol: 1e-10,
            initial_lambda: 1e-3,
        }
    }
}

/// Solver-local mapping between free parameter names and vector slots,
/// rebuilt for every `minimize` call.
struct FreeParamLayout {
    names: Vec<String>,
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl FreeParamLayout {
    fn build(fit_params: &FitParams) -> Self {
        let names = fit_params.free_names();
        let lower = names
            .iter()
            .map(|n| fit_params.get(n).map_or(f64::NEG_INFINITY, |p| p.lower_limit()))
            .collect();
        let upper = names
            .iter()
            .map(|n| fit_params.get(n).map_or(f64::INFINITY, |p| p.upper_limit()))
            .collect();
        Self { names, lower, upper }
    }

    #[inline]
    fn len(&self) -> usize {
        self.names.len()
    }

    fn pack(&self, fit_params: &FitParams) -> DVector<f64> {
        DVector::from_iterator(
            self.len(),
            self.names
                .iter()
                .map(|n| fit_params.value_of(n).unwrap_or(0.0)),
        )
    }

    fn clamp(&self, x: &mut DVector<f64>) {
        for i in 0..self.len() {
            x[i] = x[i].max(self.lower[i]).min(self.upper[i]);
        }
    }

    fn apply(&self, fit_params: &mut FitParams, x: &DVector<f64>) {
        for (i, name) in self.names.iter().enumerate() {
            let v = x[i].max(self.lower[i]).min(self.upper[i]);
            fit_params.set_value(name, v);
        }
    }
}

impl Optimizer for LevMarOptimizer {
    fn minimize(&self, fit_params: &mut FitParams, ctx: &FitContext<'_>) -> OptimizerOutcome {
        let layout = FreeParamLayout::build(fit_params);
        let n = layout.len();
        let m = ctx.energy_range.count();
        if n == 0 || m == 0 || ctx.weights.len() != m || ctx.spectrum.len() <= ctx.energy_range.max
        {
            return OptimizerOutcome::ImproperInput;
        }

        let mut calls = 0usize;
        let residual = |x: &DVector<f64>,
                            fit_params: &mut FitParams,
                            calls: &mut usize|
         -> Option<DVector<f64>> {
            layout.apply(fit_params, x);
            *calls += 1;
            let model = ctx
                .model
                .model_spectrum(fit_params, ctx.calibration, ctx.elements, ctx.energy_range)
                .ok()?;
            let mut r = DVector::zeros(m);
            for i in 0..m {
                let measured = ctx.spectrum.counts[ctx.energy_range.min + i];
                r[i] = ctx.weights[i] * (model.counts[i] - measured);
            }
            Some(r)
        };

        let mut x = layout.pack(fit_params);
        layout.clamp(&mut x);
        let mut r = match residual(&x, fit_params, &mut calls) {
            Some(r) => r,
            None => return OptimizerOutcome::ImproperInput,
        };
        let mut cost = r.norm_squared();
        let mut lambda = self.initial_lambda;
        let mut outcome = OptimizerOutcome::ExceededCallLimit;

        'outer: while calls < self.max_calls {
            // Forward-difference Jacobian, stepping away from active bounds.
            let mut jac = DMatrix::zeros(m, n);
            for j in 0..n {
                let mut h = 1e-6 * x[j].abs().max(1e-4);
                if x[j] + h > layout.upper[j] {
                    h = -h;
                }
                let mut xp = x.clone();
                xp[j] += h;
                let rp = match residual(&xp, fit_params, &mut calls) {
                    Some(rp) => rp,
                    None => {
                        outcome = OptimizerOutcome::ImproperInput;
                        break 'outer;
                    }
                };
                let col = (rp - &r) / h;
                jac.set_column(j, &col);
                if calls >= self.max_calls {
                    break 'outer;
                }
            }

            let jtj = jac.transpose() * &jac;
            let jtr = jac.transpose() * &r;

            loop {
                let mut damped = jtj.clone();
                for d in 0..n {
                    damped[(d, d)] += lambda * jtj[(d, d)].max(1e-12);
                }
                let rhs = &jtr * -1.0;
                let delta = match damped.cholesky() {
                    Some(ch) => ch.solve(&rhs),
                    None => {
                        lambda *= 10.0;
                        if lambda > 1e12 {
                            outcome = OptimizerOutcome::NoProgress;
                            break 'outer;
                        }
                        continue;
                    }
                };

                let mut x_new = &x + &delta;
                layout.clamp(&mut x_new);
                let step = (&x_new - &x).norm();

                let r_new = match residual(&x_new, fit_params, &mut calls) {
                    Some(rn) => rn,
                    None => {
                        outcome = OptimizerOutcome::ImproperInput;
                        break 'outer;
                    }
                };
                let cost_new = r_new.norm_squared();

                if cost_new < cost {
                    let reduction = cost - cost_new;
                    x = x_new;
                    r = r_new;
                    cost = cost_new;
                    lambda = (lambda * 0.1).max(1e-12);

                    if reduction <= self.ftol * cost.max(f64::MIN_POSITIVE) {
                        outcome = if self.ftol < f64::EPSILON {
                            OptimizerOutcome::ToleranceTooSmall
                        } else {
                            OptimizerOutcome::Converged
                        };
                        break 'outer;
                    }
                    if step <= self.xtol * (x.norm() + self.xtol) {
                        outcome = if self.xtol < f64::EPSILON {
                            OptimizerOutcome::ToleranceTooSmall
                        } else {
                            OptimizerOutcome::Converged
                        };
                        break 'outer;
                    }
                    break;
                }

                lambda *= 10.0;
                if lambda > 1e12 {
                    outcome = OptimizerOutcome::NoProgress;
                    break 'outer;
                }
                if calls >= self.max_calls {
                    break 'outer;
                }
            }
        }

        // Leave the best point found in the parameter set.
        layout.apply(fit_params, &x);
        if outcome != OptimizerOutcome::Converged {
            debug!(?outcome, calls, cost, "minimization stopped before convergence");
        }
        outcome
    }
}
