//! Levenberg-Marquardt minimization of a sum of squared residuals.

use crate::error::{ErrorCode, ProcessingError, Result};
use serde::{Deserialize, Serialize};

const MIN_LAMBDA: f64 = 1e-12;
const MAX_LAMBDA: f64 = 1e16;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeastSquaresOptions {
    pub max_iterations: usize,
    /// Relative reduction of the cost below which the fit is converged.
    pub ftol: f64,
    /// Relative step size below which the fit is converged.
    pub xtol: f64,
}

impl Default for LeastSquaresOptions {
    fn default() -> Self {
        Self {
            max_iterations: 800,
            ftol: 1.49012e-8,
            xtol: 1.49012e-8,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeastSquaresFit {
    pub params: Vec<f64>,
    pub cost: f64,
    pub iterations: usize,
}

fn sum_of_squares(residuals: &[f64]) -> f64 {
    residuals.iter().map(|r| r * r).sum()
}

fn norm(values: &[f64]) -> f64 {
    sum_of_squares(values).sqrt()
}

fn all_finite(values: &[f64]) -> bool {
    values.iter().all(|v| v.is_finite())
}

/// Finite-difference Jacobian, one row per residual. Falls back to a
/// backward difference where the forward one leaves the model's domain.
fn jacobian<F>(residuals: &F, params: &[f64], at: &[f64]) -> Option<Vec<Vec<f64>>>
where
    F: Fn(&[f64]) -> Vec<f64>,
{
    let step_scale = f64::EPSILON.sqrt();
    let mut jac = vec![vec![0.0; params.len()]; at.len()];
    let mut shifted = params.to_vec();
    for j in 0..params.len() {
        let mut h = step_scale * params[j].abs().max(1.0);
        shifted[j] = params[j] + h;
        let mut r = residuals(&shifted);
        if !all_finite(&r) {
            h = -h;
            shifted[j] = params[j] + h;
            r = residuals(&shifted);
        }
        shifted[j] = params[j];
        if r.len() != at.len() || !all_finite(&r) {
            return None;
        }
        for (i, row) in jac.iter_mut().enumerate() {
            row[j] = (r[i] - at[i]) / h;
        }
    }
    Some(jac)
}

/// Solves `a * x = b` by Gaussian elimination with partial pivoting.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&x, &y| a[x][col].abs().total_cmp(&a[y][col].abs()))?;
        if a[pivot][col].abs() < f64::MIN_POSITIVE {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    all_finite(&x).then_some(x)
}

fn not_converged(message: String) -> ProcessingError {
    ProcessingError::new(ErrorCode::FitConvergence, message)
}

/// Minimizes `sum(residuals(p)^2)` starting from `p0`.
///
/// Steps that produce non-finite residuals are rejected like any other
/// uphill step. The fit has converged once two consecutive steps reduce the
/// cost by no more than `ftol` (relative) or the step shrinks below `xtol`.
pub fn minimize<F>(residuals: F, p0: &[f64], options: &LeastSquaresOptions) -> Result<LeastSquaresFit>
where
    F: Fn(&[f64]) -> Vec<f64>,
{
    let mut params = p0.to_vec();
    let mut r = residuals(&params);
    if !all_finite(&r) {
        return Err(not_converged(format!(
            "residuals are not finite at the initial guess {p0:?}"
        )));
    }
    let mut cost = sum_of_squares(&r);
    let mut lambda = 1e-3;
    let mut stalled = 0;

    for iteration in 1..=options.max_iterations {
        if cost == 0.0 {
            return Ok(LeastSquaresFit { params, cost, iterations: iteration - 1 });
        }
        let jac = jacobian(&residuals, &params, &r)
            .ok_or_else(|| not_converged(format!("Jacobian is not finite at {params:?}")))?;
        let n = params.len();
        let mut jtj = vec![vec![0.0; n]; n];
        let mut jtr = vec![0.0; n];
        for (row, ri) in jac.iter().zip(&r) {
            for a in 0..n {
                jtr[a] += row[a] * ri;
                for b in 0..n {
                    jtj[a][b] += row[a] * row[b];
                }
            }
        }

        loop {
            let mut damped = jtj.clone();
            for (k, row) in damped.iter_mut().enumerate() {
                row[k] += lambda * jtj[k][k].max(MIN_LAMBDA);
            }
            let neg_grad: Vec<f64> = jtr.iter().map(|g| -g).collect();
            let Some(step) = solve(damped, neg_grad) else {
                lambda *= 10.0;
                if lambda > MAX_LAMBDA {
                    return Ok(LeastSquaresFit { params, cost, iterations: iteration });
                }
                continue;
            };
            let small_step = norm(&step) <= options.xtol * (norm(&params) + options.xtol);
            let trial: Vec<f64> = params.iter().zip(&step).map(|(p, s)| p + s).collect();
            let trial_r = residuals(&trial);
            let trial_cost = sum_of_squares(&trial_r);

            if all_finite(&trial_r) && trial_cost < cost {
                let reduction = (cost - trial_cost) / cost;
                params = trial;
                r = trial_r;
                cost = trial_cost;
                lambda = (lambda / 10.0).max(MIN_LAMBDA);
                stalled = if reduction <= options.ftol { stalled + 1 } else { 0 };
                if stalled >= 2 || small_step {
                    return Ok(LeastSquaresFit { params, cost, iterations: iteration });
                }
                break;
            }
            if small_step || lambda > MAX_LAMBDA {
                // no downhill step left: a local minimum
                return Ok(LeastSquaresFit { params, cost, iterations: iteration });
            }
            lambda *= 10.0;
        }
    }

    Err(not_converged(format!(
        "no convergence after {} iterations (cost {cost:.3e}, params {params:?})",
        options.max_iterations
    )))
}
