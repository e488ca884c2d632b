//! Levenberg-Marquardt fit of `A * exp(-((x - mu) / sigma)^2 / 2) + G`.

use nalgebra::{Matrix4, Vector4};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::consts::{
    EPSILON, FIT_COST_TOLERANCE, FIT_INITIAL_DAMPING, FIT_MAX_DAMPING, FIT_STEP_TOLERANCE,
};
use crate::error::{ReduxError, Result};

/// Parameters of a 1-D Gaussian on a constant background.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GaussianParams {
    pub mu: f64,
    pub sigma: f64,
    pub amplitude: f64,
    /// Constant sky background `G`.
    pub background: f64,
}

impl GaussianParams {
    pub fn new(mu: f64, sigma: f64, amplitude: f64, background: f64) -> Self {
        Self {
            mu,
            sigma,
            amplitude,
            background,
        }
    }

    fn to_vector(self) -> Vector4<f64> {
        Vector4::new(self.mu, self.sigma, self.amplitude, self.background)
    }

    fn from_vector(v: &Vector4<f64>) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

/// Evaluate the model at `x`.
pub fn gaussian_1d(x: f64, p: &GaussianParams) -> f64 {
    let z = (x - p.mu) / p.sigma;
    p.amplitude * (-0.5 * z * z).exp() + p.background
}

/// Box constraints on `(mu, sigma, amplitude, background)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FitBounds {
    pub lower: [f64; 4],
    pub upper: [f64; 4],
}

impl FitBounds {
    pub fn unbounded() -> Self {
        Self {
            lower: [f64::NEG_INFINITY; 4],
            upper: [f64::INFINITY; 4],
        }
    }

    /// Every parameter constrained to be `>= 0`.
    pub fn non_negative() -> Self {
        Self {
            lower: [0.0; 4],
            upper: [f64::INFINITY; 4],
        }
    }

    fn clamp(&self, v: &mut Vector4<f64>) {
        for i in 0..4 {
            v[i] = v[i].clamp(self.lower[i], self.upper[i]);
        }
    }
}

/// Outcome of a converged profile fit.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub params: GaussianParams,
    /// Coefficient of determination `1 - SS_res / SS_tot`.
    pub r_squared: f64,
    pub iterations: usize,
}

/// Non-linear least-squares fit of [`gaussian_1d`] to `(x, y)`.
///
/// Needs at least four points. The returned `sigma` is always non-negative
/// (the model is symmetric in its sign).
pub fn fit_gaussian_1d(
    x: &[f64],
    y: &[f64],
    initial: GaussianParams,
    bounds: FitBounds,
    max_iterations: usize,
) -> Result<FitResult> {
    let n = x.len().min(y.len());
    if n < 4 {
        return Err(ReduxError::DegenerateProfile { points: n });
    }
    let (x, y) = (&x[..n], &y[..n]);

    let mut p = initial.to_vector();
    bounds.clamp(&mut p);
    if p[1].abs() < EPSILON {
        // A zero width makes the model and its Jacobian undefined.
        p[1] = 1.0;
    }
    let mut cost = sum_sq_residuals(x, y, &p);
    let mut lambda = FIT_INITIAL_DAMPING;

    for iteration in 1..=max_iterations {
        let (jtj, jtr) = normal_equations(x, y, &p);

        let mut damped = jtj;
        for i in 0..4 {
            damped[(i, i)] += lambda * jtj[(i, i)].max(EPSILON);
        }
        let Some(step) = solve4(&damped, &jtr) else {
            lambda *= 10.0;
            if lambda > FIT_MAX_DAMPING {
                return Err(ReduxError::FitDidNotConverge { iterations: iteration });
            }
            continue;
        };

        let mut candidate = p + step;
        bounds.clamp(&mut candidate);
        if candidate[1].abs() < EPSILON {
            candidate[1] = EPSILON.copysign(p[1]);
        }
        let new_cost = sum_sq_residuals(x, y, &candidate);

        if new_cost.is_finite() && new_cost < cost {
            let applied = candidate - p;
            let improvement = cost - new_cost;
            p = candidate;
            cost = new_cost;
            lambda = (lambda / 10.0).max(1e-12);
            trace!(iteration, cost, lambda, "Accepted fit step");

            let small_step = applied.norm() <= FIT_STEP_TOLERANCE * (p.norm() + FIT_STEP_TOLERANCE);
            let small_gain = improvement <= FIT_COST_TOLERANCE * cost;
            if small_step || small_gain {
                return Ok(finish(x, y, &p, iteration));
            }
        } else {
            lambda *= 10.0;
            if lambda > FIT_MAX_DAMPING {
                // No damped step lowers the cost: a stationary point.
                return Ok(finish(x, y, &p, iteration));
            }
        }
    }

    Err(ReduxError::FitDidNotConverge {
        iterations: max_iterations,
    })
}

fn finish(x: &[f64], y: &[f64], p: &Vector4<f64>, iterations: usize) -> FitResult {
    let mut params = GaussianParams::from_vector(p);
    params.sigma = params.sigma.abs();
    FitResult {
        r_squared: r_squared(x, y, &params),
        params,
        iterations,
    }
}

/// `1 - SS_res / SS_tot`. A constant `y` gives 1 for an exact fit, else 0.
pub fn r_squared(x: &[f64], y: &[f64], params: &GaussianParams) -> f64 {
    let n = y.len() as f64;
    if n == 0.0 {
        return 0.0;
    }
    let mean = y.iter().sum::<f64>() / n;
    let ss_tot: f64 = y.iter().map(|v| (v - mean).powi(2)).sum();
    let ss_res: f64 = x
        .iter()
        .zip(y)
        .map(|(&xi, &yi)| (yi - gaussian_1d(xi, params)).powi(2))
        .sum();
    if ss_tot <= EPSILON {
        return if ss_res <= EPSILON { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

fn sum_sq_residuals(x: &[f64], y: &[f64], p: &Vector4<f64>) -> f64 {
    let params = GaussianParams::from_vector(p);
    x.iter()
        .zip(y)
        .map(|(&xi, &yi)| (yi - gaussian_1d(xi, &params)).powi(2))
        .sum()
}

/// `J^T J` and `J^T r` for residuals `r = y - f(x)`.
fn normal_equations(x: &[f64], y: &[f64], p: &Vector4<f64>) -> (Matrix4<f64>, Vector4<f64>) {
    let (mu, sigma, amp, bg) = (p[0], p[1], p[2], p[3]);
    let mut jtj = Matrix4::<f64>::zeros();
    let mut jtr = Vector4::<f64>::zeros();
    for (&xi, &yi) in x.iter().zip(y) {
        let z = (xi - mu) / sigma;
        let e = (-0.5 * z * z).exp();
        let j = Vector4::new(amp * e * z / sigma, amp * e * z * z / sigma, e, 1.0);
        let r = yi - (amp * e + bg);
        jtj += j * j.transpose();
        jtr += j * r;
    }
    (jtj, jtr)
}

fn solve4(a: &Matrix4<f64>, b: &Vector4<f64>) -> Option<Vector4<f64>> {
    a.cholesky()
        .map(|c| c.solve(b))
        .or_else(|| a.lu().solve(b))
        .filter(|s| s.iter().all(|v| v.is_finite()))
}
