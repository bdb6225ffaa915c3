use crate::math::matrix::MatrixHelper;
use ndarray::{Array1, Array2};

const INITIAL_DAMPING: f64 = 1e-3;
const MIN_DAMPING: f64 = 1e-12;
const MAX_DAMPING: f64 = 1e16;

/// Model fitted by [`LevenbergMarquardt`].
pub trait ResidualModel {
    fn parameter_count(&self) -> usize;

    /// Model value at `x`; writes `∂f/∂p` into `gradient`.
    fn value_and_gradient(&self, x: f64, params: &[f64], gradient: &mut [f64]) -> f64;

    /// Rejects parameter vectors outside the model's domain.
    fn admissible(&self, _params: &[f64]) -> bool {
        true
    }
}

/// Result of a minimization. `params` always holds the best point visited.
#[derive(Debug, Clone, PartialEq)]
pub struct Minimum {
    pub params: Vec<f64>,
    pub cost: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Damped Gauss-Newton least-squares minimizer with Marquardt diagonal scaling.
#[derive(Debug, Clone, Copy)]
pub struct LevenbergMarquardt {
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            tolerance: 1e-10,
        }
    }
}

struct LinearizedSystem {
    jtj: Array2<f64>,
    jtr: Array1<f64>,
    cost: f64,
}

impl LevenbergMarquardt {
    pub fn new(max_iterations: usize, tolerance: f64) -> Self {
        Self {
            max_iterations,
            tolerance,
        }
    }

    /// Minimizes `Σ (ys[i] - f(xs[i]))²` starting from `initial`.
    pub fn minimize<M: ResidualModel>(
        &self,
        model: &M,
        xs: &[f64],
        ys: &[f64],
        initial: Vec<f64>,
    ) -> Minimum {
        let mut params = initial;
        let mut system = match linearize(model, xs, ys, &params) {
            Some(system) => system,
            None => {
                return Minimum {
                    params,
                    cost: f64::INFINITY,
                    iterations: 0,
                    converged: false,
                }
            }
        };
        let mut damping = INITIAL_DAMPING;
        let mut iterations = 0;
        let mut converged = false;

        while iterations < self.max_iterations {
            iterations += 1;
            if system.cost == 0.0 {
                converged = true;
                break;
            }

            let mut damped = system.jtj.clone();
            for i in 0..params.len() {
                damped[[i, i]] += damping * system.jtj[[i, i]].max(f64::EPSILON);
            }

            let candidate = MatrixHelper::solve(damped, system.jtr.clone()).map(|delta| {
                params
                    .iter()
                    .zip(delta.iter())
                    .map(|(p, d)| p + d)
                    .collect::<Vec<f64>>()
            });

            let accepted = candidate
                .filter(|candidate| model.admissible(candidate))
                .and_then(|candidate| {
                    linearize(model, xs, ys, &candidate)
                        .filter(|next| next.cost < system.cost)
                        .map(|next| (candidate, next))
                });

            match accepted {
                Some((candidate, next)) => {
                    let improvement = (system.cost - next.cost) / system.cost;
                    let step = candidate
                        .iter()
                        .zip(params.iter())
                        .map(|(c, p)| (c - p).abs() / (p.abs() + 1e-12))
                        .fold(0.0, f64::max);
                    params = candidate;
                    system = next;
                    damping = (damping / 10.0).max(MIN_DAMPING);
                    if improvement < self.tolerance || step < self.tolerance {
                        converged = true;
                        break;
                    }
                }
                None => {
                    damping *= 10.0;
                    if damping > MAX_DAMPING {
                        // No direction reduces the cost any further.
                        converged = true;
                        break;
                    }
                }
            }
        }

        Minimum {
            params,
            cost: system.cost,
            iterations,
            converged,
        }
    }
}

fn linearize<M: ResidualModel>(
    model: &M,
    xs: &[f64],
    ys: &[f64],
    params: &[f64],
) -> Option<LinearizedSystem> {
    let count = xs.len().min(ys.len());
    let width = model.parameter_count();
    let mut jacobian = Array2::<f64>::zeros((count, width));
    let mut residuals = Array1::<f64>::zeros(count);
    let mut gradient = vec![0.0; width];

    for i in 0..count {
        let value = model.value_and_gradient(xs[i], params, &mut gradient);
        residuals[i] = ys[i] - value;
        for (j, g) in gradient.iter().enumerate() {
            jacobian[[i, j]] = *g;
        }
    }

    let cost = residuals.dot(&residuals);
    if !cost.is_finite() || jacobian.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let (jtj, jtr) = MatrixHelper::normal_equations(jacobian.view(), residuals.view());
    Some(LinearizedSystem { jtj, jtr, cost })
}
