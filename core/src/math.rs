//! Numerical support: log-gamma, log-beta, and a Nelder-Mead simplex
//! minimizer used for maximum-likelihood fitting.
//!
//! RULE: Both likelihoods are optimized over log-parameters, so the
//! minimizer itself is unconstrained; positivity comes from exponentiating
//! at the call site. Keep it that way — box constraints are not needed.

use std::f64::consts::PI;

// Lanczos approximation, g = 7, 9 coefficients. Accurate to ~1e-13 over
// the positive reals, which is far below the fit tolerance.
const LANCZOS: [f64; 9] = [
    0.999_999_999_999_809_93,
    676.520_368_121_885_1,
    -1_259.139_216_722_402_8,
    771.323_428_777_653_13,
    -176.615_029_162_140_59,
    12.507_343_278_686_905,
    -0.138_571_095_265_720_12,
    9.984_369_578_019_571_6e-6,
    1.505_632_735_149_311_6e-7,
];

/// Natural log of the gamma function for x > 0.
pub fn ln_gamma(x: f64) -> f64 {
    if x < 0.5 {
        // Reflection formula; the argument is always positive here.
        PI.ln() - (PI * x).sin().abs().ln() - ln_gamma(1.0 - x)
    } else {
        let z = x - 1.0;
        let mut acc = LANCZOS[0];
        for (i, &c) in LANCZOS.iter().enumerate().skip(1) {
            acc += c / (z + i as f64);
        }
        let t = z + 7.5;
        0.5 * (2.0 * PI).ln() + (z + 0.5) * t.ln() - t + acc.ln()
    }
}

/// Natural log of the beta function B(a, b).
pub fn ln_beta(a: f64, b: f64) -> f64 {
    ln_gamma(a) + ln_gamma(b) - ln_gamma(a + b)
}

/// Gaussian hypergeometric function ₂F₁(a, b; c; z) by direct series,
/// valid for 0 ≤ z < 1 (the only region the models evaluate it in).
pub fn hyp2f1(a: f64, b: f64, c: f64, z: f64) -> f64 {
    debug_assert!((0.0..1.0).contains(&z), "hyp2f1 series needs z in [0, 1)");
    let mut term = 1.0;
    let mut sum = 1.0;
    for j in 0..10_000 {
        let jf = j as f64;
        term *= (a + jf) * (b + jf) / ((c + jf) * (jf + 1.0)) * z;
        sum += term;
        if term.abs() < 1e-13 * sum.abs() {
            break;
        }
    }
    sum
}

/// Numerically stable ln(e^a + e^b).
pub fn log_sum_exp(a: f64, b: f64) -> f64 {
    let m = a.max(b);
    if m == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    m + ((a - m).exp() + (b - m).exp()).ln()
}

/// Outcome of a minimization run.
#[derive(Debug, Clone)]
pub struct FitOutcome {
    /// Argmin found by the simplex.
    pub solution: Vec<f64>,
    /// Objective value at the solution.
    pub objective: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Nelder-Mead downhill simplex with the standard coefficients
/// (reflect 1.0, expand 2.0, contract 0.5, shrink 0.5).
///
/// Deterministic for a fixed starting point: ordering uses a stable sort
/// and no randomness enters the procedure.
pub struct NelderMead {
    pub max_iterations: usize,
    pub tolerance: f64,
    pub initial_step: f64,
}

impl Default for NelderMead {
    fn default() -> Self {
        Self {
            max_iterations: 10_000,
            tolerance: 1e-9,
            initial_step: 0.1,
        }
    }
}

impl NelderMead {
    pub fn minimize<F>(&self, objective: F, start: &[f64]) -> FitOutcome
    where
        F: Fn(&[f64]) -> f64,
    {
        let n = start.len();
        let f = |x: &[f64]| {
            let v = objective(x);
            if v.is_nan() { f64::INFINITY } else { v }
        };

        // Initial simplex: start plus one vertex stepped along each axis.
        let mut simplex: Vec<(Vec<f64>, f64)> = Vec::with_capacity(n + 1);
        simplex.push((start.to_vec(), f(start)));
        for i in 0..n {
            let mut vertex = start.to_vec();
            vertex[i] += self.initial_step;
            let value = f(&vertex);
            simplex.push((vertex, value));
        }

        let mut iterations = 0;
        let mut converged = false;

        while iterations < self.max_iterations {
            simplex.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

            let best = simplex[0].1;
            let worst = simplex[n].1;
            if (worst - best).abs() <= self.tolerance {
                converged = true;
                break;
            }

            // Centroid of all vertices except the worst.
            let mut centroid = vec![0.0; n];
            for (vertex, _) in simplex.iter().take(n) {
                for (c, v) in centroid.iter_mut().zip(vertex.iter()) {
                    *c += v / n as f64;
                }
            }

            let reflect = |scale: f64| -> Vec<f64> {
                centroid
                    .iter()
                    .zip(simplex[n].0.iter())
                    .map(|(c, w)| c + scale * (c - w))
                    .collect()
            };

            let xr = reflect(1.0);
            let fr = f(&xr);

            if fr < simplex[0].1 {
                // Try expanding past the reflected point.
                let xe = reflect(2.0);
                let fe = f(&xe);
                simplex[n] = if fe < fr { (xe, fe) } else { (xr, fr) };
            } else if fr < simplex[n - 1].1 {
                simplex[n] = (xr, fr);
            } else {
                // Contract toward the centroid.
                let xc: Vec<f64> = centroid
                    .iter()
                    .zip(simplex[n].0.iter())
                    .map(|(c, w)| c + 0.5 * (w - c))
                    .collect();
                let fc = f(&xc);
                if fc < simplex[n].1 {
                    simplex[n] = (xc, fc);
                } else {
                    // Shrink everything toward the best vertex.
                    let best_vertex = simplex[0].0.clone();
                    for entry in simplex.iter_mut().skip(1) {
                        let shrunk: Vec<f64> = best_vertex
                            .iter()
                            .zip(entry.0.iter())
                            .map(|(b, v)| b + 0.5 * (v - b))
                            .collect();
                        let value = f(&shrunk);
                        *entry = (shrunk, value);
                    }
                }
            }

            iterations += 1;
        }

        simplex.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        let (solution, objective) = simplex.swap_remove(0);
        FitOutcome { solution, objective, iterations, converged }
    }
}
