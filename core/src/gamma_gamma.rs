//! Spend model: Gamma-Gamma over per-order monetary value.
//!
//! Assumes order values are independent of purchase timing — a modeling
//! assumption carried from the literature, not verified here. Fit uses
//! only customers with at least one repeat order and positive monetary
//! value; prediction degrades to the population mean for everyone else.

use crate::{
    error::{ClvError, ClvResult},
    math::{ln_gamma, NelderMead},
    rfm::RfmRecord,
};
use serde::{Deserialize, Serialize};

pub const MODEL_NAME: &str = "gamma_gamma";

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GammaGammaParams {
    pub p: f64,
    pub q: f64,
    pub v: f64,
}

#[derive(Debug, Clone)]
pub struct GammaGammaModel {
    pub params: GammaGammaParams,
    /// Mean per-customer log-likelihood at the optimum (penalty excluded).
    pub log_likelihood: f64,
    pub n_customers: usize,
    pub iterations: usize,
}

impl GammaGammaModel {
    /// Fit over the repeat purchasers (frequency > 0, monetary_value > 0).
    /// Callers pass the full RFM summary; filtering happens here so the
    /// exclusion policy lives in one place.
    pub fn fit(records: &[RfmRecord], penalizer: f64) -> ClvResult<Self> {
        let eligible: Vec<&RfmRecord> = records
            .iter()
            .filter(|r| r.frequency > 0.0 && r.monetary_value > 0.0)
            .collect();

        if eligible.is_empty() {
            return Err(ClvError::InsufficientData {
                model: MODEL_NAME,
                reason: "no customer has a repeat order with positive value".into(),
            });
        }

        let objective = |log_params: &[f64]| {
            let params = GammaGammaParams {
                p: log_params[0].exp(),
                q: log_params[1].exp(),
                v: log_params[2].exp(),
            };
            Self::penalized_neg_log_likelihood(&params, &eligible, penalizer)
        };

        let outcome = NelderMead::default().minimize(objective, &[0.0; 3]);
        if !outcome.converged {
            return Err(ClvError::ModelFit {
                model: MODEL_NAME,
                iterations: outcome.iterations,
            });
        }

        let params = GammaGammaParams {
            p: outcome.solution[0].exp(),
            q: outcome.solution[1].exp(),
            v: outcome.solution[2].exp(),
        };
        // The population mean p·v/(q−1) is undefined for q ≤ 1; a fit
        // landing there cannot price anyone.
        if params.q <= 1.0 {
            return Err(ClvError::InsufficientData {
                model: MODEL_NAME,
                reason: format!(
                    "fitted q = {:.4} leaves the mean order value undefined",
                    params.q
                ),
            });
        }
        let log_likelihood = -Self::penalized_neg_log_likelihood(&params, &eligible, 0.0);
        log::info!(
            "gamma_gamma fit: p={:.4} q={:.4} v={:.4} ll={:.4} ({} repeat customers, {} iterations)",
            params.p, params.q, params.v, log_likelihood, eligible.len(), outcome.iterations,
        );

        Ok(Self {
            params,
            log_likelihood,
            n_customers: eligible.len(),
            iterations: outcome.iterations,
        })
    }

    fn penalized_neg_log_likelihood(
        params: &GammaGammaParams,
        records: &[&RfmRecord],
        penalizer: f64,
    ) -> f64 {
        let GammaGammaParams { p, q, v } = *params;

        let mut total = 0.0;
        for rec in records {
            let x = rec.frequency;
            let m = rec.monetary_value;
            total += ln_gamma(p * x + q) - ln_gamma(p * x) - ln_gamma(q)
                + q * v.ln()
                + (p * x - 1.0) * m.ln()
                + p * x * x.ln()
                - (p * x + q) * (v + m * x).ln();
        }

        let penalty = penalizer * (p * p + q * q + v * v);
        -(total / records.len() as f64) + penalty
    }

    /// Expected mean order value for a customer, shrunk toward the
    /// population mean; equal to it when the customer has no repeat
    /// orders of their own.
    pub fn expected_average_value(&self, rec: &RfmRecord) -> f64 {
        let GammaGammaParams { p, q, v } = self.params;
        let population_mean = p * v / (q - 1.0);
        if rec.frequency <= 0.0 || rec.monetary_value <= 0.0 {
            return population_mean;
        }
        let weight = p * rec.frequency / (p * rec.frequency + q - 1.0);
        (1.0 - weight) * population_mean + weight * rec.monetary_value
    }
}
