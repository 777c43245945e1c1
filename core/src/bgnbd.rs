//! Purchase-timing model: BG/NBD (beta-geometric / negative binomial).
//!
//! Four parameters govern the population:
//!   r, alpha — gamma mixture over individual purchase rates
//!   a, b     — beta mixture over individual dropout probabilities
//!
//! Fitting is maximum likelihood over log-parameters via Nelder-Mead;
//! prediction uses the published conditional-expectation and
//! probability-alive forms. A customer with frequency 0 carries no
//! dropout evidence, so p_alive is exactly 1 for them.

use crate::{
    error::{ClvError, ClvResult},
    math::{hyp2f1, ln_beta, ln_gamma, log_sum_exp, NelderMead},
    rfm::RfmRecord,
    types::Days,
};
use serde::{Deserialize, Serialize};

pub const MODEL_NAME: &str = "bg_nbd";

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BetaGeoParams {
    pub r: f64,
    pub alpha: f64,
    pub a: f64,
    pub b: f64,
}

#[derive(Debug, Clone)]
pub struct BetaGeoModel {
    pub params: BetaGeoParams,
    /// Mean per-customer log-likelihood at the optimum (penalty excluded).
    pub log_likelihood: f64,
    pub n_customers: usize,
    pub iterations: usize,
}

impl BetaGeoModel {
    /// Fit by maximum likelihood over all RFM records.
    ///
    /// Degenerate inputs (nothing to fit, or no repeat purchaser at all,
    /// which leaves the dropout parameters unidentifiable) are rejected
    /// up front; optimizer non-convergence surfaces as `ModelFit`.
    pub fn fit(records: &[RfmRecord], penalizer: f64) -> ClvResult<Self> {
        if records.is_empty() {
            return Err(ClvError::InsufficientData {
                model: MODEL_NAME,
                reason: "no customers in the RFM summary".into(),
            });
        }
        if !records.iter().any(|r| r.frequency > 0.0) {
            return Err(ClvError::InsufficientData {
                model: MODEL_NAME,
                reason: "every customer has frequency 0; purchase timing cannot be estimated"
                    .into(),
            });
        }

        let objective = |log_params: &[f64]| {
            let params = BetaGeoParams {
                r: log_params[0].exp(),
                alpha: log_params[1].exp(),
                a: log_params[2].exp(),
                b: log_params[3].exp(),
            };
            Self::penalized_neg_log_likelihood(&params, records, penalizer)
        };

        let outcome = NelderMead::default().minimize(objective, &[0.0; 4]);
        if !outcome.converged {
            return Err(ClvError::ModelFit {
                model: MODEL_NAME,
                iterations: outcome.iterations,
            });
        }

        let params = BetaGeoParams {
            r: outcome.solution[0].exp(),
            alpha: outcome.solution[1].exp(),
            a: outcome.solution[2].exp(),
            b: outcome.solution[3].exp(),
        };
        let log_likelihood = -Self::penalized_neg_log_likelihood(&params, records, 0.0);
        log::info!(
            "bg_nbd fit: r={:.4} alpha={:.4} a={:.4} b={:.4} ll={:.4} ({} customers, {} iterations)",
            params.r, params.alpha, params.a, params.b,
            log_likelihood, records.len(), outcome.iterations,
        );

        Ok(Self {
            params,
            log_likelihood,
            n_customers: records.len(),
            iterations: outcome.iterations,
        })
    }

    /// Mean negative log-likelihood plus the L2 penalty.
    fn penalized_neg_log_likelihood(
        params: &BetaGeoParams,
        records: &[RfmRecord],
        penalizer: f64,
    ) -> f64 {
        let BetaGeoParams { r, alpha, a, b } = *params;

        let mut total = 0.0;
        for rec in records {
            let x = rec.frequency;
            let a1 = ln_gamma(r + x) - ln_gamma(r) + r * alpha.ln();
            let a2 = ln_gamma(a + b) + ln_gamma(b + x) - ln_gamma(b) - ln_gamma(a + b + x);
            let a3 = -(r + x) * (alpha + rec.t).ln();
            let ll = if x > 0.0 {
                let a4 = a.ln() - (b + x - 1.0).ln() - (r + x) * (alpha + rec.recency).ln();
                a1 + a2 + log_sum_exp(a3, a4)
            } else {
                a1 + a2 + a3
            };
            total += ll;
        }

        let penalty = penalizer * (r * r + alpha * alpha + a * a + b * b);
        -(total / records.len() as f64) + penalty
    }

    /// Conditional expectation of the number of purchases in the next
    /// `horizon_days`, given the customer's history.
    pub fn expected_purchases(&self, rec: &RfmRecord, horizon_days: Days) -> f64 {
        let BetaGeoParams { r, alpha, a, b } = self.params;
        let (x, t_x, t_cal) = (rec.frequency, rec.recency, rec.t);
        if horizon_days <= 0.0 {
            return 0.0;
        }

        let z = horizon_days / (alpha + t_cal + horizon_days);
        let hyp = hyp2f1(r + x, b + x, a + b + x - 1.0, z);
        let decay = ((alpha + t_cal) / (alpha + t_cal + horizon_days)).powf(r + x);
        let numerator = (a + b + x - 1.0) / (a - 1.0) * (1.0 - decay * hyp);

        let denominator = if x > 0.0 {
            1.0 + a / (b + x - 1.0) * ((alpha + t_cal) / (alpha + t_x)).powf(r + x)
        } else {
            1.0
        };

        (numerator / denominator).max(0.0)
    }

    /// Probability the customer is still alive at the end of the
    /// observation period.
    pub fn p_alive(&self, rec: &RfmRecord) -> f64 {
        let BetaGeoParams { r, alpha, a, b } = self.params;
        let (x, t_x, t_cal) = (rec.frequency, rec.recency, rec.t);
        if x == 0.0 {
            return 1.0;
        }
        let odds = a / (b + x - 1.0) * ((alpha + t_cal) / (alpha + t_x)).powf(r + x);
        1.0 / (1.0 + odds)
    }

    /// Unconditional P(X(t) = x): probability a freshly acquired customer
    /// makes exactly `x` repeat purchases in `t` days. Powers the
    /// observed-vs-predicted fit diagnostic.
    pub fn probability_of_purchases(&self, t: Days, x: u64) -> f64 {
        // No elapsed time means no repeat purchases with certainty; the
        // log-space forms below would turn ln(0) into NaN.
        if t <= 0.0 {
            return if x == 0 { 1.0 } else { 0.0 };
        }
        let BetaGeoParams { r, alpha, a, b } = self.params;
        let xf = x as f64;
        let log_survive_frac = r * (alpha / (alpha + t)).ln();
        let log_t_frac = (t / (alpha + t)).ln();

        let term1 = (ln_beta(a, b + xf) - ln_beta(a, b)
            + ln_gamma(r + xf)
            - ln_gamma(r)
            - ln_gamma(xf + 1.0)
            + log_survive_frac
            + xf * log_t_frac)
            .exp();

        if x == 0 {
            return term1;
        }

        // Dropout branch: died somewhere before the x-th repeat purchase.
        let mut partial_sum = 0.0;
        for j in 0..x {
            let jf = j as f64;
            partial_sum += (ln_gamma(r + jf) - ln_gamma(r) - ln_gamma(jf + 1.0)
                + jf * log_t_frac)
                .exp();
        }
        let term2 = (ln_beta(a + 1.0, b + xf - 1.0) - ln_beta(a, b)).exp()
            * (1.0 - log_survive_frac.exp() * partial_sum);

        (term1 + term2).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(frequency: f64, recency: f64, t: f64) -> RfmRecord {
        RfmRecord {
            customer_id: "c".into(),
            frequency,
            recency,
            t,
            monetary_value: 0.0,
        }
    }

    // Published CDNOW parameters (Fader & Hardie 2005).
    fn cdnow_model() -> BetaGeoModel {
        BetaGeoModel {
            params: BetaGeoParams { r: 0.243, alpha: 4.414, a: 0.793, b: 2.426 },
            log_likelihood: 0.0,
            n_customers: 0,
            iterations: 0,
        }
    }

    #[test]
    fn p_alive_is_one_for_zero_frequency() {
        let model = cdnow_model();
        assert_eq!(model.p_alive(&rec(0.0, 0.0, 38.86)), 1.0);
    }

    #[test]
    fn p_alive_stays_in_unit_interval() {
        let model = cdnow_model();
        for r in [rec(2.0, 30.43, 38.86), rec(1.0, 1.0, 70.0), rec(25.0, 60.0, 62.0)] {
            let p = model.p_alive(&r);
            assert!((0.0..=1.0).contains(&p), "p_alive={p}");
        }
    }

    #[test]
    fn recent_buyer_more_likely_alive_than_lapsed_buyer() {
        let model = cdnow_model();
        let recent = model.p_alive(&rec(3.0, 60.0, 62.0));
        let lapsed = model.p_alive(&rec(3.0, 10.0, 62.0));
        assert!(recent > lapsed, "recent={recent} lapsed={lapsed}");
    }

    #[test]
    fn expected_purchases_non_negative_and_zero_at_zero_horizon() {
        let model = cdnow_model();
        let r = rec(2.0, 30.0, 38.0);
        assert_eq!(model.expected_purchases(&r, 0.0), 0.0);
        assert!(model.expected_purchases(&r, 39.0) >= 0.0);
    }

    #[test]
    fn expected_purchases_monotone_in_horizon() {
        let model = cdnow_model();
        let r = rec(4.0, 50.0, 60.0);
        let short = model.expected_purchases(&r, 30.0);
        let long = model.expected_purchases(&r, 360.0);
        assert!(long > short, "long={long} short={short}");
    }

    #[test]
    fn purchase_probabilities_form_a_distribution() {
        let model = cdnow_model();
        let total: f64 = (0..200).map(|x| model.probability_of_purchases(52.0, x)).sum();
        assert!((total - 1.0).abs() < 1e-6, "pmf sums to {total}");
    }

    #[test]
    fn zero_elapsed_time_is_a_point_mass_at_zero() {
        let model = cdnow_model();
        assert_eq!(model.probability_of_purchases(0.0, 0), 1.0);
        assert_eq!(model.probability_of_purchases(0.0, 1), 0.0);
        assert_eq!(model.probability_of_purchases(0.0, 5), 0.0);
    }

    #[test]
    fn fit_rejects_empty_input() {
        let err = BetaGeoModel::fit(&[], 0.0).unwrap_err();
        assert!(matches!(err, ClvError::InsufficientData { .. }));
    }

    #[test]
    fn fit_rejects_all_zero_frequency_population() {
        let records: Vec<RfmRecord> = (0..20).map(|i| rec(0.0, 0.0, 30.0 + i as f64)).collect();
        let err = BetaGeoModel::fit(&records, 0.0).unwrap_err();
        assert!(matches!(err, ClvError::InsufficientData { .. }));
    }
}
