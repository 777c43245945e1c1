//! CLV combiner: expected purchase volume × expected order value,
//! discounted month by month over the forecast horizon, then thresholded
//! into a segment label.
//!
//! The combine step is pure arithmetic over the two fitted models; the
//! segment cut-offs come from configuration, never from the models.

use crate::{
    bgnbd::BetaGeoModel,
    config::{ClvPolicy, SegmentRule},
    error::{ClvError, ClvResult},
    gamma_gamma::GammaGammaModel,
    rfm::RfmRecord,
    types::CustomerId,
};
use serde::{Deserialize, Serialize};

/// Days per forecast month. The models run on daily data, the horizon is
/// expressed in months; 30-day months are the BTYD convention.
pub const DAYS_PER_MONTH: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentLabel {
    HighValue,
    Nurture,
    LowPriority,
}

impl SegmentLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HighValue => "high_value",
            Self::Nurture => "nurture",
            Self::LowPriority => "low_priority",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "high_value" => Some(Self::HighValue),
            "nurture" => Some(Self::Nurture),
            "low_priority" => Some(Self::LowPriority),
            _ => None,
        }
    }
}

/// Per-customer output of the combiner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClvEstimate {
    pub customer_id: CustomerId,
    /// Expected transactions over the full horizon.
    pub expected_purchases: f64,
    /// Expected value per future transaction.
    pub expected_txn_value: f64,
    pub p_alive: f64,
    pub predicted_clv: f64,
    pub segment: SegmentLabel,
}

/// Concrete currency cut-offs after resolving the configured rule.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SegmentCutoffs {
    pub high_value: f64,
    pub nurture: f64,
}

/// Discounted expected value of one customer over the horizon.
///
/// Month k contributes the *incremental* expected purchases in
/// (30(k−1), 30k] times the expected order value, discounted by
/// (1 + d)^k. Non-negative for any valid record and parameters.
pub fn predicted_value(
    rec: &RfmRecord,
    timing: &BetaGeoModel,
    spend: &GammaGammaModel,
    policy: &ClvPolicy,
) -> (f64, f64, f64) {
    let expected_txn_value = spend.expected_average_value(rec);

    let mut discounted_purchases = 0.0;
    let mut cumulative_prev = 0.0;
    for month in 1..=policy.horizon_months {
        let cumulative = timing.expected_purchases(rec, DAYS_PER_MONTH * month as f64);
        let incremental = (cumulative - cumulative_prev).max(0.0);
        discounted_purchases +=
            incremental / (1.0 + policy.monthly_discount_rate).powi(month as i32);
        cumulative_prev = cumulative;
    }

    let horizon_days = DAYS_PER_MONTH * policy.horizon_months as f64;
    let expected_purchases = timing.expected_purchases(rec, horizon_days);
    let clv = (discounted_purchases * expected_txn_value).max(0.0);
    (expected_purchases, expected_txn_value, clv)
}

/// Score every customer and attach segment labels.
pub fn score_customers(
    records: &[RfmRecord],
    timing: &BetaGeoModel,
    spend: &GammaGammaModel,
    policy: &ClvPolicy,
    rule: &SegmentRule,
) -> ClvResult<(Vec<ClvEstimate>, SegmentCutoffs)> {
    rule.validate()?;

    let valued: Vec<(usize, f64, f64, f64)> = records
        .iter()
        .enumerate()
        .map(|(i, rec)| {
            let (purchases, txn_value, clv) = predicted_value(rec, timing, spend, policy);
            (i, purchases, txn_value, clv)
        })
        .collect();

    let values: Vec<f64> = valued.iter().map(|&(_, _, _, clv)| clv).collect();
    let cutoffs = resolve_cutoffs(&values, rule)?;

    let estimates = valued
        .into_iter()
        .map(|(i, expected_purchases, expected_txn_value, predicted_clv)| ClvEstimate {
            customer_id: records[i].customer_id.clone(),
            expected_purchases,
            expected_txn_value,
            p_alive: timing.p_alive(&records[i]),
            predicted_clv,
            segment: label_for(predicted_clv, cutoffs),
        })
        .collect();

    Ok((estimates, cutoffs))
}

/// Turn the configured rule into currency cut-offs for this population.
pub fn resolve_cutoffs(values: &[f64], rule: &SegmentRule) -> ClvResult<SegmentCutoffs> {
    match *rule {
        SegmentRule::Absolute { high_value, nurture } => {
            Ok(SegmentCutoffs { high_value, nurture })
        }
        SegmentRule::Quantile { high_value, nurture } => {
            if values.is_empty() {
                return Err(ClvError::InsufficientData {
                    model: "segmentation",
                    reason: "no scored customers to take quantiles over".into(),
                });
            }
            let mut sorted = values.to_vec();
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            Ok(SegmentCutoffs {
                high_value: quantile(&sorted, high_value),
                nurture: quantile(&sorted, nurture),
            })
        }
    }
}

/// Total over all finite CLV values: above high → high-value, above
/// nurture → nurture, everything else low-priority. No gaps, no overlaps.
pub fn label_for(clv: f64, cutoffs: SegmentCutoffs) -> SegmentLabel {
    if clv > cutoffs.high_value {
        SegmentLabel::HighValue
    } else if clv > cutoffs.nurture {
        SegmentLabel::Nurture
    } else {
        SegmentLabel::LowPriority
    }
}

/// Linear-interpolation quantile over pre-sorted values.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let position = q * (n - 1) as f64;
    let lo = position.floor() as usize;
    let hi = position.ceil() as usize;
    let weight = position - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * weight
}
