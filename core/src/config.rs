//! Engine configuration.
//!
//! Segment thresholds are business policy, not a statistical derivation,
//! so they live here rather than in the models. The shipped defaults
//! reproduce the reference deployment (12-month horizon, 1% monthly
//! discount, 0.8/0.4 quantile cut-offs).

use crate::error::{ClvError, ClvResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Column names expected in the input CSV.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsvColumns {
    pub customer_id: String,
    pub date: String,
    pub value: String,
}

impl Default for CsvColumns {
    fn default() -> Self {
        Self {
            customer_id: "customer_id".into(),
            date: "date".into(),
            value: "price".into(),
        }
    }
}

/// Forecast horizon and discounting policy for the combined estimate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClvPolicy {
    /// Forecast horizon in 30-day months.
    pub horizon_months: u32,
    /// Discount rate applied per month of the horizon.
    pub monthly_discount_rate: f64,
    /// L2 penalizer added to both model likelihoods. 0 = plain MLE.
    pub penalizer_coef: f64,
}

impl Default for ClvPolicy {
    fn default() -> Self {
        Self {
            horizon_months: 12,
            monthly_discount_rate: 0.01,
            penalizer_coef: 0.0,
        }
    }
}

/// How predicted CLV maps to a segment label.
///
/// Both variants order the range as low-priority < nurture < high-value,
/// so every finite CLV lands in exactly one segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SegmentRule {
    /// Cut-offs taken as quantiles of the scored population.
    Quantile { high_value: f64, nurture: f64 },
    /// Fixed currency cut-offs, for reuse across datasets.
    Absolute { high_value: f64, nurture: f64 },
}

impl SegmentRule {
    /// Reject rules that would not partition the CLV range.
    pub fn validate(&self) -> ClvResult<()> {
        match *self {
            SegmentRule::Quantile { high_value, nurture } => {
                if !(0.0..=1.0).contains(&nurture) || !(0.0..=1.0).contains(&high_value) {
                    return Err(ClvError::InvalidConfig(
                        "segment quantiles must lie in [0, 1]".into(),
                    ));
                }
                if nurture >= high_value {
                    return Err(ClvError::InvalidConfig(format!(
                        "nurture quantile {nurture} must be below high_value quantile {high_value}"
                    )));
                }
                Ok(())
            }
            SegmentRule::Absolute { high_value, nurture } => {
                if !high_value.is_finite() || !nurture.is_finite() {
                    return Err(ClvError::InvalidConfig(
                        "segment cut-offs must be finite".into(),
                    ));
                }
                if nurture >= high_value {
                    return Err(ClvError::InvalidConfig(format!(
                        "nurture cut-off {nurture} must be below high_value cut-off {high_value}"
                    )));
                }
                Ok(())
            }
        }
    }
}

impl Default for SegmentRule {
    fn default() -> Self {
        SegmentRule::Quantile { high_value: 0.8, nurture: 0.4 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub columns: CsvColumns,
    /// Override for the observation-period end. Defaults to the latest
    /// transaction date in the loaded data.
    #[serde(default)]
    pub observation_end: Option<NaiveDate>,
    #[serde(default)]
    pub policy: ClvPolicy,
    #[serde(default)]
    pub segments: SegmentRule,
}

impl EngineConfig {
    /// Load from a JSON file. Missing sections fall back to defaults.
    pub fn load(path: &str) -> ClvResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ClvResult<()> {
        if self.policy.horizon_months == 0 {
            return Err(ClvError::InvalidConfig("horizon_months must be ≥ 1".into()));
        }
        if self.policy.monthly_discount_rate < 0.0 {
            return Err(ClvError::InvalidConfig(
                "monthly_discount_rate must be ≥ 0".into(),
            ));
        }
        if self.policy.penalizer_coef < 0.0 {
            return Err(ClvError::InvalidConfig("penalizer_coef must be ≥ 0".into()));
        }
        self.segments.validate()
    }

    /// Config with hardcoded defaults for use in unit tests.
    pub fn default_test() -> Self {
        Self {
            policy: ClvPolicy {
                horizon_months: 12,
                monthly_discount_rate: 0.01,
                penalizer_coef: 0.01,
            },
            ..Self::default()
        }
    }
}
