//! The valuation engine — orchestrates the whole pipeline.
//!
//! PIPELINE ORDER (fixed, documented, never reordered):
//!   1. Load transactions          (loader / demo generator)
//!   2. RFM summaries              (rfm)
//!   3. Purchase-timing fit        (bgnbd)
//!   4. Spend fit                  (gamma_gamma)
//!   5. Combine + segment          (clv)
//!
//! RULES:
//!   - recompute() is synchronous and all-or-nothing: every store write
//!     happens after every computation has succeeded, so a failed fit
//!     leaves the previous persisted results untouched.
//!   - All SQL goes through ClvStore.

use crate::{
    bgnbd::{self, BetaGeoModel, BetaGeoParams},
    clv::{self, ClvEstimate, SegmentCutoffs, SegmentLabel},
    config::EngineConfig,
    diagnostics::{self, FitDiagnostics},
    error::{ClvError, ClvResult},
    gamma_gamma::{self, GammaGammaModel, GammaGammaParams},
    loader,
    rfm::{self, RfmRecord, Transaction},
    store::ClvStore,
    types::RunId,
};
use serde::{Deserialize, Serialize};

pub struct ClvEngine {
    run_id: RunId,
    config: EngineConfig,
    store: ClvStore,
    timing: Option<BetaGeoModel>,
    spend: Option<GammaGammaModel>,
    cutoffs: Option<SegmentCutoffs>,
}

/// What a completed recompute produced, for logging and the IPC surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub run_id: RunId,
    pub n_transactions: usize,
    pub n_customers: usize,
    pub n_repeat_customers: usize,
    pub observation_end: chrono::NaiveDate,
    pub timing_params: BetaGeoParams,
    pub spend_params: GammaGammaParams,
    pub cutoffs: SegmentCutoffs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentCounts {
    pub high_value: u64,
    pub nurture: u64,
    pub low_priority: u64,
}

/// Aggregate view over the scored population.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClvSummary {
    pub customer_count: usize,
    pub total_clv: f64,
    pub mean_clv: f64,
    pub median_clv: f64,
    pub max_clv: f64,
    pub histogram: Vec<HistogramBin>,
    pub segments: SegmentCounts,
    pub cutoffs: SegmentCutoffs,
}

/// Per-customer drill-down: history plus forward-looking estimate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerView {
    pub customer_id: String,
    pub rfm: RfmRecord,
    pub estimate: ClvEstimate,
}

const HISTOGRAM_BINS: usize = 20;

impl ClvEngine {
    /// Wire an engine onto a migrated store. The config is validated here
    /// so a bad segment rule fails before any data moves.
    pub fn build(run_id: RunId, config: EngineConfig, store: ClvStore) -> ClvResult<Self> {
        config.validate()?;
        Ok(Self {
            run_id,
            config,
            store,
            timing: None,
            spend: None,
            cutoffs: None,
        })
    }

    /// In-memory engine with test defaults (used by the test suite).
    pub fn build_test(run_id: RunId) -> ClvResult<Self> {
        let store = ClvStore::in_memory()?;
        store.migrate()?;
        Self::build(run_id, EngineConfig::default_test(), store)
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Change the forecast horizon; takes effect on the next recompute.
    pub fn set_horizon_months(&mut self, months: u32) -> ClvResult<()> {
        if months == 0 {
            return Err(ClvError::InvalidConfig("horizon_months must be ≥ 1".into()));
        }
        self.config.policy.horizon_months = months;
        Ok(())
    }

    // ── Loading ────────────────────────────────────────────────

    /// Load the input CSV and register the run. Returns the row count.
    pub fn load_csv(&mut self, path: &str) -> ClvResult<usize> {
        let transactions = loader::load_csv(path, &self.config.columns)?;
        self.register(path, &transactions)?;
        Ok(transactions.len())
    }

    /// Load an already-parsed transaction log (demo mode, tests).
    pub fn load_transactions(
        &mut self,
        source: &str,
        transactions: Vec<Transaction>,
    ) -> ClvResult<usize> {
        self.register(source, &transactions)?;
        Ok(transactions.len())
    }

    fn register(&mut self, source: &str, transactions: &[Transaction]) -> ClvResult<()> {
        self.store
            .insert_run(&self.run_id, source, env!("CARGO_PKG_VERSION"))?;
        self.store.replace_transactions(&self.run_id, transactions)?;
        Ok(())
    }

    // ── Recompute ──────────────────────────────────────────────

    /// Run the full pipeline over the loaded transactions.
    pub fn recompute(&mut self) -> ClvResult<PipelineReport> {
        let transactions = self.store.transactions_for_run(&self.run_id)?;
        if transactions.is_empty() {
            return Err(ClvError::InsufficientData {
                model: "pipeline",
                reason: "no transactions loaded for this run".into(),
            });
        }

        let observation_end = match self.config.observation_end {
            Some(end) => end,
            None => rfm::latest_transaction_date(&transactions)
                .expect("non-empty transaction log has a latest date"),
        };

        let records = rfm::summarize(&transactions, observation_end);
        let penalizer = self.config.policy.penalizer_coef;
        let timing = BetaGeoModel::fit(&records, penalizer)?;
        let spend = GammaGammaModel::fit(&records, penalizer)?;
        let (estimates, cutoffs) = clv::score_customers(
            &records,
            &timing,
            &spend,
            &self.config.policy,
            &self.config.segments,
        )?;

        // All computation succeeded — now persist.
        self.store.replace_rfm(&self.run_id, &records)?;
        self.store.upsert_model_fit(
            &self.run_id,
            bgnbd::MODEL_NAME,
            &serde_json::to_value(timing.params)?,
            timing.log_likelihood,
            timing.n_customers,
            timing.iterations,
        )?;
        self.store.upsert_model_fit(
            &self.run_id,
            gamma_gamma::MODEL_NAME,
            &serde_json::to_value(spend.params)?,
            spend.log_likelihood,
            spend.n_customers,
            spend.iterations,
        )?;
        self.store.replace_estimates(&self.run_id, &estimates)?;

        let report = PipelineReport {
            run_id: self.run_id.clone(),
            n_transactions: transactions.len(),
            n_customers: records.len(),
            n_repeat_customers: records.iter().filter(|r| r.frequency > 0.0).count(),
            observation_end,
            timing_params: timing.params,
            spend_params: spend.params,
            cutoffs,
        };
        log::info!(
            "recompute: run={} customers={} repeat={} horizon={}mo",
            report.run_id, report.n_customers, report.n_repeat_customers,
            self.config.policy.horizon_months,
        );

        self.timing = Some(timing);
        self.spend = Some(spend);
        self.cutoffs = Some(cutoffs);
        Ok(report)
    }

    /// Recompute, optionally under a new horizon. The horizon change
    /// sticks only if the pipeline succeeds; on failure the previous
    /// horizon is restored so later recomputes are unaffected.
    pub fn recompute_with_horizon(
        &mut self,
        horizon_months: Option<u32>,
    ) -> ClvResult<PipelineReport> {
        let Some(months) = horizon_months else {
            return self.recompute();
        };
        let previous = self.config.policy.horizon_months;
        self.set_horizon_months(months)?;
        match self.recompute() {
            Ok(report) => Ok(report),
            Err(e) => {
                self.config.policy.horizon_months = previous;
                Err(e)
            }
        }
    }

    // ── Queries ────────────────────────────────────────────────

    pub fn summary(&self) -> ClvResult<ClvSummary> {
        let estimates = self.store.estimates_for_run(&self.run_id)?;
        if estimates.is_empty() {
            return Err(ClvError::InsufficientData {
                model: "pipeline",
                reason: "no estimates computed yet; run recompute first".into(),
            });
        }
        let mut values: Vec<f64> = estimates.iter().map(|e| e.predicted_clv).collect();
        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        // Resolving the rule against the stored values reproduces the
        // recompute-time cut-offs, so a reopened run needs no extra state.
        let cutoffs = match self.cutoffs {
            Some(c) => c,
            None => clv::resolve_cutoffs(&values, &self.config.segments)?,
        };
        let total: f64 = values.iter().sum();
        let max = *values.last().expect("non-empty");
        let median = if values.len() % 2 == 1 {
            values[values.len() / 2]
        } else {
            (values[values.len() / 2 - 1] + values[values.len() / 2]) / 2.0
        };

        let mut segments = SegmentCounts { high_value: 0, nurture: 0, low_priority: 0 };
        for est in &estimates {
            match est.segment {
                SegmentLabel::HighValue => segments.high_value += 1,
                SegmentLabel::Nurture => segments.nurture += 1,
                SegmentLabel::LowPriority => segments.low_priority += 1,
            }
        }

        Ok(ClvSummary {
            customer_count: estimates.len(),
            total_clv: total,
            mean_clv: total / estimates.len() as f64,
            median_clv: median,
            max_clv: max,
            histogram: histogram(&values, HISTOGRAM_BINS),
            segments,
            cutoffs,
        })
    }

    pub fn customer(&self, customer_id: &str) -> ClvResult<CustomerView> {
        let rfm = self
            .store
            .rfm_for_customer(&self.run_id, customer_id)?
            .ok_or_else(|| ClvError::CustomerNotFound { customer_id: customer_id.into() })?;
        let estimate = self
            .store
            .estimate_for_customer(&self.run_id, customer_id)?
            .ok_or_else(|| ClvError::CustomerNotFound { customer_id: customer_id.into() })?;
        Ok(CustomerView { customer_id: customer_id.into(), rfm, estimate })
    }

    pub fn top_customers(&self, limit: usize) -> ClvResult<Vec<ClvEstimate>> {
        self.store.top_estimates(&self.run_id, limit)
    }

    /// Observed vs. predicted repeat-transaction counts for the current fit.
    pub fn diagnostics(&self) -> ClvResult<FitDiagnostics> {
        let timing = self.timing_model()?;
        let records = self.store.rfm_for_run(&self.run_id)?;
        if records.is_empty() {
            return Err(ClvError::InsufficientData {
                model: "pipeline",
                reason: "no RFM summaries computed yet; run recompute first".into(),
            });
        }
        Ok(diagnostics::repeat_transaction_table(&records, &timing))
    }

    /// The in-memory fit if present, otherwise reconstructed from the
    /// store (a file-backed run reopened later).
    fn timing_model(&self) -> ClvResult<BetaGeoModel> {
        if let Some(model) = &self.timing {
            return Ok(model.clone());
        }
        let stored = self
            .store
            .model_fit(&self.run_id, bgnbd::MODEL_NAME)?
            .ok_or_else(|| ClvError::InsufficientData {
                model: bgnbd::MODEL_NAME,
                reason: "model has not been fitted for this run".into(),
            })?;
        let params: BetaGeoParams = serde_json::from_value(stored.params)?;
        Ok(BetaGeoModel {
            params,
            log_likelihood: stored.log_likelihood,
            n_customers: stored.n_customers as usize,
            iterations: stored.iterations as usize,
        })
    }
}

/// Fixed-width histogram from 0 to the max value.
fn histogram(sorted_values: &[f64], bins: usize) -> Vec<HistogramBin> {
    let max = sorted_values.last().copied().unwrap_or(0.0);
    if max <= 0.0 {
        return vec![HistogramBin { lower: 0.0, upper: 0.0, count: sorted_values.len() as u64 }];
    }
    let width = max / bins as f64;
    let mut out: Vec<HistogramBin> = (0..bins)
        .map(|i| HistogramBin {
            lower: width * i as f64,
            upper: width * (i + 1) as f64,
            count: 0,
        })
        .collect();
    for &v in sorted_values {
        let idx = ((v / width) as usize).min(bins - 1);
        out[idx].count += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn histogram_counts_every_value_once() {
        let values = [0.0, 1.0, 5.0, 9.9, 10.0];
        let bins = histogram(&values, 4);
        let total: u64 = bins.iter().map(|b| b.count).sum();
        assert_eq!(total, values.len() as u64);
        assert_eq!(bins.len(), 4);
    }

    #[test]
    fn histogram_of_all_zero_population_is_single_bin() {
        let bins = histogram(&[0.0, 0.0, 0.0], 10);
        assert_eq!(bins.len(), 1);
        assert_eq!(bins[0].count, 3);
    }
}
