//! Model-fit diagnostics: observed vs. model-predicted distribution of
//! repeat transactions over the calibration period. A close match across
//! bins indicates the purchase-timing fit is credible.

use crate::{bgnbd::BetaGeoModel, rfm::RfmRecord};
use serde::{Deserialize, Serialize};

/// Highest exact repeat-purchase count shown; everything above lands in
/// the overflow bin.
pub const MAX_FREQUENCY_BIN: u64 = 7;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrequencyBin {
    /// Exact repeat-purchase count, or `MAX_FREQUENCY_BIN + 1` for the
    /// overflow bin.
    pub repeat_purchases: u64,
    pub overflow: bool,
    pub observed: u64,
    pub predicted: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitDiagnostics {
    pub bins: Vec<FrequencyBin>,
    pub n_customers: usize,
}

/// Build the observed-vs-predicted table. Each customer contributes their
/// own calibration length T, so the predicted count for bin x is
/// Σ over customers of P(X(T_c) = x).
pub fn repeat_transaction_table(records: &[RfmRecord], model: &BetaGeoModel) -> FitDiagnostics {
    let mut bins: Vec<FrequencyBin> = (0..=MAX_FREQUENCY_BIN)
        .map(|x| FrequencyBin { repeat_purchases: x, overflow: false, observed: 0, predicted: 0.0 })
        .collect();
    let mut overflow = FrequencyBin {
        repeat_purchases: MAX_FREQUENCY_BIN + 1,
        overflow: true,
        observed: 0,
        predicted: 0.0,
    };

    for rec in records {
        let observed_bin = rec.frequency as u64;
        if observed_bin > MAX_FREQUENCY_BIN {
            overflow.observed += 1;
        } else {
            bins[observed_bin as usize].observed += 1;
        }

        let mut accounted = 0.0;
        for x in 0..=MAX_FREQUENCY_BIN {
            let p = model.probability_of_purchases(rec.t, x);
            bins[x as usize].predicted += p;
            accounted += p;
        }
        overflow.predicted += (1.0 - accounted).max(0.0);
    }

    bins.push(overflow);
    FitDiagnostics { bins, n_customers: records.len() }
}
