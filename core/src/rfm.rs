//! RFM transformer: collapses the raw transaction log into one
//! (recency, frequency, T, monetary-value) record per customer.
//!
//! Conventions (shared with the standard BTYD literature):
//!   - Transactions on the same calendar day are one order; their values sum.
//!   - frequency counts *repeat* orders, so a one-order customer has 0.
//!   - recency is the gap in days between first and last order, NOT the
//!     time since the last order.
//!   - monetary_value averages the repeat orders only; the first order is
//!     excluded because it is conditioned on by both models.
//!
//! Deterministic given fixed input: grouping uses ordered maps and the
//! output is sorted by customer id.

use crate::types::{CustomerId, Days};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One row of the input transaction log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub customer_id: CustomerId,
    pub date: NaiveDate,
    pub value: f64,
}

/// Per-customer summary consumed by both models.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RfmRecord {
    pub customer_id: CustomerId,
    /// Number of repeat orders (total orders minus one).
    pub frequency: f64,
    /// Days between the first and the most recent order.
    pub recency: Days,
    /// Days between the first order and the observation-period end.
    pub t: Days,
    /// Mean value of repeat orders; 0.0 when there are none.
    pub monetary_value: f64,
}

/// Latest transaction date, used as the default observation-period end.
pub fn latest_transaction_date(transactions: &[Transaction]) -> Option<NaiveDate> {
    transactions.iter().map(|t| t.date).max()
}

/// Derive one `RfmRecord` per distinct customer with at least one
/// transaction on or before `observation_end`.
pub fn summarize(transactions: &[Transaction], observation_end: NaiveDate) -> Vec<RfmRecord> {
    // customer -> order date -> order value (same-day transactions merge)
    let mut orders: BTreeMap<&str, BTreeMap<NaiveDate, f64>> = BTreeMap::new();
    for txn in transactions {
        if txn.date > observation_end {
            continue;
        }
        *orders
            .entry(txn.customer_id.as_str())
            .or_default()
            .entry(txn.date)
            .or_insert(0.0) += txn.value;
    }

    orders
        .into_iter()
        .map(|(customer_id, by_day)| {
            let first = *by_day.keys().next().expect("non-empty order map");
            let last = *by_day.keys().next_back().expect("non-empty order map");
            let frequency = (by_day.len() - 1) as f64;

            let monetary_value = if by_day.len() > 1 {
                let repeat_total: f64 = by_day.values().skip(1).sum();
                repeat_total / frequency
            } else {
                0.0
            };

            RfmRecord {
                customer_id: customer_id.to_string(),
                frequency,
                recency: (last - first).num_days() as Days,
                t: (observation_end - first).num_days() as Days,
                monetary_value,
            }
        })
        .collect()
}
