//! Synthetic transaction-log generator for demo runs and model tests.
//!
//! Produces a heterogeneous customer base over a one-year window: each
//! customer gets an individual purchase cadence, a dropout day, and a
//! personal spend level; order values are Erlang around that level so the
//! spend model's gamma assumption holds. Deterministic per seed via
//! `DemoRng`.

use crate::{rfm::Transaction, rng::DemoRng};
use chrono::{Duration, NaiveDate};

pub struct DemoDataset {
    pub customers: usize,
    pub window_days: i64,
    pub start: NaiveDate,
}

impl Default for DemoDataset {
    fn default() -> Self {
        Self {
            customers: 400,
            window_days: 365,
            start: NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid date"),
        }
    }
}

impl DemoDataset {
    /// Generate the transaction log. Every customer contributes at least
    /// the acquisition purchase; repeat behaviour varies widely.
    pub fn generate(&self, seed: u64) -> Vec<Transaction> {
        let mut rng = DemoRng::new(seed);
        let mut transactions = Vec::new();

        for n in 0..self.customers {
            let customer_id = format!("C{:05}", n + 1);

            // First purchase lands somewhere in the first three quarters,
            // leaving room to observe repeat behaviour.
            let first_offset = rng.next_u64_below((self.window_days as u64 * 3 / 4).max(1)) as i64;
            let first_day = self.start + Duration::days(first_offset);

            // Individual cadence: mean gap between orders, 12..=90 days.
            let mean_gap = 12.0 + rng.next_f64() * 78.0;
            // One in four customers never returns; the rest drop out at a
            // random point inside the window.
            let dropout_after = if rng.chance(0.25) {
                0.0
            } else {
                rng.next_f64() * self.window_days as f64
            };

            let spend_level = 8.0 + rng.next_f64() * 25.0;
            transactions.push(Transaction {
                customer_id: customer_id.clone(),
                date: first_day,
                value: rng.erlang(3, spend_level),
            });

            let mut elapsed = rng.exponential(mean_gap);
            while elapsed < dropout_after {
                let day = first_day + Duration::days(elapsed.ceil() as i64);
                if day > self.start + Duration::days(self.window_days) {
                    break;
                }
                transactions.push(Transaction {
                    customer_id: customer_id.clone(),
                    date: day,
                    value: rng.erlang(3, spend_level),
                });
                elapsed += rng.exponential(mean_gap);
            }
        }

        transactions
    }
}
