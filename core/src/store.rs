//! SQLite persistence layer for a run.
//!
//! RULE: Only store.rs talks to the database. Pipeline stages call store
//! methods — they never execute SQL directly.
//!
//! The store is a cache of the current run, not a durability contract:
//! tests and the default runner use `:memory:`, a file database is
//! opt-in.

use crate::{
    clv::{ClvEstimate, SegmentLabel},
    error::{ClvError, ClvResult},
    rfm::{RfmRecord, Transaction},
    types::RunId,
};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};

pub struct ClvStore {
    conn: Connection,
}

/// Persisted fit metadata for one model.
#[derive(Debug, Clone)]
pub struct StoredFit {
    pub model: String,
    pub params: serde_json::Value,
    pub log_likelihood: f64,
    pub n_customers: i64,
    pub iterations: i64,
}

impl ClvStore {
    pub fn open(path: &str) -> ClvResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only matters for real files; :memory: ignores it.
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (default for tests and one-shot runs).
    pub fn in_memory() -> ClvResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> ClvResult<()> {
        self.conn
            .execute_batch(include_str!("../../migrations/001_foundation.sql"))?;
        self.conn
            .execute_batch(include_str!("../../migrations/002_rfm.sql"))?;
        self.conn
            .execute_batch(include_str!("../../migrations/003_valuation.sql"))?;
        Ok(())
    }

    // ── Run ────────────────────────────────────────────────────

    /// Register a run, or re-point an existing one at a new source.
    pub fn insert_run(&self, run_id: &RunId, source: &str, version: &str) -> ClvResult<()> {
        self.conn.execute(
            "INSERT INTO run (run_id, source, version, created_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(run_id) DO UPDATE SET
                 source = excluded.source,
                 version = excluded.version,
                 created_at = excluded.created_at",
            params![run_id, source, version, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    // ── Transactions ───────────────────────────────────────────

    /// Replace the transaction log for a run in a single SQL transaction.
    pub fn replace_transactions(
        &mut self,
        run_id: &RunId,
        transactions: &[Transaction],
    ) -> ClvResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM transactions WHERE run_id = ?1", params![run_id])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO transactions (run_id, customer_id, txn_date, amount)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for txn in transactions {
                stmt.execute(params![
                    run_id,
                    txn.customer_id,
                    txn.date.format("%Y-%m-%d").to_string(),
                    txn.value,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn transactions_for_run(&self, run_id: &RunId) -> ClvResult<Vec<Transaction>> {
        let mut stmt = self.conn.prepare(
            "SELECT customer_id, txn_date, amount FROM transactions
             WHERE run_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(customer_id, raw_date, value)| {
                let date = NaiveDate::parse_from_str(&raw_date, "%Y-%m-%d")
                    .map_err(|e| anyhow::anyhow!("corrupt txn_date '{raw_date}': {e}"))?;
                Ok(Transaction { customer_id, date, value })
            })
            .collect()
    }

    pub fn transaction_count(&self, run_id: &RunId) -> ClvResult<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM transactions WHERE run_id = ?1",
            params![run_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ── RFM summaries ──────────────────────────────────────────

    pub fn replace_rfm(&mut self, run_id: &RunId, records: &[RfmRecord]) -> ClvResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM rfm_summary WHERE run_id = ?1", params![run_id])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO rfm_summary (run_id, customer_id, frequency, recency, t, monetary_value)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for rec in records {
                stmt.execute(params![
                    run_id,
                    rec.customer_id,
                    rec.frequency,
                    rec.recency,
                    rec.t,
                    rec.monetary_value,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn rfm_for_run(&self, run_id: &RunId) -> ClvResult<Vec<RfmRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT customer_id, frequency, recency, t, monetary_value
             FROM rfm_summary WHERE run_id = ?1 ORDER BY customer_id ASC",
        )?;
        let records = stmt
            .query_map(params![run_id], Self::rfm_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn rfm_for_customer(
        &self,
        run_id: &RunId,
        customer_id: &str,
    ) -> ClvResult<Option<RfmRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT customer_id, frequency, recency, t, monetary_value
                 FROM rfm_summary WHERE run_id = ?1 AND customer_id = ?2",
                params![run_id, customer_id],
                Self::rfm_from_row,
            )
            .optional()?;
        Ok(record)
    }

    fn rfm_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RfmRecord> {
        Ok(RfmRecord {
            customer_id: row.get(0)?,
            frequency: row.get(1)?,
            recency: row.get(2)?,
            t: row.get(3)?,
            monetary_value: row.get(4)?,
        })
    }

    // ── Model fits ─────────────────────────────────────────────

    pub fn upsert_model_fit(
        &self,
        run_id: &RunId,
        model: &str,
        params_json: &serde_json::Value,
        log_likelihood: f64,
        n_customers: usize,
        iterations: usize,
    ) -> ClvResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO model_fit
             (run_id, model, params, log_likelihood, n_customers, iterations)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                run_id,
                model,
                params_json.to_string(),
                log_likelihood,
                n_customers as i64,
                iterations as i64,
            ],
        )?;
        Ok(())
    }

    pub fn model_fit(&self, run_id: &RunId, model: &str) -> ClvResult<Option<StoredFit>> {
        let row = self
            .conn
            .query_row(
                "SELECT model, params, log_likelihood, n_customers, iterations
                 FROM model_fit WHERE run_id = ?1 AND model = ?2",
                params![run_id, model],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, f64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(model, raw_params, log_likelihood, n_customers, iterations)| {
            Ok(StoredFit {
                model,
                params: serde_json::from_str(&raw_params)?,
                log_likelihood,
                n_customers,
                iterations,
            })
        })
        .transpose()
    }

    // ── CLV estimates ──────────────────────────────────────────

    pub fn replace_estimates(
        &mut self,
        run_id: &RunId,
        estimates: &[ClvEstimate],
    ) -> ClvResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM clv_estimate WHERE run_id = ?1", params![run_id])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO clv_estimate
                 (run_id, customer_id, expected_purchases, expected_txn_value,
                  p_alive, predicted_clv, segment)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for est in estimates {
                stmt.execute(params![
                    run_id,
                    est.customer_id,
                    est.expected_purchases,
                    est.expected_txn_value,
                    est.p_alive,
                    est.predicted_clv,
                    est.segment.as_str(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn estimates_for_run(&self, run_id: &RunId) -> ClvResult<Vec<ClvEstimate>> {
        let mut stmt = self.conn.prepare(
            "SELECT customer_id, expected_purchases, expected_txn_value,
                    p_alive, predicted_clv, segment
             FROM clv_estimate WHERE run_id = ?1 ORDER BY customer_id ASC",
        )?;
        let rows = stmt
            .query_map(params![run_id], Self::estimate_raw_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(Self::estimate_from_raw).collect()
    }

    pub fn estimate_for_customer(
        &self,
        run_id: &RunId,
        customer_id: &str,
    ) -> ClvResult<Option<ClvEstimate>> {
        let row = self
            .conn
            .query_row(
                "SELECT customer_id, expected_purchases, expected_txn_value,
                        p_alive, predicted_clv, segment
                 FROM clv_estimate WHERE run_id = ?1 AND customer_id = ?2",
                params![run_id, customer_id],
                Self::estimate_raw_from_row,
            )
            .optional()?;
        row.map(Self::estimate_from_raw).transpose()
    }

    /// Highest-value customers first.
    pub fn top_estimates(&self, run_id: &RunId, limit: usize) -> ClvResult<Vec<ClvEstimate>> {
        let mut stmt = self.conn.prepare(
            "SELECT customer_id, expected_purchases, expected_txn_value,
                    p_alive, predicted_clv, segment
             FROM clv_estimate WHERE run_id = ?1
             ORDER BY predicted_clv DESC, customer_id ASC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![run_id, limit as i64], Self::estimate_raw_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(Self::estimate_from_raw).collect()
    }

    fn estimate_raw_from_row(
        row: &rusqlite::Row<'_>,
    ) -> rusqlite::Result<(String, f64, f64, f64, f64, String)> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
        ))
    }

    fn estimate_from_raw(
        (customer_id, expected_purchases, expected_txn_value, p_alive, predicted_clv, raw_segment): (
            String,
            f64,
            f64,
            f64,
            f64,
            String,
        ),
    ) -> ClvResult<ClvEstimate> {
        let segment = SegmentLabel::parse(&raw_segment)
            .ok_or_else(|| anyhow::anyhow!("unknown segment label '{raw_segment}' in store"))?;
        Ok(ClvEstimate {
            customer_id,
            expected_purchases,
            expected_txn_value,
            p_alive,
            predicted_clv,
            segment,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ClvStore {
        let store = ClvStore::in_memory().unwrap();
        store.migrate().unwrap();
        store
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn transactions_round_trip() {
        let mut store = store();
        let run_id: RunId = "r1".into();
        store.insert_run(&run_id, "test", "0.1.0").unwrap();

        let txns = vec![
            Transaction { customer_id: "a".into(), date: date("2024-01-05"), value: 12.5 },
            Transaction { customer_id: "b".into(), date: date("2024-02-01"), value: 4.0 },
        ];
        store.replace_transactions(&run_id, &txns).unwrap();

        assert_eq!(store.transaction_count(&run_id).unwrap(), 2);
        let back = store.transactions_for_run(&run_id).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[0].customer_id, "a");
        assert_eq!(back[0].date, date("2024-01-05"));
    }

    #[test]
    fn run_registration_is_reentrant() {
        let store = store();
        let run_id: RunId = "r1".into();
        store.insert_run(&run_id, "first", "0.1.0").unwrap();
        store.insert_run(&run_id, "second", "0.1.0").unwrap();
    }

    #[test]
    fn replace_transactions_is_idempotent() {
        let mut store = store();
        let run_id: RunId = "r1".into();
        store.insert_run(&run_id, "test", "0.1.0").unwrap();

        let txns = vec![Transaction {
            customer_id: "a".into(),
            date: date("2024-01-05"),
            value: 12.5,
        }];
        store.replace_transactions(&run_id, &txns).unwrap();
        store.replace_transactions(&run_id, &txns).unwrap();
        assert_eq!(store.transaction_count(&run_id).unwrap(), 1);
    }

    #[test]
    fn estimates_round_trip_with_segment_labels() {
        let mut store = store();
        let run_id: RunId = "r1".into();
        store.insert_run(&run_id, "test", "0.1.0").unwrap();

        let estimates = vec![
            ClvEstimate {
                customer_id: "a".into(),
                expected_purchases: 2.5,
                expected_txn_value: 30.0,
                p_alive: 0.8,
                predicted_clv: 70.0,
                segment: SegmentLabel::HighValue,
            },
            ClvEstimate {
                customer_id: "b".into(),
                expected_purchases: 0.2,
                expected_txn_value: 12.0,
                p_alive: 1.0,
                predicted_clv: 2.1,
                segment: SegmentLabel::LowPriority,
            },
        ];
        store.replace_estimates(&run_id, &estimates).unwrap();

        let top = store.top_estimates(&run_id, 1).unwrap();
        assert_eq!(top[0].customer_id, "a");
        assert_eq!(top[0].segment, SegmentLabel::HighValue);

        let missing = store.estimate_for_customer(&run_id, "zzz").unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn model_fit_upsert_overwrites() {
        let store = store();
        let run_id: RunId = "r1".into();
        store.insert_run(&run_id, "test", "0.1.0").unwrap();

        let params = serde_json::json!({"r": 0.2, "alpha": 4.4, "a": 0.8, "b": 2.4});
        store.upsert_model_fit(&run_id, "bg_nbd", &params, -9.5, 100, 300).unwrap();
        store.upsert_model_fit(&run_id, "bg_nbd", &params, -9.1, 100, 280).unwrap();

        let fit = store.model_fit(&run_id, "bg_nbd").unwrap().unwrap();
        assert!((fit.log_likelihood + 9.1).abs() < 1e-12);
        assert_eq!(fit.iterations, 280);
    }
}
