//! Transaction-log loader.
//!
//! Reads the flat CSV input into memory in one pass. Loads are
//! all-or-nothing: the first malformed row rejects the whole file with a
//! row-numbered message, so downstream stages never see partial data.

use crate::{
    config::CsvColumns,
    error::{ClvError, ClvResult},
    rfm::Transaction,
};
use chrono::NaiveDate;

/// Accepted date formats, tried in order.
const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%Y-%m-%d %H:%M:%S"];

pub fn load_csv(path: &str, columns: &CsvColumns) -> ClvResult<Vec<Transaction>> {
    let mut reader = csv::Reader::from_path(path)?;

    let headers = reader.headers()?.clone();
    let customer_idx = column_index(&headers, &columns.customer_id)?;
    let date_idx = column_index(&headers, &columns.date)?;
    let value_idx = column_index(&headers, &columns.value)?;

    let mut transactions = Vec::new();
    for (n, row) in reader.records().enumerate() {
        let line = n as u64 + 2; // 1-based, after the header row
        let row = row?;

        let customer_id = row
            .get(customer_idx)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ClvError::MalformedRow {
                line,
                reason: "empty customer id".into(),
            })?
            .to_string();

        let date_raw = row.get(date_idx).map(str::trim).unwrap_or("");
        let date = parse_date(date_raw).ok_or_else(|| ClvError::MalformedRow {
            line,
            reason: format!("unparsable date '{date_raw}'"),
        })?;

        let value_raw = row.get(value_idx).map(str::trim).unwrap_or("");
        let value: f64 = value_raw.parse().map_err(|_| ClvError::MalformedRow {
            line,
            reason: format!("unparsable value '{value_raw}'"),
        })?;
        if !value.is_finite() || value < 0.0 {
            return Err(ClvError::MalformedRow {
                line,
                reason: format!("value {value} must be finite and non-negative"),
            });
        }

        transactions.push(Transaction { customer_id, date, value });
    }

    if transactions.is_empty() {
        return Err(anyhow::anyhow!("{path} contains no transaction rows").into());
    }

    log::info!("loaded {} transactions from {path}", transactions.len());
    Ok(transactions)
}

fn column_index(headers: &csv::StringRecord, name: &str) -> ClvResult<usize> {
    headers
        .iter()
        .position(|h| h == name)
        .ok_or_else(|| ClvError::MissingColumn { name: name.to_string() })
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Some(date);
        }
    }
    // RFC 3339 timestamps keep their calendar date.
    chrono::DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_csv(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{content}").unwrap();
        file
    }

    fn path(file: &NamedTempFile) -> &str {
        file.path().to_str().unwrap()
    }

    #[test]
    fn loads_well_formed_file() {
        let file = write_csv(
            "customer_id,date,price\n\
             c1,2024-01-05,19.99\n\
             c2,2024-01-06 14:02:11,5.00\n\
             c1,2024-02-01T09:00:00Z,12.50\n",
        );
        let transactions = load_csv(path(&file), &CsvColumns::default()).unwrap();
        assert_eq!(transactions.len(), 3);
        assert_eq!(transactions[2].date.to_string(), "2024-02-01");
    }

    #[test]
    fn missing_column_is_rejected() {
        let file = write_csv("customer_id,when,price\nc1,2024-01-05,19.99\n");
        let err = load_csv(path(&file), &CsvColumns::default()).unwrap_err();
        assert!(matches!(err, ClvError::MissingColumn { name } if name == "date"));
    }

    #[test]
    fn unparsable_date_reports_row_number() {
        let file = write_csv(
            "customer_id,date,price\n\
             c1,2024-01-05,19.99\n\
             c2,not-a-date,5.00\n",
        );
        let err = load_csv(path(&file), &CsvColumns::default()).unwrap_err();
        assert!(matches!(err, ClvError::MalformedRow { line: 3, .. }), "{err}");
    }

    #[test]
    fn negative_value_is_rejected() {
        let file = write_csv("customer_id,date,price\nc1,2024-01-05,-3.00\n");
        let err = load_csv(path(&file), &CsvColumns::default()).unwrap_err();
        assert!(matches!(err, ClvError::MalformedRow { line: 2, .. }));
    }

    #[test]
    fn empty_file_is_rejected() {
        let file = write_csv("customer_id,date,price\n");
        assert!(load_csv(path(&file), &CsvColumns::default()).is_err());
    }

    #[test]
    fn custom_column_names_are_honoured() {
        let file = write_csv("CustomerID,InvoiceDate,Amount\n17850,2010-12-01,2.55\n");
        let columns = CsvColumns {
            customer_id: "CustomerID".into(),
            date: "InvoiceDate".into(),
            value: "Amount".into(),
        };
        let transactions = load_csv(path(&file), &columns).unwrap();
        assert_eq!(transactions[0].customer_id, "17850");
    }
}
