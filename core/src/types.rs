//! Shared primitive types used across the valuation pipeline.

/// A stable customer identifier, taken verbatim from the input file.
pub type CustomerId = String;

/// The canonical run identifier. One run = one loaded dataset.
pub type RunId = String;

/// Fresh run identifier for callers that don't bring their own.
pub fn new_run_id() -> RunId {
    format!("run-{}", uuid::Uuid::new_v4().simple())
}

/// A duration in whole days, carried as f64 because every model
/// formula consumes it as a real number.
pub type Days = f64;
