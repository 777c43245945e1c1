//! clv-core: customer lifetime value estimation from transaction logs.
//!
//! The pipeline turns a flat transaction log into per-customer
//! Recency/Frequency/Monetary summaries, fits a BG/NBD purchase-timing
//! model and a Gamma-Gamma spend model by maximum likelihood, and
//! combines them into a discounted 12-month value estimate with a
//! configurable segment label. Everything hangs off `engine::ClvEngine`;
//! the store is the only module that touches SQL.

pub mod bgnbd;
pub mod clv;
pub mod config;
pub mod demo;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod gamma_gamma;
pub mod loader;
pub mod math;
pub mod rfm;
pub mod rng;
pub mod store;
pub mod types;

pub use config::EngineConfig;
pub use engine::ClvEngine;
pub use error::{ClvError, ClvResult};
