//! # fieldcheck-rs
//!
//! Attendance validation core for field technicians.
//!
//! Decides check-in/check-out acceptance for unreliable mobile clients:
//! exactly-once processing per client-generated event id, QR nonce
//! replay defense, geofence evaluation, and a single-open-session
//! invariant per technician. Exclusivity is delegated to Postgres
//! unique indexes; all writes for one submission share one transaction.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod geo;
pub mod model;
pub mod telemetry;
