//! Metric instrument factories for fieldcheck-rs.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"fieldcheck-rs"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for fieldcheck-rs instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("fieldcheck-rs")
}

/// Counter: attendance submissions that reached a terminal outcome.
/// Labels: `event_type`, `decision` ("accepted" | "rejected" | "error").
pub fn submissions() -> Counter<u64> {
    meter()
        .u64_counter("fieldcheck.attendance.submissions")
        .with_description("Number of attendance submissions processed")
        .build()
}

/// Counter: rejected submissions.
/// Labels: `event_type`, `reason`.
pub fn rejections() -> Counter<u64> {
    meter()
        .u64_counter("fieldcheck.attendance.rejections")
        .with_description("Number of attendance submissions rejected")
        .build()
}

/// Counter: submissions answered from the idempotency gate.
/// Labels: `event_type`.
pub fn idempotent_hits() -> Counter<u64> {
    meter()
        .u64_counter("fieldcheck.attendance.idempotent_hits")
        .with_description("Number of duplicate submissions resolved by the idempotency gate")
        .build()
}

/// Counter: QR nonces presented more than once.
pub fn replay_conflicts() -> Counter<u64> {
    meter()
        .u64_counter("fieldcheck.attendance.replay_conflicts")
        .with_description("Number of QR nonce replays detected")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("fieldcheck.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
