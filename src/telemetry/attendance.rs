//! Submission span helpers.
//!
//! Provides span creation and decision recording for submissions
//! flowing through the attendance engine.

use tracing::Span;
use uuid::Uuid;

/// Start a span for one attendance submission.
///
/// The `attendance.decision` field is declared empty and is filled by
/// [`record_decision`] once the outcome is known.
pub fn start_submission_span(event_type: &str, technician_id: &Uuid) -> Span {
    tracing::info_span!(
        "attendance.submit",
        "attendance.event_type" = event_type,
        "attendance.technician_id" = %technician_id,
        "attendance.decision" = tracing::field::Empty,
    )
}

/// Record the terminal decision on the submission span.
pub fn record_decision(span: &Span, decision: &str, reason: Option<&str>) {
    span.record("attendance.decision", decision);
    span.in_scope(|| {
        tracing::info!(decision, reason = reason.unwrap_or("-"), "decision");
    });
}
