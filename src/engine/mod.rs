//! Attendance decision engine.
//!
//! Composes the idempotency gate, QR replay guard, session tracker, and
//! geofence evaluator into the check-in/check-out workflows. Every
//! terminal outcome — rejections included — is recorded as an event.
//! Side effects (session open/close, replay back-link) happen only on
//! accepted outcomes, inside the same transaction as the event insert.
//!
//! Exclusivity is never enforced by check-then-act logic here: the
//! store's unique indexes decide every race, and the engine converts a
//! lost race into the canonical outcome (the winner's event, a REPLAY
//! rejection, or an INVALID_SESSION rejection).

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use opentelemetry::KeyValue;
use tracing::{Instrument, Span, info, warn};
use uuid::Uuid;

use crate::db::{self, Db, events, replay, sessions};
use crate::error::{Error, Result};
use crate::geo;
use crate::model::*;
use crate::telemetry::attendance::{record_decision, start_submission_span};
use crate::telemetry::metrics;

/// Tunables for the decision engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Grace period added to QR expiry checks to absorb client/server
    /// clock drift.
    pub qr_clock_skew: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            qr_clock_skew: Duration::minutes(2),
        }
    }
}

/// The attendance decision engine.
pub struct AttendanceEngine {
    db: Arc<Db>,
    config: EngineConfig,
}

impl AttendanceEngine {
    pub fn new(db: Arc<Db>, config: EngineConfig) -> Self {
        Self { db, config }
    }

    /// Process a check-in submission to a terminal outcome.
    ///
    /// Returns the recorded event — accepted or rejected — or a fault.
    /// Safe to retry with the same `client_event_id` indefinitely.
    pub async fn check_in(
        &self,
        technician_id: Uuid,
        submission: AttendanceSubmission,
        qr: QrToken,
    ) -> Result<AttendanceEvent> {
        submission.validate()?;

        let span = start_submission_span(EventType::CheckIn.as_str(), &technician_id);
        let started = Instant::now();
        let result = self
            .submit_check_in(technician_id, submission, qr)
            .instrument(span.clone())
            .await;
        finish_submission(&span, EventType::CheckIn, started, &result);
        result
    }

    /// Process a check-out submission to a terminal outcome.
    pub async fn check_out(
        &self,
        technician_id: Uuid,
        submission: AttendanceSubmission,
    ) -> Result<AttendanceEvent> {
        submission.validate()?;

        let span = start_submission_span(EventType::CheckOut.as_str(), &technician_id);
        let started = Instant::now();
        let result = self
            .submit_check_out(technician_id, submission)
            .instrument(span.clone())
            .await;
        finish_submission(&span, EventType::CheckOut, started, &result);
        result
    }

    async fn submit_check_in(
        &self,
        technician_id: Uuid,
        submission: AttendanceSubmission,
        qr: QrToken,
    ) -> Result<AttendanceEvent> {
        // Idempotency gate: a retry of a recorded submission returns
        // the stored event untouched, before any validation work.
        if let Some(existing) = self
            .db
            .find_event_by_idempotency_key(technician_id, submission.client_event_id)
            .await?
        {
            metrics::idempotent_hits().add(
                1,
                &[KeyValue::new("event_type", EventType::CheckIn.as_str())],
            );
            info!(event = %existing.id, "duplicate submission, returning stored event");
            return Ok(existing);
        }

        let outcome = self.check_in_fresh(technician_id, &submission, &qr).await;
        self.resolve_lost_race(technician_id, submission.client_event_id, outcome)
            .await
    }

    async fn submit_check_out(
        &self,
        technician_id: Uuid,
        submission: AttendanceSubmission,
    ) -> Result<AttendanceEvent> {
        if let Some(existing) = self
            .db
            .find_event_by_idempotency_key(technician_id, submission.client_event_id)
            .await?
        {
            metrics::idempotent_hits().add(
                1,
                &[KeyValue::new("event_type", EventType::CheckOut.as_str())],
            );
            info!(event = %existing.id, "duplicate submission, returning stored event");
            return Ok(existing);
        }

        let outcome = self.check_out_fresh(technician_id, &submission).await;
        self.resolve_lost_race(technician_id, submission.client_event_id, outcome)
            .await
    }

    /// Re-resolve the idempotency key after a unique-key violation.
    ///
    /// Two in-flight copies of one submission both miss the gate; the
    /// loser's insert fails and the winner's row is the canonical
    /// answer. Any other unique violation re-resolves to None and the
    /// original fault propagates.
    async fn resolve_lost_race(
        &self,
        technician_id: Uuid,
        client_event_id: Uuid,
        outcome: Result<AttendanceEvent>,
    ) -> Result<AttendanceEvent> {
        match outcome {
            Err(err) if db::is_unique_violation(&err) => {
                match self
                    .db
                    .find_event_by_idempotency_key(technician_id, client_event_id)
                    .await?
                {
                    Some(canonical) => {
                        info!(event = %canonical.id, "lost insert race, returning canonical event");
                        Ok(canonical)
                    }
                    None => Err(err),
                }
            }
            other => other,
        }
    }

    async fn check_in_fresh(
        &self,
        technician_id: Uuid,
        submission: &AttendanceSubmission,
        qr: &QrToken,
    ) -> Result<AttendanceEvent> {
        let site = self
            .db
            .find_site(submission.site_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("site {}", submission.site_id)))?;

        if submission.selfie_object_key.trim().is_empty() {
            return self
                .record_rejection(
                    technician_id,
                    EventType::CheckIn,
                    submission,
                    Some(qr),
                    RejectReason::MissingSelfie,
                )
                .await;
        }

        let now = Utc::now();
        if qr_expired(now, qr.expires_at, self.config.qr_clock_skew) {
            return self
                .record_rejection(
                    technician_id,
                    EventType::CheckIn,
                    submission,
                    Some(qr),
                    RejectReason::InvalidQr,
                )
                .await;
        }

        if self.db.find_open_session(technician_id).await?.is_some() {
            return self
                .record_rejection(
                    technician_id,
                    EventType::CheckIn,
                    submission,
                    Some(qr),
                    RejectReason::InvalidSession,
                )
                .await;
        }

        let geo = geo::evaluate(
            site.latitude,
            site.longitude,
            site.radius_meters,
            submission.lat,
            submission.lng,
            site.strict_out_of_range,
        );

        let mut tx = self.db.pool().begin().await?;

        let Some(replay_id) =
            replay::claim_nonce_on(&mut tx, submission.site_id, qr, technician_id).await?
        else {
            // Nonce already spent. Record the replay rejection in the
            // same transaction that observed it.
            let event = build_event(
                technician_id,
                EventType::CheckIn,
                submission,
                Some(qr),
                Decision::Rejected,
                None,
                Some(RejectReason::Replay),
                now,
            );
            events::insert_event_on(&mut tx, &event).await?;
            tx.commit().await?;

            metrics::replay_conflicts().add(1, &[]);
            metrics::rejections().add(
                1,
                &[
                    KeyValue::new("event_type", EventType::CheckIn.as_str()),
                    KeyValue::new("reason", RejectReason::Replay.as_str()),
                ],
            );
            warn!(site = %submission.site_id, "QR nonce replayed");
            return Ok(event);
        };

        let event = build_event(
            technician_id,
            EventType::CheckIn,
            submission,
            Some(qr),
            geo.decision,
            geo.range_status,
            geo.reject_reason,
            now,
        );
        events::insert_event_on(&mut tx, &event).await?;

        if event.decision == Decision::Accepted {
            let Some(session_id) = sessions::create_open_session_on(
                &mut tx,
                technician_id,
                submission.site_id,
                event.id,
                now,
            )
            .await?
            else {
                // A concurrent check-in opened a session between the
                // pre-check and this insert. Drop the transaction and
                // record the loss as a session rejection.
                tx.rollback().await?;
                return self
                    .record_rejection(
                        technician_id,
                        EventType::CheckIn,
                        submission,
                        Some(qr),
                        RejectReason::InvalidSession,
                    )
                    .await;
            };
            replay::link_accepted_event_on(&mut tx, replay_id, event.id).await?;
            tx.commit().await?;
            info!(event = %event.id, session = %session_id, "check-in accepted");
        } else {
            tx.commit().await?;
            metrics::rejections().add(
                1,
                &[
                    KeyValue::new("event_type", EventType::CheckIn.as_str()),
                    KeyValue::new("reason", RejectReason::OutOfRange.as_str()),
                ],
            );
        }

        Ok(event)
    }

    async fn check_out_fresh(
        &self,
        technician_id: Uuid,
        submission: &AttendanceSubmission,
    ) -> Result<AttendanceEvent> {
        let site = self
            .db
            .find_site(submission.site_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("site {}", submission.site_id)))?;

        if submission.selfie_object_key.trim().is_empty() {
            return self
                .record_rejection(
                    technician_id,
                    EventType::CheckOut,
                    submission,
                    None,
                    RejectReason::MissingSelfie,
                )
                .await;
        }

        let Some(open) = self.db.find_open_session(technician_id).await? else {
            return self
                .record_rejection(
                    technician_id,
                    EventType::CheckOut,
                    submission,
                    None,
                    RejectReason::InvalidSession,
                )
                .await;
        };

        let geo = geo::evaluate(
            site.latitude,
            site.longitude,
            site.radius_meters,
            submission.lat,
            submission.lng,
            site.strict_out_of_range,
        );
        let now = Utc::now();

        let event = build_event(
            technician_id,
            EventType::CheckOut,
            submission,
            None,
            geo.decision,
            geo.range_status,
            geo.reject_reason,
            now,
        );

        let mut tx = self.db.pool().begin().await?;
        events::insert_event_on(&mut tx, &event).await?;

        if event.decision == Decision::Accepted {
            let closed = sessions::close_session_on(&mut tx, open.id, event.id, now).await?;
            if !closed {
                // The session closed under us; the pre-check is stale.
                // Re-record the submission as a session rejection.
                tx.rollback().await?;
                return self
                    .record_rejection(
                        technician_id,
                        EventType::CheckOut,
                        submission,
                        None,
                        RejectReason::InvalidSession,
                    )
                    .await;
            }
            tx.commit().await?;
            info!(event = %event.id, session = %open.id, "check-out accepted, session closed");
        } else {
            tx.commit().await?;
            metrics::rejections().add(
                1,
                &[
                    KeyValue::new("event_type", EventType::CheckOut.as_str()),
                    KeyValue::new("reason", RejectReason::OutOfRange.as_str()),
                ],
            );
        }

        Ok(event)
    }

    /// Record a rejected submission as an event in its own transaction.
    /// Rejection is a stored fact returned to the caller, not an error.
    async fn record_rejection(
        &self,
        technician_id: Uuid,
        event_type: EventType,
        submission: &AttendanceSubmission,
        qr: Option<&QrToken>,
        reason: RejectReason,
    ) -> Result<AttendanceEvent> {
        let event = build_event(
            technician_id,
            event_type,
            submission,
            qr,
            Decision::Rejected,
            None,
            Some(reason),
            Utc::now(),
        );

        let mut tx = self.db.pool().begin().await?;
        events::insert_event_on(&mut tx, &event).await?;
        tx.commit().await?;

        metrics::rejections().add(
            1,
            &[
                KeyValue::new("event_type", event_type.as_str()),
                KeyValue::new("reason", reason.as_str()),
            ],
        );
        warn!(technician = %technician_id, %reason, "submission rejected");
        Ok(event)
    }
}

/// True when a QR token's expiry, padded by the skew tolerance, has
/// passed.
fn qr_expired(now: DateTime<Utc>, expires_at: DateTime<Utc>, skew: Duration) -> bool {
    now > expires_at + skew
}

fn build_event(
    technician_id: Uuid,
    event_type: EventType,
    submission: &AttendanceSubmission,
    qr: Option<&QrToken>,
    decision: Decision,
    range_status: Option<RangeStatus>,
    reject_reason: Option<RejectReason>,
    occurred_at_server: DateTime<Utc>,
) -> AttendanceEvent {
    AttendanceEvent {
        id: EventId::new(),
        technician_id,
        site_id: submission.site_id,
        device_id: submission.device_id,
        client_event_id: submission.client_event_id,
        event_type,
        decision,
        range_status,
        reject_reason,
        selfie_object_key: submission.selfie_object_key.clone(),
        qr: qr.cloned(),
        lat: submission.lat,
        lng: submission.lng,
        accuracy_meters: submission.accuracy_meters,
        captured_at_client: submission.captured_at_client,
        occurred_at_server,
    }
}

fn finish_submission(
    span: &Span,
    event_type: EventType,
    started: Instant,
    result: &Result<AttendanceEvent>,
) {
    metrics::operation_duration_ms().record(
        started.elapsed().as_secs_f64() * 1000.0,
        &[KeyValue::new(
            "operation",
            format!("attendance.{event_type}"),
        )],
    );

    match result {
        Ok(event) => {
            record_decision(
                span,
                event.decision.as_str(),
                event.reject_reason.map(RejectReason::as_str),
            );
            metrics::submissions().add(
                1,
                &[
                    KeyValue::new("event_type", event_type.as_str()),
                    KeyValue::new("decision", event.decision.as_str()),
                ],
            );
        }
        Err(err) => {
            warn!(%err, "submission failed");
            metrics::submissions().add(
                1,
                &[
                    KeyValue::new("event_type", event_type.as_str()),
                    KeyValue::new("decision", "error"),
                ],
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qr_expiry_honors_skew_tolerance() {
        let now = Utc::now();
        let skew = Duration::minutes(2);

        // 3 minutes past expiry: beyond tolerance.
        assert!(qr_expired(now, now - Duration::minutes(3), skew));
        // 1 minute past expiry: absorbed by tolerance.
        assert!(!qr_expired(now, now - Duration::minutes(1), skew));
        // Exactly at the tolerance edge: still valid.
        assert!(!qr_expired(now, now - skew, skew));
        // Not yet expired.
        assert!(!qr_expired(now, now + Duration::minutes(5), skew));
    }
}
