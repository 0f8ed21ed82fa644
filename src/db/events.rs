//! Attendance event storage: idempotency lookups, the transactional
//! insert, and audit listings.
//!
//! Events are append-only. The unique index on (technician_id,
//! client_event_id) is the idempotency key — a retried or concurrently
//! duplicated submission fails the insert and resolves to the first row.

use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{AttendanceEvent, EventId, QrToken};

const EVENT_COLUMNS: &str = "id, technician_id, site_id, device_id, client_event_id, event_type, \
     decision, range_status, reject_reason, selfie_object_key, \
     qr_payload_hash, qr_nonce, qr_issued_at, qr_expires_at, \
     lat, lng, accuracy_meters, captured_at_client, occurred_at_server";

impl super::Db {
    /// Resolve the idempotency key to an already-recorded event, if any.
    pub async fn find_event_by_idempotency_key(
        &self,
        technician_id: Uuid,
        client_event_id: Uuid,
    ) -> Result<Option<AttendanceEvent>> {
        let row: Option<EventRow> = sqlx::query_as(&format!(
            "SELECT {EVENT_COLUMNS} FROM attendance_events
             WHERE technician_id = $1 AND client_event_id = $2",
        ))
        .bind(technician_id)
        .bind(client_event_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(EventRow::try_into_event).transpose()
    }

    /// Get an event by ID.
    pub async fn get_event(&self, id: EventId) -> Result<AttendanceEvent> {
        let row: Option<EventRow> = sqlx::query_as(&format!(
            "SELECT {EVENT_COLUMNS} FROM attendance_events WHERE id = $1",
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| Error::NotFound(format!("attendance event {id}")))?
            .try_into_event()
    }

    /// Most recent events across all technicians, newest first.
    pub async fn list_recent_events(&self, limit: i64) -> Result<Vec<AttendanceEvent>> {
        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            "SELECT {EVENT_COLUMNS} FROM attendance_events
             ORDER BY occurred_at_server DESC LIMIT $1",
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(EventRow::try_into_event).collect()
    }

    /// A technician's event history, newest first.
    pub async fn list_events_for_technician(
        &self,
        technician_id: Uuid,
        limit: i64,
    ) -> Result<Vec<AttendanceEvent>> {
        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            "SELECT {EVENT_COLUMNS} FROM attendance_events
             WHERE technician_id = $1
             ORDER BY occurred_at_server DESC LIMIT $2",
        ))
        .bind(technician_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(EventRow::try_into_event).collect()
    }
}

/// Insert a fully-decided event inside the submission's transaction.
///
/// Fails with a unique violation when (technician_id, client_event_id)
/// already exists; the engine resolves that to the canonical event.
pub(crate) async fn insert_event_on(
    conn: &mut PgConnection,
    event: &AttendanceEvent,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO attendance_events (
            id, technician_id, site_id, device_id, client_event_id, event_type,
            decision, range_status, reject_reason, selfie_object_key,
            qr_payload_hash, qr_nonce, qr_issued_at, qr_expires_at,
            lat, lng, accuracy_meters, captured_at_client, occurred_at_server
         ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)",
    )
    .bind(event.id.0)
    .bind(event.technician_id)
    .bind(event.site_id)
    .bind(event.device_id)
    .bind(event.client_event_id)
    .bind(event.event_type.as_str())
    .bind(event.decision.as_str())
    .bind(event.range_status.map(|s| s.as_str()))
    .bind(event.reject_reason.map(|r| r.as_str()))
    .bind(&event.selfie_object_key)
    .bind(event.qr.as_ref().map(|q| q.payload_hash.as_str()))
    .bind(event.qr.as_ref().map(|q| q.nonce.as_str()))
    .bind(event.qr.as_ref().map(|q| q.issued_at))
    .bind(event.qr.as_ref().map(|q| q.expires_at))
    .bind(event.lat)
    .bind(event.lng)
    .bind(event.accuracy_meters)
    .bind(event.captured_at_client)
    .bind(event.occurred_at_server)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    technician_id: Uuid,
    site_id: Uuid,
    device_id: Option<Uuid>,
    client_event_id: Uuid,
    event_type: String,
    decision: String,
    range_status: Option<String>,
    reject_reason: Option<String>,
    selfie_object_key: String,
    qr_payload_hash: Option<String>,
    qr_nonce: Option<String>,
    qr_issued_at: Option<chrono::DateTime<chrono::Utc>>,
    qr_expires_at: Option<chrono::DateTime<chrono::Utc>>,
    lat: f64,
    lng: f64,
    accuracy_meters: f64,
    captured_at_client: chrono::DateTime<chrono::Utc>,
    occurred_at_server: chrono::DateTime<chrono::Utc>,
}

impl EventRow {
    fn try_into_event(self) -> Result<AttendanceEvent> {
        let qr = match (
            self.qr_payload_hash,
            self.qr_nonce,
            self.qr_issued_at,
            self.qr_expires_at,
        ) {
            (Some(payload_hash), Some(nonce), Some(issued_at), Some(expires_at)) => Some(QrToken {
                payload_hash,
                nonce,
                issued_at,
                expires_at,
            }),
            _ => None,
        };

        Ok(AttendanceEvent {
            id: EventId(self.id),
            technician_id: self.technician_id,
            site_id: self.site_id,
            device_id: self.device_id,
            client_event_id: self.client_event_id,
            event_type: self.event_type.parse()?,
            decision: self.decision.parse()?,
            range_status: self.range_status.map(|s| s.parse()).transpose()?,
            reject_reason: self.reject_reason.map(|s| s.parse()).transpose()?,
            selfie_object_key: self.selfie_object_key,
            qr,
            lat: self.lat,
            lng: self.lng,
            accuracy_meters: self.accuracy_meters,
            captured_at_client: self.captured_at_client,
            occurred_at_server: self.occurred_at_server,
        })
    }
}
