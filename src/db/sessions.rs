//! Attendance session storage.
//!
//! The partial unique index on (technician_id) WHERE status = 'open' is
//! what enforces at-most-one-open-session — concurrent check-ins race
//! on the insert, never on the lookup.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::Result;
use crate::model::{AttendanceSession, EventId, SessionId};

impl super::Db {
    /// The most recently started open session for a technician, if any.
    pub async fn find_open_session(
        &self,
        technician_id: Uuid,
    ) -> Result<Option<AttendanceSession>> {
        let row: Option<SessionRow> = sqlx::query_as(
            "SELECT id, technician_id, site_id, check_in_event_id, check_out_event_id,
                    started_at, ended_at, status
             FROM attendance_sessions
             WHERE technician_id = $1 AND status = 'open'
             ORDER BY started_at DESC
             LIMIT 1",
        )
        .bind(technician_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SessionRow::try_into_session).transpose()
    }
}

/// Open a session for an accepted check-in, inside the submission's
/// transaction.
///
/// Returns None when a concurrent check-in already holds the open slot
/// for this technician — the partial unique index makes this insert a
/// no-op instead of an error, so the caller can roll back and re-record
/// the loss.
pub(crate) async fn create_open_session_on(
    conn: &mut PgConnection,
    technician_id: Uuid,
    site_id: Uuid,
    check_in_event_id: EventId,
    started_at: DateTime<Utc>,
) -> Result<Option<SessionId>> {
    let inserted: Option<(Uuid,)> = sqlx::query_as(
        "INSERT INTO attendance_sessions
            (id, technician_id, site_id, check_in_event_id, started_at, status)
         VALUES ($1, $2, $3, $4, $5, 'open')
         ON CONFLICT (technician_id) WHERE status = 'open' DO NOTHING
         RETURNING id",
    )
    .bind(Uuid::new_v4())
    .bind(technician_id)
    .bind(site_id)
    .bind(check_in_event_id.0)
    .bind(started_at)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(inserted.map(|(id,)| SessionId(id)))
}

/// Close a session for an accepted check-out, inside the submission's
/// transaction.
///
/// The status guard makes the close optimistic: false means the session
/// was closed concurrently and this submission lost the race.
pub(crate) async fn close_session_on(
    conn: &mut PgConnection,
    session_id: SessionId,
    check_out_event_id: EventId,
    ended_at: DateTime<Utc>,
) -> Result<bool> {
    let rows_affected = sqlx::query(
        "UPDATE attendance_sessions
         SET status = 'closed', check_out_event_id = $1, ended_at = $2
         WHERE id = $3 AND status = 'open'",
    )
    .bind(check_out_event_id.0)
    .bind(ended_at)
    .bind(session_id.0)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    Ok(rows_affected > 0)
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct SessionRow {
    id: Uuid,
    technician_id: Uuid,
    site_id: Uuid,
    check_in_event_id: Uuid,
    check_out_event_id: Option<Uuid>,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    status: String,
}

impl SessionRow {
    fn try_into_session(self) -> Result<AttendanceSession> {
        Ok(AttendanceSession {
            id: SessionId(self.id),
            technician_id: self.technician_id,
            site_id: self.site_id,
            check_in_event_id: EventId(self.check_in_event_id),
            check_out_event_id: self.check_out_event_id.map(EventId),
            started_at: self.started_at,
            ended_at: self.ended_at,
            status: self.status.parse()?,
        })
    }
}
