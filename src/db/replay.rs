//! QR replay records.
//!
//! One row per (site_id, nonce) ever seen. The unique index on that
//! pair resolves the race between two presentations of the same QR
//! image — the store decides the winner, not a lookup.

use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::Result;
use crate::model::{EventId, QrReplayRecord, QrToken};

impl super::Db {
    /// Look up the replay record for a (site, nonce) pair. Audit use.
    pub async fn find_replay_record(
        &self,
        site_id: Uuid,
        nonce: &str,
    ) -> Result<Option<QrReplayRecord>> {
        let row: Option<ReplayRow> = sqlx::query_as(
            "SELECT id, site_id, nonce, issued_at, expires_at, seen_by_user_id, accepted_event_id
             FROM qr_replay_records
             WHERE site_id = $1 AND nonce = $2",
        )
        .bind(site_id)
        .bind(nonce)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ReplayRow::into_record))
    }
}

/// Claim a nonce for a site inside the submission's transaction.
///
/// First sighting wins the (site_id, nonce) unique index and returns
/// the new record's id. A replayed nonce comes back None — DO NOTHING
/// keeps the transaction usable so the replay rejection can be recorded
/// in the same transaction.
pub(crate) async fn claim_nonce_on(
    conn: &mut PgConnection,
    site_id: Uuid,
    token: &QrToken,
    seen_by_user_id: Uuid,
) -> Result<Option<Uuid>> {
    let inserted: Option<(Uuid,)> = sqlx::query_as(
        "INSERT INTO qr_replay_records (id, site_id, nonce, issued_at, expires_at, seen_by_user_id)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (site_id, nonce) DO NOTHING
         RETURNING id",
    )
    .bind(Uuid::new_v4())
    .bind(site_id)
    .bind(&token.nonce)
    .bind(token.issued_at)
    .bind(token.expires_at)
    .bind(seen_by_user_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(inserted.map(|(id,)| id))
}

/// Back-link a replay record to the event that was ultimately accepted.
pub(crate) async fn link_accepted_event_on(
    conn: &mut PgConnection,
    record_id: Uuid,
    event_id: EventId,
) -> Result<()> {
    sqlx::query("UPDATE qr_replay_records SET accepted_event_id = $1 WHERE id = $2")
        .bind(event_id.0)
        .bind(record_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct ReplayRow {
    id: Uuid,
    site_id: Uuid,
    nonce: String,
    issued_at: chrono::DateTime<chrono::Utc>,
    expires_at: chrono::DateTime<chrono::Utc>,
    seen_by_user_id: Uuid,
    accepted_event_id: Option<Uuid>,
}

impl ReplayRow {
    fn into_record(self) -> QrReplayRecord {
        QrReplayRecord {
            id: self.id,
            site_id: self.site_id,
            nonce: self.nonce,
            issued_at: self.issued_at,
            expires_at: self.expires_at,
            seen_by_user_id: self.seen_by_user_id,
            accepted_event_id: self.accepted_event_id.map(EventId),
        }
    }
}
