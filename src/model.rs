//! Core data model.
//!
//! An attendance event is the immutable record of one check-in or
//! check-out submission — accepted or rejected, every terminal outcome
//! becomes a row. Sessions tie an accepted check-in to its matching
//! check-out; replay records pin each QR nonce to its first sighting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Attendance Event
// ---------------------------------------------------------------------------

/// One recorded check-in/check-out submission. Never mutated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceEvent {
    /// Unique identifier.
    pub id: EventId,

    /// The technician who submitted. Identity is owned by the auth
    /// collaborator; the core only carries the id.
    pub technician_id: Uuid,

    /// The site the submission targets.
    pub site_id: Uuid,

    /// Submitting device, when the client reports one.
    pub device_id: Option<Uuid>,

    /// Client-generated idempotency key. (technician_id, client_event_id)
    /// is globally unique; retries collapse onto the first row.
    pub client_event_id: Uuid,

    pub event_type: EventType,

    /// Terminal outcome of validation.
    pub decision: Decision,

    /// Geofence flag. `OutOfRange` on an accepted event marks a
    /// soft-policy site that accepted but flagged the position.
    pub range_status: Option<RangeStatus>,

    /// Why a rejected event was rejected. None on accepted events.
    pub reject_reason: Option<RejectReason>,

    /// Opaque storage key of the selfie object. The core never looks
    /// inside the image.
    pub selfie_object_key: String,

    /// QR token metadata. Present on check-in submissions only.
    pub qr: Option<QrToken>,

    pub lat: f64,
    pub lng: f64,
    pub accuracy_meters: f64,

    /// Client clock at capture time. Informational only.
    pub captured_at_client: DateTime<Utc>,

    /// Server clock at decision time — the authoritative ordering
    /// timestamp.
    pub occurred_at_server: DateTime<Utc>,
}

/// Newtype for attendance event IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short display: first 8 chars of UUID
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    CheckIn,
    CheckOut,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::CheckIn => "check_in",
            EventType::CheckOut => "check_out",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "check_in" => Ok(EventType::CheckIn),
            "check_out" => Ok(EventType::CheckOut),
            _ => Err(Error::Other(format!("unknown event type: {s}"))),
        }
    }
}

/// Terminal outcome of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Accepted,
    Rejected,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Accepted => "accepted",
            Decision::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Decision {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "accepted" => Ok(Decision::Accepted),
            "rejected" => Ok(Decision::Rejected),
            _ => Err(Error::Other(format!("unknown decision: {s}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeStatus {
    InRange,
    OutOfRange,
}

impl RangeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RangeStatus::InRange => "in_range",
            RangeStatus::OutOfRange => "out_of_range",
        }
    }
}

impl std::fmt::Display for RangeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RangeStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "in_range" => Ok(RangeStatus::InRange),
            "out_of_range" => Ok(RangeStatus::OutOfRange),
            _ => Err(Error::Other(format!("unknown range status: {s}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    MissingSelfie,
    InvalidQr,
    InvalidSession,
    OutOfRange,
    Replay,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::MissingSelfie => "missing_selfie",
            RejectReason::InvalidQr => "invalid_qr",
            RejectReason::InvalidSession => "invalid_session",
            RejectReason::OutOfRange => "out_of_range",
            RejectReason::Replay => "replay",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RejectReason {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "missing_selfie" => Ok(RejectReason::MissingSelfie),
            "invalid_qr" => Ok(RejectReason::InvalidQr),
            "invalid_session" => Ok(RejectReason::InvalidSession),
            "out_of_range" => Ok(RejectReason::OutOfRange),
            "replay" => Ok(RejectReason::Replay),
            _ => Err(Error::Other(format!("unknown reject reason: {s}"))),
        }
    }
}

/// QR token fields as pre-parsed by the client. The core never parses
/// QR payloads; it trusts the hash for audit and enforces single-use of
/// (site_id, nonce) server-side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrToken {
    pub payload_hash: String,
    pub nonce: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Attendance Session
// ---------------------------------------------------------------------------

/// One open-to-closed work interval for a technician.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceSession {
    pub id: SessionId,
    pub technician_id: Uuid,
    pub site_id: Uuid,
    pub check_in_event_id: EventId,
    pub check_out_event_id: Option<EventId>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
}

/// Newtype for session IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Open,
    Closed,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Open => "open",
            SessionStatus::Closed => "closed",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "open" => Ok(SessionStatus::Open),
            "closed" => Ok(SessionStatus::Closed),
            _ => Err(Error::Other(format!("unknown session status: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// QR Replay Record
// ---------------------------------------------------------------------------

/// First sighting of a (site, nonce) pair. The unique index on that
/// pair is the replay-prevention mechanism; rows are never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QrReplayRecord {
    pub id: Uuid,
    pub site_id: Uuid,
    pub nonce: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub seen_by_user_id: Uuid,
    /// Back-reference, set only when the sighting's event was accepted.
    pub accepted_event_id: Option<EventId>,
}

// ---------------------------------------------------------------------------
// Site
// ---------------------------------------------------------------------------

/// Collaborator data: the core reads sites, it does not own them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    pub id: Uuid,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub radius_meters: f64,
    /// Hard-geofence policy knob: reject out-of-range instead of
    /// accept-and-flag.
    pub strict_out_of_range: bool,
}

/// Fields for provisioning a site through operator tooling.
#[derive(Debug, Clone)]
pub struct NewSite {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub radius_meters: f64,
    pub strict_out_of_range: bool,
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

/// Fields common to check-in and check-out submissions. Check-in
/// additionally carries a [`QrToken`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceSubmission {
    pub client_event_id: Uuid,
    pub site_id: Uuid,
    pub device_id: Option<Uuid>,
    pub selfie_object_key: String,
    pub lat: f64,
    pub lng: f64,
    pub accuracy_meters: f64,
    pub captured_at_client: DateTime<Utc>,
}

impl AttendanceSubmission {
    /// Surface malformed input before any store work. Validation
    /// failures record no event; a retry with fixed input is a new
    /// submission.
    pub fn validate(&self) -> Result<()> {
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(Error::Validation(format!("latitude out of bounds: {}", self.lat)));
        }
        if !self.lng.is_finite() || !(-180.0..=180.0).contains(&self.lng) {
            return Err(Error::Validation(format!("longitude out of bounds: {}", self.lng)));
        }
        if !self.accuracy_meters.is_finite() || self.accuracy_meters < 0.0 {
            return Err(Error::Validation(format!(
                "accuracy must be a non-negative number of meters: {}",
                self.accuracy_meters
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission() -> AttendanceSubmission {
        AttendanceSubmission {
            client_event_id: Uuid::new_v4(),
            site_id: Uuid::new_v4(),
            device_id: None,
            selfie_object_key: "selfies/abc.jpg".to_string(),
            lat: -6.2,
            lng: 106.8,
            accuracy_meters: 5.0,
            captured_at_client: Utc::now(),
        }
    }

    #[test]
    fn valid_submission_passes() {
        assert!(submission().validate().is_ok());
    }

    #[test]
    fn out_of_bounds_coordinates_fail_validation() {
        let mut s = submission();
        s.lat = 91.0;
        assert!(matches!(s.validate(), Err(Error::Validation(_))));

        let mut s = submission();
        s.lng = -181.0;
        assert!(matches!(s.validate(), Err(Error::Validation(_))));

        let mut s = submission();
        s.lat = f64::NAN;
        assert!(matches!(s.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn negative_accuracy_fails_validation() {
        let mut s = submission();
        s.accuracy_meters = -1.0;
        assert!(matches!(s.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn reject_reason_round_trips_through_storage_form() {
        for reason in [
            RejectReason::MissingSelfie,
            RejectReason::InvalidQr,
            RejectReason::InvalidSession,
            RejectReason::OutOfRange,
            RejectReason::Replay,
        ] {
            assert_eq!(reason.as_str().parse::<RejectReason>().unwrap(), reason);
        }
        assert!("expired".parse::<RejectReason>().is_err());
    }
}
