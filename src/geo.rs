//! Geofence evaluation.
//!
//! Pure distance math over site and device coordinates — no store
//! access, no clocks. The strict/soft knob is a per-site policy passed
//! in explicitly.

use crate::model::{Decision, RangeStatus, RejectReason};

/// Mean Earth radius in meters, as used by the haversine formula.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Outcome of a geofence evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeoDecision {
    pub decision: Decision,
    pub range_status: Option<RangeStatus>,
    pub reject_reason: Option<RejectReason>,
}

/// Great-circle distance between two coordinates, in meters.
pub fn haversine_meters(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Decide whether a device position is acceptable for a site.
///
/// The radius comparison is inclusive and unrounded. An out-of-range
/// position rejects only when the site enforces `strict`; otherwise the
/// submission is accepted with an `OutOfRange` flag for audit.
pub fn evaluate(
    site_lat: f64,
    site_lng: f64,
    radius_meters: f64,
    device_lat: f64,
    device_lng: f64,
    strict: bool,
) -> GeoDecision {
    let distance = haversine_meters(site_lat, site_lng, device_lat, device_lng);

    if distance <= radius_meters {
        return GeoDecision {
            decision: Decision::Accepted,
            range_status: Some(RangeStatus::InRange),
            reject_reason: None,
        };
    }

    if strict {
        return GeoDecision {
            decision: Decision::Rejected,
            range_status: None,
            reject_reason: Some(RejectReason::OutOfRange),
        };
    }

    GeoDecision {
        decision: Decision::Accepted,
        range_status: Some(RangeStatus::OutOfRange),
        reject_reason: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_position_is_in_range() {
        let geo = evaluate(-6.2, 106.8, 10.0, -6.2, 106.8, true);
        assert_eq!(geo.decision, Decision::Accepted);
        assert_eq!(geo.range_status, Some(RangeStatus::InRange));
        assert_eq!(geo.reject_reason, None);
    }

    #[test]
    fn boundary_distance_is_inclusive() {
        let (site, device) = ((-6.2, 106.8), (-6.2009, 106.8));
        let distance = haversine_meters(site.0, site.1, device.0, device.1);
        assert!(distance > 0.0);

        // A radius exactly equal to the distance still accepts.
        let geo = evaluate(site.0, site.1, distance, device.0, device.1, true);
        assert_eq!(geo.decision, Decision::Accepted);
        assert_eq!(geo.range_status, Some(RangeStatus::InRange));
    }

    #[test]
    fn soft_policy_accepts_and_flags_out_of_range() {
        // ~150 km away from the site, radius 10 m.
        let geo = evaluate(-6.2, 106.8, 10.0, -7.2, 107.8, false);
        assert_eq!(geo.decision, Decision::Accepted);
        assert_eq!(geo.range_status, Some(RangeStatus::OutOfRange));
        assert_eq!(geo.reject_reason, None);
    }

    #[test]
    fn strict_policy_rejects_out_of_range() {
        let geo = evaluate(-6.2, 106.8, 10.0, -7.2, 107.8, true);
        assert_eq!(geo.decision, Decision::Rejected);
        assert_eq!(geo.range_status, None);
        assert_eq!(geo.reject_reason, Some(RejectReason::OutOfRange));
    }

    #[test]
    fn haversine_matches_known_magnitudes() {
        // One degree of latitude is ~111 km.
        let d = haversine_meters(0.0, 0.0, 1.0, 0.0);
        assert!((d - 111_195.0).abs() < 200.0, "got {d}");

        let far = haversine_meters(-6.2, 106.8, -7.2, 107.8);
        assert!(far > 100_000.0, "got {far}");
    }
}
