use ulid::Ulid;

use crate::model::{Ms, TimeRange};

use super::EngineError;
use super::interval::IntervalSet;

/// Free-set snapshot issued by a common-slots query and referenced by a
/// later placement request. Ephemeral: reaped after the staleness TTL.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub id: Ulid,
    /// Flattened free ranges across the whole queried span.
    pub free: IntervalSet,
    /// Flattened opening hours, used to distinguish "ran past closing"
    /// from "collides with busy time".
    pub open: IntervalSet,
    pub issued_at: Ms,
}

/// Validate a proposed placement against a snapshot. Ok iff the snapshot is
/// fresh and `proposed` is fully contained in a single free window.
pub fn validate_placement(
    proposed: &TimeRange,
    snapshot: &Snapshot,
    now: Ms,
    ttl_ms: Ms,
) -> Result<(), EngineError> {
    if now - snapshot.issued_at > ttl_ms {
        return Err(EngineError::StaleAvailability);
    }
    check_within(proposed, &snapshot.free, &snapshot.open)
}

/// Containment check. Straddling two disjoint free windows is rejected.
pub fn check_within(
    proposed: &TimeRange,
    free: &IntervalSet,
    open: &IntervalSet,
) -> Result<(), EngineError> {
    if free.containing(proposed).is_some() {
        return Ok(());
    }
    if open.containing(proposed).is_some() {
        // Inside business hours but clipped by busy time (or spanning the
        // gap between two free windows).
        return Err(EngineError::OutsideAvailability);
    }
    let starts_in_open = open
        .ranges()
        .iter()
        .any(|r| r.start <= proposed.start && proposed.start < r.end);
    if starts_in_open {
        return Err(EngineError::ExceedsBusinessHours);
    }
    Err(EngineError::OutsideAvailability)
}
