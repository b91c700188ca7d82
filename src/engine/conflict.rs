use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

/// Boundary validation for a proposed `[start, end)` pair.
pub(crate) fn validate_range(start: Ms, end: Ms) -> Result<TimeRange, EngineError> {
    use crate::limits::*;
    if start >= end {
        return Err(EngineError::InvalidInterval { start, end });
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if end - start > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("appointment span too wide"));
    }
    Ok(TimeRange::new(start, end))
}

/// Commit-time double-booking guard. Any non-deleted appointment overlapping
/// `span` is a conflict, regardless of its state. Must run under the
/// calendar's write lock so the check and the commit are atomic.
pub(crate) fn check_no_conflict(cal: &CalendarState, span: &TimeRange) -> Result<(), EngineError> {
    for appointment in cal.overlapping(span) {
        if appointment.is_active() {
            return Err(EngineError::Conflict(appointment.id));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn appt(start: Ms, end: Ms, deleted: bool) -> Appointment {
        Appointment {
            id: Ulid::new(),
            span: TimeRange::new(start, end),
            title: None,
            service_type: None,
            custom_location: None,
            state: AppointmentState::Requested,
            is_deleted: deleted,
        }
    }

    #[test]
    fn conflict_on_overlap() {
        let mut cal = CalendarState::new(Ulid::new(), Ulid::new());
        cal.insert_appointment(appt(1_600_000_000_000, 1_600_000_100_000, false));
        let result = check_no_conflict(&cal, &TimeRange::new(1_600_000_050_000, 1_600_000_150_000));
        assert!(matches!(result, Err(EngineError::Conflict(_))));
    }

    #[test]
    fn tombstones_do_not_conflict() {
        let mut cal = CalendarState::new(Ulid::new(), Ulid::new());
        cal.insert_appointment(appt(1_600_000_000_000, 1_600_000_100_000, true));
        assert!(check_no_conflict(&cal, &TimeRange::new(1_600_000_000_000, 1_600_000_100_000)).is_ok());
    }

    #[test]
    fn adjacent_is_not_a_conflict() {
        let mut cal = CalendarState::new(Ulid::new(), Ulid::new());
        cal.insert_appointment(appt(1_600_000_000_000, 1_600_000_100_000, false));
        assert!(check_no_conflict(&cal, &TimeRange::new(1_600_000_100_000, 1_600_000_200_000)).is_ok());
    }

    #[test]
    fn validate_range_rejects_degenerate() {
        assert!(matches!(
            validate_range(1_600_000_000_000, 1_600_000_000_000),
            Err(EngineError::InvalidInterval { .. })
        ));
        assert!(matches!(
            validate_range(1_600_000_100_000, 1_600_000_000_000),
            Err(EngineError::InvalidInterval { .. })
        ));
    }

    #[test]
    fn validate_range_enforces_limits() {
        // Before the valid epoch window
        assert!(matches!(
            validate_range(0, 1000),
            Err(EngineError::LimitExceeded(_))
        ));
        // Wider than the max appointment span
        assert!(matches!(
            validate_range(1_600_000_000_000, 1_600_000_000_000 + 8 * 24 * 3_600_000),
            Err(EngineError::LimitExceeded(_))
        ));
        assert!(validate_range(1_600_000_000_000, 1_600_000_060_000).is_ok());
    }
}
