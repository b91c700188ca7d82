use crate::model::{CalendarState, TimeRange};

use super::interval::IntervalSet;

/// Busy time for one party within `window`: every non-deleted appointment
/// overlapping the window, clipped to it, normalized. Pure function over the
/// given calendar.
///
/// Appointment state is deliberately ignored — a requested appointment
/// blocks time until it is rejected, and rejection tombstones it.
pub fn extract_busy(calendar: &CalendarState, window: &TimeRange) -> IntervalSet {
    let mut busy = Vec::new();
    for appointment in calendar.overlapping(window) {
        if !appointment.is_active() {
            continue;
        }
        if let Some(clipped) = appointment.span.clip(window) {
            busy.push(clipped);
        }
    }
    IntervalSet::normalize(busy)
}
