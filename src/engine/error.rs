use ulid::Ulid;

use crate::model::{AppointmentState, Ms};

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Commit-time double-booking guard tripped: the slot overlaps an
    /// existing non-deleted appointment.
    Conflict(Ulid),
    /// Malformed interval input (start >= end). Rejected at the boundary,
    /// never silently corrected.
    InvalidInterval { start: Ms, end: Ms },
    /// Malformed business-hours configuration.
    InvalidSchedule(&'static str),
    /// Proposed placement is not contained in any single free window.
    OutsideAvailability,
    /// Proposed placement starts inside opening hours but runs past the
    /// closing boundary of its day.
    ExceedsBusinessHours,
    /// The caller's free-slot snapshot is older than the staleness
    /// threshold (or was already evicted); re-query and retry.
    StaleAvailability,
    /// Appointment state machine violation.
    InvalidTransition { from: AppointmentState },
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Conflict(id) => write!(f, "conflict with appointment: {id}"),
            EngineError::InvalidInterval { start, end } => {
                write!(f, "invalid interval: [{start}, {end})")
            }
            EngineError::InvalidSchedule(msg) => write!(f, "invalid schedule: {msg}"),
            EngineError::OutsideAvailability => {
                write!(f, "placement outside current availability")
            }
            EngineError::ExceedsBusinessHours => {
                write!(f, "placement exceeds business hours")
            }
            EngineError::StaleAvailability => {
                write!(f, "availability snapshot is stale, re-query and retry")
            }
            EngineError::InvalidTransition { from } => {
                write!(f, "invalid appointment state transition from {from:?}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
