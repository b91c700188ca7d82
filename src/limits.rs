//! Hard limits on outer input. Violations surface as `LimitExceeded`.

use crate::model::Ms;

/// 2000-01-01T00:00:00Z — nothing in this system predates it.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;

/// 2100-01-01T00:00:00Z.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// A single appointment may not span more than 7 days.
pub const MAX_SPAN_DURATION_MS: Ms = 7 * 24 * 3_600_000;

/// Common-slots queries are capped at 92 days (one quarter).
pub const MAX_QUERY_DAYS: i64 = 92;

pub const MAX_CALENDARS: usize = 100_000;
pub const MAX_LOCATIONS: usize = 10_000;
pub const MAX_APPOINTMENTS_PER_CALENDAR: usize = 50_000;

pub const MAX_TITLE_LEN: usize = 256;
pub const MAX_NAME_LEN: usize = 256;

/// Snapshot registry cap. Beyond this the oldest snapshot is evicted,
/// never the query rejected.
pub const MAX_SNAPSHOTS: usize = 65_536;

/// Default placement-validation staleness threshold.
pub const DEFAULT_SNAPSHOT_TTL_MS: Ms = 120_000;
