use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds UTC — the only time type inside the engine.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Ms,
    pub end: Ms,
}

impl TimeRange {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "TimeRange start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_range(&self, other: &TimeRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Clip to `window`; None if the overlap is empty.
    pub fn clip(&self, window: &TimeRange) -> Option<TimeRange> {
        let start = self.start.max(window.start);
        let end = self.end.min(window.end);
        if start < end {
            Some(TimeRange::new(start, end))
        } else {
            None
        }
    }
}

/// Appointment lifecycle. `Requested -> {Accepted, Rejected}`;
/// `Accepted -> Standby` marks a reschedule-pending appointment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentState {
    Requested,
    Accepted,
    Rejected,
    Standby,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    /// `[in_time, out_time)` as one range.
    pub span: TimeRange,
    pub title: Option<String>,
    pub service_type: Option<String>,
    pub custom_location: Option<String>,
    pub state: AppointmentState,
    /// Tombstone — deleted appointments stay in the calendar but are
    /// invisible to every read path.
    pub is_deleted: bool,
}

impl Appointment {
    pub fn is_active(&self) -> bool {
        !self.is_deleted
    }
}

/// One party's calendar. Appointments are kept sorted by `span.start`;
/// tombstoned entries stay in place.
#[derive(Debug, Clone)]
pub struct CalendarState {
    pub id: Ulid,
    /// Owning user or worker. Exactly one calendar per owner.
    pub owner: Ulid,
    pub appointments: Vec<Appointment>,
}

impl CalendarState {
    pub fn new(id: Ulid, owner: Ulid) -> Self {
        Self {
            id,
            owner,
            appointments: Vec::new(),
        }
    }

    /// Insert maintaining sort order by span.start.
    pub fn insert_appointment(&mut self, appointment: Appointment) {
        let pos = self
            .appointments
            .binary_search_by_key(&appointment.span.start, |a| a.span.start)
            .unwrap_or_else(|e| e);
        self.appointments.insert(pos, appointment);
    }

    pub fn get(&self, id: Ulid) -> Option<&Appointment> {
        self.appointments.iter().find(|a| a.id == id)
    }

    pub fn get_mut(&mut self, id: Ulid) -> Option<&mut Appointment> {
        self.appointments.iter_mut().find(|a| a.id == id)
    }

    /// Appointments whose span overlaps the query window, tombstones included.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &TimeRange) -> impl Iterator<Item = &Appointment> {
        let right_bound = self
            .appointments
            .partition_point(|a| a.span.start < query.end);
        self.appointments[..right_bound]
            .iter()
            .filter(move |a| a.span.end > query.start)
    }
}

/// Fixed Monday–Sunday enumeration matching the stored schedule values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Weekday {
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_chrono(day: chrono::Weekday) -> Self {
        match day {
            chrono::Weekday::Mon => Weekday::Monday,
            chrono::Weekday::Tue => Weekday::Tuesday,
            chrono::Weekday::Wed => Weekday::Wednesday,
            chrono::Weekday::Thu => Weekday::Thursday,
            chrono::Weekday::Fri => Weekday::Friday,
            chrono::Weekday::Sat => Weekday::Saturday,
            chrono::Weekday::Sun => Weekday::Sunday,
        }
    }
}

/// Opening window for one weekday, minutes from local midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayHours {
    pub open_minute: u16,
    pub close_minute: u16,
}

/// 0 or 1 opening window per weekday; absence means closed that day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekSchedule {
    days: [Option<DayHours>; 7],
}

impl WeekSchedule {
    pub fn get(&self, day: Weekday) -> Option<DayHours> {
        self.days[day.index()]
    }

    pub fn set(&mut self, day: Weekday, hours: DayHours) {
        self.days[day.index()] = Some(hours);
    }

    pub fn clear(&mut self, day: Weekday) {
        self.days[day.index()] = None;
    }

    pub fn iter(&self) -> impl Iterator<Item = (Weekday, DayHours)> + '_ {
        const DAYS: [Weekday; 7] = [
            Weekday::Monday,
            Weekday::Tuesday,
            Weekday::Wednesday,
            Weekday::Thursday,
            Weekday::Friday,
            Weekday::Saturday,
            Weekday::Sunday,
        ];
        DAYS.iter()
            .filter_map(|&d| self.days[d.index()].map(|h| (d, h)))
    }
}

#[derive(Debug, Clone)]
pub struct LocationState {
    pub id: Ulid,
    pub name: String,
    /// IANA timezone used to resolve weekdays and wall-clock opening hours.
    pub timezone: chrono_tz::Tz,
    pub schedule: WeekSchedule,
    /// Calendar of the worker serving this location. None means no one is
    /// assigned and the location is never available (fail-closed).
    pub worker_calendar: Option<Ulid>,
}

impl LocationState {
    pub fn new(id: Ulid, name: String, timezone: chrono_tz::Tz) -> Self {
        Self {
            id,
            name,
            timezone,
            schedule: WeekSchedule::default(),
            worker_calendar: None,
        }
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    CalendarCreated {
        id: Ulid,
        owner: Ulid,
    },
    LocationCreated {
        id: Ulid,
        name: String,
        timezone: chrono_tz::Tz,
    },
    ScheduleSet {
        location_id: Ulid,
        day: Weekday,
        hours: DayHours,
    },
    ScheduleCleared {
        location_id: Ulid,
        day: Weekday,
    },
    WorkerAssigned {
        location_id: Ulid,
        calendar_id: Ulid,
    },
    AppointmentRequested {
        id: Ulid,
        calendar_id: Ulid,
        span: TimeRange,
        title: Option<String>,
        service_type: Option<String>,
        custom_location: Option<String>,
        /// Self-booked appointments commit directly as accepted.
        accepted: bool,
    },
    AppointmentAccepted {
        id: Ulid,
        calendar_id: Ulid,
    },
    /// Rejection also tombstones the appointment so it stops blocking time.
    AppointmentRejected {
        id: Ulid,
        calendar_id: Ulid,
    },
    AppointmentDeleted {
        id: Ulid,
        calendar_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppointmentInfo {
    pub id: Ulid,
    pub calendar_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub title: Option<String>,
    pub service_type: Option<String>,
    pub custom_location: Option<String>,
    pub state: AppointmentState,
}

impl AppointmentInfo {
    pub fn from_appointment(calendar_id: Ulid, a: &Appointment) -> Self {
        Self {
            id: a.id,
            calendar_id,
            start: a.span.start,
            end: a.span.end,
            title: a.title.clone(),
            service_type: a.service_type.clone(),
            custom_location: a.custom_location.clone(),
            state: a.state,
        }
    }
}

/// Free ranges for one local day at the location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaySlots {
    pub day: NaiveDate,
    pub ranges: Vec<TimeRange>,
}

/// Result of a common-slots query. `snapshot_id` references the registered
/// free-set snapshot that a later placement request can validate against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotQueryResult {
    pub snapshot_id: Ulid,
    pub days: Vec<DaySlots>,
}
