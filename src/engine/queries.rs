use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::busy::extract_busy;
use super::conflict::now_ms;
use super::hours::open_hours;
use super::interval::IntervalSet;
use super::placement::Snapshot;
use super::slots::common_free_slots;
use super::{Engine, EngineError};

impl Engine {
    /// Active (non-deleted) appointments on a calendar. Missing calendar
    /// reads as empty, matching the other listing queries.
    pub async fn list_appointments(&self, calendar_id: Ulid) -> Vec<AppointmentInfo> {
        let cal = match self.get_calendar(&calendar_id) {
            Some(cal) => cal,
            None => return Vec::new(),
        };
        let guard = cal.read().await;
        guard
            .appointments
            .iter()
            .filter(|a| a.is_active())
            .map(|a| AppointmentInfo::from_appointment(calendar_id, a))
            .collect()
    }

    /// Common free slots between a user and a location over the inclusive
    /// local date range `[from, to]`, one entry per day. Also registers a
    /// snapshot of the result for placement validation.
    ///
    /// Recomputed from current appointment state on every call — correctness
    /// depends on seeing the latest commits, so nothing here is cached.
    ///
    /// Lock discipline: busy sets are extracted one calendar at a time; a
    /// query never holds two calendar locks at once, so it cannot form a
    /// cycle with a crossed-role query or a placement writer.
    pub async fn common_slots_user_location(
        &self,
        user_id: Ulid,
        location_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<SlotQueryResult, EngineError> {
        if (to - from).num_days() + 1 > MAX_QUERY_DAYS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }

        let user_cal_id = self
            .calendar_for_owner(&user_id)
            .ok_or(EngineError::NotFound(user_id))?;
        let user_cal = self
            .get_calendar(&user_cal_id)
            .ok_or(EngineError::NotFound(user_cal_id))?;

        let loc = self
            .get_location(&location_id)
            .ok_or(EngineError::NotFound(location_id))?;
        let loc_guard = loc.read().await;
        let tz = loc_guard.timezone;
        let schedule = loc_guard.schedule.clone();
        let worker_cal_id = loc_guard.worker_calendar;
        drop(loc_guard);

        // Fail-closed: a location with no assigned worker is never
        // available, whatever the schedule says.
        let has_worker = worker_cal_id.is_some();
        // Self-booking at one's own location: the same calendar counts once.
        let worker_is_user = worker_cal_id == Some(user_cal_id);

        // Resolve every day's opening hours up front; the lock-free part.
        let mut day_opens = Vec::new();
        let mut day = from;
        while day <= to {
            day_opens.push((day, open_hours(&schedule, day, tz)));
            day = match day.succ_opt() {
                Some(next) => next,
                None => break, // calendar overflow — cannot happen within limits
            };
        }

        // One busy window spanning every open range in the query. Busy time
        // outside a given day's open hours subtracts to nothing, so a single
        // per-calendar extraction serves all days.
        let window = day_opens
            .iter()
            .flat_map(|(_, open)| open.ranges().iter())
            .fold(None::<TimeRange>, |acc, r| {
                Some(match acc {
                    Some(w) => TimeRange::new(w.start.min(r.start), w.end.max(r.end)),
                    None => *r,
                })
            });

        let mut party_busy: Vec<IntervalSet> = Vec::new();
        if let Some(window) = window
            && has_worker
        {
            {
                let guard = user_cal.read().await;
                party_busy.push(extract_busy(&guard, &window));
            }
            if let Some(worker_id) = worker_cal_id
                && !worker_is_user
            {
                let worker_cal = self
                    .get_calendar(&worker_id)
                    .ok_or(EngineError::NotFound(worker_id))?;
                let guard = worker_cal.read().await;
                party_busy.push(extract_busy(&guard, &window));
            }
        }

        let mut days = Vec::new();
        let mut all_free: Vec<TimeRange> = Vec::new();
        let mut all_open: Vec<TimeRange> = Vec::new();

        for (day, open) in day_opens {
            let free = if open.is_empty() || !has_worker {
                IntervalSet::empty()
            } else {
                common_free_slots(&open, &party_busy)
            };

            all_open.extend_from_slice(open.ranges());
            all_free.extend_from_slice(free.ranges());
            days.push(DaySlots {
                day,
                ranges: free.into_ranges(),
            });
        }

        let snapshot = Snapshot {
            id: Ulid::new(),
            free: IntervalSet::normalize(all_free),
            open: IntervalSet::normalize(all_open),
            issued_at: now_ms(),
        };
        let snapshot_id = snapshot.id;
        self.register_snapshot(snapshot);

        Ok(SlotQueryResult { snapshot_id, days })
    }
}
