use std::sync::Arc;

use tokio::sync::{RwLock, oneshot};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, now_ms, validate_range};
use super::hours::day_hours;
use super::placement::validate_placement;
use super::{Engine, EngineError, WalCommand};

/// Optional details carried by a placement request.
#[derive(Debug, Clone, Default)]
pub struct NewAppointment {
    pub title: Option<String>,
    pub service_type: Option<String>,
    pub custom_location: Option<String>,
}

impl Engine {
    pub async fn create_calendar(&self, id: Ulid, owner: Ulid) -> Result<(), EngineError> {
        if self.calendars.len() >= MAX_CALENDARS {
            return Err(EngineError::LimitExceeded("too many calendars"));
        }
        if self.calendars.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        // One calendar per owner.
        if let Some(existing) = self.calendar_for_owner(&owner) {
            return Err(EngineError::AlreadyExists(existing));
        }

        let event = Event::CalendarCreated { id, owner };
        self.wal_append(&event).await?;
        let cal = CalendarState::new(id, owner);
        self.calendars.insert(id, Arc::new(RwLock::new(cal)));
        self.calendar_by_owner.insert(owner, id);
        self.notify.send(id, &event);
        Ok(())
    }

    pub async fn create_location(
        &self,
        id: Ulid,
        name: String,
        timezone: chrono_tz::Tz,
    ) -> Result<(), EngineError> {
        if self.locations.len() >= MAX_LOCATIONS {
            return Err(EngineError::LimitExceeded("too many locations"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("location name too long"));
        }
        if self.locations.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::LocationCreated {
            id,
            name: name.clone(),
            timezone,
        };
        self.wal_append(&event).await?;
        let loc = LocationState::new(id, name, timezone);
        self.locations.insert(id, Arc::new(RwLock::new(loc)));
        self.notify.send(id, &event);
        Ok(())
    }

    /// Upsert one weekday's opening window. `open`/`close` are `"HH:mm"`
    /// wall-clock times at the location.
    pub async fn set_opening_hours(
        &self,
        location_id: Ulid,
        day: Weekday,
        open: &str,
        close: &str,
    ) -> Result<(), EngineError> {
        let hours = day_hours(open, close)?;
        let loc = self
            .get_location(&location_id)
            .ok_or(EngineError::NotFound(location_id))?;
        let mut guard = loc.write().await;
        let event = Event::ScheduleSet {
            location_id,
            day,
            hours,
        };
        self.persist_and_apply_location(location_id, &mut guard, &event)
            .await
    }

    /// Mark a weekday closed.
    pub async fn clear_opening_hours(
        &self,
        location_id: Ulid,
        day: Weekday,
    ) -> Result<(), EngineError> {
        let loc = self
            .get_location(&location_id)
            .ok_or(EngineError::NotFound(location_id))?;
        let mut guard = loc.write().await;
        let event = Event::ScheduleCleared { location_id, day };
        self.persist_and_apply_location(location_id, &mut guard, &event)
            .await
    }

    pub async fn assign_worker(
        &self,
        location_id: Ulid,
        calendar_id: Ulid,
    ) -> Result<(), EngineError> {
        if !self.calendars.contains_key(&calendar_id) {
            return Err(EngineError::NotFound(calendar_id));
        }
        let loc = self
            .get_location(&location_id)
            .ok_or(EngineError::NotFound(location_id))?;
        let mut guard = loc.write().await;
        let event = Event::WorkerAssigned {
            location_id,
            calendar_id,
        };
        self.persist_and_apply_location(location_id, &mut guard, &event)
            .await
    }

    /// Place a new appointment. With `snapshot_id`, the proposed range is
    /// first validated against the referenced free-slot snapshot
    /// (containment + staleness). Either way the commit-time conflict check
    /// runs under the calendar's write lock, so of two racing requests for
    /// the same slot exactly one wins.
    pub async fn request_appointment(
        &self,
        id: Ulid,
        calendar_id: Ulid,
        start: Ms,
        end: Ms,
        details: NewAppointment,
        snapshot_id: Option<Ulid>,
        self_booked: bool,
    ) -> Result<AppointmentInfo, EngineError> {
        let span = validate_range(start, end)?;
        if let Some(ref t) = details.title
            && t.len() > MAX_TITLE_LEN
        {
            return Err(EngineError::LimitExceeded("title too long"));
        }
        if self.appointment_index.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let cal = self
            .get_calendar(&calendar_id)
            .ok_or(EngineError::NotFound(calendar_id))?;
        let mut guard = cal.write().await;
        if guard.appointments.len() >= MAX_APPOINTMENTS_PER_CALENDAR {
            return Err(EngineError::LimitExceeded("too many appointments on calendar"));
        }

        if let Some(sid) = snapshot_id {
            // An evicted/unknown snapshot reads the same as a stale one:
            // the caller must re-query.
            let snapshot = self
                .get_snapshot(&sid)
                .ok_or(EngineError::StaleAvailability)?;
            validate_placement(&span, &snapshot, now_ms(), self.snapshot_ttl_ms())?;
        }

        check_no_conflict(&guard, &span)?;

        let state = if self_booked {
            AppointmentState::Accepted
        } else {
            AppointmentState::Requested
        };
        let event = Event::AppointmentRequested {
            id,
            calendar_id,
            span,
            title: details.title.clone(),
            service_type: details.service_type.clone(),
            custom_location: details.custom_location.clone(),
            accepted: self_booked,
        };
        self.persist_and_apply(calendar_id, &mut guard, &event).await?;

        Ok(AppointmentInfo {
            id,
            calendar_id,
            start: span.start,
            end: span.end,
            title: details.title,
            service_type: details.service_type,
            custom_location: details.custom_location,
            state,
        })
    }

    pub async fn accept_requested(&self, id: Ulid) -> Result<AppointmentInfo, EngineError> {
        let (calendar_id, mut guard) = self.resolve_appointment_write(&id).await?;
        let appointment = guard.get(id).ok_or(EngineError::NotFound(id))?;
        if appointment.is_deleted {
            return Err(EngineError::NotFound(id));
        }
        if appointment.state != AppointmentState::Requested {
            return Err(EngineError::InvalidTransition {
                from: appointment.state,
            });
        }
        let mut info = AppointmentInfo::from_appointment(calendar_id, appointment);
        let event = Event::AppointmentAccepted { id, calendar_id };
        self.persist_and_apply(calendar_id, &mut guard, &event).await?;
        info.state = AppointmentState::Accepted;
        Ok(info)
    }

    /// Reject a requested appointment. The rejection tombstones it, so the
    /// slot is free again as soon as this commits.
    pub async fn reject_requested(&self, id: Ulid) -> Result<AppointmentInfo, EngineError> {
        let (calendar_id, mut guard) = self.resolve_appointment_write(&id).await?;
        let appointment = guard.get(id).ok_or(EngineError::NotFound(id))?;
        if appointment.is_deleted {
            return Err(EngineError::NotFound(id));
        }
        if appointment.state != AppointmentState::Requested {
            return Err(EngineError::InvalidTransition {
                from: appointment.state,
            });
        }
        let mut info = AppointmentInfo::from_appointment(calendar_id, appointment);
        let event = Event::AppointmentRejected { id, calendar_id };
        self.persist_and_apply(calendar_id, &mut guard, &event).await?;
        info.state = AppointmentState::Rejected;
        Ok(info)
    }

    /// Soft delete. The tombstone stays in the calendar and in the WAL until
    /// the next compaction.
    pub async fn delete_appointment(&self, id: Ulid) -> Result<(), EngineError> {
        let (calendar_id, mut guard) = self.resolve_appointment_write(&id).await?;
        match guard.get(id) {
            Some(a) if a.is_active() => {}
            _ => return Err(EngineError::NotFound(id)),
        }
        let event = Event::AppointmentDeleted { id, calendar_id };
        self.persist_and_apply(calendar_id, &mut guard, &event).await
    }

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state. Tombstoned appointments are dropped —
    /// they are invisible to every read path, so replayed state is
    /// observably identical.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        let calendar_ids: Vec<Ulid> = self.calendars.iter().map(|e| *e.key()).collect();
        for id in calendar_ids {
            let Some(cal) = self.get_calendar(&id) else {
                continue;
            };
            let guard = cal.read().await;
            events.push(Event::CalendarCreated {
                id: guard.id,
                owner: guard.owner,
            });
            for a in guard.appointments.iter().filter(|a| a.is_active()) {
                events.push(Event::AppointmentRequested {
                    id: a.id,
                    calendar_id: guard.id,
                    span: a.span,
                    title: a.title.clone(),
                    service_type: a.service_type.clone(),
                    custom_location: a.custom_location.clone(),
                    accepted: a.state == AppointmentState::Accepted,
                });
            }
        }

        let location_ids: Vec<Ulid> = self.locations.iter().map(|e| *e.key()).collect();
        for id in location_ids {
            let Some(loc) = self.get_location(&id) else {
                continue;
            };
            let guard = loc.read().await;
            events.push(Event::LocationCreated {
                id: guard.id,
                name: guard.name.clone(),
                timezone: guard.timezone,
            });
            for (day, hours) in guard.schedule.iter() {
                events.push(Event::ScheduleSet {
                    location_id: guard.id,
                    day,
                    hours,
                });
            }
            if let Some(calendar_id) = guard.worker_calendar {
                events.push(Event::WorkerAssigned {
                    location_id: guard.id,
                    calendar_id,
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
