mod busy;
mod conflict;
mod error;
mod hours;
mod interval;
mod mutations;
mod placement;
mod queries;
mod slots;

pub use busy::extract_busy;
pub use error::EngineError;
pub use hours::{day_hours, open_hours, parse_hhmm};
pub use interval::IntervalSet;
pub use mutations::NewAppointment;
pub use placement::{Snapshot, check_within, validate_placement};
pub use slots::common_free_slots;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::limits::MAX_SNAPSHOTS;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedCalendarState = Arc<RwLock<CalendarState>>;
pub type SharedLocationState = Arc<RwLock<LocationState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
///
/// Compaction pressure is tracked here rather than in the Wal: this task is
/// the log's only writer, so a plain counter suffices.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    let mut appends_since_compact: u64 = 0;
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch, &mut appends_since_compact);
                            handle_non_append(&mut wal, other, &mut appends_since_compact);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch, &mut appends_since_compact);
                }
            }
            other => handle_non_append(&mut wal, other, &mut appends_since_compact),
        }
    }
}

fn flush_and_respond(
    wal: &mut Wal,
    batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>,
    appends_since_compact: &mut u64,
) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    *appends_since_compact += batch.len() as u64;
    respond_batch(batch, &result);
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand, appends_since_compact: &mut u64) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = wal.compact(&events);
            if result.is_ok() {
                *appends_since_compact = 0;
            }
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(*appends_since_compact);
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// The availability engine: calendars, locations, and the free-slot snapshot
/// registry, backed by a group-committed WAL.
pub struct Engine {
    pub calendars: DashMap<Ulid, SharedCalendarState>,
    pub locations: DashMap<Ulid, SharedLocationState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: owner (user/worker) id → calendar id.
    pub(super) calendar_by_owner: DashMap<Ulid, Ulid>,
    /// Reverse lookup: appointment id → calendar id.
    pub(super) appointment_index: DashMap<Ulid, Ulid>,
    /// Free-slot snapshots awaiting placement validation.
    pub(super) snapshots: DashMap<Ulid, Snapshot>,
    snapshot_ttl_ms: Ms,
}

/// Apply an appointment event directly to a CalendarState (no locking —
/// caller holds the lock).
fn apply_to_calendar(cal: &mut CalendarState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::AppointmentRequested {
            id,
            calendar_id,
            span,
            title,
            service_type,
            custom_location,
            accepted,
        } => {
            cal.insert_appointment(Appointment {
                id: *id,
                span: *span,
                title: title.clone(),
                service_type: service_type.clone(),
                custom_location: custom_location.clone(),
                state: if *accepted {
                    AppointmentState::Accepted
                } else {
                    AppointmentState::Requested
                },
                is_deleted: false,
            });
            index.insert(*id, *calendar_id);
        }
        Event::AppointmentAccepted { id, .. } => {
            if let Some(a) = cal.get_mut(*id) {
                a.state = AppointmentState::Accepted;
            }
        }
        Event::AppointmentRejected { id, .. } => {
            // Rejection tombstones the appointment so it stops blocking time.
            if let Some(a) = cal.get_mut(*id) {
                a.state = AppointmentState::Rejected;
                a.is_deleted = true;
            }
        }
        Event::AppointmentDeleted { id, .. } => {
            if let Some(a) = cal.get_mut(*id) {
                a.is_deleted = true;
            }
        }
        _ => {}
    }
}

/// Apply a schedule/assignment event to a LocationState.
fn apply_to_location(loc: &mut LocationState, event: &Event) {
    match event {
        Event::ScheduleSet { day, hours, .. } => loc.schedule.set(*day, *hours),
        Event::ScheduleCleared { day, .. } => loc.schedule.clear(*day),
        Event::WorkerAssigned { calendar_id, .. } => {
            loc.worker_calendar = Some(*calendar_id);
        }
        _ => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>, snapshot_ttl_ms: Ms) -> io::Result<Self> {
        let replay = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            calendars: DashMap::new(),
            locations: DashMap::new(),
            wal_tx,
            notify,
            calendar_by_owner: DashMap::new(),
            appointment_index: DashMap::new(),
            snapshots: DashMap::new(),
            snapshot_ttl_ms,
        };

        // Replay events — we're the sole owner of these Arcs, so try_write
        // always succeeds instantly (no contention). Never use blocking_write
        // here because this may run inside an async context.
        for event in replay {
            match &event {
                Event::CalendarCreated { id, owner } => {
                    let cal = CalendarState::new(*id, *owner);
                    engine.calendars.insert(*id, Arc::new(RwLock::new(cal)));
                    engine.calendar_by_owner.insert(*owner, *id);
                }
                Event::LocationCreated { id, name, timezone } => {
                    let loc = LocationState::new(*id, name.clone(), *timezone);
                    engine.locations.insert(*id, Arc::new(RwLock::new(loc)));
                }
                Event::ScheduleSet { location_id, .. }
                | Event::ScheduleCleared { location_id, .. }
                | Event::WorkerAssigned { location_id, .. } => {
                    if let Some(entry) = engine.locations.get(location_id) {
                        let loc_arc = entry.clone();
                        let mut guard = loc_arc.try_write().expect("replay: uncontended write");
                        apply_to_location(&mut guard, &event);
                    }
                }
                other => {
                    if let Some(calendar_id) = event_calendar_id(other)
                        && let Some(entry) = engine.calendars.get(&calendar_id)
                    {
                        let cal_arc = entry.clone();
                        let mut guard = cal_arc.try_write().expect("replay: uncontended write");
                        apply_to_calendar(&mut guard, other, &engine.appointment_index);
                    }
                }
            }
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_calendar(&self, id: &Ulid) -> Option<SharedCalendarState> {
        self.calendars.get(id).map(|e| e.value().clone())
    }

    pub fn get_location(&self, id: &Ulid) -> Option<SharedLocationState> {
        self.locations.get(id).map(|e| e.value().clone())
    }

    pub fn calendar_for_owner(&self, owner: &Ulid) -> Option<Ulid> {
        self.calendar_by_owner.get(owner).map(|e| *e.value())
    }

    pub fn calendar_for_appointment(&self, appointment_id: &Ulid) -> Option<Ulid> {
        self.appointment_index.get(appointment_id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify in one call.
    pub(super) async fn persist_and_apply(
        &self,
        calendar_id: Ulid,
        cal: &mut CalendarState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_calendar(cal, event, &self.appointment_index);
        self.notify.send(calendar_id, event);
        Ok(())
    }

    pub(super) async fn persist_and_apply_location(
        &self,
        location_id: Ulid,
        loc: &mut LocationState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_location(loc, event);
        self.notify.send(location_id, event);
        Ok(())
    }

    /// Lookup appointment → calendar, get calendar, acquire write lock.
    pub(super) async fn resolve_appointment_write(
        &self,
        appointment_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<CalendarState>), EngineError> {
        let calendar_id = self
            .calendar_for_appointment(appointment_id)
            .ok_or(EngineError::NotFound(*appointment_id))?;
        let cal = self
            .get_calendar(&calendar_id)
            .ok_or(EngineError::NotFound(calendar_id))?;
        let guard = cal.write_owned().await;
        Ok((calendar_id, guard))
    }

    // ── Snapshot registry ────────────────────────────────────

    pub fn snapshot_ttl_ms(&self) -> Ms {
        self.snapshot_ttl_ms
    }

    /// Register a free-slot snapshot. At the cap the oldest snapshot is
    /// evicted instead of failing the query — eviction just forces the
    /// affected caller to re-query at placement time.
    pub(super) fn register_snapshot(&self, snapshot: Snapshot) {
        if self.snapshots.len() >= MAX_SNAPSHOTS {
            // Ulids are time-ordered, so min key = oldest snapshot.
            if let Some(oldest) = self.snapshots.iter().map(|e| *e.key()).min() {
                self.snapshots.remove(&oldest);
            }
        }
        self.snapshots.insert(snapshot.id, snapshot);
        metrics::gauge!(crate::observability::SNAPSHOTS_ACTIVE)
            .set(self.snapshots.len() as f64);
    }

    pub fn get_snapshot(&self, id: &Ulid) -> Option<Snapshot> {
        self.snapshots.get(id).map(|e| e.value().clone())
    }

    /// Drop snapshots past the staleness TTL. Returns how many were removed.
    pub fn prune_stale_snapshots(&self, now: Ms) -> usize {
        let before = self.snapshots.len();
        self.snapshots
            .retain(|_, snap| now - snap.issued_at <= self.snapshot_ttl_ms);
        let removed = before - self.snapshots.len();
        metrics::gauge!(crate::observability::SNAPSHOTS_ACTIVE)
            .set(self.snapshots.len() as f64);
        removed
    }
}

/// Extract the calendar_id from an appointment event.
fn event_calendar_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::AppointmentRequested { calendar_id, .. }
        | Event::AppointmentAccepted { calendar_id, .. }
        | Event::AppointmentRejected { calendar_id, .. }
        | Event::AppointmentDeleted { calendar_id, .. } => Some(*calendar_id),
        _ => None,
    }
}
