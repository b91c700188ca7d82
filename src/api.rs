use std::sync::Arc;
use std::time::Instant;

use axum::{
    Router,
    extract::{MatchedPath, Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{Json, Response},
    routing::{delete, get, post, put},
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::{Engine, EngineError, NewAppointment};
use crate::model::{AppointmentInfo, AppointmentState, Ms, Weekday};
use crate::observability;

// ── Wire DTOs ────────────────────────────────────────────────────

fn to_iso(ms: Ms) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::UNIX_EPOCH)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentDto {
    pub id: Ulid,
    pub calendar_id: Ulid,
    pub in_time: DateTime<Utc>,
    pub out_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_location: Option<String>,
    pub state: AppointmentState,
}

impl From<AppointmentInfo> for AppointmentDto {
    fn from(info: AppointmentInfo) -> Self {
        Self {
            id: info.id,
            calendar_id: info.calendar_id,
            in_time: to_iso(info.start),
            out_time: to_iso(info.end),
            title: info.title,
            service_type: info.service_type,
            custom_location: info.custom_location,
            state: info.state,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommonSlotsRequest {
    pub user_id: Ulid,
    pub location_id: Ulid,
    /// First local date at the location, `YYYY-MM-DD`.
    pub date1: NaiveDate,
    /// Last local date, inclusive.
    pub date2: NaiveDate,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DaySlotsDto {
    pub day: NaiveDate,
    pub ranges: Vec<[DateTime<Utc>; 2]>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommonSlotsResponse {
    pub snapshot_id: Ulid,
    pub common_slots: Vec<DaySlotsDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentFields {
    pub in_time: DateTime<Utc>,
    pub out_time: DateTime<Utc>,
    pub title: Option<String>,
    pub service_type: Option<String>,
    pub custom_location: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentRequestBody {
    pub calendar_id: Ulid,
    /// Snapshot from a prior common-slots query. When present the proposed
    /// range is validated against it before the commit-time conflict check.
    pub snapshot_id: Option<Ulid>,
    pub appointment: AppointmentFields,
    /// True when the calendar owner books their own slot: commits directly
    /// as accepted instead of waiting in the requested state.
    #[serde(default)]
    pub self_booked: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentCommitted {
    pub message: &'static str,
    pub appointment: AppointmentDto,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentRef {
    pub appointment_id: Ulid,
}

#[derive(Debug, Deserialize)]
pub struct CreateCalendarBody {
    pub owner: Ulid,
}

#[derive(Debug, Deserialize)]
pub struct CreateLocationBody {
    pub name: String,
    /// IANA timezone name, e.g. `Europe/Madrid`.
    pub timezone: String,
}

#[derive(Debug, Serialize)]
pub struct Created {
    pub id: Ulid,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleBody {
    pub day: Weekday,
    /// `HH:mm` wall-clock at the location.
    pub open: String,
    pub close: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerBody {
    pub calendar_id: Ulid,
}

// ── Error mapping ────────────────────────────────────────────────

/// Deterministic EngineError → HTTP status mapping. Anything retryable by
/// re-querying availability is a 409.
fn error_response(err: EngineError) -> (StatusCode, String) {
    let status = match &err {
        EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineError::AlreadyExists(_)
        | EngineError::Conflict(_)
        | EngineError::OutsideAvailability
        | EngineError::ExceedsBusinessHours
        | EngineError::StaleAvailability => StatusCode::CONFLICT,
        EngineError::InvalidInterval { .. }
        | EngineError::InvalidSchedule(_)
        | EngineError::InvalidTransition { .. }
        | EngineError::LimitExceeded(_) => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::WalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

// ── Handlers ─────────────────────────────────────────────────────

async fn create_calendar(
    State(engine): State<Arc<Engine>>,
    Json(body): Json<CreateCalendarBody>,
) -> Result<(StatusCode, Json<Created>), (StatusCode, String)> {
    let id = Ulid::new();
    engine
        .create_calendar(id, body.owner)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(Created { id })))
}

async fn list_appointments(
    State(engine): State<Arc<Engine>>,
    Path(calendar_id): Path<Ulid>,
) -> Json<Vec<AppointmentDto>> {
    let infos = engine.list_appointments(calendar_id).await;
    Json(infos.into_iter().map(AppointmentDto::from).collect())
}

async fn create_location(
    State(engine): State<Arc<Engine>>,
    Json(body): Json<CreateLocationBody>,
) -> Result<(StatusCode, Json<Created>), (StatusCode, String)> {
    let timezone: chrono_tz::Tz = body.timezone.parse().map_err(|_| {
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("unknown timezone: {}", body.timezone),
        )
    })?;
    let id = Ulid::new();
    engine
        .create_location(id, body.name, timezone)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(Created { id })))
}

async fn set_schedule(
    State(engine): State<Arc<Engine>>,
    Path(location_id): Path<Ulid>,
    Json(body): Json<ScheduleBody>,
) -> Result<StatusCode, (StatusCode, String)> {
    engine
        .set_opening_hours(location_id, body.day, &body.open, &body.close)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn clear_schedule(
    State(engine): State<Arc<Engine>>,
    Path((location_id, day)): Path<(Ulid, Weekday)>,
) -> Result<StatusCode, (StatusCode, String)> {
    engine
        .clear_opening_hours(location_id, day)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn assign_worker(
    State(engine): State<Arc<Engine>>,
    Path(location_id): Path<Ulid>,
    Json(body): Json<WorkerBody>,
) -> Result<StatusCode, (StatusCode, String)> {
    engine
        .assign_worker(location_id, body.calendar_id)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn common_slots(
    State(engine): State<Arc<Engine>>,
    Json(body): Json<CommonSlotsRequest>,
) -> Result<Json<CommonSlotsResponse>, (StatusCode, String)> {
    let result = engine
        .common_slots_user_location(body.user_id, body.location_id, body.date1, body.date2)
        .await
        .map_err(error_response)?;
    let common_slots = result
        .days
        .into_iter()
        .map(|d| DaySlotsDto {
            day: d.day,
            ranges: d
                .ranges
                .iter()
                .map(|r| [to_iso(r.start), to_iso(r.end)])
                .collect(),
        })
        .collect();
    Ok(Json(CommonSlotsResponse {
        snapshot_id: result.snapshot_id,
        common_slots,
    }))
}

async fn appointment_request(
    State(engine): State<Arc<Engine>>,
    Json(body): Json<AppointmentRequestBody>,
) -> Result<(StatusCode, Json<AppointmentCommitted>), (StatusCode, String)> {
    let details = NewAppointment {
        title: body.appointment.title,
        service_type: body.appointment.service_type,
        custom_location: body.appointment.custom_location,
    };
    let result = engine
        .request_appointment(
            Ulid::new(),
            body.calendar_id,
            body.appointment.in_time.timestamp_millis(),
            body.appointment.out_time.timestamp_millis(),
            details,
            body.snapshot_id,
            body.self_booked,
        )
        .await;

    let outcome = match &result {
        Ok(_) => "committed",
        Err(EngineError::Conflict(_)) => "conflict",
        Err(EngineError::OutsideAvailability) => "outside",
        Err(EngineError::ExceedsBusinessHours) => "exceeds_hours",
        Err(EngineError::StaleAvailability) => "stale",
        Err(_) => "error",
    };
    metrics::counter!(observability::PLACEMENTS_TOTAL, "outcome" => outcome).increment(1);

    let info = result.map_err(error_response)?;
    Ok((
        StatusCode::CREATED,
        Json(AppointmentCommitted {
            message: "appointment committed",
            appointment: info.into(),
        }),
    ))
}

async fn accept_requested(
    State(engine): State<Arc<Engine>>,
    Json(body): Json<AppointmentRef>,
) -> Result<Json<AppointmentDto>, (StatusCode, String)> {
    let info = engine
        .accept_requested(body.appointment_id)
        .await
        .map_err(error_response)?;
    Ok(Json(info.into()))
}

async fn reject_requested(
    State(engine): State<Arc<Engine>>,
    Json(body): Json<AppointmentRef>,
) -> Result<Json<AppointmentDto>, (StatusCode, String)> {
    let info = engine
        .reject_requested(body.appointment_id)
        .await
        .map_err(error_response)?;
    Ok(Json(info.into()))
}

async fn delete_appointment(
    State(engine): State<Arc<Engine>>,
    Path(id): Path<Ulid>,
) -> Result<StatusCode, (StatusCode, String)> {
    engine
        .delete_appointment(id)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Router ───────────────────────────────────────────────────────

async fn track_metrics(req: Request, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| req.uri().path().to_owned());
    let start = Instant::now();
    let response = next.run(req).await;
    metrics::histogram!(observability::REQUEST_DURATION_SECONDS, "route" => route.clone())
        .record(start.elapsed().as_secs_f64());
    metrics::counter!(
        observability::REQUESTS_TOTAL,
        "route" => route,
        "status" => response.status().as_u16().to_string()
    )
    .increment(1);
    response
}

pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/calendars", post(create_calendar))
        .route("/calendars/{id}/appointments", get(list_appointments))
        .route("/calendars/common-slots/user-location", post(common_slots))
        .route("/calendars/appointmentRequest", post(appointment_request))
        .route(
            "/calendars/appointment/accept/requested",
            put(accept_requested),
        )
        .route(
            "/calendars/appointment/reject/requested",
            put(reject_requested),
        )
        .route("/calendars/appointment/{id}", delete(delete_appointment))
        .route("/locations", post(create_location))
        .route("/locations/{id}/schedule", put(set_schedule))
        .route("/locations/{id}/schedule/{day}", delete(clear_schedule))
        .route("/locations/{id}/worker", put(assign_worker))
        .layer(middleware::from_fn(track_metrics))
        .with_state(engine)
}
