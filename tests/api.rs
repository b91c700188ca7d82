use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;
use ulid::Ulid;

use openslot::api;
use openslot::engine::Engine;
use openslot::notify::NotifyHub;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("openslot_test_api");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn app(name: &str) -> Router {
    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(test_wal_path(name), notify, 120_000).unwrap());
    api::router(engine)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = match body {
        Some(body) => Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, json)
}

/// Full setup: Madrid location open Mondays 09:00-17:00, a user calendar
/// and a worker calendar assigned to the location. Returns
/// (location, user owner id, user calendar, worker calendar).
async fn setup(app: &Router) -> (String, String, String, String) {
    let (status, loc) = send(
        app,
        "POST",
        "/locations",
        Some(json!({ "name": "Studio", "timezone": "Europe/Madrid" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let location = loc["id"].as_str().unwrap().to_owned();

    let (status, _) = send(
        app,
        "PUT",
        &format!("/locations/{location}/schedule"),
        Some(json!({ "day": "monday", "open": "09:00", "close": "17:00" })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let user = Ulid::new().to_string();
    let (status, cal) = send(app, "POST", "/calendars", Some(json!({ "owner": user }))).await;
    assert_eq!(status, StatusCode::CREATED);
    let user_cal = cal["id"].as_str().unwrap().to_owned();

    let (status, cal) = send(
        app,
        "POST",
        "/calendars",
        Some(json!({ "owner": Ulid::new().to_string() })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let worker_cal = cal["id"].as_str().unwrap().to_owned();

    let (status, _) = send(
        app,
        "PUT",
        &format!("/locations/{location}/worker"),
        Some(json!({ "calendarId": worker_cal })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    (location, user, user_cal, worker_cal)
}

// 2026-09-07 is a Monday; Madrid is UTC+2 that day, so the 09:00-17:00
// local window is 07:00Z-15:00Z.

#[tokio::test]
async fn common_slots_round_trip() {
    let app = app("common_slots.wal");
    let (location, user, _user_cal, _worker_cal) = setup(&app).await;

    let (status, body) = send(
        &app,
        "POST",
        "/calendars/common-slots/user-location",
        Some(json!({
            "userId": user,
            "locationId": location,
            "date1": "2026-09-07",
            "date2": "2026-09-07",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["snapshotId"].is_string());

    let slots = body["commonSlots"].as_array().unwrap();
    assert_eq!(slots.len(), 1);
    assert_eq!(slots[0]["day"], "2026-09-07");
    let ranges = slots[0]["ranges"].as_array().unwrap();
    assert_eq!(ranges.len(), 1);
    assert_eq!(ranges[0][0], "2026-09-07T07:00:00Z");
    assert_eq!(ranges[0][1], "2026-09-07T15:00:00Z");
}

#[tokio::test]
async fn request_accept_and_double_book() {
    let app = app("request_accept.wal");
    let (location, user, _user_cal, worker_cal) = setup(&app).await;

    let (_, slots) = send(
        &app,
        "POST",
        "/calendars/common-slots/user-location",
        Some(json!({
            "userId": user,
            "locationId": location,
            "date1": "2026-09-07",
            "date2": "2026-09-07",
        })),
    )
    .await;
    let snapshot_id = slots["snapshotId"].as_str().unwrap().to_owned();

    // Request 10:00-11:00 local (08:00Z-09:00Z) on the worker's calendar
    let request_body = json!({
        "calendarId": worker_cal,
        "snapshotId": snapshot_id,
        "appointment": {
            "inTime": "2026-09-07T08:00:00Z",
            "outTime": "2026-09-07T09:00:00Z",
            "title": "haircut",
        },
    });
    let (status, body) = send(
        &app,
        "POST",
        "/calendars/appointmentRequest",
        Some(request_body.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["appointment"]["state"], "requested");
    assert_eq!(body["appointment"]["title"], "haircut");
    let appointment_id = body["appointment"]["id"].as_str().unwrap().to_owned();

    // The same slot again: the pending request already blocks it
    let (status, _) = send(&app, "POST", "/calendars/appointmentRequest", Some(request_body)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Accept the pending request
    let (status, body) = send(
        &app,
        "PUT",
        "/calendars/appointment/accept/requested",
        Some(json!({ "appointmentId": appointment_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "accepted");

    // Accepting twice is a state error
    let (status, _) = send(
        &app,
        "PUT",
        "/calendars/appointment/accept/requested",
        Some(json!({ "appointmentId": appointment_id })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    // It shows up in the calendar listing
    let (status, listed) = send(
        &app,
        "GET",
        &format!("/calendars/{worker_cal}/appointments"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["id"].as_str().unwrap(), appointment_id);
}

#[tokio::test]
async fn reject_and_delete_flow() {
    let app = app("reject_delete.wal");
    let (_location, _user, _user_cal, worker_cal) = setup(&app).await;

    let (status, body) = send(
        &app,
        "POST",
        "/calendars/appointmentRequest",
        Some(json!({
            "calendarId": worker_cal,
            "appointment": {
                "inTime": "2026-09-07T08:00:00Z",
                "outTime": "2026-09-07T09:00:00Z",
            },
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let appointment_id = body["appointment"]["id"].as_str().unwrap().to_owned();

    let (status, body) = send(
        &app,
        "PUT",
        "/calendars/appointment/reject/requested",
        Some(json!({ "appointmentId": appointment_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "rejected");

    // Rejection tombstones it: deleting now is a 404
    let (status, _) = send(
        &app,
        "DELETE",
        &format!("/calendars/appointment/{appointment_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // A committed appointment can be soft-deleted
    let (status, body) = send(
        &app,
        "POST",
        "/calendars/appointmentRequest",
        Some(json!({
            "calendarId": worker_cal,
            "appointment": {
                "inTime": "2026-09-07T10:00:00Z",
                "outTime": "2026-09-07T11:00:00Z",
            },
            "selfBooked": true,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["appointment"]["state"], "accepted");
    let id = body["appointment"]["id"].as_str().unwrap().to_owned();

    let (status, _) = send(&app, "DELETE", &format!("/calendars/appointment/{id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn validation_errors() {
    let app = app("validation.wal");
    let (location, user, user_cal, _worker_cal) = setup(&app).await;

    // close before open
    let (status, _) = send(
        &app,
        "PUT",
        &format!("/locations/{location}/schedule"),
        Some(json!({ "day": "tuesday", "open": "17:00", "close": "09:00" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    // unknown timezone
    let (status, _) = send(
        &app,
        "POST",
        "/locations",
        Some(json!({ "name": "Nowhere", "timezone": "Mars/Olympus" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    // unknown location id
    let (status, _) = send(
        &app,
        "POST",
        "/calendars/common-slots/user-location",
        Some(json!({
            "userId": user,
            "locationId": Ulid::new().to_string(),
            "date1": "2026-09-07",
            "date2": "2026-09-07",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // stale/unknown snapshot reference
    let (status, _) = send(
        &app,
        "POST",
        "/calendars/appointmentRequest",
        Some(json!({
            "calendarId": user_cal,
            "snapshotId": Ulid::new().to_string(),
            "appointment": {
                "inTime": "2026-09-07T08:00:00Z",
                "outTime": "2026-09-07T09:00:00Z",
            },
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn schedule_day_can_be_cleared() {
    let app = app("clear_day.wal");
    let (location, user, _user_cal, _worker_cal) = setup(&app).await;

    let (status, _) = send(
        &app,
        "DELETE",
        &format!("/locations/{location}/schedule/monday"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(
        &app,
        "POST",
        "/calendars/common-slots/user-location",
        Some(json!({
            "userId": user,
            "locationId": location,
            "date1": "2026-09-07",
            "date2": "2026-09-07",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let slots = body["commonSlots"].as_array().unwrap();
    assert!(slots[0]["ranges"].as_array().unwrap().is_empty());
}
