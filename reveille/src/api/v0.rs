//! API v0 endpoints.
//!
//! Version 0 signals an unstable API -- breaking changes are expected
//! until the service reaches 1.0.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::Local;
use utoipa_axum::{router::OpenApiRouter, routes};

use super::server::SharedState;
use crate::alarm::{AlarmDefinition, AlarmId, AlarmPatch, NewAlarm};
use crate::api_client::types::{
    Health, RebuildResult, ScheduledFire, SequenceStatus, ServiceStatus, SnoozeRequest,
};
use crate::error::{Error, Result};
use crate::sequencer::DEFAULT_SNOOZE_MINUTES;

/// Build the v0 API routes with OpenAPI metadata.
pub fn routes() -> OpenApiRouter<SharedState> {
    OpenApiRouter::new()
        .routes(routes!(health))
        .routes(routes!(get_status))
        .routes(routes!(get_schedule))
        .routes(routes!(rebuild_schedule))
        .routes(routes!(snooze))
        .routes(routes!(dismiss))
        .routes(routes!(list_alarms, create_alarm))
        .routes(routes!(get_alarm, patch_alarm, delete_alarm))
        .routes(routes!(trigger_alarm))
}

/// Health check, including whether the hub answers.
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = OK, description = "Service is running", body = Health),
    ),
)]
async fn health(State(state): State<SharedState>) -> Json<Health> {
    let hub = if state.hub.is_reachable().await {
        "UP"
    } else {
        "DOWN"
    };
    Json(Health {
        status: "UP".to_string(),
        hub: hub.to_string(),
        timestamp: Local::now(),
    })
}

/// Sequencer state and the next few fire instants.
#[utoipa::path(
    get,
    path = "/status",
    tag = "status",
    responses(
        (status = OK, description = "Current service status", body = ServiceStatus),
    ),
)]
async fn get_status(State(state): State<SharedState>) -> Json<ServiceStatus> {
    Json(state.status.snapshot())
}

/// Every planned fire instant, soonest first.
#[utoipa::path(
    get,
    path = "/schedule",
    tag = "schedule",
    responses(
        (status = OK, description = "Planned fire instants", body = Vec<ScheduledFire>),
    ),
)]
async fn get_schedule(State(state): State<SharedState>) -> Json<Vec<ScheduledFire>> {
    Json(state.status.schedule(usize::MAX))
}

/// Recompute the plan from the alarm store.
#[utoipa::path(
    post,
    path = "/schedule/rebuild",
    tag = "schedule",
    responses(
        (status = OK, description = "Plan rebuilt", body = RebuildResult),
        (status = SERVICE_UNAVAILABLE, description = "Scheduler not running"),
    ),
)]
async fn rebuild_schedule(State(state): State<SharedState>) -> Result<Json<RebuildResult>> {
    let scheduled = state.scheduler.rebuild().await?;
    Ok(Json(RebuildResult { scheduled }))
}

/// Snooze the running alarm.
#[utoipa::path(
    post,
    path = "/snooze",
    tag = "control",
    request_body = SnoozeRequest,
    responses(
        (status = OK, description = "Alarm snoozed", body = SequenceStatus),
        (status = CONFLICT, description = "No running alarm"),
    ),
)]
async fn snooze(
    State(state): State<SharedState>,
    Json(req): Json<SnoozeRequest>,
) -> Result<Json<SequenceStatus>> {
    let minutes = req.minutes.unwrap_or(DEFAULT_SNOOZE_MINUTES);
    if !state.sequencer.snooze(minutes).await {
        return Err(Error::Conflict("no running alarm to snooze"));
    }
    Ok(Json(state.sequencer.status()))
}

/// Dismiss the running or snoozed alarm.
#[utoipa::path(
    post,
    path = "/dismiss",
    tag = "control",
    responses(
        (status = OK, description = "Alarm dismissed", body = SequenceStatus),
        (status = CONFLICT, description = "No active alarm"),
    ),
)]
async fn dismiss(State(state): State<SharedState>) -> Result<Json<SequenceStatus>> {
    if !state.sequencer.dismiss().await {
        return Err(Error::Conflict("no active alarm to dismiss"));
    }
    Ok(Json(state.sequencer.status()))
}

/// Run an alarm's wake-up sequence now.
#[utoipa::path(
    post,
    path = "/alarms/{id}/trigger",
    tag = "control",
    params(
        ("id" = u64, Path, description = "Alarm identifier"),
    ),
    responses(
        (status = ACCEPTED, description = "Sequence started", body = SequenceStatus),
        (status = NOT_FOUND, description = "Alarm not found"),
        (status = CONFLICT, description = "Another alarm is active"),
    ),
)]
async fn trigger_alarm(
    State(state): State<SharedState>,
    Path(id): Path<AlarmId>,
) -> Result<(StatusCode, Json<SequenceStatus>)> {
    state.sequencer.dispatch(id)?;
    Ok((StatusCode::ACCEPTED, Json(state.sequencer.status())))
}

#[utoipa::path(
    get,
    path = "/alarms",
    tag = "alarms",
    responses(
        (status = OK, description = "All alarms", body = Vec<AlarmDefinition>),
    ),
)]
async fn list_alarms(State(state): State<SharedState>) -> Json<Vec<AlarmDefinition>> {
    Json(state.store.list())
}

/// Create an alarm and reschedule.
#[utoipa::path(
    post,
    path = "/alarms",
    tag = "alarms",
    request_body = NewAlarm,
    responses(
        (status = CREATED, description = "Alarm created", body = AlarmDefinition),
        (status = UNPROCESSABLE_ENTITY, description = "Invalid alarm"),
    ),
)]
async fn create_alarm(
    State(state): State<SharedState>,
    Json(new): Json<NewAlarm>,
) -> Result<(StatusCode, Json<AlarmDefinition>)> {
    let alarm = state.store.create(new)?;
    state.scheduler.rebuild().await?;
    Ok((StatusCode::CREATED, Json(alarm)))
}

#[utoipa::path(
    get,
    path = "/alarms/{id}",
    tag = "alarms",
    params(
        ("id" = u64, Path, description = "Alarm identifier"),
    ),
    responses(
        (status = OK, description = "Alarm details", body = AlarmDefinition),
        (status = NOT_FOUND, description = "Alarm not found"),
    ),
)]
async fn get_alarm(
    State(state): State<SharedState>,
    Path(id): Path<AlarmId>,
) -> std::result::Result<Json<AlarmDefinition>, StatusCode> {
    state.store.get(id).map(Json).ok_or(StatusCode::NOT_FOUND)
}

/// Apply a partial update and reschedule.
#[utoipa::path(
    patch,
    path = "/alarms/{id}",
    tag = "alarms",
    params(
        ("id" = u64, Path, description = "Alarm identifier"),
    ),
    request_body = AlarmPatch,
    responses(
        (status = OK, description = "Updated alarm", body = AlarmDefinition),
        (status = NOT_FOUND, description = "Alarm not found"),
        (status = UNPROCESSABLE_ENTITY, description = "Invalid alarm"),
    ),
)]
async fn patch_alarm(
    State(state): State<SharedState>,
    Path(id): Path<AlarmId>,
    Json(patch): Json<AlarmPatch>,
) -> Result<Json<AlarmDefinition>> {
    let alarm = state.store.update(id, patch)?;
    state.scheduler.rebuild().await?;
    Ok(Json(alarm))
}

/// Delete an alarm and reschedule.
#[utoipa::path(
    delete,
    path = "/alarms/{id}",
    tag = "alarms",
    params(
        ("id" = u64, Path, description = "Alarm identifier"),
    ),
    responses(
        (status = NO_CONTENT, description = "Alarm deleted"),
        (status = NOT_FOUND, description = "Alarm not found"),
    ),
)]
async fn delete_alarm(
    State(state): State<SharedState>,
    Path(id): Path<AlarmId>,
) -> Result<StatusCode> {
    state.store.delete(id)?;
    state.scheduler.rebuild().await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use axum::{Router, body::Body};
    use http::{Request, header};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use crate::alarm::sample;
    use crate::api::{SharedState, router};
    use crate::api_client::types::Phase;
    use crate::scheduler::{Scheduler, SchedulerHandle};
    use crate::sequencer::Sequencer;
    use crate::status::StatusReporter;
    use crate::testing::{RecordingDispatcher, RecordingHub, RecordingNotifier, store_with};

    fn app(hub: RecordingHub) -> (Router, Sequencer) {
        let store = store_with([sample(0)]);
        let hub = Arc::new(hub);
        let (scheduler, mailbox) = SchedulerHandle::channel(CancellationToken::new());
        let sequencer = Sequencer::new(
            store.clone(),
            hub.clone(),
            Arc::new(RecordingNotifier::default()),
            scheduler.clone(),
            Duration::from_secs(60),
        );
        tokio::spawn(
            Scheduler::new(mailbox, store.clone(), Arc::new(RecordingDispatcher::default()))
                .run(),
        );

        let state = SharedState {
            store,
            status: StatusReporter::new(&sequencer, &scheduler),
            sequencer: sequencer.clone(),
            scheduler,
            hub,
        };
        (router(state), sequencer)
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (u16, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status().as_u16();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn health_reports_hub_reachability() {
        let (app, _) = app(RecordingHub::unreachable());
        let (status, body) = call(&app, "GET", "/api/v0/health", None).await;
        assert_eq!(status, 200);
        assert_eq!(body["status"], "UP");
        assert_eq!(body["hub"], "DOWN");
    }

    #[tokio::test]
    async fn status_starts_idle() {
        let (app, _) = app(RecordingHub::default());
        let (status, body) = call(&app, "GET", "/api/v0/status", None).await;
        assert_eq!(status, 200);
        assert_eq!(body["sequence"]["phase"], "idle");
    }

    #[tokio::test]
    async fn nothing_to_snooze_or_dismiss_is_a_conflict() {
        let (app, _) = app(RecordingHub::default());
        let (status, _) = call(&app, "POST", "/api/v0/snooze", Some(json!({}))).await;
        assert_eq!(status, 409);
        let (status, body) = call(&app, "POST", "/api/v0/dismiss", None).await;
        assert_eq!(status, 409);
        assert!(body["error"].as_str().unwrap().contains("dismiss"));
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_then_busy_then_snooze() {
        let (app, sequencer) = app(RecordingHub::default());

        let (status, _) = call(&app, "POST", "/api/v0/alarms/1/trigger", None).await;
        assert_eq!(status, 202);
        sequencer
            .subscribe()
            .wait_for(|s| s.phase == Phase::VolumeRamp)
            .await
            .unwrap();

        let (status, _) = call(&app, "POST", "/api/v0/alarms/1/trigger", None).await;
        assert_eq!(status, 409);

        let (status, body) =
            call(&app, "POST", "/api/v0/snooze", Some(json!({"minutes": 10}))).await;
        assert_eq!(status, 200);
        assert_eq!(body["phase"], "snoozed");
        assert_eq!(body["snoozed_alarm_id"], 1);
    }

    #[tokio::test]
    async fn trigger_unknown_alarm_is_not_found() {
        let (app, _) = app(RecordingHub::default());
        let (status, _) = call(&app, "POST", "/api/v0/alarms/42/trigger", None).await;
        assert_eq!(status, 404);
    }

    #[tokio::test]
    async fn alarm_crud_reschedules() {
        let (app, _) = app(RecordingHub::default());

        let (status, body) = call(&app, "POST", "/api/v0/schedule/rebuild", None).await;
        assert_eq!(status, 200);
        assert_eq!(body["scheduled"], 5);

        let (status, created) = call(
            &app,
            "POST",
            "/api/v0/alarms",
            Some(json!({
                "name": "Saturday run",
                "time": "06:15",
                "days": [5],
                "media_url": "run.mp3",
            })),
        )
        .await;
        assert_eq!(status, 201);
        assert_eq!(created["id"], 2);
        assert_eq!(created["enabled"], true);
        let (_, schedule) = call(&app, "GET", "/api/v0/schedule", None).await;
        assert_eq!(schedule.as_array().unwrap().len(), 6);

        let (status, patched) = call(
            &app,
            "PATCH",
            "/api/v0/alarms/2",
            Some(json!({"enabled": false})),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(patched["enabled"], false);
        let (_, schedule) = call(&app, "GET", "/api/v0/schedule", None).await;
        assert_eq!(schedule.as_array().unwrap().len(), 5);

        let (status, _) = call(&app, "DELETE", "/api/v0/alarms/2", None).await;
        assert_eq!(status, 204);
        let (status, _) = call(&app, "GET", "/api/v0/alarms/2", None).await;
        assert_eq!(status, 404);
        let (_, alarms) = call(&app, "GET", "/api/v0/alarms", None).await;
        assert_eq!(alarms.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalid_alarm_is_rejected() {
        let (app, _) = app(RecordingHub::default());
        let (status, body) = call(
            &app,
            "POST",
            "/api/v0/alarms",
            Some(json!({
                "name": "loud",
                "time": "06:15",
                "days": [0],
                "media_url": "run.mp3",
                "volume_steps": [1.5],
            })),
        )
        .await;
        assert_eq!(status, 422);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn openapi_document_is_served() {
        let (app, _) = app(RecordingHub::default());
        let (status, body) = call(&app, "GET", "/api-docs/openapi.json", None).await;
        assert_eq!(status, 200);
        assert!(body["paths"]["/api/v0/alarms/{id}/trigger"].is_object());
    }
}
