//! The HTTP front door (C9): JSON DTO parsing, parameter/UUID validation
//! shape, and the HTML operator landing page (§6). Thin on purpose — every
//! decision of substance lives in [`chronos_scheduler::Scheduler`].

use std::fmt::Write as _;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chronos_cache::Cache;
use chronos_queue::Producer;
use chronos_scheduler::{CreateNotificationInput, Scheduler, SchedulerError};
use chronos_store::Store;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::error;
use uuid::Uuid;

pub struct AppState {
    pub scheduler: Scheduler,
    pub store: Arc<dyn Store>,
    pub cache: Arc<dyn Cache>,
    pub producer: Arc<dyn Producer>,
}

/// `write_timeout` bounds how long a single request handler may run before
/// the connection is dropped; there is no axum-level analogue of a raw
/// socket read timeout, so `read_timeout` is carried in config for
/// operators tuning a reverse proxy in front of this service but isn't
/// independently enforced here.
pub fn router(state: Arc<AppState>, write_timeout: Duration) -> Router {
    Router::new()
        .route("/", get(status_table))
        .route("/api/v1/notify", post(create_notification).get(get_status).delete(cancel_notification))
        .route("/q/health", get(liveness))
        .route("/q/health/live", get(liveness))
        .route("/q/health/ready", get(readiness))
        .layer(TimeoutLayer::new(write_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct ResultResponse {
    result: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Deserialize)]
struct CreateNotificationRequest {
    channel: String,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    message: String,
    send_at: String,
    #[serde(default)]
    send_to: Vec<String>,
}

#[derive(Deserialize)]
struct IdQuery {
    id: String,
}

async fn create_notification(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateNotificationRequest>,
) -> Response {
    let input = CreateNotificationInput {
        channel: &body.channel,
        subject: body.subject.as_deref(),
        message: &body.message,
        send_at: &body.send_at,
        recipients: &body.send_to,
    };

    match state.scheduler.create_notification(input).await {
        Ok(notification) => {
            (StatusCode::OK, Json(ResultResponse { result: notification.id.to_string() })).into_response()
        }
        Err(e) => scheduler_error_response(e),
    }
}

async fn get_status(State(state): State<Arc<AppState>>, Query(query): Query<IdQuery>) -> Response {
    let id = match Uuid::parse_str(&query.id) {
        Ok(id) => id,
        Err(_) => return bad_request("malformed id"),
    };

    match state.scheduler.get_status(id).await {
        Ok(status) => (StatusCode::OK, Json(ResultResponse { result: status.to_string() })).into_response(),
        Err(e) => scheduler_error_response(e),
    }
}

async fn cancel_notification(State(state): State<Arc<AppState>>, Query(query): Query<IdQuery>) -> Response {
    let id = match Uuid::parse_str(&query.id) {
        Ok(id) => id,
        Err(_) => return bad_request("malformed id"),
    };

    match state.scheduler.cancel_notification(id).await {
        Ok(()) => (StatusCode::OK, Json(ResultResponse { result: "canceled".to_string() })).into_response(),
        Err(e) => scheduler_error_response(e),
    }
}

async fn status_table(State(state): State<Arc<AppState>>) -> Html<String> {
    let rows = state.scheduler.get_all_statuses().await.unwrap_or_else(|e| {
        error!(error = %e, "failed to load statuses for landing page");
        vec![]
    });

    let mut body = String::from(
        "<html><head><title>notifications</title></head><body><table border=\"1\">\
         <tr><th>id</th><th>send_at</th><th>status</th></tr>",
    );
    for row in rows {
        let _ = write!(
            body,
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
            row.id,
            row.send_at.to_rfc3339(),
            row.status
        );
    }
    body.push_str("</table></body></html>");
    Html(body)
}

/// Unconditional 200: the process is up and serving requests at all.
async fn liveness() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "UP"}))
}

/// Reflects whether Store, Cache, and DDQ are currently reachable (§4.9,
/// §9): each backend owns its own notion of health, consulted here rather
/// than duplicated.
async fn readiness(State(state): State<Arc<AppState>>) -> Response {
    let (store_ok, cache_ok, queue_ok) = tokio::join!(
        state.store.is_healthy(),
        state.cache.is_healthy(),
        state.producer.is_healthy(),
    );

    let body = serde_json::json!({
        "store": store_ok,
        "cache": cache_ok,
        "queue": queue_ok,
    });

    if store_ok && cache_ok && queue_ok {
        (StatusCode::OK, Json(body)).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
    }
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse { error: message.to_string() })).into_response()
}

fn scheduler_error_response(e: SchedulerError) -> Response {
    let status = match &e {
        SchedulerError::Validation(_) => StatusCode::BAD_REQUEST,
        SchedulerError::NotFound => StatusCode::NOT_FOUND,
        SchedulerError::AlreadyCanceled | SchedulerError::CannotCancel => StatusCode::BAD_REQUEST,
        SchedulerError::UrgentDeliveryFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        SchedulerError::Store(_) | SchedulerError::Cache(_) | SchedulerError::Queue(_) => {
            error!(error = %e, "internal error serving request");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(ErrorResponse { error: e.to_string() })).into_response()
}
