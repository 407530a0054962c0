use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{FromRequestParts, Path, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use chrono::{Local, NaiveDate, NaiveDateTime};
use serde::Deserialize;
use serde_json::Value;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use dayplan_core::collab::AnchorProvider;
use dayplan_core::domain::{Anchor, PlanInput};
use dayplan_core::schedule::builder::parse_energy_state;
use dayplan_core::store::PlanStore;
use dayplan_core::{PlanError, PlanService, SchedulerConfig};

use crate::plan_cmds::parse_clock;

/// Header carrying the authenticated caller.
pub const USER_HEADER: &str = "x-user-id";

/// Source of "now" in the user's local frame.
pub type Clock = fn() -> NaiveDateTime;

fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    pub fn bad_request(code: &'static str, msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code,
            message: msg.into(),
        }
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            code: "MISSING_USER",
            message: msg.into(),
        }
    }
}

impl From<PlanError> for AppError {
    fn from(err: PlanError) -> Self {
        let status = if err.is_not_found() {
            StatusCode::NOT_FOUND
        } else if err.is_client_error() {
            StatusCode::BAD_REQUEST
        } else if matches!(err, PlanError::DuplicatePlanRace { .. }) {
            StatusCode::CONFLICT
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        if status.is_server_error() {
            tracing::error!(error = %err, code = err.code(), "request failed");
        }
        Self {
            status,
            code: err.code(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message, "code": self.code });
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Caller identity
// ---------------------------------------------------------------------------

/// The caller, from the [`USER_HEADER`] set by the fronting auth proxy.
pub struct UserId(pub String);

impl<S: Send + Sync> FromRequestParts<S> for UserId {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Self(v.to_owned()))
            .ok_or_else(|| AppError::unauthorized(format!("missing {USER_HEADER} header")))
    }
}

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    /// Defaults to today.
    #[serde(default)]
    pub date: Option<NaiveDate>,
    pub wake_time: String,
    pub sleep_time: String,
    pub energy_state: String,
    #[serde(default)]
    pub manual_anchor: Option<Anchor>,
    #[serde(default)]
    pub current_location: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReorderRequest {
    pub source_step_id: String,
    pub target_step_id: String,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct AppState {
    service: Arc<PlanService>,
    clock: Clock,
}

pub fn build_router(service: Arc<PlanService>, clock: Clock) -> Router {
    Router::new()
        .route("/api/plans/today", get(get_today))
        .route("/api/plans/generate", post(generate_plan))
        .route("/api/plans/{date}", get(get_plan_for_date))
        .route("/api/plans/{date}/reorder", post(reorder_step))
        .route("/api/time-blocks/{id}/metadata", patch(merge_block_metadata))
        .layer(CorsLayer::permissive())
        .with_state(AppState { service, clock })
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(
    anchors: Arc<dyn AnchorProvider>,
    store: Arc<dyn PlanStore>,
    scheduler: &SchedulerConfig,
    bind: &str,
    port: u16,
) -> Result<()> {
    let service = Arc::new(PlanService::with_default_estimators(anchors, store, scheduler));
    let app = build_router(service, local_now);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    tracing::info!("dayplan serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("dayplan serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for Ctrl+C; stop the process to shut down");
        std::future::pending::<()>().await;
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_today(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> Result<axum::response::Response, AppError> {
    let date = (state.clock)().date();
    read_plan(&state, &user_id, date).await
}

async fn get_plan_for_date(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(date): Path<NaiveDate>,
) -> Result<axum::response::Response, AppError> {
    read_plan(&state, &user_id, date).await
}

async fn read_plan(
    state: &AppState,
    user_id: &str,
    date: NaiveDate,
) -> Result<axum::response::Response, AppError> {
    let plan = state
        .service
        .get_plan(user_id, date)
        .await?
        .ok_or_else(|| PlanError::PlanNotFound {
            user_id: user_id.to_owned(),
            date,
        })?;
    Ok(Json(plan).into_response())
}

async fn generate_plan(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(req): Json<GenerateRequest>,
) -> Result<axum::response::Response, AppError> {
    let now = (state.clock)();
    let wake_time = parse_clock(&req.wake_time)
        .map_err(|e| AppError::bad_request("INVALID_TIME", format!("wake_time: {e}")))?;
    let sleep_time = parse_clock(&req.sleep_time)
        .map_err(|e| AppError::bad_request("INVALID_TIME", format!("sleep_time: {e}")))?;
    let input = PlanInput {
        user_id,
        date: req.date.unwrap_or(now.date()),
        wake_time,
        sleep_time,
        energy_state: parse_energy_state(&req.energy_state)?,
        manual_anchor: req.manual_anchor,
        now,
    };

    let plan = state
        .service
        .generate(&input, req.current_location.as_deref())
        .await?;
    Ok(Json(plan).into_response())
}

async fn reorder_step(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(date): Path<NaiveDate>,
    Json(req): Json<ReorderRequest>,
) -> Result<axum::response::Response, AppError> {
    let plan = state
        .service
        .reorder_step(&user_id, date, &req.source_step_id, &req.target_step_id)
        .await?;
    Ok(Json(plan).into_response())
}

async fn merge_block_metadata(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<Uuid>,
    Json(patch): Json<Value>,
) -> Result<axum::response::Response, AppError> {
    let block = state
        .service
        .merge_block_metadata(&user_id, id, &patch)
        .await?;
    Ok(Json(block).into_response())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
