//! Document HTTP Routes
//!
//! Thin mapping from HTTP to `SyncService`. Every route requires
//! `Authorization: Bearer <token>`; the resolved identity supplies the user
//! id for submissions and position reports.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::ApiError;
use super::server::AppState;
use crate::session::UserIdentity;
use crate::sync::{
    BlockDocument, BlockStep, DocumentKey, EntityId, EventsOutcome, LogEntry, PositionMetadata,
    SubmitOutcome, UserPosition,
};

// ==================
// Request/Response Types
// ==================

#[derive(Debug, Deserialize)]
pub struct SubmitStepsRequest {
    pub version: u64,
    pub steps: Vec<BlockStep>,
    pub client_id: String,
}

#[derive(Debug, Serialize)]
pub struct SubmitStepsResponse {
    pub version: u64,
    pub steps: Vec<LogEntry<BlockStep>>,
}

#[derive(Debug, Serialize)]
pub struct StaleResponse {
    pub error: String,
    pub code: String,
    pub current_version: u64,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub version: u64,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReportPositionRequest {
    #[serde(default)]
    pub entity_id: Option<EntityId>,
}

#[derive(Debug, Serialize)]
pub struct PositionAck {
    pub ok: bool,
    pub position: UserPosition,
}

#[derive(Debug, Default, Deserialize)]
pub struct PositionsQuery {
    #[serde(default)]
    pub poll: bool,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct PositionsResponse {
    pub positions: Vec<UserPosition>,
}

/// Create document routes, mounted under `/docs`
pub fn document_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/:tenant/:doc", post(create_document).get(get_snapshot))
        .route("/:tenant/:doc/steps", post(submit_steps))
        .route("/:tenant/:doc/events", get(await_events))
        .route("/:tenant/:doc/positions", post(report_position).get(poll_positions))
        .with_state(state)
}

/// Resolve the bearer credential to an identity
async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<UserIdentity, ApiError> {
    let credential = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(crate::session::SessionError::Unauthenticated)?;
    let session = state.sessions.resolve(credential).await?;
    Ok(session.identity)
}

fn timeout_from(ms: Option<u64>) -> Option<Duration> {
    ms.map(Duration::from_millis)
}

// ==================
// Handlers
// ==================

async fn create_document(
    State(state): State<Arc<AppState>>,
    Path((tenant, doc)): Path<(String, Uuid)>,
    headers: HeaderMap,
    body: Option<Json<BlockDocument>>,
) -> Result<Response, ApiError> {
    authenticate(&state, &headers).await?;
    let key = DocumentKey::new(tenant, doc);
    let document = body.map(|Json(document)| document).unwrap_or_default();
    let snapshot = state.service.create_document(&key, document).await?;
    Ok((StatusCode::CREATED, Json(snapshot)).into_response())
}

async fn get_snapshot(
    State(state): State<Arc<AppState>>,
    Path((tenant, doc)): Path<(String, Uuid)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    authenticate(&state, &headers).await?;
    let snapshot = state.service.get_snapshot(&DocumentKey::new(tenant, doc)).await?;
    Ok(Json(snapshot).into_response())
}

async fn submit_steps(
    State(state): State<Arc<AppState>>,
    Path((tenant, doc)): Path<(String, Uuid)>,
    headers: HeaderMap,
    Json(request): Json<SubmitStepsRequest>,
) -> Result<Response, ApiError> {
    let identity = authenticate(&state, &headers).await?;
    if request.client_id.trim().is_empty() {
        return Err(ApiError::BadRequest("client_id must not be empty".into()));
    }
    let key = DocumentKey::new(tenant, doc);
    let outcome = state
        .service
        .submit_steps(
            &key,
            request.version,
            request.steps,
            &request.client_id,
            identity.user_id,
        )
        .await?;

    let response = match outcome {
        SubmitOutcome::Accepted { version, steps } => {
            Json(SubmitStepsResponse { version, steps }).into_response()
        }
        SubmitOutcome::Stale { current_version } => (
            StatusCode::CONFLICT,
            Json(StaleResponse {
                error: format!("Base version {} is stale", request.version),
                code: "STALE".to_string(),
                current_version,
            }),
        )
            .into_response(),
    };
    Ok(response)
}

async fn await_events(
    State(state): State<Arc<AppState>>,
    Path((tenant, doc)): Path<(String, Uuid)>,
    Query(query): Query<EventsQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let identity = authenticate(&state, &headers).await?;
    let outcome = state
        .service
        .await_events(
            &DocumentKey::new(tenant, doc),
            query.version,
            Some(identity.user_id),
            timeout_from(query.timeout_ms),
        )
        .await?;

    let response = match outcome {
        EventsOutcome::Events(batch) => Json(batch).into_response(),
        EventsOutcome::NoNewData { .. } => StatusCode::NO_CONTENT.into_response(),
    };
    Ok(response)
}

async fn report_position(
    State(state): State<Arc<AppState>>,
    Path((tenant, doc)): Path<(String, Uuid)>,
    headers: HeaderMap,
    body: Option<Json<ReportPositionRequest>>,
) -> Result<Response, ApiError> {
    let identity = authenticate(&state, &headers).await?;
    let request = body.map(|Json(request)| request).unwrap_or_default();
    let metadata = PositionMetadata {
        entity_id: request.entity_id,
        shortname: identity.shortname,
        display_name: identity.display_name,
    };
    let position = state
        .service
        .report_position(&DocumentKey::new(tenant, doc), identity.user_id, metadata)
        .await?;
    Ok(Json(PositionAck { ok: true, position }).into_response())
}

async fn poll_positions(
    State(state): State<Arc<AppState>>,
    Path((tenant, doc)): Path<(String, Uuid)>,
    Query(query): Query<PositionsQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let identity = authenticate(&state, &headers).await?;
    let positions = state
        .service
        .poll_positions(
            &DocumentKey::new(tenant, doc),
            Some(identity.user_id),
            query.poll,
            timeout_from(query.timeout_ms),
        )
        .await?;
    Ok(Json(PositionsResponse { positions }).into_response())
}
