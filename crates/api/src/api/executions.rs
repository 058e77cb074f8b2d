// Execution inspection routes

use super::common::{engine_error, ApiError, ErrorResponse};
use super::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// One entry of an execution's history.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub sequence: i32,
    #[schema(example = "suspended")]
    pub event_type: String,
    /// Full event payload.
    pub event: serde_json::Value,
}

/// Current state and history of an execution.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResponse {
    pub id: Uuid,
    pub email: String,
    #[schema(example = "join")]
    pub intent: String,
    #[schema(example = "suspended")]
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    /// True when a deadline exists and has passed.
    pub expired: bool,
    pub history: Vec<HistoryEntry>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/executions/:execution_id", get(get_execution))
        .with_state(state)
}

/// GET /executions/{execution_id} - Get execution state and history
#[utoipa::path(
    get,
    path = "/executions/{execution_id}",
    params(
        ("execution_id" = Uuid, Path, description = "Execution ID")
    ),
    responses(
        (status = 200, description = "Execution found", body = ExecutionResponse),
        (status = 404, description = "Execution not found", body = ErrorResponse),
        (status = 503, description = "Store unavailable", body = ErrorResponse)
    ),
    tag = "executions"
)]
pub async fn get_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<Uuid>,
) -> Result<Json<ExecutionResponse>, ApiError> {
    let execution = state
        .engine
        .get_execution(execution_id)
        .await
        .map_err(engine_error)?;
    let events = state
        .engine
        .history(execution_id)
        .await
        .map_err(engine_error)?;

    let history = events
        .into_iter()
        .map(|(sequence, event)| {
            let event_type = event.type_name().to_string();
            serde_json::to_value(&event)
                .map(|event| HistoryEntry {
                    sequence,
                    event_type,
                    event,
                })
                .map_err(|e| {
                    tracing::error!("Failed to serialize execution event: {}", e);
                    ErrorResponse::new("Internal server error")
                        .into_response(StatusCode::INTERNAL_SERVER_ERROR)
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(ExecutionResponse {
        id: execution.id,
        expired: state.engine.is_expired(&execution),
        email: execution.request.identity,
        intent: execution.request.intent.to_string(),
        state: execution.state.to_string(),
        created_at: execution.created_at,
        updated_at: execution.updated_at,
        expires_at: execution.expires_at,
        history,
    }))
}
