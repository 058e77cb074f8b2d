// Confirmation HTTP routes
//
// GET is what the emailed link hits and always answers with a redirect.
// POST is the same operation for programmatic clients and answers with JSON.

use super::common::{engine_error, ApiError, ErrorResponse};
use super::AppState;
use axum::{
    extract::{Query, State},
    response::Redirect,
    routing::get,
    Json, Router,
};
use newsletter_engine::{EngineError, ResumeSignal, TerminalResult};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

#[derive(Debug, Deserialize, IntoParams)]
pub struct ConfirmQuery {
    /// Token from the confirmation link
    pub token: Option<String>,
}

/// Request body for POST /confirm.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ConfirmRequest {
    pub token: String,
}

/// Outcome of a confirmation.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmResponse {
    pub ok: bool,
    pub execution_id: Uuid,
    /// "completed" or "expired"
    #[schema(example = "completed")]
    pub outcome: String,
    /// "join" or "leave"
    #[schema(example = "join")]
    pub intent: String,
}

impl From<TerminalResult> for ConfirmResponse {
    fn from(result: TerminalResult) -> Self {
        Self {
            ok: true,
            execution_id: result.execution_id,
            outcome: result.outcome.to_string(),
            intent: result.intent.to_string(),
        }
    }
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/confirm", get(confirm_link).post(confirm))
        .with_state(state)
}

/// GET /confirm?token=... - Follow a confirmation link
#[utoipa::path(
    get,
    path = "/confirm",
    params(ConfirmQuery),
    responses(
        (status = 303, description = "Redirect to the landing page for the outcome")
    ),
    tag = "confirmations"
)]
pub async fn confirm_link(
    State(state): State<AppState>,
    Query(query): Query<ConfirmQuery>,
) -> Redirect {
    let Some(token) = query.token.filter(|t| !t.is_empty()) else {
        return Redirect::to(&state.redirects.invalid_link);
    };

    match state.engine.resume(&token, ResumeSignal::Confirmed).await {
        Ok(result) => Redirect::to(state.redirects.destination(result.outcome, result.intent)),
        Err(e) => {
            match &e {
                EngineError::StoreUnavailable(source) => {
                    tracing::error!("Confirmation failed, store unavailable: {}", source);
                }
                EngineError::Internal(detail) => {
                    tracing::error!("Confirmation failed: {}", detail);
                }
                _ => {}
            }
            Redirect::to(state.redirects.destination_for_error(&e))
        }
    }
}

/// POST /confirm - Confirm a pending request
#[utoipa::path(
    post,
    path = "/confirm",
    request_body = ConfirmRequest,
    responses(
        (status = 200, description = "Request resolved (completed or expired)", body = ConfirmResponse),
        (status = 409, description = "Token unknown or already used", body = ErrorResponse),
        (status = 503, description = "Store unavailable; the token stays valid", body = ErrorResponse)
    ),
    tag = "confirmations"
)]
pub async fn confirm(
    State(state): State<AppState>,
    Json(req): Json<ConfirmRequest>,
) -> Result<Json<ConfirmResponse>, ApiError> {
    let result = state
        .engine
        .resume(&req.token, ResumeSignal::Confirmed)
        .await
        .map_err(engine_error)?;

    Ok(Json(result.into()))
}
