// Subscription HTTP routes (join/leave requests)

use super::common::{engine_error, ApiError, ErrorResponse};
use super::validation::validate_email;
use super::AppState;
use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use chrono::{DateTime, Utc};
use newsletter_engine::{ExecutionHandle, Intent, NotificationStatus, SubscriptionRequest};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Request body for subscribe/unsubscribe.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRequestBody {
    /// Address to add to or remove from the list.
    #[schema(example = "myname@example.com")]
    pub email: String,
    /// Base URL for the confirmation link. Defaults to the server's confirm endpoint.
    #[serde(default)]
    pub confirmation_endpoint: Option<String>,
}

/// Response for subscribe/unsubscribe.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionResponse {
    pub ok: bool,
    pub execution_id: Uuid,
    /// False when the request changes nothing (already subscribed / not subscribed).
    pub admissible: bool,
    #[schema(example = "suspended")]
    pub state: String,
    /// Deadline of the confirmation link, if one was issued.
    pub expires_at: Option<DateTime<Utc>>,
    /// True when the confirmation email could not be handed off.
    pub notification_failed: bool,
}

impl From<ExecutionHandle> for SubscriptionResponse {
    fn from(handle: ExecutionHandle) -> Self {
        Self {
            ok: true,
            execution_id: handle.execution_id,
            admissible: handle.admissible,
            state: handle.state.to_string(),
            expires_at: handle.expires_at,
            notification_failed: matches!(handle.notification, NotificationStatus::Failed { .. }),
        }
    }
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/subscribe", post(subscribe))
        .route("/unsubscribe", post(unsubscribe))
        .with_state(state)
}

/// POST /subscribe - Request to join the list
#[utoipa::path(
    post,
    path = "/subscribe",
    request_body = SubscriptionRequestBody,
    responses(
        (status = 202, description = "Request accepted; confirmation email sent if admissible", body = SubscriptionResponse),
        (status = 400, description = "Invalid email or confirmation endpoint", body = ErrorResponse),
        (status = 503, description = "Store unavailable", body = ErrorResponse)
    ),
    tag = "subscriptions"
)]
pub async fn subscribe(
    State(state): State<AppState>,
    Json(req): Json<SubscriptionRequestBody>,
) -> Result<(StatusCode, Json<SubscriptionResponse>), ApiError> {
    start(&state, req, Intent::Join).await
}

/// POST /unsubscribe - Request to leave the list
#[utoipa::path(
    post,
    path = "/unsubscribe",
    request_body = SubscriptionRequestBody,
    responses(
        (status = 202, description = "Request accepted; confirmation email sent if admissible", body = SubscriptionResponse),
        (status = 400, description = "Invalid email or confirmation endpoint", body = ErrorResponse),
        (status = 503, description = "Store unavailable", body = ErrorResponse)
    ),
    tag = "subscriptions"
)]
pub async fn unsubscribe(
    State(state): State<AppState>,
    Json(req): Json<SubscriptionRequestBody>,
) -> Result<(StatusCode, Json<SubscriptionResponse>), ApiError> {
    start(&state, req, Intent::Leave).await
}

async fn start(
    state: &AppState,
    req: SubscriptionRequestBody,
    intent: Intent,
) -> Result<(StatusCode, Json<SubscriptionResponse>), ApiError> {
    let email = validate_email(&req.email)
        .map_err(|e| ErrorResponse::new(e.to_string()).into_response(StatusCode::BAD_REQUEST))?;

    let callback_base = req
        .confirmation_endpoint
        .filter(|endpoint| !endpoint.trim().is_empty())
        .unwrap_or_else(|| state.confirmation_endpoint.clone());

    let handle = state
        .engine
        .start(SubscriptionRequest::new(email, intent, callback_base))
        .await
        .map_err(engine_error)?;

    Ok((StatusCode::ACCEPTED, Json(handle.into())))
}
