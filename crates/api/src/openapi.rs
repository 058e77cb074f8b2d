// OpenAPI specification generation
//
// Served at /api-doc/openapi.json and exported by the export-openapi binary.

use crate::api;
use utoipa::OpenApi;

/// OpenAPI documentation for the Newsletter API
#[derive(OpenApi)]
#[openapi(
    paths(
        api::subscriptions::subscribe,
        api::subscriptions::unsubscribe,
        api::confirm::confirm_link,
        api::confirm::confirm,
        api::executions::get_execution,
    ),
    components(
        schemas(
            api::common::ErrorResponse,
            api::subscriptions::SubscriptionRequestBody,
            api::subscriptions::SubscriptionResponse,
            api::confirm::ConfirmRequest,
            api::confirm::ConfirmResponse,
            api::executions::ExecutionResponse,
            api::executions::HistoryEntry,
        )
    ),
    tags(
        (name = "subscriptions", description = "Join and leave requests"),
        (name = "confirmations", description = "Confirmation link handling"),
        (name = "executions", description = "Execution inspection")
    ),
    info(
        title = "Newsletter API",
        version = "0.1.0",
        description = "Confirmation-gated newsletter subscriptions",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
pub struct ApiDoc;

impl ApiDoc {
    /// Generate the OpenAPI spec as a pretty-printed JSON string
    pub fn to_json() -> Result<String, serde_json::Error> {
        Self::openapi().to_pretty_json()
    }
}
