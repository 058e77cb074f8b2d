// HTTP API routes
//
// Each submodule owns a set of routes; all share one AppState.

pub mod common;
pub mod confirm;
pub mod executions;
pub mod subscriptions;
pub mod validation;

use std::sync::Arc;

use axum::{body::Body, http::Request, routing::get, Json, Router};
use newsletter_engine::{RedirectPolicy, SubscriptionEngine};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::openapi::ApiDoc;

pub use common::ErrorResponse;

/// App state shared across routes
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SubscriptionEngine>,
    pub redirects: Arc<RedirectPolicy>,
    /// Base URL for confirmation links when the client supplies none
    pub confirmation_endpoint: String,
}

impl AppState {
    pub fn new(
        engine: Arc<SubscriptionEngine>,
        redirects: RedirectPolicy,
        confirmation_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            redirects: Arc::new(redirects),
            confirmation_endpoint: confirmation_endpoint.into(),
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// All API routes without prefix
pub fn api_routes(state: AppState) -> Router {
    Router::new()
        .merge(subscriptions::routes(state.clone()))
        .merge(confirm::routes(state.clone()))
        .merge(executions::routes(state))
        .route("/api-doc/openapi.json", get(openapi_json))
}

/// Full application router: /health at the root, everything else under `api_prefix`
pub fn build_router(state: AppState, api_prefix: &str) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(build_router_with_prefix(api_routes(state), api_prefix))
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
}

/// Request span without the query string, which carries resumption tokens
fn request_span(request: &Request<Body>) -> tracing::Span {
    tracing::debug_span!(
        "request",
        method = %request.method(),
        path = %request.uri().path(),
    )
}

/// Build router with optional API prefix (extracted for testing)
pub fn build_router_with_prefix<S: Clone + Send + Sync + 'static>(
    api_routes: Router<S>,
    api_prefix: &str,
) -> Router<S> {
    if api_prefix.is_empty() {
        api_routes
    } else {
        Router::new().nest(api_prefix, api_routes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header, StatusCode};
    use http_body_util::BodyExt;
    use newsletter_engine::clock::ManualClock;
    use newsletter_engine::notify::InMemoryNotifier;
    use newsletter_engine::persistence::{InMemoryExecutionStore, InMemoryMembershipStore};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        notifier: Arc<InMemoryNotifier>,
        members: Arc<InMemoryMembershipStore>,
        clock: Arc<ManualClock>,
    }

    fn test_app(api_prefix: &str) -> TestApp {
        let notifier = Arc::new(InMemoryNotifier::new());
        let members = Arc::new(InMemoryMembershipStore::new());
        let clock = Arc::new(ManualClock::default());

        let engine = SubscriptionEngine::new(
            Arc::new(InMemoryExecutionStore::new()),
            members.clone(),
            notifier.clone(),
        )
        .with_clock(clock.clone());

        let state = AppState::new(
            Arc::new(engine),
            RedirectPolicy::default(),
            "http://localhost:9000/confirm",
        );

        TestApp {
            router: build_router(state, api_prefix),
            notifier,
            members,
            clock,
        }
    }

    async fn post_json(router: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    async fn get(router: &Router, uri: &str) -> axum::response::Response {
        router
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    fn location(response: &axum::response::Response) -> &str {
        response
            .headers()
            .get(header::LOCATION)
            .unwrap()
            .to_str()
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = test_app("/api");

        let response = get(&app.router, "/health").await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn test_subscribe_then_confirm_link() {
        let app = test_app("");

        let (status, body) = post_json(
            &app.router,
            "/subscribe",
            json!({ "email": "a@x.com" }),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["ok"], true);
        assert_eq!(body["admissible"], true);
        assert_eq!(body["state"], "suspended");
        assert_eq!(body["notificationFailed"], false);

        let sent = app.notifier.last().unwrap();
        assert!(sent
            .confirmation_url
            .starts_with("http://localhost:9000/confirm?token="));

        let token = app.notifier.last_token().unwrap();
        let response = get(&app.router, &format!("/confirm?token={}", token)).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/subscribed");
        assert!(app.members.contains("a@x.com"));

        // Second click on the same link
        let response = get(&app.router, &format!("/confirm?token={}", token)).await;
        assert_eq!(location(&response), "/invalid-link");
    }

    #[tokio::test]
    async fn test_custom_confirmation_endpoint() {
        let app = test_app("");

        post_json(
            &app.router,
            "/subscribe",
            json!({
                "email": "a@x.com",
                "confirmationEndpoint": "https://news.example.com/landing"
            }),
        )
        .await;

        let sent = app.notifier.last().unwrap();
        assert!(sent
            .confirmation_url
            .starts_with("https://news.example.com/landing?token="));
    }

    #[tokio::test]
    async fn test_unsubscribe_when_not_member() {
        let app = test_app("");

        let (status, body) = post_json(
            &app.router,
            "/unsubscribe",
            json!({ "email": "a@x.com" }),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["admissible"], false);
        assert_eq!(body["state"], "discarded");
        assert_eq!(app.notifier.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribe_rejects_invalid_email() {
        let app = test_app("");

        let (status, body) = post_json(
            &app.router,
            "/subscribe",
            json!({ "email": "not-an-email" }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["ok"], false);
    }

    #[tokio::test]
    async fn test_subscribe_rejects_invalid_confirmation_endpoint() {
        let app = test_app("");

        let (status, _) = post_json(
            &app.router,
            "/subscribe",
            json!({ "email": "a@x.com", "confirmationEndpoint": "not a url" }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_confirm_post_json() {
        let app = test_app("");

        post_json(&app.router, "/subscribe", json!({ "email": "a@x.com" })).await;
        let token = app.notifier.last_token().unwrap();

        let (status, body) =
            post_json(&app.router, "/confirm", json!({ "token": token })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "completed");
        assert_eq!(body["intent"], "join");

        let (status, body) =
            post_json(&app.router, "/confirm", json!({ "token": token })).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["ok"], false);
    }

    #[tokio::test]
    async fn test_late_confirm_link_redirects_to_expired() {
        let app = test_app("");

        post_json(&app.router, "/subscribe", json!({ "email": "a@x.com" })).await;
        let token = app.notifier.last_token().unwrap();

        app.clock.advance(chrono::Duration::days(2));

        let response = get(&app.router, &format!("/confirm?token={}", token)).await;
        assert_eq!(location(&response), "/link-expired");
        assert!(!app.members.contains("a@x.com"));
    }

    #[tokio::test]
    async fn test_confirm_link_store_outage_redirects_to_retry() {
        let app = test_app("");

        post_json(&app.router, "/subscribe", json!({ "email": "a@x.com" })).await;
        let token = app.notifier.last_token().unwrap();

        app.members.set_unavailable(true);
        let response = get(&app.router, &format!("/confirm?token={}", token)).await;
        assert_eq!(location(&response), "/try-again-later");

        app.members.set_unavailable(false);
        let response = get(&app.router, &format!("/confirm?token={}", token)).await;
        assert_eq!(location(&response), "/subscribed");
    }

    #[tokio::test]
    async fn test_confirm_link_without_token() {
        let app = test_app("");

        let response = get(&app.router, "/confirm").await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/invalid-link");
    }

    /// Collects formatted log output in memory
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<std::sync::Mutex<Vec<u8>>>);

    impl LogBuffer {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_confirm_link_token_stays_out_of_logs() {
        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let app = test_app("");
        post_json(&app.router, "/subscribe", json!({ "email": "a@x.com" })).await;
        let token = app.notifier.last_token().unwrap();

        let response = get(&app.router, &format!("/confirm?token={}", token)).await;
        assert_eq!(location(&response), "/subscribed");

        let logs = buffer.contents();
        assert!(logs.contains("path=/confirm"));
        assert!(!logs.contains(&token));
    }

    #[tokio::test]
    async fn test_get_execution_with_history() {
        let app = test_app("");

        let (_, body) =
            post_json(&app.router, "/subscribe", json!({ "email": "a@x.com" })).await;
        let execution_id = body["executionId"].as_str().unwrap().to_string();

        let response = get(&app.router, &format!("/executions/{}", execution_id)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["email"], "a@x.com");
        assert_eq!(json["state"], "suspended");
        assert_eq!(json["expired"], false);
        assert_eq!(json["history"][0]["eventType"], "created");

        let response = get(&app.router, &format!("/executions/{}", uuid::Uuid::now_v7())).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_openapi_json() {
        let app = test_app("");

        let response = get(&app.router, "/api-doc/openapi.json").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_api_prefix_applies_to_routes_but_not_health() {
        let app = test_app("/api");

        let (status, _) =
            post_json(&app.router, "/api/subscribe", json!({ "email": "a@x.com" })).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let (status, _) =
            post_json(&app.router, "/subscribe", json!({ "email": "b@x.com" })).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let response = get(&app.router, "/health").await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
