//! Diary API - REST server for the workout diary
//!
//! Provides cookie-based session authentication: registration, login,
//! token rotation through the session gate, logout and profile lookup.

pub mod audit;
pub mod auth;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod routes;
pub mod state;

use axum::{middleware, routing::get, Json, Router};
use diary_core::ServerConfig;
use state::AppState;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use utoipa::OpenApi;

/// OpenAPI document for the auth surface
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health_check,
        handlers::health::readiness_check,
        handlers::auth::register_handler,
        handlers::auth::login_handler,
        handlers::auth::logout_handler,
        handlers::auth::me_handler,
    ),
    components(schemas(
        error::ApiError,
        auth::service::RegisterRequest,
        auth::service::LoginRequest,
        auth::service::UserInfo,
        handlers::auth::RegisterResponse,
        handlers::auth::LoginResponse,
        handlers::auth::LogoutResponse,
        handlers::health::HealthResponse,
        handlers::health::ReadinessResponse,
    )),
    tags(
        (name = "auth", description = "Registration, login and session management"),
        (name = "health", description = "Liveness and readiness probes")
    )
)]
pub struct ApiDoc;

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Per-request deadline from `server.request_timeout_secs`
///
/// A handler that overruns it is dropped and the client receives
/// `408 Request Timeout`.
pub fn request_timeout_layer(server: &ServerConfig) -> TimeoutLayer {
    TimeoutLayer::new(Duration::from_secs(server.request_timeout_secs))
}

/// Build the full application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .route("/metrics", get(handlers::health::prometheus_metrics))
        .route("/api-docs/openapi.json", get(openapi_json))
        .nest("/api/v1", routes::api_routes(state.clone()))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::transport::transport_security_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            metrics::metrics_middleware,
        ))
        .layer(request_timeout_layer(&state.config.server))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, http::StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_request_timeout() {
        let server = ServerConfig {
            request_timeout_secs: 1,
            ..Default::default()
        };
        let app = Router::new()
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    "done"
                }),
            )
            .route("/fast", get(|| async { "done" }))
            .layer(request_timeout_layer(&server));

        let slow = app
            .clone()
            .oneshot(Request::get("/slow").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(slow.status(), StatusCode::REQUEST_TIMEOUT);

        let fast = app
            .oneshot(Request::get("/fast").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(fast.status(), StatusCode::OK);
    }
}
