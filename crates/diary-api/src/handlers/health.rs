//! Health check handlers
//!
//! Author: hephaex@gmail.com

use crate::state::AppState;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use utoipa::ToSchema;

/// Health check response
#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub environment: String,
}

/// Liveness probe - basic health check
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Service is alive", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        environment: state.config.env.to_string(),
    })
}

/// Readiness response
#[derive(Serialize, ToSchema)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub database: bool,
}

/// Readiness probe - checks the credential store
#[utoipa::path(
    get,
    path = "/ready",
    tag = "health",
    responses(
        (status = 200, description = "Service is ready", body = ReadinessResponse),
        (status = 503, description = "Service not ready", body = ReadinessResponse)
    )
)]
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let database = match state.store.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            false
        }
    };

    let response = ReadinessResponse {
        ready: database,
        database,
    };

    if database {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

fn counter(output: &mut String, name: &str, help: &str, value: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} counter");
    let _ = writeln!(output, "{name} {value}\n");
}

fn load(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

/// Prometheus-compatible metrics endpoint
pub async fn prometheus_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let metrics = &state.metrics;
    let auth = &metrics.auth;
    let mut output = String::new();

    output.push_str("# HELP diary_uptime_seconds Time since server start\n");
    output.push_str("# TYPE diary_uptime_seconds gauge\n");
    let _ = writeln!(output, "diary_uptime_seconds {}\n", state.uptime_secs());

    output.push_str("# HELP diary_build_info Build information\n");
    output.push_str("# TYPE diary_build_info gauge\n");
    let _ = writeln!(
        output,
        "diary_build_info{{version=\"{}\"}} 1\n",
        env!("CARGO_PKG_VERSION")
    );

    counter(
        &mut output,
        "diary_requests_total",
        "Total number of HTTP requests",
        metrics.request_count(),
    );
    counter(
        &mut output,
        "diary_logins_total",
        "Successful logins",
        load(&auth.logins_ok),
    );
    counter(
        &mut output,
        "diary_login_failures_total",
        "Rejected login attempts",
        load(&auth.logins_failed),
    );
    counter(
        &mut output,
        "diary_registrations_total",
        "Registered users",
        load(&auth.registrations),
    );
    counter(
        &mut output,
        "diary_token_rotations_total",
        "Sessions continued with a rotated token pair",
        load(&auth.rotations),
    );
    counter(
        &mut output,
        "diary_sessions_rejected_total",
        "Requests refused by the session gate",
        load(&auth.sessions_rejected),
    );
    counter(
        &mut output,
        "diary_blacklist_swept_total",
        "Expired blacklist entries removed",
        state.auth.blacklist().swept_total(),
    );

    // Per-endpoint metrics
    let endpoints = metrics.endpoints().await;

    output.push_str("# HELP diary_http_requests_total HTTP requests by endpoint and status\n");
    output.push_str("# TYPE diary_http_requests_total counter\n");
    for (endpoint, endpoint_metrics) in &endpoints {
        let mut statuses: Vec<_> = endpoint_metrics.status_counts.iter().collect();
        statuses.sort();
        for (status, count) in statuses {
            let _ = writeln!(
                output,
                "diary_http_requests_total{{endpoint=\"{endpoint}\",status=\"{status}\"}} {count}"
            );
        }
    }
    output.push('\n');

    output.push_str("# HELP diary_http_request_duration_seconds HTTP request latency\n");
    output.push_str("# TYPE diary_http_request_duration_seconds summary\n");
    for (endpoint, endpoint_metrics) in &endpoints {
        let sum_s = endpoint_metrics.total_latency_us as f64 / 1_000_000.0;
        let _ = writeln!(
            output,
            "diary_http_request_duration_seconds_sum{{endpoint=\"{endpoint}\"}} {sum_s:.6}"
        );
        let _ = writeln!(
            output,
            "diary_http_request_duration_seconds_count{{endpoint=\"{endpoint}\"}} {}",
            endpoint_metrics.latency_count
        );
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        output,
    )
}
