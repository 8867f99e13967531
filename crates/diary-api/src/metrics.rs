//! Metrics tracking middleware and counters
//!
//! Tracks request counts, status codes and latency per route, plus
//! authentication counters, for the Prometheus text endpoint.
//!
//! Author: hephaex@gmail.com

use crate::state::AppState;
use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Per-endpoint request statistics
#[derive(Debug, Clone, Default)]
pub struct EndpointMetrics {
    pub status_counts: HashMap<u16, u64>,
    pub total_latency_us: u64,
    pub latency_count: u64,
    pub max_latency_us: u64,
}

/// Authentication counters
#[derive(Debug, Default)]
pub struct AuthCounters {
    pub logins_ok: AtomicU64,
    pub logins_failed: AtomicU64,
    pub registrations: AtomicU64,
    pub rotations: AtomicU64,
    pub sessions_rejected: AtomicU64,
}

impl AuthCounters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// All counters exposed on `/metrics`
#[derive(Debug, Default)]
pub struct Metrics {
    pub request_count: AtomicU64,
    pub auth: AuthCounters,
    endpoints: RwLock<HashMap<String, EndpointMetrics>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    /// Record one finished request
    pub async fn record_request(&self, endpoint: String, status: u16, latency_us: u64) {
        self.request_count.fetch_add(1, Ordering::Relaxed);

        let mut endpoints = self.endpoints.write().await;
        let entry = endpoints.entry(endpoint).or_default();
        *entry.status_counts.entry(status).or_insert(0) += 1;
        entry.total_latency_us += latency_us;
        entry.latency_count += 1;
        entry.max_latency_us = entry.max_latency_us.max(latency_us);
    }

    /// Snapshot of per-endpoint statistics, sorted by endpoint
    pub async fn endpoints(&self) -> Vec<(String, EndpointMetrics)> {
        let endpoints = self.endpoints.read().await;
        let mut snapshot: Vec<_> = endpoints
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        snapshot.sort_by(|a, b| a.0.cmp(&b.0));
        snapshot
    }
}

/// Label for requests that matched no route
pub const UNMATCHED_ENDPOINT: &str = "unmatched";

/// Metrics tracking middleware
///
/// Records request count, latency and status code per route template, so
/// the endpoint set is bounded by the router rather than by clients.
pub async fn metrics_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let endpoint = endpoint_label(
        request
            .extensions()
            .get::<MatchedPath>()
            .map(MatchedPath::as_str),
    );

    let response = next.run(request).await;

    let latency_us = start.elapsed().as_micros() as u64;
    state
        .metrics
        .record_request(endpoint, response.status().as_u16(), latency_us)
        .await;

    response
}

fn endpoint_label(matched: Option<&str>) -> String {
    matched.unwrap_or(UNMATCHED_ENDPOINT).to_string()
}
