//! Security audit logging for authentication events
//!
//! All audit events are logged at INFO level (WARN for rejections) with the
//! "audit" target, so they can be filtered and routed separately from
//! application logs. Tokens and passwords never appear in audit records.
//!
//! # Example
//!
//! ```ignore
//! use diary_api::audit::{AuditEvent, audit_log};
//!
//! audit_log(&AuditEvent::LoginSuccess {
//!     user_id: 42,
//!     username: "alice".to_string(),
//!     ip_address: Some("192.168.1.1".to_string()),
//!     user_agent: Some("Mozilla/5.0...".to_string()),
//! });
//! ```
//!
//! Author: hephaex@gmail.com

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Security audit events for authentication and session handling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Successful user login
    LoginSuccess {
        user_id: i64,
        username: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    /// Failed login attempt
    LoginFailure {
        username: String,
        reason: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    /// Successful user registration
    RegistrationSuccess {
        user_id: i64,
        username: String,
        ip_address: Option<String>,
    },

    /// Failed registration attempt
    RegistrationFailure {
        username: String,
        reason: String,
        ip_address: Option<String>,
    },

    /// User logout
    Logout {
        user_id: i64,
        ip_address: Option<String>,
    },

    /// Session continued with a rotated token pair
    TokenRotated {
        user_id: i64,
        ip_address: Option<String>,
    },

    /// Session gate refused the request
    SessionRejected {
        ip_address: Option<String>,
        user_agent: Option<String>,
        path: String,
    },

    /// Credentials submitted over an unacceptable connection
    InsecureTransport {
        path: String,
        reason: String,
        ip_address: Option<String>,
    },

    /// Token revoked by an operator
    TokenRevoked { user_id: i64, kind: String },

    /// Expired blacklist entries removed
    BlacklistSwept { removed: u64 },
}

/// Log a security audit event with structured fields
///
/// The event is also serialized to JSON in the `event` field for log
/// aggregators. Example output:
///
/// ```json
/// {
///   "event_type": "login_success",
///   "user_id": 42,
///   "username": "alice",
///   "ip_address": "192.168.1.1",
///   "user_agent": "Mozilla/5.0..."
/// }
/// ```
pub fn audit_log(event: &AuditEvent) {
    let timestamp = Utc::now();

    let event_json = serde_json::to_string(event)
        .unwrap_or_else(|e| format!("{{\"error\":\"Failed to serialize audit event: {e}\"}}"));

    match event {
        AuditEvent::LoginSuccess {
            user_id,
            username,
            ip_address,
            ..
        } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                user_id = %user_id,
                username = %username,
                ip_address = ?ip_address,
                "Login successful"
            );
        }
        AuditEvent::LoginFailure {
            username,
            reason,
            ip_address,
            ..
        } => {
            warn!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                username = %username,
                reason = %reason,
                ip_address = ?ip_address,
                "Login failed"
            );
        }
        AuditEvent::RegistrationSuccess {
            user_id,
            username,
            ip_address,
        } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                user_id = %user_id,
                username = %username,
                ip_address = ?ip_address,
                "Registration successful"
            );
        }
        AuditEvent::RegistrationFailure {
            username,
            reason,
            ip_address,
        } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                username = %username,
                reason = %reason,
                ip_address = ?ip_address,
                "Registration failed"
            );
        }
        AuditEvent::Logout {
            user_id,
            ip_address,
        } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                user_id = %user_id,
                ip_address = ?ip_address,
                "User logout"
            );
        }
        AuditEvent::TokenRotated {
            user_id,
            ip_address,
        } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                user_id = %user_id,
                ip_address = ?ip_address,
                "Session tokens rotated"
            );
        }
        AuditEvent::SessionRejected {
            ip_address, path, ..
        } => {
            warn!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                path = %path,
                ip_address = ?ip_address,
                "Session rejected"
            );
        }
        AuditEvent::InsecureTransport {
            path,
            reason,
            ip_address,
        } => {
            warn!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                path = %path,
                reason = %reason,
                ip_address = ?ip_address,
                "Credentials sent over insecure transport"
            );
        }
        AuditEvent::TokenRevoked { user_id, kind } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                user_id = %user_id,
                kind = %kind,
                "Token revoked"
            );
        }
        AuditEvent::BlacklistSwept { removed } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                removed = %removed,
                "Blacklist swept"
            );
        }
    }
}

/// Extract the client IP address from proxy headers
///
/// Checks X-Forwarded-For, then X-Real-IP.
pub fn extract_ip_address(headers: &axum::http::HeaderMap) -> Option<String> {
    // Take the first IP in the chain (client IP)
    if let Some(first_ip) = headers
        .get("x-forwarded-for")
        .and_then(|xff| xff.to_str().ok())
        .and_then(|xff| xff.split(',').next())
    {
        return Some(first_ip.trim().to_string());
    }

    headers
        .get("x-real-ip")
        .and_then(|ip| ip.to_str().ok())
        .map(|ip| ip.to_string())
}

/// Extract user agent from request headers
pub fn extract_user_agent(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|ua| ua.to_str().ok())
        .map(|s| s.to_string())
}
