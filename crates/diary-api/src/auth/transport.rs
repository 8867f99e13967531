//! Secure transport checks for credential submission
//!
//! TLS is terminated in front of the server. The terminator reports the
//! client connection through `X-Forwarded-Proto` and `X-Forwarded-Tls-Version`;
//! `transport_security_middleware` turns those headers into a
//! [`TransportSecurity`] request extension that handlers check with
//! [`TransportPolicy::check`].

use crate::error::AppError;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use diary_core::{ConfigError, TransportConfig};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub const FORWARDED_PROTO: &str = "x-forwarded-proto";
pub const FORWARDED_TLS_VERSION: &str = "x-forwarded-tls-version";

/// Negotiated TLS protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    Tls10,
    Tls11,
    Tls12,
    Tls13,
}

impl FromStr for TlsVersion {
    type Err = String;

    /// Accepts "1.2", "TLSv1.2", "tls1.2" and "TLS 1.2" forms
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let version = lower
            .strip_prefix("tlsv")
            .or_else(|| lower.strip_prefix("tls"))
            .unwrap_or(lower.as_str())
            .trim();

        match version {
            "1.0" => Ok(TlsVersion::Tls10),
            "1.1" => Ok(TlsVersion::Tls11),
            "1.2" => Ok(TlsVersion::Tls12),
            "1.3" => Ok(TlsVersion::Tls13),
            _ => Err(format!("unknown TLS version: {s}")),
        }
    }
}

impl fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = match self {
            TlsVersion::Tls10 => "1.0",
            TlsVersion::Tls11 => "1.1",
            TlsVersion::Tls12 => "1.2",
            TlsVersion::Tls13 => "1.3",
        };
        write!(f, "TLS {v}")
    }
}

/// What is known about the client connection of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransportSecurity {
    pub encrypted: bool,
    pub tls_version: Option<TlsVersion>,
}

impl TransportSecurity {
    pub fn plaintext() -> Self {
        Self::default()
    }

    pub fn tls(version: TlsVersion) -> Self {
        Self {
            encrypted: true,
            tls_version: Some(version),
        }
    }

    /// Read the forwarded headers set by the TLS terminator
    pub fn from_forwarded_headers(headers: &HeaderMap) -> Self {
        let encrypted = headers
            .get(FORWARDED_PROTO)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|proto| proto.trim().eq_ignore_ascii_case("https"))
            .unwrap_or(false);

        let tls_version = headers
            .get(FORWARDED_TLS_VERSION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());

        Self {
            encrypted,
            tls_version: if encrypted { tls_version } else { None },
        }
    }
}

/// Policy for endpoints that receive credentials
#[derive(Debug, Clone)]
pub struct TransportPolicy {
    pub require_secure: bool,
    pub min_version: TlsVersion,
    pub trust_forwarded_headers: bool,
}

impl TransportPolicy {
    pub fn from_config(config: &TransportConfig) -> Result<Self, ConfigError> {
        let min_version = config
            .min_tls_version
            .parse()
            .map_err(|_: String| ConfigError::InvalidValue {
                key: "transport.min_tls_version".to_string(),
                value: config.min_tls_version.clone(),
            })?;

        Ok(Self {
            require_secure: config.require_secure,
            min_version,
            trust_forwarded_headers: config.trust_forwarded_headers,
        })
    }

    /// Reject a request whose connection is unencrypted or below the minimum version
    ///
    /// A connection marked encrypted without a reported version is rejected.
    pub fn check(&self, transport: Option<&TransportSecurity>) -> Result<(), AppError> {
        if !self.require_secure {
            return Ok(());
        }

        let transport = transport.copied().unwrap_or_default();
        if !transport.encrypted {
            return Err(AppError::InsecureTransport(
                "HTTPS connection required".to_string(),
            ));
        }

        match transport.tls_version {
            Some(version) if version >= self.min_version => Ok(()),
            _ => Err(AppError::InsecureTransport(format!(
                "{} or higher required",
                self.min_version
            ))),
        }
    }
}

/// Attach [`TransportSecurity`] to every request
///
/// Without trusted forwarding headers the connection counts as plaintext,
/// since the server itself only speaks HTTP.
pub async fn transport_security_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let transport = if state.transport.trust_forwarded_headers {
        TransportSecurity::from_forwarded_headers(request.headers())
    } else {
        TransportSecurity::plaintext()
    };

    request.extensions_mut().insert(transport);
    next.run(request).await
}
