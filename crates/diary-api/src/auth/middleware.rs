/// Session gate middleware for protecting routes
///
/// Reads the session cookies, runs `AuthService::authenticate_session` and,
/// on success, adds [`AuthenticatedUser`] to request extensions. When the
/// refresh token was used, the rotated pair is set on the response.
use super::cookies::{append_set_cookies, session_tokens, sets_session_cookie};
use super::service::SessionTokens;
use crate::audit::{audit_log, extract_ip_address, extract_user_agent, AuditEvent};
use crate::error::AppError;
use crate::metrics::AuthCounters;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Authenticated user established by the session gate
///
/// Extract in handlers with `Extension<AuthenticatedUser>`.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    /// Trusted user id from a validated access token
    pub user_id: i64,
    /// Tokens the client holds after this request (rotated ones if rotation happened)
    pub session: SessionTokens,
}

/// Session gate middleware
///
/// # Usage
///
/// ```ignore
/// use axum::{Router, routing::get, middleware};
/// use diary_api::auth::middleware::session_gate;
///
/// let app = Router::new()
///     .route("/protected", get(protected_handler))
///     .route_layer(middleware::from_fn_with_state(state.clone(), session_gate));
/// ```
///
/// In handlers, extract the user:
///
/// ```ignore
/// use axum::Extension;
/// use diary_api::auth::middleware::AuthenticatedUser;
///
/// async fn protected_handler(Extension(user): Extension<AuthenticatedUser>) -> String {
///     format!("Hello, user {}!", user.user_id)
/// }
/// ```
pub async fn session_gate(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let ip_address = extract_ip_address(request.headers());
    let tokens = session_tokens(request.headers());

    let outcome = match state.auth.authenticate_session(&tokens).await {
        Ok(outcome) => outcome,
        Err(e) => {
            if matches!(e, AppError::InvalidToken) {
                AuthCounters::incr(&state.metrics.auth.sessions_rejected);
                audit_log(&AuditEvent::SessionRejected {
                    ip_address,
                    user_agent: extract_user_agent(request.headers()),
                    path: request.uri().path().to_string(),
                });
            }
            return Err(e);
        }
    };

    if outcome.rotated.is_some() {
        AuthCounters::incr(&state.metrics.auth.rotations);
        audit_log(&AuditEvent::TokenRotated {
            user_id: outcome.user_id,
            ip_address,
        });
    }

    request.extensions_mut().insert(AuthenticatedUser {
        user_id: outcome.user_id,
        session: outcome.session,
    });

    let mut response = next.run(request).await;

    // Cookies set by the handler (logout) take precedence
    if let Some(pair) = outcome.rotated {
        if !sets_session_cookie(response.headers()) {
            append_set_cookies(response.headers_mut(), state.cookies.session_cookies(&pair)?);
        }
    }

    Ok(response)
}
