//! Authentication API handlers
//!
//! Registration and login require a secure client connection. Logout and
//! profile lookup sit behind the session gate.
//!
//! Author: hephaex@gmail.com

use crate::audit::{audit_log, extract_ip_address, extract_user_agent, AuditEvent};
use crate::auth::cookies::append_set_cookies;
use crate::auth::middleware::AuthenticatedUser;
use crate::auth::service::{LoginRequest, RegisterRequest, UserInfo};
use crate::auth::transport::TransportSecurity;
use crate::error::{AppError, JsonBody};
use crate::metrics::AuthCounters;
use crate::state::AppState;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

/// Registration response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RegisterResponse {
    pub user: UserInfo,
    pub message: String,
}

/// Login response; tokens travel only in cookies
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    pub user: UserInfo,
    pub message: String,
}

/// Logout response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LogoutResponse {
    pub message: String,
}

fn require_secure_transport(
    state: &AppState,
    transport: Option<&TransportSecurity>,
    headers: &HeaderMap,
    path: &str,
) -> Result<(), AppError> {
    state.transport.check(transport).map_err(|e| {
        audit_log(&AuditEvent::InsecureTransport {
            path: path.to_string(),
            reason: e.to_string(),
            ip_address: extract_ip_address(headers),
        });
        e
    })
}

/// Register a new user account
///
/// # Request Body
///
/// * `username` - 3 to 32 characters, unique
/// * `email` - Valid email address, unique
/// * `password` - 8 to 128 characters
///
/// # Responses
///
/// * `201 Created` - User successfully registered
/// * `400 Bad Request` - Invalid input or insecure connection
/// * `409 Conflict` - Username or email already taken
/// * `500 Internal Server Error` - Server error
#[utoipa::path(
    post,
    path = "/api/v1/auth/register",
    tag = "auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered successfully", body = RegisterResponse),
        (status = 400, description = "Invalid input or insecure transport", body = crate::error::ApiError),
        (status = 409, description = "Username or email already taken", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError),
    )
)]
pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    transport: Option<Extension<TransportSecurity>>,
    headers: HeaderMap,
    body: Result<JsonBody<RegisterRequest>, AppError>,
) -> Result<impl IntoResponse, AppError> {
    require_secure_transport(
        &state,
        transport.as_deref(),
        &headers,
        "/api/v1/auth/register",
    )?;
    let JsonBody(request) = body?;

    let ip_address = extract_ip_address(&headers);
    let username = request.username.clone();

    let user = match state.auth.register(request).await {
        Ok(user) => user,
        Err(e) => {
            if !matches!(e, AppError::Internal(_)) {
                audit_log(&AuditEvent::RegistrationFailure {
                    username,
                    reason: e.to_string(),
                    ip_address,
                });
            }
            return Err(e);
        }
    };

    AuthCounters::incr(&state.metrics.auth.registrations);
    audit_log(&AuditEvent::RegistrationSuccess {
        user_id: user.id,
        username: user.username.clone(),
        ip_address,
    });

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user,
            message: "Registration successful".to_string(),
        }),
    ))
}

/// Login with username and password
///
/// On success the access and refresh tokens are set as `HttpOnly` cookies.
///
/// # Responses
///
/// * `200 OK` - Authentication successful, session cookies set
/// * `400 Bad Request` - Insecure connection or malformed body
/// * `401 Unauthorized` - Invalid credentials
/// * `500 Internal Server Error` - Server error
#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 400, description = "Insecure transport or malformed body", body = crate::error::ApiError),
        (status = 401, description = "Invalid credentials", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError),
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    transport: Option<Extension<TransportSecurity>>,
    headers: HeaderMap,
    body: Result<JsonBody<LoginRequest>, AppError>,
) -> Result<impl IntoResponse, AppError> {
    require_secure_transport(&state, transport.as_deref(), &headers, "/api/v1/auth/login")?;
    let JsonBody(request) = body?;

    let ip_address = extract_ip_address(&headers);
    let user_agent = extract_user_agent(&headers);
    let username = request.username.clone();

    let outcome = match state.auth.login(request).await {
        Ok(outcome) => outcome,
        Err(e) => {
            if matches!(e, AppError::InvalidCredentials) {
                AuthCounters::incr(&state.metrics.auth.logins_failed);
                audit_log(&AuditEvent::LoginFailure {
                    username,
                    reason: e.to_string(),
                    ip_address,
                    user_agent,
                });
            }
            return Err(e);
        }
    };

    AuthCounters::incr(&state.metrics.auth.logins_ok);
    audit_log(&AuditEvent::LoginSuccess {
        user_id: outcome.user.id,
        username: outcome.user.username.clone(),
        ip_address,
        user_agent,
    });

    let mut response_headers = HeaderMap::new();
    append_set_cookies(
        &mut response_headers,
        state.cookies.session_cookies(&outcome.tokens)?,
    );

    Ok((
        StatusCode::OK,
        response_headers,
        Json(LoginResponse {
            user: outcome.user,
            message: "Login successful".to_string(),
        }),
    ))
}

/// Logout current session
///
/// Blacklists the session's access and refresh tokens and clears both cookies.
#[utoipa::path(
    post,
    path = "/api/v1/auth/logout",
    tag = "auth",
    responses(
        (status = 200, description = "Logout successful", body = LogoutResponse),
        (status = 401, description = "Not authenticated", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError),
    )
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    state
        .auth
        .logout(user.session.access.as_deref(), user.session.refresh.as_deref())
        .await?;

    audit_log(&AuditEvent::Logout {
        user_id: user.user_id,
        ip_address: extract_ip_address(&headers),
    });

    let mut response_headers = HeaderMap::new();
    append_set_cookies(&mut response_headers, state.cookies.cleared_cookies()?);

    Ok((
        StatusCode::OK,
        response_headers,
        Json(LogoutResponse {
            message: "Logout successful".to_string(),
        }),
    ))
}

/// Get current user profile
#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    tag = "auth",
    responses(
        (status = 200, description = "Current user", body = UserInfo),
        (status = 401, description = "Not authenticated", body = crate::error::ApiError),
        (status = 404, description = "User no longer exists", body = crate::error::ApiError),
    )
)]
pub async fn me_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<impl IntoResponse, AppError> {
    let info = state.auth.get_user(user.user_id).await?;
    Ok(Json(info))
}
