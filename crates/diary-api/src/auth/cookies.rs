//! Session cookie parsing and `Set-Cookie` construction

use super::jwt::TokenPair;
use super::service::SessionTokens;
use crate::error::AppError;
use axum::http::{header, HeaderMap, HeaderValue};

pub const ACCESS_COOKIE_NAME: &str = "access_token";
pub const REFRESH_COOKIE_NAME: &str = "refresh_token";

/// Attributes shared by both session cookies
#[derive(Debug, Clone)]
pub struct CookieSettings {
    pub secure: bool,
    pub path: String,
    pub access_max_age: u64,
    pub refresh_max_age: u64,
}

impl CookieSettings {
    fn render(&self, name: &str, value: &str, max_age: u64) -> Result<HeaderValue, AppError> {
        let mut cookie =
            format!("{name}={value}; HttpOnly; Path={}; SameSite=Lax; Max-Age={max_age}", self.path);
        if self.secure {
            cookie.push_str("; Secure");
        }

        HeaderValue::from_str(&cookie)
            .map_err(|e| AppError::Internal(format!("Invalid cookie header: {e}")))
    }

    /// `Set-Cookie` values carrying a freshly issued pair
    pub fn session_cookies(&self, pair: &TokenPair) -> Result<[HeaderValue; 2], AppError> {
        Ok([
            self.render(ACCESS_COOKIE_NAME, &pair.access_token, self.access_max_age)?,
            self.render(REFRESH_COOKIE_NAME, &pair.refresh_token, self.refresh_max_age)?,
        ])
    }

    /// `Set-Cookie` values that make the browser drop both session cookies
    pub fn cleared_cookies(&self) -> Result<[HeaderValue; 2], AppError> {
        Ok([
            self.render(ACCESS_COOKIE_NAME, "", 0)?,
            self.render(REFRESH_COOKIE_NAME, "", 0)?,
        ])
    }
}

/// Append every value as its own `Set-Cookie` header
pub fn append_set_cookies(headers: &mut HeaderMap, cookies: [HeaderValue; 2]) {
    for cookie in cookies {
        headers.append(header::SET_COOKIE, cookie);
    }
}

/// Read a cookie from the `Cookie` headers; empty values count as absent
pub fn get_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}

/// Extract both session tokens from a request
pub fn session_tokens(headers: &HeaderMap) -> SessionTokens {
    SessionTokens {
        access: get_cookie(headers, ACCESS_COOKIE_NAME),
        refresh: get_cookie(headers, REFRESH_COOKIE_NAME),
    }
}

/// True when the response already sets the access or refresh cookie
pub fn sets_session_cookie(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| {
            value.starts_with(&format!("{ACCESS_COOKIE_NAME}="))
                || value.starts_with(&format!("{REFRESH_COOKIE_NAME}="))
        })
}
