//! Diary Core - Domain models, persistence traits, and shared types
//!
//! This crate defines the core abstractions used by the diary server:
//! - Credential models for registered users
//! - Common error types
//! - Persistence traits for credentials and the token blacklist
//! - SQLite-backed store implementation
//! - Configuration management

pub mod config;
pub mod store;

pub use config::{
    AppConfig, BlacklistConfig, ConfigError, DatabaseConfig, Environment, JwtSettings,
    LoggingConfig, ServerConfig, SessionConfig, TransportConfig,
};
pub use store::{BlacklistRepository, CredentialRepository, SqliteStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for diary operations
#[derive(Error, Debug)]
pub enum DiaryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<ConfigError> for DiaryError {
    fn from(err: ConfigError) -> Self {
        DiaryError::ConfigError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DiaryError>;

// ============================================================================
// Credentials
// ============================================================================

/// Stored credential of a registered user
///
/// The password hash is an opaque PHC string produced by the credential
/// hasher. It is never printed by `Debug`.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credential {
    /// Numeric user id assigned by the store
    pub id: i64,
    /// Unique login name
    pub username: String,
    /// Unique email address
    pub email: String,
    /// One-way password hash
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Registration time
    pub created_at: DateTime<Utc>,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password_hash", &"<redacted>")
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Credential to be inserted at registration
#[derive(Clone)]
pub struct NewCredential {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

impl NewCredential {
    pub fn new(
        username: impl Into<String>,
        email: impl Into<String>,
        password_hash: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            password_hash: password_hash.into(),
        }
    }

    /// Reject records the store must never hold
    pub fn ensure_complete(&self) -> Result<()> {
        if self.username.trim().is_empty()
            || self.email.trim().is_empty()
            || self.password_hash.is_empty()
        {
            return Err(DiaryError::ValidationError(
                "username, email and password_hash are required".to_string(),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for NewCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewCredential")
            .field("username", &self.username)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_debug_redacts_hash() {
        let credential = Credential {
            id: 1,
            username: "alice".to_string(),
            email: "alice@x.com".to_string(),
            password_hash: "$argon2id$v=19$secret".to_string(),
            created_at: Utc::now(),
        };

        let printed = format!("{credential:?}");
        assert!(printed.contains("alice"));
        assert!(!printed.contains("argon2id"));
    }

    #[test]
    fn test_new_credential_requires_all_fields() {
        assert!(NewCredential::new("alice", "alice@x.com", "hash")
            .ensure_complete()
            .is_ok());
        assert!(matches!(
            NewCredential::new("", "alice@x.com", "hash").ensure_complete(),
            Err(DiaryError::ValidationError(_))
        ));
        assert!(matches!(
            NewCredential::new("alice", "  ", "hash").ensure_complete(),
            Err(DiaryError::ValidationError(_))
        ));
        assert!(matches!(
            NewCredential::new("alice", "alice@x.com", "").ensure_complete(),
            Err(DiaryError::ValidationError(_))
        ));
    }
}
