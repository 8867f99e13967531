//! Diary Configuration Management
//!
//! Handles configuration from environment variables and TOML config files,
//! with sensible defaults for local development.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Access secret used when nothing is configured (local runs only)
pub const DEV_ACCESS_SECRET: &str = "development-access-secret-change-in-production";
/// Refresh secret used when nothing is configured (local runs only)
pub const DEV_REFRESH_SECRET: &str = "development-refresh-secret-change-in-production";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Deployment environment
    pub env: Environment,

    /// Server configuration
    pub server: ServerConfig,

    /// Database connection
    pub database: DatabaseConfig,

    /// Token signing and lifetimes
    pub jwt: JwtSettings,

    /// Session cookie attributes
    pub session: SessionConfig,

    /// Secure transport requirements for credential endpoints
    pub transport: TransportConfig,

    /// Token blacklist maintenance
    pub blacklist: BlacklistConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from `CONFIG_PATH` when set, otherwise from the
    /// environment alone. The result is validated.
    pub fn load() -> Result<Self, ConfigError> {
        let config = match std::env::var("CONFIG_PATH") {
            Ok(path) => Self::from_file(path)?.with_env_override()?,
            Err(_) => Self::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        Self::from_toml_str(&content).map_err(|e| match e {
            ConfigError::ParseError { message, .. } => ConfigError::ParseError { path, message },
            other => other,
        })
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<inline>"),
            message: e.to_string(),
        })?;
        config.session.apply_env_default(config.env);
        Ok(config)
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        self.apply_env()?;
        Ok(self)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(env) = std::env::var("DIARY_ENV") {
            self.env = env.parse()?;
            self.session.apply_env_default(self.env);
        }

        // Server
        if let Ok(host) = std::env::var("API_HOST") {
            self.server.host = host;
        }
        if let Some(port) = parse_env("API_PORT")? {
            self.server.port = port;
        }
        if let Some(timeout) = parse_env("API_REQUEST_TIMEOUT_SECS")? {
            self.server.request_timeout_secs = timeout;
        }

        // Database
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database.url = url;
        }

        // JWT
        if let Ok(secret) = std::env::var("JWT_ACCESS_SECRET") {
            self.jwt.access_secret = secret;
        }
        if let Ok(secret) = std::env::var("JWT_REFRESH_SECRET") {
            self.jwt.refresh_secret = secret;
        }
        if let Some(ttl) = parse_env("JWT_ACCESS_TTL_SECS")? {
            self.jwt.access_ttl_secs = ttl;
        }
        if let Some(ttl) = parse_env("JWT_REFRESH_TTL_SECS")? {
            self.jwt.refresh_ttl_secs = ttl;
        }
        if let Some(revoke) = parse_env("JWT_REVOKE_ON_ROTATE")? {
            self.jwt.revoke_on_rotate = revoke;
        }

        // Session cookies
        if let Some(secure) = parse_env("SESSION_COOKIE_SECURE")? {
            self.session.cookie_secure = Some(secure);
        }

        // Transport
        if let Some(required) = parse_env("TRANSPORT_REQUIRE_SECURE")? {
            self.transport.require_secure = required;
        }
        if let Ok(version) = std::env::var("TRANSPORT_MIN_TLS_VERSION") {
            self.transport.min_tls_version = version;
        }
        if let Some(trust) = parse_env("TRANSPORT_TRUST_FORWARDED")? {
            self.transport.trust_forwarded_headers = trust;
        }

        // Blacklist
        if let Some(interval) = parse_env("BLACKLIST_SWEEP_INTERVAL_SECS")? {
            self.blacklist.sweep_interval_secs = interval;
        }

        // Logging
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.logging.level = Some(level);
        }

        Ok(())
    }

    /// Check invariants the auth layer relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        let jwt = &self.jwt;

        if jwt.access_secret.is_empty() {
            return Err(ConfigError::MissingRequired("jwt.access_secret".to_string()));
        }
        if jwt.refresh_secret.is_empty() {
            return Err(ConfigError::MissingRequired("jwt.refresh_secret".to_string()));
        }
        if jwt.access_secret == jwt.refresh_secret {
            return Err(ConfigError::InvalidValue {
                key: "jwt.refresh_secret".to_string(),
                value: "<must differ from jwt.access_secret>".to_string(),
            });
        }
        check_range("jwt.access_ttl_secs", jwt.access_ttl_secs, MAX_TOKEN_TTL_SECS)?;
        check_range("jwt.refresh_ttl_secs", jwt.refresh_ttl_secs, MAX_TOKEN_TTL_SECS)?;
        check_range(
            "server.request_timeout_secs",
            self.server.request_timeout_secs,
            MAX_REQUEST_TIMEOUT_SECS,
        )?;

        if self.env == Environment::Prod
            && (jwt.access_secret == DEV_ACCESS_SECRET || jwt.refresh_secret == DEV_REFRESH_SECRET)
        {
            return Err(ConfigError::InvalidValue {
                key: "jwt".to_string(),
                value: "<development secrets are not allowed in prod>".to_string(),
            });
        }

        Ok(())
    }

    /// Whether cookies carry the `Secure` attribute
    pub fn cookie_secure(&self) -> bool {
        self.session
            .cookie_secure
            .unwrap_or(self.env == Environment::Prod)
    }
}

/// Upper bound for token lifetimes (ten years)
pub const MAX_TOKEN_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Upper bound for the per-request deadline
pub const MAX_REQUEST_TIMEOUT_SECS: u64 = 60 * 60;

fn check_range(key: &str, value: u64, max: u64) -> Result<(), ConfigError> {
    if value == 0 || value > max {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        });
    }
    Ok(())
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

/// Deployment environment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Local,
    Dev,
    Prod,
}

impl std::str::FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "dev" => Ok(Self::Dev),
            "prod" => Ok(Self::Prod),
            _ => Err(ConfigError::InvalidValue {
                key: "DIARY_ENV".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Dev => write!(f, "dev"),
            Self::Prod => write!(f, "prod"),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8443,
            request_timeout_secs: 4,
        }
    }
}

/// Database connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite connection URL
    pub url: String,

    /// Connection pool size
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://storage/diary.db".to_string(),
            max_connections: 5,
        }
    }
}

/// Token signing secrets and lifetimes
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtSettings {
    /// HMAC secret for access tokens
    pub access_secret: String,

    /// HMAC secret for refresh tokens (must differ from the access secret)
    pub refresh_secret: String,

    /// Access token lifetime in seconds (default: 15 minutes)
    pub access_ttl_secs: u64,

    /// Refresh token lifetime in seconds (default: 7 days)
    pub refresh_ttl_secs: u64,

    /// Blacklist the consumed refresh token on every rotation
    pub revoke_on_rotate: bool,
}

impl Default for JwtSettings {
    fn default() -> Self {
        Self {
            access_secret: DEV_ACCESS_SECRET.to_string(),
            refresh_secret: DEV_REFRESH_SECRET.to_string(),
            access_ttl_secs: 15 * 60,
            refresh_ttl_secs: 7 * 24 * 60 * 60,
            revoke_on_rotate: true,
        }
    }
}

impl std::fmt::Debug for JwtSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtSettings")
            .field("access_secret", &"<redacted>")
            .field("refresh_secret", &"<redacted>")
            .field("access_ttl_secs", &self.access_ttl_secs)
            .field("refresh_ttl_secs", &self.refresh_ttl_secs)
            .field("revoke_on_rotate", &self.revoke_on_rotate)
            .finish()
    }
}

/// Session cookie attributes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// `Secure` attribute; `None` means "on in prod only"
    pub cookie_secure: Option<bool>,

    /// Cookie path
    pub cookie_path: String,
}

impl SessionConfig {
    fn apply_env_default(&mut self, env: Environment) {
        if env == Environment::Prod && self.cookie_secure.is_none() {
            self.cookie_secure = Some(true);
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_secure: None,
            cookie_path: "/".to_string(),
        }
    }
}

/// Secure transport requirements for login and registration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Reject credential submissions over plaintext connections
    pub require_secure: bool,

    /// Minimum negotiated TLS version, e.g. "1.2"
    pub min_tls_version: String,

    /// Trust `X-Forwarded-Proto` / `X-Forwarded-Tls-Version` from the TLS terminator
    pub trust_forwarded_headers: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            require_secure: true,
            min_tls_version: "1.2".to_string(),
            trust_forwarded_headers: true,
        }
    }
}

/// Token blacklist maintenance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlacklistConfig {
    /// Period of the background sweep in seconds; 0 disables it
    pub sweep_interval_secs: u64,
}

impl Default for BlacklistConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60 * 60,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `None` follows the environment
    pub level: Option<String>,

    /// Include file/line in logs
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: None,
            include_location: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}
