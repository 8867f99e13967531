//! Authentication module
//!
//! Cookie-based sessions built from paired JWTs:
//! - Password hashing with Argon2
//! - Access/refresh token issuance and validation
//! - Persistent token blacklist with periodic sweeping
//! - Authentication service (register, login, rotation, logout)
//! - Session gate middleware and cookie handling
//! - Secure transport checks for credential submission

pub mod blacklist;
pub mod cookies;
pub mod jwt;
pub mod middleware;
pub mod password;
pub mod service;
pub mod transport;

pub use blacklist::TokenBlacklist;
pub use jwt::{Claims, JwtError, TokenCodec, TokenKind, TokenPair};
pub use middleware::{session_gate, AuthenticatedUser};
pub use password::{validate_password_policy, CredentialHasher, PasswordConfig, PasswordError};
pub use service::{
    AuthService, LoginOutcome, LoginRequest, RegisterRequest, SessionOutcome, SessionTokens,
    UserInfo,
};
pub use transport::{transport_security_middleware, TlsVersion, TransportPolicy, TransportSecurity};
