//! Authentication service layer
//!
//! Provides business logic for user registration, login, token rotation,
//! logout and revocation, plus the session gate state machine used by the
//! middleware. The service is stateless: it holds configuration and shared
//! handles to the credential and blacklist stores.

use super::blacklist::TokenBlacklist;
use super::jwt::{Claims, TokenCodec, TokenKind, TokenPair};
use super::password::{
    validate_password_policy, CredentialHasher, MAX_PASSWORD_LEN, MIN_PASSWORD_LEN,
};
use crate::audit::{audit_log, AuditEvent};
use crate::error::AppError;
use chrono::{DateTime, TimeZone, Utc};
use diary_core::{Credential, CredentialRepository, JwtSettings, NewCredential};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use utoipa::ToSchema;
use validator::Validate;

/// Minimum username length in characters
pub const MIN_USERNAME_LEN: usize = 3;

/// Maximum username length in characters
pub const MAX_USERNAME_LEN: usize = 32;

/// User registration request
#[derive(Clone, Deserialize, Validate, ToSchema)]
pub struct RegisterRequest {
    #[validate(length(min = 3, max = 32, message = "Username must be 3-32 characters"))]
    pub username: String,
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    pub password: String,
}

impl fmt::Debug for RegisterRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterRequest")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// User login request
#[derive(Clone, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// User information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserInfo {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

impl From<Credential> for UserInfo {
    fn from(credential: Credential) -> Self {
        Self {
            id: credential.id,
            username: credential.username,
            email: credential.email,
            created_at: credential.created_at,
        }
    }
}

/// Successful login: the user and a fresh token pair
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub user: UserInfo,
    pub tokens: TokenPair,
}

/// Tokens presented by a client; blank cookies are `None`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionTokens {
    pub access: Option<String>,
    pub refresh: Option<String>,
}

impl From<&TokenPair> for SessionTokens {
    fn from(pair: &TokenPair) -> Self {
        Self {
            access: Some(pair.access_token.clone()),
            refresh: Some(pair.refresh_token.clone()),
        }
    }
}

/// Result of the session gate
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    /// Trusted user id
    pub user_id: i64,
    /// Tokens the client holds after this request
    pub session: SessionTokens,
    /// New pair when the refresh token was used
    pub rotated: Option<TokenPair>,
}

/// Authentication service
pub struct AuthService {
    credentials: Arc<dyn CredentialRepository>,
    blacklist: TokenBlacklist,
    codec: TokenCodec,
    hasher: CredentialHasher,
    revoke_on_rotate: bool,
}

impl AuthService {
    /// Create a new authentication service
    pub fn new(
        credentials: Arc<dyn CredentialRepository>,
        blacklist: TokenBlacklist,
        settings: &JwtSettings,
        hasher: CredentialHasher,
    ) -> Self {
        Self {
            credentials,
            blacklist,
            codec: TokenCodec::new(settings),
            hasher,
            revoke_on_rotate: settings.revoke_on_rotate,
        }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub fn blacklist(&self) -> &TokenBlacklist {
        &self.blacklist
    }

    /// Register a new user
    ///
    /// # Returns
    ///
    /// * `Ok(UserInfo)` - Newly created user
    /// * `Err(AppError::Validation)` - Malformed username, email or password
    /// * `Err(AppError::Conflict)` - Username or email already taken
    pub async fn register(&self, request: RegisterRequest) -> Result<UserInfo, AppError> {
        let request = RegisterRequest {
            username: request.username.trim().to_string(),
            email: request.email.trim().to_string(),
            password: request.password,
        };
        request.validate()?;
        validate_password_policy(&request.password).map_err(AppError::Validation)?;

        let password_hash = self.hasher.hash(&request.password)?;
        let new = NewCredential::new(request.username, request.email, password_hash);
        let id = self.credentials.insert(&new).await?;

        tracing::info!(user_id = id, username = %new.username, "User registered");
        self.get_user(id).await
    }

    /// Login with username and password
    ///
    /// Unknown users and wrong passwords produce the same error. For unknown
    /// users a throwaway hash is computed so both paths cost about the same.
    /// Input outside the registration bounds is refused before any hashing.
    pub async fn login(&self, request: LoginRequest) -> Result<LoginOutcome, AppError> {
        let username = request.username.trim();
        let username_len = username.chars().count();
        let password_len = request.password.chars().count();
        if !(MIN_USERNAME_LEN..=MAX_USERNAME_LEN).contains(&username_len)
            || !(MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&password_len)
        {
            return Err(AppError::InvalidCredentials);
        }

        let Some(credential) = self.credentials.find_by_username(username).await? else {
            let _ = self.hasher.hash(&request.password);
            return Err(AppError::InvalidCredentials);
        };

        if !self.hasher.verify(&request.password, &credential.password_hash)? {
            return Err(AppError::InvalidCredentials);
        }

        let tokens = self.codec.issue_pair(credential.id)?;
        Ok(LoginOutcome {
            user: credential.into(),
            tokens,
        })
    }

    async fn validate(&self, token: &str, kind: TokenKind) -> Result<Claims, AppError> {
        if self.blacklist.is_blacklisted(token).await? {
            tracing::debug!(kind = %kind, "Blacklisted token presented");
            return Err(AppError::InvalidToken);
        }
        Ok(self.codec.decode(token, kind)?)
    }

    /// Validate an access token (signature, expiry, kind, blacklist) and return its user id
    pub async fn validate_access(&self, token: &str) -> Result<i64, AppError> {
        self.validate(token, TokenKind::Access)
            .await
            .map(|claims| claims.user_id)
    }

    /// Validate a refresh token (signature, expiry, kind, blacklist) and return its user id
    pub async fn validate_refresh(&self, token: &str) -> Result<i64, AppError> {
        self.validate(token, TokenKind::Refresh)
            .await
            .map(|claims| claims.user_id)
    }

    /// Exchange a refresh token for a brand-new pair
    ///
    /// With `revoke_on_rotate` the consumed refresh token is blacklisted
    /// until its own expiry, so it can be used only once, even by
    /// concurrent callers.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AppError> {
        let claims = self.validate(refresh_token, TokenKind::Refresh).await?;

        if self.revoke_on_rotate {
            let claimed = self
                .blacklist
                .claim(refresh_token, expiry(&claims)?)
                .await?;
            if !claimed {
                tracing::debug!(user_id = claims.user_id, "Refresh token already consumed");
                return Err(AppError::InvalidToken);
            }
        }

        Ok(self.codec.issue_pair(claims.user_id)?)
    }

    /// Blacklist every presented token that is still valid
    pub async fn logout(&self, access: Option<&str>, refresh: Option<&str>) -> Result<(), AppError> {
        let presented = [(access, TokenKind::Access), (refresh, TokenKind::Refresh)];

        for (token, kind) in presented {
            let Some(token) = token else { continue };
            if let Ok(claims) = self.codec.decode(token, kind) {
                self.blacklist.add(token, expiry(&claims)?).await?;
            }
        }

        Ok(())
    }

    /// Revoke a single token of either kind
    ///
    /// Returns `false` when the token is already unusable.
    pub async fn revoke_token(&self, token: &str) -> Result<bool, AppError> {
        let claims = match self.codec.decode(token, TokenKind::Access) {
            Ok(claims) => claims,
            Err(_) => match self.codec.decode(token, TokenKind::Refresh) {
                Ok(claims) => claims,
                Err(_) => return Ok(false),
            },
        };

        if self.blacklist.is_blacklisted(token).await? {
            return Ok(false);
        }

        self.blacklist.add(token, expiry(&claims)?).await?;
        audit_log(&AuditEvent::TokenRevoked {
            user_id: claims.user_id,
            kind: claims.kind.to_string(),
        });
        Ok(true)
    }

    /// Get user information by id
    pub async fn get_user(&self, user_id: i64) -> Result<UserInfo, AppError> {
        self.credentials
            .find_by_id(user_id)
            .await?
            .map(UserInfo::from)
            .ok_or_else(|| AppError::NotFound("User".to_string()))
    }

    /// Remove expired blacklist entries
    pub async fn sweep_blacklist(&self) -> Result<u64, AppError> {
        Ok(self.blacklist.sweep().await?)
    }

    /// Session gate: decide whether a request is authenticated
    ///
    /// 1. A blacklisted access token rejects the request outright.
    /// 2. A valid access token authenticates it.
    /// 3. Otherwise the refresh token is checked and rotated; the new access
    ///    token is validated and its subject becomes the trusted user id.
    ///
    /// Token problems yield `InvalidToken`; store failures yield `Internal`.
    pub async fn authenticate_session(
        &self,
        tokens: &SessionTokens,
    ) -> Result<SessionOutcome, AppError> {
        if let Some(access) = tokens.access.as_deref() {
            if self.blacklist.is_blacklisted(access).await? {
                tracing::debug!("Session rejected: access token blacklisted");
                return Err(AppError::InvalidToken);
            }

            if let Ok(user_id) = self.codec.verify(access, TokenKind::Access) {
                return Ok(SessionOutcome {
                    user_id,
                    session: tokens.clone(),
                    rotated: None,
                });
            }
        }

        let Some(refresh) = tokens.refresh.as_deref() else {
            tracing::debug!("Session rejected: no usable access token and no refresh token");
            return Err(AppError::InvalidToken);
        };

        let pair = self.refresh(refresh).await?;
        let user_id = self.validate_access(&pair.access_token).await?;

        Ok(SessionOutcome {
            user_id,
            session: SessionTokens::from(&pair),
            rotated: Some(pair),
        })
    }
}

fn expiry(claims: &Claims) -> Result<DateTime<Utc>, AppError> {
    i64::try_from(claims.exp)
        .ok()
        .and_then(|exp| Utc.timestamp_opt(exp, 0).single())
        .ok_or_else(|| AppError::Internal(format!("Token expiry out of range: {}", claims.exp)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::PasswordConfig;
    use async_trait::async_trait;
    use diary_core::{BlacklistRepository, DiaryError, SqliteStore};

    fn settings() -> JwtSettings {
        JwtSettings {
            access_secret: "service-access-secret".to_string(),
            refresh_secret: "service-refresh-secret".to_string(),
            ..Default::default()
        }
    }

    async fn service_with(settings: JwtSettings) -> AuthService {
        let store = Arc::new(SqliteStore::in_memory().await.expect("in-memory store"));
        AuthService::new(
            store.clone(),
            TokenBlacklist::new(store),
            &settings,
            CredentialHasher::new(PasswordConfig::fast()),
        )
    }

    async fn service() -> AuthService {
        service_with(settings()).await
    }

    fn register_request(username: &str, email: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            username: username.to_string(),
            email: email.to_string(),
            password: password.to_string(),
        }
    }

    fn login_request(username: &str, password: &str) -> LoginRequest {
        LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    async fn alice(service: &AuthService) -> LoginOutcome {
        service
            .register(register_request("alice", "alice@example.com", "s3cret-pass"))
            .await
            .expect("register alice");
        service
            .login(login_request("alice", "s3cret-pass"))
            .await
            .expect("login alice")
    }

    #[tokio::test]
    async fn test_register_and_login() {
        let service = service().await;
        let outcome = alice(&service).await;

        assert_eq!(outcome.user.username, "alice");
        assert_eq!(
            service.validate_access(&outcome.tokens.access_token).await.unwrap(),
            outcome.user.id
        );
        assert_eq!(
            service.validate_refresh(&outcome.tokens.refresh_token).await.unwrap(),
            outcome.user.id
        );
    }

    #[tokio::test]
    async fn test_register_validation() {
        let service = service().await;

        let cases = [
            register_request("al", "al@example.com", "s3cret-pass"),
            register_request("alice", "not-an-email", "s3cret-pass"),
            register_request("alice", "alice@example.com", "short"),
            register_request(&"a".repeat(33), "alice@example.com", "s3cret-pass"),
            register_request("  ab  ", "ab@example.com", "s3cret-pass"),
            register_request("     ", "blank@example.com", "s3cret-pass"),
        ];

        for request in cases {
            assert!(matches!(
                service.register(request).await,
                Err(AppError::Validation(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_duplicate_username_is_conflict() {
        let service = service().await;
        let first = alice(&service).await;

        let result = service
            .register(register_request("alice", "other@example.com", "another-pass"))
            .await;
        assert!(matches!(result, Err(AppError::Conflict(_))));

        // The original account is untouched
        let user = service.get_user(first.user.id).await.unwrap();
        assert_eq!(user.email, "alice@example.com");
        assert!(service.login(login_request("alice", "s3cret-pass")).await.is_ok());
    }

    #[tokio::test]
    async fn test_wrong_password_same_as_unknown_user() {
        let service = service().await;
        alice(&service).await;

        let wrong = service.login(login_request("alice", "wrong-pass")).await;
        let unknown = service.login(login_request("bob", "s3cret-pass")).await;

        assert!(matches!(wrong, Err(AppError::InvalidCredentials)));
        assert!(matches!(unknown, Err(AppError::InvalidCredentials)));
        assert_eq!(
            wrong.unwrap_err().to_string(),
            unknown.unwrap_err().to_string()
        );
    }

    #[tokio::test]
    async fn test_refresh_rotates_and_revokes() {
        let service = service().await;
        let outcome = alice(&service).await;
        let old_refresh = outcome.tokens.refresh_token;

        let pair = service.refresh(&old_refresh).await.unwrap();
        assert_ne!(pair.refresh_token, old_refresh);
        assert_eq!(
            service.validate_access(&pair.access_token).await.unwrap(),
            outcome.user.id
        );

        // The consumed refresh token is single-use
        assert!(matches!(
            service.refresh(&old_refresh).await,
            Err(AppError::InvalidToken)
        ));
        assert!(service.refresh(&pair.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_register_trims_input() {
        let service = service().await;

        let user = service
            .register(register_request("  alice  ", " alice@example.com ", "s3cret-pass"))
            .await
            .unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(user.email, "alice@example.com");
    }

    #[tokio::test]
    async fn test_login_rejects_out_of_range_input() {
        let service = service().await;
        alice(&service).await;

        let cases = [
            login_request("al", "s3cret-pass"),
            login_request(&"a".repeat(33), "s3cret-pass"),
            login_request("alice", "short"),
            login_request("alice", &"p".repeat(10_000)),
        ];

        for request in cases {
            assert!(matches!(
                service.login(request).await,
                Err(AppError::InvalidCredentials)
            ));
        }
    }

    #[tokio::test]
    async fn test_concurrent_refresh_single_winner() {
        let service = service().await;
        let refresh = alice(&service).await.tokens.refresh_token;

        let (a, b) = tokio::join!(service.refresh(&refresh), service.refresh(&refresh));
        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
        assert!(matches!(a.and(b), Err(AppError::InvalidToken)));
    }

    #[tokio::test]
    async fn test_refresh_without_revocation() {
        let service = service_with(JwtSettings {
            revoke_on_rotate: false,
            ..settings()
        })
        .await;
        let outcome = alice(&service).await;

        assert!(service.refresh(&outcome.tokens.refresh_token).await.is_ok());
        assert!(service.refresh(&outcome.tokens.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_refresh_rejects_access_token() {
        let service = service().await;
        let outcome = alice(&service).await;

        assert!(matches!(
            service.refresh(&outcome.tokens.access_token).await,
            Err(AppError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_logout_blacklists_both_tokens() {
        let service = service().await;
        let tokens = alice(&service).await.tokens;

        service
            .logout(Some(&tokens.access_token), Some(&tokens.refresh_token))
            .await
            .unwrap();

        assert!(service.validate_access(&tokens.access_token).await.is_err());
        assert!(service.validate_refresh(&tokens.refresh_token).await.is_err());

        // Garbage and missing tokens are ignored
        service.logout(Some("garbage"), None).await.unwrap();
    }

    #[tokio::test]
    async fn test_revoke_token() {
        let service = service().await;
        let tokens = alice(&service).await.tokens;

        assert!(service.revoke_token(&tokens.refresh_token).await.unwrap());
        assert!(!service.revoke_token(&tokens.refresh_token).await.unwrap());
        assert!(!service.revoke_token("not-a-token").await.unwrap());
        assert!(service.validate_access(&tokens.access_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_get_unknown_user() {
        let service = service().await;
        assert!(matches!(
            service.get_user(999).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_session_with_valid_access() {
        let service = service().await;
        let outcome = alice(&service).await;
        let tokens = SessionTokens::from(&outcome.tokens);

        let session = service.authenticate_session(&tokens).await.unwrap();
        assert_eq!(session.user_id, outcome.user.id);
        assert!(session.rotated.is_none());
        assert_eq!(session.session, tokens);
    }

    #[tokio::test]
    async fn test_session_rotates_on_bad_access() {
        let service = service().await;
        let outcome = alice(&service).await;

        for access in [None, Some("garbage".to_string())] {
            let refresh = service.codec().issue_refresh(outcome.user.id).unwrap();
            let tokens = SessionTokens {
                access,
                refresh: Some(refresh.clone()),
            };

            let session = service.authenticate_session(&tokens).await.unwrap();
            let rotated = session.rotated.expect("rotated pair");
            assert_eq!(session.user_id, outcome.user.id);
            assert_ne!(rotated.refresh_token, refresh);
            assert_eq!(session.session, SessionTokens::from(&rotated));
        }
    }

    #[tokio::test]
    async fn test_session_rejections() {
        let service = service().await;
        let tokens = alice(&service).await.tokens;

        // Nothing presented
        assert!(matches!(
            service.authenticate_session(&SessionTokens::default()).await,
            Err(AppError::InvalidToken)
        ));

        // Garbage access, no refresh
        let garbage = SessionTokens {
            access: Some("garbage".to_string()),
            refresh: None,
        };
        assert!(service.authenticate_session(&garbage).await.is_err());

        // Blacklisted access wins over a valid refresh
        service.logout(Some(&tokens.access_token), None).await.unwrap();
        let blacklisted = SessionTokens::from(&tokens);
        assert!(matches!(
            service.authenticate_session(&blacklisted).await,
            Err(AppError::InvalidToken)
        ));

        // Blacklisted refresh
        let refresh_only = SessionTokens {
            access: None,
            refresh: Some(tokens.refresh_token.clone()),
        };
        service.logout(None, Some(&tokens.refresh_token)).await.unwrap();
        assert!(matches!(
            service.authenticate_session(&refresh_only).await,
            Err(AppError::InvalidToken)
        ));
    }

    struct FailingBlacklist;

    #[async_trait]
    impl BlacklistRepository for FailingBlacklist {
        async fn add(&self, _key: &str, _expires_at: DateTime<Utc>) -> diary_core::Result<()> {
            Err(DiaryError::DatabaseError("disk I/O error".to_string()))
        }

        async fn try_add(&self, _key: &str, _expires_at: DateTime<Utc>) -> diary_core::Result<bool> {
            Err(DiaryError::DatabaseError("disk I/O error".to_string()))
        }

        async fn is_blacklisted(&self, _key: &str, _now: DateTime<Utc>) -> diary_core::Result<bool> {
            Err(DiaryError::DatabaseError("disk I/O error".to_string()))
        }

        async fn delete_expired(&self, _now: DateTime<Utc>) -> diary_core::Result<u64> {
            Err(DiaryError::DatabaseError("disk I/O error".to_string()))
        }
    }

    #[tokio::test]
    async fn test_session_store_failure_is_internal() {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let service = AuthService::new(
            store,
            TokenBlacklist::new(Arc::new(FailingBlacklist)),
            &settings(),
            CredentialHasher::new(PasswordConfig::fast()),
        );

        let tokens = service.codec().issue_pair(1).unwrap();
        assert!(matches!(
            service.authenticate_session(&SessionTokens::from(&tokens)).await,
            Err(AppError::Internal(_))
        ));
    }
}
