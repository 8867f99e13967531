//! JWT token generation and validation
//!
//! Implements paired access/refresh tokens signed with HMAC-SHA256.
//! Each kind has its own secret and lifetime, so a refresh token can never
//! be presented where an access token is expected (and vice versa).

use diary_core::JwtSettings;
use jsonwebtoken::{
    decode, encode, get_current_timestamp, Algorithm, DecodingKey, EncodingKey, Header,
    Validation,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Token kind, carried in the `type` claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Access => write!(f, "access"),
            TokenKind::Refresh => write!(f, "refresh"),
        }
    }
}

/// JWT Claims structure
///
/// Decoding is strict: a token missing any of these fields, or carrying one
/// with the wrong JSON type, is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject - numeric user ID
    pub user_id: i64,
    /// Token kind
    #[serde(rename = "type")]
    pub kind: TokenKind,
    /// Expiration timestamp (Unix epoch)
    pub exp: u64,
    /// Issued at timestamp (Unix epoch)
    pub iat: u64,
    /// JWT ID - unique per token, so two tokens minted in the same second differ
    pub jti: String,
}

/// JWT token generation and validation errors
///
/// Every validation failure maps to `InvalidToken`.
#[derive(Debug, Error)]
pub enum JwtError {
    #[error("Failed to encode JWT: {0}")]
    Encoding(#[from] jsonwebtoken::errors::Error),
    #[error("Token lifetime of {0}s overflows the expiry timestamp")]
    LifetimeOverflow(u64),

    #[error("Invalid or expired token")]
    InvalidToken,
}

/// Freshly issued access/refresh pair
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

struct KindKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_secs: u64,
}

/// Issues and verifies tokens for both kinds
#[derive(Clone)]
pub struct TokenCodec {
    access: Arc<KindKeys>,
    refresh: Arc<KindKeys>,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("access_ttl_secs", &self.access.ttl_secs)
            .field("refresh_ttl_secs", &self.refresh.ttl_secs)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    /// Build a codec from the configured secrets and lifetimes
    pub fn new(settings: &JwtSettings) -> Self {
        let keys = |secret: &str, ttl_secs: u64| {
            Arc::new(KindKeys {
                encoding: EncodingKey::from_secret(secret.as_bytes()),
                decoding: DecodingKey::from_secret(secret.as_bytes()),
                ttl_secs,
            })
        };

        Self {
            access: keys(&settings.access_secret, settings.access_ttl_secs),
            refresh: keys(&settings.refresh_secret, settings.refresh_ttl_secs),
        }
    }

    fn keys(&self, kind: TokenKind) -> &KindKeys {
        match kind {
            TokenKind::Access => &self.access,
            TokenKind::Refresh => &self.refresh,
        }
    }

    /// Lifetime of a token kind in seconds
    pub fn ttl(&self, kind: TokenKind) -> u64 {
        self.keys(kind).ttl_secs
    }

    /// Generate a signed token of the given kind for a user
    ///
    /// # Arguments
    ///
    /// * `user_id` - Numeric user identifier assigned by the credential store
    /// * `kind` - Selects the secret and the lifetime
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - Encoded JWT token
    /// * `Err(JwtError::Encoding)` - If signing fails
    /// * `Err(JwtError::LifetimeOverflow)` - If the configured lifetime cannot be represented
    pub fn issue(&self, user_id: i64, kind: TokenKind) -> Result<String, JwtError> {
        let keys = self.keys(kind);
        let now = get_current_timestamp();
        let exp = now
            .checked_add(keys.ttl_secs)
            .filter(|exp| i64::try_from(*exp).is_ok())
            .ok_or(JwtError::LifetimeOverflow(keys.ttl_secs))?;

        let claims = Claims {
            user_id,
            kind,
            exp,
            iat: now,
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &keys.encoding)?;
        Ok(token)
    }

    pub fn issue_access(&self, user_id: i64) -> Result<String, JwtError> {
        self.issue(user_id, TokenKind::Access)
    }

    pub fn issue_refresh(&self, user_id: i64) -> Result<String, JwtError> {
        self.issue(user_id, TokenKind::Refresh)
    }

    /// Issue a new access + refresh pair for a user
    pub fn issue_pair(&self, user_id: i64) -> Result<TokenPair, JwtError> {
        Ok(TokenPair {
            access_token: self.issue_access(user_id)?,
            refresh_token: self.issue_refresh(user_id)?,
        })
    }

    /// Validate a token of the expected kind and return its claims
    ///
    /// Rejects any algorithm other than HS256, bad signatures, expired tokens
    /// (no leeway), malformed claims and kind mismatches.
    pub fn decode(&self, token: &str, kind: TokenKind) -> Result<Claims, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp"]);

        let token_data = decode::<Claims>(token, &self.keys(kind).decoding, &validation)
            .map_err(|e| {
                tracing::debug!(kind = %kind, error = %e, "Token rejected");
                JwtError::InvalidToken
            })?;

        if token_data.claims.kind != kind {
            tracing::debug!(
                expected = %kind,
                actual = %token_data.claims.kind,
                "Token kind mismatch"
            );
            return Err(JwtError::InvalidToken);
        }

        Ok(token_data.claims)
    }

    /// Validate a token of the expected kind and return the user id it carries
    pub fn verify(&self, token: &str, kind: TokenKind) -> Result<i64, JwtError> {
        self.decode(token, kind).map(|claims| claims.user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn settings() -> JwtSettings {
        JwtSettings {
            access_secret: "test-access-secret".to_string(),
            refresh_secret: "test-refresh-secret".to_string(),
            ..Default::default()
        }
    }

    fn sign_raw(payload: &serde_json::Value, secret: &str, alg: Algorithm) -> String {
        encode(
            &Header::new(alg),
            payload,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_issue_and_verify_token() {
        let codec = TokenCodec::new(&settings());

        let token = codec.issue_access(42).expect("Failed to generate token");
        let claims = codec
            .decode(&token, TokenKind::Access)
            .expect("Failed to validate token");

        assert_eq!(claims.user_id, 42);
        assert_eq!(claims.kind, TokenKind::Access);
        assert_eq!(claims.exp - claims.iat, 15 * 60);
    }

    #[test]
    fn test_refresh_lifetime() {
        let codec = TokenCodec::new(&settings());
        let claims = codec
            .decode(&codec.issue_refresh(7).unwrap(), TokenKind::Refresh)
            .unwrap();

        assert_eq!(claims.exp - claims.iat, 7 * 24 * 60 * 60);
    }

    #[test]
    fn test_oversized_lifetime_is_an_error() {
        let codec = TokenCodec::new(&JwtSettings {
            access_ttl_secs: u64::MAX,
            ..settings()
        });

        assert!(matches!(
            codec.issue_access(1),
            Err(JwtError::LifetimeOverflow(u64::MAX))
        ));
        assert!(codec.issue_refresh(1).is_ok());
    }

    #[test]
    fn test_tokens_in_same_second_differ() {
        let codec = TokenCodec::new(&settings());
        let pair1 = codec.issue_pair(1).unwrap();
        let pair2 = codec.issue_pair(1).unwrap();

        assert_ne!(pair1.access_token, pair2.access_token);
        assert_ne!(pair1.refresh_token, pair2.refresh_token);
    }

    #[test]
    fn test_kind_mismatch() {
        let codec = TokenCodec::new(&settings());
        let pair = codec.issue_pair(5).unwrap();

        assert!(matches!(
            codec.verify(&pair.access_token, TokenKind::Refresh),
            Err(JwtError::InvalidToken)
        ));
        assert!(matches!(
            codec.verify(&pair.refresh_token, TokenKind::Access),
            Err(JwtError::InvalidToken)
        ));
    }

    #[test]
    fn test_kind_mismatch_with_shared_secret() {
        // Even if both kinds were signed with one key the type claim decides
        let codec = TokenCodec::new(&settings());
        let now = get_current_timestamp();
        let token = sign_raw(
            &json!({"user_id": 5, "type": "refresh", "exp": now + 60, "iat": now, "jti": "x"}),
            "test-access-secret",
            Algorithm::HS256,
        );

        assert!(codec.verify(&token, TokenKind::Access).is_err());
    }

    #[test]
    fn test_invalid_token() {
        let codec = TokenCodec::new(&settings());
        assert!(matches!(
            codec.verify("invalid.token.here", TokenKind::Access),
            Err(JwtError::InvalidToken)
        ));
        assert!(codec.verify("", TokenKind::Access).is_err());
    }

    #[test]
    fn test_wrong_secret() {
        let codec1 = TokenCodec::new(&settings());
        let codec2 = TokenCodec::new(&JwtSettings {
            access_secret: "another-access-secret".to_string(),
            ..settings()
        });

        let token = codec1.issue_access(1).unwrap();
        assert!(matches!(
            codec2.verify(&token, TokenKind::Access),
            Err(JwtError::InvalidToken)
        ));
    }

    #[test]
    fn test_other_algorithm_rejected() {
        let codec = TokenCodec::new(&settings());
        let now = get_current_timestamp();
        let payload =
            json!({"user_id": 1, "type": "access", "exp": now + 60, "iat": now, "jti": "x"});

        let hs512 = sign_raw(&payload, "test-access-secret", Algorithm::HS512);
        assert!(codec.verify(&hs512, TokenKind::Access).is_err());

        let hs256 = sign_raw(&payload, "test-access-secret", Algorithm::HS256);
        assert_eq!(codec.verify(&hs256, TokenKind::Access).unwrap(), 1);
    }

    #[test]
    fn test_expired_token() {
        let codec = TokenCodec::new(&settings());
        let now = get_current_timestamp();

        // Create a token that expired 1 second ago
        let token = sign_raw(
            &json!({"user_id": 1, "type": "access", "exp": now - 1, "iat": now - 60, "jti": "x"}),
            "test-access-secret",
            Algorithm::HS256,
        );

        assert!(matches!(
            codec.verify(&token, TokenKind::Access),
            Err(JwtError::InvalidToken)
        ));
    }

    #[test]
    fn test_short_lived_token_expires() {
        let codec = TokenCodec::new(&JwtSettings {
            access_ttl_secs: 1,
            ..settings()
        });

        let token = codec.issue_access(9).unwrap();
        assert_eq!(codec.verify(&token, TokenKind::Access).unwrap(), 9);

        std::thread::sleep(std::time::Duration::from_millis(2100));
        assert!(codec.verify(&token, TokenKind::Access).is_err());
    }

    #[test]
    fn test_malformed_claims_rejected() {
        let codec = TokenCodec::new(&settings());
        let now = get_current_timestamp();

        let cases = [
            // missing user_id
            json!({"type": "access", "exp": now + 60, "iat": now, "jti": "x"}),
            // user_id as a string
            json!({"user_id": "1", "type": "access", "exp": now + 60, "iat": now, "jti": "x"}),
            // unknown kind
            json!({"user_id": 1, "type": "admin", "exp": now + 60, "iat": now, "jti": "x"}),
            // missing exp
            json!({"user_id": 1, "type": "access", "iat": now, "jti": "x"}),
        ];

        for payload in cases {
            let token = sign_raw(&payload, "test-access-secret", Algorithm::HS256);
            assert!(
                codec.verify(&token, TokenKind::Access).is_err(),
                "accepted {payload}"
            );
        }
    }

    fn kind_strategy() -> impl Strategy<Value = TokenKind> {
        prop_oneof![Just(TokenKind::Access), Just(TokenKind::Refresh)]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_issue_verify_roundtrip(user_id in any::<i64>(), kind in kind_strategy()) {
            let codec = TokenCodec::new(&settings());
            let token = codec.issue(user_id, kind).unwrap();
            prop_assert_eq!(codec.verify(&token, kind).unwrap(), user_id);
        }
    }
}
