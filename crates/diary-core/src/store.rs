//! SQLite credential and token blacklist store
//!
//! Provides the persistence the auth layer consumes using SQLx and SQLite.
//! Diary CRUD tables (workouts, sets, exercises) live elsewhere.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::str::FromStr;

use crate::{Credential, DiaryError, NewCredential, Result};

const CREATE_USERS_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS users (
        user_id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT NOT NULL UNIQUE,
        email TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )
"#;

const CREATE_BLACKLIST_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS blacklisted_tokens (
        token TEXT PRIMARY KEY,
        expiration_time INTEGER NOT NULL,
        blacklisted_at INTEGER NOT NULL
    )
"#;

const CREATE_BLACKLIST_EXPIRY_INDEX_SQL: &str = r#"
    CREATE INDEX IF NOT EXISTS idx_blacklisted_tokens_expiration
        ON blacklisted_tokens (expiration_time)
"#;

/// Credential persistence
#[async_trait]
pub trait CredentialRepository: Send + Sync {
    /// Look up a credential by its unique username
    async fn find_by_username(&self, username: &str) -> Result<Option<Credential>>;

    /// Look up a credential by user id
    async fn find_by_id(&self, user_id: i64) -> Result<Option<Credential>>;

    /// Insert a credential and return the assigned user id.
    ///
    /// A duplicate username or email yields `DiaryError::Conflict`.
    async fn insert(&self, credential: &NewCredential) -> Result<i64>;
}

/// Revoked token persistence
///
/// Keys are opaque strings chosen by the caller (the auth layer stores token
/// digests). A key is present at most once.
#[async_trait]
pub trait BlacklistRepository: Send + Sync {
    /// Record a key until `expires_at`. Re-adding keeps the later expiry.
    async fn add(&self, key: &str, expires_at: DateTime<Utc>) -> Result<()>;

    /// Record a key only if it is absent. Returns `false` when an entry
    /// already existed, so at most one caller claims a given key.
    async fn try_add(&self, key: &str, expires_at: DateTime<Utc>) -> Result<bool>;

    /// True only while an entry for `key` expires strictly after `now`
    async fn is_blacklisted(&self, key: &str, now: DateTime<Utc>) -> Result<bool>;

    /// Delete entries whose expiry is at or before `now`; returns the count removed
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// SQLite-backed store
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `database_url` and make sure
    /// the auth tables exist
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| DiaryError::ConfigError(format!("Invalid database URL: {e}")))?
            .create_if_missing(true)
            .foreign_keys(true);

        if let Some(dir) = options.get_filename().parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir).map_err(|e| {
                    DiaryError::DatabaseError(format!(
                        "Failed to create storage directory {}: {e}",
                        dir.display()
                    ))
                })?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|e| DiaryError::DatabaseError(format!("SQLite connection failed: {e}")))?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Private in-memory database, mainly for tests
    ///
    /// The pool is pinned to a single connection that never idles out,
    /// because every SQLite memory connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| DiaryError::ConfigError(e.to_string()))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| DiaryError::DatabaseError(format!("SQLite connection failed: {e}")))?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create from an existing pool
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the credential and blacklist tables when missing
    pub async fn init_schema(&self) -> Result<()> {
        for statement in [
            CREATE_USERS_SQL,
            CREATE_BLACKLIST_SQL,
            CREATE_BLACKLIST_EXPIRY_INDEX_SQL,
        ] {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| DiaryError::DatabaseError(format!("Schema setup failed: {e}")))?;
        }
        Ok(())
    }

    /// Round-trip to the database for readiness checks
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| DiaryError::DatabaseError(format!("Ping failed: {e}")))?;
        Ok(())
    }
}

/// User row from database
#[derive(Debug, FromRow)]
struct UserRow {
    user_id: i64,
    username: String,
    email: String,
    password_hash: String,
    created_at: i64,
}

impl From<UserRow> for Credential {
    fn from(row: UserRow) -> Self {
        Credential {
            id: row.user_id,
            username: row.username,
            email: row.email,
            password_hash: row.password_hash,
            created_at: Utc
                .timestamp_opt(row.created_at, 0)
                .single()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl CredentialRepository for SqliteStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<Credential>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT user_id, username, email, password_hash, created_at FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DiaryError::DatabaseError(format!("Failed to fetch user: {e}")))?;

        Ok(row.map(Credential::from))
    }

    async fn find_by_id(&self, user_id: i64) -> Result<Option<Credential>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT user_id, username, email, password_hash, created_at FROM users WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DiaryError::DatabaseError(format!("Failed to fetch user: {e}")))?;

        Ok(row.map(Credential::from))
    }

    async fn insert(&self, credential: &NewCredential) -> Result<i64> {
        credential.ensure_complete()?;

        let result = sqlx::query(
            "INSERT INTO users (username, email, password_hash, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&credential.username)
        .bind(&credential.email)
        .bind(&credential.password_hash)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                DiaryError::Conflict("username or email already exists".to_string())
            }
            other => DiaryError::DatabaseError(format!("Failed to create user: {other}")),
        })?;

        Ok(result.last_insert_rowid())
    }
}

#[async_trait]
impl BlacklistRepository for SqliteStore {
    async fn add(&self, key: &str, expires_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO blacklisted_tokens (token, expiration_time, blacklisted_at)
            VALUES (?, ?, ?)
            ON CONFLICT (token) DO UPDATE
                SET expiration_time = MAX(expiration_time, excluded.expiration_time)
            "#,
        )
        .bind(key)
        .bind(expires_at.timestamp())
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| DiaryError::DatabaseError(format!("Failed to blacklist token: {e}")))?;

        Ok(())
    }

    async fn try_add(&self, key: &str, expires_at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO blacklisted_tokens (token, expiration_time, blacklisted_at)
            VALUES (?, ?, ?)
            ON CONFLICT (token) DO NOTHING
            "#,
        )
        .bind(key)
        .bind(expires_at.timestamp())
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| DiaryError::DatabaseError(format!("Failed to blacklist token: {e}")))?;

        Ok(result.rows_affected() == 1)
    }

    async fn is_blacklisted(&self, key: &str, now: DateTime<Utc>) -> Result<bool> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM blacklisted_tokens WHERE token = ? AND expiration_time > ?",
        )
        .bind(key)
        .bind(now.timestamp())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DiaryError::DatabaseError(format!("Failed to check blacklist: {e}")))?;

        Ok(count > 0)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM blacklisted_tokens WHERE expiration_time <= ?")
            .bind(now.timestamp())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                DiaryError::DatabaseError(format!("Failed to remove expired tokens: {e}"))
            })?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tokio_test::assert_ok;

    async fn store() -> SqliteStore {
        SqliteStore::in_memory().await.expect("in-memory store")
    }

    #[tokio::test]
    async fn test_insert_and_find_credential() {
        let store = store().await;
        let id = assert_ok!(
            store
                .insert(&NewCredential::new("alice", "alice@x.com", "hash-a"))
                .await
        );

        let by_name = store.find_by_username("alice").await.unwrap().unwrap();
        assert_eq!(by_name.id, id);
        assert_eq!(by_name.email, "alice@x.com");
        assert_eq!(by_name.password_hash, "hash-a");

        let by_id = store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(by_id.username, "alice");

        assert!(store.find_by_username("nobody").await.unwrap().is_none());
        assert!(store.find_by_id(id + 100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_username_or_email_is_conflict() {
        let store = store().await;
        let first = store
            .insert(&NewCredential::new("alice", "alice@x.com", "hash"))
            .await
            .unwrap();

        let same_name = store
            .insert(&NewCredential::new("alice", "other@x.com", "hash"))
            .await;
        assert!(matches!(same_name, Err(DiaryError::Conflict(_))));

        let same_email = store
            .insert(&NewCredential::new("alice2", "alice@x.com", "hash"))
            .await;
        assert!(matches!(same_email, Err(DiaryError::Conflict(_))));

        let kept = store.find_by_username("alice").await.unwrap().unwrap();
        assert_eq!(kept.id, first);
    }

    #[tokio::test]
    async fn test_insert_rejects_incomplete_credential() {
        let store = store().await;
        let result = store.insert(&NewCredential::new("", "x@x.com", "h")).await;
        assert!(matches!(result, Err(DiaryError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_blacklist_respects_expiry() {
        let store = store().await;
        let now = Utc::now();

        assert_ok!(store.add("live", now + Duration::minutes(5)).await);
        assert_ok!(store.add("dead", now - Duration::seconds(1)).await);

        assert!(store.is_blacklisted("live", now).await.unwrap());
        assert!(!store.is_blacklisted("dead", now).await.unwrap());
        assert!(!store.is_blacklisted("unknown", now).await.unwrap());

        // Once the clock passes the recorded expiry the entry no longer counts
        let later = now + Duration::minutes(6);
        assert!(!store.is_blacklisted("live", later).await.unwrap());
    }

    #[tokio::test]
    async fn test_try_add_claims_once() {
        let store = store().await;
        let expires = Utc::now() + Duration::minutes(5);

        assert!(store.try_add("refresh", expires).await.unwrap());
        assert!(!store.try_add("refresh", expires).await.unwrap());
        assert!(store.is_blacklisted("refresh", Utc::now()).await.unwrap());

        store.add("other", expires).await.unwrap();
        assert!(!store.try_add("other", expires).await.unwrap());
    }

    #[tokio::test]
    async fn test_blacklist_key_is_unique() {
        let store = store().await;
        let now = Utc::now();

        store.add("token", now + Duration::minutes(1)).await.unwrap();
        store.add("token", now + Duration::minutes(10)).await.unwrap();
        store.add("token", now + Duration::minutes(2)).await.unwrap();

        let rows = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM blacklisted_tokens")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(rows, 1);

        // The later expiry wins
        assert!(store
            .is_blacklisted("token", now + Duration::minutes(5))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_delete_expired() {
        let store = store().await;
        let now = Utc::now();

        store.add("a", now - Duration::minutes(1)).await.unwrap();
        store.add("b", now).await.unwrap();
        store.add("c", now + Duration::minutes(1)).await.unwrap();

        let removed = assert_ok!(store.delete_expired(now).await);
        assert_eq!(removed, 2);
        assert!(store.is_blacklisted("c", now).await.unwrap());

        assert_eq!(store.delete_expired(now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ping() {
        let store = store().await;
        assert_ok!(store.ping().await);
    }
}
