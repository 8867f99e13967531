//! Token blacklist service
//!
//! Wraps the persistent [`BlacklistRepository`] with token hashing, so raw
//! bearer tokens never reach storage, and owns the periodic sweep task.

use crate::audit::{audit_log, AuditEvent};
use chrono::{DateTime, Utc};
use diary_core::{BlacklistRepository, Result};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Storage key for a token: lowercase hex SHA-256 of the token string
pub fn token_key(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

/// Revoked-token registry backed by a [`BlacklistRepository`]
#[derive(Clone)]
pub struct TokenBlacklist {
    repo: Arc<dyn BlacklistRepository>,
    swept: Arc<AtomicU64>,
}

impl TokenBlacklist {
    pub fn new(repo: Arc<dyn BlacklistRepository>) -> Self {
        Self {
            repo,
            swept: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Revoke a token until `expires_at`
    ///
    /// Re-adding a token keeps the later of the two expiries.
    pub async fn add(&self, token: &str, expires_at: DateTime<Utc>) -> Result<()> {
        self.repo.add(&token_key(token), expires_at).await
    }

    /// Revoke a token unless it is already revoked
    ///
    /// Returns `true` only for the caller whose entry was stored.
    pub async fn claim(&self, token: &str, expires_at: DateTime<Utc>) -> Result<bool> {
        self.repo.try_add(&token_key(token), expires_at).await
    }

    /// True while a matching entry exists whose expiry is still in the future
    pub async fn is_blacklisted(&self, token: &str) -> Result<bool> {
        self.repo.is_blacklisted(&token_key(token), Utc::now()).await
    }

    /// Delete entries that have expired, returning how many were removed
    pub async fn sweep(&self) -> Result<u64> {
        let removed = self.repo.delete_expired(Utc::now()).await?;
        self.swept.fetch_add(removed, Ordering::Relaxed);
        Ok(removed)
    }

    /// Total entries removed by sweeps since startup
    pub fn swept_total(&self) -> u64 {
        self.swept.load(Ordering::Relaxed)
    }

    /// Run [`sweep`](Self::sweep) every `period` until the handle is aborted
    ///
    /// Sweep failures are logged and retried on the next tick.
    pub fn spawn_sweeper(&self, period: Duration) -> JoinHandle<()> {
        let blacklist = self.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;

                match blacklist.sweep().await {
                    Ok(removed) => audit_log(&AuditEvent::BlacklistSwept { removed }),
                    Err(e) => tracing::warn!(error = %e, "Blacklist sweep failed"),
                }
            }
        })
    }
}
