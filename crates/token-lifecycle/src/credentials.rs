//! Credential custody for the access/refresh token pair
//!
//! The pair is kept under three keys of a `KeyValueStore` but is only ever
//! written through one `apply` batch and observed as a unit. Writers
//! (`store`, `clear`) and readers (`read`) are serialized by a RwLock. Writes
//! run on their own task, so a caller that stops waiting cannot interrupt
//! one halfway. A failed `store` restores the previous values or, failing
//! that, purges all three keys.
//!
//! Anything short of a complete, parseable pair reads back as `None`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use common::Secret;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::backend::{Change, KeyValueStore};
use crate::constants::{ACCESS_TOKEN_KEY, CREDENTIAL_KEYS, EXPIRES_AT_KEY, REFRESH_TOKEN_KEY};
use crate::error::{Error, Result};

/// An issued access/refresh token pair.
///
/// `expires_at` is the absolute expiry of `access_token`. Token values are
/// redacted from `Debug` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: Secret<String>,
    pub refresh_token: Secret<String>,
    pub expires_at: DateTime<Utc>,
}

impl TokenPair {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: Secret::new(access_token.into()),
            refresh_token: Secret::new(refresh_token.into()),
            expires_at,
        }
    }

    /// Build a pair from a relative lifetime as returned by the token endpoint.
    pub fn from_expires_in(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_in_secs: u64,
        now: DateTime<Utc>,
    ) -> Self {
        let lifetime = i64::try_from(expires_in_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX);
        let expires_at = now.checked_add_signed(lifetime).unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self::new(access_token, refresh_token, expires_at)
    }

    pub fn access_token(&self) -> &str {
        self.access_token.expose()
    }

    pub fn refresh_token(&self) -> &str {
        self.refresh_token.expose()
    }
}

/// Raw values of the three keys, used to roll back a failed write.
type Snapshot = Vec<(&'static str, Option<String>)>;

/// Fail-safe persistence of the `TokenPair`.
pub struct CredentialStore {
    inner: Arc<Inner>,
}

struct Inner {
    backend: Arc<dyn KeyValueStore>,
    lock: RwLock<()>,
    /// Set when a failed write could neither be rolled back nor purged. Reads
    /// report no credentials until a later write or clear fully succeeds.
    poisoned: AtomicBool,
}

impl CredentialStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                lock: RwLock::new(()),
                poisoned: AtomicBool::new(false),
            }),
        }
    }

    /// Replace the stored pair with `pair`.
    ///
    /// On error the previous pair is restored, or all keys are purged if the
    /// restore also fails. Either way no mixed old/new pair is observable.
    /// Dropping the returned future does not abort a write in progress.
    pub async fn store(&self, pair: &TokenPair) -> Result<()> {
        let inner = self.inner.clone();
        let pair = pair.clone();
        tokio::spawn(async move { inner.store(&pair).await })
            .await
            .unwrap_or_else(|e| {
                Err(Error::StorageUnavailable(format!(
                    "credential write task did not complete: {e}"
                )))
            })
    }

    /// Read the stored pair, or `None` if it is absent, partial or unreadable.
    pub async fn read(&self) -> Option<TokenPair> {
        self.inner.read().await
    }

    /// Remove all three keys. Failures are logged, never returned.
    pub async fn clear(&self) {
        let inner = self.inner.clone();
        if let Err(e) = tokio::spawn(async move { inner.clear().await }).await {
            warn!(error = %e, "credential clear task did not complete");
        }
    }
}

impl Inner {
    async fn store(&self, pair: &TokenPair) -> Result<()> {
        let _guard = self.lock.write().await;
        let previous = self.snapshot().await;

        let expires_at = pair.expires_at.to_rfc3339_opts(SecondsFormat::Millis, true);
        let changes = [
            (ACCESS_TOKEN_KEY, Some(pair.access_token())),
            (REFRESH_TOKEN_KEY, Some(pair.refresh_token())),
            (EXPIRES_AT_KEY, Some(expires_at.as_str())),
        ];

        if let Err(e) = self.backend.apply(&changes).await {
            warn!(error = %e, "credential write failed, rolling back");
            self.restore(&previous).await;
            return Err(e);
        }

        self.poisoned.store(false, Ordering::Release);
        info!(expires_at = %pair.expires_at, "stored credentials");
        Ok(())
    }

    async fn read(&self) -> Option<TokenPair> {
        let _guard = self.lock.read().await;
        if self.poisoned.load(Ordering::Acquire) {
            debug!("credential store poisoned by failed write, reporting no credentials");
            return None;
        }

        let access = self.read_key(ACCESS_TOKEN_KEY).await?;
        let refresh = self.read_key(REFRESH_TOKEN_KEY).await?;
        let expires_raw = self.read_key(EXPIRES_AT_KEY).await?;

        let expires_at = match DateTime::parse_from_rfc3339(&expires_raw) {
            Ok(ts) => ts.with_timezone(&Utc),
            Err(e) => {
                warn!(error = %e, "stored expiry is not a valid timestamp, ignoring credentials");
                return None;
            }
        };

        Some(TokenPair::new(access, refresh, expires_at))
    }

    async fn clear(&self) {
        let _guard = self.lock.write().await;
        if self.purge().await {
            self.poisoned.store(false, Ordering::Release);
            info!("cleared credentials");
        } else {
            self.poisoned.store(true, Ordering::Release);
        }
    }

    /// Non-empty value of one key. Backend errors count as absence.
    async fn read_key(&self, key: &'static str) -> Option<String> {
        match self.backend.get(key).await {
            Ok(Some(value)) if !value.is_empty() => Some(value),
            Ok(_) => None,
            Err(e) => {
                warn!(key, error = %e, "credential read failed, treating as absent");
                None
            }
        }
    }

    async fn snapshot(&self) -> Snapshot {
        let mut values = Vec::with_capacity(CREDENTIAL_KEYS.len());
        for key in CREDENTIAL_KEYS {
            let value = self.backend.get(key).await.unwrap_or_else(|e| {
                warn!(key, error = %e, "could not snapshot key before write");
                None
            });
            values.push((key, value));
        }
        values
    }

    /// Put back the pre-write values, falling back to a purge.
    async fn restore(&self, previous: &Snapshot) {
        let changes: Vec<Change<'_>> = previous
            .iter()
            .map(|(key, value)| (*key, value.as_deref()))
            .collect();
        match self.backend.apply(&changes).await {
            Ok(()) => debug!("rolled back failed credential write"),
            Err(e) => {
                warn!(error = %e, "rollback failed, purging credentials");
                if !self.purge().await {
                    self.poisoned.store(true, Ordering::Release);
                }
            }
        }
    }

    /// Remove every key in one batch. Returns whether the removal succeeded.
    async fn purge(&self) -> bool {
        match self.backend.apply(&CREDENTIAL_KEYS.map(|key| (key, None::<&str>))).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "failed to remove credential keys");
                false
            }
        }
    }
}
