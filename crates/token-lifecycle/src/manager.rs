//! Token lifecycle facade
//!
//! The only entry point the rest of the application needs. It answers
//! "give me a usable access token" from storage when the stored token is
//! fresh, and hands off to the `RefreshCoordinator` when it is within the
//! refresh threshold. Every failure surfaces as `None`; nothing here
//! returns an error or panics.
//!
//! Lifecycle of one pair: `Unset → Valid → NearExpiry → Refreshing → Valid
//! → … → Cleared`, where `Cleared` lasts until the next `store_tokens`.

use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use tracing::{debug, warn};

use crate::coordinator::RefreshCoordinator;
use crate::credentials::{CredentialStore, TokenPair};
use crate::expiry::ExpiryPolicy;

pub struct TokenLifecycleManager {
    store: Arc<CredentialStore>,
    policy: ExpiryPolicy,
    coordinator: RefreshCoordinator,
}

impl TokenLifecycleManager {
    /// Compose the facade. `coordinator` must refresh into the same `store`.
    pub fn new(store: Arc<CredentialStore>, coordinator: RefreshCoordinator) -> Self {
        Self {
            store,
            policy: ExpiryPolicy::default(),
            coordinator,
        }
    }

    /// Override the default five minute refresh threshold.
    pub fn with_refresh_threshold(mut self, threshold: TimeDelta) -> Self {
        self.policy = ExpiryPolicy::new(threshold);
        self
    }

    pub fn policy(&self) -> ExpiryPolicy {
        self.policy
    }

    /// Persist a newly issued pair (login, registration, external exchange).
    ///
    /// Storage failures are logged and swallowed; the store guarantees the
    /// previous pair or no pair remains readable.
    pub async fn store_tokens(&self, pair: TokenPair) {
        if let Err(e) = self.store.store(&pair).await {
            warn!(error = %e, "failed to store issued tokens");
        }
    }

    /// The stored pair as-is, with no refresh side effects.
    pub async fn get_stored_tokens(&self) -> Option<TokenPair> {
        self.store.read().await
    }

    /// Whether `token` is expired according to its stored expiry.
    ///
    /// A token that is not the currently stored access token counts as
    /// expired.
    pub async fn is_token_expired(&self, token: &str) -> bool {
        match self.store.read().await {
            Some(pair) if pair.access_token() == token => {
                self.policy.is_expired(pair.expires_at, Utc::now())
            }
            _ => true,
        }
    }

    /// Whether the stored token is within the refresh threshold. True when
    /// nothing is stored.
    pub async fn needs_refresh(&self) -> bool {
        match self.store.read().await {
            Some(pair) => self.policy.needs_refresh(pair.expires_at, Utc::now()),
            None => true,
        }
    }

    /// A usable access token, refreshing first if needed.
    ///
    /// `None` means re-authentication is required. Concurrent callers that
    /// find the token stale share one refresh and one result.
    pub async fn get_valid_token(&self) -> Option<String> {
        let Some(pair) = self.store.read().await else {
            debug!("no stored credentials");
            return None;
        };

        if !self.policy.needs_refresh(pair.expires_at, Utc::now()) {
            return Some(pair.access_token().to_string());
        }

        debug!(expires_at = %pair.expires_at, "access token within refresh threshold");
        self.coordinator.refresh().await
    }

    /// Forget the stored pair (logout).
    pub async fn clear_tokens(&self) {
        self.store.clear().await;
    }
}
