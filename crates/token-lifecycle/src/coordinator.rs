//! Single-flight refresh coordination
//!
//! At most one refresh exchange runs per coordinator. The first caller that
//! finds the coordinator `Idle` spawns the exchange on its own task and
//! parks a shared handle to the result in `RefreshState::InFlight`; every
//! caller arriving before the exchange settles awaits that same handle.
//! Rotating refresh tokens are single-use, so two racing exchanges would
//! invalidate each other.
//!
//! The spawned task owns the exchange end to end: persist on success, clear
//! on failure, then reset the state to `Idle`. Dropping a waiter's future
//! never cancels it.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tracing::{debug, info, warn};

use crate::credentials::{CredentialStore, TokenPair};
use crate::error::{Error, Result};
use crate::exchange;

type PendingRefresh = Shared<BoxFuture<'static, Option<String>>>;

/// Process-local refresh state.
enum RefreshState {
    Idle,
    InFlight(PendingRefresh),
}

/// Performs the refresh exchange with single-flight semantics.
///
/// Cheap to clone; clones share the same state and store.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<CredentialStore>,
    http_client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
    /// Never held across an await.
    state: Mutex<RefreshState>,
}

impl RefreshCoordinator {
    /// Coordinator with its own HTTP client bounded by `timeout`.
    pub fn new(store: Arc<CredentialStore>, base_url: &str, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("building HTTP client: {e}")))?;
        Ok(Self::with_client(store, http_client, base_url, timeout))
    }

    /// Coordinator sharing a caller-supplied HTTP client.
    ///
    /// `timeout` bounds each exchange even if the client has no timeout of
    /// its own.
    pub fn with_client(
        store: Arc<CredentialStore>,
        http_client: reqwest::Client,
        base_url: &str,
        timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                http_client,
                endpoint: exchange::refresh_endpoint(base_url),
                timeout,
                state: Mutex::new(RefreshState::Idle),
            }),
        }
    }

    /// Refresh the stored pair, joining an in-flight refresh if there is one.
    ///
    /// Returns the new access token, or `None` if there was nothing to
    /// refresh with or the exchange failed (in which case the stored pair has
    /// been cleared). Every caller attached to the same flight gets the same
    /// result.
    pub async fn refresh(&self) -> Option<String> {
        let pending = {
            let mut state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
            match &*state {
                RefreshState::InFlight(pending) => {
                    debug!("joining in-flight token refresh");
                    metrics::counter!("token_refresh_joined_total").increment(1);
                    pending.clone()
                }
                RefreshState::Idle => {
                    let pending = self.start_flight();
                    *state = RefreshState::InFlight(pending.clone());
                    pending
                }
            }
        };
        pending.await
    }

    /// Whether a refresh exchange is currently outstanding.
    pub fn is_refreshing(&self) -> bool {
        let state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        matches!(*state, RefreshState::InFlight(_))
    }

    /// Spawn the exchange and wrap its join handle as a shareable future.
    ///
    /// Called with the state lock held; the task cannot reset the state
    /// before the caller has installed `InFlight`.
    fn start_flight(&self) -> PendingRefresh {
        debug!(endpoint = %self.inner.endpoint, "starting token refresh");
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            let _idle = IdleOnDrop(inner.clone());
            inner.run_refresh().await
        });

        async move {
            handle.await.unwrap_or_else(|e| {
                warn!(error = %e, "token refresh task did not complete");
                None
            })
        }
        .boxed()
        .shared()
    }
}

impl Inner {
    async fn run_refresh(&self) -> Option<String> {
        let Some(current) = self.store.read().await else {
            debug!("no stored refresh token, skipping refresh");
            metrics::counter!("token_refresh_total", "outcome" => "skipped").increment(1);
            return None;
        };

        match self.exchange(&current).await {
            Ok(tokens) => {
                let pair = TokenPair::from_expires_in(
                    tokens.access_token,
                    tokens.refresh_token,
                    tokens.expires_in,
                    Utc::now(),
                );
                if let Err(e) = self.store.store(&pair).await {
                    warn!(error = %e, "failed to persist refreshed tokens");
                    metrics::counter!("token_refresh_failures_total", "kind" => e.kind())
                        .increment(1);
                }
                info!(expires_at = %pair.expires_at, "token refresh succeeded");
                metrics::counter!("token_refresh_total", "outcome" => "success").increment(1);
                Some(pair.access_token().to_string())
            }
            Err(e) => {
                warn!(error = %e, kind = e.kind(), "token refresh failed, clearing credentials");
                metrics::counter!("token_refresh_total", "outcome" => "failure").increment(1);
                metrics::counter!("token_refresh_failures_total", "kind" => e.kind()).increment(1);
                self.store.clear().await;
                None
            }
        }
    }

    async fn exchange(&self, current: &TokenPair) -> Result<exchange::TokenResponse> {
        let request =
            exchange::refresh_token(&self.http_client, &self.endpoint, current.refresh_token());
        match tokio::time::timeout(self.timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(Error::NetworkFailure(format!(
                "refresh exceeded {}ms",
                self.timeout.as_millis()
            ))),
        }
    }
}

/// Returns the coordinator to `Idle` when the refresh task ends, including
/// by panic or runtime shutdown.
struct IdleOnDrop(Arc<Inner>);

impl Drop for IdleOnDrop {
    fn drop(&mut self) {
        let mut state = self.0.state.lock().unwrap_or_else(PoisonError::into_inner);
        *state = RefreshState::Idle;
    }
}
