//! Client-side token lifecycle management
//!
//! Keeps a short-lived access token usable for the lifetime of the host
//! application. The access/refresh pair lives in a durable key-value store,
//! expiry is evaluated against a proactive refresh threshold, and concurrent
//! callers that find the token stale share a single refresh exchange.
//!
//! Call flow:
//! 1. Login hands the issued pair to `TokenLifecycleManager::store_tokens()`
//! 2. Callers ask `TokenLifecycleManager::get_valid_token()` before each request
//! 3. A fresh token is returned straight from `CredentialStore`
//! 4. A stale token goes through `RefreshCoordinator::refresh()`, which joins
//!    or starts the one in-flight `POST /api/auth/refresh`
//! 5. Success replaces the whole pair; any failure clears it and yields `None`

pub mod backend;
pub mod constants;
pub mod coordinator;
pub mod credentials;
pub mod error;
pub mod exchange;
pub mod expiry;
pub mod manager;

pub use backend::{Change, FileStore, KeyValueStore, MemoryStore};
pub use constants::*;
pub use coordinator::RefreshCoordinator;
pub use credentials::{CredentialStore, TokenPair};
pub use error::{Error, Result};
pub use exchange::{RefreshOutcome, TokenResponse, refresh_endpoint, refresh_token};
pub use expiry::ExpiryPolicy;
pub use manager::TokenLifecycleManager;
