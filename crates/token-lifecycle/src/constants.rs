//! Storage keys, endpoint path and timing defaults
//!
//! The key names are shared with every other client that reads the same
//! store, so they must not change.

use std::time::Duration;

/// Storage key holding the bearer access token
pub const ACCESS_TOKEN_KEY: &str = "docfiscal_access_token";

/// Storage key holding the refresh token
pub const REFRESH_TOKEN_KEY: &str = "docfiscal_refresh_token";

/// Storage key holding the access token expiry as an RFC 3339 timestamp
pub const EXPIRES_AT_KEY: &str = "docfiscal_token_expires_at";

/// All credential keys, in write order
pub const CREDENTIAL_KEYS: [&str; 3] = [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, EXPIRES_AT_KEY];

/// Path of the refresh exchange, appended to the configured base URL
pub const REFRESH_PATH: &str = "/api/auth/refresh";

/// Tokens expiring within this many seconds are refreshed proactively
pub const DEFAULT_REFRESH_THRESHOLD_SECS: i64 = 5 * 60;

/// Upper bound on a single refresh exchange
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(30);
