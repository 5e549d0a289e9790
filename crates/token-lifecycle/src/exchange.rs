//! Refresh token exchange
//!
//! One interaction with the auth server: `POST /api/auth/refresh` with the
//! current refresh token, answered by a `{ success, tokens }` envelope. The
//! envelope is validated in two stages (the `success` flag first, then the
//! `tokens` object) so that anything short of a well-formed grant fails
//! closed instead of producing a partial `TokenPair`.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::REFRESH_PATH;
use crate::error::{Error, Result};

/// Tokens granted by a successful refresh.
///
/// `expires_in` is a delta in seconds from the response time. The caller
/// converts it to an absolute expiry when building the `TokenPair`.
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// Seconds until the access token expires (delta, not absolute)
    pub expires_in: u64,
}

/// Outer response body. Only `success` is trusted until it is `true`.
#[derive(Debug, Deserialize)]
struct RefreshEnvelope {
    success: bool,
    #[serde(default)]
    tokens: Option<serde_json::Value>,
}

/// Validated result of the refresh endpoint.
#[derive(Debug)]
pub enum RefreshOutcome {
    Granted(TokenResponse),
    Denied,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

impl RefreshOutcome {
    /// Validate a raw response body.
    pub fn parse(body: &[u8]) -> Result<Self> {
        let envelope: RefreshEnvelope = serde_json::from_slice(body)
            .map_err(|e| Error::MalformedResponse(format!("invalid refresh envelope: {e}")))?;

        if !envelope.success {
            return Ok(RefreshOutcome::Denied);
        }

        let tokens = match envelope.tokens {
            Some(value @ serde_json::Value::Object(_)) => value,
            Some(_) => {
                return Err(Error::MalformedResponse("`tokens` is not an object".into()));
            }
            None => return Err(Error::MalformedResponse("missing `tokens`".into())),
        };

        let tokens: TokenResponse = serde_json::from_value(tokens)
            .map_err(|e| Error::MalformedResponse(format!("invalid `tokens`: {e}")))?;

        if tokens.access_token.is_empty() {
            return Err(Error::MalformedResponse("empty access_token".into()));
        }
        if tokens.refresh_token.is_empty() {
            return Err(Error::MalformedResponse("empty refresh_token".into()));
        }

        Ok(RefreshOutcome::Granted(tokens))
    }
}

/// Full URL of the refresh endpoint under `base_url`.
pub fn refresh_endpoint(base_url: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), REFRESH_PATH)
}

/// Exchange a refresh token for a new token pair.
///
/// Transport errors and timeouts are `NetworkFailure`, non-2xx statuses and
/// `success: false` are `RefreshRejected`, and any body that does not
/// validate is `MalformedResponse`. Response bodies are never included in
/// errors since they may carry token material.
pub async fn refresh_token(
    client: &reqwest::Client,
    endpoint: &str,
    refresh: &str,
) -> Result<TokenResponse> {
    let response = client
        .post(endpoint)
        .json(&RefreshRequest {
            refresh_token: refresh,
        })
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                Error::NetworkFailure("refresh request timed out".into())
            } else {
                Error::NetworkFailure(format!("refresh request failed: {e}"))
            }
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::RefreshRejected(format!(
            "refresh endpoint returned {status}"
        )));
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| Error::NetworkFailure(format!("reading refresh response: {e}")))?;

    match RefreshOutcome::parse(&body)? {
        RefreshOutcome::Granted(tokens) => {
            debug!(expires_in = tokens.expires_in, "refresh endpoint granted new tokens");
            Ok(tokens)
        }
        RefreshOutcome::Denied => Err(Error::RefreshRejected(
            "refresh endpoint reported success: false".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn granted(access: &str, refresh: &str, expires_in: u64) -> serde_json::Value {
        serde_json::json!({
            "success": true,
            "tokens": {
                "access_token": access,
                "refresh_token": refresh,
                "expires_in": expires_in
            }
        })
    }

    #[test]
    fn parses_granted_envelope() {
        let body = granted("A2", "R2", 3600).to_string();
        match RefreshOutcome::parse(body.as_bytes()).unwrap() {
            RefreshOutcome::Granted(tokens) => {
                assert_eq!(tokens.access_token, "A2");
                assert_eq!(tokens.refresh_token, "R2");
                assert_eq!(tokens.expires_in, 3600);
            }
            RefreshOutcome::Denied => panic!("expected granted"),
        }
    }

    #[test]
    fn success_false_is_denied_regardless_of_shape() {
        for body in [
            r#"{"success":false}"#,
            r#"{"success":false,"tokens":"nope"}"#,
            r#"{"success":false,"error":{"code":"expired"}}"#,
        ] {
            assert!(
                matches!(RefreshOutcome::parse(body.as_bytes()), Ok(RefreshOutcome::Denied)),
                "body: {body}"
            );
        }
    }

    #[test]
    fn invalid_bodies_are_malformed() {
        for body in [
            "not json",
            "",
            r#"{"tokens":{}}"#,
            r#"{"success":"yes"}"#,
            r#"{"success":true}"#,
            r#"{"success":true,"tokens":null}"#,
            r#"{"success":true,"tokens":"A2"}"#,
            r#"{"success":true,"tokens":[1,2]}"#,
            r#"{"success":true,"tokens":{"access_token":"A2","refresh_token":"R2"}}"#,
            r#"{"success":true,"tokens":{"access_token":"A2","refresh_token":"R2","expires_in":-1}}"#,
            r#"{"success":true,"tokens":{"access_token":"","refresh_token":"R2","expires_in":60}}"#,
            r#"{"success":true,"tokens":{"access_token":"A2","refresh_token":"","expires_in":60}}"#,
        ] {
            assert!(
                matches!(
                    RefreshOutcome::parse(body.as_bytes()),
                    Err(Error::MalformedResponse(_))
                ),
                "body: {body}"
            );
        }
    }

    #[test]
    fn endpoint_joins_base_url() {
        assert_eq!(
            refresh_endpoint("https://app.example.com"),
            "https://app.example.com/api/auth/refresh"
        );
        assert_eq!(
            refresh_endpoint("https://app.example.com/"),
            "https://app.example.com/api/auth/refresh"
        );
    }

    #[tokio::test]
    async fn posts_refresh_token_as_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/refresh"))
            .and(header("content-type", "application/json"))
            .and(body_json(serde_json::json!({ "refresh_token": "R1" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(granted("A2", "R2", 3600)))
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let tokens = refresh_token(&client, &refresh_endpoint(&server.uri()), "R1")
            .await
            .unwrap();
        assert_eq!(tokens.access_token, "A2");
        assert_eq!(tokens.refresh_token, "R2");
    }

    #[tokio::test]
    async fn error_statuses_are_rejections() {
        for status in [400, 401, 403, 500, 502, 503] {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/api/auth/refresh"))
                .respond_with(ResponseTemplate::new(status).set_body_json(granted("A2", "R2", 60)))
                .mount(&server)
                .await;

            let client = reqwest::Client::new();
            let err = refresh_token(&client, &refresh_endpoint(&server.uri()), "R1")
                .await
                .unwrap_err();
            assert!(
                matches!(err, Error::RefreshRejected(_)),
                "status {status}: {err:?}"
            );
        }
    }

    #[tokio::test]
    async fn success_false_is_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/refresh"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "success": false })),
            )
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let err = refresh_token(&client, &refresh_endpoint(&server.uri()), "R1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RefreshRejected(_)), "{err:?}");
    }

    #[tokio::test]
    async fn garbage_body_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let err = refresh_token(&client, &refresh_endpoint(&server.uri()), "R1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MalformedResponse(_)), "{err:?}");
    }

    #[tokio::test]
    async fn slow_endpoint_times_out_as_network_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/refresh"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(granted("A2", "R2", 60))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .unwrap();
        let err = refresh_token(&client, &refresh_endpoint(&server.uri()), "R1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NetworkFailure(_)), "{err:?}");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_network_failure() {
        let client = reqwest::Client::new();
        // Port 9 (discard) on localhost is not expected to accept connections
        let err = refresh_token(&client, "http://127.0.0.1:9/api/auth/refresh", "R1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NetworkFailure(_)), "{err:?}");
    }
}
