//! tokenctl
//!
//! Operator CLI over the token lifecycle manager:
//! 1. `status` inspects the stored pair without refreshing
//! 2. `token` prints a valid access token, refreshing if needed
//! 3. `store` persists a newly issued pair
//! 4. `clear` forgets the stored pair

mod config;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use token_lifecycle::{
    CredentialStore, FileStore, RefreshCoordinator, TokenLifecycleManager, TokenPair,
};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

const USAGE: &str = "usage: tokenctl [--config PATH] <command>

commands:
  status                                  show the stored token pair (no refresh)
  token                                   print a valid access token, refreshing if needed
  store <ACCESS> <REFRESH> <EXPIRES_IN>   store a newly issued pair (EXPIRES_IN in seconds)
  clear                                   forget the stored pair";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Status,
    Token,
    Store {
        access: String,
        refresh: String,
        expires_in: u64,
    },
    Clear,
}

/// Result of one command, rendered by `main`.
#[derive(Debug, Default, PartialEq, Eq)]
struct Output {
    code: u8,
    stdout: Option<String>,
    stderr: Option<String>,
}

/// Split `--config PATH` from the command and its arguments.
fn parse_args(args: &[String]) -> std::result::Result<(Option<String>, Command), String> {
    let mut config_path = None;
    let mut rest = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--config" {
            let path = iter.next().ok_or("--config requires a path")?;
            config_path = Some(path.clone());
        } else {
            rest.push(arg.as_str());
        }
    }

    let command = match rest.as_slice() {
        ["status"] => Command::Status,
        ["token"] => Command::Token,
        ["clear"] => Command::Clear,
        ["store", access, refresh, expires_in] => {
            if access.is_empty() || refresh.is_empty() {
                return Err("tokens must not be empty".into());
            }
            let expires_in = expires_in
                .parse::<u64>()
                .map_err(|e| format!("invalid EXPIRES_IN {expires_in:?}: {e}"))?;
            Command::Store {
                access: access.to_string(),
                refresh: refresh.to_string(),
                expires_in,
            }
        }
        [] => return Err("missing command".into()),
        [other, ..] => return Err(format!("unknown or malformed command: {other}")),
    };

    Ok((config_path, command))
}

/// Wire the store, coordinator and facade from configuration.
async fn build_manager(config: &Config) -> Result<TokenLifecycleManager> {
    let backend = FileStore::load(config.storage.path.clone())
        .await
        .with_context(|| format!("opening credential file {}", config.storage.path.display()))?;
    let store = Arc::new(CredentialStore::new(Arc::new(backend)));
    let coordinator =
        RefreshCoordinator::new(store.clone(), &config.auth.base_url, config.auth.timeout())?;
    Ok(TokenLifecycleManager::new(store, coordinator)
        .with_refresh_threshold(config.auth.refresh_threshold()))
}

async fn execute(manager: &TokenLifecycleManager, command: Command) -> Output {
    match command {
        Command::Status => {
            let policy = manager.policy();
            let status = match manager.get_stored_tokens().await {
                Some(pair) => {
                    let now = Utc::now();
                    serde_json::json!({
                        "stored": true,
                        "expires_at": pair.expires_at.to_rfc3339(),
                        "expired": policy.is_expired(pair.expires_at, now),
                        "needs_refresh": policy.needs_refresh(pair.expires_at, now),
                        "refresh_threshold_secs": policy.threshold().num_seconds(),
                    })
                }
                None => serde_json::json!({
                    "stored": false,
                    "refresh_threshold_secs": policy.threshold().num_seconds(),
                }),
            };
            Output {
                stdout: Some(status.to_string()),
                ..Default::default()
            }
        }
        Command::Token => match manager.get_valid_token().await {
            Some(token) => Output {
                stdout: Some(token),
                ..Default::default()
            },
            None => Output {
                code: 1,
                stderr: Some("re-authentication required".into()),
                ..Default::default()
            },
        },
        Command::Store {
            access,
            refresh,
            expires_in,
        } => {
            let pair = TokenPair::from_expires_in(access, refresh, expires_in, Utc::now());
            manager.store_tokens(pair).await;
            if manager.get_stored_tokens().await.is_some() {
                Output::default()
            } else {
                Output {
                    code: 1,
                    stderr: Some("failed to store tokens".into()),
                    ..Default::default()
                }
            }
        }
        Command::Clear => {
            manager.clear_tokens().await;
            Output::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Logs go to stderr as JSON; stdout carries command output only
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (cli_config_path, command) = match parse_args(&args) {
        Ok(parsed) => parsed,
        Err(msg) => {
            eprintln!("tokenctl: {msg}\n\n{USAGE}");
            return Ok(ExitCode::from(2));
        }
    };

    let config_path = Config::resolve_path(cli_config_path.as_deref());
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        base_url = %config.auth.base_url,
        storage = %config.storage.path.display(),
        refresh_threshold_secs = config.auth.refresh_threshold_secs,
        "configuration loaded"
    );

    let manager = build_manager(&config).await?;
    let output = execute(&manager, command).await;

    if let Some(stdout) = output.stdout {
        println!("{stdout}");
    }
    if let Some(stderr) = output.stderr {
        eprintln!("tokenctl: {stderr}");
    }
    Ok(ExitCode::from(output.code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthConfig, StorageConfig};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn test_config(base_url: &str, dir: &tempfile::TempDir) -> Config {
        Config {
            auth: AuthConfig {
                base_url: base_url.to_string(),
                timeout_secs: 5,
                refresh_threshold_secs: 300,
            },
            storage: StorageConfig {
                path: dir.path().join("credentials.json"),
            },
        }
    }

    #[test]
    fn parses_simple_commands() {
        assert_eq!(parse_args(&args(&["status"])).unwrap(), (None, Command::Status));
        assert_eq!(parse_args(&args(&["token"])).unwrap(), (None, Command::Token));
        assert_eq!(parse_args(&args(&["clear"])).unwrap(), (None, Command::Clear));
    }

    #[test]
    fn parses_config_flag_anywhere() {
        let (path, cmd) = parse_args(&args(&["--config", "/etc/t.toml", "token"])).unwrap();
        assert_eq!(path.as_deref(), Some("/etc/t.toml"));
        assert_eq!(cmd, Command::Token);

        let (path, _) = parse_args(&args(&["status", "--config", "x.toml"])).unwrap();
        assert_eq!(path.as_deref(), Some("x.toml"));
    }

    #[test]
    fn parses_store_command() {
        let (_, cmd) = parse_args(&args(&["store", "A1", "R1", "3600"])).unwrap();
        assert_eq!(
            cmd,
            Command::Store {
                access: "A1".into(),
                refresh: "R1".into(),
                expires_in: 3600,
            }
        );
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(parse_args(&args(&[])).is_err());
        assert!(parse_args(&args(&["rotate"])).is_err());
        assert!(parse_args(&args(&["store", "A1", "R1"])).is_err());
        assert!(parse_args(&args(&["store", "A1", "R1", "soon"])).is_err());
        assert!(parse_args(&args(&["store", "", "R1", "60"])).is_err());
        assert!(parse_args(&args(&["--config"])).is_err());
    }

    #[tokio::test]
    async fn store_status_token_clear_cycle() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/refresh"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let manager = build_manager(&test_config(&server.uri(), &dir)).await.unwrap();

        let out = execute(
            &manager,
            Command::Store {
                access: "A1".into(),
                refresh: "R1".into(),
                expires_in: 3600,
            },
        )
        .await;
        assert_eq!(out.code, 0);

        let out = execute(&manager, Command::Status).await;
        let status: serde_json::Value = serde_json::from_str(&out.stdout.unwrap()).unwrap();
        assert_eq!(status["stored"], true);
        assert_eq!(status["expired"], false);
        assert_eq!(status["needs_refresh"], false);
        assert_eq!(status["refresh_threshold_secs"], 300);

        let out = execute(&manager, Command::Token).await;
        assert_eq!(out.stdout.as_deref(), Some("A1"));

        let out = execute(&manager, Command::Clear).await;
        assert_eq!(out.code, 0);

        let out = execute(&manager, Command::Token).await;
        assert_eq!(out.code, 1);
        assert_eq!(out.stderr.as_deref(), Some("re-authentication required"));

        let out = execute(&manager, Command::Status).await;
        let status: serde_json::Value = serde_json::from_str(&out.stdout.unwrap()).unwrap();
        assert_eq!(status["stored"], false);
    }

    #[tokio::test]
    async fn token_command_refreshes_stale_pair_on_disk() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "tokens": { "access_token": "A2", "refresh_token": "R2", "expires_in": 3600 }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&server.uri(), &dir);
        let manager = build_manager(&config).await.unwrap();
        execute(
            &manager,
            Command::Store {
                access: "A1".into(),
                refresh: "R1".into(),
                expires_in: 10,
            },
        )
        .await;

        let out = execute(&manager, Command::Token).await;
        assert_eq!(out.stdout.as_deref(), Some("A2"));

        // A fresh process sees the rotated pair
        let reopened = build_manager(&config).await.unwrap();
        let pair = reopened.get_stored_tokens().await.unwrap();
        assert_eq!(pair.access_token(), "A2");
        assert_eq!(pair.refresh_token(), "R2");
    }
}
