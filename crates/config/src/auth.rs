//! Authentication settings and GitHub token resolution.
//!
//! Authentication is a tagged union: either a personal/OAuth token or a
//! GitHub App identity. The two variants reject each other's fields, so a
//! config that mixes `token` with `app_id` fails to parse.
//!
//! Tokens are resolved with a fallback chain:
//!
//! 1. Explicitly provided token (config file or caller)
//! 2. `GITHUB_TOKEN` environment variable
//! 3. `gh auth token` command (GitHub CLI)

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};

use crate::error::{ConfigError, Result};

/// Environment variable consulted when no explicit token is configured.
pub const TOKEN_ENV_VAR: &str = "GITHUB_TOKEN";

/// How the client authenticates against GitHub.
///
/// Secrets are held in [`SecretString`], so the derived `Debug` output never
/// contains the token or private key.
///
/// # Examples
///
/// ```
/// use contribmatch_config::AuthConfig;
///
/// let auth: AuthConfig = serde_json::from_str(r#"{"type": "token", "token": "ghp_x"}"#).unwrap();
/// assert!(auth.validate().is_ok());
/// assert!(!format!("{auth:?}").contains("ghp_x"));
///
/// // Mixing the variants is rejected while parsing
/// let mixed = serde_json::from_str::<AuthConfig>(
///     r#"{"type": "app", "app_id": 1, "private_key": "k", "token": "ghp_x"}"#,
/// );
/// assert!(mixed.is_err());
/// ```
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", deny_unknown_fields)]
pub enum AuthConfig {
    /// Personal access token or OAuth token supplied by the session provider.
    Token {
        /// The bearer token.
        #[serde(deserialize_with = "deserialize_secret")]
        token: SecretString,
    },
    /// GitHub App authentication.
    App {
        /// The numeric GitHub App id.
        app_id: u64,
        /// PEM-encoded RSA private key of the app.
        #[serde(deserialize_with = "deserialize_secret")]
        private_key: SecretString,
        /// Installation to act as. Without it the client authenticates as
        /// the app itself.
        #[serde(default)]
        installation_id: Option<u64>,
    },
}

impl AuthConfig {
    /// Creates token authentication.
    #[must_use]
    pub fn token(token: impl Into<String>) -> Self {
        Self::Token {
            token: SecretString::from(token.into()),
        }
    }

    /// Creates GitHub App authentication.
    #[must_use]
    pub fn app(app_id: u64, private_key: impl Into<String>, installation_id: Option<u64>) -> Self {
        Self::App {
            app_id,
            private_key: SecretString::from(private_key.into()),
            installation_id,
        }
    }

    /// Returns the variant name as written in config files.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Token { .. } => "token",
            Self::App { .. } => "app",
        }
    }

    /// Checks that the secrets are present and plausibly shaped.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAuth`] for an empty token, a zero app or
    /// installation id, or a private key that is not PEM encoded.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Token { token } => {
                let token = token.expose_secret();
                if token.trim().is_empty() {
                    return Err(invalid_auth("token must not be empty"));
                }
                if token.chars().any(char::is_whitespace) {
                    return Err(invalid_auth("token must not contain whitespace"));
                }
            }
            Self::App {
                app_id,
                private_key,
                installation_id,
            } => {
                if *app_id == 0 {
                    return Err(invalid_auth("app_id must be a positive integer"));
                }
                if *installation_id == Some(0) {
                    return Err(invalid_auth("installation_id must be a positive integer"));
                }
                let key = private_key.expose_secret();
                if !(key.contains("-----BEGIN") && key.contains("PRIVATE KEY-----")) {
                    return Err(invalid_auth("private_key must be a PEM encoded private key"));
                }
            }
        }
        Ok(())
    }
}

fn invalid_auth(reason: &str) -> ConfigError {
    ConfigError::InvalidAuth {
        reason: reason.to_string(),
    }
}

fn deserialize_secret<'de, D>(deserializer: D) -> std::result::Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(SecretString::from)
}

/// Resolves a GitHub token from the explicit value, the environment, or
/// the `gh` CLI, in that order.
///
/// Returns `None` when no source yields a token.
///
/// # Examples
///
/// ```no_run
/// use contribmatch_config::auth::resolve_token;
///
/// # async fn example() {
/// let token = resolve_token(None).await;
/// println!("token available: {}", token.is_some());
/// # }
/// ```
pub async fn resolve_token(explicit: Option<&str>) -> Option<SecretString> {
    let from_env = std::env::var(TOKEN_ENV_VAR).ok();
    if let Some(token) = select_token(explicit, from_env.as_deref()) {
        return Some(token);
    }

    get_gh_token().await.ok().flatten().map(SecretString::from)
}

/// Picks the first non-blank token among the static sources.
fn select_token(explicit: Option<&str>, from_env: Option<&str>) -> Option<SecretString> {
    [explicit, from_env]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|token| !token.is_empty())
        .map(|token| SecretString::from(token.to_string()))
}

/// Gets a GitHub token from the `gh` CLI.
///
/// Runs `gh auth token` and returns the token if successful.
///
/// # Returns
///
/// - `Ok(Some(token))` if the command succeeds and returns a token
/// - `Ok(None)` if the `gh` command is not found or not logged in
/// - `Err(...)` if the command exists but fails
///
/// # Errors
///
/// Returns an error if the `gh` command exists but cannot be run or exits
/// with an unexpected failure.
pub async fn get_gh_token() -> Result<Option<String>> {
    use tokio::process::Command;

    let output = match Command::new("gh").args(["auth", "token"]).output().await {
        Ok(output) => output,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(None);
        }
        Err(e) => {
            return Err(ConfigError::GhAuthFailed(e));
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if stderr.contains("not logged in") || stderr.contains("no oauth token") {
            return Ok(None);
        }
        return Err(ConfigError::GhAuthError {
            code: output.status.code(),
            stderr,
        });
    }

    let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if token.is_empty() {
        return Ok(None);
    }

    Ok(Some(token))
}
