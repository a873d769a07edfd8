//! The wire seam between the typed client and GitHub.
//!
//! [`Transport`] sends one raw request and hands back status, headers, and
//! body without interpreting them; classification and retries live above it.
//! [`OctocrabTransport`] is the production implementation: it drives
//! octocrab's raw `_get`/`_post` calls with octocrab's own retry layer
//! disabled, so every retry decision is made by [`crate::retry`].

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use contribmatch_config::{AuthConfig, ClientConfig};
use octocrab::Octocrab;
use octocrab::models::{AppId, InstallationId};
use octocrab::service::middleware::retry::RetryConfig as OctocrabRetry;
use secrecy::ExposeSecret;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::error::Result;

/// HTTP verbs used by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    /// Upper-case verb, as used in cache keys.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request relative to the API root, e.g. `/repos/o/r?per_page=30`.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub path: String,
    pub body: Option<Value>,
}

impl ApiRequest {
    /// A `GET` without a body.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            path: path.into(),
            body: None,
        }
    }

    /// A `POST` with a JSON body.
    #[must_use]
    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            path: path.into(),
            body: Some(body),
        }
    }
}

/// A raw response. Header names are stored lower-cased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    headers: HashMap<String, String>,
    pub body: String,
}

impl ApiResponse {
    /// A response without headers.
    #[must_use]
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    /// Adds a header, replacing any previous value.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Looks up a header case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    #[must_use]
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Returns `true` for 2xx statuses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Failures below the HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The request never produced a response (DNS, TLS, connection reset...).
    #[error("connection failed: {0}")]
    Connection(String),
}

/// Sends raw requests to the GitHub API.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Sends one request. Non-2xx responses are returned as `Ok`.
    async fn send(&self, request: ApiRequest) -> std::result::Result<ApiResponse, TransportError>;
}

/// [`Transport`] backed by octocrab.
#[derive(Debug, Clone)]
pub struct OctocrabTransport {
    inner: Octocrab,
    base_url: String,
}

impl OctocrabTransport {
    /// Builds an authenticated octocrab instance from the configuration.
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::PrivateKey`] for an unreadable App key and
    /// [`crate::Error::Transport`] if the base URL or installation cannot be used.
    #[instrument(skip(config), fields(auth = config.auth.kind(), base_url = %config.base_url))]
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let builder = Octocrab::builder()
            .add_retry_config(OctocrabRetry::None)
            .add_header(http::header::USER_AGENT, config.user_agent.clone())
            .base_uri(config.base_url.as_str())?;

        let inner = match &config.auth {
            AuthConfig::Token { token } => {
                debug!("creating token-authenticated octocrab client");
                builder
                    .personal_token(token.expose_secret().to_string())
                    .build()?
            }
            AuthConfig::App {
                app_id,
                private_key,
                installation_id,
            } => {
                debug!(app_id, ?installation_id, "creating app-authenticated octocrab client");
                let key =
                    jsonwebtoken::EncodingKey::from_rsa_pem(private_key.expose_secret().as_bytes())?;
                let app = builder.app(AppId(*app_id), key).build()?;
                match installation_id {
                    Some(id) => app.installation(InstallationId(*id))?,
                    None => app,
                }
            }
        };

        Ok(Self::new(inner, &config.base_url))
    }

    /// Wraps an existing octocrab instance.
    #[must_use]
    pub fn new(inner: Octocrab, base_url: &str) -> Self {
        Self {
            inner,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn absolute_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl Transport for OctocrabTransport {
    #[instrument(skip(self, request), fields(method = %request.method, path = %request.path))]
    async fn send(&self, request: ApiRequest) -> std::result::Result<ApiResponse, TransportError> {
        let url = self.absolute_url(&request.path);
        let response = match request.method {
            HttpMethod::Get => self.inner._get(url.as_str()).await,
            HttpMethod::Post => self.inner._post(url.as_str(), request.body.as_ref()).await,
        }
        .map_err(|e| TransportError::Connection(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_ascii_lowercase(), value.to_string()))
            })
            .collect();
        let body = self
            .inner
            .body_to_string(response)
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        debug!(status, bytes = body.len(), "received response");
        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}
