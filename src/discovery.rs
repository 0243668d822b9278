//! External collaborators: server discovery and the handshake fetch.
//!
//! The core consumes the REST surface of the upstream service through two
//! narrow interfaces — a pool listing ([`ServerDiscovery`]) and a one-shot
//! text GET ([`TextFetcher`]) used to resolve the socket session id. Both
//! are traits so sessions can be driven by fakes in tests; [`HttpApi`] is
//! the reqwest-backed production implementation of both.

use async_trait::async_trait;
use serde::Deserialize;

use crate::constants::{CHAT_SERVERS_PATH, HTTP_REQUEST_TIMEOUT, VIEWER_SERVERS_PATH};
use crate::session::SessionError;

/// Which server pool a session draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerKind {
    /// Chat servers (framed envelope protocol, handshake id required).
    Chat,
    /// Viewer servers (livestream presence, no handshake id).
    Viewer,
}

/// Lists candidate host addresses for a server pool.
#[async_trait]
pub trait ServerDiscovery: Send + Sync {
    /// Return the candidate hosts (`"ip"` or `"ip:port"`) for `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Handshake`] if the pool cannot be listed.
    async fn discover_servers(&self, kind: ServerKind) -> Result<Vec<String>, SessionError>;
}

/// One-shot HTTP GET returning the raw response body. Used once per
/// connection attempt, for the handshake step.
#[async_trait]
pub trait TextFetcher: Send + Sync {
    /// Fetch `url` and return the response body as text.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Handshake`] if the host is unreachable or
    /// responds with a non-success status.
    async fn fetch_text(&self, url: &str) -> Result<String, SessionError>;
}

/// One entry of the discovery response.
#[derive(Debug, Deserialize)]
struct ServerEntry {
    server_ip: String,
}

/// reqwest-backed implementation of both collaborator interfaces.
#[derive(Debug, Clone)]
pub struct HttpApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpApi {
    /// Create an API handle for the given base URL (no trailing slash).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(base_url: impl Into<String>) -> Result<Self, SessionError> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SessionError::Handshake(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    /// Create an API handle with a pre-configured HTTP client.
    ///
    /// Useful when custom client configuration is needed.
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ServerDiscovery for HttpApi {
    async fn discover_servers(&self, kind: ServerKind) -> Result<Vec<String>, SessionError> {
        let path = match kind {
            ServerKind::Chat => CHAT_SERVERS_PATH,
            ServerKind::Viewer => VIEWER_SERVERS_PATH,
        };
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SessionError::Handshake(format!("server discovery failed: {e}")))?;

        if !response.status().is_success() {
            return Err(SessionError::Handshake(format!(
                "server discovery returned {}",
                response.status()
            )));
        }

        let entries: Vec<ServerEntry> = response
            .json()
            .await
            .map_err(|e| SessionError::Handshake(format!("invalid discovery response: {e}")))?;

        log::debug!("discovered {} {kind:?} servers", entries.len());

        Ok(entries.into_iter().map(|entry| entry.server_ip).collect())
    }
}

#[async_trait]
impl TextFetcher for HttpApi {
    async fn fetch_text(&self, url: &str) -> Result<String, SessionError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SessionError::Handshake(format!("handshake fetch failed: {e}")))?;

        if !response.status().is_success() {
            return Err(SessionError::Handshake(format!(
                "handshake fetch returned {}",
                response.status()
            )));
        }

        response
            .text()
            .await
            .map_err(|e| SessionError::Handshake(format!("handshake body unreadable: {e}")))
    }
}
