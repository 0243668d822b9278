//! Session handshake: pick a server, resolve its socket session id.
//!
//! Chat connections are a two-step handshake: choose one host from the
//! discovered pool uniformly at random, then GET its handshake path to
//! obtain the numeric session id embedded in the WebSocket URL. Viewer
//! connections only need the host pick.

use rand::Rng;

use crate::constants::{CHAT_SOCKET_PATH, HANDSHAKE_PATH, VIEWER_SOCKET_PATH};
use crate::discovery::{ServerDiscovery, ServerKind, TextFetcher};
use crate::session::SessionError;

/// Server plus socket session id for one connection attempt.
///
/// Fixed once resolved; a retry resolves a fresh endpoint (possibly the same
/// host by chance).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEndpoint {
    /// Host address, `"ip"` or `"ip:port"`.
    pub host: String,
    /// Numeric session id from the handshake response.
    pub session_id: String,
}

impl SessionEndpoint {
    /// WebSocket URL for the chat socket at this endpoint.
    pub fn chat_url(&self) -> String {
        format!("ws://{}{}{}", self.host, CHAT_SOCKET_PATH, self.session_id)
    }
}

/// WebSocket URL for the viewer socket on `host`.
pub fn viewer_url(host: &str) -> String {
    format!("ws://{host}{VIEWER_SOCKET_PATH}")
}

/// Resolve a chat endpoint: discover hosts, pick one, fetch its session id.
///
/// # Errors
///
/// Returns [`SessionError::Handshake`] if the pool is empty, the host is
/// unreachable, or the response has no leading numeric token. Callers decide
/// whether to retry with a new resolution.
pub async fn resolve_chat(
    discovery: &dyn ServerDiscovery,
    fetcher: &dyn TextFetcher,
) -> Result<SessionEndpoint, SessionError> {
    let host = pick_host(discovery.discover_servers(ServerKind::Chat).await?)?;
    let body = fetcher
        .fetch_text(&format!("http://{host}{HANDSHAKE_PATH}"))
        .await?;
    let session_id = parse_session_id(&body)?;

    log::debug!("resolved chat endpoint {host} (session {session_id})");

    Ok(SessionEndpoint { host, session_id })
}

/// Resolve a viewer host. The viewer socket needs no session id.
///
/// # Errors
///
/// Returns [`SessionError::Handshake`] if the pool cannot be listed or is
/// empty.
pub async fn resolve_viewer(discovery: &dyn ServerDiscovery) -> Result<String, SessionError> {
    pick_host(discovery.discover_servers(ServerKind::Viewer).await?)
}

/// Pick one host uniformly at random. Load distribution, not security.
fn pick_host(mut servers: Vec<String>) -> Result<String, SessionError> {
    if servers.is_empty() {
        return Err(SessionError::Handshake(
            "server discovery returned an empty list".to_string(),
        ));
    }
    let index = rand::rng().random_range(0..servers.len());
    Ok(servers.swap_remove(index))
}

/// Handshake bodies look like `"42:60:60:websocket,..."`; the session id is
/// the leading numeric token before the first colon.
fn parse_session_id(body: &str) -> Result<String, SessionError> {
    let id = body.split(':').next().unwrap_or("");
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
        return Err(SessionError::Handshake(format!(
            "malformed handshake response: {body:?}"
        )));
    }
    Ok(id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FakeDiscovery(Vec<String>);

    #[async_trait]
    impl ServerDiscovery for FakeDiscovery {
        async fn discover_servers(&self, _kind: ServerKind) -> Result<Vec<String>, SessionError> {
            Ok(self.0.clone())
        }
    }

    struct FakeFetcher(String);

    #[async_trait]
    impl TextFetcher for FakeFetcher {
        async fn fetch_text(&self, _url: &str) -> Result<String, SessionError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_parse_session_id() {
        assert_eq!(parse_session_id("42:60:60:websocket").unwrap(), "42");
        assert_eq!(parse_session_id("7:").unwrap(), "7");
        assert!(parse_session_id("").is_err());
        assert!(parse_session_id(":60:60").is_err());
        assert!(parse_session_id("abc:60").is_err());
    }

    #[test]
    fn test_pick_host_empty_pool_is_an_error() {
        assert!(matches!(
            pick_host(Vec::new()),
            Err(SessionError::Handshake(_))
        ));
    }

    #[test]
    fn test_pick_host_stays_within_the_pool() {
        let pool = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        for _ in 0..20 {
            let picked = pick_host(pool.clone()).unwrap();
            assert!(pool.contains(&picked));
        }
    }

    #[tokio::test]
    async fn test_resolve_chat_composes_the_endpoint() {
        let discovery = FakeDiscovery(vec!["10.0.0.5".to_string()]);
        let fetcher = FakeFetcher("42:60:60:websocket".to_string());

        let endpoint = resolve_chat(&discovery, &fetcher).await.unwrap();
        assert_eq!(endpoint.host, "10.0.0.5");
        assert_eq!(endpoint.session_id, "42");
        assert_eq!(
            endpoint.chat_url(),
            "ws://10.0.0.5/socket.io/1/websocket/42"
        );
    }

    #[tokio::test]
    async fn test_resolve_chat_rejects_unparseable_body() {
        let discovery = FakeDiscovery(vec!["10.0.0.5".to_string()]);
        let fetcher = FakeFetcher("<html>bad gateway</html>".to_string());

        assert!(matches!(
            resolve_chat(&discovery, &fetcher).await,
            Err(SessionError::Handshake(_))
        ));
    }

    #[test]
    fn test_viewer_url() {
        assert_eq!(viewer_url("10.0.0.9"), "ws://10.0.0.9/viewer");
    }
}
