//! Chat session over the socket.io v0.9 WebSocket.
//!
//! # Architecture
//!
//! ```text
//! ChatSession
//!     ├── endpoint resolution (discovery + handshake, re-run per attempt)
//!     ├── WebSocket connection (tokio-tungstenite via ws::connect)
//!     ├── spawned message loop (heartbeat echo, event dispatch)
//!     └── retry on connect timeout (fresh endpoint each attempt)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let mut session = ChatSession::builder()
//!     .server_url("http://example.com")
//!     .identity(SessionIdentity::new("alice", "token"))
//!     .build()?;
//!
//! session.connect().await?;
//! session.join("SomeChannel").await?;
//!
//! let mut events = session.take_event_receiver().unwrap();
//! while let Some(event) = events.recv().await {
//!     // ChatEvent::Connected / LoggedIn / MessageReceived / Closed
//! }
//! ```

use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::codec::{self, EventBody, Frame};
use crate::command::{self, SessionIdentity};
use crate::constants::{COMMAND_QUEUE_DEPTH, CONNECT_TIMEOUT};
use crate::discovery::{HttpApi, ServerDiscovery, TextFetcher};
use crate::handshake;
use crate::ws::{self, WsMessage, WsReader, WsWriter};

use super::{
    event_queue, ChatEvent, ChatMessage, EventReceiver, Role, SessionError, SessionState,
    SharedState,
};

/// Internal message type for the send queue.
#[derive(Debug)]
enum Outbound {
    /// Raw encoded frame to put on the socket.
    Frame(String),
    /// Graceful shutdown: write the pre-encoded part frame (if any), then
    /// close the socket.
    Disconnect { part: Option<String> },
}

/// Builder for [`ChatSession`].
pub struct ChatSessionBuilder {
    server_url: Option<String>,
    discovery: Option<Arc<dyn ServerDiscovery>>,
    fetcher: Option<Arc<dyn TextFetcher>>,
    identity: SessionIdentity,
    connect_timeout: Duration,
    max_connect_attempts: Option<u32>,
}

impl std::fmt::Debug for ChatSessionBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSessionBuilder")
            .field("server_url", &self.server_url)
            .field("identity", &self.identity)
            .field("connect_timeout", &self.connect_timeout)
            .field("max_connect_attempts", &self.max_connect_attempts)
            .finish_non_exhaustive()
    }
}

impl Default for ChatSessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatSessionBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            server_url: None,
            discovery: None,
            fetcher: None,
            identity: SessionIdentity::anonymous(),
            connect_timeout: CONNECT_TIMEOUT,
            max_connect_attempts: None,
        }
    }

    /// Set the HTTP API base URL used for discovery and handshake. Required
    /// unless both [`discovery`](Self::discovery) and
    /// [`fetcher`](Self::fetcher) are set.
    #[must_use]
    pub fn server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = Some(url.into());
        self
    }

    /// Override the server discovery source.
    #[must_use]
    pub fn discovery(mut self, discovery: Arc<dyn ServerDiscovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    /// Override the handshake body fetcher.
    #[must_use]
    pub fn fetcher(mut self, fetcher: Arc<dyn TextFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Set the identity used on outbound commands. Defaults to
    /// [`SessionIdentity::anonymous`].
    #[must_use]
    pub fn identity(mut self, identity: SessionIdentity) -> Self {
        self.identity = identity;
        self
    }

    /// Override the per-attempt connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Cap the number of connect attempts. Unset means retry indefinitely,
    /// which matches how the servers are operated: a fresh endpoint is
    /// resolved for each attempt, so a single bad host does not wedge the
    /// session.
    #[must_use]
    pub fn max_connect_attempts(mut self, attempts: u32) -> Self {
        self.max_connect_attempts = Some(attempts);
        self
    }

    /// Build the session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Handshake`] if the HTTP client cannot be
    /// constructed.
    ///
    /// # Panics
    ///
    /// Panics if neither `server_url` nor a discovery/fetcher pair is set.
    pub fn build(self) -> Result<ChatSession, SessionError> {
        let (discovery, fetcher) = match (self.discovery, self.fetcher) {
            (Some(discovery), Some(fetcher)) => (discovery, fetcher),
            (discovery, fetcher) => {
                let url = self.server_url.expect("server_url is required");
                let api = Arc::new(HttpApi::new(url)?);
                (
                    discovery.unwrap_or_else(|| api.clone()),
                    fetcher.unwrap_or(api),
                )
            }
        };

        Ok(ChatSession {
            discovery,
            fetcher,
            identity: self.identity,
            connect_timeout: self.connect_timeout,
            max_connect_attempts: self.max_connect_attempts,
            state: SharedState::default(),
            epoch: 0,
            role: Arc::new(StdRwLock::new(None)),
            channel: None,
            cmd_tx: None,
            event_rx: None,
            loop_handle: None,
            shutdown_tx: None,
        })
    }
}

/// A chat connection to one server, joined to at most one channel.
pub struct ChatSession {
    discovery: Arc<dyn ServerDiscovery>,
    fetcher: Arc<dyn TextFetcher>,
    identity: SessionIdentity,
    connect_timeout: Duration,
    max_connect_attempts: Option<u32>,

    /// Lifecycle state shared with the message loop.
    state: SharedState,
    /// Bumped on every `connect`; stale loops carry the old value and their
    /// state writes are ignored.
    epoch: u64,
    /// Role granted at login, shared with the message loop.
    role: Arc<StdRwLock<Option<Role>>>,
    /// Channel joined on this connection (lowercased wire name).
    channel: Option<String>,

    cmd_tx: Option<mpsc::Sender<Outbound>>,
    event_rx: Option<EventReceiver<ChatEvent>>,
    loop_handle: Option<JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("state", &self.state.get())
            .field("channel", &self.channel)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl ChatSession {
    /// Create a new session builder.
    #[must_use]
    pub fn builder() -> ChatSessionBuilder {
        ChatSessionBuilder::new()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Role granted at login, once a `loginMsg` has been processed.
    pub fn role(&self) -> Option<Role> {
        *self.role.read().expect("role lock poisoned")
    }

    /// Take the event receiver for use in a spawned task.
    ///
    /// Returns `None` before the first `connect` or if already taken. A
    /// reconnect replaces the receiver, so take it again after `connect`.
    pub fn take_event_receiver(&mut self) -> Option<EventReceiver<ChatEvent>> {
        self.event_rx.take()
    }

    /// Resolve an endpoint and establish the socket, retrying with a freshly
    /// resolved endpoint whenever an attempt exceeds the connect timeout.
    ///
    /// On return the session is `Connected`: the server's acknowledgement
    /// frame has been received and a [`ChatEvent::Connected`] is queued.
    ///
    /// # Errors
    ///
    /// - [`SessionError::AlreadyConnected`] if a connection is live.
    /// - [`SessionError::Handshake`] if endpoint resolution fails.
    /// - [`SessionError::Timeout`] once `max_connect_attempts` is exhausted.
    pub async fn connect(&mut self) -> Result<(), SessionError> {
        let current = self.state.get();
        if current.is_connected() || current == SessionState::Connecting {
            return Err(SessionError::AlreadyConnected);
        }
        // Release handles left over from a connection the peer closed.
        self.shutdown().await;

        self.epoch += 1;
        let epoch = self.epoch;
        *self.role.write().expect("role lock poisoned") = None;
        self.channel = None;
        self.state.set(SessionState::Connecting, epoch);

        let (writer, reader) = match self.establish(epoch).await {
            Ok(pair) => pair,
            Err(e) => {
                self.state.set(SessionState::Disconnected, epoch);
                return Err(e);
            }
        };

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (event_tx, event_rx) = event_queue();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        self.state.set(SessionState::Connected, epoch);
        let _ = event_tx.try_send(ChatEvent::Connected);

        let state = self.state.clone();
        let role = Arc::clone(&self.role);
        self.loop_handle = Some(tokio::spawn(async move {
            Self::run_message_loop(
                writer,
                reader,
                cmd_rx,
                event_tx,
                state,
                role,
                epoch,
                shutdown_rx,
            )
            .await;
        }));

        self.cmd_tx = Some(cmd_tx);
        self.event_rx = Some(event_rx);
        self.shutdown_tx = Some(shutdown_tx);

        Ok(())
    }

    /// Join a channel. Requires an established connection; the `Joined`
    /// state is entered when the server's `loginMsg` arrives.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotConnected`] without an open socket,
    /// [`SessionError::InvalidArgument`] for an empty channel name.
    pub async fn join(&mut self, channel: &str) -> Result<(), SessionError> {
        if channel.trim().is_empty() {
            return Err(SessionError::InvalidArgument(
                "channel name is empty".to_string(),
            ));
        }
        let body = command::join_channel(&self.identity, channel);
        self.send_frame(codec::encode_event(&body)).await?;
        self.channel = Some(channel.to_lowercase());
        Ok(())
    }

    /// Send a chat line to the joined channel.
    ///
    /// The server truncates or rejects messages past its own length limit;
    /// nothing is enforced client-side.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotAuthenticated`] before login completes,
    /// [`SessionError::NotConnected`] without an open socket.
    pub async fn send_message(&self, text: &str) -> Result<(), SessionError> {
        if self.state.get() != SessionState::Joined {
            return Err(SessionError::NotAuthenticated);
        }
        let channel = self.channel.as_deref().ok_or(SessionError::NotConnected)?;
        let body = command::chat_message(&self.identity, channel, text);
        self.send_frame(codec::encode_event(&body)).await
    }

    /// Part the channel and close the socket. The part command is written
    /// before the close frame; both happen inside the message loop so no
    /// queued outbound frame is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotAuthenticated`] unless the session is
    /// `Joined`; a leave request is only sendable after login.
    pub async fn leave(&mut self) -> Result<(), SessionError> {
        if self.state.get() != SessionState::Joined {
            return Err(SessionError::NotAuthenticated);
        }
        self.shutdown().await;
        Ok(())
    }

    /// Close the session. Parts the channel first when `Joined`. Idempotent:
    /// a no-op when already `Disconnected` or `Closed`, and never sends a
    /// second part or close.
    pub async fn disconnect(&mut self) {
        if matches!(
            self.state.get(),
            SessionState::Disconnected | SessionState::Closed
        ) {
            return;
        }
        self.shutdown().await;
    }

    async fn shutdown(&mut self) {
        if let Some(tx) = self.cmd_tx.take() {
            let part = (self.state.get() == SessionState::Joined && self.channel.is_some())
                .then(|| codec::encode_event(&command::part_channel(&self.identity)));
            let _ = tx.send(Outbound::Disconnect { part }).await;
        }
        if let Some(handle) = self.loop_handle.take() {
            let _ = handle.await;
        }
        self.shutdown_tx = None;
        self.channel = None;
        self.state.set(SessionState::Closed, self.epoch);
    }

    async fn send_frame(&self, frame: String) -> Result<(), SessionError> {
        if !self.state.get().is_connected() {
            return Err(SessionError::NotConnected);
        }
        let tx = self.cmd_tx.as_ref().ok_or(SessionError::NotConnected)?;
        tx.send(Outbound::Frame(frame))
            .await
            .map_err(|_| SessionError::Closed)
    }

    /// One resolution + connection attempt per iteration, each against a
    /// freshly picked endpoint. An attempt that trips the connect timeout is
    /// closed with a normal status and retried.
    async fn establish(&self, epoch: u64) -> Result<(WsWriter, WsReader), SessionError> {
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let endpoint = handshake::resolve_chat(&*self.discovery, &*self.fetcher).await?;
            let url = endpoint.chat_url();
            log::info!("connecting to {url} (attempt {attempts}, epoch {epoch})");

            match Self::open_socket(&url, self.connect_timeout).await {
                Ok(pair) => return Ok(pair),
                Err(SessionError::Timeout) => {
                    log::warn!(
                        "connection to {} timed out after {:?}",
                        endpoint.host,
                        self.connect_timeout
                    );
                }
                Err(e) => {
                    log::warn!("connection to {} failed: {e}", endpoint.host);
                }
            }

            if let Some(max) = self.max_connect_attempts {
                if attempts >= max {
                    return Err(SessionError::Timeout);
                }
            }
        }
    }

    /// Open the socket and wait for the server's connection acknowledgement,
    /// all under one deadline. Heartbeats arriving before the acknowledgement
    /// are echoed immediately. If the deadline fires while the socket is
    /// already upgraded, it is closed with normal status 1000 before the
    /// timeout is reported.
    async fn open_socket(
        url: &str,
        connect_timeout: Duration,
    ) -> Result<(WsWriter, WsReader), SessionError> {
        let deadline = tokio::time::sleep(connect_timeout);
        tokio::pin!(deadline);

        let connecting = ws::connect(url);
        tokio::pin!(connecting);

        let (mut writer, mut reader) = tokio::select! {
            result = &mut connecting => {
                result.map_err(|e| SessionError::Transport(e.to_string()))?
            }
            () = &mut deadline => {
                // An upgrade that lost the race still gets the close frame;
                // a stalled one has no socket to close.
                if let Some(Ok((mut writer, _reader))) = connecting.as_mut().now_or_never() {
                    let _ = writer.close_normal().await;
                }
                return Err(SessionError::Timeout);
            }
        };

        loop {
            let msg = tokio::select! {
                msg = reader.recv() => msg,
                () = &mut deadline => {
                    let _ = writer.close_normal().await;
                    return Err(SessionError::Timeout);
                }
            };

            let msg = msg
                .ok_or_else(|| SessionError::Transport("socket closed during handshake".into()))?
                .map_err(|e| SessionError::Transport(e.to_string()))?;

            match msg {
                WsMessage::Text(text) => match codec::decode(&text) {
                    Ok(Frame::Connected) => return Ok((writer, reader)),
                    Ok(Frame::Echo) => {
                        writer
                            .send_text(codec::ECHO_REPLY)
                            .await
                            .map_err(|e| SessionError::Transport(e.to_string()))?;
                    }
                    Ok(other) => log::debug!("frame before acknowledgement: {other:?}"),
                    Err(e) => log::warn!("dropping malformed frame: {e}"),
                },
                WsMessage::Ping(data) => {
                    writer
                        .send_pong(data)
                        .await
                        .map_err(|e| SessionError::Transport(e.to_string()))?;
                }
                WsMessage::Close { code, reason } => {
                    return Err(SessionError::Transport(format!(
                        "socket closed during handshake ({code}: {reason})"
                    )));
                }
            }
        }
    }

    /// Run until the socket closes or a shutdown is requested. Always writes
    /// the terminal `Closed` state (epoch-guarded) and queues the final
    /// [`ChatEvent::Closed`].
    #[allow(clippy::too_many_arguments)]
    async fn run_message_loop(
        mut writer: WsWriter,
        mut reader: WsReader,
        mut cmd_rx: mpsc::Receiver<Outbound>,
        event_tx: mpsc::Sender<ChatEvent>,
        state: SharedState,
        role: Arc<StdRwLock<Option<Role>>>,
        epoch: u64,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(Outbound::Frame(text)) => {
                        if let Err(e) = writer.send_text(&text).await {
                            log::error!("send failed: {e}");
                            break;
                        }
                    }
                    Some(Outbound::Disconnect { part }) => {
                        if let Some(frame) = part {
                            if let Err(e) = writer.send_text(&frame).await {
                                log::warn!("part before close failed: {e}");
                            }
                        }
                        let _ = writer.close_normal().await;
                        break;
                    }
                    // All senders dropped: the handle is gone, close down.
                    None => {
                        let _ = writer.close_normal().await;
                        break;
                    }
                },

                msg = reader.recv() => match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        if Self::handle_frame(&text, &mut writer, &event_tx, &state, &role, epoch)
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        if writer.send_pong(data).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close { code, reason })) => {
                        log::info!("server closed the socket ({code}: {reason})");
                        break;
                    }
                    Some(Err(e)) => {
                        log::error!("socket error: {e}");
                        break;
                    }
                    None => break,
                },

                _ = &mut shutdown_rx => {
                    let _ = writer.close_normal().await;
                    break;
                }
            }
        }

        state.set_if_epoch(SessionState::Closed, epoch);
        // try_send: never block the loop's exit on a full event queue.
        let _ = event_tx.try_send(ChatEvent::Closed);
    }

    /// Dispatch one inbound text frame. `Err` means the socket is unusable.
    async fn handle_frame(
        text: &str,
        writer: &mut WsWriter,
        event_tx: &mpsc::Sender<ChatEvent>,
        state: &SharedState,
        role: &Arc<StdRwLock<Option<Role>>>,
        epoch: u64,
    ) -> Result<(), ()> {
        match codec::decode(text) {
            Ok(Frame::Echo) => {
                // The server drops connections that miss a heartbeat; reply
                // before anything else gets a chance to run.
                writer
                    .send_text(codec::ECHO_REPLY)
                    .await
                    .map_err(|e| log::error!("heartbeat reply failed: {e}"))?;
            }
            Ok(Frame::Event(body)) => {
                Self::handle_event(body, event_tx, state, role, epoch).await;
            }
            Ok(Frame::Connected) => log::debug!("duplicate connection acknowledgement"),
            Ok(Frame::Unknown(raw)) => log::debug!("unknown frame: {raw}"),
            Err(e) => log::warn!("dropping malformed frame: {e}"),
        }
        Ok(())
    }

    async fn handle_event(
        body: EventBody,
        event_tx: &mpsc::Sender<ChatEvent>,
        state: &SharedState,
        role: &Arc<StdRwLock<Option<Role>>>,
        epoch: u64,
    ) {
        match body.method.as_str() {
            "loginMsg" => {
                let Some(granted) = body
                    .params
                    .get("role")
                    .and_then(serde_json::Value::as_str)
                    .and_then(Role::from_wire)
                else {
                    log::warn!("loginMsg with unrecognized role: {}", body.params);
                    return;
                };
                *role.write().expect("role lock poisoned") = Some(granted);
                state.set_if_epoch(SessionState::Joined, epoch);
                let _ = event_tx.send(ChatEvent::LoggedIn { role: granted }).await;
            }
            "chatMsg" => {
                let message = ChatMessage::from_params(&body.params);
                let _ = event_tx.send(ChatEvent::MessageReceived(message)).await;
            }
            other => log::debug!("unhandled chat method: {other}"),
        }
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_builder_seeds_connect_timeout() {
        let builder = ChatSessionBuilder::default();
        assert_eq!(builder.connect_timeout, CONNECT_TIMEOUT);
        assert!(builder.max_connect_attempts.is_none());
    }
}
