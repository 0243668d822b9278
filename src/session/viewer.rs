//! Livestream viewer session.
//!
//! The viewer socket is simpler than the chat socket: plain `{method,
//! params}` JSON with no envelope framing and no heartbeat echo. A join is
//! written immediately after the socket opens and the server sends no
//! acknowledgement for it, so the session is considered joined as soon as
//! the join is on the wire.

use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::codec::{self, EventBody};
use crate::command::{self, SessionIdentity};
use crate::constants::CONNECT_TIMEOUT;
use crate::discovery::{HttpApi, ServerDiscovery};
use crate::handshake;
use crate::ws::{self, WsMessage, WsReader, WsWriter};

use super::{
    event_queue, EventReceiver, SessionError, SessionState, SharedState, ViewerEvent, ViewerStatus,
};

/// Builder for [`ViewerSession`].
pub struct ViewerSessionBuilder {
    server_url: Option<String>,
    discovery: Option<Arc<dyn ServerDiscovery>>,
    identity: SessionIdentity,
    connect_timeout: Duration,
    max_connect_attempts: Option<u32>,
}

impl std::fmt::Debug for ViewerSessionBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewerSessionBuilder")
            .field("server_url", &self.server_url)
            .field("identity", &self.identity)
            .field("connect_timeout", &self.connect_timeout)
            .field("max_connect_attempts", &self.max_connect_attempts)
            .finish_non_exhaustive()
    }
}

impl Default for ViewerSessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewerSessionBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            server_url: None,
            discovery: None,
            identity: SessionIdentity::anonymous(),
            connect_timeout: CONNECT_TIMEOUT,
            max_connect_attempts: None,
        }
    }

    /// Set the HTTP API base URL used for server discovery. Required unless
    /// [`discovery`](Self::discovery) is set.
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

    /// Set the identity named in the join. Defaults to
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

    /// Cap the number of connect attempts. Unset means retry indefinitely.
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
    /// Panics if neither `server_url` nor `discovery` is set.
    pub fn build(self) -> Result<ViewerSession, SessionError> {
        let discovery = match self.discovery {
            Some(discovery) => discovery,
            None => {
                let url = self.server_url.expect("server_url is required");
                Arc::new(HttpApi::new(url)?) as Arc<dyn ServerDiscovery>
            }
        };

        Ok(ViewerSession {
            discovery,
            identity: self.identity,
            connect_timeout: self.connect_timeout,
            max_connect_attempts: self.max_connect_attempts,
            state: SharedState::default(),
            epoch: 0,
            event_rx: None,
            loop_handle: None,
            shutdown_tx: None,
        })
    }
}

/// Watches one channel's livestream status.
pub struct ViewerSession {
    discovery: Arc<dyn ServerDiscovery>,
    identity: SessionIdentity,
    connect_timeout: Duration,
    max_connect_attempts: Option<u32>,

    state: SharedState,
    /// Bumped on every `watch`; stale loops carry the old value.
    epoch: u64,

    event_rx: Option<EventReceiver<ViewerEvent>>,
    loop_handle: Option<JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl std::fmt::Debug for ViewerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewerSession")
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

impl ViewerSession {
    /// Create a new session builder.
    #[must_use]
    pub fn builder() -> ViewerSessionBuilder {
        ViewerSessionBuilder::new()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Take the event receiver for use in a spawned task.
    ///
    /// Returns `None` before the first `watch` or if already taken.
    pub fn take_event_receiver(&mut self) -> Option<EventReceiver<ViewerEvent>> {
        self.event_rx.take()
    }

    /// Connect to a viewer server and join `channel`. Each attempt picks a
    /// fresh server; an attempt past the connect timeout is abandoned and
    /// retried.
    ///
    /// On return the session is `Joined` and status updates flow through the
    /// event receiver.
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidArgument`] for an empty channel name.
    /// - [`SessionError::AlreadyConnected`] if a connection is live.
    /// - [`SessionError::Handshake`] if discovery fails.
    /// - [`SessionError::Timeout`] once `max_connect_attempts` is exhausted.
    pub async fn watch(&mut self, channel: &str) -> Result<(), SessionError> {
        if channel.trim().is_empty() {
            return Err(SessionError::InvalidArgument(
                "channel name is empty".to_string(),
            ));
        }
        let current = self.state.get();
        if current.is_connected() || current == SessionState::Connecting {
            return Err(SessionError::AlreadyConnected);
        }
        // Release handles left over from a connection the peer closed.
        self.release().await;

        self.epoch += 1;
        let epoch = self.epoch;
        self.state.set(SessionState::Connecting, epoch);

        let (mut writer, reader) = match self.establish(epoch).await {
            Ok(pair) => pair,
            Err(e) => {
                self.state.set(SessionState::Disconnected, epoch);
                return Err(e);
            }
        };
        self.state.set(SessionState::Connected, epoch);

        let join = command::viewer_join(&self.identity, channel);
        if let Err(e) = writer.send_text(&join).await {
            self.state.set(SessionState::Disconnected, epoch);
            return Err(SessionError::Transport(e.to_string()));
        }
        // No join acknowledgement exists on this socket.
        self.state.set(SessionState::Joined, epoch);

        let (event_tx, event_rx) = event_queue();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let state = self.state.clone();
        self.loop_handle = Some(tokio::spawn(async move {
            Self::run_message_loop(writer, reader, event_tx, state, epoch, shutdown_rx).await;
        }));
        self.event_rx = Some(event_rx);
        self.shutdown_tx = Some(shutdown_tx);

        Ok(())
    }

    /// Close the socket. Idempotent: a no-op when already `Disconnected` or
    /// `Closed`.
    pub async fn stop(&mut self) {
        let was_live = !matches!(
            self.state.get(),
            SessionState::Disconnected | SessionState::Closed
        );
        self.release().await;
        if was_live {
            self.state.set(SessionState::Closed, self.epoch);
        }
    }

    /// Signal the message loop and wait for it to finish.
    async fn release(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.loop_handle.take() {
            let _ = handle.await;
        }
    }

    async fn establish(&self, epoch: u64) -> Result<(WsWriter, WsReader), SessionError> {
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let host = handshake::resolve_viewer(&*self.discovery).await?;
            let url = handshake::viewer_url(&host);
            log::info!("connecting to {url} (attempt {attempts}, epoch {epoch})");

            match Self::open_socket(&url, self.connect_timeout).await {
                Ok(pair) => return Ok(pair),
                Err(SessionError::Timeout) => log::warn!(
                    "connection to {host} timed out after {:?}",
                    self.connect_timeout
                ),
                Err(e) => log::warn!("connection to {host} failed: {e}"),
            }

            if let Some(max) = self.max_connect_attempts {
                if attempts >= max {
                    return Err(SessionError::Timeout);
                }
            }
        }
    }

    /// Open the socket under one deadline. If the deadline fires after the
    /// upgrade has completed, the socket is closed with normal status 1000
    /// before the timeout is reported.
    async fn open_socket(
        url: &str,
        connect_timeout: Duration,
    ) -> Result<(WsWriter, WsReader), SessionError> {
        let deadline = tokio::time::sleep(connect_timeout);
        tokio::pin!(deadline);

        let connecting = ws::connect(url);
        tokio::pin!(connecting);

        tokio::select! {
            result = &mut connecting => match result {
                Ok(pair) => Ok(pair),
                Err(e) => Err(SessionError::Transport(e.to_string())),
            },
            () = &mut deadline => {
                // An upgrade that lost the race still gets the close frame;
                // a stalled one has no socket to close.
                if let Some(Ok((mut writer, _reader))) = connecting.as_mut().now_or_never() {
                    let _ = writer.close_normal().await;
                }
                Err(SessionError::Timeout)
            }
        }
    }

    async fn run_message_loop(
        mut writer: WsWriter,
        mut reader: WsReader,
        event_tx: tokio::sync::mpsc::Sender<ViewerEvent>,
        state: SharedState,
        epoch: u64,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        // Identical consecutive snapshots are collapsed into one event.
        let mut last_status: Option<ViewerStatus> = None;

        loop {
            tokio::select! {
                msg = reader.recv() => match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        Self::handle_message(&text, &event_tx, &mut last_status).await;
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
        let _ = event_tx.try_send(ViewerEvent::Closed);
    }

    async fn handle_message(
        text: &str,
        event_tx: &tokio::sync::mpsc::Sender<ViewerEvent>,
        last_status: &mut Option<ViewerStatus>,
    ) {
        let body: EventBody = match codec::decode_bare(text) {
            Ok(body) => body,
            Err(e) => {
                log::warn!("dropping malformed viewer message: {e}");
                return;
            }
        };

        match body.method.as_str() {
            "infoMsg" => {
                let Some(status) = ViewerStatus::from_params(&body.params) else {
                    log::warn!("infoMsg missing status fields: {}", body.params);
                    return;
                };
                if last_status.as_ref() == Some(&status) {
                    return;
                }
                *last_status = Some(status.clone());
                let _ = event_tx.send(ViewerEvent::StatusChanged(status)).await;
            }
            "commercialBreak" => log::info!("commercial break signalled"),
            other => log::debug!("unhandled viewer method: {other}"),
        }
    }
}

impl Drop for ViewerSession {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
