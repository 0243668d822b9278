//! Shared session types: lifecycle states, events, and errors.
//!
//! Both session flavors ([`chat::ChatSession`] and [`viewer::ViewerSession`])
//! hand inbound traffic to the caller through an [`EventReceiver`] and track
//! their lifecycle with [`SessionState`]. A session moves strictly forward
//! through its states; none is revisited without a fresh `connect`.

pub mod chat;
pub mod viewer;

use std::sync::{Arc, RwLock};

use serde_json::Value;
use tokio::sync::mpsc;

use crate::constants::EVENT_QUEUE_DEPTH;

/// Lifecycle of a session. States advance monotonically; `Closed` is reachable
/// from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No connection attempt has been made, or the session was reset.
    #[default]
    Disconnected,
    /// Endpoint resolution or socket establishment is in progress.
    Connecting,
    /// The socket is open and the server has acknowledged the connection.
    Connected,
    /// The session has joined its channel (chat: login confirmed; viewer:
    /// join sent).
    Joined,
    /// The session is shut down. Terminal until the next `connect`.
    Closed,
}

impl SessionState {
    /// Whether the socket is usable for outbound traffic.
    pub fn is_connected(self) -> bool {
        matches!(self, SessionState::Connected | SessionState::Joined)
    }
}

/// Authorization level reported by the server at login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Logged-in viewer without elevated rights.
    Guest,
    /// Anonymous (tokenless) login.
    Anonymous,
    /// Registered channel user.
    User,
    /// Channel admin.
    Admin,
}

impl Role {
    /// Parse the wire `role` field. Unknown values are `None` so a new
    /// server-side role does not break login handling.
    pub fn from_wire(role: &str) -> Option<Self> {
        match role {
            "guest" => Some(Role::Guest),
            "anon" => Some(Role::Anonymous),
            "user" => Some(Role::User),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// Errors surfaced by session operations.
#[derive(Debug)]
pub enum SessionError {
    /// Server discovery or the socket handshake failed.
    Handshake(String),
    /// The operation needs an open socket and there is none.
    NotConnected,
    /// The operation needs a completed login.
    NotAuthenticated,
    /// `connect` was called on a session that is already live.
    AlreadyConnected,
    /// A caller-supplied argument was rejected before anything was sent.
    InvalidArgument(String),
    /// The underlying socket failed.
    Transport(String),
    /// The session closed while the operation was in flight.
    Closed,
    /// The configured attempt budget ran out before a connection succeeded.
    Timeout,
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Handshake(reason) => write!(f, "handshake failed: {reason}"),
            SessionError::NotConnected => write!(f, "session is not connected"),
            SessionError::NotAuthenticated => write!(f, "session is not logged in"),
            SessionError::AlreadyConnected => write!(f, "session is already connected"),
            SessionError::InvalidArgument(reason) => write!(f, "invalid argument: {reason}"),
            SessionError::Transport(reason) => write!(f, "transport failure: {reason}"),
            SessionError::Closed => write!(f, "session closed"),
            SessionError::Timeout => write!(f, "connection attempts exhausted"),
        }
    }
}

impl std::error::Error for SessionError {}

/// State cell shared between a session handle and its message loop.
///
/// Guarded writes carry the epoch of the connection attempt that produced
/// them, so a loop outlived by a reconnect cannot clobber the newer
/// connection's state.
#[derive(Debug, Clone, Default)]
pub(crate) struct SharedState {
    inner: Arc<RwLock<(SessionState, u64)>>,
}

impl SharedState {
    pub(crate) fn get(&self) -> SessionState {
        self.inner.read().unwrap().0
    }

    /// Unconditional write, used by the handle that owns the session.
    pub(crate) fn set(&self, state: SessionState, epoch: u64) {
        *self.inner.write().unwrap() = (state, epoch);
    }

    /// Write only if `epoch` is still the current connection's epoch.
    pub(crate) fn set_if_epoch(&self, state: SessionState, epoch: u64) -> bool {
        let mut guard = self.inner.write().unwrap();
        if guard.1 == epoch {
            guard.0 = state;
            true
        } else {
            false
        }
    }
}

/// One chat line as delivered by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    /// Sender's display name.
    pub name: String,
    /// Message text.
    pub text: String,
    /// Sender's role, when the server includes it.
    pub role: Option<Role>,
    /// Server timestamp (unix seconds), when included.
    pub time: Option<i64>,
    /// Sender follows the channel.
    pub follower: bool,
    /// Sender is the channel owner.
    pub owner: bool,
    /// Sender is a subscriber.
    pub subscriber: bool,
    /// Sender is a channel staff member.
    pub staff: bool,
    /// Sender is the community owner.
    pub community: bool,
}

impl ChatMessage {
    /// Build from a `chatMsg` params object. Absent flags default to false;
    /// absent name or text default to empty strings rather than rejecting the
    /// message.
    pub(crate) fn from_params(params: &Value) -> Self {
        let flag = |key: &str| params.get(key).and_then(Value::as_bool).unwrap_or(false);
        let text = |key: &str| {
            params
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        ChatMessage {
            name: text("name"),
            text: text("text"),
            role: params
                .get("role")
                .and_then(Value::as_str)
                .and_then(Role::from_wire),
            time: params.get("time").and_then(Value::as_i64),
            follower: flag("isFollower"),
            owner: flag("isOwner"),
            subscriber: flag("isSubscriber"),
            staff: flag("isStaff"),
            community: flag("isCommunity"),
        }
    }
}

/// Events emitted by a chat session.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// The server acknowledged the socket connection.
    Connected,
    /// Login completed with the given role.
    LoggedIn {
        /// Role granted by the server.
        role: Role,
    },
    /// A chat line arrived.
    MessageReceived(ChatMessage),
    /// The session shut down. Always the final event.
    Closed,
}

/// Livestream status snapshot from an `infoMsg`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewerStatus {
    /// Whether the stream is live.
    pub online: bool,
    /// Current viewer count.
    pub viewers: i64,
    /// Follower count, when reported.
    pub followers: Option<i64>,
    /// Subscriber count, when reported.
    pub subscribers: Option<i64>,
}

impl ViewerStatus {
    /// Build from an `infoMsg` params object. Returns `None` when the
    /// required fields are missing, in which case the frame is dropped.
    pub(crate) fn from_params(params: &Value) -> Option<Self> {
        Some(ViewerStatus {
            online: params.get("online").and_then(Value::as_bool)?,
            viewers: params.get("viewers").and_then(Value::as_i64)?,
            followers: params.get("followers").and_then(Value::as_i64),
            subscribers: params.get("subscribers").and_then(Value::as_i64),
        })
    }
}

/// Events emitted by a viewer session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerEvent {
    /// The stream status changed since the last report.
    StatusChanged(ViewerStatus),
    /// The session shut down. Always the final event.
    Closed,
}

/// Take-once receiving half of a session's event queue.
#[derive(Debug)]
pub struct EventReceiver<E> {
    receiver: mpsc::Receiver<E>,
}

impl<E> EventReceiver<E> {
    /// Wait for the next event. `None` once the session has shut down and
    /// the queue is drained.
    pub async fn recv(&mut self) -> Option<E> {
        self.receiver.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<E> {
        self.receiver.try_recv().ok()
    }
}

pub(crate) fn event_queue<E>() -> (mpsc::Sender<E>, EventReceiver<E>) {
    let (tx, rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
    (tx, EventReceiver { receiver: rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_role_from_wire() {
        assert_eq!(Role::from_wire("guest"), Some(Role::Guest));
        assert_eq!(Role::from_wire("anon"), Some(Role::Anonymous));
        assert_eq!(Role::from_wire("user"), Some(Role::User));
        assert_eq!(Role::from_wire("admin"), Some(Role::Admin));
        assert_eq!(Role::from_wire("moderator"), None);
    }

    #[test]
    fn test_state_progression_flags() {
        assert!(!SessionState::Disconnected.is_connected());
        assert!(!SessionState::Connecting.is_connected());
        assert!(SessionState::Connected.is_connected());
        assert!(SessionState::Joined.is_connected());
        assert!(!SessionState::Closed.is_connected());
    }

    #[test]
    fn test_chat_message_flags_default_false() {
        let message = ChatMessage::from_params(&json!({
            "name": "alice",
            "text": "hello"
        }));
        assert_eq!(message.name, "alice");
        assert_eq!(message.text, "hello");
        assert!(!message.follower);
        assert!(!message.owner);
        assert!(!message.subscriber);
        assert!(!message.staff);
        assert!(!message.community);
        assert_eq!(message.role, None);
        assert_eq!(message.time, None);
    }

    #[test]
    fn test_chat_message_full_payload() {
        let message = ChatMessage::from_params(&json!({
            "name": "bob",
            "text": "hi",
            "role": "admin",
            "time": 1700000000,
            "isOwner": true,
            "isSubscriber": true
        }));
        assert_eq!(message.role, Some(Role::Admin));
        assert_eq!(message.time, Some(1_700_000_000));
        assert!(message.owner);
        assert!(message.subscriber);
        assert!(!message.staff);
    }

    #[test]
    fn test_viewer_status_requires_core_fields() {
        assert!(ViewerStatus::from_params(&json!({"viewers": 3})).is_none());

        let status = ViewerStatus::from_params(&json!({
            "online": true,
            "viewers": 12,
            "followers": 40
        }))
        .unwrap();
        assert!(status.online);
        assert_eq!(status.viewers, 12);
        assert_eq!(status.followers, Some(40));
        assert_eq!(status.subscribers, None);
    }

    #[test]
    fn test_shared_state_epoch_guard() {
        let state = SharedState::default();
        state.set(SessionState::Connecting, 2);
        assert!(!state.set_if_epoch(SessionState::Closed, 1));
        assert_eq!(state.get(), SessionState::Connecting);
        assert!(state.set_if_epoch(SessionState::Connected, 2));
        assert_eq!(state.get(), SessionState::Connected);
    }
}
