//! Protocol constants and tuning knobs.
//!
//! Centralizes the wire literals and timing values shared by the chat and
//! viewer sessions so magic numbers live in one place.

use std::time::Duration;

// ============================================================================
// Timeouts
// ============================================================================

/// How long to wait for the server's connection acknowledgement (`"1::"`)
/// before closing the socket and retrying with a freshly resolved endpoint.
///
/// The upstream protocol documentation is explicit: if you cannot connect
/// after 8 seconds you should grab another server and connection id.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(8);

/// HTTP request timeout for server discovery and the handshake fetch.
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Wire literals
// ============================================================================

/// Username sent on the wire for anonymous sessions. Protocol-mandated
/// sentinel, not an absent-value marker.
pub const DEFAULT_USERNAME: &str = "UnknownSoldier";

/// Token sent on the wire for anonymous sessions: the literal string
/// `"null"`, not JSON null.
pub const ANONYMOUS_TOKEN: &str = "null";

/// Name color used for outbound chat messages when the identity does not
/// supply one (hex RGB without the leading `#`).
pub const DEFAULT_NAME_COLOR: &str = "2E568A";

// ============================================================================
// Paths
// ============================================================================

/// Handshake path on a chat server; the response body is
/// `"<sessionId>:<...rest ignored...>"`.
pub const HANDSHAKE_PATH: &str = "/socket.io/1/";

/// WebSocket path prefix on a chat server; the resolved session id is
/// appended.
pub const CHAT_SOCKET_PATH: &str = "/socket.io/1/websocket/";

/// WebSocket path on a viewer server. No handshake id is needed.
pub const VIEWER_SOCKET_PATH: &str = "/viewer";

/// Discovery path listing chat servers.
pub const CHAT_SERVERS_PATH: &str = "/chat/servers";

/// Discovery path listing viewer (player) servers.
pub const VIEWER_SERVERS_PATH: &str = "/player/server";

// ============================================================================
// Limits & queue depths
// ============================================================================

/// Chat message length limit enforced by the server. Documented for callers;
/// no client-side check is made (longer messages are rejected remotely).
pub const SERVER_MESSAGE_LIMIT: usize = 300;

/// Depth of the outbound command queue between the public API and the
/// session's message loop.
pub const COMMAND_QUEUE_DEPTH: usize = 100;

/// Depth of the domain-event queue handed to consumers. Consumers should
/// drain it on their own task; the message loop blocks once it fills.
pub const EVENT_QUEUE_DEPTH: usize = 100;
