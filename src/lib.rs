//! Client engine for a socket.io v0.9-era livestream chat service.
//!
//! Two session flavors share the transport plumbing:
//!
//! - [`ChatSession`] joins a channel over the framed socket.io socket:
//!   heartbeat echo, login, chat lines in and out.
//! - [`ViewerSession`] watches a channel's stream status over the unframed
//!   viewer socket.
//!
//! Both resolve their server through the HTTP discovery API, retry timed-out
//! connection attempts against freshly picked servers, and deliver inbound
//! traffic through a take-once [`EventReceiver`].
//!
//! ```ignore
//! let mut session = ChatSession::builder()
//!     .server_url("http://example.com")
//!     .identity(SessionIdentity::anonymous())
//!     .build()?;
//!
//! session.connect().await?;
//! session.join("somechannel").await?;
//!
//! let mut events = session.take_event_receiver().unwrap();
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! ```

pub mod codec;
pub mod command;
pub mod constants;
pub mod discovery;
pub mod handshake;
pub mod session;
pub mod ws;

pub use command::SessionIdentity;
pub use discovery::{HttpApi, ServerDiscovery, ServerKind, TextFetcher};
pub use handshake::SessionEndpoint;
pub use session::chat::{ChatSession, ChatSessionBuilder};
pub use session::viewer::{ViewerSession, ViewerSessionBuilder};
pub use session::{
    ChatEvent, ChatMessage, EventReceiver, Role, SessionError, SessionState, ViewerEvent,
    ViewerStatus,
};
