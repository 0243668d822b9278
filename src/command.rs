//! Outbound command bodies for the chat and viewer sockets.
//!
//! Pure encoding: connection-state preconditions (must be connected to join,
//! must be joined to chat) are enforced by the session methods that call
//! these builders, because that is where the state lives.

use serde_json::json;
use uuid::Uuid;

use crate::codec::EventBody;
use crate::constants::{ANONYMOUS_TOKEN, DEFAULT_NAME_COLOR, DEFAULT_USERNAME};

/// Credentials and naming used to populate outbound command bodies.
///
/// Anonymous sessions fall back to the protocol-mandated sentinels:
/// username `"UnknownSoldier"` and the literal token string `"null"`.
#[derive(Debug, Clone, Default)]
pub struct SessionIdentity {
    token: Option<String>,
    username: Option<String>,
    name_color: Option<String>,
}

impl SessionIdentity {
    /// Identity for an authenticated session.
    pub fn new(username: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            username: Some(username.into()),
            name_color: None,
        }
    }

    /// Anonymous identity; wire fields fall back to the sentinels.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Set the name color used for outbound chat messages (hex RGB without
    /// the leading `#`).
    #[must_use]
    pub fn name_color(mut self, color: impl Into<String>) -> Self {
        self.name_color = Some(color.into());
        self
    }

    /// Username as sent on the wire.
    pub fn wire_name(&self) -> &str {
        self.username.as_deref().unwrap_or(DEFAULT_USERNAME)
    }

    /// Token as sent on the wire.
    pub fn wire_token(&self) -> &str {
        self.token.as_deref().unwrap_or(ANONYMOUS_TOKEN)
    }

    fn wire_color(&self) -> &str {
        self.name_color.as_deref().unwrap_or(DEFAULT_NAME_COLOR)
    }
}

/// `joinChannel` request for the chat socket. The channel name is lowercased
/// on the wire.
pub fn join_channel(identity: &SessionIdentity, channel: &str) -> EventBody {
    EventBody {
        method: "joinChannel".to_string(),
        params: json!({
            "channel": channel.to_lowercase(),
            "name": identity.wire_name(),
            "token": identity.wire_token(),
            "isAdmin": false,
        }),
    }
}

/// `partChannel` request for the chat socket.
pub fn part_channel(identity: &SessionIdentity) -> EventBody {
    EventBody {
        method: "partChannel".to_string(),
        params: json!({
            "name": identity.wire_name(),
        }),
    }
}

/// `chatMsg` request for the chat socket.
///
/// The server rejects text longer than
/// [`SERVER_MESSAGE_LIMIT`](crate::constants::SERVER_MESSAGE_LIMIT)
/// characters; no client-side length check is made.
pub fn chat_message(identity: &SessionIdentity, channel: &str, text: &str) -> EventBody {
    EventBody {
        method: "chatMsg".to_string(),
        params: json!({
            "channel": channel,
            "name": identity.wire_name(),
            "text": text,
            "nameColor": identity.wire_color(),
        }),
    }
}

/// Join body for the viewer socket: a bare `{method, params}` object (no
/// envelope framing) with a fresh uuid per connection.
pub fn viewer_join(identity: &SessionIdentity, channel: &str) -> String {
    json!({
        "method": "joinChannel",
        "params": {
            "channel": channel,
            "name": identity.wire_name(),
            "token": identity.wire_token(),
            "uuid": Uuid::new_v4().to_string(),
        },
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_channel_lowercases_and_fills_sentinels() {
        let body = join_channel(&SessionIdentity::anonymous(), "MyChannel");
        assert_eq!(body.method, "joinChannel");
        assert_eq!(body.params["channel"], "mychannel");
        assert_eq!(body.params["name"], "UnknownSoldier");
        assert_eq!(body.params["token"], "null");
        assert_eq!(body.params["isAdmin"], false);
    }

    #[test]
    fn test_join_channel_uses_identity() {
        let identity = SessionIdentity::new("someone", "tok123");
        let body = join_channel(&identity, "chan");
        assert_eq!(body.params["name"], "someone");
        assert_eq!(body.params["token"], "tok123");
    }

    #[test]
    fn test_part_channel_carries_only_the_name() {
        let body = part_channel(&SessionIdentity::new("someone", "tok123"));
        assert_eq!(body.method, "partChannel");
        assert_eq!(body.params, serde_json::json!({"name": "someone"}));
    }

    #[test]
    fn test_chat_message_body() {
        let identity = SessionIdentity::new("someone", "tok123").name_color("FF0000");
        let body = chat_message(&identity, "chan", "hello there");
        assert_eq!(body.method, "chatMsg");
        assert_eq!(body.params["channel"], "chan");
        assert_eq!(body.params["name"], "someone");
        assert_eq!(body.params["text"], "hello there");
        assert_eq!(body.params["nameColor"], "FF0000");
    }

    #[test]
    fn test_chat_message_default_color() {
        let body = chat_message(&SessionIdentity::anonymous(), "chan", "hi");
        assert_eq!(body.params["nameColor"], crate::constants::DEFAULT_NAME_COLOR);
    }

    #[test]
    fn test_viewer_join_is_bare_json_with_uuid() {
        let raw = viewer_join(&SessionIdentity::anonymous(), "SomeChannel");
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["method"], "joinChannel");
        // Viewer channel names are sent as given, not lowercased.
        assert_eq!(value["params"]["channel"], "SomeChannel");
        let uuid = value["params"]["uuid"].as_str().unwrap();
        assert_eq!(uuid.len(), 36);
    }
}
