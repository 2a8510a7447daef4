//! Realtime protocol message definitions.
//!
//! The `/ws` channel speaks JSON text frames tagged by `type`. Pushed events
//! (`receive_message`, `user_typing`, `user_stop_typing`) are
//! [`parlor_core::RealtimeEvent`] values serialized as-is; the types here
//! cover what the client sends and the direct replies to it.

use parlor_core::{ConversationId, Error, ErrorKind, Message, MessageContent, UserId};
use serde::{Deserialize, Serialize};

// ── Client → Server ───────────────────────────────────────────────────────────

/// Messages sent from a client over the socket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Bind this socket to a user. Must be sent first.
    Join { user_id: UserId },

    /// Persist a message and push it to the other participants.
    SendMessage {
        conversation_id: ConversationId,
        content: MessageContent,
    },

    Typing { receiver_id: UserId },

    StopTyping { receiver_id: UserId },

    /// Keepalive.
    Ping,
}

// ── Server → Client ───────────────────────────────────────────────────────────

/// Direct replies to a client's own messages.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// The socket is now bound to `user_id`.
    Joined { user_id: UserId },

    /// The sender's copy of a message that was just persisted.
    MessageSent { message: Message },

    Pong,

    Error {
        kind: ErrorKind,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<i32>,
        message: String,
    },
}

impl ServerMessage {
    /// A malformed or out-of-order frame.
    pub fn invalid(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            kind: ErrorKind::InvalidArgument,
            code: None,
            message: message.into(),
        }
    }
}

impl From<&Error> for ServerMessage {
    fn from(err: &Error) -> Self {
        ServerMessage::Error {
            kind: err.kind(),
            code: Some(err.code()),
            message: err.to_string(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_join_deserialization() {
        let json = r#"{"type":"join","userId":"did:key:z6MkAlice"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            ClientMessage::Join { user_id } => assert_eq!(user_id.as_str(), "did:key:z6MkAlice"),
            _ => panic!("Expected Join"),
        }
    }

    #[test]
    fn test_client_message_join_rejects_blank_user() {
        let json = r#"{"type":"join","userId":"   "}"#;
        assert!(serde_json::from_str::<ClientMessage>(json).is_err());
    }

    #[test]
    fn test_client_message_send_deserialization() {
        let conversation = ConversationId::new();
        let json = format!(
            r#"{{"type":"send_message","conversationId":"{}","content":{{"messageType":"text","text":"hi"}}}}"#,
            conversation
        );
        let msg: ClientMessage = serde_json::from_str(&json).unwrap();
        match msg {
            ClientMessage::SendMessage {
                conversation_id,
                content,
            } => {
                assert_eq!(conversation_id, conversation);
                assert_eq!(content, MessageContent::text("hi"));
            }
            _ => panic!("Expected SendMessage"),
        }
    }

    #[test]
    fn test_client_message_typing_variants() {
        let typing: ClientMessage =
            serde_json::from_str(r#"{"type":"typing","receiverId":"bob"}"#).unwrap();
        assert!(matches!(typing, ClientMessage::Typing { .. }));

        let stop: ClientMessage =
            serde_json::from_str(r#"{"type":"stop_typing","receiverId":"bob"}"#).unwrap();
        assert!(matches!(stop, ClientMessage::StopTyping { .. }));

        let ping: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(ping, ClientMessage::Ping));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"register","did":"x"}"#).is_err());
    }

    #[test]
    fn test_server_message_joined_serialization() {
        let msg = ServerMessage::Joined {
            user_id: UserId::parse("alice").unwrap(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json, serde_json::json!({"type": "joined", "userId": "alice"}));
    }

    #[test]
    fn test_server_message_error_from_core_error() {
        let msg = ServerMessage::from(&Error::NotParticipant);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["kind"], "forbidden");
        assert_eq!(json["code"], 200);
    }

    #[test]
    fn test_invalid_frame_error_has_no_code() {
        let json = serde_json::to_value(ServerMessage::invalid("bad frame")).unwrap();
        assert_eq!(json["kind"], "invalid_argument");
        assert!(json.get("code").is_none());
    }

    #[test]
    fn test_pong_serialization() {
        let json = serde_json::to_string(&ServerMessage::Pong).unwrap();
        assert_eq!(json, r#"{"type":"pong"}"#);
    }
}
