use serde::{Deserialize, Serialize};

use crate::models::{Chat, ChatId, Message, MessageId, UserId};

/// Events sent over the WebSocket gateway, framed as
/// `{"event": "<name>", "data": <payload>}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// Handshake accepted
    #[serde(rename = "ready")]
    Ready { user_id: UserId },

    /// Reply to a client frame that carried an `ack` id
    #[serde(rename = "ack")]
    Ack(AckReply),

    /// Delivered to each participant's personal channel
    #[serde(rename = "chat:created")]
    ChatCreated(Chat),

    /// Membership or name changed
    #[serde(rename = "chat:updated")]
    ChatUpdated(Chat),

    #[serde(rename = "message:new")]
    MessageNew(Message),

    #[serde(rename = "message:read")]
    MessageRead {
        chat_id: ChatId,
        message_id: MessageId,
        user_id: UserId,
    },

    #[serde(rename = "typing:start")]
    TypingStart { chat_id: ChatId, user_id: UserId },

    #[serde(rename = "typing:stop")]
    TypingStop { chat_id: ChatId, user_id: UserId },
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "ready",
            Self::Ack(_) => "ack",
            Self::ChatCreated(_) => "chat:created",
            Self::ChatUpdated(_) => "chat:updated",
            Self::MessageNew(_) => "message:new",
            Self::MessageRead { .. } => "message:read",
            Self::TypingStart { .. } => "typing:start",
            Self::TypingStop { .. } => "typing:stop",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AckReply {
    pub id: u64,
    #[serde(flatten)]
    pub outcome: AckOutcome,
}

/// Result carried by an `ack` frame: `{"data": ...}` or `{"error": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AckOutcome {
    Data(serde_json::Value),
    Error(String),
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum ClientCommand {
    /// Authenticate a connection that did not present a token at upgrade
    #[serde(rename = "identify")]
    Identify { token: String },

    /// Subscribe to the rooms of the given chats
    #[serde(rename = "chats:join")]
    JoinChats {
        #[serde(default)]
        chat_ids: Vec<ChatId>,
    },

    /// Same entry point as `POST /chats/{chatId}/messages`
    #[serde(rename = "message:send")]
    SendMessage {
        #[serde(default)]
        chat_id: ChatId,
        #[serde(default)]
        content: String,
        #[serde(rename = "type")]
        kind: Option<String>,
    },

    #[serde(rename = "typing:start")]
    TypingStart { chat_id: ChatId },

    #[serde(rename = "typing:stop")]
    TypingStop { chat_id: ChatId },
}

/// A client frame: a command plus an optional ack id echoed back in the reply.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientFrame {
    #[serde(flatten)]
    pub command: ClientCommand,
    #[serde(default)]
    pub ack: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_send_frame_with_ack() {
        let frame: ClientFrame = serde_json::from_str(
            r#"{"event":"message:send","data":{"chatId":"c1","content":"hi"},"ack":7}"#,
        )
        .unwrap();

        assert_eq!(frame.ack, Some(7));
        match frame.command {
            ClientCommand::SendMessage {
                chat_id,
                content,
                kind,
            } => {
                assert_eq!(chat_id, "c1");
                assert_eq!(content, "hi");
                assert!(kind.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn parses_join_frame_without_ack() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"event":"chats:join","data":{"chatIds":["a","b"]}}"#).unwrap();

        assert!(frame.ack.is_none());
        assert!(matches!(
            frame.command,
            ClientCommand::JoinChats { ref chat_ids } if chat_ids.len() == 2
        ));
    }

    #[test]
    fn ack_error_frame_shape() {
        let event = ServerEvent::Ack(AckReply {
            id: 3,
            outcome: AckOutcome::Error("Chat not found".into()),
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "ack");
        assert_eq!(json["data"]["id"], 3);
        assert_eq!(json["data"]["error"], "Chat not found");
    }

    #[test]
    fn typing_event_wire_shape() {
        let event = ServerEvent::TypingStart {
            chat_id: "c9".into(),
            user_id: "u1".into(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "typing:start");
        assert_eq!(json["data"]["chatId"], "c9");
        assert_eq!(json["data"]["userId"], "u1");
    }
}
