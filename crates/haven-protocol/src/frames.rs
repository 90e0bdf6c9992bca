use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client → Server frame.
/// Wire: `{ "type": "chat_message", "ts": 1718..., "correlation_id": "c1", ... }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientFrame {
    /// Millisecond timestamp stamped by the sender.
    pub ts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(flatten)]
    pub body: ClientFrameBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrameBody {
    /// Binds the connection to a session before any chat traffic.
    Init {
        session: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        capabilities: Option<Vec<String>>,
    },
    ChatMessage {
        session: String,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
    },
    VoiceInput {
        session: String,
        audio_b64: String,
        format: String,
        duration_ms: u64,
    },
    Typing {
        session: String,
        is_typing: bool,
    },
    Ping,
}

/// Server → Client frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerFrame {
    pub ts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(flatten)]
    pub body: ServerFrameBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrameBody {
    AiResponse {
        session: String,
        content: String,
        message_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<Value>>,
        metadata: Value,
    },
    AiTyping {
        session: String,
        is_typing: bool,
    },
    Error {
        code: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        retry_after_ms: Option<u64>,
    },
    SystemNotification {
        level: String,
        message: String,
    },
    Pong,
}

impl ServerFrame {
    /// Build a frame stamped with the current time, echoing `correlation_id`.
    pub fn new(body: ServerFrameBody, correlation_id: Option<String>) -> Self {
        Self {
            ts: chrono::Utc::now().timestamp_millis(),
            correlation_id,
            body,
        }
    }

    pub fn error(code: &str, message: &str, retry_after_ms: Option<u64>) -> Self {
        Self::new(
            ServerFrameBody::Error {
                code: code.to_string(),
                message: message.to_string(),
                retry_after_ms,
            },
            None,
        )
    }

    pub fn pong(correlation_id: Option<String>) -> Self {
        Self::new(ServerFrameBody::Pong, correlation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_message_discriminator_is_snake_case() {
        let frame = ClientFrame {
            ts: 1_700_000_000_000,
            correlation_id: Some("c-1".into()),
            body: ClientFrameBody::ChatMessage {
                session: "s-1".into(),
                content: "hello".into(),
                metadata: None,
            },
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "chat_message");
        assert_eq!(json["session"], "s-1");
        assert_eq!(json["correlation_id"], "c-1");
    }

    #[test]
    fn ping_parses_without_session() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"ping","ts":123}"#).unwrap();
        assert!(matches!(frame.body, ClientFrameBody::Ping));
        assert_eq!(frame.correlation_id, None);
    }

    #[test]
    fn error_frame_skips_absent_retry_after() {
        let frame = ServerFrame::error("INTERNAL_ERROR", "boom", None);
        let json = serde_json::to_string(&frame).unwrap();
        assert!(!json.contains("retry_after_ms"));
    }
}
