//! Push channel message types
//!
//! Everything the server writes is a [`ProgressEvent`] serialized as JSON.
//! Clients only ever send the literal text `ping`.

use rf_core::{AgentStatus, ProgressEvent};

use crate::Result;

/// Message from client to server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// The literal text `ping`
    Ping,
    /// Anything else; ignored
    Unknown(String),
}

impl ClientMessage {
    pub fn parse(text: &str) -> Self {
        if text == "ping" {
            Self::Ping
        } else {
            Self::Unknown(text.to_string())
        }
    }
}

/// Sent once, right after the connection is registered
pub fn welcome() -> ProgressEvent {
    ProgressEvent::system(AgentStatus::Connected, "WebSocket connected successfully").stamped()
}

/// Reply to a client `ping`
pub fn pong(connections: usize) -> ProgressEvent {
    ProgressEvent::system(AgentStatus::Pong, "pong")
        .with_detail("connections", connections)
        .stamped()
}

/// Idle keepalive pushed by the server
pub fn keepalive() -> ProgressEvent {
    ProgressEvent::system(AgentStatus::Ping, "keepalive").stamped()
}

pub fn encode(event: &ProgressEvent) -> Result<String> {
    Ok(serde_json::to_string(event)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_exact_ping_is_ping() {
        assert_eq!(ClientMessage::parse("ping"), ClientMessage::Ping);
        assert!(matches!(ClientMessage::parse("PING"), ClientMessage::Unknown(_)));
        assert!(matches!(
            ClientMessage::parse(r#"{"type":"ping"}"#),
            ClientMessage::Unknown(_)
        ));
    }

    #[test]
    fn test_pong_carries_connection_count() {
        let json: serde_json::Value = serde_json::from_str(&encode(&pong(3)).unwrap()).unwrap();
        assert_eq!(json["agent"], "System");
        assert_eq!(json["status"], "pong");
        assert_eq!(json["details"]["connections"], 3);
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_welcome_and_keepalive_statuses() {
        assert_eq!(welcome().status, AgentStatus::Connected);
        assert_eq!(keepalive().status, AgentStatus::Ping);
        assert_eq!(keepalive().message, "keepalive");
    }
}
