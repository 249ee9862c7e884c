//! Client-to-server commands.

use serde::Deserialize;

use crate::errors::ProtocolError;

/// Raw inbound frame as it appears on the wire.
#[derive(Debug, Deserialize)]
struct IncomingFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

/// A recognized client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// Publish a chat line. Missing fields arrive as empty strings and are
    /// rejected by the session, not here.
    ChatMessage { channel: String, content: String },
    Ping,
    GetUsers,
}

impl ClientCommand {
    /// Parse one text frame.
    ///
    /// # Errors
    ///
    /// `Malformed` if the frame is not a JSON object with a string `type`,
    /// `UnknownType` if the `type` is not a known command.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let frame: IncomingFrame =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        Self::from_frame(frame)
    }

    /// Parse a binary frame holding UTF-8 JSON.
    ///
    /// # Errors
    ///
    /// `NotUtf8` if the payload is not UTF-8, otherwise as [`ClientCommand::parse`].
    pub fn parse_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(bytes).map_err(|_| ProtocolError::NotUtf8)?;
        Self::parse(text)
    }

    /// Bounded label for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            ClientCommand::ChatMessage { .. } => "chat_message",
            ClientCommand::Ping => "ping",
            ClientCommand::GetUsers => "get_users",
        }
    }

    fn from_frame(frame: IncomingFrame) -> Result<Self, ProtocolError> {
        match frame.kind.as_str() {
            "chat_message" => Ok(ClientCommand::ChatMessage {
                channel: frame.channel.unwrap_or_default(),
                content: frame.content.unwrap_or_default(),
            }),
            "ping" => Ok(ClientCommand::Ping),
            "get_users" => Ok(ClientCommand::GetUsers),
            _ => Err(ProtocolError::UnknownType(frame.kind)),
        }
    }
}
