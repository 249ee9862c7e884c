//! Server-to-client envelope.
//!
//! One variant per `type` discriminator. Once serialized with
//! [`Envelope::to_bytes`] the result is treated as opaque all the way to the
//! client: neither the bridge nor the hub parses it again.

use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use common::types::UserIdentity;
use serde::{Deserialize, Serialize};

use crate::errors::ChatError;

/// Sender attribution carried on chat messages and presence notices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: u64,
    pub username: String,
}

impl From<&UserIdentity> for UserInfo {
    fn from(identity: &UserIdentity) -> Self {
        Self {
            id: identity.user_id,
            username: identity.username.clone(),
        }
    }
}

/// Payload of a `system` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemData {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<bool>,
}

/// Payload of a `chat_message` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessageData {
    /// Wall-clock derived identifier. Ordering hint only; not unique across
    /// instances.
    pub id: u64,
    pub content: String,
    pub channel: String,
    /// RFC 3339, UTC, second precision.
    pub created_at: String,
    pub user: UserInfo,
}

/// Payload of `user_joined` and `user_left` envelopes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoticeData {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PongData {
    /// Server time, RFC 3339, UTC, second precision.
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsersListData {
    pub users: Vec<UserInfo>,
    /// Always `users.len()`.
    pub count: usize,
}

/// Server-to-client message, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    System {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
        data: SystemData,
    },
    ChatMessage {
        channel: String,
        data: ChatMessageData,
        user_id: u64,
        user: UserInfo,
    },
    UserJoined {
        channel: String,
        data: NoticeData,
        user: UserInfo,
    },
    UserLeft {
        channel: String,
        data: NoticeData,
        user: UserInfo,
    },
    Pong {
        data: PongData,
    },
    UsersList {
        data: UsersListData,
    },
}

impl Envelope {
    /// Courtesy message sent only to a newly registered session.
    #[must_use]
    pub fn connected(user: &UserIdentity) -> Self {
        Envelope::System {
            channel: None,
            data: SystemData {
                message: "Connected to chat".to_string(),
                user_id: Some(user.user_id),
                debug: None,
            },
        }
    }

    #[must_use]
    pub fn joined(channel: &str, user: &UserIdentity) -> Self {
        Envelope::UserJoined {
            channel: channel.to_string(),
            data: NoticeData {
                message: format!("{} joined the chat", user.username),
            },
            user: user.into(),
        }
    }

    #[must_use]
    pub fn left(channel: &str, user: &UserIdentity) -> Self {
        Envelope::UserLeft {
            channel: channel.to_string(),
            data: NoticeData {
                message: format!("{} left the chat", user.username),
            },
            user: user.into(),
        }
    }

    /// Chat message stamped with the server's current time.
    #[must_use]
    pub fn chat(channel: &str, content: &str, user: &UserIdentity) -> Self {
        let now = Utc::now();
        // Nanosecond resolution runs out in 2262; fall back to microseconds.
        let id = now
            .timestamp_nanos_opt()
            .unwrap_or_else(|| now.timestamp_micros());
        let info = UserInfo::from(user);

        Envelope::ChatMessage {
            channel: channel.to_string(),
            data: ChatMessageData {
                id: u64::try_from(id).unwrap_or_default(),
                content: content.to_string(),
                channel: channel.to_string(),
                created_at: now.to_rfc3339_opts(SecondsFormat::Secs, true),
                user: info.clone(),
            },
            user_id: user.user_id,
            user: info,
        }
    }

    #[must_use]
    pub fn pong() -> Self {
        Envelope::Pong {
            data: PongData {
                timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            },
        }
    }

    /// Deduplicated user list; `count` is the number of distinct users.
    #[must_use]
    pub fn users_list(users: Vec<UserInfo>) -> Self {
        let count = users.len();
        Envelope::UsersList {
            data: UsersListData { users, count },
        }
    }

    /// Synthetic broadcast injected through the admin surface.
    #[must_use]
    pub fn diagnostic(channel: &str) -> Self {
        Envelope::System {
            channel: Some(channel.to_string()),
            data: SystemData {
                message: "Test broadcast message".to_string(),
                user_id: None,
                debug: Some(true),
            },
        }
    }

    /// Wire discriminator, also used as a bounded log/metric label.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Envelope::System { .. } => "system",
            Envelope::ChatMessage { .. } => "chat_message",
            Envelope::UserJoined { .. } => "user_joined",
            Envelope::UserLeft { .. } => "user_left",
            Envelope::Pong { .. } => "pong",
            Envelope::UsersList { .. } => "users_list",
        }
    }

    /// Serialize once for the wire.
    ///
    /// # Errors
    ///
    /// Returns `ChatError::Serialization` if JSON encoding fails.
    pub fn to_bytes(&self) -> Result<Bytes, ChatError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn alice() -> UserIdentity {
        UserIdentity::new(1, "alice", "alice@example.com")
    }

    fn to_json(envelope: &Envelope) -> Value {
        serde_json::from_slice(&envelope.to_bytes().unwrap()).unwrap()
    }

    #[test]
    fn test_chat_envelope_wire_shape() {
        let json = to_json(&Envelope::chat("general", "hi", &alice()));

        assert_eq!(json["type"], "chat_message");
        assert_eq!(json["channel"], "general");
        assert_eq!(json["user_id"], 1);
        assert_eq!(json["user"], json!({"id": 1, "username": "alice"}));
        assert_eq!(json["data"]["content"], "hi");
        assert_eq!(json["data"]["channel"], "general");
        assert_eq!(json["data"]["user"]["username"], "alice");
        assert!(json["data"]["id"].as_u64().unwrap() > 0);

        let created_at = json["data"]["created_at"].as_str().unwrap();
        assert!(created_at.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(created_at).is_ok());
    }

    #[test]
    fn test_connected_has_no_channel() {
        let json = to_json(&Envelope::connected(&alice()));

        assert_eq!(json["type"], "system");
        assert!(json.get("channel").is_none());
        assert_eq!(json["data"]["message"], "Connected to chat");
        assert_eq!(json["data"]["user_id"], 1);
        assert!(json["data"].get("debug").is_none());
    }

    #[test]
    fn test_presence_notice_text() {
        let joined = to_json(&Envelope::joined("general", &alice()));
        assert_eq!(joined["type"], "user_joined");
        assert_eq!(joined["data"]["message"], "alice joined the chat");

        let left = to_json(&Envelope::left("general", &alice()));
        assert_eq!(left["type"], "user_left");
        assert_eq!(left["data"]["message"], "alice left the chat");
        assert_eq!(left["user"]["id"], 1);
    }

    #[test]
    fn test_users_list_and_pong() {
        let users = vec![UserInfo {
            id: 1,
            username: "alice".to_string(),
        }];
        let json = to_json(&Envelope::users_list(users));
        assert_eq!(json["type"], "users_list");
        assert_eq!(json["data"]["count"], 1);
        assert_eq!(json["data"]["users"].as_array().unwrap().len(), 1);

        let pong = to_json(&Envelope::pong());
        assert_eq!(pong["type"], "pong");
        let stamp = pong["data"]["timestamp"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(stamp).is_ok());
        assert!(stamp.ends_with('Z'));
    }

    #[test]
    fn test_diagnostic_broadcast() {
        let json = to_json(&Envelope::diagnostic("general"));
        assert_eq!(json["channel"], "general");
        assert_eq!(json["data"]["message"], "Test broadcast message");
        assert_eq!(json["data"]["debug"], true);
    }

    #[test]
    fn test_kind_matches_wire_tag() {
        for envelope in [
            Envelope::connected(&alice()),
            Envelope::chat("general", "hi", &alice()),
            Envelope::joined("general", &alice()),
            Envelope::left("general", &alice()),
            Envelope::pong(),
            Envelope::users_list(vec![]),
        ] {
            assert_eq!(to_json(&envelope)["type"], envelope.kind());
        }
    }

    #[test]
    fn test_deserialize_round_trip_preserves_variant() {
        let original = Envelope::joined("general", &alice());
        let parsed: Envelope = serde_json::from_slice(&original.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed, original);
    }
}
