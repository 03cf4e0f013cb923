use serde::{Deserialize, Serialize};

use crate::models::{now_rfc3339, Message};

/// Client→server frames. An unknown `type` fails to deserialize into this enum at all,
/// which the caller turns into `ErrorCode::InvalidMessage` — a compile-time-checked
/// exhaustive match rather than a runtime string compare.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Auth { username: String },
    CreateRoom { room_name: String },
    JoinRoom { room_name: String },
    LeaveRoom,
    SendMessage { content: String },
    TypingStart,
    TypingStop,
    Command {
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

impl ClientFrame {
    /// The rate-limit class this frame is billed against.
    pub fn rate_limit_class(&self) -> &'static str {
        match self {
            ClientFrame::Auth { .. } => "connection",
            ClientFrame::CreateRoom { .. } => "room-create",
            ClientFrame::SendMessage { .. } => "message",
            ClientFrame::Command { .. } => "command",
            ClientFrame::JoinRoom { .. }
            | ClientFrame::LeaveRoom
            | ClientFrame::TypingStart
            | ClientFrame::TypingStop => "command",
        }
    }

    /// Every type other than `auth` requires an authenticated connection.
    pub fn requires_auth(&self) -> bool {
        !matches!(self, ClientFrame::Auth { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UserSummary {
    pub user_id: String,
    pub username: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomSummary {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomJoinedInfo {
    pub id: String,
    pub name: String,
    pub member_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomListEntry {
    pub name: String,
    pub users: i64,
    pub messages: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    pub correlation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

/// The server's error taxonomy, carried verbatim over the wire as a tagged string.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidMessage,
    Unauthorized,
    RoomNotFound,
    RoomExists,
    UserExists,
    RateLimit,
    DatabaseError,
    InternalError,
}

impl ErrorCode {
    pub fn message(&self) -> &'static str {
        match self {
            ErrorCode::InvalidMessage => "malformed or unsupported frame",
            ErrorCode::Unauthorized => "authentication required",
            ErrorCode::RoomNotFound => "room does not exist or is inactive",
            ErrorCode::RoomExists => "a room with that name already exists",
            ErrorCode::UserExists => "username is already taken",
            ErrorCode::RateLimit => "rate limit exceeded",
            ErrorCode::DatabaseError => "durable store is unavailable",
            ErrorCode::InternalError => "internal server error",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

/// Server→client frames. Every variant is tagged and carries a server timestamp.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    System { message: String, timestamp: String },
    AuthSuccess { user: UserSummary, timestamp: String },
    AuthError { error: ErrorBody, timestamp: String },
    RoomCreated { room: RoomSummary, timestamp: String },
    RoomJoined {
        room: RoomJoinedInfo,
        members: Vec<String>,
        timestamp: String,
    },
    RoomLeft { room_name: String, timestamp: String },
    Message { message: Message, timestamp: String },
    MessageHistory { messages: Vec<Message>, timestamp: String },
    UserJoined {
        user: UserSummary,
        member_count: i64,
        timestamp: String,
    },
    UserLeft {
        user: UserSummary,
        member_count: i64,
        timestamp: String,
    },
    TypingUpdate { typing_users: Vec<String>, timestamp: String },
    RoomList { rooms: Vec<RoomListEntry>, count: usize, timestamp: String },
    UserList {
        room: Option<String>,
        users: Vec<String>,
        count: usize,
        timestamp: String,
    },
    Error { error: ErrorBody, timestamp: String },
    Notification { message: String, timestamp: String },
    ClearScreen { timestamp: String },
}

impl ServerFrame {
    pub fn system(message: impl Into<String>) -> Self {
        ServerFrame::System { message: message.into(), timestamp: now_rfc3339() }
    }

    pub fn error(code: ErrorCode, correlation_id: String, retry_after: Option<u64>) -> Self {
        ServerFrame::Error {
            error: ErrorBody {
                message: code.message().to_string(),
                code,
                correlation_id,
                retry_after,
            },
            timestamp: now_rfc3339(),
        }
    }

    pub fn auth_error(code: ErrorCode, correlation_id: String) -> Self {
        ServerFrame::AuthError {
            error: ErrorBody {
                message: code.message().to_string(),
                code,
                correlation_id,
                retry_after: None,
            },
            timestamp: now_rfc3339(),
        }
    }

    pub fn message_frame(message: Message) -> Self {
        ServerFrame::Message { message, timestamp: now_rfc3339() }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","error":{"code":"INTERNAL_ERROR","message":"serialization failure"}}"#
                .to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_type_fails_to_parse() {
        let raw = r#"{"type":"not_a_real_type"}"#;
        let parsed: Result<ClientFrame, _> = serde_json::from_str(raw);
        assert!(parsed.is_err());
    }

    #[test]
    fn auth_does_not_require_auth() {
        let frame = ClientFrame::Auth { username: "alice".to_string() };
        assert!(!frame.requires_auth());
        let frame = ClientFrame::SendMessage { content: "hi".to_string() };
        assert!(frame.requires_auth());
    }

    #[test]
    fn rate_limit_class_mapping() {
        assert_eq!(ClientFrame::SendMessage { content: String::new() }.rate_limit_class(), "message");
        assert_eq!(ClientFrame::CreateRoom { room_name: String::new() }.rate_limit_class(), "room-create");
        assert_eq!(ClientFrame::LeaveRoom.rate_limit_class(), "command");
    }

    #[test]
    fn error_frame_serializes_with_tag() {
        let frame = ServerFrame::error(ErrorCode::RoomExists, "corr-1".to_string(), None);
        let json = frame.to_json();
        assert!(json.contains("\"type\":\"error\""));
        assert!(json.contains("\"code\":\"ROOM_EXISTS\""));
    }
}
