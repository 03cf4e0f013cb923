use serde::{Deserialize, Serialize};

/// Authenticated identity, online state, and room membership summary.
///
/// Invariant: `username` is unique among rows with `is_online = true` — enforced by
/// `UserRegistry::authenticate`, not by a database constraint, since a user physically
/// persists across online/offline cycles.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    pub id: String,
    pub username: String,
    pub created_at: String,
    pub last_seen: String,
    pub is_online: bool,
    pub current_room_name: Option<String>,
    pub total_messages: i64,
    pub connection_count: i64,
    pub rooms_joined: Vec<String>,
}

/// A named multi-user broadcast domain with durable identity.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Room {
    pub id: String,
    pub name: String,
    pub created_by: String,
    pub created_at: String,
    pub last_activity: String,
    pub is_active: bool,
    pub current_users: i64,
    pub peak_users: i64,
    pub message_count: i64,
    pub total_unique_users: i64,
}

/// The relation between a user and a room. At most one active row exists per
/// `(room_id, user_id)` pair at any time.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Membership {
    pub room_id: String,
    pub user_id: String,
    pub username: String,
    pub joined_at: String,
    pub left_at: Option<String>,
    pub is_active: bool,
    pub messages_in_room: i64,
    pub join_count: i64,
    pub last_message_at: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    User,
    System,
    Notification,
}

/// A single chat message. `id` is immutable once assigned; `timestamp` is server-issued
/// and monotonic per room (callers never set it).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Message {
    pub id: String,
    pub room_id: String,
    pub user_id: String,
    pub username: String,
    pub content: String,
    pub timestamp: String,
    pub kind: MessageKind,
    pub edited: bool,
    pub edited_at: Option<String>,
}

/// In-memory, non-persisted per-socket state. Owned exclusively by `ConnectionHub`;
/// destroyed the moment the socket closes.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub connection_id: String,
    pub remote_addr: String,
    pub authenticated: bool,
    pub user_id: Option<String>,
    pub username: Option<String>,
    pub current_room_id: Option<String>,
    pub joined_at: std::time::Instant,
    pub last_activity: std::time::Instant,
    pub alive: bool,
}

impl ConnectionInfo {
    pub fn new(connection_id: String, remote_addr: String) -> Self {
        let now = std::time::Instant::now();
        Self {
            connection_id,
            remote_addr,
            authenticated: false,
            user_id: None,
            username: None,
            current_room_id: None,
            joined_at: now,
            last_activity: now,
            alive: true,
        }
    }
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
