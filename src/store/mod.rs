//! C5: abstract persistence for users, rooms, memberships, and messages. Concrete
//! backend lives in `sqlite.rs`.

mod sqlite;

pub use sqlite::SqliteStore;

use crate::models::{Membership, Message, Room, User};

#[derive(Debug, Clone)]
pub struct StoreError(pub String);

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "store error: {}", self.0)
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError(e.to_string())
    }
}

/// Returned by `Rooms::create` on a unique-name conflict, distinct from a generic
/// `StoreError` so callers can surface `ROOM_EXISTS` rather than `DATABASE_ERROR`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomExistsConflict;

pub type StoreResult<T> = Result<T, StoreError>;
pub type CreateRoomResult = Result<Room, RoomExistsConflict>;

/// All writes are idempotent at the row level by natural keys.
pub trait DurableStore: Send + Sync {
    fn find_user_by_id(&self, id: &str) -> StoreResult<Option<User>>;
    fn find_user_by_username_online(&self, username: &str) -> StoreResult<Option<User>>;
    fn create_user(&self, username: &str) -> StoreResult<User>;
    fn set_user_online(&self, id: &str, online: bool) -> StoreResult<()>;
    fn update_user_room(&self, id: &str, room_name: Option<&str>) -> StoreResult<()>;
    fn increment_user_connections(&self, id: &str, delta: i64) -> StoreResult<i64>;
    fn record_user_message(&self, id: &str) -> StoreResult<()>;
    /// Appends `room_name` to the user's bounded (≤50) `roomsJoined` history if absent.
    fn record_room_joined(&self, user_id: &str, room_name: &str) -> StoreResult<()>;
    fn purge_inactive_users(&self, older_than_secs: i64) -> StoreResult<u64>;

    fn find_room_by_name_active(&self, name: &str) -> StoreResult<Option<Room>>;
    fn find_room_by_id_active(&self, id: &str) -> StoreResult<Option<Room>>;
    fn find_active_rooms(&self, limit: i64) -> StoreResult<Vec<Room>>;
    fn create_room(&self, name: &str, created_by: &str) -> StoreResult<CreateRoomResult>;
    fn increment_room_user_count(&self, room_id: &str, delta: i64) -> StoreResult<Room>;
    fn record_room_message(&self, room_id: &str) -> StoreResult<()>;
    fn cleanup_empty_rooms(&self, older_than_secs: i64) -> StoreResult<u64>;

    fn join_room(&self, room_id: &str, user_id: &str, username: &str) -> StoreResult<Membership>;
    fn leave_room(&self, room_id: &str, user_id: &str) -> StoreResult<()>;
    fn active_members(&self, room_id: &str) -> StoreResult<Vec<Membership>>;
    fn active_rooms_of(&self, user_id: &str) -> StoreResult<Vec<Membership>>;
    fn purge_inactive_memberships(&self, older_than_secs: i64) -> StoreResult<u64>;

    fn create_message(&self, message: &Message) -> StoreResult<()>;
    fn history(&self, room_id: &str, limit: i64, before: Option<&str>) -> StoreResult<Vec<Message>>;
    fn messages_by_user(&self, user_id: &str, limit: i64) -> StoreResult<Vec<Message>>;
    fn purge_expired_messages(&self, older_than_secs: i64) -> StoreResult<u64>;
    fn message_stats(&self, room_id: &str, hours_back: i64) -> StoreResult<i64>;

    /// `(active room count, total message count)`, for the operational `/metrics` surface.
    fn global_counts(&self) -> StoreResult<(i64, i64)>;
}
