use std::sync::Arc;

use serde_json::json;

use crate::bus::{self, Bus};
use crate::cache::Cache;
use crate::models::{new_id, now_rfc3339, Message, MessageKind};
use crate::protocol::ErrorCode;
use crate::room_registry::RoomRegistry;
use crate::store::DurableStore;
use crate::validator;

const DEFAULT_HISTORY_LIMIT: i64 = 20;

/// C9: validates, persists, publishes user messages and system notifications; serves
/// history read-through.
pub struct MessageService {
    store: Arc<dyn DurableStore>,
    cache: Arc<Cache>,
    bus: Arc<dyn Bus>,
}

impl MessageService {
    pub fn new(store: Arc<dyn DurableStore>, cache: Arc<Cache>, bus: Arc<dyn Bus>) -> Self {
        Self { store, cache, bus }
    }

    /// Validate → sanitize → persist (message + room/membership/user counters) →
    /// invalidate the room's message cache entry → publish → return. Typing
    /// cancellation for the sender is the caller's job (it owns `RoomRegistry`).
    pub async fn send(
        &self,
        room_id: &str,
        user_id: &str,
        username: &str,
        raw_content: &str,
    ) -> Result<Message, ErrorCode> {
        self.send_from_connection(room_id, user_id, username, raw_content, "").await
    }

    /// Same as `send`, but tags the publish with the originating connection id so
    /// `ConnectionHub` can exclude the sender's own socket from local fan-out — the
    /// sender never receives their own `message` frame back.
    pub async fn send_from_connection(
        &self,
        room_id: &str,
        user_id: &str,
        username: &str,
        raw_content: &str,
        sender_connection_id: &str,
    ) -> Result<Message, ErrorCode> {
        if !validator::validate_content(raw_content) || validator::is_sql_shaped(raw_content) {
            return Err(ErrorCode::InvalidMessage);
        }
        let sanitized = validator::sanitize(raw_content);
        if sanitized.trim().is_empty() {
            return Err(ErrorCode::InvalidMessage);
        }

        // Spam heuristics flag, never block (spec's Validator "flags spam
        // heuristics" — it doesn't reject on them); recent history from this room
        // supplies the duplicate-message check.
        let recent: Vec<String> = self
            .store
            .history(room_id, 5, None)
            .unwrap_or_default()
            .into_iter()
            .map(|m| m.content)
            .collect();
        if validator::is_spam(&sanitized, &recent) {
            eprintln!("🚩 spam heuristic tripped for user {user_id} in room {room_id}");
        }

        let message = Message {
            id: new_id(),
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
            username: username.to_string(),
            content: sanitized,
            timestamp: now_rfc3339(),
            kind: MessageKind::User,
            edited: false,
            edited_at: None,
        };

        self.store.create_message(&message).map_err(|_| ErrorCode::DatabaseError)?;
        self.store.record_room_message(room_id).map_err(|_| ErrorCode::DatabaseError)?;
        self.store.record_user_message(user_id).map_err(|_| ErrorCode::DatabaseError)?;

        self.cache.invalidate(&format!("room:{room_id}:messages"), true).await;

        self.bus
            .publish(
                &bus::channel_room_messages(room_id),
                json!({"event": "message", "message": &message, "senderConnectionId": sender_connection_id}),
            )
            .await;

        Ok(message)
    }

    /// Cache-read-through history in chronological (oldest-first) order.
    pub async fn history(&self, room_id: &str, limit: Option<i64>) -> Vec<Message> {
        let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
        let key = format!("room:{room_id}:messages:{limit}");
        // Registered as a dependent of the un-suffixed `room:{id}:messages` key so that
        // `send`/`system_broadcast`'s cascading invalidate reaches every limit variant,
        // not just a key nobody ever actually `set`s directly.
        let base_dep = format!("room:{room_id}:messages");
        let store = self.store.clone();
        let room_id_owned = room_id.to_string();
        let loaded = self
            .cache
            .get(&key, Some(move || {
                let store = store.clone();
                let room_id = room_id_owned.clone();
                async move {
                    store
                        .history(&room_id, limit, None)
                        .ok()
                        .and_then(|messages| serde_json::to_value(messages).ok())
                }
            }), &[&base_dep])
            .await;

        loaded
            .and_then(|v| serde_json::from_value::<Vec<Message>>(v).ok())
            .unwrap_or_default()
    }

    /// Builds a synthetic message with `userId="system"`/`username="System"`.
    /// Persisted only when `kind=notification`; published either way.
    pub async fn system_broadcast(&self, room_id: &str, content: &str, kind: MessageKind) -> Message {
        let message = Message {
            id: new_id(),
            room_id: room_id.to_string(),
            user_id: "system".to_string(),
            username: "System".to_string(),
            content: content.to_string(),
            timestamp: now_rfc3339(),
            kind,
            edited: false,
            edited_at: None,
        };

        if matches!(kind, MessageKind::Notification) {
            self.store.create_message(&message).ok();
            self.cache.invalidate(&format!("room:{room_id}:messages"), true).await;
        }

        self.bus
            .publish(
                &bus::channel_room_messages(room_id),
                json!({"event": "message", "message": &message}),
            )
            .await;

        message
    }
}

/// Cancels typing for a sender after a successful send — kept free-standing since it
/// needs `RoomRegistry`, not `MessageService`'s own dependencies.
pub async fn cancel_typing_after_send(rooms: &RoomRegistry, room_id: &str, user_id: &str, username: &str) {
    rooms.set_typing(room_id, user_id, username, false).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::NoopSharedCache;
    use crate::circuit_breaker::CircuitBreaker;
    use crate::store::SqliteStore;
    use crate::bus::InProcessBus;

    fn service() -> (MessageService, Arc<dyn DurableStore>, String) {
        let path = format!("/tmp/roomcast_msgsvc_{}.db", uuid::Uuid::new_v4());
        let store: Arc<dyn DurableStore> = Arc::new(SqliteStore::new(&path));
        let cache = Arc::new(Cache::new(Arc::new(NoopSharedCache), Arc::new(CircuitBreaker::new())));
        let bus: Arc<dyn Bus> = Arc::new(InProcessBus::new());
        (MessageService::new(store.clone(), cache, bus), store, path)
    }

    #[tokio::test]
    async fn send_rejects_empty_content() {
        let (svc, _store, path) = service();
        let room = _store.create_room("lobby", "u1").unwrap().unwrap();
        let result = svc.send(&room.id, "u1", "alice", "   ").await;
        assert!(matches!(result, Err(ErrorCode::InvalidMessage)));
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn send_rejects_sql_shaped_content() {
        let (svc, store, path) = service();
        let room = store.create_room("lobby", "u1").unwrap().unwrap();
        let result = svc.send(&room.id, "u1", "alice", "1' OR '1'='1").await;
        assert!(matches!(result, Err(ErrorCode::InvalidMessage)));
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn send_then_history_round_trips() {
        let (svc, store, path) = service();
        let room = store.create_room("lobby", "u1").unwrap().unwrap();
        svc.send(&room.id, "u1", "alice", "hello").await.unwrap();
        let history = svc.history(&room.id, None).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "hello");
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn second_send_is_visible_in_a_warm_history_read() {
        let (svc, store, path) = service();
        let room = store.create_room("lobby", "u1").unwrap().unwrap();
        svc.send(&room.id, "u1", "alice", "first").await.unwrap();
        // Warms the cache entry `history()` actually serves from.
        let warm = svc.history(&room.id, None).await;
        assert_eq!(warm.len(), 1);
        svc.send(&room.id, "u1", "alice", "second").await.unwrap();
        let after = svc.history(&room.id, None).await;
        assert_eq!(after.len(), 2);
        assert_eq!(after[1].content, "second");
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn plain_system_message_is_not_persisted() {
        let (svc, store, path) = service();
        let room = store.create_room("lobby", "u1").unwrap().unwrap();
        svc.system_broadcast(&room.id, "alice joined", MessageKind::System).await;
        let history = store.history(&room.id, 10, None).unwrap();
        assert!(history.is_empty());
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn notification_is_persisted() {
        let (svc, store, path) = service();
        let room = store.create_room("lobby", "u1").unwrap().unwrap();
        svc.system_broadcast(&room.id, "scheduled downtime", MessageKind::Notification).await;
        let history = store.history(&room.id, 10, None).unwrap();
        assert_eq!(history.len(), 1);
        let _ = std::fs::remove_file(&path);
    }
}
