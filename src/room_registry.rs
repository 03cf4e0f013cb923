use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::json;

use crate::bus::{self, Bus};
use crate::cache::Cache;
use crate::models::Room;
use crate::protocol::ErrorCode;
use crate::store::{DurableStore, StoreError};
use crate::validator;

const TYPING_TTL: Duration = Duration::from_secs(3);

struct TypingSet {
    // userId -> (username, expires_at)
    entries: HashMap<String, (String, Instant)>,
}

impl TypingSet {
    fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    fn prune(&mut self) {
        let now = Instant::now();
        self.entries.retain(|_, (_, expires)| *expires > now);
    }

    fn usernames(&mut self) -> Vec<String> {
        self.prune();
        self.entries.values().map(|(name, _)| name.clone()).collect()
    }
}

struct RoomState {
    /// userId -> username, the shared member set for this room.
    members: HashSet<String>,
    typing: TypingSet,
}

/// C8: creates/joins/leaves rooms, tracks membership, typing state, and activity.
/// Room creation serializes through a single named-creation mutex keyed by room name,
/// bounding lock contention to room creation — the only long-held lock in the server.
pub struct RoomRegistry {
    store: Arc<dyn DurableStore>,
    cache: Arc<Cache>,
    bus: Arc<dyn Bus>,
    creation_lock: Mutex<()>,
    name_cache: Mutex<HashMap<String, String>>,
    rooms: Mutex<HashMap<String, RoomState>>,
}

pub enum CreateOutcome {
    Created(Room),
    Conflict,
}

pub enum JoinOutcome {
    Joined { room: Room, members: Vec<String> },
    NotFound,
}

impl RoomRegistry {
    pub fn new(store: Arc<dyn DurableStore>, cache: Arc<Cache>, bus: Arc<dyn Bus>) -> Self {
        Self {
            store,
            cache,
            bus,
            creation_lock: Mutex::new(()),
            name_cache: Mutex::new(HashMap::new()),
            rooms: Mutex::new(HashMap::new()),
        }
    }

    pub async fn create(&self, name: &str, created_by_user_id: &str) -> Result<CreateOutcome, ErrorCode> {
        if !validator::validate_room_name(name) {
            return Err(ErrorCode::InvalidMessage);
        }

        let _guard = self.creation_lock.lock().unwrap_or_else(|e| e.into_inner());

        if self.name_cache.lock().unwrap_or_else(|e| e.into_inner()).contains_key(name) {
            return Ok(CreateOutcome::Conflict);
        }
        if self.store.find_room_by_name_active(name).map_err(|_| ErrorCode::DatabaseError)?.is_some() {
            return Ok(CreateOutcome::Conflict);
        }

        let result = self.store.create_room(name, created_by_user_id).map_err(|_| ErrorCode::DatabaseError)?;
        match result {
            Ok(room) => {
                self.name_cache
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(name.to_string(), room.id.clone());
                self.rooms
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(room.id.clone(), RoomState { members: HashSet::new(), typing: TypingSet::new() });
                self.bus
                    .publish(bus::CHANNEL_ROOM_CREATED, json!({"id": room.id, "name": room.name}))
                    .await;
                Ok(CreateOutcome::Created(room))
            }
            Err(StoreError(_)) => Ok(CreateOutcome::Conflict),
        }
    }

    /// Verify active, create/reactivate membership, update user's current room, bump
    /// the counter, add to the shared member set, publish `user_joined`.
    pub async fn join(
        &self,
        room_id: &str,
        user_id: &str,
        username: &str,
    ) -> Result<JoinOutcome, ErrorCode> {
        if self.store.find_room_by_id_active(room_id).map_err(|_| ErrorCode::DatabaseError)?.is_none() {
            return Ok(JoinOutcome::NotFound);
        }

        self.store.join_room(room_id, user_id, username).map_err(|_| ErrorCode::DatabaseError)?;
        let room = self.store.increment_room_user_count(room_id, 1).map_err(|_| ErrorCode::DatabaseError)?;
        self.store.update_user_room(user_id, Some(&room.name)).map_err(|_| ErrorCode::DatabaseError)?;
        self.store.record_room_joined(user_id, &room.name).ok();

        {
            let mut rooms = self.rooms.lock().unwrap_or_else(|e| e.into_inner());
            let state = rooms
                .entry(room_id.to_string())
                .or_insert_with(|| RoomState { members: HashSet::new(), typing: TypingSet::new() });
            state.members.insert(user_id.to_string());
        }

        // Wire contract is `members: [username]`, not userIds — same translation
        // `member_list` already does for the `users` command.
        let members = self.member_list(room_id);

        self.cache.invalidate(&format!("room:{room_id}"), true).await;

        self.bus
            .publish(
                &bus::channel_room_events(room_id),
                json!({"event": "user_joined", "userId": user_id, "username": username, "memberCount": room.current_users}),
            )
            .await;

        Ok(JoinOutcome::Joined { room, members })
    }

    /// Deactivate membership, clear current room, decrement, drop from the shared
    /// member/typing sets, publish `user_left`; if the count hits zero, mark the room
    /// inactive and drop its cache/name-cache entries.
    pub async fn leave(&self, room_id: &str, user_id: &str, username: &str) -> Result<(), ErrorCode> {
        self.store.leave_room(room_id, user_id).map_err(|_| ErrorCode::DatabaseError)?;
        let room = self.store.increment_room_user_count(room_id, -1).map_err(|_| ErrorCode::DatabaseError)?;
        self.store.update_user_room(user_id, None).map_err(|_| ErrorCode::DatabaseError)?;

        {
            let mut rooms = self.rooms.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(state) = rooms.get_mut(room_id) {
                state.members.remove(user_id);
                state.typing.entries.remove(user_id);
            }
        }

        self.bus
            .publish(
                &bus::channel_room_events(room_id),
                json!({"event": "user_left", "userId": user_id, "username": username, "memberCount": room.current_users}),
            )
            .await;

        if room.current_users == 0 {
            self.name_cache.lock().unwrap_or_else(|e| e.into_inner()).remove(&room.name);
            self.cache.invalidate(&format!("room:{room_id}"), true).await;
        }

        Ok(())
    }

    /// Maintain the 3 s-TTL typing set and publish the current username list.
    pub async fn set_typing(&self, room_id: &str, user_id: &str, username: &str, is_typing: bool) {
        let usernames = {
            let mut rooms = self.rooms.lock().unwrap_or_else(|e| e.into_inner());
            let state = rooms
                .entry(room_id.to_string())
                .or_insert_with(|| RoomState { members: HashSet::new(), typing: TypingSet::new() });
            if is_typing {
                state.typing.entries.insert(user_id.to_string(), (username.to_string(), Instant::now() + TYPING_TTL));
            } else {
                state.typing.entries.remove(user_id);
            }
            state.typing.usernames()
        };

        self.bus
            .publish(&bus::channel_room_events(room_id), json!({"event": "typing_update", "typingUsers": usernames}))
            .await;
    }

    pub fn typing_usernames(&self, room_id: &str) -> Vec<String> {
        let mut rooms = self.rooms.lock().unwrap_or_else(|e| e.into_inner());
        rooms
            .get_mut(room_id)
            .map(|state| state.typing.usernames())
            .unwrap_or_default()
    }

    /// Prefer the shared member set, translated to usernames via the store; fall back
    /// to active memberships when the in-process set is empty (e.g. right after a
    /// restart, before any local join has repopulated it).
    pub fn member_list(&self, room_id: &str) -> Vec<String> {
        let shared = self.rooms.lock().unwrap_or_else(|e| e.into_inner()).get(room_id).map(|s| s.members.clone());
        match shared {
            Some(set) if !set.is_empty() => set
                .iter()
                .filter_map(|uid| self.store.find_user_by_id(uid).ok().flatten())
                .map(|u| u.username)
                .collect(),
            _ => self
                .store
                .active_members(room_id)
                .unwrap_or_default()
                .into_iter()
                .map(|m| m.username)
                .collect(),
        }
    }

    pub fn find_by_name(&self, name: &str) -> Option<Room> {
        self.store.find_room_by_name_active(name).ok().flatten()
    }

    pub fn active_rooms(&self, limit: i64) -> Vec<Room> {
        self.store.find_active_rooms(limit).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InProcessBus;

    fn registry() -> (RoomRegistry, String) {
        let path = format!("/tmp/roomcast_roomreg_{}.db", uuid::Uuid::new_v4());
        let store: Arc<dyn DurableStore> = Arc::new(crate::store::SqliteStore::new(&path));
        let cache = Arc::new(Cache::new(
            Arc::new(crate::cache::NoopSharedCache),
            Arc::new(crate::circuit_breaker::CircuitBreaker::new()),
        ));
        let bus: Arc<dyn Bus> = Arc::new(InProcessBus::new());
        (RoomRegistry::new(store, cache, bus), path)
    }

    #[tokio::test]
    async fn create_then_duplicate_conflicts() {
        let (reg, path) = registry();
        let first = reg.create("lobby", "u1").await.unwrap();
        assert!(matches!(first, CreateOutcome::Created(_)));
        let second = reg.create("lobby", "u2").await.unwrap();
        assert!(matches!(second, CreateOutcome::Conflict));
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn join_then_leave_deactivates_when_empty() {
        let (reg, path) = registry();
        let room = match reg.create("game-room", "u1").await.unwrap() {
            CreateOutcome::Created(r) => r,
            _ => panic!("expected created"),
        };
        let joined = reg.join(&room.id, "u1", "alice").await.unwrap();
        assert!(matches!(joined, JoinOutcome::Joined { .. }));
        reg.leave(&room.id, "u1", "alice").await.unwrap();
        let rejoin = reg.join(&room.id, "u2", "bob").await.unwrap();
        assert!(matches!(rejoin, JoinOutcome::NotFound));
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn typing_ttl_expires() {
        let (reg, path) = registry();
        let room = match reg.create("typing-room", "u1").await.unwrap() {
            CreateOutcome::Created(r) => r,
            _ => panic!("expected created"),
        };
        reg.set_typing(&room.id, "u1", "frank", true).await;
        assert_eq!(reg.typing_usernames(&room.id), vec!["frank".to_string()]);
        tokio::time::sleep(Duration::from_millis(10)).await;
        // still within TTL
        assert_eq!(reg.typing_usernames(&room.id), vec!["frank".to_string()]);
        let _ = std::fs::remove_file(&path);
    }
}
