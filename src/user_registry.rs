use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::cache::Cache;
use crate::models::User;
use crate::protocol::ErrorCode;
use crate::store::DurableStore;
use crate::validator;

pub enum AuthOutcome {
    Ok { user: User, is_new: bool },
    Invalid,
}

struct Maps {
    connection_to_user: HashMap<String, String>,
    user_to_connections: HashMap<String, HashSet<String>>,
}

/// C7: authenticates usernames, tracks online state and the connection↔user mapping.
/// Owns no socket state itself — that belongs to `ConnectionHub` (C10).
pub struct UserRegistry {
    store: Arc<dyn DurableStore>,
    cache: Arc<Cache>,
    maps: Mutex<Maps>,
}

impl UserRegistry {
    pub fn new(store: Arc<dyn DurableStore>, cache: Arc<Cache>) -> Self {
        Self {
            store,
            cache,
            maps: Mutex::new(Maps {
                connection_to_user: HashMap::new(),
                user_to_connections: HashMap::new(),
            }),
        }
    }

    /// Validate, then either attach this connection to an existing online user of the
    /// same username (reconnection / multi-device — never returns `USER_EXISTS` for
    /// this, see DESIGN.md) or allocate a new user.
    pub fn authenticate(&self, username: &str, connection_id: &str) -> Result<AuthOutcome, ErrorCode> {
        if !validator::validate_username(username) {
            return Ok(AuthOutcome::Invalid);
        }

        let existing = self
            .store
            .find_user_by_username_online(username)
            .map_err(|_| ErrorCode::DatabaseError)?;

        let (user, is_new) = match existing {
            Some(user) => {
                self.store
                    .increment_user_connections(&user.id, 1)
                    .map_err(|_| ErrorCode::DatabaseError)?;
                (user, false)
            }
            None => {
                let user = self.store.create_user(username).map_err(|_| ErrorCode::DatabaseError)?;
                (user, true)
            }
        };

        {
            let mut maps = self.maps.lock().unwrap_or_else(|e| e.into_inner());
            maps.connection_to_user.insert(connection_id.to_string(), user.id.clone());
            maps.user_to_connections.entry(user.id.clone()).or_default().insert(connection_id.to_string());
        }

        self.cache.invalidate_pattern(&format!("user:{}", user.id));

        Ok(AuthOutcome::Ok { user, is_new })
    }

    /// Detach this connection; if it was the user's last one, mark them offline.
    /// Leaving active rooms is the caller's job (delegated to `RoomRegistry`), since C7
    /// doesn't know about room membership.
    pub fn disconnect(&self, connection_id: &str) -> Option<String> {
        let mut maps = self.maps.lock().unwrap_or_else(|e| e.into_inner());
        let user_id = maps.connection_to_user.remove(connection_id)?;
        let now_empty = if let Some(conns) = maps.user_to_connections.get_mut(&user_id) {
            conns.remove(connection_id);
            conns.is_empty()
        } else {
            true
        };
        if now_empty {
            maps.user_to_connections.remove(&user_id);
        }
        drop(maps);

        let _ = self.store.increment_user_connections(&user_id, -1);
        if now_empty {
            let _ = self.store.set_user_online(&user_id, false);
            self.cache.invalidate_pattern(&format!("user:{user_id}"));
            Some(user_id)
        } else {
            None
        }
    }

    pub fn user_for_connection(&self, connection_id: &str) -> Option<String> {
        self.maps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .connection_to_user
            .get(connection_id)
            .cloned()
    }

    pub fn online_users(&self) -> Vec<String> {
        self.maps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .user_to_connections
            .keys()
            .cloned()
            .collect()
    }

    pub fn user_info(&self, id: &str) -> Option<User> {
        self.store.find_user_by_id(id).ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::NoopSharedCache;
    use crate::circuit_breaker::CircuitBreaker;
    use crate::store::SqliteStore;

    fn registry() -> (UserRegistry, String) {
        let path = format!("/tmp/roomcast_userreg_{}.db", uuid::Uuid::new_v4());
        let store: Arc<dyn DurableStore> = Arc::new(SqliteStore::new(&path));
        let cache = Arc::new(Cache::new(Arc::new(NoopSharedCache), Arc::new(CircuitBreaker::new())));
        (UserRegistry::new(store, cache), path)
    }

    #[test]
    fn rejects_invalid_username() {
        let (reg, path) = registry();
        let outcome = reg.authenticate("a", "conn-1").unwrap();
        assert!(matches!(outcome, AuthOutcome::Invalid));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn second_connection_reuses_user_id() {
        let (reg, path) = registry();
        let first = match reg.authenticate("alice", "conn-1").unwrap() {
            AuthOutcome::Ok { user, is_new } => {
                assert!(is_new);
                user
            }
            _ => panic!("expected ok"),
        };
        let second = match reg.authenticate("alice", "conn-2").unwrap() {
            AuthOutcome::Ok { user, is_new } => {
                assert!(!is_new);
                user
            }
            _ => panic!("expected ok"),
        };
        assert_eq!(first.id, second.id);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn disconnect_marks_offline_only_when_last_connection() {
        let (reg, path) = registry();
        reg.authenticate("bob", "conn-1").unwrap();
        reg.authenticate("bob", "conn-2").unwrap();
        assert!(reg.disconnect("conn-1").is_none());
        assert!(reg.disconnect("conn-2").is_some());
        let _ = std::fs::remove_file(&path);
    }
}
