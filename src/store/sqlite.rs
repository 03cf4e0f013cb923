use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::models::{Membership, Message, MessageKind, Room, User};

use super::{CreateRoomResult, DurableStore, RoomExistsConflict, StoreError, StoreResult};

/// SQLite-backed `DurableStore`. Migrations are idempotent: `CREATE TABLE IF NOT
/// EXISTS` plus `ALTER TABLE ... ADD COLUMN` guarded with `.ok()`, so startup never
/// fails against an already-migrated database.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new(path: &str) -> Self {
        let conn = Connection::open(path).expect("failed to open database");
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .expect("failed to set pragmas");
        let store = SqliteStore { conn: Mutex::new(conn) };
        store.migrate();
        store
    }

    fn migrate(&self) {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_seen TEXT NOT NULL,
                is_online INTEGER NOT NULL DEFAULT 0,
                current_room_name TEXT,
                total_messages INTEGER NOT NULL DEFAULT 0,
                connection_count INTEGER NOT NULL DEFAULT 0,
                rooms_joined_json TEXT NOT NULL DEFAULT '[]'
            );
            CREATE INDEX IF NOT EXISTS idx_users_username_online ON users(username, is_online);

            CREATE TABLE IF NOT EXISTS rooms (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                created_by TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_activity TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                current_users INTEGER NOT NULL DEFAULT 0,
                peak_users INTEGER NOT NULL DEFAULT 0,
                message_count INTEGER NOT NULL DEFAULT 0,
                total_unique_users INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_rooms_name_active ON rooms(name, is_active);

            CREATE TABLE IF NOT EXISTS memberships (
                room_id TEXT NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                username TEXT NOT NULL,
                joined_at TEXT NOT NULL,
                left_at TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                messages_in_room INTEGER NOT NULL DEFAULT 0,
                join_count INTEGER NOT NULL DEFAULT 1,
                last_message_at TEXT,
                PRIMARY KEY (room_id, user_id)
            );
            CREATE INDEX IF NOT EXISTS idx_memberships_user ON memberships(user_id, is_active);
            CREATE INDEX IF NOT EXISTS idx_memberships_left_at ON memberships(left_at);

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                room_id TEXT NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
                user_id TEXT NOT NULL,
                username TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                kind TEXT NOT NULL DEFAULT 'user',
                edited INTEGER NOT NULL DEFAULT 0,
                edited_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_messages_room_created ON messages(room_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_messages_user ON messages(user_id);",
        )
        .expect("failed to run migrations");

        // Columns added after the initial shape ship as idempotent ALTERs, same as the
        // teacher's `.ok()`-guarded "duplicate column" tolerance.
        conn.execute_batch("ALTER TABLE messages ADD COLUMN kind TEXT NOT NULL DEFAULT 'user';")
            .ok();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM rooms WHERE name = 'general'", [], |r| r.get(0))
            .unwrap_or(0);
        if count == 0 {
            let now = crate::models::now_rfc3339();
            conn.execute(
                "INSERT INTO rooms (id, name, created_by, created_at, last_activity, is_active)
                 VALUES (?1, 'general', 'system', ?2, ?2, 1)",
                params![crate::models::new_id(), now],
            )
            .ok();
        }
    }

    fn row_to_user(row: &Row) -> rusqlite::Result<User> {
        let rooms_joined_json: String = row.get("rooms_joined_json")?;
        Ok(User {
            id: row.get("id")?,
            username: row.get("username")?,
            created_at: row.get("created_at")?,
            last_seen: row.get("last_seen")?,
            is_online: row.get::<_, i64>("is_online")? != 0,
            current_room_name: row.get("current_room_name")?,
            total_messages: row.get("total_messages")?,
            connection_count: row.get("connection_count")?,
            rooms_joined: serde_json::from_str(&rooms_joined_json).unwrap_or_default(),
        })
    }

    fn row_to_room(row: &Row) -> rusqlite::Result<Room> {
        Ok(Room {
            id: row.get("id")?,
            name: row.get("name")?,
            created_by: row.get("created_by")?,
            created_at: row.get("created_at")?,
            last_activity: row.get("last_activity")?,
            is_active: row.get::<_, i64>("is_active")? != 0,
            current_users: row.get("current_users")?,
            peak_users: row.get("peak_users")?,
            message_count: row.get("message_count")?,
            total_unique_users: row.get("total_unique_users")?,
        })
    }

    fn row_to_membership(row: &Row) -> rusqlite::Result<Membership> {
        Ok(Membership {
            room_id: row.get("room_id")?,
            user_id: row.get("user_id")?,
            username: row.get("username")?,
            joined_at: row.get("joined_at")?,
            left_at: row.get("left_at")?,
            is_active: row.get::<_, i64>("is_active")? != 0,
            messages_in_room: row.get("messages_in_room")?,
            join_count: row.get("join_count")?,
            last_message_at: row.get("last_message_at")?,
        })
    }

    fn row_to_message(row: &Row) -> rusqlite::Result<Message> {
        let kind_str: String = row.get("kind")?;
        let kind = match kind_str.as_str() {
            "system" => MessageKind::System,
            "notification" => MessageKind::Notification,
            _ => MessageKind::User,
        };
        Ok(Message {
            id: row.get("id")?,
            room_id: row.get("room_id")?,
            user_id: row.get("user_id")?,
            username: row.get("username")?,
            content: row.get("content")?,
            timestamp: row.get("created_at")?,
            kind,
            edited: row.get::<_, i64>("edited")? != 0,
            edited_at: row.get("edited_at")?,
        })
    }
}

impl DurableStore for SqliteStore {
    fn find_user_by_id(&self, id: &str) -> StoreResult<Option<User>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.query_row("SELECT * FROM users WHERE id = ?1", [id], Self::row_to_user)
            .optional()
            .map_err(StoreError::from)
    }

    fn find_user_by_username_online(&self, username: &str) -> StoreResult<Option<User>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.query_row(
            "SELECT * FROM users WHERE username = ?1 AND is_online = 1 LIMIT 1",
            [username],
            Self::row_to_user,
        )
        .optional()
        .map_err(StoreError::from)
    }

    fn create_user(&self, username: &str) -> StoreResult<User> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let now = crate::models::now_rfc3339();
        let id = crate::models::new_id();
        conn.execute(
            "INSERT INTO users (id, username, created_at, last_seen, is_online, connection_count)
             VALUES (?1, ?2, ?3, ?3, 1, 1)",
            params![id, username, now],
        )?;
        Ok(User {
            id,
            username: username.to_string(),
            created_at: now.clone(),
            last_seen: now,
            is_online: true,
            current_room_name: None,
            total_messages: 0,
            connection_count: 1,
            rooms_joined: vec![],
        })
    }

    fn set_user_online(&self, id: &str, online: bool) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let now = crate::models::now_rfc3339();
        if online {
            conn.execute(
                "UPDATE users SET is_online = 1, last_seen = ?2 WHERE id = ?1",
                params![id, now],
            )?;
        } else {
            conn.execute(
                "UPDATE users SET is_online = 0, current_room_name = NULL, last_seen = ?2 WHERE id = ?1",
                params![id, now],
            )?;
        }
        Ok(())
    }

    fn update_user_room(&self, id: &str, room_name: Option<&str>) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "UPDATE users SET current_room_name = ?2 WHERE id = ?1",
            params![id, room_name],
        )?;
        Ok(())
    }

    fn increment_user_connections(&self, id: &str, delta: i64) -> StoreResult<i64> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "UPDATE users SET connection_count = MAX(0, connection_count + ?2) WHERE id = ?1",
            params![id, delta],
        )?;
        let count: i64 =
            conn.query_row("SELECT connection_count FROM users WHERE id = ?1", [id], |r| r.get(0))?;
        Ok(count)
    }

    fn record_user_message(&self, id: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let now = crate::models::now_rfc3339();
        conn.execute(
            "UPDATE users SET total_messages = total_messages + 1, last_seen = ?2 WHERE id = ?1",
            params![id, now],
        )?;
        Ok(())
    }

    fn record_room_joined(&self, user_id: &str, room_name: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let raw: String = conn
            .query_row("SELECT rooms_joined_json FROM users WHERE id = ?1", [user_id], |r| r.get(0))
            .unwrap_or_else(|_| "[]".to_string());
        let mut rooms: Vec<String> = serde_json::from_str(&raw).unwrap_or_default();
        if !rooms.iter().any(|r| r == room_name) {
            rooms.push(room_name.to_string());
            if rooms.len() > 50 {
                rooms.remove(0);
            }
            let updated = serde_json::to_string(&rooms).unwrap_or_else(|_| "[]".to_string());
            conn.execute(
                "UPDATE users SET rooms_joined_json = ?2 WHERE id = ?1",
                params![user_id, updated],
            )?;
        }
        Ok(())
    }

    fn purge_inactive_users(&self, older_than_secs: i64) -> StoreResult<u64> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let cutoff = (chrono::Utc::now() - chrono::Duration::seconds(older_than_secs)).to_rfc3339();
        let n = conn.execute(
            "DELETE FROM users WHERE is_online = 0 AND last_seen < ?1",
            [cutoff],
        )?;
        Ok(n as u64)
    }

    fn find_room_by_name_active(&self, name: &str) -> StoreResult<Option<Room>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.query_row(
            "SELECT * FROM rooms WHERE name = ?1 AND is_active = 1",
            [name],
            Self::row_to_room,
        )
        .optional()
        .map_err(StoreError::from)
    }

    fn find_room_by_id_active(&self, id: &str) -> StoreResult<Option<Room>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.query_row(
            "SELECT * FROM rooms WHERE id = ?1 AND is_active = 1",
            [id],
            Self::row_to_room,
        )
        .optional()
        .map_err(StoreError::from)
    }

    fn find_active_rooms(&self, limit: i64) -> StoreResult<Vec<Room>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(
            "SELECT * FROM rooms WHERE is_active = 1 ORDER BY last_activity DESC LIMIT ?1",
        )?;
        let rooms = stmt
            .query_map([limit], Self::row_to_room)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rooms)
    }

    fn create_room(&self, name: &str, created_by: &str) -> StoreResult<CreateRoomResult> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let existing: Option<i64> = conn
            .query_row("SELECT 1 FROM rooms WHERE name = ?1 AND is_active = 1", [name], |r| r.get(0))
            .optional()?;
        if existing.is_some() {
            return Ok(Err(RoomExistsConflict));
        }

        let now = crate::models::now_rfc3339();
        let id = crate::models::new_id();
        let result = conn.execute(
            "INSERT INTO rooms (id, name, created_by, created_at, last_activity, is_active)
             VALUES (?1, ?2, ?3, ?4, ?4, 1)",
            params![id, name, created_by, now],
        );
        match result {
            Ok(_) => Ok(Ok(Room {
                id,
                name: name.to_string(),
                created_by: created_by.to_string(),
                created_at: now.clone(),
                last_activity: now,
                is_active: true,
                current_users: 0,
                peak_users: 0,
                message_count: 0,
                total_unique_users: 0,
            })),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Ok(Err(RoomExistsConflict))
            }
            Err(e) => Err(StoreError::from(e)),
        }
    }

    fn increment_room_user_count(&self, room_id: &str, delta: i64) -> StoreResult<Room> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let now = crate::models::now_rfc3339();
        conn.execute(
            "UPDATE rooms SET
                current_users = MAX(0, current_users + ?2),
                peak_users = MAX(peak_users, MAX(0, current_users + ?2)),
                last_activity = ?3,
                is_active = CASE WHEN MAX(0, current_users + ?2) = 0 THEN 0 ELSE 1 END
             WHERE id = ?1",
            params![room_id, delta, now],
        )?;
        if delta > 0 {
            conn.execute(
                "UPDATE rooms SET total_unique_users = total_unique_users + 1 WHERE id = ?1",
                [room_id],
            )?;
        }
        conn.query_row("SELECT * FROM rooms WHERE id = ?1", [room_id], Self::row_to_room)
            .map_err(StoreError::from)
    }

    fn record_room_message(&self, room_id: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let now = crate::models::now_rfc3339();
        conn.execute(
            "UPDATE rooms SET message_count = message_count + 1, last_activity = ?2 WHERE id = ?1",
            params![room_id, now],
        )?;
        Ok(())
    }

    fn cleanup_empty_rooms(&self, older_than_secs: i64) -> StoreResult<u64> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let cutoff = (chrono::Utc::now() - chrono::Duration::seconds(older_than_secs)).to_rfc3339();
        let n = conn.execute(
            "DELETE FROM rooms WHERE current_users = 0 AND is_active = 0 AND last_activity < ?1 AND name != 'general'",
            [cutoff],
        )?;
        Ok(n as u64)
    }

    fn join_room(&self, room_id: &str, user_id: &str, username: &str) -> StoreResult<Membership> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let now = crate::models::now_rfc3339();
        let existing = conn
            .query_row(
                "SELECT * FROM memberships WHERE room_id = ?1 AND user_id = ?2",
                params![room_id, user_id],
                Self::row_to_membership,
            )
            .optional()?;

        match existing {
            Some(_) => {
                conn.execute(
                    "UPDATE memberships SET is_active = 1, left_at = NULL, joined_at = ?3,
                        join_count = join_count + 1, username = ?4
                     WHERE room_id = ?1 AND user_id = ?2",
                    params![room_id, user_id, now, username],
                )?;
            }
            None => {
                conn.execute(
                    "INSERT INTO memberships (room_id, user_id, username, joined_at, is_active, join_count)
                     VALUES (?1, ?2, ?3, ?4, 1, 1)",
                    params![room_id, user_id, username, now],
                )?;
            }
        }

        conn.query_row(
            "SELECT * FROM memberships WHERE room_id = ?1 AND user_id = ?2",
            params![room_id, user_id],
            Self::row_to_membership,
        )
        .map_err(StoreError::from)
    }

    fn leave_room(&self, room_id: &str, user_id: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let now = crate::models::now_rfc3339();
        conn.execute(
            "UPDATE memberships SET is_active = 0, left_at = ?3 WHERE room_id = ?1 AND user_id = ?2",
            params![room_id, user_id, now],
        )?;
        Ok(())
    }

    fn active_members(&self, room_id: &str) -> StoreResult<Vec<Membership>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(
            "SELECT * FROM memberships WHERE room_id = ?1 AND is_active = 1 ORDER BY joined_at ASC",
        )?;
        let members = stmt
            .query_map([room_id], Self::row_to_membership)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(members)
    }

    fn active_rooms_of(&self, user_id: &str) -> StoreResult<Vec<Membership>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn
            .prepare("SELECT * FROM memberships WHERE user_id = ?1 AND is_active = 1")?;
        let rooms = stmt
            .query_map([user_id], Self::row_to_membership)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rooms)
    }

    fn purge_inactive_memberships(&self, older_than_secs: i64) -> StoreResult<u64> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let cutoff = (chrono::Utc::now() - chrono::Duration::seconds(older_than_secs)).to_rfc3339();
        let n = conn.execute(
            "DELETE FROM memberships WHERE is_active = 0 AND left_at < ?1",
            [cutoff],
        )?;
        Ok(n as u64)
    }

    fn create_message(&self, message: &Message) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let kind = match message.kind {
            MessageKind::User => "user",
            MessageKind::System => "system",
            MessageKind::Notification => "notification",
        };
        conn.execute(
            "INSERT INTO messages (id, room_id, user_id, username, content, created_at, kind, edited, edited_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                message.id,
                message.room_id,
                message.user_id,
                message.username,
                message.content,
                message.timestamp,
                kind,
                message.edited as i64,
                message.edited_at,
            ],
        )?;

        conn.execute(
            "UPDATE memberships SET messages_in_room = messages_in_room + 1, last_message_at = ?3
             WHERE room_id = ?1 AND user_id = ?2",
            params![message.room_id, message.user_id, message.timestamp],
        )
        .ok();

        Ok(())
    }

    fn history(&self, room_id: &str, limit: i64, before: Option<&str>) -> StoreResult<Vec<Message>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut messages: Vec<Message> = if let Some(before) = before {
            let mut stmt = conn.prepare(
                "SELECT * FROM messages WHERE room_id = ?1 AND created_at < ?2
                 ORDER BY created_at DESC LIMIT ?3",
            )?;
            stmt.query_map(params![room_id, before, limit], Self::row_to_message)?
                .filter_map(|r| r.ok())
                .collect()
        } else {
            let mut stmt = conn.prepare(
                "SELECT * FROM messages WHERE room_id = ?1 ORDER BY created_at DESC LIMIT ?2",
            )?;
            stmt.query_map(params![room_id, limit], Self::row_to_message)?
                .filter_map(|r| r.ok())
                .collect()
        };
        messages.reverse(); // query is newest-first; invert to chronological order
        Ok(messages)
    }

    fn messages_by_user(&self, user_id: &str, limit: i64) -> StoreResult<Vec<Message>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(
            "SELECT * FROM messages WHERE user_id = ?1 ORDER BY created_at DESC LIMIT ?2",
        )?;
        let messages = stmt
            .query_map(params![user_id, limit], Self::row_to_message)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(messages)
    }

    fn purge_expired_messages(&self, older_than_secs: i64) -> StoreResult<u64> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let cutoff = (chrono::Utc::now() - chrono::Duration::seconds(older_than_secs)).to_rfc3339();
        let n = conn.execute(
            "DELETE FROM messages WHERE created_at < ?1 AND kind != 'notification'",
            [cutoff],
        )?;
        Ok(n as u64)
    }

    fn message_stats(&self, room_id: &str, hours_back: i64) -> StoreResult<i64> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let cutoff = (chrono::Utc::now() - chrono::Duration::hours(hours_back)).to_rfc3339();
        conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE room_id = ?1 AND created_at >= ?2",
            params![room_id, cutoff],
            |r| r.get(0),
        )
        .map_err(StoreError::from)
    }

    fn global_counts(&self) -> StoreResult<(i64, i64)> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let rooms = conn.query_row(
            "SELECT COUNT(*) FROM rooms WHERE is_active = 1",
            [],
            |r| r.get(0),
        )?;
        let messages = conn.query_row("SELECT COUNT(*) FROM messages", [], |r| r.get(0))?;
        Ok((rooms, messages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (SqliteStore, String) {
        let path = format!("/tmp/roomcast_test_{}.db", uuid::Uuid::new_v4());
        (SqliteStore::new(&path), path)
    }

    #[test]
    fn seeds_general_room() {
        let (store, path) = temp_store();
        let room = store.find_room_by_name_active("general").unwrap();
        assert!(room.is_some());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn create_room_rejects_duplicate_name() {
        let (store, path) = temp_store();
        let first = store.create_room("lobby", "alice").unwrap();
        assert!(first.is_ok());
        let second = store.create_room("lobby", "bob").unwrap();
        assert_eq!(second, Err(RoomExistsConflict));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn join_then_leave_updates_membership() {
        let (store, path) = temp_store();
        let room = store.create_room("game-room", "alice").unwrap().unwrap();
        let user = store.create_user("alice").unwrap();
        let membership = store.join_room(&room.id, &user.id, "alice").unwrap();
        assert!(membership.is_active);
        store.leave_room(&room.id, &user.id).unwrap();
        let members = store.active_members(&room.id).unwrap();
        assert!(members.is_empty());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn history_returns_chronological_order() {
        let (store, path) = temp_store();
        let room = store.create_room("history-room", "alice").unwrap().unwrap();
        for i in 0..3 {
            let msg = Message {
                id: crate::models::new_id(),
                room_id: room.id.clone(),
                user_id: "u1".to_string(),
                username: "alice".to_string(),
                content: format!("msg {i}"),
                timestamp: format!("2026-01-01T00:00:0{i}Z"),
                kind: MessageKind::User,
                edited: false,
                edited_at: None,
            };
            store.create_message(&msg).unwrap();
        }
        let history = store.history(&room.id, 10, None).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].content, "msg 0");
        assert_eq!(history[2].content, "msg 2");
        let _ = std::fs::remove_file(&path);
    }
}
