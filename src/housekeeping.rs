//! Background purge sweeps: offline users after 30 days, empty rooms after 1 h, left
//! memberships after 30 days, messages after 30 days. Split into a spawnable loop and a
//! directly-callable sweep so the same logic runs on a timer and on demand.

use std::sync::Arc;
use std::time::Duration;

use crate::store::DurableStore;

const SWEEP_INTERVAL: Duration = Duration::from_secs(300);
const STARTUP_DELAY: Duration = Duration::from_secs(30);

const USER_OFFLINE_TTL_SECS: i64 = 30 * 24 * 3600;
const ROOM_EMPTY_TTL_SECS: i64 = 3600;
const MEMBERSHIP_LEFT_TTL_SECS: i64 = 30 * 24 * 3600;
const MESSAGE_TTL_SECS: i64 = 30 * 24 * 3600;

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SweepResult {
    pub users_purged: u64,
    pub rooms_purged: u64,
    pub memberships_purged: u64,
    pub messages_purged: u64,
}

/// Spawns the periodic sweep loop. Not awaited by callers — runs for the life of the
/// process until the handle (held by the caller) is aborted during graceful shutdown.
pub fn spawn(store: Arc<dyn DurableStore>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(STARTUP_DELAY).await;
        loop {
            let result = run_sweep(store.as_ref());
            if result.users_purged + result.rooms_purged + result.memberships_purged + result.messages_purged > 0
            {
                println!(
                    "🧹 housekeeping: users={} rooms={} memberships={} messages={}",
                    result.users_purged, result.rooms_purged, result.memberships_purged, result.messages_purged
                );
            }
            tokio::time::sleep(SWEEP_INTERVAL).await;
        }
    })
}

/// Runs one sweep against `store` directly — used by the spawned loop and by tests.
pub fn run_sweep(store: &dyn DurableStore) -> SweepResult {
    let mut result = SweepResult::default();

    if let Ok(n) = store.purge_expired_messages(MESSAGE_TTL_SECS) {
        result.messages_purged = n;
    }
    if let Ok(n) = store.purge_inactive_memberships(MEMBERSHIP_LEFT_TTL_SECS) {
        result.memberships_purged = n;
    }
    if let Ok(n) = store.cleanup_empty_rooms(ROOM_EMPTY_TTL_SECS) {
        result.rooms_purged = n;
    }
    if let Ok(n) = store.purge_inactive_users(USER_OFFLINE_TTL_SECS) {
        result.users_purged = n;
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    #[test]
    fn sweep_runs_without_error_on_empty_store() {
        let path = format!("/tmp/roomcast_housekeeping_{}.db", uuid::Uuid::new_v4());
        let store = SqliteStore::new(&path);
        let result = run_sweep(&store);
        assert_eq!(result.users_purged, 0);
        let _ = std::fs::remove_file(&path);
    }
}
