// Cross-component tests: authentication (C7), room membership (C8), and message
// delivery (C9) working together through the shared bus, the way a live connection
// would drive them rather than each module in isolation.

use std::sync::Arc;

use roomcast::bus::{Bus, InProcessBus};
use roomcast::cache::{Cache, NoopSharedCache};
use roomcast::circuit_breaker::CircuitBreaker;
use roomcast::message_service::MessageService;
use roomcast::room_registry::{CreateOutcome, JoinOutcome, RoomRegistry};
use roomcast::store::{DurableStore, SqliteStore};
use roomcast::user_registry::{AuthOutcome, UserRegistry};

struct Harness {
    users: UserRegistry,
    rooms: RoomRegistry,
    messages: MessageService,
    db_path: String,
}

fn harness() -> Harness {
    let db_path = format!("/tmp/roomcast_pipeline_{}.db", uuid::Uuid::new_v4());
    let store: Arc<dyn DurableStore> = Arc::new(SqliteStore::new(&db_path));
    let breaker = Arc::new(CircuitBreaker::new());
    let cache = Arc::new(Cache::new(Arc::new(NoopSharedCache), breaker));
    let bus: Arc<dyn Bus> = Arc::new(InProcessBus::new());

    Harness {
        users: UserRegistry::new(store.clone(), cache.clone()),
        rooms: RoomRegistry::new(store.clone(), cache.clone(), bus.clone()),
        messages: MessageService::new(store, cache, bus),
        db_path,
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.db_path);
    }
}

#[tokio::test]
async fn two_users_join_and_exchange_a_message() {
    let h = harness();

    let alice = match h.users.authenticate("alice", "conn-a").unwrap() {
        AuthOutcome::Ok { user, .. } => user,
        _ => panic!("expected alice to authenticate"),
    };
    let bob = match h.users.authenticate("bob", "conn-b").unwrap() {
        AuthOutcome::Ok { user, .. } => user,
        _ => panic!("expected bob to authenticate"),
    };

    let room = match h.rooms.create("watercooler", &alice.id).await.unwrap() {
        CreateOutcome::Created(room) => room,
        CreateOutcome::Conflict => panic!("expected a fresh room"),
    };

    let alice_join = h.rooms.join(&room.id, &alice.id, &alice.username).await.unwrap();
    assert!(matches!(alice_join, JoinOutcome::Joined { .. }));
    let bob_join = h.rooms.join(&room.id, &bob.id, &bob.username).await.unwrap();
    let members = match bob_join {
        JoinOutcome::Joined { members, .. } => members,
        JoinOutcome::NotFound => panic!("room should exist"),
    };
    assert_eq!(members.len(), 2);

    let sent = h
        .messages
        .send_from_connection(&room.id, &bob.id, &bob.username, "hi alice", "conn-b")
        .await
        .unwrap();
    assert_eq!(sent.content, "hi alice");

    let history = h.messages.history(&room.id, None).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].username, "bob");
}

#[tokio::test]
async fn leaving_the_only_room_member_deactivates_it() {
    let h = harness();
    let carol = match h.users.authenticate("carol", "conn-c").unwrap() {
        AuthOutcome::Ok { user, .. } => user,
        _ => panic!("expected carol to authenticate"),
    };

    let room = match h.rooms.create("solo-room", &carol.id).await.unwrap() {
        CreateOutcome::Created(room) => room,
        CreateOutcome::Conflict => panic!("expected a fresh room"),
    };
    h.rooms.join(&room.id, &carol.id, &carol.username).await.unwrap();
    h.rooms.leave(&room.id, &carol.id, &carol.username).await.unwrap();

    assert!(h.rooms.find_by_name("solo-room").is_none());
}

#[tokio::test]
async fn reconnecting_with_the_same_username_reuses_the_user() {
    let h = harness();
    let first = match h.users.authenticate("dave", "conn-1").unwrap() {
        AuthOutcome::Ok { user, is_new } => {
            assert!(is_new);
            user
        }
        _ => panic!("expected ok"),
    };
    let second = match h.users.authenticate("dave", "conn-2").unwrap() {
        AuthOutcome::Ok { user, is_new } => {
            assert!(!is_new);
            user
        }
        _ => panic!("expected ok"),
    };
    assert_eq!(first.id, second.id);

    // disconnecting one of two live connections must not mark the user offline
    assert!(h.users.disconnect("conn-1").is_none());
    assert!(h.users.disconnect("conn-2").is_some());
}

#[tokio::test]
async fn empty_message_is_rejected_before_touching_the_store() {
    let h = harness();
    let eve = match h.users.authenticate("eve", "conn-e").unwrap() {
        AuthOutcome::Ok { user, .. } => user,
        _ => panic!("expected ok"),
    };
    let room = match h.rooms.create("quiet-room", &eve.id).await.unwrap() {
        CreateOutcome::Created(room) => room,
        CreateOutcome::Conflict => panic!("expected a fresh room"),
    };

    let result = h.messages.send(&room.id, &eve.id, &eve.username, "").await;
    assert!(result.is_err());
    assert!(h.messages.history(&room.id, None).await.is_empty());
}
