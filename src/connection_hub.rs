use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use rocket_ws::Message as WsMessage;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::bus::{self, Bus};
use crate::message_service::MessageService;
use crate::models::{new_id, ConnectionInfo};
use crate::protocol::{ErrorCode, RoomListEntry, ServerFrame, UserSummary};
use crate::rate_limit::{RateLimitClass, RateLimiter};
use crate::room_registry::RoomRegistry;
use crate::user_registry::UserRegistry;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

struct ConnectionEntry {
    info: Mutex<ConnectionInfo>,
    outbound: mpsc::UnboundedSender<ServerFrame>,
    alive: Arc<AtomicBool>,
}

struct RoomSubscription {
    handle: JoinHandle<()>,
    local_members: usize,
}

/// C10: owns the socket fleet, per-connection state, dispatch, heartbeats, and
/// graceful drain. Transport is `rocket_ws`, full duplex over one socket split into a
/// reader half and a single-writer task per connection.
pub struct ConnectionHub {
    fleet: Mutex<HashMap<String, Arc<ConnectionEntry>>>,
    bus: Arc<dyn Bus>,
    rooms: Arc<RoomRegistry>,
    users: Arc<UserRegistry>,
    messages: Arc<MessageService>,
    rate_limiter: Arc<RateLimiter>,
    room_subscriptions: Mutex<HashMap<String, RoomSubscription>>,
    accepting: AtomicBool,
    global_forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionHub {
    pub fn new(
        bus: Arc<dyn Bus>,
        rooms: Arc<RoomRegistry>,
        users: Arc<UserRegistry>,
        messages: Arc<MessageService>,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            fleet: Mutex::new(HashMap::new()),
            bus,
            rooms,
            users,
            messages,
            rate_limiter,
            room_subscriptions: Mutex::new(HashMap::new()),
            accepting: AtomicBool::new(true),
            global_forwarder: Mutex::new(None),
        }
    }

    /// Subscribes to `global:broadcast` and fans every payload to the whole fleet,
    /// regardless of room — the one bus channel every connection holds for its entire
    /// lifetime, unlike room channels which are refcounted per local member. Idempotent:
    /// a second call is a no-op if the forwarder is already running.
    pub fn spawn_global_forwarder(self: &Arc<Self>) {
        let mut slot = self.global_forwarder.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return;
        }

        let hub = Arc::clone(self);
        let mut rx = self.bus.subscribe(bus::CHANNEL_GLOBAL_BROADCAST);
        let handle = tokio::spawn(async move {
            while let Ok(msg) = rx.recv().await {
                hub.handle_global_event(msg.payload);
            }
        });
        *slot = Some(handle);
    }

    fn handle_global_event(&self, payload: serde_json::Value) {
        let message = payload.get("message").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let frame = ServerFrame::Notification { message, timestamp: crate::models::now_rfc3339() };
        let fleet = self.fleet.lock().unwrap_or_else(|e| e.into_inner());
        for entry in fleet.values() {
            let _ = entry.outbound.send(frame.clone_for_fanout());
        }
    }

    pub fn rooms(&self) -> &Arc<RoomRegistry> {
        &self.rooms
    }

    pub fn users(&self) -> &Arc<UserRegistry> {
        &self.users
    }

    pub fn messages(&self) -> &Arc<MessageService> {
        &self.messages
    }

    pub fn connection_count(&self) -> usize {
        self.fleet.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }

    /// Entry point from the WebSocket route. Owns the connection end to end: accept,
    /// inbound loop, heartbeat, and cleanup on close.
    pub async fn handle_connection(
        self: &Arc<Self>,
        stream: rocket_ws::stream::DuplexStream,
        remote_addr: String,
    ) {
        if !self.accepting.load(Ordering::SeqCst) {
            return;
        }

        let connection_id = new_id();
        let (mut sink, mut source) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ServerFrame>();
        let alive = Arc::new(AtomicBool::new(true));

        let entry = Arc::new(ConnectionEntry {
            info: Mutex::new(ConnectionInfo::new(connection_id.clone(), remote_addr.clone())),
            outbound: outbound_tx.clone(),
            alive: alive.clone(),
        });
        self.fleet
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(connection_id.clone(), entry.clone());

        // Single writer per socket: every outbound frame — replies, room fan-out,
        // heartbeats — funnels through this one channel and this one task, preserving
        // frame boundaries and intra-connection ordering.
        let writer = tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if sink.send(WsMessage::Text(frame.to_json())).await.is_err() {
                    break;
                }
            }
        });

        let _ = outbound_tx.send(ServerFrame::system("connected"));

        // A connection still flagged not-alive at the next tick gets actively closed
        // here, not merely left to time out on its own — `close_rx` is what lets the
        // heartbeat task terminate a dead read loop it doesn't otherwise own.
        let (close_tx, mut close_rx) = tokio::sync::watch::channel(false);
        let heartbeat_alive = alive.clone();
        let heartbeat_tx = outbound_tx.clone();
        let heartbeat = tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
            loop {
                interval.tick().await;
                if !heartbeat_alive.swap(false, Ordering::SeqCst) {
                    let _ = close_tx.send(true);
                    break;
                }
                if heartbeat_tx.send(ServerFrame::system("ping")).is_err() {
                    break;
                }
            }
        });

        loop {
            tokio::select! {
                msg = source.next() => {
                    match msg {
                        Some(Ok(WsMessage::Text(text))) => {
                            alive.store(true, Ordering::SeqCst);
                            {
                                let mut info = entry.info.lock().unwrap_or_else(|e| e.into_inner());
                                info.last_activity = Instant::now();
                            }
                            self.dispatch_inbound(&entry, &connection_id, &remote_addr, &text, &outbound_tx).await;
                        }
                        Some(Ok(WsMessage::Pong(_))) => {
                            alive.store(true, Ordering::SeqCst);
                        }
                        Some(Ok(WsMessage::Close(_))) | None => break,
                        Some(Err(_)) => break,
                        _ => {}
                    }
                }
                changed = close_rx.changed() => {
                    if changed.is_err() || *close_rx.borrow() {
                        break;
                    }
                }
            }
        }

        heartbeat.abort();
        self.cleanup_connection(&connection_id).await;
        drop(outbound_tx);
        let _ = writer.await;
    }

    async fn dispatch_inbound(
        self: &Arc<Self>,
        entry: &Arc<ConnectionEntry>,
        connection_id: &str,
        remote_addr: &str,
        raw: &str,
        outbound_tx: &mpsc::UnboundedSender<ServerFrame>,
    ) {
        let frame: crate::protocol::ClientFrame = match serde_json::from_str(raw) {
            Ok(f) => f,
            Err(_) => {
                let _ = outbound_tx.send(ServerFrame::error(ErrorCode::InvalidMessage, new_id(), None));
                return;
            }
        };

        let class = RateLimitClass::from_str(frame.rate_limit_class())
            .unwrap_or(RateLimitClass::Command);
        let limit = self.rate_limiter.check(remote_addr, class);
        if !limit.allowed {
            let _ = outbound_tx.send(ServerFrame::error(
                ErrorCode::RateLimit,
                new_id(),
                Some(limit.retry_after_secs),
            ));
            return;
        }

        let authenticated = entry.info.lock().unwrap_or_else(|e| e.into_inner()).authenticated;
        if frame.requires_auth() && !authenticated {
            let _ = outbound_tx.send(ServerFrame::error(ErrorCode::Unauthorized, new_id(), None));
            return;
        }

        crate::router::dispatch(self, connection_id, frame).await;
    }

    pub fn send_to(&self, connection_id: &str, frame: ServerFrame) {
        if let Some(entry) = self.fleet.lock().unwrap_or_else(|e| e.into_inner()).get(connection_id) {
            let _ = entry.outbound.send(frame);
        }
    }

    pub fn mark_authenticated(&self, connection_id: &str, user_id: &str, username: &str) {
        if let Some(entry) = self.fleet.lock().unwrap_or_else(|e| e.into_inner()).get(connection_id) {
            let mut info = entry.info.lock().unwrap_or_else(|e| e.into_inner());
            info.authenticated = true;
            info.user_id = Some(user_id.to_string());
            info.username = Some(username.to_string());
        }
    }

    pub fn set_current_room(&self, connection_id: &str, room_id: Option<&str>) {
        if let Some(entry) = self.fleet.lock().unwrap_or_else(|e| e.into_inner()).get(connection_id) {
            entry.info.lock().unwrap_or_else(|e| e.into_inner()).current_room_id = room_id.map(String::from);
        }
    }

    pub fn connection_user(&self, connection_id: &str) -> Option<(String, String)> {
        let fleet = self.fleet.lock().unwrap_or_else(|e| e.into_inner());
        let entry = fleet.get(connection_id)?;
        let info = entry.info.lock().unwrap_or_else(|e| e.into_inner());
        Some((info.user_id.clone()?, info.username.clone()?))
    }

    pub fn current_room(&self, connection_id: &str) -> Option<String> {
        let fleet = self.fleet.lock().unwrap_or_else(|e| e.into_inner());
        let entry = fleet.get(connection_id)?;
        entry.info.lock().unwrap_or_else(|e| e.into_inner()).current_room_id.clone()
    }

    /// Fans `frame` to every local connection currently in `room_id`, except
    /// `except_connection_id` (the sender's own socket — it never receives its own
    /// `message` frame back).
    fn broadcast_to_room_local(&self, room_id: &str, frame: &ServerFrame, except_connection_id: Option<&str>) {
        let fleet = self.fleet.lock().unwrap_or_else(|e| e.into_inner());
        for (conn_id, entry) in fleet.iter() {
            if Some(conn_id.as_str()) == except_connection_id {
                continue;
            }
            let in_room = entry
                .info
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .current_room_id
                .as_deref()
                == Some(room_id);
            if in_room {
                let _ = entry.outbound.send(frame.clone_for_fanout());
            }
        }
    }

    /// Ensures a background forwarder is running for `room_id`'s bus channels,
    /// incrementing the local-member refcount; spawns one on first local join.
    pub fn subscribe_room(self: &Arc<Self>, room_id: &str) {
        let mut subs = self.room_subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(sub) = subs.get_mut(room_id) {
            sub.local_members += 1;
            return;
        }

        let hub = Arc::clone(self);
        let room_id_owned = room_id.to_string();
        let mut messages_rx = self.bus.subscribe(&bus::channel_room_messages(room_id));
        let mut events_rx = self.bus.subscribe(&bus::channel_room_events(room_id));
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok(msg) = messages_rx.recv() => {
                        hub.handle_room_message_event(&room_id_owned, msg.payload);
                    }
                    Ok(msg) = events_rx.recv() => {
                        hub.handle_room_event(&room_id_owned, msg.payload);
                    }
                    else => break,
                }
            }
        });

        subs.insert(room_id.to_string(), RoomSubscription { handle, local_members: 1 });
    }

    /// Decrements the refcount for `room_id`; aborts and drops the forwarder once no
    /// local connection is left in that room.
    pub fn unsubscribe_room(&self, room_id: &str) {
        let mut subs = self.room_subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(sub) = subs.get_mut(room_id) {
            sub.local_members = sub.local_members.saturating_sub(1);
            if sub.local_members == 0 {
                if let Some(sub) = subs.remove(room_id) {
                    sub.handle.abort();
                }
            }
        }
    }

    fn handle_room_message_event(&self, room_id: &str, payload: serde_json::Value) {
        if let Some(message) = payload.get("message").cloned() {
            if let Ok(message) = serde_json::from_value(message) {
                let sender_connection = payload.get("senderConnectionId").and_then(|v| v.as_str());
                self.broadcast_to_room_local(room_id, &ServerFrame::message_frame(message), sender_connection);
            }
        }
    }

    fn handle_room_event(&self, room_id: &str, payload: serde_json::Value) {
        let event = payload.get("event").and_then(|v| v.as_str()).unwrap_or("");
        let frame = match event {
            "user_joined" | "user_left" => {
                let user_id = payload.get("userId").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                let username = payload.get("username").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                let member_count = payload.get("memberCount").and_then(|v| v.as_i64()).unwrap_or(0);
                let user = UserSummary { user_id, username };
                if event == "user_joined" {
                    ServerFrame::UserJoined { user, member_count, timestamp: crate::models::now_rfc3339() }
                } else {
                    ServerFrame::UserLeft { user, member_count, timestamp: crate::models::now_rfc3339() }
                }
            }
            "typing_update" => {
                let typing_users: Vec<String> = payload
                    .get("typingUsers")
                    .and_then(|v| v.as_array())
                    .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
                    .unwrap_or_default();
                ServerFrame::TypingUpdate { typing_users, timestamp: crate::models::now_rfc3339() }
            }
            _ => return,
        };
        self.broadcast_to_room_local(room_id, &frame, None);
    }

    /// On socket close: leave the current room, decrement connections, remove from the
    /// fleet.
    async fn cleanup_connection(self: &Arc<Self>, connection_id: &str) {
        let (user_id, username, room_id) = {
            let fleet = self.fleet.lock().unwrap_or_else(|e| e.into_inner());
            match fleet.get(connection_id) {
                Some(entry) => {
                    let info = entry.info.lock().unwrap_or_else(|e| e.into_inner());
                    (info.user_id.clone(), info.username.clone(), info.current_room_id.clone())
                }
                None => (None, None, None),
            }
        };

        if let (Some(user_id), Some(username), Some(room_id)) = (&user_id, &username, &room_id) {
            let _ = self.rooms.leave(room_id, user_id, username).await;
            self.unsubscribe_room(room_id);
        }

        if user_id.is_some() {
            self.users.disconnect(connection_id);
        }

        self.fleet.lock().unwrap_or_else(|e| e.into_inner()).remove(connection_id);
    }

    /// Graceful shutdown: stop accepting new connections, push a close-ish system frame
    /// to every socket, and wait up to `DRAIN_TIMEOUT` for the fleet to empty.
    pub async fn drain(&self) {
        self.stop_accepting();
        if let Some(handle) = self.global_forwarder.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
        let connection_ids: Vec<String> = {
            let fleet = self.fleet.lock().unwrap_or_else(|e| e.into_inner());
            fleet.keys().cloned().collect()
        };
        for id in connection_ids {
            self.send_to(&id, ServerFrame::system("server shutting down"));
        }

        let deadline = Instant::now() + DRAIN_TIMEOUT;
        while Instant::now() < deadline && self.connection_count() > 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    pub fn room_list_snapshot(rooms: &[crate::models::Room]) -> Vec<RoomListEntry> {
        rooms
            .iter()
            .map(|r| RoomListEntry {
                name: r.name.clone(),
                users: r.current_users,
                messages: r.message_count,
                created_at: r.created_at.clone(),
            })
            .collect()
    }

}

impl ServerFrame {
    /// Frames carry owned data, so fan-out to N local sockets needs N clones; kept as a
    /// named helper so the allocation cost at each broadcast point stays visible.
    fn clone_for_fanout(&self) -> ServerFrame {
        self.clone()
    }
}
