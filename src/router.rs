//! C11: maps each `ClientFrame` variant to exactly one handler. The auth precondition
//! and rate limiting are already enforced by `ConnectionHub` before `dispatch` runs;
//! this module only has to pick the right handler and turn domain errors into
//! `error`/`auth_error` frames. Every arm below is exhaustive over `ClientFrame` — an
//! unknown `type` never reaches here at all, since it fails to deserialize into the
//! enum in the first place.

use std::sync::Arc;

use crate::connection_hub::ConnectionHub;
use crate::message_service::cancel_typing_after_send;
use crate::models::new_id;
use crate::protocol::{
    ClientFrame, ErrorCode, RoomJoinedInfo, RoomSummary, ServerFrame, UserSummary,
};
use crate::room_registry::{CreateOutcome, JoinOutcome};
use crate::user_registry::AuthOutcome;

pub async fn dispatch(hub: &Arc<ConnectionHub>, connection_id: &str, frame: ClientFrame) {
    match frame {
        ClientFrame::Auth { username } => handle_auth(hub, connection_id, &username).await,
        ClientFrame::CreateRoom { room_name } => handle_create_room(hub, connection_id, &room_name).await,
        ClientFrame::JoinRoom { room_name } => handle_join_room(hub, connection_id, &room_name).await,
        ClientFrame::LeaveRoom => handle_leave_room(hub, connection_id).await,
        ClientFrame::SendMessage { content } => handle_send_message(hub, connection_id, &content).await,
        ClientFrame::TypingStart => handle_typing(hub, connection_id, true).await,
        ClientFrame::TypingStop => handle_typing(hub, connection_id, false).await,
        ClientFrame::Command { command, args } => handle_command(hub, connection_id, &command, &args).await,
    }
}

async fn handle_auth(hub: &Arc<ConnectionHub>, connection_id: &str, username: &str) {
    match hub.users().authenticate(username, connection_id) {
        Ok(AuthOutcome::Ok { user, is_new: _ }) => {
            hub.mark_authenticated(connection_id, &user.id, &user.username);
            hub.send_to(
                connection_id,
                ServerFrame::AuthSuccess {
                    user: UserSummary { user_id: user.id, username: user.username },
                    timestamp: crate::models::now_rfc3339(),
                },
            );
        }
        Ok(AuthOutcome::Invalid) => {
            hub.send_to(connection_id, ServerFrame::auth_error(ErrorCode::InvalidMessage, new_id()));
        }
        Err(code) => {
            hub.send_to(connection_id, ServerFrame::auth_error(code, new_id()));
        }
    }
}

async fn handle_create_room(hub: &Arc<ConnectionHub>, connection_id: &str, room_name: &str) {
    let Some((user_id, username)) = hub.connection_user(connection_id) else {
        hub.send_to(connection_id, ServerFrame::error(ErrorCode::Unauthorized, new_id(), None));
        return;
    };

    match hub.rooms().create(room_name, &user_id).await {
        Ok(CreateOutcome::Created(room)) => {
            hub.send_to(
                connection_id,
                ServerFrame::RoomCreated {
                    room: RoomSummary { id: room.id.clone(), name: room.name.clone() },
                    timestamp: crate::models::now_rfc3339(),
                },
            );
            join_and_announce(hub, connection_id, &user_id, &username, &room.id).await;
        }
        Ok(CreateOutcome::Conflict) => {
            hub.send_to(connection_id, ServerFrame::error(ErrorCode::RoomExists, new_id(), None));
        }
        Err(code) => {
            hub.send_to(connection_id, ServerFrame::error(code, new_id(), None));
        }
    }
}

async fn handle_join_room(hub: &Arc<ConnectionHub>, connection_id: &str, room_name: &str) {
    let Some((user_id, username)) = hub.connection_user(connection_id) else {
        hub.send_to(connection_id, ServerFrame::error(ErrorCode::Unauthorized, new_id(), None));
        return;
    };

    let Some(room) = hub.rooms().find_by_name(room_name) else {
        hub.send_to(connection_id, ServerFrame::error(ErrorCode::RoomNotFound, new_id(), None));
        return;
    };

    leave_current_room(hub, connection_id, &user_id, &username).await;
    join_and_announce(hub, connection_id, &user_id, &username, &room.id).await;
}

/// Shared by `create_room` (the creator auto-joins) and `join_room`: performs the join,
/// subscribes the hub to the room's bus channels, and replies with `room_joined` plus
/// history. The join is persisted (inside `RoomRegistry::join`, which publishes
/// `user_joined`) strictly before this connection's first `send_message` can be
/// dispatched, since frames from one connection are processed in arrival order.
async fn join_and_announce(hub: &Arc<ConnectionHub>, connection_id: &str, user_id: &str, username: &str, room_id: &str) {
    match hub.rooms().join(room_id, user_id, username).await {
        Ok(JoinOutcome::Joined { room, members }) => {
            hub.set_current_room(connection_id, Some(&room.id));
            hub.subscribe_room(&room.id);

            hub.send_to(
                connection_id,
                ServerFrame::RoomJoined {
                    room: RoomJoinedInfo { id: room.id.clone(), name: room.name.clone(), member_count: room.current_users },
                    members,
                    timestamp: crate::models::now_rfc3339(),
                },
            );

            let history = hub.messages().history(&room.id, None).await;
            hub.send_to(
                connection_id,
                ServerFrame::MessageHistory { messages: history, timestamp: crate::models::now_rfc3339() },
            );
        }
        Ok(JoinOutcome::NotFound) => {
            hub.send_to(connection_id, ServerFrame::error(ErrorCode::RoomNotFound, new_id(), None));
        }
        Err(code) => {
            hub.send_to(connection_id, ServerFrame::error(code, new_id(), None));
        }
    }
}

async fn handle_leave_room(hub: &Arc<ConnectionHub>, connection_id: &str) {
    let Some((user_id, username)) = hub.connection_user(connection_id) else {
        hub.send_to(connection_id, ServerFrame::error(ErrorCode::Unauthorized, new_id(), None));
        return;
    };

    let Some(room_id) = hub.current_room(connection_id) else {
        hub.send_to(connection_id, ServerFrame::error(ErrorCode::InvalidMessage, new_id(), None));
        return;
    };

    let room_name = hub
        .rooms()
        .active_rooms(1000)
        .into_iter()
        .find(|r| r.id == room_id)
        .map(|r| r.name)
        .unwrap_or_default();

    if hub.rooms().leave(&room_id, &user_id, &username).await.is_ok() {
        hub.set_current_room(connection_id, None);
        hub.unsubscribe_room(&room_id);
        hub.send_to(
            connection_id,
            ServerFrame::RoomLeft { room_name, timestamp: crate::models::now_rfc3339() },
        );
    } else {
        hub.send_to(connection_id, ServerFrame::error(ErrorCode::DatabaseError, new_id(), None));
    }
}

async fn leave_current_room(hub: &Arc<ConnectionHub>, connection_id: &str, user_id: &str, username: &str) {
    if let Some(room_id) = hub.current_room(connection_id) {
        if hub.rooms().leave(&room_id, user_id, username).await.is_ok() {
            hub.set_current_room(connection_id, None);
            hub.unsubscribe_room(&room_id);
        }
    }
}

async fn handle_send_message(hub: &Arc<ConnectionHub>, connection_id: &str, content: &str) {
    let Some((user_id, username)) = hub.connection_user(connection_id) else {
        hub.send_to(connection_id, ServerFrame::error(ErrorCode::Unauthorized, new_id(), None));
        return;
    };
    let Some(room_id) = hub.current_room(connection_id) else {
        hub.send_to(connection_id, ServerFrame::error(ErrorCode::InvalidMessage, new_id(), None));
        return;
    };

    match hub
        .messages()
        .send_from_connection(&room_id, &user_id, &username, content, connection_id)
        .await
    {
        Ok(_message) => {
            cancel_typing_after_send(hub.rooms(), &room_id, &user_id, &username).await;
        }
        Err(code) => {
            hub.send_to(connection_id, ServerFrame::error(code, new_id(), None));
        }
    }
}

async fn handle_typing(hub: &Arc<ConnectionHub>, connection_id: &str, is_typing: bool) {
    let Some((user_id, username)) = hub.connection_user(connection_id) else {
        hub.send_to(connection_id, ServerFrame::error(ErrorCode::Unauthorized, new_id(), None));
        return;
    };
    let Some(room_id) = hub.current_room(connection_id) else {
        return;
    };
    hub.rooms().set_typing(&room_id, &user_id, &username, is_typing).await;
}

async fn handle_command(hub: &Arc<ConnectionHub>, connection_id: &str, command: &str, args: &[String]) {
    match command {
        "rooms" => {
            let limit = args.first().and_then(|s| s.parse::<i64>().ok()).unwrap_or(20);
            let rooms = hub.rooms().active_rooms(limit);
            let entries = ConnectionHub::room_list_snapshot(&rooms);
            hub.send_to(
                connection_id,
                ServerFrame::RoomList { count: entries.len(), rooms: entries, timestamp: crate::models::now_rfc3339() },
            );
        }
        "users" => {
            let room_name = hub.current_room(connection_id).and_then(|room_id| {
                hub.rooms().active_rooms(1000).into_iter().find(|r| r.id == room_id).map(|r| r.name)
            });
            let users = match &room_name {
                Some(name) => {
                    if let Some(room) = hub.rooms().find_by_name(name) {
                        hub.rooms().member_list(&room.id)
                    } else {
                        Vec::new()
                    }
                }
                None => hub
                    .users()
                    .online_users()
                    .into_iter()
                    .filter_map(|id| hub.users().user_info(&id))
                    .map(|u| u.username)
                    .collect(),
            };
            hub.send_to(
                connection_id,
                ServerFrame::UserList {
                    count: users.len(),
                    room: room_name,
                    users,
                    timestamp: crate::models::now_rfc3339(),
                },
            );
        }
        "help" => {
            hub.send_to(
                connection_id,
                ServerFrame::system("commands: rooms [limit], users, help, stats, me, clear"),
            );
        }
        "stats" => {
            let room_count = hub.rooms().active_rooms(1000).len();
            hub.send_to(
                connection_id,
                ServerFrame::system(format!(
                    "connections={} active_rooms={}",
                    hub.connection_count(),
                    room_count
                )),
            );
        }
        "me" => {
            if let Some((user_id, username)) = hub.connection_user(connection_id) {
                let room_name = hub.current_room(connection_id).and_then(|room_id| {
                    hub.rooms().active_rooms(1000).into_iter().find(|r| r.id == room_id).map(|r| r.name)
                });
                hub.send_to(
                    connection_id,
                    ServerFrame::system(format!(
                        "userId={user_id} username={username} room={}",
                        room_name.unwrap_or_else(|| "none".to_string())
                    )),
                );
            } else {
                hub.send_to(connection_id, ServerFrame::error(ErrorCode::Unauthorized, new_id(), None));
            }
        }
        "clear" => {
            hub.send_to(connection_id, ServerFrame::ClearScreen { timestamp: crate::models::now_rfc3339() });
        }
        _ => {
            hub.send_to(connection_id, ServerFrame::error(ErrorCode::InvalidMessage, new_id(), None));
        }
    }
}
