//! C5 — authentication state machine wired to the socket transport.
//!
//! States: `Pending -> Authenticated -> Terminated`; see spec.md 4.3.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use socketioxide::extract::{Data, SocketRef};

use crate::registry::{ConnState, AUTH_GRACE};
use crate::rooms;
use crate::socket::transport::SocketEmitter;
use crate::state::AppState;
use crate::token::{self, TokenSources};

#[derive(Debug, Clone)]
struct HandshakeAuthToken(Option<String>);

#[derive(Debug, Serialize)]
struct ErrorPayload {
    code: String,
    message: String,
}

#[derive(Debug, Deserialize, Default)]
struct AuthenticatePayload {
    #[serde(default)]
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RoomPayload {
    room: String,
}

fn socket_id(socket: &SocketRef) -> String {
    socket.id.to_string()
}

fn send_error_and_close(socket: &SocketRef, code: &str, message: impl Into<String>) {
    let _ = socket.emit(
        "error",
        &ErrorPayload {
            code: code.to_string(),
            message: message.into(),
        },
    );
    let _ = socket.disconnect();
}

/// `handshake_auth` is the Socket.IO handshake `auth` payload (`{auth:
/// {token}}` on the client), captured by the `Data<Value>` extractor at the
/// `io.ns` connect closure — socketioxide only exposes it at that call site,
/// not later via `req_parts()`, so the caller threads it through here rather
/// than this function re-deriving it.
pub fn register(socket: SocketRef, state: Arc<AppState>, handshake_auth: Value) {
    let handshake_token = handshake_auth
        .get("token")
        .and_then(Value::as_str)
        .map(|s| s.to_string());
    socket
        .extensions
        .insert(HandshakeAuthToken(handshake_token));

    state
        .registry
        .insert_pending(socket_id(&socket), SocketEmitter(socket.clone()));

    let _ = socket.emit(
        "connected",
        &json!({
            "socketId": socket_id(&socket),
            "authGraceMs": AUTH_GRACE.as_millis() as u64,
        }),
    );

    spawn_auth_grace_timer(socket.clone(), state.clone());

    socket.on("authenticate", {
        let state = state.clone();
        move |socket: SocketRef, Data::<Value>(raw)| {
            let state = state.clone();
            async move { on_authenticate(socket, raw, state).await; }
        }
    });

    socket.on("join-room", {
        let state = state.clone();
        move |socket: SocketRef, Data::<Value>(raw)| {
            let state = state.clone();
            async move { on_join_room(socket, raw, state).await; }
        }
    });

    socket.on("leave-room", {
        let state = state.clone();
        move |socket: SocketRef, Data::<Value>(raw)| {
            let state = state.clone();
            async move { on_leave_room(socket, raw, state).await; }
        }
    });

    socket.on(
        "ping",
        move |socket: SocketRef| async move {
            let _ = socket.emit("pong", &json!({ "timestamp": chrono::Utc::now().timestamp_millis() }));
        },
    );

    socket.on_disconnect({
        let state = state.clone();
        move |socket: SocketRef| {
            let state = state.clone();
            async move { on_disconnect(socket, state).await; }
        }
    });
}

fn spawn_auth_grace_timer(socket: SocketRef, state: Arc<AppState>) {
    tokio::spawn(async move {
        tokio::time::sleep(AUTH_GRACE).await;
        let sid = socket_id(&socket);
        if state.registry.state_of(&sid) == Some(ConnState::Pending) {
            state.registry.remove(&sid);
            send_error_and_close(&socket, "AUTH_GRACE_EXCEEDED", "authentication grace period exceeded");
            tracing::info!(socket_id = %sid, "auth grace exceeded, socket closed");
        }
    });
}

async fn on_authenticate(socket: SocketRef, raw: Value, state: Arc<AppState>) {
    let sid = socket_id(&socket);
    if state.registry.state_of(&sid) != Some(ConnState::Pending) {
        return;
    }

    let payload: AuthenticatePayload = serde_json::from_value(raw).unwrap_or_default();

    let parts = socket.req_parts();
    let query = parts.uri.query().unwrap_or_default();
    let query_token = find_query_param(query, "token");
    let auth_header = parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let cookie_header = parts
        .headers
        .get(axum::http::header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let handshake_token = socket
        .extensions
        .get::<HandshakeAuthToken>()
        .and_then(|t| t.0.clone());

    let sources = TokenSources {
        message_token: payload.token.as_deref(),
        handshake_auth_token: handshake_token.as_deref(),
        query_token: query_token.as_deref(),
        auth_header: auth_header.as_deref(),
        cookie_header: cookie_header.as_deref(),
    };

    let user = match token::authenticate(&sources, &state.config.jwt_secret, state.config.cookie_secret()) {
        Ok(u) => u,
        Err(e) => {
            tracing::warn!(socket_id = %sid, error = %e, "socket authentication failed");
            state.registry.remove(&sid);
            send_error_and_close(&socket, "INVALID_TOKEN", e.to_string());
            return;
        }
    };

    if !state.registry.authenticate(&sid, user.clone()) {
        return;
    }

    let joined_rooms = rooms::auto_join_rooms(&user.role);
    for room in &joined_rooms {
        state.registry.add_room(&sid, room);
    }

    tracing::info!(socket_id = %sid, user_id = user.user_id, role = %user.role, "socket authenticated");

    let _ = socket.emit(
        "authenticated",
        &json!({
            "userId": user.user_id,
            "role": user.role,
            "rooms": joined_rooms,
        }),
    );

    let presence = json!({ "userId": user.user_id, "role": user.role });
    for room in rooms::presence_scope_rooms(&user.role) {
        rooms::broadcast_to_room(&state.registry, &state.bus, &room, "user:online", presence.clone()).await;
    }
}

async fn on_join_room(socket: SocketRef, raw: Value, state: Arc<AppState>) {
    let sid = socket_id(&socket);
    let Some(user) = state.registry.user_of(&sid) else {
        return;
    };

    let Ok(payload) = serde_json::from_value::<RoomPayload>(raw) else {
        let _ = socket.emit(
            "error",
            &ErrorPayload {
                code: "INVALID_PAYLOAD".into(),
                message: "join-room requires { room }".into(),
            },
        );
        return;
    };

    match rooms::may_join(&payload.room, &user.role, user.user_id) {
        Ok(()) => {
            state.registry.add_room(&sid, &payload.room);
            tracing::debug!(socket_id = %sid, room = %payload.room, "joined room");
        }
        Err(e) => {
            let _ = socket.emit(
                "error",
                &ErrorPayload {
                    code: "FORBIDDEN_ROOM_JOIN".into(),
                    message: e.to_string(),
                },
            );
        }
    }
}

async fn on_leave_room(socket: SocketRef, raw: Value, state: Arc<AppState>) {
    let sid = socket_id(&socket);
    if state.registry.user_of(&sid).is_none() {
        return;
    }
    if let Ok(payload) = serde_json::from_value::<RoomPayload>(raw) {
        state.registry.remove_room(&sid, &payload.room);
    }
}

async fn on_disconnect(socket: SocketRef, state: Arc<AppState>) {
    let sid = socket_id(&socket);
    let Some(conn) = state.registry.remove(&sid) else {
        return;
    };

    let Some(user) = conn.user else {
        return;
    };

    tracing::info!(socket_id = %sid, user_id = user.user_id, "socket disconnected");

    let presence = json!({ "userId": user.user_id, "role": user.role });
    for room in rooms::presence_scope_rooms(&user.role) {
        rooms::broadcast_to_room(&state.registry, &state.bus, &room, "user:offline", presence.clone()).await;
    }
}

fn find_query_param(query: &str, name: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let mut split = pair.splitn(2, '=');
        let key = split.next()?;
        let value = split.next()?;
        if key == name {
            Some(value.to_string())
        } else {
            None
        }
    })
}

