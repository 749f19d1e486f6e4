//! C3 — connection registry.
//!
//! Arena of `Connection` records (`by_socket`) plus a userId secondary index
//! (`by_user`), per the "Arena + index for connections" design note
//! (spec.md 9): this replaces a linear-scan `broadcastToUser` with an O(1)
//! lookup. Generic over the emit transport so the invariants below are
//! unit-testable without a live socket runtime.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use dashmap::{DashMap, DashSet};
use relay_shared::types::auth::AuthedUser;
use serde_json::Value;

pub const AUTH_GRACE: Duration = Duration::from_secs(10);
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Transport capability a registered connection needs. `socketioxide`'s
/// `SocketRef` implements this in `crate::socket::transport`; tests use a
/// recording fake.
pub trait Emitter: Clone + Send + Sync + 'static {
    fn emit_json(&self, event: &str, data: &Value);
    fn close(&self);
    fn is_connected(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Pending,
    Authenticated,
    Terminated,
}

pub struct Connection<E: Emitter> {
    pub socket_id: String,
    pub emitter: E,
    pub state: ConnState,
    pub user: Option<AuthedUser>,
    pub rooms: HashSet<String>,
    pub auth_deadline: Option<Instant>,
}

/// In-memory registry of live connections.
///
/// Invariant (spec.md 3): `by_user[u]` contains `s` iff
/// `by_socket[s].user.user_id == u` and `by_socket[s].state ==
/// Authenticated`. A `Pending` connection never appears in `by_user` and is
/// never a recipient of any broadcast.
pub struct Registry<E: Emitter> {
    by_socket: DashMap<String, Connection<E>>,
    by_user: DashMap<i64, DashSet<String>>,
}

impl<E: Emitter> Default for Registry<E> {
    fn default() -> Self {
        Self {
            by_socket: DashMap::new(),
            by_user: DashMap::new(),
        }
    }
}

impl<E: Emitter> Registry<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a freshly accepted socket in `Pending` state, armed with an
    /// authentication deadline.
    pub fn insert_pending(&self, socket_id: String, emitter: E) {
        self.by_socket.insert(
            socket_id.clone(),
            Connection {
                socket_id,
                emitter,
                state: ConnState::Pending,
                user: None,
                rooms: HashSet::new(),
                auth_deadline: Some(Instant::now() + AUTH_GRACE),
            },
        );
    }

    /// Promotes a connection to `Authenticated`, indexing it under its
    /// user id and clearing the auth deadline. Returns `false` if the
    /// socket is unknown or already past `Pending`.
    pub fn authenticate(&self, socket_id: &str, user: AuthedUser) -> bool {
        let Some(mut entry) = self.by_socket.get_mut(socket_id) else {
            return false;
        };
        if entry.state != ConnState::Pending {
            return false;
        }

        entry.state = ConnState::Authenticated;
        entry.auth_deadline = None;
        entry.user = Some(user.clone());
        drop(entry);

        self.by_user
            .entry(user.user_id)
            .or_insert_with(DashSet::new)
            .insert(socket_id.to_string());
        true
    }

    /// Removes a connection entirely (disconnect or grace-period reap).
    pub fn remove(&self, socket_id: &str) -> Option<Connection<E>> {
        let (_, conn) = self.by_socket.remove(socket_id)?;
        if let Some(user) = &conn.user {
            if let Some(set) = self.by_user.get(&user.user_id) {
                set.remove(socket_id);
            }
            let empty = self
                .by_user
                .get(&user.user_id)
                .map(|s| s.is_empty())
                .unwrap_or(false);
            if empty {
                self.by_user.remove(&user.user_id);
            }
        }
        Some(conn)
    }

    pub fn state_of(&self, socket_id: &str) -> Option<ConnState> {
        self.by_socket.get(socket_id).map(|c| c.state)
    }

    pub fn user_of(&self, socket_id: &str) -> Option<AuthedUser> {
        self.by_socket.get(socket_id).and_then(|c| c.user.clone())
    }

    pub fn is_past_deadline(&self, socket_id: &str) -> bool {
        self.by_socket
            .get(socket_id)
            .and_then(|c| c.auth_deadline)
            .map(|d| Instant::now() >= d)
            .unwrap_or(false)
    }

    pub fn add_room(&self, socket_id: &str, room: &str) -> bool {
        if let Some(mut conn) = self.by_socket.get_mut(socket_id) {
            if conn.state == ConnState::Authenticated {
                conn.rooms.insert(room.to_string());
                return true;
            }
        }
        false
    }

    pub fn remove_room(&self, socket_id: &str, room: &str) {
        if let Some(mut conn) = self.by_socket.get_mut(socket_id) {
            conn.rooms.remove(room);
        }
    }

    pub fn rooms_of(&self, socket_id: &str) -> HashSet<String> {
        self.by_socket
            .get(socket_id)
            .map(|c| c.rooms.clone())
            .unwrap_or_default()
    }

    /// Every locally-authenticated socket currently holding `room`.
    pub fn emitters_in_room(&self, room: &str) -> Vec<E> {
        self.by_socket
            .iter()
            .filter(|entry| entry.state == ConnState::Authenticated && entry.rooms.contains(room))
            .map(|entry| entry.emitter.clone())
            .collect()
    }

    /// Every authenticated socket locally, for `broadcastToAll`.
    pub fn all_authenticated_emitters(&self) -> Vec<E> {
        self.by_socket
            .iter()
            .filter(|entry| entry.state == ConnState::Authenticated)
            .map(|entry| entry.emitter.clone())
            .collect()
    }

    /// O(1) lookup of a user's sockets, for `broadcastToUser`.
    pub fn emitters_for_user(&self, user_id: i64) -> Vec<E> {
        match self.by_user.get(&user_id) {
            Some(ids) => ids
                .iter()
                .filter_map(|id| self.by_socket.get(id.key()).map(|c| c.emitter.clone()))
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn has_user(&self, user_id: i64) -> bool {
        self.by_user.get(&user_id).map(|s| !s.is_empty()).unwrap_or(false)
    }

    pub fn connection_count(&self) -> usize {
        self.by_socket.len()
    }

    pub fn authenticated_count(&self) -> usize {
        self.by_socket
            .iter()
            .filter(|c| c.state == ConnState::Authenticated)
            .count()
    }

    pub fn room_counts(&self) -> std::collections::HashMap<String, usize> {
        let mut counts = std::collections::HashMap::new();
        for entry in self.by_socket.iter() {
            for room in &entry.rooms {
                *counts.entry(room.clone()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Shutdown drain step (spec.md 5): closes every live connection's
    /// transport. Does not remove entries from the registry — the process
    /// is exiting right after.
    pub fn close_all(&self) {
        for entry in self.by_socket.iter() {
            entry.emitter.close();
        }
    }

    /// Sweeps dead sockets: required because some vendor socket stacks do
    /// not guarantee a disconnect callback in all disconnect paths
    /// (spec.md 4.3). Returns the socket ids reaped.
    pub fn sweep_dead(&self) -> Vec<String> {
        let dead: Vec<String> = self
            .by_socket
            .iter()
            .filter(|entry| !entry.emitter.is_connected())
            .map(|entry| entry.socket_id.clone())
            .collect();

        for id in &dead {
            self.remove(id);
        }
        dead
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[derive(Clone)]
    pub struct FakeEmitter {
        pub connected: Arc<AtomicBool>,
        pub sent: Arc<std::sync::Mutex<Vec<(String, Value)>>>,
    }

    impl FakeEmitter {
        pub fn new() -> Self {
            Self {
                connected: Arc::new(AtomicBool::new(true)),
                sent: Arc::new(std::sync::Mutex::new(Vec::new())),
            }
        }

        pub fn disconnect_silently(&self) {
            self.connected.store(false, Ordering::SeqCst);
        }

        pub fn sent_events(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(|(e, _)| e.clone()).collect()
        }
    }

    impl Emitter for FakeEmitter {
        fn emit_json(&self, event: &str, data: &Value) {
            self.sent.lock().unwrap().push((event.to_string(), data.clone()));
        }

        fn close(&self) {
            self.connected.store(false, Ordering::SeqCst);
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::FakeEmitter;
    use super::*;

    fn user(id: i64, role: &str) -> AuthedUser {
        AuthedUser {
            user_id: id,
            role: role.to_string(),
        }
    }

    #[test]
    fn pending_socket_is_not_indexed_by_user() {
        let reg: Registry<FakeEmitter> = Registry::new();
        reg.insert_pending("s1".into(), FakeEmitter::new());
        assert!(!reg.has_user(7));
        assert_eq!(reg.state_of("s1"), Some(ConnState::Pending));
    }

    #[test]
    fn authenticate_indexes_under_user_id() {
        let reg: Registry<FakeEmitter> = Registry::new();
        reg.insert_pending("s1".into(), FakeEmitter::new());
        assert!(reg.authenticate("s1", user(7, "operator")));
        assert!(reg.has_user(7));
        assert_eq!(reg.emitters_for_user(7).len(), 1);
        assert_eq!(reg.state_of("s1"), Some(ConnState::Authenticated));
    }

    #[test]
    fn remove_clears_empty_user_bucket() {
        let reg: Registry<FakeEmitter> = Registry::new();
        reg.insert_pending("s1".into(), FakeEmitter::new());
        reg.authenticate("s1", user(9, "director"));
        reg.remove("s1");
        assert!(!reg.has_user(9));
    }

    #[test]
    fn multiple_sockets_for_same_user_are_all_reachable() {
        let reg: Registry<FakeEmitter> = Registry::new();
        reg.insert_pending("s1".into(), FakeEmitter::new());
        reg.insert_pending("s2".into(), FakeEmitter::new());
        reg.authenticate("s1", user(3, "technician"));
        reg.authenticate("s2", user(3, "technician"));
        assert_eq!(reg.emitters_for_user(3).len(), 2);
        reg.remove("s1");
        assert_eq!(reg.emitters_for_user(3).len(), 1);
        assert!(reg.has_user(3));
    }

    #[test]
    fn room_broadcast_only_reaches_authenticated_members() {
        let reg: Registry<FakeEmitter> = Registry::new();
        reg.insert_pending("s1".into(), FakeEmitter::new());
        reg.insert_pending("s2".into(), FakeEmitter::new());
        reg.authenticate("s1", user(1, "operator"));
        reg.add_room("s1", "operators");
        // s2 stays Pending and must never become a recipient.
        reg.add_room("s2", "operators");

        assert_eq!(reg.emitters_in_room("operators").len(), 1);
    }

    #[test]
    fn sweep_removes_disconnected_sockets() {
        let reg: Registry<FakeEmitter> = Registry::new();
        let emitter = FakeEmitter::new();
        reg.insert_pending("s1".into(), emitter.clone());
        reg.authenticate("s1", user(5, "operator"));
        emitter.disconnect_silently();

        let reaped = reg.sweep_dead();
        assert_eq!(reaped, vec!["s1".to_string()]);
        assert!(!reg.has_user(5));
    }

    #[test]
    fn close_all_closes_every_emitter() {
        let reg: Registry<FakeEmitter> = Registry::new();
        let e1 = FakeEmitter::new();
        let e2 = FakeEmitter::new();
        reg.insert_pending("s1".into(), e1.clone());
        reg.insert_pending("s2".into(), e2.clone());
        reg.authenticate("s1", user(1, "operator"));

        reg.close_all();

        assert!(!e1.is_connected());
        assert!(!e2.is_connected());
    }

    #[test]
    fn join_leave_room_is_idempotent_round_trip() {
        let reg: Registry<FakeEmitter> = Registry::new();
        reg.insert_pending("s1".into(), FakeEmitter::new());
        reg.authenticate("s1", user(1, "operator"));
        let before = reg.rooms_of("s1");
        reg.add_room("s1", "city:moscow");
        reg.remove_room("s1", "city:moscow");
        assert_eq!(reg.rooms_of("s1"), before);
    }
}
