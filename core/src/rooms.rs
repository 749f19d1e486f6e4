//! C4 — room engine.
//!
//! Rooms are implicit: a room "exists" iff some connection holds it.
//! Role is modeled as a tagged string value with capability predicates
//! (`may_join_directors`) rather than a closed enum, per the "Polymorphism
//! over roles" design note (spec.md 9) — the auto-join mapping below is the
//! "small lookup table" that note calls for.

use relay_shared::types::event::BusEnvelope;
use serde_json::Value;

use crate::bus::Bus;
use crate::registry::{Emitter, Registry};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RoomError {
    #[error("room name must match [A-Za-z0-9:_-]{{1,100}}")]
    InvalidName,
    #[error("forbidden room join")]
    Forbidden,
}

/// Room name character class and length bound (spec.md 4.4).
pub fn validate_room_name(room: &str) -> Result<(), RoomError> {
    if room.is_empty() || room.len() > 100 {
        return Err(RoomError::InvalidName);
    }
    if room
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b':' | b'_' | b'-'))
    {
        Ok(())
    } else {
        Err(RoomError::InvalidName)
    }
}

/// `operator` and `callcentre_operator` both carry director-adjacent
/// operator capability and additionally join `operators`; `director`
/// additionally joins `directors`. Every other role joins only its own
/// lower-cased role room.
pub fn auto_join_rooms(role: &str) -> Vec<String> {
    let lower = role.to_lowercase();
    let mut rooms = vec![lower.clone()];
    match lower.as_str() {
        "operator" | "callcentre_operator" => rooms.push("operators".to_string()),
        "director" => rooms.push("directors".to_string()),
        _ => {}
    }
    rooms
}

pub fn may_join_directors(role: &str) -> bool {
    role.eq_ignore_ascii_case("director")
}

/// A director may join any per-subject room regardless of whose id it
/// names; this is the "act as director" capability spec.md 4.4 grants for
/// `operator:<id>` / `master:<id>` / `user:<id>`.
pub fn may_act_as_director(role: &str) -> bool {
    may_join_directors(role)
}

const SUBJECT_PREFIXES: [&str; 3] = ["operator:", "master:", "user:"];

/// Enforces spec.md 4.4's join ACL. `role` and `own_user_id` describe the
/// joining connection's authenticated identity.
pub fn may_join(room: &str, role: &str, own_user_id: i64) -> Result<(), RoomError> {
    validate_room_name(room)?;

    if room == "directors" {
        return if may_join_directors(role) {
            Ok(())
        } else {
            Err(RoomError::Forbidden)
        };
    }

    for prefix in SUBJECT_PREFIXES {
        if let Some(rest) = room.strip_prefix(prefix) {
            if let Ok(subject_id) = rest.parse::<i64>() {
                if subject_id == own_user_id || may_act_as_director(role) {
                    return Ok(());
                }
                return Err(RoomError::Forbidden);
            }
            // Non-numeric suffix: not a recognized per-subject room, fall
            // through to the open default below.
            break;
        }
    }

    // `city:<name>`, `order:<id>`, `operators`, and any other room name are
    // open to any authenticated connection.
    Ok(())
}

/// Constructs the presence-scoping rooms for a `user:online`/`user:offline`
/// emission (spec.md 4.3 step 5): always `directors`, plus `operators` when
/// the subject's role is operator-shaped.
pub fn presence_scope_rooms(role: &str) -> Vec<String> {
    let lower = role.to_lowercase();
    let mut rooms = vec!["directors".to_string()];
    if matches!(lower.as_str(), "operator" | "callcentre_operator") {
        rooms.push("operators".to_string());
    }
    rooms
}

/// `broadcastToRoom`: emit locally to every socket holding `room`, then
/// publish on the bridge for peer instances.
pub async fn broadcast_to_room<E: Emitter>(
    registry: &Registry<E>,
    bus: &Bus,
    room: &str,
    event: &str,
    data: Value,
) {
    for emitter in registry.emitters_in_room(room) {
        emitter.emit_json(event, &data);
    }

    let envelope = BusEnvelope::new(event, data, bus.instance_id().to_string()).for_room(room);
    bus.publish(&envelope).await;
}

/// `broadcastToAll`: emit locally to every authenticated socket, then
/// publish on the bridge with no room (fleet-wide).
pub async fn broadcast_to_all<E: Emitter>(registry: &Registry<E>, bus: &Bus, event: &str, data: Value) {
    for emitter in registry.all_authenticated_emitters() {
        emitter.emit_json(event, &data);
    }

    let envelope = BusEnvelope::new(event, data, bus.instance_id().to_string());
    bus.publish(&envelope).await;
}

/// `broadcastToUser`: O(1) lookup via the registry's userId index.
/// Local-only by design; the inbox is the cross-instance fallback
/// (spec.md 4.4).
pub fn broadcast_to_user<E: Emitter>(registry: &Registry<E>, user_id: i64, event: &str, data: &Value) {
    for emitter in registry.emitters_for_user(user_id) {
        emitter.emit_json(event, data);
    }
}

/// Applies a remotely published envelope locally: emits to the named room,
/// or to every authenticated socket when no room is given. Never re-publishes
/// (that would re-echo across the fleet).
pub fn apply_remote<E: Emitter>(registry: &Registry<E>, envelope: &BusEnvelope) {
    match &envelope.room {
        Some(room) => {
            for emitter in registry.emitters_in_room(room) {
                emitter.emit_json(&envelope.event, &envelope.data);
            }
        }
        None => {
            for emitter in registry.all_authenticated_emitters() {
                emitter.emit_json(&envelope.event, &envelope.data);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ascii_room_names() {
        assert!(validate_room_name("operators").is_ok());
        assert!(validate_room_name("city:Saratov").is_ok());
        assert!(validate_room_name("order:42").is_ok());
    }

    #[test]
    fn rejects_non_latin_room_names() {
        assert_eq!(validate_room_name("city:Саратов"), Err(RoomError::InvalidName));
    }

    #[test]
    fn rejects_oversized_and_empty_names() {
        assert_eq!(validate_room_name(""), Err(RoomError::InvalidName));
        assert_eq!(validate_room_name(&"a".repeat(101)), Err(RoomError::InvalidName));
        assert!(validate_room_name(&"a".repeat(100)).is_ok());
    }

    #[test]
    fn operator_synonyms_auto_join_operators_room() {
        assert_eq!(auto_join_rooms("operator"), vec!["operator", "operators"]);
        assert_eq!(
            auto_join_rooms("callcentre_operator"),
            vec!["callcentre_operator", "operators"]
        );
    }

    #[test]
    fn director_auto_joins_directors_room() {
        assert_eq!(auto_join_rooms("director"), vec!["director", "directors"]);
    }

    #[test]
    fn other_roles_join_only_their_own_room() {
        assert_eq!(auto_join_rooms("technician"), vec!["technician"]);
    }

    #[test]
    fn non_director_cannot_join_directors_room() {
        assert_eq!(may_join("directors", "operator", 7), Err(RoomError::Forbidden));
    }

    #[test]
    fn director_can_join_directors_room() {
        assert!(may_join("directors", "director", 7).is_ok());
    }

    #[test]
    fn own_subject_room_is_always_joinable() {
        assert!(may_join("user:7", "technician", 7).is_ok());
    }

    #[test]
    fn other_subject_room_requires_director() {
        assert_eq!(may_join("user:8", "technician", 7), Err(RoomError::Forbidden));
        assert!(may_join("user:8", "director", 7).is_ok());
    }

    #[test]
    fn order_room_is_unrestricted_since_orders_are_not_identities() {
        assert!(may_join("order:123", "technician", 7).is_ok());
    }

    #[test]
    fn city_room_is_open() {
        assert!(may_join("city:moscow", "technician", 7).is_ok());
    }

    #[test]
    fn invalid_room_name_rejected_before_acl() {
        assert_eq!(may_join("city:Нск", "director", 7), Err(RoomError::InvalidName));
    }

    #[test]
    fn presence_scope_adds_operators_only_for_operator_roles() {
        assert_eq!(presence_scope_rooms("technician"), vec!["directors"]);
        assert_eq!(presence_scope_rooms("operator"), vec!["directors", "operators"]);
        assert_eq!(
            presence_scope_rooms("callcentre_operator"),
            vec!["directors", "operators"]
        );
        assert_eq!(presence_scope_rooms("director"), vec!["directors"]);
    }
}
