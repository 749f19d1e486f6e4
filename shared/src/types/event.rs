use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire format carried over the cross-instance bus channel.
///
/// Every instance publishes and subscribes to the same channel; a message
/// is addressed either to a room or to the whole fleet, and always carries
/// the instance id that produced it so the originator can drop its own echo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEnvelope {
    pub event: String,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    #[serde(rename = "originInstanceId")]
    pub origin_instance_id: String,
}

impl BusEnvelope {
    pub fn new(event: impl Into<String>, data: Value, origin_instance_id: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data,
            room: None,
            origin_instance_id: origin_instance_id.into(),
        }
    }

    pub fn for_room(mut self, room: impl Into<String>) -> Self {
        self.room = Some(room.into());
        self
    }
}
