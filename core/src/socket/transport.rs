use serde_json::Value;
use socketioxide::extract::SocketRef;

use crate::registry::Emitter;

/// `SocketRef` wrapped to satisfy `Emitter`, so the registry's broadcast
/// logic never depends on `socketioxide` types directly and can be
/// exercised in tests with a fake.
#[derive(Clone)]
pub struct SocketEmitter(pub SocketRef);

impl Emitter for SocketEmitter {
    fn emit_json(&self, event: &str, data: &Value) {
        if let Err(e) = self.0.emit(event.to_string(), data) {
            tracing::warn!(error = %e, event = %event, "socket emit failed");
        }
    }

    fn close(&self) {
        let _ = self.0.disconnect();
    }

    fn is_connected(&self) -> bool {
        self.0.connected()
    }
}
