//! Fire-and-forget Telegram relay for `avito-new-message` events.
//!
//! Dispatched from a detached task so a slow or failing Telegram API call
//! never stalls the webhook response (spec.md 251: "wrap them in independent
//! tasks with their own error handling").

use serde_json::Value;

use crate::state::AppState;

pub fn spawn_relay(state: std::sync::Arc<AppState>, data: Value) {
    if !state.config.telegram_configured() {
        return;
    }

    tokio::spawn(async move {
        if let Err(e) = relay(&state, &data).await {
            tracing::warn!(error = %e, "telegram relay failed");
        }
    });
}

async fn relay(state: &AppState, data: &Value) -> anyhow::Result<()> {
    let bot_token = state
        .config
        .telegram_bot_token
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("telegram bot token not configured"))?;
    let chat_id = state
        .config
        .telegram_chat_id
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("telegram chat id not configured"))?;

    let text = format_message(data);
    let url = format!("https://api.telegram.org/bot{bot_token}/sendMessage");

    let resp = state
        .http_client
        .post(&url)
        .json(&serde_json::json!({ "chat_id": chat_id, "text": text }))
        .send()
        .await?;

    if !resp.status().is_success() {
        anyhow::bail!("telegram api returned {}", resp.status());
    }

    Ok(())
}

fn format_message(data: &Value) -> String {
    let from = data.get("from").and_then(Value::as_str).unwrap_or("unknown");
    let text = data.get("text").and_then(Value::as_str).unwrap_or("");
    format!("New Avito message from {from}: {text}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_message_from_known_fields() {
        let data = serde_json::json!({ "from": "client-42", "text": "hello" });
        assert_eq!(format_message(&data), "New Avito message from client-42: hello");
    }

    #[test]
    fn formats_message_with_missing_fields() {
        let data = serde_json::json!({});
        assert_eq!(format_message(&data), "New Avito message from unknown: ");
    }
}
