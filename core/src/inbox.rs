//! C7 — notification inbox.
//!
//! Plain functions over a `RedisClient`, in the style of
//! `broz-notification`'s service module, adapted from a Diesel table to a
//! Redis ordered set per user (spec.md 4.6). Creation-time milliseconds is
//! the rank key; the unread counter lives at a sibling key so unread-count
//! reads never scan the set.

use chrono::Utc;
use relay_shared::clients::RedisClient;
use relay_shared::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::registry::{Emitter, Registry};
use crate::rooms;

pub const INBOX_MAX: isize = 50;
pub const INBOX_TTL_SECS: i64 = 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub message: String,
    #[serde(rename = "orderId", skip_serializing_if = "Option::is_none")]
    pub order_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub read: bool,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
}

fn inbox_key(user_id: i64) -> String {
    format!("ui:notifications:{user_id}")
}

fn unread_key(user_id: i64) -> String {
    format!("ui:notifications:unread:{user_id}")
}

/// Create a notification, trim to `INBOX_MAX`, refresh TTL, bump the unread
/// counter, and dispatch `notification:new` to the owner's sockets.
pub async fn create<E: Emitter>(
    redis: &RedisClient,
    registry: &Registry<E>,
    user_id: i64,
    kind: impl Into<String>,
    title: impl Into<String>,
    message: impl Into<String>,
    order_id: Option<i64>,
    data: Option<Value>,
) -> AppResult<Notification> {
    let created_at = Utc::now().timestamp_millis();
    let notification = Notification {
        id: uuid::Uuid::new_v4().to_string(),
        kind: kind.into(),
        title: title.into(),
        message: message.into(),
        order_id,
        data,
        read: false,
        created_at,
    };

    let key = inbox_key(user_id);
    let encoded = serde_json::to_string(&notification)
        .map_err(|e| AppError::internal(format!("failed to encode notification: {e}")))?;

    redis.zadd(&key, &encoded, created_at as f64).await?;
    redis.expire(&key, INBOX_TTL_SECS).await?;

    if redis.zcard(&key).await? as isize > INBOX_MAX {
        redis.zremrangebyrank(&key, 0, -(INBOX_MAX + 1)).await?;
    }

    let counter_key = unread_key(user_id);
    redis.incr(&counter_key).await?;
    redis.expire(&counter_key, INBOX_TTL_SECS).await?;

    let payload = serde_json::to_value(&notification)
        .map_err(|e| AppError::internal(format!("failed to serialize notification: {e}")))?;
    rooms::broadcast_to_user(registry, user_id, "notification:new", &payload);

    Ok(notification)
}

/// Newest-first slice. Undecodable entries are skipped rather than failing
/// the whole list.
pub async fn list(redis: &RedisClient, user_id: i64, limit: isize, offset: isize) -> AppResult<Vec<Notification>> {
    let key = inbox_key(user_id);
    let raw = redis.zrevrange(&key, offset, offset + limit - 1).await?;
    Ok(raw
        .into_iter()
        .filter_map(|entry| serde_json::from_str(&entry).ok())
        .collect())
}

/// Absent or non-numeric counter reads as zero.
pub async fn unread_count(redis: &RedisClient, user_id: i64) -> AppResult<i64> {
    match redis.get(&unread_key(user_id)).await? {
        Some(raw) => Ok(raw.parse().unwrap_or(0)),
        None => Ok(0),
    }
}

async fn all_raw(redis: &RedisClient, user_id: i64) -> AppResult<Vec<String>> {
    Ok(redis.zrange(&inbox_key(user_id), 0, -1).await?)
}

/// Locates the entry by id, and if unread, replaces it with a `read=true`
/// copy at the same rank and decrements the counter; emits
/// `notification:read`. No-op if the id is absent or already read.
pub async fn mark_read<E: Emitter>(
    redis: &RedisClient,
    registry: &Registry<E>,
    user_id: i64,
    notification_id: &str,
) -> AppResult<Option<Notification>> {
    let key = inbox_key(user_id);
    for raw in all_raw(redis, user_id).await? {
        let Ok(mut notification) = serde_json::from_str::<Notification>(&raw) else {
            continue;
        };
        if notification.id != notification_id {
            continue;
        }
        if notification.read {
            return Ok(Some(notification));
        }

        redis.zrem(&key, &raw).await?;
        notification.read = true;
        let encoded = serde_json::to_string(&notification)
            .map_err(|e| AppError::internal(format!("failed to encode notification: {e}")))?;
        redis.zadd(&key, &encoded, notification.created_at as f64).await?;

        decrement_unread(redis, user_id).await?;

        let payload = serde_json::to_value(&notification)
            .map_err(|e| AppError::internal(format!("failed to serialize notification: {e}")))?;
        rooms::broadcast_to_user(registry, user_id, "notification:read", &payload);

        return Ok(Some(notification));
    }
    Ok(None)
}

/// Rewrites every entry as `read=true` at its original rank, zeroes the
/// counter, emits `notification:all_read`.
pub async fn mark_all_read<E: Emitter>(redis: &RedisClient, registry: &Registry<E>, user_id: i64) -> AppResult<usize> {
    let key = inbox_key(user_id);
    let raw_entries = all_raw(redis, user_id).await?;
    if raw_entries.is_empty() {
        return Ok(0);
    }

    redis.del(&key).await?;

    let mut updated = 0usize;
    for raw in &raw_entries {
        let Ok(mut notification) = serde_json::from_str::<Notification>(raw) else {
            continue;
        };
        if !notification.read {
            updated += 1;
        }
        notification.read = true;
        let encoded = serde_json::to_string(&notification)
            .map_err(|e| AppError::internal(format!("failed to encode notification: {e}")))?;
        redis.zadd(&key, &encoded, notification.created_at as f64).await?;
    }
    redis.expire(&key, INBOX_TTL_SECS).await?;

    redis.del(&unread_key(user_id)).await?;

    rooms::broadcast_to_user(registry, user_id, "notification:all_read", &serde_json::json!({}));

    Ok(updated)
}

/// Removes by value; decrements the counter if the removed entry was
/// unread. No socket event in the base contract.
pub async fn delete(redis: &RedisClient, user_id: i64, notification_id: &str) -> AppResult<bool> {
    let key = inbox_key(user_id);
    for raw in all_raw(redis, user_id).await? {
        let Ok(notification) = serde_json::from_str::<Notification>(&raw) else {
            continue;
        };
        if notification.id != notification_id {
            continue;
        }
        redis.zrem(&key, &raw).await?;
        if !notification.read {
            decrement_unread(redis, user_id).await?;
        }
        return Ok(true);
    }
    Ok(false)
}

/// Deletes both keys, emits `notification:cleared`.
pub async fn clear_all<E: Emitter>(redis: &RedisClient, registry: &Registry<E>, user_id: i64) -> AppResult<()> {
    redis.del(&inbox_key(user_id)).await?;
    redis.del(&unread_key(user_id)).await?;
    rooms::broadcast_to_user(registry, user_id, "notification:cleared", &serde_json::json!({}));
    Ok(())
}

async fn decrement_unread(redis: &RedisClient, user_id: i64) -> AppResult<()> {
    let key = unread_key(user_id);
    let next = redis.decr(&key).await?;
    if next < 0 {
        redis.set(&key, "0", INBOX_TTL_SECS as u64).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_serializes_camel_case_fields() {
        let n = Notification {
            id: "1".into(),
            kind: "call_incoming".into(),
            title: "t".into(),
            message: "m".into(),
            order_id: Some(42),
            data: None,
            read: false,
            created_at: 1000,
        };
        let v = serde_json::to_value(&n).unwrap();
        assert_eq!(v["orderId"], 42);
        assert_eq!(v["createdAt"], 1000);
        assert_eq!(v["type"], "call_incoming");
    }
}
