//! C8 — Web Push dispatcher.
//!
//! Subscriptions live in Redis hash maps, one per subject: `push:subscriptions:<userId>`,
//! `push:master:subscriptions:<masterId>`. Director subscriptions reuse the user
//! namespace (spec.md 4.7). VAPID keys are generated at boot if not supplied via
//! configuration, the way zhubby-moltis's gateway push module generates them on
//! first run.

use base64::Engine;
use p256::ecdsa::SigningKey;
use p256::elliptic_curve::rand_core::OsRng;
use p256::pkcs8::EncodePrivateKey;
use p256::PublicKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use web_push::{
    ContentEncoding, IsahcWebPushClient, SubscriptionInfo, SubscriptionKeys, VapidSignatureBuilder,
    WebPushClient, WebPushMessageBuilder,
};

use relay_shared::clients::RedisClient;

pub const MAX_DEVICES: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VapidKeys {
    pub public_key: String,
    pub private_key_pem: String,
}

impl VapidKeys {
    pub fn generate() -> anyhow::Result<Self> {
        let signing_key = SigningKey::random(&mut OsRng);
        let public_key = PublicKey::from(signing_key.verifying_key());
        let public_key_b64 =
            base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(public_key.to_sec1_bytes());
        let private_key_pem = signing_key
            .to_pkcs8_pem(p256::pkcs8::LineEnding::LF)
            .map_err(|e| anyhow::anyhow!("failed to encode vapid private key: {e}"))?;

        Ok(Self {
            public_key: public_key_b64,
            private_key_pem: private_key_pem.to_string(),
        })
    }

    pub fn from_config(public: &str, private_pem: &str) -> Self {
        Self {
            public_key: public.to_string(),
            private_key_pem: private_pem.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushSubscription {
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
    #[serde(default)]
    pub created_at: i64,
}

/// `enabled` is deliberately absent here: spec.md 3 and 4.7 define it as
/// derived (`|subscriptions| > 0`), never stored or client-settable. See
/// `PushDispatcher::has_subscriptions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushPreferences {
    #[serde(default = "default_true", rename = "callIncoming")]
    pub call_incoming: bool,
    #[serde(default = "default_true", rename = "callMissed")]
    pub call_missed: bool,
}

fn default_true() -> bool {
    true
}

impl Default for PushPreferences {
    fn default() -> Self {
        Self {
            call_incoming: true,
            call_missed: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub badge: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "orderId", skip_serializing_if = "Option::is_none")]
    pub order_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Stable short digest of a subscription endpoint, used as the field key in
/// the per-subject hash map so re-subscribing the same endpoint overwrites
/// rather than duplicates.
pub fn endpoint_hash(endpoint: &str) -> String {
    let digest = Sha256::digest(endpoint.as_bytes());
    hex::encode(&digest[..12])
}

fn user_subscriptions_key(user_id: i64) -> String {
    format!("push:subscriptions:{user_id}")
}

fn master_subscriptions_key(master_id: &str) -> String {
    format!("push:master:subscriptions:{master_id}")
}

fn user_preferences_key(user_id: i64) -> String {
    format!("push:preferences:{user_id}")
}

pub struct PushDispatcher {
    redis: RedisClient,
    vapid: Option<VapidKeys>,
    vapid_subject: String,
    client: IsahcWebPushClient,
}

impl PushDispatcher {
    pub fn new(redis: RedisClient, vapid: Option<VapidKeys>, vapid_subject: String) -> anyhow::Result<Self> {
        let client = IsahcWebPushClient::new()
            .map_err(|e| anyhow::anyhow!("failed to build web push client: {e}"))?;
        Ok(Self {
            redis,
            vapid,
            vapid_subject,
            client,
        })
    }

    pub fn vapid_public_key(&self) -> Option<&str> {
        self.vapid.as_ref().map(|v| v.public_key.as_str())
    }

    async fn add_subscription_to(&self, key: &str, sub: PushSubscription) -> anyhow::Result<()> {
        let field = endpoint_hash(&sub.endpoint);
        let encoded = serde_json::to_string(&sub)?;

        let existing = self.redis.hgetall(key).await?;
        if existing.len() >= MAX_DEVICES && !existing.contains_key(&field) {
            if let Some(oldest_field) = oldest_entry(&existing) {
                self.redis.hdel(key, &oldest_field).await?;
            }
        }

        self.redis.hset(key, &field, &encoded).await?;
        Ok(())
    }

    pub async fn subscribe_user(&self, user_id: i64, sub: PushSubscription) -> anyhow::Result<()> {
        self.add_subscription_to(&user_subscriptions_key(user_id), sub).await
    }

    pub async fn unsubscribe_user(&self, user_id: i64, endpoint: &str) -> anyhow::Result<()> {
        self.redis
            .hdel(&user_subscriptions_key(user_id), &endpoint_hash(endpoint))
            .await?;
        Ok(())
    }

    pub async fn subscribe_master(&self, master_id: &str, sub: PushSubscription) -> anyhow::Result<()> {
        self.add_subscription_to(&master_subscriptions_key(master_id), sub).await
    }

    pub async fn unsubscribe_master(&self, master_id: &str, endpoint: &str) -> anyhow::Result<()> {
        self.redis
            .hdel(&master_subscriptions_key(master_id), &endpoint_hash(endpoint))
            .await?;
        Ok(())
    }

    pub async fn preferences(&self, user_id: i64) -> anyhow::Result<PushPreferences> {
        let raw = self.redis.hgetall(&user_preferences_key(user_id)).await?;
        if raw.is_empty() {
            return Ok(PushPreferences::default());
        }
        Ok(PushPreferences {
            call_incoming: raw.get("callIncoming").map(|v| v == "true").unwrap_or(true),
            call_missed: raw.get("callMissed").map(|v| v == "true").unwrap_or(true),
        })
    }

    pub async fn set_preferences(&self, user_id: i64, prefs: &PushPreferences) -> anyhow::Result<()> {
        let key = user_preferences_key(user_id);
        self.redis
            .hset(&key, "callIncoming", &prefs.call_incoming.to_string())
            .await?;
        self.redis
            .hset(&key, "callMissed", &prefs.call_missed.to_string())
            .await?;
        Ok(())
    }

    /// Derives the `enabled` flag the HTTP layer reports: a subject with no
    /// registered endpoints has nothing to push to regardless of its stored
    /// preferences. Redis drops a hash key once its last field is removed,
    /// so `EXISTS` alone tells us whether any subscription remains.
    pub async fn has_subscriptions(&self, user_id: i64) -> anyhow::Result<bool> {
        Ok(self.redis.exists(&user_subscriptions_key(user_id)).await?)
    }

    /// Sends `payload` to every subscription under `key`, pruning any that
    /// the vendor reports as permanently gone (404/410).
    async fn send_to_namespace(&self, key: &str, payload: &PushPayload) -> anyhow::Result<usize> {
        let Some(vapid) = &self.vapid else {
            tracing::warn!("push send skipped: no vapid keys configured");
            return Ok(0);
        };

        let subs = self.redis.hgetall(key).await?;
        if subs.is_empty() {
            return Ok(0);
        }

        let payload_bytes = serde_json::to_vec(payload)?;
        let mut sent = 0usize;
        let mut gone = Vec::new();

        for (field, encoded) in subs {
            let sub: PushSubscription = match serde_json::from_str(&encoded) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(field = %field, error = %e, "undecodable push subscription, skipping");
                    continue;
                }
            };

            match self.send_one(vapid, &sub, &payload_bytes).await {
                Ok(()) => sent += 1,
                Err(e) => {
                    let status = e.to_string();
                    if status.contains("404") || status.contains("410") || status.contains("Gone") {
                        gone.push(field);
                    } else {
                        tracing::warn!(endpoint = %sub.endpoint, error = %e, "push send failed, not fatal");
                    }
                }
            }
        }

        for field in gone {
            self.redis.hdel(key, &field).await?;
        }

        Ok(sent)
    }

    async fn send_one(&self, vapid: &VapidKeys, sub: &PushSubscription, payload: &[u8]) -> anyhow::Result<()> {
        let info = SubscriptionInfo {
            endpoint: sub.endpoint.clone(),
            keys: SubscriptionKeys {
                p256dh: sub.p256dh.clone(),
                auth: sub.auth.clone(),
            },
        };

        let mut sig_builder = VapidSignatureBuilder::from_pem(vapid.private_key_pem.as_bytes(), &info)
            .map_err(|e| anyhow::anyhow!("vapid signature builder: {e}"))?;
        sig_builder.add_claim("sub", self.vapid_subject.clone());
        let signature = sig_builder
            .build()
            .map_err(|e| anyhow::anyhow!("vapid signature build: {e}"))?;

        let mut builder = WebPushMessageBuilder::new(&info);
        builder.set_payload(ContentEncoding::Aes128Gcm, payload);
        builder.set_vapid_signature(signature);
        let message = builder
            .build()
            .map_err(|e| anyhow::anyhow!("web push message build: {e}"))?;

        self.client
            .send(message)
            .await
            .map_err(|e| anyhow::anyhow!("web push send: {e}"))
    }

    /// `type == "call_incoming"`/`"call_missed"` respect the matching
    /// preference; `"test"` bypasses preferences; unknown types proceed.
    pub async fn send_to_user(&self, user_id: i64, payload: PushPayload) -> anyhow::Result<usize> {
        if payload.kind != "test" {
            if !self.has_subscriptions(user_id).await? {
                return Ok(0);
            }
            let prefs = self.preferences(user_id).await?;
            let gated = match payload.kind.as_str() {
                "call_incoming" => !prefs.call_incoming,
                "call_missed" => !prefs.call_missed,
                _ => false,
            };
            if gated {
                return Ok(0);
            }
        }

        self.send_to_namespace(&user_subscriptions_key(user_id), &payload).await
    }

    pub async fn send_to_master(&self, master_id: &str, payload: PushPayload) -> anyhow::Result<usize> {
        self.send_to_namespace(&master_subscriptions_key(master_id), &payload).await
    }
}

fn oldest_entry(subs: &std::collections::HashMap<String, String>) -> Option<String> {
    subs.iter()
        .filter_map(|(field, encoded)| {
            serde_json::from_str::<PushSubscription>(encoded)
                .ok()
                .map(|s| (field.clone(), s.created_at))
        })
        .min_by_key(|(_, created_at)| *created_at)
        .map(|(field, _)| field)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_hash_is_stable_and_short() {
        let a = endpoint_hash("https://fcm.googleapis.com/fcm/send/abc");
        let b = endpoint_hash("https://fcm.googleapis.com/fcm/send/abc");
        let c = endpoint_hash("https://fcm.googleapis.com/fcm/send/xyz");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 24);
    }

    #[test]
    fn oldest_entry_picks_min_created_at() {
        let mut subs = std::collections::HashMap::new();
        subs.insert(
            "f1".to_string(),
            serde_json::to_string(&PushSubscription {
                endpoint: "e1".into(),
                p256dh: "p".into(),
                auth: "a".into(),
                created_at: 200,
            })
            .unwrap(),
        );
        subs.insert(
            "f2".to_string(),
            serde_json::to_string(&PushSubscription {
                endpoint: "e2".into(),
                p256dh: "p".into(),
                auth: "a".into(),
                created_at: 100,
            })
            .unwrap(),
        );
        assert_eq!(oldest_entry(&subs), Some("f2".to_string()));
    }

    #[test]
    fn preferences_default_to_call_types_enabled() {
        let prefs = PushPreferences::default();
        assert!(prefs.call_incoming);
        assert!(prefs.call_missed);
    }
}
