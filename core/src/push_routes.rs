//! HTTP surface for Web Push subscriptions and preferences (spec.md 6),
//! adapted from zhubby-moltis's push_routes.rs to this crate's per-user /
//! per-master namespaces and our own `AppResult` error convention.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use chrono::Utc;
use relay_shared::errors::{AppError, AppResult};
use relay_shared::types::api::ApiResponse;
use relay_shared::types::auth::AuthedUser;
use serde::{Deserialize, Serialize};

use crate::push::{PushPayload, PushPreferences, PushSubscription};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/push/vapid-key", get(vapid_key))
        .route("/push/subscribe", post(subscribe))
        .route("/push/unsubscribe", post(unsubscribe))
        .route("/push/settings", get(get_settings).patch(patch_settings))
        .route("/push/test", post(send_test))
        .route("/push/master/subscribe", post(subscribe_master))
        .route("/push/master/unsubscribe", post(unsubscribe_master))
}

#[derive(Debug, Serialize)]
struct VapidKeyResponse {
    #[serde(rename = "publicKey")]
    public_key: String,
}

async fn vapid_key(State(state): State<Arc<AppState>>) -> AppResult<Json<ApiResponse<VapidKeyResponse>>> {
    let key = state
        .push
        .vapid_public_key()
        .ok_or_else(|| AppError::internal("vapid keys not configured"))?
        .to_string();
    Ok(Json(ApiResponse::ok(VapidKeyResponse { public_key: key })))
}

#[derive(Debug, Deserialize)]
struct SubscribeRequest {
    endpoint: String,
    keys: SubscriptionKeysPayload,
}

#[derive(Debug, Deserialize)]
struct SubscriptionKeysPayload {
    p256dh: String,
    auth: String,
}

#[derive(Debug, Deserialize)]
struct UnsubscribeRequest {
    endpoint: String,
}

async fn subscribe(
    State(state): State<Arc<AppState>>,
    auth_user: AuthedUser,
    Json(body): Json<SubscribeRequest>,
) -> AppResult<Json<ApiResponse<bool>>> {
    let sub = PushSubscription {
        endpoint: body.endpoint,
        p256dh: body.keys.p256dh,
        auth: body.keys.auth,
        created_at: Utc::now().timestamp_millis(),
    };
    state
        .push
        .subscribe_user(auth_user.user_id, sub)
        .await
        .map_err(AppError::internal)?;
    Ok(Json(ApiResponse::ok(true)))
}

async fn unsubscribe(
    State(state): State<Arc<AppState>>,
    auth_user: AuthedUser,
    Json(body): Json<UnsubscribeRequest>,
) -> AppResult<Json<ApiResponse<bool>>> {
    state
        .push
        .unsubscribe_user(auth_user.user_id, &body.endpoint)
        .await
        .map_err(AppError::internal)?;
    Ok(Json(ApiResponse::ok(true)))
}

#[derive(Debug, Deserialize)]
struct MasterSubscribeRequest {
    #[serde(rename = "masterId")]
    master_id: String,
    endpoint: String,
    keys: SubscriptionKeysPayload,
}

async fn subscribe_master(
    State(state): State<Arc<AppState>>,
    _auth_user: AuthedUser,
    Json(body): Json<MasterSubscribeRequest>,
) -> AppResult<Json<ApiResponse<bool>>> {
    let sub = PushSubscription {
        endpoint: body.endpoint,
        p256dh: body.keys.p256dh,
        auth: body.keys.auth,
        created_at: Utc::now().timestamp_millis(),
    };
    state
        .push
        .subscribe_master(&body.master_id, sub)
        .await
        .map_err(AppError::internal)?;
    Ok(Json(ApiResponse::ok(true)))
}

#[derive(Debug, Deserialize)]
struct MasterUnsubscribeRequest {
    #[serde(rename = "masterId")]
    master_id: String,
    endpoint: String,
}

async fn unsubscribe_master(
    State(state): State<Arc<AppState>>,
    _auth_user: AuthedUser,
    Json(body): Json<MasterUnsubscribeRequest>,
) -> AppResult<Json<ApiResponse<bool>>> {
    state
        .push
        .unsubscribe_master(&body.master_id, &body.endpoint)
        .await
        .map_err(AppError::internal)?;
    Ok(Json(ApiResponse::ok(true)))
}

/// `enabled` is derived from subscription count, never accepted from the
/// client; see `PushPreferences`.
#[derive(Debug, Serialize)]
struct PushSettingsResponse {
    enabled: bool,
    #[serde(rename = "callIncoming")]
    call_incoming: bool,
    #[serde(rename = "callMissed")]
    call_missed: bool,
}

impl PushSettingsResponse {
    fn from(prefs: PushPreferences, enabled: bool) -> Self {
        Self {
            enabled,
            call_incoming: prefs.call_incoming,
            call_missed: prefs.call_missed,
        }
    }
}

async fn get_settings(
    State(state): State<Arc<AppState>>,
    auth_user: AuthedUser,
) -> AppResult<Json<ApiResponse<PushSettingsResponse>>> {
    let prefs = state.push.preferences(auth_user.user_id).await.map_err(AppError::internal)?;
    let enabled = state
        .push
        .has_subscriptions(auth_user.user_id)
        .await
        .map_err(AppError::internal)?;
    Ok(Json(ApiResponse::ok(PushSettingsResponse::from(prefs, enabled))))
}

async fn patch_settings(
    State(state): State<Arc<AppState>>,
    auth_user: AuthedUser,
    Json(prefs): Json<PushPreferences>,
) -> AppResult<Json<ApiResponse<PushSettingsResponse>>> {
    state
        .push
        .set_preferences(auth_user.user_id, &prefs)
        .await
        .map_err(AppError::internal)?;
    let enabled = state
        .push
        .has_subscriptions(auth_user.user_id)
        .await
        .map_err(AppError::internal)?;
    Ok(Json(ApiResponse::ok(PushSettingsResponse::from(prefs, enabled))))
}

async fn send_test(
    State(state): State<Arc<AppState>>,
    auth_user: AuthedUser,
) -> AppResult<Json<ApiResponse<usize>>> {
    let payload = PushPayload {
        title: "Test notification".to_string(),
        body: "Push notifications are configured correctly.".to_string(),
        icon: None,
        badge: None,
        tag: Some("test".to_string()),
        kind: "test".to_string(),
        url: None,
        order_id: None,
        data: None,
    };
    let sent = state
        .push
        .send_to_user(auth_user.user_id, payload)
        .await
        .map_err(AppError::internal)?;
    Ok(Json(ApiResponse::ok(sent)))
}
