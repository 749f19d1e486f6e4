//! HTTP surface for the notification inbox (spec.md 6), mirroring
//! `broz-notification`'s routes/notifications.rs route shapes but matching
//! this service's committed response shapes exactly.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use relay_shared::errors::{AppError, AppResult};
use relay_shared::types::api::ApiResponse;
use relay_shared::types::auth::AuthedUser;
use relay_shared::types::pagination::PaginationParams;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::inbox::{self, Notification};
use crate::rooms;
use crate::state::AppState;
use crate::webhook::require_webhook_secret;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/notifications", get(list).delete(clear_all))
        .route("/notifications/unread-count", get(unread_count))
        .route("/notifications/read", post(mark_read))
        .route("/notifications/read-all", post(mark_all_read))
        .route("/notifications/:id", delete(delete_one))
        .route("/notifications/internal/create", post(internal_create))
        .route("/notifications/internal/notify-users", post(internal_notify_users))
        .route("/notifications/internal/notify-room", post(internal_notify_room))
        .route("/notifications/internal/operator/call", post(internal_operator_call))
        .route("/notifications/internal/operator/order", post(internal_operator_order))
        .route("/notifications/internal/directors/city", post(internal_directors_city))
        .route("/notifications/internal/master", post(internal_master))
        .route("/notifications/internal/system", post(internal_system))
}

#[derive(Debug, Serialize)]
struct ListResponse {
    notifications: Vec<Notification>,
    #[serde(rename = "unreadCount")]
    unread_count: i64,
}

async fn list(
    State(state): State<Arc<AppState>>,
    auth_user: AuthedUser,
    Query(params): Query<PaginationParams>,
) -> AppResult<Json<ApiResponse<ListResponse>>> {
    let limit = params.limit() as isize;
    let offset = params.offset() as isize;
    let notifications = inbox::list(&state.redis, auth_user.user_id, limit, offset).await?;
    let unread_count = inbox::unread_count(&state.redis, auth_user.user_id).await?;
    Ok(Json(ApiResponse::ok(ListResponse {
        notifications,
        unread_count,
    })))
}

#[derive(Debug, Serialize)]
struct UnreadCountResponse {
    count: i64,
}

async fn unread_count(
    State(state): State<Arc<AppState>>,
    auth_user: AuthedUser,
) -> AppResult<Json<ApiResponse<UnreadCountResponse>>> {
    let count = inbox::unread_count(&state.redis, auth_user.user_id).await?;
    Ok(Json(ApiResponse::ok(UnreadCountResponse { count })))
}

#[derive(Debug, Deserialize)]
struct MarkReadRequest {
    #[serde(rename = "notificationId")]
    notification_id: String,
}

async fn mark_read(
    State(state): State<Arc<AppState>>,
    auth_user: AuthedUser,
    Json(body): Json<MarkReadRequest>,
) -> AppResult<Json<ApiResponse<Option<Notification>>>> {
    let updated = inbox::mark_read(&state.redis, &state.registry, auth_user.user_id, &body.notification_id).await?;
    Ok(Json(ApiResponse::ok(updated)))
}

#[derive(Debug, Serialize)]
struct MarkAllReadResponse {
    updated: usize,
}

async fn mark_all_read(
    State(state): State<Arc<AppState>>,
    auth_user: AuthedUser,
) -> AppResult<Json<ApiResponse<MarkAllReadResponse>>> {
    let updated = inbox::mark_all_read(&state.redis, &state.registry, auth_user.user_id).await?;
    Ok(Json(ApiResponse::ok(MarkAllReadResponse { updated })))
}

async fn delete_one(
    State(state): State<Arc<AppState>>,
    auth_user: AuthedUser,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<bool>>> {
    let deleted = inbox::delete(&state.redis, auth_user.user_id, &id).await?;
    if !deleted {
        return Err(AppError::not_found("notification not found"));
    }
    Ok(Json(ApiResponse::ok(true)))
}

async fn clear_all(
    State(state): State<Arc<AppState>>,
    auth_user: AuthedUser,
) -> AppResult<Json<ApiResponse<bool>>> {
    inbox::clear_all(&state.redis, &state.registry, auth_user.user_id).await?;
    Ok(Json(ApiResponse::ok(true)))
}

#[derive(Debug, Deserialize)]
struct InternalCreateRequest {
    token: String,
    #[serde(rename = "userId")]
    user_id: i64,
    #[serde(rename = "type")]
    kind: String,
    title: String,
    message: String,
    #[serde(rename = "orderId")]
    order_id: Option<i64>,
    data: Option<Value>,
}

async fn internal_create(
    State(state): State<Arc<AppState>>,
    Json(body): Json<InternalCreateRequest>,
) -> AppResult<Json<ApiResponse<Notification>>> {
    require_webhook_secret(&state.config.webhook_token, &body.token)?;
    let notification = inbox::create(
        &state.redis,
        &state.registry,
        body.user_id,
        body.kind,
        body.title,
        body.message,
        body.order_id,
        body.data,
    )
    .await?;
    Ok(Json(ApiResponse::ok(notification)))
}

#[derive(Debug, Deserialize)]
struct NotifyUsersRequest {
    token: String,
    #[serde(rename = "userIds")]
    user_ids: Vec<i64>,
    #[serde(rename = "type")]
    kind: String,
    title: String,
    message: String,
    #[serde(rename = "orderId")]
    order_id: Option<i64>,
    data: Option<Value>,
}

async fn internal_notify_users(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NotifyUsersRequest>,
) -> AppResult<Json<ApiResponse<usize>>> {
    require_webhook_secret(&state.config.webhook_token, &body.token)?;
    for user_id in &body.user_ids {
        inbox::create(
            &state.redis,
            &state.registry,
            *user_id,
            body.kind.clone(),
            body.title.clone(),
            body.message.clone(),
            body.order_id,
            body.data.clone(),
        )
        .await?;
    }
    Ok(Json(ApiResponse::ok(body.user_ids.len())))
}

#[derive(Debug, Deserialize)]
struct NotifyRoomRequest {
    token: String,
    room: String,
    #[serde(rename = "type")]
    kind: String,
    title: String,
    message: String,
    data: Option<Value>,
}

/// Ephemeral room broadcast, not written to any per-user inbox: there is no
/// single owning user for a room-scoped notice.
async fn internal_notify_room(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NotifyRoomRequest>,
) -> AppResult<Json<ApiResponse<bool>>> {
    require_webhook_secret(&state.config.webhook_token, &body.token)?;
    let payload = serde_json::json!({
        "type": body.kind,
        "title": body.title,
        "message": body.message,
        "data": body.data,
    });
    rooms::broadcast_to_room(&state.registry, &state.bus, &body.room, "notification", payload).await;
    Ok(Json(ApiResponse::ok(true)))
}

#[derive(Debug, Deserialize)]
struct OperatorCallRequest {
    token: String,
    #[serde(rename = "operatorId")]
    operator_id: i64,
    title: String,
    message: String,
    data: Option<Value>,
}

async fn internal_operator_call(
    State(state): State<Arc<AppState>>,
    Json(body): Json<OperatorCallRequest>,
) -> AppResult<Json<ApiResponse<Notification>>> {
    require_webhook_secret(&state.config.webhook_token, &body.token)?;
    let notification = inbox::create(
        &state.redis,
        &state.registry,
        body.operator_id,
        "call",
        body.title,
        body.message,
        None,
        body.data,
    )
    .await?;
    Ok(Json(ApiResponse::ok(notification)))
}

#[derive(Debug, Deserialize)]
struct OperatorOrderRequest {
    token: String,
    #[serde(rename = "operatorId")]
    operator_id: i64,
    #[serde(rename = "orderId")]
    order_id: i64,
    title: String,
    message: String,
    data: Option<Value>,
}

async fn internal_operator_order(
    State(state): State<Arc<AppState>>,
    Json(body): Json<OperatorOrderRequest>,
) -> AppResult<Json<ApiResponse<Notification>>> {
    require_webhook_secret(&state.config.webhook_token, &body.token)?;
    let notification = inbox::create(
        &state.redis,
        &state.registry,
        body.operator_id,
        "order",
        body.title,
        body.message,
        Some(body.order_id),
        body.data,
    )
    .await?;
    Ok(Json(ApiResponse::ok(notification)))
}

#[derive(Debug, Deserialize)]
struct DirectorsCityRequest {
    token: String,
    city: String,
    title: String,
    message: String,
    data: Option<Value>,
}

/// Directors don't have a per-city durable inbox; this is scoped delivery
/// to the `directors` room with the city embedded in the payload.
async fn internal_directors_city(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DirectorsCityRequest>,
) -> AppResult<Json<ApiResponse<bool>>> {
    require_webhook_secret(&state.config.webhook_token, &body.token)?;
    let payload = serde_json::json!({
        "type": "city",
        "city": body.city,
        "title": body.title,
        "message": body.message,
        "data": body.data,
    });
    rooms::broadcast_to_room(&state.registry, &state.bus, "directors", "notification", payload).await;
    Ok(Json(ApiResponse::ok(true)))
}

#[derive(Debug, Deserialize)]
struct MasterRequest {
    token: String,
    #[serde(rename = "masterId")]
    master_id: String,
    title: String,
    message: String,
    data: Option<Value>,
}

/// `masterId` names an external identity with no `int64` userId mapping in
/// this service (see the notifyMaster open question), so this is an
/// ephemeral room broadcast to `master:<masterId>` rather than a durable
/// inbox write.
async fn internal_master(
    State(state): State<Arc<AppState>>,
    Json(body): Json<MasterRequest>,
) -> AppResult<Json<ApiResponse<bool>>> {
    require_webhook_secret(&state.config.webhook_token, &body.token)?;
    let room = format!("master:{}", body.master_id);
    let payload = serde_json::json!({
        "type": "master",
        "title": body.title,
        "message": body.message,
        "data": body.data,
    });
    rooms::broadcast_to_room(&state.registry, &state.bus, &room, "notification", payload).await;
    Ok(Json(ApiResponse::ok(true)))
}

#[derive(Debug, Deserialize)]
struct SystemRequest {
    token: String,
    title: String,
    message: String,
    data: Option<Value>,
}

async fn internal_system(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SystemRequest>,
) -> AppResult<Json<ApiResponse<bool>>> {
    require_webhook_secret(&state.config.webhook_token, &body.token)?;
    let payload = serde_json::json!({
        "type": "system",
        "title": body.title,
        "message": body.message,
        "data": body.data,
    });
    rooms::broadcast_to_all(&state.registry, &state.bus, "notification", payload).await;
    Ok(Json(ApiResponse::ok(true)))
}
