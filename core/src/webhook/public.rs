//! `/broadcast/*` — the unauthenticated-except-for-shared-secret publish
//! endpoints (spec.md 4.5, 6).

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use relay_shared::errors::AppResult;
use relay_shared::types::api::ApiResponse;
use serde::Deserialize;
use serde_json::Value;

use crate::rooms;
use crate::state::AppState;
use crate::telegram;
use crate::webhook::require_webhook_secret;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/broadcast/call-new", post(call_new))
        .route("/broadcast/call-updated", post(call_updated))
        .route("/broadcast/call-ended", post(call_ended))
        .route("/broadcast/order-new", post(order_new))
        .route("/broadcast/order-updated", post(order_updated))
        .route("/broadcast/notification", post(notification))
        .route("/broadcast/avito-event", post(avito_event))
}

#[derive(Debug, Deserialize)]
struct CallRequest {
    token: String,
    call: Value,
    #[serde(default)]
    rooms: Option<Vec<String>>,
}

fn call_rooms(call: &Value, override_rooms: &Option<Vec<String>>) -> Vec<String> {
    if let Some(rooms) = override_rooms {
        return rooms.clone();
    }
    let mut rooms = vec!["operators".to_string()];
    if let Some(operator_id) = call.get("operatorId").and_then(Value::as_i64) {
        rooms.push(format!("operator:{operator_id}"));
    }
    rooms
}

async fn broadcast_call(state: &Arc<AppState>, event: &str, req: CallRequest) -> AppResult<()> {
    require_webhook_secret(&state.config.webhook_token, &req.token)?;
    let rooms = call_rooms(&req.call, &req.rooms);
    for room in rooms {
        rooms::broadcast_to_room(&state.registry, &state.bus, &room, event, req.call.clone()).await;
    }
    Ok(())
}

async fn call_new(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CallRequest>,
) -> AppResult<Json<ApiResponse<bool>>> {
    broadcast_call(&state, "call:new", req).await?;
    Ok(Json(ApiResponse::ok(true)))
}

async fn call_updated(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CallRequest>,
) -> AppResult<Json<ApiResponse<bool>>> {
    broadcast_call(&state, "call:updated", req).await?;
    Ok(Json(ApiResponse::ok(true)))
}

async fn call_ended(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CallRequest>,
) -> AppResult<Json<ApiResponse<bool>>> {
    broadcast_call(&state, "call:ended", req).await?;
    Ok(Json(ApiResponse::ok(true)))
}

#[derive(Debug, Deserialize)]
struct OrderRequest {
    token: String,
    order: Value,
    #[serde(default)]
    city: Option<String>,
    #[serde(rename = "masterId", default)]
    master_id: Option<String>,
}

fn order_rooms(order: &Value, city: &Option<String>, master_id: &Option<String>, is_update: bool) -> Vec<String> {
    let mut rooms = vec!["operators".to_string(), "directors".to_string()];
    if let Some(city) = city {
        rooms.push(format!("city:{city}"));
    }
    if let Some(master_id) = master_id {
        rooms.push(format!("master:{master_id}"));
    }
    if is_update {
        if let Some(id) = order.get("id").and_then(Value::as_i64) {
            rooms.push(format!("order:{id}"));
        }
    }
    rooms
}

async fn broadcast_order(state: &Arc<AppState>, event: &str, req: OrderRequest, is_update: bool) -> AppResult<()> {
    require_webhook_secret(&state.config.webhook_token, &req.token)?;
    let rooms = order_rooms(&req.order, &req.city, &req.master_id, is_update);
    for room in rooms {
        rooms::broadcast_to_room(&state.registry, &state.bus, &room, event, req.order.clone()).await;
    }
    Ok(())
}

async fn order_new(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OrderRequest>,
) -> AppResult<Json<ApiResponse<bool>>> {
    broadcast_order(&state, "order:new", req, false).await?;
    Ok(Json(ApiResponse::ok(true)))
}

async fn order_updated(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OrderRequest>,
) -> AppResult<Json<ApiResponse<bool>>> {
    broadcast_order(&state, "order:updated", req, true).await?;
    Ok(Json(ApiResponse::ok(true)))
}

#[derive(Debug, Deserialize)]
struct NotificationRequest {
    token: String,
    #[serde(rename = "userId", default)]
    user_id: Option<i64>,
    #[serde(default)]
    rooms: Vec<String>,
    data: Value,
}

async fn notification(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NotificationRequest>,
) -> AppResult<Json<ApiResponse<bool>>> {
    require_webhook_secret(&state.config.webhook_token, &req.token)?;

    if let Some(user_id) = req.user_id {
        rooms::broadcast_to_user(&state.registry, user_id, "notification", &req.data);
    } else if !req.rooms.is_empty() {
        for room in &req.rooms {
            rooms::broadcast_to_room(&state.registry, &state.bus, room, "notification", req.data.clone()).await;
        }
    } else {
        rooms::broadcast_to_all(&state.registry, &state.bus, "notification", req.data).await;
    }

    Ok(Json(ApiResponse::ok(true)))
}

#[derive(Debug, Deserialize)]
struct AvitoEventRequest {
    token: String,
    #[serde(rename = "type")]
    kind: String,
    data: Value,
}

async fn avito_event(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AvitoEventRequest>,
) -> AppResult<Json<ApiResponse<bool>>> {
    require_webhook_secret(&state.config.webhook_token, &req.token)?;

    let event = match req.kind.as_str() {
        "new-message" => "avito-new-message",
        "chat-updated" => "avito-chat-updated",
        _ => "avito-notification",
    };

    rooms::broadcast_to_all(&state.registry, &state.bus, event, req.data.clone()).await;

    if event == "avito-new-message" {
        telegram::spawn_relay(state.clone(), req.data);
    }

    Ok(Json(ApiResponse::ok(true)))
}
