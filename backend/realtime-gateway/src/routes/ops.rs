//! Operational endpoints: liveness, metrics, and manual publish/send for
//! producers and test tooling.

use actix_web::{delete, get, post, web, HttpResponse};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::AppResult;
use crate::metrics;
use crate::sse::SseMessage;
use crate::state::AppState;

#[get("/healthz")]
pub async fn healthz(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "live_connections": state.registry.live_count().await,
        "queued_messages": state.registry.queued_count().await,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

#[get("/metrics")]
pub async fn metrics_endpoint(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    metrics::set_connection_gauges(
        state.registry.live_count().await as i64,
        state.registry.queued_count().await as i64,
    );
    let body = metrics::render()?;
    Ok(HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(body))
}

#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    pub channel: String,
    pub message: Value,
}

#[post("/publish")]
pub async fn publish(state: web::Data<AppState>, body: web::Json<PublishRequest>) -> HttpResponse {
    let req = body.into_inner();
    state.bridge.publish(&req.channel, &req.message).await;
    HttpResponse::Accepted().json(json!({ "status": "published", "channel": req.channel }))
}

#[derive(Debug, Deserialize)]
pub struct DirectSendRequest {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub event: Option<String>,
    #[serde(default)]
    pub data: Value,
}

/// Direct send that bypasses the bridge. Reports whether at least one live
/// connection received the message.
#[post("/send")]
pub async fn send(state: web::Data<AppState>, body: web::Json<DirectSendRequest>) -> HttpResponse {
    let req = body.into_inner();
    let event = req.event.unwrap_or_else(|| "message".to_string());
    let delivered = state
        .registry
        .send_to_user(&req.user_id, &SseMessage::event(event, req.data))
        .await;
    HttpResponse::Ok().json(json!({ "delivered": delivered > 0, "count": delivered }))
}

#[delete("/queues/{user_id}")]
pub async fn clear_queue(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let dropped = state.registry.clear_queue(&path.into_inner()).await;
    HttpResponse::Ok().json(json!({ "dropped": dropped }))
}
