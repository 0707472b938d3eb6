//! Redis pub/sub bridge.
//!
//! Subscribes to the fixed channel set, classifies each inbound payload and
//! routes it into the registry. Pub/sub connections have no automatic
//! reconnect, so the listener owns an explicit capped-exponential backoff
//! loop that re-subscribes on every reconnect; until a subscribe succeeds the
//! bridge is degraded and inbound routing yields nothing.

use std::time::Duration;

use futures_util::StreamExt;
use redis::AsyncCommands;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::error::AppError;
use crate::metrics;
use crate::registry::ConnectionRegistry;
use crate::sse::SseMessage;

pub const CHAT_STREAM_CHANNEL: &str = "chat:stream";
pub const WORKFLOW_UPDATES_CHANNEL: &str = "workflow:updates";
pub const BROADCAST_CHANNEL: &str = "broadcast:all";

/// Fixed, process-wide subscription set. Not mutable at runtime.
pub const SUBSCRIBED_CHANNELS: [&str; 3] = [
    CHAT_STREAM_CHANNEL,
    WORKFLOW_UPDATES_CHANNEL,
    BROADCAST_CHANNEL,
];

/// Reconnect policy for the subscriber loop. Delay doubles per failed cycle
/// and is capped; a successful subscribe resets the attempt counter.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub multiplier: u32,
    pub cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            multiplier: 2,
            cap: Duration::from_secs(2),
        }
    }
}

impl BackoffPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt.min(16));
        self.base.saturating_mul(factor).min(self.cap)
    }
}

/// Classified inbound event type, decoded once at the bridge boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Token,
    Complete,
    Error,
    WorkflowUpdate,
    Heartbeat,
    Connected,
    Disconnect,
    Other(String),
}

impl EventKind {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "token" => EventKind::Token,
            "complete" => EventKind::Complete,
            "error" => EventKind::Error,
            "workflow-update" => EventKind::WorkflowUpdate,
            "heartbeat" => EventKind::Heartbeat,
            "connected" => EventKind::Connected,
            "disconnect" => EventKind::Disconnect,
            other => EventKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Token => "token",
            EventKind::Complete => "complete",
            EventKind::Error => "error",
            EventKind::WorkflowUpdate => "workflow-update",
            EventKind::Heartbeat => "heartbeat",
            EventKind::Connected => "connected",
            EventKind::Disconnect => "disconnect",
            EventKind::Other(name) => name,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WorkflowUpdate {
    #[serde(rename = "workflowId")]
    workflow_id: String,
    #[serde(rename = "userId")]
    user_id: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct BroadcastPayload {
    event: Option<String>,
    #[serde(default)]
    data: Value,
}

pub struct PubSubBridge {
    registry: ConnectionRegistry,
    client: redis::Client,
    backoff: BackoffPolicy,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl PubSubBridge {
    pub fn new(
        redis_url: &str,
        registry: ConnectionRegistry,
        backoff: BackoffPolicy,
    ) -> Result<Self, AppError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| AppError::Config(format!("invalid redis url: {e}")))?;
        Ok(Self {
            registry,
            client,
            backoff,
            listener: Mutex::new(None),
        })
    }

    /// Spawn the subscriber loop. Idempotent.
    pub async fn start(&self) {
        let mut guard = self.listener.lock().await;
        if guard.is_some() {
            return;
        }
        let client = self.client.clone();
        let registry = self.registry.clone();
        let backoff = self.backoff.clone();
        *guard = Some(tokio::spawn(run_listener(client, registry, backoff)));
    }

    /// Serialize and emit onto `channel`. Failures are logged, never raised,
    /// so a transient backbone hiccup cannot take a publisher down.
    pub async fn publish(&self, channel: &str, message: &Value) {
        let payload = message.to_string();
        match self.client.get_multiplexed_async_connection().await {
            Ok(mut conn) => {
                if let Err(e) = conn.publish::<_, _, ()>(channel, payload).await {
                    tracing::warn!(%channel, error = %e, "pub/sub publish failed");
                }
            }
            Err(e) => {
                tracing::warn!(%channel, error = %e, "pub/sub publish connection failed");
            }
        }
    }

    /// Stop the listener and drop backbone connections. Called on shutdown.
    pub async fn cleanup(&self) {
        if let Some(handle) = self.listener.lock().await.take() {
            handle.abort();
        }
        tracing::info!("pub/sub bridge shut down");
    }
}

async fn run_listener(
    client: redis::Client,
    registry: ConnectionRegistry,
    backoff: BackoffPolicy,
) {
    let mut attempt: u32 = 0;
    loop {
        match client.get_async_connection().await {
            Ok(conn) => {
                // PubSub requires a dedicated connection, not multiplexed
                let mut pubsub = conn.into_pubsub();
                match subscribe_all(&mut pubsub).await {
                    Ok(()) => {
                        attempt = 0;
                        tracing::info!(
                            channels = ?SUBSCRIBED_CHANNELS,
                            "subscribed to pub/sub channels"
                        );
                        let mut stream = pubsub.on_message();
                        while let Some(msg) = stream.next().await {
                            let channel = msg.get_channel_name().to_string();
                            let payload: String = match msg.get_payload() {
                                Ok(p) => p,
                                Err(e) => {
                                    metrics::INBOUND_DROPPED_TOTAL
                                        .with_label_values(&["malformed"])
                                        .inc();
                                    tracing::warn!(%channel, error = %e, "undecodable pub/sub payload");
                                    continue;
                                }
                            };
                            dispatch(&registry, &channel, &payload).await;
                        }
                        tracing::warn!("pub/sub stream ended, reconnecting");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "pub/sub subscribe failed, routing degraded until resubscribe");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "pub/sub connect failed, routing degraded until reconnect");
            }
        }
        let delay = backoff.delay(attempt);
        attempt = attempt.saturating_add(1);
        tokio::time::sleep(delay).await;
    }
}

async fn subscribe_all(pubsub: &mut redis::aio::PubSub) -> redis::RedisResult<()> {
    for channel in SUBSCRIBED_CHANNELS {
        pubsub.subscribe(channel).await?;
    }
    Ok(())
}

/// Decode, classify and route one inbound message. Malformed or unroutable
/// payloads are logged and dropped; nothing here can panic the listener.
pub async fn dispatch(registry: &ConnectionRegistry, channel: &str, raw: &str) {
    let payload: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            metrics::INBOUND_DROPPED_TOTAL
                .with_label_values(&["malformed"])
                .inc();
            tracing::warn!(%channel, error = %e, "dropping malformed pub/sub payload");
            return;
        }
    };
    match channel {
        CHAT_STREAM_CHANNEL => route_chat_stream(registry, payload).await,
        WORKFLOW_UPDATES_CHANNEL => route_workflow_update(registry, payload).await,
        BROADCAST_CHANNEL => route_broadcast(registry, payload).await,
        other => {
            metrics::INBOUND_DROPPED_TOTAL
                .with_label_values(&["unknown_channel"])
                .inc();
            tracing::warn!(channel = other, "message on unrecognized channel");
        }
    }
}

async fn route_chat_stream(registry: &ConnectionRegistry, payload: Value) {
    let Some(user_id) = payload.get("userId").and_then(Value::as_str).map(str::to_string) else {
        metrics::INBOUND_DROPPED_TOTAL
            .with_label_values(&["missing_user"])
            .inc();
        tracing::warn!("chat-stream payload without userId");
        return;
    };
    let trace_id = payload.get("traceId").and_then(Value::as_str).map(str::to_string);
    let kind = EventKind::parse(payload.get("type").and_then(Value::as_str).unwrap_or(""));
    let data = payload.get("data").cloned().unwrap_or(Value::Null);

    let message = match &kind {
        EventKind::Token => {
            let content = data.get("content").cloned().unwrap_or(data.clone());
            SseMessage::event("token", json!({ "content": content, "traceId": trace_id }))
        }
        EventKind::Complete => {
            // Final response plus provenance for the client to display
            let mut body = match data {
                Value::Object(map) => Value::Object(map),
                other => json!({ "response": other }),
            };
            if let Value::Object(map) = &mut body {
                map.insert("traceId".to_string(), json!(trace_id));
            }
            SseMessage::event("complete", body)
        }
        EventKind::Error => {
            SseMessage::event("error", json!({ "error": data, "traceId": trace_id }))
        }
        other => {
            // Unrecognized type: pass the original payload through untouched
            let name = match other.as_str() {
                "" => "message",
                name => name,
            };
            SseMessage::event(name, payload.clone())
        }
    };

    let delivered = registry.send_to_user(&user_id, &message).await;
    tracing::debug!(user = %user_id, kind = kind.as_str(), delivered, "routed chat-stream event");
}

async fn route_workflow_update(registry: &ConnectionRegistry, payload: Value) {
    let update: WorkflowUpdate = match serde_json::from_value(payload) {
        Ok(update) => update,
        Err(e) => {
            metrics::INBOUND_DROPPED_TOTAL
                .with_label_values(&["malformed"])
                .inc();
            tracing::warn!(error = %e, "dropping malformed workflow update");
            return;
        }
    };
    let message = SseMessage::event(
        "workflow-update",
        json!({
            "workflowId": update.workflow_id,
            "type": update.kind,
            "data": update.data,
        }),
    );
    match update.user_id {
        Some(user_id) => {
            let delivered = registry.send_to_user(&user_id, &message).await;
            tracing::debug!(user = %user_id, workflow = %update.workflow_id, delivered, "routed workflow update");
        }
        None => {
            let delivered = registry.broadcast(&message).await;
            tracing::debug!(workflow = %update.workflow_id, delivered, "broadcast workflow update");
        }
    }
}

async fn route_broadcast(registry: &ConnectionRegistry, payload: Value) {
    let broadcast: BroadcastPayload = match serde_json::from_value(payload) {
        Ok(broadcast) => broadcast,
        Err(e) => {
            metrics::INBOUND_DROPPED_TOTAL
                .with_label_values(&["malformed"])
                .inc();
            tracing::warn!(error = %e, "dropping malformed broadcast payload");
            return;
        }
    };
    let event = broadcast.event.unwrap_or_else(|| "broadcast".to_string());
    let delivered = registry
        .broadcast(&SseMessage::event(event, broadcast.data))
        .await;
    tracing::debug!(delivered, "broadcast generic event");
}
