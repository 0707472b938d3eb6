//! Connection registry and per-user offline queues.
//!
//! Owns the only shared mutable state in the process: the live-connection map
//! and the per-user queue map, both behind a single lock so attach, detach,
//! fan-out and queue mutations stay atomic with respect to each other. The
//! bridge and the heartbeat monitor only call the public operations here.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde_json::json;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::metrics;
use crate::sse::{self, SseMessage};

pub type ConnectionSender = UnboundedSender<Bytes>;

struct Connection {
    user_id: Option<String>,
    tx: ConnectionSender,
    last_activity: Instant,
}

struct Inner {
    connections: HashMap<Uuid, Connection>,
    queues: HashMap<String, VecDeque<SseMessage>>,
}

/// Cheaply cloneable handle; every clone shares the same maps.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<Inner>>,
    next_message_id: Arc<AtomicU64>,
    queue_capacity: usize,
}

impl ConnectionRegistry {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                connections: HashMap::new(),
                queues: HashMap::new(),
            })),
            next_message_id: Arc::new(AtomicU64::new(1)),
            queue_capacity,
        }
    }

    /// Register a connection, acknowledge it, and replay any backlog queued
    /// for its user. The user's queue entry is removed entirely once flushed.
    pub async fn attach(
        &self,
        connection_id: Uuid,
        user_id: Option<String>,
        tx: ConnectionSender,
    ) {
        let mut inner = self.inner.write().await;
        inner.connections.insert(
            connection_id,
            Connection {
                user_id: user_id.clone(),
                tx,
                last_activity: Instant::now(),
            },
        );
        metrics::CONNECTIONS_OPENED_TOTAL.inc();

        let ack = SseMessage::event(
            "connected",
            json!({
                "connectionId": connection_id.to_string(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }),
        );
        if !self.write_locked(&mut inner, connection_id, &ack) {
            return;
        }

        let Some(user) = user_id else { return };
        let Some(backlog) = inner.queues.remove(&user) else {
            return;
        };
        tracing::info!(user = %user, backlog = backlog.len(), "flushing queued messages");
        for message in backlog {
            // The connection died mid-flush; whatever remains dies with it.
            if !self.write_locked(&mut inner, connection_id, &message) {
                break;
            }
        }
    }

    /// Idempotent removal. Dropping the sender guarantees the connection can
    /// never be written again.
    pub async fn detach(&self, connection_id: Uuid) {
        let mut inner = self.inner.write().await;
        if inner.connections.remove(&connection_id).is_some() {
            metrics::CONNECTIONS_CLOSED_TOTAL.inc();
            tracing::debug!(%connection_id, "connection detached");
        }
    }

    /// Deliver to exactly one connection. A write failure detaches it.
    pub async fn send_to_connection(&self, connection_id: Uuid, message: &SseMessage) -> bool {
        let mut inner = self.inner.write().await;
        self.write_locked(&mut inner, connection_id, message)
    }

    /// Fan out to every live connection owned by `user_id`. Per-connection
    /// write failures detach that connection and do not abort the loop. When
    /// nothing was delivered the message is buffered for the user instead.
    pub async fn send_to_user(&self, user_id: &str, message: &SseMessage) -> usize {
        let mut inner = self.inner.write().await;
        let targets: Vec<Uuid> = inner
            .connections
            .iter()
            .filter(|(_, conn)| conn.user_id.as_deref() == Some(user_id))
            .map(|(id, _)| *id)
            .collect();

        let mut delivered = 0;
        for connection_id in targets {
            if self.write_locked(&mut inner, connection_id, message) {
                delivered += 1;
            }
        }
        if delivered == 0 {
            self.enqueue_locked(&mut inner, user_id, message.clone());
        }
        delivered
    }

    /// Deliver to all live connections regardless of owner. Never queues:
    /// a broadcast has no single recipient to resume from later.
    pub async fn broadcast(&self, message: &SseMessage) -> usize {
        let mut inner = self.inner.write().await;
        let targets: Vec<Uuid> = inner.connections.keys().copied().collect();
        let mut delivered = 0;
        for connection_id in targets {
            if self.write_locked(&mut inner, connection_id, message) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Evict connections idle past `threshold`, then write a keep-alive
    /// comment to the remainder. Returns `(evicted, pinged)`.
    pub async fn sweep_idle(&self, threshold: Duration) -> (usize, usize) {
        let mut inner = self.inner.write().await;
        let now = Instant::now();
        let stale: Vec<Uuid> = inner
            .connections
            .iter()
            .filter(|(_, conn)| now.duration_since(conn.last_activity) > threshold)
            .map(|(id, _)| *id)
            .collect();
        for connection_id in &stale {
            inner.connections.remove(connection_id);
            metrics::CONNECTIONS_CLOSED_TOTAL.inc();
        }

        let frame = sse::keep_alive();
        let remaining: Vec<Uuid> = inner.connections.keys().copied().collect();
        let mut pinged = 0;
        for connection_id in remaining {
            if let Some(conn) = inner.connections.get_mut(&connection_id) {
                if conn.tx.send(frame.clone()).is_ok() {
                    conn.last_activity = Instant::now();
                    pinged += 1;
                } else {
                    inner.connections.remove(&connection_id);
                    metrics::CONNECTIONS_CLOSED_TOTAL.inc();
                }
            }
        }
        (stale.len(), pinged)
    }

    /// Administrative drop of a user's backlog. Returns how many messages
    /// were discarded.
    pub async fn clear_queue(&self, user_id: &str) -> usize {
        let mut inner = self.inner.write().await;
        inner.queues.remove(user_id).map(|q| q.len()).unwrap_or(0)
    }

    pub async fn live_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    pub async fn queued_count(&self) -> usize {
        self.inner.read().await.queues.values().map(VecDeque::len).sum()
    }

    /// Final goodbye to every live connection, then drop everything. Queued
    /// backlogs are in-memory only and die here.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.write().await;
        let goodbye = SseMessage::event("disconnect", json!({ "reason": "server shutting down" }));
        let targets: Vec<Uuid> = inner.connections.keys().copied().collect();
        for connection_id in targets {
            self.write_locked(&mut inner, connection_id, &goodbye);
        }
        inner.connections.clear();
        inner.queues.clear();
    }

    /// Encode and write one frame while holding the lock. Assigns a message
    /// id when the caller left it empty. A failed write removes the
    /// connection so it can never be written again.
    fn write_locked(&self, inner: &mut Inner, connection_id: Uuid, message: &SseMessage) -> bool {
        let frame = {
            let mut message = message.clone();
            if message.id.is_none() {
                message.id = Some(self.next_message_id.fetch_add(1, Ordering::Relaxed));
            }
            sse::encode(&message)
        };
        match inner.connections.get_mut(&connection_id) {
            Some(conn) => {
                if conn.tx.send(frame).is_ok() {
                    conn.last_activity = Instant::now();
                    metrics::MESSAGES_DELIVERED_TOTAL.inc();
                    true
                } else {
                    inner.connections.remove(&connection_id);
                    metrics::CONNECTIONS_CLOSED_TOTAL.inc();
                    false
                }
            }
            None => false,
        }
    }

    fn enqueue_locked(&self, inner: &mut Inner, user_id: &str, message: SseMessage) {
        let queue = inner.queues.entry(user_id.to_string()).or_default();
        if queue.len() >= self.queue_capacity {
            queue.pop_front();
            metrics::QUEUE_EVICTIONS_TOTAL.inc();
        }
        queue.push_back(message);
        metrics::MESSAGES_QUEUED_TOTAL.inc();
    }
}

#[cfg(test)]
impl ConnectionRegistry {
    async fn backdate(&self, connection_id: Uuid, age: Duration) {
        let mut inner = self.inner.write().await;
        if let Some(conn) = inner.connections.get_mut(&connection_id) {
            conn.last_activity = Instant::now()
                .checked_sub(age)
                .expect("monotonic clock too young to backdate");
        }
    }
}
