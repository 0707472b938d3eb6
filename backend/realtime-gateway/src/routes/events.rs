//! SSE attach endpoints.
//!
//! Each request opens a long-lived event stream backed by an unbounded
//! channel into the registry. Actix drops the body stream when the client
//! goes away, which releases the guard and detaches the connection.

use std::pin::Pin;
use std::task::{Context, Poll};

use actix_web::{get, web, HttpRequest, HttpResponse};
use bytes::Bytes;
use futures_util::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use crate::registry::ConnectionRegistry;
use crate::state::AppState;

struct DetachGuard {
    registry: ConnectionRegistry,
    connection_id: Uuid,
}

impl Drop for DetachGuard {
    fn drop(&mut self) {
        let registry = self.registry.clone();
        let connection_id = self.connection_id;
        tokio::spawn(async move { registry.detach(connection_id).await });
    }
}

struct EventStream {
    frames: UnboundedReceiverStream<Bytes>,
    _guard: DetachGuard,
}

impl Stream for EventStream {
    type Item = Result<Bytes, actix_web::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.frames).poll_next(cx).map(|frame| frame.map(Ok))
    }
}

async fn open_stream(state: &AppState, user_id: Option<String>) -> HttpResponse {
    let connection_id = Uuid::new_v4();
    let (tx, rx) = mpsc::unbounded_channel();
    state
        .registry
        .attach(connection_id, user_id.clone(), tx)
        .await;
    tracing::info!(
        %connection_id,
        user = user_id.as_deref().unwrap_or("-"),
        "client attached"
    );

    let stream = EventStream {
        frames: UnboundedReceiverStream::new(rx),
        _guard: DetachGuard {
            registry: state.registry.clone(),
            connection_id,
        },
    };

    HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .insert_header(("Connection", "keep-alive"))
        .insert_header(("X-Accel-Buffering", "no"))
        .streaming(stream)
}

#[get("/events/{user_id}")]
pub async fn attach_user(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    open_stream(&state, Some(path.into_inner())).await
}

/// Anonymous attach; an `X-User-Id` header, when present, still assigns
/// ownership so per-user sends reach this connection.
#[get("/events")]
pub async fn attach_anonymous(state: web::Data<AppState>, req: HttpRequest) -> HttpResponse {
    let user_id = req
        .headers()
        .get("X-User-Id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    open_stream(&state, user_id).await
}
