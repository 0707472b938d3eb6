//! Fan-out and offline-queue behavior through the public registry API.

mod support;

use realtime_gateway::registry::ConnectionRegistry;
use realtime_gateway::sse::{self, SseMessage};
use serde_json::json;
use support::{attach, parse_frames, recv_frames};

#[tokio::test]
async fn offline_backlog_replays_in_order_then_queue_is_empty() {
    let registry = ConnectionRegistry::new(100);
    for i in 0..10 {
        let delivered = registry
            .send_to_user("u1", &SseMessage::event("token", json!({ "seq": i })))
            .await;
        assert_eq!(delivered, 0);
    }
    assert_eq!(registry.queued_count().await, 10);

    let (_, mut rx) = attach(&registry, Some("u1")).await;
    let frames = recv_frames(&mut rx);

    assert_eq!(frames[0].event.as_deref(), Some("connected"));
    let replayed: Vec<&support::Frame> = frames[1..].iter().collect();
    assert_eq!(replayed.len(), 10);
    for (i, frame) in replayed.iter().enumerate() {
        assert_eq!(frame.event.as_deref(), Some("token"));
        assert!(frame.data.contains(&format!("\"seq\":{}", i)));
    }
    assert_eq!(registry.queued_count().await, 0);
}

#[tokio::test]
async fn queue_keeps_most_recent_hundred() {
    let registry = ConnectionRegistry::new(100);
    for i in 0..150 {
        registry
            .send_to_user("u1", &SseMessage::data(json!({ "seq": i })))
            .await;
    }
    assert_eq!(registry.queued_count().await, 100);

    let (_, mut rx) = attach(&registry, Some("u1")).await;
    let frames = recv_frames(&mut rx);
    let replayed = &frames[1..];
    assert_eq!(replayed.len(), 100);
    assert!(replayed[0].data.contains("\"seq\":50"));
    assert!(replayed[99].data.contains("\"seq\":149"));
}

#[tokio::test]
async fn broadcast_reaches_everyone_and_survives_one_failure() {
    let registry = ConnectionRegistry::new(100);
    let (_, mut rx_a) = attach(&registry, Some("u1")).await;
    let (_, rx_b) = attach(&registry, Some("u1")).await;
    let (_, mut rx_c) = attach(&registry, Some("u2")).await;
    let (_, mut rx_d) = attach(&registry, None).await;

    drop(rx_b); // B's transport has gone away

    let delivered = registry
        .broadcast(&SseMessage::event("announce", json!({ "msg": "hello" })))
        .await;
    assert_eq!(delivered, 3);
    assert_eq!(registry.live_count().await, 3);

    for rx in [&mut rx_a, &mut rx_c, &mut rx_d] {
        let frames = recv_frames(rx);
        assert!(frames
            .iter()
            .any(|f| f.event.as_deref() == Some("announce")));
    }
    // Broadcast never queues, not even for B's user
    assert_eq!(registry.queued_count().await, 0);
}

#[tokio::test]
async fn queued_then_live_ordering_for_one_user() {
    let registry = ConnectionRegistry::new(100);
    registry
        .send_to_user("u1", &SseMessage::data(json!({ "phase": "queued" })))
        .await;

    let (_, mut rx) = attach(&registry, Some("u1")).await;
    registry
        .send_to_user("u1", &SseMessage::data(json!({ "phase": "live" })))
        .await;

    let frames = recv_frames(&mut rx);
    let queued_pos = frames.iter().position(|f| f.data.contains("queued")).unwrap();
    let live_pos = frames.iter().position(|f| f.data.contains("live")).unwrap();
    assert!(queued_pos < live_pos);
}

#[tokio::test]
async fn multiline_payload_round_trips_through_the_wire_format() {
    let message = SseMessage {
        id: Some(42),
        event: Some("message".to_string()),
        data: json!("first line\nsecond line\nthird line"),
        retry_ms: None,
    };
    let raw = String::from_utf8(sse::encode(&message).to_vec()).unwrap();
    let frames = parse_frames(&raw);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].id, Some(42));
    assert_eq!(frames[0].data, "first line\nsecond line\nthird line");
}

#[tokio::test]
async fn anonymous_connections_only_receive_broadcasts() {
    let registry = ConnectionRegistry::new(100);
    let (_, mut rx) = attach(&registry, None).await;

    registry
        .send_to_user("u1", &SseMessage::data(json!("private")))
        .await;
    registry
        .broadcast(&SseMessage::data(json!("public")))
        .await;

    let frames = recv_frames(&mut rx);
    assert!(!frames.iter().any(|f| f.data.contains("private")));
    assert!(frames.iter().any(|f| f.data.contains("public")));
}
