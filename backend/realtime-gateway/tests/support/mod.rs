use bytes::Bytes;
use realtime_gateway::registry::ConnectionRegistry;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Parsed SSE frame, comment frames excluded.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub id: Option<u64>,
    pub event: Option<String>,
    pub data: String,
}

pub async fn attach(
    registry: &ConnectionRegistry,
    user: Option<&str>,
) -> (Uuid, mpsc::UnboundedReceiver<Bytes>) {
    let id = Uuid::new_v4();
    let (tx, rx) = mpsc::unbounded_channel();
    registry.attach(id, user.map(str::to_string), tx).await;
    (id, rx)
}

/// Drain everything currently buffered on the connection and parse it.
pub fn recv_frames(rx: &mut mpsc::UnboundedReceiver<Bytes>) -> Vec<Frame> {
    let mut raw = String::new();
    while let Ok(chunk) = rx.try_recv() {
        raw.push_str(std::str::from_utf8(&chunk).unwrap());
    }
    parse_frames(&raw)
}

pub fn parse_frames(raw: &str) -> Vec<Frame> {
    raw.split("\n\n")
        .filter(|block| !block.trim().is_empty() && !block.starts_with(':'))
        .map(|block| {
            let mut frame = Frame {
                id: None,
                event: None,
                data: String::new(),
            };
            let mut data_lines = Vec::new();
            for line in block.lines() {
                if let Some(v) = line.strip_prefix("id: ") {
                    frame.id = v.parse().ok();
                } else if let Some(v) = line.strip_prefix("event: ") {
                    frame.event = Some(v.to_string());
                } else if let Some(v) = line.strip_prefix("data: ") {
                    data_lines.push(v.to_string());
                }
            }
            frame.data = data_lines.join("\n");
            frame
        })
        .collect()
}
