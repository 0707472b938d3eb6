//! Server-Sent Events wire framing.
//!
//! Pure encoding only; no connection state lives here. A frame is an optional
//! `id:` line, an optional `event:` line, an optional `retry:` line, one or
//! more `data:` lines, and a terminating blank line. A payload with embedded
//! newlines must be split into one `data:` line per line, otherwise
//! conformant clients cannot reassemble it.

use bytes::Bytes;
use serde_json::Value;

/// Logical outbound message. Constructed per delivery attempt; the registry
/// assigns `id` from its process-wide counter when the producer left it empty.
#[derive(Debug, Clone, PartialEq)]
pub struct SseMessage {
    pub id: Option<u64>,
    pub event: Option<String>,
    pub data: Value,
    pub retry_ms: Option<u64>,
}

impl SseMessage {
    pub fn event(name: impl Into<String>, data: Value) -> Self {
        Self {
            id: None,
            event: Some(name.into()),
            data,
            retry_ms: None,
        }
    }

    pub fn data(data: Value) -> Self {
        Self {
            id: None,
            event: None,
            data,
            retry_ms: None,
        }
    }
}

/// Encode a message as an SSE frame.
pub fn encode(message: &SseMessage) -> Bytes {
    let mut out = String::new();
    if let Some(id) = message.id {
        out.push_str("id: ");
        out.push_str(&id.to_string());
        out.push('\n');
    }
    if let Some(event) = &message.event {
        out.push_str("event: ");
        out.push_str(event);
        out.push('\n');
    }
    if let Some(retry) = message.retry_ms {
        out.push_str("retry: ");
        out.push_str(&retry.to_string());
        out.push('\n');
    }

    // A JSON string payload goes out raw so the client sees the original
    // text; anything else serializes to compact JSON, which cannot contain a
    // literal newline.
    let payload = match &message.data {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    for line in payload.split('\n') {
        out.push_str("data: ");
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
    Bytes::from(out)
}

/// Keep-alive comment frame. Ignored by clients, but it keeps intermediary
/// proxies from reaping an idle connection.
pub fn keep_alive() -> Bytes {
    Bytes::from_static(b": ping\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn encodes_all_fields_in_order() {
        let message = SseMessage {
            id: Some(7),
            event: Some("token".to_string()),
            data: json!({"content": "Hi"}),
            retry_ms: Some(3000),
        };
        let frame = String::from_utf8(encode(&message).to_vec()).unwrap();
        assert_eq!(
            frame,
            "id: 7\nevent: token\nretry: 3000\ndata: {\"content\":\"Hi\"}\n\n"
        );
    }

    #[test]
    fn splits_multiline_string_payload_into_data_lines() {
        let message = SseMessage::data(json!("line1\nline2\nline3"));
        let frame = String::from_utf8(encode(&message).to_vec()).unwrap();
        assert_eq!(frame, "data: line1\ndata: line2\ndata: line3\n\n");
    }

    #[test]
    fn omits_absent_fields() {
        let message = SseMessage::data(json!({"a": 1}));
        let frame = String::from_utf8(encode(&message).to_vec()).unwrap();
        assert_eq!(frame, "data: {\"a\":1}\n\n");
    }

    #[test]
    fn keep_alive_is_a_comment_frame() {
        assert_eq!(&keep_alive()[..], b": ping\n\n");
    }
}
