//! Parsing of the Realtime Database `text/event-stream` protocol.

use async_stream::try_stream;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;

use super::error::{FirebaseDaoError, FirebaseResult};

/// One event of the stream, before its payload is interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSentEvent {
    pub name: String,
    pub data: String,
}

/// Payload of `put` and `patch` events: `data` is written at `path`, relative to the
/// location the stream was opened on.
#[derive(Debug, Deserialize)]
pub struct StreamPayload {
    pub path: String,
    pub data: Value,
}

/// Split a byte stream into server-sent events. Blocks are separated by a blank line and
/// may straddle chunk boundaries.
pub fn server_events<S, B>(bytes: S) -> impl Stream<Item = FirebaseResult<ServerSentEvent>>
where
    S: Stream<Item = Result<B, reqwest::Error>>,
    B: AsRef<[u8]>,
{
    try_stream! {
        let mut buffer: Vec<u8> = Vec::new();
        futures::pin_mut!(bytes);
        while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(|source| FirebaseDaoError::StreamRead { source })?;
            buffer.extend(chunk.as_ref().iter().filter(|byte| **byte != b'\r'));
            while let Some(end) = buffer.windows(2).position(|pair| pair == b"\n\n") {
                let block: Vec<u8> = buffer.drain(..end + 2).collect();
                if let Some(event) = parse_block(&String::from_utf8_lossy(&block)) {
                    yield event;
                }
            }
        }
    }
}

/// Parse a single event block; comment-only or nameless blocks yield nothing.
pub fn parse_block(block: &str) -> Option<ServerSentEvent> {
    let mut name = None;
    let mut data: Vec<&str> = Vec::new();
    for line in block.lines() {
        if let Some(value) = line.strip_prefix("event:") {
            name = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            data.push(value.strip_prefix(' ').unwrap_or(value));
        }
    }
    name.map(|name| ServerSentEvent {
        name,
        data: data.join("\n"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[test]
    fn parses_named_event_with_data() {
        let event = parse_block("event: put\ndata: {\"path\":\"/\",\"data\":1}\n\n").unwrap();
        assert_eq!(event.name, "put");
        assert_eq!(event.data, "{\"path\":\"/\",\"data\":1}");
    }

    #[test]
    fn ignores_blocks_without_event_name() {
        assert_eq!(parse_block(": comment\n\n"), None);
    }

    #[tokio::test]
    async fn events_can_span_chunks() {
        let chunks: Vec<Result<Vec<u8>, reqwest::Error>> = vec![
            Ok(b"event: keep-alive\ndata: null\n\nevent: pa".to_vec()),
            Ok(b"tch\r\ndata: {\"path\":\"/a\",\"data\":{\"b\":2}}\r\n\r\n".to_vec()),
        ];
        let events: Vec<_> = server_events(stream::iter(chunks))
            .map(|event| event.unwrap())
            .collect()
            .await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].name, "keep-alive");
        assert_eq!(events[1].name, "patch");
        let payload: StreamPayload = serde_json::from_str(&events[1].data).unwrap();
        assert_eq!(payload.path, "/a");
    }
}
