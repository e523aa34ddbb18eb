use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::Event;
use futures::{Stream, StreamExt};
use serde::Serialize;

use crate::task::GenerationEvent;

/// Name of the terminal SSE event.
pub const DONE_EVENT: &str = "done";
/// Payload of the terminal SSE event.
pub const DONE_DATA: &str = "[DONE]";

/// JSON payload of one data frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Frame {
    Success {
        artifact_ref: String,
        index: u32,
        is_last: bool,
    },
    Aborted {
        message: String,
        total_generated: u32,
    },
    Error {
        message: String,
    },
}

impl From<GenerationEvent> for Frame {
    fn from(event: GenerationEvent) -> Self {
        match event {
            GenerationEvent::Success {
                artifact_ref,
                index,
                is_last,
            } => Frame::Success {
                artifact_ref,
                index,
                is_last,
            },
            GenerationEvent::Aborted { total_generated } => Frame::Aborted {
                message: "Generation was aborted".to_string(),
                total_generated,
            },
            GenerationEvent::Error { message } => Frame::Error { message },
        }
    }
}

/// Turns a task's event stream into SSE frames.
///
/// Every encoded stream is: one `retry` handshake, one data frame per event,
/// then exactly one `done` marker.
#[derive(Debug, Clone)]
pub struct StreamEncoder {
    retry: Duration,
    frame_pause: Duration,
}

impl StreamEncoder {
    pub fn new(retry: Duration, frame_pause: Duration) -> Self {
        Self { retry, frame_pause }
    }

    /// Advertises a long reconnection interval so clients don't hammer the
    /// endpoint after a stream ends.
    pub fn handshake(&self) -> Event {
        Event::default().retry(self.retry)
    }

    pub fn frame(&self, event: GenerationEvent) -> Event {
        let frame = Frame::from(event);
        match Event::default().json_data(&frame) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("Failed to encode frame {:?}: {}", frame, e);
                Event::default().data(r#"{"status":"error","message":"Failed to encode frame"}"#)
            }
        }
    }

    pub fn done(&self) -> Event {
        Event::default().event(DONE_EVENT).data(DONE_DATA)
    }

    pub fn encode<S>(&self, events: S) -> impl Stream<Item = Result<Event, Infallible>> + Send
    where
        S: Stream<Item = GenerationEvent> + Send + 'static,
    {
        let encoder = self.clone();
        async_stream::stream! {
            yield Ok(encoder.handshake());

            let mut events = Box::pin(events);
            let mut first = true;
            while let Some(event) = events.next().await {
                if !first && !encoder.frame_pause.is_zero() {
                    tokio::time::sleep(encoder.frame_pause).await;
                }
                first = false;
                yield Ok(encoder.frame(event));
            }

            yield Ok(encoder.done());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::{IntoResponse, Sse};

    async fn render(encoder: &StreamEncoder, events: Vec<GenerationEvent>) -> String {
        let stream = encoder.encode(futures::stream::iter(events));
        let response = Sse::new(stream).into_response();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    fn records(body: &str) -> Vec<&str> {
        body.split("\n\n").filter(|r| !r.is_empty()).collect()
    }

    #[test]
    fn test_frame_json_shape() {
        let success = serde_json::to_value(Frame::from(GenerationEvent::Success {
            artifact_ref: "A1".to_string(),
            index: 1,
            is_last: false,
        }))
        .unwrap();
        assert_eq!(
            success,
            serde_json::json!({"status": "success", "artifact_ref": "A1", "index": 1, "is_last": false})
        );

        let aborted =
            serde_json::to_value(Frame::from(GenerationEvent::Aborted { total_generated: 2 }))
                .unwrap();
        assert_eq!(aborted["status"], "aborted");
        assert_eq!(aborted["total_generated"], 2);

        let error = serde_json::to_value(Frame::from(GenerationEvent::Error {
            message: "boom".to_string(),
        }))
        .unwrap();
        assert_eq!(error, serde_json::json!({"status": "error", "message": "boom"}));
    }

    #[tokio::test]
    async fn test_stream_is_handshake_frames_then_done() {
        let encoder = StreamEncoder::new(Duration::from_secs(3600), Duration::ZERO);
        let body = render(
            &encoder,
            vec![
                GenerationEvent::Success {
                    artifact_ref: "A1".to_string(),
                    index: 1,
                    is_last: false,
                },
                GenerationEvent::Success {
                    artifact_ref: "A2".to_string(),
                    index: 2,
                    is_last: true,
                },
            ],
        )
        .await;

        let records = records(&body);
        assert_eq!(records.len(), 4);
        assert_eq!(records[0], "retry:3600000");
        assert!(records[1].starts_with("data: "));
        assert!(records[1].contains(r#""artifact_ref":"A1""#));
        assert!(records[2].contains(r#""is_last":true"#));
        assert_eq!(records[3], "event: done\ndata: [DONE]");
    }

    #[tokio::test]
    async fn test_empty_stream_still_ends_with_done() {
        let encoder = StreamEncoder::new(Duration::from_millis(1000), Duration::ZERO);
        let body = render(&encoder, Vec::new()).await;

        assert_eq!(records(&body), vec!["retry:1000", "event: done\ndata: [DONE]"]);
    }

    #[tokio::test]
    async fn test_frame_pause_does_not_reorder() {
        let encoder = StreamEncoder::new(Duration::from_millis(1000), Duration::from_millis(5));
        let body = render(
            &encoder,
            vec![
                GenerationEvent::Success {
                    artifact_ref: "A1".to_string(),
                    index: 1,
                    is_last: false,
                },
                GenerationEvent::Aborted { total_generated: 2 },
            ],
        )
        .await;

        let records = records(&body);
        assert_eq!(records.len(), 4);
        assert!(records[1].contains(r#""status":"success""#));
        assert!(records[2].contains(r#""status":"aborted""#));
    }
}
