//! SSE-style framing for live trace streaming.
//!
//! Adapts a hub [`Subscription`] into newline-delimited, event-tagged text
//! frames suitable for a long-lived push transport: one `data:` frame per
//! span, then a terminal `event: complete` frame, after which the stream
//! ends. The transport binding (response headers, flushing, connection
//! lifecycle) belongs to the boundary layer; dropping the stream drops the
//! subscription, which unsubscribes from the hub.

use futures::Stream;

use super::hub::{HubEvent, Subscription};

/// Render one hub event as an SSE frame.
pub fn sse_frame(event: &HubEvent) -> String {
    match event {
        HubEvent::Span(span) => {
            let json = serde_json::to_string(span).unwrap_or_else(|_| "{}".to_string());
            format!("data: {json}\n\n")
        }
        HubEvent::Complete => "event: complete\ndata: {}\n\n".to_string(),
    }
}

/// Turn a subscription into a stream of SSE frames.
///
/// The stream yields until the hub closes the subscription (completion
/// detection) or the consumer drops the stream (client disconnect).
pub fn sse_frames(subscription: Subscription) -> impl Stream<Item = String> {
    futures::stream::unfold(subscription, |mut sub| async move {
        let event = sub.recv().await?;
        Some((sse_frame(&event), sub))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::model::Span;
    use std::collections::HashMap;

    fn span() -> Span {
        Span {
            span_id: "b".repeat(16),
            parent_span_id: String::new(),
            trace_id: "a".repeat(32),
            operation: "GET /".into(),
            service_name: "svc".into(),
            start_time: 1,
            duration: 2,
            status: None,
            tags: HashMap::new(),
        }
    }

    #[test]
    fn span_frame_is_data_prefixed_json() {
        let frame = sse_frame(&HubEvent::Span(span()));
        assert!(frame.starts_with("data: {"));
        assert!(frame.ends_with("\n\n"));

        let json: serde_json::Value =
            serde_json::from_str(frame.trim_start_matches("data: ").trim()).unwrap();
        assert_eq!(json["operation"], "GET /");
    }

    #[test]
    fn complete_frame_is_event_tagged() {
        assert_eq!(
            sse_frame(&HubEvent::Complete),
            "event: complete\ndata: {}\n\n"
        );
    }
}
