//! OTLP trace ingestion: decode, normalize, fan out.
//!
//! Accepts one trace-export batch per call in either OTLP wire encoding.
//! The declared content type selects the decoder; with no (or an unknown)
//! content type, protobuf is attempted first and JSON second. The whole
//! batch is decoded and normalized before anything touches the store or the
//! hub, so a malformed payload never leaves partial state behind.
//!
//! Normalization is identical for both encodings:
//! - service name = resource attribute `service.name`, else `"unknown"`
//! - status = `ERROR` iff the wire status code is the OTLP error code (2),
//!   else `OK` - including when no status object is present at all
//! - nanosecond timestamps become microseconds by integer division
//! - span attributes become tags, preferring string values and falling back
//!   to the decimal form of int values; other kinds are dropped
//! - trace/span/parent ids pass through exactly as the origin assigned them

pub mod wire;

use opentelemetry_proto::tonic::common::v1::{any_value, AnyValue};
use opentelemetry_proto::tonic::trace::v1::{status::StatusCode, TracesData};
use prost::Message;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::pipeline::TracePipeline;
use crate::trace::model::{Span, SpanStatus};

/// Numeric OTLP status code meaning "error", shared by both encodings.
const OTLP_STATUS_ERROR: i64 = StatusCode::Error as i64;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to decode OTLP protobuf payload: {0}")]
    Protobuf(String),

    #[error("failed to decode OTLP JSON payload: {0}")]
    Json(String),

    #[error("payload is neither OTLP protobuf nor OTLP JSON (protobuf: {protobuf}; json: {json})")]
    Unrecognized { protobuf: String, json: String },
}

/// Decodes OTLP batches and feeds accepted spans through the pipeline.
pub struct Ingester {
    pipeline: TracePipeline,
}

impl Ingester {
    pub fn new(pipeline: TracePipeline) -> Self {
        Self { pipeline }
    }

    /// Ingest one export batch; returns the number of accepted spans.
    ///
    /// On decode failure nothing is stored, published, or queued.
    pub fn ingest(&self, content_type: Option<&str>, body: &[u8]) -> Result<usize, IngestError> {
        let spans = decode(content_type, body).inspect_err(|err| {
            warn!(error = %err, "rejected OTLP payload");
        })?;

        let count = spans.len();
        debug!(count, "accepted OTLP spans");
        self.pipeline.record_spans(spans);
        Ok(count)
    }
}

/// Decode a batch into normalized spans without touching any sink.
pub fn decode(content_type: Option<&str>, body: &[u8]) -> Result<Vec<Span>, IngestError> {
    let ct = content_type.unwrap_or_default();
    if ct.contains("protobuf") {
        decode_protobuf(body)
    } else if ct.contains("json") {
        decode_json(body)
    } else {
        // Unknown or absent content type: protobuf is the common case,
        // JSON the fallback.
        match decode_protobuf(body) {
            Ok(spans) => Ok(spans),
            Err(IngestError::Protobuf(protobuf)) => {
                decode_json(body).map_err(|json_err| match json_err {
                    IngestError::Json(json) => IngestError::Unrecognized { protobuf, json },
                    other => other,
                })
            }
            Err(other) => Err(other),
        }
    }
}

fn decode_protobuf(body: &[u8]) -> Result<Vec<Span>, IngestError> {
    let data = TracesData::decode(body).map_err(|e| IngestError::Protobuf(e.to_string()))?;

    let mut spans = Vec::new();
    for rs in &data.resource_spans {
        let service_name = rs
            .resource
            .as_ref()
            .and_then(|r| {
                r.attributes
                    .iter()
                    .find(|kv| kv.key == "service.name")
                    .and_then(|kv| kv.value.as_ref())
                    .and_then(any_value_string)
            })
            .unwrap_or_else(|| "unknown".to_string());

        for ss in &rs.scope_spans {
            for span in &ss.spans {
                let status_code = span.status.as_ref().map(|s| i64::from(s.code));
                let start_ns = span.start_time_unix_nano as i64;
                let end_ns = span.end_time_unix_nano as i64;

                let mut tags = HashMap::new();
                for attr in &span.attributes {
                    if let Some(value) = attr.value.as_ref().and_then(any_value_tag) {
                        tags.insert(attr.key.clone(), value);
                    }
                }

                spans.push(normalize(
                    hex::encode(&span.trace_id),
                    hex::encode(&span.span_id),
                    hex::encode(&span.parent_span_id),
                    span.name.clone(),
                    service_name.clone(),
                    start_ns,
                    end_ns,
                    status_code,
                    tags,
                ));
            }
        }
    }
    Ok(spans)
}

fn decode_json(body: &[u8]) -> Result<Vec<Span>, IngestError> {
    let data: wire::TraceExport =
        serde_json::from_slice(body).map_err(|e| IngestError::Json(e.to_string()))?;

    let mut spans = Vec::new();
    for rs in &data.resource_spans {
        let service_name = rs
            .resource
            .attributes
            .iter()
            .find(|kv| kv.key == "service.name")
            .map(|kv| kv.value.string_value.clone())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "unknown".to_string());

        for ss in &rs.scope_spans {
            for span in &ss.spans {
                let mut tags = HashMap::new();
                for attr in &span.attributes {
                    if let Some(value) = attr.value.as_tag() {
                        tags.insert(attr.key.clone(), value);
                    }
                }

                spans.push(normalize(
                    span.trace_id.clone(),
                    span.span_id.clone(),
                    span.parent_span_id.clone(),
                    span.name.clone(),
                    service_name.clone(),
                    span.start_time_unix_nano.nanos(),
                    span.end_time_unix_nano.nanos(),
                    span.status.as_ref().map(|s| s.code),
                    tags,
                ));
            }
        }
    }
    Ok(spans)
}

/// Shared final step of both decoders.
#[allow(clippy::too_many_arguments)]
fn normalize(
    trace_id: String,
    span_id: String,
    parent_span_id: String,
    operation: String,
    service_name: String,
    start_ns: i64,
    end_ns: i64,
    status_code: Option<i64>,
    tags: HashMap<String, String>,
) -> Span {
    let status = if status_code == Some(OTLP_STATUS_ERROR) {
        SpanStatus::Error
    } else {
        SpanStatus::Ok
    };

    Span {
        span_id,
        parent_span_id,
        trace_id,
        operation,
        service_name,
        start_time: start_ns / 1000,
        duration: (end_ns - start_ns) / 1000,
        status: Some(status),
        tags,
    }
}

fn any_value_string(value: &AnyValue) -> Option<String> {
    match &value.value {
        Some(any_value::Value::StringValue(s)) => Some(s.clone()),
        _ => None,
    }
}

/// Tag form of a protobuf attribute: string preferred, int fallback.
fn any_value_tag(value: &AnyValue) -> Option<String> {
    match &value.value {
        Some(any_value::Value::StringValue(s)) => Some(s.clone()),
        Some(any_value::Value::IntValue(i)) => Some(i.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry_proto::tonic::common::v1::KeyValue;
    use opentelemetry_proto::tonic::resource::v1::Resource;
    use opentelemetry_proto::tonic::trace::v1 as otlp;
    use pretty_assertions::assert_eq;

    fn proto_payload() -> Vec<u8> {
        let data = TracesData {
            resource_spans: vec![otlp::ResourceSpans {
                resource: Some(Resource {
                    attributes: vec![KeyValue {
                        key: "service.name".into(),
                        value: Some(AnyValue {
                            value: Some(any_value::Value::StringValue("payments".into())),
                        }),
                    }],
                    ..Default::default()
                }),
                scope_spans: vec![otlp::ScopeSpans {
                    spans: vec![otlp::Span {
                        trace_id: vec![0xab; 16],
                        span_id: vec![0xcd; 8],
                        parent_span_id: vec![],
                        name: "charge".into(),
                        start_time_unix_nano: 1_700_000_000_000_000_000,
                        end_time_unix_nano: 1_700_000_000_250_000_000,
                        attributes: vec![
                            KeyValue {
                                key: "http.method".into(),
                                value: Some(AnyValue {
                                    value: Some(any_value::Value::StringValue("POST".into())),
                                }),
                            },
                            KeyValue {
                                key: "retry.count".into(),
                                value: Some(AnyValue {
                                    value: Some(any_value::Value::IntValue(3)),
                                }),
                            },
                            KeyValue {
                                key: "ignored.bool".into(),
                                value: Some(AnyValue {
                                    value: Some(any_value::Value::BoolValue(true)),
                                }),
                            },
                        ],
                        status: Some(otlp::Status {
                            code: otlp::status::StatusCode::Error as i32,
                            ..Default::default()
                        }),
                        ..Default::default()
                    }],
                    ..Default::default()
                }],
                ..Default::default()
            }],
        };
        data.encode_to_vec()
    }

    fn json_payload() -> Vec<u8> {
        serde_json::json!({
            "resourceSpans": [{
                "resource": {
                    "attributes": [
                        {"key": "service.name", "value": {"stringValue": "payments"}}
                    ]
                },
                "scopeSpans": [{
                    "spans": [{
                        "traceId": "ab".repeat(16),
                        "spanId": "cd".repeat(8),
                        "name": "charge",
                        "startTimeUnixNano": "1700000000000000000",
                        "endTimeUnixNano": 1_700_000_000_250_000_000_i64,
                        "attributes": [
                            {"key": "http.method", "value": {"stringValue": "POST"}},
                            {"key": "retry.count", "value": {"intValue": "3"}},
                            {"key": "ignored.bool", "value": {"boolValue": true}}
                        ],
                        "status": {"code": 2}
                    }]
                }]
            }]
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn protobuf_and_json_normalize_identically() {
        let from_proto = decode(Some("application/x-protobuf"), &proto_payload()).unwrap();
        let from_json = decode(Some("application/json"), &json_payload()).unwrap();
        assert_eq!(from_proto, from_json);

        let span = &from_proto[0];
        assert_eq!(span.trace_id, "ab".repeat(16));
        assert_eq!(span.span_id, "cd".repeat(8));
        assert_eq!(span.parent_span_id, "");
        assert_eq!(span.operation, "charge");
        assert_eq!(span.service_name, "payments");
        assert_eq!(span.start_time, 1_700_000_000_000_000);
        assert_eq!(span.duration, 250_000);
        assert_eq!(span.status, Some(SpanStatus::Error));
        assert_eq!(span.tags.get("http.method").unwrap(), "POST");
        assert_eq!(span.tags.get("retry.count").unwrap(), "3");
        assert!(!span.tags.contains_key("ignored.bool"));
    }

    #[test]
    fn missing_status_defaults_to_ok() {
        let body = serde_json::json!({
            "resourceSpans": [{
                "scopeSpans": [{
                    "spans": [{
                        "traceId": "aa", "spanId": "bb", "name": "noop",
                        "startTimeUnixNano": "1000", "endTimeUnixNano": "3000"
                    }]
                }]
            }]
        })
        .to_string();

        let spans = decode(Some("application/json"), body.as_bytes()).unwrap();
        assert_eq!(spans[0].status, Some(SpanStatus::Ok));
        assert_eq!(spans[0].service_name, "unknown");
        assert_eq!(spans[0].duration, 2);
    }

    #[test]
    fn unknown_content_type_falls_back_to_json() {
        let spans = decode(None, &json_payload()).unwrap();
        assert_eq!(spans.len(), 1);
    }

    #[test]
    fn garbage_is_rejected_with_both_diagnostics() {
        let err = decode(None, b"\x01\x02 not a payload").unwrap_err();
        match err {
            IngestError::Unrecognized { protobuf, json } => {
                assert!(!protobuf.is_empty());
                assert!(!json.is_empty());
            }
            other => panic!("expected Unrecognized, got {other:?}"),
        }
    }

    #[test]
    fn declared_json_never_tries_protobuf() {
        let err = decode(Some("application/json"), b"not json").unwrap_err();
        assert!(matches!(err, IngestError::Json(_)));
    }
}
