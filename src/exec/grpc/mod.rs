//! Dynamic gRPC executor.
//!
//! No generated stubs: the caller pastes .proto source alongside the call,
//! the source is compiled in memory, and the unary RPC is invoked with
//! dynamic messages. RPC-level failures (including an unreachable server,
//! which surfaces on first use of the lazily-connected channel) come back
//! inside the envelope with the gRPC status code and name, as does a
//! response body that cannot be rendered as JSON; `Err` is reserved for
//! input that never produces a call.

pub mod codec;
pub mod descriptor;

use std::collections::HashMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use http::uri::PathAndQuery;
use tonic::metadata::{Ascii, KeyAndValueRef, MetadataKey, MetadataMap, MetadataValue};
use tonic::transport::{ClientTlsConfig, Endpoint};
use tonic::{Code, Extensions, Status};
use tracing::{debug, warn};

use crate::pipeline::TracePipeline;
use crate::trace::context::{new_span_id, new_trace_id, traceparent, TRACEPARENT_HEADER};
use crate::trace::model::{Span, SpanStatus};
use crate::SERVICE_NAME;

use super::rest::unix_micros;
use super::{duration_label, CALL_TIMEOUT};

use codec::DynamicCodec;

/// Input that cannot be turned into an RPC at all.
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("failed to compile .proto source: {0}")]
    Compile(String),

    #[error("service '{0}' not found in .proto source")]
    ServiceNotFound(String),

    #[error("method '{method}' not found in service '{service}'")]
    MethodNotFound { service: String, method: String },

    #[error("method '{0}' is streaming; only unary calls are supported")]
    Streaming(String),

    #[error("invalid request body JSON: {0}")]
    RequestDecode(String),

    #[error("failed to encode response as JSON: {0}")]
    ResponseEncode(String),

    #[error("invalid server address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("invalid method path '{path}': {reason}")]
    MethodPath { path: String, reason: String },

    #[error("invalid metadata entry '{0}'")]
    InvalidMetadata(String),

    #[error("TLS configuration failed: {0}")]
    Tls(String),
}

/// Outbound gRPC call description: target, method, request JSON, and the
/// .proto source describing both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrpcRequest {
    pub server_address: String,
    pub service: String,
    pub method: String,
    /// Request message as protobuf JSON; empty means the default message.
    #[serde(default)]
    pub body: String,
    pub proto_file: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub use_tls: bool,
    #[serde(default)]
    pub request_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GrpcResponse {
    #[serde(rename = "request_duration")]
    pub duration: String,
    pub status_code: i32,
    pub status_name: String,
    pub body: String,
    pub response_headers: HashMap<String, String>,
    pub response_trailers: HashMap<String, String>,
    #[serde(rename = "error_msg")]
    pub error: String,
    pub response_size: i64,
    pub request_size: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub request_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub execution_id: String,
    pub trace_id: String,
    pub span_id: String,
    pub spans: Vec<Span>,
}

pub struct GrpcExecutor {
    pipeline: TracePipeline,
}

impl GrpcExecutor {
    pub fn new(pipeline: TracePipeline) -> Self {
        Self { pipeline }
    }

    pub async fn execute(&self, req: GrpcRequest) -> Result<GrpcResponse, InvokeError> {
        let pool = descriptor::compile(&req.proto_file)?;
        let method = descriptor::resolve_method(&pool, &req.service, &req.method)?;
        let message = descriptor::build_request(&method, &req.body)?;

        let full_path = format!(
            "/{}/{}",
            method.parent_service().full_name(),
            method.name()
        );
        let path =
            PathAndQuery::try_from(full_path.clone()).map_err(|e| InvokeError::MethodPath {
                path: full_path,
                reason: e.to_string(),
            })?;

        let channel = self.open_channel(&req)?;

        let trace_id = new_trace_id();
        let span_id = new_span_id();
        let metadata = build_metadata(&req.metadata, &trace_id, &span_id)?;

        debug!(%trace_id, address = %req.server_address, path = %path, "executing gRPC request");

        let codec = DynamicCodec::new(method.output());
        let mut grpc = tonic::client::Grpc::new(channel);

        let start_micros = unix_micros();
        let started = Instant::now();

        let outcome = tokio::time::timeout(CALL_TIMEOUT, async {
            grpc.ready()
                .await
                .map_err(|e| Status::unavailable(format!("failed to connect: {e}")))?;
            let request = tonic::Request::from_parts(metadata, Extensions::default(), message);
            grpc.unary(request, path, codec).await
        })
        .await
        .unwrap_or_else(|_| Err(Status::deadline_exceeded("request timed out")));

        let elapsed = started.elapsed();

        let (status_code, status_name, body, response_headers, response_trailers, error) =
            match outcome {
                Ok(response) => {
                    let (meta, message, _) = response.into_parts();
                    // The RPC itself succeeded; a body that cannot be
                    // rendered as JSON is reported in the envelope, not as a
                    // client-input error.
                    let (body, error) = fold_body(descriptor::response_json(&message));
                    if !error.is_empty() {
                        warn!(%trace_id, error = %error, "failed to render gRPC response body");
                    }
                    (
                        0,
                        "OK".to_string(),
                        body,
                        flatten_metadata(&meta),
                        HashMap::new(),
                        error,
                    )
                }
                Err(status) => {
                    warn!(
                        %trace_id,
                        address = %req.server_address,
                        code = ?status.code(),
                        "gRPC request failed"
                    );
                    (
                        status.code() as i32,
                        status_name(status.code()),
                        String::new(),
                        HashMap::new(),
                        flatten_metadata(status.metadata()),
                        status.message().to_string(),
                    )
                }
            };

        let span_status = span_outcome(status_code, &error);
        let tags = HashMap::from([
            ("grpc.service".to_string(), req.service.clone()),
            ("grpc.method".to_string(), req.method.clone()),
            ("grpc.status_code".to_string(), status_code.to_string()),
            ("grpc.status_name".to_string(), status_name.clone()),
        ]);

        let root = Span {
            span_id: span_id.clone(),
            parent_span_id: String::new(),
            trace_id: trace_id.clone(),
            operation: format!("gRPC {}/{}", req.service, req.method),
            service_name: SERVICE_NAME.to_string(),
            start_time: start_micros,
            duration: elapsed.as_micros() as i64,
            status: Some(span_status),
            tags,
        };
        let spans = vec![root];
        self.pipeline.record_spans(spans.clone());

        let execution = crate::persist::ExecutionRecord::new(
            &req.request_id,
            &trace_id,
            status_code,
            elapsed.as_millis() as i64,
        );
        let execution_id = execution.id.clone();
        self.pipeline.record_execution(execution);

        Ok(GrpcResponse {
            duration: duration_label(elapsed),
            status_code,
            status_name,
            response_size: body.len() as i64,
            request_size: req.body.len() as i64,
            body,
            response_headers,
            response_trailers,
            error,
            request_id: req.request_id,
            execution_id,
            trace_id,
            span_id,
            spans,
        })
    }

    /// Lazily-connected channel: dial errors surface as UNAVAILABLE on the
    /// first RPC instead of failing here.
    fn open_channel(&self, req: &GrpcRequest) -> Result<tonic::transport::Channel, InvokeError> {
        let uri = if req.server_address.contains("://") {
            req.server_address.clone()
        } else if req.use_tls {
            format!("https://{}", req.server_address)
        } else {
            format!("http://{}", req.server_address)
        };

        let mut endpoint =
            Endpoint::from_shared(uri).map_err(|e| InvokeError::InvalidAddress {
                address: req.server_address.clone(),
                reason: e.to_string(),
            })?;
        if req.use_tls {
            endpoint = endpoint
                .tls_config(ClientTlsConfig::new().with_native_roots())
                .map_err(|e| InvokeError::Tls(e.to_string()))?;
        }
        Ok(endpoint.connect_lazy())
    }
}

fn build_metadata(
    entries: &HashMap<String, String>,
    trace_id: &str,
    span_id: &str,
) -> Result<MetadataMap, InvokeError> {
    let mut metadata = MetadataMap::with_capacity(entries.len() + 1);
    for (key, value) in entries {
        let name = MetadataKey::<Ascii>::from_bytes(key.to_lowercase().as_bytes())
            .map_err(|_| InvokeError::InvalidMetadata(key.clone()))?;
        let value: MetadataValue<Ascii> = value
            .parse()
            .map_err(|_| InvokeError::InvalidMetadata(key.clone()))?;
        metadata.insert(name, value);
    }

    let carrier: MetadataValue<Ascii> = traceparent(trace_id, span_id)
        .parse()
        .map_err(|_| InvokeError::InvalidMetadata(TRACEPARENT_HEADER.to_string()))?;
    metadata.insert(TRACEPARENT_HEADER, carrier);
    Ok(metadata)
}

fn flatten_metadata(metadata: &MetadataMap) -> HashMap<String, String> {
    let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
    for entry in metadata.iter() {
        if let KeyAndValueRef::Ascii(key, value) = entry {
            if let Ok(text) = value.to_str() {
                grouped
                    .entry(key.to_string())
                    .or_default()
                    .push(text.to_string());
            }
        }
    }
    grouped
        .into_iter()
        .map(|(key, values)| (key, values.join(", ")))
        .collect()
}

fn status_name(code: Code) -> String {
    match code {
        Code::Ok => "OK".to_string(),
        other => format!("{other:?}"),
    }
}

/// Body and error-message halves of a rendered response.
fn fold_body(rendered: Result<String, InvokeError>) -> (String, String) {
    match rendered {
        Ok(body) => (body, String::new()),
        Err(err) => (String::new(), err.to_string()),
    }
}

/// A call is ERROR when the RPC failed or its body could not be rendered.
fn span_outcome(status_code: i32, error: &str) -> SpanStatus {
    if status_code == 0 && error.is_empty() {
        SpanStatus::Ok
    } else {
        SpanStatus::Error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_carries_traceparent_and_caller_entries() {
        let entries = HashMap::from([("X-Api-Key".to_string(), "secret".to_string())]);
        let trace_id = "a".repeat(32);
        let span_id = "b".repeat(16);

        let metadata = build_metadata(&entries, &trace_id, &span_id).unwrap();
        assert_eq!(
            metadata.get("x-api-key").unwrap().to_str().unwrap(),
            "secret"
        );
        assert_eq!(
            metadata.get(TRACEPARENT_HEADER).unwrap().to_str().unwrap(),
            format!("00-{trace_id}-{span_id}-01")
        );
    }

    #[test]
    fn invalid_metadata_is_rejected() {
        let entries = HashMap::from([("bad key".to_string(), "v".to_string())]);
        assert!(matches!(
            build_metadata(&entries, "t", "s"),
            Err(InvokeError::InvalidMetadata(_))
        ));
    }

    #[test]
    fn multi_valued_metadata_flattens_comma_joined() {
        let mut metadata = MetadataMap::new();
        metadata.append("warning", "one".parse().unwrap());
        metadata.append("warning", "two".parse().unwrap());

        let flat = flatten_metadata(&metadata);
        assert_eq!(flat.get("warning").map(String::as_str), Some("one, two"));
    }

    #[test]
    fn status_names_match_grpc_spelling() {
        assert_eq!(status_name(Code::Ok), "OK");
        assert_eq!(status_name(Code::DeadlineExceeded), "DeadlineExceeded");
        assert_eq!(status_name(Code::Unavailable), "Unavailable");
    }

    #[test]
    fn unrenderable_body_folds_into_the_envelope() {
        let (body, error) = fold_body(Err(InvokeError::ResponseEncode("bad float".into())));
        assert!(body.is_empty());
        assert_eq!(error, "failed to encode response as JSON: bad float");
        // RPC ok, body not: the call still counts as failed in the trace.
        assert_eq!(span_outcome(0, &error), SpanStatus::Error);

        let (body, error) = fold_body(Ok(r#"{"x":1}"#.to_string()));
        assert_eq!(body, r#"{"x":1}"#);
        assert!(error.is_empty());
        assert_eq!(span_outcome(0, &error), SpanStatus::Ok);
    }

    #[test]
    fn method_path_error_names_the_path() {
        let err = InvokeError::MethodPath {
            path: "/demo.v1.Greeter/Say Hello".into(),
            reason: "invalid uri character".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid method path '/demo.v1.Greeter/Say Hello': invalid uri character"
        );
    }
}
