//! Outbound REST executor.
//!
//! Issues an arbitrary HTTP request on behalf of the caller, times the
//! observable phases, and reports the upstream response together with the
//! trace context and the spans recorded locally. Transport failures come
//! back inside the envelope with `error_msg` set and an ERROR root span -
//! a target being down is a result, not a client mistake.

use std::collections::HashMap;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, warn};

use crate::pipeline::TracePipeline;
use crate::trace::context::{new_span_id, new_trace_id, traceparent, TRACEPARENT_HEADER};
use crate::trace::model::{Span, SpanStatus};
use crate::SERVICE_NAME;

use super::{
    duration_label, flatten_headers, ExecError, RestRequest, RestResponse, TimingInfo, CALL_TIMEOUT,
};

pub struct RestExecutor {
    client: reqwest::Client,
    pipeline: TracePipeline,
}

impl RestExecutor {
    pub fn new(pipeline: TracePipeline) -> Self {
        let client = reqwest::Client::builder()
            .timeout(CALL_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client, pipeline }
    }

    /// Execute one HTTP request. `Err` means the input could not be turned
    /// into a request at all; everything past that point is reported in the
    /// returned envelope.
    pub async fn execute(&self, req: RestRequest) -> Result<RestResponse, ExecError> {
        let method = reqwest::Method::from_bytes(req.method.to_uppercase().as_bytes())
            .map_err(|_| ExecError::InvalidMethod(req.method.clone()))?;
        let url = reqwest::Url::parse(&req.url).map_err(|e| ExecError::InvalidUrl {
            url: req.url.clone(),
            reason: e.to_string(),
        })?;
        let headers = build_headers(&req.headers)?;

        let trace_id = new_trace_id();
        let span_id = new_span_id();
        let request_size = req.body.len() as i64;

        debug!(%trace_id, method = %method, url = %req.url, "executing REST request");

        let start_micros = unix_micros();
        let started = Instant::now();

        let mut request = self
            .client
            .request(method.clone(), url)
            .headers(headers)
            .header(TRACEPARENT_HEADER, traceparent(&trace_id, &span_id));
        if !req.body.is_empty() {
            request = request.body(req.body.clone());
        }

        let sent = match request.send().await {
            Ok(resp) => resp,
            Err(err) => {
                return Ok(self.transport_failure(&req, &method, trace_id, span_id, start_micros, started, err));
            }
        };

        // Headers are in hand: everything up to here is the server turnaround.
        let server_processing = started.elapsed();
        let status = sent.status().as_u16();
        let response_headers = flatten_headers(sent.headers());

        let (body, read_error) = match sent.bytes().await {
            Ok(bytes) => (String::from_utf8_lossy(&bytes).into_owned(), String::new()),
            Err(err) => (String::new(), err.to_string()),
        };
        let elapsed = started.elapsed();
        let content_transfer = elapsed.saturating_sub(server_processing);

        let timing = TimingInfo {
            server_processing_us: server_processing.as_micros() as i64,
            content_transfer_us: content_transfer.as_micros() as i64,
            ..Default::default()
        };

        let span_status = if status >= 400 || !read_error.is_empty() {
            SpanStatus::Error
        } else {
            SpanStatus::Ok
        };
        let mut tags = HashMap::from([
            ("http.method".to_string(), method.to_string()),
            ("http.url".to_string(), req.url.clone()),
            ("http.status_code".to_string(), status.to_string()),
        ]);
        if !read_error.is_empty() {
            tags.insert("error.message".to_string(), read_error.clone());
        }

        let root = Span {
            span_id: span_id.clone(),
            parent_span_id: String::new(),
            trace_id: trace_id.clone(),
            operation: format!("{} {}", method, req.url),
            service_name: SERVICE_NAME.to_string(),
            start_time: start_micros,
            duration: elapsed.as_micros() as i64,
            status: Some(span_status),
            tags,
        };
        let mut spans = vec![root];
        spans.extend(phase_spans(&trace_id, &span_id, start_micros, &timing));

        self.pipeline.record_spans(spans.clone());
        let execution = crate::persist::ExecutionRecord::new(
            &req.request_id,
            &trace_id,
            i32::from(status),
            elapsed.as_millis() as i64,
        );
        let execution_id = execution.id.clone();
        self.pipeline.record_execution(execution);

        Ok(RestResponse {
            duration: duration_label(elapsed),
            status_code: status,
            response_size: body.len() as i64,
            request_size,
            body,
            headers: response_headers,
            error: read_error,
            timing,
            request_id: req.request_id,
            execution_id,
            trace_id,
            span_id,
            spans,
        })
    }

    /// The upstream never answered: record an ERROR root span and report the
    /// failure in the envelope with a zero status.
    fn transport_failure(
        &self,
        req: &RestRequest,
        method: &reqwest::Method,
        trace_id: String,
        span_id: String,
        start_micros: i64,
        started: Instant,
        err: reqwest::Error,
    ) -> RestResponse {
        let elapsed = started.elapsed();
        warn!(%trace_id, url = %req.url, error = %err, "REST request failed");

        let root = Span {
            span_id: span_id.clone(),
            parent_span_id: String::new(),
            trace_id: trace_id.clone(),
            operation: format!("{} {}", method, req.url),
            service_name: SERVICE_NAME.to_string(),
            start_time: start_micros,
            duration: elapsed.as_micros() as i64,
            status: Some(SpanStatus::Error),
            tags: HashMap::from([
                ("http.method".to_string(), method.to_string()),
                ("http.url".to_string(), req.url.clone()),
                ("error.message".to_string(), err.to_string()),
            ]),
        };
        let spans = vec![root];
        self.pipeline.record_spans(spans.clone());

        let execution = crate::persist::ExecutionRecord::new(
            &req.request_id,
            &trace_id,
            0,
            elapsed.as_millis() as i64,
        );
        let execution_id = execution.id.clone();
        self.pipeline.record_execution(execution);

        RestResponse {
            duration: duration_label(elapsed),
            status_code: 0,
            error: err.to_string(),
            request_size: req.body.len() as i64,
            request_id: req.request_id.clone(),
            execution_id,
            trace_id,
            span_id,
            spans,
            ..Default::default()
        }
    }
}

/// Child spans for the timing phases the client observed, laid out
/// back-to-back under the root span. Zero-length phases produce no span.
pub(crate) fn phase_spans(
    trace_id: &str,
    root_span_id: &str,
    start_micros: i64,
    timing: &TimingInfo,
) -> Vec<Span> {
    let phases = [
        ("dns_lookup", timing.dns_lookup_us),
        ("tcp_connect", timing.tcp_connect_us),
        ("tls_handshake", timing.tls_handshake_us),
        ("server_processing", timing.server_processing_us),
        ("content_transfer", timing.content_transfer_us),
    ];

    let mut offset = start_micros;
    let mut spans = Vec::new();
    for (name, duration) in phases {
        if duration <= 0 {
            continue;
        }
        spans.push(Span {
            span_id: new_span_id(),
            parent_span_id: root_span_id.to_string(),
            trace_id: trace_id.to_string(),
            operation: name.to_string(),
            service_name: SERVICE_NAME.to_string(),
            start_time: offset,
            duration,
            status: Some(SpanStatus::Ok),
            tags: HashMap::new(),
        });
        offset += duration;
    }
    spans
}

pub(crate) fn build_headers(headers: &HashMap<String, String>) -> Result<HeaderMap, ExecError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (key, value) in headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|_| ExecError::InvalidHeader(key.clone()))?;
        let value =
            HeaderValue::from_str(value).map_err(|_| ExecError::InvalidHeader(key.clone()))?;
        map.insert(name, value);
    }
    Ok(map)
}

pub(crate) fn unix_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}
