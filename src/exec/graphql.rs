//! Outbound GraphQL executor.
//!
//! GraphQL-over-HTTP: the query, variables, and operation name are posted
//! as a JSON document. Success is judged on two levels - the HTTP status
//! first, then the response body's top-level `errors` array, since GraphQL
//! servers routinely report resolver failures inside a 200.

use std::collections::HashMap;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, warn};

use crate::pipeline::TracePipeline;
use crate::trace::context::{new_span_id, new_trace_id, traceparent, TRACEPARENT_HEADER};
use crate::trace::model::{Span, SpanStatus};
use crate::SERVICE_NAME;

use super::rest::{build_headers, unix_micros};
use super::{duration_label, flatten_headers, ExecError, GraphqlRequest, GraphqlResponse, CALL_TIMEOUT};

/// The JSON document a GraphQL endpoint expects.
#[derive(Serialize)]
struct GraphqlBody<'a> {
    query: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    variables: Option<&'a serde_json::Map<String, serde_json::Value>>,
    #[serde(rename = "operationName", skip_serializing_if = "str::is_empty")]
    operation_name: &'a str,
}

pub struct GraphqlExecutor {
    client: reqwest::Client,
    pipeline: TracePipeline,
}

impl GraphqlExecutor {
    pub fn new(pipeline: TracePipeline) -> Self {
        let client = reqwest::Client::builder()
            .timeout(CALL_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client, pipeline }
    }

    pub async fn execute(&self, req: GraphqlRequest) -> Result<GraphqlResponse, ExecError> {
        let url = reqwest::Url::parse(&req.url).map_err(|e| ExecError::InvalidUrl {
            url: req.url.clone(),
            reason: e.to_string(),
        })?;
        let headers = build_headers(&req.headers)?;

        let payload = serde_json::to_vec(&GraphqlBody {
            query: &req.query,
            variables: req.variables.as_ref(),
            operation_name: &req.operation_name,
        })
        .map_err(|e| ExecError::BodyEncode(e.to_string()))?;
        let request_size = payload.len() as i64;

        let trace_id = new_trace_id();
        let span_id = new_span_id();
        let operation = operation_label(&req);

        debug!(%trace_id, url = %req.url, operation = %req.operation_name, "executing GraphQL request");

        let start_micros = unix_micros();
        let started = Instant::now();

        let sent = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .headers(headers)
            .header(TRACEPARENT_HEADER, traceparent(&trace_id, &span_id))
            .body(payload)
            .send()
            .await;

        let (status, response_headers, body, error) = match sent {
            Ok(resp) => {
                let status = resp.status().as_u16();
                let headers = flatten_headers(resp.headers());
                match resp.text().await {
                    Ok(text) => (status, headers, text, String::new()),
                    Err(err) => (status, headers, String::new(), err.to_string()),
                }
            }
            Err(err) => {
                warn!(%trace_id, url = %req.url, error = %err, "GraphQL request failed");
                (0, HashMap::new(), String::new(), err.to_string())
            }
        };
        let elapsed = started.elapsed();

        let failed = !error.is_empty() || status >= 400 || body_has_errors(&body);
        let mut tags = HashMap::from([
            ("graphql.url".to_string(), req.url.clone()),
            ("http.status_code".to_string(), status.to_string()),
        ]);
        if !req.operation_name.is_empty() {
            tags.insert("graphql.operation".to_string(), req.operation_name.clone());
        }
        if !error.is_empty() {
            tags.insert("error.message".to_string(), error.clone());
        }

        let root = Span {
            span_id: span_id.clone(),
            parent_span_id: String::new(),
            trace_id: trace_id.clone(),
            operation,
            service_name: SERVICE_NAME.to_string(),
            start_time: start_micros,
            duration: elapsed.as_micros() as i64,
            status: Some(if failed { SpanStatus::Error } else { SpanStatus::Ok }),
            tags,
        };
        let spans = vec![root];
        self.pipeline.record_spans(spans.clone());

        let execution = crate::persist::ExecutionRecord::new(
            &req.request_id,
            &trace_id,
            i32::from(status),
            elapsed.as_millis() as i64,
        );
        let execution_id = execution.id.clone();
        self.pipeline.record_execution(execution);

        Ok(GraphqlResponse {
            duration: duration_label(elapsed),
            status_code: status,
            response_size: body.len() as i64,
            request_size,
            body,
            headers: response_headers,
            error,
            request_id: req.request_id,
            execution_id,
            trace_id,
            span_id,
            spans,
        })
    }
}

fn operation_label(req: &GraphqlRequest) -> String {
    format!("GraphQL {}", req.url)
}

/// A 200 with a non-empty top-level `errors` array is still a failed query.
fn body_has_errors(body: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("errors").cloned())
        .and_then(|e| e.as_array().map(|a| !a.is_empty()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_errors_detection() {
        assert!(body_has_errors(r#"{"errors":[{"message":"boom"}]}"#));
        assert!(!body_has_errors(r#"{"errors":[]}"#));
        assert!(!body_has_errors(r#"{"data":{"x":1}}"#));
        assert!(!body_has_errors("not json"));
        assert!(!body_has_errors(""));
    }

    #[test]
    fn graphql_body_omits_empty_fields() {
        let body = GraphqlBody {
            query: "{ hero { name } }",
            variables: None,
            operation_name: "",
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["query"], "{ hero { name } }");
        assert!(json.get("variables").is_none());
        assert!(json.get("operationName").is_none());
    }
}
