//! Hand-rolled OTLP JSON trace-export schema.
//!
//! Mirrors the subset of the OTLP JSON encoding this system consumes. Kept
//! separate from the protobuf path because OTLP JSON has its own quirks:
//! ids are hex strings, int attribute values are decimal strings, and
//! nanosecond timestamps arrive as either strings or numbers depending on
//! the exporting SDK.

use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceExport {
    #[serde(default)]
    pub resource_spans: Vec<ResourceSpans>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpans {
    #[serde(default)]
    pub resource: Resource,
    #[serde(default)]
    pub scope_spans: Vec<ScopeSpans>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Resource {
    #[serde(default)]
    pub attributes: Vec<KeyValue>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ScopeSpans {
    #[serde(default)]
    pub spans: Vec<WireSpan>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyValue {
    pub key: String,
    #[serde(default)]
    pub value: WireValue,
}

/// OTLP JSON attribute value. `intValue` is a decimal string on the wire.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireValue {
    #[serde(default)]
    pub string_value: String,
    #[serde(default)]
    pub int_value: String,
}

impl WireValue {
    /// Tag representation: prefer the string value, fall back to the decimal
    /// int string; neither present means the attribute is dropped.
    pub fn as_tag(&self) -> Option<String> {
        if !self.string_value.is_empty() {
            Some(self.string_value.clone())
        } else if !self.int_value.is_empty() {
            Some(self.int_value.clone())
        } else {
            None
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireSpan {
    #[serde(default)]
    pub trace_id: String,
    #[serde(default)]
    pub span_id: String,
    #[serde(default)]
    pub parent_span_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub start_time_unix_nano: NanoTime,
    #[serde(default)]
    pub end_time_unix_nano: NanoTime,
    #[serde(default)]
    pub status: Option<WireStatus>,
    #[serde(default)]
    pub attributes: Vec<KeyValue>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WireStatus {
    #[serde(default)]
    pub code: i64,
}

/// Nanosecond timestamp that tolerates both wire spellings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum NanoTime {
    Text(String),
    Number(i64),
    Float(f64),
}

impl Default for NanoTime {
    fn default() -> Self {
        NanoTime::Number(0)
    }
}

impl NanoTime {
    /// Nanoseconds since epoch; unparseable input counts as zero.
    pub fn nanos(&self) -> i64 {
        match self {
            NanoTime::Text(s) => s.parse().unwrap_or(0),
            NanoTime::Number(n) => *n,
            NanoTime::Float(f) => *f as i64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nano_time_accepts_string_and_number() {
        let v: NanoTime = serde_json::from_str("\"1700000000000000000\"").unwrap();
        assert_eq!(v.nanos(), 1_700_000_000_000_000_000);

        let v: NanoTime = serde_json::from_str("1700000000000000000").unwrap();
        assert_eq!(v.nanos(), 1_700_000_000_000_000_000);

        let v: NanoTime = serde_json::from_str("\"garbage\"").unwrap();
        assert_eq!(v.nanos(), 0);
    }

    #[test]
    fn tag_prefers_string_over_int() {
        let both = WireValue {
            string_value: "s".into(),
            int_value: "7".into(),
        };
        assert_eq!(both.as_tag().as_deref(), Some("s"));

        let int_only = WireValue {
            string_value: String::new(),
            int_value: "7".into(),
        };
        assert_eq!(int_only.as_tag().as_deref(), Some("7"));

        let neither = WireValue::default();
        assert!(neither.as_tag().is_none());
    }
}
