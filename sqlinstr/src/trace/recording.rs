// Copyright (c) 2024-2025 sqlinstr Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Finished (or snapshotted) span recordings

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// A free-form message logged into a verbose span
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub time: DateTime<Utc>,
    pub message: String,
}

/// A typed payload attached to a span
///
/// The payload is kept as JSON together with a type tag so producers and
/// consumers only agree on the tag and the schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredRecord {
    pub type_url: String,
    pub payload: serde_json::Value,
}

impl StructuredRecord {
    pub fn new<T: Serialize>(type_url: impl Into<String>, value: &T) -> Self {
        Self {
            type_url: type_url.into(),
            payload: serde_json::to_value(value).unwrap_or(serde_json::Value::Null),
        }
    }

    pub fn is<T: TypedRecord>(&self) -> bool {
        self.type_url == T::TYPE_URL
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// A payload type with a stable tag
pub trait TypedRecord: Serialize + DeserializeOwned {
    const TYPE_URL: &'static str;

    fn to_record(&self) -> StructuredRecord {
        StructuredRecord::new(Self::TYPE_URL, self)
    }
}

/// One span of a recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedSpan {
    pub trace_id: Uuid,
    pub span_id: u64,
    pub parent_span_id: Option<u64>,
    pub operation: String,
    pub start_time: DateTime<Utc>,
    pub duration: Duration,
    pub finished: bool,
    pub verbose: bool,
    pub logs: Vec<LogRecord>,
    pub structured: Vec<StructuredRecord>,
}

/// The spans collected under a root span, root first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    pub spans: Vec<RecordedSpan>,
}

impl Recording {
    pub fn new(spans: Vec<RecordedSpan>) -> Self {
        Self { spans }
    }

    pub fn spans(&self) -> &[RecordedSpan] {
        &self.spans
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    /// All structured payloads of the given type across all spans
    pub fn structured_of<'a>(
        &'a self,
        type_url: &'a str,
    ) -> impl Iterator<Item = (&'a RecordedSpan, &'a StructuredRecord)> + 'a {
        self.spans.iter().flat_map(move |span| {
            span.structured
                .iter()
                .filter(move |r| r.type_url == type_url)
                .map(move |r| (span, r))
        })
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
    }

    /// Human readable rendering: one header line per span, then its messages,
    /// indented by depth in the span tree
    pub fn render_text(&self) -> String {
        let mut output = String::new();
        let mut depths: std::collections::HashMap<u64, usize> = std::collections::HashMap::new();
        for span in &self.spans {
            let depth = span
                .parent_span_id
                .and_then(|p| depths.get(&p).copied())
                .map(|d| d + 1)
                .unwrap_or(0);
            depths.insert(span.span_id, depth);
            let indent = "    ".repeat(depth);
            output.push_str(&format!(
                "{}=== operation:{} span:{} ({:.3}ms)\n",
                indent,
                span.operation,
                span.span_id,
                span.duration.as_secs_f64() * 1000.0
            ));
            for log in &span.logs {
                output.push_str(&format!(
                    "{}{} {}\n",
                    indent,
                    log.time.format("%H:%M:%S%.6f"),
                    log.message
                ));
            }
        }
        output
    }
}
