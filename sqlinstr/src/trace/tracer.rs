// Copyright (c) 2024-2025 sqlinstr Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Span creation and the ambient trace context

use super::span::{RecordingLevel, Span};
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Creates spans
pub trait Tracer: Send + Sync {
    /// Start a span. A child inherits the parent's trace and never records
    /// less than its parent.
    fn start_span(&self, operation: &str, parent: Option<&Span>, level: RecordingLevel) -> Span;
}

/// The ambient span a statement executes under, if any
#[derive(Debug, Clone, Default)]
pub struct TraceContext {
    span: Option<Span>,
}

impl TraceContext {
    /// A context with no span
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_span(span: Span) -> Self {
        Self { span: Some(span) }
    }

    pub fn span(&self) -> Option<&Span> {
        self.span.as_ref()
    }
}

/// Open a child of the context's span (or a root span when the context has
/// none) and return a context carrying it
pub fn ensure_child_span(
    tracer: &dyn Tracer,
    ctx: &TraceContext,
    operation: &str,
    level: RecordingLevel,
) -> (TraceContext, Span) {
    let span = tracer.start_span(operation, ctx.span(), level);
    (TraceContext::with_span(span.clone()), span)
}

/// A tracer keeping all spans in process memory
#[derive(Debug, Default)]
pub struct LocalTracer {
    next_span_id: AtomicU64,
    spans_started: AtomicU64,
}

impl LocalTracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of spans this tracer has started
    pub fn spans_started(&self) -> u64 {
        self.spans_started.load(Ordering::Relaxed)
    }
}

impl Tracer for LocalTracer {
    fn start_span(&self, operation: &str, parent: Option<&Span>, level: RecordingLevel) -> Span {
        let span_id = self.next_span_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.spans_started.fetch_add(1, Ordering::Relaxed);
        match parent {
            Some(parent) => {
                let level = level.max(parent.recording_level());
                Span::new_child(parent, span_id, operation, level)
            }
            None => Span::new(Uuid::new_v4(), span_id, None, operation, level),
        }
    }
}
