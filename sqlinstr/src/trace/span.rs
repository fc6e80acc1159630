// Copyright (c) 2024-2025 sqlinstr Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Trace spans with concurrent append and single-consumer read

use super::recording::{LogRecord, RecordedSpan, Recording, StructuredRecord};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// How much a span records
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RecordingLevel {
    /// Nothing is recorded
    Off,
    /// Structured payloads only
    Structured,
    /// Structured payloads and log messages
    Verbose,
}

impl RecordingLevel {
    pub fn records_structured(self) -> bool {
        self >= RecordingLevel::Structured
    }

    pub fn is_verbose(self) -> bool {
        self == RecordingLevel::Verbose
    }
}

/// Open children a span keeps track of; later children are not linked
const MAX_OPEN_CHILDREN: usize = 1000;
/// Spans of finished children a span keeps in its recording
const MAX_FINISHED_CHILD_SPANS: usize = 1000;

#[derive(Debug, Default)]
struct SpanState {
    logs: Vec<LogRecord>,
    structured: Vec<StructuredRecord>,
    /// Open children, tagged with the order they were started in
    children: Vec<(u64, Span)>,
    /// Recordings handed over by finished children
    finished_children: Vec<(u64, RecordedSpan)>,
    next_child_seq: u64,
    dropped_child_spans: u64,
    imported: Vec<RecordedSpan>,
    duration: Option<Duration>,
}

/// A position in a span's recording.
///
/// [`Span::get_recording_since`] returns only what was recorded after the
/// mark was taken, which lets a statement read its share of a long-lived
/// span it does not own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordingMark {
    logs: usize,
    structured: usize,
    imported: usize,
    child_seq: u64,
}

#[derive(Debug)]
struct SpanInner {
    trace_id: Uuid,
    span_id: u64,
    parent_span_id: Option<u64>,
    operation: String,
    level: RecordingLevel,
    start: Instant,
    start_time: DateTime<Utc>,
    finished: AtomicBool,
    parent: Option<Weak<SpanInner>>,
    state: Mutex<SpanState>,
}

/// A trace span
///
/// Cloning a `Span` yields another handle to the same span. Handles may be
/// shared with any number of producer threads.
#[derive(Debug, Clone)]
pub struct Span {
    inner: Arc<SpanInner>,
}

impl Span {
    pub(crate) fn new(
        trace_id: Uuid,
        span_id: u64,
        parent_span_id: Option<u64>,
        operation: &str,
        level: RecordingLevel,
    ) -> Self {
        Self::build(trace_id, span_id, parent_span_id, None, operation, level)
    }

    /// Start a span under `parent` and link it into the parent's recording
    pub(crate) fn new_child(
        parent: &Span,
        span_id: u64,
        operation: &str,
        level: RecordingLevel,
    ) -> Self {
        let child = Self::build(
            parent.trace_id(),
            span_id,
            Some(parent.span_id()),
            Some(Arc::downgrade(&parent.inner)),
            operation,
            level,
        );
        parent.add_child(&child);
        child
    }

    fn build(
        trace_id: Uuid,
        span_id: u64,
        parent_span_id: Option<u64>,
        parent: Option<Weak<SpanInner>>,
        operation: &str,
        level: RecordingLevel,
    ) -> Self {
        Self {
            inner: Arc::new(SpanInner {
                trace_id,
                span_id,
                parent_span_id,
                operation: operation.to_string(),
                level,
                start: Instant::now(),
                start_time: Utc::now(),
                finished: AtomicBool::new(false),
                parent,
                state: Mutex::new(SpanState::default()),
            }),
        }
    }

    pub fn trace_id(&self) -> Uuid {
        self.inner.trace_id
    }

    pub fn span_id(&self) -> u64 {
        self.inner.span_id
    }

    pub fn operation(&self) -> &str {
        &self.inner.operation
    }

    pub fn recording_level(&self) -> RecordingLevel {
        self.inner.level
    }

    pub fn is_verbose(&self) -> bool {
        self.inner.level.is_verbose()
    }

    pub fn is_finished(&self) -> bool {
        self.inner.finished.load(Ordering::Acquire)
    }

    /// Whether two handles refer to the same span
    pub fn same_span(&self, other: &Span) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Attach a structured payload; dropped when not recording or finished
    pub fn record_structured(&self, record: StructuredRecord) {
        if !self.inner.level.records_structured() || self.is_finished() {
            return;
        }
        self.inner.state.lock().structured.push(record);
    }

    /// Log a message; only verbose spans keep messages
    pub fn record_message(&self, message: impl Into<String>) {
        if !self.is_verbose() || self.is_finished() {
            return;
        }
        self.inner.state.lock().logs.push(LogRecord {
            time: Utc::now(),
            message: message.into(),
        });
    }

    /// Import spans recorded elsewhere (for example on a remote worker)
    pub fn import_remote_recording(&self, recording: Recording) {
        if !self.inner.level.records_structured() || self.is_finished() {
            return;
        }
        self.inner.state.lock().imported.extend(recording.spans);
    }

    fn add_child(&self, child: &Span) {
        if self.is_finished() {
            return;
        }
        let mut state = self.inner.state.lock();
        let seq = state.next_child_seq;
        state.next_child_seq += 1;
        if state.children.len() >= MAX_OPEN_CHILDREN {
            log::trace!(
                "span {} has {} open children; not linking span {}",
                self.span_id(),
                MAX_OPEN_CHILDREN,
                child.span_id()
            );
            return;
        }
        state.children.push((seq, child.clone()));
    }

    /// Unlink a finished child and keep its recording, up to a limit
    fn child_finished(&self, child: &Span, recording: Recording) {
        let mut state = self.inner.state.lock();
        let Some(pos) = state.children.iter().position(|(_, c)| c.same_span(child)) else {
            return;
        };
        let (seq, _) = state.children.remove(pos);
        if self.is_finished() || !self.inner.level.records_structured() {
            return;
        }
        let room = MAX_FINISHED_CHILD_SPANS.saturating_sub(state.finished_children.len());
        let total = recording.spans.len();
        if total > room {
            state.dropped_child_spans += (total - room) as u64;
        }
        state
            .finished_children
            .extend(recording.spans.into_iter().take(room).map(|s| (seq, s)));
    }

    /// Mark the span finished. Returns false if it already was.
    pub fn finish(&self) -> bool {
        if self.inner.finished.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.inner.state.lock().duration = Some(self.inner.start.elapsed());
        if let Some(parent) = self.inner.parent.as_ref().and_then(Weak::upgrade) {
            let parent = Span { inner: parent };
            let recording = if parent.inner.level.records_structured() {
                self.get_recording()
            } else {
                Recording::default()
            };
            parent.child_finished(self, recording);
        }
        true
    }

    /// Finish the span and return everything recorded under it
    pub fn finish_and_get_recording(&self) -> Recording {
        if !self.finish() {
            log::warn!("span {} ({}) finished twice", self.span_id(), self.operation());
        }
        self.get_recording()
    }

    /// Snapshot the recording without finishing the span
    pub fn get_recording(&self) -> Recording {
        self.get_recording_since(&RecordingMark::default())
    }

    /// The current position in this span's recording
    pub fn mark(&self) -> RecordingMark {
        let state = self.inner.state.lock();
        RecordingMark {
            logs: state.logs.len(),
            structured: state.structured.len(),
            imported: state.imported.len(),
            child_seq: state.next_child_seq,
        }
    }

    /// Snapshot what was recorded after `mark`: later messages and payloads
    /// of this span, children started later, and later imports
    pub fn get_recording_since(&self, mark: &RecordingMark) -> Recording {
        if self.inner.level == RecordingLevel::Off {
            return Recording::default();
        }
        let mut spans = Vec::new();
        self.collect_into(&mut spans, mark);
        Recording::new(spans)
    }

    /// Spans of finished children left out of the recording
    pub fn dropped_child_spans(&self) -> u64 {
        self.inner.state.lock().dropped_child_spans
    }

    fn collect_into(&self, spans: &mut Vec<RecordedSpan>, mark: &RecordingMark) {
        let (own, children, finished, imported) = {
            let state = self.inner.state.lock();
            let own = RecordedSpan {
                trace_id: self.inner.trace_id,
                span_id: self.inner.span_id,
                parent_span_id: self.inner.parent_span_id,
                operation: self.inner.operation.clone(),
                start_time: self.inner.start_time,
                duration: state.duration.unwrap_or_else(|| self.inner.start.elapsed()),
                finished: state.duration.is_some(),
                verbose: self.is_verbose(),
                logs: state.logs.get(mark.logs..).unwrap_or_default().to_vec(),
                structured: state
                    .structured
                    .get(mark.structured..)
                    .unwrap_or_default()
                    .to_vec(),
            };
            let children: Vec<Span> = state
                .children
                .iter()
                .filter(|(seq, _)| *seq >= mark.child_seq)
                .map(|(_, c)| c.clone())
                .collect();
            let finished: Vec<RecordedSpan> = state
                .finished_children
                .iter()
                .filter(|(seq, _)| *seq >= mark.child_seq)
                .map(|(_, s)| s.clone())
                .collect();
            let imported = state.imported.get(mark.imported..).unwrap_or_default().to_vec();
            (own, children, finished, imported)
        };
        spans.push(own);
        for child in children {
            child.collect_into(spans, &RecordingMark::default());
        }
        spans.extend(finished);
        spans.extend(imported);
    }
}
