// Copyright (c) 2024-2025 sqlinstr Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! In-process tracing primitive
//!
//! Spans record structured payloads (execution statistics emitted by
//! distributed components) and, when verbose, free-form log messages. Many
//! producers may append to the same span concurrently; the owner reads the
//! whole recording once producers are done.

pub mod recording;
pub mod span;
pub mod tracer;

pub use recording::{LogRecord, RecordedSpan, Recording, StructuredRecord, TypedRecord};
pub use span::{RecordingLevel, RecordingMark, Span};
pub use tracer::{ensure_child_span, LocalTracer, TraceContext, Tracer};
