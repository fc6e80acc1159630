// Copyright (c) 2024-2025 sqlinstr Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! The statement's trace span and who is responsible for finishing it

use super::sampling::SpanPlan;
use crate::config::Strictness;
use crate::error::InstrumentationError;
use crate::trace::{ensure_child_span, Recording, RecordingMark, Span, TraceContext, Tracer};

const STATEMENT_SPAN_NAME: &str = "traced statement";

/// The span a statement's instrumentation reads its trace from.
///
/// An `Owned` span was opened for the statement and is finished exactly once,
/// either by [`StatementSpan::finish`] or, if the statement unwinds before
/// getting there, when the value is dropped. A `Borrowed` span belongs to the
/// caller and is never finished here; only what it recorded after the mark
/// belongs to the statement.
#[derive(Debug, Default)]
pub enum StatementSpan {
    #[default]
    None,
    Owned(Span),
    Borrowed(Span, RecordingMark),
}

impl StatementSpan {
    /// Carry out a [`SpanPlan`] in the context `ctx`.
    ///
    /// A context without a span is an assertion failure: strict mode reports
    /// it, lenient mode logs it and opens a root span where a child was
    /// planned. The check runs for every plan, `NoSpan` included, so under
    /// strict mode an uninstrumented statement without an ambient span also
    /// fails `setup`.
    pub fn open(
        tracer: &dyn Tracer,
        ctx: &TraceContext,
        plan: SpanPlan,
        strictness: Strictness,
    ) -> Result<(TraceContext, StatementSpan), InstrumentationError> {
        if ctx.span().is_none() {
            let msg = "the context doesn't have a tracing span";
            if strictness == Strictness::Strict {
                return Err(InstrumentationError::Assertion(msg.to_string()));
            }
            log::warn!("{}", msg);
        }

        match plan {
            SpanPlan::NoSpan => Ok((ctx.clone(), StatementSpan::None)),
            SpanPlan::BorrowAmbient => match ctx.span() {
                Some(span) => Ok((ctx.clone(), StatementSpan::Borrowed(span.clone(), span.mark()))),
                None => Err(InstrumentationError::Assertion(
                    "no ambient span to borrow".to_string(),
                )),
            },
            SpanPlan::Child(level) => {
                let (ctx, span) = ensure_child_span(tracer, ctx, STATEMENT_SPAN_NAME, level);
                log::trace!("opened span {} at {:?}", span.span_id(), level);
                Ok((ctx, StatementSpan::Owned(span)))
            }
        }
    }

    /// Whether `finish` has work to do
    pub fn needs_finish(&self) -> bool {
        !matches!(self, StatementSpan::None)
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, StatementSpan::Owned(_))
    }

    pub fn is_borrowed(&self) -> bool {
        matches!(self, StatementSpan::Borrowed(..))
    }

    pub fn span(&self) -> Option<&Span> {
        match self {
            StatementSpan::None => None,
            StatementSpan::Owned(span) | StatementSpan::Borrowed(span, _) => Some(span),
        }
    }

    /// Take the span's recording, finishing the span if it is owned. Leaves
    /// `None` behind, so a second call returns `None`.
    pub fn finish(&mut self) -> Option<Recording> {
        let taken = std::mem::take(self);
        match &taken {
            StatementSpan::None => None,
            StatementSpan::Owned(span) => Some(span.finish_and_get_recording()),
            StatementSpan::Borrowed(span, mark) => Some(span.get_recording_since(mark)),
        }
    }
}

impl Drop for StatementSpan {
    fn drop(&mut self) {
        if let StatementSpan::Owned(span) = self {
            if span.finish() {
                log::warn!(
                    "span {} ({}) dropped without being finished",
                    span.span_id(),
                    span.operation()
                );
            }
        }
    }
}
