// Copyright (c) 2024-2025 sqlinstr Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Per-statement instrumentation: sampling, span ownership and the
//! controller tying them to statistics, bundles and EXPLAIN ANALYZE output

pub mod helper;
pub mod sampling;
pub mod span;

pub use helper::{
    FinishArgs, InstrumentationEnv, InstrumentationHelper, OutputMode, PlanEstimates,
    SetupOutcome, StatementInfo, StatementTraceHook,
};
pub use sampling::{SamplingDecision, SamplingInput, SamplingPolicy, SpanPlan};
pub use span::StatementSpan;
