// Copyright (c) 2024-2025 sqlinstr Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Per-statement decision of how much to instrument

use super::OutputMode;
use crate::config::InstrumentationSettings;
use crate::trace::RecordingLevel;
use parking_lot::Mutex;
use std::sync::Arc;

/// Everything known about a statement when instrumentation is decided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingInput {
    pub output_mode: OutputMode,
    /// A diagnostics bundle will be captured
    pub collect_bundle: bool,
    /// The ambient span records verbosely
    pub ambient_verbose: bool,
    /// The transaction was elected for statistics collection
    pub collect_txn_exec_stats: bool,
    /// No logical plan has been saved for this statement yet
    pub save_plan_for_stats: bool,
    /// A statement trace hook is installed
    pub has_trace_hook: bool,
}

/// Which span the statement runs under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanPlan {
    /// Run in the caller's context; nothing to finish
    NoSpan,
    /// Read the ambient span's recording but leave it open
    BorrowAmbient,
    /// Open a child span at this level and finish it afterwards
    Child(RecordingLevel),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingDecision {
    pub collect_exec_stats: bool,
    pub span: SpanPlan,
}

/// Decides whether a statement is traced and whether it collects execution
/// statistics.
///
/// The sample rate is read from the injected settings on every draw, so a
/// runtime change applies to the next statement.
#[derive(Debug)]
pub struct SamplingPolicy {
    settings: Arc<InstrumentationSettings>,
    rng: Mutex<fastrand::Rng>,
}

impl SamplingPolicy {
    pub fn new(settings: Arc<InstrumentationSettings>) -> Self {
        Self {
            settings,
            rng: Mutex::new(fastrand::Rng::new()),
        }
    }

    /// Reproducible draws
    pub fn with_seed(settings: Arc<InstrumentationSettings>, seed: u64) -> Self {
        Self {
            settings,
            rng: Mutex::new(fastrand::Rng::with_seed(seed)),
        }
    }

    pub fn settings(&self) -> &Arc<InstrumentationSettings> {
        &self.settings
    }

    /// One draw under the configured rate. A rate of 0 never samples and a
    /// rate of 1 always does.
    pub fn sample(&self) -> bool {
        let rate = self.settings.sample_rate();
        if rate.is_disabled() {
            return false;
        }
        self.rng.lock().f64() < rate.get()
    }

    pub fn decide(&self, input: &SamplingInput) -> SamplingDecision {
        if input.ambient_verbose {
            // Statistics show up in the caller's trace for free.
            return SamplingDecision {
                collect_exec_stats: true,
                span: SpanPlan::BorrowAmbient,
            };
        }

        let mut collect_exec_stats = input.collect_txn_exec_stats;
        if !collect_exec_stats && input.save_plan_for_stats {
            // first execution of this statement: sample its statistics
            collect_exec_stats = self.sample();
        }

        if !input.collect_bundle
            && !input.has_trace_hook
            && input.output_mode == OutputMode::Unmodified
        {
            let span = if collect_exec_stats {
                SpanPlan::Child(RecordingLevel::Structured)
            } else {
                SpanPlan::NoSpan
            };
            return SamplingDecision {
                collect_exec_stats,
                span,
            };
        }

        SamplingDecision {
            collect_exec_stats: true,
            span: SpanPlan::Child(RecordingLevel::Verbose),
        }
    }
}
