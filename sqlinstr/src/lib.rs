// Copyright (c) 2024-2025 sqlinstr Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! sqlinstr - Per-statement execution instrumentation for distributed SQL
//!
//! sqlinstr decides, for every statement a SQL engine executes, whether to
//! trace it, collect execution statistics, capture a diagnostics bundle or
//! render an EXPLAIN ANALYZE report. It keeps the common case (no
//! instrumentation) cheap and guarantees that any trace span it opens is
//! finished exactly once.
//!
//! # Lifecycle
//!
//! ```ignore
//! let mut ih = InstrumentationHelper::new();
//! ih.set_output_mode(OutputMode::ExplainAnalyzePlan, ExplainFlags::default());
//! let outcome = ih.setup(&env, &ctx, &statement, collect_txn_exec_stats)?;
//! // ... plan and run the statement with `outcome.ctx` ...
//! if outcome.need_finish {
//!     ih.finish(
//!         &env,
//!         finish_args,
//!         &mut txn_stats,
//!         collect_txn_exec_stats,
//!         &mut result,
//!         ret_err,
//!     )?;
//! }
//! ```
//!
//! The collaborators the controller talks to (tracer, diagnostics registry,
//! statistics store, locality resolver, result sink) are traits. Each has a
//! small in-process implementation in this crate.

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod execstats;
pub mod instrumentation;
pub mod locality;
pub mod output;
pub mod plan;
pub mod sqlstats;
pub mod trace;

pub use config::{InstrumentationConfig, InstrumentationSettings, SampleRate, Strictness};
pub use error::InstrumentationError;
pub use execstats::{ExecutionStats, QueryLevelStats};
pub use instrumentation::{
    FinishArgs, InstrumentationEnv, InstrumentationHelper, OutputMode, SetupOutcome,
    StatementInfo,
};
pub use plan::{ExplainFlags, ExplainPlan, NodeIndex, PlanDistribution, PlanGist};
pub use trace::{RecordingLevel, Span, TraceContext};

/// sqlinstr version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// sqlinstr crate name
pub const CRATE_NAME: &str = env!("CARGO_PKG_NAME");
