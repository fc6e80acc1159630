// Copyright (c) 2024-2025 sqlinstr Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Explain plans and their rendering
//!
//! The planner hands the controller an [`ExplainPlan`]: an arena of plan
//! nodes addressed by [`NodeIndex`]. Everything attached to a node after the
//! fact (the execution components implementing it, the statistics merged from
//! the trace) lives in side tables keyed by that index.

pub mod explain;
pub mod gist;
pub mod output;
pub mod trace_metadata;

pub use explain::{ExplainPlan, NodeIndex, PlanDistribution, PlanField, PlanNode, ResultColumn};
pub use gist::{GistError, PlanGist};
pub use output::{emit_explain, ExplainFlags, ExplainTreeAttr, ExplainTreePlanNode, OutputBuilder};
pub use trace_metadata::{AnnotatedPlan, ExecNodeTraceMetadata};
