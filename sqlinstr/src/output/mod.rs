// Copyright (c) 2024-2025 sqlinstr Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Rows written to the statement's result stream for EXPLAIN ANALYZE
//! variants, and physical flow diagrams

pub mod flow;
pub mod formatter;
pub mod result;

pub use flow::{FlowDiagram, FlowInfo, JsonFlowDiagram, PlanComponentType};
pub use formatter::{diagram_rows, set_explain_analyze_result, set_explain_bundle_result};
pub use result::{BufferedResult, CommandResult, StatementType, EXPLAIN_PLAN_COLUMNS};
