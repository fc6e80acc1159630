// Copyright (c) 2024-2025 sqlinstr Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Execution statistics
//!
//! Distributed components record [`ComponentStats`] into the statement's
//! trace. After execution they are read back twice: merged per explain plan
//! node into [`ExecutionStats`], and summed across the whole statement into
//! [`QueryLevelStats`].

pub mod component;
pub mod node_stats;
pub mod query_level;

pub use component::{
    extract_stats_from_spans, ComponentId, ComponentKind, ComponentStats, ExecStats, FlowStats,
    KvStats, NetworkRxStats, NetworkTxStats, OutputStats,
};
pub use node_stats::{maybe_add, maybe_max, ExecutionStats};
pub use query_level::{query_level_stats, FlowsMetadata, QueryLevelStats};
