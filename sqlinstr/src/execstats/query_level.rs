// Copyright (c) 2024-2025 sqlinstr Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Query-level statistics computed once from a statement's full trace

use super::component::{ComponentId, ComponentKind, ComponentStats};
use crate::error::TraceError;
use crate::locality::NodeId;
use crate::trace::{Recording, TypedRecord};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Duration;
use uuid::Uuid;

/// Cross-node statistics for one statement execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryLevelStats {
    pub network_bytes_sent: u64,
    pub max_mem_usage: u64,
    pub max_disk_usage: u64,
    pub kv_bytes_read: u64,
    pub kv_rows_read: u64,
    pub kv_time: Duration,
    pub network_messages: u64,
    pub contention_time: Duration,
}

impl QueryLevelStats {
    /// Fold another statement's stats into a running (transaction) total
    pub fn accumulate(&mut self, other: &QueryLevelStats) {
        self.network_bytes_sent += other.network_bytes_sent;
        self.max_mem_usage = self.max_mem_usage.max(other.max_mem_usage);
        self.max_disk_usage = self.max_disk_usage.max(other.max_disk_usage);
        self.kv_bytes_read += other.kv_bytes_read;
        self.kv_rows_read += other.kv_rows_read;
        self.kv_time += other.kv_time;
        self.network_messages += other.network_messages;
        self.contention_time += other.contention_time;
    }
}

/// Which flows belong to the statement, and where they ran
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowsMetadata {
    pub flow_id: Uuid,
    pub nodes: BTreeSet<NodeId>,
}

impl FlowsMetadata {
    pub fn new(flow_id: Uuid, nodes: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            flow_id,
            nodes: nodes.into_iter().collect(),
        }
    }
}

/// Compute query-level statistics from a recording.
///
/// When `flows_metadata` is non-empty only components of those flows are
/// counted. A component reported more than once (a retried flow, a remote
/// recording imported twice) is merged first and counted once. A recording
/// cut short by cancellation simply yields smaller totals; a payload that
/// fails to decode is an error.
pub fn query_level_stats(
    recording: &Recording,
    deterministic: bool,
    flows_metadata: &[FlowsMetadata],
) -> Result<QueryLevelStats, TraceError> {
    let flows: HashSet<Uuid> = flows_metadata.iter().map(|f| f.flow_id).collect();
    let mut components: HashMap<ComponentId, ComponentStats> = HashMap::new();
    for (span, record) in recording.structured_of(ComponentStats::TYPE_URL) {
        let component: ComponentStats =
            record.decode().map_err(|e| TraceError::MalformedRecord {
                span_id: span.span_id,
                type_url: record.type_url.clone(),
                message: e.to_string(),
            })?;
        if !flows.is_empty() && !flows.contains(&component.component.flow_id) {
            continue;
        }
        match components.get_mut(&component.component) {
            Some(existing) => existing.union(&component),
            None => {
                components.insert(component.component, component);
            }
        }
    }

    let mut stats = QueryLevelStats::default();
    let mut flow_mem: Option<u64> = None;
    let mut flow_disk: Option<u64> = None;
    let mut processor_mem = 0u64;
    let mut processor_disk = 0u64;

    for mut component in components.into_values() {
        if deterministic {
            component.make_deterministic();
        }

        stats.network_bytes_sent += component.net_tx.bytes_sent.unwrap_or(0);
        stats.network_messages += component.net_tx.messages_sent.unwrap_or(0);

        match component.component.kind {
            ComponentKind::Processor => {
                stats.kv_bytes_read += component.kv.bytes_read.unwrap_or(0);
                stats.kv_rows_read += component.kv.tuples_read.unwrap_or(0);
                stats.kv_time += component.kv.kv_time.unwrap_or_default();
                stats.contention_time += component.kv.contention_time.unwrap_or_default();
                processor_mem = processor_mem.max(component.exec.max_allocated_mem.unwrap_or(0));
                processor_disk =
                    processor_disk.max(component.exec.max_allocated_disk.unwrap_or(0));
            }
            ComponentKind::Flow => {
                if let Some(mem) = component.flow_stats.max_mem_usage {
                    flow_mem = Some(flow_mem.unwrap_or(0).max(mem));
                }
                if let Some(disk) = component.flow_stats.max_disk_usage {
                    flow_disk = Some(flow_disk.unwrap_or(0).max(disk));
                }
            }
            ComponentKind::Stream => {}
        }
    }

    // Flow-level peaks are authoritative; fall back to the largest processor.
    stats.max_mem_usage = flow_mem.unwrap_or(processor_mem);
    stats.max_disk_usage = flow_disk.unwrap_or(processor_disk);
    Ok(stats)
}
