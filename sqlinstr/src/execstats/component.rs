// Copyright (c) 2024-2025 sqlinstr Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Statistics emitted by distributed execution components

use crate::locality::NodeId;
use crate::trace::{RecordedSpan, TypedRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Kind of execution component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    /// A processor running one operator of the physical plan
    Processor,
    /// A stream moving rows between processors on different nodes
    Stream,
    /// A whole flow (all processors of a plan on one node)
    Flow,
}

/// Identifies one execution component of a distributed plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentId {
    pub flow_id: Uuid,
    pub kind: ComponentKind,
    /// Processor or stream id, unique within the flow
    pub id: i32,
    /// Node the component ran on
    pub sql_instance_id: NodeId,
}

impl ComponentId {
    pub fn processor(flow_id: Uuid, id: i32, sql_instance_id: NodeId) -> Self {
        Self {
            flow_id,
            kind: ComponentKind::Processor,
            id,
            sql_instance_id,
        }
    }

    pub fn stream(flow_id: Uuid, id: i32, sql_instance_id: NodeId) -> Self {
        Self {
            flow_id,
            kind: ComponentKind::Stream,
            id,
            sql_instance_id,
        }
    }

    pub fn flow(flow_id: Uuid, sql_instance_id: NodeId) -> Self {
        Self {
            flow_id,
            kind: ComponentKind::Flow,
            id: 0,
            sql_instance_id,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkRxStats {
    pub latency: Option<Duration>,
    pub wait_time: Option<Duration>,
    pub deserialization_time: Option<Duration>,
    pub tuples_received: Option<u64>,
    pub bytes_received: Option<u64>,
    pub messages_received: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkTxStats {
    pub tuples_sent: Option<u64>,
    pub bytes_sent: Option<u64>,
    pub messages_sent: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KvStats {
    pub bytes_read: Option<u64>,
    pub tuples_read: Option<u64>,
    pub kv_time: Option<Duration>,
    pub contention_time: Option<Duration>,
    pub num_interface_steps: Option<u64>,
    pub num_internal_steps: Option<u64>,
    pub num_interface_seeks: Option<u64>,
    pub num_internal_seeks: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecStats {
    pub exec_time: Option<Duration>,
    pub max_allocated_mem: Option<u64>,
    pub max_allocated_disk: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputStats {
    pub num_batches: Option<u64>,
    pub num_tuples: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowStats {
    pub max_mem_usage: Option<u64>,
    pub max_disk_usage: Option<u64>,
}

/// Raw statistics for one component, as recorded into the trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentStats {
    pub component: ComponentId,
    #[serde(default)]
    pub net_rx: NetworkRxStats,
    #[serde(default)]
    pub net_tx: NetworkTxStats,
    #[serde(default)]
    pub kv: KvStats,
    #[serde(default)]
    pub exec: ExecStats,
    #[serde(default)]
    pub output: OutputStats,
    #[serde(default)]
    pub flow_stats: FlowStats,
}

impl TypedRecord for ComponentStats {
    const TYPE_URL: &'static str = "sqlinstr.execstats.ComponentStats";
}

fn first<T: Copy>(a: &mut Option<T>, b: Option<T>) {
    if a.is_none() {
        *a = b;
    }
}

fn zero_duration(d: &mut Option<Duration>) {
    if d.is_some() {
        *d = Some(Duration::ZERO);
    }
}

fn zero_count(v: &mut Option<u64>) {
    if v.is_some() {
        *v = Some(0);
    }
}

impl ComponentStats {
    pub fn new(component: ComponentId) -> Self {
        Self {
            component,
            net_rx: NetworkRxStats::default(),
            net_tx: NetworkTxStats::default(),
            kv: KvStats::default(),
            exec: ExecStats::default(),
            output: OutputStats::default(),
            flow_stats: FlowStats::default(),
        }
    }

    /// Fill fields this record is missing from another record for the same
    /// component. Fields already set are kept.
    pub fn union(&mut self, other: &ComponentStats) {
        first(&mut self.net_rx.latency, other.net_rx.latency);
        first(&mut self.net_rx.wait_time, other.net_rx.wait_time);
        first(
            &mut self.net_rx.deserialization_time,
            other.net_rx.deserialization_time,
        );
        first(&mut self.net_rx.tuples_received, other.net_rx.tuples_received);
        first(&mut self.net_rx.bytes_received, other.net_rx.bytes_received);
        first(&mut self.net_rx.messages_received, other.net_rx.messages_received);
        first(&mut self.net_tx.tuples_sent, other.net_tx.tuples_sent);
        first(&mut self.net_tx.bytes_sent, other.net_tx.bytes_sent);
        first(&mut self.net_tx.messages_sent, other.net_tx.messages_sent);
        first(&mut self.kv.bytes_read, other.kv.bytes_read);
        first(&mut self.kv.tuples_read, other.kv.tuples_read);
        first(&mut self.kv.kv_time, other.kv.kv_time);
        first(&mut self.kv.contention_time, other.kv.contention_time);
        first(&mut self.kv.num_interface_steps, other.kv.num_interface_steps);
        first(&mut self.kv.num_internal_steps, other.kv.num_internal_steps);
        first(&mut self.kv.num_interface_seeks, other.kv.num_interface_seeks);
        first(&mut self.kv.num_internal_seeks, other.kv.num_internal_seeks);
        first(&mut self.exec.exec_time, other.exec.exec_time);
        first(&mut self.exec.max_allocated_mem, other.exec.max_allocated_mem);
        first(&mut self.exec.max_allocated_disk, other.exec.max_allocated_disk);
        first(&mut self.output.num_batches, other.output.num_batches);
        first(&mut self.output.num_tuples, other.output.num_tuples);
        first(&mut self.flow_stats.max_mem_usage, other.flow_stats.max_mem_usage);
        first(&mut self.flow_stats.max_disk_usage, other.flow_stats.max_disk_usage);
    }

    /// Zero out values that vary from run to run (timings and byte sizes) so
    /// rendered output is reproducible
    pub fn make_deterministic(&mut self) {
        zero_duration(&mut self.net_rx.latency);
        zero_duration(&mut self.net_rx.wait_time);
        zero_duration(&mut self.net_rx.deserialization_time);
        zero_count(&mut self.net_rx.bytes_received);
        zero_count(&mut self.net_tx.bytes_sent);
        zero_count(&mut self.kv.bytes_read);
        zero_duration(&mut self.kv.kv_time);
        zero_duration(&mut self.kv.contention_time);
        zero_duration(&mut self.exec.exec_time);
        zero_count(&mut self.exec.max_allocated_mem);
        zero_count(&mut self.exec.max_allocated_disk);
        zero_count(&mut self.flow_stats.max_mem_usage);
        zero_count(&mut self.flow_stats.max_disk_usage);
    }
}

/// Collect component statistics from trace spans in a single pass.
///
/// Payloads that fail to decode are skipped; a component reported more than
/// once keeps the first value seen for each field.
pub fn extract_stats_from_spans(
    spans: &[RecordedSpan],
    deterministic: bool,
) -> HashMap<ComponentId, ComponentStats> {
    let mut stats: HashMap<ComponentId, ComponentStats> = HashMap::new();
    for span in spans {
        for record in span.structured.iter().filter(|r| r.is::<ComponentStats>()) {
            let mut component_stats: ComponentStats = match record.decode() {
                Ok(s) => s,
                Err(e) => {
                    log::trace!(
                        "skipping undecodable component stats in span {}: {}",
                        span.span_id,
                        e
                    );
                    continue;
                }
            };
            if deterministic {
                component_stats.make_deterministic();
            }
            match stats.get_mut(&component_stats.component) {
                Some(existing) => existing.union(&component_stats),
                None => {
                    stats.insert(component_stats.component, component_stats);
                }
            }
        }
    }
    stats
}
