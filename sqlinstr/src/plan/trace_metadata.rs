// Copyright (c) 2024-2025 sqlinstr Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Association of plan nodes with execution components, and the walk that
//! turns a trace into per-node statistics

use super::explain::{ExplainPlan, NodeIndex};
use crate::execstats::{extract_stats_from_spans, ComponentId, ComponentKind, ExecutionStats};
use crate::locality::{region_lookup, NodeDescriptor, NodeId};
use crate::trace::RecordedSpan;
use std::collections::{BTreeSet, HashMap};

/// Per-node statistics plus every region the statement touched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotatedPlan {
    pub stats: HashMap<NodeIndex, ExecutionStats>,
    /// Deduplicated and sorted
    pub regions: Vec<String>,
}

/// Maps plan nodes to the execution components implementing them. A node
/// maps to several components when its operator was distributed.
#[derive(Debug, Clone, Default)]
pub struct ExecNodeTraceMetadata {
    components: HashMap<NodeIndex, Vec<ComponentId>>,
}

impl ExecNodeTraceMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called during physical planning as components are planned for a node.
    /// A later call for the same node replaces the earlier one.
    pub fn associate_node_with_components(
        &mut self,
        node: NodeIndex,
        components: Vec<ComponentId>,
    ) {
        self.components.insert(node, components);
    }

    pub fn components(&self, node: NodeIndex) -> Option<&[ComponentId]> {
        self.components.get(&node).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Merge component statistics from `spans` onto the plan nodes.
    ///
    /// A node is annotated only when every one of its components reported
    /// statistics; otherwise it is left out rather than shown with partial
    /// numbers.
    pub fn annotate_explain(
        &self,
        plan: &ExplainPlan,
        spans: &[RecordedSpan],
        deterministic: bool,
        descriptors: &[NodeDescriptor],
    ) -> AnnotatedPlan {
        let stats_map = extract_stats_from_spans(spans, deterministic);
        let regions_info = region_lookup(descriptors);
        let mut all_regions: BTreeSet<String> = BTreeSet::new();
        let mut annotated = HashMap::new();

        plan.walk(|index, _| {
            let Some(components) = self.components.get(&index) else {
                return;
            };
            let mut node_stats = ExecutionStats::default();
            let mut nodes: BTreeSet<NodeId> = BTreeSet::new();
            let mut regions: BTreeSet<String> = BTreeSet::new();
            let mut incomplete = false;
            for c in components {
                if c.kind == ComponentKind::Processor {
                    nodes.insert(c.sql_instance_id);
                    if let Some(region) = regions_info.get(&c.sql_instance_id) {
                        if !region.is_empty() {
                            regions.insert(region.clone());
                        }
                    }
                }
                match stats_map.get(c) {
                    Some(stats) => node_stats.merge_component(stats),
                    None => {
                        incomplete = true;
                        break;
                    }
                }
            }
            if incomplete {
                log::trace!("plan node {} has incomplete stats; not annotating", index.0);
                return;
            }
            node_stats.nodes = nodes.iter().map(|n| format!("n{}", n)).collect();
            all_regions.extend(regions.iter().cloned());
            node_stats.regions = regions.into_iter().collect();
            annotated.insert(index, node_stats);
        });

        AnnotatedPlan {
            stats: annotated,
            regions: all_regions.into_iter().collect(),
        }
    }
}
