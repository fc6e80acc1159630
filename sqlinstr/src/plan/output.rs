// Copyright (c) 2024-2025 sqlinstr Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! EXPLAIN output rendering
//!
//! [`OutputBuilder`] collects top-level fields (distribution, timings,
//! aggregated statistics) and the rendered plan tree, and produces either text
//! rows or a serializable tree. The tree uses box-drawing connectors:
//!
//! ```text
//! • hash join
//! │ nodes: n1
//! │
//! ├── • scan
//! │     table: a@primary
//! │
//! └── • scan
//!       table: b@primary
//! ```

use super::explain::{ExplainPlan, NodeIndex, PlanDistribution, PlanNode};
use crate::execstats::ExecutionStats;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

const HIDDEN: &str = "<hidden>";

/// Rendering options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplainFlags {
    /// Show verbose-only fields, columns and extra statistics
    pub verbose: bool,
    /// Show column types (only with `verbose`)
    pub show_types: bool,
    /// Mask literal values
    pub hide_values: bool,
    /// Replace timings and byte sizes with a placeholder
    pub deterministic: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplainTreeAttr {
    pub key: String,
    pub value: String,
}

/// Serializable plan tree, used when persisting plans with statement
/// statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplainTreePlanNode {
    pub name: String,
    pub attrs: Vec<ExplainTreeAttr>,
    pub children: Vec<ExplainTreePlanNode>,
}

/// Format a byte count with IEC units (`512 B`, `1.5 KiB`, `20 MiB`)
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if value < 10.0 {
        format!("{:.1} {}", value, UNITS[unit])
    } else {
        format!("{:.0} {}", value, UNITS[unit])
    }
}

/// Format a duration at a precision matching its magnitude
pub fn format_duration(d: Duration) -> String {
    if d < Duration::from_micros(1) {
        format!("{}ns", d.as_nanos())
    } else if d < Duration::from_millis(1) {
        format!("{}µs", d.as_micros())
    } else if d < Duration::from_secs(1) {
        format!("{}ms", d.as_millis())
    } else {
        format!("{:.1}s", d.as_secs_f64())
    }
}

/// Accumulates EXPLAIN output
#[derive(Debug, Clone, Default)]
pub struct OutputBuilder {
    flags: ExplainFlags,
    top_level: Vec<(String, String)>,
    tree_rows: Vec<String>,
    tree: Option<ExplainTreePlanNode>,
    warnings: Vec<String>,
}

impl OutputBuilder {
    pub fn new(flags: ExplainFlags) -> Self {
        Self {
            flags,
            ..Self::default()
        }
    }

    pub fn flags(&self) -> ExplainFlags {
        self.flags
    }

    fn duration(&self, d: Duration) -> String {
        if self.flags.deterministic {
            HIDDEN.to_string()
        } else {
            format_duration(d)
        }
    }

    fn bytes(&self, b: u64) -> String {
        if self.flags.deterministic {
            HIDDEN.to_string()
        } else {
            format_bytes(b)
        }
    }

    pub fn add_top_level_field(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.top_level.push((key.into(), value.into()));
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub fn add_distribution(&mut self, distribution: PlanDistribution) {
        self.add_top_level_field("distribution", distribution.to_string());
    }

    pub fn add_vectorized(&mut self, vectorized: bool) {
        self.add_top_level_field("vectorized", vectorized.to_string());
    }

    pub fn add_planning_time(&mut self, d: Duration) {
        let value = self.duration(d);
        self.add_top_level_field("planning time", value);
    }

    pub fn add_execution_time(&mut self, d: Duration) {
        let value = self.duration(d);
        self.add_top_level_field("execution time", value);
    }

    pub fn add_kv_read_stats(&mut self, rows: u64, bytes: u64) {
        let value = format!("{} ({})", rows, self.bytes(bytes));
        self.add_top_level_field("rows read from KV", value);
    }

    pub fn add_kv_time(&mut self, d: Duration) {
        let value = self.duration(d);
        self.add_top_level_field("cumulative time spent in KV", value);
    }

    pub fn add_contention_time(&mut self, d: Duration) {
        let value = self.duration(d);
        self.add_top_level_field("cumulative time spent due to contention", value);
    }

    pub fn add_max_mem_usage(&mut self, bytes: u64) {
        let value = self.bytes(bytes);
        self.add_top_level_field("maximum memory usage", value);
    }

    pub fn add_network_stats(&mut self, messages: u64, bytes: u64) {
        let value = format!("{} ({} messages)", self.bytes(bytes), messages);
        self.add_top_level_field("network usage", value);
    }

    pub fn add_max_disk_usage(&mut self, bytes: u64) {
        let value = self.bytes(bytes);
        self.add_top_level_field("max sql temp disk usage", value);
    }

    pub fn add_regions_stats(&mut self, regions: &[String]) {
        self.add_top_level_field("regions", regions.join(", "));
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Top-level `key: value` rows, a blank row, then the plan tree
    pub fn build_string_rows(&self) -> Vec<String> {
        let mut rows: Vec<String> = self
            .top_level
            .iter()
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect();
        if !self.tree_rows.is_empty() {
            if !rows.is_empty() {
                rows.push(String::new());
            }
            rows.extend(self.tree_rows.iter().cloned());
        }
        rows
    }

    pub fn build_string(&self) -> String {
        let mut output = self.build_string_rows().join("\n");
        output.push('\n');
        output
    }

    /// The plan as a tree, with top-level fields attached to the root
    pub fn build_proto_tree(&self) -> Option<ExplainTreePlanNode> {
        let mut tree = self.tree.clone()?;
        let mut attrs: Vec<ExplainTreeAttr> = self
            .top_level
            .iter()
            .map(|(k, v)| ExplainTreeAttr {
                key: k.clone(),
                value: v.clone(),
            })
            .collect();
        attrs.append(&mut tree.attrs);
        tree.attrs = attrs;
        Some(tree)
    }

    fn field_rows(&self, node: &PlanNode, stats: Option<&ExecutionStats>) -> Vec<(String, String)> {
        let mut rows = Vec::new();
        if let Some(s) = stats {
            self.stats_rows(s, &mut rows);
        }
        if let Some(est) = node.estimated_row_count {
            rows.push(("estimated row count".to_string(), est.to_string()));
        }
        for field in &node.fields {
            if field.verbose_only && !self.flags.verbose {
                continue;
            }
            let value = if field.literal && self.flags.hide_values {
                "_".to_string()
            } else {
                field.value.clone()
            };
            rows.push((field.key.clone(), value));
        }
        if self.flags.verbose && !node.columns.is_empty() {
            let columns: Vec<String> = node
                .columns
                .iter()
                .map(|c| {
                    if self.flags.show_types {
                        format!("{} {}", c.name, c.typ)
                    } else {
                        c.name.clone()
                    }
                })
                .collect();
            rows.push(("columns".to_string(), format!("({})", columns.join(", "))));
        }
        rows
    }

    fn stats_rows(&self, s: &ExecutionStats, rows: &mut Vec<(String, String)>) {
        if !s.nodes.is_empty() {
            rows.push(("nodes".to_string(), s.nodes.join(", ")));
        }
        if !s.regions.is_empty() {
            rows.push(("regions".to_string(), s.regions.join(", ")));
        }
        if let Some(n) = s.row_count {
            rows.push(("actual row count".to_string(), n.to_string()));
        }
        if self.flags.verbose {
            if let Some(n) = s.vectorized_batch_count {
                rows.push(("vectorized batch count".to_string(), n.to_string()));
            }
        }
        if let Some(d) = s.kv_time {
            rows.push(("KV time".to_string(), self.duration(d)));
        }
        if let Some(d) = s.kv_contention_time {
            rows.push(("KV contention time".to_string(), self.duration(d)));
        }
        if let Some(n) = s.kv_rows_read {
            rows.push(("KV rows read".to_string(), n.to_string()));
        }
        if let Some(b) = s.kv_bytes_read {
            rows.push(("KV bytes read".to_string(), self.bytes(b)));
        }
        if self.flags.verbose {
            if let (Some(ext), Some(int)) = (s.step_count, s.internal_step_count) {
                rows.push(("MVCC step count (ext/int)".to_string(), format!("{}/{}", ext, int)));
            }
            if let (Some(ext), Some(int)) = (s.seek_count, s.internal_seek_count) {
                rows.push(("MVCC seek count (ext/int)".to_string(), format!("{}/{}", ext, int)));
            }
        }
        if let Some(b) = s.max_allocated_mem {
            rows.push(("estimated max memory allocated".to_string(), self.bytes(b)));
        }
        if let Some(b) = s.max_allocated_disk {
            rows.push(("estimated max sql temp disk usage".to_string(), self.bytes(b)));
        }
    }

    fn emit_node(
        &mut self,
        plan: &ExplainPlan,
        index: NodeIndex,
        stats: &HashMap<NodeIndex, ExecutionStats>,
        first_prefix: &str,
        rest_prefix: &str,
        depth: usize,
    ) -> Result<ExplainTreePlanNode, String> {
        if depth > plan.len() {
            return Err(format!("plan node {} nested too deeply", index.0));
        }
        let node = plan
            .node(index)
            .ok_or_else(|| format!("plan node {} not found", index.0))?;
        let fields = self.field_rows(node, stats.get(&index));

        self.tree_rows.push(format!("{}• {}", first_prefix, node.name));
        let field_prefix = if node.children.is_empty() {
            format!("{}  ", rest_prefix)
        } else {
            format!("{}│ ", rest_prefix)
        };
        for (k, v) in &fields {
            self.tree_rows.push(format!("{}{}: {}", field_prefix, k, v));
        }

        let mut children = Vec::with_capacity(node.children.len());
        let count = node.children.len();
        for (i, &child) in node.children.iter().enumerate() {
            self.tree_rows.push(format!("{}│", rest_prefix));
            let (first, rest) = if i + 1 == count {
                (format!("{}└── ", rest_prefix), format!("{}    ", rest_prefix))
            } else {
                (format!("{}├── ", rest_prefix), format!("{}│   ", rest_prefix))
            };
            children.push(self.emit_node(plan, child, stats, &first, &rest, depth + 1)?);
        }

        Ok(ExplainTreePlanNode {
            name: node.name.clone(),
            attrs: fields
                .into_iter()
                .map(|(key, value)| ExplainTreeAttr { key, value })
                .collect(),
            children,
        })
    }

    fn emit_section(
        &mut self,
        title: &str,
        plan: &ExplainPlan,
        root: NodeIndex,
        stats: &HashMap<NodeIndex, ExecutionStats>,
    ) -> Result<ExplainTreePlanNode, String> {
        self.tree_rows.push(String::new());
        self.tree_rows.push(format!("• {}", title));
        self.tree_rows.push("│".to_string());
        let child = self.emit_node(plan, root, stats, "└── ", "    ", 1)?;
        Ok(ExplainTreePlanNode {
            name: title.to_string(),
            attrs: Vec::new(),
            children: vec![child],
        })
    }
}

/// Render `plan` into the builder, attaching per-node statistics.
///
/// On error the rows emitted so far are kept.
pub fn emit_explain(
    ob: &mut OutputBuilder,
    plan: &ExplainPlan,
    stats: &HashMap<NodeIndex, ExecutionStats>,
) -> Result<(), String> {
    let root = plan.root().ok_or_else(|| "plan has no root".to_string())?;
    let mut tree = ob.emit_node(plan, root, stats, "", "", 0)?;
    for &sub in plan.subqueries() {
        let section = ob.emit_section("subquery", plan, sub, stats)?;
        tree.children.push(section);
    }
    for &check in plan.checks() {
        let section = ob.emit_section("constraint-check", plan, check, stats)?;
        tree.children.push(section);
    }
    ob.tree = Some(tree);
    Ok(())
}
