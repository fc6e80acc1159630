// Copyright (c) 2024-2025 sqlinstr Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Explain plan arena

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable index of a node in an [`ExplainPlan`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeIndex(pub usize);

/// How the physical plan was spread over the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanDistribution {
    /// Everything ran on the gateway node
    #[default]
    Local,
    /// Every eligible operator was distributed
    Full,
    /// Some operators were distributed
    Partial,
}

impl fmt::Display for PlanDistribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanDistribution::Local => write!(f, "local"),
            PlanDistribution::Full => write!(f, "full"),
            PlanDistribution::Partial => write!(f, "partial"),
        }
    }
}

/// An attribute shown under a plan node, e.g. `table: t@primary`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanField {
    pub key: String,
    pub value: String,
    /// Only shown in verbose output
    pub verbose_only: bool,
    /// The value carries user data (constants, spans) and is masked when
    /// values are hidden
    pub literal: bool,
}

/// An output column of a plan node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultColumn {
    pub name: String,
    pub typ: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanNode {
    pub name: String,
    pub fields: Vec<PlanField>,
    pub columns: Vec<ResultColumn>,
    pub children: Vec<NodeIndex>,
    pub estimated_row_count: Option<u64>,
}

impl PlanNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            columns: Vec::new(),
            children: Vec::new(),
            estimated_row_count: None,
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push(PlanField {
            key: key.into(),
            value: value.into(),
            verbose_only: false,
            literal: false,
        });
        self
    }

    pub fn with_verbose_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push(PlanField {
            key: key.into(),
            value: value.into(),
            verbose_only: true,
            literal: false,
        });
        self
    }

    pub fn with_literal(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push(PlanField {
            key: key.into(),
            value: value.into(),
            verbose_only: false,
            literal: true,
        });
        self
    }

    pub fn with_column(mut self, name: impl Into<String>, typ: impl Into<String>) -> Self {
        self.columns.push(ResultColumn {
            name: name.into(),
            typ: typ.into(),
        });
        self
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = NodeIndex>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn with_estimated_rows(mut self, rows: u64) -> Self {
        self.estimated_row_count = Some(rows);
        self
    }
}

/// A plan: main query root, subquery roots and constraint-check roots over a
/// shared node arena
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExplainPlan {
    nodes: Vec<PlanNode>,
    root: Option<NodeIndex>,
    subqueries: Vec<NodeIndex>,
    checks: Vec<NodeIndex>,
}

impl ExplainPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node. Children must already be in the arena; references to
    /// later nodes are dropped so the plan is always a DAG.
    pub fn add_node(&mut self, mut node: PlanNode) -> NodeIndex {
        let index = NodeIndex(self.nodes.len());
        let before = node.children.len();
        node.children.retain(|c| c.0 < index.0);
        if node.children.len() != before {
            log::warn!(
                "plan node {} ({}) referenced children outside the arena",
                index.0,
                node.name
            );
        }
        self.nodes.push(node);
        index
    }

    pub fn set_root(&mut self, root: NodeIndex) {
        self.root = Some(root);
    }

    pub fn add_subquery(&mut self, root: NodeIndex) {
        self.subqueries.push(root);
    }

    pub fn add_check(&mut self, root: NodeIndex) {
        self.checks.push(root);
    }

    pub fn node(&self, index: NodeIndex) -> Option<&PlanNode> {
        self.nodes.get(index.0)
    }

    pub fn root(&self) -> Option<NodeIndex> {
        self.root
    }

    pub fn subqueries(&self) -> &[NodeIndex] {
        &self.subqueries
    }

    pub fn checks(&self) -> &[NodeIndex] {
        &self.checks
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Walk roots in order (main root, subqueries, checks), each depth-first
    pub fn walk(&self, mut visit: impl FnMut(NodeIndex, &PlanNode)) {
        let roots = self
            .root
            .iter()
            .chain(self.subqueries.iter())
            .chain(self.checks.iter());
        for &root in roots {
            let mut stack = vec![root];
            while let Some(index) = stack.pop() {
                let Some(node) = self.node(index) else {
                    continue;
                };
                visit(index, node);
                stack.extend(node.children.iter().rev().copied());
            }
        }
    }
}
