// Copyright (c) 2024-2025 sqlinstr Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Physical flow diagrams

use crate::execstats::{extract_stats_from_spans, ComponentId, FlowsMetadata};
use crate::locality::NodeId;
use crate::plan::output::{format_bytes, format_duration};
use crate::trace::Recording;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Which part of the statement a flow executes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanComponentType {
    MainQuery,
    Subquery,
    Postquery,
}

impl fmt::Display for PlanComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanComponentType::MainQuery => write!(f, "main-query"),
            PlanComponentType::Subquery => write!(f, "subquery"),
            PlanComponentType::Postquery => write!(f, "postquery"),
        }
    }
}

/// A renderable diagram of one physical flow
pub trait FlowDiagram: Send {
    /// Decorate the diagram with statistics found in the trace
    fn add_spans(&mut self, trace: &Recording);

    /// Link to a rendering of the diagram
    fn to_url(&self) -> Result<String, String>;
}

/// A physical flow saved during planning
pub struct FlowInfo {
    pub typ: PlanComponentType,
    pub diagram: Box<dyn FlowDiagram>,
    pub flows_metadata: FlowsMetadata,
}

impl fmt::Debug for FlowInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowInfo")
            .field("typ", &self.typ)
            .field("flows_metadata", &self.flows_metadata)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize)]
struct DiagramProcessor {
    node_id: NodeId,
    id: i32,
    core: String,
    stats: Vec<String>,
}

/// A diagram encoded as JSON into the fragment of a viewer URL
#[derive(Debug, Clone, Serialize)]
pub struct JsonFlowDiagram {
    #[serde(skip)]
    viewer_url: String,
    flow_id: Uuid,
    processors: Vec<DiagramProcessor>,
    edges: Vec<(i32, i32)>,
}

impl JsonFlowDiagram {
    pub fn new(viewer_url: impl Into<String>, flow_id: Uuid) -> Self {
        Self {
            viewer_url: viewer_url.into(),
            flow_id,
            processors: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn add_processor(&mut self, node_id: NodeId, id: i32, core: impl Into<String>) {
        self.processors.push(DiagramProcessor {
            node_id,
            id,
            core: core.into(),
            stats: Vec::new(),
        });
    }

    pub fn add_edge(&mut self, from: i32, to: i32) {
        self.edges.push((from, to));
    }

    /// Statistics lines attached to a processor by [`FlowDiagram::add_spans`]
    pub fn processor_stats(&self, id: i32) -> Option<&[String]> {
        self.processors
            .iter()
            .find(|p| p.id == id)
            .map(|p| p.stats.as_slice())
    }
}

impl FlowDiagram for JsonFlowDiagram {
    fn add_spans(&mut self, trace: &Recording) {
        let stats = extract_stats_from_spans(trace.spans(), false);
        for processor in &mut self.processors {
            let id = ComponentId::processor(self.flow_id, processor.id, processor.node_id);
            let Some(s) = stats.get(&id) else {
                continue;
            };
            processor.stats.clear();
            if let Some(n) = s.output.num_tuples {
                processor.stats.push(format!("rows output: {}", n));
            }
            if let Some(n) = s.kv.tuples_read {
                processor.stats.push(format!("KV rows read: {}", n));
            }
            if let Some(b) = s.kv.bytes_read {
                processor.stats.push(format!("KV bytes read: {}", format_bytes(b)));
            }
            if let Some(d) = s.exec.exec_time {
                processor.stats.push(format!("execution time: {}", format_duration(d)));
            }
            if let Some(b) = s.exec.max_allocated_mem {
                processor.stats.push(format!("max memory allocated: {}", format_bytes(b)));
            }
        }
    }

    fn to_url(&self) -> Result<String, String> {
        if self.viewer_url.is_empty() {
            return Err("no diagram viewer URL configured".to_string());
        }
        if self.processors.is_empty() {
            return Err(format!("flow {} has no processors", self.flow_id));
        }
        let json = serde_json::to_vec(self).map_err(|e| e.to_string())?;
        Ok(format!("{}#{}", self.viewer_url, URL_SAFE_NO_PAD.encode(json)))
    }
}
