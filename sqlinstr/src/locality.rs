// Copyright (c) 2024-2025 sqlinstr Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Node locality and region resolution

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Identifier of an execution node (SQL instance)
pub type NodeId = u32;

/// Locality tier key holding the node's region
pub const REGION_TIER_KEY: &str = "region";

/// One `key=value` locality tier, e.g. `region=us-east1`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tier {
    pub key: String,
    pub value: String,
}

impl Tier {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locality {
    pub tiers: Vec<Tier>,
}

impl Locality {
    /// Parse `region=us-east1,zone=a` style locality strings
    pub fn parse(text: &str) -> Self {
        let tiers = text
            .split(',')
            .filter_map(|tier| {
                let (key, value) = tier.split_once('=')?;
                Some(Tier::new(key.trim(), value.trim()))
            })
            .collect();
        Self { tiers }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub node_id: NodeId,
    pub locality: Locality,
}

impl NodeDescriptor {
    pub fn new(node_id: NodeId, locality: Locality) -> Self {
        Self { node_id, locality }
    }
}

/// Source of cluster node descriptors
pub trait LocalityResolver: Send + Sync {
    fn all_node_descriptors(&self) -> Result<Vec<NodeDescriptor>, String>;
}

/// A fixed set of node descriptors
#[derive(Debug, Clone, Default)]
pub struct StaticLocalityResolver {
    descriptors: Vec<NodeDescriptor>,
}

impl StaticLocalityResolver {
    pub fn new(descriptors: Vec<NodeDescriptor>) -> Self {
        Self { descriptors }
    }

    /// Convenience constructor from `(node, region)` pairs
    pub fn with_regions<'a>(regions: impl IntoIterator<Item = (NodeId, &'a str)>) -> Self {
        Self::new(
            regions
                .into_iter()
                .map(|(node_id, region)| {
                    NodeDescriptor::new(
                        node_id,
                        Locality {
                            tiers: vec![Tier::new(REGION_TIER_KEY, region)],
                        },
                    )
                })
                .collect(),
        )
    }
}

impl LocalityResolver for StaticLocalityResolver {
    fn all_node_descriptors(&self) -> Result<Vec<NodeDescriptor>, String> {
        Ok(self.descriptors.clone())
    }
}

/// Map each node to its region. If a node lists several region tiers the
/// last one wins. Nodes without a region tier are absent.
pub fn region_lookup(descriptors: &[NodeDescriptor]) -> HashMap<NodeId, String> {
    let mut regions = HashMap::new();
    for descriptor in descriptors {
        for tier in &descriptor.locality.tiers {
            if tier.key == REGION_TIER_KEY {
                regions.insert(descriptor.node_id, tier.value.clone());
            }
        }
    }
    regions
}
