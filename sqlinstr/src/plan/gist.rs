// Copyright (c) 2024-2025 sqlinstr Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Plan gists: compact, lossy encodings of a plan's shape

use super::explain::ExplainPlan;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GistError {
    #[error("invalid plan gist encoding: {0}")]
    Encoding(String),

    #[error("truncated plan gist")]
    Truncated,
}

/// Operator names and arities of a plan in preorder
///
/// Field values are not part of the gist, so two executions of the same
/// statement shape with different constants share a gist and a hash.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PlanGist {
    encoded: Vec<u8>,
}

impl PlanGist {
    pub fn from_plan(plan: &ExplainPlan) -> Self {
        let mut encoded = Vec::new();
        plan.walk(|_, node| {
            encoded.extend_from_slice(node.name.as_bytes());
            encoded.push(0);
            let arity = u16::try_from(node.children.len()).unwrap_or(u16::MAX);
            encoded.extend_from_slice(&arity.to_le_bytes());
        });
        Self { encoded }
    }

    pub fn from_base64(text: &str) -> Result<Self, GistError> {
        let encoded = STANDARD
            .decode(text)
            .map_err(|e| GistError::Encoding(e.to_string()))?;
        let gist = Self { encoded };
        gist.shape()?;
        Ok(gist)
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.encoded)
    }

    pub fn is_empty(&self) -> bool {
        self.encoded.is_empty()
    }

    /// Stable plan hash used in statement statistics keys
    pub fn hash(&self) -> u64 {
        u64::from(crc32fast::hash(&self.encoded))
    }

    /// Decode back into `(operator, child count)` pairs in preorder
    pub fn shape(&self) -> Result<Vec<(String, usize)>, GistError> {
        let mut shape = Vec::new();
        let mut rest = self.encoded.as_slice();
        while !rest.is_empty() {
            let end = rest
                .iter()
                .position(|&b| b == 0)
                .ok_or(GistError::Truncated)?;
            let name = String::from_utf8(rest[..end].to_vec())
                .map_err(|e| GistError::Encoding(e.to_string()))?;
            let arity = rest.get(end + 1..end + 3).ok_or(GistError::Truncated)?;
            shape.push((name, u16::from_le_bytes([arity[0], arity[1]]) as usize));
            rest = &rest[end + 3..];
        }
        Ok(shape)
    }
}

impl fmt::Display for PlanGist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base64())
    }
}
