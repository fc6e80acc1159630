// Copyright (c) 2024-2025 sqlinstr Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Diagnostics bundles

use super::registry::{BundleId, DiagnosticsRegistry, OutstandingRequest, RequestId};
use crate::trace::Recording;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A self-contained snapshot of one statement execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    pub statement: String,
    /// Plan rendered verbosely with column types and execution statistics
    pub plan: String,
    pub trace_json: String,
    pub trace_text: String,
    /// Bound placeholder values, `$1` first
    pub placeholders: Vec<String>,
    pub collected_at: DateTime<Utc>,
    /// Set once the registry has persisted the bundle
    pub diag_id: Option<BundleId>,
    /// Set when persisting failed
    pub collection_error: Option<String>,
}

/// Assemble a bundle from the pieces collected during execution
pub fn build_statement_bundle(
    statement: &str,
    plan: &str,
    trace: &Recording,
    placeholders: &[String],
) -> Bundle {
    Bundle {
        statement: statement.to_string(),
        plan: plan.to_string(),
        trace_json: trace.to_json(),
        trace_text: trace.render_text(),
        placeholders: placeholders.to_vec(),
        collected_at: Utc::now(),
        diag_id: None,
        collection_error: None,
    }
}

impl Bundle {
    /// The bundle's files as `(name, contents)`
    pub fn files(&self) -> Vec<(&'static str, String)> {
        let mut files = vec![
            ("statement.sql", self.statement_with_placeholders()),
            ("plan.txt", self.plan.clone()),
            ("trace.json", self.trace_json.clone()),
            ("trace.txt", self.trace_text.clone()),
        ];
        if !self.placeholders.is_empty() {
            files.push(("placeholders.txt", self.placeholder_text()));
        }
        files
    }

    fn placeholder_text(&self) -> String {
        self.placeholders
            .iter()
            .enumerate()
            .map(|(i, v)| format!("${} = {}\n", i + 1, v))
            .collect()
    }

    fn statement_with_placeholders(&self) -> String {
        if self.placeholders.is_empty() {
            return format!("{}\n", self.statement);
        }
        let mut text = String::new();
        for line in self.placeholder_text().lines() {
            text.push_str("-- ");
            text.push_str(line);
            text.push('\n');
        }
        text.push_str(&self.statement);
        text.push('\n');
        text
    }

    /// Persist through the registry. Failures are logged and kept on the
    /// bundle; they never fail the statement.
    pub fn insert(
        &mut self,
        registry: &dyn DiagnosticsRegistry,
        fingerprint: &str,
        request_id: Option<RequestId>,
    ) {
        match registry.insert_bundle(fingerprint, &self.statement, self, request_id) {
            Ok(id) => {
                log::debug!("diagnostics bundle {} stored for {:?}", id, fingerprint);
                self.diag_id = Some(id);
            }
            Err(e) => {
                log::warn!("error inserting diagnostics bundle for {:?}: {}", fingerprint, e);
                self.collection_error = Some(e.to_string());
            }
        }
    }
}

/// Build and persist a bundle if the request's latency condition holds.
///
/// `request` is `None` for EXPLAIN ANALYZE (DEBUG), which always captures.
/// A satisfied request is removed from the registry whether or not
/// persisting succeeded.
pub fn capture_bundle(
    registry: &dyn DiagnosticsRegistry,
    fingerprint: &str,
    request: Option<&OutstandingRequest>,
    service_latency: Duration,
    build: impl FnOnce() -> Bundle,
) -> Option<Bundle> {
    if let Some(req) = request {
        if !registry.is_exec_latency_condition_met(req.id, &req.request, service_latency) {
            log::debug!(
                "diagnostics request {} not satisfied: execution took {:?}",
                req.id,
                service_latency
            );
            return None;
        }
    }
    let mut bundle = build();
    bundle.insert(registry, fingerprint, request.map(|r| r.id));
    if let Some(req) = request {
        registry.remove_ongoing(req.id, &req.request);
    }
    Some(bundle)
}
