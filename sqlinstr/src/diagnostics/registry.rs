// Copyright (c) 2024-2025 sqlinstr Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Diagnostics request registry

use super::bundle::Bundle;
use crate::error::DiagnosticsError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

pub type RequestId = u64;
pub type BundleId = u64;

/// A request to capture a bundle for the next execution of a fingerprint
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticsRequest {
    pub fingerprint: String,
    /// Only executions at least this slow satisfy the request
    pub min_execution_latency: Option<Duration>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl DiagnosticsRequest {
    pub fn new(fingerprint: impl Into<String>) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            min_execution_latency: None,
            expires_at: None,
        }
    }

    pub fn with_min_execution_latency(mut self, latency: Duration) -> Self {
        self.min_execution_latency = Some(latency);
        self
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|t| t <= now).unwrap_or(false)
    }

    /// Whether an execution with `latency` is slow enough
    pub fn latency_condition_met(&self, latency: Duration) -> bool {
        self.min_execution_latency
            .map(|min| latency >= min)
            .unwrap_or(true)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutstandingRequest {
    pub id: RequestId,
    pub request: DiagnosticsRequest,
}

/// Tracks diagnostics requests and persists bundles
pub trait DiagnosticsRegistry: Send + Sync {
    /// If a request is outstanding for `fingerprint`, claim it for this
    /// execution
    fn should_collect_diagnostics(&self, fingerprint: &str) -> Option<OutstandingRequest>;

    /// Whether the measured service latency satisfies the request. When it
    /// does not, the claim is released so a later execution can try.
    fn is_exec_latency_condition_met(
        &self,
        id: RequestId,
        request: &DiagnosticsRequest,
        latency: Duration,
    ) -> bool;

    /// Persist a bundle; `request_id` is `None` for EXPLAIN ANALYZE (DEBUG)
    fn insert_bundle(
        &self,
        fingerprint: &str,
        statement: &str,
        bundle: &Bundle,
        request_id: Option<RequestId>,
    ) -> Result<BundleId, DiagnosticsError>;

    /// Mark the request as no longer outstanding
    fn remove_ongoing(&self, id: RequestId, request: &DiagnosticsRequest);

    /// Give up a claim without serving the request, so a later execution can
    fn release_ongoing(&self, id: RequestId, request: &DiagnosticsRequest);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestState {
    Pending,
    Ongoing,
}

#[derive(Debug, Clone)]
pub struct StoredBundle {
    pub id: BundleId,
    pub fingerprint: String,
    pub statement: String,
    pub request_id: Option<RequestId>,
    pub bundle: Bundle,
}

#[derive(Debug, Default)]
struct RegistryState {
    next_id: u64,
    requests: HashMap<RequestId, (DiagnosticsRequest, RequestState)>,
    completed: HashMap<RequestId, BundleId>,
    bundles: Vec<StoredBundle>,
}

impl RegistryState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// A registry keeping requests and bundles in memory
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    state: Mutex<RegistryState>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request for the next execution of its fingerprint
    pub fn activate_request(&self, request: DiagnosticsRequest) -> RequestId {
        let mut state = self.state.lock();
        let id = state.next_id();
        log::debug!(
            "diagnostics request {} activated for fingerprint {:?}",
            id,
            request.fingerprint
        );
        state.requests.insert(id, (request, RequestState::Pending));
        id
    }

    /// Request is registered and not yet satisfied
    pub fn is_outstanding(&self, id: RequestId) -> bool {
        self.state.lock().requests.contains_key(&id)
    }

    /// Bundle that satisfied the request, if any
    pub fn completed_bundle(&self, id: RequestId) -> Option<BundleId> {
        self.state.lock().completed.get(&id).copied()
    }

    pub fn bundles(&self) -> Vec<StoredBundle> {
        self.state.lock().bundles.clone()
    }

    pub fn bundle(&self, id: BundleId) -> Option<StoredBundle> {
        self.state.lock().bundles.iter().find(|b| b.id == id).cloned()
    }
}

impl DiagnosticsRegistry for InMemoryRegistry {
    fn should_collect_diagnostics(&self, fingerprint: &str) -> Option<OutstandingRequest> {
        let mut state = self.state.lock();
        let now = Utc::now();
        state.requests.retain(|id, (req, _)| {
            let expired = req.is_expired(now);
            if expired {
                log::debug!("diagnostics request {} expired", id);
            }
            !expired
        });
        let (&id, (request, request_state)) = state
            .requests
            .iter_mut()
            .filter(|(_, (req, st))| req.fingerprint == fingerprint && *st == RequestState::Pending)
            .min_by_key(|(id, _)| **id)?;
        *request_state = RequestState::Ongoing;
        Some(OutstandingRequest {
            id,
            request: request.clone(),
        })
    }

    fn is_exec_latency_condition_met(
        &self,
        id: RequestId,
        request: &DiagnosticsRequest,
        latency: Duration,
    ) -> bool {
        if request.latency_condition_met(latency) {
            return true;
        }
        if let Some((_, st)) = self.state.lock().requests.get_mut(&id) {
            *st = RequestState::Pending;
        }
        false
    }

    fn insert_bundle(
        &self,
        fingerprint: &str,
        statement: &str,
        bundle: &Bundle,
        request_id: Option<RequestId>,
    ) -> Result<BundleId, DiagnosticsError> {
        let mut state = self.state.lock();
        if let Some(rid) = request_id {
            if !state.requests.contains_key(&rid) {
                return Err(DiagnosticsError::UnknownRequest(rid));
            }
        }
        let id = state.next_id();
        state.bundles.push(StoredBundle {
            id,
            fingerprint: fingerprint.to_string(),
            statement: statement.to_string(),
            request_id,
            bundle: bundle.clone(),
        });
        if let Some(rid) = request_id {
            state.completed.insert(rid, id);
        }
        Ok(id)
    }

    fn remove_ongoing(&self, id: RequestId, _request: &DiagnosticsRequest) {
        self.state.lock().requests.remove(&id);
    }

    fn release_ongoing(&self, id: RequestId, _request: &DiagnosticsRequest) {
        if let Some((_, st)) = self.state.lock().requests.get_mut(&id) {
            *st = RequestState::Pending;
        }
    }
}
