// Copyright (c) 2024-2025 sqlinstr Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Statement statistics store interface

use crate::error::StatsError;
use crate::execstats::QueryLevelStats;
use crate::plan::ExplainTreePlanNode;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Key under which per-statement execution statistics are recorded
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatementStatsKey {
    pub query: String,
    pub implicit_txn: bool,
    pub database: String,
    pub failed: bool,
    pub plan_hash: u64,
}

/// Latencies of the phases of one statement execution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTimes {
    pub planning_latency: Duration,
    pub run_latency: Duration,
    /// End-to-end latency minus internal overhead
    pub service_latency: Duration,
}

impl PhaseTimes {
    pub fn new(planning_latency: Duration, run_latency: Duration) -> Self {
        Self {
            planning_latency,
            run_latency,
            service_latency: planning_latency + run_latency,
        }
    }
}

/// The statement statistics store
pub trait StatsCollector: Send + Sync {
    /// True when no logical plan has been saved yet for this statement
    fn should_save_logical_plan_desc(
        &self,
        fingerprint: &str,
        implicit_txn: bool,
        database: &str,
    ) -> bool;

    fn record_statement_exec_stats(
        &self,
        key: StatementStatsKey,
        stats: &QueryLevelStats,
    ) -> Result<(), StatsError>;
}

/// Accumulated execution statistics for one key
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatementExecStats {
    pub count: u64,
    pub totals: QueryLevelStats,
}

#[derive(Debug, Default)]
struct CollectorState {
    exec_stats: HashMap<StatementStatsKey, StatementExecStats>,
    saved_plans: HashSet<(String, bool, String)>,
    plans: HashMap<String, ExplainTreePlanNode>,
}

/// A statistics store keeping everything in memory
#[derive(Debug, Default)]
pub struct InMemoryStatsCollector {
    state: Mutex<CollectorState>,
    capacity: Option<usize>,
}

impl InMemoryStatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse new keys once `capacity` keys are stored
    pub fn with_capacity_limit(capacity: usize) -> Self {
        Self {
            state: Mutex::default(),
            capacity: Some(capacity),
        }
    }

    /// Remember the logical plan for a statement; later executions no longer
    /// ask for it
    pub fn save_logical_plan(
        &self,
        fingerprint: &str,
        implicit_txn: bool,
        database: &str,
        plan: ExplainTreePlanNode,
    ) {
        let mut state = self.state.lock();
        state
            .saved_plans
            .insert((fingerprint.to_string(), implicit_txn, database.to_string()));
        state.plans.insert(fingerprint.to_string(), plan);
    }

    pub fn logical_plan(&self, fingerprint: &str) -> Option<ExplainTreePlanNode> {
        self.state.lock().plans.get(fingerprint).cloned()
    }

    pub fn exec_stats(&self, key: &StatementStatsKey) -> Option<StatementExecStats> {
        self.state.lock().exec_stats.get(key).cloned()
    }

    /// Total executions recorded across all keys
    pub fn recorded_count(&self) -> u64 {
        self.state.lock().exec_stats.values().map(|s| s.count).sum()
    }
}

impl StatsCollector for InMemoryStatsCollector {
    fn should_save_logical_plan_desc(
        &self,
        fingerprint: &str,
        implicit_txn: bool,
        database: &str,
    ) -> bool {
        !self.state.lock().saved_plans.contains(&(
            fingerprint.to_string(),
            implicit_txn,
            database.to_string(),
        ))
    }

    fn record_statement_exec_stats(
        &self,
        key: StatementStatsKey,
        stats: &QueryLevelStats,
    ) -> Result<(), StatsError> {
        let mut state = self.state.lock();
        if let Some(limit) = self.capacity {
            if !state.exec_stats.contains_key(&key) && state.exec_stats.len() >= limit {
                return Err(StatsError::CapacityExceeded { limit });
            }
        }
        let entry = state.exec_stats.entry(key).or_default();
        entry.count += 1;
        entry.totals.accumulate(stats);
        Ok(())
    }
}
