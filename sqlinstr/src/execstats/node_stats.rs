// Copyright (c) 2024-2025 sqlinstr Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Execution statistics attributed to one node of the explain plan

use super::component::ComponentStats;
use serde::{Deserialize, Serialize};
use std::ops::Add;
use std::time::Duration;

/// Add `value` into `acc` when `value` is known
pub fn maybe_add<T: Add<Output = T> + Copy>(acc: &mut Option<T>, value: Option<T>) {
    if let Some(v) = value {
        *acc = Some(match *acc {
            Some(a) => a + v,
            None => v,
        });
    }
}

/// Raise `acc` to `value` when `value` is known and larger
pub fn maybe_max<T: Ord + Copy>(acc: &mut Option<T>, value: Option<T>) {
    if let Some(v) = value {
        *acc = Some(match *acc {
            Some(a) => a.max(v),
            None => v,
        });
    }
}

/// Statistics for a plan node, merged from every component implementing it
///
/// Counters and volumes are summed across components; peak memory and disk
/// take the maximum. `None` means no component reported the value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub row_count: Option<u64>,
    pub kv_time: Option<Duration>,
    pub kv_contention_time: Option<Duration>,
    pub kv_bytes_read: Option<u64>,
    pub kv_rows_read: Option<u64>,
    pub step_count: Option<u64>,
    pub internal_step_count: Option<u64>,
    pub seek_count: Option<u64>,
    pub internal_seek_count: Option<u64>,
    pub vectorized_batch_count: Option<u64>,
    pub max_allocated_mem: Option<u64>,
    pub max_allocated_disk: Option<u64>,
    /// Execution nodes that ran a component, as `n<id>`, ordered by id
    pub nodes: Vec<String>,
    /// Regions of those nodes, sorted, without empty names
    pub regions: Vec<String>,
}

impl ExecutionStats {
    pub fn merge_component(&mut self, stats: &ComponentStats) {
        maybe_add(&mut self.row_count, stats.output.num_tuples);
        maybe_add(&mut self.kv_time, stats.kv.kv_time);
        maybe_add(&mut self.kv_contention_time, stats.kv.contention_time);
        maybe_add(&mut self.kv_bytes_read, stats.kv.bytes_read);
        maybe_add(&mut self.kv_rows_read, stats.kv.tuples_read);
        maybe_add(&mut self.step_count, stats.kv.num_interface_steps);
        maybe_add(&mut self.internal_step_count, stats.kv.num_internal_steps);
        maybe_add(&mut self.seek_count, stats.kv.num_interface_seeks);
        maybe_add(&mut self.internal_seek_count, stats.kv.num_internal_seeks);
        maybe_add(&mut self.vectorized_batch_count, stats.output.num_batches);
        maybe_max(&mut self.max_allocated_mem, stats.exec.max_allocated_mem);
        maybe_max(&mut self.max_allocated_disk, stats.exec.max_allocated_disk);
    }
}
