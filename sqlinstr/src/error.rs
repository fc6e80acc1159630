// Copyright (c) 2024-2025 sqlinstr Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Error types for statement instrumentation

use thiserror::Error;

/// Rejected configuration values
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid sample rate {0}: value must be between 0 and 1 inclusive")]
    InvalidSampleRate(f64),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors reading execution statistics out of a trace recording
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TraceError {
    #[error("malformed structured record {type_url} in span {span_id}: {message}")]
    MalformedRecord {
        span_id: u64,
        type_url: String,
        message: String,
    },
}

/// Errors raised by a diagnostics registry
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DiagnosticsError {
    #[error("unknown diagnostics request {0}")]
    UnknownRequest(u64),

    #[error("failed to persist diagnostics bundle: {0}")]
    Persistence(String),
}

/// Errors raised by a statement statistics store
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StatsError {
    #[error("statement statistics store is full ({limit} fingerprints)")]
    CapacityExceeded { limit: usize },

    #[error("statement statistics error: {0}")]
    Other(String),
}

/// Errors surfaced by the instrumentation controller
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InstrumentationError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("error getting query level stats: {0}")]
    TraceExtraction(#[from] TraceError),

    #[error("assertion failed: {0}")]
    Assertion(String),

    #[error("diagnostics error: {0}")]
    Persistence(#[from] DiagnosticsError),

    /// The result stream rejected a row; the connection is presumed broken.
    #[error("communication error: {0}")]
    Communication(String),

    /// An error the statement itself produced before instrumentation finished.
    #[error("{0}")]
    Statement(String),
}
