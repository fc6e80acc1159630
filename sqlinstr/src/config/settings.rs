// Copyright (c) 2024-2025 sqlinstr Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Instrumentation settings and validation

use crate::error::ConfigError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Default probability that a transaction collects execution statistics
pub const DEFAULT_TXN_STATS_SAMPLE_RATE: f64 = 0.01;

/// Probability in `[0, 1]` that a transaction collects execution statistics
///
/// The value is validated on construction (and on deserialization), so code
/// holding a `SampleRate` never re-checks the range.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct SampleRate(f64);

impl SampleRate {
    pub const DISABLED: SampleRate = SampleRate(0.0);
    pub const ALWAYS: SampleRate = SampleRate(1.0);

    /// Validate a raw probability
    pub fn new(rate: f64) -> Result<Self, ConfigError> {
        if !(0.0..=1.0).contains(&rate) {
            return Err(ConfigError::InvalidSampleRate(rate));
        }
        Ok(Self(rate))
    }

    pub fn get(self) -> f64 {
        self.0
    }

    /// A rate of exactly zero turns statistics sampling off
    pub fn is_disabled(self) -> bool {
        self.0 == 0.0
    }
}

impl Default for SampleRate {
    fn default() -> Self {
        Self(DEFAULT_TXN_STATS_SAMPLE_RATE)
    }
}

impl TryFrom<f64> for SampleRate {
    type Error = ConfigError;

    fn try_from(rate: f64) -> Result<Self, Self::Error> {
        Self::new(rate)
    }
}

impl From<SampleRate> for f64 {
    fn from(rate: SampleRate) -> Self {
        rate.0
    }
}

/// How internal assertion failures are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Strictness {
    /// Fail fast: assertion violations and trace extraction errors are
    /// returned to the caller
    Strict,
    /// Log and fall back to a degraded path
    #[default]
    Lenient,
}

/// Static instrumentation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentationConfig {
    /// Probability that a transaction collects execution statistics
    pub txn_stats_sample_rate: SampleRate,

    /// Assertion handling
    pub strictness: Strictness,

    /// Hide wall-clock dependent values so EXPLAIN ANALYZE output is stable
    pub deterministic_explain: bool,

    /// Base URL of the admin UI, used for diagnostics bundle links
    pub admin_url: String,

    /// Base URL of the physical plan diagram viewer
    pub diagram_viewer_url: String,
}

impl Default for InstrumentationConfig {
    fn default() -> Self {
        Self {
            txn_stats_sample_rate: SampleRate::default(),
            strictness: Strictness::Lenient,
            deterministic_explain: false,
            admin_url: "http://localhost:8080".to_string(),
            diagram_viewer_url: "https://distsqlplan.local/decode.html".to_string(),
        }
    }
}

impl InstrumentationConfig {
    /// Configuration used by tests: strict assertions, reproducible output
    pub fn testing() -> Self {
        Self {
            strictness: Strictness::Strict,
            deterministic_explain: true,
            ..Self::default()
        }
    }

    /// Parse a JSON configuration document, rejecting out-of-range values
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

/// Process-wide instrumentation settings shared by every statement
///
/// The sample rate can be changed at runtime; it is validated in
/// [`InstrumentationSettings::set_sample_rate`] and read without locking.
#[derive(Debug)]
pub struct InstrumentationSettings {
    sample_rate_bits: AtomicU64,
    strictness: Strictness,
    deterministic_explain: bool,
    urls: RwLock<(String, String)>,
}

impl InstrumentationSettings {
    pub fn new(config: InstrumentationConfig) -> Self {
        Self {
            sample_rate_bits: AtomicU64::new(config.txn_stats_sample_rate.get().to_bits()),
            strictness: config.strictness,
            deterministic_explain: config.deterministic_explain,
            urls: RwLock::new((config.admin_url, config.diagram_viewer_url)),
        }
    }

    /// Current transaction statistics sample rate
    pub fn sample_rate(&self) -> SampleRate {
        SampleRate(f64::from_bits(self.sample_rate_bits.load(Ordering::Relaxed)))
    }

    /// Change the sample rate; out-of-range values leave the setting untouched
    pub fn set_sample_rate(&self, rate: f64) -> Result<(), ConfigError> {
        let rate = SampleRate::new(rate)?;
        self.sample_rate_bits
            .store(rate.get().to_bits(), Ordering::Relaxed);
        log::debug!("txn stats sample rate set to {}", rate.get());
        Ok(())
    }

    pub fn strictness(&self) -> Strictness {
        self.strictness
    }

    pub fn is_strict(&self) -> bool {
        self.strictness == Strictness::Strict
    }

    pub fn deterministic_explain(&self) -> bool {
        self.deterministic_explain
    }

    pub fn admin_url(&self) -> String {
        self.urls.read().0.clone()
    }

    pub fn diagram_viewer_url(&self) -> String {
        self.urls.read().1.clone()
    }

    /// Point bundle and diagram links at different hosts
    pub fn set_urls(&self, admin_url: impl Into<String>, diagram_viewer_url: impl Into<String>) {
        *self.urls.write() = (admin_url.into(), diagram_viewer_url.into());
    }
}

impl Default for InstrumentationSettings {
    fn default() -> Self {
        Self::new(InstrumentationConfig::default())
    }
}
