// Copyright (c) 2024-2025 sqlinstr Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Instrumentation configuration and process-wide settings

pub mod settings;

pub use settings::{InstrumentationConfig, InstrumentationSettings, SampleRate, Strictness};
