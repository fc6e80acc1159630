// Copyright (c) 2024-2025 sqlinstr Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Statement diagnostics: outstanding capture requests and the bundles that
//! satisfy them

pub mod bundle;
pub mod registry;

pub use bundle::{build_statement_bundle, capture_bundle, Bundle};
pub use registry::{
    BundleId, DiagnosticsRegistry, DiagnosticsRequest, InMemoryRegistry, OutstandingRequest,
    RequestId,
};
