//! Instrumentation fixture for integration tests
//!
//! Builds an `InstrumentationEnv` out of the crate's in-memory tracer,
//! registry, statistics store and locality resolver, and keeps typed handles
//! so tests can look inside them afterwards.

use sqlinstr::diagnostics::{
    Bundle, BundleId, DiagnosticsRegistry, DiagnosticsRequest, InMemoryRegistry,
    OutstandingRequest, RequestId,
};
use sqlinstr::error::DiagnosticsError;
use sqlinstr::execstats::{ComponentId, ComponentStats};
use sqlinstr::locality::{LocalityResolver, StaticLocalityResolver};
use sqlinstr::output::FlowDiagram;
use sqlinstr::plan::PlanNode;
use sqlinstr::sqlstats::InMemoryStatsCollector;
use sqlinstr::trace::{LocalTracer, Recording, Tracer, TypedRecord};
use sqlinstr::{
    ExplainPlan, InstrumentationConfig, InstrumentationEnv, InstrumentationSettings, NodeIndex,
    RecordingLevel, Span, StatementInfo, TraceContext,
};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const DATABASE: &str = "defaultdb";

/// Route log output through the test harness
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Instrumentation environment with inspectable in-memory collaborators
pub struct InstrFixture {
    pub env: InstrumentationEnv,
    pub tracer: Arc<LocalTracer>,
    pub registry: Arc<InMemoryRegistry>,
    pub collector: Arc<InMemoryStatsCollector>,
    pub settings: Arc<InstrumentationSettings>,
}

impl InstrFixture {
    /// Strict, deterministic, sampling disabled
    pub fn new() -> Self {
        Self::with_config(InstrumentationConfig::testing(), 0.0)
    }

    pub fn with_sample_rate(rate: f64) -> Self {
        Self::with_config(InstrumentationConfig::testing(), rate)
    }

    pub fn lenient() -> Self {
        let config = InstrumentationConfig {
            strictness: sqlinstr::Strictness::Lenient,
            ..InstrumentationConfig::testing()
        };
        Self::with_config(config, 0.0)
    }

    pub fn with_config(config: InstrumentationConfig, rate: f64) -> Self {
        Self::build(
            config,
            rate,
            Arc::new(StaticLocalityResolver::with_regions([
                (1, "us-east1"),
                (2, "us-west1"),
                (3, "europe-west1"),
            ])),
        )
    }

    pub fn with_locality(locality: Arc<dyn LocalityResolver>) -> Self {
        Self::build(InstrumentationConfig::testing(), 0.0, locality)
    }

    fn build(
        config: InstrumentationConfig,
        rate: f64,
        locality: Arc<dyn LocalityResolver>,
    ) -> Self {
        init_logging();
        let tracer = Arc::new(LocalTracer::new());
        let registry = Arc::new(InMemoryRegistry::new());
        let collector = Arc::new(InMemoryStatsCollector::new());
        let settings = Arc::new(InstrumentationSettings::new(config));
        settings
            .set_sample_rate(rate)
            .expect("Invalid sample rate in fixture");
        let env = InstrumentationEnv::new(
            tracer.clone(),
            registry.clone(),
            collector.clone(),
            locality,
            settings.clone(),
        )
        .with_sampling_seed(fastrand::u64(..));
        Self {
            env,
            tracer,
            registry,
            collector,
            settings,
        }
    }

    /// Replace the diagnostics registry used by the controller
    pub fn with_registry(mut self, registry: Arc<dyn DiagnosticsRegistry>) -> Self {
        self.env.registry = registry;
        self
    }

    /// A session context whose span records at `level`
    pub fn ambient(&self, level: RecordingLevel) -> TraceContext {
        TraceContext::with_span(self.tracer.start_span("session", None, level))
    }

    pub fn stmt(&self, fingerprint: &str) -> StatementInfo {
        StatementInfo::new(fingerprint, true, DATABASE)
    }

    pub fn request(&self, fingerprint: &str, min_latency: Duration) -> RequestId {
        self.registry.activate_request(
            DiagnosticsRequest::new(fingerprint).with_min_execution_latency(min_latency),
        )
    }
}

/// A registry that always wants a bundle and never manages to store it
#[derive(Debug, Default)]
pub struct FailingRegistry;

impl DiagnosticsRegistry for FailingRegistry {
    fn should_collect_diagnostics(&self, fingerprint: &str) -> Option<OutstandingRequest> {
        Some(OutstandingRequest {
            id: 1,
            request: DiagnosticsRequest::new(fingerprint),
        })
    }

    fn is_exec_latency_condition_met(
        &self,
        _id: RequestId,
        _request: &DiagnosticsRequest,
        _latency: Duration,
    ) -> bool {
        true
    }

    fn insert_bundle(
        &self,
        _fingerprint: &str,
        _statement: &str,
        _bundle: &Bundle,
        _request_id: Option<RequestId>,
    ) -> Result<BundleId, DiagnosticsError> {
        Err(DiagnosticsError::Persistence("disk full".to_string()))
    }

    fn remove_ongoing(&self, _id: RequestId, _request: &DiagnosticsRequest) {}

    fn release_ongoing(&self, _id: RequestId, _request: &DiagnosticsRequest) {}
}

/// A diagram whose URL cannot be generated
pub struct FailingDiagram(pub String);

impl FlowDiagram for FailingDiagram {
    fn add_spans(&mut self, _trace: &Recording) {}

    fn to_url(&self) -> Result<String, String> {
        Err(self.0.clone())
    }
}

/// A locality resolver that cannot reach the cluster
pub struct UnreachableLocality;

impl LocalityResolver for UnreachableLocality {
    fn all_node_descriptors(&self) -> Result<Vec<sqlinstr::locality::NodeDescriptor>, String> {
        Err("gossip unavailable".to_string())
    }
}

/// A plan with a single scan node
pub fn scan_plan(table: &str) -> (ExplainPlan, NodeIndex) {
    let mut plan = ExplainPlan::new();
    let scan = plan.add_node(
        PlanNode::new("scan")
            .with_field("table", format!("{}@primary", table))
            .with_literal("spans", "[/1 - /10]")
            .with_column("a", "int"),
    );
    plan.set_root(scan);
    (plan, scan)
}

/// `join` over two scans; returns the plan and the (join, left, right) nodes
pub fn join_plan() -> (ExplainPlan, NodeIndex, NodeIndex, NodeIndex) {
    let mut plan = ExplainPlan::new();
    let left = plan.add_node(PlanNode::new("scan").with_field("table", "a@primary"));
    let right = plan.add_node(PlanNode::new("scan").with_field("table", "b@primary"));
    let join = plan.add_node(PlanNode::new("hash join").with_children([left, right]));
    plan.set_root(join);
    (plan, join, left, right)
}

/// Record KV reads for a processor into `span`
pub fn record_processor(span: &Span, component: &ComponentId, rows: u64, bytes: u64) {
    let mut stats = ComponentStats::new(*component);
    stats.kv.tuples_read = Some(rows);
    stats.kv.bytes_read = Some(bytes);
    stats.output.num_tuples = Some(rows);
    span.record_structured(stats.to_record());
}

pub fn new_flow() -> Uuid {
    Uuid::new_v4()
}
