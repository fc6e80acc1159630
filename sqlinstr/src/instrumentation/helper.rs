// Copyright (c) 2024-2025 sqlinstr Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Per-statement instrumentation controller
//!
//! An [`InstrumentationHelper`] lives for one statement execution:
//!
//! - `set_output_mode` is called first when running an EXPLAIN ANALYZE
//!   variant.
//! - `setup` is called once before execution. It decides how much to
//!   instrument and returns the context the statement must run under.
//! - the `should_*` accessors and the `record_*` methods may be called any
//!   number of times during planning and execution.
//! - `finish` is called on every exit path when `setup` reported that it is
//!   needed.

use super::sampling::{SamplingInput, SamplingPolicy, SpanPlan};
use super::span::StatementSpan;
use crate::config::InstrumentationSettings;
use crate::diagnostics::{
    build_statement_bundle, capture_bundle, DiagnosticsRegistry, OutstandingRequest,
};
use crate::error::InstrumentationError;
use crate::execstats::{
    query_level_stats, ComponentId, ExecutionStats, FlowsMetadata, QueryLevelStats,
};
use crate::locality::LocalityResolver;
use crate::output::{
    diagram_rows, set_explain_analyze_result, set_explain_bundle_result, CommandResult, FlowInfo,
};
use crate::plan::{
    emit_explain, ExecNodeTraceMetadata, ExplainFlags, ExplainPlan, ExplainTreePlanNode, NodeIndex,
    OutputBuilder, PlanDistribution, PlanGist,
};
use crate::sqlstats::{PhaseTimes, StatementStatsKey, StatsCollector};
use crate::trace::{RecordingLevel, Recording, TraceContext, Tracer};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// How the statement's output is populated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// The statement's own rows
    #[default]
    Unmodified,
    /// EXPLAIN ANALYZE (DEBUG): a pointer to a diagnostics bundle
    ExplainAnalyzeDebug,
    /// EXPLAIN ANALYZE (PLAN): the plan annotated with statistics
    ExplainAnalyzePlan,
    /// EXPLAIN ANALYZE (DISTSQL): the annotated plan plus flow diagrams
    ExplainAnalyzeDistSql,
}

impl OutputMode {
    fn renders_plan(self) -> bool {
        matches!(
            self,
            OutputMode::ExplainAnalyzePlan | OutputMode::ExplainAnalyzeDistSql
        )
    }
}

/// Testing hook receiving every traced statement's recording and SQL text
pub type StatementTraceHook = Arc<dyn Fn(&Recording, &str) + Send + Sync>;

/// Process-wide collaborators shared by every statement's controller
#[derive(Clone)]
pub struct InstrumentationEnv {
    pub tracer: Arc<dyn Tracer>,
    pub registry: Arc<dyn DiagnosticsRegistry>,
    pub stats_collector: Arc<dyn StatsCollector>,
    pub locality: Arc<dyn LocalityResolver>,
    pub settings: Arc<InstrumentationSettings>,
    pub sampling: Arc<SamplingPolicy>,
    pub statement_trace: Option<StatementTraceHook>,
}

impl InstrumentationEnv {
    pub fn new(
        tracer: Arc<dyn Tracer>,
        registry: Arc<dyn DiagnosticsRegistry>,
        stats_collector: Arc<dyn StatsCollector>,
        locality: Arc<dyn LocalityResolver>,
        settings: Arc<InstrumentationSettings>,
    ) -> Self {
        let sampling = Arc::new(SamplingPolicy::new(settings.clone()));
        Self {
            tracer,
            registry,
            stats_collector,
            locality,
            settings,
            sampling,
            statement_trace: None,
        }
    }

    /// Seed the sampling generator for reproducible runs
    pub fn with_sampling_seed(mut self, seed: u64) -> Self {
        self.sampling = Arc::new(SamplingPolicy::with_seed(self.settings.clone(), seed));
        self
    }

    /// Trace every statement verbosely and hand its recording to `hook`
    pub fn with_statement_trace(
        mut self,
        hook: impl Fn(&Recording, &str) + Send + Sync + 'static,
    ) -> Self {
        self.statement_trace = Some(Arc::new(hook));
        self
    }
}

/// Identity of the statement being instrumented
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementInfo {
    /// Anonymized statement text
    pub fingerprint: String,
    pub implicit_txn: bool,
    pub database: String,
}

impl StatementInfo {
    pub fn new(
        fingerprint: impl Into<String>,
        implicit_txn: bool,
        database: impl Into<String>,
    ) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            implicit_txn,
            database: database.into(),
        }
    }
}

/// Result of [`InstrumentationHelper::setup`]
#[derive(Debug, Clone)]
pub struct SetupOutcome {
    /// Context the statement must execute under
    pub ctx: TraceContext,
    /// `finish` must be called on every exit path
    pub need_finish: bool,
}

/// What [`InstrumentationHelper::finish`] needs from the execution
#[derive(Debug, Default)]
pub struct FinishArgs {
    /// Statement text stored in a diagnostics bundle
    pub statement: String,
    /// Raw SQL handed to the statement trace hook
    pub raw_sql: String,
    /// Bound placeholder values, `$1` first
    pub placeholders: Vec<String>,
    pub phase_times: PhaseTimes,
    /// Physical flows saved during planning
    pub flows: Vec<FlowInfo>,
}

impl FinishArgs {
    pub fn new(statement: impl Into<String>) -> Self {
        let statement = statement.into();
        Self {
            raw_sql: statement.clone(),
            statement,
            ..Self::default()
        }
    }

    pub fn with_phase_times(mut self, phase_times: PhaseTimes) -> Self {
        self.phase_times = phase_times;
        self
    }

    pub fn with_placeholders(mut self, placeholders: Vec<String>) -> Self {
        self.placeholders = placeholders;
        self
    }

    pub fn with_flows(mut self, flows: Vec<FlowInfo>) -> Self {
        self.flows = flows;
        self
    }
}

/// Optimizer estimates for the planned statement
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanEstimates {
    pub cost: f64,
    /// Largest row count of any full scan
    pub max_full_scan_rows: f64,
    pub total_scan_rows: f64,
    pub output_rows: f64,
    /// Table statistics were available while planning
    pub stats_available: bool,
    /// Age of the oldest statistics used
    pub since_stats_collected: Option<Duration>,
}

fn statement_result(ret_err: Option<InstrumentationError>) -> Result<(), InstrumentationError> {
    match ret_err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Instrumentation state of one statement execution
#[derive(Debug, Default)]
pub struct InstrumentationHelper {
    output_mode: OutputMode,
    explain_flags: ExplainFlags,

    fingerprint: String,
    implicit_txn: bool,
    database: String,

    collect_bundle: bool,
    collect_exec_stats: bool,
    discard_rows: bool,
    save_plan_for_stats: bool,
    diag_request: Option<OutstandingRequest>,

    span: StatementSpan,
    finished: bool,

    explain_plan: Option<ExplainPlan>,
    distribution: PlanDistribution,
    vectorized: bool,
    trace_metadata: Option<ExecNodeTraceMetadata>,
    node_stats: HashMap<NodeIndex, ExecutionStats>,
    regions: Vec<String>,
    plan_gist: Option<PlanGist>,
    estimates: Option<PlanEstimates>,
}

impl InstrumentationHelper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select an EXPLAIN ANALYZE variant; must precede `setup`
    pub fn set_output_mode(&mut self, output_mode: OutputMode, explain_flags: ExplainFlags) {
        self.output_mode = output_mode;
        self.explain_flags = explain_flags;
    }

    pub fn output_mode(&self) -> OutputMode {
        self.output_mode
    }

    /// Decide how to instrument the statement and open its span if needed.
    ///
    /// When the returned `need_finish` is false the statement runs
    /// uninstrumented and `finish` is a no-op.
    pub fn setup(
        &mut self,
        env: &InstrumentationEnv,
        ctx: &TraceContext,
        stmt: &StatementInfo,
        collect_txn_exec_stats: bool,
    ) -> Result<SetupOutcome, InstrumentationError> {
        self.fingerprint = stmt.fingerprint.clone();
        self.implicit_txn = stmt.implicit_txn;
        self.database = stmt.database.clone();

        match self.output_mode {
            OutputMode::ExplainAnalyzeDebug => {
                // the rows are replaced by a pointer to the bundle
                self.collect_bundle = true;
                self.discard_rows = true;
            }
            OutputMode::ExplainAnalyzePlan | OutputMode::ExplainAnalyzeDistSql => {
                self.discard_rows = true;
            }
            OutputMode::Unmodified => {
                self.diag_request = env.registry.should_collect_diagnostics(&stmt.fingerprint);
                self.collect_bundle = self.diag_request.is_some();
            }
        }

        self.save_plan_for_stats = env.stats_collector.should_save_logical_plan_desc(
            &stmt.fingerprint,
            stmt.implicit_txn,
            &stmt.database,
        );

        if self.should_build_explain_plan() {
            self.trace_metadata = Some(ExecNodeTraceMetadata::new());
        }

        let decision = env.sampling.decide(&SamplingInput {
            output_mode: self.output_mode,
            collect_bundle: self.collect_bundle,
            ambient_verbose: ctx.span().map(|s| s.is_verbose()).unwrap_or(false),
            collect_txn_exec_stats,
            save_plan_for_stats: self.save_plan_for_stats,
            has_trace_hook: env.statement_trace.is_some(),
        });

        let strictness = env.settings.strictness();
        let (ctx, span) =
            match StatementSpan::open(env.tracer.as_ref(), ctx, decision.span, strictness) {
                Ok(opened) => opened,
                Err(e) => {
                    self.release_diag_request(env);
                    return Err(e);
                }
            };
        self.collect_exec_stats = decision.collect_exec_stats;
        if decision.span == SpanPlan::Child(RecordingLevel::Verbose) {
            self.trace_metadata.get_or_insert_with(ExecNodeTraceMetadata::new);
        }

        let need_finish = span.needs_finish();
        self.span = span;
        log::debug!(
            "instrumentation for {:?}: span {:?}, exec stats {}, bundle {}",
            self.fingerprint,
            decision.span,
            self.collect_exec_stats,
            self.collect_bundle
        );
        Ok(SetupOutcome { ctx, need_finish })
    }

    /// Finish the statement's span, record its statistics and, for EXPLAIN
    /// ANALYZE variants, write the output rows.
    ///
    /// `ret_err` is the statement's own error. It is returned unchanged after
    /// the bookkeeping is done, and no rows are written. Calling `finish` a
    /// second time does nothing beyond returning `ret_err`.
    pub fn finish(
        &mut self,
        env: &InstrumentationEnv,
        mut args: FinishArgs,
        txn_stats: &mut QueryLevelStats,
        collect_exec_stats: bool,
        res: &mut dyn CommandResult,
        ret_err: Option<InstrumentationError>,
    ) -> Result<(), InstrumentationError> {
        if self.finished {
            return statement_result(ret_err);
        }
        let Some(trace) = self.span.finish() else {
            return statement_result(ret_err);
        };
        self.finished = true;

        if let Some(hook) = &env.statement_trace {
            hook(&trace, &args.raw_sql);
        }

        let deterministic = env.settings.deterministic_explain();
        self.annotate_plan(env, &trace, deterministic);

        let flows_metadata: Vec<FlowsMetadata> =
            args.flows.iter().map(|f| f.flows_metadata.clone()).collect();
        let query_stats = match query_level_stats(&trace, deterministic, &flows_metadata) {
            Ok(stats) => {
                let key = StatementStatsKey {
                    query: self.fingerprint.clone(),
                    implicit_txn: self.implicit_txn,
                    database: self.database.clone(),
                    failed: ret_err.is_some(),
                    plan_hash: self.plan_hash(),
                };
                if let Err(e) = env.stats_collector.record_statement_exec_stats(key, &stats) {
                    log::trace!("unable to record statement exec stats: {}", e);
                }
                if collect_exec_stats || self.implicit_txn {
                    txn_stats.accumulate(&stats);
                }
                stats
            }
            Err(e) => {
                if env.settings.is_strict() && ret_err.is_none() {
                    self.release_diag_request(env);
                    return Err(e.into());
                }
                log::debug!(
                    "error getting query level stats for statement {:?}: {}",
                    self.fingerprint,
                    e
                );
                QueryLevelStats::default()
            }
        };

        let mut warnings = Vec::new();
        let bundle = if self.collect_bundle {
            capture_bundle(
                env.registry.as_ref(),
                &self.fingerprint,
                self.diag_request.as_ref(),
                args.phase_times.service_latency,
                || {
                    let flags = ExplainFlags {
                        verbose: true,
                        show_types: true,
                        deterministic,
                        ..ExplainFlags::default()
                    };
                    let ob = self.explain_analyze_output(flags, &args.phase_times, &query_stats);
                    warnings = ob.warnings().to_vec();
                    build_statement_bundle(
                        &args.statement,
                        &ob.build_string(),
                        &trace,
                        &args.placeholders,
                    )
                },
            )
        } else {
            None
        };

        // a statement error takes precedence over any output
        if ret_err.is_some() {
            return statement_result(ret_err);
        }

        match self.output_mode {
            OutputMode::ExplainAnalyzeDebug => set_explain_bundle_result(
                res,
                bundle.as_ref(),
                &env.settings.admin_url(),
                &warnings,
            ),
            OutputMode::ExplainAnalyzePlan | OutputMode::ExplainAnalyzeDistSql => {
                let mut flags = self.explain_flags;
                flags.deterministic |= deterministic;
                let mut rows = self
                    .explain_analyze_output(flags, &args.phase_times, &query_stats)
                    .build_string_rows();
                if self.output_mode == OutputMode::ExplainAnalyzeDistSql {
                    rows.extend(diagram_rows(&mut args.flows, &trace));
                }
                set_explain_analyze_result(res, rows)
            }
            OutputMode::Unmodified => Ok(()),
        }
    }

    /// Merge the trace onto the recorded plan, if one is being annotated
    fn annotate_plan(&mut self, env: &InstrumentationEnv, trace: &Recording, deterministic: bool) {
        let (Some(plan), Some(metadata)) = (&self.explain_plan, &self.trace_metadata) else {
            return;
        };
        let descriptors = match env.locality.all_node_descriptors() {
            Ok(descriptors) => descriptors,
            Err(e) => {
                log::warn!("unable to resolve node localities: {}", e);
                Vec::new()
            }
        };
        let annotated = metadata.annotate_explain(plan, trace.spans(), deterministic, &descriptors);
        self.node_stats = annotated.stats;
        self.regions = annotated.regions;
    }

    /// Hand a claimed diagnostics request back unserved
    fn release_diag_request(&mut self, env: &InstrumentationEnv) {
        if let Some(req) = self.diag_request.take() {
            log::debug!("releasing diagnostics request {}", req.id);
            env.registry.release_ongoing(req.id, &req.request);
        }
        self.collect_bundle = false;
    }

    fn plan_hash(&self) -> u64 {
        match (&self.plan_gist, &self.explain_plan) {
            (Some(gist), _) => gist.hash(),
            (None, Some(plan)) => PlanGist::from_plan(plan).hash(),
            (None, None) => 0,
        }
    }

    /// The EXPLAIN ANALYZE report. Empty when no plan was recorded.
    fn explain_analyze_output(
        &self,
        flags: ExplainFlags,
        phase_times: &PhaseTimes,
        stats: &QueryLevelStats,
    ) -> OutputBuilder {
        let mut ob = OutputBuilder::new(flags);
        let Some(plan) = &self.explain_plan else {
            return ob;
        };
        ob.add_distribution(self.distribution);
        ob.add_vectorized(self.vectorized);
        ob.add_planning_time(phase_times.planning_latency);
        ob.add_execution_time(phase_times.run_latency);
        if stats.kv_rows_read != 0 {
            ob.add_kv_read_stats(stats.kv_rows_read, stats.kv_bytes_read);
        }
        if !stats.kv_time.is_zero() {
            ob.add_kv_time(stats.kv_time);
        }
        if !stats.contention_time.is_zero() {
            ob.add_contention_time(stats.contention_time);
        }
        ob.add_max_mem_usage(stats.max_mem_usage);
        ob.add_network_stats(stats.network_messages, stats.network_bytes_sent);
        ob.add_max_disk_usage(stats.max_disk_usage);
        if !self.regions.is_empty() {
            ob.add_regions_stats(&self.regions);
        }
        if let Some(estimates) = &self.estimates {
            if !estimates.stats_available {
                ob.add_warning(
                    "table statistics are not available; row estimates may be inaccurate",
                );
            }
        }
        if let Err(e) = emit_explain(&mut ob, plan, &self.node_stats) {
            ob.add_top_level_field("error emitting plan", e);
        }
        ob
    }

    /// Discard result rows (EXECUTE .. DISCARD ROWS)
    pub fn set_discard_rows(&mut self) {
        self.discard_rows = true;
    }

    /// True for EXPLAIN ANALYZE variants or after `set_discard_rows`
    pub fn should_discard_rows(&self) -> bool {
        self.discard_rows
    }

    /// Whether physical flows should be saved, for diagrams or for
    /// query-level statistics
    pub fn should_save_flows(&self) -> bool {
        self.collect_bundle
            || self.output_mode == OutputMode::ExplainAnalyzeDistSql
            || self.collect_exec_stats
    }

    /// Whether saved flows should carry diagrams
    pub fn should_save_diagrams(&self) -> bool {
        self.collect_bundle || self.output_mode != OutputMode::Unmodified
    }

    /// Side-effectful statistics work (e.g. table statistics creation) runs
    /// as a background job unless the statement is being analyzed
    pub fn should_use_job_for_side_effectful_stats(&self) -> bool {
        self.output_mode == OutputMode::Unmodified
    }

    /// Whether the planner should build an explain plan and pass it to
    /// `record_explain_plan`
    pub fn should_build_explain_plan(&self) -> bool {
        self.collect_bundle || self.save_plan_for_stats || self.output_mode.renders_plan()
    }

    pub fn should_collect_exec_stats(&self) -> bool {
        self.collect_exec_stats
    }

    pub fn should_save_memo(&self) -> bool {
        self.should_build_explain_plan()
    }

    pub fn record_explain_plan(&mut self, plan: ExplainPlan) {
        self.explain_plan = Some(plan);
    }

    pub fn record_plan_info(&mut self, distribution: PlanDistribution, vectorized: bool) {
        self.distribution = distribution;
        self.vectorized = vectorized;
    }

    pub fn set_plan_gist(&mut self, gist: PlanGist) {
        self.plan_gist = Some(gist);
    }

    pub fn plan_gist(&self) -> Option<&PlanGist> {
        self.plan_gist.as_ref()
    }

    pub fn record_plan_estimates(&mut self, estimates: PlanEstimates) {
        self.estimates = Some(estimates);
    }

    pub fn plan_estimates(&self) -> Option<&PlanEstimates> {
        self.estimates.as_ref()
    }

    /// Record which execution components implement a plan node. Ignored
    /// unless an explain plan is being built.
    pub fn associate_node_with_components(
        &mut self,
        node: NodeIndex,
        components: Vec<ComponentId>,
    ) {
        if let Some(metadata) = &mut self.trace_metadata {
            metadata.associate_node_with_components(node, components);
        }
    }

    /// The recorded plan with values hidden, for persisting with statement
    /// statistics. `None` when no plan was recorded.
    pub fn plan_for_stats(&self) -> Option<ExplainTreePlanNode> {
        let plan = self.explain_plan.as_ref()?;
        let mut ob = OutputBuilder::new(ExplainFlags {
            hide_values: true,
            ..ExplainFlags::default()
        });
        ob.add_distribution(self.distribution);
        ob.add_vectorized(self.vectorized);
        if let Err(e) = emit_explain(&mut ob, plan, &HashMap::new()) {
            log::warn!("unable to emit explain plan tree: {}", e);
            return None;
        }
        ob.build_proto_tree()
    }

    /// Regions the statement's annotated plan nodes ran in, sorted
    pub fn regions(&self) -> &[String] {
        &self.regions
    }

    /// Statistics merged onto a plan node by `finish`
    pub fn node_stats(&self, node: NodeIndex) -> Option<&ExecutionStats> {
        self.node_stats.get(&node)
    }

    pub fn statement_span(&self) -> &StatementSpan {
        &self.span
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}
