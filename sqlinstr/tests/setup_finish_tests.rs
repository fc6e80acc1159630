//! Setup/finish pairing, span ownership and error precedence

#[path = "testutils/mod.rs"]
mod testutils;

use sqlinstr::diagnostics::DiagnosticsRegistry;
use sqlinstr::error::InstrumentationError;
use sqlinstr::execstats::{ComponentId, ComponentStats};
use sqlinstr::output::{BufferedResult, StatementType};
use sqlinstr::sqlstats::PhaseTimes;
use sqlinstr::trace::{StructuredRecord, TypedRecord};
use sqlinstr::{
    ExplainFlags, FinishArgs, InstrumentationHelper, OutputMode, QueryLevelStats, RecordingLevel,
};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use testutils::instr_fixture::{
    new_flow, record_processor, scan_plan, FailingRegistry, InstrFixture,
};

const MODES: [OutputMode; 4] = [
    OutputMode::Unmodified,
    OutputMode::ExplainAnalyzeDebug,
    OutputMode::ExplainAnalyzePlan,
    OutputMode::ExplainAnalyzeDistSql,
];

#[derive(Debug, PartialEq)]
enum SpanState {
    NoSpan,
    Owned,
    Borrowed,
}

#[test]
fn test_setup_finish_pairing_matrix() {
    for mode in MODES {
        for ambient_level in [RecordingLevel::Structured, RecordingLevel::Verbose] {
            for outstanding in [false, true] {
                let fixture = InstrFixture::new();
                if outstanding {
                    fixture.request("SELECT * FROM t", Duration::ZERO);
                }
                let ctx = fixture.ambient(ambient_level);
                let ambient = ctx.span().unwrap().clone();
                let started = fixture.tracer.spans_started();

                let mut ih = InstrumentationHelper::new();
                ih.set_output_mode(mode, ExplainFlags::default());
                let outcome = ih
                    .setup(&fixture.env, &ctx, &fixture.stmt("SELECT * FROM t"), false)
                    .unwrap();

                let expected = if ambient_level == RecordingLevel::Verbose {
                    SpanState::Borrowed
                } else if mode == OutputMode::Unmodified && !outstanding {
                    SpanState::NoSpan
                } else {
                    SpanState::Owned
                };
                let actual = if ih.statement_span().is_owned() {
                    SpanState::Owned
                } else if ih.statement_span().is_borrowed() {
                    SpanState::Borrowed
                } else {
                    SpanState::NoSpan
                };
                let case = format!("{:?}/{:?}/{}", mode, ambient_level, outstanding);
                assert_eq!(actual, expected, "{}", case);
                assert_eq!(outcome.need_finish, expected != SpanState::NoSpan, "{}", case);

                let opened = fixture.tracer.spans_started() - started;
                assert_eq!(opened, u64::from(expected == SpanState::Owned), "{}", case);

                let stmt_span = outcome.ctx.span().unwrap().clone();
                let mut res = BufferedResult::new();
                let mut txn = QueryLevelStats::default();
                ih.finish(
                    &fixture.env,
                    FinishArgs::new("SELECT * FROM t"),
                    &mut txn,
                    false,
                    &mut res,
                    None,
                )
                .unwrap();

                match expected {
                    SpanState::Owned => {
                        assert!(stmt_span.is_finished(), "{}", case);
                        assert!(!ambient.is_finished(), "{}", case);
                    }
                    SpanState::Borrowed => {
                        assert!(stmt_span.same_span(&ambient), "{}", case);
                        assert!(!ambient.is_finished(), "{}", case);
                    }
                    SpanState::NoSpan => {
                        assert!(stmt_span.same_span(&ambient), "{}", case);
                        assert!(!ih.is_finished(), "{}", case);
                    }
                }
            }
        }
    }
}

#[test]
fn test_scenario_a_no_instrumentation() {
    let fixture = InstrFixture::with_sample_rate(0.0);
    let ctx = fixture.ambient(RecordingLevel::Structured);
    let started = fixture.tracer.spans_started();

    let mut ih = InstrumentationHelper::new();
    let outcome = ih
        .setup(&fixture.env, &ctx, &fixture.stmt("SELECT 1"), false)
        .unwrap();

    assert!(!outcome.need_finish);
    assert_eq!(fixture.tracer.spans_started(), started);
    assert!(!ih.should_collect_exec_stats());
    assert!(!ih.should_save_flows());
    assert!(outcome.ctx.span().unwrap().same_span(ctx.span().unwrap()));
}

#[test]
fn test_first_plan_always_sampled_at_rate_one() {
    for _ in 0..20 {
        let fixture = InstrFixture::with_sample_rate(1.0);
        let ctx = fixture.ambient(RecordingLevel::Structured);
        let mut ih = InstrumentationHelper::new();
        let outcome = ih
            .setup(&fixture.env, &ctx, &fixture.stmt("SELECT 1"), false)
            .unwrap();
        assert!(outcome.need_finish);
        assert!(ih.should_collect_exec_stats());
        let span = outcome.ctx.span().unwrap();
        assert_eq!(span.recording_level(), RecordingLevel::Structured);
        assert!(!span.same_span(ctx.span().unwrap()));
    }
}

#[test]
fn test_saved_plan_is_not_resampled() {
    let fixture = InstrFixture::with_sample_rate(1.0);
    let (plan, _) = scan_plan("t");
    let mut ih = InstrumentationHelper::new();
    ih.record_explain_plan(plan);
    fixture.collector.save_logical_plan(
        "SELECT * FROM t",
        true,
        testutils::instr_fixture::DATABASE,
        ih.plan_for_stats().unwrap(),
    );

    let ctx = fixture.ambient(RecordingLevel::Structured);
    let mut ih = InstrumentationHelper::new();
    let outcome = ih
        .setup(&fixture.env, &ctx, &fixture.stmt("SELECT * FROM t"), false)
        .unwrap();
    assert!(!outcome.need_finish);
    assert!(!ih.should_build_explain_plan());
}

#[test]
fn test_txn_election_collects_stats() {
    let fixture = InstrFixture::with_sample_rate(0.0);
    let ctx = fixture.ambient(RecordingLevel::Structured);
    let mut ih = InstrumentationHelper::new();
    let outcome = ih
        .setup(&fixture.env, &ctx, &fixture.stmt("SELECT 1"), true)
        .unwrap();
    assert!(outcome.need_finish);
    assert!(ih.should_collect_exec_stats());
    assert!(ih.should_save_flows());
}

#[test]
fn test_scenario_b_bundle_for_outstanding_request() {
    let fixture = InstrFixture::new();
    let request = fixture.request("SELECT * FROM t", Duration::from_millis(10));
    let ctx = fixture.ambient(RecordingLevel::Structured);

    let mut ih = InstrumentationHelper::new();
    let outcome = ih
        .setup(&fixture.env, &ctx, &fixture.stmt("SELECT * FROM t"), false)
        .unwrap();
    assert!(outcome.need_finish);
    assert!(ih.should_build_explain_plan());
    assert!(!ih.should_discard_rows());

    let (plan, scan) = scan_plan("t");
    ih.record_explain_plan(plan);
    let component = ComponentId::processor(new_flow(), 0, 1);
    ih.associate_node_with_components(scan, vec![component]);
    record_processor(outcome.ctx.span().unwrap(), &component, 3, 96);

    let mut res = BufferedResult::new();
    let mut txn = QueryLevelStats::default();
    let args = FinishArgs::new("SELECT * FROM t WHERE a = $1")
        .with_placeholders(vec!["1".to_string()])
        .with_phase_times(PhaseTimes::new(
            Duration::from_millis(2),
            Duration::from_millis(40),
        ));
    ih.finish(&fixture.env, args, &mut txn, false, &mut res, None)
        .unwrap();

    let bundle_id = fixture.registry.completed_bundle(request).unwrap();
    assert!(!fixture.registry.is_outstanding(request));
    let stored = fixture.registry.bundle(bundle_id).unwrap();
    assert_eq!(stored.fingerprint, "SELECT * FROM t");
    assert!(stored.bundle.plan.contains("• scan"));
    assert!(stored.bundle.plan.contains("(a int)"));
    assert_eq!(stored.bundle.placeholders, vec!["1"]);

    // unmodified output: the statement's own rows only
    assert!(res.rows().is_empty());
    assert_eq!(res.stmt_type(), StatementType::Rows);
}

#[test]
fn test_fast_execution_leaves_request_outstanding() {
    let fixture = InstrFixture::new();
    let request = fixture.request("SELECT * FROM t", Duration::from_secs(5));
    let ctx = fixture.ambient(RecordingLevel::Structured);

    let mut ih = InstrumentationHelper::new();
    ih.setup(&fixture.env, &ctx, &fixture.stmt("SELECT * FROM t"), false)
        .unwrap();
    let mut res = BufferedResult::new();
    let mut txn = QueryLevelStats::default();
    let args = FinishArgs::new("SELECT * FROM t")
        .with_phase_times(PhaseTimes::new(Duration::ZERO, Duration::from_millis(1)));
    ih.finish(&fixture.env, args, &mut txn, false, &mut res, None)
        .unwrap();

    assert!(fixture.registry.is_outstanding(request));
    assert!(fixture.registry.bundles().is_empty());
    assert!(fixture.registry.completed_bundle(request).is_none());
}

#[test]
fn test_finish_is_idempotent() {
    let fixture = InstrFixture::with_sample_rate(1.0);
    let ctx = fixture.ambient(RecordingLevel::Structured);
    let mut ih = InstrumentationHelper::new();
    let outcome = ih
        .setup(&fixture.env, &ctx, &fixture.stmt("SELECT * FROM t"), true)
        .unwrap();
    record_processor(
        outcome.ctx.span().unwrap(),
        &ComponentId::processor(new_flow(), 0, 1),
        7,
        700,
    );

    let mut res = BufferedResult::new();
    let mut txn = QueryLevelStats::default();
    for _ in 0..3 {
        ih.finish(
            &fixture.env,
            FinishArgs::new("SELECT * FROM t"),
            &mut txn,
            true,
            &mut res,
            None,
        )
        .unwrap();
    }
    assert_eq!(txn.kv_rows_read, 7);
    assert_eq!(fixture.collector.recorded_count(), 1);
}

#[test]
fn test_explicit_txn_accumulates_only_when_collecting() {
    let fixture = InstrFixture::with_sample_rate(1.0);
    let ctx = fixture.ambient(RecordingLevel::Structured);
    let mut ih = InstrumentationHelper::new();
    let stmt = sqlinstr::StatementInfo::new("SELECT * FROM t", false, "defaultdb");
    let outcome = ih.setup(&fixture.env, &ctx, &stmt, false).unwrap();
    record_processor(
        outcome.ctx.span().unwrap(),
        &ComponentId::processor(new_flow(), 0, 1),
        7,
        700,
    );

    let mut res = BufferedResult::new();
    let mut txn = QueryLevelStats::default();
    ih.finish(
        &fixture.env,
        FinishArgs::new("SELECT * FROM t"),
        &mut txn,
        false,
        &mut res,
        None,
    )
    .unwrap();
    assert_eq!(txn, QueryLevelStats::default());
    assert_eq!(fixture.collector.recorded_count(), 1);
}

#[test]
fn test_panic_between_setup_and_finish_finishes_span() {
    let fixture = InstrFixture::new();
    let ctx = fixture.ambient(RecordingLevel::Structured);
    let mut captured = None;

    let result = catch_unwind(AssertUnwindSafe(|| {
        let mut ih = InstrumentationHelper::new();
        ih.set_output_mode(OutputMode::ExplainAnalyzePlan, ExplainFlags::default());
        let outcome = ih
            .setup(&fixture.env, &ctx, &fixture.stmt("SELECT 1"), false)
            .unwrap();
        captured = outcome.ctx.span().cloned();
        panic!("planning failed");
    }));

    assert!(result.is_err());
    let span = captured.unwrap();
    assert!(span.is_finished());
    assert!(!ctx.span().unwrap().is_finished());
}

#[test]
fn test_early_return_finishes_span() {
    fn plan_statement(
        fixture: &InstrFixture,
        captured: &mut Option<sqlinstr::Span>,
    ) -> Result<(), String> {
        let ctx = fixture.ambient(RecordingLevel::Structured);
        let mut ih = InstrumentationHelper::new();
        ih.set_output_mode(OutputMode::ExplainAnalyzeDebug, ExplainFlags::default());
        let outcome = ih
            .setup(&fixture.env, &ctx, &fixture.stmt("SELECT 1"), false)
            .map_err(|e| e.to_string())?;
        *captured = outcome.ctx.span().cloned();
        Err("could not resolve table".to_string())
    }

    let fixture = InstrFixture::new();
    let mut captured = None;
    assert!(plan_statement(&fixture, &mut captured).is_err());
    assert!(captured.unwrap().is_finished());
}

#[test]
fn test_statement_error_takes_precedence() {
    let fixture = InstrFixture::new();
    let ctx = fixture.ambient(RecordingLevel::Structured);
    let mut ih = InstrumentationHelper::new();
    ih.set_output_mode(OutputMode::ExplainAnalyzeDistSql, ExplainFlags::default());
    let outcome = ih
        .setup(&fixture.env, &ctx, &fixture.stmt("SELECT 1"), false)
        .unwrap();
    let (plan, _) = scan_plan("t");
    ih.record_explain_plan(plan);

    let mut res = BufferedResult::new();
    let mut txn = QueryLevelStats::default();
    let err = InstrumentationError::Statement("relation \"t\" does not exist".to_string());
    let got = ih.finish(
        &fixture.env,
        FinishArgs::new("SELECT 1"),
        &mut txn,
        false,
        &mut res,
        Some(err.clone()),
    );

    assert_eq!(got, Err(err));
    assert!(res.rows().is_empty());
    assert!(outcome.ctx.span().unwrap().is_finished());
    let key = sqlinstr::sqlstats::StatementStatsKey {
        query: "SELECT 1".to_string(),
        implicit_txn: true,
        database: "defaultdb".to_string(),
        failed: true,
        plan_hash: sqlinstr::PlanGist::from_plan(&scan_plan("t").0).hash(),
    };
    assert_eq!(fixture.collector.exec_stats(&key).unwrap().count, 1);
}

#[test]
fn test_row_emission_error_is_communication_error() {
    let fixture = InstrFixture::new();
    let ctx = fixture.ambient(RecordingLevel::Structured);
    let mut ih = InstrumentationHelper::new();
    ih.set_output_mode(OutputMode::ExplainAnalyzePlan, ExplainFlags::default());
    ih.setup(&fixture.env, &ctx, &fixture.stmt("SELECT 1"), false)
        .unwrap();
    let (plan, _) = scan_plan("t");
    ih.record_explain_plan(plan);

    let mut res = BufferedResult::with_row_limit(2);
    let mut txn = QueryLevelStats::default();
    let err = ih
        .finish(
            &fixture.env,
            FinishArgs::new("SELECT 1"),
            &mut txn,
            false,
            &mut res,
            None,
        )
        .unwrap_err();
    assert!(matches!(err, InstrumentationError::Communication(_)));
}

fn finish_with_malformed_trace(
    fixture: &InstrFixture,
    ret_err: Option<InstrumentationError>,
) -> (Result<(), InstrumentationError>, QueryLevelStats) {
    let ctx = fixture.ambient(RecordingLevel::Structured);
    let mut ih = InstrumentationHelper::new();
    let outcome = ih
        .setup(&fixture.env, &ctx, &fixture.stmt("SELECT 1"), true)
        .unwrap();
    let span = outcome.ctx.span().unwrap();
    span.record_structured(StructuredRecord::new(ComponentStats::TYPE_URL, &"not stats"));

    let mut res = BufferedResult::new();
    let mut txn = QueryLevelStats::default();
    let got = ih.finish(
        &fixture.env,
        FinishArgs::new("SELECT 1"),
        &mut txn,
        true,
        &mut res,
        ret_err,
    );
    assert!(span.is_finished());
    (got, txn)
}

#[test]
fn test_malformed_trace_strict_fails() {
    let fixture = InstrFixture::new();
    let (got, _) = finish_with_malformed_trace(&fixture, None);
    assert!(matches!(got, Err(InstrumentationError::TraceExtraction(_))));
    assert_eq!(fixture.collector.recorded_count(), 0);

    let stmt_err = InstrumentationError::Statement("boom".to_string());
    let (got, _) = finish_with_malformed_trace(&fixture, Some(stmt_err.clone()));
    assert_eq!(got, Err(stmt_err));
}

#[test]
fn test_malformed_trace_lenient_degrades() {
    let fixture = InstrFixture::lenient();
    let (got, txn) = finish_with_malformed_trace(&fixture, None);
    assert_eq!(got, Ok(()));
    assert_eq!(txn, QueryLevelStats::default());
    assert_eq!(fixture.collector.recorded_count(), 0);
}

#[test]
fn test_missing_ambient_span() {
    let strict = InstrFixture::new();
    let mut ih = InstrumentationHelper::new();
    let err = ih
        .setup(
            &strict.env,
            &sqlinstr::TraceContext::background(),
            &strict.stmt("SELECT 1"),
            true,
        )
        .unwrap_err();
    assert!(matches!(err, InstrumentationError::Assertion(_)));

    let lenient = InstrFixture::lenient();
    let mut ih = InstrumentationHelper::new();
    let outcome = ih
        .setup(
            &lenient.env,
            &sqlinstr::TraceContext::background(),
            &lenient.stmt("SELECT 1"),
            true,
        )
        .unwrap();
    assert!(outcome.need_finish);
    assert!(ih.statement_span().is_owned());
}

#[test]
fn test_malformed_trace_strict_releases_request() {
    let fixture = InstrFixture::new();
    let id = fixture.request("SELECT 1", Duration::ZERO);
    let (got, _) = finish_with_malformed_trace(&fixture, None);
    assert!(matches!(got, Err(InstrumentationError::TraceExtraction(_))));
    assert!(fixture.registry.bundles().is_empty());

    // the request can be claimed again by the next execution
    assert!(fixture.registry.is_outstanding(id));
    let claimed = fixture.registry.should_collect_diagnostics("SELECT 1").unwrap();
    assert_eq!(claimed.id, id);
}

#[test]
fn test_failed_setup_releases_request() {
    let fixture = InstrFixture::new();
    let id = fixture.request("SELECT 1", Duration::ZERO);
    let mut ih = InstrumentationHelper::new();
    let err = ih
        .setup(
            &fixture.env,
            &sqlinstr::TraceContext::background(),
            &fixture.stmt("SELECT 1"),
            false,
        )
        .unwrap_err();
    assert!(matches!(err, InstrumentationError::Assertion(_)));
    assert!(!ih.should_save_flows());

    let claimed = fixture.registry.should_collect_diagnostics("SELECT 1").unwrap();
    assert_eq!(claimed.id, id);
}

#[test]
fn test_borrowed_span_counts_only_its_statement() {
    let fixture = InstrFixture::new();
    let ctx = fixture.ambient(RecordingLevel::Verbose);
    let flow = new_flow();

    let mut per_statement = Vec::new();
    for i in 0..2 {
        let mut ih = InstrumentationHelper::new();
        let outcome = ih
            .setup(&fixture.env, &ctx, &fixture.stmt("SELECT * FROM t"), false)
            .unwrap();
        assert!(ih.statement_span().is_borrowed());
        let component = ComponentId::processor(flow, i, 1);
        record_processor(outcome.ctx.span().unwrap(), &component, 10, 100);

        let mut res = BufferedResult::new();
        let mut txn = QueryLevelStats::default();
        ih.finish(
            &fixture.env,
            FinishArgs::new("SELECT * FROM t"),
            &mut txn,
            true,
            &mut res,
            None,
        )
        .unwrap();
        per_statement.push(txn.kv_rows_read);
    }
    assert_eq!(per_statement, [10, 10]);
    assert!(!ctx.span().unwrap().is_finished());
}

#[test]
fn test_component_reported_twice_counted_once() {
    let fixture = InstrFixture::new();
    let ctx = fixture.ambient(RecordingLevel::Structured);
    let mut ih = InstrumentationHelper::new();
    let outcome = ih
        .setup(&fixture.env, &ctx, &fixture.stmt("SELECT * FROM t"), true)
        .unwrap();
    let span = outcome.ctx.span().unwrap();
    let component = ComponentId::processor(new_flow(), 0, 1);
    // a retried flow reports the same processor again
    record_processor(span, &component, 10, 100);
    record_processor(span, &component, 10, 100);

    let mut res = BufferedResult::new();
    let mut txn = QueryLevelStats::default();
    ih.finish(
        &fixture.env,
        FinishArgs::new("SELECT * FROM t"),
        &mut txn,
        true,
        &mut res,
        None,
    )
    .unwrap();
    assert_eq!(txn.kv_rows_read, 10);
}

#[test]
fn test_bundle_persistence_failure_does_not_fail_statement() {
    let fixture = InstrFixture::new().with_registry(Arc::new(FailingRegistry));
    let ctx = fixture.ambient(RecordingLevel::Structured);
    let mut ih = InstrumentationHelper::new();
    ih.set_output_mode(OutputMode::ExplainAnalyzeDebug, ExplainFlags::default());
    ih.setup(&fixture.env, &ctx, &fixture.stmt("SELECT 1"), false)
        .unwrap();

    let mut res = BufferedResult::new();
    let mut txn = QueryLevelStats::default();
    ih.finish(
        &fixture.env,
        FinishArgs::new("SELECT 1"),
        &mut txn,
        false,
        &mut res,
        None,
    )
    .unwrap();

    let rows = res.text_rows();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].starts_with("Error generating bundle:"));
    assert!(rows[0].contains("disk full"));
}

#[test]
fn test_statement_trace_hook_sees_every_statement() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let mut fixture = InstrFixture::new();
    fixture.env = fixture
        .env
        .clone()
        .with_statement_trace(move |trace, sql| {
            sink.lock().push((sql.to_string(), trace.len()));
        });

    let ctx = fixture.ambient(RecordingLevel::Structured);
    let mut ih = InstrumentationHelper::new();
    let outcome = ih
        .setup(&fixture.env, &ctx, &fixture.stmt("SELECT 1"), false)
        .unwrap();
    assert!(outcome.need_finish);
    assert!(outcome.ctx.span().unwrap().is_verbose());

    let mut res = BufferedResult::new();
    let mut txn = QueryLevelStats::default();
    ih.finish(
        &fixture.env,
        FinishArgs::new("SELECT 1"),
        &mut txn,
        false,
        &mut res,
        None,
    )
    .unwrap();
    assert_eq!(*seen.lock(), vec![("SELECT 1".to_string(), 1)]);
}
