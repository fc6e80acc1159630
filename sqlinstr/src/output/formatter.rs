// Copyright (c) 2024-2025 sqlinstr Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Writing EXPLAIN ANALYZE output rows

use super::flow::FlowInfo;
use super::result::{CommandResult, StatementType, EXPLAIN_PLAN_COLUMNS};
use crate::diagnostics::Bundle;
use crate::error::InstrumentationError;
use crate::trace::Recording;

fn add_rows(
    res: &mut dyn CommandResult,
    rows: impl IntoIterator<Item = String>,
) -> Result<(), InstrumentationError> {
    for row in rows {
        res.add_row(vec![row])
            .map_err(InstrumentationError::Communication)?;
    }
    Ok(())
}

/// One row per flow diagram, after a blank separator row. A diagram whose
/// URL cannot be generated contributes its error text instead.
pub fn diagram_rows(flows: &mut [FlowInfo], trace: &Recording) -> Vec<String> {
    let mut rows = vec![String::new()];
    let count = flows.len();
    for (i, flow) in flows.iter_mut().enumerate() {
        let mut row = if count > 1 {
            format!("Diagram {} ({}): ", i + 1, flow.typ)
        } else {
            "Diagram: ".to_string()
        };
        flow.diagram.add_spans(trace);
        match flow.diagram.to_url() {
            Ok(url) => row.push_str(&url),
            Err(e) => row.push_str(&e),
        }
        rows.push(row);
    }
    rows
}

/// Result of EXPLAIN ANALYZE (PLAN) and (DISTSQL): `rows` are the rendered
/// plan (and diagram links).
///
/// Returns an error only if the result stream rejected a row.
pub fn set_explain_analyze_result(
    res: &mut dyn CommandResult,
    rows: Vec<String>,
) -> Result<(), InstrumentationError> {
    res.reset_stmt_type(StatementType::ExplainAnalyze);
    res.set_columns(EXPLAIN_PLAN_COLUMNS);
    if res.err().is_some() {
        // can't add rows once the result carries an error
        return Ok(());
    }
    add_rows(res, rows)
}

/// Result of EXPLAIN ANALYZE (DEBUG): a row pointing at the captured bundle
/// (or explaining why there is none), then any planning warnings
pub fn set_explain_bundle_result(
    res: &mut dyn CommandResult,
    bundle: Option<&Bundle>,
    admin_url: &str,
    warnings: &[String],
) -> Result<(), InstrumentationError> {
    res.reset_stmt_type(StatementType::ExplainAnalyze);
    res.set_columns(EXPLAIN_PLAN_COLUMNS);
    if res.err().is_some() {
        return Ok(());
    }

    let text = match bundle {
        Some(Bundle {
            diag_id: Some(id), ..
        }) => format!(
            "Statement diagnostics bundle generated. Download it with \\statement-diag download {} or from {}/_admin/v1/stmtbundle/{}",
            id,
            admin_url.trim_end_matches('/'),
            id
        ),
        Some(Bundle {
            collection_error: Some(e),
            ..
        }) => format!("Error generating bundle: {}", e),
        _ => "Statement diagnostics bundle not collected".to_string(),
    };

    let rows = std::iter::once(text).chain(warnings.iter().map(|w| format!("WARNING: {}", w)));
    add_rows(res, rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::build_statement_bundle;
    use crate::execstats::FlowsMetadata;
    use crate::output::flow::{FlowDiagram, PlanComponentType};
    use crate::output::BufferedResult;
    use uuid::Uuid;

    struct FixedDiagram(Result<String, String>);

    impl FlowDiagram for FixedDiagram {
        fn add_spans(&mut self, _trace: &Recording) {}

        fn to_url(&self) -> Result<String, String> {
            self.0.clone()
        }
    }

    fn flow(url: Result<&str, &str>, typ: PlanComponentType) -> FlowInfo {
        FlowInfo {
            typ,
            diagram: Box::new(FixedDiagram(
                url.map(str::to_string).map_err(str::to_string),
            )),
            flows_metadata: FlowsMetadata::new(Uuid::new_v4(), [1]),
        }
    }

    #[test]
    fn test_single_diagram_row() {
        let mut flows = vec![flow(Ok("https://d/1"), PlanComponentType::MainQuery)];
        assert_eq!(
            diagram_rows(&mut flows, &Recording::default()),
            vec!["", "Diagram: https://d/1"]
        );
    }

    #[test]
    fn test_failed_diagram_shows_error_text() {
        let mut flows = vec![
            flow(Ok("https://d/1"), PlanComponentType::Subquery),
            flow(Err("diagram too large"), PlanComponentType::MainQuery),
        ];
        assert_eq!(
            diagram_rows(&mut flows, &Recording::default()),
            vec![
                "",
                "Diagram 1 (subquery): https://d/1",
                "Diagram 2 (main-query): diagram too large",
            ]
        );
    }

    #[test]
    fn test_rows_rejected_is_communication_error() {
        let mut res = BufferedResult::with_row_limit(1);
        let err = set_explain_analyze_result(&mut res, vec!["a".into(), "b".into()]).unwrap_err();
        assert!(matches!(err, InstrumentationError::Communication(_)));
    }

    #[test]
    fn test_result_with_error_gets_no_rows() {
        let mut res = BufferedResult::new();
        res.set_err("boom");
        set_explain_analyze_result(&mut res, vec!["a".into()]).unwrap();
        assert!(res.rows().is_empty());
        assert_eq!(res.columns(), ["info"]);
    }

    #[test]
    fn test_bundle_result_rows() {
        let mut bundle = build_statement_bundle("SELECT 1", "", &Recording::default(), &[]);
        bundle.diag_id = Some(12);
        let mut res = BufferedResult::new();
        set_explain_bundle_result(
            &mut res,
            Some(&bundle),
            "http://admin:8080/",
            &["stale stats".to_string()],
        )
        .unwrap();
        let rows = res.text_rows();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].contains("\\statement-diag download 12"));
        assert!(rows[0].contains("http://admin:8080/_admin/v1/stmtbundle/12"));
        assert_eq!(rows[1], "WARNING: stale stats");
        assert_eq!(res.stmt_type(), StatementType::ExplainAnalyze);
    }

    #[test]
    fn test_bundle_collection_error_row() {
        let mut bundle = build_statement_bundle("SELECT 1", "", &Recording::default(), &[]);
        bundle.collection_error = Some("disk full".to_string());
        let mut res = BufferedResult::new();
        set_explain_bundle_result(&mut res, Some(&bundle), "http://admin", &[]).unwrap();
        assert_eq!(res.text_rows(), vec!["Error generating bundle: disk full"]);
    }
}
