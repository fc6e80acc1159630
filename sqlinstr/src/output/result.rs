// Copyright (c) 2024-2025 sqlinstr Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Result stream interface

/// Columns of EXPLAIN output: a single text cell per row
pub const EXPLAIN_PLAN_COLUMNS: &[&str] = &["info"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementType {
    /// The statement's own result rows
    Rows,
    /// Rows produced by EXPLAIN ANALYZE
    ExplainAnalyze,
}

/// Where a statement writes its result rows
pub trait CommandResult {
    fn reset_stmt_type(&mut self, stmt_type: StatementType);

    fn set_columns(&mut self, columns: &[&str]);

    /// An error already set on the result, if any
    fn err(&self) -> Option<&str>;

    /// Append a row. An error means the stream is unusable.
    fn add_row(&mut self, row: Vec<String>) -> Result<(), String>;
}

/// A result that keeps rows in memory
#[derive(Debug, Clone)]
pub struct BufferedResult {
    stmt_type: StatementType,
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
    err: Option<String>,
    row_limit: Option<usize>,
}

impl Default for BufferedResult {
    fn default() -> Self {
        Self {
            stmt_type: StatementType::Rows,
            columns: Vec::new(),
            rows: Vec::new(),
            err: None,
            row_limit: None,
        }
    }
}

impl BufferedResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject rows beyond `limit`, as a client with a closed connection would
    pub fn with_row_limit(limit: usize) -> Self {
        Self {
            row_limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn set_err(&mut self, err: impl Into<String>) {
        self.err = Some(err.into());
    }

    pub fn stmt_type(&self) -> StatementType {
        self.stmt_type
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// First cell of every row
    pub fn text_rows(&self) -> Vec<String> {
        self.rows
            .iter()
            .filter_map(|r| r.first().cloned())
            .collect()
    }
}

impl CommandResult for BufferedResult {
    fn reset_stmt_type(&mut self, stmt_type: StatementType) {
        self.stmt_type = stmt_type;
        self.rows.clear();
    }

    fn set_columns(&mut self, columns: &[&str]) {
        self.columns = columns.iter().map(|c| c.to_string()).collect();
    }

    fn err(&self) -> Option<&str> {
        self.err.as_deref()
    }

    fn add_row(&mut self, row: Vec<String>) -> Result<(), String> {
        if let Some(limit) = self.row_limit {
            if self.rows.len() >= limit {
                return Err(format!("result stream closed after {} rows", limit));
            }
        }
        self.rows.push(row);
        Ok(())
    }
}
