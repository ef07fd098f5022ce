//! A small jq-compatible query language.
//!
//! Queries are compiled lazily on first use and the compiled program is shared by
//! every copy of the [`Query`]. A compile failure is reported once; later attempts
//! to use the same query yield the repeated-error sentinel.

mod ast;
mod builtins;
mod interp;
mod parser;
pub mod template;

use std::sync::{Arc, OnceLock};

use thiserror::Error;
use tracing::debug;

use crate::diagnostics::{DiagResult, Diagnostic, Diagnostics, SourceRange};
use crate::value::Value;

pub use ast::{BinOp, Expr, ObjectKey};
pub use builtins::is_defined;
pub use interp::Env;
pub use parser::parse;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("syntax error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },
    #[error("{0}")]
    Runtime(String),
}

#[derive(Debug)]
pub struct Query {
    source: String,
    range: Option<SourceRange>,
    program: OnceLock<Result<Arc<Expr>, ()>>,
}

impl Query {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            range: None,
            program: OnceLock::new(),
        }
    }

    pub fn with_range(mut self, range: SourceRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn range(&self) -> Option<&SourceRange> {
        self.range.as_ref()
    }

    fn located(&self, diag: Diagnostic) -> Diagnostic {
        match &self.range {
            Some(range) => diag.with_range(range.clone()),
            None => diag,
        }
    }

    /// Compiles the query, or returns the cached program.
    pub fn compile(&self) -> DiagResult<Arc<Expr>> {
        let mut fresh_error = None;
        let program = self.program.get_or_init(|| {
            match parse(&self.source).and_then(|expr| {
                builtins::check_calls(&expr)?;
                Ok(expr)
            }) {
                Ok(expr) => Ok(Arc::new(expr)),
                Err(err) => {
                    fresh_error = Some(err);
                    Err(())
                }
            }
        });
        match (program, fresh_error) {
            (Ok(expr), _) => Ok(expr.clone()),
            (Err(()), Some(err)) => Err(self
                .located(
                    Diagnostic::error("Failed to compile query")
                        .with_detail(format!("{}: {}", self.source, err)),
                )
                .into()),
            (Err(()), None) => Err(Diagnostic::repeated().into()),
        }
    }

    /// Runs the query and returns its first output, or null when it produces none.
    pub fn run(&self, data: &Value) -> DiagResult<Value> {
        Ok(self.run_all(data)?.into_iter().next().unwrap_or_default())
    }

    pub fn run_all(&self, data: &Value) -> DiagResult<Vec<Value>> {
        let program = self.compile()?;
        debug!(query = %self.source, "running query");
        interp::eval(&program, data, &Env::default()).map_err(|err| {
            Diagnostics::from(self.located(
                Diagnostic::error("Failed to evaluate query")
                    .with_detail(format!("{}: {}", self.source, err)),
            ))
        })
    }
}

impl Clone for Query {
    fn clone(&self) -> Self {
        let program = OnceLock::new();
        if let Some(compiled) = self.program.get() {
            let _ = program.set(compiled.clone());
        }
        Self {
            source: self.source.clone(),
            range: self.range.clone(),
            program,
        }
    }
}

/// Parses and validates `source` without running it.
pub fn compile_str(source: &str) -> Result<Expr, QueryError> {
    let expr = parse(source)?;
    builtins::check_calls(&expr)?;
    Ok(expr)
}

/// Evaluates `source` against `input` and returns every output.
pub fn eval_str(source: &str, input: &Value) -> Result<Vec<Value>, QueryError> {
    interp::eval(&compile_str(source)?, input, &Env::default())
}
