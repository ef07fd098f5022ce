//! Diagnostics: the user-facing error channel of the engine.
//!
//! Template and plugin problems are accumulated rather than thrown. Every operation
//! that can fail on behalf of the user returns `Result<T, Diagnostics>`, where the
//! error side holds at least one [`Severity::Error`] entry. Diagnostics carry enough
//! structure (severity, summary, detail, source range, optional traceback) to be
//! rendered against the original template source.
//!
//! Two special payloads live in [`DiagnosticExtra`]:
//!
//! - **Circular references** keep an open traceback that grows while the recursion
//!   that detected the cycle unwinds (see [`crate::circular::RefTracker`]).
//! - **Repeated errors** are sentinels returned when a memoized computation that has
//!   already failed is read again. They count as errors for control flow but are never
//!   shown to the user, so the original failure is reported exactly once.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::template::BlockId;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, strum::Display,
)]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A position inside a template file. Lines and columns are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Pos {
    pub line: usize,
    pub column: usize,
    pub byte: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SourceRange {
    pub filename: String,
    pub start: Pos,
    pub end: Pos,
}

impl SourceRange {
    pub fn new(filename: impl Into<String>, start: Pos, end: Pos) -> Self {
        Self {
            filename: filename.into(),
            start,
            end,
        }
    }

    /// A zero-width range at `line:column`.
    pub fn at(filename: impl Into<String>, line: usize, column: usize) -> Self {
        let pos = Pos {
            line,
            column,
            byte: 0,
        };
        Self::new(filename, pos, pos)
    }
}

impl fmt::Display for SourceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.filename, self.start.line, self.start.column
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DiagnosticExtra {
    /// Traceback of a detected reference cycle. `origin` is the block whose second
    /// visit closed the loop; once the unwinding reaches it the traceback is closed.
    CircularRef {
        origin: BlockId,
        traceback: Vec<SourceRange>,
        closed: bool,
    },
    /// Sentinel for a memoized failure that has already been reported.
    RepeatedError,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub summary: String,
    pub detail: Option<String>,
    pub range: Option<SourceRange>,
    pub extra: Option<DiagnosticExtra>,
}

impl Diagnostic {
    pub fn error(summary: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            summary: summary.into(),
            detail: None,
            range: None,
            extra: None,
        }
    }

    pub fn warning(summary: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(summary)
        }
    }

    /// The sentinel returned when a failed memoized value is read again.
    pub fn repeated() -> Self {
        Self {
            extra: Some(DiagnosticExtra::RepeatedError),
            ..Self::error("Repeated error")
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_range(mut self, range: SourceRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn with_extra(mut self, extra: DiagnosticExtra) -> Self {
        self.extra = Some(extra);
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    pub fn is_repeated(&self) -> bool {
        matches!(self.extra, Some(DiagnosticExtra::RepeatedError))
    }

    /// The recorded traceback, if this diagnostic describes a circular reference.
    pub fn traceback(&self) -> Option<&[SourceRange]> {
        match &self.extra {
            Some(DiagnosticExtra::CircularRef { traceback, .. }) => Some(traceback),
            _ => None,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.summary)?;
        if let Some(detail) = &self.detail {
            write!(f, ": {}", detail)?;
        }
        if let Some(range) = &self.range {
            write!(f, " ({})", range)?;
        }
        if let Some(traceback) = self.traceback() {
            for range in traceback {
                write!(f, "\n  referenced from {}", range)?;
            }
        }
        Ok(())
    }
}

/// An ordered collection of [`Diagnostic`]s.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diagnostics(Vec<Diagnostic>);

pub type DiagResult<T> = Result<T, Diagnostics>;

impl Diagnostics {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Shorthand for a single-error collection.
    pub fn error(summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Diagnostic::error(summary).with_detail(detail).into()
    }

    pub fn push(&mut self, diag: Diagnostic) {
        self.0.push(diag);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.0.iter()
    }

    pub fn has_errors(&self) -> bool {
        self.0.iter().any(Diagnostic::is_error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter().filter(|d| d.is_error())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter().filter(|d| !d.is_error())
    }

    /// Attaches `range` to every diagnostic that has no location yet.
    pub fn refine_range(mut self, range: &SourceRange) -> Self {
        for diag in self.0.iter_mut().filter(|d| d.range.is_none()) {
            diag.range = Some(range.clone());
        }
        self
    }

    /// Drops repeated-error sentinels, keeping only diagnostics meant for the user.
    pub fn without_repeated(self) -> Self {
        Self(self.0.into_iter().filter(|d| !d.is_repeated()).collect())
    }

    /// The first circular-reference diagnostic whose traceback is still open.
    pub fn open_circular_ref_mut(&mut self) -> Option<&mut Diagnostic> {
        self.0.iter_mut().find(|d| {
            matches!(
                d.extra,
                Some(DiagnosticExtra::CircularRef { closed: false, .. })
            )
        })
    }

    /// `Ok(value)` unless an error has been collected.
    pub fn into_result<T>(self, value: T) -> DiagResult<T> {
        if self.has_errors() {
            Err(self)
        } else {
            Ok(value)
        }
    }

    pub fn into_inner(self) -> Vec<Diagnostic> {
        self.0
    }
}

impl From<Diagnostic> for Diagnostics {
    fn from(diag: Diagnostic) -> Self {
        Self(vec![diag])
    }
}

impl FromIterator<Diagnostic> for Diagnostics {
    fn from_iter<I: IntoIterator<Item = Diagnostic>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let visible: Vec<_> = self.0.iter().filter(|d| !d.is_repeated()).collect();
        for (i, diag) in visible.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", diag)?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostics {}
