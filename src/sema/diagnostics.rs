//! Diagnostics reported while analyzing fragments.

use std::fmt;

use serde::Serialize;

use crate::ast::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Note,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Note => "note",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub span: Option<Span>,
}

impl Diagnostic {
    pub fn new(severity: Severity, message: impl Into<String>, span: Option<Span>) -> Self {
        Self {
            severity,
            message: message.into(),
            span,
        }
    }

    pub fn error(message: impl Into<String>, span: Option<Span>) -> Self {
        Self::new(Severity::Error, message, span)
    }

    pub fn warning(message: impl Into<String>, span: Option<Span>) -> Self {
        Self::new(Severity::Warning, message, span)
    }

    pub fn note(message: impl Into<String>) -> Self {
        Self::new(Severity::Note, message, None)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.message)?;
        if let Some(span) = self.span {
            write!(f, " (at {})", span)?;
        }
        Ok(())
    }
}

/// Collected diagnostics, drained by the caller after each fragment.
#[derive(Debug, Default)]
pub struct DiagnosticSink {
    pending: Vec<Diagnostic>,
}

impl DiagnosticSink {
    pub fn report(&mut self, diag: Diagnostic) {
        self.pending.push(diag);
    }

    /// Worst severity reported since `mark`.
    pub fn worst_since(&self, mark: usize) -> Option<Severity> {
        self.pending.iter().skip(mark).map(|d| d.severity).max()
    }

    /// Position to pass to [`DiagnosticSink::worst_since`].
    pub fn mark(&self) -> usize {
        self.pending.len()
    }

    pub fn take(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.pending)
    }

    pub fn pending(&self) -> &[Diagnostic] {
        &self.pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worst_since_mark() {
        let mut sink = DiagnosticSink::default();
        sink.report(Diagnostic::error("old", None));
        let mark = sink.mark();
        assert_eq!(sink.worst_since(mark), None);
        sink.report(Diagnostic::note("n"));
        sink.report(Diagnostic::warning("w", Some(Span::new(1, 1))));
        assert_eq!(sink.worst_since(mark), Some(Severity::Warning));
        assert_eq!(sink.take().len(), 3);
        assert!(sink.pending().is_empty());
    }
}
