//! Fragment parsing errors.

use thiserror::Error;

use super::token::Span;

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Fragment parsing errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("{span}: unexpected character '{found}'")]
    UnexpectedChar { found: char, span: Span },

    #[error("{span}: integer literal out of range: {text}")]
    InvalidNumber { text: String, span: Span },

    #[error("{span}: unterminated block comment")]
    UnterminatedComment { span: Span },

    #[error("{span}: expected {expected}, found {found}")]
    UnexpectedToken {
        expected: String,
        found: String,
        span: Span,
    },

    #[error("unexpected end of input, expected {expected}")]
    UnexpectedEof { expected: String },

    #[error("{span}: {message}")]
    Syntax { message: String, span: Span },
}

impl ParseError {
    /// Source position of the error, if it has one.
    pub fn span(&self) -> Option<Span> {
        match self {
            ParseError::UnexpectedChar { span, .. }
            | ParseError::InvalidNumber { span, .. }
            | ParseError::UnterminatedComment { span }
            | ParseError::UnexpectedToken { span, .. }
            | ParseError::Syntax { span, .. } => Some(*span),
            ParseError::UnexpectedEof { .. } => None,
        }
    }

    /// True if more input could turn this into a valid fragment.
    ///
    /// The REPL uses this to decide whether to keep reading lines.
    pub fn is_incomplete(&self) -> bool {
        matches!(
            self,
            ParseError::UnexpectedEof { .. } | ParseError::UnterminatedComment { .. }
        )
    }
}
