//! Lexing, parsing and syntax tree types for fragments.
//!
//! Fragments are written in a small C-like language: typed globals,
//! functions, templates, structs and namespaces, plus bare statements that
//! the analyzer wraps into a synthesized callable.

mod ast;
mod error;
mod lexer;
mod parser;
mod token;

pub use ast::*;
pub use error::{ParseError, ParseResult};
pub use lexer::Lexer;
pub use parser::Parser;
pub use token::{Span, Spanned, Token};
