//! Semantic analysis.
//!
//! The [`Analyzer`] trait is what the incremental parser consumes: it turns
//! source text into declaration groups, owns every declaration behind an
//! opaque [`DeclId`], and keeps the registry of names visible to the next
//! fragment. [`Sema`] implements it for the fragment language.
//!
//! # Architecture
//!
//! ```text
//!   source ──► ast::Parser ──► Sema ──► DeclGroups ──► DeclConsumer
//!                               │
//!                 ┌─────────────┼──────────────┐
//!                 ▼             ▼              ▼
//!            DeclTable      Registry     pending instantiations
//! ```

mod analyzer;
mod decl;
mod diagnostics;
mod error;
mod image;
mod scope;
mod sema;
mod tree;

pub use analyzer::{Analyzer, CollectingConsumer, DeclConsumer, ParseOutcome, RuntimeSupport, CAPTURE_FN};
pub use decl::{
    Decl, DeclContext, DeclId, DeclKind, DeclOrigin, DeclTable, FunctionDecl, NamespaceDecl, StructDecl,
    TemplateDecl, VarDecl,
};
pub use diagnostics::{Diagnostic, DiagnosticSink, Severity};
pub use error::{SemaError, SemaResult};
pub use image::{ImageEntry, ImageOrigin, SessionImage};
pub use scope::{LocalScopes, Registry};
pub use sema::Sema;
pub use tree::{Builtin, TExpr, TExprKind, TStmt, Type};
