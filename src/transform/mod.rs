//! AST transformers run on every completed transaction.
//!
//! Passes run in registration order; the first failure stops the
//! pipeline and marks the transaction with errors.
//!
//! # Architecture
//!
//! ```text
//!   Transaction ──► DynamicLookup ──► DeclExtractor ──► ValueExtraction ──► CheckEmptyTransaction
//!                                                            │
//!                                                            ▼
//!                                              runtime support (side groups)
//! ```

mod dynamic;
mod empty;
mod error;
mod extract;
mod pipeline;
mod value;

pub use dynamic::DynamicLookup;
pub use empty::CheckEmptyTransaction;
pub use error::{TransformError, TransformResult};
pub use extract::DeclExtractor;
pub use pipeline::{find_wrapper, PassKind, Pipeline, TransformContext, Transformer};
pub use value::{captured_expr, ValueExtraction};
