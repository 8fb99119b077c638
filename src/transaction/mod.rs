//! Transactions: the unit of incremental compilation state.
//!
//! Each fragment (and each compilation the engine triggers on its own,
//! such as a deferred instantiation) is recorded in a [`Transaction`].
//! Records are pooled; callers hold generational [`TransactionId`]s.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     TransactionPool                         │
//! │     (owns records, recycles them, detects stale handles)    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │ Transaction │       │  DeclGroup  │       │ Compilation │
//!  │   (state)   │       │   (kinds)   │       │   Options   │
//!  └─────────────┘       └─────────────┘       └─────────────┘
//! ```

mod context;
mod error;
mod group;
mod options;
mod pool;
mod state;

pub use context::{Transaction, TransactionId, TransactionMetadata, TransactionSummary};
pub use error::{TransactionError, TransactionResult};
pub use group::{DeclGroup, DeclGroupKind, GroupHandler};
pub use options::{CompilationOptions, ValuePrinting};
pub use pool::{TransactionPool, DEFAULT_POOL_CAPACITY};
pub use state::{IssuedDiags, TransactionState};
