//! The incremental compilation engine.
//!
//! [`IncrementalParser`] accepts one fragment at a time, records it in a
//! transaction and commits or rolls it back as a unit. Committed
//! transactions can later be unloaded, newest first.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     IncrementalParser                       │
//! │        (open stack, commit sequence, deferred rounds)       │
//! └─────────────────────────────────────────────────────────────┘
//!        │               │                │               │
//!        ▼               ▼                ▼               ▼
//!  ┌──────────┐    ┌──────────┐    ┌────────────┐   ┌──────────┐
//!  │ Analyzer │    │ Pipeline │    │ Codegen +  │   │ Unloader │
//!  │          │    │          │    │  filter    │   │          │
//!  └──────────┘    └──────────┘    └────────────┘   └──────────┘
//!                                        │
//!                                        ▼
//!                                   ┌──────────┐
//!                                   │ Executor │
//!                                   └──────────┘
//! ```

mod callbacks;
mod config;
mod error;
mod filter;
mod parser;
mod unloader;

pub use callbacks::{ObservedEvent, TransactionLog, TransactionObserver};
pub use config::{ParserConfig, DEFAULT_MAX_DEFERRED_ROUNDS};
pub use error::{CompileError, CompileResult, FailureStage};
pub use filter::{emit_deserialized, should_ignore};
pub use parser::{CommitOutcome, IncrementalParser};
pub use unloader::TransactionUnloader;
