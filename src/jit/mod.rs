//! Execution of generated code.
//!
//! [`Executor`] is the seam the incremental parser drives: modules are
//! added on behalf of the transaction that produced them and removed
//! again when that transaction is unloaded. [`Jit`] implements it with a
//! tree-walking interpreter over the IR.
//!
//! # Architecture
//!
//! ```text
//!   IrModule ──► add_module ──► symbol table ◄── library artifact
//!                                   │
//!                 ┌─────────────────┼──────────────────┐
//!                 ▼                 ▼                  ▼
//!          static inits       run_function        atexit list
//!          (run once)      (capture, print)     (per transaction)
//! ```

mod error;
mod jit;
mod value;

pub use error::{ExecError, ExecResult};
pub use jit::{Executor, Jit, SymbolKind, DEFAULT_CALL_DEPTH};
pub use value::Value;
