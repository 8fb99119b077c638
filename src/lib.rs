//! inkling - an incremental compilation engine for interactive sessions
//!
//! Source fragments are compiled one at a time. Each fragment becomes a
//! transaction that is analyzed, transformed, lowered and loaded as a
//! unit, and that can later be unloaded to restore the session as it was
//! before.
//!
//! # Example
//!
//! ```no_run
//! use inkling::jit::Value;
//! use inkling::session::Interpreter;
//!
//! let mut interp = Interpreter::new();
//! interp.process("int square(int v) { return v * v; }").unwrap();
//! assert_eq!(interp.process("square(7);").unwrap(), Some(Value::Int(49)));
//! interp.unload(2).unwrap();
//! ```

#![allow(dead_code)] // Many methods are for public API extensibility

pub mod ast;
pub mod codegen;
pub mod incremental;
pub mod jit;
pub mod sema;
pub mod session;
pub mod transaction;
pub mod transform;
