//! The user-facing session: an interpreter over the incremental engine
//! and an interactive command-line interface.

mod error;
mod interpreter;
pub mod logging;
mod repl;

pub use error::{InterpreterError, InterpreterResult};
pub use interpreter::{Interpreter, InterpreterConfig};
pub use repl::{Repl, ReplConfig};
