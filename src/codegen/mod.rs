//! Code generation: declaration groups in, IR modules out.
//!
//! One module is built per committed transaction. The generator remembers
//! which module defined each symbol so that a second definition is caught
//! here, and so that unloading a transaction can hand its symbols back.
//!
//! # Architecture
//!
//! ```text
//!   DeclGroup ──► CodeGenerator::handle_group ──► IrModule ──► Executor
//!                        │
//!                        ▼
//!              symbol ─► ModuleId map
//! ```

mod error;
mod ir;
mod irgen;

pub use error::{CodegenError, CodegenResult};
pub use ir::{IrConst, IrExpr, IrFunction, IrGlobal, IrInitializer, IrModule, IrStmt, ModuleId, TypeInfo};
pub use irgen::{CodeGenerator, IrGen};
