//! Decides which deserialized declarations need code generated for them.
//!
//! Declarations restored from a session image or backed by a library
//! artifact go through [`should_ignore`] before they reach the code
//! generator. Namespaces are never emitted wholesale; each member is
//! classified on its own.

use tracing::trace;

use crate::codegen::{CodeGenerator, CodegenError, CodegenResult, IrModule};
use crate::sema::{Decl, DeclId, DeclKind, DeclOrigin, DeclTable};
use crate::transaction::{DeclGroup, DeclGroupKind, GroupHandler};

/// True if no code should be generated for `decl`.
pub fn should_ignore(decl: &Decl) -> bool {
    match (&decl.kind, decl.origin) {
        (DeclKind::Function(func), DeclOrigin::Image) => func.body.is_none(),
        (DeclKind::Function(func), DeclOrigin::Library) => {
            func.body.is_some() && !func.is_inline && !func.is_instantiation()
        }
        (DeclKind::Var(var), DeclOrigin::Library) if decl.has_global_storage() => {
            !var.is_const && !var.is_instantiation
        }
        // Image globals have no storage anywhere else, so they are always emitted.
        _ => false,
    }
}

/// Lower one deserialized group into `module`, skipping what the filter
/// rejects.
pub fn emit_deserialized(
    codegen: &mut dyn CodeGenerator,
    module: &mut IrModule,
    group: &DeclGroup,
    decls: &DeclTable,
) -> CodegenResult<()> {
    let mut emitter = DeserializedEmitter {
        codegen,
        module,
        decls,
    };
    for decl in &group.decls {
        group.kind.dispatch(&mut emitter, *decl)?;
    }
    Ok(())
}

struct DeserializedEmitter<'a> {
    codegen: &'a mut dyn CodeGenerator,
    module: &'a mut IrModule,
    decls: &'a DeclTable,
}

impl<'a> DeserializedEmitter<'a> {
    fn decl(&self, id: DeclId) -> CodegenResult<&'a Decl> {
        self.decls.get(id).ok_or(CodegenError::UnknownDecl(id))
    }

    /// Forward to the code generator unless the filter rejects `id`.
    fn emit(&mut self, kind: DeclGroupKind, id: DeclId) -> CodegenResult<()> {
        let decl = self.decl(id)?;
        if should_ignore(decl) {
            trace!(%kind, decl = %id, name = %decl.qualified, "skipping deserialized declaration");
            return Ok(());
        }
        self.codegen.handle_decl(self.module, kind, id, self.decls)
    }

    /// A namespace member gets every group its kind would have produced
    /// at the top level.
    fn emit_member(&mut self, id: DeclId) -> CodegenResult<()> {
        let decl = self.decl(id)?;
        match &decl.kind {
            DeclKind::Namespace(ns) => {
                for member in ns.members.clone() {
                    self.emit_member(member)?;
                }
                Ok(())
            }
            DeclKind::Struct(s) => {
                let is_virtual = s.is_virtual;
                self.emit(DeclGroupKind::TagDefinition, id)?;
                if is_virtual {
                    self.emit(DeclGroupKind::VTable, id)?;
                }
                Ok(())
            }
            DeclKind::Var(var) if var.init.is_none() && !var.is_extern => {
                self.emit(DeclGroupKind::TentativeDefinition, id)
            }
            _ => self.emit(DeclGroupKind::TopLevel, id),
        }
    }
}

impl GroupHandler for DeserializedEmitter<'_> {
    type Error = CodegenError;

    fn top_level(&mut self, decl: DeclId) -> CodegenResult<()> {
        if let DeclKind::Namespace(ns) = &self.decl(decl)?.kind {
            for member in ns.members.clone() {
                self.emit_member(member)?;
            }
            return Ok(());
        }
        self.emit(DeclGroupKind::TopLevel, decl)
    }

    fn tag_definition(&mut self, decl: DeclId) -> CodegenResult<()> {
        self.emit(DeclGroupKind::TagDefinition, decl)
    }

    fn vtable(&mut self, decl: DeclId) -> CodegenResult<()> {
        self.emit(DeclGroupKind::VTable, decl)
    }

    fn implicit_instantiation(&mut self, decl: DeclId) -> CodegenResult<()> {
        self.emit(DeclGroupKind::ImplicitInstantiation, decl)
    }

    fn tentative_definition(&mut self, decl: DeclId) -> CodegenResult<()> {
        self.emit(DeclGroupKind::TentativeDefinition, decl)
    }
}
