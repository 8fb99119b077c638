//! Lowering of declaration groups to IR modules.

use std::collections::{HashMap, HashSet};

use tracing::{debug, trace};

use super::error::{CodegenError, CodegenResult};
use super::ir::*;
use crate::sema::{
    Builtin, Decl, DeclContext, DeclId, DeclKind, DeclTable, FunctionDecl, TExpr, TExprKind, TStmt, Type,
};
use crate::transaction::{DeclGroup, DeclGroupKind, GroupHandler};

/// Code generator interface consumed by the incremental parser.
pub trait CodeGenerator {
    /// Open an empty module for one transaction.
    fn start_module(&mut self, name: &str) -> IrModule;

    /// Lower every declaration of `group` according to its kind.
    fn handle_group(&mut self, module: &mut IrModule, group: &DeclGroup, decls: &DeclTable) -> CodegenResult<()>;

    /// Lower a single declaration as if it were in a group of `kind`.
    fn handle_decl(
        &mut self,
        module: &mut IrModule,
        kind: DeclGroupKind,
        decl: DeclId,
        decls: &DeclTable,
    ) -> CodegenResult<()>;

    /// Seal a module and record the symbols it defines.
    fn finish_module(&mut self, module: IrModule) -> CodegenResult<IrModule>;

    /// Drop everything recorded for a module. Returns false if unknown.
    fn forget_module(&mut self, id: ModuleId) -> bool;
}

/// Reference code generator.
#[derive(Debug, Default)]
pub struct IrGen {
    next_module: u32,
    /// Defining module of every symbol emitted by a finished module.
    symbols: HashMap<String, ModuleId>,
    finished: HashSet<ModuleId>,
}

impl IrGen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn owner_of(&self, symbol: &str) -> Option<ModuleId> {
        self.symbols.get(symbol).copied()
    }

    pub fn module_count(&self) -> usize {
        self.finished.len()
    }
}

impl CodeGenerator for IrGen {
    fn start_module(&mut self, name: &str) -> IrModule {
        self.next_module += 1;
        IrModule::new(ModuleId::from_raw(self.next_module), name)
    }

    fn handle_group(&mut self, module: &mut IrModule, group: &DeclGroup, decls: &DeclTable) -> CodegenResult<()> {
        for decl in &group.decls {
            self.handle_decl(module, group.kind, *decl, decls)?;
        }
        Ok(())
    }

    fn handle_decl(
        &mut self,
        module: &mut IrModule,
        kind: DeclGroupKind,
        decl: DeclId,
        decls: &DeclTable,
    ) -> CodegenResult<()> {
        trace!(%kind, %decl, module = %module.id, "lowering declaration");
        let mut lowering = Lowering {
            symbols: &self.symbols,
            module,
            decls,
        };
        kind.dispatch(&mut lowering, decl)
    }

    fn finish_module(&mut self, module: IrModule) -> CodegenResult<IrModule> {
        for symbol in module.defined_symbols() {
            if let Some(owner) = self.symbols.get(symbol) {
                return Err(CodegenError::DuplicateSymbol {
                    symbol: symbol.to_string(),
                    owner: *owner,
                });
            }
        }
        for symbol in module.defined_symbols() {
            self.symbols.insert(symbol.to_string(), module.id);
        }
        self.finished.insert(module.id);
        debug!(
            module = %module.id,
            functions = module.functions.len(),
            globals = module.globals.len(),
            "finished module"
        );
        Ok(module)
    }

    fn forget_module(&mut self, id: ModuleId) -> bool {
        self.symbols.retain(|_, owner| *owner != id);
        self.finished.remove(&id)
    }
}

/// Handler table used to lower one declaration into a module.
struct Lowering<'a> {
    symbols: &'a HashMap<String, ModuleId>,
    module: &'a mut IrModule,
    decls: &'a DeclTable,
}

impl<'a> Lowering<'a> {
    fn decl(&self, id: DeclId) -> CodegenResult<&'a Decl> {
        self.decls.get(id).ok_or(CodegenError::UnknownDecl(id))
    }

    fn claim(&self, symbol: &str) -> CodegenResult<()> {
        if let Some(owner) = self.symbols.get(symbol) {
            return Err(CodegenError::DuplicateSymbol {
                symbol: symbol.to_string(),
                owner: *owner,
            });
        }
        if self.module.defines(symbol) {
            return Err(CodegenError::DuplicateSymbol {
                symbol: symbol.to_string(),
                owner: self.module.id,
            });
        }
        Ok(())
    }

    /// Lower any declaration that appears as an ordinary top-level one.
    /// Tentative variables are left for their own group unless `complete`.
    fn lower(&mut self, id: DeclId, complete: bool) -> CodegenResult<()> {
        let decl = self.decl(id)?;
        if let DeclContext::Wrapper(_) = decl.context {
            return Err(CodegenError::Unextracted(decl.qualified.clone()));
        }
        match &decl.kind {
            DeclKind::Var(var) if var.is_extern => {
                self.module.add_extern(&decl.qualified);
                Ok(())
            }
            DeclKind::Var(var) => match &var.init {
                Some(init) => {
                    let value = self.lower_expr(None, init)?;
                    self.define_global(decl, &var.ty)?;
                    self.module.initializers.push(IrInitializer {
                        global: decl.qualified.clone(),
                        value,
                    });
                    Ok(())
                }
                None if complete => self.define_global(decl, &var.ty),
                None => Ok(()),
            },
            DeclKind::Function(func) => match &func.body {
                Some(_) => self.lower_function(id),
                None => {
                    self.module.add_extern(&decl.qualified);
                    Ok(())
                }
            },
            DeclKind::Template(_) => Ok(()),
            DeclKind::Struct(_) => self.type_info(id),
            DeclKind::Namespace(ns) => {
                for member in ns.members.clone() {
                    self.lower(member, true)?;
                    if let Ok(Decl {
                        kind: DeclKind::Struct(s),
                        ..
                    }) = self.decl(member)
                    {
                        if s.is_virtual {
                            self.emit_vtable(member)?;
                        }
                    }
                }
                Ok(())
            }
        }
    }

    fn define_global(&mut self, decl: &Decl, ty: &Type) -> CodegenResult<()> {
        if self.module.globals.iter().any(|g| g.name == decl.qualified) {
            return Ok(());
        }
        self.claim(&decl.qualified)?;
        let zero = match ty {
            Type::Bool => IrConst::Bool(false),
            _ => IrConst::Int(0),
        };
        self.module.globals.push(IrGlobal {
            name: decl.qualified.clone(),
            zero,
        });
        Ok(())
    }

    fn lower_function(&mut self, id: DeclId) -> CodegenResult<()> {
        let decl = self.decl(id)?;
        let Some(func) = decl.as_function() else {
            return Err(CodegenError::Unsupported(format!("'{}' is not a function", decl.qualified)));
        };
        let Some(body) = &func.body else {
            return Err(CodegenError::Unsupported(format!("'{}' has no body", decl.qualified)));
        };
        self.claim(&decl.qualified)?;
        let cx = FnLowering { id, func };
        let body = body
            .iter()
            .map(|s| self.lower_stmt(&cx, s))
            .collect::<CodegenResult<Vec<_>>>()?;
        self.module.functions.push(IrFunction {
            name: decl.qualified.clone(),
            params: func.params.len(),
            slots: func.locals.len(),
            body,
        });
        Ok(())
    }

    fn type_info(&mut self, id: DeclId) -> CodegenResult<()> {
        let decl = self.decl(id)?;
        let DeclKind::Struct(s) = &decl.kind else {
            return Err(CodegenError::Unsupported(format!("'{}' is not a struct", decl.qualified)));
        };
        if !self.module.type_infos.iter().any(|t| t.name == decl.qualified) {
            self.module.type_infos.push(TypeInfo {
                name: decl.qualified.clone(),
                size: s.size(),
            });
        }
        Ok(())
    }

    fn emit_vtable(&mut self, id: DeclId) -> CodegenResult<()> {
        let decl = self.decl(id)?;
        match &decl.kind {
            DeclKind::Struct(s) if s.is_virtual => {
                let symbol = format!("vtable.{}", decl.qualified);
                self.claim(&symbol)?;
                self.module.vtables.push(symbol);
                Ok(())
            }
            _ => Err(CodegenError::Unsupported(format!(
                "'{}' has no virtual table",
                decl.qualified
            ))),
        }
    }

    // ==================== Bodies ====================

    fn lower_stmt(&self, cx: &FnLowering<'_>, stmt: &TStmt) -> CodegenResult<IrStmt> {
        Ok(match stmt {
            TStmt::Expr(e) => IrStmt::Expr(self.lower_expr(Some(cx), e)?),
            TStmt::Local(id) => {
                let local = self.decl(*id)?;
                let slot = self.slot(cx, *id, local)?;
                let value = match local.as_var() {
                    Some(var) => match &var.init {
                        Some(init) => self.lower_expr(Some(cx), init)?,
                        None if var.ty == Type::Bool => IrExpr::Const(IrConst::Bool(false)),
                        None => IrExpr::Const(IrConst::Int(0)),
                    },
                    None => return Err(CodegenError::Unsupported(format!("local '{}'", local.name))),
                };
                IrStmt::Let(slot, value)
            }
            TStmt::Decl(id) => return Err(CodegenError::Unextracted(self.decl(*id)?.qualified.clone())),
            TStmt::Return(value, _) => IrStmt::Return(match value {
                Some(v) => Some(self.lower_expr(Some(cx), v)?),
                None => None,
            }),
            TStmt::If {
                cond,
                then,
                otherwise,
            } => IrStmt::If(
                self.lower_expr(Some(cx), cond)?,
                self.lower_stmts(cx, then)?,
                self.lower_stmts(cx, otherwise)?,
            ),
            TStmt::While { cond, body } => {
                IrStmt::While(self.lower_expr(Some(cx), cond)?, self.lower_stmts(cx, body)?)
            }
            TStmt::Block(stmts) => IrStmt::Block(self.lower_stmts(cx, stmts)?),
        })
    }

    fn lower_stmts(&self, cx: &FnLowering<'_>, stmts: &[TStmt]) -> CodegenResult<Vec<IrStmt>> {
        stmts.iter().map(|s| self.lower_stmt(cx, s)).collect()
    }

    fn slot(&self, cx: &FnLowering<'_>, id: DeclId, decl: &Decl) -> CodegenResult<usize> {
        match decl.context {
            DeclContext::Function(owner) if owner == cx.id => cx
                .func
                .slot_of(id)
                .ok_or_else(|| CodegenError::Unsupported(format!("local '{}' has no slot", decl.name))),
            _ => Err(CodegenError::CapturedLocal(decl.name.clone())),
        }
    }

    /// Where a variable reference reads from or writes to.
    fn place(&self, cx: Option<&FnLowering<'_>>, id: DeclId) -> CodegenResult<Place> {
        let decl = self.decl(id)?;
        match (decl.context, cx) {
            (DeclContext::Function(_), Some(cx)) => Ok(Place::Local(self.slot(cx, id, decl)?)),
            (DeclContext::Function(_), None) => Err(CodegenError::CapturedLocal(decl.name.clone())),
            (DeclContext::Wrapper(_), _) => Err(CodegenError::Unextracted(decl.qualified.clone())),
            _ => Ok(Place::Global(decl.qualified.clone())),
        }
    }

    fn lower_expr(&self, cx: Option<&FnLowering<'_>>, expr: &TExpr) -> CodegenResult<IrExpr> {
        Ok(match &expr.kind {
            TExprKind::Int(v) => IrExpr::Const(IrConst::Int(*v)),
            TExprKind::Bool(b) => IrExpr::Const(IrConst::Bool(*b)),
            TExprKind::DeclRef(id) => match self.place(cx, *id)? {
                Place::Local(slot) => IrExpr::Local(slot),
                Place::Global(name) => IrExpr::Global(name),
            },
            TExprKind::Unresolved(name) | TExprKind::UnresolvedCall { name, .. } => {
                return Err(CodegenError::Unresolved(name.clone()));
            }
            TExprKind::RuntimeLookup(name) => IrExpr::Lookup(name.clone()),
            TExprKind::Unary { op, operand } => IrExpr::Unary(*op, Box::new(self.lower_expr(cx, operand)?)),
            TExprKind::Binary { op, lhs, rhs } => IrExpr::Binary(
                *op,
                Box::new(self.lower_expr(cx, lhs)?),
                Box::new(self.lower_expr(cx, rhs)?),
            ),
            TExprKind::Assign { target, value } => {
                let value = Box::new(self.lower_expr(cx, value)?);
                match self.place(cx, *target)? {
                    Place::Local(slot) => IrExpr::StoreLocal(slot, value),
                    Place::Global(name) => IrExpr::StoreGlobal(name, value),
                }
            }
            TExprKind::Call { callee, args } => {
                IrExpr::Call(self.decl(*callee)?.qualified.clone(), self.lower_args(cx, args)?)
            }
            TExprKind::RuntimeCall { name, args } => IrExpr::Call(name.clone(), self.lower_args(cx, args)?),
            TExprKind::Builtin {
                builtin: Builtin::Print,
                args,
            } => match args.as_slice() {
                [value] => IrExpr::Print(Box::new(self.lower_expr(cx, value)?)),
                _ => return Err(CodegenError::Unsupported("print arity".to_string())),
            },
            TExprKind::Builtin {
                builtin: Builtin::AtExit,
                args,
            } => match args.first().map(|a| &a.kind) {
                Some(TExprKind::DeclRef(func)) => IrExpr::AtExit(self.decl(*func)?.qualified.clone()),
                _ => return Err(CodegenError::Unsupported("atexit argument".to_string())),
            },
        })
    }

    fn lower_args(&self, cx: Option<&FnLowering<'_>>, args: &[TExpr]) -> CodegenResult<Vec<IrExpr>> {
        args.iter().map(|a| self.lower_expr(cx, a)).collect()
    }
}

enum Place {
    Local(usize),
    Global(String),
}

struct FnLowering<'f> {
    id: DeclId,
    func: &'f FunctionDecl,
}

impl GroupHandler for Lowering<'_> {
    type Error = CodegenError;

    fn top_level(&mut self, decl: DeclId) -> CodegenResult<()> {
        self.lower(decl, false)
    }

    fn tag_definition(&mut self, decl: DeclId) -> CodegenResult<()> {
        self.type_info(decl)
    }

    fn vtable(&mut self, decl: DeclId) -> CodegenResult<()> {
        self.emit_vtable(decl)
    }

    fn implicit_instantiation(&mut self, decl: DeclId) -> CodegenResult<()> {
        self.lower_function(decl)
    }

    fn tentative_definition(&mut self, decl: DeclId) -> CodegenResult<()> {
        let decl = self.decl(decl)?;
        match decl.as_var() {
            Some(var) if decl.has_global_storage() => self.define_global(decl, &var.ty),
            _ => Err(CodegenError::Unsupported(format!(
                "'{}' cannot be tentatively defined",
                decl.qualified
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sema::{Analyzer, CollectingConsumer, Sema};
    use crate::transaction::CompilationOptions;

    fn lower_source(gen: &mut IrGen, sema: &mut Sema, src: &str) -> CodegenResult<IrModule> {
        let mut out = CollectingConsumer::default();
        let outcome = sema.parse(src, &CompilationOptions::default(), &mut out);
        assert!(!outcome.is_failed(), "{:?}", sema.take_diagnostics());
        let mut module = gen.start_module("test");
        for group in &out.groups {
            gen.handle_group(&mut module, group, sema.decls())?;
        }
        gen.finish_module(module)
    }

    #[test]
    fn test_lower_globals_and_functions() {
        let mut gen = IrGen::new();
        let mut sema = Sema::new();
        let module = lower_source(
            &mut gen,
            &mut sema,
            "int x = 1; int z; bool flag; extern int e; int f(int a) { int t = a; return t + x; } int g();",
        )
        .unwrap();
        let globals: Vec<_> = module.globals.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(globals, vec!["x", "z", "flag"]);
        assert_eq!(module.globals[2].zero, IrConst::Bool(false));
        assert_eq!(module.initializers.len(), 1);
        assert_eq!(module.externs, vec!["e".to_string(), "g".to_string()]);
        let f = &module.functions[0];
        assert_eq!((f.params, f.slots), (1, 2));
        assert!(matches!(f.body[0], IrStmt::Let(1, IrExpr::Local(0))));
        assert_eq!(gen.owner_of("f"), Some(module.id));
    }

    #[test]
    fn test_lower_structs_and_namespaces() {
        let mut gen = IrGen::new();
        let mut sema = Sema::new();
        let module = lower_source(
            &mut gen,
            &mut sema,
            "virtual struct Shape { int sides; }; namespace geo { int origin; int area(int w) { return w * w; } }",
        )
        .unwrap();
        assert_eq!(
            module.type_infos,
            vec![TypeInfo {
                name: "Shape".into(),
                size: 12
            }]
        );
        assert_eq!(module.vtables, vec!["vtable.Shape".to_string()]);
        assert!(module.defines("geo::origin"));
        assert!(module.defines("geo::area"));
    }

    #[test]
    fn test_duplicate_symbols_and_forget() {
        let mut gen = IrGen::new();
        let mut sema = Sema::new();
        let first = lower_source(&mut gen, &mut sema, "int f() { return 1; }").unwrap();

        // Force a second definition past the analyzer.
        let f = sema.lookup("f").unwrap();
        let mut module = gen.start_module("dup");
        let err = gen
            .handle_decl(&mut module, DeclGroupKind::TopLevel, f, sema.decls())
            .unwrap_err();
        assert!(matches!(err, CodegenError::DuplicateSymbol { owner, .. } if owner == first.id));

        assert!(gen.forget_module(first.id));
        assert!(!gen.forget_module(first.id));
        assert_eq!(gen.owner_of("f"), None);
        gen.handle_decl(&mut module, DeclGroupKind::TopLevel, f, sema.decls())
            .unwrap();
    }

    #[test]
    fn test_wrapper_needs_extraction() {
        let mut gen = IrGen::new();
        let mut sema = Sema::new();
        let mut out = CollectingConsumer::default();
        sema.parse("int y = 2; y + 1;", &CompilationOptions::wrapped(), &mut out);
        let mut module = gen.start_module("w");
        let err = gen.handle_group(&mut module, &out.groups[0], sema.decls()).unwrap_err();
        assert!(err.is_pipeline_gap());
    }
}
