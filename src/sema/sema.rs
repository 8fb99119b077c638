//! Reference analyzer for the fragment language.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::{debug, trace};

use super::analyzer::{Analyzer, DeclConsumer, ParseOutcome, RuntimeSupport};
use super::decl::*;
use super::diagnostics::{Diagnostic, DiagnosticSink, Severity};
use super::error::{SemaError, SemaResult};
use super::image::SessionImage;
use super::scope::{LocalScopes, Registry};
use super::tree::{Builtin, TExpr, TExprKind, TStmt, Type};
use crate::ast::{
    BinaryOp, Expr, Fragment, FunctionItem, Item, NamespaceItem, Param, Parser, Path, Span, Stmt,
    StructItem, TemplateItem, TypeName, UnaryOp, VarItem,
};
use crate::transaction::{CompilationOptions, DeclGroup, DeclGroupKind};

/// Where checked declarations are being placed.
struct Ctx {
    origin: DeclOrigin,
    options: CompilationOptions,
    /// Enclosing namespace names, outermost first.
    namespaces: Vec<String>,
    context: DeclContext,
    /// Wrapper-level variables of the fragment being checked.
    overlay: HashMap<String, DeclId>,
}

impl Ctx {
    fn new(origin: DeclOrigin, options: CompilationOptions) -> Self {
        Self {
            origin,
            options,
            namespaces: Vec::new(),
            context: DeclContext::TranslationUnit,
            overlay: HashMap::new(),
        }
    }

    fn qualify(&self, name: &str) -> String {
        if self.namespaces.is_empty() {
            name.to_string()
        } else {
            format!("{}::{}", self.namespaces.join("::"), name)
        }
    }
}

/// The function whose body is being checked.
struct FnCtx {
    owner: Option<DeclId>,
    ret: Type,
    is_wrapper: bool,
    scopes: LocalScopes,
    locals: Vec<DeclId>,
    subst: HashMap<String, Type>,
}

impl FnCtx {
    /// Context for global initializers.
    fn global() -> Self {
        Self {
            owner: None,
            ret: Type::Void,
            is_wrapper: false,
            scopes: LocalScopes::default(),
            locals: Vec::new(),
            subst: HashMap::new(),
        }
    }

    fn function(owner: DeclId, ret: Type, subst: HashMap<String, Type>, params: &[(String, DeclId)]) -> Self {
        let mut scopes = LocalScopes::default();
        scopes.push();
        for (name, id) in params {
            scopes.declare(name, *id);
        }
        Self {
            owner: Some(owner),
            ret,
            is_wrapper: false,
            scopes,
            locals: params.iter().map(|(_, id)| *id).collect(),
            subst,
        }
    }
}

struct OpenWrapper {
    id: DeclId,
    f: FnCtx,
    body: Vec<TStmt>,
}

/// Type checker and declaration owner.
pub struct Sema {
    decls: DeclTable,
    registry: Registry,
    diags: DiagnosticSink,
    pending: VecDeque<DeclId>,
    /// Declarations created since the last fragment boundary.
    created: Vec<DeclId>,
    wrappers: u32,
}

impl Default for Sema {
    fn default() -> Self {
        Self::new()
    }
}

impl Sema {
    pub fn new() -> Self {
        Self {
            decls: DeclTable::new(),
            registry: Registry::default(),
            diags: DiagnosticSink::default(),
            pending: VecDeque::new(),
            created: Vec::new(),
            wrappers: 0,
        }
    }

    /// Diagnostics not yet taken.
    pub fn pending_diagnostics(&self) -> &[Diagnostic] {
        self.diags.pending()
    }

    fn insert(&mut self, decl: Decl) -> DeclId {
        let id = self.decls.insert(decl);
        self.created.push(id);
        id
    }

    fn outcome_since(&self, mark: usize) -> ParseOutcome {
        match self.diags.worst_since(mark) {
            Some(Severity::Error) => ParseOutcome::Failed,
            Some(Severity::Warning) => ParseOutcome::SuccessWithWarnings,
            _ => ParseOutcome::Success,
        }
    }

    // ==================== Fragments ====================

    fn check_source(&mut self, source: &str, cx: &mut Ctx, out: &mut Vec<DeclGroup>) -> SemaResult<()> {
        let fragment = Parser::parse(source)?;
        self.check_fragment(&fragment, cx, out)
    }

    fn check_fragment(&mut self, fragment: &Fragment, cx: &mut Ctx, out: &mut Vec<DeclGroup>) -> SemaResult<()> {
        let first_stmt = fragment.items.iter().find_map(|item| match item {
            Item::Stmt(stmt) => Some(stmt.span()),
            _ => None,
        });
        let mut wrapper = match first_stmt {
            Some(span) if !cx.options.declaration_extraction => {
                return Err(SemaError::TopLevelStatement { span });
            }
            Some(span) => Some(self.open_wrapper(cx, span)),
            None => None,
        };

        let mut global = FnCtx::global();
        for item in &fragment.items {
            match (item, wrapper.as_mut()) {
                (Item::Stmt(stmt), Some(w)) => {
                    let checked = self.check_stmt(cx, &mut w.f, stmt)?;
                    w.body.push(checked);
                }
                (Item::Var(var), Some(w)) => {
                    let id = self.declare_var(cx, &mut w.f, var, DeclContext::Wrapper(w.id))?;
                    cx.overlay.insert(var.name.clone(), id);
                    w.body.push(TStmt::Decl(id));
                }
                (Item::Stmt(stmt), None) => {
                    return Err(SemaError::TopLevelStatement { span: stmt.span() });
                }
                (item, _) => {
                    let id = self.declare_item(cx, &mut global, item)?;
                    out.extend(self.groups_for(id));
                }
            }
        }

        if let Some(w) = wrapper {
            let id = w.id;
            if let Some(func) = self.decls.get_mut(id).and_then(Decl::as_function_mut) {
                func.body = Some(w.body);
                func.locals = w.f.locals;
            }
            out.push(DeclGroup::single(DeclGroupKind::TopLevel, id));
        }
        Ok(())
    }

    fn open_wrapper(&mut self, cx: &Ctx, span: Span) -> OpenWrapper {
        self.wrappers += 1;
        let name = format!("__inkling_wrapper_{}", self.wrappers);
        let id = self.insert(Decl {
            name: name.clone(),
            qualified: name,
            kind: DeclKind::Function(FunctionDecl {
                ret: Type::Void,
                params: Vec::new(),
                body: None,
                is_inline: false,
                is_wrapper: true,
                instantiated_from: None,
                template_args: Vec::new(),
                locals: Vec::new(),
            }),
            context: DeclContext::TranslationUnit,
            origin: cx.origin,
            span,
        });
        let mut f = FnCtx::function(id, Type::Void, HashMap::new(), &[]);
        f.is_wrapper = true;
        OpenWrapper {
            id,
            f,
            body: Vec::new(),
        }
    }

    /// Groups announcing a freshly declared top-level item.
    fn groups_for(&self, id: DeclId) -> Vec<DeclGroup> {
        let Some(decl) = self.decls.get(id) else {
            return Vec::new();
        };
        match &decl.kind {
            DeclKind::Var(v) if v.init.is_none() && !v.is_extern => vec![
                DeclGroup::single(DeclGroupKind::TopLevel, id),
                DeclGroup::single(DeclGroupKind::TentativeDefinition, id),
            ],
            DeclKind::Struct(s) if s.is_virtual => vec![
                DeclGroup::single(DeclGroupKind::TagDefinition, id),
                DeclGroup::single(DeclGroupKind::VTable, id),
            ],
            DeclKind::Struct(_) => vec![DeclGroup::single(DeclGroupKind::TagDefinition, id)],
            _ => vec![DeclGroup::single(DeclGroupKind::TopLevel, id)],
        }
    }

    /// Forget every declaration created since the last boundary that the
    /// groups in `keep` do not account for.
    fn recover(&mut self, keep: &[DeclId]) {
        let mut reachable = HashSet::new();
        let mut stack: Vec<DeclId> = keep.to_vec();
        while let Some(id) = stack.pop() {
            if !reachable.insert(id) {
                continue;
            }
            match self.decls.get(id).map(|d| &d.kind) {
                Some(DeclKind::Namespace(ns)) => stack.extend(ns.members.iter().copied()),
                Some(DeclKind::Function(f)) => stack.extend(f.locals.iter().copied()),
                _ => {}
            }
        }
        let created = std::mem::take(&mut self.created);
        for id in created.into_iter().rev() {
            if !reachable.contains(&id) {
                trace!(decl = %id, "discarding declaration of failed fragment");
                self.forget(id);
            }
        }
    }

    /// Check a whole source unit and deliver its groups.
    fn run_unit(
        &mut self,
        source: &str,
        mut cx: Ctx,
        consumer: &mut dyn DeclConsumer,
        deserialized: bool,
    ) -> ParseOutcome {
        let mark = self.diags.mark();
        self.created.clear();
        let mut out = Vec::new();
        let result = self.check_source(source, &mut cx, &mut out);
        if let Err(err) = &result {
            self.diags.report(err.to_diagnostic());
            let keep: Vec<DeclId> = out.iter().flat_map(|g| g.decls.iter().copied()).collect();
            self.recover(&keep);
        }
        self.created.clear();
        debug!(groups = out.len(), failed = result.is_err(), "analyzed source unit");
        for group in out {
            if deserialized {
                consumer.handle_deserialized_group(group);
            } else {
                consumer.handle_group(group);
            }
        }
        self.outcome_since(mark)
    }

    // ==================== Items ====================

    fn declare_item(&mut self, cx: &mut Ctx, global: &mut FnCtx, item: &Item) -> SemaResult<DeclId> {
        match item {
            Item::Var(var) => {
                let context = cx.context;
                self.declare_var(cx, global, var, context)
            }
            Item::Function(func) => self.declare_function(cx, func),
            Item::Template(template) => self.declare_template(cx, template),
            Item::Struct(structure) => self.declare_struct(cx, structure),
            Item::Namespace(ns) => self.declare_namespace(cx, global, ns),
            Item::Stmt(stmt) => Err(SemaError::invalid(
                "statements are not allowed inside a namespace",
                stmt.span(),
            )),
        }
    }

    fn declare_var(&mut self, cx: &mut Ctx, f: &mut FnCtx, var: &VarItem, context: DeclContext) -> SemaResult<DeclId> {
        let ty = self.resolve_value_type(cx, &var.ty, &f.subst, var.span)?;
        if var.is_extern && var.init.is_some() {
            return Err(SemaError::invalid(
                format!("extern variable '{}' cannot have an initializer", var.name),
                var.span,
            ));
        }
        if var.is_const && !var.is_extern && var.init.is_none() {
            return Err(SemaError::invalid(
                format!("const variable '{}' requires an initializer", var.name),
                var.span,
            ));
        }
        let init = match &var.init {
            Some(expr) => {
                let checked = self.check_expr(cx, f, expr)?;
                self.expect_type(&ty, &checked)?;
                Some(checked)
            }
            None => None,
        };

        let qualified = cx.qualify(&var.name);
        let in_wrapper = matches!(context, DeclContext::Wrapper(_));
        if in_wrapper && cx.overlay.contains_key(&var.name) {
            return Err(SemaError::Redefinition {
                name: var.name.clone(),
                span: var.span,
            });
        }
        self.check_redeclaration(&qualified, "variable", var.is_extern, var.span)?;

        let id = self.insert(Decl {
            name: var.name.clone(),
            qualified: qualified.clone(),
            kind: DeclKind::Var(VarDecl {
                ty,
                init,
                is_const: var.is_const,
                is_extern: var.is_extern,
                is_instantiation: false,
            }),
            context,
            origin: cx.origin,
            span: var.span,
        });
        if !in_wrapper {
            self.registry.bind(&qualified, id);
        }
        Ok(id)
    }

    /// Reject a second definition of `qualified`. Redeclarations are fine
    /// as long as one side is only a declaration and both have the same kind.
    fn check_redeclaration(
        &self,
        qualified: &str,
        kind: &'static str,
        incoming_redeclarable: bool,
        span: Span,
    ) -> SemaResult<()> {
        let Some(existing) = self.registry.lookup(qualified).and_then(|id| self.decls.get(id)) else {
            return Ok(());
        };
        if existing.kind.describe() != kind {
            return Err(SemaError::invalid(
                format!(
                    "'{}' redeclared as a {} (previously a {})",
                    qualified,
                    kind,
                    existing.kind.describe()
                ),
                span,
            ));
        }
        if !existing.is_redeclarable() && !incoming_redeclarable {
            return Err(SemaError::Redefinition {
                name: qualified.to_string(),
                span,
            });
        }
        Ok(())
    }

    fn declare_params(&mut self, cx: &Ctx, owner: DeclId, params: &[Param], types: &[Type]) -> Vec<(String, DeclId)> {
        params
            .iter()
            .zip(types)
            .map(|(param, ty)| {
                let id = self.insert(Decl {
                    name: param.name.clone(),
                    qualified: param.name.clone(),
                    kind: DeclKind::Var(VarDecl {
                        ty: ty.clone(),
                        init: None,
                        is_const: false,
                        is_extern: false,
                        is_instantiation: false,
                    }),
                    context: DeclContext::Function(owner),
                    origin: cx.origin,
                    span: Span::default(),
                });
                (param.name.clone(), id)
            })
            .collect()
    }

    fn declare_function(&mut self, cx: &mut Ctx, item: &FunctionItem) -> SemaResult<DeclId> {
        let subst = HashMap::new();
        let ret = self.resolve_return_type(cx, &item.ret, &subst, item.span)?;
        let param_types = item
            .params
            .iter()
            .map(|p| self.resolve_value_type(cx, &p.ty, &subst, item.span))
            .collect::<SemaResult<Vec<_>>>()?;

        let qualified = cx.qualify(&item.name);
        self.check_redeclaration(&qualified, "function", item.body.is_none(), item.span)?;
        if let Some((prev_ret, prev_params)) = self.registry.lookup(&qualified).and_then(|id| self.signature(id)) {
            if prev_ret != ret || prev_params != param_types {
                return Err(SemaError::invalid(
                    format!("conflicting types for '{}'", qualified),
                    item.span,
                ));
            }
        }

        let id = self.insert(Decl {
            name: item.name.clone(),
            qualified: qualified.clone(),
            kind: DeclKind::Function(FunctionDecl {
                ret: ret.clone(),
                params: Vec::new(),
                body: None,
                is_inline: item.is_inline,
                is_wrapper: false,
                instantiated_from: None,
                template_args: Vec::new(),
                locals: Vec::new(),
            }),
            context: cx.context,
            origin: cx.origin,
            span: item.span,
        });
        let params = self.declare_params(cx, id, &item.params, &param_types);
        self.set_params(id, &params);
        self.registry.bind(&qualified, id);

        if let Some(body) = &item.body {
            let mut f = FnCtx::function(id, ret, subst, &params);
            let stmts = self.check_block(cx, &mut f, &body.stmts)?;
            if let Some(func) = self.decls.get_mut(id).and_then(Decl::as_function_mut) {
                func.body = Some(stmts);
                func.locals = f.locals;
            }
        }
        Ok(id)
    }

    fn set_params(&mut self, id: DeclId, params: &[(String, DeclId)]) {
        if let Some(func) = self.decls.get_mut(id).and_then(Decl::as_function_mut) {
            func.params = params.iter().map(|(_, p)| *p).collect();
            func.locals = func.params.clone();
        }
    }

    fn declare_template(&mut self, cx: &mut Ctx, item: &TemplateItem) -> SemaResult<DeclId> {
        let qualified = cx.qualify(&item.function.name);
        self.check_redeclaration(&qualified, "template", false, item.span)?;
        let id = self.insert(Decl {
            name: item.function.name.clone(),
            qualified: qualified.clone(),
            kind: DeclKind::Template(TemplateDecl {
                params: item.params.clone(),
                pattern: item.function.clone(),
                specializations: Vec::new(),
            }),
            context: cx.context,
            origin: cx.origin,
            span: item.span,
        });
        self.registry.bind(&qualified, id);
        Ok(id)
    }

    fn declare_struct(&mut self, cx: &mut Ctx, item: &StructItem) -> SemaResult<DeclId> {
        let mut fields: Vec<(String, Type)> = Vec::with_capacity(item.fields.len());
        for field in &item.fields {
            if fields.iter().any(|(name, _)| *name == field.name) {
                return Err(SemaError::invalid(
                    format!("duplicate field '{}' in struct '{}'", field.name, item.name),
                    item.span,
                ));
            }
            let ty = self.resolve_value_type(cx, &field.ty, &HashMap::new(), item.span)?;
            fields.push((field.name.clone(), ty));
        }
        let qualified = cx.qualify(&item.name);
        self.check_redeclaration(&qualified, "struct", false, item.span)?;
        let id = self.insert(Decl {
            name: item.name.clone(),
            qualified: qualified.clone(),
            kind: DeclKind::Struct(StructDecl {
                fields,
                is_virtual: item.is_virtual,
            }),
            context: cx.context,
            origin: cx.origin,
            span: item.span,
        });
        self.registry.bind(&qualified, id);
        Ok(id)
    }

    fn declare_namespace(&mut self, cx: &mut Ctx, global: &mut FnCtx, item: &NamespaceItem) -> SemaResult<DeclId> {
        let qualified = cx.qualify(&item.name);
        self.check_redeclaration(&qualified, "namespace", true, item.span)?;
        let id = self.insert(Decl {
            name: item.name.clone(),
            qualified: qualified.clone(),
            kind: DeclKind::Namespace(NamespaceDecl::default()),
            context: cx.context,
            origin: cx.origin,
            span: item.span,
        });
        self.registry.bind(&qualified, id);

        let outer = cx.context;
        cx.namespaces.push(item.name.clone());
        cx.context = DeclContext::Namespace(id);
        let mut members = Vec::with_capacity(item.items.len());
        let mut result = Ok(());
        for member in &item.items {
            match self.declare_item(cx, global, member) {
                Ok(member_id) => members.push(member_id),
                Err(err) => {
                    result = Err(err);
                    break;
                }
            }
        }
        cx.namespaces.pop();
        cx.context = outer;

        if let Some(Decl {
            kind: DeclKind::Namespace(ns),
            ..
        }) = self.decls.get_mut(id)
        {
            ns.members = members;
        }
        result.map(|_| id)
    }

    // ==================== Types ====================

    fn resolve_type(&self, cx: &Ctx, name: &TypeName, subst: &HashMap<String, Type>, span: Span) -> SemaResult<Type> {
        match name {
            TypeName::Int => Ok(Type::Int),
            TypeName::Bool => Ok(Type::Bool),
            TypeName::Void => Ok(Type::Void),
            TypeName::Named(n) => {
                if let Some(ty) = subst.get(n) {
                    return Ok(ty.clone());
                }
                match self.lookup_global(cx, n).map(|id| (id, self.decls.get(id))) {
                    Some((id, Some(Decl { kind: DeclKind::Struct(_), .. }))) => Ok(Type::Struct(id)),
                    _ => Err(SemaError::UnknownType {
                        name: n.clone(),
                        span,
                    }),
                }
            }
        }
    }

    fn resolve_value_type(&self, cx: &Ctx, name: &TypeName, subst: &HashMap<String, Type>, span: Span) -> SemaResult<Type> {
        let ty = self.resolve_type(cx, name, subst, span)?;
        if ty.is_value() {
            Ok(ty)
        } else {
            Err(SemaError::invalid(
                format!("type '{}' cannot be used for a value", self.type_label(&ty)),
                span,
            ))
        }
    }

    fn resolve_return_type(&self, cx: &Ctx, name: &TypeName, subst: &HashMap<String, Type>, span: Span) -> SemaResult<Type> {
        let ty = self.resolve_type(cx, name, subst, span)?;
        if matches!(ty, Type::Struct(_)) {
            return Err(SemaError::invalid(
                format!("cannot return struct '{}' by value", self.type_label(&ty)),
                span,
            ));
        }
        Ok(ty)
    }

    /// Human-readable type name, as used in specialization keys.
    fn type_label(&self, ty: &Type) -> String {
        match ty {
            Type::Struct(id) => self
                .decls
                .get(*id)
                .map(|d| d.qualified.clone())
                .unwrap_or_else(|| ty.to_string()),
            other => other.to_string(),
        }
    }

    fn expect_type(&self, expected: &Type, expr: &TExpr) -> SemaResult<()> {
        if expected.accepts(&expr.ty) {
            Ok(())
        } else {
            Err(SemaError::TypeMismatch {
                expected: self.type_label(expected),
                found: self.type_label(&expr.ty),
                span: expr.span,
            })
        }
    }

    fn size_of(&self, ty: &Type, span: Span) -> SemaResult<i64> {
        match ty {
            Type::Int => Ok(4),
            Type::Bool => Ok(1),
            Type::Struct(id) => match self.decls.get(*id).map(|d| &d.kind) {
                Some(DeclKind::Struct(s)) => Ok(s.size()),
                _ => Err(SemaError::invalid("incomplete type in sizeof", span)),
            },
            Type::Void | Type::Dynamic => Err(SemaError::invalid(
                format!("invalid application of sizeof to '{}'", ty),
                span,
            )),
        }
    }

    fn signature(&self, id: DeclId) -> Option<(Type, Vec<Type>)> {
        let func = self.decls.get(id)?.as_function()?;
        let params = func
            .params
            .iter()
            .filter_map(|p| self.decls.get(*p).and_then(Decl::as_var).map(|v| v.ty.clone()))
            .collect();
        Some((func.ret.clone(), params))
    }

    // ==================== Name lookup ====================

    /// Registry lookup from inside the current namespaces, innermost first.
    fn lookup_global(&self, cx: &Ctx, joined: &str) -> Option<DeclId> {
        for depth in (0..=cx.namespaces.len()).rev() {
            if depth == 0 {
                if let Some(id) = cx.overlay.get(joined) {
                    return Some(*id);
                }
                return self.registry.lookup(joined);
            }
            let candidate = format!("{}::{}", cx.namespaces[..depth].join("::"), joined);
            if let Some(id) = self.registry.lookup(&candidate) {
                return Some(id);
            }
        }
        None
    }

    fn resolve_path(&self, cx: &Ctx, f: &FnCtx, path: &Path) -> Option<DeclId> {
        if !path.is_qualified() {
            if let Some(id) = f.scopes.lookup(path.name()) {
                return Some(id);
            }
        }
        self.lookup_global(cx, &path.to_string())
    }

    // ==================== Statements ====================

    fn check_block(&mut self, cx: &mut Ctx, f: &mut FnCtx, stmts: &[Stmt]) -> SemaResult<Vec<TStmt>> {
        f.scopes.push();
        let result = stmts.iter().map(|s| self.check_stmt(cx, f, s)).collect();
        f.scopes.pop();
        result
    }

    fn check_stmt(&mut self, cx: &mut Ctx, f: &mut FnCtx, stmt: &Stmt) -> SemaResult<TStmt> {
        match stmt {
            Stmt::Expr(expr) => {
                let checked = self.check_expr(cx, f, expr)?;
                if !f.is_wrapper && !checked.has_side_effects() {
                    self.diags
                        .report(Diagnostic::warning("expression result unused", Some(checked.span)));
                }
                Ok(TStmt::Expr(checked))
            }
            Stmt::Local(var) => self.declare_local(cx, f, var).map(TStmt::Local),
            Stmt::Return(value, span) => {
                let value = match value {
                    Some(expr) => Some(self.check_expr(cx, f, expr)?),
                    None => None,
                };
                if !f.is_wrapper {
                    match (&value, &f.ret) {
                        (Some(v), Type::Void) => {
                            return Err(SemaError::invalid(
                                format!("void function should not return a value (found {})", self.type_label(&v.ty)),
                                *span,
                            ));
                        }
                        (Some(v), ret) => self.expect_type(ret, v)?,
                        (None, Type::Void) => {}
                        (None, ret) => {
                            return Err(SemaError::invalid(
                                format!("non-void function should return a value of type {}", self.type_label(ret)),
                                *span,
                            ));
                        }
                    }
                }
                Ok(TStmt::Return(value, *span))
            }
            Stmt::If {
                cond,
                then,
                otherwise,
                ..
            } => {
                let cond = self.check_condition(cx, f, cond)?;
                let then = self.check_block(cx, f, &then.stmts)?;
                let otherwise = match otherwise {
                    Some(block) => self.check_block(cx, f, &block.stmts)?,
                    None => Vec::new(),
                };
                Ok(TStmt::If {
                    cond,
                    then,
                    otherwise,
                })
            }
            Stmt::While { cond, body, .. } => {
                let cond = self.check_condition(cx, f, cond)?;
                let body = self.check_block(cx, f, &body.stmts)?;
                Ok(TStmt::While { cond, body })
            }
            Stmt::Block(block, _) => Ok(TStmt::Block(self.check_block(cx, f, &block.stmts)?)),
        }
    }

    fn check_condition(&mut self, cx: &mut Ctx, f: &mut FnCtx, cond: &Expr) -> SemaResult<TExpr> {
        let checked = self.check_expr(cx, f, cond)?;
        match checked.ty {
            Type::Int | Type::Bool | Type::Dynamic => Ok(checked),
            _ => Err(SemaError::TypeMismatch {
                expected: "bool".to_string(),
                found: self.type_label(&checked.ty),
                span: checked.span,
            }),
        }
    }

    fn declare_local(&mut self, cx: &mut Ctx, f: &mut FnCtx, var: &VarItem) -> SemaResult<DeclId> {
        let Some(owner) = f.owner else {
            return Err(SemaError::invalid("local variable outside of a function", var.span));
        };
        let ty = self.resolve_value_type(cx, &var.ty, &f.subst, var.span)?;
        let init = match &var.init {
            Some(expr) => {
                let checked = self.check_expr(cx, f, expr)?;
                self.expect_type(&ty, &checked)?;
                Some(checked)
            }
            None if var.is_const => {
                return Err(SemaError::invalid(
                    format!("const variable '{}' requires an initializer", var.name),
                    var.span,
                ));
            }
            None => None,
        };
        let id = self.insert(Decl {
            name: var.name.clone(),
            qualified: var.name.clone(),
            kind: DeclKind::Var(VarDecl {
                ty,
                init,
                is_const: var.is_const,
                is_extern: false,
                is_instantiation: false,
            }),
            context: DeclContext::Function(owner),
            origin: cx.origin,
            span: var.span,
        });
        if !f.scopes.declare(&var.name, id) {
            return Err(SemaError::Redefinition {
                name: var.name.clone(),
                span: var.span,
            });
        }
        f.locals.push(id);
        Ok(id)
    }

    // ==================== Expressions ====================

    fn check_expr(&mut self, cx: &mut Ctx, f: &mut FnCtx, expr: &Expr) -> SemaResult<TExpr> {
        match expr {
            Expr::Int(value, span) => Ok(TExpr::new(TExprKind::Int(*value), Type::Int, *span)),
            Expr::Bool(value, span) => Ok(TExpr::new(TExprKind::Bool(*value), Type::Bool, *span)),
            Expr::Name(path, span) => self.check_name(cx, f, path, *span),
            Expr::Unary { op, operand, span } => {
                let operand = self.check_expr(cx, f, operand)?;
                let ty = match op {
                    UnaryOp::Neg => Type::Int,
                    UnaryOp::Not => Type::Bool,
                };
                self.expect_type(&ty, &operand)?;
                Ok(TExpr::new(
                    TExprKind::Unary {
                        op: *op,
                        operand: Box::new(operand),
                    },
                    ty,
                    *span,
                ))
            }
            Expr::Binary { op, lhs, rhs, span } => {
                let lhs = self.check_expr(cx, f, lhs)?;
                let rhs = self.check_expr(cx, f, rhs)?;
                let ty = self.binary_type(*op, &lhs, &rhs)?;
                Ok(TExpr::new(
                    TExprKind::Binary {
                        op: *op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                    ty,
                    *span,
                ))
            }
            Expr::Assign { target, value, span } => {
                let Some(id) = self.resolve_path(cx, f, target) else {
                    return Err(SemaError::Undeclared {
                        name: target.to_string(),
                        span: *span,
                    });
                };
                let var = match self.decls.get(id).and_then(Decl::as_var) {
                    Some(var) => var.clone(),
                    None => {
                        return Err(SemaError::WrongKind {
                            name: target.to_string(),
                            what: "a variable",
                            span: *span,
                        });
                    }
                };
                if var.is_const {
                    return Err(SemaError::AssignToConst {
                        name: target.to_string(),
                        span: *span,
                    });
                }
                let value = self.check_expr(cx, f, value)?;
                self.expect_type(&var.ty, &value)?;
                Ok(TExpr::new(
                    TExprKind::Assign {
                        target: id,
                        value: Box::new(value),
                    },
                    var.ty,
                    *span,
                ))
            }
            Expr::Call {
                callee,
                type_args,
                args,
                span,
            } => self.check_call(cx, f, callee, type_args, args, *span),
            Expr::SizeOf(name, span) => {
                let ty = self.resolve_type(cx, name, &f.subst, *span)?;
                let size = self.size_of(&ty, *span)?;
                Ok(TExpr::new(TExprKind::Int(size), Type::Int, *span))
            }
        }
    }

    fn binary_type(&self, op: BinaryOp, lhs: &TExpr, rhs: &TExpr) -> SemaResult<Type> {
        if op.is_logical() {
            self.expect_type(&Type::Bool, lhs)?;
            self.expect_type(&Type::Bool, rhs)?;
            return Ok(Type::Bool);
        }
        if matches!(op, BinaryOp::Eq | BinaryOp::NotEq) {
            if !lhs.ty.is_value() {
                self.expect_type(&Type::Int, lhs)?;
            }
            self.expect_type(&lhs.ty, rhs)?;
            return Ok(Type::Bool);
        }
        self.expect_type(&Type::Int, lhs)?;
        self.expect_type(&Type::Int, rhs)?;
        Ok(if op.is_comparison() { Type::Bool } else { Type::Int })
    }

    fn check_name(&mut self, cx: &mut Ctx, f: &mut FnCtx, path: &Path, span: Span) -> SemaResult<TExpr> {
        match self.resolve_path(cx, f, path) {
            Some(id) => match self.decls.get(id).and_then(Decl::as_var) {
                Some(var) => Ok(TExpr::new(TExprKind::DeclRef(id), var.ty.clone(), span)),
                None => Err(SemaError::WrongKind {
                    name: path.to_string(),
                    what: "a variable",
                    span,
                }),
            },
            None if cx.options.dynamic_scoping => Ok(TExpr::new(
                TExprKind::Unresolved(path.to_string()),
                Type::Dynamic,
                span,
            )),
            None => Err(SemaError::Undeclared {
                name: path.to_string(),
                span,
            }),
        }
    }

    fn check_call(
        &mut self,
        cx: &mut Ctx,
        f: &mut FnCtx,
        callee: &Path,
        type_args: &[TypeName],
        args: &[Expr],
        span: Span,
    ) -> SemaResult<TExpr> {
        if !callee.is_qualified() && type_args.is_empty() {
            match callee.name() {
                "print" => return self.check_print(cx, f, args, span),
                "atexit" => return self.check_atexit(cx, f, args, span),
                _ => {}
            }
        }

        let args = args
            .iter()
            .map(|a| self.check_expr(cx, f, a))
            .collect::<SemaResult<Vec<_>>>()?;

        let Some(id) = self.resolve_path(cx, f, callee) else {
            if cx.options.dynamic_scoping {
                return Ok(TExpr::new(
                    TExprKind::UnresolvedCall {
                        name: callee.to_string(),
                        args,
                    },
                    Type::Dynamic,
                    span,
                ));
            }
            return Err(SemaError::Undeclared {
                name: callee.to_string(),
                span,
            });
        };

        let target = match self.decls.get(id).map(|d| &d.kind) {
            Some(DeclKind::Function(_)) if type_args.is_empty() => id,
            Some(DeclKind::Function(_)) => {
                return Err(SemaError::WrongKind {
                    name: callee.to_string(),
                    what: "a template",
                    span,
                });
            }
            Some(DeclKind::Template(_)) if type_args.is_empty() => {
                return Err(SemaError::invalid(
                    format!("template '{}' requires explicit template arguments", callee),
                    span,
                ));
            }
            Some(DeclKind::Template(_)) => {
                let types = type_args
                    .iter()
                    .map(|t| self.resolve_value_type(cx, t, &f.subst, span))
                    .collect::<SemaResult<Vec<_>>>()?;
                self.specialize(id, types, span)?
            }
            _ => {
                return Err(SemaError::WrongKind {
                    name: callee.to_string(),
                    what: "a function",
                    span,
                });
            }
        };

        let Some((ret, params)) = self.signature(target) else {
            return Err(SemaError::invalid(format!("'{}' is not callable", callee), span));
        };
        if params.len() != args.len() {
            return Err(SemaError::Arity {
                name: callee.to_string(),
                expected: params.len(),
                found: args.len(),
                span,
            });
        }
        for (param, arg) in params.iter().zip(&args) {
            self.expect_type(param, arg)?;
        }
        Ok(TExpr::new(TExprKind::Call { callee: target, args }, ret, span))
    }

    fn check_print(&mut self, cx: &mut Ctx, f: &mut FnCtx, args: &[Expr], span: Span) -> SemaResult<TExpr> {
        if args.len() != 1 {
            return Err(SemaError::Arity {
                name: "print".to_string(),
                expected: 1,
                found: args.len(),
                span,
            });
        }
        let value = self.check_expr(cx, f, &args[0])?;
        if !value.ty.is_value() {
            return Err(SemaError::TypeMismatch {
                expected: "a value".to_string(),
                found: self.type_label(&value.ty),
                span: value.span,
            });
        }
        Ok(TExpr::new(
            TExprKind::Builtin {
                builtin: Builtin::Print,
                args: vec![value],
            },
            Type::Void,
            span,
        ))
    }

    fn check_atexit(&mut self, cx: &mut Ctx, f: &mut FnCtx, args: &[Expr], span: Span) -> SemaResult<TExpr> {
        let [Expr::Name(path, arg_span)] = args else {
            return Err(SemaError::invalid("atexit expects the name of a function", span));
        };
        let id = self.resolve_path(cx, f, path).ok_or_else(|| SemaError::Undeclared {
            name: path.to_string(),
            span: *arg_span,
        })?;
        match self.signature(id) {
            Some((_, params)) if params.is_empty() => Ok(TExpr::new(
                TExprKind::Builtin {
                    builtin: Builtin::AtExit,
                    args: vec![TExpr::new(TExprKind::DeclRef(id), Type::Void, *arg_span)],
                },
                Type::Void,
                span,
            )),
            _ => Err(SemaError::invalid(
                format!("'{}' is not a function without parameters", path),
                *arg_span,
            )),
        }
    }

    // ==================== Templates ====================

    /// Find or create the specialization of `template` for `args`. New
    /// specializations only get a signature; the body is checked when the
    /// pending instantiations are performed.
    fn specialize(&mut self, template: DeclId, args: Vec<Type>, span: Span) -> SemaResult<DeclId> {
        let (name, qualified, context, origin, tmpl) = match self.decls.get(template) {
            Some(Decl {
                name,
                qualified,
                context,
                origin,
                kind: DeclKind::Template(tmpl),
                ..
            }) => (name.clone(), qualified.clone(), *context, *origin, tmpl.clone()),
            _ => return Err(SemaError::invalid("not a template", span)),
        };
        if tmpl.params.len() != args.len() {
            return Err(SemaError::Arity {
                name: qualified,
                expected: tmpl.params.len(),
                found: args.len(),
                span,
            });
        }
        let labels: Vec<String> = args.iter().map(|t| self.type_label(t)).collect();
        let key = format!("{}<{}>", qualified, labels.join(","));
        if let Some(existing) = tmpl
            .specializations
            .iter()
            .copied()
            .find(|s| self.decls.get(*s).is_some_and(|d| d.qualified == key))
        {
            return Ok(existing);
        }

        let subst: HashMap<String, Type> = tmpl.params.iter().cloned().zip(args.iter().cloned()).collect();
        let namespaces = namespaces_of(&qualified);
        let scope = Ctx {
            namespaces,
            context,
            ..Ctx::new(origin, CompilationOptions::default())
        };
        let ret = self.resolve_return_type(&scope, &tmpl.pattern.ret, &subst, span)?;
        let param_types = tmpl
            .pattern
            .params
            .iter()
            .map(|p| self.resolve_value_type(&scope, &p.ty, &subst, span))
            .collect::<SemaResult<Vec<_>>>()?;

        let id = self.insert(Decl {
            name: format!("{}<{}>", name, labels.join(",")),
            qualified: key.clone(),
            kind: DeclKind::Function(FunctionDecl {
                ret,
                params: Vec::new(),
                body: None,
                is_inline: tmpl.pattern.is_inline,
                is_wrapper: false,
                instantiated_from: Some(template),
                template_args: args,
                locals: Vec::new(),
            }),
            context,
            origin: DeclOrigin::Parsed,
            span,
        });
        let params = self.declare_params(&scope, id, &tmpl.pattern.params, &param_types);
        self.set_params(id, &params);
        if let Some(Decl {
            kind: DeclKind::Template(t),
            ..
        }) = self.decls.get_mut(template)
        {
            t.specializations.push(id);
        }
        self.pending.push_back(id);
        debug!(specialization = %key, "queued implicit instantiation");
        Ok(id)
    }

    fn instantiate(&mut self, spec: DeclId) -> SemaResult<()> {
        let (qualified, context, func) = match self.decls.get(spec) {
            Some(Decl {
                qualified,
                context,
                kind: DeclKind::Function(func),
                ..
            }) => (qualified.clone(), *context, func.clone()),
            _ => return Ok(()),
        };
        let Some(template) = func.instantiated_from else {
            return Ok(());
        };
        let tmpl = match self.decls.get(template).map(|d| &d.kind) {
            Some(DeclKind::Template(t)) => t.clone(),
            _ => {
                return Err(SemaError::invalid(
                    format!("template of '{}' no longer exists", qualified),
                    Span::default(),
                ));
            }
        };
        let Some(body) = &tmpl.pattern.body else {
            return Err(SemaError::invalid(
                format!("implicit instantiation of undefined template '{}'", qualified),
                tmpl.pattern.span,
            ));
        };

        let subst: HashMap<String, Type> = tmpl
            .params
            .iter()
            .cloned()
            .zip(func.template_args.iter().cloned())
            .collect();
        let params: Vec<(String, DeclId)> = func
            .params
            .iter()
            .filter_map(|p| self.decls.get(*p).map(|d| (d.name.clone(), *p)))
            .collect();
        let mut cx = Ctx {
            namespaces: namespaces_of(&qualified),
            context,
            ..Ctx::new(DeclOrigin::Parsed, CompilationOptions::default())
        };
        let mut f = FnCtx::function(spec, func.ret.clone(), subst, &params);
        let stmts = self.check_block(&mut cx, &mut f, &body.stmts)?;
        if let Some(spec_fn) = self.decls.get_mut(spec).and_then(Decl::as_function_mut) {
            spec_fn.body = Some(stmts);
            spec_fn.locals = f.locals;
        }
        trace!(specialization = %qualified, "instantiated");
        Ok(())
    }
}

/// Namespace names enclosing a qualified name.
fn namespaces_of(qualified: &str) -> Vec<String> {
    let base = qualified.split('<').next().unwrap_or(qualified);
    let mut parts: Vec<String> = base.split("::").map(str::to_string).collect();
    parts.pop();
    parts
}

impl Analyzer for Sema {
    fn parse(&mut self, source: &str, options: &CompilationOptions, consumer: &mut dyn DeclConsumer) -> ParseOutcome {
        let cx = Ctx::new(DeclOrigin::Parsed, *options);
        self.run_unit(source, cx, consumer, false)
    }

    fn import_image(&mut self, image: &SessionImage, consumer: &mut dyn DeclConsumer) -> ParseOutcome {
        let mark = self.diags.mark();
        for entry in &image.declarations {
            let cx = Ctx::new(entry.origin.into(), CompilationOptions::default());
            if self.run_unit(&entry.source, cx, consumer, true).is_failed() {
                break;
            }
        }
        self.outcome_since(mark)
    }

    fn has_pending_instantiations(&self) -> bool {
        !self.pending.is_empty()
    }

    fn perform_pending_instantiations(&mut self, consumer: &mut dyn DeclConsumer) -> ParseOutcome {
        let mark = self.diags.mark();
        let batch: Vec<DeclId> = self.pending.drain(..).collect();
        for spec in batch {
            if !self.decls.contains(spec) {
                continue;
            }
            self.created.clear();
            if let Err(err) = self.instantiate(spec) {
                self.diags.report(err.to_diagnostic());
                self.recover(&[spec]);
            }
            self.created.clear();
            consumer.handle_group(DeclGroup::single(DeclGroupKind::ImplicitInstantiation, spec));
        }
        self.outcome_since(mark)
    }

    fn discard_pending_instantiations(&mut self) {
        let pending: Vec<DeclId> = self.pending.drain(..).collect();
        for spec in pending {
            trace!(decl = %spec, "discarding pending instantiation");
            self.forget(spec);
        }
    }

    fn forget(&mut self, id: DeclId) -> bool {
        let Some(decl) = self.decls.remove(id) else {
            return false;
        };
        self.registry.unbind(&decl.qualified, id);
        self.pending.retain(|p| *p != id);
        match decl.kind {
            DeclKind::Namespace(ns) => {
                for member in ns.members.into_iter().rev() {
                    self.forget(member);
                }
            }
            DeclKind::Function(func) => {
                for local in func.locals {
                    self.decls.remove(local);
                }
                if let Some(Decl {
                    kind: DeclKind::Template(t),
                    ..
                }) = func.instantiated_from.and_then(|t| self.decls.get_mut(t))
                {
                    t.specializations.retain(|s| *s != id);
                }
            }
            DeclKind::Template(t) => {
                for spec in t.specializations {
                    self.forget(spec);
                }
            }
            DeclKind::Var(_) | DeclKind::Struct(_) => {}
        }
        trace!(decl = %id, name = %decl.qualified, "forgot declaration");
        true
    }

    fn bind_global(&mut self, id: DeclId) -> bool {
        let Some(decl) = self.decls.get_mut(id) else {
            return false;
        };
        if matches!(decl.context, DeclContext::Wrapper(_)) {
            decl.context = DeclContext::TranslationUnit;
        }
        let qualified = decl.qualified.clone();
        self.registry.bind(&qualified, id);
        true
    }

    fn ensure_runtime_decl(&mut self, support: RuntimeSupport) -> (DeclId, Option<DeclGroup>) {
        let name = support.name();
        if let Some(id) = self.registry.lookup(name) {
            return (id, None);
        }
        let id = self.decls.insert(Decl {
            name: name.to_string(),
            qualified: name.to_string(),
            kind: DeclKind::Function(FunctionDecl {
                ret: Type::Void,
                params: Vec::new(),
                body: None,
                is_inline: false,
                is_wrapper: false,
                instantiated_from: None,
                template_args: Vec::new(),
                locals: Vec::new(),
            }),
            context: DeclContext::TranslationUnit,
            origin: DeclOrigin::Parsed,
            span: Span::default(),
        });
        let value = self.decls.insert(Decl {
            name: "value".to_string(),
            qualified: "value".to_string(),
            kind: DeclKind::Var(VarDecl {
                ty: Type::Dynamic,
                init: None,
                is_const: false,
                is_extern: false,
                is_instantiation: false,
            }),
            context: DeclContext::Function(id),
            origin: DeclOrigin::Parsed,
            span: Span::default(),
        });
        if let Some(func) = self.decls.get_mut(id).and_then(Decl::as_function_mut) {
            func.params = vec![value];
            func.locals = vec![value];
        }
        self.registry.bind(name, id);
        debug!(name, "declared runtime support");
        (id, Some(DeclGroup::single(DeclGroupKind::TopLevel, id)))
    }

    fn lookup(&self, qualified: &str) -> Option<DeclId> {
        self.registry.lookup(qualified)
    }

    fn visible_names(&self) -> Vec<String> {
        self.registry.names()
    }

    fn decls(&self) -> &DeclTable {
        &self.decls
    }

    fn decls_mut(&mut self) -> &mut DeclTable {
        &mut self.decls
    }

    fn report(&mut self, diag: Diagnostic) {
        self.diags.report(diag);
    }

    fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        self.diags.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sema::CollectingConsumer;

    fn parse(sema: &mut Sema, src: &str, options: CompilationOptions) -> (ParseOutcome, CollectingConsumer) {
        let mut out = CollectingConsumer::default();
        let outcome = sema.parse(src, &options, &mut out);
        (outcome, out)
    }

    fn declare(sema: &mut Sema, src: &str) -> CollectingConsumer {
        let (outcome, out) = parse(sema, src, CompilationOptions::default());
        assert_eq!(outcome, ParseOutcome::Success, "{:?}", sema.take_diagnostics());
        out
    }

    fn kinds(out: &CollectingConsumer) -> Vec<DeclGroupKind> {
        out.groups.iter().map(|g| g.kind).collect()
    }

    #[test]
    fn test_declaration_groups() {
        let mut sema = Sema::new();
        let out = declare(&mut sema, "int x = 1; int z; virtual struct S { int a; }; int f(int v) { return v + x; }");
        assert_eq!(
            kinds(&out),
            vec![
                DeclGroupKind::TopLevel,
                DeclGroupKind::TopLevel,
                DeclGroupKind::TentativeDefinition,
                DeclGroupKind::TagDefinition,
                DeclGroupKind::VTable,
                DeclGroupKind::TopLevel,
            ]
        );
        assert!(sema.lookup("x").is_some());
        assert!(sema.lookup("f").is_some());
        assert_eq!(sema.visible_names(), vec!["S", "f", "x", "z"]);
    }

    #[test]
    fn test_wrapping_requires_extraction() {
        let mut sema = Sema::new();
        declare(&mut sema, "int x = 1;");
        let (outcome, out) = parse(&mut sema, "x + 1;", CompilationOptions::default());
        assert_eq!(outcome, ParseOutcome::Failed);
        assert!(out.groups.is_empty());

        let (outcome, out) = parse(&mut sema, "int y = 2; x + y;", CompilationOptions::wrapped());
        assert_eq!(outcome, ParseOutcome::Success);
        assert_eq!(out.groups.len(), 1);
        let wrapper = out.groups[0].decls[0];
        let func = sema.decls().get(wrapper).unwrap().as_function().unwrap();
        assert!(func.is_wrapper);
        assert!(matches!(func.body.as_deref(), Some([TStmt::Decl(_), TStmt::Expr(_)])));
        // Wrapper-level declarations stay out of the registry until extracted.
        assert!(sema.lookup("y").is_none());
    }

    #[test]
    fn test_redefinition_and_forward_declarations() {
        let mut sema = Sema::new();
        declare(&mut sema, "int f(int a);");
        let fwd = sema.lookup("f").unwrap();
        declare(&mut sema, "int f(int a) { return a; }");
        let def = sema.lookup("f").unwrap();
        assert_ne!(fwd, def);

        let (outcome, _) = parse(&mut sema, "int f(int a) { return 2; }", CompilationOptions::default());
        assert_eq!(outcome, ParseOutcome::Failed);
        let (outcome, _) = parse(&mut sema, "bool f(int a);", CompilationOptions::default());
        assert_eq!(outcome, ParseOutcome::Failed);

        assert!(sema.forget(def));
        assert_eq!(sema.lookup("f"), Some(fwd));
        assert!(!sema.forget(def));
    }

    #[test]
    fn test_failed_fragment_leaves_registry_unchanged() {
        let mut sema = Sema::new();
        declare(&mut sema, "int x = 1;");
        let before = sema.visible_names();
        let live = sema.decls().len();
        let (outcome, out) = parse(
            &mut sema,
            "int g() { return 1; } int h() { return missing; }",
            CompilationOptions::default(),
        );
        assert_eq!(outcome, ParseOutcome::Failed);
        // `g` was complete and is handed over for the caller to roll back.
        assert_eq!(out.groups.len(), 1);
        let g = out.groups[0].decls[0];
        assert!(sema.forget(g));
        assert_eq!(sema.visible_names(), before);
        assert_eq!(sema.decls().len(), live);
        let diags = sema.take_diagnostics();
        assert!(diags[0].message.contains("missing"));
    }

    #[test]
    fn test_dynamic_scoping_leaves_unresolved_names() {
        let mut sema = Sema::new();
        let opts = CompilationOptions::wrapped().dynamic_scoping(true);
        let (outcome, out) = parse(&mut sema, "later + 1;", opts);
        assert_eq!(outcome, ParseOutcome::Success);
        let wrapper = out.groups[0].decls[0];
        let body = sema.decls().get(wrapper).unwrap().as_function().unwrap().body.clone().unwrap();
        let mut unresolved = Vec::new();
        body[0].for_each_expr(&mut |e| {
            e.walk(&mut |inner| {
                if let TExprKind::Unresolved(name) = &inner.kind {
                    unresolved.push(name.clone());
                }
            })
        });
        assert_eq!(unresolved, vec!["later".to_string()]);
    }

    #[test]
    fn test_template_instantiation_is_deferred() {
        let mut sema = Sema::new();
        declare(&mut sema, "template<T> T twice(T v) { return v + v; }");
        let (outcome, out) = parse(&mut sema, "twice<int>(2);", CompilationOptions::wrapped());
        assert_eq!(outcome, ParseOutcome::Success);
        assert_eq!(kinds(&out), vec![DeclGroupKind::TopLevel]);
        assert!(sema.has_pending_instantiations());

        let mut inst = CollectingConsumer::default();
        assert_eq!(sema.perform_pending_instantiations(&mut inst), ParseOutcome::Success);
        assert!(!sema.has_pending_instantiations());
        assert_eq!(kinds(&inst), vec![DeclGroupKind::ImplicitInstantiation]);
        let spec = sema.decls().get(inst.groups[0].decls[0]).unwrap();
        assert_eq!(spec.qualified, "twice<int>");
        assert!(spec.as_function().unwrap().body.is_some());

        // The cached specialization is reused.
        parse(&mut sema, "twice<int>(5);", CompilationOptions::wrapped());
        assert!(!sema.has_pending_instantiations());
    }

    #[test]
    fn test_failed_instantiation_is_reported() {
        let mut sema = Sema::new();
        declare(&mut sema, "template<T> T neg(T v) { return -v; }");
        parse(&mut sema, "neg<bool>(true);", CompilationOptions::wrapped());
        let mut inst = CollectingConsumer::default();
        assert_eq!(sema.perform_pending_instantiations(&mut inst), ParseOutcome::Failed);
        assert_eq!(inst.groups.len(), 1);
    }

    #[test]
    fn test_discard_pending_instantiations() {
        let mut sema = Sema::new();
        declare(&mut sema, "template<T> T id(T v) { return v; }");
        parse(&mut sema, "id<int>(1);", CompilationOptions::wrapped());
        sema.discard_pending_instantiations();
        assert!(!sema.has_pending_instantiations());
        let template = sema.lookup("id").unwrap();
        match &sema.decls().get(template).unwrap().kind {
            DeclKind::Template(t) => assert!(t.specializations.is_empty()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_namespaces_and_sizeof() {
        let mut sema = Sema::new();
        let out = declare(
            &mut sema,
            "struct P { int a; int b; }; namespace geo { int scale = sizeof(P); int area(int w) { return w * scale; } }",
        );
        assert_eq!(kinds(&out), vec![DeclGroupKind::TagDefinition, DeclGroupKind::TopLevel]);
        assert!(sema.lookup("geo::scale").is_some());
        assert!(sema.lookup("scale").is_none());

        let ns = sema.lookup("geo").unwrap();
        assert!(sema.forget(ns));
        assert!(sema.lookup("geo::area").is_none());
    }

    #[test]
    fn test_unused_result_warning() {
        let mut sema = Sema::new();
        let (outcome, _) = parse(&mut sema, "int f() { 1 + 2; return 0; }", CompilationOptions::default());
        assert_eq!(outcome, ParseOutcome::SuccessWithWarnings);
        assert_eq!(sema.take_diagnostics()[0].severity, Severity::Warning);
    }

    #[test]
    fn test_runtime_decl_is_created_once() {
        let mut sema = Sema::new();
        let (id, group) = sema.ensure_runtime_decl(RuntimeSupport::Capture);
        assert!(group.is_some());
        let (again, group) = sema.ensure_runtime_decl(RuntimeSupport::Capture);
        assert_eq!(id, again);
        assert!(group.is_none());
        assert!(sema.forget(id));
        assert!(sema.ensure_runtime_decl(RuntimeSupport::Capture).1.is_some());
    }

    #[test]
    fn test_import_image_uses_deserialized_groups() {
        use crate::sema::ImageOrigin;
        let mut sema = Sema::new();
        let image = SessionImage::new()
            .with_entry(ImageOrigin::Library, "int lib(int a) { return a; }")
            .with_entry(ImageOrigin::Image, "const int k = 3;");
        let mut out = CollectingConsumer::default();
        assert_eq!(sema.import_image(&image, &mut out), ParseOutcome::Success);
        assert!(out.groups.is_empty());
        assert_eq!(out.deserialized.len(), 2);
        let lib = sema.lookup("lib").unwrap();
        assert_eq!(sema.decls().get(lib).unwrap().origin, DeclOrigin::Library);
    }
}
