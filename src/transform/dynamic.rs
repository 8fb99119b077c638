//! Turns names the analyzer could not resolve into run-time lookups.

use tracing::debug;

use super::error::{TransformError, TransformResult};
use super::pipeline::{missing, TransformContext, Transformer};
use crate::sema::{DeclId, DeclKind, DeclTable, TExpr, TExprKind, TStmt};
use crate::transaction::Transaction;

/// Rewrites `Unresolved` names in the wrapper into `RuntimeLookup`s and
/// unresolved calls into `RuntimeCall`s. Unresolved names anywhere else
/// are an error.
pub struct DynamicLookup;

impl Transformer for DynamicLookup {
    fn name(&self) -> &str {
        "DynamicLookup"
    }

    fn transform(&self, tx: &mut Transaction, cx: &mut TransformContext<'_>) -> TransformResult<()> {
        let dynamic = tx.options().dynamic_scoping;
        let roots: Vec<DeclId> = tx.groups().iter().flat_map(|g| g.decls.iter().copied()).collect();
        let decls = cx.analyzer_mut().decls_mut();

        let mut rewritten = 0;
        for root in roots {
            rewritten += visit(decls, root, dynamic)?;
        }
        if rewritten > 0 {
            debug!(tx = %tx.id(), rewritten, "deferred names to run-time lookup");
        }
        Ok(())
    }
}

fn visit(decls: &mut DeclTable, id: DeclId, dynamic: bool) -> TransformResult<usize> {
    let decl = decls.get(id).ok_or_else(|| missing(id))?;
    let owner = decl.qualified.clone();
    match &decl.kind {
        DeclKind::Namespace(ns) => {
            let mut total = 0;
            for member in ns.members.clone() {
                total += visit(decls, member, dynamic)?;
            }
            Ok(total)
        }
        DeclKind::Var(var) => match var.init.as_ref().and_then(first_unresolved) {
            Some((name, span)) => Err(TransformError::UnresolvedOutsideWrapper { name, owner, span }),
            None => Ok(0),
        },
        DeclKind::Function(func) => {
            let Some(body) = &func.body else {
                return Ok(0);
            };
            let mut inits: Vec<DeclId> = func.locals.clone();
            for stmt in body {
                if let TStmt::Decl(d) = stmt {
                    inits.push(*d);
                }
            }
            let found = body
                .iter()
                .find_map(stmt_unresolved)
                .or_else(|| {
                    inits.iter().find_map(|d| {
                        decls
                            .get(*d)
                            .and_then(|d| d.as_var())
                            .and_then(|v| v.init.as_ref())
                            .and_then(first_unresolved)
                    })
                });
            let Some((name, span)) = found else {
                return Ok(0);
            };
            if !func.is_wrapper {
                return Err(TransformError::UnresolvedOutsideWrapper { name, owner, span });
            }
            if !dynamic {
                return Err(TransformError::DynamicScopingDisabled { name, span });
            }

            let mut count = 0;
            if let Some(body) = decls
                .get_mut(id)
                .and_then(|d| d.as_function_mut())
                .and_then(|f| f.body.as_mut())
            {
                for stmt in body.iter_mut() {
                    stmt.for_each_expr_mut(&mut |e| count += rewrite(e));
                }
            }
            for init in inits {
                if let Some(DeclKind::Var(var)) = decls.get_mut(init).map(|d| &mut d.kind) {
                    if let Some(e) = var.init.as_mut() {
                        count += rewrite(e);
                    }
                }
            }
            Ok(count)
        }
        DeclKind::Template(_) | DeclKind::Struct(_) => Ok(0),
    }
}

fn stmt_unresolved(stmt: &TStmt) -> Option<(String, crate::ast::Span)> {
    let mut found = None;
    stmt.for_each_expr(&mut |e| {
        if found.is_none() {
            found = first_unresolved(e);
        }
    });
    found
}

fn first_unresolved(expr: &TExpr) -> Option<(String, crate::ast::Span)> {
    let mut found = None;
    expr.walk(&mut |e| {
        if found.is_some() {
            return;
        }
        match &e.kind {
            TExprKind::Unresolved(name) | TExprKind::UnresolvedCall { name, .. } => {
                found = Some((name.clone(), e.span));
            }
            _ => {}
        }
    });
    found
}

fn rewrite(expr: &mut TExpr) -> usize {
    let mut count = 0;
    expr.walk_mut(&mut |e| {
        let replacement = match &mut e.kind {
            TExprKind::Unresolved(name) => TExprKind::RuntimeLookup(std::mem::take(name)),
            TExprKind::UnresolvedCall { name, args } => TExprKind::RuntimeCall {
                name: std::mem::take(name),
                args: std::mem::take(args),
            },
            _ => return,
        };
        e.kind = replacement;
        count += 1;
    });
    count
}
