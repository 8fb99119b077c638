//! Typed statement and expression trees produced by the analyzer.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::decl::DeclId;
use crate::ast::{BinaryOp, Span, UnaryOp};

/// Checked types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    Int,
    Bool,
    Void,
    Struct(DeclId),
    /// Only known at run time (dynamic lookups, capture arguments).
    Dynamic,
}

impl Type {
    /// Whether a value of type `other` may be used where `self` is expected.
    pub fn accepts(&self, other: &Type) -> bool {
        match (self, other) {
            (Type::Dynamic, t) | (t, Type::Dynamic) => !matches!(t, Type::Void | Type::Struct(_)),
            (a, b) => a == b,
        }
    }

    pub fn is_value(&self) -> bool {
        matches!(self, Type::Int | Type::Bool | Type::Dynamic)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => f.write_str("int"),
            Type::Bool => f.write_str("bool"),
            Type::Void => f.write_str("void"),
            Type::Struct(id) => write!(f, "struct#{}", id.raw()),
            Type::Dynamic => f.write_str("<dynamic>"),
        }
    }
}

/// Builtins that do not go through symbol lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    /// `print(e)`: append the value to the executor's output.
    Print,
    /// `atexit(f)`: register `f` to run when the owning code is unloaded.
    AtExit,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TExprKind {
    Int(i64),
    Bool(bool),
    DeclRef(DeclId),
    /// A name the analyzer could not resolve, left for the dynamic-lookup pass.
    Unresolved(String),
    /// A name resolved by symbol lookup when the code runs.
    RuntimeLookup(String),
    Unary {
        op: UnaryOp,
        operand: Box<TExpr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<TExpr>,
        rhs: Box<TExpr>,
    },
    Assign {
        target: DeclId,
        value: Box<TExpr>,
    },
    Call {
        callee: DeclId,
        args: Vec<TExpr>,
    },
    /// A call to a function the analyzer could not resolve.
    UnresolvedCall {
        name: String,
        args: Vec<TExpr>,
    },
    /// A call resolved by symbol lookup when the code runs.
    RuntimeCall {
        name: String,
        args: Vec<TExpr>,
    },
    Builtin {
        builtin: Builtin,
        args: Vec<TExpr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TExpr {
    pub kind: TExprKind,
    pub ty: Type,
    pub span: Span,
}

impl TExpr {
    pub fn new(kind: TExprKind, ty: Type, span: Span) -> Self {
        Self { kind, ty, span }
    }

    /// True if evaluating the expression can change program state.
    pub fn has_side_effects(&self) -> bool {
        match &self.kind {
            TExprKind::Int(_)
            | TExprKind::Bool(_)
            | TExprKind::DeclRef(_)
            | TExprKind::Unresolved(_)
            | TExprKind::RuntimeLookup(_) => false,
            TExprKind::Unary { operand, .. } => operand.has_side_effects(),
            TExprKind::Binary { lhs, rhs, .. } => lhs.has_side_effects() || rhs.has_side_effects(),
            TExprKind::Assign { .. }
            | TExprKind::Call { .. }
            | TExprKind::UnresolvedCall { .. }
            | TExprKind::RuntimeCall { .. }
            | TExprKind::Builtin { .. } => true,
        }
    }

    /// Visit this expression and every subexpression, parents first.
    pub fn walk_mut(&mut self, f: &mut dyn FnMut(&mut TExpr)) {
        f(self);
        match &mut self.kind {
            TExprKind::Unary { operand, .. } => operand.walk_mut(f),
            TExprKind::Binary { lhs, rhs, .. } => {
                lhs.walk_mut(f);
                rhs.walk_mut(f);
            }
            TExprKind::Assign { value, .. } => value.walk_mut(f),
            TExprKind::Call { args, .. }
            | TExprKind::UnresolvedCall { args, .. }
            | TExprKind::RuntimeCall { args, .. }
            | TExprKind::Builtin { args, .. } => {
                for arg in args {
                    arg.walk_mut(f);
                }
            }
            _ => {}
        }
    }

    /// Read-only counterpart of [`TExpr::walk_mut`].
    pub fn walk(&self, f: &mut dyn FnMut(&TExpr)) {
        f(self);
        match &self.kind {
            TExprKind::Unary { operand, .. } => operand.walk(f),
            TExprKind::Binary { lhs, rhs, .. } => {
                lhs.walk(f);
                rhs.walk(f);
            }
            TExprKind::Assign { value, .. } => value.walk(f),
            TExprKind::Call { args, .. }
            | TExprKind::UnresolvedCall { args, .. }
            | TExprKind::RuntimeCall { args, .. }
            | TExprKind::Builtin { args, .. } => {
                for arg in args {
                    arg.walk(f);
                }
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TStmt {
    Expr(TExpr),
    /// A block-scoped variable; its initializer lives on the declaration.
    Local(DeclId),
    /// A declaration written at the top level of a wrapped fragment.
    Decl(DeclId),
    Return(Option<TExpr>, Span),
    If {
        cond: TExpr,
        then: Vec<TStmt>,
        otherwise: Vec<TStmt>,
    },
    While {
        cond: TExpr,
        body: Vec<TStmt>,
    },
    Block(Vec<TStmt>),
}

impl TStmt {
    /// Visit every expression directly owned by this statement tree.
    ///
    /// Initializers of `Local`/`Decl` declarations are not visited; they
    /// belong to the declaration.
    pub fn for_each_expr_mut(&mut self, f: &mut dyn FnMut(&mut TExpr)) {
        match self {
            TStmt::Expr(e) => f(e),
            TStmt::Return(Some(e), _) => f(e),
            TStmt::If {
                cond,
                then,
                otherwise,
            } => {
                f(cond);
                for s in then.iter_mut().chain(otherwise.iter_mut()) {
                    s.for_each_expr_mut(f);
                }
            }
            TStmt::While { cond, body } => {
                f(cond);
                for s in body {
                    s.for_each_expr_mut(f);
                }
            }
            TStmt::Block(stmts) => {
                for s in stmts {
                    s.for_each_expr_mut(f);
                }
            }
            TStmt::Local(_) | TStmt::Decl(_) | TStmt::Return(None, _) => {}
        }
    }

    pub fn for_each_expr(&self, f: &mut dyn FnMut(&TExpr)) {
        match self {
            TStmt::Expr(e) => f(e),
            TStmt::Return(Some(e), _) => f(e),
            TStmt::If {
                cond,
                then,
                otherwise,
            } => {
                f(cond);
                for s in then.iter().chain(otherwise.iter()) {
                    s.for_each_expr(f);
                }
            }
            TStmt::While { cond, body } => {
                f(cond);
                for s in body {
                    s.for_each_expr(f);
                }
            }
            TStmt::Block(stmts) => {
                for s in stmts {
                    s.for_each_expr(f);
                }
            }
            TStmt::Local(_) | TStmt::Decl(_) | TStmt::Return(None, _) => {}
        }
    }

    /// Visit nested block-scoped declarations (`Local` statements).
    pub fn for_each_local(&self, f: &mut dyn FnMut(DeclId)) {
        match self {
            TStmt::Local(id) => f(*id),
            TStmt::If { then, otherwise, .. } => {
                for s in then.iter().chain(otherwise.iter()) {
                    s.for_each_local(f);
                }
            }
            TStmt::While { body, .. } | TStmt::Block(body) => {
                for s in body {
                    s.for_each_local(f);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(v: i64) -> TExpr {
        TExpr::new(TExprKind::Int(v), Type::Int, Span::default())
    }

    #[test]
    fn test_type_accepts() {
        assert!(Type::Int.accepts(&Type::Int));
        assert!(!Type::Int.accepts(&Type::Bool));
        assert!(Type::Dynamic.accepts(&Type::Bool));
        assert!(Type::Int.accepts(&Type::Dynamic));
        assert!(!Type::Dynamic.accepts(&Type::Void));
    }

    #[test]
    fn test_side_effects_and_walk() {
        let sum = TExpr::new(
            TExprKind::Binary {
                op: BinaryOp::Add,
                lhs: Box::new(int(1)),
                rhs: Box::new(TExpr::new(
                    TExprKind::Unresolved("y".into()),
                    Type::Dynamic,
                    Span::default(),
                )),
            },
            Type::Dynamic,
            Span::default(),
        );
        assert!(!sum.has_side_effects());

        let mut count = 0;
        sum.walk(&mut |_| count += 1);
        assert_eq!(count, 3);

        let mut stmt = TStmt::Expr(sum);
        stmt.for_each_expr_mut(&mut |e| {
            e.walk_mut(&mut |inner| {
                if let TExprKind::Unresolved(name) = &inner.kind {
                    inner.kind = TExprKind::RuntimeLookup(name.clone());
                }
            })
        });
        let mut lookups = 0;
        stmt.for_each_expr(&mut |e| {
            e.walk(&mut |inner| {
                if matches!(inner.kind, TExprKind::RuntimeLookup(_)) {
                    lookups += 1;
                }
            })
        });
        assert_eq!(lookups, 1);
    }
}
