//! Syntax tree for fragments.
//!
//! These types are what the parser produces. The analyzer turns them into
//! typed declarations; nothing downstream of the analyzer sees them.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::token::Span;

/// A type as written in source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeName {
    Int,
    Bool,
    Void,
    /// A struct tag or template parameter.
    Named(String),
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeName::Int => f.write_str("int"),
            TypeName::Bool => f.write_str("bool"),
            TypeName::Void => f.write_str("void"),
            TypeName::Named(name) => f.write_str(name),
        }
    }
}

/// A possibly-qualified name, `a` or `ns::a`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Path {
    pub segments: Vec<String>,
}

impl Path {
    pub fn single(name: impl Into<String>) -> Self {
        Self {
            segments: vec![name.into()],
        }
    }

    pub fn is_qualified(&self) -> bool {
        self.segments.len() > 1
    }

    /// The last segment.
    pub fn name(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or("")
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("::"))
    }
}

/// One parsed fragment.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Fragment {
    pub items: Vec<Item>,
}

/// A top-level item.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Var(VarItem),
    Function(FunctionItem),
    Template(TemplateItem),
    Struct(StructItem),
    Namespace(NamespaceItem),
    /// A statement at top level; only meaningful when the fragment is wrapped.
    Stmt(Stmt),
}

impl Item {
    pub fn span(&self) -> Span {
        match self {
            Item::Var(v) => v.span,
            Item::Function(f) => f.span,
            Item::Template(t) => t.span,
            Item::Struct(s) => s.span,
            Item::Namespace(n) => n.span,
            Item::Stmt(s) => s.span(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarItem {
    pub name: String,
    pub ty: TypeName,
    pub init: Option<Expr>,
    pub is_const: bool,
    pub is_extern: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: TypeName,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionItem {
    pub name: String,
    pub ret: TypeName,
    pub params: Vec<Param>,
    /// `None` for a forward declaration.
    pub body: Option<Block>,
    pub is_inline: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemplateItem {
    pub params: Vec<String>,
    pub function: FunctionItem,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub ty: TypeName,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructItem {
    pub name: String,
    pub fields: Vec<Field>,
    pub is_virtual: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NamespaceItem {
    pub name: String,
    pub items: Vec<Item>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub stmts: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    Local(VarItem),
    Return(Option<Expr>, Span),
    If {
        cond: Expr,
        then: Block,
        otherwise: Option<Block>,
        span: Span,
    },
    While {
        cond: Expr,
        body: Block,
        span: Span,
    },
    Block(Block, Span),
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Expr(e) => e.span(),
            Stmt::Local(v) => v.span,
            Stmt::Return(_, span)
            | Stmt::If { span, .. }
            | Stmt::While { span, .. }
            | Stmt::Block(_, span) => *span,
        }
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::NotEq | BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64, Span),
    Bool(bool, Span),
    Name(Path, Span),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        span: Span,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        span: Span,
    },
    Assign {
        target: Path,
        value: Box<Expr>,
        span: Span,
    },
    Call {
        callee: Path,
        type_args: Vec<TypeName>,
        args: Vec<Expr>,
        span: Span,
    },
    SizeOf(TypeName, Span),
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Int(_, span)
            | Expr::Bool(_, span)
            | Expr::Name(_, span)
            | Expr::SizeOf(_, span)
            | Expr::Unary { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Assign { span, .. }
            | Expr::Call { span, .. } => *span,
        }
    }
}
