//! Tree-shaped IR handed from the code generator to the executor.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ast::{BinaryOp, UnaryOp};

/// Handle to an IR module produced by one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleId(u32);

impl ModuleId {
    pub fn from_raw(raw: u32) -> Self {
        ModuleId(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module#{}", self.0)
    }
}

/// Constant used for zero-initialized storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrConst {
    Int(i64),
    Bool(bool),
}

#[derive(Debug, Clone, PartialEq)]
pub enum IrExpr {
    Const(IrConst),
    Local(usize),
    Global(String),
    /// Symbol lookup by name when the code runs.
    Lookup(String),
    Unary(UnaryOp, Box<IrExpr>),
    Binary(BinaryOp, Box<IrExpr>, Box<IrExpr>),
    StoreLocal(usize, Box<IrExpr>),
    StoreGlobal(String, Box<IrExpr>),
    Call(String, Vec<IrExpr>),
    Print(Box<IrExpr>),
    AtExit(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum IrStmt {
    Expr(IrExpr),
    Let(usize, IrExpr),
    Return(Option<IrExpr>),
    If(IrExpr, Vec<IrStmt>, Vec<IrStmt>),
    While(IrExpr, Vec<IrStmt>),
    Block(Vec<IrStmt>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct IrFunction {
    pub name: String,
    pub params: usize,
    /// Parameters occupy the first slots.
    pub slots: usize,
    pub body: Vec<IrStmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IrGlobal {
    pub name: String,
    pub zero: IrConst,
}

/// Assignment run once when the module's static initializers run.
#[derive(Debug, Clone, PartialEq)]
pub struct IrInitializer {
    pub global: String,
    pub value: IrExpr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeInfo {
    pub name: String,
    pub size: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IrModule {
    pub id: ModuleId,
    pub name: String,
    pub functions: Vec<IrFunction>,
    pub globals: Vec<IrGlobal>,
    pub initializers: Vec<IrInitializer>,
    pub externs: Vec<String>,
    pub type_infos: Vec<TypeInfo>,
    /// Symbols of materialized virtual tables.
    pub vtables: Vec<String>,
}

impl IrModule {
    pub fn new(id: ModuleId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            functions: Vec::new(),
            globals: Vec::new(),
            initializers: Vec::new(),
            externs: Vec::new(),
            type_infos: Vec::new(),
            vtables: Vec::new(),
        }
    }

    /// Symbols this module defines.
    pub fn defined_symbols(&self) -> impl Iterator<Item = &str> {
        self.functions
            .iter()
            .map(|f| f.name.as_str())
            .chain(self.globals.iter().map(|g| g.name.as_str()))
            .chain(self.vtables.iter().map(String::as_str))
    }

    pub fn defines(&self, symbol: &str) -> bool {
        self.defined_symbols().any(|s| s == symbol)
    }

    pub fn add_extern(&mut self, symbol: &str) {
        if !self.externs.iter().any(|e| e == symbol) {
            self.externs.push(symbol.to_string());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
            && self.globals.is_empty()
            && self.externs.is_empty()
            && self.type_infos.is_empty()
            && self.vtables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defined_symbols() {
        let mut module = IrModule::new(ModuleId::from_raw(1), "m");
        assert!(module.is_empty());
        module.globals.push(IrGlobal {
            name: "x".into(),
            zero: IrConst::Int(0),
        });
        module.vtables.push("vtable.S".into());
        module.add_extern("f");
        module.add_extern("f");
        assert!(module.defines("x"));
        assert!(module.defines("vtable.S"));
        assert!(!module.defines("f"));
        assert_eq!(module.externs.len(), 1);
    }
}
