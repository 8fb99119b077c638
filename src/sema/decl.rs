//! Typed declarations and the table that owns them.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::tree::{TExpr, TStmt, Type};
use crate::ast::{FunctionItem, Span};

/// Opaque handle to a declaration in a [`DeclTable`].
///
/// Ids are never reused, so a handle to a forgotten declaration simply
/// stops resolving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeclId(u32);

impl DeclId {
    pub fn from_raw(raw: u32) -> Self {
        DeclId(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for DeclId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "decl#{}", self.0)
    }
}

/// Where a declaration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeclOrigin {
    /// Parsed from a fragment in this session.
    Parsed,
    /// Restored from a session image; no code for it exists anywhere.
    Image,
    /// Backed by an artifact already loaded into the executor.
    Library,
}

/// The scope a declaration lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeclContext {
    TranslationUnit,
    Namespace(DeclId),
    /// Written at the top level of a wrapped fragment and not yet extracted.
    Wrapper(DeclId),
    /// A parameter or block-scoped variable.
    Function(DeclId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub ty: Type,
    pub init: Option<TExpr>,
    pub is_const: bool,
    pub is_extern: bool,
    pub is_instantiation: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub ret: Type,
    /// Parameter declarations, in order.
    pub params: Vec<DeclId>,
    /// `None` for a forward declaration or an unperformed instantiation.
    pub body: Option<Vec<TStmt>>,
    pub is_inline: bool,
    pub is_wrapper: bool,
    pub instantiated_from: Option<DeclId>,
    /// Template arguments, for specializations.
    pub template_args: Vec<Type>,
    /// Every parameter and block-scoped variable, in slot order.
    pub locals: Vec<DeclId>,
}

impl FunctionDecl {
    pub fn is_instantiation(&self) -> bool {
        self.instantiated_from.is_some()
    }

    pub fn slot_of(&self, local: DeclId) -> Option<usize> {
        self.locals.iter().position(|l| *l == local)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemplateDecl {
    pub params: Vec<String>,
    /// The pattern, checked again for every specialization.
    pub pattern: FunctionItem,
    pub specializations: Vec<DeclId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructDecl {
    pub fields: Vec<(String, Type)>,
    pub is_virtual: bool,
}

impl StructDecl {
    /// Size in bytes: four per field, plus a vtable pointer if virtual.
    pub fn size(&self) -> i64 {
        let fields = self.fields.len() as i64 * 4;
        if self.is_virtual {
            fields + 8
        } else {
            fields
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NamespaceDecl {
    pub members: Vec<DeclId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeclKind {
    Var(VarDecl),
    Function(FunctionDecl),
    Template(TemplateDecl),
    Struct(StructDecl),
    Namespace(NamespaceDecl),
}

impl DeclKind {
    pub fn describe(&self) -> &'static str {
        match self {
            DeclKind::Var(_) => "variable",
            DeclKind::Function(_) => "function",
            DeclKind::Template(_) => "template",
            DeclKind::Struct(_) => "struct",
            DeclKind::Namespace(_) => "namespace",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decl {
    pub name: String,
    /// Registry key: `ns::name`, or `name<int>` for specializations.
    pub qualified: String,
    pub kind: DeclKind,
    pub context: DeclContext,
    pub origin: DeclOrigin,
    pub span: Span,
}

impl Decl {
    pub fn as_var(&self) -> Option<&VarDecl> {
        match &self.kind {
            DeclKind::Var(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionDecl> {
        match &self.kind {
            DeclKind::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_function_mut(&mut self) -> Option<&mut FunctionDecl> {
        match &mut self.kind {
            DeclKind::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Variables outside any function have static storage.
    pub fn has_global_storage(&self) -> bool {
        matches!(self.kind, DeclKind::Var(_)) && !matches!(self.context, DeclContext::Function(_))
    }

    /// True if this declaration may legally be followed by another one
    /// with the same name.
    pub fn is_redeclarable(&self) -> bool {
        match &self.kind {
            DeclKind::Var(v) => v.is_extern,
            DeclKind::Function(f) => f.body.is_none(),
            DeclKind::Namespace(_) => true,
            _ => false,
        }
    }
}

/// Owner of every declaration the analyzer has created.
#[derive(Debug, Default)]
pub struct DeclTable {
    slots: Vec<Option<Decl>>,
}

impl DeclTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, decl: Decl) -> DeclId {
        let id = DeclId(self.slots.len() as u32);
        self.slots.push(Some(decl));
        id
    }

    pub fn get(&self, id: DeclId) -> Option<&Decl> {
        self.slots.get(id.0 as usize).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: DeclId) -> Option<&mut Decl> {
        self.slots.get_mut(id.0 as usize).and_then(Option::as_mut)
    }

    pub fn remove(&mut self, id: DeclId) -> Option<Decl> {
        self.slots.get_mut(id.0 as usize).and_then(Option::take)
    }

    pub fn contains(&self, id: DeclId) -> bool {
        self.get(id).is_some()
    }

    /// Number of live declarations.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (DeclId, &Decl)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|d| (DeclId(i as u32), d)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str, is_extern: bool) -> Decl {
        Decl {
            name: name.to_string(),
            qualified: name.to_string(),
            kind: DeclKind::Var(VarDecl {
                ty: Type::Int,
                init: None,
                is_const: false,
                is_extern,
                is_instantiation: false,
            }),
            context: DeclContext::TranslationUnit,
            origin: DeclOrigin::Parsed,
            span: Span::default(),
        }
    }

    #[test]
    fn test_ids_are_not_reused() {
        let mut table = DeclTable::new();
        let a = table.insert(var("a", false));
        assert!(table.remove(a).is_some());
        assert!(table.remove(a).is_none());
        let b = table.insert(var("b", false));
        assert_ne!(a, b);
        assert!(table.get(a).is_none());
        assert_eq!(table.len(), 1);
        assert_eq!(table.iter().map(|(id, _)| id).collect::<Vec<_>>(), vec![b]);
    }

    #[test]
    fn test_redeclarable() {
        assert!(var("e", true).is_redeclarable());
        assert!(!var("v", false).is_redeclarable());
        assert!(var("v", false).has_global_storage());
    }

    #[test]
    fn test_struct_size() {
        let plain = StructDecl {
            fields: vec![("a".into(), Type::Int), ("b".into(), Type::Int)],
            is_virtual: false,
        };
        assert_eq!(plain.size(), 8);
        let virt = StructDecl {
            is_virtual: true,
            ..plain
        };
        assert_eq!(virt.size(), 16);
    }
}
