//! Declaration groups and the kind tag that drives their processing.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::sema::DeclId;

/// The analyzer event that produced a declaration group.
///
/// Both the code generator and the deserialization filter react to the
/// kind; they do so through [`DeclGroupKind::dispatch`] so the two never
/// disagree about which kinds exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeclGroupKind {
    /// An ordinary top-level declaration.
    TopLevel,
    /// A struct definition became complete.
    TagDefinition,
    /// A virtual table must be materialized for a struct.
    VTable,
    /// A template specialization was instantiated.
    ImplicitInstantiation,
    /// A variable without initializer must be zero-defined.
    TentativeDefinition,
}

impl DeclGroupKind {
    pub const ALL: [DeclGroupKind; 5] = [
        DeclGroupKind::TopLevel,
        DeclGroupKind::TagDefinition,
        DeclGroupKind::VTable,
        DeclGroupKind::ImplicitInstantiation,
        DeclGroupKind::TentativeDefinition,
    ];

    /// Route one declaration to the handler for this kind.
    pub fn dispatch<H: GroupHandler + ?Sized>(self, handler: &mut H, decl: DeclId) -> Result<(), H::Error> {
        match self {
            DeclGroupKind::TopLevel => handler.top_level(decl),
            DeclGroupKind::TagDefinition => handler.tag_definition(decl),
            DeclGroupKind::VTable => handler.vtable(decl),
            DeclGroupKind::ImplicitInstantiation => handler.implicit_instantiation(decl),
            DeclGroupKind::TentativeDefinition => handler.tentative_definition(decl),
        }
    }
}

impl fmt::Display for DeclGroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeclGroupKind::TopLevel => "top-level",
            DeclGroupKind::TagDefinition => "tag-definition",
            DeclGroupKind::VTable => "vtable",
            DeclGroupKind::ImplicitInstantiation => "implicit-instantiation",
            DeclGroupKind::TentativeDefinition => "tentative-definition",
        };
        f.write_str(s)
    }
}

/// One handler per [`DeclGroupKind`].
pub trait GroupHandler {
    type Error;

    fn top_level(&mut self, decl: DeclId) -> Result<(), Self::Error>;
    fn tag_definition(&mut self, decl: DeclId) -> Result<(), Self::Error>;
    fn vtable(&mut self, decl: DeclId) -> Result<(), Self::Error>;
    fn implicit_instantiation(&mut self, decl: DeclId) -> Result<(), Self::Error>;
    fn tentative_definition(&mut self, decl: DeclId) -> Result<(), Self::Error>;
}

/// A batch of declarations produced by one analyzer callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclGroup {
    pub kind: DeclGroupKind,
    pub decls: Vec<DeclId>,
}

impl DeclGroup {
    pub fn new(kind: DeclGroupKind, decls: Vec<DeclId>) -> Self {
        Self { kind, decls }
    }

    pub fn single(kind: DeclGroupKind, decl: DeclId) -> Self {
        Self {
            kind,
            decls: vec![decl],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.decls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: Vec<(&'static str, DeclId)>,
    }

    impl GroupHandler for Recorder {
        type Error = ();

        fn top_level(&mut self, decl: DeclId) -> Result<(), ()> {
            self.seen.push(("top", decl));
            Ok(())
        }
        fn tag_definition(&mut self, decl: DeclId) -> Result<(), ()> {
            self.seen.push(("tag", decl));
            Ok(())
        }
        fn vtable(&mut self, decl: DeclId) -> Result<(), ()> {
            self.seen.push(("vtable", decl));
            Ok(())
        }
        fn implicit_instantiation(&mut self, decl: DeclId) -> Result<(), ()> {
            self.seen.push(("inst", decl));
            Ok(())
        }
        fn tentative_definition(&mut self, _decl: DeclId) -> Result<(), ()> {
            Err(())
        }
    }

    #[test]
    fn test_dispatch_routes_each_kind() {
        let mut rec = Recorder::default();
        let d = DeclId::from_raw(7);
        DeclGroupKind::TopLevel.dispatch(&mut rec, d).unwrap();
        DeclGroupKind::VTable.dispatch(&mut rec, d).unwrap();
        DeclGroupKind::ImplicitInstantiation.dispatch(&mut rec, d).unwrap();
        assert!(DeclGroupKind::TentativeDefinition.dispatch(&mut rec, d).is_err());
        assert_eq!(rec.seen, vec![("top", d), ("vtable", d), ("inst", d)]);
    }
}
