//! Name binding for declarations visible to later fragments.

use std::collections::HashMap;

use super::decl::DeclId;

/// Global name registry.
///
/// Each qualified name maps to a stack of bindings so that removing the
/// newest one (a definition following a forward declaration, say) makes
/// the older one visible again.
#[derive(Debug, Default)]
pub struct Registry {
    names: HashMap<String, Vec<DeclId>>,
}

impl Registry {
    pub fn bind(&mut self, name: &str, id: DeclId) {
        let stack = self.names.entry(name.to_string()).or_default();
        if !stack.contains(&id) {
            stack.push(id);
        }
    }

    /// Remove `id` wherever it is bound. Returns false if it was not bound.
    pub fn unbind(&mut self, name: &str, id: DeclId) -> bool {
        let Some(stack) = self.names.get_mut(name) else {
            return false;
        };
        let before = stack.len();
        stack.retain(|d| *d != id);
        let removed = stack.len() != before;
        if stack.is_empty() {
            self.names.remove(name);
        }
        removed
    }

    pub fn lookup(&self, name: &str) -> Option<DeclId> {
        self.names.get(name).and_then(|s| s.last().copied())
    }

    pub fn is_bound(&self, name: &str, id: DeclId) -> bool {
        self.names.get(name).is_some_and(|s| s.contains(&id))
    }

    /// Every currently visible name, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.names.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Lexical scopes of the function body being checked.
#[derive(Debug, Default)]
pub struct LocalScopes {
    frames: Vec<HashMap<String, DeclId>>,
}

impl LocalScopes {
    pub fn push(&mut self) {
        self.frames.push(HashMap::new());
    }

    pub fn pop(&mut self) {
        self.frames.pop();
    }

    pub fn declare(&mut self, name: &str, id: DeclId) -> bool {
        match self.frames.last_mut() {
            Some(frame) => frame.insert(name.to_string(), id).is_none(),
            None => false,
        }
    }

    pub fn lookup(&self, name: &str) -> Option<DeclId> {
        self.frames.iter().rev().find_map(|f| f.get(name).copied())
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbind_restores_shadowed() {
        let mut reg = Registry::default();
        let fwd = DeclId::from_raw(1);
        let def = DeclId::from_raw(2);
        reg.bind("f", fwd);
        reg.bind("f", def);
        assert_eq!(reg.lookup("f"), Some(def));
        assert!(reg.unbind("f", def));
        assert_eq!(reg.lookup("f"), Some(fwd));
        assert!(reg.unbind("f", fwd));
        assert_eq!(reg.lookup("f"), None);
        assert!(!reg.unbind("f", fwd));
        assert!(reg.names().is_empty());
    }

    #[test]
    fn test_local_scopes() {
        let mut scopes = LocalScopes::default();
        scopes.push();
        assert!(scopes.declare("a", DeclId::from_raw(1)));
        scopes.push();
        assert!(scopes.declare("a", DeclId::from_raw(2)));
        assert_eq!(scopes.lookup("a"), Some(DeclId::from_raw(2)));
        scopes.pop();
        assert_eq!(scopes.lookup("a"), Some(DeclId::from_raw(1)));
        assert!(!scopes.declare("a", DeclId::from_raw(3)));
    }
}
