//! Reverts what a committed transaction contributed to the session.

use std::collections::HashSet;

use tracing::{debug, trace, warn};

use crate::codegen::CodeGenerator;
use crate::jit::Executor;
use crate::sema::{Analyzer, DeclId};
use crate::transaction::{TransactionId, TransactionPool};

/// Detaches a transaction tree from the analyzer, code generator and
/// executor. Destructors must already have run; the unloader only
/// forgets.
pub struct TransactionUnloader<'a> {
    analyzer: &'a mut dyn Analyzer,
    codegen: &'a mut dyn CodeGenerator,
    executor: &'a mut dyn Executor,
}

impl<'a> TransactionUnloader<'a> {
    pub fn new(
        analyzer: &'a mut dyn Analyzer,
        codegen: &'a mut dyn CodeGenerator,
        executor: &'a mut dyn Executor,
    ) -> Self {
        Self {
            analyzer,
            codegen,
            executor,
        }
    }

    /// Revert `id`, then its nested children most recent first. Returns
    /// false if anything could not be fully reversed; the remaining steps
    /// still run.
    pub fn revert(&mut self, pool: &TransactionPool, id: TransactionId) -> bool {
        let tx = match pool.get(id) {
            Ok(tx) => tx,
            Err(err) => {
                warn!(tx = %id, error = %err, "cannot unload transaction");
                return false;
            }
        };

        let mut seen = HashSet::new();
        let decls: Vec<DeclId> = tx.decls().filter(|d| seen.insert(*d)).collect();
        for decl in decls.into_iter().rev() {
            if !self.analyzer.forget(decl) {
                // Owned by a declaration forgotten earlier in this loop.
                trace!(tx = %id, %decl, "declaration already forgotten");
            }
        }

        let mut clean = true;
        if let Some(module) = tx.module() {
            let forgotten = self.codegen.forget_module(module);
            let removed = self.executor.remove_module(module);
            if !forgotten || !removed {
                warn!(tx = %id, %module, forgotten, removed, "module was not fully unloaded");
                clean = false;
            }
        }

        for child in tx.nested().iter().rev() {
            clean &= self.revert(pool, *child);
        }
        debug!(tx = %id, clean, "reverted transaction");
        clean
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::IrGen;
    use crate::jit::Jit;
    use crate::sema::{CollectingConsumer, Sema};
    use crate::transaction::CompilationOptions;

    fn commit(
        pool: &mut TransactionPool,
        sema: &mut Sema,
        gen: &mut IrGen,
        jit: &mut Jit,
        src: &str,
    ) -> TransactionId {
        let id = pool.take(CompilationOptions::default());
        let mut out = CollectingConsumer::default();
        assert!(!sema.parse(src, &CompilationOptions::default(), &mut out).is_failed());
        let mut module = gen.start_module("t");
        for group in &out.groups {
            gen.handle_group(&mut module, group, sema.decls()).unwrap();
        }
        let module = gen.finish_module(module).unwrap();
        let module_id = module.id;
        jit.add_module(id, module).unwrap();
        let tx = pool.get_mut(id).unwrap();
        for group in out.groups {
            tx.append_group(group);
        }
        tx.set_module(Some(module_id));
        id
    }

    #[test]
    fn test_revert_forgets_declarations_and_code() {
        let mut pool = TransactionPool::default();
        let mut sema = Sema::new();
        let mut gen = IrGen::new();
        let mut jit = Jit::new();

        commit(&mut pool, &mut sema, &mut gen, &mut jit, "int x = 1;");
        let before = sema.visible_names();
        let id = commit(
            &mut pool,
            &mut sema,
            &mut gen,
            &mut jit,
            "namespace geo { int w = 2; } int f() { return x; }",
        );
        assert!(jit.resolve_symbol("f").is_some());

        let mut unloader = TransactionUnloader::new(&mut sema, &mut gen, &mut jit);
        assert!(unloader.revert(&pool, id));
        assert_eq!(sema.visible_names(), before);
        assert!(jit.resolve_symbol("f").is_none());
        assert!(jit.resolve_symbol("geo::w").is_none());
        assert!(jit.resolve_symbol("x").is_some());
        assert_eq!(gen.module_count(), 1);
    }

    #[test]
    fn test_revert_reports_missing_module() {
        let mut pool = TransactionPool::default();
        let mut sema = Sema::new();
        let mut gen = IrGen::new();
        let mut jit = Jit::new();
        let id = commit(&mut pool, &mut sema, &mut gen, &mut jit, "int y = 2;");
        let module = pool.get(id).unwrap().module().unwrap();
        assert!(jit.remove_module(module));

        let mut unloader = TransactionUnloader::new(&mut sema, &mut gen, &mut jit);
        assert!(!unloader.revert(&pool, id));
        assert!(sema.lookup("y").is_none());
        assert_eq!(gen.module_count(), 0);
    }
}
