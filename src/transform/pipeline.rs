//! The transformer trait and the ordered pipeline that runs it.

use std::fmt;

use tracing::{trace, warn};

use super::dynamic::DynamicLookup;
use super::empty::CheckEmptyTransaction;
use super::error::{TransformError, TransformResult};
use super::extract::DeclExtractor;
use super::value::ValueExtraction;
use crate::sema::{Analyzer, Decl, DeclId, DeclTable, Diagnostic, RuntimeSupport};
use crate::transaction::{DeclGroup, DeclGroupKind, IssuedDiags, Transaction};

/// A pass over a completed transaction.
pub trait Transformer {
    fn name(&self) -> &str;

    /// Rewrite the transaction in place. A pass either applies fully or
    /// returns an error.
    fn transform(&self, tx: &mut Transaction, cx: &mut TransformContext<'_>) -> TransformResult<()>;
}

/// What a pass can reach besides the transaction itself.
pub struct TransformContext<'a> {
    analyzer: &'a mut dyn Analyzer,
    /// Groups for runtime support declared by passes.
    side_groups: Vec<DeclGroup>,
}

impl<'a> TransformContext<'a> {
    pub fn new(analyzer: &'a mut dyn Analyzer) -> Self {
        Self {
            analyzer,
            side_groups: Vec::new(),
        }
    }

    pub fn analyzer(&self) -> &dyn Analyzer {
        &*self.analyzer
    }

    pub fn analyzer_mut(&mut self) -> &mut dyn Analyzer {
        &mut *self.analyzer
    }

    /// Make sure `support` is declared, queueing its group if this call
    /// created it.
    pub fn declare_runtime(&mut self, support: RuntimeSupport) -> DeclId {
        let (id, group) = self.analyzer.ensure_runtime_decl(support);
        if let Some(group) = group {
            self.side_groups.push(group);
        }
        id
    }

    pub fn take_side_groups(&mut self) -> Vec<DeclGroup> {
        std::mem::take(&mut self.side_groups)
    }
}

/// The synthesized wrapper of a transaction, if it has one.
pub fn find_wrapper(tx: &Transaction, decls: &DeclTable) -> Option<DeclId> {
    tx.wrapper().or_else(|| {
        tx.groups()
            .iter()
            .filter(|g| g.kind == DeclGroupKind::TopLevel)
            .flat_map(|g| g.decls.iter().copied())
            .find(|id| {
                decls
                    .get(*id)
                    .and_then(Decl::as_function)
                    .is_some_and(|f| f.is_wrapper)
            })
    })
}

/// Built-in passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassKind {
    DynamicLookup,
    DeclExtractor,
    ValueExtraction,
    CheckEmptyTransaction,
}

impl PassKind {
    /// Every built-in pass, in default order.
    pub const ALL: [PassKind; 4] = [
        PassKind::DynamicLookup,
        PassKind::DeclExtractor,
        PassKind::ValueExtraction,
        PassKind::CheckEmptyTransaction,
    ];

    pub fn build(self) -> Box<dyn Transformer> {
        match self {
            PassKind::DynamicLookup => Box::new(DynamicLookup),
            PassKind::DeclExtractor => Box::new(DeclExtractor),
            PassKind::ValueExtraction => Box::new(ValueExtraction),
            PassKind::CheckEmptyTransaction => Box::new(CheckEmptyTransaction),
        }
    }
}

impl fmt::Display for PassKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PassKind::DynamicLookup => "DynamicLookup",
            PassKind::DeclExtractor => "DeclExtractor",
            PassKind::ValueExtraction => "ValueExtraction",
            PassKind::CheckEmptyTransaction => "CheckEmptyTransaction",
        };
        f.write_str(s)
    }
}

/// Ordered list of transformers.
pub struct Pipeline {
    passes: Vec<Box<dyn Transformer>>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::from_kinds(&PassKind::ALL)
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn empty() -> Self {
        Self { passes: Vec::new() }
    }

    pub fn from_kinds(kinds: &[PassKind]) -> Self {
        Self {
            passes: kinds.iter().map(|k| k.build()).collect(),
        }
    }

    /// Append a pass; it runs after every pass already registered.
    pub fn add_pass(&mut self, pass: Box<dyn Transformer>) {
        self.passes.push(pass);
    }

    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Run every pass in order. The first failure stops the run, is
    /// reported as a diagnostic and marks the transaction with errors.
    pub fn run(&self, tx: &mut Transaction, cx: &mut TransformContext<'_>) -> TransformResult<()> {
        for pass in &self.passes {
            trace!(pass = pass.name(), tx = %tx.id(), "running transformer");
            if let Err(err) = pass.transform(tx, cx) {
                warn!(pass = pass.name(), tx = %tx.id(), error = %err, "transformer failed");
                cx.analyzer_mut().report(Diagnostic::error(err.to_string(), err.span()));
                tx.merge_diags(IssuedDiags::Errors);
                return Err(err);
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.pass_names()).finish()
    }
}

/// Remove `decl` from the transaction's groups, dropping groups left empty.
pub(crate) fn remove_from_groups(tx: &mut Transaction, decl: DeclId) {
    for group in tx.groups_mut().iter_mut() {
        group.decls.retain(|d| *d != decl);
    }
    tx.groups_mut().retain(|g| !g.is_empty());
}

pub(crate) fn missing(decl: DeclId) -> TransformError {
    TransformError::UnknownDecl(decl)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sema::{CollectingConsumer, Sema};
    use crate::transaction::{CompilationOptions, TransactionId};

    struct Failing;

    impl Transformer for Failing {
        fn name(&self) -> &str {
            "Failing"
        }

        fn transform(&self, _tx: &mut Transaction, _cx: &mut TransformContext<'_>) -> TransformResult<()> {
            Err(TransformError::Invalid("nope".into()))
        }
    }

    struct Marker;

    impl Transformer for Marker {
        fn name(&self) -> &str {
            "Marker"
        }

        fn transform(&self, tx: &mut Transaction, _cx: &mut TransformContext<'_>) -> TransformResult<()> {
            tx.merge_diags(IssuedDiags::Warnings);
            Ok(())
        }
    }

    #[test]
    fn test_default_order() {
        let pipeline = Pipeline::new();
        assert_eq!(
            pipeline.pass_names(),
            vec!["DynamicLookup", "DeclExtractor", "ValueExtraction", "CheckEmptyTransaction"]
        );
        assert!(Pipeline::empty().is_empty());
    }

    #[test]
    fn test_first_failure_short_circuits() {
        let mut pipeline = Pipeline::empty();
        pipeline.add_pass(Box::new(Failing));
        pipeline.add_pass(Box::new(Marker));

        let mut sema = Sema::new();
        let mut tx = Transaction::new(TransactionId::new(0, 0), CompilationOptions::default());
        let mut cx = TransformContext::new(&mut sema);
        let err = pipeline.run(&mut tx, &mut cx).unwrap_err();
        assert_eq!(err, TransformError::Invalid("nope".into()));
        assert_eq!(tx.issued_diags(), IssuedDiags::Errors);
        let diags = sema.take_diagnostics();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].message, "nope");
    }

    #[test]
    fn test_declare_runtime_queues_group_once() {
        let mut sema = Sema::new();
        let mut cx = TransformContext::new(&mut sema);
        let first = cx.declare_runtime(RuntimeSupport::Capture);
        let second = cx.declare_runtime(RuntimeSupport::Capture);
        assert_eq!(first, second);
        assert_eq!(cx.take_side_groups().len(), 1);
        assert!(cx.take_side_groups().is_empty());
    }

    #[test]
    fn test_find_wrapper() {
        let mut sema = Sema::new();
        let mut out = CollectingConsumer::default();
        sema.parse("int f() { return 1; } f();", &CompilationOptions::wrapped(), &mut out);
        let mut tx = Transaction::new(TransactionId::new(0, 0), CompilationOptions::wrapped());
        for group in out.groups {
            tx.append_group(group);
        }
        let wrapper = find_wrapper(&tx, sema.decls()).unwrap();
        assert!(sema.decls().get(wrapper).unwrap().name.starts_with("__inkling_wrapper_"));
    }
}
