//! The incremental parser: drives fragments through the transaction
//! lifecycle.
//!
//! ```text
//!   begin ──► analyze ──► end (pipeline) ──► commit ──► Committed
//!                                               │
//!                                               └─► rollback ──► released
//! ```
//!
//! Reentrant compilation (runtime support declared by a pass, deferred
//! instantiations drained at commit) opens transactions nested inside
//! the one being processed. Nesting follows the explicit open stack kept
//! here, never global state.

use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use super::callbacks::TransactionObserver;
use super::config::ParserConfig;
use super::error::{CompileError, CompileResult, FailureStage};
use super::filter::emit_deserialized;
use super::unloader::TransactionUnloader;
use crate::codegen::CodeGenerator;
use crate::jit::Executor;
use crate::sema::{Analyzer, DeclConsumer, Diagnostic, ParseOutcome, SessionImage};
use crate::transaction::{
    CompilationOptions, DeclGroup, IssuedDiags, Transaction, TransactionError, TransactionId, TransactionPool,
    TransactionResult, TransactionState, TransactionSummary,
};
use crate::transform::{Pipeline, TransformContext, Transformer};

/// How a commit attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// The transaction was rolled back and released.
    RolledBack {
        stage: FailureStage,
        state: TransactionState,
    },
}

impl CommitOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, CommitOutcome::Committed)
    }
}

/// Where the text of a fragment comes from.
enum Input<'s> {
    Source(&'s str),
    Image(&'s SessionImage),
}

/// Appends whatever the analyzer produces to one transaction.
struct GroupSink<'a> {
    tx: &'a mut Transaction,
}

impl DeclConsumer for GroupSink<'_> {
    fn handle_group(&mut self, group: DeclGroup) {
        self.tx.append_group(group);
    }

    fn handle_deserialized_group(&mut self, group: DeclGroup) {
        self.tx.append_deserialized_group(group);
    }
}

fn issued(outcome: ParseOutcome) -> IssuedDiags {
    match outcome {
        ParseOutcome::Success => IssuedDiags::None,
        ParseOutcome::SuccessWithWarnings => IssuedDiags::Warnings,
        ParseOutcome::Failed => IssuedDiags::Errors,
    }
}

/// Orchestrates analysis, transformation, code generation and execution
/// of source fragments, one transaction per fragment.
pub struct IncrementalParser {
    config: ParserConfig,
    pool: TransactionPool,
    /// Transactions begun and not yet ended, innermost last.
    open: Vec<TransactionId>,
    /// Top-level transactions in commit order.
    sequence: Vec<TransactionId>,
    pipeline: Pipeline,
    analyzer: Box<dyn Analyzer>,
    codegen: Box<dyn CodeGenerator>,
    executor: Box<dyn Executor>,
    observers: Vec<Arc<dyn TransactionObserver>>,
    last_failure: Option<FailureStage>,
}

impl IncrementalParser {
    pub fn new(
        config: ParserConfig,
        analyzer: Box<dyn Analyzer>,
        codegen: Box<dyn CodeGenerator>,
        executor: Box<dyn Executor>,
    ) -> Self {
        let pipeline = config.build_pipeline();
        debug!(passes = ?pipeline, pool_capacity = config.pool_capacity, "created incremental parser");
        Self {
            pool: TransactionPool::new(config.pool_capacity),
            config,
            open: Vec::new(),
            sequence: Vec::new(),
            pipeline,
            analyzer,
            codegen,
            executor,
            observers: Vec::new(),
            last_failure: None,
        }
    }

    // ==================== Fragments ====================

    /// Analyze, transform, generate and commit one fragment.
    ///
    /// Returns `Ok(None)` if the fragment produced nothing to commit. A
    /// fragment that fails at any stage is rolled back and reported as
    /// [`CompileError::Rejected`]; the session is left as it was.
    pub fn compile(&mut self, source: &str, options: CompilationOptions) -> CompileResult<Option<TransactionId>> {
        self.run_fragment(Input::Source(source), options)
    }

    /// Like [`IncrementalParser::compile`], without code generation.
    pub fn parse_only(&mut self, source: &str, options: CompilationOptions) -> CompileResult<Option<TransactionId>> {
        self.run_fragment(Input::Source(source), options.code_generation(false))
    }

    /// Bring a session image into scope as one transaction of
    /// deserialized groups.
    pub fn import_image(&mut self, image: &SessionImage) -> CompileResult<Option<TransactionId>> {
        self.run_fragment(Input::Image(image), CompilationOptions::default())
    }

    fn run_fragment(&mut self, input: Input<'_>, options: CompilationOptions) -> CompileResult<Option<TransactionId>> {
        self.last_failure = None;
        let id = self.begin_transaction(options);
        let outcome = {
            let tx = self.pool.get_mut(id)?;
            let mut sink = GroupSink { tx };
            match input {
                Input::Source(source) => self.analyzer.parse(source, &options, &mut sink),
                Input::Image(image) => self.analyzer.import_image(image, &mut sink),
            }
        };
        self.record_outcome(id, outcome)?;

        let Some(id) = self.end_transaction(id)? else {
            return match self.last_failure {
                Some(stage) => Err(self.rejected(stage)),
                None => Ok(None),
            };
        };
        match self.commit_transaction(id)? {
            CommitOutcome::Committed => Ok(Some(id)),
            CommitOutcome::RolledBack { stage, .. } => Err(self.rejected(stage)),
        }
    }

    /// Hand `source` to the analyzer on behalf of an open transaction.
    pub fn analyze(&mut self, id: TransactionId, source: &str) -> TransactionResult<ParseOutcome> {
        let tx = self.pool.get_mut(id)?;
        if tx.state() != TransactionState::Collecting {
            return Err(TransactionError::NotCollecting { id, state: tx.state() });
        }
        let options = *tx.options();
        let outcome = self.analyzer.parse(source, &options, &mut GroupSink { tx });
        self.record_outcome(id, outcome)?;
        Ok(outcome)
    }

    fn record_outcome(&mut self, id: TransactionId, outcome: ParseOutcome) -> TransactionResult<()> {
        self.pool.get_mut(id)?.merge_diags(issued(outcome));
        if outcome.is_failed() {
            self.last_failure.get_or_insert(FailureStage::Analysis);
        }
        trace!(tx = %id, ?outcome, "analyzed fragment");
        Ok(())
    }

    fn rejected(&mut self, stage: FailureStage) -> CompileError {
        CompileError::Rejected {
            stage,
            diagnostics: self.analyzer.take_diagnostics(),
        }
    }

    // ==================== Lifecycle ====================

    /// Open a transaction. It is nested inside the current one, if any.
    pub fn begin_transaction(&mut self, options: CompilationOptions) -> TransactionId {
        let id = self.pool.take(options);
        let parent = self.open.last().copied().filter(|p| {
            self.pool
                .get(*p)
                .is_ok_and(|tx| matches!(tx.state(), TransactionState::Collecting | TransactionState::Completed))
        });
        if let Some(parent) = parent {
            if let Ok(tx) = self.pool.get_mut(parent) {
                tx.add_nested(id);
            }
            if let Ok(tx) = self.pool.get_mut(id) {
                tx.set_parent(Some(parent));
            }
        }
        self.open.push(id);
        debug!(tx = %id, parent = ?parent, "began transaction");
        id
    }

    /// Close the current transaction and run the pipeline on it.
    ///
    /// Returns `None` if the transaction turned out empty; it has then
    /// already been recycled.
    pub fn end_transaction(&mut self, id: TransactionId) -> TransactionResult<Option<TransactionId>> {
        let tx = self.pool.get(id)?;
        if tx.state() != TransactionState::Collecting {
            return Err(TransactionError::NotCollecting { id, state: tx.state() });
        }
        let incomplete = tx
            .nested()
            .iter()
            .copied()
            .find(|child| self.pool.get(*child).is_ok_and(|c| !c.state().is_completed()));
        if let Some(child) = incomplete {
            return Err(TransactionError::NestedNotCompleted { id, child });
        }
        if self.open.last() != Some(&id) {
            return Err(TransactionError::NotCurrent { id });
        }

        if tx.is_empty() {
            self.close(id);
            self.recycle(id)?;
            trace!(tx = %id, "recycled empty transaction");
            return Ok(None);
        }
        if !tx.issued_diags().has_errors() {
            self.transform(id)?;
        }

        let tx = self.pool.get_mut(id)?;
        if tx.is_empty() {
            self.close(id);
            self.recycle(id)?;
            trace!(tx = %id, "recycled transaction emptied by the pipeline");
            return Ok(None);
        }
        tx.set_state(TransactionState::Completed);
        let nested = tx.is_nested();
        let diags = tx.issued_diags();
        self.close(id);
        if !nested {
            if let Some(prev) = self.sequence.last().copied() {
                self.pool.get_mut(prev)?.set_next(Some(id));
            }
            self.sequence.push(id);
        }
        debug!(tx = %id, nested, %diags, "completed transaction");
        Ok(Some(id))
    }

    fn transform(&mut self, id: TransactionId) -> TransactionResult<()> {
        let tx = self.pool.get_mut(id)?;
        let mut cx = TransformContext::new(self.analyzer.as_mut());
        let result = self.pipeline.run(tx, &mut cx);
        let side = cx.take_side_groups();

        if result.is_err() {
            self.last_failure.get_or_insert(FailureStage::Transform);
            // Rolled back together with the transaction.
            let tx = self.pool.get_mut(id)?;
            for group in side {
                tx.append_group(group);
            }
            return Ok(());
        }
        if !side.is_empty() {
            self.complete_side_groups(id, side)?;
        }
        Ok(())
    }

    /// Runtime support declared by a pass lands in its own transaction,
    /// nested in `parent`. It is left Completed and committed together
    /// with the parent.
    fn complete_side_groups(&mut self, parent: TransactionId, side: Vec<DeclGroup>) -> TransactionResult<()> {
        let options = *self.pool.get(parent)?.options();
        let child = self.begin_transaction(options);
        let tx = self.pool.get_mut(child)?;
        for group in side {
            tx.append_group(group);
        }
        trace!(tx = %child, %parent, "completing runtime support");
        if let Some(child) = self.end_transaction(child)? {
            if self.pool.get(child)?.issued_diags().has_errors() {
                self.pool.get_mut(parent)?.merge_diags(IssuedDiags::Errors);
            }
        }
        Ok(())
    }

    /// Commit a completed transaction, or roll it back if it carries
    /// errors or any later stage fails.
    pub fn commit_transaction(&mut self, id: TransactionId) -> TransactionResult<CommitOutcome> {
        let tx = self.pool.get(id)?;
        if tx.state() != TransactionState::Completed {
            return Err(TransactionError::NotCompleted { id, state: tx.state() });
        }
        if tx.issued_diags().has_errors() {
            let stage = self.last_failure.unwrap_or(FailureStage::Analysis);
            return self.abort(id, stage);
        }
        let options = *tx.options();
        let top_level = !tx.is_nested();
        let completed = tx.nested().to_vec();

        // Instantiations queued by this transaction's analysis are drained
        // here, before its completed children commit, so every round nests
        // directly under it.
        if !self.drain_deferred(id)? {
            let stage = self.last_failure.unwrap_or(FailureStage::Instantiation);
            return self.abort(id, stage);
        }

        for child in completed {
            if self.pool.get(child)?.state() != TransactionState::Completed {
                continue;
            }
            if !self.commit_transaction(child)?.is_committed() {
                let stage = self.last_failure.unwrap_or(FailureStage::Analysis);
                return self.abort(id, stage);
            }
        }

        if options.code_generation {
            match self.generate(id) {
                Ok(()) => {}
                Err(CompileError::Transaction(err)) => return Err(err),
                Err(err) => {
                    self.analyzer.report(Diagnostic::error(err.to_string(), None));
                    return self.abort(id, FailureStage::CodeGeneration);
                }
            }
            if top_level {
                if let Err(err) = self.executor.run_static_initializers_once() {
                    warn!(tx = %id, error = %err, "static initialization failed");
                    self.analyzer
                        .report(Diagnostic::error(format!("static initialization failed: {}", err), None));
                    return self.abort(id, FailureStage::StaticInitialization);
                }
            }
        }

        let tx = self.pool.get_mut(id)?;
        tx.set_state(TransactionState::Committed);
        for observer in &self.observers {
            observer.transaction_committed(tx);
        }
        info!(tx = %id, ulid = %tx.metadata().ulid, module = ?tx.module(), "committed transaction");
        Ok(CommitOutcome::Committed)
    }

    fn abort(&mut self, id: TransactionId, stage: FailureStage) -> TransactionResult<CommitOutcome> {
        self.last_failure = Some(stage);
        self.pool.get_mut(id)?.merge_diags(IssuedDiags::Errors);
        let state = self.rollback_transaction(id)?;
        Ok(CommitOutcome::RolledBack { stage, state })
    }

    /// Perform pending instantiations in nested transactions until none
    /// are left. Returns false if a round failed or the round cap was hit.
    fn drain_deferred(&mut self, id: TransactionId) -> TransactionResult<bool> {
        let mut rounds = 0;
        while self.analyzer.has_pending_instantiations() {
            if rounds == self.config.max_deferred_rounds {
                warn!(tx = %id, rounds, "instantiation depth exceeded");
                self.analyzer.report(Diagnostic::error(
                    format!("instantiation depth exceeded ({} rounds)", rounds),
                    None,
                ));
                self.analyzer.discard_pending_instantiations();
                self.last_failure = Some(FailureStage::Instantiation);
                return Ok(false);
            }
            rounds += 1;

            // Re-open the parent so the round nests inside it.
            self.open.push(id);
            let round = self.deferred_round(id);
            self.close(id);
            let Some(child) = round? else {
                continue;
            };
            debug!(tx = %id, %child, round = rounds, "performed deferred instantiations");
            if !self.commit_transaction(child)?.is_committed() {
                self.last_failure = Some(FailureStage::Instantiation);
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn deferred_round(&mut self, parent: TransactionId) -> TransactionResult<Option<TransactionId>> {
        let options = *self.pool.get(parent)?.options();
        let child = self.begin_transaction(options);
        let tx = self.pool.get_mut(child)?;
        let outcome = self.analyzer.perform_pending_instantiations(&mut GroupSink { tx });
        self.pool.get_mut(child)?.merge_diags(issued(outcome));
        if outcome.is_failed() {
            self.last_failure = Some(FailureStage::Instantiation);
        }
        self.end_transaction(child)
    }

    /// Lower the transaction's groups into one module and hand it to the
    /// executor.
    fn generate(&mut self, id: TransactionId) -> CompileResult<()> {
        let tx = self.pool.get(id)?;
        let mut module = self.codegen.start_module(&id.to_string());
        for group in tx.groups() {
            self.codegen.handle_group(&mut module, group, self.analyzer.decls())?;
        }
        for group in tx.deserialized_groups() {
            emit_deserialized(self.codegen.as_mut(), &mut module, group, self.analyzer.decls())?;
        }
        if module.is_empty() {
            trace!(tx = %id, "no code generated");
            return Ok(());
        }

        let module = self.codegen.finish_module(module)?;
        let module_id = module.id;
        if let Err(err) = self.executor.add_module(id, module) {
            self.codegen.forget_module(module_id);
            return Err(err.into());
        }
        self.pool.get_mut(id)?.set_module(Some(module_id));
        trace!(tx = %id, module = %module_id, "generated module");
        Ok(())
    }

    /// Revert a completed or committed transaction and release it.
    ///
    /// Top-level transactions go newest first. A nested one can only be
    /// rolled back while its parent is not yet committed.
    pub fn rollback_transaction(&mut self, id: TransactionId) -> TransactionResult<TransactionState> {
        let tx = self.pool.get(id)?;
        let state = tx.state();
        if !matches!(state, TransactionState::Completed | TransactionState::Committed) {
            return Err(TransactionError::NotCompleted { id, state });
        }
        let parent = tx.parent();
        match parent {
            None => match self.sequence.last().copied() {
                Some(newest) if newest != id => {
                    return Err(TransactionError::RollbackOutOfOrder { id, newest });
                }
                Some(_) => {}
                None => {
                    return Err(TransactionError::InvalidOperation(format!(
                        "{} is not in the transaction sequence",
                        id
                    )))
                }
            },
            Some(parent) => {
                if self.pool.get(parent)?.state() == TransactionState::Committed {
                    return Err(TransactionError::ParentCommitted { id });
                }
            }
        }

        let mut clean = self.run_destructors(id);
        self.analyzer.discard_pending_instantiations();
        clean &= TransactionUnloader::new(self.analyzer.as_mut(), self.codegen.as_mut(), self.executor.as_mut())
            .revert(&self.pool, id);

        let state = if clean {
            TransactionState::RolledBack
        } else {
            warn!(tx = %id, "transaction rolled back with errors");
            TransactionState::RolledBackWithErrors
        };
        self.pool.get_mut(id)?.set_state(state);

        match parent {
            Some(parent) => {
                if let Ok(p) = self.pool.get_mut(parent) {
                    p.remove_nested(id);
                }
            }
            None => {
                self.sequence.pop();
                if let Some(prev) = self.sequence.last().copied() {
                    self.pool.get_mut(prev)?.set_next(None);
                }
            }
        }
        self.open.retain(|open| *open != id);

        let tx = self.pool.get(id)?;
        for observer in &self.observers {
            observer.transaction_unloaded(tx);
        }
        self.pool.release(id)?;
        info!(tx = %id, %state, "rolled back transaction");
        Ok(state)
    }

    /// Run the `atexit` callbacks of `id`, then of its children most
    /// recent first.
    fn run_destructors(&mut self, id: TransactionId) -> bool {
        let mut clean = true;
        match self.executor.run_and_remove_static_destructors(id) {
            Ok(0) => {}
            Ok(ran) => debug!(tx = %id, ran, "ran static destructors"),
            Err(err) => {
                warn!(tx = %id, error = %err, "static destructor failed");
                clean = false;
            }
        }
        let nested = self.pool.get(id).map(|tx| tx.nested().to_vec()).unwrap_or_default();
        for child in nested.into_iter().rev() {
            clean &= self.run_destructors(child);
        }
        clean
    }

    /// Roll back the `count` most recent top-level transactions, newest
    /// first. Nothing is rolled back unless all of them are committed.
    pub fn unload(&mut self, count: usize) -> TransactionResult<Vec<TransactionState>> {
        let available = self
            .sequence
            .iter()
            .rev()
            .take_while(|id| {
                self.pool
                    .get(**id)
                    .is_ok_and(|tx| tx.state() == TransactionState::Committed)
            })
            .count();
        if count > available {
            return Err(TransactionError::NotEnoughTransactions {
                requested: count,
                available,
            });
        }

        let mut states = Vec::with_capacity(count);
        for _ in 0..count {
            let Some(id) = self.sequence.last().copied() else {
                break;
            };
            states.push(self.rollback_transaction(id)?);
        }
        debug!(count, remaining = self.sequence.len(), "unloaded transactions");
        Ok(states)
    }

    fn close(&mut self, id: TransactionId) {
        if self.open.last() == Some(&id) {
            self.open.pop();
        } else {
            self.open.retain(|open| *open != id);
        }
    }

    /// Detach an uncommitted transaction from its parent and release it.
    /// Declarations of nested transactions that survived (runtime support
    /// completed by a pass) are forgotten first.
    fn recycle(&mut self, id: TransactionId) -> TransactionResult<()> {
        let tx = self.pool.get(id)?;
        let parent = tx.parent();
        if !tx.nested().is_empty() {
            let clean = TransactionUnloader::new(self.analyzer.as_mut(), self.codegen.as_mut(), self.executor.as_mut())
                .revert(&self.pool, id);
            if !clean {
                warn!(tx = %id, "nested work of a recycled transaction was not fully reverted");
            }
        }
        if let Some(parent) = parent {
            if let Ok(p) = self.pool.get_mut(parent) {
                p.remove_nested(id);
            }
        }
        self.pool.release(id)
    }

    // ==================== Accessors ====================

    pub fn add_observer(&mut self, observer: Arc<dyn TransactionObserver>) {
        self.observers.push(observer);
    }

    /// Append a pass after the configured ones.
    pub fn add_transformer(&mut self, pass: Box<dyn Transformer>) {
        self.pipeline.add_pass(pass);
    }

    pub fn transaction(&self, id: TransactionId) -> TransactionResult<&Transaction> {
        self.pool.get(id)
    }

    /// The innermost open transaction.
    pub fn current(&self) -> Option<TransactionId> {
        self.open.last().copied()
    }

    pub fn last_transaction(&self) -> Option<TransactionId> {
        self.sequence.last().copied()
    }

    /// Top-level transactions, oldest first.
    pub fn sequence(&self) -> &[TransactionId] {
        &self.sequence
    }

    pub fn committed_count(&self) -> usize {
        self.sequence
            .iter()
            .filter(|id| {
                self.pool
                    .get(**id)
                    .is_ok_and(|tx| tx.state() == TransactionState::Committed)
            })
            .count()
    }

    /// Structure of every top-level transaction and what is nested in it.
    pub fn summaries(&self) -> TransactionResult<Vec<TransactionSummary>> {
        self.sequence.iter().map(|id| self.pool.summary(*id)).collect()
    }

    pub fn pool(&self) -> &TransactionPool {
        &self.pool
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn analyzer(&self) -> &dyn Analyzer {
        self.analyzer.as_ref()
    }

    pub fn analyzer_mut(&mut self) -> &mut dyn Analyzer {
        self.analyzer.as_mut()
    }

    pub fn codegen(&self) -> &dyn CodeGenerator {
        self.codegen.as_ref()
    }

    pub fn executor(&self) -> &dyn Executor {
        self.executor.as_ref()
    }

    pub fn executor_mut(&mut self) -> &mut dyn Executor {
        self.executor.as_mut()
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        self.analyzer.take_diagnostics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::IrGen;
    use crate::incremental::{ObservedEvent, TransactionLog};
    use crate::jit::{Jit, Value};
    use crate::sema::Sema;
    use crate::transaction::DeclGroupKind;

    fn parser_with(config: ParserConfig) -> IncrementalParser {
        IncrementalParser::new(config, Box::new(Sema::new()), Box::new(IrGen::new()), Box::new(Jit::new()))
    }

    fn parser() -> IncrementalParser {
        parser_with(ParserConfig::default())
    }

    fn stage(err: CompileError) -> FailureStage {
        match err {
            CompileError::Rejected { stage, .. } => stage,
            other => panic!("expected a rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_declarations_commit_and_join_sequence() {
        let mut p = parser();
        let a = p.compile("int x = 1;", CompilationOptions::default()).unwrap().unwrap();
        let b = p.compile("int f() { return x; }", CompilationOptions::default()).unwrap().unwrap();
        assert_eq!(p.sequence(), &[a, b]);
        assert_eq!(p.transaction(a).unwrap().next(), Some(b));
        assert_eq!(p.transaction(b).unwrap().state(), TransactionState::Committed);
        assert_eq!(p.transaction(a).unwrap().groups()[0].kind, DeclGroupKind::TopLevel);
        assert!(p.executor().resolve_symbol("f").is_some());
        assert_eq!(p.executor_mut().run_function(b, "f").unwrap(), Some(Value::Int(1)));
        assert_eq!(p.committed_count(), 2);
        assert!(p.current().is_none());
    }

    #[test]
    fn test_empty_fragment_is_recycled() {
        let mut p = parser();
        assert_eq!(p.compile("{ { } }", CompilationOptions::wrapped()).unwrap(), None);
        assert_eq!(p.compile("", CompilationOptions::default()).unwrap(), None);
        assert!(p.sequence().is_empty());
        assert_eq!(p.pool().live(), 0);
        assert!(p.analyzer().visible_names().is_empty());
    }

    #[test]
    fn test_analysis_failure_is_rejected() {
        let mut p = parser();
        p.compile("int x = 1;", CompilationOptions::default()).unwrap();
        let err = p
            .compile("int g() { return 1; } int h() { return missing; }", CompilationOptions::default())
            .unwrap_err();
        assert!(err.diagnostics()[0].message.contains("missing"));
        assert_eq!(stage(err), FailureStage::Analysis);
        assert_eq!(p.sequence().len(), 1);
        assert_eq!(p.analyzer().visible_names(), vec!["x"]);
        assert!(p.executor().resolve_symbol("g").is_none());
        assert_eq!(p.pool().live(), 1);
    }

    #[test]
    fn test_nested_must_complete_before_parent() {
        let mut p = parser();
        let parent = p.begin_transaction(CompilationOptions::default());
        let child = p.begin_transaction(CompilationOptions::default());
        assert_eq!(p.transaction(child).unwrap().parent(), Some(parent));
        assert_eq!(
            p.end_transaction(parent).unwrap_err(),
            TransactionError::NestedNotCompleted { id: parent, child }
        );
        // Nothing moved.
        assert_eq!(p.current(), Some(child));
        assert_eq!(p.transaction(parent).unwrap().state(), TransactionState::Collecting);

        assert_eq!(p.end_transaction(child).unwrap(), None);
        assert!(p.transaction(parent).unwrap().nested().is_empty());
        assert_eq!(p.end_transaction(parent).unwrap(), None);
        assert_eq!(p.pool().live(), 0);
    }

    #[test]
    fn test_explicit_nesting_commits_child_first() {
        let mut p = parser();
        let log = Arc::new(TransactionLog::new());
        p.add_observer(log.clone());

        let outer = p.begin_transaction(CompilationOptions::default());
        p.analyze(outer, "int base = 40;").unwrap();
        let inner = p.begin_transaction(CompilationOptions::default());
        p.analyze(inner, "int more() { return base + 2; }").unwrap();
        assert_eq!(p.end_transaction(inner).unwrap(), Some(inner));
        assert_eq!(p.end_transaction(outer).unwrap(), Some(outer));
        assert_eq!(p.sequence(), &[outer]);

        assert!(p.commit_transaction(outer).unwrap().is_committed());
        assert_eq!(
            log.events(),
            vec![ObservedEvent::Committed(inner), ObservedEvent::Committed(outer)]
        );
        assert_eq!(p.executor_mut().run_function(outer, "more").unwrap(), Some(Value::Int(42)));

        // Nested transactions are not separately addressable.
        assert_eq!(
            p.rollback_transaction(inner).unwrap_err(),
            TransactionError::ParentCommitted { id: inner }
        );
        p.unload(1).unwrap();
        assert!(p.analyzer().visible_names().is_empty());
        assert!(p.executor().resolve_symbol("more").is_none());
        assert_eq!(log.unloaded(), 1);
        assert_eq!(p.pool().live(), 0);
    }

    #[test]
    fn test_rollback_is_lifo() {
        let mut p = parser();
        let a = p.compile("int a = 1;", CompilationOptions::default()).unwrap().unwrap();
        let b = p.compile("int b = 2;", CompilationOptions::default()).unwrap().unwrap();
        assert_eq!(
            p.rollback_transaction(a).unwrap_err(),
            TransactionError::RollbackOutOfOrder { id: a, newest: b }
        );
        assert_eq!(
            p.unload(3).unwrap_err(),
            TransactionError::NotEnoughTransactions {
                requested: 3,
                available: 2
            }
        );
        assert_eq!(p.sequence().len(), 2);

        assert_eq!(
            p.unload(2).unwrap(),
            vec![TransactionState::RolledBack, TransactionState::RolledBack]
        );
        assert!(p.sequence().is_empty());
        assert!(p.transaction(a).unwrap_err().is_stale());
    }

    #[test]
    fn test_deferred_instantiation_commits_nested_first() {
        let mut p = parser();
        let log = Arc::new(TransactionLog::new());
        p.compile("template<T> T twice(T v) { return v + v; }", CompilationOptions::default())
            .unwrap();
        p.add_observer(log.clone());

        let id = p.compile("twice<int>(4);", CompilationOptions::wrapped()).unwrap().unwrap();
        let nested = p.transaction(id).unwrap().nested().to_vec();
        assert_eq!(nested.len(), 2, "runtime support and one instantiation round");
        for child in &nested {
            let child = p.transaction(*child).unwrap();
            assert_eq!(child.state(), TransactionState::Committed);
            assert!(child.nested().is_empty());
        }
        assert_eq!(
            p.transaction(nested[1]).unwrap().groups()[0].kind,
            DeclGroupKind::ImplicitInstantiation
        );
        let events = log.events();
        assert_eq!(events.last(), Some(&ObservedEvent::Committed(id)));
        assert_eq!(events.len(), 3);
        assert!(p.executor().resolve_symbol("twice<int>").is_some());

        p.unload(1).unwrap();
        assert!(p.analyzer().lookup("twice<int>").is_none());
        assert!(p.executor().resolve_symbol("twice<int>").is_none());
        assert!(p.analyzer().lookup("twice").is_some());
    }

    #[test]
    fn test_deferred_rounds_are_capped() {
        let mut p = parser_with(ParserConfig::default().max_deferred_rounds(0));
        p.compile("template<T> T id(T v) { return v; }", CompilationOptions::default())
            .unwrap();
        let err = p.compile("id<int>(1);", CompilationOptions::wrapped()).unwrap_err();
        assert!(err.diagnostics().iter().any(|d| d.message.contains("instantiation depth exceeded")));
        assert_eq!(stage(err), FailureStage::Instantiation);
        assert!(p.analyzer().lookup("id<int>").is_none());
        assert_eq!(p.sequence().len(), 1);
    }

    #[test]
    fn test_failed_instantiation_rolls_back_parent() {
        let mut p = parser();
        p.compile("template<T> T neg(T v) { return -v; }", CompilationOptions::default())
            .unwrap();
        let err = p.compile("neg<bool>(true);", CompilationOptions::wrapped()).unwrap_err();
        assert_eq!(stage(err), FailureStage::Instantiation);
        assert!(p.analyzer().lookup("neg<bool>").is_none());
        assert_eq!(p.sequence().len(), 1);
        assert_eq!(p.pool().live(), 1);
    }

    #[test]
    fn test_codegen_failure_rolls_back() {
        let config = ParserConfig::default().passes(vec![crate::transform::PassKind::ValueExtraction]);
        let mut p = parser_with(config);
        let err = p.compile("int y = 2; y;", CompilationOptions::wrapped()).unwrap_err();
        assert!(err.diagnostics().iter().any(|d| d.message.contains("wrapper")));
        assert_eq!(stage(err), FailureStage::CodeGeneration);
        assert!(p.sequence().is_empty());
        assert!(p.analyzer().visible_names().is_empty());
        assert!(p.analyzer().lookup(crate::sema::CAPTURE_FN).is_none());
    }

    #[test]
    fn test_static_initializer_failure_rolls_back() {
        let mut p = parser();
        let err = p.compile("int zero = 0; int d = 1 / zero;", CompilationOptions::default()).unwrap_err();
        assert_eq!(stage(err), FailureStage::StaticInitialization);
        assert!(p.analyzer().lookup("d").is_none());
        assert!(p.executor().resolve_symbol("zero").is_none());

        // The session is usable afterwards.
        p.compile("int d = 5;", CompilationOptions::default()).unwrap().unwrap();
    }

    #[test]
    fn test_parse_only_skips_code_generation() {
        let mut p = parser();
        let id = p.parse_only("int p = 3;", CompilationOptions::default()).unwrap().unwrap();
        assert_eq!(p.transaction(id).unwrap().module(), None);
        assert!(p.analyzer().lookup("p").is_some());
        assert!(p.executor().resolve_symbol("p").is_none());
    }

    /// Drops every group, leaving nothing to commit.
    struct DropEverything;

    impl Transformer for DropEverything {
        fn name(&self) -> &str {
            "DropEverything"
        }

        fn transform(&self, tx: &mut Transaction, _cx: &mut TransformContext<'_>) -> crate::transform::TransformResult<()> {
            tx.groups_mut().clear();
            Ok(())
        }
    }

    #[test]
    fn test_emptied_fragment_forgets_runtime_support() {
        let mut p = parser();
        let log = Arc::new(TransactionLog::new());
        p.add_observer(log.clone());
        p.add_transformer(Box::new(DropEverything));

        assert_eq!(p.compile("1 + 1;", CompilationOptions::wrapped()).unwrap(), None);
        assert!(p.sequence().is_empty());
        assert_eq!(p.pool().live(), 0);
        assert!(p.analyzer().lookup(crate::sema::CAPTURE_FN).is_none());
        assert!(p.analyzer().visible_names().is_empty());
        assert!(log.events().is_empty());
    }

    #[test]
    fn test_failing_destructor_rolls_back_with_errors() {
        let mut p = parser();
        p.compile(
            "int zero = 0; void boom() { print(1 / zero); } int arm() { atexit(boom); return 0; } int armed = arm();",
            CompilationOptions::default(),
        )
        .unwrap()
        .unwrap();

        assert_eq!(p.unload(1).unwrap(), vec![TransactionState::RolledBackWithErrors]);
        assert!(p.sequence().is_empty());
        assert!(p.analyzer().lookup("armed").is_none());
        assert!(p.executor().resolve_symbol("boom").is_none());
        assert_eq!(p.pool().live(), 0);
    }

    #[test]
    fn test_warnings_do_not_block_commit() {
        let mut p = parser();
        let id = p
            .compile("int f() { 1 + 2; return 7; }", CompilationOptions::default())
            .unwrap()
            .unwrap();
        let tx = p.transaction(id).unwrap();
        assert_eq!(tx.state(), TransactionState::Committed);
        assert_eq!(tx.issued_diags(), IssuedDiags::Warnings);
        assert_eq!(p.executor_mut().run_function(id, "f").unwrap(), Some(Value::Int(7)));
        assert_eq!(p.sequence(), &[id]);
    }

    #[test]
    fn test_summaries_serialize() {
        let mut p = parser();
        p.compile("1 + 1;", CompilationOptions::wrapped()).unwrap();
        let summaries = p.summaries().unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].nested.len(), 1);
        assert!(summaries[0].wrapper.is_some());
        assert!(summaries[0].to_json().unwrap().contains("Committed"));
    }
}
