//! The analyzer interface consumed by the incremental parser.

use super::decl::{DeclId, DeclTable};
use super::diagnostics::Diagnostic;
use super::image::SessionImage;
use crate::transaction::{CompilationOptions, DeclGroup};

/// Name of the runtime hook a captured value is routed through.
pub const CAPTURE_FN: &str = "__inkling_capture";

/// Overall result of handing source text to the analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseOutcome {
    Success,
    SuccessWithWarnings,
    Failed,
}

impl ParseOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, ParseOutcome::Failed)
    }
}

/// Declarations the code generator relies on but the user never writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeSupport {
    /// `void __inkling_capture(value)`, implemented by the executor.
    Capture,
}

impl RuntimeSupport {
    pub fn name(&self) -> &'static str {
        match self {
            RuntimeSupport::Capture => CAPTURE_FN,
        }
    }
}

/// Receives declaration groups as the analyzer produces them.
pub trait DeclConsumer {
    fn handle_group(&mut self, group: DeclGroup);

    /// A group restored from a session image rather than parsed.
    fn handle_deserialized_group(&mut self, group: DeclGroup);
}

/// Consumer that keeps every group it is given, in order.
#[derive(Debug, Default)]
pub struct CollectingConsumer {
    pub groups: Vec<DeclGroup>,
    pub deserialized: Vec<DeclGroup>,
}

impl DeclConsumer for CollectingConsumer {
    fn handle_group(&mut self, group: DeclGroup) {
        self.groups.push(group);
    }

    fn handle_deserialized_group(&mut self, group: DeclGroup) {
        self.deserialized.push(group);
    }
}

/// Parser and semantic analyzer.
///
/// The analyzer owns every declaration; the rest of the engine refers to
/// them by [`DeclId`] and reads them through [`Analyzer::decls`].
pub trait Analyzer {
    /// Check `source` and hand the resulting groups to `consumer`.
    fn parse(
        &mut self,
        source: &str,
        options: &CompilationOptions,
        consumer: &mut dyn DeclConsumer,
    ) -> ParseOutcome;

    /// Bring the declarations of a session image into scope as
    /// deserialized groups.
    fn import_image(&mut self, image: &SessionImage, consumer: &mut dyn DeclConsumer) -> ParseOutcome;

    fn has_pending_instantiations(&self) -> bool;

    /// Perform the instantiations queued so far. Work queued while doing so
    /// is left for the next call.
    fn perform_pending_instantiations(&mut self, consumer: &mut dyn DeclConsumer) -> ParseOutcome;

    /// Drop queued instantiations and the specializations they would fill.
    fn discard_pending_instantiations(&mut self);

    /// Remove a declaration (and anything it owns) from every table.
    /// Returns false if it was already gone.
    fn forget(&mut self, decl: DeclId) -> bool;

    /// Make a wrapper-scoped declaration visible to later fragments.
    fn bind_global(&mut self, decl: DeclId) -> bool;

    /// Declare `support` if it does not exist yet. The group is returned
    /// only when the declaration was created by this call.
    fn ensure_runtime_decl(&mut self, support: RuntimeSupport) -> (DeclId, Option<DeclGroup>);

    fn lookup(&self, qualified: &str) -> Option<DeclId>;

    /// Every name visible to the next fragment, sorted.
    fn visible_names(&self) -> Vec<String>;

    fn decls(&self) -> &DeclTable;

    fn decls_mut(&mut self) -> &mut DeclTable;

    fn report(&mut self, diag: Diagnostic);

    fn take_diagnostics(&mut self) -> Vec<Diagnostic>;
}
