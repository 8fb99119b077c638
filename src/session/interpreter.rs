//! The interpreter facade: an [`IncrementalParser`] wired to the built-in
//! analyzer, code generator and executor.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::error::{InterpreterError, InterpreterResult};
use crate::codegen::{CodeGenerator, IrGen};
use crate::incremental::{CompileError, FailureStage, IncrementalParser, ParserConfig, TransactionObserver};
use crate::jit::{Jit, Value, DEFAULT_CALL_DEPTH};
use crate::sema::{Analyzer, CollectingConsumer, Diagnostic, Sema, SessionImage, CAPTURE_FN};
use crate::transaction::{CompilationOptions, TransactionId, ValuePrinting};
use crate::transform::captured_expr;

/// Interpreter configuration.
#[derive(Debug, Clone)]
pub struct InterpreterConfig {
    /// Resolve names unknown at compile time when the fragment runs.
    pub dynamic_scoping: bool,
    /// Take fragments as plain declarations, without wrapping.
    pub raw_input: bool,
    /// Printing policy for [`Interpreter::process`].
    pub value_printing: ValuePrinting,
    /// Log each fragment at debug level.
    pub verbose: bool,
    /// Nested call limit of the executor.
    pub call_depth: usize,
    pub parser: ParserConfig,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            dynamic_scoping: false,
            raw_input: false,
            value_printing: ValuePrinting::Auto,
            verbose: false,
            call_depth: DEFAULT_CALL_DEPTH,
            parser: ParserConfig::default(),
        }
    }
}

impl InterpreterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dynamic_scoping(mut self, value: bool) -> Self {
        self.dynamic_scoping = value;
        self
    }

    pub fn raw_input(mut self, value: bool) -> Self {
        self.raw_input = value;
        self
    }

    pub fn value_printing(mut self, value: ValuePrinting) -> Self {
        self.value_printing = value;
        self
    }

    pub fn verbose(mut self, value: bool) -> Self {
        self.verbose = value;
        self
    }

    pub fn call_depth(mut self, value: usize) -> Self {
        self.call_depth = value;
        self
    }

    pub fn parser(mut self, value: ParserConfig) -> Self {
        self.parser = value;
        self
    }
}

/// An interactive session.
pub struct Interpreter {
    parser: IncrementalParser,
    output: Arc<Mutex<String>>,
    config: InterpreterConfig,
}

impl Interpreter {
    pub fn new() -> Self {
        Self::with_config(InterpreterConfig::default())
    }

    pub fn with_config(config: InterpreterConfig) -> Self {
        let jit = Jit::new().with_call_depth(config.call_depth);
        let output = jit.output_handle();
        let parser = IncrementalParser::new(
            config.parser.clone(),
            Box::new(Sema::new()),
            Box::new(IrGen::new()),
            Box::new(jit),
        );
        Self { parser, output, config }
    }

    /// Compile and run one fragment under the configured options,
    /// returning the value of its trailing expression.
    pub fn process(&mut self, source: &str) -> InterpreterResult<Option<Value>> {
        let options = if self.config.raw_input {
            self.base_options()
        } else {
            self.base_options()
                .declaration_extraction(true)
                .result_evaluation(true)
                .value_printing(self.config.value_printing)
        };
        self.execute(source, options)
    }

    /// Compile a fragment of declarations. Nothing is wrapped or run
    /// apart from static initializers.
    pub fn declare(&mut self, source: &str) -> InterpreterResult<Option<TransactionId>> {
        Ok(self.parser.compile(source, self.base_options())?)
    }

    /// Compute the value of `source` without printing it.
    pub fn evaluate(&mut self, source: &str) -> InterpreterResult<Option<Value>> {
        let options = self.wrapped_options().value_printing(ValuePrinting::Disabled);
        self.execute(source, options)
    }

    /// Like [`Interpreter::evaluate`], always printing the value.
    pub fn echo(&mut self, source: &str) -> InterpreterResult<Option<Value>> {
        let options = self.wrapped_options().value_printing(ValuePrinting::Enabled);
        self.execute(source, options)
    }

    /// Analyze and commit `source` without generating code for it.
    pub fn parse(&mut self, source: &str) -> InterpreterResult<Option<TransactionId>> {
        Ok(self.parser.parse_only(source, self.wrapped_options())?)
    }

    /// Undo the `count` most recent fragments. Returns how many were
    /// unloaded.
    pub fn unload(&mut self, count: usize) -> InterpreterResult<usize> {
        let states = self.parser.unload(count)?;
        info!(count = states.len(), "unloaded fragments");
        Ok(states.len())
    }

    /// Read a session image from disk and bring it into scope.
    pub fn load_image(&mut self, path: &Path) -> InterpreterResult<Option<TransactionId>> {
        let image = SessionImage::load(path)?;
        info!(path = %path.display(), entries = image.declarations.len(), "loading session image");
        self.load_image_from(&image)
    }

    /// Preload the library part of `image` into the executor, then import
    /// every entry as one transaction.
    pub fn load_image_from(&mut self, image: &SessionImage) -> InterpreterResult<Option<TransactionId>> {
        let mut library = image.library_entries().peekable();
        if library.peek().is_some() {
            let mut sema = Sema::new();
            let mut gen = IrGen::new();
            let mut module = gen.start_module("library");
            for entry in library {
                let mut out = CollectingConsumer::default();
                if sema.parse(&entry.source, &CompilationOptions::default(), &mut out).is_failed() {
                    return Err(CompileError::Rejected {
                        stage: FailureStage::Analysis,
                        diagnostics: sema.take_diagnostics(),
                    }
                    .into());
                }
                for group in &out.groups {
                    gen.handle_group(&mut module, group, sema.decls())?;
                }
            }
            let module = gen.finish_module(module)?;
            debug!(module = %module.id, functions = module.functions.len(), "built library artifact");
            self.parser.executor_mut().load_library(module)?;
        }
        Ok(self.parser.import_image(image)?)
    }

    /// Everything `print` and value printing wrote since the last call.
    pub fn take_output(&self) -> String {
        std::mem::take(&mut *self.output.lock())
    }

    pub fn add_observer(&mut self, observer: Arc<dyn TransactionObserver>) {
        self.parser.add_observer(observer);
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        self.parser.take_diagnostics()
    }

    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    pub fn parser(&self) -> &IncrementalParser {
        &self.parser
    }

    pub fn parser_mut(&mut self) -> &mut IncrementalParser {
        &mut self.parser
    }

    // ==================== Internals ====================

    fn base_options(&self) -> CompilationOptions {
        CompilationOptions::default().dynamic_scoping(self.config.dynamic_scoping)
    }

    fn wrapped_options(&self) -> CompilationOptions {
        self.base_options()
            .declaration_extraction(true)
            .result_evaluation(true)
    }

    fn execute(&mut self, source: &str, options: CompilationOptions) -> InterpreterResult<Option<Value>> {
        if self.config.verbose {
            debug!(?options, source, "processing fragment");
        }
        let id = match self.parser.compile(source, options) {
            Ok(Some(id)) => id,
            Ok(None) => return Ok(None),
            Err(err) => {
                if err.is_rejection() {
                    debug!(stage = %err.stage(), error = %err, "fragment rejected");
                }
                return Err(err.into());
            }
        };
        let Some((wrapper, print)) = self.wrapper_of(id, &options) else {
            return Ok(None);
        };

        let executor = self.parser.executor_mut();
        executor.take_captured();
        if let Err(err) = executor.run_function(id, &wrapper) {
            warn!(tx = %id, error = %err, "fragment failed at run time, unloading it");
            self.parser.unload(1)?;
            return Err(InterpreterError::Exec(err));
        }
        let value = self.parser.executor_mut().take_captured();
        if let (Some(value), true) = (value, print) {
            self.output
                .lock()
                .push_str(&format!("({}) {}\n", value.type_name(), value));
        }
        Ok(value)
    }

    /// The wrapper committed with `id`, and whether its captured value
    /// should be printed.
    fn wrapper_of(&self, id: TransactionId, options: &CompilationOptions) -> Option<(String, bool)> {
        let wrapper = self.parser.transaction(id).ok()?.wrapper()?;
        let analyzer = self.parser.analyzer();
        let decl = analyzer.decls().get(wrapper)?;
        let print = match (decl.as_function().and_then(|f| f.body.as_deref()), analyzer.lookup(CAPTURE_FN)) {
            (Some(body), Some(capture)) => captured_expr(body, capture)
                .is_some_and(|expr| options.value_printing.should_print(expr.has_side_effects())),
            _ => false,
        };
        Some((decl.qualified.clone(), print))
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incremental::TransactionLog;
    use crate::sema::ImageOrigin;
    use tempfile::TempDir;

    #[test]
    fn test_process_captures_trailing_value() {
        let mut interp = Interpreter::new();
        assert_eq!(interp.process("int x = 41;").unwrap(), None);
        assert_eq!(interp.process("x + 1;").unwrap(), Some(Value::Int(42)));
        assert_eq!(interp.take_output(), "(int) 42\n");
        assert_eq!(interp.process("x == 41;").unwrap(), Some(Value::Bool(true)));
        assert_eq!(interp.take_output(), "(bool) true\n");
    }

    #[test]
    fn test_auto_printing_skips_side_effects() {
        let mut interp = Interpreter::new();
        interp.declare("int n = 0;").unwrap();
        assert_eq!(interp.process("n = 5;").unwrap(), Some(Value::Int(5)));
        assert_eq!(interp.take_output(), "");
        assert_eq!(interp.echo("n = 6;").unwrap(), Some(Value::Int(6)));
        assert_eq!(interp.take_output(), "(int) 6\n");
        assert_eq!(interp.evaluate("n;").unwrap(), Some(Value::Int(6)));
        assert_eq!(interp.take_output(), "");
    }

    #[test]
    fn test_print_output_is_collected() {
        let mut interp = Interpreter::new();
        assert_eq!(interp.process("print(7);").unwrap(), None);
        assert_eq!(interp.take_output(), "7\n");
    }

    #[test]
    fn test_rejected_fragment_leaves_session_unchanged() {
        let mut interp = Interpreter::new();
        interp.process("int x = 1;").unwrap();
        let err = interp.process("x + missing;").unwrap_err();
        assert!(err.is_rejection());
        assert!(err.diagnostics().iter().any(|d| d.message.contains("missing")));
        assert_eq!(interp.parser().sequence().len(), 1);
        assert_eq!(interp.process("x;").unwrap(), Some(Value::Int(1)));
    }

    #[test]
    fn test_runtime_failure_unloads_fragment() {
        let mut interp = Interpreter::with_config(InterpreterConfig::new().dynamic_scoping(true));
        interp.declare("int zero = 0;").unwrap();
        let before = interp.parser().sequence().len();

        let err = interp.process("1 / zero;").unwrap_err();
        assert!(err.is_runtime());
        assert_eq!(interp.parser().sequence().len(), before);

        let err = interp.process("later + 1;").unwrap_err();
        assert!(matches!(err, InterpreterError::Exec(ref e) if e.is_unresolved()));
        interp.declare("int later = 9;").unwrap();
        assert_eq!(interp.process("later + 1;").unwrap(), Some(Value::Int(10)));
    }

    #[test]
    fn test_raw_input_does_not_wrap() {
        let mut interp = Interpreter::with_config(InterpreterConfig::new().raw_input(true));
        assert!(interp.process("int f() { return 3; }").is_ok());
        assert!(interp.process("f();").unwrap_err().is_rejection());
    }

    #[test]
    fn test_unload_restores_previous_binding() {
        let mut interp = Interpreter::new();
        let log = Arc::new(TransactionLog::new());
        interp.add_observer(log.clone());

        interp.process("int x = 1;").unwrap();
        interp.process("int y = x + 1;").unwrap();
        assert_eq!(interp.unload(1).unwrap(), 1);
        assert!(interp.process("y;").unwrap_err().is_rejection());
        assert_eq!(interp.process("x;").unwrap(), Some(Value::Int(1)));
        assert_eq!(log.unloaded(), 1);
        assert!(matches!(
            interp.unload(10).unwrap_err(),
            InterpreterError::Transaction(_)
        ));
    }

    #[test]
    fn test_parse_generates_no_code() {
        let mut interp = Interpreter::new();
        let id = interp.parse("int p() { return 1; }").unwrap().unwrap();
        assert!(interp.parser().transaction(id).unwrap().module().is_none());
        assert!(interp.parser().executor().resolve_symbol("p").is_none());
    }

    #[test]
    fn test_load_image_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        SessionImage::new()
            .with_entry(ImageOrigin::Library, "int lib_add(int a, int b) { return a + b; }")
            .with_entry(ImageOrigin::Image, "int twice(int v) { return v * 2; }")
            .save(&path)
            .unwrap();

        let mut interp = Interpreter::new();
        assert!(interp.load_image(&path).unwrap().is_some());
        assert_eq!(interp.process("lib_add(1, twice(3));").unwrap(), Some(Value::Int(7)));
    }
}
