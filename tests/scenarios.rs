//! End-to-end behaviour of the incremental engine over the built-in
//! analyzer, code generator and executor.

use std::sync::Arc;

use inkling::codegen::IrGen;
use inkling::incremental::{FailureStage, IncrementalParser, ObservedEvent, ParserConfig, TransactionLog};
use inkling::jit::{Jit, Value};
use inkling::sema::{Sema, CAPTURE_FN};
use inkling::session::{Interpreter, InterpreterError};
use inkling::transaction::{CompilationOptions, DeclGroupKind, TransactionState};

fn parser() -> IncrementalParser {
    IncrementalParser::new(
        ParserConfig::default(),
        Box::new(Sema::new()),
        Box::new(IrGen::new()),
        Box::new(Jit::new()),
    )
}

#[test]
fn test_declare_evaluate_then_unload_in_reverse() {
    let mut p = parser();

    let decl = p.compile("int x = 1;", CompilationOptions::wrapped()).unwrap().unwrap();
    let tx = p.transaction(decl).unwrap();
    assert_eq!(tx.groups().len(), 1);
    assert_eq!(tx.groups()[0].kind, DeclGroupKind::TopLevel);
    assert!(tx.wrapper().is_none());
    assert!(p.analyzer().lookup("x").is_some());

    let expr = p.compile("x + 1;", CompilationOptions::wrapped()).unwrap().unwrap();
    let wrapper = p.transaction(expr).unwrap().wrapper().unwrap();
    let name = p.analyzer().decls().get(wrapper).unwrap().qualified.clone();
    p.executor_mut().take_captured();
    p.executor_mut().run_function(expr, &name).unwrap();
    assert_eq!(p.executor_mut().take_captured(), Some(Value::Int(2)));

    assert_eq!(p.unload(1).unwrap(), vec![TransactionState::RolledBack]);
    assert!(p.executor().resolve_symbol(&name).is_none());
    assert!(p.analyzer().lookup(CAPTURE_FN).is_none());
    assert!(p.analyzer().lookup("x").is_some());
    assert_eq!(p.sequence(), &[decl]);

    p.unload(1).unwrap();
    assert!(p.analyzer().lookup("x").is_none());
    assert!(p.executor().resolve_symbol("x").is_none());
    assert!(p.sequence().is_empty());
}

#[test]
fn test_failed_analysis_contributes_nothing() {
    let mut p = parser();
    p.compile("int a = 1;", CompilationOptions::default()).unwrap();

    let err = p
        .compile("int b = 2; int c = undefined_name;", CompilationOptions::default())
        .unwrap_err();
    assert!(err.is_rejection());
    assert!(!err.diagnostics().is_empty());
    assert_eq!(p.sequence().len(), 1);
    assert_eq!(p.summaries().unwrap().len(), 1);
    assert!(p.analyzer().lookup("b").is_none());
    assert!(p.executor().resolve_symbol("b").is_none());
    assert!(p.executor().resolve_symbol("c").is_none());
}

#[test]
fn test_nested_instantiation_commits_first_and_unloads_with_parent() {
    let mut p = parser();
    let log = Arc::new(TransactionLog::new());
    p.compile("template<T> T twice(T v) { return v + v; }", CompilationOptions::default())
        .unwrap();
    p.add_observer(log.clone());

    let outer = p
        .compile("int doubled = twice<int>(21);", CompilationOptions::default())
        .unwrap()
        .unwrap();
    let nested = p.transaction(outer).unwrap().nested().to_vec();
    assert_eq!(nested.len(), 1);
    assert_eq!(
        log.events(),
        vec![ObservedEvent::Committed(nested[0]), ObservedEvent::Committed(outer)]
    );
    assert!(p.executor().resolve_symbol("twice<int>").is_some());
    assert!(p.analyzer().lookup("doubled").is_some());
    assert_eq!(p.sequence().len(), 2);

    p.unload(1).unwrap();
    assert!(p.analyzer().lookup("doubled").is_none());
    assert!(p.analyzer().lookup("twice<int>").is_none());
    assert!(p.executor().resolve_symbol("twice<int>").is_none());
    assert!(p.analyzer().lookup("twice").is_some());
    assert_eq!(p.sequence().len(), 1);
    assert_eq!(log.unloaded(), 1);
    assert_eq!(
        log.events().last(),
        Some(&ObservedEvent::Unloaded(outer, TransactionState::RolledBack))
    );

    // The specialization can be created again.
    p.compile("int again = twice<int>(1);", CompilationOptions::default())
        .unwrap()
        .unwrap();
    assert!(p.executor().resolve_symbol("twice<int>").is_some());
}

#[test]
fn test_unload_restores_shadowed_declarations() {
    let mut interp = Interpreter::new();
    interp.declare("int f(int a);").unwrap();
    interp.declare("int f(int a) { return a + 1; }").unwrap();
    assert_eq!(interp.evaluate("f(1);").unwrap(), Some(Value::Int(2)));
    let names = interp.parser().analyzer().visible_names();

    interp.declare("int g = f(10);").unwrap();
    interp.process("print(g);").unwrap();
    assert_eq!(interp.take_output(), "11\n");
    interp.unload(2).unwrap();
    assert_eq!(interp.parser().analyzer().visible_names(), names);

    // Unloading the definition leaves the forward declaration in scope.
    interp.unload(2).unwrap();
    assert!(interp.parser().analyzer().lookup("f").is_some());
    let err = interp.evaluate("f(1);").unwrap_err();
    assert!(matches!(err, InterpreterError::Exec(ref e) if e.is_unresolved()));
}

#[test]
fn test_static_destructors_run_on_unload() {
    let mut interp = Interpreter::new();
    interp
        .declare("void bye() { print(99); } int reg() { atexit(bye); return 0; } int token = reg();")
        .unwrap();
    assert_eq!(interp.take_output(), "");
    interp.unload(1).unwrap();
    assert_eq!(interp.take_output(), "99\n");
}

#[test]
fn test_empty_fragments_are_recycled() {
    let mut p = parser();
    let log = Arc::new(TransactionLog::new());
    p.add_observer(log.clone());

    assert_eq!(p.compile("", CompilationOptions::wrapped()).unwrap(), None);
    assert_eq!(p.compile("{ }", CompilationOptions::wrapped()).unwrap(), None);
    assert!(p.sequence().is_empty());
    assert_eq!(p.pool().live(), 0);
    assert!(log.events().is_empty());

    // Recycled slots are reused.
    let id = p.compile("int k = 1;", CompilationOptions::default()).unwrap().unwrap();
    assert_eq!(p.pool().live(), 1);
    assert_eq!(p.transaction(id).unwrap().state(), TransactionState::Committed);
}

#[test]
fn test_rejected_stage_is_reported() {
    let mut p = parser();
    p.compile("template<T> T neg(T v) { return -v; }", CompilationOptions::default())
        .unwrap();
    let err = p.compile("neg<bool>(true);", CompilationOptions::wrapped()).unwrap_err();
    assert!(err.to_string().starts_with(&format!("fragment rejected during {}", FailureStage::Instantiation)));
    assert_eq!(p.sequence().len(), 1);
}
