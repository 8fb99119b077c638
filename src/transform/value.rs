//! Routes the value of a fragment's trailing expression to the host.

use tracing::trace;

use super::error::TransformResult;
use super::pipeline::{find_wrapper, missing, TransformContext, Transformer};
use crate::sema::{DeclId, RuntimeSupport, TExpr, TExprKind, TStmt, Type};
use crate::transaction::Transaction;

/// Records the wrapper on the transaction and, when the options ask for a
/// value, rewrites the last statement `e;` (or `return e;`) of non-void
/// type into a call of the capture hook.
pub struct ValueExtraction;

impl Transformer for ValueExtraction {
    fn name(&self) -> &str {
        "ValueExtraction"
    }

    fn transform(&self, tx: &mut Transaction, cx: &mut TransformContext<'_>) -> TransformResult<()> {
        let Some(wrapper) = find_wrapper(tx, cx.analyzer().decls()) else {
            return Ok(());
        };
        tx.set_wrapper(Some(wrapper));
        if !tx.options().wants_value() || !has_trailing_value(cx, wrapper)? {
            return Ok(());
        }

        let capture = cx.declare_runtime(RuntimeSupport::Capture);
        let body = cx
            .analyzer_mut()
            .decls_mut()
            .get_mut(wrapper)
            .and_then(|d| d.as_function_mut())
            .and_then(|f| f.body.as_mut())
            .ok_or_else(|| missing(wrapper))?;
        let value = match body.pop() {
            Some(TStmt::Expr(e)) | Some(TStmt::Return(Some(e), _)) => e,
            Some(other) => {
                body.push(other);
                return Ok(());
            }
            None => return Ok(()),
        };
        trace!(tx = %tx.id(), ty = %value.ty, "capturing trailing value");
        let span = value.span;
        body.push(TStmt::Expr(TExpr::new(
            TExprKind::Call {
                callee: capture,
                args: vec![value],
            },
            Type::Void,
            span,
        )));
        Ok(())
    }
}

fn has_trailing_value(cx: &TransformContext<'_>, wrapper: DeclId) -> TransformResult<bool> {
    let func = cx
        .analyzer()
        .decls()
        .get(wrapper)
        .and_then(|d| d.as_function())
        .ok_or_else(|| missing(wrapper))?;
    Ok(match func.body.as_deref().and_then(|b| b.last()) {
        Some(TStmt::Expr(e)) | Some(TStmt::Return(Some(e), _)) => e.ty.is_value(),
        _ => false,
    })
}

/// The expression a rewritten wrapper hands to the capture hook.
pub fn captured_expr(body: &[TStmt], capture: DeclId) -> Option<&TExpr> {
    match body.last() {
        Some(TStmt::Expr(TExpr {
            kind: TExprKind::Call { callee, args },
            ..
        })) if *callee == capture => args.first(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sema::{Analyzer, CollectingConsumer, Sema, CAPTURE_FN};
    use crate::transaction::{CompilationOptions, TransactionId, ValuePrinting};

    fn run(sema: &mut Sema, src: &str, options: CompilationOptions) -> (Transaction, usize) {
        let mut out = CollectingConsumer::default();
        assert!(!sema.parse(src, &options, &mut out).is_failed());
        let mut tx = Transaction::new(TransactionId::new(0, 0), options);
        for group in out.groups {
            tx.append_group(group);
        }
        let mut cx = TransformContext::new(sema);
        ValueExtraction.transform(&mut tx, &mut cx).unwrap();
        let side = cx.take_side_groups().len();
        (tx, side)
    }

    fn body(sema: &Sema, tx: &Transaction) -> Vec<TStmt> {
        let wrapper = tx.wrapper().unwrap();
        sema.decls().get(wrapper).unwrap().as_function().unwrap().body.clone().unwrap()
    }

    #[test]
    fn test_captures_trailing_expression() {
        let mut sema = Sema::new();
        let (tx, side) = run(&mut sema, "1 + 2;", CompilationOptions::wrapped());
        assert_eq!(side, 1);
        let capture = sema.lookup(CAPTURE_FN).unwrap();
        let body = body(&sema, &tx);
        let value = captured_expr(&body, capture).unwrap();
        assert_eq!(value.ty, Type::Int);

        // The hook exists now; no second side group.
        let (_, side) = run(&mut sema, "true;", CompilationOptions::wrapped());
        assert_eq!(side, 0);
    }

    #[test]
    fn test_void_and_non_expression_tails_are_left_alone() {
        let mut sema = Sema::new();
        let (tx, side) = run(&mut sema, "print(1);", CompilationOptions::wrapped());
        assert_eq!(side, 0);
        assert!(tx.wrapper().is_some());
        assert!(matches!(body(&sema, &tx)[0], TStmt::Expr(TExpr { kind: TExprKind::Builtin { .. }, .. })));

        let (_, side) = run(&mut sema, "if (true) { 1; }", CompilationOptions::wrapped());
        assert_eq!(side, 0);
    }

    #[test]
    fn test_only_when_value_is_wanted() {
        let mut sema = Sema::new();
        let options = CompilationOptions::default().declaration_extraction(true);
        let (tx, side) = run(&mut sema, "1;", options);
        assert_eq!(side, 0);
        assert!(matches!(body(&sema, &tx)[0], TStmt::Expr(TExpr { kind: TExprKind::Int(1), .. })));

        let (_, side) = run(&mut sema, "2;", options.value_printing(ValuePrinting::Auto));
        assert_eq!(side, 1);
    }
}
