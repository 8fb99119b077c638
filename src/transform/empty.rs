//! Drops wrappers that have nothing left to run.

use tracing::trace;

use super::error::TransformResult;
use super::pipeline::{find_wrapper, remove_from_groups, TransformContext, Transformer};
use crate::sema::TStmt;
use crate::transaction::Transaction;

/// Removes a wrapper whose body is empty (or only empty blocks) together
/// with its group. The orchestrator recycles the transaction if nothing
/// else remains in it.
pub struct CheckEmptyTransaction;

impl Transformer for CheckEmptyTransaction {
    fn name(&self) -> &str {
        "CheckEmptyTransaction"
    }

    fn transform(&self, tx: &mut Transaction, cx: &mut TransformContext<'_>) -> TransformResult<()> {
        let Some(wrapper) = find_wrapper(tx, cx.analyzer().decls()) else {
            return Ok(());
        };
        let empty = cx
            .analyzer()
            .decls()
            .get(wrapper)
            .and_then(|d| d.as_function())
            .is_some_and(|f| f.body.as_deref().map_or(true, is_empty_body));
        if !empty {
            return Ok(());
        }

        remove_from_groups(tx, wrapper);
        if tx.wrapper() == Some(wrapper) {
            tx.set_wrapper(None);
        }
        cx.analyzer_mut().forget(wrapper);
        trace!(tx = %tx.id(), %wrapper, "dropped empty wrapper");
        Ok(())
    }
}

fn is_empty_body(stmts: &[TStmt]) -> bool {
    stmts.iter().all(|s| match s {
        TStmt::Block(inner) => is_empty_body(inner),
        _ => false,
    })
}
