//! Moves declarations out of the synthesized wrapper.

use tracing::debug;

use super::error::TransformResult;
use super::pipeline::{find_wrapper, missing, TransformContext, Transformer};
use crate::sema::{DeclId, TStmt};
use crate::transaction::{DeclGroup, DeclGroupKind, Transaction};

/// Detaches every declaration written at the top level of a wrapped
/// fragment, makes it visible to later fragments and announces it in its
/// own groups ahead of the wrapper.
pub struct DeclExtractor;

impl Transformer for DeclExtractor {
    fn name(&self) -> &str {
        "DeclExtractor"
    }

    fn transform(&self, tx: &mut Transaction, cx: &mut TransformContext<'_>) -> TransformResult<()> {
        if !tx.options().declaration_extraction {
            return Ok(());
        }
        let Some(wrapper) = find_wrapper(tx, cx.analyzer().decls()) else {
            return Ok(());
        };

        let analyzer = cx.analyzer_mut();
        let func = analyzer
            .decls_mut()
            .get_mut(wrapper)
            .and_then(|d| d.as_function_mut())
            .ok_or_else(|| missing(wrapper))?;
        let body = func.body.take().unwrap_or_default();
        let (extracted, rest): (Vec<TStmt>, Vec<TStmt>) =
            body.into_iter().partition(|s| matches!(s, TStmt::Decl(_)));
        func.body = Some(rest);

        let ids: Vec<DeclId> = extracted
            .into_iter()
            .filter_map(|s| match s {
                TStmt::Decl(id) => Some(id),
                _ => None,
            })
            .collect();
        if ids.is_empty() {
            return Ok(());
        }

        let mut groups = Vec::new();
        for id in &ids {
            analyzer.bind_global(*id);
            groups.push(DeclGroup::single(DeclGroupKind::TopLevel, *id));
            let tentative = analyzer
                .decls()
                .get(*id)
                .and_then(|d| d.as_var())
                .is_some_and(|v| v.init.is_none() && !v.is_extern);
            if tentative {
                groups.push(DeclGroup::single(DeclGroupKind::TentativeDefinition, *id));
            }
        }

        let at = tx
            .groups()
            .iter()
            .position(|g| g.decls.contains(&wrapper))
            .unwrap_or(tx.groups().len());
        let extracted = groups.len();
        tx.groups_mut().splice(at..at, groups);
        debug!(tx = %tx.id(), %wrapper, declarations = ids.len(), groups = extracted, "extracted wrapper declarations");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sema::{Analyzer, CollectingConsumer, Sema};
    use crate::transaction::{CompilationOptions, TransactionId};

    fn transaction(sema: &mut Sema, src: &str, options: CompilationOptions) -> Transaction {
        let mut out = CollectingConsumer::default();
        assert!(!sema.parse(src, &options, &mut out).is_failed());
        let mut tx = Transaction::new(TransactionId::new(0, 0), options);
        for group in out.groups {
            tx.append_group(group);
        }
        tx
    }

    #[test]
    fn test_extracts_declarations_before_wrapper() {
        let mut sema = Sema::new();
        let mut tx = transaction(&mut sema, "int f() { return 1; } int y = f(); int z; y + z;", CompilationOptions::wrapped());
        let wrapper = find_wrapper(&tx, sema.decls()).unwrap();
        {
            let mut cx = TransformContext::new(&mut sema);
            DeclExtractor.transform(&mut tx, &mut cx).unwrap();
        }

        let kinds: Vec<_> = tx.groups().iter().map(|g| g.kind).collect();
        assert_eq!(
            kinds,
            vec![
                DeclGroupKind::TopLevel,
                DeclGroupKind::TopLevel,
                DeclGroupKind::TopLevel,
                DeclGroupKind::TentativeDefinition,
                DeclGroupKind::TopLevel,
            ]
        );
        assert_eq!(tx.groups().last().unwrap().decls, vec![wrapper]);

        let y = sema.lookup("y").unwrap();
        assert!(sema.lookup("z").is_some());
        assert_eq!(tx.groups()[1].decls, vec![y]);
        let body = sema.decls().get(wrapper).unwrap().as_function().unwrap().body.clone().unwrap();
        assert_eq!(body.len(), 1);
        assert!(matches!(body[0], TStmt::Expr(_)));
    }

    #[test]
    fn test_noop_without_extraction() {
        let mut sema = Sema::new();
        let mut tx = transaction(&mut sema, "int x = 1;", CompilationOptions::default());
        let before = tx.groups().to_vec();
        let mut cx = TransformContext::new(&mut sema);
        DeclExtractor.transform(&mut tx, &mut cx).unwrap();
        assert_eq!(tx.groups(), before.as_slice());
    }
}
