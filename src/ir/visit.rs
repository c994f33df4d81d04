//! Statement-tree rewriting driver.
//!
//! Rewrites that touch statements scattered through a body (simplify,
//! pass-deletion, access rewrites) run through [`map_stmts`] with a
//! [`VisitAction`] callback instead of hand-rolling recursion each time.

use crate::ir::stmt::{Stmt, StmtKind};

/// What to do with the statement just visited.
pub enum VisitAction {
    /// Keep the statement, recurse into its children.
    VisitChildren,
    /// Keep the statement as-is, do not recurse.
    SkipChildren,
    /// Replace with the given statements (possibly empty); no recursion
    /// into the replacement.
    Replace(Vec<Stmt>),
    /// Replace with the given statements and recurse into them.
    ReplaceRecurse(Vec<Stmt>),
}

/// Rebuild a statement list top-down through `f`.
pub fn map_stmts(stmts: &[Stmt], f: &mut impl FnMut(&Stmt) -> VisitAction) -> Vec<Stmt> {
    let mut out = Vec::with_capacity(stmts.len());
    for s in stmts {
        match f(s) {
            VisitAction::SkipChildren => out.push(s.clone()),
            VisitAction::VisitChildren => out.push(recurse(s, f)),
            VisitAction::Replace(repl) => out.extend(repl),
            VisitAction::ReplaceRecurse(repl) => {
                out.extend(map_stmts(&repl, f));
            }
        }
    }
    out
}

fn recurse(s: &Stmt, f: &mut impl FnMut(&Stmt) -> VisitAction) -> Stmt {
    let data = match &s.data {
        StmtKind::If { cond, body, orelse } => StmtKind::If {
            cond: cond.clone(),
            body: map_stmts(body, f),
            orelse: map_stmts(orelse, f),
        },
        StmtKind::For {
            iter,
            hi,
            body,
            kind,
        } => StmtKind::For {
            iter: iter.clone(),
            hi: hi.clone(),
            body: map_stmts(body, f),
            kind: *kind,
        },
        other => other.clone(),
    };
    Stmt {
        data,
        srcinfo: s.srcinfo.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::build::*;
    use crate::ir::sym::SymGen;

    #[test]
    fn replace_deletes_nested_passes() {
        let mut r#gen = SymGen::starting_at(1);
        let i = r#gen.fresh("i");
        let stmts = vec![seq_for(&i, int(4), vec![pass(), pass()]), pass()];
        let out = map_stmts(&stmts, &mut |s| {
            if s.is_pass() {
                VisitAction::Replace(vec![])
            } else {
                VisitAction::VisitChildren
            }
        });
        assert_eq!(out.len(), 1);
        let (body, _) = out[0].child_blocks();
        assert!(body.is_empty());
    }
}
