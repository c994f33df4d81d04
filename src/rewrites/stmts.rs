//! Structural statement rewrites: pass insertion/removal, statement
//! reordering, operand commutation.

use crate::analysis::checks;
use crate::cursors::{
    update_expr, BlockKind, CursorPath, ForwardingMap,
};
use crate::ir::build::pass;
use crate::ir::expr::ExprKind;
use crate::ir::proc::Proc;
use crate::ir::stmt::{Stmt, StmtKind};

use super::{list_at, splice, RewriteError, RewriteResult};

/// Insert a `pass` at the gap.
pub fn insert_pass(
    proc: &Proc,
    parent: &CursorPath,
    kind: BlockKind,
    at: usize,
) -> RewriteResult {
    let list = list_at(proc, parent, kind)?;
    if at > list.len() {
        return Err(RewriteError::BadCursor);
    }
    splice(proc, parent, kind, at, at, vec![pass()])
}

/// Remove every `pass` statement in the body.
pub fn delete_pass(proc: &Proc) -> RewriteResult {
    // old/new prefixes are threaded separately: forwarding keys must be
    // in pre-rewrite coordinates even under a statement that moved
    fn sweep(
        stmts: &[Stmt],
        old_prefix: &CursorPath,
        new_prefix: &CursorPath,
        kind: BlockKind,
        fwd: &mut ForwardingMap,
    ) -> Vec<Stmt> {
        let mut out = Vec::with_capacity(stmts.len());
        for (i, s) in stmts.iter().enumerate() {
            let old_path = old_prefix.child(kind.edge(i));
            if s.is_pass() {
                *fwd = std::mem::take(fwd).tombstone(old_path.clone());
                *fwd = std::mem::take(fwd).spliced(old_prefix.clone(), kind, out.len(), 1, 0);
                continue;
            }
            let new_path = new_prefix.child(kind.edge(out.len()));
            if new_path != old_path {
                *fwd = std::mem::take(fwd).relocate(old_path.clone(), new_path.clone());
            }
            let rebuilt = match &s.data {
                StmtKind::If { cond, body, orelse } => Stmt {
                    data: StmtKind::If {
                        cond: cond.clone(),
                        body: sweep(body, &old_path, &new_path, BlockKind::Body, fwd),
                        orelse: sweep(orelse, &old_path, &new_path, BlockKind::Orelse, fwd),
                    },
                    srcinfo: s.srcinfo.clone(),
                },
                StmtKind::For {
                    iter,
                    hi,
                    body,
                    kind: lk,
                } => Stmt {
                    data: StmtKind::For {
                        iter: iter.clone(),
                        hi: hi.clone(),
                        body: sweep(body, &old_path, &new_path, BlockKind::Body, fwd),
                        kind: *lk,
                    },
                    srcinfo: s.srcinfo.clone(),
                },
                _ => s.clone(),
            };
            out.push(rebuilt);
        }
        out
    }

    let mut fwd = ForwardingMap::identity();
    let root = CursorPath::root();
    let body = sweep(&proc.body, &root, &root, BlockKind::Body, &mut fwd);
    Ok((
        Proc {
            body,
            ..proc.clone()
        },
        fwd,
    ))
}

/// Swap the two statements of the block. Precondition: their effect sets
/// commute.
pub fn reorder_stmts(
    proc: &Proc,
    parent: &CursorPath,
    kind: BlockKind,
    lo: usize,
    hi: usize,
) -> RewriteResult {
    if hi - lo != 2 {
        return Err(RewriteError::precondition(
            "reorder_stmts needs a block of exactly two statements",
        ));
    }
    let list = list_at(proc, parent, kind)?;
    let (s1, s2) = match (list.get(lo), list.get(lo + 1)) {
        (Some(a), Some(b)) => (a.clone(), b.clone()),
        _ => return Err(RewriteError::BadCursor),
    };
    checks::commute(proc, &s1, &s2)?;

    let (new, _) = splice(proc, parent, kind, lo, hi, vec![s2, s1])?;
    let fwd = ForwardingMap::identity()
        .relocate(
            parent.child(kind.edge(lo)),
            parent.child(kind.edge(lo + 1)),
        )
        .relocate(
            parent.child(kind.edge(lo + 1)),
            parent.child(kind.edge(lo)),
        );
    Ok((new, fwd))
}

/// Swap the operands of `+` or `*` expressions. Numeric operands only.
pub fn commute_expr(proc: &Proc, exprs: &[CursorPath]) -> RewriteResult {
    let mut current = proc.clone();
    for path in exprs {
        let e = crate::cursors::resolve_expr(&current, path).ok_or(RewriteError::BadCursor)?;
        match &e.data {
            ExprKind::BinOp { op, lhs, .. } => {
                if !op.commutes() {
                    return Err(RewriteError::precondition(format!(
                        "operator '{op}' does not commute"
                    )));
                }
                if !lhs.ty.is_numeric() {
                    return Err(RewriteError::precondition(
                        "commute_expr applies to numeric operands only",
                    ));
                }
            }
            _ => {
                return Err(RewriteError::precondition(
                    "commute_expr expects a binary operation",
                ))
            }
        }
        current = update_expr(&current, path, |e| {
            let ExprKind::BinOp { op, lhs, rhs } = e.data.clone() else {
                unreachable!("checked above");
            };
            crate::ir::expr::Expr {
                data: ExprKind::BinOp {
                    op,
                    lhs: rhs,
                    rhs: lhs,
                },
                ty: e.ty.clone(),
                srcinfo: e.srcinfo.clone(),
            }
        })
        .ok_or(RewriteError::BadCursor)?;
    }
    Ok((current, ForwardingMap::identity()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursors::Edge;
    use crate::ir::build::*;
    use crate::ir::sym::SymGen;
    use crate::ir::types::LoopType;
    use crate::ir::SrcInfo;

    fn proc_of(body: Vec<Stmt>) -> Proc {
        Proc {
            name: "t".to_string(),
            args: vec![],
            preds: vec![],
            body,
            instr: None,
            srcinfo: SrcInfo::default(),
        }
    }

    #[test]
    fn reorder_swaps_commuting_stmts() {
        let mut r#gen = SymGen::starting_at(1);
        let x = r#gen.fresh("x");
        let y = r#gen.fresh("y");
        let p = proc_of(vec![
            assign(&x, LoopType::R, vec![], float(1.0)),
            assign(&y, LoopType::R, vec![], float(2.0)),
        ]);
        let (p2, _) = reorder_stmts(&p, &CursorPath::root(), BlockKind::Body, 0, 2).unwrap();
        match &p2.body[0].data {
            StmtKind::Assign { name, .. } => assert_eq!(name, &y),
            _ => panic!("expected assign"),
        }
        // applying it again restores the original
        let (p3, _) = reorder_stmts(&p2, &CursorPath::root(), BlockKind::Body, 0, 2).unwrap();
        assert_eq!(p3, p);
    }

    #[test]
    fn reorder_refuses_dependent_stmts() {
        let mut r#gen = SymGen::starting_at(1);
        let x = r#gen.fresh("x");
        let y = r#gen.fresh("y");
        let p = proc_of(vec![
            assign(&x, LoopType::R, vec![], float(1.0)),
            assign(&y, LoopType::R, vec![], read(&x, LoopType::R)),
        ]);
        assert!(matches!(
            reorder_stmts(&p, &CursorPath::root(), BlockKind::Body, 0, 2),
            Err(RewriteError::Precondition(_))
        ));
    }

    #[test]
    fn insert_then_delete_pass_round_trips() {
        let mut r#gen = SymGen::starting_at(1);
        let x = r#gen.fresh("x");
        let p = proc_of(vec![assign(&x, LoopType::R, vec![], float(1.0))]);
        let (p2, _) = insert_pass(&p, &CursorPath::root(), BlockKind::Body, 0).unwrap();
        assert_eq!(p2.body.len(), 2);
        let (p3, fwd) = delete_pass(&p2).unwrap();
        assert_eq!(p3, p);
        // the surviving statement forwarded from index 1 back to 0
        let moved = fwd
            .forward_path(&CursorPath(vec![Edge::Body(1)]))
            .unwrap();
        assert_eq!(moved, CursorPath(vec![Edge::Body(0)]));
    }

    #[test]
    fn commute_swaps_operands() {
        let mut r#gen = SymGen::starting_at(1);
        let x = r#gen.fresh("x");
        let p = proc_of(vec![assign(
            &x,
            LoopType::Index,
            vec![],
            add(int(1), int(2)),
        )]);
        let path = CursorPath(vec![Edge::Body(0), Edge::Rhs]);
        let (p2, _) = commute_expr(&p, &[path]).unwrap();
        match &p2.body[0].data {
            StmtKind::Assign { rhs, .. } => {
                assert_eq!(crate::fmt::expr_to_string(rhs), "2 + 1")
            }
            _ => panic!("expected assign"),
        }
    }
}
