//! Pre-order matching of parsed patterns against a procedure.

use crate::cursors::{BlockKind, CursorLoc, CursorPath, Edge};
use crate::ir::expr::{Expr, ExprKind};
use crate::ir::proc::Proc;
use crate::ir::stmt::{Stmt, StmtKind};

use super::parse::{IdxPat, PatExpr, PatStmt, Pattern};

fn idx_matches(pat: &IdxPat, idx: &[Expr]) -> bool {
    match pat {
        IdxPat::Any => true,
        IdxPat::Exact(pats) => {
            pats.len() == idx.len() && pats.iter().zip(idx).all(|(p, e)| expr_matches(p, e))
        }
    }
}

fn expr_matches(pat: &PatExpr, e: &Expr) -> bool {
    match (pat, &e.data) {
        (PatExpr::Wild, _) => true,
        (PatExpr::Read { name, idx }, ExprKind::Read { name: n, idx: i }) => {
            name.matches(n.name()) && idx_matches(idx, i)
        }
        (PatExpr::Read { name, idx }, ExprKind::WindowExpr { name: n, .. }) => {
            // a window read with any-index pattern matches its buffer name
            name.matches(n.name()) && *idx == IdxPat::Any
        }
        (PatExpr::Const(v), ExprKind::Const(crate::ir::expr::Value::Int(i))) => v == i,
        (
            PatExpr::BinOp { op, lhs, rhs },
            ExprKind::BinOp {
                op: o,
                lhs: l,
                rhs: r,
            },
        ) => op == o && expr_matches(lhs, l) && expr_matches(rhs, r),
        _ => false,
    }
}

fn stmt_matches(pat: &PatStmt, s: &Stmt) -> bool {
    match (pat, &s.data) {
        (PatStmt::Wild, _) => true,
        (PatStmt::Assign { name, idx }, StmtKind::Assign { name: n, idx: i, .. }) => {
            name.matches(n.name()) && idx_matches(idx, i)
        }
        (PatStmt::Assign { name, idx }, StmtKind::WindowStmt { name: n, .. }) => {
            // `x = _` also finds window bindings
            name.matches(n.name()) && *idx == IdxPat::Any
        }
        (PatStmt::Reduce { name, idx }, StmtKind::Reduce { name: n, idx: i, .. }) => {
            name.matches(n.name()) && idx_matches(idx, i)
        }
        (PatStmt::ForLoop { iter }, StmtKind::For { iter: n, .. }) => iter.matches(n.name()),
        (PatStmt::IfStmt, StmtKind::If { .. }) => true,
        (PatStmt::Alloc { name }, StmtKind::Alloc { name: n, .. }) => name.matches(n.name()),
        (PatStmt::Call { name }, StmtKind::Call { f, .. }) => name.matches(&f.name),
        _ => false,
    }
}

fn match_stmts_in_block(
    pats: &[PatStmt],
    list: &[Stmt],
    parent: &CursorPath,
    kind: BlockKind,
    out: &mut Vec<CursorLoc>,
) {
    // window of `pats.len()` consecutive statements starting at each index
    for start in 0..list.len() {
        if start + pats.len() <= list.len()
            && pats
                .iter()
                .zip(&list[start..start + pats.len()])
                .all(|(p, s)| stmt_matches(p, s))
        {
            let loc = if pats.len() == 1 {
                CursorLoc::Node(parent.child(kind.edge(start)))
            } else {
                CursorLoc::Block {
                    parent: parent.clone(),
                    kind,
                    lo: start,
                    hi: start + pats.len(),
                }
            };
            out.push(loc);
        }
        // recurse into the statement at `start` between positional tries,
        // preserving pre-order
        let s = &list[start];
        let path = parent.child(kind.edge(start));
        let (body, orelse) = s.child_blocks();
        if !body.is_empty() {
            match_stmts_in_block(pats, body, &path, BlockKind::Body, out);
        }
        if !orelse.is_empty() {
            match_stmts_in_block(pats, orelse, &path, BlockKind::Orelse, out);
        }
    }
}

pub(crate) fn own_expr_edges(s: &Stmt) -> Vec<(Edge, &Expr)> {
    match &s.data {
        StmtKind::Assign { idx, rhs, .. } | StmtKind::Reduce { idx, rhs, .. } => {
            let mut v: Vec<(Edge, &Expr)> = idx
                .iter()
                .enumerate()
                .map(|(i, e)| (Edge::Idx(i), e))
                .collect();
            v.push((Edge::Rhs, rhs));
            v
        }
        StmtKind::WriteConfig { rhs, .. } | StmtKind::WindowStmt { rhs, .. } => {
            vec![(Edge::Rhs, rhs)]
        }
        StmtKind::If { cond, .. } => vec![(Edge::Cond, cond)],
        StmtKind::For { hi, .. } => vec![(Edge::Hi, hi)],
        StmtKind::Call { args, .. } => args
            .iter()
            .enumerate()
            .map(|(i, e)| (Edge::Arg(i), e))
            .collect(),
        StmtKind::Alloc { .. } | StmtKind::Free { .. } | StmtKind::Pass => vec![],
    }
}

pub(crate) fn expr_child_edges(e: &Expr) -> Vec<(Edge, &Expr)> {
    match &e.data {
        ExprKind::Read { idx, .. } => idx
            .iter()
            .enumerate()
            .map(|(i, e)| (Edge::Idx(i), e))
            .collect(),
        ExprKind::USub { arg } => vec![(Edge::Arg(0), arg)],
        ExprKind::BinOp { lhs, rhs, .. } => vec![(Edge::Arg(0), lhs), (Edge::Arg(1), rhs)],
        ExprKind::BuiltIn { args, .. } => args
            .iter()
            .enumerate()
            .map(|(i, e)| (Edge::Arg(i), e))
            .collect(),
        ExprKind::WindowExpr { idx, .. } => {
            let mut v = Vec::new();
            for (i, w) in idx.iter().enumerate() {
                match w {
                    crate::ir::expr::WAccess::Point(p) => v.push((Edge::WinPt(i), p)),
                    crate::ir::expr::WAccess::Interval(lo, hi) => {
                        v.push((Edge::WinLo(i), lo));
                        v.push((Edge::WinHi(i), hi));
                    }
                }
            }
            v
        }
        _ => vec![],
    }
}

fn match_expr_tree(pat: &PatExpr, e: &Expr, path: &CursorPath, out: &mut Vec<CursorLoc>) {
    if expr_matches(pat, e) {
        out.push(CursorLoc::Node(path.clone()));
    }
    for (edge, child) in expr_child_edges(e) {
        match_expr_tree(pat, child, &path.child(edge), out);
    }
}

fn match_exprs_in_block(
    pat: &PatExpr,
    list: &[Stmt],
    parent: &CursorPath,
    kind: BlockKind,
    out: &mut Vec<CursorLoc>,
) {
    for (i, s) in list.iter().enumerate() {
        let path = parent.child(kind.edge(i));
        for (edge, e) in own_expr_edges(s) {
            match_expr_tree(pat, e, &path.child(edge), out);
        }
        let (body, orelse) = s.child_blocks();
        if !body.is_empty() {
            match_exprs_in_block(pat, body, &path, BlockKind::Body, out);
        }
        if !orelse.is_empty() {
            match_exprs_in_block(pat, orelse, &path, BlockKind::Orelse, out);
        }
    }
}

/// All matches of `pattern` in `proc`, in pre-order.
pub fn matches(proc: &Proc, pattern: &Pattern) -> Vec<CursorLoc> {
    let mut out = Vec::new();
    match pattern {
        Pattern::Stmts(pats) => {
            match_stmts_in_block(pats, &proc.body, &CursorPath::root(), BlockKind::Body, &mut out)
        }
        Pattern::Expr(pat) => {
            match_exprs_in_block(pat, &proc.body, &CursorPath::root(), BlockKind::Body, &mut out)
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::build::*;
    use crate::ir::sym::SymGen;
    use crate::ir::types::LoopType;
    use crate::ir::{Proc, SrcInfo};
    use crate::pattern::{find, find_all};

    fn loop_nest() -> Proc {
        let mut r#gen = SymGen::starting_at(1);
        let i = r#gen.fresh("i");
        let j = r#gen.fresh("j");
        let x = r#gen.fresh("x");
        Proc {
            name: "p".to_string(),
            args: vec![],
            preds: vec![],
            body: vec![seq_for(
                &i,
                int(6),
                vec![seq_for(
                    &j,
                    int(16),
                    vec![
                        assign(
                            &x,
                            LoopType::R,
                            vec![read(&j, LoopType::Index)],
                            float(0.0),
                        ),
                        reduce(
                            &x,
                            LoopType::R,
                            vec![read(&j, LoopType::Index)],
                            float(1.0),
                        ),
                    ],
                )],
            )],
            instr: None,
            srcinfo: SrcInfo::default(),
        }
    }

    #[test]
    fn finds_named_loop() {
        let p = loop_nest();
        let loc = find(&p, "for j in _: _").unwrap();
        assert_eq!(
            loc,
            CursorLoc::Node(CursorPath(vec![Edge::Body(0), Edge::Body(0)]))
        );
    }

    #[test]
    fn wildcard_loop_matches_in_preorder() {
        let p = loop_nest();
        let all = find_all(&p, "for _ in _: _").unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0], CursorLoc::Node(CursorPath(vec![Edge::Body(0)])));
    }

    #[test]
    fn occurrence_selector_picks_kth() {
        let p = loop_nest();
        let loc = find(&p, "for _ in _: _ #2").unwrap();
        assert_eq!(
            loc,
            CursorLoc::Node(CursorPath(vec![Edge::Body(0), Edge::Body(0)]))
        );
    }

    #[test]
    fn assign_and_reduce_forms_are_distinct() {
        let p = loop_nest();
        let a = find(&p, "x[_] = _").unwrap();
        let r = find(&p, "x[_] += _").unwrap();
        assert_ne!(a, r);
    }

    #[test]
    fn stmt_sequence_matches_as_block() {
        let p = loop_nest();
        let loc = find(&p, "x[_] = _ ; x[_] += _").unwrap();
        match loc {
            CursorLoc::Block { lo, hi, .. } => {
                assert_eq!((lo, hi), (0, 2));
            }
            l => panic!("expected block, got {l:?}"),
        }
    }

    #[test]
    fn expr_pattern_matches_expression_positions_only() {
        let p = loop_nest();
        // x[j] occurs only as a write target, never as a read
        assert!(find_all(&p, "x[j]").is_err());
        // the index expression j is a read
        let all = find_all(&p, "j").unwrap();
        assert_eq!(all.len(), 2);
    }
}
