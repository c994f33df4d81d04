//! Guard rewrites: specialization cascades, statically-resolved
//! branches, and write merging.

use crate::analysis::affine::lin_of_cond;
use crate::analysis::solver::{check_sat, Verdict};
use crate::cursors::{BlockKind, CursorPath, Edge, ForwardingMap};
use crate::fmt;
use crate::ir::build::{add, mul};
use crate::ir::expr::{BinOp, Expr, ExprKind};
use crate::ir::proc::Proc;
use crate::ir::stmt::{Stmt, StmtKind};

use super::{ctx_at, list_at, splice, stmt_at, RewriteError, RewriteResult};

/// Turn the block into a branch cascade: each condition gets a copy of
/// the block, with the original as the final `else`.
pub fn specialize(
    proc: &Proc,
    parent: &CursorPath,
    kind: BlockKind,
    lo: usize,
    hi: usize,
    conds: &[Expr],
) -> RewriteResult {
    if conds.is_empty() {
        return Err(RewriteError::precondition(
            "specialize needs at least one condition",
        ));
    }
    let list = list_at(proc, parent, kind)?;
    if lo >= hi || hi > list.len() {
        return Err(RewriteError::BadCursor);
    }
    for c in conds {
        if !c.ty.is_bool() {
            return Err(RewriteError::precondition(format!(
                "'{}' is not boolean",
                fmt::expr_to_string(c)
            )));
        }
    }
    let block = list[lo..hi].to_vec();

    // innermost-first: else-branch is the original block
    let mut cascade = block.clone();
    for c in conds.iter().rev() {
        cascade = vec![Stmt::new(StmtKind::If {
            cond: c.clone(),
            body: block.clone(),
            orelse: cascade,
        })];
    }

    let (new, _) = splice(proc, parent, kind, lo, hi, cascade)?;
    // the original block lives on in the deepest else branch
    let mut else_prefix = parent.child(kind.edge(lo));
    for _ in 1..conds.len() {
        else_prefix = else_prefix.child(Edge::Orelse(0));
    }
    let mut fwd = ForwardingMap::identity();
    for j in 0..(hi - lo) {
        fwd = fwd.relocate(
            parent.child(kind.edge(lo + j)),
            else_prefix.child(Edge::Orelse(j)),
        );
    }
    fwd = fwd.spliced(parent.clone(), kind, lo, hi - lo, 1);
    Ok((new, fwd))
}

/// Replace an `if` by one of its branches when the condition provably
/// equals `value` at this point in the procedure.
pub fn assert_if(proc: &Proc, if_path: &CursorPath, value: bool) -> RewriteResult {
    let (cond, body, orelse) = match &stmt_at(proc, if_path)?.data {
        StmtKind::If { cond, body, orelse } => (cond.clone(), body.clone(), orelse.clone()),
        _ => {
            return Err(RewriteError::precondition(
                "cursor does not point at an if",
            ))
        }
    };

    // the condition must be `value` on every path: its negation is
    // unsatisfiable under the enclosing context
    let ctx = ctx_at(proc, if_path)?;
    let mut cons = crate::analysis::checks::ctx_cons(&ctx);
    for p in &proc.preds {
        if let Some(cs) = lin_of_cond(p, false) {
            cons.extend(cs);
        }
    }
    let negated = lin_of_cond(&cond, value).ok_or_else(|| {
        RewriteError::precondition("condition is outside the affine fragment")
    })?;
    cons.extend(negated);
    match check_sat(&cons) {
        Verdict::Unsat => {}
        _ => {
            return Err(RewriteError::precondition(format!(
                "cannot prove the condition is always {value}"
            )))
        }
    }

    let branch = if value { body } else { orelse };
    let branch_kind = if value { Edge::Body(0) } else { Edge::Orelse(0) };
    let n = branch.len();
    let (parent, kind, at) = super::list_pos(if_path)?;
    let (new, _) = splice(proc, &parent, kind, at, at + 1, branch)?;
    let mut fwd = ForwardingMap::identity();
    for j in 0..n {
        let old_edge = match branch_kind {
            Edge::Body(_) => Edge::Body(j),
            _ => Edge::Orelse(j),
        };
        fwd = fwd.relocate(if_path.child(old_edge), parent.child(kind.edge(at + j)));
    }
    fwd = fwd.spliced(parent, kind, at, 1, n);
    Ok((new, fwd))
}

/// Merge two adjacent writes to the same location:
/// `a = x; a = y → a = y` · `a += x; a = y → a = y` ·
/// `a = x; a += y → a = x + y` · `a += x; a += y → a += x + y`.
pub fn merge_writes(
    proc: &Proc,
    parent: &CursorPath,
    kind: BlockKind,
    lo: usize,
    hi: usize,
) -> RewriteResult {
    if hi - lo != 2 {
        return Err(RewriteError::precondition(
            "merge_writes needs a block of exactly two statements",
        ));
    }
    let list = list_at(proc, parent, kind)?;
    let (s1, s2) = match (list.get(lo), list.get(lo + 1)) {
        (Some(a), Some(b)) => (a.clone(), b.clone()),
        _ => return Err(RewriteError::BadCursor),
    };

    let parts = |s: &Stmt| match &s.data {
        StmtKind::Assign { name, ty, idx, rhs } => {
            Some((false, name.clone(), ty.clone(), idx.clone(), rhs.clone()))
        }
        StmtKind::Reduce { name, ty, idx, rhs } => {
            Some((true, name.clone(), ty.clone(), idx.clone(), rhs.clone()))
        }
        _ => None,
    };
    let (red1, n1, ty, idx1, rhs1) = parts(&s1).ok_or_else(|| {
        RewriteError::precondition("merge_writes applies to assignments and reductions")
    })?;
    let (red2, n2, _, idx2, rhs2) = parts(&s2).ok_or_else(|| {
        RewriteError::precondition("merge_writes applies to assignments and reductions")
    })?;
    if n1 != n2
        || idx1.len() != idx2.len()
        || idx1
            .iter()
            .zip(&idx2)
            .any(|(a, b)| fmt::expr_to_string(a) != fmt::expr_to_string(b))
    {
        return Err(RewriteError::precondition(
            "the two writes target different locations",
        ));
    }
    // the second right-hand side must not read the written location
    // through the first write (merging would reorder that read)
    if !red2 && rhs2.reads_sym(&n1) {
        return Err(RewriteError::precondition(
            "the second write reads the location it overwrites",
        ));
    }

    let merged_data = match (red1, red2) {
        (_, false) => StmtKind::Assign {
            name: n1,
            ty,
            idx: idx1,
            rhs: rhs2,
        },
        (false, true) => StmtKind::Assign {
            name: n1,
            ty,
            idx: idx1,
            rhs: add(rhs1, rhs2),
        },
        (true, true) => StmtKind::Reduce {
            name: n1,
            ty,
            idx: idx1,
            rhs: add(rhs1, rhs2),
        },
    };
    let merged = Stmt {
        data: merged_data,
        srcinfo: s1.srcinfo.clone(),
    };

    let (new, _) = splice(proc, parent, kind, lo, hi, vec![merged])?;
    let fwd = ForwardingMap::identity()
        .tombstone(parent.child(kind.edge(lo + 1)))
        .spliced(parent.clone(), kind, lo, 2, 1);
    Ok((new, fwd))
}

/// Rewrite `x = 0; for i: x += c · f(i)` into
/// `x = 0; for i: x += f(i); x = c · x` when `c` is loop-invariant.
pub fn lift_reduce_constant(
    proc: &Proc,
    parent: &CursorPath,
    kind: BlockKind,
    lo: usize,
    hi: usize,
) -> RewriteResult {
    if hi - lo != 2 {
        return Err(RewriteError::precondition(
            "lift_reduce_constant needs an init statement followed by a loop",
        ));
    }
    let list = list_at(proc, parent, kind)?;
    let init = list[lo].clone();
    let loop_stmt = list[lo + 1].clone();

    let (buf, buf_ty, buf_idx) = match &init.data {
        StmtKind::Assign { name, ty, idx, rhs }
            if matches!(
                rhs.data,
                ExprKind::Const(crate::ir::expr::Value::Float(v)) if v == 0.0
            ) =>
        {
            (name.clone(), ty.clone(), idx.clone())
        }
        _ => {
            return Err(RewriteError::precondition(
                "the first statement must zero-initialize the accumulator",
            ))
        }
    };
    let StmtKind::For {
        iter,
        hi: bound,
        body,
        kind: lk,
    } = &loop_stmt.data
    else {
        return Err(RewriteError::precondition(
            "the second statement must be a loop",
        ));
    };
    let [reduce_stmt] = body.as_slice() else {
        return Err(RewriteError::precondition(
            "the loop body must be a single reduction",
        ));
    };
    let StmtKind::Reduce { name, ty, idx, rhs } = &reduce_stmt.data else {
        return Err(RewriteError::precondition(
            "the loop body must be a single reduction",
        ));
    };
    if name != &buf
        || idx.len() != buf_idx.len()
        || idx
            .iter()
            .zip(&buf_idx)
            .any(|(a, b)| fmt::expr_to_string(a) != fmt::expr_to_string(b))
    {
        return Err(RewriteError::precondition(
            "the loop must reduce into the initialized location",
        ));
    }
    let ExprKind::BinOp {
        op: BinOp::Mul,
        lhs: c,
        rhs: f,
    } = &rhs.data
    else {
        return Err(RewriteError::precondition(
            "the reduction must have the shape x += c * f(i)",
        ));
    };
    if c.reads_sym(iter) {
        return Err(RewriteError::precondition(
            "the lifted factor must be loop-invariant",
        ));
    }
    // the factor must also be unaffected by the loop itself
    let eff = crate::analysis::effects::Effects::of_block(body);
    let mut c_reads = Vec::new();
    c.walk(&mut |e| {
        if let ExprKind::Read { name, .. } = &e.data {
            c_reads.push(name.clone());
        }
    });
    for r in &c_reads {
        if eff.writes(r) {
            return Err(RewriteError::precondition(
                "the lifted factor is written inside the loop",
            ));
        }
    }

    let new_reduce = Stmt {
        data: StmtKind::Reduce {
            name: name.clone(),
            ty: ty.clone(),
            idx: idx.clone(),
            rhs: (**f).clone(),
        },
        srcinfo: reduce_stmt.srcinfo.clone(),
    };
    let new_loop = Stmt {
        data: StmtKind::For {
            iter: iter.clone(),
            hi: bound.clone(),
            body: vec![new_reduce],
            kind: *lk,
        },
        srcinfo: loop_stmt.srcinfo.clone(),
    };
    let scale = Stmt {
        data: StmtKind::Assign {
            name: buf.clone(),
            ty: buf_ty.clone(),
            idx: buf_idx.clone(),
            rhs: mul(
                (**c).clone(),
                Expr::new(
                    ExprKind::Read {
                        name: buf.clone(),
                        idx: buf_idx.clone(),
                    },
                    ty.clone(),
                ),
            ),
        },
        srcinfo: loop_stmt.srcinfo.clone(),
    };

    let (new, _) = splice(proc, parent, kind, lo, hi, vec![init, new_loop, scale])?;
    let fwd = ForwardingMap::identity().spliced(parent.clone(), kind, lo, 2, 3);
    Ok((new, fwd))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fmt::proc_to_string;
    use crate::ir::build::*;
    use crate::ir::sym::SymGen;
    use crate::ir::types::LoopType;
    use crate::ir::SrcInfo;
    use indoc::indoc;

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
    fn specialize_builds_a_cascade() {
        let mut r#gen = SymGen::starting_at(1);
        let x = r#gen.fresh("x");
        let n = r#gen.fresh("n");
        let p = Proc {
            name: "t".to_string(),
            args: vec![crate::ir::ProcArg {
                name: n.clone(),
                ty: LoopType::Size,
                mem: None,
                srcinfo: SrcInfo::default(),
            }],
            preds: vec![],
            body: vec![
                alloc(&x, LoopType::R),
                assign(&x, LoopType::R, vec![], float(1.0)),
            ],
            instr: None,
            srcinfo: SrcInfo::default(),
        };
        let conds = vec![eq(read(&n, LoopType::Size), int(0))];
        let (p2, _) = specialize(&p, &CursorPath::root(), BlockKind::Body, 1, 2, &conds).unwrap();
        assert_eq!(
            proc_to_string(&p2),
            indoc! {"
                def t(n: size):
                    x : R
                    if n == 0:
                        x = 1.0
                    else:
                        x = 1.0"}
        );
    }

    #[test]
    fn assert_if_resolves_provable_branch() {
        let mut r#gen = SymGen::starting_at(1);
        let x = r#gen.fresh("x");
        let i = r#gen.fresh("i");
        // for i in seq(0, 4): if i < 4: x = 1.0 else: x = 2.0
        let p = proc_of(vec![
            alloc(&x, LoopType::R),
            seq_for(
                &i,
                int(4),
                vec![if_(
                    lt(read(&i, LoopType::Index), int(4)),
                    vec![assign(&x, LoopType::R, vec![], float(1.0))],
                    vec![assign(&x, LoopType::R, vec![], float(2.0))],
                )],
            ),
        ]);
        let if_path = CursorPath(vec![Edge::Body(1), Edge::Body(0)]);
        let (p2, _) = assert_if(&p, &if_path, true).unwrap();
        assert_eq!(
            proc_to_string(&p2),
            indoc! {"
                def t():
                    x : R
                    for i in seq(0, 4):
                        x = 1.0"}
        );
        // the false branch is not provable
        assert!(assert_if(&p, &if_path, false).is_err());
    }

    #[test]
    fn merge_writes_all_four_shapes() {
        let mut r#gen = SymGen::starting_at(1);
        let a = r#gen.fresh("a");
        let cases: Vec<(Stmt, Stmt, &str)> = vec![
            (
                assign(&a, LoopType::R, vec![], float(1.0)),
                assign(&a, LoopType::R, vec![], float(2.0)),
                "a = 2.0",
            ),
            (
                reduce(&a, LoopType::R, vec![], float(1.0)),
                assign(&a, LoopType::R, vec![], float(2.0)),
                "a = 2.0",
            ),
            (
                assign(&a, LoopType::R, vec![], float(1.0)),
                reduce(&a, LoopType::R, vec![], float(2.0)),
                "a = 1.0 + 2.0",
            ),
            (
                reduce(&a, LoopType::R, vec![], float(1.0)),
                reduce(&a, LoopType::R, vec![], float(2.0)),
                "a += 1.0 + 2.0",
            ),
        ];
        for (s1, s2, expected) in cases {
            let p = proc_of(vec![alloc(&a, LoopType::R), s1, s2]);
            let (p2, _) =
                merge_writes(&p, &CursorPath::root(), BlockKind::Body, 1, 3).unwrap();
            assert_eq!(p2.body.len(), 2);
            assert_eq!(crate::fmt::stmt_to_string(&p2.body[1]), expected);
        }
    }

    #[test]
    fn lift_reduce_constant_hoists_factor() {
        let mut r#gen = SymGen::starting_at(1);
        let x = r#gen.fresh("x");
        let c = r#gen.fresh("c");
        let y = r#gen.fresh("y");
        let i = r#gen.fresh("i");
        let p = proc_of(vec![
            alloc(&x, LoopType::R),
            alloc(&c, LoopType::R),
            alloc(&y, tensor(LoopType::R, vec![int(8)])),
            assign(&x, LoopType::R, vec![], float(0.0)),
            seq_for(
                &i,
                int(8),
                vec![reduce(
                    &x,
                    LoopType::R,
                    vec![],
                    mul(
                        read(&c, LoopType::R),
                        read_idx(&y, LoopType::R, vec![read(&i, LoopType::Index)]),
                    ),
                )],
            ),
        ]);
        let (p2, _) =
            lift_reduce_constant(&p, &CursorPath::root(), BlockKind::Body, 3, 5).unwrap();
        assert_eq!(
            proc_to_string(&p2),
            indoc! {"
                def t():
                    x : R
                    c : R
                    y : R[8]
                    x = 0.0
                    for i in seq(0, 8):
                        x += y[i]
                    x = c * x"}
        );
    }
}
