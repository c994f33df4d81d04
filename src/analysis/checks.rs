//! The contracts rewrites discharge before transforming IR.
//!
//! Every check either proves its property within the affine fragment,
//! produces a concrete counterexample, or reports the query undecidable;
//! the calling rewrite turns the latter two into `PreconditionUnmet`.

use itertools::Itertools;
use log::debug;
use thiserror::Error;

use crate::analysis::affine::{lin_of_cond, lin_of_expr, LinCon, LinExpr};
use crate::analysis::effects::{Access, AccessKind, CtxItem, Effects};
use crate::analysis::solver::{check_sat, model_to_string, Verdict};
use crate::ir::expr::Expr;
use crate::ir::proc::Proc;
use crate::ir::stmt::{Stmt, StmtKind};
use crate::ir::sym::{Sym, SymGen};
use crate::cursors::{resolve_stmt_list, BlockKind, CursorPath};

#[derive(Debug, Error)]
pub enum CheckFailure {
    #[error("counterexample: {0}")]
    Counterexample(String),
    #[error("undecidable within the affine fragment")]
    Undecidable,
}

fn verdict_to_result(v: Verdict) -> Result<(), CheckFailure> {
    match v {
        Verdict::Unsat => Ok(()),
        Verdict::Sat(model) => Err(CheckFailure::Counterexample(model_to_string(&model))),
        Verdict::Unknown => Err(CheckFailure::Undecidable),
    }
}

/// Constraints implied by a binder context. Non-affine binders contribute
/// nothing, which only ever weakens what we can prove.
pub(crate) fn ctx_cons(ctx: &[CtxItem]) -> Vec<LinCon> {
    let mut cons = Vec::new();
    for item in ctx {
        match item {
            CtxItem::Loop { iter, hi, .. } => {
                cons.push(LinCon::Le(LinExpr::var(iter).neg()));
                if let Some(h) = lin_of_expr(hi) {
                    cons.push(LinCon::lt(&LinExpr::var(iter), &h));
                }
            }
            CtxItem::Assume(c) => {
                if let Some(cs) = lin_of_cond(c, false) {
                    cons.extend(cs);
                }
            }
            CtxItem::AssumeNot(c) => {
                if let Some(cs) = lin_of_cond(c, true) {
                    cons.extend(cs);
                }
            }
        }
    }
    cons
}

fn proc_pred_cons(proc: &Proc) -> Vec<LinCon> {
    let mut cons = Vec::new();
    for p in &proc.preds {
        if let Some(cs) = lin_of_cond(p, false) {
            cons.extend(cs);
        }
    }
    // size arguments are nonnegative
    for arg in &proc.args {
        if arg.ty == crate::ir::LoopType::Size {
            cons.push(LinCon::Le(LinExpr::var(&arg.name).neg()));
        }
    }
    cons
}

/// Every access of `buf` within `stmts` stays inside `dims`.
pub fn safe_access(proc: &Proc, stmts: &[Stmt], buf: &Sym, dims: &[Expr]) -> Result<(), CheckFailure> {
    let eff = Effects::of_block(stmts);
    let base = proc_pred_cons(proc);
    for access in eff.accesses_of(buf) {
        if access.idx.is_empty() {
            continue;
        }
        if access.idx.len() != dims.len() {
            return Err(CheckFailure::Undecidable);
        }
        let ctx = ctx_cons(&access.ctx);
        for (i, d) in access.idx.iter().zip(dims) {
            let (Some(i), Some(d)) = (lin_of_expr(i), lin_of_expr(d)) else {
                return Err(CheckFailure::Undecidable);
            };
            // idx < 0 reachable?
            let mut low = base.clone();
            low.extend(ctx.iter().cloned());
            low.push(LinCon::lt(&i, &LinExpr::constant(0)));
            verdict_to_result(check_sat(&low))?;
            // idx >= extent reachable?
            let mut high = base.clone();
            high.extend(ctx.iter().cloned());
            high.push(LinCon::ge(&i, &d));
            verdict_to_result(check_sat(&high))?;
        }
    }
    Ok(())
}

fn rename_access_cons(access: &Access, iter: &Sym, to: &Sym) -> Option<(Vec<LinCon>, Vec<LinExpr>)> {
    let cons = ctx_cons(&access.ctx)
        .into_iter()
        .map(|c| match c {
            LinCon::Le(l) => LinCon::Le(l.rename(iter, to)),
            LinCon::Eq(l) => LinCon::Eq(l.rename(iter, to)),
        })
        .collect();
    let idx = access
        .idx
        .iter()
        .map(|e| lin_of_expr(e).map(|l| l.rename(iter, to)))
        .collect::<Option<Vec<_>>>()?;
    Some((cons, idx))
}

/// No two distinct iterations of `iter` touch the same location of any
/// buffer with a conflicting access pair. Required before a loop may be
/// (or stay) parallel, and by `remove_loop`/`add_loop`.
pub fn independent(
    proc: &Proc,
    iter: &Sym,
    body: &[Stmt],
    r#gen: &mut SymGen,
) -> Result<(), CheckFailure> {
    let eff = Effects::of_block(body);
    let i1 = r#gen.fresh(iter.name());
    let i2 = r#gen.fresh(iter.name());
    let base = proc_pred_cons(proc);

    for (a, b) in eff.accesses.iter().cartesian_product(eff.accesses.iter()) {
        if a.buf != b.buf || !a.kind.conflicts_with(b.kind) {
            continue;
        }
        // only conflicts that vary with this iterator matter; accesses
        // whose context does not include `iter` are hoisted replicas
        let Some((cons_a, idx_a)) = rename_access_cons(a, iter, &i1) else {
            return Err(CheckFailure::Undecidable);
        };
        let Some((cons_b, idx_b)) = rename_access_cons(b, iter, &i2) else {
            return Err(CheckFailure::Undecidable);
        };
        if idx_a.len() != idx_b.len() {
            return Err(CheckFailure::Undecidable);
        }
        let mut cons = base.clone();
        cons.extend(cons_a);
        cons.extend(cons_b);
        // iterations are distinct
        cons.push(LinCon::lt(&LinExpr::var(&i1), &LinExpr::var(&i2)));
        // same location
        for (la, lb) in idx_a.iter().zip(&idx_b) {
            cons.push(LinCon::eq(la, lb));
        }
        if let Err(e) = verdict_to_result(check_sat(&cons)) {
            debug!(
                "independence of '{iter}' fails on buffer '{}': {e}",
                a.buf
            );
            return Err(e);
        }
    }
    Ok(())
}

/// Loop interchange legality for perfectly nested `outer`/`inner`: no
/// dependence whose direction flips under the swap.
pub fn reorder_safe(
    proc: &Proc,
    outer: &Sym,
    inner: &Sym,
    body: &[Stmt],
    r#gen: &mut SymGen,
) -> Result<(), CheckFailure> {
    let eff = Effects::of_block(body);
    let o1 = r#gen.fresh(outer.name());
    let o2 = r#gen.fresh(outer.name());
    let n1 = r#gen.fresh(inner.name());
    let n2 = r#gen.fresh(inner.name());
    let base = proc_pred_cons(proc);

    for (a, b) in eff.accesses.iter().cartesian_product(eff.accesses.iter()) {
        if a.buf != b.buf || !a.kind.conflicts_with(b.kind) {
            continue;
        }
        let rename2 = |acc: &Access, to_o: &Sym, to_n: &Sym| -> Option<(Vec<LinCon>, Vec<LinExpr>)> {
            let (cons, idx) = rename_access_cons(acc, outer, to_o)?;
            let cons = cons
                .into_iter()
                .map(|c| match c {
                    LinCon::Le(l) => LinCon::Le(l.rename(inner, to_n)),
                    LinCon::Eq(l) => LinCon::Eq(l.rename(inner, to_n)),
                })
                .collect();
            let idx = idx.into_iter().map(|l| l.rename(inner, to_n)).collect();
            Some((cons, idx))
        };
        let Some((cons_a, idx_a)) = rename2(a, &o1, &n1) else {
            return Err(CheckFailure::Undecidable);
        };
        let Some((cons_b, idx_b)) = rename2(b, &o2, &n2) else {
            return Err(CheckFailure::Undecidable);
        };
        if idx_a.len() != idx_b.len() {
            return Err(CheckFailure::Undecidable);
        }
        // a dependence with direction (o1 < o2, n1 > n2) flips order
        // under interchange
        let mut cons = base.clone();
        cons.extend(cons_a);
        cons.extend(cons_b);
        cons.push(LinCon::lt(&LinExpr::var(&o1), &LinExpr::var(&o2)));
        cons.push(LinCon::gt(&LinExpr::var(&n1), &LinExpr::var(&n2)));
        for (la, lb) in idx_a.iter().zip(&idx_b) {
            cons.push(LinCon::eq(la, lb));
        }
        verdict_to_result(check_sat(&cons))?;
    }
    Ok(())
}

/// Fusion legality: nothing in the second body conflicts with a later
/// iteration of the first body.
pub fn fuse_safe(
    proc: &Proc,
    iter1: &Sym,
    body1: &[Stmt],
    iter2: &Sym,
    body2: &[Stmt],
    r#gen: &mut SymGen,
) -> Result<(), CheckFailure> {
    let eff1 = Effects::of_block(body1);
    let eff2 = Effects::of_block(body2);
    let i1 = r#gen.fresh(iter1.name());
    let i2 = r#gen.fresh(iter2.name());
    let base = proc_pred_cons(proc);

    for (a, b) in eff1.accesses.iter().cartesian_product(eff2.accesses.iter()) {
        if a.buf != b.buf || !a.kind.conflicts_with(b.kind) {
            continue;
        }
        let Some((cons_a, idx_a)) = rename_access_cons(a, iter1, &i1) else {
            return Err(CheckFailure::Undecidable);
        };
        let Some((cons_b, idx_b)) = rename_access_cons(b, iter2, &i2) else {
            return Err(CheckFailure::Undecidable);
        };
        if idx_a.len() != idx_b.len() {
            return Err(CheckFailure::Undecidable);
        }
        // after fusion body2(i2) runs before body1(i1) whenever i2 < i1
        let mut cons = base.clone();
        cons.extend(cons_a);
        cons.extend(cons_b);
        cons.push(LinCon::lt(&LinExpr::var(&i2), &LinExpr::var(&i1)));
        for (la, lb) in idx_a.iter().zip(&idx_b) {
            cons.push(LinCon::eq(la, lb));
        }
        verdict_to_result(check_sat(&cons))?;
    }
    Ok(())
}

/// Fission legality at a split of a loop body into `pre`/`post`: after
/// fission every `pre(i)` runs before every `post(j)`, so a conflict
/// between `post(i1)` and `pre(i2)` with `i1 < i2` flips order.
pub fn fission_safe(
    proc: &Proc,
    iter: &Sym,
    pre: &[Stmt],
    post: &[Stmt],
    r#gen: &mut SymGen,
) -> Result<(), CheckFailure> {
    let eff_pre = Effects::of_block(pre);
    let eff_post = Effects::of_block(post);
    let i1 = r#gen.fresh(iter.name());
    let i2 = r#gen.fresh(iter.name());
    let base = proc_pred_cons(proc);

    for (a, b) in eff_post
        .accesses
        .iter()
        .cartesian_product(eff_pre.accesses.iter())
    {
        if a.buf != b.buf || !a.kind.conflicts_with(b.kind) {
            continue;
        }
        let Some((cons_a, idx_a)) = rename_access_cons(a, iter, &i1) else {
            return Err(CheckFailure::Undecidable);
        };
        let Some((cons_b, idx_b)) = rename_access_cons(b, iter, &i2) else {
            return Err(CheckFailure::Undecidable);
        };
        if idx_a.len() != idx_b.len() {
            return Err(CheckFailure::Undecidable);
        }
        let mut cons = base.clone();
        cons.extend(cons_a);
        cons.extend(cons_b);
        cons.push(LinCon::lt(&LinExpr::var(&i1), &LinExpr::var(&i2)));
        for (la, lb) in idx_a.iter().zip(&idx_b) {
            cons.push(LinCon::eq(la, lb));
        }
        verdict_to_result(check_sat(&cons))?;
    }
    Ok(())
}

/// Effect commutativity of two adjacent statements: no RAW/WAR/WAW pair
/// in either direction may touch the same location.
pub fn commute(proc: &Proc, s1: &Stmt, s2: &Stmt) -> Result<(), CheckFailure> {
    let e1 = Effects::of_stmt(s1);
    let e2 = Effects::of_stmt(s2);
    let base = proc_pred_cons(proc);
    for (a, b) in e1.accesses.iter().cartesian_product(e2.accesses.iter()) {
        if a.buf != b.buf || !a.kind.conflicts_with(b.kind) {
            continue;
        }
        if a.idx.len() != b.idx.len() {
            return Err(CheckFailure::Undecidable);
        }
        let mut cons = base.clone();
        cons.extend(ctx_cons(&a.ctx));
        cons.extend(ctx_cons(&b.ctx));
        for (ia, ib) in a.idx.iter().zip(&b.idx) {
            let (Some(la), Some(lb)) = (lin_of_expr(ia), lin_of_expr(ib)) else {
                return Err(CheckFailure::Undecidable);
            };
            cons.push(LinCon::eq(&la, &lb));
        }
        verdict_to_result(check_sat(&cons))?;
    }
    for (c1, c2) in e1.configs.iter().cartesian_product(e2.configs.iter()) {
        use crate::analysis::effects::ConfigAccessKind::Write;
        if c1.config == c2.config
            && c1.field == c2.field
            && (c1.kind == Write || c2.kind == Write)
        {
            return Err(CheckFailure::Counterexample(format!(
                "both touch {}.{}",
                c1.config, c1.field
            )));
        }
    }
    Ok(())
}

/// Structural idempotence: running the block twice in a row leaves the
/// same state as running it once.
///
/// The approximation is the usual one: every write must be an `Assign`
/// whose right-hand side (and indices) depend on nothing the block itself
/// writes; reduces, config writes, and calls disqualify outright.
pub fn idempotent(stmts: &[Stmt]) -> bool {
    let eff = Effects::of_block(stmts);
    if eff.writes_config() {
        return false;
    }
    let mut has_call_or_reduce = false;
    for s in stmts {
        s.walk(&mut |s| {
            if matches!(s.data, StmtKind::Call { .. } | StmtKind::Reduce { .. }) {
                has_call_or_reduce = true;
            }
        });
    }
    if has_call_or_reduce {
        return false;
    }
    let written = eff.written_bufs();
    for a in &eff.accesses {
        if a.kind == AccessKind::Read && written.contains(&a.buf) {
            return false;
        }
    }
    true
}

/// `buf` is not read at any point reachable after the position `(parent,
/// kind, at)`: later statements of every enclosing block, plus every
/// enclosing loop body again (the next iteration).
pub fn dead_after(
    proc: &Proc,
    buf: &Sym,
    parent: &CursorPath,
    kind: BlockKind,
    at: usize,
) -> bool {
    // later statements of the block itself
    if let Some(list) = resolve_stmt_list(proc, parent, kind) {
        for s in &list[at.min(list.len())..] {
            if Effects::of_stmt(s).reads(buf) {
                return false;
            }
        }
    }

    // walk up the spine: later siblings at each level, and full loop
    // bodies for enclosing loops
    let mut path = parent.clone();
    loop {
        let Some((up, last)) = path.parent() else {
            break;
        };
        if let Some(s) = crate::cursors::resolve_stmt(proc, &path)
            && matches!(s.data, StmtKind::For { .. })
            && Effects::of_stmt(s).reads(buf)
        {
            return false;
        }
        if let Some((k, i)) = last.block_index()
            && let Some(list) = resolve_stmt_list(proc, &up, k)
        {
            for s in &list[(i + 1).min(list.len())..] {
                if Effects::of_stmt(s).reads(buf) {
                    return false;
                }
            }
        }
        path = up;
    }
    true
}
