//! Loop transforms: splitting, merging, interchange, fission/fusion,
//! removal, introduction, unrolling, and scope lifting.

use strum_macros::{Display, EnumString};

use crate::analysis::checks;
use crate::cursors::{BlockKind, CursorPath, Edge, ForwardingMap};
use crate::ir::build::{add, int, lt, mul, read, sub};
use crate::ir::expr::{BinOp, Expr, ExprKind};
use crate::ir::proc::Proc;
use crate::ir::stmt::{LoopKind, Stmt, StmtKind};
use crate::ir::subst::Subst;
use crate::ir::sym::{Sym, SymGen};
use crate::ir::types::LoopType;

use super::{expect_loop, list_at, list_pos, splice, stmt_at, RewriteError, RewriteResult};

/// Remainder-handling strategy for `divide_loop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum TailStrategy {
    #[strum(serialize = "cut")]
    Cut,
    #[strum(serialize = "guard")]
    Guard,
    #[strum(serialize = "cut_and_guard")]
    CutAndGuard,
}

fn loop_stmt(iter: &Sym, hi: Expr, body: Vec<Stmt>, kind: LoopKind, srcinfo: &crate::ir::SrcInfo) -> Stmt {
    Stmt {
        data: StmtKind::For {
            iter: iter.clone(),
            hi,
            body,
            kind,
        },
        srcinfo: srcinfo.clone(),
    }
}

/// Can we show `q` divides the loop bound? Literal bounds are checked
/// directly; symbolic bounds require an explicit `N % q == 0` predicate.
fn divides(proc: &Proc, hi: &Expr, q: i64) -> bool {
    if let Some(n) = hi.as_const_int() {
        return n % q == 0;
    }
    proc.preds.iter().any(|p| match &p.data {
        ExprKind::BinOp {
            op: BinOp::Eq,
            lhs,
            rhs,
        } => {
            let zero = rhs.as_const_int() == Some(0);
            let modulo = match &lhs.data {
                ExprKind::BinOp {
                    op: BinOp::Mod,
                    lhs: ml,
                    rhs: mr,
                } => mr.as_const_int() == Some(q) && ml.as_ref() == hi,
                _ => false,
            };
            zero && modulo
        }
        _ => false,
    })
}

/// Split a loop into an outer and inner loop of quotient `q`, with the
/// chosen tail strategy. `perfect` asserts (and verifies) that `q`
/// divides the bound, eliding the tail entirely.
pub fn divide_loop(
    proc: &Proc,
    loop_path: &CursorPath,
    q: i64,
    outer_name: &str,
    inner_name: &str,
    tail: TailStrategy,
    perfect: bool,
) -> RewriteResult {
    if q <= 1 {
        return Err(RewriteError::precondition(
            "loop division needs a quotient greater than 1",
        ));
    }
    let (iter, hi, body, kind) = expect_loop(proc, loop_path)?;
    let (iter, hi, body) = (iter.clone(), hi.clone(), body.to_vec());
    let srcinfo = stmt_at(proc, loop_path)?.srcinfo.clone();

    let mut r#gen = SymGen::for_proc(proc);
    let outer = r#gen.fresh(outer_name);
    let inner = r#gen.fresh(inner_name);

    let point = add(
        mul(int(q), read(&outer, LoopType::Index)),
        read(&inner, LoopType::Index),
    );
    let main_body = Subst::one(&iter, point.clone()).apply_block(&body);

    // N / q, folded when literal
    let div_bound = |n: &Expr, q: i64| -> Expr {
        crate::rewrites::simplify::fold_expr(&Expr::new(
            ExprKind::BinOp {
                op: BinOp::Div,
                lhs: Box::new(n.clone()),
                rhs: Box::new(int(q)),
            },
            LoopType::Index,
        ))
    };
    let remainder = |n: &Expr, q: i64| -> Expr {
        // N - q * (N / q)
        crate::rewrites::simplify::fold_expr(&sub(n.clone(), mul(int(q), div_bound(n, q))))
    };

    let mut replacement: Vec<Stmt> = Vec::new();
    if perfect {
        if !divides(proc, &hi, q) {
            return Err(RewriteError::precondition(format!(
                "cannot verify that {q} divides the loop bound",
            )));
        }
        let inner_loop = loop_stmt(&inner, int(q), main_body, kind, &srcinfo);
        replacement.push(loop_stmt(
            &outer,
            div_bound(&hi, q),
            vec![inner_loop],
            kind,
            &srcinfo,
        ));
    } else {
        match tail {
            TailStrategy::Guard => {
                // ceil(N/q) outer trips, inner guard q·hi+lo < N
                let ceil = div_bound(&add(hi.clone(), int(q - 1)), q);
                let guarded = Stmt {
                    data: StmtKind::If {
                        cond: lt(point.clone(), hi.clone()),
                        body: main_body,
                        orelse: vec![],
                    },
                    srcinfo: srcinfo.clone(),
                };
                let inner_loop = loop_stmt(&inner, int(q), vec![guarded], kind, &srcinfo);
                replacement.push(loop_stmt(&outer, ceil, vec![inner_loop], kind, &srcinfo));
            }
            TailStrategy::Cut => {
                let inner_loop = loop_stmt(&inner, int(q), main_body, kind, &srcinfo);
                replacement.push(loop_stmt(
                    &outer,
                    div_bound(&hi, q),
                    vec![inner_loop],
                    kind,
                    &srcinfo,
                ));
                // trailing remainder loop over  i := q*(N/q) + lo
                let base = crate::rewrites::simplify::fold_expr(&mul(
                    int(q),
                    div_bound(&hi, q),
                ));
                let tail_body = Subst::one(
                    &iter,
                    add(base, read(&inner, LoopType::Index)),
                )
                .apply_block(&body);
                replacement.push(loop_stmt(
                    &inner,
                    remainder(&hi, q),
                    tail_body,
                    kind,
                    &srcinfo,
                ));
            }
            TailStrategy::CutAndGuard => {
                let inner_loop = loop_stmt(&inner, int(q), main_body, kind, &srcinfo);
                replacement.push(loop_stmt(
                    &outer,
                    div_bound(&hi, q),
                    vec![inner_loop],
                    kind,
                    &srcinfo,
                ));
                let rem = remainder(&hi, q);
                let base = crate::rewrites::simplify::fold_expr(&mul(
                    int(q),
                    div_bound(&hi, q),
                ));
                let tail_body = Subst::one(
                    &iter,
                    add(base, read(&inner, LoopType::Index)),
                )
                .apply_block(&body);
                let tail_loop = loop_stmt(&inner, rem.clone(), tail_body, kind, &srcinfo);
                replacement.push(Stmt {
                    data: StmtKind::If {
                        cond: crate::ir::build::binop(BinOp::Gt, rem, int(0)),
                        body: vec![tail_loop],
                        orelse: vec![],
                    },
                    srcinfo: srcinfo.clone(),
                });
            }
        }
    }

    let (parent, pkind, at) = list_pos(loop_path)?;
    let inserted = replacement.len();
    let (new, _) = splice(proc, &parent, pkind, at, at + 1, replacement)?;

    // the loop maps to the new outer loop; its body statements map into
    // the main copy (through the inner loop, plus the guard when present)
    let mut fwd = ForwardingMap::identity();
    let outer_path = parent.child(pkind.edge(at));
    let mut body_prefix = outer_path.child(Edge::Body(0)); // inner loop
    if !perfect && tail == TailStrategy::Guard {
        body_prefix = body_prefix.child(Edge::Body(0)); // the guard
    }
    for j in 0..body.len() {
        fwd = fwd.relocate(
            loop_path.child(Edge::Body(j)),
            body_prefix.child(Edge::Body(j)),
        );
    }
    fwd = fwd.spliced(parent, pkind, at, 1, inserted);
    Ok((new, fwd))
}

/// Merge two perfectly nested loops, the inner of literal bound `c`,
/// into one loop of bound `c · N` over a fresh iterator.
pub fn mult_loops(proc: &Proc, outer_path: &CursorPath, new_name: &str) -> RewriteResult {
    let (o_iter, o_hi, o_body, o_kind) = expect_loop(proc, outer_path)?;
    let [inner_stmt] = o_body else {
        return Err(RewriteError::precondition(
            "mult_loops needs perfectly nested loops",
        ));
    };
    let StmtKind::For {
        iter: i_iter,
        hi: i_hi,
        body: i_body,
        kind: i_kind,
    } = &inner_stmt.data
    else {
        return Err(RewriteError::precondition(
            "mult_loops needs perfectly nested loops",
        ));
    };
    if o_kind != *i_kind {
        return Err(RewriteError::precondition(
            "cannot merge loops of different kinds",
        ));
    }
    let c = i_hi.as_const_int().ok_or_else(|| {
        RewriteError::precondition("mult_loops needs a literal inner bound")
    })?;
    if c < 1 {
        return Err(RewriteError::precondition("inner bound must be positive"));
    }

    let mut r#gen = SymGen::for_proc(proc);
    let merged = r#gen.fresh(new_name);
    let k = read(&merged, LoopType::Index);
    let o_sub = Expr::new(
        ExprKind::BinOp {
            op: BinOp::Div,
            lhs: Box::new(k.clone()),
            rhs: Box::new(int(c)),
        },
        LoopType::Index,
    );
    let i_sub = Expr::new(
        ExprKind::BinOp {
            op: BinOp::Mod,
            lhs: Box::new(k),
            rhs: Box::new(int(c)),
        },
        LoopType::Index,
    );
    let mut sub = Subst::default();
    sub.exprs.insert(o_iter.clone(), o_sub);
    sub.exprs.insert(i_iter.clone(), i_sub);
    let body = sub.apply_block(i_body);

    let bound = crate::rewrites::simplify::fold_expr(&mul(int(c), o_hi.clone()));
    let srcinfo = stmt_at(proc, outer_path)?.srcinfo.clone();
    let merged_loop = loop_stmt(&merged, bound, body, o_kind, &srcinfo);

    let (parent, pkind, at) = list_pos(outer_path)?;
    let (new, _) = splice(proc, &parent, pkind, at, at + 1, vec![merged_loop])?;
    let mut fwd = ForwardingMap::identity();
    let inner_old = outer_path.child(Edge::Body(0));
    for j in 0..i_body.len() {
        fwd = fwd.relocate(
            inner_old.child(Edge::Body(j)),
            outer_path.child(Edge::Body(j)),
        );
    }
    Ok((new, fwd))
}

/// Split the iteration range `[0, N)` at `k` into `[0, k)` and `[k, N)`.
pub fn cut_loop(proc: &Proc, loop_path: &CursorPath, k: i64) -> RewriteResult {
    let (iter, hi, body, kind) = expect_loop(proc, loop_path)?;
    let (iter, hi, body) = (iter.clone(), hi.clone(), body.to_vec());
    if k < 0 {
        return Err(RewriteError::precondition("cut point must be nonnegative"));
    }
    // k <= N must hold
    if let Some(n) = hi.as_const_int() {
        if k > n {
            return Err(RewriteError::precondition(format!(
                "cut point {k} exceeds the loop bound {n}"
            )));
        }
    } else {
        use crate::analysis::affine::{lin_of_expr, LinCon, LinExpr};
        use crate::analysis::solver::{check_sat, Verdict};
        let Some(hi_lin) = lin_of_expr(&hi) else {
            return Err(RewriteError::precondition("loop bound is not affine"));
        };
        let mut cons = vec![LinCon::gt(&LinExpr::constant(k), &hi_lin)];
        for p in &proc.preds {
            if let Some(cs) = crate::analysis::affine::lin_of_cond(p, false) {
                cons.extend(cs);
            }
        }
        if check_sat(&cons) != Verdict::Unsat {
            return Err(RewriteError::precondition(format!(
                "cannot show the cut point {k} stays within the loop bound"
            )));
        }
    }

    let srcinfo = stmt_at(proc, loop_path)?.srcinfo.clone();
    let mut r#gen = SymGen::for_proc(proc);
    let iter2 = r#gen.fresh(iter.name());
    let head = loop_stmt(&iter, int(k), body.clone(), kind, &srcinfo);
    let tail_body = Subst::one(&iter, add(read(&iter2, LoopType::Index), int(k))).apply_block(&body);
    let tail_bound = crate::rewrites::simplify::fold_expr(&sub(hi, int(k)));
    let tail = loop_stmt(&iter2, tail_bound, tail_body, kind, &srcinfo);

    let (parent, pkind, at) = list_pos(loop_path)?;
    let (new, _) = splice(proc, &parent, pkind, at, at + 1, vec![head, tail])?;
    let fwd = ForwardingMap::identity().spliced(parent, pkind, at, 1, 2);
    Ok((new, fwd))
}

/// Swap two perfectly nested loops. The dependence test must admit the
/// interchange and the inner bound must not use the outer iterator.
pub fn reorder_loops(proc: &Proc, outer_path: &CursorPath) -> RewriteResult {
    let (o_iter, o_hi, o_body, o_kind) = expect_loop(proc, outer_path)?;
    let [inner_stmt] = o_body else {
        return Err(RewriteError::precondition(
            "reorder_loops needs perfectly nested loops",
        ));
    };
    let StmtKind::For {
        iter: i_iter,
        hi: i_hi,
        body: i_body,
        kind: i_kind,
    } = &inner_stmt.data
    else {
        return Err(RewriteError::precondition(
            "reorder_loops needs perfectly nested loops",
        ));
    };
    if o_kind != *i_kind {
        return Err(RewriteError::precondition(
            "cannot reorder loops of different kinds",
        ));
    }
    if i_hi.reads_sym(o_iter) {
        return Err(RewriteError::precondition(format!(
            "inner bound depends on '{o_iter}'"
        )));
    }
    let mut r#gen = SymGen::for_proc(proc);
    checks::reorder_safe(proc, o_iter, i_iter, i_body, &mut r#gen)?;

    let srcinfo = stmt_at(proc, outer_path)?.srcinfo.clone();
    let new_inner = loop_stmt(o_iter, o_hi.clone(), i_body.to_vec(), o_kind, &srcinfo);
    let new_outer = loop_stmt(i_iter, i_hi.clone(), vec![new_inner], *i_kind, &srcinfo);

    let (parent, pkind, at) = list_pos(outer_path)?;
    let (new, _) = splice(proc, &parent, pkind, at, at + 1, vec![new_outer])?;
    // the nest keeps its shape, so interior paths carry over unchanged
    Ok((new, ForwardingMap::identity()))
}

/// Merge two adjacent loops with identical bounds (or two adjacent `if`s
/// with syntactically identical conditions) into one.
pub fn fuse(proc: &Proc, first_path: &CursorPath, second_path: &CursorPath) -> RewriteResult {
    let (parent, kind, at) = list_pos(first_path)?;
    let (parent2, kind2, at2) = list_pos(second_path)?;
    if parent != parent2 || kind != kind2 || at2 != at + 1 {
        return Err(RewriteError::precondition(
            "fuse needs two adjacent statements",
        ));
    }
    let s1 = stmt_at(proc, first_path)?.clone();
    let s2 = stmt_at(proc, second_path)?.clone();

    let merged = match (&s1.data, &s2.data) {
        (
            StmtKind::For {
                iter: it1,
                hi: h1,
                body: b1,
                kind: k1,
            },
            StmtKind::For {
                iter: it2,
                hi: h2,
                body: b2,
                kind: k2,
            },
        ) => {
            if k1 != k2 {
                return Err(RewriteError::precondition(
                    "cannot fuse loops of different kinds",
                ));
            }
            if crate::fmt::expr_to_string(h1) != crate::fmt::expr_to_string(h2) {
                return Err(RewriteError::precondition(
                    "cannot fuse loops with different bounds",
                ));
            }
            let mut r#gen = SymGen::for_proc(proc);
            checks::fuse_safe(proc, it1, b1, it2, b2, &mut r#gen)?;
            let b2 = Subst::one(it2, read(it1, LoopType::Index)).apply_block(b2);
            let mut body = b1.clone();
            body.extend(b2);
            // a parallel loop must stay write-disjoint across iterations
            if *k1 == LoopKind::Par {
                checks::independent(proc, it1, &body, &mut r#gen)?;
            }
            loop_stmt(it1, h1.clone(), body, *k1, &s1.srcinfo)
        }
        (
            StmtKind::If {
                cond: c1,
                body: b1,
                orelse: o1,
            },
            StmtKind::If {
                cond: c2,
                body: b2,
                orelse: o2,
            },
        ) => {
            if crate::fmt::expr_to_string(c1) != crate::fmt::expr_to_string(c2) {
                return Err(RewriteError::precondition(
                    "cannot fuse ifs with different conditions",
                ));
            }
            let mut body = b1.clone();
            body.extend(b2.clone());
            let mut orelse = o1.clone();
            orelse.extend(o2.clone());
            Stmt {
                data: StmtKind::If {
                    cond: c1.clone(),
                    body,
                    orelse,
                },
                srcinfo: s1.srcinfo.clone(),
            }
        }
        _ => {
            return Err(RewriteError::precondition(
                "fuse applies to loop or if pairs",
            ))
        }
    };

    let b1_len = s1.child_blocks().0.len();
    let b2_len = s2.child_blocks().0.len();
    let (new, _) = splice(proc, &parent, kind, at, at + 2, vec![merged])?;
    let mut fwd = ForwardingMap::identity();
    let fused_path = parent.child(kind.edge(at));
    for j in 0..b1_len {
        fwd = fwd.relocate(
            first_path.child(Edge::Body(j)),
            fused_path.child(Edge::Body(j)),
        );
    }
    for j in 0..b2_len {
        fwd = fwd.relocate(
            second_path.child(Edge::Body(j)),
            fused_path.child(Edge::Body(b1_len + j)),
        );
    }
    fwd = fwd.spliced(parent, kind, at, 2, 1);
    Ok((new, fwd))
}

/// Split the loop enclosing the gap into two loops at the gap,
/// `n` levels outward.
pub fn fission(
    proc: &Proc,
    gap_parent: &CursorPath,
    gap_kind: BlockKind,
    gap_at: usize,
    n: usize,
    drop_trivial: bool,
) -> RewriteResult {
    let mut current = proc.clone();
    let mut parent = gap_parent.clone();
    let mut kind = gap_kind;
    let mut at = gap_at;
    let mut total = ForwardingMap::identity();

    for _ in 0..n {
        if parent.0.is_empty() {
            return Err(RewriteError::precondition(
                "no enclosing loop to fission",
            ));
        }
        if kind != BlockKind::Body {
            return Err(RewriteError::precondition(
                "fission gap must sit in a loop body",
            ));
        }
        let (iter, hi, body, lk) = expect_loop(&current, &parent)?;
        let (iter, hi, body) = (iter.clone(), hi.clone(), body.to_vec());
        let pre = body[..at].to_vec();
        let post = body[at..].to_vec();

        let mut r#gen = SymGen::for_proc(&current);
        checks::fission_safe(&current, &iter, &pre, &post, &mut r#gen)?;
        for s in &pre {
            let mut defined = Vec::new();
            s.walk(&mut |s| {
                if let StmtKind::Alloc { name, .. } | StmtKind::WindowStmt { name, .. } = &s.data {
                    defined.push(name.clone());
                }
            });
            for d in defined {
                if post.iter().any(|p| p.uses_sym(&d)) {
                    return Err(RewriteError::precondition(format!(
                        "'{d}' is allocated before the gap and used after it"
                    )));
                }
            }
        }

        let srcinfo = stmt_at(&current, &parent)?.srcinfo.clone();
        let mut r#gen = SymGen::for_proc(&current);
        let iter2 = r#gen.fresh(iter.name());
        let post = Subst::one(&iter, read(&iter2, LoopType::Index)).apply_block(&post);

        let pre_len = pre.len();
        let post_len = post.len();
        let mut replacement = Vec::new();
        // with drop_trivial, empty halves vanish and idempotent
        // iterator-independent halves shed their loop
        let trivial = |half: &[Stmt], it: &crate::ir::Sym| {
            drop_trivial
                && !half.is_empty()
                && checks::idempotent(half)
                && !half.iter().any(|s| s.uses_sym(it))
        };
        let unwrap_pre = trivial(&pre, &iter);
        let unwrap_post = trivial(&post, &iter2);
        let keep_pre = !(drop_trivial && pre_len == 0);
        let keep_post = !(drop_trivial && post_len == 0);
        let (gp, gp_kind, gp_at) = list_pos(&parent)?;
        let mut fwd = ForwardingMap::identity();
        // slots taken by the pre half at the grandparent level
        let pre_slots = if !keep_pre {
            0
        } else if unwrap_pre {
            pre_len
        } else {
            1
        };
        if keep_pre {
            if unwrap_pre {
                for (j, s) in pre.iter().enumerate() {
                    fwd = fwd.relocate(
                        parent.child(Edge::Body(j)),
                        gp.child(gp_kind.edge(gp_at + j)),
                    );
                    replacement.push(s.clone());
                }
            } else {
                let pre_loop = gp.child(gp_kind.edge(gp_at));
                for j in 0..pre_len {
                    fwd = fwd.relocate(
                        parent.child(Edge::Body(j)),
                        pre_loop.child(Edge::Body(j)),
                    );
                }
                replacement.push(loop_stmt(&iter, hi.clone(), pre, lk, &srcinfo));
            }
        }
        if keep_post {
            if unwrap_post {
                for (j, s) in post.iter().enumerate() {
                    fwd = fwd.relocate(
                        parent.child(Edge::Body(at + j)),
                        gp.child(gp_kind.edge(gp_at + pre_slots + j)),
                    );
                    replacement.push(s.clone());
                }
            } else {
                let post_loop = gp.child(gp_kind.edge(gp_at + pre_slots));
                for j in 0..post_len {
                    fwd = fwd.relocate(
                        parent.child(Edge::Body(at + j)),
                        post_loop.child(Edge::Body(j)),
                    );
                }
                replacement.push(loop_stmt(&iter2, hi.clone(), post, lk, &srcinfo));
            }
        }

        let inserted = replacement.len();
        let (new, _) = splice(&current, &gp, gp_kind, gp_at, gp_at + 1, replacement)?;
        fwd = fwd.spliced(gp.clone(), gp_kind, gp_at, 1, inserted);
        total = ForwardingMap::chained(total, fwd);
        current = new;

        // the next level's gap sits between the two halves
        parent = gp;
        kind = gp_kind;
        at = gp_at + pre_slots;
    }
    Ok((current, total))
}

/// Drop a loop whose body is idempotent and independent of the iterator.
pub fn remove_loop(proc: &Proc, loop_path: &CursorPath) -> RewriteResult {
    let (iter, hi, body, _) = expect_loop(proc, loop_path)?;
    let (iter, body) = (iter.clone(), body.to_vec());
    if body.iter().any(|s| s.uses_sym(&iter)) {
        return Err(RewriteError::precondition(format!(
            "loop body depends on '{iter}'"
        )));
    }
    if !checks::idempotent(&body) {
        return Err(RewriteError::precondition(
            "loop body is not idempotent; removing the loop would change behavior",
        ));
    }
    // the loop must run at least once for its body to survive
    if let Some(n) = hi.as_const_int()
        && n <= 0
    {
        return Err(RewriteError::precondition(
            "cannot remove a loop that may run zero times",
        ));
    }

    let (parent, kind, at) = list_pos(loop_path)?;
    let body_len = body.len();
    let (new, _) = splice(proc, &parent, kind, at, at + 1, body)?;
    let mut fwd = ForwardingMap::identity();
    for j in 0..body_len {
        fwd = fwd.relocate(
            loop_path.child(Edge::Body(j)),
            parent.child(kind.edge(at + j)),
        );
    }
    fwd = fwd.spliced(parent, kind, at, 1, body_len);
    Ok((new, fwd))
}

/// Wrap a block in a new loop of the requested kind. Without `guard`,
/// the block must be idempotent; with `guard`, the body runs only on
/// iteration zero. Introducing a parallel loop additionally requires a
/// write-disjointness proof across its iterations.
#[allow(clippy::too_many_arguments)]
pub fn add_loop(
    proc: &Proc,
    parent: &CursorPath,
    kind: BlockKind,
    lo: usize,
    hi_idx: usize,
    name: &str,
    bound: Expr,
    guard: bool,
    loop_kind: LoopKind,
) -> RewriteResult {
    let list = list_at(proc, parent, kind)?;
    if lo >= hi_idx || hi_idx > list.len() {
        return Err(RewriteError::BadCursor);
    }
    let block = list[lo..hi_idx].to_vec();
    if !guard && !checks::idempotent(&block) {
        return Err(RewriteError::precondition(
            "block is not idempotent; use guard=true",
        ));
    }
    if !bound.ty.is_indexable() {
        return Err(RewriteError::precondition("loop bound must be indexable"));
    }

    let mut r#gen = SymGen::for_proc(proc);
    let iter = r#gen.fresh(name);
    let srcinfo = block[0].srcinfo.clone();
    let body = if guard {
        vec![Stmt {
            data: StmtKind::If {
                cond: crate::ir::build::eq(read(&iter, LoopType::Index), int(0)),
                body: block.clone(),
                orelse: vec![],
            },
            srcinfo: srcinfo.clone(),
        }]
    } else {
        block.clone()
    };
    if loop_kind == LoopKind::Par {
        checks::independent(proc, &iter, &body, &mut r#gen)?;
    }
    let new_loop = loop_stmt(&iter, bound, body, loop_kind, &srcinfo);

    let (new, _) = splice(proc, parent, kind, lo, hi_idx, vec![new_loop])?;
    let mut fwd = ForwardingMap::identity();
    let loop_node = parent.child(kind.edge(lo));
    let inner = if guard {
        loop_node.child(Edge::Body(0))
    } else {
        loop_node.clone()
    };
    for j in 0..block.len() {
        fwd = fwd.relocate(
            parent.child(kind.edge(lo + j)),
            inner.child(Edge::Body(j)),
        );
    }
    fwd = fwd.spliced(parent.clone(), kind, lo, hi_idx - lo, 1);
    Ok((new, fwd))
}

/// Replace a literal-bound loop by `hi` copies of its body with the
/// iterator substituted; bound 0 becomes `pass`.
pub fn unroll_loop(proc: &Proc, loop_path: &CursorPath) -> RewriteResult {
    let (iter, hi, body, _) = expect_loop(proc, loop_path)?;
    let n = hi.as_const_int().ok_or_else(|| {
        RewriteError::precondition("unroll_loop needs a literal loop bound")
    })?;
    let (iter, body) = (iter.clone(), body.to_vec());

    let mut replacement: Vec<Stmt> = Vec::new();
    if n <= 0 {
        replacement.push(crate::ir::build::pass());
    } else {
        for v in 0..n {
            replacement.extend(Subst::one(&iter, int(v)).apply_block(&body));
        }
    }

    let (parent, kind, at) = list_pos(loop_path)?;
    let body_len = body.len();
    let inserted = replacement.len();
    let (new, _) = splice(proc, &parent, kind, at, at + 1, replacement)?;
    let mut fwd = ForwardingMap::identity();
    // forward body statements to the first unrolled copy
    if n > 0 {
        for j in 0..body_len {
            fwd = fwd.relocate(
                loop_path.child(Edge::Body(j)),
                parent.child(kind.edge(at + j)),
            );
        }
    } else {
        fwd = fwd.tombstone(loop_path.clone());
    }
    fwd = fwd.spliced(parent, kind, at, 1, inserted);
    Ok((new, fwd))
}

/// Hoist an `if` or a loop one level outward past its directly enclosing
/// statement. The hoisted statement must be the sole statement of its
/// parent's block.
pub fn lift_scope(proc: &Proc, stmt_path: &CursorPath) -> RewriteResult {
    let (parent, kind, at) = list_pos(stmt_path)?;
    if parent.0.is_empty() {
        return Err(RewriteError::precondition(
            "statement is already at the outermost scope",
        ));
    }
    let inner = stmt_at(proc, stmt_path)?.clone();
    let outer = stmt_at(proc, &parent)?.clone();
    let (outer_body, outer_orelse) = outer.child_blocks();
    if at != 0
        || kind != BlockKind::Body
        || outer_body.len() != 1
        || !outer_orelse.is_empty()
    {
        return Err(RewriteError::precondition(
            "lift_scope needs the statement to be the sole statement of its scope",
        ));
    }

    let swapped = match (&outer.data, &inner.data) {
        // for i: { if c: A else B }  →  if c: {for i: A} else {for i: B}
        (
            StmtKind::For {
                iter,
                hi,
                kind: lk,
                ..
            },
            StmtKind::If { cond, body, orelse },
        ) => {
            if cond.reads_sym(iter) {
                return Err(RewriteError::precondition(format!(
                    "condition depends on '{iter}'"
                )));
            }
            let then_loop = loop_stmt(iter, hi.clone(), body.clone(), *lk, &outer.srcinfo);
            let else_branch = if orelse.is_empty() {
                vec![]
            } else {
                vec![loop_stmt(iter, hi.clone(), orelse.clone(), *lk, &outer.srcinfo)]
            };
            Stmt {
                data: StmtKind::If {
                    cond: cond.clone(),
                    body: vec![then_loop],
                    orelse: else_branch,
                },
                srcinfo: inner.srcinfo.clone(),
            }
        }
        // if c: {for i: A}  →  for i: {if c: A}
        (
            StmtKind::If { cond, orelse, .. },
            StmtKind::For {
                iter,
                hi,
                body,
                kind: lk,
            },
        ) => {
            if !orelse.is_empty() {
                return Err(RewriteError::precondition(
                    "cannot lift a loop out of an if with an else branch",
                ));
            }
            let guarded = Stmt {
                data: StmtKind::If {
                    cond: cond.clone(),
                    body: body.clone(),
                    orelse: vec![],
                },
                srcinfo: outer.srcinfo.clone(),
            };
            loop_stmt(iter, hi.clone(), vec![guarded], *lk, &inner.srcinfo)
        }
        // if c1: { if c2: A }  →  if c2: { if c1: A }
        (
            StmtKind::If {
                cond: c1,
                orelse: o1,
                ..
            },
            StmtKind::If {
                cond: c2,
                body,
                orelse: o2,
            },
        ) => {
            if !o1.is_empty() || !o2.is_empty() {
                return Err(RewriteError::precondition(
                    "cannot lift across else branches",
                ));
            }
            let inner_if = Stmt {
                data: StmtKind::If {
                    cond: c1.clone(),
                    body: body.clone(),
                    orelse: vec![],
                },
                srcinfo: outer.srcinfo.clone(),
            };
            Stmt {
                data: StmtKind::If {
                    cond: c2.clone(),
                    body: vec![inner_if],
                    orelse: vec![],
                },
                srcinfo: inner.srcinfo.clone(),
            }
        }
        // for i: { for j: A }  →  handled by reorder_loops
        (StmtKind::For { .. }, StmtKind::For { .. }) => {
            return reorder_loops(proc, &parent);
        }
        _ => {
            return Err(RewriteError::precondition(
                "lift_scope applies to if/loop statements",
            ))
        }
    };

    let (gp, gp_kind, gp_at) = list_pos(&parent)?;
    let (new, _) = splice(proc, &gp, gp_kind, gp_at, gp_at + 1, vec![swapped])?;
    // inner/outer swap places; interior statements keep their depth
    let fwd = ForwardingMap::identity();
    Ok((new, fwd))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fmt::proc_to_string;
    use crate::ir::build::*;
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

    /// for i in seq(0, 10): x[i] = 1.0  over x : R[10]
    fn simple_loop() -> Proc {
        let mut r#gen = SymGen::starting_at(1);
        let x = r#gen.fresh("x");
        let i = r#gen.fresh("i");
        proc_of(vec![
            alloc(&x, tensor(LoopType::R, vec![int(10)])),
            seq_for(
                &i,
                int(10),
                vec![assign(
                    &x,
                    LoopType::R,
                    vec![read(&i, LoopType::Index)],
                    float(1.0),
                )],
            ),
        ])
    }

    #[test]
    fn divide_loop_guard_emits_ceil_and_guard() {
        let p = simple_loop();
        let loop_path = CursorPath(vec![Edge::Body(1)]);
        let (p2, _) = divide_loop(
            &p,
            &loop_path,
            4,
            "io",
            "ii",
            TailStrategy::Guard,
            false,
        )
        .unwrap();
        assert_eq!(
            proc_to_string(&p2),
            indoc! {"
                def t():
                    x : R[10]
                    for io in seq(0, 3):
                        for ii in seq(0, 4):
                            if 4 * io + ii < 10:
                                x[4 * io + ii] = 1.0"}
        );
    }

    #[test]
    fn divide_loop_cut_emits_remainder() {
        let p = simple_loop();
        let loop_path = CursorPath(vec![Edge::Body(1)]);
        let (p2, _) =
            divide_loop(&p, &loop_path, 4, "io", "ii", TailStrategy::Cut, false).unwrap();
        assert_eq!(
            proc_to_string(&p2),
            indoc! {"
                def t():
                    x : R[10]
                    for io in seq(0, 2):
                        for ii in seq(0, 4):
                            x[4 * io + ii] = 1.0
                    for ii in seq(0, 2):
                        x[8 + ii] = 1.0"}
        );
    }

    #[test]
    fn divide_loop_perfect_rejects_nondivisible() {
        let p = simple_loop();
        let loop_path = CursorPath(vec![Edge::Body(1)]);
        assert!(divide_loop(&p, &loop_path, 4, "io", "ii", TailStrategy::Cut, true).is_err());
        assert!(divide_loop(&p, &loop_path, 5, "io", "ii", TailStrategy::Cut, true).is_ok());
    }

    #[test]
    fn divide_with_small_bound_cut_leaves_empty_main() {
        // N=3 < q=4: empty outer loop, tail is the original
        let mut r#gen = SymGen::starting_at(1);
        let x = r#gen.fresh("x");
        let i = r#gen.fresh("i");
        let p = proc_of(vec![
            alloc(&x, tensor(LoopType::R, vec![int(3)])),
            seq_for(
                &i,
                int(3),
                vec![assign(
                    &x,
                    LoopType::R,
                    vec![read(&i, LoopType::Index)],
                    float(1.0),
                )],
            ),
        ]);
        let loop_path = CursorPath(vec![Edge::Body(1)]);
        let (p2, _) =
            divide_loop(&p, &loop_path, 4, "io", "ii", TailStrategy::Cut, false).unwrap();
        assert_eq!(
            proc_to_string(&p2),
            indoc! {"
                def t():
                    x : R[3]
                    for io in seq(0, 0):
                        for ii in seq(0, 4):
                            x[4 * io + ii] = 1.0
                    for ii in seq(0, 3):
                        x[0 + ii] = 1.0"}
        );
    }

    #[test]
    fn unroll_zero_trip_becomes_pass() {
        let mut r#gen = SymGen::starting_at(1);
        let x = r#gen.fresh("x");
        let i = r#gen.fresh("i");
        let p = proc_of(vec![seq_for(
            &i,
            int(0),
            vec![assign(&x, LoopType::R, vec![], float(1.0))],
        )]);
        let (p2, _) = unroll_loop(&p, &CursorPath(vec![Edge::Body(0)])).unwrap();
        assert_eq!(p2.body.len(), 1);
        assert!(p2.body[0].is_pass());
    }

    #[test]
    fn unroll_substitutes_each_copy() {
        let mut r#gen = SymGen::starting_at(1);
        let x = r#gen.fresh("x");
        let i = r#gen.fresh("i");
        let p = proc_of(vec![
            alloc(&x, tensor(LoopType::R, vec![int(3)])),
            seq_for(
                &i,
                int(3),
                vec![assign(
                    &x,
                    LoopType::R,
                    vec![read(&i, LoopType::Index)],
                    float(0.0),
                )],
            ),
        ]);
        let (p2, _) = unroll_loop(&p, &CursorPath(vec![Edge::Body(1)])).unwrap();
        assert_eq!(
            proc_to_string(&p2),
            indoc! {"
                def t():
                    x : R[3]
                    x[0] = 0.0
                    x[1] = 0.0
                    x[2] = 0.0"}
        );
    }

    #[test]
    fn remove_loop_of_idempotent_body() {
        let mut r#gen = SymGen::starting_at(1);
        let x = r#gen.fresh("x");
        let i = r#gen.fresh("i");
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
                seq_for(
                    &i,
                    read(&n, LoopType::Size),
                    vec![assign(&x, LoopType::R, vec![], float(0.0))],
                ),
            ],
            instr: None,
            srcinfo: SrcInfo::default(),
        };
        let (p2, _) = remove_loop(&p, &CursorPath(vec![Edge::Body(1)])).unwrap();
        assert_eq!(
            proc_to_string(&p2),
            indoc! {"
                def t(n: size):
                    x : R
                    x = 0.0"}
        );
    }

    #[test]
    fn remove_loop_refuses_reduce() {
        let mut r#gen = SymGen::starting_at(1);
        let x = r#gen.fresh("x");
        let i = r#gen.fresh("i");
        let p = proc_of(vec![
            alloc(&x, LoopType::R),
            seq_for(&i, int(4), vec![reduce(&x, LoopType::R, vec![], float(1.0))]),
        ]);
        assert!(matches!(
            remove_loop(&p, &CursorPath(vec![Edge::Body(1)])),
            Err(RewriteError::Precondition(_))
        ));
    }

    #[test]
    fn fission_then_fuse_round_trips() {
        let mut r#gen = SymGen::starting_at(1);
        let x = r#gen.fresh("x");
        let y = r#gen.fresh("y");
        let i = r#gen.fresh("i");
        let p = proc_of(vec![
            alloc(&x, tensor(LoopType::R, vec![int(8)])),
            alloc(&y, tensor(LoopType::R, vec![int(8)])),
            seq_for(
                &i,
                int(8),
                vec![
                    assign(
                        &x,
                        LoopType::R,
                        vec![read(&i, LoopType::Index)],
                        float(1.0),
                    ),
                    assign(
                        &y,
                        LoopType::R,
                        vec![read(&i, LoopType::Index)],
                        float(2.0),
                    ),
                ],
            ),
        ]);
        let loop_path = CursorPath(vec![Edge::Body(2)]);
        let (p2, _) = fission(&p, &loop_path, BlockKind::Body, 1, 1, false).unwrap();
        assert_eq!(p2.body.len(), 4);

        let first = CursorPath(vec![Edge::Body(2)]);
        let second = CursorPath(vec![Edge::Body(3)]);
        let (p3, _) = fuse(&p2, &first, &second).unwrap();
        // the fused loop matches the original up to iterator renaming
        assert_eq!(proc_to_string(&p3), proc_to_string(&p));
    }

    #[test]
    fn reorder_swaps_perfect_nest() {
        let mut r#gen = SymGen::starting_at(1);
        let c = r#gen.fresh("C");
        let i = r#gen.fresh("i");
        let j = r#gen.fresh("j");
        let p = proc_of(vec![
            alloc(&c, tensor(LoopType::R, vec![int(4), int(6)])),
            seq_for(
                &i,
                int(4),
                vec![seq_for(
                    &j,
                    int(6),
                    vec![assign(
                        &c,
                        LoopType::R,
                        vec![read(&i, LoopType::Index), read(&j, LoopType::Index)],
                        float(0.0),
                    )],
                )],
            ),
        ]);
        let (p2, _) = reorder_loops(&p, &CursorPath(vec![Edge::Body(1)])).unwrap();
        assert_eq!(
            proc_to_string(&p2),
            indoc! {"
                def t():
                    C : R[4, 6]
                    for j in seq(0, 6):
                        for i in seq(0, 4):
                            C[i, j] = 0.0"}
        );
    }

    #[test]
    fn add_loop_with_guard_skips_idempotence_proof() {
        let mut r#gen = SymGen::starting_at(1);
        let x = r#gen.fresh("x");
        let p = proc_of(vec![
            alloc(&x, LoopType::R),
            reduce(&x, LoopType::R, vec![], float(1.0)),
        ]);
        // a reduce is not idempotent: the unguarded form must fail
        assert!(add_loop(
            &p,
            &CursorPath::root(),
            BlockKind::Body,
            1,
            2,
            "r",
            int(4),
            false,
            LoopKind::Seq,
        )
        .is_err());
        let (p2, _) = add_loop(
            &p,
            &CursorPath::root(),
            BlockKind::Body,
            1,
            2,
            "r",
            int(4),
            true,
            LoopKind::Seq,
        )
        .unwrap();
        assert_eq!(
            proc_to_string(&p2),
            indoc! {"
                def t():
                    x : R
                    for r in seq(0, 4):
                        if r == 0:
                            x += 1.0"}
        );
    }

    #[test]
    fn add_loop_par_requires_write_disjointness() {
        let mut r#gen = SymGen::starting_at(1);
        let x = r#gen.fresh("x");
        let p = proc_of(vec![
            alloc(&x, LoopType::R),
            assign(&x, LoopType::R, vec![], float(1.0)),
        ]);
        // every iteration of an unguarded parallel loop would write the
        // same scalar
        assert!(matches!(
            add_loop(
                &p,
                &CursorPath::root(),
                BlockKind::Body,
                1,
                2,
                "r",
                int(4),
                false,
                LoopKind::Par,
            ),
            Err(RewriteError::Precondition(_))
        ));
        // guarded, only iteration zero touches it
        let (p2, _) = add_loop(
            &p,
            &CursorPath::root(),
            BlockKind::Body,
            1,
            2,
            "r",
            int(4),
            true,
            LoopKind::Par,
        )
        .unwrap();
        assert_eq!(
            proc_to_string(&p2),
            indoc! {"
                def t():
                    x : R
                    for r in par(0, 4):
                        if r == 0:
                            x = 1.0"}
        );
    }

    #[test]
    fn reorder_refuses_mixed_loop_kinds() {
        let mut r#gen = SymGen::starting_at(1);
        let c = r#gen.fresh("C");
        let i = r#gen.fresh("i");
        let j = r#gen.fresh("j");
        let p = proc_of(vec![
            alloc(&c, tensor(LoopType::R, vec![int(4), int(6)])),
            par_for(
                &i,
                int(4),
                vec![seq_for(
                    &j,
                    int(6),
                    vec![assign(
                        &c,
                        LoopType::R,
                        vec![read(&i, LoopType::Index), read(&j, LoopType::Index)],
                        float(0.0),
                    )],
                )],
            ),
        ]);
        assert!(matches!(
            reorder_loops(&p, &CursorPath(vec![Edge::Body(1)])),
            Err(RewriteError::Precondition(_))
        ));
    }
}
