//! Memory staging: shadow a window of a buffer with a new allocation and
//! explicit copy-in/copy-out, plus window binding and inlining.

use crate::analysis::affine::{lin_of_expr, LinCon};
use crate::analysis::checks::ctx_cons;
use crate::analysis::effects::Effects;
use crate::analysis::solver::{check_sat, model_to_string, Verdict};
use crate::cursors::{BlockKind, CursorPath, ForwardingMap};
use crate::ir::build::{read, sub};
use crate::ir::expr::{Expr, ExprKind, Value, WAccess};
use crate::ir::proc::Proc;
use crate::ir::stmt::{map_own_exprs, LoopKind, Stmt, StmtKind};
use crate::ir::sym::{Sym, SymGen};
use crate::ir::typecheck::retype;
use crate::ir::types::LoopType;
use crate::rewrites::simplify::fold_expr;

use super::{list_at, list_pos, splice, stmt_at, RewriteError, RewriteResult};

/// Every access of `buf` in the block provably lands inside the window.
fn check_accesses_in_window(
    proc: &Proc,
    block: &[Stmt],
    buf: &Sym,
    window: &[WAccess],
) -> Result<(), RewriteError> {
    let eff = Effects::of_block(block);
    let mut base = Vec::new();
    for p in &proc.preds {
        if let Some(cs) = crate::analysis::affine::lin_of_cond(p, false) {
            base.extend(cs);
        }
    }
    for access in eff.accesses_of(buf) {
        if access.idx.is_empty() {
            return Err(RewriteError::precondition(format!(
                "'{buf}' is passed whole inside the staged block"
            )));
        }
        if access.idx.len() != window.len() {
            return Err(RewriteError::precondition(format!(
                "access to '{buf}' has the wrong rank for the window"
            )));
        }
        let ctx = ctx_cons(&access.ctx);
        for (e, w) in access.idx.iter().zip(window) {
            let Some(el) = lin_of_expr(e) else {
                return Err(RewriteError::precondition(
                    "staged accesses must be affine",
                ));
            };
            let violations = match w {
                WAccess::Interval(lo, hi) => {
                    let (Some(ll), Some(hl)) = (lin_of_expr(lo), lin_of_expr(hi)) else {
                        return Err(RewriteError::precondition(
                            "window bounds must be affine",
                        ));
                    };
                    vec![LinCon::lt(&el, &ll), LinCon::ge(&el, &hl)]
                }
                WAccess::Point(p) => {
                    let Some(pl) = lin_of_expr(p) else {
                        return Err(RewriteError::precondition(
                            "window points must be affine",
                        ));
                    };
                    vec![LinCon::lt(&el, &pl), LinCon::gt(&el, &pl)]
                }
            };
            for v in violations {
                let mut cons = base.clone();
                cons.extend(ctx.iter().cloned());
                cons.push(v);
                match check_sat(&cons) {
                    Verdict::Unsat => {}
                    Verdict::Sat(m) => {
                        return Err(RewriteError::precondition(format!(
                            "access to '{buf}' escapes the staged window: {}",
                            model_to_string(&m)
                        )))
                    }
                    Verdict::Unknown => {
                        return Err(RewriteError::precondition(
                            "cannot prove staged accesses stay inside the window",
                        ))
                    }
                }
            }
        }
    }
    Ok(())
}

fn rewrite_block_accesses(
    stmts: &[Stmt],
    buf: &Sym,
    staged: &Sym,
    window: &[WAccess],
) -> Vec<Stmt> {
    let remap = |idx: Vec<Expr>| -> Vec<Expr> {
        idx.into_iter()
            .zip(window)
            .filter_map(|(e, w)| match w {
                WAccess::Interval(lo, _) => Some(fold_expr(&sub(e, lo.clone()))),
                WAccess::Point(_) => None,
            })
            .collect()
    };
    fn go(
        stmts: &[Stmt],
        buf: &Sym,
        staged: &Sym,
        remap: &impl Fn(Vec<Expr>) -> Vec<Expr>,
    ) -> Vec<Stmt> {
        stmts
            .iter()
            .map(|s| {
                let s = map_own_exprs(s, &|e| {
                    e.map(&|e| match &e.data {
                        ExprKind::Read { name, idx } if name == buf && !idx.is_empty() => Expr {
                            data: ExprKind::Read {
                                name: staged.clone(),
                                idx: remap(idx.clone()),
                            },
                            ty: e.ty.clone(),
                            srcinfo: e.srcinfo.clone(),
                        },
                        _ => e,
                    })
                });
                let data = match s.data {
                    StmtKind::Assign { name, ty, idx, rhs } if &name == buf => StmtKind::Assign {
                        name: staged.clone(),
                        ty,
                        idx: remap(idx),
                        rhs,
                    },
                    StmtKind::Reduce { name, ty, idx, rhs } if &name == buf => StmtKind::Reduce {
                        name: staged.clone(),
                        ty,
                        idx: remap(idx),
                        rhs,
                    },
                    StmtKind::If { cond, body, orelse } => StmtKind::If {
                        cond,
                        body: go(&body, buf, staged, remap),
                        orelse: go(&orelse, buf, staged, remap),
                    },
                    StmtKind::For {
                        iter,
                        hi,
                        body,
                        kind,
                    } => StmtKind::For {
                        iter,
                        hi,
                        body: go(&body, buf, staged, remap),
                        kind,
                    },
                    other => other,
                };
                Stmt {
                    data,
                    srcinfo: s.srcinfo,
                }
            })
            .collect()
    }
    go(stmts, buf, staged, &remap)
}

/// Build `for i0 … : body(iters)` over the staged extents.
fn copy_nest(
    r#gen: &mut SymGen,
    extents: &[Expr],
    body_of: impl FnOnce(&[Sym]) -> Stmt,
) -> Stmt {
    let iters: Vec<Sym> = (0..extents.len()).map(|d| r#gen.fresh(&format!("i{d}"))).collect();
    let mut stmt = body_of(&iters);
    for (iter, extent) in iters.iter().zip(extents).rev() {
        stmt = Stmt::new(StmtKind::For {
            iter: iter.clone(),
            hi: extent.clone(),
            body: vec![stmt],
            kind: LoopKind::Seq,
        });
    }
    stmt
}

/// Stage the window `buf[w...]` into a fresh buffer `new_name` around the
/// block: copy-in before, copy-out after, accesses inside redirected.
/// With `accum` and a reduce-only block, the copy-in becomes a zero
/// initialization and the copy-out a reduce-back.
#[allow(clippy::too_many_arguments)]
pub fn stage_mem(
    proc: &Proc,
    parent: &CursorPath,
    kind: BlockKind,
    lo: usize,
    hi: usize,
    buf: &Sym,
    buf_ty: &LoopType,
    window: &[WAccess],
    new_name: &str,
    accum: bool,
) -> RewriteResult {
    let list = list_at(proc, parent, kind)?;
    if lo >= hi || hi > list.len() {
        return Err(RewriteError::BadCursor);
    }
    let block = &list[lo..hi];
    check_accesses_in_window(proc, block, buf, window)?;

    let extents: Vec<Expr> = window
        .iter()
        .filter_map(|w| match w {
            WAccess::Interval(l, h) => Some(fold_expr(&sub(h.clone(), l.clone()))),
            WAccess::Point(_) => None,
        })
        .collect();
    let elem = buf_ty.base().clone();
    let staged_ty = if extents.is_empty() {
        elem.clone()
    } else {
        LoopType::Tensor {
            elem: Box::new(elem.clone()),
            dims: extents.clone(),
            is_window: false,
        }
    };

    let eff = Effects::of_block(block);
    let written = eff.writes(buf);
    let zero_init = accum && eff.reduce_only(buf);

    let mut r#gen = SymGen::for_proc(proc);
    let staged = r#gen.fresh(new_name);

    // staged[i...] indexes; buf[w(i...)] indexes
    let staged_idx = |iters: &[Sym]| -> Vec<Expr> {
        iters.iter().map(|s| read(s, LoopType::Index)).collect()
    };
    let buf_idx = |iters: &[Sym]| -> Vec<Expr> {
        let mut it = iters.iter();
        window
            .iter()
            .map(|w| match w {
                WAccess::Interval(l, _) => {
                    let i = it.next().expect("one iterator per interval");
                    fold_expr(&crate::ir::build::add(l.clone(), read(i, LoopType::Index)))
                }
                WAccess::Point(p) => p.clone(),
            })
            .collect()
    };

    let mut replacement: Vec<Stmt> = vec![Stmt::new(StmtKind::Alloc {
        name: staged.clone(),
        ty: staged_ty,
        mem: None,
    })];

    // copy-in (or zero-init)
    let elem_in = elem.clone();
    let buf_for_in = buf.clone();
    let staged_for_in = staged.clone();
    replacement.push(copy_nest(&mut r#gen, &extents, move |iters| {
        let rhs = if zero_init {
            Expr::new(ExprKind::Const(Value::Float(0.0)), elem_in.clone())
        } else {
            Expr::new(
                ExprKind::Read {
                    name: buf_for_in,
                    idx: buf_idx(iters),
                },
                elem_in.clone(),
            )
        };
        Stmt::new(StmtKind::Assign {
            name: staged_for_in,
            ty: elem_in,
            idx: staged_idx(iters),
            rhs,
        })
    }));

    let n_before = replacement.len();
    replacement.extend(rewrite_block_accesses(block, buf, &staged, window));

    if written {
        let elem_out = elem.clone();
        let buf_out = buf.clone();
        let staged_out = staged.clone();
        let buf_idx2 = |iters: &[Sym]| -> Vec<Expr> {
            let mut it = iters.iter();
            window
                .iter()
                .map(|w| match w {
                    WAccess::Interval(l, _) => {
                        let i = it.next().expect("one iterator per interval");
                        fold_expr(&crate::ir::build::add(l.clone(), read(i, LoopType::Index)))
                    }
                    WAccess::Point(p) => p.clone(),
                })
                .collect()
        };
        replacement.push(copy_nest(&mut r#gen, &extents, move |iters| {
            let rhs = Expr::new(
                ExprKind::Read {
                    name: staged_out,
                    idx: iters.iter().map(|s| read(s, LoopType::Index)).collect(),
                },
                elem_out.clone(),
            );
            let data = if zero_init {
                StmtKind::Reduce {
                    name: buf_out,
                    ty: elem_out,
                    idx: buf_idx2(iters),
                    rhs,
                }
            } else {
                StmtKind::Assign {
                    name: buf_out,
                    ty: elem_out,
                    idx: buf_idx2(iters),
                    rhs,
                }
            };
            Stmt::new(data)
        }));
    }

    let inserted = replacement.len();
    let (new, _) = splice(proc, parent, kind, lo, hi, replacement)?;
    let mut fwd = ForwardingMap::identity();
    for j in 0..(hi - lo) {
        fwd = fwd.relocate(
            parent.child(kind.edge(lo + j)),
            parent.child(kind.edge(lo + n_before + j)),
        );
    }
    fwd = fwd.spliced(parent.clone(), kind, lo, hi - lo, inserted);
    Ok((retype(&new)?, fwd))
}

/// Bind a windowing expression to a name: insert `name = buf[w...]`
/// before the enclosing statement and read the window through the name.
pub fn stage_window(proc: &Proc, expr_path: &CursorPath, name: &str) -> RewriteResult {
    let e = crate::cursors::resolve_expr(proc, expr_path).ok_or(RewriteError::BadCursor)?;
    let ExprKind::WindowExpr { .. } = &e.data else {
        return Err(RewriteError::precondition(
            "cursor does not point at a window expression",
        ));
    };
    let win_ty = e.ty.clone();
    let win_expr = e.clone();

    let mut r#gen = SymGen::for_proc(proc);
    let sym = r#gen.fresh(name);

    let stmt_len = expr_path
        .0
        .iter()
        .take_while(|edge| edge.block_index().is_some())
        .count();
    let stmt_path = CursorPath(expr_path.0[..stmt_len].to_vec());
    let (parent, kind, at) = list_pos(&stmt_path)?;

    let current = crate::cursors::update_expr(proc, expr_path, |old| {
        Expr {
            data: ExprKind::Read {
                name: sym.clone(),
                idx: vec![],
            },
            ty: win_ty.clone(),
            srcinfo: old.srcinfo.clone(),
        }
    })
    .ok_or(RewriteError::BadCursor)?;

    let win_stmt = Stmt::new(StmtKind::WindowStmt {
        name: sym.clone(),
        rhs: win_expr,
    });
    let new = crate::cursors::splice_stmts(&current, &parent, kind, at, at, vec![win_stmt])
        .ok_or(RewriteError::BadCursor)?;
    let fwd = ForwardingMap::identity().spliced(parent, kind, at, 0, 1);
    Ok((new, fwd))
}

/// Inline a window binding back into its use sites.
pub fn inline_window(proc: &Proc, winstmt_path: &CursorPath) -> RewriteResult {
    let (name, buf, window) = match &stmt_at(proc, winstmt_path)?.data {
        StmtKind::WindowStmt { name, rhs } => match &rhs.data {
            ExprKind::WindowExpr { name: buf, idx } => {
                (name.clone(), buf.clone(), idx.clone())
            }
            _ => {
                return Err(RewriteError::Bug(
                    "window statement without a window expression".to_string(),
                ))
            }
        },
        _ => {
            return Err(RewriteError::precondition(
                "cursor does not point at a window statement",
            ))
        }
    };

    // compose a use-site index list with the window
    let compose_idx = |idx: &[Expr]| -> Vec<Expr> {
        let mut it = idx.iter();
        window
            .iter()
            .map(|w| match w {
                WAccess::Interval(lo, _) => {
                    let i = it.next().expect("rank checked by type system");
                    fold_expr(&crate::ir::build::add(lo.clone(), i.clone()))
                }
                WAccess::Point(p) => p.clone(),
            })
            .collect()
    };
    let compose_window = |idx: &[WAccess]| -> Vec<WAccess> {
        let mut it = idx.iter();
        window
            .iter()
            .map(|w| match w {
                WAccess::Interval(lo, _) => match it.next().expect("rank checked") {
                    WAccess::Point(p) => {
                        WAccess::Point(fold_expr(&crate::ir::build::add(lo.clone(), p.clone())))
                    }
                    WAccess::Interval(l2, h2) => WAccess::Interval(
                        fold_expr(&crate::ir::build::add(lo.clone(), l2.clone())),
                        fold_expr(&crate::ir::build::add(lo.clone(), h2.clone())),
                    ),
                },
                WAccess::Point(p) => WAccess::Point(p.clone()),
            })
            .collect()
    };

    let mut stride_use = false;
    proc.walk_stmts(&mut |s| {
        s.own_exprs(&mut |e| {
            e.walk(&mut |e| {
                if let ExprKind::StrideExpr { name: n, .. } = &e.data
                    && n == &name
                {
                    stride_use = true;
                }
            })
        })
    });
    if stride_use {
        return Err(RewriteError::precondition(format!(
            "'{name}' appears in stride expressions; cannot inline",
        )));
    }

    fn rewrite(
        stmts: &[Stmt],
        name: &Sym,
        buf: &Sym,
        compose_idx: &impl Fn(&[Expr]) -> Vec<Expr>,
        compose_window: &impl Fn(&[WAccess]) -> Vec<WAccess>,
    ) -> Vec<Stmt> {
        stmts
            .iter()
            .map(|s| {
                let s = map_own_exprs(s, &|e| {
                    e.map(&|e| match &e.data {
                        ExprKind::Read { name: n, idx } if n == name && !idx.is_empty() => Expr {
                            data: ExprKind::Read {
                                name: buf.clone(),
                                idx: compose_idx(idx),
                            },
                            ty: e.ty.clone(),
                            srcinfo: e.srcinfo.clone(),
                        },
                        ExprKind::WindowExpr { name: n, idx } if n == name => Expr {
                            data: ExprKind::WindowExpr {
                                name: buf.clone(),
                                idx: compose_window(idx),
                            },
                            ty: e.ty.clone(),
                            srcinfo: e.srcinfo.clone(),
                        },
                        _ => e,
                    })
                });
                let data = match s.data {
                    StmtKind::Assign { name: n, ty, idx, rhs } if &n == name => {
                        StmtKind::Assign {
                            name: buf.clone(),
                            ty,
                            idx: compose_idx(&idx),
                            rhs,
                        }
                    }
                    StmtKind::Reduce { name: n, ty, idx, rhs } if &n == name => {
                        StmtKind::Reduce {
                            name: buf.clone(),
                            ty,
                            idx: compose_idx(&idx),
                            rhs,
                        }
                    }
                    StmtKind::If { cond, body, orelse } => StmtKind::If {
                        cond,
                        body: rewrite(&body, name, buf, compose_idx, compose_window),
                        orelse: rewrite(&orelse, name, buf, compose_idx, compose_window),
                    },
                    StmtKind::For {
                        iter,
                        hi,
                        body,
                        kind,
                    } => StmtKind::For {
                        iter,
                        hi,
                        body: rewrite(&body, name, buf, compose_idx, compose_window),
                        kind,
                    },
                    other => other,
                };
                Stmt {
                    data,
                    srcinfo: s.srcinfo,
                }
            })
            .collect()
    }

    let (parent, kind, at) = list_pos(winstmt_path)?;
    let (without, _) = splice(proc, &parent, kind, at, at + 1, vec![])?;
    let body = rewrite(&without.body, &name, &buf, &compose_idx, &compose_window);
    let new = Proc {
        body,
        ..without
    };
    let fwd = ForwardingMap::identity()
        .tombstone(winstmt_path.clone())
        .spliced(parent, kind, at, 1, 0);
    Ok((retype(&new)?, fwd))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursors::Edge;
    use crate::fmt::proc_to_string;
    use crate::ir::build::*;
    use crate::ir::SrcInfo;
    use indoc::indoc;

    /// C : R[6, 16] with a reduce-only k-loop over the whole window.
    fn rank_k() -> Proc {
        let mut r#gen = SymGen::starting_at(1);
        let c = r#gen.fresh("C");
        let i = r#gen.fresh("i");
        let j = r#gen.fresh("j");
        Proc {
            name: "t".to_string(),
            args: vec![crate::ir::ProcArg {
                name: c.clone(),
                ty: tensor(LoopType::F32, vec![int(6), int(16)]),
                mem: None,
                srcinfo: SrcInfo::default(),
            }],
            preds: vec![],
            body: vec![seq_for(
                &i,
                int(6),
                vec![seq_for(
                    &j,
                    int(16),
                    vec![reduce(
                        &c,
                        LoopType::F32,
                        vec![read(&i, LoopType::Index), read(&j, LoopType::Index)],
                        float(1.0),
                    )],
                )],
            )],
            instr: None,
            srcinfo: SrcInfo::default(),
        }
    }

    #[test]
    fn stage_mem_inserts_copy_in_and_out() {
        let p = rank_k();
        let c = p.args[0].name.clone();
        let ty = p.args[0].ty.clone();
        let window = vec![
            WAccess::Interval(int(0), int(6)),
            WAccess::Interval(int(0), int(16)),
        ];
        let (p2, _) = stage_mem(
            &p,
            &CursorPath::root(),
            BlockKind::Body,
            0,
            1,
            &c,
            &ty,
            &window,
            "C_reg",
            false,
        )
        .unwrap();
        assert_eq!(
            proc_to_string(&p2),
            indoc! {"
                def t(C: f32[6, 16]):
                    C_reg : f32[6, 16]
                    for i0 in seq(0, 6):
                        for i1 in seq(0, 16):
                            C_reg[i0, i1] = C[i0, i1]
                    for i in seq(0, 6):
                        for j in seq(0, 16):
                            C_reg[i, j] += 1.0
                    for i0 in seq(0, 6):
                        for i1 in seq(0, 16):
                            C[i0, i1] = C_reg[i0, i1]"}
        );
    }

    #[test]
    fn stage_mem_accum_zero_fills_and_reduces_back() {
        let p = rank_k();
        let c = p.args[0].name.clone();
        let ty = p.args[0].ty.clone();
        let window = vec![
            WAccess::Interval(int(0), int(6)),
            WAccess::Interval(int(0), int(16)),
        ];
        let (p2, _) = stage_mem(
            &p,
            &CursorPath::root(),
            BlockKind::Body,
            0,
            1,
            &c,
            &ty,
            &window,
            "C_reg",
            true,
        )
        .unwrap();
        let text = proc_to_string(&p2);
        assert!(text.contains("C_reg[i0, i1] = 0.0"));
        assert!(text.contains("C[i0, i1] += C_reg[i0, i1]"));
    }

    #[test]
    fn stage_mem_rejects_escaping_access() {
        let p = rank_k();
        let c = p.args[0].name.clone();
        let ty = p.args[0].ty.clone();
        // window covers rows 0..3 only, but the block touches rows 0..6
        let window = vec![
            WAccess::Interval(int(0), int(3)),
            WAccess::Interval(int(0), int(16)),
        ];
        assert!(stage_mem(
            &p,
            &CursorPath::root(),
            BlockKind::Body,
            0,
            1,
            &c,
            &ty,
            &window,
            "C_reg",
            false,
        )
        .is_err());
    }

    #[test]
    fn stage_then_inline_window_round_trips() {
        let mut r#gen = SymGen::starting_at(1);
        let b = r#gen.fresh("B");
        let w = r#gen.fresh("B_win");
        let k = r#gen.fresh("k");
        // B_win = B[2:6, 3]; for k in seq(0, 4): B_win[k] = 0.0
        let win_ty = LoopType::Tensor {
            elem: Box::new(LoopType::F32),
            dims: vec![int(4)],
            is_window: true,
        };
        let p = Proc {
            name: "t".to_string(),
            args: vec![crate::ir::ProcArg {
                name: b.clone(),
                ty: tensor(LoopType::F32, vec![int(8), int(8)]),
                mem: None,
                srcinfo: SrcInfo::default(),
            }],
            preds: vec![],
            body: vec![
                Stmt::new(StmtKind::WindowStmt {
                    name: w.clone(),
                    rhs: window(
                        &b,
                        win_ty,
                        vec![
                            WAccess::Interval(int(2), int(6)),
                            WAccess::Point(int(3)),
                        ],
                    ),
                }),
                seq_for(
                    &k,
                    int(4),
                    vec![assign(
                        &w,
                        LoopType::F32,
                        vec![read(&k, LoopType::Index)],
                        float(0.0),
                    )],
                ),
            ],
            instr: None,
            srcinfo: SrcInfo::default(),
        };
        let (p2, _) = inline_window(&p, &CursorPath(vec![Edge::Body(0)])).unwrap();
        assert_eq!(
            proc_to_string(&p2),
            indoc! {"
                def t(B: f32[8, 8]):
                    for k in seq(0, 4):
                        B[2 + k, 3] = 0.0"}
        );
    }
}
