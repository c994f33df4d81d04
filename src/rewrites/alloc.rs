//! Allocation geometry (expand/rearrange/bound/divide/mult dimensions)
//! and allocation scope (lift, reuse) rewrites.

use crate::analysis::affine::{lin_of_expr, LinCon};
use crate::analysis::checks::{self, CheckFailure};
use crate::analysis::effects::Effects;
use crate::analysis::solver::{check_sat, model_to_string, Verdict};
use crate::cursors::{CursorPath, ForwardingMap};
use crate::ir::build::{int, mul, read};
use crate::ir::expr::{BinOp, Expr, ExprKind};
use crate::ir::proc::Proc;
use crate::ir::stmt::{map_own_exprs, Stmt, StmtKind};
use crate::ir::subst::Subst;
use crate::ir::sym::Sym;
use crate::ir::typecheck::retype;
use crate::ir::types::LoopType;

use super::{annotate::alloc_sym, list_pos, splice, stmt_at, RewriteError, RewriteResult};

/// Rewrite every full access of `buf` through `f`; errors if the buffer
/// is windowed anywhere (windows would need their own index transform).
fn map_accesses(
    proc: &Proc,
    buf: &Sym,
    f: &impl Fn(Vec<Expr>) -> Vec<Expr>,
) -> Result<Proc, RewriteError> {
    let mut windowed = false;
    proc.walk_stmts(&mut |s| {
        s.own_exprs(&mut |e| {
            e.walk(&mut |e| {
                if let ExprKind::WindowExpr { name, .. } = &e.data
                    && name == buf
                {
                    windowed = true;
                }
            })
        })
    });
    if windowed {
        return Err(RewriteError::precondition(format!(
            "'{buf}' is windowed; transform the window first"
        )));
    }

    fn rewrite_block(
        stmts: &[Stmt],
        buf: &Sym,
        f: &impl Fn(Vec<Expr>) -> Vec<Expr>,
    ) -> Vec<Stmt> {
        stmts
            .iter()
            .map(|s| {
                let s = map_own_exprs(s, &|e| {
                    e.map(&|e| match &e.data {
                        ExprKind::Read { name, idx } if name == buf => Expr {
                            data: ExprKind::Read {
                                name: name.clone(),
                                idx: f(idx.clone()),
                            },
                            ty: e.ty.clone(),
                            srcinfo: e.srcinfo.clone(),
                        },
                        _ => e,
                    })
                });
                let data = match s.data {
                    StmtKind::Assign { name, ty, idx, rhs } if &name == buf => StmtKind::Assign {
                        ty,
                        idx: f(idx),
                        rhs,
                        name,
                    },
                    StmtKind::Reduce { name, ty, idx, rhs } if &name == buf => StmtKind::Reduce {
                        ty,
                        idx: f(idx),
                        rhs,
                        name,
                    },
                    StmtKind::If { cond, body, orelse } => StmtKind::If {
                        cond,
                        body: rewrite_block(&body, buf, f),
                        orelse: rewrite_block(&orelse, buf, f),
                    },
                    StmtKind::For {
                        iter,
                        hi,
                        body,
                        kind,
                    } => StmtKind::For {
                        iter,
                        hi,
                        body: rewrite_block(&body, buf, f),
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

    Ok(Proc {
        body: rewrite_block(&proc.body, buf, f),
        ..proc.clone()
    })
}

fn set_alloc_type(proc: &Proc, alloc_path: &CursorPath, ty: LoopType) -> Result<Proc, RewriteError> {
    let old = stmt_at(proc, alloc_path)?;
    let StmtKind::Alloc { name, mem, .. } = &old.data else {
        return Err(RewriteError::precondition(
            "cursor does not point at an allocation",
        ));
    };
    let new_alloc = Stmt {
        data: StmtKind::Alloc {
            name: name.clone(),
            ty,
            mem: mem.clone(),
        },
        srcinfo: old.srcinfo.clone(),
    };
    crate::cursors::replace_stmt(proc, alloc_path, vec![new_alloc]).ok_or(RewriteError::BadCursor)
}

/// `idx_expr` stays within `[0, size_expr)` at every access of `buf`,
/// and `size_expr` is positive.
fn check_new_dim_bounds(
    proc: &Proc,
    buf: &Sym,
    size: &Expr,
    idx: &Expr,
) -> Result<(), RewriteError> {
    let (Some(size_lin), Some(idx_lin)) = (lin_of_expr(size), lin_of_expr(idx)) else {
        return Err(RewriteError::precondition(
            "expand_dim needs affine size and index expressions",
        ));
    };
    // size > 0 under the procedure predicates
    let mut cons = vec![LinCon::le(&size_lin, &crate::analysis::affine::LinExpr::constant(0))];
    for p in &proc.preds {
        if let Some(cs) = crate::analysis::affine::lin_of_cond(p, false) {
            cons.extend(cs);
        }
    }
    match check_sat(&cons) {
        Verdict::Unsat => {}
        Verdict::Sat(m) => {
            return Err(RewriteError::precondition(format!(
                "size may be non-positive: {}",
                model_to_string(&m)
            )))
        }
        Verdict::Unknown => {
            return Err(RewriteError::precondition(
                "cannot prove the new extent positive",
            ))
        }
    }

    let eff = Effects::of_block(&proc.body);
    for access in eff.accesses_of(buf) {
        let ctx = checks::ctx_cons(&access.ctx);
        for violation in [
            LinCon::lt(&idx_lin, &crate::analysis::affine::LinExpr::constant(0)),
            LinCon::ge(&idx_lin, &size_lin),
        ] {
            let mut cons = ctx.clone();
            cons.push(violation);
            match check_sat(&cons) {
                Verdict::Unsat => {}
                Verdict::Sat(m) => {
                    return Err(RewriteError::precondition(format!(
                        "new index escapes [0, extent): {}",
                        model_to_string(&m)
                    )))
                }
                Verdict::Unknown => return Err(CheckFailure::Undecidable.into()),
            }
        }
    }
    Ok(())
}

/// Add an outermost dimension of extent `size` to `buf`; every access
/// gains `idx` as its first coordinate.
pub fn expand_dim(
    proc: &Proc,
    alloc_path: &CursorPath,
    size: Expr,
    idx: Expr,
) -> RewriteResult {
    let (buf, ty) = alloc_sym(proc, alloc_path)?;
    check_new_dim_bounds(proc, &buf, &size, &idx)?;

    let mut dims = vec![size];
    dims.extend(ty.dims().iter().cloned());
    let new_ty = LoopType::Tensor {
        elem: Box::new(ty.base().clone()),
        dims,
        is_window: false,
    };
    let new = set_alloc_type(proc, alloc_path, new_ty)?;
    let new = map_accesses(&new, &buf, &|old_idx| {
        let mut v = vec![idx.clone()];
        v.extend(old_idx);
        v
    })?;
    Ok((retype(&new)?, ForwardingMap::identity()))
}

/// Permute the declared dimensions of `buf` by `perm` and rewrite every
/// access accordingly.
pub fn rearrange_dim(proc: &Proc, alloc_path: &CursorPath, perm: &[usize]) -> RewriteResult {
    let (buf, ty) = alloc_sym(proc, alloc_path)?;
    let rank = ty.rank();
    let mut seen = vec![false; rank];
    if perm.len() != rank || perm.iter().any(|&i| i >= rank || std::mem::replace(&mut seen[i], true)) {
        return Err(RewriteError::precondition(format!(
            "{perm:?} is not a permutation of 0..{rank}"
        )));
    }

    let dims: Vec<Expr> = perm.iter().map(|&i| ty.dims()[i].clone()).collect();
    let new = set_alloc_type(proc, alloc_path, ty.with_dims(dims))?;
    let perm = perm.to_vec();
    let new = map_accesses(&new, &buf, &move |old_idx| {
        if old_idx.len() != perm.len() {
            return old_idx;
        }
        perm.iter().map(|&i| old_idx[i].clone()).collect()
    })?;
    Ok((retype(&new)?, ForwardingMap::identity()))
}

/// Tighten declared extents. Every access must stay in-bounds under the
/// new extents.
pub fn bound_alloc(
    proc: &Proc,
    alloc_path: &CursorPath,
    new_bounds: &[Option<Expr>],
) -> RewriteResult {
    let (buf, ty) = alloc_sym(proc, alloc_path)?;
    if new_bounds.len() != ty.rank() {
        return Err(RewriteError::precondition(format!(
            "{} bounds given for a rank-{} buffer",
            new_bounds.len(),
            ty.rank()
        )));
    }
    let dims: Vec<Expr> = ty
        .dims()
        .iter()
        .zip(new_bounds)
        .map(|(old, new)| new.clone().unwrap_or_else(|| old.clone()))
        .collect();
    let new = set_alloc_type(proc, alloc_path, ty.with_dims(dims.clone()))?;
    checks::safe_access(&new, &new.body, &buf, &dims)?;
    Ok((retype(&new)?, ForwardingMap::identity()))
}

/// Split dimension `dim` of literal extent `Q` into `⌈Q/q⌉ × q`; an
/// access `e` becomes `(e/q, e%q)`.
pub fn divide_dim(proc: &Proc, alloc_path: &CursorPath, dim: usize, q: i64) -> RewriteResult {
    let (buf, ty) = alloc_sym(proc, alloc_path)?;
    if q <= 1 {
        return Err(RewriteError::precondition("quotient must exceed 1"));
    }
    let extent = ty
        .dims()
        .get(dim)
        .ok_or_else(|| RewriteError::precondition(format!("no dimension {dim}")))?;
    let q_big = extent.as_const_int().ok_or_else(|| {
        RewriteError::precondition("divide_dim needs a literal extent")
    })?;

    let mut dims = ty.dims().to_vec();
    dims.splice(dim..=dim, [int((q_big + q - 1) / q), int(q)]);
    let new = set_alloc_type(proc, alloc_path, ty.with_dims(dims))?;
    let new = map_accesses(&new, &buf, &move |old_idx| {
        let mut v = old_idx;
        if dim < v.len() {
            let e = v[dim].clone();
            let outer = Expr::new(
                ExprKind::BinOp {
                    op: BinOp::Div,
                    lhs: Box::new(e.clone()),
                    rhs: Box::new(int(q)),
                },
                LoopType::Index,
            );
            let inner = Expr::new(
                ExprKind::BinOp {
                    op: BinOp::Mod,
                    lhs: Box::new(e),
                    rhs: Box::new(int(q)),
                },
                LoopType::Index,
            );
            v.splice(dim..=dim, [outer, inner]);
        }
        v
    })?;
    Ok((retype(&new)?, ForwardingMap::identity()))
}

/// Merge dimensions `hi_dim` and `lo_dim` (the latter of literal extent
/// `c`) into one of extent `c · extent(hi_dim)`; the access pair
/// `(e_hi, e_lo)` becomes `c·e_hi + e_lo`.
pub fn mult_dim(
    proc: &Proc,
    alloc_path: &CursorPath,
    hi_dim: usize,
    lo_dim: usize,
) -> RewriteResult {
    let (buf, ty) = alloc_sym(proc, alloc_path)?;
    if hi_dim == lo_dim || hi_dim >= ty.rank() || lo_dim >= ty.rank() {
        return Err(RewriteError::precondition(
            "mult_dim needs two distinct declared dimensions",
        ));
    }
    let c = ty.dims()[lo_dim].as_const_int().ok_or_else(|| {
        RewriteError::precondition("mult_dim needs a literal extent on the low dimension")
    })?;

    let mut dims = ty.dims().to_vec();
    let hi_extent = dims[hi_dim].clone();
    dims[hi_dim] = crate::rewrites::simplify::fold_expr(&mul(int(c), hi_extent));
    dims.remove(lo_dim);
    let new = set_alloc_type(proc, alloc_path, ty.with_dims(dims))?;
    let new = map_accesses(&new, &buf, &move |old_idx| {
        let mut v = old_idx;
        if hi_dim < v.len() && lo_dim < v.len() {
            let e_lo = v[lo_dim].clone();
            let e_hi = v[hi_dim].clone();
            v[hi_dim] = crate::ir::build::add(mul(int(c), e_hi), e_lo);
            v.remove(lo_dim);
        }
        v
    })?;
    Ok((retype(&new)?, ForwardingMap::identity()))
}

/// Move an allocation outward `n` scope levels, keeping it ahead of every
/// use. The extents must not depend on any binder being crossed.
pub fn lift_alloc(proc: &Proc, alloc_path: &CursorPath, n: usize) -> RewriteResult {
    let mut current = proc.clone();
    let mut path = alloc_path.clone();
    let mut total = ForwardingMap::identity();
    for _ in 0..n {
        let (buf, ty) = alloc_sym(&current, &path)?;
        let (parent_list, kind, at) = list_pos(&path)?;
        if parent_list.0.is_empty() {
            return Err(RewriteError::precondition(
                "cannot lift an allocation beyond the procedure body",
            ));
        }
        let enclosing = stmt_at(&current, &parent_list)?;
        if let StmtKind::For { iter, .. } = &enclosing.data {
            for d in ty.dims() {
                if d.reads_sym(iter) {
                    return Err(RewriteError::precondition(format!(
                        "extent of '{buf}' depends on '{iter}'"
                    )));
                }
            }
        }
        let alloc_stmt = stmt_at(&current, &path)?.clone();
        let (gp, gp_kind, gp_at) = list_pos(&parent_list)?;

        let removed = crate::cursors::splice_stmts(&current, &parent_list, kind, at, at + 1, vec![])
            .ok_or(RewriteError::BadCursor)?;
        let inserted =
            crate::cursors::splice_stmts(&removed, &gp, gp_kind, gp_at, gp_at, vec![alloc_stmt])
                .ok_or(RewriteError::BadCursor)?;

        let new_path = gp.child(gp_kind.edge(gp_at));
        let fwd = ForwardingMap::identity()
            .relocate(path.clone(), new_path.clone())
            .spliced(parent_list.clone(), kind, at, 1, 0)
            .spliced(gp.clone(), gp_kind, gp_at, 0, 1);
        total = ForwardingMap::chained(total, fwd);
        current = inserted;
        path = new_path;
    }
    Ok((current, total))
}

/// Legacy lift that also grows the allocation by the extent of each loop
/// it crosses: `row` prepends the new dimension, `col` appends it; `size`
/// overrides the loop extent. Without `keep_dims`, single-trip loops add
/// no dimension.
pub fn autolift_alloc(
    proc: &Proc,
    alloc_path: &CursorPath,
    n: usize,
    row_mode: bool,
    size: Option<i64>,
    keep_dims: bool,
) -> RewriteResult {
    let mut current = proc.clone();
    let mut path = alloc_path.clone();
    let mut total = ForwardingMap::identity();
    for _ in 0..n {
        let (buf, ty) = alloc_sym(&current, &path)?;
        let (parent_list, _, _) = list_pos(&path)?;
        if parent_list.0.is_empty() {
            return Err(RewriteError::precondition(
                "cannot lift an allocation beyond the procedure body",
            ));
        }
        let enclosing = stmt_at(&current, &parent_list)?.clone();
        if let StmtKind::For { iter, hi, .. } = &enclosing.data {
            let extent = match size {
                Some(s) => int(s),
                None => hi.clone(),
            };
            let skip = !keep_dims && extent.as_const_int() == Some(1);
            if !skip {
                let mut dims = ty.dims().to_vec();
                if row_mode {
                    dims.insert(0, extent);
                } else {
                    dims.push(extent);
                }
                let new_ty = LoopType::Tensor {
                    elem: Box::new(ty.base().clone()),
                    dims,
                    is_window: false,
                };
                current = set_alloc_type(&current, &path, new_ty)?;
                let iter = iter.clone();
                current = map_accesses(&current, &buf, &move |old_idx| {
                    let mut v = old_idx;
                    if row_mode {
                        v.insert(0, read(&iter, LoopType::Index));
                    } else {
                        v.push(read(&iter, LoopType::Index));
                    }
                    v
                })?;
            }
        }
        let (lifted, fwd) = lift_alloc(&current, &path, 1)?;
        path = fwd
            .forward_path(&path)
            .map_err(|_| RewriteError::Bug("lifted allocation lost its path".to_string()))?;
        total = ForwardingMap::chained(total, fwd);
        current = lifted;
    }
    Ok((retype(&current)?, total))
}

/// Erase the allocation of `target` and use `src` in its place through
/// the remainder of the scope. `src` must be dead there, with identical
/// type and extents.
pub fn reuse_buffer(
    proc: &Proc,
    src_path: &CursorPath,
    target_path: &CursorPath,
) -> RewriteResult {
    let (src, src_ty) = alloc_sym(proc, src_path)?;
    let (target, target_ty) = alloc_sym(proc, target_path)?;
    if src_ty != target_ty {
        return Err(RewriteError::precondition(format!(
            "'{src}' and '{target}' have different types or extents"
        )));
    }
    let (parent, kind, at) = list_pos(target_path)?;
    if !checks::dead_after(proc, &src, &parent, kind, at) {
        return Err(RewriteError::precondition(format!(
            "'{src}' is still read after the allocation of '{target}'"
        )));
    }

    let (without, _) = splice(proc, &parent, kind, at, at + 1, vec![])?;
    let renamed = Subst::rename_buf(&target, &src).apply_block(&without.body);
    let new = Proc {
        body: renamed,
        ..without
    };
    let fwd = ForwardingMap::identity()
        .tombstone(target_path.clone())
        .spliced(parent, kind, at, 1, 0);
    Ok((retype(&new)?, fwd))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursors::Edge;
    use crate::ir::build::*;
    use crate::ir::sym::SymGen;
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

    /// x : R[12]; for i in seq(0, 12): x[i] = 0.0
    fn vec12() -> Proc {
        let mut r#gen = SymGen::starting_at(1);
        let x = r#gen.fresh("x");
        let i = r#gen.fresh("i");
        proc_of(vec![
            alloc(&x, tensor(LoopType::R, vec![int(12)])),
            seq_for(
                &i,
                int(12),
                vec![assign(
                    &x,
                    LoopType::R,
                    vec![read(&i, LoopType::Index)],
                    float(0.0),
                )],
            ),
        ])
    }

    #[test]
    fn divide_then_mult_restores_shape() {
        let p = vec12();
        let alloc_path = CursorPath(vec![Edge::Body(0)]);
        let (p2, _) = divide_dim(&p, &alloc_path, 0, 4).unwrap();
        match &p2.body[0].data {
            StmtKind::Alloc { ty, .. } => {
                assert_eq!(ty.rank(), 2);
                assert_eq!(ty.dims()[0].as_const_int(), Some(3));
                assert_eq!(ty.dims()[1].as_const_int(), Some(4));
            }
            _ => panic!("expected alloc"),
        }
        let (p3, _) = mult_dim(&p2, &alloc_path, 0, 1).unwrap();
        match &p3.body[0].data {
            StmtKind::Alloc { ty, .. } => {
                assert_eq!(ty.rank(), 1);
                assert_eq!(ty.dims()[0].as_const_int(), Some(12));
            }
            _ => panic!("expected alloc"),
        }
    }

    #[test]
    fn expand_dim_checks_index_range() {
        let p = vec12();
        let alloc_path = CursorPath(vec![Edge::Body(0)]);
        // index 0 within extent 4 is fine
        assert!(expand_dim(&p, &alloc_path, int(4), int(0)).is_ok());
        // index 4 escapes extent 4
        assert!(expand_dim(&p, &alloc_path, int(4), int(4)).is_err());
    }

    #[test]
    fn lift_alloc_moves_out_of_loop() {
        let mut r#gen = SymGen::starting_at(1);
        let x = r#gen.fresh("x");
        let i = r#gen.fresh("i");
        let p = proc_of(vec![seq_for(
            &i,
            int(4),
            vec![
                alloc(&x, LoopType::R),
                assign(&x, LoopType::R, vec![], float(0.0)),
            ],
        )]);
        let alloc_path = CursorPath(vec![Edge::Body(0), Edge::Body(0)]);
        let (p2, fwd) = lift_alloc(&p, &alloc_path, 1).unwrap();
        assert!(matches!(p2.body[0].data, StmtKind::Alloc { .. }));
        assert!(matches!(p2.body[1].data, StmtKind::For { .. }));
        assert_eq!(
            fwd.forward_path(&alloc_path).unwrap(),
            CursorPath(vec![Edge::Body(0)])
        );
    }

    #[test]
    fn reuse_buffer_requires_dead_source() {
        let mut r#gen = SymGen::starting_at(1);
        let x = r#gen.fresh("x");
        let y = r#gen.fresh("y");
        let z = r#gen.fresh("z");
        // x written then read after y's alloc: reuse must fail
        let p = proc_of(vec![
            alloc(&x, LoopType::R),
            assign(&x, LoopType::R, vec![], float(1.0)),
            alloc(&y, LoopType::R),
            assign(&y, LoopType::R, vec![], float(2.0)),
            alloc(&z, LoopType::R),
            assign(&z, LoopType::R, vec![], read(&x, LoopType::R)),
        ]);
        let x_path = CursorPath(vec![Edge::Body(0)]);
        let y_path = CursorPath(vec![Edge::Body(2)]);
        assert!(reuse_buffer(&p, &x_path, &y_path).is_err());

        // without the later read it succeeds and renames y to x
        let p_ok = proc_of(vec![
            alloc(&x, LoopType::R),
            assign(&x, LoopType::R, vec![], float(1.0)),
            alloc(&y, LoopType::R),
            assign(&y, LoopType::R, vec![], float(2.0)),
        ]);
        let (p2, _) = reuse_buffer(&p_ok, &x_path, &y_path).unwrap();
        assert_eq!(p2.body.len(), 3);
        assert!(!p2.body.iter().any(|s| s.uses_sym(&y)));
    }
}
