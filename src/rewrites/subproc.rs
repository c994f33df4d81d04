//! Sub-procedure rewrites: extraction, inlining, unification-backed
//! replacement, and equivalent-callee swap.

use std::rc::Rc;

use log::debug;

use crate::cursors::{BlockKind, CursorPath, ForwardingMap};
use crate::fmt;
use crate::ir::expr::{Expr, ExprKind};
use crate::ir::proc::{Proc, ProcArg};
use crate::ir::stmt::{Stmt, StmtKind};
use crate::ir::subst::Subst;
use crate::ir::sym::{Sym, SymGen};
use crate::ir::types::LoopType;
use crate::unify::unify_block;

use super::{list_at, list_pos, splice, stmt_at, RewriteError, RewriteResult};

/// Free symbols of a block: everything used but not bound inside it.
fn free_syms(stmts: &[Stmt]) -> Vec<Sym> {
    fn bound_in(stmts: &[Stmt], out: &mut Vec<Sym>) {
        for s in stmts {
            s.walk(&mut |s| match &s.data {
                StmtKind::Alloc { name, .. } | StmtKind::WindowStmt { name, .. } => {
                    out.push(name.clone())
                }
                StmtKind::For { iter, .. } => out.push(iter.clone()),
                _ => {}
            });
        }
    }
    let mut bound = Vec::new();
    bound_in(stmts, &mut bound);

    let mut free = Vec::new();
    let mut note = |s: &Sym| {
        if !bound.contains(s) && !free.contains(s) {
            free.push(s.clone());
        }
    };
    for s in stmts {
        s.walk(&mut |s| {
            match &s.data {
                StmtKind::Assign { name, .. }
                | StmtKind::Reduce { name, .. }
                | StmtKind::WindowStmt { name, .. } => note(name),
                _ => {}
            }
            s.own_exprs(&mut |e| {
                e.walk(&mut |e| match &e.data {
                    ExprKind::Read { name, .. }
                    | ExprKind::WindowExpr { name, .. }
                    | ExprKind::StrideExpr { name, .. } => note(name),
                    _ => {}
                })
            });
        });
    }
    free
}

/// Extract the statement at `stmt_path` into a new procedure named
/// `name`, closing over its free buffers and control variables as
/// arguments; the statement is replaced by a call. Returns the rewritten
/// procedure, the forwarding map, and the new sub-procedure.
pub fn extract_subproc(
    proc: &Proc,
    name: &str,
    stmt_path: &CursorPath,
) -> Result<(Proc, ForwardingMap, Rc<Proc>), RewriteError> {
    let stmt = stmt_at(proc, stmt_path)?.clone();
    let region = vec![stmt];

    let mut args: Vec<ProcArg> = Vec::new();
    let mut actuals: Vec<Expr> = Vec::new();
    for sym in free_syms(&region) {
        let ty = proc.decl_type(&sym).ok_or_else(|| {
            RewriteError::Bug(format!("free symbol '{sym}' has no declaration"))
        })?;
        let mem = proc.decl_mem(&sym);
        actuals.push(Expr::new(
            ExprKind::Read {
                name: sym.clone(),
                idx: vec![],
            },
            ty.clone(),
        ));
        args.push(ProcArg {
            name: sym,
            ty,
            mem,
            srcinfo: proc.srcinfo.clone(),
        });
    }

    let subproc = Rc::new(Proc {
        name: name.to_string(),
        args,
        preds: vec![],
        body: region,
        instr: None,
        srcinfo: proc.srcinfo.clone(),
    });

    let call = Stmt::new(StmtKind::Call {
        f: subproc.clone(),
        args: actuals,
    });
    let (parent, kind, at) = list_pos(stmt_path)?;
    let (new, _) = splice(proc, &parent, kind, at, at + 1, vec![call])?;
    let fwd = ForwardingMap::identity().tombstone(stmt_path.clone());
    Ok((new, fwd, subproc))
}

/// Replace a call by the callee's body with actuals substituted for
/// parameters. Buffer actuals must be bare reads; callee-local names are
/// refreshed to keep allocation names unique.
pub fn inline(proc: &Proc, call_path: &CursorPath) -> RewriteResult {
    let (callee, actuals) = match &stmt_at(proc, call_path)?.data {
        StmtKind::Call { f, args } => (f.clone(), args.clone()),
        _ => {
            return Err(RewriteError::precondition(
                "cursor does not point at a call",
            ))
        }
    };

    let mut sub = Subst::default();
    for (param, actual) in callee.args.iter().zip(&actuals) {
        if param.ty.is_tensor() {
            match &actual.data {
                ExprKind::Read { name, idx } if idx.is_empty() => {
                    sub.bufs.insert(param.name.clone(), name.clone());
                }
                _ => {
                    return Err(RewriteError::precondition(format!(
                        "cannot inline: buffer argument '{}' is not a bare buffer",
                        fmt::expr_to_string(actual)
                    )))
                }
            }
        } else {
            sub.exprs.insert(param.name.clone(), actual.clone());
        }
    }

    // refresh callee-local bindings so allocation names stay unique
    let mut r#gen = SymGen::for_proc(proc);
    let mut body = sub.apply_block(&callee.body);
    let mut locals: Vec<Sym> = Vec::new();
    for s in &body {
        s.walk(&mut |s| match &s.data {
            StmtKind::Alloc { name, .. } | StmtKind::WindowStmt { name, .. } => {
                if !locals.contains(name) {
                    locals.push(name.clone());
                }
            }
            StmtKind::For { iter, .. } => {
                if !locals.contains(iter) {
                    locals.push(iter.clone());
                }
            }
            _ => {}
        });
    }
    for local in locals {
        let fresh = r#gen.fresh(local.name());
        let mut rename = Subst::rename_buf(&local, &fresh);
        // loop iterators are bare reads, renamed through the expr map
        rename.exprs.insert(
            local.clone(),
            crate::ir::build::read(&fresh, LoopType::Index),
        );
        body = rename.apply_block(&body);
        body = body
            .iter()
            .map(|s| rename_binders(s, &local, &fresh))
            .collect();
    }

    let (parent, kind, at) = list_pos(call_path)?;
    let inserted = body.len();
    let (new, _) = splice(proc, &parent, kind, at, at + 1, body)?;
    let fwd = ForwardingMap::identity()
        .tombstone(call_path.clone())
        .spliced(parent, kind, at, 1, inserted);
    Ok((new, fwd))
}

fn rename_binders(s: &Stmt, old: &Sym, new: &Sym) -> Stmt {
    let data = match &s.data {
        StmtKind::For {
            iter,
            hi,
            body,
            kind,
        } => StmtKind::For {
            iter: if iter == old { new.clone() } else { iter.clone() },
            hi: hi.clone(),
            body: body.iter().map(|c| rename_binders(c, old, new)).collect(),
            kind: *kind,
        },
        StmtKind::If { cond, body, orelse } => StmtKind::If {
            cond: cond.clone(),
            body: body.iter().map(|c| rename_binders(c, old, new)).collect(),
            orelse: orelse.iter().map(|c| rename_binders(c, old, new)).collect(),
        },
        _ => return s.clone(),
    };
    Stmt {
        data,
        srcinfo: s.srcinfo.clone(),
    }
}

/// Unify `subproc`'s body against the block and replace the block by an
/// equivalent call. With `quiet`, the mismatch diagnostic is logged
/// rather than printed.
pub fn replace(
    proc: &Proc,
    parent: &CursorPath,
    kind: BlockKind,
    lo: usize,
    hi: usize,
    subproc: &Rc<Proc>,
    quiet: bool,
) -> RewriteResult {
    let list = list_at(proc, parent, kind)?;
    if hi > list.len() || lo >= hi {
        return Err(RewriteError::BadCursor);
    }
    let block = &list[lo..hi];
    let args = match unify_block(block, subproc) {
        Ok(args) => args,
        Err(e) => {
            if quiet {
                debug!("replace: unification against '{}' failed: {e}", subproc.name);
            } else {
                debug!(
                    "replace: unification against '{}' failed on block:\n{}",
                    subproc.name,
                    block
                        .iter()
                        .map(fmt::stmt_to_string)
                        .collect::<Vec<_>>()
                        .join("\n")
                );
            }
            return Err(e.into());
        }
    };

    let call = Stmt::new(StmtKind::Call {
        f: subproc.clone(),
        args,
    });
    let (new, _) = splice(proc, parent, kind, lo, hi, vec![call])?;
    let mut fwd = ForwardingMap::identity();
    for i in lo..hi {
        fwd = fwd.tombstone(parent.child(kind.edge(i)));
    }
    let fwd = fwd.spliced(parent.clone(), kind, lo, hi - lo, 1);
    Ok((new, fwd))
}

/// Swap the callee of a call with an equivalent procedure. Equivalence is
/// the caller's obligation (checked against provenance at the API layer).
pub fn call_eqv(proc: &Proc, call_path: &CursorPath, eqv: &Rc<Proc>) -> RewriteResult {
    let (callee, args) = match &stmt_at(proc, call_path)?.data {
        StmtKind::Call { f, args } => (f.clone(), args.clone()),
        _ => {
            return Err(RewriteError::precondition(
                "cursor does not point at a call",
            ))
        }
    };
    if callee.args.len() != eqv.args.len() {
        return Err(RewriteError::precondition(format!(
            "'{}' and '{}' have different signatures",
            callee.name, eqv.name
        )));
    }
    let new_call = Stmt::new(StmtKind::Call {
        f: eqv.clone(),
        args,
    });
    let (parent, kind, at) = list_pos(call_path)?;
    let (new, _) = splice(proc, &parent, kind, at, at + 1, vec![new_call])?;
    Ok((new, ForwardingMap::identity()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursors::Edge;
    use crate::ir::build::*;
    use crate::ir::SrcInfo;

    fn axpy() -> (Proc, Sym, Sym) {
        let mut r#gen = SymGen::starting_at(1);
        let x = r#gen.fresh("x");
        let y = r#gen.fresh("y");
        let i = r#gen.fresh("i");
        let proc = Proc {
            name: "axpy".to_string(),
            args: vec![
                ProcArg {
                    name: x.clone(),
                    ty: tensor(LoopType::F32, vec![int(8)]),
                    mem: None,
                    srcinfo: SrcInfo::default(),
                },
                ProcArg {
                    name: y.clone(),
                    ty: tensor(LoopType::F32, vec![int(8)]),
                    mem: None,
                    srcinfo: SrcInfo::default(),
                },
            ],
            preds: vec![],
            body: vec![seq_for(
                &i,
                int(8),
                vec![reduce(
                    &y,
                    LoopType::F32,
                    vec![read(&i, LoopType::Index)],
                    read_idx(&x, LoopType::F32, vec![read(&i, LoopType::Index)]),
                )],
            )],
            instr: None,
            srcinfo: SrcInfo::default(),
        };
        (proc, x, y)
    }

    #[test]
    fn extract_then_inline_round_trips() {
        let (p, ..) = axpy();
        let loop_path = CursorPath(vec![Edge::Body(0)]);
        let (p2, _, sub) = extract_subproc(&p, "inner", &loop_path).unwrap();
        assert!(matches!(p2.body[0].data, StmtKind::Call { .. }));
        assert_eq!(sub.name, "inner");
        assert_eq!(sub.args.len(), 2);

        let (p3, _) = inline(&p2, &loop_path).unwrap();
        // same structure up to iterator renaming
        assert_eq!(p3.body.len(), 1);
        match (&p3.body[0].data, &p.body[0].data) {
            (StmtKind::For { hi: h1, .. }, StmtKind::For { hi: h2, .. }) => {
                assert_eq!(h1, h2)
            }
            _ => panic!("expected loops"),
        }
    }
}
