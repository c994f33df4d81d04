//! Constant folding and control-flow simplification, to a fixpoint.

use crate::cursors::{BlockKind, CursorPath, ForwardingMap};
use crate::ir::expr::{BinOp, Expr, ExprKind, Value};
use crate::ir::proc::Proc;
use crate::ir::stmt::{map_own_exprs, Stmt, StmtKind};
use crate::ir::subst::Subst;
use crate::ir::build::int;

use super::RewriteResult;

fn fold_binop(op: BinOp, lhs: &Expr, rhs: &Expr) -> Option<Value> {
    match (op, &lhs.data, &rhs.data) {
        (_, ExprKind::Const(Value::Int(a)), ExprKind::Const(Value::Int(b))) => {
            let a = *a;
            let b = *b;
            Some(match op {
                BinOp::Add => Value::Int(a + b),
                BinOp::Sub => Value::Int(a - b),
                BinOp::Mul => Value::Int(a * b),
                BinOp::Div => {
                    if b == 0 {
                        return None;
                    }
                    Value::Int(a.div_euclid(b))
                }
                BinOp::Mod => {
                    if b == 0 {
                        return None;
                    }
                    Value::Int(a.rem_euclid(b))
                }
                BinOp::Lt => Value::Bool(a < b),
                BinOp::Gt => Value::Bool(a > b),
                BinOp::Le => Value::Bool(a <= b),
                BinOp::Ge => Value::Bool(a >= b),
                BinOp::Eq => Value::Bool(a == b),
                BinOp::And | BinOp::Or => return None,
            })
        }
        (
            BinOp::And | BinOp::Or,
            ExprKind::Const(Value::Bool(a)),
            ExprKind::Const(Value::Bool(b)),
        ) => Some(Value::Bool(if op == BinOp::And {
            *a && *b
        } else {
            *a || *b
        })),
        _ => None,
    }
}

/// Algebraic identities that do not change types: `e+0`, `e-0`, `e*1`,
/// `e*0`, `e/1`, short-circuit `and`/`or` with a constant side.
fn identity(op: BinOp, lhs: &Expr, rhs: &Expr) -> Option<Expr> {
    let int_of = |e: &Expr| e.as_const_int();
    match op {
        BinOp::Add => {
            if int_of(lhs) == Some(0) {
                return Some(rhs.clone());
            }
            if int_of(rhs) == Some(0) {
                return Some(lhs.clone());
            }
        }
        BinOp::Sub => {
            if int_of(rhs) == Some(0) {
                return Some(lhs.clone());
            }
        }
        BinOp::Mul => {
            if int_of(lhs) == Some(1) {
                return Some(rhs.clone());
            }
            if int_of(rhs) == Some(1) {
                return Some(lhs.clone());
            }
            if int_of(lhs) == Some(0) || int_of(rhs) == Some(0) {
                return Some(int(0));
            }
        }
        BinOp::Div => {
            if int_of(rhs) == Some(1) {
                return Some(lhs.clone());
            }
        }
        BinOp::Mod => {
            if int_of(rhs) == Some(1) {
                return Some(int(0));
            }
        }
        BinOp::And => {
            if lhs.as_const_bool() == Some(true) {
                return Some(rhs.clone());
            }
            if rhs.as_const_bool() == Some(true) {
                return Some(lhs.clone());
            }
        }
        BinOp::Or => {
            if lhs.as_const_bool() == Some(false) {
                return Some(rhs.clone());
            }
            if rhs.as_const_bool() == Some(false) {
                return Some(lhs.clone());
            }
        }
        _ => {}
    }
    None
}

pub(crate) fn fold_expr(e: &Expr) -> Expr {
    e.map(&|e| match &e.data {
        ExprKind::BinOp { op, lhs, rhs } => {
            if let Some(v) = fold_binop(*op, lhs, rhs) {
                return Expr {
                    data: ExprKind::Const(v),
                    ty: e.ty.clone(),
                    srcinfo: e.srcinfo.clone(),
                };
            }
            if let Some(simpler) = identity(*op, lhs, rhs) {
                return simpler;
            }
            e
        }
        ExprKind::USub { arg } => match &arg.data {
            ExprKind::Const(Value::Int(v)) => Expr {
                data: ExprKind::Const(Value::Int(-v)),
                ty: e.ty.clone(),
                srcinfo: e.srcinfo.clone(),
            },
            ExprKind::Const(Value::Float(v)) => Expr {
                data: ExprKind::Const(Value::Float(-v)),
                ty: e.ty.clone(),
                srcinfo: e.srcinfo.clone(),
            },
            _ => e,
        },
        _ => e,
    })
}

/// One structural pass. Emits forwarding entries for statements whose
/// path changed and tombstones for deleted ones; `old_prefix`/`new_prefix`
/// are the parent paths of the block in the old and new trees.
fn simplify_block(
    stmts: &[Stmt],
    old_prefix: &CursorPath,
    new_prefix: &CursorPath,
    kind: BlockKind,
    fwd: &mut ForwardingMap,
    changed: &mut bool,
) -> Vec<Stmt> {
    let mut out: Vec<Stmt> = Vec::with_capacity(stmts.len());
    for (i, s) in stmts.iter().enumerate() {
        let old_path = old_prefix.child(kind.edge(i));
        let folded = map_own_exprs(s, &fold_expr);
        if folded != *s {
            *changed = true;
        }
        enum Outcome {
            InlineBranch(Vec<Stmt>, BlockKind),
            DropLoop,
            Keep,
        }
        let outcome = match &folded.data {
            StmtKind::If { cond, body, orelse } if cond.as_const_bool().is_some() => {
                if cond.as_const_bool() == Some(true) {
                    Outcome::InlineBranch(body.clone(), BlockKind::Body)
                } else {
                    Outcome::InlineBranch(orelse.clone(), BlockKind::Orelse)
                }
            }
            StmtKind::For { hi, .. }
                if hi.as_const_int().map(|v| v <= 0).unwrap_or(false) =>
            {
                Outcome::DropLoop
            }
            _ => Outcome::Keep,
        };
        match outcome {
            Outcome::InlineBranch(inner, branch_kind) => {
                *changed = true;
                // inline the surviving branch at this position
                let base = out.len();
                for (j, child) in inner.iter().enumerate() {
                    let child_old = old_path.child(branch_kind.edge(j));
                    let child_new = new_prefix.child(kind.edge(base + j));
                    *fwd = std::mem::take(fwd).relocate(child_old, child_new);
                    out.push(child.clone());
                }
                *fwd = std::mem::take(fwd).tombstone(old_path.clone());
            }
            Outcome::DropLoop => {
                *changed = true;
                *fwd = std::mem::take(fwd).tombstone(old_path.clone());
            }
            Outcome::Keep => {
                let new_path = new_prefix.child(kind.edge(out.len()));
                if new_path != old_path {
                    *fwd = std::mem::take(fwd).relocate(old_path.clone(), new_path.clone());
                }
                let rebuilt = match folded.data {
                    StmtKind::If { cond, body, orelse } => {
                        let body =
                            simplify_block(&body, &old_path, &new_path, BlockKind::Body, fwd, changed);
                        let orelse = simplify_block(
                            &orelse,
                            &old_path,
                            &new_path,
                            BlockKind::Orelse,
                            fwd,
                            changed,
                        );
                        Stmt {
                            data: StmtKind::If { cond, body, orelse },
                            srcinfo: folded.srcinfo,
                        }
                    }
                    StmtKind::For {
                        iter,
                        hi,
                        body,
                        kind: lk,
                    } => {
                        // a single-trip loop runs its body once at 0
                        if hi.as_const_int() == Some(1) {
                            let sub = Subst::one(&iter, int(0));
                            let subbed = sub.apply_block(&body);
                            if subbed != body {
                                *changed = true;
                            }
                            let body = subbed;
                            let body = simplify_block(
                                &body, &old_path, &new_path, BlockKind::Body, fwd, changed,
                            );
                            Stmt {
                                data: StmtKind::For {
                                    iter,
                                    hi,
                                    body,
                                    kind: lk,
                                },
                                srcinfo: folded.srcinfo,
                            }
                        } else {
                            let body = simplify_block(
                                &body, &old_path, &new_path, BlockKind::Body, fwd, changed,
                            );
                            Stmt {
                                data: StmtKind::For {
                                    iter,
                                    hi,
                                    body,
                                    kind: lk,
                                },
                                srcinfo: folded.srcinfo,
                            }
                        }
                    }
                    data => Stmt {
                        data,
                        srcinfo: folded.srcinfo,
                    },
                };
                out.push(rebuilt);
            }
        }
    }
    out
}

/// Fold arithmetic, remove `if True`/`if False`, drop zero-trip loops;
/// iterate to a fixpoint. Idempotent by construction.
pub fn simplify(proc: &Proc) -> RewriteResult {
    let mut current = proc.clone();
    let mut total_fwd = ForwardingMap::identity();
    loop {
        let mut fwd = ForwardingMap::identity();
        let mut changed = false;
        let root = CursorPath::root();
        let body = simplify_block(
            &current.body,
            &root,
            &root,
            BlockKind::Body,
            &mut fwd,
            &mut changed,
        );
        let preds = current.preds.iter().map(fold_expr).collect();
        if !changed {
            return Ok((current, total_fwd));
        }
        current = Proc {
            body,
            preds,
            ..current
        };
        // later passes start from the already-forwarded coordinates, so a
        // single composed map would need sequential application; chain the
        // maps by nesting instead
        total_fwd = compose(total_fwd, fwd);
    }
}

/// Sequential composition as a single map: apply `first`, then `second`.
/// Represented by just keeping both and replaying (maps are cheap).
fn compose(first: ForwardingMap, second: ForwardingMap) -> ForwardingMap {
    ForwardingMap::chained(first, second)
}

#[cfg(test)]
mod tests {
    use super::*;
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
    fn folds_constant_arithmetic() {
        let mut r#gen = SymGen::starting_at(1);
        let x = r#gen.fresh("x");
        let p = proc_of(vec![assign(
            &x,
            LoopType::Index,
            vec![],
            add(mul(int(2), int(3)), int(4)),
        )]);
        let (p2, _) = simplify(&p).unwrap();
        match &p2.body[0].data {
            StmtKind::Assign { rhs, .. } => assert_eq!(rhs.as_const_int(), Some(10)),
            _ => panic!("expected assign"),
        }
    }

    #[test]
    fn removes_if_true_and_zero_trip_loops() {
        let mut r#gen = SymGen::starting_at(1);
        let x = r#gen.fresh("x");
        let i = r#gen.fresh("i");
        let p = proc_of(vec![
            if_(
                bool_const(true),
                vec![assign(&x, LoopType::R, vec![], float(1.0))],
                vec![],
            ),
            seq_for(&i, int(0), vec![assign(&x, LoopType::R, vec![], float(2.0))]),
        ]);
        let (p2, _) = simplify(&p).unwrap();
        assert_eq!(p2.body.len(), 1);
        assert!(matches!(p2.body[0].data, StmtKind::Assign { .. }));
    }

    #[test]
    fn simplify_is_idempotent() {
        let mut r#gen = SymGen::starting_at(1);
        let x = r#gen.fresh("x");
        let p = proc_of(vec![if_(
            lt(int(1), int(2)),
            vec![assign(&x, LoopType::R, vec![], float(1.0))],
            vec![assign(&x, LoopType::R, vec![], float(2.0))],
        )]);
        let (p1, _) = simplify(&p).unwrap();
        let (p2, _) = simplify(&p1).unwrap();
        assert_eq!(p1, p2);
    }
}
