//! Unification of a sub-procedure body against a statement block.
//!
//! Matching is structural up to α-renaming of bound iterators and affine
//! equivalence of index arithmetic. The sub-procedure's parameters are the
//! unknowns: tensor parameters bind to target buffers, control parameters
//! (size/index/bool) are solved from linear equations collected along the
//! match, data scalars bind to target scalars. Equations that cannot be
//! solved triangularly are reported as ambiguous rather than guessed.

use indexmap::IndexMap;
use log::debug;
use std::rc::Rc;

use thiserror::Error;

use crate::analysis::affine::{lin_of_expr, LinExpr};
use crate::fmt;
use crate::ir::expr::{Expr, ExprKind, Value};
use crate::ir::proc::Proc;
use crate::ir::stmt::{Stmt, StmtKind};
use crate::ir::sym::Sym;
use crate::ir::types::LoopType;

#[derive(Debug, Error)]
pub enum UnifyError {
    #[error("mismatch: sub-procedure has {0}, block has {1}")]
    Mismatch(String, String),
    #[error("block has {got} statements where the sub-procedure body has {want}")]
    Length { want: usize, got: usize },
    #[error("could not infer a value for parameter '{0}'")]
    Unsolved(String),
    #[error("parameter '{0}' is bound ambiguously")]
    Ambiguous(String),
    #[error("index arithmetic outside the affine fragment")]
    NonAffine,
}

struct Unifier {
    /// tensor / data-scalar parameters → target buffer symbols
    buf_map: IndexMap<Sym, Sym>,
    /// control parameters → solved linear expressions over target symbols
    ctrl: IndexMap<Sym, LinExpr>,
    /// candidate-bound names (iterators, local allocs) → target names
    alpha: IndexMap<Sym, Sym>,
    /// control parameters still unknown
    ctrl_params: Vec<Sym>,
    /// deferred multi-unknown equations: candidate lin == target lin
    deferred: Vec<(LinExpr, LinExpr)>,
}

fn mismatch(c: impl std::fmt::Display, t: impl std::fmt::Display) -> UnifyError {
    UnifyError::Mismatch(c.to_string(), t.to_string())
}

impl Unifier {
    /// Rename candidate-bound iterators to their target counterparts.
    fn alpha_rename(&self, lin: &LinExpr) -> LinExpr {
        let mut out = lin.clone();
        for (c, t) in &self.alpha {
            out = out.rename(c, t);
        }
        out
    }

    fn bind_buf(&mut self, param: &Sym, target: &Sym) -> Result<(), UnifyError> {
        match self.buf_map.get(param) {
            Some(prev) if prev == target => Ok(()),
            Some(prev) => Err(mismatch(
                format!("{param} already bound to {prev}"),
                target,
            )),
            None => {
                self.buf_map.insert(param.clone(), target.clone());
                Ok(())
            }
        }
    }

    fn bind_alpha(&mut self, cand: &Sym, target: &Sym) -> Result<(), UnifyError> {
        match self.alpha.get(cand) {
            Some(prev) if prev == target => Ok(()),
            Some(prev) => Err(mismatch(format!("{cand} already maps to {prev}"), target)),
            None => {
                self.alpha.insert(cand.clone(), target.clone());
                Ok(())
            }
        }
    }

    /// Record `cand == target` where `cand` may mention control unknowns.
    fn equate(&mut self, cand: &Expr, target: &Expr) -> Result<(), UnifyError> {
        let (Some(lc), Some(lt)) = (lin_of_expr(cand), lin_of_expr(target)) else {
            // not affine on one side: fall back to structural matching
            return self.match_expr_structural(cand, target);
        };
        self.solve_equation(self.alpha_rename(&lc), lt)
    }

    fn solve_equation(&mut self, lc: LinExpr, lt: LinExpr) -> Result<(), UnifyError> {
        // substitute already-solved unknowns
        let mut lc = lc;
        for (u, val) in &self.ctrl {
            if let Some(c) = lc.terms.get(u).copied() {
                lc.terms.shift_remove(u);
                lc = lc.add(&val.scale(c));
            }
        }
        let unknowns: Vec<Sym> = lc
            .terms
            .keys()
            .filter(|s| self.ctrl_params.contains(s))
            .cloned()
            .collect();
        match unknowns.len() {
            0 => {
                if lc == lt {
                    Ok(())
                } else {
                    Err(mismatch(
                        format!("index form {lc:?}"),
                        format!("{lt:?}"),
                    ))
                }
            }
            1 => {
                let u = &unknowns[0];
                let c = lc.terms[u];
                lc.terms.shift_remove(u);
                // c*u + lc_rest == lt  →  u == (lt - lc_rest) / c
                let rhs = lt.sub(&lc);
                if rhs.konst % c != 0 || rhs.terms.values().any(|v| v % c != 0) {
                    return Err(mismatch(
                        format!("{c}·{u} + ..."),
                        "a non-divisible index form".to_string(),
                    ));
                }
                let val = LinExpr {
                    terms: rhs.terms.iter().map(|(s, v)| (s.clone(), v / c)).collect(),
                    konst: rhs.konst / c,
                };
                debug!("unify: solved {u} = {val:?}");
                self.ctrl_params.retain(|p| p != u);
                self.ctrl.insert(u.clone(), val);
                self.retry_deferred()
            }
            _ => {
                self.deferred.push((lc, lt));
                Ok(())
            }
        }
    }

    fn retry_deferred(&mut self) -> Result<(), UnifyError> {
        let pending = std::mem::take(&mut self.deferred);
        for (lc, lt) in pending {
            self.solve_equation(lc, lt)?;
        }
        Ok(())
    }

    fn match_expr(&mut self, cand: &Expr, target: &Expr) -> Result<(), UnifyError> {
        if cand.ty.is_indexable() && target.ty.is_indexable() {
            return self.equate(cand, target);
        }
        self.match_expr_structural(cand, target)
    }

    fn match_expr_structural(&mut self, cand: &Expr, target: &Expr) -> Result<(), UnifyError> {
        match (&cand.data, &target.data) {
            (ExprKind::Read { name, idx }, ExprKind::Read { name: tn, idx: ti }) => {
                if idx.len() != ti.len() {
                    return Err(mismatch(
                        fmt::expr_to_string(cand),
                        fmt::expr_to_string(target),
                    ));
                }
                if self.alpha.contains_key(name) {
                    let mapped = self.alpha[name].clone();
                    if &mapped != tn {
                        return Err(mismatch(name, tn));
                    }
                } else {
                    self.bind_buf(name, tn)?;
                }
                for (c, t) in idx.iter().zip(ti) {
                    self.match_expr(c, t)?;
                }
                Ok(())
            }
            (ExprKind::Const(a), ExprKind::Const(b)) => {
                let same = match (a, b) {
                    (Value::Int(x), Value::Int(y)) => x == y,
                    (Value::Bool(x), Value::Bool(y)) => x == y,
                    (Value::Float(x), Value::Float(y)) => x == y,
                    _ => false,
                };
                if same {
                    Ok(())
                } else {
                    Err(mismatch(
                        fmt::expr_to_string(cand),
                        fmt::expr_to_string(target),
                    ))
                }
            }
            (ExprKind::USub { arg: a }, ExprKind::USub { arg: b }) => self.match_expr(a, b),
            (
                ExprKind::BinOp { op, lhs, rhs },
                ExprKind::BinOp {
                    op: top,
                    lhs: tl,
                    rhs: tr,
                },
            ) => {
                if op != top {
                    return Err(mismatch(op, top));
                }
                self.match_expr(lhs, tl)?;
                self.match_expr(rhs, tr)
            }
            (
                ExprKind::BuiltIn { f, args },
                ExprKind::BuiltIn {
                    f: tf,
                    args: targs,
                },
            ) => {
                if f != tf || args.len() != targs.len() {
                    return Err(mismatch(f, tf));
                }
                for (c, t) in args.iter().zip(targs) {
                    self.match_expr(c, t)?;
                }
                Ok(())
            }
            (
                ExprKind::ReadConfig { config, field },
                ExprKind::ReadConfig {
                    config: tc,
                    field: tfield,
                },
            ) => {
                if config == tc && field == tfield {
                    Ok(())
                } else {
                    Err(mismatch(
                        format!("{}.{field}", config.name()),
                        format!("{}.{tfield}", tc.name()),
                    ))
                }
            }
            _ => Err(mismatch(
                fmt::expr_to_string(cand),
                fmt::expr_to_string(target),
            )),
        }
    }

    fn match_write(
        &mut self,
        (name, idx, rhs): (&Sym, &[Expr], &Expr),
        (tn, ti, tr): (&Sym, &[Expr], &Expr),
    ) -> Result<(), UnifyError> {
        if idx.len() != ti.len() {
            return Err(mismatch(name, tn));
        }
        if self.alpha.contains_key(name) {
            let mapped = self.alpha[name].clone();
            if &mapped != tn {
                return Err(mismatch(name, tn));
            }
        } else {
            self.bind_buf(name, tn)?;
        }
        for (c, t) in idx.iter().zip(ti) {
            self.match_expr(c, t)?;
        }
        self.match_expr(rhs, tr)
    }

    fn match_stmt(&mut self, cand: &Stmt, target: &Stmt) -> Result<(), UnifyError> {
        match (&cand.data, &target.data) {
            (
                StmtKind::Assign { name, idx, rhs, .. },
                StmtKind::Assign {
                    name: tn,
                    idx: ti,
                    rhs: tr,
                    ..
                },
            ) => self.match_write((name, idx, rhs), (tn, ti, tr)),
            (
                StmtKind::Reduce { name, idx, rhs, .. },
                StmtKind::Reduce {
                    name: tn,
                    idx: ti,
                    rhs: tr,
                    ..
                },
            ) => self.match_write((name, idx, rhs), (tn, ti, tr)),
            (StmtKind::Pass, StmtKind::Pass) => Ok(()),
            (
                StmtKind::If { cond, body, orelse },
                StmtKind::If {
                    cond: tc,
                    body: tb,
                    orelse: to,
                },
            ) => {
                self.match_expr_structural(cond, tc)?;
                self.match_block(body, tb)?;
                self.match_block(orelse, to)
            }
            (
                StmtKind::For {
                    iter,
                    hi,
                    body,
                    kind,
                },
                StmtKind::For {
                    iter: ti,
                    hi: th,
                    body: tb,
                    kind: tk,
                },
            ) => {
                if kind != tk {
                    return Err(mismatch("a sequential loop", "a parallel loop"));
                }
                self.match_expr(hi, th)?;
                self.bind_alpha(iter, ti)?;
                self.match_block(body, tb)
            }
            (
                StmtKind::Alloc { name, ty, .. },
                StmtKind::Alloc {
                    name: tn, ty: tty, ..
                },
            ) => {
                if ty.base() != tty.base() || ty.rank() != tty.rank() {
                    return Err(mismatch(name, tn));
                }
                self.bind_alpha(name, tn)
            }
            (
                StmtKind::Call { f, args },
                StmtKind::Call {
                    f: tf,
                    args: targs,
                },
            ) => {
                if f.name != tf.name || args.len() != targs.len() {
                    return Err(mismatch(&f.name, &tf.name));
                }
                for (c, t) in args.iter().zip(targs) {
                    self.match_expr(c, t)?;
                }
                Ok(())
            }
            _ => Err(mismatch(
                fmt::stmt_to_string(cand).lines().next().unwrap_or(""),
                fmt::stmt_to_string(target).lines().next().unwrap_or(""),
            )),
        }
    }

    fn match_block(&mut self, cand: &[Stmt], target: &[Stmt]) -> Result<(), UnifyError> {
        if cand.len() != target.len() {
            return Err(UnifyError::Length {
                want: cand.len(),
                got: target.len(),
            });
        }
        for (c, t) in cand.iter().zip(target) {
            self.match_stmt(c, t)?;
        }
        Ok(())
    }
}

fn lin_to_expr(lin: &LinExpr, ty: LoopType) -> Expr {
    use crate::ir::build::{add, int, mul, read};
    let mut acc: Option<Expr> = if lin.konst != 0 || lin.terms.is_empty() {
        Some(int(lin.konst))
    } else {
        None
    };
    for (s, c) in &lin.terms {
        let term = if *c == 1 {
            read(s, LoopType::Index)
        } else {
            mul(int(*c), read(s, LoopType::Index))
        };
        acc = Some(match acc {
            None => term,
            Some(a) => add(a, term),
        });
    }
    let mut e = acc.expect("at least one term or the constant");
    e.ty = ty;
    e
}

/// Unify `subproc`'s body against `block`; on success return the actual
/// arguments (in parameter order) for an equivalent call.
pub fn unify_block(block: &[Stmt], subproc: &Rc<Proc>) -> Result<Vec<Expr>, UnifyError> {
    let mut u = Unifier {
        buf_map: IndexMap::new(),
        ctrl: IndexMap::new(),
        alpha: IndexMap::new(),
        ctrl_params: subproc
            .args
            .iter()
            .filter(|a| a.ty.is_indexable() || a.ty.is_bool())
            .map(|a| a.name.clone())
            .collect(),
        deferred: Vec::new(),
    };
    u.match_block(&subproc.body, block)?;

    if let Some((lc, _)) = u.deferred.first() {
        let name = lc
            .terms
            .keys()
            .find(|s| u.ctrl_params.contains(s))
            .map(|s| s.name().to_string())
            .unwrap_or_default();
        return Err(UnifyError::Ambiguous(name));
    }

    let mut args = Vec::with_capacity(subproc.args.len());
    for p in &subproc.args {
        if p.ty.is_indexable() || p.ty.is_bool() {
            let lin = u
                .ctrl
                .get(&p.name)
                .ok_or_else(|| UnifyError::Unsolved(p.name.name().to_string()))?;
            args.push(lin_to_expr(lin, p.ty.clone()));
        } else {
            let target = u
                .buf_map
                .get(&p.name)
                .ok_or_else(|| UnifyError::Unsolved(p.name.name().to_string()))?;
            args.push(Expr::new(
                ExprKind::Read {
                    name: target.clone(),
                    idx: vec![],
                },
                p.ty.clone(),
            ));
        }
    }
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::build::*;
    use crate::ir::sym::SymGen;
    use crate::ir::{ProcArg, SrcInfo};

    /// vadd4(A, B, C): for k in seq(0, 4): C[k] = A[k] + B[k]
    fn vadd4() -> Rc<Proc> {
        let mut r#gen = SymGen::starting_at(1);
        let a = r#gen.fresh("A");
        let b = r#gen.fresh("B");
        let c = r#gen.fresh("C");
        let k = r#gen.fresh("k");
        let vec4 = |s: &Sym| ProcArg {
            name: s.clone(),
            ty: tensor(LoopType::F32, vec![int(4)]),
            mem: None,
            srcinfo: SrcInfo::default(),
        };
        Rc::new(Proc {
            name: "vadd4".to_string(),
            args: vec![vec4(&a), vec4(&b), vec4(&c)],
            preds: vec![],
            body: vec![seq_for(
                &k,
                int(4),
                vec![assign(
                    &c,
                    LoopType::F32,
                    vec![read(&k, LoopType::Index)],
                    add(
                        read_idx(&a, LoopType::F32, vec![read(&k, LoopType::Index)]),
                        read_idx(&b, LoopType::F32, vec![read(&k, LoopType::Index)]),
                    ),
                )],
            )],
            instr: None,
            srcinfo: SrcInfo::default(),
        })
    }

    #[test]
    fn unifies_renamed_block() {
        let sub = vadd4();
        let mut r#gen = SymGen::starting_at(100);
        let x = r#gen.fresh("X");
        let y = r#gen.fresh("Y");
        let z = r#gen.fresh("Z");
        let t = r#gen.fresh("t");
        let block = vec![seq_for(
            &t,
            int(4),
            vec![assign(
                &z,
                LoopType::F32,
                vec![read(&t, LoopType::Index)],
                add(
                    read_idx(&x, LoopType::F32, vec![read(&t, LoopType::Index)]),
                    read_idx(&y, LoopType::F32, vec![read(&t, LoopType::Index)]),
                ),
            )],
        )];
        let args = unify_block(&block, &sub).unwrap();
        let names: Vec<String> = args.iter().map(crate::fmt::expr_to_string).collect();
        assert_eq!(names, vec!["X", "Y", "Z"]);
    }

    #[test]
    fn reports_first_mismatch() {
        let sub = vadd4();
        let mut r#gen = SymGen::starting_at(100);
        let x = r#gen.fresh("X");
        let t = r#gen.fresh("t");
        // multiplication where the candidate has addition
        let block = vec![seq_for(
            &t,
            int(4),
            vec![assign(
                &x,
                LoopType::F32,
                vec![read(&t, LoopType::Index)],
                mul(
                    read_idx(&x, LoopType::F32, vec![read(&t, LoopType::Index)]),
                    read_idx(&x, LoopType::F32, vec![read(&t, LoopType::Index)]),
                ),
            )],
        )];
        assert!(matches!(
            unify_block(&block, &sub),
            Err(UnifyError::Mismatch(..))
        ));
    }

    #[test]
    fn solves_size_parameters() {
        // scale_n(n, X): for k in seq(0, n): X[k] = 2.0 * X[k]
        let mut r#gen = SymGen::starting_at(1);
        let n = r#gen.fresh("n");
        let x = r#gen.fresh("X");
        let k = r#gen.fresh("k");
        let sub = Rc::new(Proc {
            name: "scale_n".to_string(),
            args: vec![
                ProcArg {
                    name: n.clone(),
                    ty: LoopType::Size,
                    mem: None,
                    srcinfo: SrcInfo::default(),
                },
                ProcArg {
                    name: x.clone(),
                    ty: tensor(LoopType::F32, vec![read(&n, LoopType::Size)]),
                    mem: None,
                    srcinfo: SrcInfo::default(),
                },
            ],
            preds: vec![],
            body: vec![seq_for(
                &k,
                read(&n, LoopType::Size),
                vec![assign(
                    &x,
                    LoopType::F32,
                    vec![read(&k, LoopType::Index)],
                    mul(
                        float(2.0),
                        read_idx(&x, LoopType::F32, vec![read(&k, LoopType::Index)]),
                    ),
                )],
            )],
            instr: None,
            srcinfo: SrcInfo::default(),
        });
        let mut r#gen = SymGen::starting_at(100);
        let w = r#gen.fresh("W");
        let t = r#gen.fresh("t");
        let block = vec![seq_for(
            &t,
            int(12),
            vec![assign(
                &w,
                LoopType::F32,
                vec![read(&t, LoopType::Index)],
                mul(
                    float(2.0),
                    read_idx(&w, LoopType::F32, vec![read(&t, LoopType::Index)]),
                ),
            )],
        )];
        let args = unify_block(&block, &sub).unwrap();
        assert_eq!(crate::fmt::expr_to_string(&args[0]), "12");
        assert_eq!(crate::fmt::expr_to_string(&args[1]), "W");
    }
}
