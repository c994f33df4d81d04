//! Re-typechecking of IR trees.
//!
//! Annotation rewrites (`set_precision`, `set_window`, `set_memory`) and
//! several structural rewrites change declared buffer types; [`retype`]
//! recomputes every expression type from the declarations and re-validates
//! the shape/type/scope invariants, failing with a [`TypeError`] when a
//! rewrite would leave the tree inconsistent.

use indexmap::IndexMap;
use thiserror::Error;

use crate::ir::expr::{Expr, ExprKind, Value, WAccess};
use crate::ir::proc::Proc;
use crate::ir::stmt::{Stmt, StmtKind};
use crate::ir::sym::Sym;
use crate::ir::types::LoopType;

#[derive(Debug, Error)]
pub enum TypeError {
    #[error("use of unbound symbol '{0}'")]
    Unbound(Sym),
    #[error("'{name}' indexed with {got} coordinates, declared rank is {expected}")]
    Arity {
        name: Sym,
        expected: usize,
        got: usize,
    },
    #[error("type mismatch: expected {expected:?}, got {got:?}")]
    Mismatch { expected: LoopType, got: LoopType },
    #[error("expected an indexable expression, got {0:?}")]
    NotIndexable(LoopType),
    #[error("expected a boolean expression, got {0:?}")]
    NotBool(LoopType),
    #[error("'{0}' is not a tensor or window")]
    NotTensor(Sym),
    #[error("config '{config}' has no field '{field}'")]
    NoSuchField { config: String, field: String },
    #[error("call to '{callee}' passes {got} arguments, expected {expected}")]
    CallArity {
        callee: String,
        expected: usize,
        got: usize,
    },
}

struct Env {
    scopes: Vec<IndexMap<Sym, LoopType>>,
}

impl Env {
    fn new() -> Self {
        Env {
            scopes: vec![IndexMap::new()],
        }
    }

    fn push(&mut self) {
        self.scopes.push(IndexMap::new());
    }

    fn pop(&mut self) {
        self.scopes.pop();
    }

    fn bind(&mut self, sym: &Sym, ty: LoopType) {
        self.scopes
            .last_mut()
            .expect("scope stack is never empty")
            .insert(sym.clone(), ty);
    }

    fn lookup(&self, sym: &Sym) -> Option<&LoopType> {
        self.scopes.iter().rev().find_map(|s| s.get(sym))
    }
}

/// `R` unifies with any real scalar; index types unify among themselves.
fn unify(a: &LoopType, b: &LoopType) -> Result<LoopType, TypeError> {
    if a == b {
        return Ok(a.clone());
    }
    match (a, b) {
        (LoopType::R, t) | (t, LoopType::R) if t.is_real_scalar() => Ok(t.clone()),
        (a, b) if a.is_indexable() && b.is_indexable() => Ok(LoopType::Index),
        _ => Err(TypeError::Mismatch {
            expected: a.clone(),
            got: b.clone(),
        }),
    }
}

fn check_indexable(e: &Expr) -> Result<(), TypeError> {
    if e.ty.is_indexable() {
        Ok(())
    } else {
        Err(TypeError::NotIndexable(e.ty.clone()))
    }
}

fn retype_expr(e: &Expr, env: &Env) -> Result<Expr, TypeError> {
    let (data, ty) = match &e.data {
        ExprKind::Read { name, idx } => {
            let decl = env
                .lookup(name)
                .ok_or_else(|| TypeError::Unbound(name.clone()))?
                .clone();
            let idx = idx
                .iter()
                .map(|i| {
                    let i = retype_expr(i, env)?;
                    check_indexable(&i)?;
                    Ok(i)
                })
                .collect::<Result<Vec<_>, TypeError>>()?;
            let ty = if idx.is_empty() {
                decl
            } else if idx.len() == decl.rank() {
                decl.base().clone()
            } else {
                return Err(TypeError::Arity {
                    name: name.clone(),
                    expected: decl.rank(),
                    got: idx.len(),
                });
            };
            (
                ExprKind::Read {
                    name: name.clone(),
                    idx,
                },
                ty,
            )
        }
        ExprKind::Const(v) => {
            let ty = match v {
                Value::Bool(_) => LoopType::Bool,
                Value::Int(_) => {
                    if e.ty.is_indexable() || e.ty.is_real_scalar() {
                        e.ty.clone()
                    } else {
                        LoopType::Index
                    }
                }
                Value::Float(_) => {
                    if e.ty.is_real_scalar() {
                        e.ty.clone()
                    } else {
                        LoopType::R
                    }
                }
            };
            (ExprKind::Const(v.clone()), ty)
        }
        ExprKind::USub { arg } => {
            let arg = retype_expr(arg, env)?;
            if !arg.ty.is_numeric() {
                return Err(TypeError::NotIndexable(arg.ty.clone()));
            }
            let ty = arg.ty.clone();
            (ExprKind::USub { arg: Box::new(arg) }, ty)
        }
        ExprKind::BinOp { op, lhs, rhs } => {
            let lhs = retype_expr(lhs, env)?;
            let rhs = retype_expr(rhs, env)?;
            let ty = if op.is_logical() {
                for side in [&lhs, &rhs] {
                    if !side.ty.is_bool() {
                        return Err(TypeError::NotBool(side.ty.clone()));
                    }
                }
                LoopType::Bool
            } else if op.is_comparison() {
                unify(&lhs.ty, &rhs.ty)?;
                LoopType::Bool
            } else {
                unify(&lhs.ty, &rhs.ty)?
            };
            (
                ExprKind::BinOp {
                    op: *op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                ty,
            )
        }
        ExprKind::BuiltIn { f, args } => {
            let args = args
                .iter()
                .map(|a| retype_expr(a, env))
                .collect::<Result<Vec<_>, TypeError>>()?;
            let ty = args
                .first()
                .map(|a| a.ty.clone())
                .unwrap_or(LoopType::R);
            (ExprKind::BuiltIn { f: *f, args }, ty)
        }
        ExprKind::WindowExpr { name, idx } => {
            let decl = env
                .lookup(name)
                .ok_or_else(|| TypeError::Unbound(name.clone()))?
                .clone();
            if !decl.is_tensor() {
                return Err(TypeError::NotTensor(name.clone()));
            }
            if idx.len() != decl.rank() {
                return Err(TypeError::Arity {
                    name: name.clone(),
                    expected: decl.rank(),
                    got: idx.len(),
                });
            }
            let mut dims = vec![];
            let idx = idx
                .iter()
                .map(|w| {
                    Ok(match w {
                        WAccess::Point(p) => {
                            let p = retype_expr(p, env)?;
                            check_indexable(&p)?;
                            WAccess::Point(p)
                        }
                        WAccess::Interval(lo, hi) => {
                            let lo = retype_expr(lo, env)?;
                            let hi = retype_expr(hi, env)?;
                            check_indexable(&lo)?;
                            check_indexable(&hi)?;
                            dims.push(crate::ir::build::sub(hi.clone(), lo.clone()));
                            WAccess::Interval(lo, hi)
                        }
                    })
                })
                .collect::<Result<Vec<_>, TypeError>>()?;
            let ty = LoopType::Tensor {
                elem: Box::new(decl.base().clone()),
                dims,
                is_window: true,
            };
            (
                ExprKind::WindowExpr {
                    name: name.clone(),
                    idx,
                },
                ty,
            )
        }
        ExprKind::StrideExpr { name, dim } => {
            let decl = env
                .lookup(name)
                .ok_or_else(|| TypeError::Unbound(name.clone()))?;
            if !decl.is_tensor() {
                return Err(TypeError::NotTensor(name.clone()));
            }
            (
                ExprKind::StrideExpr {
                    name: name.clone(),
                    dim: *dim,
                },
                LoopType::Stride,
            )
        }
        ExprKind::ReadConfig { config, field } => {
            let ty = config
                .lookup(field)
                .ok_or_else(|| TypeError::NoSuchField {
                    config: config.name().to_string(),
                    field: field.clone(),
                })?
                .clone();
            (
                ExprKind::ReadConfig {
                    config: config.clone(),
                    field: field.clone(),
                },
                ty,
            )
        }
    };
    Ok(Expr {
        data,
        ty,
        srcinfo: e.srcinfo.clone(),
    })
}

fn retype_write(
    name: &Sym,
    idx: &[Expr],
    rhs: &Expr,
    env: &Env,
) -> Result<(LoopType, Vec<Expr>, Expr), TypeError> {
    let decl = env
        .lookup(name)
        .ok_or_else(|| TypeError::Unbound(name.clone()))?
        .clone();
    if idx.len() != decl.rank() {
        return Err(TypeError::Arity {
            name: name.clone(),
            expected: decl.rank(),
            got: idx.len(),
        });
    }
    let idx = idx
        .iter()
        .map(|i| {
            let i = retype_expr(i, env)?;
            check_indexable(&i)?;
            Ok(i)
        })
        .collect::<Result<Vec<_>, TypeError>>()?;
    let rhs = retype_expr(rhs, env)?;
    let elem = decl.base().clone();
    unify(&elem, &rhs.ty)?;
    Ok((elem, idx, rhs))
}

fn retype_block(stmts: &[Stmt], env: &mut Env) -> Result<Vec<Stmt>, TypeError> {
    env.push();
    let result = stmts
        .iter()
        .map(|s| retype_stmt(s, env))
        .collect::<Result<Vec<_>, TypeError>>();
    env.pop();
    result
}

fn retype_stmt(s: &Stmt, env: &mut Env) -> Result<Stmt, TypeError> {
    let data = match &s.data {
        StmtKind::Assign { name, idx, rhs, .. } => {
            let (ty, idx, rhs) = retype_write(name, idx, rhs, env)?;
            StmtKind::Assign {
                name: name.clone(),
                ty,
                idx,
                rhs,
            }
        }
        StmtKind::Reduce { name, idx, rhs, .. } => {
            let (ty, idx, rhs) = retype_write(name, idx, rhs, env)?;
            StmtKind::Reduce {
                name: name.clone(),
                ty,
                idx,
                rhs,
            }
        }
        StmtKind::WriteConfig { config, field, rhs } => {
            let field_ty = config
                .lookup(field)
                .ok_or_else(|| TypeError::NoSuchField {
                    config: config.name().to_string(),
                    field: field.clone(),
                })?
                .clone();
            let rhs = retype_expr(rhs, env)?;
            unify(&field_ty, &rhs.ty)?;
            StmtKind::WriteConfig {
                config: config.clone(),
                field: field.clone(),
                rhs,
            }
        }
        StmtKind::Pass => StmtKind::Pass,
        StmtKind::If { cond, body, orelse } => {
            let cond = retype_expr(cond, env)?;
            if !cond.ty.is_bool() {
                return Err(TypeError::NotBool(cond.ty.clone()));
            }
            StmtKind::If {
                cond,
                body: retype_block(body, env)?,
                orelse: retype_block(orelse, env)?,
            }
        }
        StmtKind::For {
            iter,
            hi,
            body,
            kind,
        } => {
            let hi = retype_expr(hi, env)?;
            check_indexable(&hi)?;
            env.push();
            env.bind(iter, LoopType::Index);
            let body = retype_block(body, env)?;
            env.pop();
            StmtKind::For {
                iter: iter.clone(),
                hi,
                body,
                kind: *kind,
            }
        }
        StmtKind::Alloc { name, ty, mem } => {
            let dims = ty
                .dims()
                .iter()
                .map(|d| {
                    let d = retype_expr(d, env)?;
                    check_indexable(&d)?;
                    Ok(d)
                })
                .collect::<Result<Vec<_>, TypeError>>()?;
            let ty = if dims.is_empty() {
                ty.clone()
            } else {
                ty.with_dims(dims)
            };
            env.bind(name, ty.clone());
            StmtKind::Alloc {
                name: name.clone(),
                ty,
                mem: mem.clone(),
            }
        }
        StmtKind::Free { name, ty, mem } => StmtKind::Free {
            name: name.clone(),
            ty: ty.clone(),
            mem: mem.clone(),
        },
        StmtKind::Call { f, args } => {
            if args.len() != f.args.len() {
                return Err(TypeError::CallArity {
                    callee: f.name.clone(),
                    expected: f.args.len(),
                    got: args.len(),
                });
            }
            let args = args
                .iter()
                .map(|a| retype_expr(a, env))
                .collect::<Result<Vec<_>, TypeError>>()?;
            StmtKind::Call {
                f: f.clone(),
                args,
            }
        }
        StmtKind::WindowStmt { name, rhs } => {
            let rhs = retype_expr(rhs, env)?;
            env.bind(name, rhs.ty.clone());
            StmtKind::WindowStmt {
                name: name.clone(),
                rhs,
            }
        }
    };
    Ok(Stmt {
        data,
        srcinfo: s.srcinfo.clone(),
    })
}

/// Recompute every expression type from declarations and re-validate the
/// shape/type/scope invariants. Returns the retyped procedure.
pub fn retype(proc: &Proc) -> Result<Proc, TypeError> {
    let mut env = Env::new();
    for arg in &proc.args {
        env.bind(&arg.name, arg.ty.clone());
    }
    let preds = proc
        .preds
        .iter()
        .map(|p| {
            let p = retype_expr(p, &env)?;
            if !p.ty.is_bool() {
                return Err(TypeError::NotBool(p.ty.clone()));
            }
            Ok(p)
        })
        .collect::<Result<Vec<_>, TypeError>>()?;
    let body = retype_block(&proc.body, &mut env)?;
    Ok(Proc {
        name: proc.name.clone(),
        args: proc.args.clone(),
        preds,
        body,
        instr: proc.instr.clone(),
        srcinfo: proc.srcinfo.clone(),
    })
}
