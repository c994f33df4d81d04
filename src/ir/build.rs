//! Programmatic IR constructors.
//!
//! The surface-syntax parser is an external collaborator; tests and the
//! rewrites that synthesize statements construct IR through these helpers
//! instead.

use crate::ir::expr::{BinOp, Expr, ExprKind, Value, WAccess};
use crate::ir::stmt::{LoopKind, Stmt, StmtKind};
use crate::ir::sym::Sym;
use crate::ir::types::LoopType;

pub fn int(v: i64) -> Expr {
    Expr::new(ExprKind::Const(Value::Int(v)), LoopType::Index)
}

pub fn float(v: f64) -> Expr {
    Expr::new(ExprKind::Const(Value::Float(v)), LoopType::R)
}

pub fn bool_const(v: bool) -> Expr {
    Expr::new(ExprKind::Const(Value::Bool(v)), LoopType::Bool)
}

/// Bare read of a scalar or control variable.
pub fn read(name: &Sym, ty: LoopType) -> Expr {
    Expr::new(
        ExprKind::Read {
            name: name.clone(),
            idx: vec![],
        },
        ty,
    )
}

/// Fully-indexed read of a buffer element.
pub fn read_idx(name: &Sym, elem: LoopType, idx: Vec<Expr>) -> Expr {
    Expr::new(
        ExprKind::Read {
            name: name.clone(),
            idx,
        },
        elem,
    )
}

pub fn binop(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
    let ty = if op.is_comparison() || op.is_logical() {
        LoopType::Bool
    } else {
        lhs.ty.clone()
    };
    Expr::new(
        ExprKind::BinOp {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        ty,
    )
}

pub fn add(lhs: Expr, rhs: Expr) -> Expr {
    binop(BinOp::Add, lhs, rhs)
}

pub fn sub(lhs: Expr, rhs: Expr) -> Expr {
    binop(BinOp::Sub, lhs, rhs)
}

pub fn mul(lhs: Expr, rhs: Expr) -> Expr {
    binop(BinOp::Mul, lhs, rhs)
}

pub fn div(lhs: Expr, rhs: Expr) -> Expr {
    binop(BinOp::Div, lhs, rhs)
}

pub fn modulo(lhs: Expr, rhs: Expr) -> Expr {
    binop(BinOp::Mod, lhs, rhs)
}

pub fn lt(lhs: Expr, rhs: Expr) -> Expr {
    binop(BinOp::Lt, lhs, rhs)
}

pub fn eq(lhs: Expr, rhs: Expr) -> Expr {
    binop(BinOp::Eq, lhs, rhs)
}

pub fn usub(arg: Expr) -> Expr {
    let ty = arg.ty.clone();
    Expr::new(
        ExprKind::USub { arg: Box::new(arg) },
        ty,
    )
}

pub fn window(name: &Sym, win_ty: LoopType, idx: Vec<WAccess>) -> Expr {
    Expr::new(
        ExprKind::WindowExpr {
            name: name.clone(),
            idx,
        },
        win_ty,
    )
}

pub fn assign(name: &Sym, ty: LoopType, idx: Vec<Expr>, rhs: Expr) -> Stmt {
    Stmt::new(StmtKind::Assign {
        name: name.clone(),
        ty,
        idx,
        rhs,
    })
}

pub fn reduce(name: &Sym, ty: LoopType, idx: Vec<Expr>, rhs: Expr) -> Stmt {
    Stmt::new(StmtKind::Reduce {
        name: name.clone(),
        ty,
        idx,
        rhs,
    })
}

pub fn seq_for(iter: &Sym, hi: Expr, body: Vec<Stmt>) -> Stmt {
    Stmt::new(StmtKind::For {
        iter: iter.clone(),
        hi,
        body,
        kind: LoopKind::Seq,
    })
}

pub fn par_for(iter: &Sym, hi: Expr, body: Vec<Stmt>) -> Stmt {
    Stmt::new(StmtKind::For {
        iter: iter.clone(),
        hi,
        body,
        kind: LoopKind::Par,
    })
}

pub fn if_(cond: Expr, body: Vec<Stmt>, orelse: Vec<Stmt>) -> Stmt {
    Stmt::new(StmtKind::If { cond, body, orelse })
}

pub fn alloc(name: &Sym, ty: LoopType) -> Stmt {
    Stmt::new(StmtKind::Alloc {
        name: name.clone(),
        ty,
        mem: None,
    })
}

pub fn pass() -> Stmt {
    Stmt::new(StmtKind::Pass)
}

pub fn tensor(elem: LoopType, dims: Vec<Expr>) -> LoopType {
    LoopType::Tensor {
        elem: Box::new(elem),
        dims,
        is_window: false,
    }
}
