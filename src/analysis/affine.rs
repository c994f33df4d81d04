//! Affine (integer-linear) forms over IR symbols.

use indexmap::IndexMap;

use crate::ir::expr::{BinOp, Expr, ExprKind, Value};
use crate::ir::sym::Sym;

/// `Σ coeff·sym + konst`. Terms with coefficient zero are never stored.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LinExpr {
    pub terms: IndexMap<Sym, i64>,
    pub konst: i64,
}

impl LinExpr {
    pub fn constant(k: i64) -> LinExpr {
        LinExpr {
            terms: IndexMap::new(),
            konst: k,
        }
    }

    pub fn var(s: &Sym) -> LinExpr {
        let mut terms = IndexMap::new();
        terms.insert(s.clone(), 1);
        LinExpr { terms, konst: 0 }
    }

    pub fn is_constant(&self) -> Option<i64> {
        if self.terms.is_empty() {
            Some(self.konst)
        } else {
            None
        }
    }

    pub fn add(&self, other: &LinExpr) -> LinExpr {
        let mut out = self.clone();
        for (s, c) in &other.terms {
            let e = out.terms.entry(s.clone()).or_insert(0);
            *e += c;
            if *e == 0 {
                out.terms.shift_remove(s);
            }
        }
        out.konst += other.konst;
        out
    }

    pub fn neg(&self) -> LinExpr {
        self.scale(-1)
    }

    pub fn sub(&self, other: &LinExpr) -> LinExpr {
        self.add(&other.neg())
    }

    pub fn scale(&self, k: i64) -> LinExpr {
        if k == 0 {
            return LinExpr::constant(0);
        }
        LinExpr {
            terms: self.terms.iter().map(|(s, c)| (s.clone(), c * k)).collect(),
            konst: self.konst * k,
        }
    }

    pub fn plus(&self, k: i64) -> LinExpr {
        let mut out = self.clone();
        out.konst += k;
        out
    }

    /// Rename a variable (used to duplicate an iteration variable when
    /// comparing two iterations of the same loop).
    pub fn rename(&self, from: &Sym, to: &Sym) -> LinExpr {
        let mut out = LinExpr::constant(self.konst);
        for (s, c) in &self.terms {
            let key = if s == from { to.clone() } else { s.clone() };
            *out.terms.entry(key).or_insert(0) += c;
        }
        out.terms.retain(|_, c| *c != 0);
        out
    }

    pub fn eval(&self, model: &IndexMap<Sym, i64>) -> Option<i64> {
        let mut acc = self.konst;
        for (s, c) in &self.terms {
            acc += c * model.get(s)?;
        }
        Some(acc)
    }
}

/// Convert an IR expression to a linear form; `None` when the expression
/// is not affine (division, modulo, data reads, config reads, ...).
pub fn lin_of_expr(e: &Expr) -> Option<LinExpr> {
    match &e.data {
        ExprKind::Read { name, idx } if idx.is_empty() => Some(LinExpr::var(name)),
        ExprKind::Const(Value::Int(v)) => Some(LinExpr::constant(*v)),
        ExprKind::Const(Value::Bool(_)) | ExprKind::Const(Value::Float(_)) => None,
        ExprKind::USub { arg } => Some(lin_of_expr(arg)?.neg()),
        ExprKind::BinOp { op, lhs, rhs } => {
            let l = lin_of_expr(lhs);
            let r = lin_of_expr(rhs);
            match op {
                BinOp::Add => Some(l?.add(&r?)),
                BinOp::Sub => Some(l?.sub(&r?)),
                BinOp::Mul => {
                    let l = l?;
                    let r = r?;
                    if let Some(k) = l.is_constant() {
                        Some(r.scale(k))
                    } else if let Some(k) = r.is_constant() {
                        Some(l.scale(k))
                    } else {
                        None
                    }
                }
                _ => None,
            }
        }
        _ => None,
    }
}

/// Constraint over linear forms, normalized to `lhs ⋈ 0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinCon {
    /// `lhs <= 0`
    Le(LinExpr),
    /// `lhs == 0`
    Eq(LinExpr),
}

impl LinCon {
    pub fn le(a: &LinExpr, b: &LinExpr) -> LinCon {
        LinCon::Le(a.sub(b))
    }

    /// `a < b`, integer-tightened to `a - b + 1 <= 0`.
    pub fn lt(a: &LinExpr, b: &LinExpr) -> LinCon {
        LinCon::Le(a.sub(b).plus(1))
    }

    pub fn ge(a: &LinExpr, b: &LinExpr) -> LinCon {
        LinCon::Le(b.sub(a))
    }

    pub fn gt(a: &LinExpr, b: &LinExpr) -> LinCon {
        LinCon::Le(b.sub(a).plus(1))
    }

    pub fn eq(a: &LinExpr, b: &LinExpr) -> LinCon {
        LinCon::Eq(a.sub(b))
    }

    pub fn holds(&self, model: &IndexMap<Sym, i64>) -> Option<bool> {
        match self {
            LinCon::Le(l) => Some(l.eval(model)? <= 0),
            LinCon::Eq(l) => Some(l.eval(model)? == 0),
        }
    }
}

/// Linearize a boolean IR expression into conjunct constraints.
/// `None` when the condition is not a conjunction of linear comparisons.
pub fn lin_of_cond(e: &Expr, negated: bool) -> Option<Vec<LinCon>> {
    match &e.data {
        ExprKind::BinOp { op: BinOp::And, lhs, rhs } if !negated => {
            let mut out = lin_of_cond(lhs, false)?;
            out.extend(lin_of_cond(rhs, false)?);
            Some(out)
        }
        ExprKind::BinOp { op: BinOp::Or, lhs, rhs } if negated => {
            // ¬(a ∨ b) = ¬a ∧ ¬b
            let mut out = lin_of_cond(lhs, true)?;
            out.extend(lin_of_cond(rhs, true)?);
            Some(out)
        }
        ExprKind::BinOp { op, lhs, rhs } if op.is_comparison() => {
            let l = lin_of_expr(lhs)?;
            let r = lin_of_expr(rhs)?;
            let con = match (op, negated) {
                (BinOp::Lt, false) | (BinOp::Ge, true) => LinCon::lt(&l, &r),
                (BinOp::Le, false) | (BinOp::Gt, true) => LinCon::le(&l, &r),
                (BinOp::Gt, false) | (BinOp::Le, true) => LinCon::gt(&l, &r),
                (BinOp::Ge, false) | (BinOp::Lt, true) => LinCon::ge(&l, &r),
                (BinOp::Eq, false) => LinCon::eq(&l, &r),
                // a != b is a disjunction; not expressible as a conjunct
                (BinOp::Eq, true) => return None,
                _ => return None,
            };
            Some(vec![con])
        }
        ExprKind::Const(Value::Bool(b)) => {
            if *b != negated {
                Some(vec![])
            } else {
                // contradiction
                Some(vec![LinCon::Le(LinExpr::constant(1))])
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::build::*;
    use crate::ir::sym::SymGen;
    use crate::ir::types::LoopType;

    #[test]
    fn linearizes_affine_arithmetic() {
        let mut r#gen = SymGen::starting_at(1);
        let i = r#gen.fresh("i");
        let j = r#gen.fresh("j");
        // 4*i + j - 2
        let e = sub(
            add(
                mul(int(4), read(&i, LoopType::Index)),
                read(&j, LoopType::Index),
            ),
            int(2),
        );
        let lin = lin_of_expr(&e).unwrap();
        assert_eq!(lin.terms.get(&i), Some(&4));
        assert_eq!(lin.terms.get(&j), Some(&1));
        assert_eq!(lin.konst, -2);
    }

    #[test]
    fn rejects_nonlinear_terms() {
        let mut r#gen = SymGen::starting_at(1);
        let i = r#gen.fresh("i");
        let e = mul(read(&i, LoopType::Index), read(&i, LoopType::Index));
        assert!(lin_of_expr(&e).is_none());
        let e = div(read(&i, LoopType::Index), int(4));
        assert!(lin_of_expr(&e).is_none());
    }
}
