//! Capture-free substitution over IR trees.

use indexmap::IndexMap;

use crate::ir::expr::{Expr, ExprKind};
use crate::ir::stmt::{map_own_exprs, Stmt, StmtKind};
use crate::ir::sym::Sym;

/// A substitution: control symbols to expressions (bare reads only), and
/// buffer symbols to buffer symbols.
#[derive(Debug, Clone, Default)]
pub struct Subst {
    pub exprs: IndexMap<Sym, Expr>,
    pub bufs: IndexMap<Sym, Sym>,
}

impl Subst {
    pub fn one(sym: &Sym, e: Expr) -> Subst {
        let mut s = Subst::default();
        s.exprs.insert(sym.clone(), e);
        s
    }

    pub fn rename_buf(old: &Sym, new: &Sym) -> Subst {
        let mut s = Subst::default();
        s.bufs.insert(old.clone(), new.clone());
        s
    }

    fn buf(&self, name: &Sym) -> Sym {
        self.bufs.get(name).cloned().unwrap_or_else(|| name.clone())
    }

    pub fn apply_expr(&self, e: &Expr) -> Expr {
        e.map(&|e| match &e.data {
            ExprKind::Read { name, idx } => {
                if idx.is_empty()
                    && let Some(repl) = self.exprs.get(name)
                {
                    return repl.clone().with_srcinfo(e.srcinfo.clone());
                }
                Expr {
                    data: ExprKind::Read {
                        name: self.buf(name),
                        idx: idx.clone(),
                    },
                    ty: e.ty.clone(),
                    srcinfo: e.srcinfo.clone(),
                }
            }
            ExprKind::WindowExpr { name, idx } => Expr {
                data: ExprKind::WindowExpr {
                    name: self.buf(name),
                    idx: idx.clone(),
                },
                ty: e.ty.clone(),
                srcinfo: e.srcinfo.clone(),
            },
            ExprKind::StrideExpr { name, dim } => Expr {
                data: ExprKind::StrideExpr {
                    name: self.buf(name),
                    dim: *dim,
                },
                ty: e.ty.clone(),
                srcinfo: e.srcinfo.clone(),
            },
            _ => e,
        })
    }

    pub fn apply_stmt(&self, s: &Stmt) -> Stmt {
        let s = map_own_exprs(s, &|e| self.apply_expr(e));
        let data = match s.data {
            StmtKind::Assign { name, ty, idx, rhs } => StmtKind::Assign {
                name: self.buf(&name),
                ty,
                idx,
                rhs,
            },
            StmtKind::Reduce { name, ty, idx, rhs } => StmtKind::Reduce {
                name: self.buf(&name),
                ty,
                idx,
                rhs,
            },
            StmtKind::If { cond, body, orelse } => StmtKind::If {
                cond,
                body: self.apply_block(&body),
                orelse: self.apply_block(&orelse),
            },
            StmtKind::For {
                iter,
                hi,
                body,
                kind,
            } => StmtKind::For {
                iter,
                hi,
                body: self.apply_block(&body),
                kind,
            },
            StmtKind::WindowStmt { name, rhs } => StmtKind::WindowStmt {
                name: self.buf(&name),
                rhs,
            },
            other => other,
        };
        Stmt {
            data,
            srcinfo: s.srcinfo,
        }
    }

    pub fn apply_block(&self, stmts: &[Stmt]) -> Vec<Stmt> {
        stmts.iter().map(|s| self.apply_stmt(s)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::build::*;
    use crate::ir::sym::SymGen;
    use crate::ir::types::LoopType;

    #[test]
    fn iterator_substitution_reaches_nested_bodies() {
        let mut r#gen = SymGen::starting_at(1);
        let i = r#gen.fresh("i");
        let j = r#gen.fresh("j");
        let x = r#gen.fresh("x");
        let body = seq_for(
            &j,
            int(4),
            vec![assign(
                &x,
                LoopType::R,
                vec![add(read(&i, LoopType::Index), read(&j, LoopType::Index))],
                float(0.0),
            )],
        );
        let sub = Subst::one(&i, int(7));
        let out = sub.apply_stmt(&body);
        assert!(!out.uses_sym(&i));
    }

    #[test]
    fn buffer_rename_hits_writes_and_reads() {
        let mut r#gen = SymGen::starting_at(1);
        let x = r#gen.fresh("x");
        let y = r#gen.fresh("y");
        let s = assign(&x, LoopType::R, vec![], read_idx(&x, LoopType::R, vec![int(0)]));
        let out = Subst::rename_buf(&x, &y).apply_stmt(&s);
        assert!(!out.uses_sym(&x));
        assert!(out.uses_sym(&y));
    }
}
