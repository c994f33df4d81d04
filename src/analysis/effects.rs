//! Effect extraction: which buffer locations a region of IR reads, writes
//! and reduces, as index expressions in their enclosing binder context.

use crate::ir::expr::{Expr, ExprKind};
use crate::ir::stmt::{LoopKind, Stmt, StmtKind};
use crate::ir::sym::Sym;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
    Reduce,
}

impl AccessKind {
    /// Two accesses of these kinds to the same location conflict across
    /// parallel iterations. Reduce/Reduce commutes; Read/Read is harmless.
    pub fn conflicts_with(&self, other: AccessKind) -> bool {
        match (self, other) {
            (AccessKind::Read, AccessKind::Read) => false,
            (AccessKind::Reduce, AccessKind::Reduce) => false,
            (AccessKind::Read, AccessKind::Reduce) | (AccessKind::Reduce, AccessKind::Read) => {
                true
            }
            _ => true,
        }
    }

    pub fn is_write_like(&self) -> bool {
        matches!(self, AccessKind::Write | AccessKind::Reduce)
    }
}

/// One binder crossed on the way to an access.
#[derive(Debug, Clone)]
pub enum CtxItem {
    Loop {
        iter: Sym,
        hi: Expr,
        kind: LoopKind,
    },
    /// Condition assumed true on this path.
    Assume(Expr),
    /// Condition assumed false on this path.
    AssumeNot(Expr),
}

/// One access of a buffer, with the binder context it occurs under.
#[derive(Debug, Clone)]
pub struct Access {
    pub buf: Sym,
    pub kind: AccessKind,
    pub idx: Vec<Expr>,
    pub ctx: Vec<CtxItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigAccessKind {
    Read,
    Write,
}

/// An access of configuration state.
#[derive(Debug, Clone)]
pub struct ConfigAccess {
    pub config: String,
    pub field: String,
    pub kind: ConfigAccessKind,
}

#[derive(Debug, Clone, Default)]
pub struct Effects {
    pub accesses: Vec<Access>,
    pub configs: Vec<ConfigAccess>,
}

impl Effects {
    pub fn of_block(stmts: &[Stmt]) -> Effects {
        let mut eff = Effects::default();
        collect_block(stmts, &mut Vec::new(), &mut eff);
        eff
    }

    pub fn of_stmt(s: &Stmt) -> Effects {
        Effects::of_block(std::slice::from_ref(s))
    }

    pub fn accesses_of<'a>(&'a self, buf: &'a Sym) -> impl Iterator<Item = &'a Access> + 'a {
        self.accesses.iter().filter(move |a| &a.buf == buf)
    }

    /// Buffers this region writes or reduces.
    pub fn written_bufs(&self) -> Vec<Sym> {
        let mut out: Vec<Sym> = Vec::new();
        for a in &self.accesses {
            if a.kind.is_write_like() && !out.contains(&a.buf) {
                out.push(a.buf.clone());
            }
        }
        out
    }

    pub fn reads(&self, buf: &Sym) -> bool {
        self.accesses_of(buf).any(|a| a.kind == AccessKind::Read)
    }

    pub fn writes(&self, buf: &Sym) -> bool {
        self.accesses_of(buf).any(|a| a.kind.is_write_like())
    }

    pub fn writes_config(&self) -> bool {
        self.configs
            .iter()
            .any(|c| c.kind == ConfigAccessKind::Write)
    }

    /// True when every effect on `buf` inside this region is a reduce.
    pub fn reduce_only(&self, buf: &Sym) -> bool {
        let mut any = false;
        for a in self.accesses_of(buf) {
            match a.kind {
                AccessKind::Reduce => any = true,
                _ => return false,
            }
        }
        any
    }
}

fn collect_expr_reads(e: &Expr, ctx: &[CtxItem], eff: &mut Effects) {
    e.walk(&mut |e| match &e.data {
        ExprKind::Read { name, idx } => eff.accesses.push(Access {
            buf: name.clone(),
            kind: AccessKind::Read,
            idx: idx.clone(),
            ctx: ctx.to_vec(),
        }),
        ExprKind::WindowExpr { name, idx } => {
            // a window aliases the buffer; record the origin as a read
            eff.accesses.push(Access {
                buf: name.clone(),
                kind: AccessKind::Read,
                idx: idx.iter().map(|w| w.origin().clone()).collect(),
                ctx: ctx.to_vec(),
            })
        }
        ExprKind::ReadConfig { config, field } => eff.configs.push(ConfigAccess {
            config: config.name().to_string(),
            field: field.clone(),
            kind: ConfigAccessKind::Read,
        }),
        _ => {}
    });
}

fn collect_block(stmts: &[Stmt], ctx: &mut Vec<CtxItem>, eff: &mut Effects) {
    for s in stmts {
        match &s.data {
            StmtKind::Assign { name, idx, rhs, .. } => {
                for i in idx {
                    collect_expr_reads(i, ctx, eff);
                }
                collect_expr_reads(rhs, ctx, eff);
                eff.accesses.push(Access {
                    buf: name.clone(),
                    kind: AccessKind::Write,
                    idx: idx.clone(),
                    ctx: ctx.clone(),
                });
            }
            StmtKind::Reduce { name, idx, rhs, .. } => {
                for i in idx {
                    collect_expr_reads(i, ctx, eff);
                }
                collect_expr_reads(rhs, ctx, eff);
                eff.accesses.push(Access {
                    buf: name.clone(),
                    kind: AccessKind::Reduce,
                    idx: idx.clone(),
                    ctx: ctx.clone(),
                });
            }
            StmtKind::WriteConfig { config, field, rhs } => {
                collect_expr_reads(rhs, ctx, eff);
                eff.configs.push(ConfigAccess {
                    config: config.name().to_string(),
                    field: field.clone(),
                    kind: ConfigAccessKind::Write,
                });
            }
            StmtKind::Pass | StmtKind::Alloc { .. } | StmtKind::Free { .. } => {}
            StmtKind::If { cond, body, orelse } => {
                collect_expr_reads(cond, ctx, eff);
                ctx.push(CtxItem::Assume(cond.clone()));
                collect_block(body, ctx, eff);
                ctx.pop();
                if !orelse.is_empty() {
                    ctx.push(CtxItem::AssumeNot(cond.clone()));
                    collect_block(orelse, ctx, eff);
                    ctx.pop();
                }
            }
            StmtKind::For {
                iter,
                hi,
                body,
                kind,
            } => {
                collect_expr_reads(hi, ctx, eff);
                ctx.push(CtxItem::Loop {
                    iter: iter.clone(),
                    hi: hi.clone(),
                    kind: *kind,
                });
                collect_block(body, ctx, eff);
                ctx.pop();
            }
            StmtKind::Call { f, args } => {
                // without interprocedural analysis a call both reads and
                // writes every buffer argument
                for (arg, decl) in args.iter().zip(&f.args) {
                    collect_expr_reads(arg, ctx, eff);
                    if decl.ty.is_tensor() {
                        if let ExprKind::Read { name, .. } | ExprKind::WindowExpr { name, .. } =
                            &arg.data
                        {
                            eff.accesses.push(Access {
                                buf: name.clone(),
                                kind: AccessKind::Write,
                                idx: vec![],
                                ctx: ctx.clone(),
                            });
                        }
                    }
                }
            }
            StmtKind::WindowStmt { name, rhs } => {
                collect_expr_reads(rhs, ctx, eff);
                // the window name itself is not an access until used
                let _ = name;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::build::*;
    use crate::ir::sym::SymGen;
    use crate::ir::types::LoopType;

    #[test]
    fn classifies_reads_writes_reduces() {
        let mut r#gen = SymGen::starting_at(1);
        let i = r#gen.fresh("i");
        let x = r#gen.fresh("x");
        let y = r#gen.fresh("y");
        let block = vec![seq_for(
            &i,
            int(4),
            vec![reduce(
                &x,
                LoopType::R,
                vec![read(&i, LoopType::Index)],
                read_idx(&y, LoopType::R, vec![read(&i, LoopType::Index)]),
            )],
        )];
        let eff = Effects::of_block(&block);
        assert!(eff.reduce_only(&x));
        assert!(eff.reads(&y));
        assert!(!eff.writes(&y));
        let acc = eff.accesses_of(&x).next().unwrap();
        assert_eq!(acc.ctx.len(), 1);
    }
}
