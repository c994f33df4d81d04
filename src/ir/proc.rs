use crate::ir::expr::{Expr, ExprKind};
use crate::ir::srcinfo::SrcInfo;
use crate::ir::stmt::{Stmt, StmtKind};
use crate::ir::sym::Sym;
use crate::ir::types::LoopType;
use crate::memory::Memory;

#[derive(Debug, Clone, PartialEq)]
pub struct ProcArg {
    pub name: Sym,
    pub ty: LoopType,
    pub mem: Option<Memory>,
    pub srcinfo: SrcInfo,
}

/// A top-level procedure: name, arguments, entry predicates, body.
///
/// `instr` is opaque instruction-format metadata attached by `make_instr`;
/// the engine carries it through rewrites without inspecting it.
#[derive(Debug, Clone, PartialEq)]
pub struct Proc {
    pub name: String,
    pub args: Vec<ProcArg>,
    pub preds: Vec<Expr>,
    pub body: Vec<Stmt>,
    pub instr: Option<String>,
    pub srcinfo: SrcInfo,
}

impl Proc {
    /// Pre-order traversal over every statement in the body.
    pub fn walk_stmts(&self, f: &mut impl FnMut(&Stmt)) {
        for s in &self.body {
            s.walk(f);
        }
    }

    /// Visit every symbol occurrence in the procedure (argument names,
    /// binders, reads, writes, and symbols inside types).
    pub fn walk_syms(&self, f: &mut impl FnMut(&Sym)) {
        fn expr_syms(e: &Expr, f: &mut impl FnMut(&Sym)) {
            e.walk(&mut |e| match &e.data {
                ExprKind::Read { name, .. }
                | ExprKind::WindowExpr { name, .. }
                | ExprKind::StrideExpr { name, .. } => f(name),
                _ => {}
            });
        }
        for arg in &self.args {
            f(&arg.name);
            for d in arg.ty.dims() {
                expr_syms(d, f);
            }
        }
        for p in &self.preds {
            expr_syms(p, f);
        }
        self.walk_stmts(&mut |s| {
            match &s.data {
                StmtKind::Assign { name, .. }
                | StmtKind::Reduce { name, .. }
                | StmtKind::Alloc { name, .. }
                | StmtKind::Free { name, .. }
                | StmtKind::WindowStmt { name, .. } => f(name),
                StmtKind::For { iter, .. } => f(iter),
                _ => {}
            }
            s.own_exprs(&mut |e| expr_syms(e, f));
        });
    }

    /// Find the declared type of `name`: an argument, or an `Alloc` /
    /// `WindowStmt` / loop binder anywhere in the body.
    pub fn decl_type(&self, name: &Sym) -> Option<LoopType> {
        for arg in &self.args {
            if &arg.name == name {
                return Some(arg.ty.clone());
            }
        }
        let mut found = None;
        self.walk_stmts(&mut |s| match &s.data {
            StmtKind::Alloc { name: n, ty, .. } if n == name => found = Some(ty.clone()),
            StmtKind::WindowStmt { name: n, rhs } if n == name => found = Some(rhs.ty.clone()),
            StmtKind::For { iter, .. } if iter == name => found = Some(LoopType::Index),
            _ => {}
        });
        found
    }

    /// Declared memory space of a buffer (argument or allocation).
    pub fn decl_mem(&self, name: &Sym) -> Option<Memory> {
        for arg in &self.args {
            if &arg.name == name {
                return arg.mem.clone();
            }
        }
        let mut found = None;
        self.walk_stmts(&mut |s| {
            if let StmtKind::Alloc { name: n, mem, .. } = &s.data
                && n == name
            {
                found = mem.clone();
            }
        });
        found
    }
}
