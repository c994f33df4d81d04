use std::rc::Rc;

use crate::config::Config;
use crate::ir::expr::Expr;
use crate::ir::proc::Proc;
use crate::ir::srcinfo::SrcInfo;
use crate::ir::sym::Sym;
use crate::ir::types::LoopType;
use crate::memory::Memory;

/// Iteration regime of a loop in the *scheduled program* (not the
/// scheduler, which is single-threaded).
///
/// `Seq` iterates in total order; `Par` is unordered parallel iteration
/// whose write-disjointness every rewrite must re-establish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    Seq,
    Par,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Assign {
        name: Sym,
        ty: LoopType,
        idx: Vec<Expr>,
        rhs: Expr,
    },
    Reduce {
        name: Sym,
        ty: LoopType,
        idx: Vec<Expr>,
        rhs: Expr,
    },
    WriteConfig {
        config: Rc<Config>,
        field: String,
        rhs: Expr,
    },
    Pass,
    If {
        cond: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    /// `for iter in seq(0, hi)`: closed-open, `kind` selects Seq/Par.
    For {
        iter: Sym,
        hi: Expr,
        body: Vec<Stmt>,
        kind: LoopKind,
    },
    Alloc {
        name: Sym,
        ty: LoopType,
        mem: Option<Memory>,
    },
    Free {
        name: Sym,
        ty: LoopType,
        mem: Option<Memory>,
    },
    Call {
        f: Rc<Proc>,
        args: Vec<Expr>,
    },
    WindowStmt {
        name: Sym,
        rhs: Expr,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub data: StmtKind,
    pub srcinfo: SrcInfo,
}

impl Stmt {
    pub fn new(data: StmtKind) -> Self {
        Stmt {
            data,
            srcinfo: SrcInfo::default(),
        }
    }

    pub fn with_srcinfo(mut self, srcinfo: SrcInfo) -> Self {
        self.srcinfo = srcinfo;
        self
    }

    pub fn is_pass(&self) -> bool {
        matches!(self.data, StmtKind::Pass)
    }

    /// Child statement lists: `(body, orelse)`. Leaf statements return two
    /// empty slices.
    pub fn child_blocks(&self) -> (&[Stmt], &[Stmt]) {
        match &self.data {
            StmtKind::If { body, orelse, .. } => (body, orelse),
            StmtKind::For { body, .. } => (body, &[]),
            _ => (&[], &[]),
        }
    }

    /// Pre-order traversal over this statement and everything below it.
    pub fn walk(&self, f: &mut impl FnMut(&Stmt)) {
        f(self);
        let (body, orelse) = self.child_blocks();
        for s in body.iter().chain(orelse) {
            s.walk(f);
        }
    }

    /// Visit every expression directly contained in this statement (not in
    /// child statements).
    pub fn own_exprs(&self, f: &mut impl FnMut(&Expr)) {
        match &self.data {
            StmtKind::Assign { idx, rhs, .. } | StmtKind::Reduce { idx, rhs, .. } => {
                idx.iter().for_each(|e| f(e));
                f(rhs);
            }
            StmtKind::WriteConfig { rhs, .. } => f(rhs),
            StmtKind::If { cond, .. } => f(cond),
            StmtKind::For { hi, .. } => f(hi),
            StmtKind::Call { args, .. } => args.iter().for_each(|e| f(e)),
            StmtKind::WindowStmt { rhs, .. } => f(rhs),
            StmtKind::Alloc { ty, .. } | StmtKind::Free { ty, .. } => {
                ty.dims().iter().for_each(|e| f(e))
            }
            StmtKind::Pass => {}
        }
    }

    /// True if `sym` occurs (read, written, or declared) in this subtree.
    pub fn uses_sym(&self, sym: &Sym) -> bool {
        let mut found = false;
        self.walk(&mut |s| {
            match &s.data {
                StmtKind::Assign { name, .. }
                | StmtKind::Reduce { name, .. }
                | StmtKind::Alloc { name, .. }
                | StmtKind::Free { name, .. }
                | StmtKind::WindowStmt { name, .. }
                    if name == sym =>
                {
                    found = true
                }
                StmtKind::For { iter, .. } if iter == sym => found = true,
                _ => {}
            }
            s.own_exprs(&mut |e| {
                if e.reads_sym(sym) {
                    found = true;
                }
            });
        });
        found
    }
}

/// Rebuild a statement with every directly-contained expression passed
/// through `f` (child statements untouched).
pub fn map_own_exprs(stmt: &Stmt, f: &impl Fn(&Expr) -> Expr) -> Stmt {
    let data = match &stmt.data {
        StmtKind::Assign { name, ty, idx, rhs } => StmtKind::Assign {
            name: name.clone(),
            ty: ty.clone(),
            idx: idx.iter().map(f).collect(),
            rhs: f(rhs),
        },
        StmtKind::Reduce { name, ty, idx, rhs } => StmtKind::Reduce {
            name: name.clone(),
            ty: ty.clone(),
            idx: idx.iter().map(f).collect(),
            rhs: f(rhs),
        },
        StmtKind::WriteConfig { config, field, rhs } => StmtKind::WriteConfig {
            config: config.clone(),
            field: field.clone(),
            rhs: f(rhs),
        },
        StmtKind::If { cond, body, orelse } => StmtKind::If {
            cond: f(cond),
            body: body.clone(),
            orelse: orelse.clone(),
        },
        StmtKind::For {
            iter,
            hi,
            body,
            kind,
        } => StmtKind::For {
            iter: iter.clone(),
            hi: f(hi),
            body: body.clone(),
            kind: *kind,
        },
        StmtKind::Call { f: callee, args } => StmtKind::Call {
            f: callee.clone(),
            args: args.iter().map(f).collect(),
        },
        StmtKind::WindowStmt { name, rhs } => StmtKind::WindowStmt {
            name: name.clone(),
            rhs: f(rhs),
        },
        StmtKind::Alloc { name, ty, mem } => StmtKind::Alloc {
            name: name.clone(),
            ty: ty.with_dims(ty.dims().iter().map(f).collect()),
            mem: mem.clone(),
        },
        StmtKind::Free { name, ty, mem } => StmtKind::Free {
            name: name.clone(),
            ty: ty.with_dims(ty.dims().iter().map(f).collect()),
            mem: mem.clone(),
        },
        StmtKind::Pass => StmtKind::Pass,
    };
    Stmt {
        data,
        srcinfo: stmt.srcinfo.clone(),
    }
}
