//! Cursor paths: position-stable references into an IR tree.
//!
//! A cursor names a position as a path of edges from the procedure root.
//! Positions come in four kinds: a single node (statement or expression),
//! a contiguous non-empty block of sibling statements `[lo, hi)`, a gap
//! between statements, and a read-only span of sibling expressions.
//!
//! Paths never hold references into the tree; they are resolved on demand
//! against whatever procedure version they are lifted to (see
//! [`forward`]).

pub mod forward;

pub use forward::{ForwardingMap, Splice};

use thiserror::Error;

use crate::ir::expr::{Expr, ExprKind, WAccess};
use crate::ir::proc::Proc;
use crate::ir::stmt::{Stmt, StmtKind};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CursorError {
    #[error("cursor was invalidated by a rewrite")]
    Invalidated,
    #[error("cursor does not point into this procedure")]
    ForeignProc,
    #[error("cursor navigation went out of bounds")]
    OutOfBounds,
    #[error("cursor has no {0}")]
    NoSuch(&'static str),
    #[error("cursor path no longer resolves")]
    Unresolvable,
}

/// One step from a node to a child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Edge {
    /// `i`-th statement of the node's primary block (loop/if body, or the
    /// procedure body when the path is empty so far).
    Body(usize),
    /// `i`-th statement of an `if`'s else-block.
    Orelse(usize),
    Cond,
    Hi,
    Rhs,
    /// `i`-th buffer index of an assign/reduce/read.
    Idx(usize),
    /// `i`-th argument: call or builtin args; binop lhs/rhs are 0/1; the
    /// operand of unary minus is 0.
    Arg(usize),
    WinPt(usize),
    WinLo(usize),
    WinHi(usize),
}

impl Edge {
    pub fn block_index(&self) -> Option<(BlockKind, usize)> {
        match self {
            Edge::Body(i) => Some((BlockKind::Body, *i)),
            Edge::Orelse(i) => Some((BlockKind::Orelse, *i)),
            _ => None,
        }
    }
}

/// Which statement list of a parent node a block/gap lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    Body,
    Orelse,
}

impl BlockKind {
    pub fn edge(&self, i: usize) -> Edge {
        match self {
            BlockKind::Body => Edge::Body(i),
            BlockKind::Orelse => Edge::Orelse(i),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct CursorPath(pub Vec<Edge>);

impl CursorPath {
    pub fn root() -> Self {
        CursorPath(Vec::new())
    }

    pub fn child(&self, e: Edge) -> CursorPath {
        let mut p = self.0.clone();
        p.push(e);
        CursorPath(p)
    }

    pub fn parent(&self) -> Option<(CursorPath, Edge)> {
        let mut p = self.0.clone();
        let last = p.pop()?;
        Some((CursorPath(p), last))
    }

    pub fn starts_with(&self, prefix: &CursorPath) -> bool {
        self.0.len() >= prefix.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
    }

    /// True when every edge is a statement-list edge, i.e. the path names
    /// a statement rather than an expression.
    pub fn is_stmt_path(&self) -> bool {
        !self.0.is_empty() && self.0.iter().all(|e| e.block_index().is_some())
    }
}

/// A cursor position within a procedure.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CursorLoc {
    Node(CursorPath),
    Block {
        parent: CursorPath,
        kind: BlockKind,
        lo: usize,
        hi: usize,
    },
    Gap {
        parent: CursorPath,
        kind: BlockKind,
        at: usize,
    },
    Args {
        parent: CursorPath,
    },
}

#[derive(Debug, Clone, Copy)]
pub enum NodeRef<'a> {
    Stmt(&'a Stmt),
    Expr(&'a Expr),
}

fn stmt_child<'a>(s: &'a Stmt, e: Edge) -> Option<NodeRef<'a>> {
    match (&s.data, e) {
        (_, Edge::Body(i)) => s.child_blocks().0.get(i).map(NodeRef::Stmt),
        (_, Edge::Orelse(i)) => s.child_blocks().1.get(i).map(NodeRef::Stmt),
        (StmtKind::If { cond, .. }, Edge::Cond) => Some(NodeRef::Expr(cond)),
        (StmtKind::For { hi, .. }, Edge::Hi) => Some(NodeRef::Expr(hi)),
        (StmtKind::Assign { rhs, .. }, Edge::Rhs)
        | (StmtKind::Reduce { rhs, .. }, Edge::Rhs)
        | (StmtKind::WriteConfig { rhs, .. }, Edge::Rhs)
        | (StmtKind::WindowStmt { rhs, .. }, Edge::Rhs) => Some(NodeRef::Expr(rhs)),
        (StmtKind::Assign { idx, .. }, Edge::Idx(i))
        | (StmtKind::Reduce { idx, .. }, Edge::Idx(i)) => idx.get(i).map(NodeRef::Expr),
        (StmtKind::Call { args, .. }, Edge::Arg(i)) => args.get(i).map(NodeRef::Expr),
        _ => None,
    }
}

fn expr_child<'a>(e: &'a Expr, edge: Edge) -> Option<NodeRef<'a>> {
    match (&e.data, edge) {
        (ExprKind::Read { idx, .. }, Edge::Idx(i)) => idx.get(i).map(NodeRef::Expr),
        (ExprKind::USub { arg }, Edge::Arg(0)) => Some(NodeRef::Expr(arg)),
        (ExprKind::BinOp { lhs, .. }, Edge::Arg(0)) => Some(NodeRef::Expr(lhs)),
        (ExprKind::BinOp { rhs, .. }, Edge::Arg(1)) => Some(NodeRef::Expr(rhs)),
        (ExprKind::BuiltIn { args, .. }, Edge::Arg(i)) => args.get(i).map(NodeRef::Expr),
        (ExprKind::WindowExpr { idx, .. }, Edge::WinPt(i)) => match idx.get(i) {
            Some(WAccess::Point(p)) => Some(NodeRef::Expr(p)),
            _ => None,
        },
        (ExprKind::WindowExpr { idx, .. }, Edge::WinLo(i)) => match idx.get(i) {
            Some(WAccess::Interval(lo, _)) => Some(NodeRef::Expr(lo)),
            _ => None,
        },
        (ExprKind::WindowExpr { idx, .. }, Edge::WinHi(i)) => match idx.get(i) {
            Some(WAccess::Interval(_, hi)) => Some(NodeRef::Expr(hi)),
            _ => None,
        },
        _ => None,
    }
}

/// Resolve a path to the node it names, if it still exists.
pub fn resolve<'a>(proc: &'a Proc, path: &CursorPath) -> Option<NodeRef<'a>> {
    let mut edges = path.0.iter();
    let first = edges.next()?;
    let mut node = match first {
        Edge::Body(i) => NodeRef::Stmt(proc.body.get(*i)?),
        _ => return None,
    };
    for e in edges {
        node = match node {
            NodeRef::Stmt(s) => stmt_child(s, *e)?,
            NodeRef::Expr(x) => expr_child(x, *e)?,
        };
    }
    Some(node)
}

pub fn resolve_stmt<'a>(proc: &'a Proc, path: &CursorPath) -> Option<&'a Stmt> {
    match resolve(proc, path)? {
        NodeRef::Stmt(s) => Some(s),
        NodeRef::Expr(_) => None,
    }
}

pub fn resolve_expr<'a>(proc: &'a Proc, path: &CursorPath) -> Option<&'a Expr> {
    match resolve(proc, path)? {
        NodeRef::Expr(e) => Some(e),
        NodeRef::Stmt(_) => None,
    }
}

/// The statement list a block/gap lives in.
pub fn resolve_stmt_list<'a>(
    proc: &'a Proc,
    parent: &CursorPath,
    kind: BlockKind,
) -> Option<&'a [Stmt]> {
    if parent.0.is_empty() {
        return match kind {
            BlockKind::Body => Some(&proc.body),
            BlockKind::Orelse => None,
        };
    }
    let s = resolve_stmt(proc, parent)?;
    let (body, orelse) = s.child_blocks();
    match kind {
        BlockKind::Body => {
            if matches!(s.data, StmtKind::If { .. } | StmtKind::For { .. }) {
                Some(body)
            } else {
                None
            }
        }
        BlockKind::Orelse => {
            if matches!(s.data, StmtKind::If { .. }) {
                Some(orelse)
            } else {
                None
            }
        }
    }
}

// ------------------------------------------------------------------ //
// Functional editing

/// Replace the statement list `(parent, kind)` region `[lo, hi)` with
/// `replacement`, rebuilding the spine of the tree. Returns the new
/// procedure; `None` if the path does not resolve.
pub fn splice_stmts(
    proc: &Proc,
    parent: &CursorPath,
    kind: BlockKind,
    lo: usize,
    hi: usize,
    replacement: Vec<Stmt>,
) -> Option<Proc> {
    fn splice(list: &[Stmt], lo: usize, hi: usize, repl: Vec<Stmt>) -> Option<Vec<Stmt>> {
        if lo > hi || hi > list.len() {
            return None;
        }
        let mut out = Vec::with_capacity(list.len() - (hi - lo) + repl.len());
        out.extend_from_slice(&list[..lo]);
        out.extend(repl);
        out.extend_from_slice(&list[hi..]);
        Some(out)
    }

    fn go(
        list: &[Stmt],
        edges: &[Edge],
        kind: BlockKind,
        lo: usize,
        hi: usize,
        repl: Vec<Stmt>,
    ) -> Option<Vec<Stmt>> {
        let Some((first, rest)) = edges.split_first() else {
            return match kind {
                BlockKind::Body => splice(list, lo, hi, repl),
                BlockKind::Orelse => None,
            };
        };
        let (_, i) = first.block_index()?;
        let target = list.get(i)?;
        let rebuilt = rebuild_with(target, rest, kind, lo, hi, repl)?;
        let mut out = list.to_vec();
        out[i] = rebuilt;
        Some(out)
    }

    fn rebuild_with(
        s: &Stmt,
        edges: &[Edge],
        kind: BlockKind,
        lo: usize,
        hi: usize,
        repl: Vec<Stmt>,
    ) -> Option<Stmt> {
        let data = match &s.data {
            StmtKind::If { cond, body, orelse } => {
                if edges.is_empty() {
                    match kind {
                        BlockKind::Body => StmtKind::If {
                            cond: cond.clone(),
                            body: {
                                let mut out = body.to_vec();
                                if lo > hi || hi > out.len() {
                                    return None;
                                }
                                out.splice(lo..hi, repl);
                                out
                            },
                            orelse: orelse.clone(),
                        },
                        BlockKind::Orelse => StmtKind::If {
                            cond: cond.clone(),
                            body: body.clone(),
                            orelse: {
                                let mut out = orelse.to_vec();
                                if lo > hi || hi > out.len() {
                                    return None;
                                }
                                out.splice(lo..hi, repl);
                                out
                            },
                        },
                    }
                } else {
                    let (k, i) = edges[0].block_index()?;
                    match k {
                        BlockKind::Body => {
                            let mut nb = body.to_vec();
                            nb[i] = rebuild_with(body.get(i)?, &edges[1..], kind, lo, hi, repl)?;
                            StmtKind::If {
                                cond: cond.clone(),
                                body: nb,
                                orelse: orelse.clone(),
                            }
                        }
                        BlockKind::Orelse => {
                            let mut no = orelse.to_vec();
                            no[i] = rebuild_with(orelse.get(i)?, &edges[1..], kind, lo, hi, repl)?;
                            StmtKind::If {
                                cond: cond.clone(),
                                body: body.clone(),
                                orelse: no,
                            }
                        }
                    }
                }
            }
            StmtKind::For {
                iter,
                hi: bound,
                body,
                kind: lk,
            } => {
                if edges.is_empty() {
                    if kind != BlockKind::Body {
                        return None;
                    }
                    let mut out = body.to_vec();
                    if lo > hi || hi > out.len() {
                        return None;
                    }
                    out.splice(lo..hi, repl);
                    StmtKind::For {
                        iter: iter.clone(),
                        hi: bound.clone(),
                        body: out,
                        kind: *lk,
                    }
                } else {
                    let (k, i) = edges[0].block_index()?;
                    if k != BlockKind::Body {
                        return None;
                    }
                    let mut nb = body.to_vec();
                    nb[i] = rebuild_with(body.get(i)?, &edges[1..], kind, lo, hi, repl)?;
                    StmtKind::For {
                        iter: iter.clone(),
                        hi: bound.clone(),
                        body: nb,
                        kind: *lk,
                    }
                }
            }
            _ => return None,
        };
        Some(Stmt {
            data,
            srcinfo: s.srcinfo.clone(),
        })
    }

    let body = go(&proc.body, &parent.0, kind, lo, hi, replacement)?;
    Some(Proc {
        body,
        ..proc.clone()
    })
}

/// Replace the single statement at `path` with `replacement` statements.
pub fn replace_stmt(proc: &Proc, path: &CursorPath, replacement: Vec<Stmt>) -> Option<Proc> {
    let (parent, last) = path.parent()?;
    let (kind, i) = last.block_index()?;
    splice_stmts(proc, &parent, kind, i, i + 1, replacement)
}

/// Rebuild the expression at `path` through `f`.
pub fn update_expr(proc: &Proc, path: &CursorPath, f: impl FnOnce(&Expr) -> Expr) -> Option<Proc> {
    // split the path into its statement spine and the expression tail
    let stmt_len = path
        .0
        .iter()
        .take_while(|e| e.block_index().is_some())
        .count();
    if stmt_len == 0 {
        return None;
    }
    let stmt_path = CursorPath(path.0[..stmt_len].to_vec());
    let expr_edges = &path.0[stmt_len..];
    if expr_edges.is_empty() {
        return None;
    }
    let stmt = resolve_stmt(proc, &stmt_path)?;
    let new_stmt = rebuild_stmt_expr(stmt, expr_edges, f)?;
    replace_stmt(proc, &stmt_path, vec![new_stmt])
}

fn rebuild_expr_at(e: &Expr, edges: &[Edge], f: impl FnOnce(&Expr) -> Expr) -> Option<Expr> {
    let Some((first, rest)) = edges.split_first() else {
        return Some(f(e));
    };
    let data = match (&e.data, *first) {
        (ExprKind::Read { name, idx }, Edge::Idx(i)) => {
            let mut idx = idx.clone();
            let slot = idx.get(i)?;
            idx[i] = rebuild_expr_at(slot, rest, f)?;
            ExprKind::Read {
                name: name.clone(),
                idx,
            }
        }
        (ExprKind::USub { arg }, Edge::Arg(0)) => ExprKind::USub {
            arg: Box::new(rebuild_expr_at(arg, rest, f)?),
        },
        (ExprKind::BinOp { op, lhs, rhs }, Edge::Arg(0)) => ExprKind::BinOp {
            op: *op,
            lhs: Box::new(rebuild_expr_at(lhs, rest, f)?),
            rhs: rhs.clone(),
        },
        (ExprKind::BinOp { op, lhs, rhs }, Edge::Arg(1)) => ExprKind::BinOp {
            op: *op,
            lhs: lhs.clone(),
            rhs: Box::new(rebuild_expr_at(rhs, rest, f)?),
        },
        (ExprKind::BuiltIn { f: bf, args }, Edge::Arg(i)) => {
            let mut args = args.clone();
            let slot = args.get(i)?;
            args[i] = rebuild_expr_at(slot, rest, f)?;
            ExprKind::BuiltIn { f: *bf, args }
        }
        (ExprKind::WindowExpr { name, idx }, Edge::WinPt(i)) => {
            let mut idx = idx.clone();
            match idx.get(i)? {
                WAccess::Point(p) => idx[i] = WAccess::Point(rebuild_expr_at(p, rest, f)?),
                _ => return None,
            }
            ExprKind::WindowExpr {
                name: name.clone(),
                idx,
            }
        }
        (ExprKind::WindowExpr { name, idx }, Edge::WinLo(i)) => {
            let mut idx = idx.clone();
            match idx.get(i)? {
                WAccess::Interval(lo, hi) => {
                    idx[i] = WAccess::Interval(rebuild_expr_at(lo, rest, f)?, hi.clone())
                }
                _ => return None,
            }
            ExprKind::WindowExpr {
                name: name.clone(),
                idx,
            }
        }
        (ExprKind::WindowExpr { name, idx }, Edge::WinHi(i)) => {
            let mut idx = idx.clone();
            match idx.get(i)? {
                WAccess::Interval(lo, hi) => {
                    idx[i] = WAccess::Interval(lo.clone(), rebuild_expr_at(hi, rest, f)?)
                }
                _ => return None,
            }
            ExprKind::WindowExpr {
                name: name.clone(),
                idx,
            }
        }
        _ => return None,
    };
    Some(Expr {
        data,
        ty: e.ty.clone(),
        srcinfo: e.srcinfo.clone(),
    })
}

fn rebuild_stmt_expr(
    s: &Stmt,
    edges: &[Edge],
    f: impl FnOnce(&Expr) -> Expr,
) -> Option<Stmt> {
    let (first, rest) = edges.split_first()?;
    let data = match (&s.data, *first) {
        (StmtKind::Assign { name, ty, idx, rhs }, Edge::Rhs) => StmtKind::Assign {
            name: name.clone(),
            ty: ty.clone(),
            idx: idx.clone(),
            rhs: rebuild_expr_at(rhs, rest, f)?,
        },
        (StmtKind::Reduce { name, ty, idx, rhs }, Edge::Rhs) => StmtKind::Reduce {
            name: name.clone(),
            ty: ty.clone(),
            idx: idx.clone(),
            rhs: rebuild_expr_at(rhs, rest, f)?,
        },
        (StmtKind::Assign { name, ty, idx, rhs }, Edge::Idx(i)) => {
            let mut idx = idx.clone();
            let slot = idx.get(i)?;
            idx[i] = rebuild_expr_at(slot, rest, f)?;
            StmtKind::Assign {
                name: name.clone(),
                ty: ty.clone(),
                idx,
                rhs: rhs.clone(),
            }
        }
        (StmtKind::Reduce { name, ty, idx, rhs }, Edge::Idx(i)) => {
            let mut idx = idx.clone();
            let slot = idx.get(i)?;
            idx[i] = rebuild_expr_at(slot, rest, f)?;
            StmtKind::Reduce {
                name: name.clone(),
                ty: ty.clone(),
                idx,
                rhs: rhs.clone(),
            }
        }
        (StmtKind::WriteConfig { config, field, rhs }, Edge::Rhs) => StmtKind::WriteConfig {
            config: config.clone(),
            field: field.clone(),
            rhs: rebuild_expr_at(rhs, rest, f)?,
        },
        (StmtKind::WindowStmt { name, rhs }, Edge::Rhs) => StmtKind::WindowStmt {
            name: name.clone(),
            rhs: rebuild_expr_at(rhs, rest, f)?,
        },
        (StmtKind::If { cond, body, orelse }, Edge::Cond) => StmtKind::If {
            cond: rebuild_expr_at(cond, rest, f)?,
            body: body.clone(),
            orelse: orelse.clone(),
        },
        (
            StmtKind::For {
                iter,
                hi,
                body,
                kind,
            },
            Edge::Hi,
        ) => StmtKind::For {
            iter: iter.clone(),
            hi: rebuild_expr_at(hi, rest, f)?,
            body: body.clone(),
            kind: *kind,
        },
        (StmtKind::Call { f: callee, args }, Edge::Arg(i)) => {
            let mut args = args.clone();
            let slot = args.get(i)?;
            args[i] = rebuild_expr_at(slot, rest, f)?;
            StmtKind::Call {
                f: callee.clone(),
                args,
            }
        }
        _ => return None,
    };
    Some(Stmt {
        data,
        srcinfo: s.srcinfo.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::build::*;
    use crate::ir::sym::SymGen;
    use crate::ir::types::LoopType;
    use crate::ir::{Proc, SrcInfo};

    fn sample() -> (Proc, SymGen) {
        let mut r#gen = SymGen::starting_at(1);
        let x = r#gen.fresh("x");
        let i = r#gen.fresh("i");
        let body = vec![
            alloc(&x, LoopType::R),
            seq_for(
                &i,
                int(8),
                vec![assign(&x, LoopType::R, vec![], read(&i, LoopType::Index))],
            ),
        ];
        (
            Proc {
                name: "p".to_string(),
                args: vec![],
                preds: vec![],
                body,
                instr: None,
                srcinfo: SrcInfo::default(),
            },
            r#gen,
        )
    }

    #[test]
    fn resolves_nested_statements() {
        let (p, _) = sample();
        let path = CursorPath(vec![Edge::Body(1), Edge::Body(0)]);
        assert!(matches!(
            resolve_stmt(&p, &path).map(|s| &s.data),
            Some(StmtKind::Assign { .. })
        ));
    }

    #[test]
    fn splice_replaces_a_region() {
        let (p, _) = sample();
        let p2 = splice_stmts(
            &p,
            &CursorPath(vec![Edge::Body(1)]),
            BlockKind::Body,
            0,
            1,
            vec![pass(), pass()],
        )
        .unwrap();
        let (body, _) = p2.body[1].child_blocks();
        assert_eq!(body.len(), 2);
        assert!(body.iter().all(|s| s.is_pass()));
    }

    #[test]
    fn update_expr_rewrites_in_place() {
        let (p, _) = sample();
        let path = CursorPath(vec![Edge::Body(1), Edge::Body(0), Edge::Rhs]);
        let p2 = update_expr(&p, &path, |_| int(3)).unwrap();
        let s = resolve_stmt(&p2, &CursorPath(vec![Edge::Body(1), Edge::Body(0)])).unwrap();
        match &s.data {
            StmtKind::Assign { rhs, .. } => assert_eq!(rhs.as_const_int(), Some(3)),
            _ => panic!("expected assign"),
        }
    }
}
