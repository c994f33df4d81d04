//! The library of atomic scheduling rewrites.
//!
//! Every primitive has a pure signature: it takes the current procedure,
//! pre-validated cursor positions and parameters, and returns either a new
//! procedure together with the forwarding map describing where old
//! positions went, or an error, never a partially-rewritten tree.

pub mod alloc;
pub mod annotate;
pub mod bind;
pub mod config;
pub mod guards;
pub mod loops;
pub mod simplify;
pub mod staging;
pub mod stmts;
pub mod subproc;

use thiserror::Error;

use crate::analysis::checks::CheckFailure;
use crate::analysis::effects::CtxItem;
use crate::cursors::{
    resolve_stmt, resolve_stmt_list, BlockKind, CursorPath, ForwardingMap,
};
use crate::ir::expr::Expr;
use crate::ir::proc::Proc;
use crate::ir::stmt::{LoopKind, Stmt, StmtKind};
use crate::ir::sym::Sym;
use crate::ir::typecheck::TypeError;
use crate::unify::UnifyError;

pub type RewriteResult = Result<(Proc, ForwardingMap), RewriteError>;

#[derive(Debug, Error)]
pub enum RewriteError {
    /// A legality check failed; the rewrite does not apply here.
    #[error("{0}")]
    Precondition(String),
    /// A cursor did not resolve against the procedure.
    #[error("cursor does not resolve in this procedure")]
    BadCursor,
    /// The rewrite left (or would leave) ill-typed IR.
    #[error(transparent)]
    Type(#[from] TypeError),
    #[error(transparent)]
    Unify(#[from] UnifyError),
    /// An engine invariant was violated.
    #[error("internal invariant violated: {0}")]
    Bug(String),
}

impl RewriteError {
    pub fn precondition(msg: impl Into<String>) -> RewriteError {
        RewriteError::Precondition(msg.into())
    }
}

impl From<CheckFailure> for RewriteError {
    fn from(f: CheckFailure) -> Self {
        RewriteError::Precondition(f.to_string())
    }
}

pub(crate) fn stmt_at<'a>(proc: &'a Proc, path: &CursorPath) -> Result<&'a Stmt, RewriteError> {
    resolve_stmt(proc, path).ok_or(RewriteError::BadCursor)
}

pub(crate) fn list_at<'a>(
    proc: &'a Proc,
    parent: &CursorPath,
    kind: BlockKind,
) -> Result<&'a [Stmt], RewriteError> {
    resolve_stmt_list(proc, parent, kind).ok_or(RewriteError::BadCursor)
}

/// The statement must be a loop; returns its parts.
pub(crate) fn expect_loop<'a>(
    proc: &'a Proc,
    path: &CursorPath,
) -> Result<(&'a Sym, &'a Expr, &'a [Stmt], LoopKind), RewriteError> {
    match &stmt_at(proc, path)?.data {
        StmtKind::For {
            iter,
            hi,
            body,
            kind,
        } => Ok((iter, hi, body, *kind)),
        _ => Err(RewriteError::precondition("statement is not a loop")),
    }
}

/// Binder context along the spine from the root down to (and excluding)
/// the node at `path`.
pub(crate) fn ctx_at(proc: &Proc, path: &CursorPath) -> Result<Vec<CtxItem>, RewriteError> {
    let mut ctx = Vec::new();
    let mut prefix = CursorPath::root();
    for edge in &path.0 {
        let Some((kind, _)) = edge.block_index() else {
            break;
        };
        if !prefix.0.is_empty() {
            let s = stmt_at(proc, &prefix)?;
            match &s.data {
                StmtKind::For {
                    iter, hi, kind: lk, ..
                } => ctx.push(CtxItem::Loop {
                    iter: iter.clone(),
                    hi: hi.clone(),
                    kind: *lk,
                }),
                StmtKind::If { cond, .. } => match kind {
                    BlockKind::Body => ctx.push(CtxItem::Assume(cond.clone())),
                    BlockKind::Orelse => ctx.push(CtxItem::AssumeNot(cond.clone())),
                },
                _ => return Err(RewriteError::BadCursor),
            }
        }
        prefix = prefix.child(*edge);
    }
    Ok(ctx)
}

/// Splice helper that also records the forwarding for it.
pub(crate) fn splice(
    proc: &Proc,
    parent: &CursorPath,
    kind: BlockKind,
    lo: usize,
    hi: usize,
    replacement: Vec<Stmt>,
) -> RewriteResult {
    let inserted = replacement.len();
    let new = crate::cursors::splice_stmts(proc, parent, kind, lo, hi, replacement)
        .ok_or(RewriteError::BadCursor)?;
    let fwd = ForwardingMap::identity().spliced(parent.clone(), kind, lo, hi - lo, inserted);
    Ok((new, fwd))
}

/// Decompose a statement path into its parent list position.
pub(crate) fn list_pos(path: &CursorPath) -> Result<(CursorPath, BlockKind, usize), RewriteError> {
    let (parent, last) = path.parent().ok_or(RewriteError::BadCursor)?;
    let (kind, i) = last.block_index().ok_or(RewriteError::BadCursor)?;
    Ok((parent, kind, i))
}
