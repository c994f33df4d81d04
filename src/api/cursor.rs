//! Public cursors: a procedure version plus a position inside it.
//!
//! Cursors are cheap value types. Navigation resolves lazily against the
//! owning procedure; a cursor created on an older version of a procedure
//! is forwarded through the provenance chain when used on a newer one.

use std::fmt;
use std::rc::Rc;

use crate::cursors::{
    resolve, resolve_stmt_list, BlockKind, CursorLoc, CursorPath, NodeRef,
};
use crate::ir::stmt::StmtKind;

use super::error::SchedError;
use super::procedure::{ProvNode, Procedure};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorKind {
    Stmt,
    Expr,
    Gap,
    Block,
    Args,
}

impl fmt::Display for CursorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CursorKind::Stmt => "statement",
            CursorKind::Expr => "expression",
            CursorKind::Gap => "gap",
            CursorKind::Block => "block",
            CursorKind::Args => "args",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone)]
pub struct Cursor {
    pub(crate) node: Rc<ProvNode>,
    pub(crate) loc: CursorLoc,
}

impl Cursor {
    pub(crate) fn new(node: Rc<ProvNode>, loc: CursorLoc) -> Cursor {
        Cursor { node, loc }
    }

    /// The procedure version this cursor points into.
    pub fn proc(&self) -> Procedure {
        Procedure::from_node(self.node.clone())
    }

    pub fn kind(&self) -> CursorKind {
        match &self.loc {
            CursorLoc::Node(path) => match resolve(&self.node.proc, path) {
                Some(NodeRef::Stmt(_)) => CursorKind::Stmt,
                _ => CursorKind::Expr,
            },
            CursorLoc::Block { .. } => CursorKind::Block,
            CursorLoc::Gap { .. } => CursorKind::Gap,
            CursorLoc::Args { .. } => CursorKind::Args,
        }
    }

    fn with_loc(&self, loc: CursorLoc) -> Cursor {
        Cursor {
            node: self.node.clone(),
            loc,
        }
    }

    fn invalid(msg: impl Into<String>) -> SchedError {
        SchedError::InvalidCursor(msg.into())
    }

    /// Cursor to the syntactic parent node.
    pub fn parent(&self) -> Result<Cursor, SchedError> {
        let parent_path = match &self.loc {
            CursorLoc::Node(path) => {
                let (p, _) = path
                    .parent()
                    .ok_or_else(|| Self::invalid("cursor has no parent"))?;
                p
            }
            CursorLoc::Block { parent, .. }
            | CursorLoc::Gap { parent, .. }
            | CursorLoc::Args { parent } => parent.clone(),
        };
        if parent_path.0.is_empty() {
            return Err(Self::invalid("cursor has no parent"));
        }
        Ok(self.with_loc(CursorLoc::Node(parent_path)))
    }

    fn as_list_pos(&self) -> Result<(CursorPath, BlockKind, usize, usize), SchedError> {
        match &self.loc {
            CursorLoc::Node(path) => {
                let (parent, last) = path
                    .parent()
                    .ok_or_else(|| Self::invalid("cursor is at the procedure root"))?;
                let (kind, i) = last
                    .block_index()
                    .ok_or_else(|| Self::invalid("expression cursors have no siblings"))?;
                Ok((parent, kind, i, i + 1))
            }
            CursorLoc::Block {
                parent,
                kind,
                lo,
                hi,
            } => Ok((parent.clone(), *kind, *lo, *hi)),
            CursorLoc::Gap { .. } | CursorLoc::Args { .. } => {
                Err(Self::invalid("position has no statement span"))
            }
        }
    }

    fn list_len(&self, parent: &CursorPath, kind: BlockKind) -> Result<usize, SchedError> {
        resolve_stmt_list(&self.node.proc, parent, kind)
            .map(|l| l.len())
            .ok_or_else(|| Self::invalid("cursor no longer resolves"))
    }

    /// Statements/blocks: the gap immediately before. Gaps: the statement
    /// immediately before.
    pub fn before(&self) -> Result<Cursor, SchedError> {
        match &self.loc {
            CursorLoc::Gap { parent, kind, at } => {
                if *at == 0 {
                    return Err(Self::invalid("no statement before this gap"));
                }
                Ok(self.with_loc(CursorLoc::Node(parent.child(kind.edge(at - 1)))))
            }
            _ => {
                let (parent, kind, lo, _) = self.as_list_pos()?;
                Ok(self.with_loc(CursorLoc::Gap {
                    parent,
                    kind,
                    at: lo,
                }))
            }
        }
    }

    /// Statements/blocks: the gap immediately after. Gaps: the statement
    /// immediately after.
    pub fn after(&self) -> Result<Cursor, SchedError> {
        match &self.loc {
            CursorLoc::Gap { parent, kind, at } => {
                let len = self.list_len(parent, *kind)?;
                if *at >= len {
                    return Err(Self::invalid("no statement after this gap"));
                }
                Ok(self.with_loc(CursorLoc::Node(parent.child(kind.edge(*at)))))
            }
            _ => {
                let (parent, kind, _, hi) = self.as_list_pos()?;
                Ok(self.with_loc(CursorLoc::Gap {
                    parent,
                    kind,
                    at: hi,
                }))
            }
        }
    }

    /// Sibling `d` slots earlier.
    pub fn prev(&self, d: usize) -> Result<Cursor, SchedError> {
        match &self.loc {
            CursorLoc::Gap { parent, kind, at } => {
                if *at < d {
                    return Err(Self::invalid("gap navigation out of bounds"));
                }
                Ok(self.with_loc(CursorLoc::Gap {
                    parent: parent.clone(),
                    kind: *kind,
                    at: at - d,
                }))
            }
            _ => {
                let (parent, kind, lo, _) = self.as_list_pos()?;
                if lo < d {
                    return Err(Self::invalid("cursor navigation out of bounds"));
                }
                Ok(self.with_loc(CursorLoc::Node(parent.child(kind.edge(lo - d)))))
            }
        }
    }

    /// Sibling `d` slots later.
    pub fn next(&self, d: usize) -> Result<Cursor, SchedError> {
        match &self.loc {
            CursorLoc::Gap { parent, kind, at } => {
                let len = self.list_len(parent, *kind)?;
                if at + d > len {
                    return Err(Self::invalid("gap navigation out of bounds"));
                }
                Ok(self.with_loc(CursorLoc::Gap {
                    parent: parent.clone(),
                    kind: *kind,
                    at: at + d,
                }))
            }
            _ => {
                let (parent, kind, lo, _) = self.as_list_pos()?;
                let len = self.list_len(&parent, kind)?;
                if lo + d >= len {
                    return Err(Self::invalid("cursor navigation out of bounds"));
                }
                Ok(self.with_loc(CursorLoc::Node(parent.child(kind.edge(lo + d)))))
            }
        }
    }

    /// A singleton block covering this statement.
    pub fn as_block(&self) -> Result<Cursor, SchedError> {
        let (parent, kind, lo, hi) = self.as_list_pos()?;
        Ok(self.with_loc(CursorLoc::Block {
            parent,
            kind,
            lo,
            hi,
        }))
    }

    /// Grow a block cursor by `d` statements at its end.
    pub fn expand(&self, d: usize) -> Result<Cursor, SchedError> {
        let (parent, kind, lo, hi) = self.as_list_pos()?;
        let len = self.list_len(&parent, kind)?;
        if hi + d > len {
            return Err(Self::invalid("block expansion out of bounds"));
        }
        Ok(self.with_loc(CursorLoc::Block {
            parent,
            kind,
            lo,
            hi: hi + d,
        }))
    }

    /// Number of statements (blocks) or expressions (args spans) covered.
    pub fn len(&self) -> Result<usize, SchedError> {
        match &self.loc {
            CursorLoc::Block { lo, hi, .. } => Ok(hi - lo),
            CursorLoc::Args { parent } => {
                match resolve(&self.node.proc, parent) {
                    Some(NodeRef::Stmt(s)) => match &s.data {
                        StmtKind::Call { args, .. } => Ok(args.len()),
                        StmtKind::Assign { idx, .. } | StmtKind::Reduce { idx, .. } => {
                            Ok(idx.len())
                        }
                        _ => Ok(0),
                    },
                    _ => Err(Self::invalid("cursor no longer resolves")),
                }
            }
            _ => Err(Self::invalid("cursor does not cover a span")),
        }
    }

    pub fn is_empty(&self) -> Result<bool, SchedError> {
        Ok(self.len()? == 0)
    }

    /// The read-only span of expressions directly under this statement:
    /// call arguments, or the index list of an assign/reduce.
    pub fn args(&self) -> Result<Cursor, SchedError> {
        match &self.loc {
            CursorLoc::Node(path) => match resolve(&self.node.proc, path) {
                Some(NodeRef::Stmt(s))
                    if matches!(
                        s.data,
                        StmtKind::Call { .. } | StmtKind::Assign { .. } | StmtKind::Reduce { .. }
                    ) =>
                {
                    Ok(self.with_loc(CursorLoc::Args {
                        parent: path.clone(),
                    }))
                }
                _ => Err(Self::invalid("statement has no argument span")),
            },
            _ => Err(Self::invalid("only statement cursors have argument spans")),
        }
    }

    /// The `i`-th statement of a block, or the `i`-th expression of an
    /// argument span.
    pub fn get(&self, i: usize) -> Result<Cursor, SchedError> {
        match &self.loc {
            CursorLoc::Block {
                parent,
                kind,
                lo,
                hi,
            } => {
                if lo + i >= *hi {
                    return Err(Self::invalid("block index out of bounds"));
                }
                Ok(self.with_loc(CursorLoc::Node(parent.child(kind.edge(lo + i)))))
            }
            CursorLoc::Args { parent } => {
                if i >= self.len()? {
                    return Err(Self::invalid("argument index out of bounds"));
                }
                let edge = match resolve(&self.node.proc, parent) {
                    Some(NodeRef::Stmt(s)) if matches!(s.data, StmtKind::Call { .. }) => {
                        crate::cursors::Edge::Arg(i)
                    }
                    _ => crate::cursors::Edge::Idx(i),
                };
                Ok(self.with_loc(CursorLoc::Node(parent.child(edge))))
            }
            _ => Err(Self::invalid("cursor is not a block")),
        }
    }

    /// Pretty-print the pointed-at node (statements and expressions).
    pub fn to_text(&self) -> Result<String, SchedError> {
        match &self.loc {
            CursorLoc::Node(path) => match resolve(&self.node.proc, path) {
                Some(NodeRef::Stmt(s)) => Ok(crate::fmt::stmt_to_string(s)),
                Some(NodeRef::Expr(e)) => Ok(crate::fmt::expr_to_string(e)),
                None => Err(Self::invalid("cursor no longer resolves")),
            },
            _ => Err(Self::invalid("only node cursors render to text")),
        }
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cursor({:?})", self.loc)
    }
}
