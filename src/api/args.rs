//! Argument processors: the coercion layer between user-facing scheduling
//! methods and the rewrite primitives.
//!
//! Each processor validates one argument, expanding the documented
//! shorthands (a bare name stands for `for name in _: _` in loop position
//! and for `name : _` in allocation position) and reporting failures as
//! `argument <i>, '<name>' to <op>: <reason>`.

use crate::cursors::{BlockKind, CursorLoc, CursorPath, NodeRef};
use crate::ir::stmt::StmtKind;
use crate::ir::sym::Sym;
use crate::ir::types::LoopType;
use crate::pattern;

use super::cursor::Cursor;
use super::error::SchedError;
use super::procedure::Procedure;

/// A position argument: a pattern string or an existing cursor.
#[derive(Clone)]
pub enum Loc<'a> {
    Pat(&'a str),
    Cur(&'a Cursor),
}

impl<'a> From<&'a str> for Loc<'a> {
    fn from(s: &'a str) -> Self {
        Loc::Pat(s)
    }
}

impl<'a> From<&'a Cursor> for Loc<'a> {
    fn from(c: &'a Cursor) -> Self {
        Loc::Cur(c)
    }
}

pub(crate) struct Args<'a> {
    pub op: &'static str,
    pub proc: &'a Procedure,
}

/// Split a trailing `#k` selector off a candidate shorthand.
fn split_selector(s: &str) -> (&str, Option<&str>) {
    match s.find('#') {
        Some(i) => (s[..i].trim(), Some(s[i..].trim())),
        None => (s.trim(), None),
    }
}

fn is_ident(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl<'a> Args<'a> {
    pub fn new(op: &'static str, proc: &'a Procedure) -> Self {
        Args { op, proc }
    }

    pub fn err(&self, index: usize, name: &str, reason: impl Into<String>) -> SchedError {
        SchedError::Argument {
            index,
            name: name.to_string(),
            op: self.op.to_string(),
            reason: reason.into(),
        }
    }

    fn kind_err(&self, expected: &str, got: &Cursor) -> SchedError {
        SchedError::CursorKind {
            op: self.op.to_string(),
            expected: expected.to_string(),
            got: got.kind().to_string(),
        }
    }

    /// Resolve a `Loc` to a cursor position in the current procedure,
    /// expanding `shorthand` for bare names.
    fn resolve(
        &self,
        index: usize,
        name: &str,
        loc: &Loc,
        shorthand: impl Fn(&str) -> Option<String>,
    ) -> Result<CursorLoc, SchedError> {
        match loc {
            Loc::Cur(c) => Ok(self.proc.forward(c)?.loc),
            Loc::Pat(s) => {
                let (head, selector) = split_selector(s);
                let expanded = match shorthand(head) {
                    Some(mut e) => {
                        if let Some(sel) = selector {
                            e.push(' ');
                            e.push_str(sel);
                        }
                        e
                    }
                    None => s.to_string(),
                };
                pattern::find(self.proc.ir(), &expanded)
                    .map_err(|e| self.err(index, name, e.to_string()))
            }
        }
    }

    fn node_path(
        &self,
        index: usize,
        name: &str,
        loc: &Loc,
        shorthand: impl Fn(&str) -> Option<String>,
    ) -> Result<CursorPath, SchedError> {
        match self.resolve(index, name, loc, shorthand)? {
            CursorLoc::Node(p) => Ok(p),
            other => Err(self.err(
                index,
                name,
                format!("expected a single statement or expression, got {other:?}"),
            )),
        }
    }

    /// A statement cursor matching `want` (a StmtKind discriminant check).
    fn stmt_of(
        &self,
        index: usize,
        name: &str,
        loc: &Loc,
        shorthand: impl Fn(&str) -> Option<String>,
        describe: &str,
        want: impl Fn(&StmtKind) -> bool,
    ) -> Result<CursorPath, SchedError> {
        let path = self.node_path(index, name, loc, shorthand)?;
        match crate::cursors::resolve(self.proc.ir(), &path) {
            Some(NodeRef::Stmt(s)) if want(&s.data) => Ok(path),
            Some(_) => Err(self.err(index, name, format!("does not point at {describe}"))),
            None => Err(SchedError::InvalidCursor(format!(
                "argument {index} to {} no longer resolves",
                self.op
            ))),
        }
    }

    /// Loop cursor; bare `i` expands to `for i in _: _`.
    pub fn loop_path(&self, index: usize, name: &str, loc: &Loc) -> Result<CursorPath, SchedError> {
        self.stmt_of(
            index,
            name,
            loc,
            |head| {
                if is_ident(head) {
                    Some(format!("for {head} in _: _"))
                } else {
                    None
                }
            },
            "a loop",
            |s| matches!(s, StmtKind::For { .. }),
        )
    }

    /// Two perfectly nested loops; accepts `"i j"` meaning outer `i`
    /// with inner `j`, or any loop position whose body is a single loop.
    pub fn nested_loops(
        &self,
        index: usize,
        name: &str,
        loc: &Loc,
    ) -> Result<CursorPath, SchedError> {
        if let Loc::Pat(s) = loc {
            let (head, selector) = split_selector(s);
            let parts: Vec<&str> = head.split_whitespace().collect();
            if parts.len() == 2 && parts.iter().all(|p| is_ident(p)) {
                let outer_pat = match selector {
                    Some(sel) => format!("for {} in _: _ {sel}", parts[0]),
                    None => format!("for {} in _: _", parts[0]),
                };
                let outer = self.loop_path(index, name, &Loc::Pat(&outer_pat))?;
                // the inner loop must carry the second iterator name
                let inner_ok = match crate::cursors::resolve_stmt(self.proc.ir(), &outer) {
                    Some(s) => match &s.data {
                        StmtKind::For { body, .. } => match body.first().map(|s| &s.data) {
                            Some(StmtKind::For { iter, .. }) if body.len() == 1 => {
                                iter.name() == parts[1]
                            }
                            _ => false,
                        },
                        _ => false,
                    },
                    None => false,
                };
                if !inner_ok {
                    return Err(self.err(
                        index,
                        name,
                        format!("'{}' does not directly enclose a loop over '{}'", parts[0], parts[1]),
                    ));
                }
                return Ok(outer);
            }
        }
        let path = self.loop_path(index, name, loc)?;
        match crate::cursors::resolve_stmt(self.proc.ir(), &path).map(|s| &s.data) {
            Some(StmtKind::For { body, .. })
                if body.len() == 1 && matches!(body[0].data, StmtKind::For { .. }) =>
            {
                Ok(path)
            }
            _ => Err(self.err(index, name, "loops are not perfectly nested")),
        }
    }

    /// Allocation cursor; a bare name expands to `name : _`.
    pub fn alloc_path(&self, index: usize, name: &str, loc: &Loc) -> Result<CursorPath, SchedError> {
        self.stmt_of(
            index,
            name,
            loc,
            |head| {
                if is_ident(head) {
                    Some(format!("{head} : _"))
                } else {
                    None
                }
            },
            "an allocation",
            |s| matches!(s, StmtKind::Alloc { .. }),
        )
    }

    pub fn call_path(&self, index: usize, name: &str, loc: &Loc) -> Result<CursorPath, SchedError> {
        self.stmt_of(
            index,
            name,
            loc,
            |head| {
                if is_ident(head) {
                    Some(format!("{head}(_)"))
                } else {
                    None
                }
            },
            "a call",
            |s| matches!(s, StmtKind::Call { .. }),
        )
    }

    pub fn window_stmt_path(
        &self,
        index: usize,
        name: &str,
        loc: &Loc,
    ) -> Result<CursorPath, SchedError> {
        self.stmt_of(
            index,
            name,
            loc,
            |head| {
                if is_ident(head) {
                    Some(format!("{head} = _"))
                } else {
                    None
                }
            },
            "a window statement",
            |s| matches!(s, StmtKind::WindowStmt { .. }),
        )
    }

    pub fn any_stmt_path(&self, index: usize, name: &str, loc: &Loc) -> Result<CursorPath, SchedError> {
        self.stmt_of(index, name, loc, |_| None, "a statement", |_| true)
    }

    /// An expression cursor.
    pub fn expr_path(&self, index: usize, name: &str, loc: &Loc) -> Result<CursorPath, SchedError> {
        let path = self.node_path(index, name, loc, |_| None)?;
        match crate::cursors::resolve(self.proc.ir(), &path) {
            Some(NodeRef::Expr(_)) => Ok(path),
            Some(_) => Err(self.err(index, name, "does not point at an expression")),
            None => Err(SchedError::InvalidCursor(format!(
                "argument {index} to {} no longer resolves",
                self.op
            ))),
        }
    }

    /// A block cursor, optionally of an exact size. Single statements
    /// widen to singleton blocks.
    pub fn block(
        &self,
        index: usize,
        name: &str,
        loc: &Loc,
        size: Option<usize>,
    ) -> Result<(CursorPath, BlockKind, usize, usize), SchedError> {
        let resolved = self.resolve(index, name, loc, |_| None)?;
        let (parent, kind, lo, hi) = match resolved {
            CursorLoc::Block {
                parent,
                kind,
                lo,
                hi,
            } => (parent, kind, lo, hi),
            CursorLoc::Node(path) => {
                if crate::cursors::resolve_stmt(self.proc.ir(), &path).is_none() {
                    return Err(self.err(index, name, "does not point at a statement"));
                }
                let (parent, last) = path.parent().ok_or_else(|| {
                    self.err(index, name, "cannot form a block at the procedure root")
                })?;
                let (kind, i) = last
                    .block_index()
                    .ok_or_else(|| self.err(index, name, "expression cursors form no block"))?;
                (parent, kind, i, i + 1)
            }
            other => {
                return Err(self.err(
                    index,
                    name,
                    format!("expected a block of statements, got {other:?}"),
                ))
            }
        };
        if let Some(n) = size
            && hi - lo != n
        {
            return Err(self.err(
                index,
                name,
                format!("expected a block of {n} statements, got {}", hi - lo),
            ));
        }
        Ok((parent, kind, lo, hi))
    }

    /// A gap cursor (only obtainable from cursor navigation).
    pub fn gap(
        &self,
        index: usize,
        name: &str,
        loc: &Loc,
    ) -> Result<(CursorPath, BlockKind, usize), SchedError> {
        match loc {
            Loc::Cur(c) => {
                let fwd = self.proc.forward(c)?;
                match fwd.loc {
                    CursorLoc::Gap { parent, kind, at } => Ok((parent, kind, at)),
                    _ => Err(self.kind_err("gap", c)),
                }
            }
            Loc::Pat(_) => Err(self.err(
                index,
                name,
                "gaps cannot be named by a pattern; navigate with before()/after()",
            )),
        }
    }

    /// A buffer symbol: an argument name, or an allocation found by name
    /// or cursor.
    pub fn buffer_sym(&self, index: usize, name: &str, loc: &Loc) -> Result<Sym, SchedError> {
        if let Loc::Pat(s) = loc {
            let (head, _) = split_selector(s);
            if is_ident(head)
                && let Some(arg) = self
                    .proc
                    .ir()
                    .args
                    .iter()
                    .find(|a| a.name.name() == head)
            {
                return Ok(arg.name.clone());
            }
        }
        let path = self.alloc_path(index, name, loc)?;
        match crate::cursors::resolve_stmt(self.proc.ir(), &path).map(|s| &s.data) {
            Some(StmtKind::Alloc { name, .. }) => Ok(name.clone()),
            _ => Err(self.err(index, name, "does not name a buffer")),
        }
    }

    pub fn pos_int(&self, index: usize, name: &str, v: i64) -> Result<i64, SchedError> {
        if v > 0 {
            Ok(v)
        } else {
            Err(self.err(index, name, format!("expected a positive integer, got {v}")))
        }
    }

    pub fn ident(&self, index: usize, name: &str, v: &str) -> Result<String, SchedError> {
        if is_ident(v) {
            Ok(v.to_string())
        } else {
            Err(self.err(index, name, format!("'{v}' is not a valid name")))
        }
    }

    pub fn type_abbrev(&self, index: usize, name: &str, v: &str) -> Result<LoopType, SchedError> {
        LoopType::from_abbrev(v)
            .ok_or_else(|| self.err(index, name, format!("unknown type abbreviation '{v}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_splitting() {
        assert_eq!(split_selector("i #2"), ("i", Some("#2")));
        assert_eq!(split_selector("for i in _: _"), ("for i in _: _", None));
    }

    #[test]
    fn ident_recognition() {
        assert!(is_ident("C_reg"));
        assert!(is_ident("i0"));
        assert!(!is_ident("for i in _: _"));
        assert!(!is_ident("_x"));
        assert!(!is_ident(""));
    }
}
