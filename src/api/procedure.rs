//! The `Procedure` façade: an immutable IR root plus provenance.
//!
//! Every scheduling method returns a fresh `Procedure` whose provenance
//! records the parent version and the rewrite's forwarding map, so stale
//! cursors can be lifted lazily when they are next used.

use std::fmt;
use std::rc::Rc;

use crate::config::Config;
use crate::cursors::{forward::forward_chain, CursorPath, ForwardingMap};
use crate::fragment;
use crate::ir::expr::Expr;
use crate::ir::proc::Proc;
use crate::ir::stmt::{LoopKind, Stmt, StmtKind};
use crate::ir::visit::{map_stmts, VisitAction};
use crate::memory::Memory;
use crate::pattern;
use crate::rewrites;
use crate::rewrites::loops::TailStrategy;

use super::args::{Args, Loc};
use super::cursor::Cursor;
use super::error::SchedError;

#[derive(Debug)]
pub(crate) struct ProvNode {
    pub(crate) proc: Rc<Proc>,
    pub(crate) parent: Option<Rc<ProvNode>>,
    pub(crate) fwd: Option<ForwardingMap>,
}

#[derive(Clone)]
pub struct Procedure {
    pub(crate) node: Rc<ProvNode>,
}

impl Procedure {
    /// Wrap parsed IR as a fresh procedure root.
    pub fn from_ir(proc: Proc) -> Procedure {
        Procedure {
            node: Rc::new(ProvNode {
                proc: Rc::new(proc),
                parent: None,
                fwd: None,
            }),
        }
    }

    pub(crate) fn from_node(node: Rc<ProvNode>) -> Procedure {
        Procedure { node }
    }

    pub fn ir(&self) -> &Proc {
        &self.node.proc
    }

    pub fn name(&self) -> &str {
        &self.ir().name
    }

    /// Find the position matching `pattern` (see the pattern
    /// mini-language); `#k` selects the k-th match.
    pub fn find(&self, pattern: &str) -> Result<Cursor, SchedError> {
        let loc = pattern::find(self.ir(), pattern).map_err(|e| SchedError::Argument {
            index: 1,
            name: "pattern".to_string(),
            op: "find".to_string(),
            reason: e.to_string(),
        })?;
        Ok(Cursor::new(self.node.clone(), loc))
    }

    /// Every match of `pattern`, in pre-order.
    pub fn find_all(&self, pattern: &str) -> Result<Vec<Cursor>, SchedError> {
        let locs = pattern::find_all(self.ir(), pattern).map_err(|e| SchedError::Argument {
            index: 1,
            name: "pattern".to_string(),
            op: "find_all".to_string(),
            reason: e.to_string(),
        })?;
        Ok(locs
            .into_iter()
            .map(|loc| Cursor::new(self.node.clone(), loc))
            .collect())
    }

    /// Lift a cursor created on an ancestor version into this one.
    pub fn forward(&self, cursor: &Cursor) -> Result<Cursor, SchedError> {
        if Rc::ptr_eq(&cursor.node, &self.node) {
            return Ok(cursor.clone());
        }
        // collect the forwarding maps from the cursor's version down to us
        let mut maps: Vec<&ForwardingMap> = Vec::new();
        let mut node = &self.node;
        loop {
            if Rc::ptr_eq(node, &cursor.node) {
                break;
            }
            match (&node.fwd, &node.parent) {
                (Some(fwd), Some(parent)) => {
                    maps.push(fwd);
                    node = parent;
                }
                _ => {
                    return Err(SchedError::InvalidCursor(
                        "cursor does not point into an ancestor of this procedure".to_string(),
                    ))
                }
            }
        }
        maps.reverse();
        let loc = forward_chain(maps, &cursor.loc)
            .map_err(|e| SchedError::InvalidCursor(e.to_string()))?;
        Ok(Cursor::new(self.node.clone(), loc))
    }

    /// Provenance equivalence: both procedures descend from a common
    /// root by chains of semantics-preserving rewrites.
    pub fn eqv(&self, other: &Procedure) -> bool {
        let mut ours: Vec<*const ProvNode> = Vec::new();
        let mut node = Some(&self.node);
        while let Some(n) = node {
            ours.push(Rc::as_ptr(n));
            node = n.parent.as_ref();
        }
        let mut node = Some(&other.node);
        while let Some(n) = node {
            if ours.contains(&Rc::as_ptr(n)) {
                return true;
            }
            node = n.parent.as_ref();
        }
        false
    }

    fn step(
        &self,
        op: &'static str,
        result: rewrites::RewriteResult,
    ) -> Result<Procedure, SchedError> {
        let (proc, fwd) = result.map_err(|e| SchedError::from_rewrite(op, e))?;
        Ok(Procedure {
            node: Rc::new(ProvNode {
                proc: Rc::new(proc),
                parent: Some(self.node.clone()),
                fwd: Some(fwd),
            }),
        })
    }

    /// Context statement for fragment parsing around a block.
    fn block_ctx(
        parent: &CursorPath,
        kind: crate::cursors::BlockKind,
        at: usize,
    ) -> CursorPath {
        parent.child(kind.edge(at))
    }

    // ---------------------------------------------------------------- //
    // structural ops

    pub fn rename(&self, name: &str) -> Result<Procedure, SchedError> {
        let a = Args::new("rename", self);
        let name = a.ident(1, "name", name)?;
        self.step("rename", rewrites::annotate::rename(self.ir(), &name))
    }

    pub fn make_instr(&self, instr: &str) -> Result<Procedure, SchedError> {
        self.step("make_instr", rewrites::annotate::make_instr(self.ir(), instr))
    }

    pub fn simplify(&self) -> Result<Procedure, SchedError> {
        self.step("simplify", rewrites::simplify::simplify(self.ir()))
    }

    pub fn insert_pass(&self, gap: &Cursor) -> Result<Procedure, SchedError> {
        let a = Args::new("insert_pass", self);
        let (parent, kind, at) = a.gap(1, "gap", &Loc::Cur(gap))?;
        self.step(
            "insert_pass",
            rewrites::stmts::insert_pass(self.ir(), &parent, kind, at),
        )
    }

    pub fn delete_pass(&self) -> Result<Procedure, SchedError> {
        self.step("delete_pass", rewrites::stmts::delete_pass(self.ir()))
    }

    pub fn reorder_stmts<'a>(&self, block: impl Into<Loc<'a>>) -> Result<Procedure, SchedError> {
        let a = Args::new("reorder_stmts", self);
        let (parent, kind, lo, hi) = a.block(1, "block", &block.into(), Some(2))?;
        self.step(
            "reorder_stmts",
            rewrites::stmts::reorder_stmts(self.ir(), &parent, kind, lo, hi),
        )
    }

    pub fn commute_expr<'a>(&self, expr: impl Into<Loc<'a>>) -> Result<Procedure, SchedError> {
        self.commute_exprs(&[expr.into()])
    }

    pub fn commute_exprs(&self, exprs: &[Loc]) -> Result<Procedure, SchedError> {
        let a = Args::new("commute_expr", self);
        let paths = exprs
            .iter()
            .map(|e| a.expr_path(1, "exprs", e))
            .collect::<Result<Vec<_>, SchedError>>()?;
        self.step(
            "commute_expr",
            rewrites::stmts::commute_expr(self.ir(), &paths),
        )
    }

    // ---------------------------------------------------------------- //
    // binding / CSE

    pub fn bind_expr<'a>(
        &self,
        expr: impl Into<Loc<'a>>,
        new_name: &str,
        cse: bool,
    ) -> Result<Procedure, SchedError> {
        self.bind_exprs(&[expr.into()], new_name, cse)
    }

    pub fn bind_exprs(
        &self,
        exprs: &[Loc],
        new_name: &str,
        cse: bool,
    ) -> Result<Procedure, SchedError> {
        let a = Args::new("bind_expr", self);
        let paths = exprs
            .iter()
            .map(|e| a.expr_path(1, "exprs", e))
            .collect::<Result<Vec<_>, SchedError>>()?;
        let new_name = a.ident(2, "new_name", new_name)?;
        self.step(
            "bind_expr",
            rewrites::bind::bind_expr(self.ir(), &paths, &new_name, cse),
        )
    }

    // ---------------------------------------------------------------- //
    // sub-procedures

    pub fn extract_subproc<'a>(
        &self,
        name: &str,
        stmt: impl Into<Loc<'a>>,
    ) -> Result<(Procedure, Procedure), SchedError> {
        let a = Args::new("extract_subproc", self);
        let name = a.ident(1, "name", name)?;
        let path = a.any_stmt_path(2, "stmt", &stmt.into())?;
        let (proc, fwd, sub) = rewrites::subproc::extract_subproc(self.ir(), &name, &path)
            .map_err(|e| SchedError::from_rewrite("extract_subproc", e))?;
        let main = Procedure {
            node: Rc::new(ProvNode {
                proc: Rc::new(proc),
                parent: Some(self.node.clone()),
                fwd: Some(fwd),
            }),
        };
        let sub = Procedure::from_ir((*sub).clone());
        Ok((main, sub))
    }

    pub fn inline<'a>(&self, call: impl Into<Loc<'a>>) -> Result<Procedure, SchedError> {
        let a = Args::new("inline", self);
        let path = a.call_path(1, "call", &call.into())?;
        self.step("inline", rewrites::subproc::inline(self.ir(), &path))
    }

    pub fn replace<'a>(
        &self,
        block: impl Into<Loc<'a>>,
        subproc: &Procedure,
        quiet: bool,
    ) -> Result<Procedure, SchedError> {
        let a = Args::new("replace", self);
        let (parent, kind, lo, hi) = a.block(1, "block", &block.into(), None)?;
        self.step(
            "replace",
            rewrites::subproc::replace(
                self.ir(),
                &parent,
                kind,
                lo,
                hi,
                &self.node_proc_rc(subproc),
                quiet,
            ),
        )
    }

    pub fn call_eqv<'a>(
        &self,
        call: impl Into<Loc<'a>>,
        eqv: &Procedure,
    ) -> Result<Procedure, SchedError> {
        let a = Args::new("call_eqv", self);
        let path = a.call_path(1, "call", &call.into())?;
        let callee = match &crate::cursors::resolve_stmt(self.ir(), &path)
            .ok_or_else(|| SchedError::InvalidCursor("call cursor no longer resolves".into()))?
            .data
        {
            StmtKind::Call { f, .. } => f.clone(),
            _ => unreachable!("call_path returns call statements"),
        };
        // equivalence holds when the current callee appears in the
        // replacement's provenance chain, or failing that, when the two
        // bodies agree modulo configuration writes
        let mut provenance_ok = false;
        let mut node = Some(&eqv.node);
        while let Some(n) = node {
            if Rc::ptr_eq(&n.proc, &callee) {
                provenance_ok = true;
                break;
            }
            node = n.parent.as_ref();
        }
        if !provenance_ok && !equal_mod_config(&callee, eqv.ir()) {
            return Err(SchedError::Precondition {
                op: "call_eqv".to_string(),
                reason: format!(
                    "'{}' is not equivalent to '{}' modulo configuration",
                    eqv.name(),
                    callee.name
                ),
            });
        }
        self.step(
            "call_eqv",
            rewrites::subproc::call_eqv(self.ir(), &path, &self.node_proc_rc(eqv)),
        )
    }

    fn node_proc_rc(&self, p: &Procedure) -> Rc<Proc> {
        p.node.proc.clone()
    }

    // ---------------------------------------------------------------- //
    // annotations

    pub fn set_precision<'a>(
        &self,
        buf: impl Into<Loc<'a>>,
        ty: &str,
    ) -> Result<Procedure, SchedError> {
        let a = Args::new("set_precision", self);
        let sym = a.buffer_sym(1, "buf", &buf.into())?;
        let ty = a.type_abbrev(2, "ty", ty)?;
        self.step(
            "set_precision",
            rewrites::annotate::set_precision(self.ir(), &sym, ty),
        )
    }

    pub fn set_window<'a>(
        &self,
        buf: impl Into<Loc<'a>>,
        is_window: bool,
    ) -> Result<Procedure, SchedError> {
        let a = Args::new("set_window", self);
        let sym = a.buffer_sym(1, "buf", &buf.into())?;
        self.step(
            "set_window",
            rewrites::annotate::set_window(self.ir(), &sym, is_window),
        )
    }

    pub fn set_memory<'a>(
        &self,
        buf: impl Into<Loc<'a>>,
        mem: Memory,
    ) -> Result<Procedure, SchedError> {
        let a = Args::new("set_memory", self);
        let sym = a.buffer_sym(1, "buf", &buf.into())?;
        self.step(
            "set_memory",
            rewrites::annotate::set_memory(self.ir(), &sym, mem),
        )
    }

    // ---------------------------------------------------------------- //
    // configuration

    pub fn bind_config<'a>(
        &self,
        var: impl Into<Loc<'a>>,
        config: &Rc<Config>,
        field: &str,
    ) -> Result<Procedure, SchedError> {
        let a = Args::new("bind_config", self);
        let path = a.expr_path(1, "var", &var.into())?;
        if !config.has_field(field) {
            return Err(a.err(3, "field", format!("config has no field '{field}'")));
        }
        self.step(
            "bind_config",
            rewrites::config::bind_config(self.ir(), &path, config, field),
        )
    }

    pub fn delete_config<'a>(&self, stmt: impl Into<Loc<'a>>) -> Result<Procedure, SchedError> {
        let a = Args::new("delete_config", self);
        let path = a.any_stmt_path(1, "stmt", &stmt.into())?;
        self.step(
            "delete_config",
            rewrites::config::delete_config(self.ir(), &path),
        )
    }

    pub fn write_config(
        &self,
        gap: &Cursor,
        config: &Rc<Config>,
        field: &str,
        rhs: &str,
    ) -> Result<Procedure, SchedError> {
        let a = Args::new("write_config", self);
        let (parent, kind, at) = a.gap(1, "gap", &Loc::Cur(gap))?;
        if !config.has_field(field) {
            return Err(a.err(3, "field", format!("config has no field '{field}'")));
        }
        // parse the right-hand side in the scope around the gap
        let list_len = crate::cursors::resolve_stmt_list(self.ir(), &parent, kind)
            .map(|l| l.len())
            .unwrap_or(0);
        let ctx = if at < list_len {
            Self::block_ctx(&parent, kind, at)
        } else if at > 0 {
            Self::block_ctx(&parent, kind, at - 1)
        } else {
            return Err(a.err(1, "gap", "cannot parse an expression in an empty block"));
        };
        let rhs = fragment::parse_expr(self.ir(), &ctx, rhs, &[])
            .map_err(|e| a.err(4, "rhs", e.to_string()))?;
        self.step(
            "write_config",
            rewrites::config::write_config(self.ir(), &parent, kind, at, config, field, rhs),
        )
    }

    // ---------------------------------------------------------------- //
    // allocation geometry

    pub fn expand_dim<'a>(
        &self,
        buf: impl Into<Loc<'a>>,
        size: &str,
        idx: &str,
    ) -> Result<Procedure, SchedError> {
        let a = Args::new("expand_dim", self);
        let path = a.alloc_path(1, "buf", &buf.into())?;
        let size = fragment::parse_expr(self.ir(), &path, size, &[])
            .map_err(|e| a.err(2, "size", e.to_string()))?;
        // the index typically names iterators of the loops around the
        // buffer's uses; parse it in the scope of the first use
        let idx_ctx = self
            .first_use_ctx(&path)
            .unwrap_or_else(|| path.clone());
        let idx = fragment::parse_expr(self.ir(), &idx_ctx, idx, &[])
            .map_err(|e| a.err(3, "idx", e.to_string()))?;
        self.step(
            "expand_dim",
            rewrites::alloc::expand_dim(self.ir(), &path, size, idx),
        )
    }

    /// The deepest statement using the allocated buffer, for scope
    /// resolution of use-site index expressions.
    fn first_use_ctx(&self, alloc_path: &CursorPath) -> Option<CursorPath> {
        let sym = match &crate::cursors::resolve_stmt(self.ir(), alloc_path)?.data {
            StmtKind::Alloc { name, .. } => name.clone(),
            _ => return None,
        };
        fn search(
            stmts: &[Stmt],
            prefix: &CursorPath,
            kind: crate::cursors::BlockKind,
            sym: &crate::ir::Sym,
        ) -> Option<CursorPath> {
            for (i, s) in stmts.iter().enumerate() {
                let path = prefix.child(kind.edge(i));
                let (body, orelse) = s.child_blocks();
                if let Some(found) = search(body, &path, crate::cursors::BlockKind::Body, sym) {
                    return Some(found);
                }
                if let Some(found) = search(orelse, &path, crate::cursors::BlockKind::Orelse, sym) {
                    return Some(found);
                }
                let mut used = false;
                s.own_exprs(&mut |e| {
                    if e.reads_sym(sym) {
                        used = true;
                    }
                });
                if let StmtKind::Assign { name, .. } | StmtKind::Reduce { name, .. } = &s.data
                    && name == sym
                {
                    used = true;
                }
                if used {
                    return Some(path);
                }
            }
            None
        }
        search(
            &self.ir().body,
            &CursorPath::root(),
            crate::cursors::BlockKind::Body,
            &sym,
        )
    }

    pub fn rearrange_dim<'a>(
        &self,
        buf: impl Into<Loc<'a>>,
        perm: &[usize],
    ) -> Result<Procedure, SchedError> {
        let a = Args::new("rearrange_dim", self);
        let path = a.alloc_path(1, "buf", &buf.into())?;
        self.step(
            "rearrange_dim",
            rewrites::alloc::rearrange_dim(self.ir(), &path, perm),
        )
    }

    pub fn bound_alloc<'a>(
        &self,
        buf: impl Into<Loc<'a>>,
        new_bounds: &[Option<&str>],
    ) -> Result<Procedure, SchedError> {
        let a = Args::new("bound_alloc", self);
        let path = a.alloc_path(1, "buf", &buf.into())?;
        let bounds = new_bounds
            .iter()
            .copied()
            .map(|b| {
                b.map(|src| {
                    fragment::parse_expr(self.ir(), &path, src, &[])
                        .map_err(|e| a.err(2, "new_bounds", e.to_string()))
                })
                .transpose()
            })
            .collect::<Result<Vec<Option<Expr>>, SchedError>>()?;
        self.step(
            "bound_alloc",
            rewrites::alloc::bound_alloc(self.ir(), &path, &bounds),
        )
    }

    pub fn divide_dim<'a>(
        &self,
        buf: impl Into<Loc<'a>>,
        dim: usize,
        quotient: i64,
    ) -> Result<Procedure, SchedError> {
        let a = Args::new("divide_dim", self);
        let path = a.alloc_path(1, "buf", &buf.into())?;
        let q = a.pos_int(3, "quotient", quotient)?;
        self.step(
            "divide_dim",
            rewrites::alloc::divide_dim(self.ir(), &path, dim, q),
        )
    }

    pub fn mult_dim<'a>(
        &self,
        buf: impl Into<Loc<'a>>,
        hi_dim: usize,
        lo_dim: usize,
    ) -> Result<Procedure, SchedError> {
        let a = Args::new("mult_dim", self);
        let path = a.alloc_path(1, "buf", &buf.into())?;
        self.step(
            "mult_dim",
            rewrites::alloc::mult_dim(self.ir(), &path, hi_dim, lo_dim),
        )
    }

    pub fn lift_alloc<'a>(
        &self,
        buf: impl Into<Loc<'a>>,
        n_lifts: i64,
    ) -> Result<Procedure, SchedError> {
        let a = Args::new("lift_alloc", self);
        let path = a.alloc_path(1, "buf", &buf.into())?;
        let n = a.pos_int(2, "n_lifts", n_lifts)?;
        self.step(
            "lift_alloc",
            rewrites::alloc::lift_alloc(self.ir(), &path, n as usize),
        )
    }

    pub fn autolift_alloc<'a>(
        &self,
        buf: impl Into<Loc<'a>>,
        n_lifts: i64,
        mode: &str,
        size: Option<i64>,
        keep_dims: bool,
    ) -> Result<Procedure, SchedError> {
        let a = Args::new("autolift_alloc", self);
        let path = a.alloc_path(1, "buf", &buf.into())?;
        let n = a.pos_int(2, "n_lifts", n_lifts)?;
        let row_mode = match mode {
            "row" => true,
            "col" => false,
            other => {
                return Err(a.err(3, "mode", format!("expected 'row' or 'col', got '{other}'")))
            }
        };
        self.step(
            "autolift_alloc",
            rewrites::alloc::autolift_alloc(self.ir(), &path, n as usize, row_mode, size, keep_dims),
        )
    }

    pub fn reuse_buffer<'a, 'b>(
        &self,
        src: impl Into<Loc<'a>>,
        target: impl Into<Loc<'b>>,
    ) -> Result<Procedure, SchedError> {
        let a = Args::new("reuse_buffer", self);
        let src_path = a.alloc_path(1, "buf", &src.into())?;
        let target_path = a.alloc_path(2, "replace", &target.into())?;
        self.step(
            "reuse_buffer",
            rewrites::alloc::reuse_buffer(self.ir(), &src_path, &target_path),
        )
    }

    // ---------------------------------------------------------------- //
    // staging

    pub fn stage_mem<'a>(
        &self,
        block: impl Into<Loc<'a>>,
        win_expr: &str,
        new_name: &str,
        accum: bool,
    ) -> Result<Procedure, SchedError> {
        let a = Args::new("stage_mem", self);
        let (parent, kind, lo, hi) = a.block(1, "block", &block.into(), None)?;
        let new_name = a.ident(3, "new_name", new_name)?;
        let ctx = Self::block_ctx(&parent, kind, lo);
        let (buf, buf_ty, window) = fragment::parse_window(self.ir(), &ctx, win_expr)
            .map_err(|e| a.err(2, "win_expr", e.to_string()))?;
        self.step(
            "stage_mem",
            rewrites::staging::stage_mem(
                self.ir(),
                &parent,
                kind,
                lo,
                hi,
                &buf,
                &buf_ty,
                &window,
                &new_name,
                accum,
            ),
        )
    }

    pub fn stage_window<'a>(
        &self,
        expr: impl Into<Loc<'a>>,
        win_name: &str,
    ) -> Result<Procedure, SchedError> {
        let a = Args::new("stage_window", self);
        let path = a.expr_path(1, "expr", &expr.into())?;
        let win_name = a.ident(2, "win_name", win_name)?;
        self.step(
            "stage_window",
            rewrites::staging::stage_window(self.ir(), &path, &win_name),
        )
    }

    pub fn inline_window<'a>(&self, winstmt: impl Into<Loc<'a>>) -> Result<Procedure, SchedError> {
        let a = Args::new("inline_window", self);
        let path = a.window_stmt_path(1, "winstmt", &winstmt.into())?;
        self.step(
            "inline_window",
            rewrites::staging::inline_window(self.ir(), &path),
        )
    }

    // ---------------------------------------------------------------- //
    // loops

    #[allow(clippy::too_many_arguments)]
    pub fn divide_loop<'a>(
        &self,
        loop_: impl Into<Loc<'a>>,
        div_const: i64,
        new_iters: (&str, &str),
        tail: &str,
        perfect: bool,
    ) -> Result<Procedure, SchedError> {
        let a = Args::new("divide_loop", self);
        let path = a.loop_path(1, "loop", &loop_.into())?;
        if div_const == 1 {
            return Err(a.err(2, "div_const", "why are you trying to split by 1?"));
        }
        let q = a.pos_int(2, "div_const", div_const)?;
        let outer = a.ident(3, "new_iters", new_iters.0)?;
        let inner = a.ident(3, "new_iters", new_iters.1)?;
        let tail: TailStrategy = tail
            .parse()
            .map_err(|_| a.err(4, "tail", format!("unknown tail strategy '{tail}'")))?;
        self.step(
            "divide_loop",
            rewrites::loops::divide_loop(self.ir(), &path, q, &outer, &inner, tail, perfect),
        )
    }

    pub fn mult_loops<'a>(
        &self,
        nested: impl Into<Loc<'a>>,
        new_iter: &str,
    ) -> Result<Procedure, SchedError> {
        let a = Args::new("mult_loops", self);
        let path = a.nested_loops(1, "nested", &nested.into())?;
        let name = a.ident(2, "new_iter", new_iter)?;
        self.step(
            "mult_loops",
            rewrites::loops::mult_loops(self.ir(), &path, &name),
        )
    }

    pub fn cut_loop<'a>(
        &self,
        loop_: impl Into<Loc<'a>>,
        cut_point: i64,
    ) -> Result<Procedure, SchedError> {
        let a = Args::new("cut_loop", self);
        let path = a.loop_path(1, "loop", &loop_.into())?;
        self.step(
            "cut_loop",
            rewrites::loops::cut_loop(self.ir(), &path, cut_point),
        )
    }

    pub fn reorder_loops<'a>(&self, nested: impl Into<Loc<'a>>) -> Result<Procedure, SchedError> {
        let a = Args::new("reorder_loops", self);
        let path = a.nested_loops(1, "nested", &nested.into())?;
        self.step(
            "reorder_loops",
            rewrites::loops::reorder_loops(self.ir(), &path),
        )
    }

    pub fn fuse<'a, 'b>(
        &self,
        first: impl Into<Loc<'a>>,
        second: impl Into<Loc<'b>>,
    ) -> Result<Procedure, SchedError> {
        let a = Args::new("fuse", self);
        let p1 = a.any_stmt_path(1, "stmt1", &first.into())?;
        let p2 = a.any_stmt_path(2, "stmt2", &second.into())?;
        self.step("fuse", rewrites::loops::fuse(self.ir(), &p1, &p2))
    }

    pub fn fission(&self, gap: &Cursor, n_lifts: i64) -> Result<Procedure, SchedError> {
        let a = Args::new("fission", self);
        let (parent, kind, at) = a.gap(1, "gap", &Loc::Cur(gap))?;
        let n = a.pos_int(2, "n_lifts", n_lifts)?;
        self.step(
            "fission",
            rewrites::loops::fission(self.ir(), &parent, kind, at, n as usize, false),
        )
    }

    /// Fission that also drops the empty loop halves it would create.
    pub fn autofission(&self, gap: &Cursor, n_lifts: i64) -> Result<Procedure, SchedError> {
        let a = Args::new("autofission", self);
        let (parent, kind, at) = a.gap(1, "gap", &Loc::Cur(gap))?;
        let n = a.pos_int(2, "n_lifts", n_lifts)?;
        self.step(
            "autofission",
            rewrites::loops::fission(self.ir(), &parent, kind, at, n as usize, true),
        )
    }

    pub fn remove_loop<'a>(&self, loop_: impl Into<Loc<'a>>) -> Result<Procedure, SchedError> {
        let a = Args::new("remove_loop", self);
        let path = a.loop_path(1, "loop", &loop_.into())?;
        self.step("remove_loop", rewrites::loops::remove_loop(self.ir(), &path))
    }

    pub fn add_loop<'a>(
        &self,
        block: impl Into<Loc<'a>>,
        iter_name: &str,
        hi: &str,
        guard: bool,
    ) -> Result<Procedure, SchedError> {
        self.add_loop_of_kind(block, iter_name, hi, guard, "seq")
    }

    /// `add_loop` with an explicit loop kind; `"par"` introduces a
    /// parallel loop and must discharge write-disjointness.
    pub fn add_loop_of_kind<'a>(
        &self,
        block: impl Into<Loc<'a>>,
        iter_name: &str,
        hi: &str,
        guard: bool,
        loop_kind: &str,
    ) -> Result<Procedure, SchedError> {
        let a = Args::new("add_loop", self);
        let (parent, kind, lo, hi_idx) = a.block(1, "block", &block.into(), None)?;
        let name = a.ident(2, "iter_name", iter_name)?;
        let ctx = Self::block_ctx(&parent, kind, lo);
        let bound = fragment::parse_expr(self.ir(), &ctx, hi, &[])
            .map_err(|e| a.err(3, "hi", e.to_string()))?;
        let loop_kind = match loop_kind {
            "seq" => LoopKind::Seq,
            "par" => LoopKind::Par,
            other => {
                return Err(a.err(
                    5,
                    "loop_kind",
                    format!("expected 'seq' or 'par', got '{other}'"),
                ))
            }
        };
        self.step(
            "add_loop",
            rewrites::loops::add_loop(
                self.ir(),
                &parent,
                kind,
                lo,
                hi_idx,
                &name,
                bound,
                guard,
                loop_kind,
            ),
        )
    }

    pub fn unroll_loop<'a>(&self, loop_: impl Into<Loc<'a>>) -> Result<Procedure, SchedError> {
        let a = Args::new("unroll_loop", self);
        let path = a.loop_path(1, "loop", &loop_.into())?;
        self.step("unroll_loop", rewrites::loops::unroll_loop(self.ir(), &path))
    }

    pub fn lift_scope<'a>(&self, stmt: impl Into<Loc<'a>>) -> Result<Procedure, SchedError> {
        let a = Args::new("lift_scope", self);
        let path = a.any_stmt_path(1, "stmt", &stmt.into())?;
        self.step("lift_scope", rewrites::loops::lift_scope(self.ir(), &path))
    }

    // ---------------------------------------------------------------- //
    // guards

    pub fn specialize<'a>(
        &self,
        block: impl Into<Loc<'a>>,
        conds: &[&str],
    ) -> Result<Procedure, SchedError> {
        let a = Args::new("specialize", self);
        let (parent, kind, lo, hi) = a.block(1, "block", &block.into(), None)?;
        let ctx = Self::block_ctx(&parent, kind, lo);
        let conds = conds
            .iter()
            .map(|src| {
                fragment::parse_expr(self.ir(), &ctx, src, &[])
                    .map_err(|e| a.err(2, "conds", e.to_string()))
            })
            .collect::<Result<Vec<Expr>, SchedError>>()?;
        self.step(
            "specialize",
            rewrites::guards::specialize(self.ir(), &parent, kind, lo, hi, &conds),
        )
    }

    pub fn assert_if<'a>(
        &self,
        if_stmt: impl Into<Loc<'a>>,
        cond: bool,
    ) -> Result<Procedure, SchedError> {
        let a = Args::new("assert_if", self);
        let path = a.any_stmt_path(1, "if", &if_stmt.into())?;
        self.step(
            "assert_if",
            rewrites::guards::assert_if(self.ir(), &path, cond),
        )
    }

    pub fn merge_writes<'a>(&self, block: impl Into<Loc<'a>>) -> Result<Procedure, SchedError> {
        let a = Args::new("merge_writes", self);
        let (parent, kind, lo, hi) = a.block(1, "block", &block.into(), Some(2))?;
        self.step(
            "merge_writes",
            rewrites::guards::merge_writes(self.ir(), &parent, kind, lo, hi),
        )
    }

    pub fn lift_reduce_constant<'a>(
        &self,
        block: impl Into<Loc<'a>>,
    ) -> Result<Procedure, SchedError> {
        let a = Args::new("lift_reduce_constant", self);
        let (parent, kind, lo, hi) = a.block(1, "block", &block.into(), Some(2))?;
        self.step(
            "lift_reduce_constant",
            rewrites::guards::lift_reduce_constant(self.ir(), &parent, kind, lo, hi),
        )
    }
}

/// Equality up to configuration writes: strip every `WriteConfig` from
/// both bodies and compare the rendered procedures.
fn equal_mod_config(a: &Proc, b: &Proc) -> bool {
    fn strip(p: &Proc) -> Proc {
        let body = map_stmts(&p.body, &mut |s| {
            if matches!(s.data, StmtKind::WriteConfig { .. }) {
                VisitAction::Replace(vec![])
            } else {
                VisitAction::VisitChildren
            }
        });
        Proc {
            name: String::new(),
            body,
            ..p.clone()
        }
    }
    if a.args.len() != b.args.len() {
        return false;
    }
    crate::fmt::proc_to_string(&strip(a)) == crate::fmt::proc_to_string(&strip(b))
}

impl fmt::Display for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", crate::fmt::proc_to_string(self.ir()))
    }
}

impl fmt::Debug for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Procedure({})", self.name())
    }
}
