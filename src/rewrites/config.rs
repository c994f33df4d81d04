//! Configuration-state binding rewrites.

use std::rc::Rc;

use crate::config::Config;
use crate::cursors::{resolve_expr, update_expr, BlockKind, CursorPath, ForwardingMap};
use crate::ir::expr::{Expr, ExprKind};
use crate::ir::proc::Proc;
use crate::ir::stmt::{map_own_exprs, Stmt, StmtKind};
use crate::ir::sym::Sym;

use super::{list_at, list_pos, splice, RewriteError, RewriteResult};

fn field_type(config: &Rc<Config>, field: &str) -> Result<crate::ir::LoopType, RewriteError> {
    config
        .lookup(field)
        .cloned()
        .ok_or_else(|| {
            RewriteError::precondition(format!(
                "config '{}' has no field '{field}'",
                config.name()
            ))
        })
}

/// Bind the control expression at `expr_path` (a bare read) into
/// `config.field`: write the config immediately before the enclosing
/// statement, then replace occurrences of the same read up to the next
/// write of the variable.
pub fn bind_config(
    proc: &Proc,
    expr_path: &CursorPath,
    config: &Rc<Config>,
    field: &str,
) -> RewriteResult {
    let e = resolve_expr(proc, expr_path).ok_or(RewriteError::BadCursor)?;
    let var = e
        .as_bare_read()
        .ok_or_else(|| {
            RewriteError::precondition("bind_config expects a bare variable read")
        })?
        .clone();
    let fty = field_type(config, field)?;
    if fty != e.ty {
        return Err(RewriteError::precondition(format!(
            "type of '{var}' does not match {}.{field}",
            config.name()
        )));
    }

    // the enclosing statement in whose preceding gap the write lands
    let stmt_len = expr_path
        .0
        .iter()
        .take_while(|edge| edge.block_index().is_some())
        .count();
    let stmt_path = CursorPath(expr_path.0[..stmt_len].to_vec());
    let (parent, kind, at) = list_pos(&stmt_path)?;

    let write = Stmt::new(StmtKind::WriteConfig {
        config: config.clone(),
        field: field.to_string(),
        rhs: e.clone(),
    })
    .with_srcinfo(e.srcinfo.clone());

    let read_cfg = Expr::new(
        ExprKind::ReadConfig {
            config: config.clone(),
            field: field.to_string(),
        },
        fty,
    );

    // rewrite occurrences from the enclosing statement onward, stopping
    // at the next write of the variable
    let list = list_at(proc, &parent, kind)?;
    let mut new_tail = Vec::with_capacity(list.len() - at);
    let mut stopped = false;
    for s in &list[at..] {
        if stopped {
            new_tail.push(s.clone());
            continue;
        }
        let rewritten = substitute_read(s, &var, &read_cfg);
        if writes_var(s, &var) {
            stopped = true;
        }
        new_tail.push(rewritten);
    }

    let mut replacement = vec![write];
    replacement.extend(new_tail);
    let len = list.len();
    let (new, _) = splice(proc, &parent, kind, at, len, replacement)?;
    let fwd = ForwardingMap::identity().spliced(parent, kind, at, 0, 1);
    Ok((new, fwd))
}

fn substitute_read(s: &Stmt, var: &Sym, repl: &Expr) -> Stmt {
    let subst = |e: &Expr| {
        e.map(&|e| match &e.data {
            ExprKind::Read { name, idx } if name == var && idx.is_empty() => {
                repl.clone().with_srcinfo(e.srcinfo.clone())
            }
            _ => e,
        })
    };
    let s = map_own_exprs(s, &subst);
    let data = match s.data {
        StmtKind::If { cond, body, orelse } => StmtKind::If {
            cond,
            body: body.iter().map(|c| substitute_read(c, var, repl)).collect(),
            orelse: orelse
                .iter()
                .map(|c| substitute_read(c, var, repl))
                .collect(),
        },
        StmtKind::For {
            iter,
            hi,
            body,
            kind,
        } => StmtKind::For {
            iter,
            hi,
            body: body.iter().map(|c| substitute_read(c, var, repl)).collect(),
            kind,
        },
        other => other,
    };
    Stmt {
        data,
        srcinfo: s.srcinfo,
    }
}

fn writes_var(s: &Stmt, var: &Sym) -> bool {
    let mut found = false;
    s.walk(&mut |s| match &s.data {
        StmtKind::Assign { name, .. } | StmtKind::Reduce { name, .. } if name == var => {
            found = true
        }
        _ => {}
    });
    found
}

/// Delete a `WriteConfig` that is dead on the configuration channel: no
/// later read of the same field reaches it.
pub fn delete_config(proc: &Proc, stmt_path: &CursorPath) -> RewriteResult {
    let (config, field) = match &super::stmt_at(proc, stmt_path)?.data {
        StmtKind::WriteConfig { config, field, .. } => (config.clone(), field.clone()),
        _ => {
            return Err(RewriteError::precondition(
                "cursor does not point at a config write",
            ))
        }
    };

    if config_read_after(proc, stmt_path, config.name(), &field) {
        return Err(RewriteError::precondition(format!(
            "{}.{field} is read after this write",
            config.name()
        )));
    }

    let (parent, kind, at) = list_pos(stmt_path)?;
    let (new, _) = splice(proc, &parent, kind, at, at + 1, vec![])?;
    let fwd = ForwardingMap::identity()
        .tombstone(stmt_path.clone())
        .spliced(parent, kind, at, 1, 0);
    Ok((new, fwd))
}

/// Any read of `cfg.field` at a point reachable after `path`?
fn config_read_after(proc: &Proc, path: &CursorPath, cfg: &str, field: &str) -> bool {
    fn reads_field(s: &Stmt, cfg: &str, field: &str) -> bool {
        let mut found = false;
        s.walk(&mut |s| {
            s.own_exprs(&mut |e| {
                e.walk(&mut |e| {
                    if let ExprKind::ReadConfig { config, field: f } = &e.data
                        && config.name() == cfg
                        && f == field
                    {
                        found = true;
                    }
                })
            })
        });
        found
    }

    let mut cursor = path.clone();
    loop {
        let Some((parent, last)) = cursor.parent() else {
            return false;
        };
        if let Some((kind, i)) = last.block_index()
            && let Some(list) = crate::cursors::resolve_stmt_list(proc, &parent, kind)
        {
            for s in &list[(i + 1).min(list.len())..] {
                if reads_field(s, cfg, field) {
                    return true;
                }
            }
        }
        // a surrounding loop re-enters the write's scope
        if !parent.0.is_empty()
            && let Some(s) = crate::cursors::resolve_stmt(proc, &parent)
            && matches!(s.data, StmtKind::For { .. })
            && reads_field(s, cfg, field)
        {
            return true;
        }
        cursor = parent;
    }
}

/// Inject a `WriteConfig` at a gap.
pub fn write_config(
    proc: &Proc,
    parent: &CursorPath,
    kind: BlockKind,
    at: usize,
    config: &Rc<Config>,
    field: &str,
    rhs: Expr,
) -> RewriteResult {
    let fty = field_type(config, field)?;
    if fty != rhs.ty {
        return Err(RewriteError::precondition(format!(
            "right-hand side type does not match {}.{field}",
            config.name()
        )));
    }
    let list = list_at(proc, parent, kind)?;
    if at > list.len() {
        return Err(RewriteError::BadCursor);
    }
    splice(
        proc,
        parent,
        kind,
        at,
        at,
        vec![Stmt::new(StmtKind::WriteConfig {
            config: config.clone(),
            field: field.to_string(),
            rhs,
        })],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursors::Edge;
    use crate::ir::build::*;
    use crate::ir::sym::SymGen;
    use crate::ir::types::LoopType;
    use crate::ir::{ProcArg, SrcInfo};

    fn prec_cfg() -> Rc<Config> {
        Config::new("prec_cfg", [("p".to_string(), LoopType::Index)])
    }

    /// for i in seq(0, n): x[i] = R-read of p  (control var p: index arg)
    fn sample() -> (Proc, Sym) {
        let mut r#gen = SymGen::starting_at(1);
        let n = r#gen.fresh("n");
        let p_var = r#gen.fresh("p");
        let x = r#gen.fresh("x");
        let i = r#gen.fresh("i");
        let proc = Proc {
            name: "t".to_string(),
            args: vec![
                ProcArg {
                    name: n.clone(),
                    ty: LoopType::Size,
                    mem: None,
                    srcinfo: SrcInfo::default(),
                },
                ProcArg {
                    name: p_var.clone(),
                    ty: LoopType::Index,
                    mem: None,
                    srcinfo: SrcInfo::default(),
                },
                ProcArg {
                    name: x.clone(),
                    ty: tensor(LoopType::I32, vec![read(&n, LoopType::Size)]),
                    mem: None,
                    srcinfo: SrcInfo::default(),
                },
            ],
            preds: vec![],
            body: vec![seq_for(
                &i,
                read(&n, LoopType::Size),
                vec![assign(
                    &x,
                    LoopType::I32,
                    vec![read(&i, LoopType::Index)],
                    read(&p_var, LoopType::Index),
                )],
            )],
            instr: None,
            srcinfo: SrcInfo::default(),
        };
        (proc, p_var)
    }

    #[test]
    fn bind_config_inserts_write_and_rewrites_reads() {
        let (proc, _) = sample();
        let cfg = prec_cfg();
        // cursor to the read of p inside the loop body assignment
        let path = CursorPath(vec![Edge::Body(0), Edge::Body(0), Edge::Rhs]);
        let (p2, _) = bind_config(&proc, &path, &cfg, "p").unwrap();
        // the write lands immediately before the enclosing assignment
        let (body, _) = p2.body[0].child_blocks();
        assert!(matches!(body[0].data, StmtKind::WriteConfig { .. }));
        let mut saw_read_cfg = false;
        p2.walk_stmts(&mut |s| {
            if let StmtKind::Assign { rhs, .. } = &s.data
                && matches!(rhs.data, ExprKind::ReadConfig { .. })
            {
                saw_read_cfg = true;
            }
        });
        assert!(saw_read_cfg);
    }

    #[test]
    fn delete_config_requires_dead_channel() {
        let (proc, _) = sample();
        let cfg = prec_cfg();
        let path = CursorPath(vec![Edge::Body(0), Edge::Body(0), Edge::Rhs]);
        let (p2, _) = bind_config(&proc, &path, &cfg, "p").unwrap();
        // the assignment after the write reads prec_cfg.p, so deletion fails
        let write_path = CursorPath(vec![Edge::Body(0), Edge::Body(0)]);
        assert!(delete_config(&p2, &write_path).is_err());
    }
}
