//! Value binding: introduce a scalar buffer for a (repeated) expression.

use log::debug;

use crate::analysis::effects::Effects;
use crate::cursors::{
    resolve_expr, update_expr, CursorPath, Edge, ForwardingMap,
};
use crate::fmt;
use crate::ir::build::{alloc, assign, read};
use crate::ir::expr::Expr;
use crate::ir::proc::Proc;
use crate::ir::stmt::Stmt;
use crate::ir::sym::SymGen;

use super::{list_at, list_pos, RewriteError, RewriteResult};

fn stmt_prefix(path: &CursorPath) -> CursorPath {
    let n = path
        .0
        .iter()
        .take_while(|e| e.block_index().is_some())
        .count();
    CursorPath(path.0[..n].to_vec())
}

/// Buffers whose current value the expression depends on.
fn dependencies(e: &Expr) -> Vec<crate::ir::Sym> {
    let mut deps = Vec::new();
    e.walk(&mut |e| {
        if let crate::ir::ExprKind::Read { name, .. } = &e.data
            && !deps.contains(name)
        {
            deps.push(name.clone());
        }
    });
    deps
}

/// Bind the expression occurrences to a fresh scalar buffer `new_name`,
/// assigned immediately before the first occurrence's statement. With
/// `cse`, all later syntactically identical occurrences that still see
/// the same state are substituted as well.
pub fn bind_expr(
    proc: &Proc,
    expr_paths: &[CursorPath],
    new_name: &str,
    cse: bool,
) -> RewriteResult {
    let first = expr_paths.first().ok_or(RewriteError::BadCursor)?;
    let expr = resolve_expr(proc, first)
        .ok_or(RewriteError::BadCursor)?
        .clone();
    if !expr.ty.is_real_scalar() {
        return Err(RewriteError::precondition(
            "bind_expr applies to real-scalar expressions",
        ));
    }
    let rendered = fmt::expr_to_string(&expr);
    for p in expr_paths {
        let e = resolve_expr(proc, p).ok_or(RewriteError::BadCursor)?;
        if fmt::expr_to_string(e) != rendered {
            return Err(RewriteError::precondition(format!(
                "'{}' differs from '{rendered}'",
                fmt::expr_to_string(e)
            )));
        }
    }

    let anchor = stmt_prefix(first);
    let (parent, kind, at) = list_pos(&anchor)?;
    let list = list_at(proc, &parent, kind)?;
    let deps = dependencies(&expr);

    // collect substitution targets
    let mut targets: Vec<CursorPath> = Vec::new();
    if cse {
        // walk statements from the anchor onward; stop at the first one
        // that writes a dependency
        'outer: for (i, s) in list.iter().enumerate().skip(at) {
            let path = parent.child(kind.edge(i));
            collect_occurrences(s, &path, &rendered, &mut targets);
            let eff = Effects::of_stmt(s);
            for d in &deps {
                if eff.writes(d) {
                    break 'outer;
                }
            }
        }
    } else {
        // explicit occurrence list: each must live in the anchor's block
        // at or after the anchor, with no dependency write in between
        for p in expr_paths {
            if !p.starts_with(&parent) {
                return Err(RewriteError::precondition(
                    "occurrences must share the first occurrence's block",
                ));
            }
            let Some((k, i)) = p.0.get(parent.0.len()).and_then(Edge::block_index) else {
                return Err(RewriteError::BadCursor);
            };
            if k != kind || i < at {
                return Err(RewriteError::precondition(
                    "occurrences must not precede the binding point",
                ));
            }
            for s in &list[at..i] {
                let eff = Effects::of_stmt(s);
                for d in &deps {
                    if eff.writes(d) {
                        return Err(RewriteError::precondition(format!(
                            "'{d}' is written between the binding point and a bound occurrence"
                        )));
                    }
                }
            }
            targets.push(p.clone());
        }
    }
    debug!("bind_expr '{rendered}' -> {new_name}: {} occurrences", targets.len());

    let mut r#gen = SymGen::for_proc(proc);
    let sym = r#gen.fresh(new_name);

    let mut current = proc.clone();
    for p in &targets {
        let replacement = read(&sym, expr.ty.clone());
        current = update_expr(&current, p, |old| {
            replacement.with_srcinfo(old.srcinfo.clone())
        })
        .ok_or(RewriteError::BadCursor)?;
    }

    let decl = alloc(&sym, expr.ty.clone());
    let init = assign(&sym, expr.ty.clone(), vec![], expr.clone())
        .with_srcinfo(expr.srcinfo.clone());
    let new = crate::cursors::splice_stmts(&current, &parent, kind, at, at, vec![decl, init])
        .ok_or(RewriteError::BadCursor)?;
    let fwd = ForwardingMap::identity().spliced(parent, kind, at, 0, 2);
    Ok((new, fwd))
}

fn collect_occurrences(
    s: &Stmt,
    path: &CursorPath,
    rendered: &str,
    out: &mut Vec<CursorPath>,
) {
    fn walk_expr(e: &Expr, path: &CursorPath, rendered: &str, out: &mut Vec<CursorPath>) {
        if fmt::expr_to_string(e) == rendered {
            out.push(path.clone());
            return;
        }
        for (edge, child) in crate::pattern::matcher::expr_child_edges(e) {
            walk_expr(child, &path.child(edge), rendered, out);
        }
    }
    for (edge, e) in crate::pattern::matcher::own_expr_edges(s) {
        walk_expr(e, &path.child(edge), rendered, out);
    }
    let (body, orelse) = s.child_blocks();
    for (i, child) in body.iter().enumerate() {
        collect_occurrences(child, &path.child(Edge::Body(i)), rendered, out);
    }
    for (i, child) in orelse.iter().enumerate() {
        collect_occurrences(child, &path.child(Edge::Orelse(i)), rendered, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::build::*;
    use crate::ir::sym::SymGen;
    use crate::ir::types::LoopType;
    use crate::ir::{SrcInfo, StmtKind};

    #[test]
    fn binds_single_occurrence_before_statement() {
        let mut r#gen = SymGen::starting_at(1);
        let a = r#gen.fresh("A");
        let c = r#gen.fresh("C");
        let i = r#gen.fresh("i");
        let p = Proc {
            name: "t".to_string(),
            args: vec![],
            preds: vec![],
            body: vec![
                alloc(&a, tensor(LoopType::F32, vec![int(4)])),
                alloc(&c, tensor(LoopType::F32, vec![int(4)])),
                seq_for(
                    &i,
                    int(4),
                    vec![reduce(
                        &c,
                        LoopType::F32,
                        vec![read(&i, LoopType::Index)],
                        read_idx(&a, LoopType::F32, vec![read(&i, LoopType::Index)]),
                    )],
                ),
            ],
            instr: None,
            srcinfo: SrcInfo::default(),
        };
        // bind A[i] inside the loop body
        let path = CursorPath(vec![Edge::Body(2), Edge::Body(0), Edge::Rhs]);
        let (p2, _) = bind_expr(&p, &[path], "A_reg", false).unwrap();
        let (body, _) = p2.body[2].child_blocks();
        assert_eq!(body.len(), 3);
        assert!(matches!(body[0].data, StmtKind::Alloc { .. }));
        assert!(matches!(body[1].data, StmtKind::Assign { .. }));
        match &body[2].data {
            StmtKind::Reduce { rhs, .. } => {
                assert_eq!(crate::fmt::expr_to_string(rhs), "A_reg")
            }
            _ => panic!("expected reduce"),
        }
    }
}
