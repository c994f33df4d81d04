//! Procedure- and buffer-level annotation rewrites.

use crate::cursors::{CursorPath, ForwardingMap};
use crate::ir::proc::Proc;
use crate::ir::stmt::StmtKind;
use crate::ir::sym::Sym;
use crate::ir::typecheck::retype;
use crate::ir::types::LoopType;
use crate::memory::Memory;

use super::{stmt_at, RewriteError, RewriteResult};

/// Replace the procedure name.
pub fn rename(proc: &Proc, name: &str) -> RewriteResult {
    if !name.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
        return Err(RewriteError::precondition(format!(
            "'{name}' is not a valid procedure name"
        )));
    }
    Ok((
        Proc {
            name: name.to_string(),
            ..proc.clone()
        },
        ForwardingMap::identity(),
    ))
}

/// Attach instruction-format metadata; the engine carries it opaquely.
pub fn make_instr(proc: &Proc, instr: &str) -> RewriteResult {
    Ok((
        Proc {
            instr: Some(instr.to_string()),
            ..proc.clone()
        },
        ForwardingMap::identity(),
    ))
}

fn update_decl(
    proc: &Proc,
    buf: &Sym,
    f: impl Fn(&LoopType, &Option<Memory>) -> (LoopType, Option<Memory>),
) -> Result<Proc, RewriteError> {
    let mut found = false;
    let mut new = proc.clone();
    for arg in &mut new.args {
        if &arg.name == buf {
            let (ty, mem) = f(&arg.ty, &arg.mem);
            arg.ty = ty;
            arg.mem = mem;
            found = true;
        }
    }
    if !found {
        fn walk_block(
            stmts: &mut [crate::ir::Stmt],
            buf: &Sym,
            found: &mut bool,
            f: &impl Fn(&LoopType, &Option<Memory>) -> (LoopType, Option<Memory>),
        ) {
            for s in stmts {
                match &mut s.data {
                    StmtKind::Alloc { name, ty, mem } if name == buf => {
                        let (nty, nmem) = f(ty, mem);
                        *ty = nty;
                        *mem = nmem;
                        *found = true;
                    }
                    StmtKind::If { body, orelse, .. } => {
                        walk_block(body, buf, found, f);
                        walk_block(orelse, buf, found, f);
                    }
                    StmtKind::For { body, .. } => walk_block(body, buf, found, f),
                    _ => {}
                }
            }
        }
        walk_block(&mut new.body, buf, &mut found, &f);
    }
    if !found {
        return Err(RewriteError::precondition(format!(
            "no argument or allocation named '{buf}'"
        )));
    }
    Ok(new)
}

/// Change the declared base type of a buffer and re-typecheck.
pub fn set_precision(proc: &Proc, buf: &Sym, ty: LoopType) -> RewriteResult {
    if !ty.is_real_scalar() {
        return Err(RewriteError::precondition(format!(
            "'{ty:?}' is not a real scalar type"
        )));
    }
    let new = update_decl(proc, buf, |old, mem| (old.with_base(ty.clone()), mem.clone()))?;
    let new = retype(&new)?;
    Ok((new, ForwardingMap::identity()))
}

/// Set or clear the window flag of a buffer declaration and re-typecheck.
pub fn set_window(proc: &Proc, buf: &Sym, is_window: bool) -> RewriteResult {
    let new = update_decl(proc, buf, |old, mem| {
        (old.with_window(is_window), mem.clone())
    })?;
    let new = retype(&new)?;
    Ok((new, ForwardingMap::identity()))
}

/// Record a memory-space annotation on a buffer declaration.
pub fn set_memory(proc: &Proc, buf: &Sym, mem: Memory) -> RewriteResult {
    let new = update_decl(proc, buf, |old, _| (old.clone(), Some(mem.clone())))?;
    Ok((new, ForwardingMap::identity()))
}

/// Resolve an allocation cursor to its symbol.
pub fn alloc_sym(proc: &Proc, path: &CursorPath) -> Result<(Sym, LoopType), RewriteError> {
    match &stmt_at(proc, path)?.data {
        StmtKind::Alloc { name, ty, .. } => Ok((name.clone(), ty.clone())),
        _ => Err(RewriteError::precondition(
            "cursor does not point at an allocation",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::build::*;
    use crate::ir::sym::SymGen;
    use crate::ir::SrcInfo;

    #[test]
    fn set_precision_retypes_accesses() {
        let mut r#gen = SymGen::starting_at(1);
        let x = r#gen.fresh("x");
        let y = r#gen.fresh("y");
        let p = Proc {
            name: "t".to_string(),
            args: vec![],
            preds: vec![],
            body: vec![
                alloc(&x, tensor(LoopType::R, vec![int(4)])),
                alloc(&y, LoopType::R),
                assign(
                    &y,
                    LoopType::R,
                    vec![],
                    read_idx(&x, LoopType::R, vec![int(0)]),
                ),
            ],
            instr: None,
            srcinfo: SrcInfo::default(),
        };
        let (p2, _) = set_precision(&p, &x, LoopType::F32).unwrap();
        match &p2.body[2].data {
            StmtKind::Assign { rhs, .. } => assert_eq!(rhs.ty, LoopType::F32),
            _ => panic!("expected assign"),
        }
    }

    #[test]
    fn set_precision_rejects_index_types() {
        let mut r#gen = SymGen::starting_at(1);
        let x = r#gen.fresh("x");
        let p = Proc {
            name: "t".to_string(),
            args: vec![],
            preds: vec![],
            body: vec![alloc(&x, LoopType::R)],
            instr: None,
            srcinfo: SrcInfo::default(),
        };
        assert!(set_precision(&p, &x, LoopType::Index).is_err());
    }
}
