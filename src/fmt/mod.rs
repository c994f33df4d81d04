//! Rendering of LoopIR back to a stable surface syntax.
//!
//! Tests compare rewrite results against these renderings, so the output
//! format is part of the crate's contract: one statement per line, 4-space
//! indentation, `seq`/`par` loop headers, `@` memory annotations.

use pretty::RcDoc;

use crate::ir::expr::{BinOp, Expr, ExprKind, Value, WAccess};
use crate::ir::proc::Proc;
use crate::ir::stmt::{LoopKind, Stmt, StmtKind};
use crate::ir::types::LoopType;

const INDENT: isize = 4;
const WIDTH: usize = 100;

type Doc = RcDoc<'static, ()>;

fn text(s: impl Into<String>) -> Doc {
    RcDoc::text(s.into())
}

fn commas(items: impl IntoIterator<Item = Doc>) -> Doc {
    RcDoc::intersperse(items, text(", "))
}

fn scalar_name(ty: &LoopType) -> &'static str {
    match ty {
        LoopType::R => "R",
        LoopType::F32 => "f32",
        LoopType::F64 => "f64",
        LoopType::I8 => "i8",
        LoopType::I32 => "i32",
        LoopType::Bool => "bool",
        LoopType::Index => "index",
        LoopType::Size => "size",
        LoopType::Stride => "stride",
        LoopType::Tensor { .. } => unreachable!("tensor has no scalar name"),
    }
}

pub fn type_to_doc(ty: &LoopType) -> Doc {
    match ty {
        LoopType::Tensor {
            elem,
            dims,
            is_window,
        } => {
            let inner = text(scalar_name(elem))
                .append(text("["))
                .append(commas(dims.iter().map(expr_to_doc)))
                .append(text("]"));
            if *is_window {
                text("[").append(inner).append(text("]"))
            } else {
                inner
            }
        }
        t => text(scalar_name(t)),
    }
}

fn prec(op: BinOp) -> u8 {
    match op {
        BinOp::Or => 1,
        BinOp::And => 2,
        BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge | BinOp::Eq => 3,
        BinOp::Add | BinOp::Sub => 4,
        BinOp::Mul | BinOp::Div | BinOp::Mod => 5,
    }
}

fn expr_doc_prec(e: &Expr, outer: u8) -> Doc {
    match &e.data {
        ExprKind::Read { name, idx } => {
            if idx.is_empty() {
                text(name.name().to_string())
            } else {
                text(name.name().to_string())
                    .append(text("["))
                    .append(commas(idx.iter().map(expr_to_doc)))
                    .append(text("]"))
            }
        }
        ExprKind::Const(v) => match v {
            Value::Bool(b) => text(if *b { "True" } else { "False" }),
            Value::Int(i) => text(i.to_string()),
            Value::Float(f) => text(format!("{f:?}")),
        },
        ExprKind::USub { arg } => text("-").append(expr_doc_prec(arg, 6)),
        ExprKind::BinOp { op, lhs, rhs } => {
            let p = prec(*op);
            let doc = expr_doc_prec(lhs, p)
                .append(text(format!(" {op} ")))
                .append(expr_doc_prec(rhs, p + 1));
            if p < outer {
                text("(").append(doc).append(text(")"))
            } else {
                doc
            }
        }
        ExprKind::BuiltIn { f, args } => text(f.to_string())
            .append(text("("))
            .append(commas(args.iter().map(expr_to_doc)))
            .append(text(")")),
        ExprKind::WindowExpr { name, idx } => {
            let coords = idx.iter().map(|w| match w {
                WAccess::Point(p) => expr_to_doc(p),
                WAccess::Interval(lo, hi) => expr_to_doc(lo)
                    .append(text(":"))
                    .append(expr_to_doc(hi)),
            });
            text(name.name().to_string())
                .append(text("["))
                .append(commas(coords))
                .append(text("]"))
        }
        ExprKind::StrideExpr { name, dim } => text(format!("stride({}, {dim})", name.name())),
        ExprKind::ReadConfig { config, field } => text(format!("{}.{field}", config.name())),
    }
}

pub fn expr_to_doc(e: &Expr) -> Doc {
    expr_doc_prec(e, 0)
}

fn lhs_doc(name: &str, idx: &[Expr]) -> Doc {
    if idx.is_empty() {
        text(name.to_string())
    } else {
        text(name.to_string())
            .append(text("["))
            .append(commas(idx.iter().map(expr_to_doc)))
            .append(text("]"))
    }
}

fn block_to_doc(stmts: &[Stmt]) -> Doc {
    RcDoc::hardline()
        .append(RcDoc::intersperse(
            stmts.iter().map(stmt_to_doc),
            RcDoc::hardline(),
        ))
        .nest(INDENT)
}

pub fn stmt_to_doc(s: &Stmt) -> Doc {
    match &s.data {
        StmtKind::Assign { name, idx, rhs, .. } => lhs_doc(name.name(), idx)
            .append(text(" = "))
            .append(expr_to_doc(rhs)),
        StmtKind::Reduce { name, idx, rhs, .. } => lhs_doc(name.name(), idx)
            .append(text(" += "))
            .append(expr_to_doc(rhs)),
        StmtKind::WriteConfig { config, field, rhs } => {
            text(format!("{}.{field} = ", config.name())).append(expr_to_doc(rhs))
        }
        StmtKind::Pass => text("pass"),
        StmtKind::If { cond, body, orelse } => {
            let doc = text("if ")
                .append(expr_to_doc(cond))
                .append(text(":"))
                .append(block_to_doc(body));
            if orelse.is_empty() {
                doc
            } else {
                doc.append(RcDoc::hardline())
                    .append(text("else:"))
                    .append(block_to_doc(orelse))
            }
        }
        StmtKind::For {
            iter,
            hi,
            body,
            kind,
        } => {
            let header = match kind {
                LoopKind::Seq => "seq",
                LoopKind::Par => "par",
            };
            text(format!("for {} in {header}(0, ", iter.name()))
                .append(expr_to_doc(hi))
                .append(text("):"))
                .append(block_to_doc(body))
        }
        StmtKind::Alloc { name, ty, mem } => {
            let doc = text(format!("{} : ", name.name())).append(type_to_doc(ty));
            match mem {
                Some(m) => doc.append(text(format!(" @ {m}"))),
                None => doc,
            }
        }
        StmtKind::Free { name, .. } => text(format!("free({})", name.name())),
        StmtKind::Call { f, args } => text(f.name.clone())
            .append(text("("))
            .append(commas(args.iter().map(expr_to_doc)))
            .append(text(")")),
        StmtKind::WindowStmt { name, rhs } => {
            text(format!("{} = ", name.name())).append(expr_to_doc(rhs))
        }
    }
}

pub fn proc_to_doc(p: &Proc) -> Doc {
    let args = p.args.iter().map(|a| {
        let doc = text(format!("{}: ", a.name.name())).append(type_to_doc(&a.ty));
        match &a.mem {
            Some(m) => doc.append(text(format!(" @ {m}"))),
            None => doc,
        }
    });
    let mut doc = text(format!("def {}(", p.name))
        .append(commas(args))
        .append(text("):"));
    for pred in &p.preds {
        doc = doc.append(
            RcDoc::hardline()
                .append(text("assert ").append(expr_to_doc(pred)))
                .nest(INDENT),
        );
    }
    doc.append(block_to_doc(&p.body))
}

fn render(doc: Doc) -> String {
    let mut out = String::new();
    doc.render_fmt(WIDTH, &mut out)
        .expect("rendering to a String cannot fail");
    out
}

pub fn proc_to_string(p: &Proc) -> String {
    render(proc_to_doc(p))
}

pub fn stmt_to_string(s: &Stmt) -> String {
    render(stmt_to_doc(s))
}

pub fn expr_to_string(e: &Expr) -> String {
    render(expr_to_doc(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::build::*;
    use crate::ir::sym::SymGen;
    use crate::ir::{LoopType, Proc, ProcArg, SrcInfo};
    use indoc::indoc;

    #[test]
    fn renders_a_loop_nest() {
        let mut r#gen = SymGen::starting_at(1);
        let n = r#gen.fresh("n");
        let x = r#gen.fresh("x");
        let i = r#gen.fresh("i");
        let proc = Proc {
            name: "zero".to_string(),
            args: vec![
                ProcArg {
                    name: n.clone(),
                    ty: LoopType::Size,
                    mem: None,
                    srcinfo: SrcInfo::default(),
                },
                ProcArg {
                    name: x.clone(),
                    ty: tensor(LoopType::F32, vec![read(&n, LoopType::Size)]),
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
                    LoopType::F32,
                    vec![read(&i, LoopType::Index)],
                    float(0.0),
                )],
            )],
            instr: None,
            srcinfo: SrcInfo::default(),
        };
        assert_eq!(
            proc_to_string(&proc),
            indoc! {"
                def zero(n: size, x: f32[n]):
                    for i in seq(0, n):
                        x[i] = 0.0"}
        );
    }

    #[test]
    fn parenthesizes_by_precedence() {
        let e = mul(add(int(1), int(2)), int(3));
        assert_eq!(expr_to_string(&e), "(1 + 2) * 3");
        let e = add(int(1), mul(int(2), int(3)));
        assert_eq!(expr_to_string(&e), "1 + 2 * 3");
    }
}
