//! Expression fragments: short user-written expressions compiled in the
//! scope of a cursor position.
//!
//! A fragment like `"n - 4 * jo"` is lexed, parsed, and resolved against
//! the names in scope at the context statement; `_` tokens are holes,
//! filled left-to-right from caller-supplied IR expressions. The result is
//! a typed IR expression.

use std::rc::Rc;

use indexmap::IndexMap;
use logos::{Lexer, Logos};
use thiserror::Error;

use crate::config::Config;
use crate::cursors::CursorPath;
use crate::ir::expr::{BinOp, Expr, ExprKind, Value, WAccess};
use crate::ir::proc::Proc;
use crate::ir::stmt::StmtKind;
use crate::ir::sym::Sym;
use crate::ir::types::LoopType;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
enum Token {
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token(".")]
    Dot,
    #[token("_")]
    Hole,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("==")]
    EqEq,
    #[token("and")]
    And,
    #[token("or")]
    Or,
    #[token("True")]
    True,
    #[token("False")]
    False,
    #[regex(r"[0-9]+\.[0-9]*", float_tok)]
    Float(f64),
    #[regex(r"[0-9]+", int_tok)]
    Int(i64),
    #[regex(r"[A-Za-z][A-Za-z0-9_]*", ident_tok)]
    Ident(String),
}

fn ident_tok(lex: &mut Lexer<Token>) -> String {
    lex.slice().to_owned()
}

fn int_tok(lex: &mut Lexer<Token>) -> Option<i64> {
    lex.slice().parse().ok()
}

fn float_tok(lex: &mut Lexer<Token>) -> Option<f64> {
    lex.slice().parse().ok()
}

#[derive(Debug, Error)]
pub enum FragmentError {
    #[error("unrecognized token in expression")]
    Lex,
    #[error("unexpected end of expression")]
    Eof,
    #[error("unexpected token {0:?}")]
    Unexpected(String),
    #[error("name '{0}' is not in scope here")]
    Unresolved(String),
    #[error("config '{config}' has no field '{field}'")]
    NoSuchField { config: String, field: String },
    #[error("expression has {holes} holes but {given} hole expressions were given")]
    HoleCount { holes: usize, given: usize },
    #[error("'{0}' indexed with {1} coordinates, declared rank is {2}")]
    Arity(String, usize, usize),
    #[error("operands of '{0}' have incompatible types")]
    OperandTypes(BinOp),
    #[error("context statement path does not resolve")]
    BadContext,
    #[error("expected a window expression over a buffer")]
    NotAWindow,
}

/// The names visible at a statement: procedure arguments, enclosing loop
/// iterators, and allocations/window bindings earlier in each enclosing
/// block.
pub fn scope_at(proc: &Proc, path: &CursorPath) -> Result<IndexMap<String, (Sym, LoopType)>, FragmentError> {
    let mut scope: IndexMap<String, (Sym, LoopType)> = IndexMap::new();
    for arg in &proc.args {
        scope.insert(arg.name.name().to_string(), (arg.name.clone(), arg.ty.clone()));
    }

    let stmt_edges: Vec<_> = path
        .0
        .iter()
        .take_while(|e| e.block_index().is_some())
        .cloned()
        .collect();
    if stmt_edges.is_empty() {
        return Err(FragmentError::BadContext);
    }

    let mut list = &proc.body[..];
    for (depth, edge) in stmt_edges.iter().enumerate() {
        let (_, i) = edge.block_index().expect("stmt edge");
        if i > list.len() {
            return Err(FragmentError::BadContext);
        }
        for s in &list[..i.min(list.len())] {
            match &s.data {
                StmtKind::Alloc { name, ty, .. } => {
                    scope.insert(name.name().to_string(), (name.clone(), ty.clone()));
                }
                StmtKind::WindowStmt { name, rhs } => {
                    scope.insert(name.name().to_string(), (name.clone(), rhs.ty.clone()));
                }
                _ => {}
            }
        }
        let s = list.get(i).ok_or(FragmentError::BadContext)?;
        if depth + 1 == stmt_edges.len() {
            break;
        }
        if let StmtKind::For { iter, .. } = &s.data {
            scope.insert(iter.name().to_string(), (iter.clone(), LoopType::Index));
        }
        let (body, orelse) = s.child_blocks();
        let next_kind = stmt_edges[depth + 1]
            .block_index()
            .expect("stmt edge")
            .0;
        list = match next_kind {
            crate::cursors::BlockKind::Body => body,
            crate::cursors::BlockKind::Orelse => orelse,
        };
    }
    Ok(scope)
}

/// Configs referenced anywhere in the procedure, by name.
fn configs_of(proc: &Proc) -> IndexMap<String, Rc<Config>> {
    let mut out = IndexMap::new();
    proc.walk_stmts(&mut |s| {
        if let StmtKind::WriteConfig { config, .. } = &s.data {
            out.insert(config.name().to_string(), config.clone());
        }
        s.own_exprs(&mut |e| {
            e.walk(&mut |e| {
                if let ExprKind::ReadConfig { config, .. } = &e.data {
                    out.insert(config.name().to_string(), config.clone());
                }
            })
        });
    });
    out
}

struct FragParser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    scope: &'a IndexMap<String, (Sym, LoopType)>,
    configs: &'a IndexMap<String, Rc<Config>>,
    holes: &'a [Expr],
    next_hole: usize,
}

impl<'a> FragParser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Result<Token, FragmentError> {
        let t = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or(FragmentError::Eof)?;
        self.pos += 1;
        Ok(t)
    }

    fn expect(&mut self, t: Token) -> Result<(), FragmentError> {
        let got = self.bump()?;
        if got == t {
            Ok(())
        } else {
            Err(FragmentError::Unexpected(format!("{got:?}")))
        }
    }

    fn binop(&self, op: BinOp, lhs: Expr, rhs: Expr) -> Result<Expr, FragmentError> {
        let ty = if op.is_comparison() {
            LoopType::Bool
        } else if op.is_logical() {
            if !lhs.ty.is_bool() || !rhs.ty.is_bool() {
                return Err(FragmentError::OperandTypes(op));
            }
            LoopType::Bool
        } else if lhs.ty.is_indexable() && rhs.ty.is_indexable() {
            LoopType::Index
        } else if lhs.ty == LoopType::R {
            rhs.ty.clone()
        } else if rhs.ty == LoopType::R || lhs.ty == rhs.ty {
            lhs.ty.clone()
        } else {
            return Err(FragmentError::OperandTypes(op));
        };
        Ok(Expr::new(
            ExprKind::BinOp {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            ty,
        ))
    }

    fn atom(&mut self) -> Result<Expr, FragmentError> {
        match self.bump()? {
            Token::Int(v) => Ok(Expr::new(ExprKind::Const(Value::Int(v)), LoopType::Index)),
            Token::Float(v) => Ok(Expr::new(ExprKind::Const(Value::Float(v)), LoopType::R)),
            Token::True => Ok(Expr::new(ExprKind::Const(Value::Bool(true)), LoopType::Bool)),
            Token::False => Ok(Expr::new(
                ExprKind::Const(Value::Bool(false)),
                LoopType::Bool,
            )),
            Token::Hole => {
                let e = self
                    .holes
                    .get(self.next_hole)
                    .cloned()
                    .ok_or(FragmentError::HoleCount {
                        holes: self.next_hole + 1,
                        given: self.holes.len(),
                    })?;
                self.next_hole += 1;
                Ok(e)
            }
            Token::Minus => {
                let arg = self.atom()?;
                let ty = arg.ty.clone();
                Ok(Expr::new(ExprKind::USub { arg: Box::new(arg) }, ty))
            }
            Token::LParen => {
                let e = self.expr(0)?;
                self.expect(Token::RParen)?;
                Ok(e)
            }
            Token::Ident(name) => self.ident_expr(name),
            t => Err(FragmentError::Unexpected(format!("{t:?}"))),
        }
    }

    fn ident_expr(&mut self, name: String) -> Result<Expr, FragmentError> {
        // config field access
        if self.peek() == Some(&Token::Dot) {
            let cfg = self
                .configs
                .get(&name)
                .cloned()
                .ok_or_else(|| FragmentError::Unresolved(name.clone()))?;
            self.bump()?;
            let field = match self.bump()? {
                Token::Ident(f) => f,
                t => return Err(FragmentError::Unexpected(format!("{t:?}"))),
            };
            let ty = cfg
                .lookup(&field)
                .ok_or_else(|| FragmentError::NoSuchField {
                    config: name.clone(),
                    field: field.clone(),
                })?
                .clone();
            return Ok(Expr::new(
                ExprKind::ReadConfig {
                    config: cfg,
                    field,
                },
                ty,
            ));
        }

        let (sym, decl) = self
            .scope
            .get(&name)
            .cloned()
            .ok_or_else(|| FragmentError::Unresolved(name.clone()))?;

        if self.peek() == Some(&Token::LBracket) {
            self.bump()?;
            let mut idx = vec![self.expr(0)?];
            while self.peek() == Some(&Token::Comma) {
                self.bump()?;
                idx.push(self.expr(0)?);
            }
            self.expect(Token::RBracket)?;
            if idx.len() != decl.rank() {
                return Err(FragmentError::Arity(name, idx.len(), decl.rank()));
            }
            return Ok(Expr::new(
                ExprKind::Read {
                    name: sym,
                    idx,
                },
                decl.base().clone(),
            ));
        }

        Ok(Expr::new(
            ExprKind::Read {
                name: sym,
                idx: vec![],
            },
            decl,
        ))
    }

    /// Precedence climbing; levels match the pretty-printer.
    fn expr(&mut self, min_prec: u8) -> Result<Expr, FragmentError> {
        let mut lhs = self.atom()?;
        loop {
            let (op, prec) = match self.peek() {
                Some(Token::Or) => (BinOp::Or, 1),
                Some(Token::And) => (BinOp::And, 2),
                Some(Token::Lt) => (BinOp::Lt, 3),
                Some(Token::Gt) => (BinOp::Gt, 3),
                Some(Token::Le) => (BinOp::Le, 3),
                Some(Token::Ge) => (BinOp::Ge, 3),
                Some(Token::EqEq) => (BinOp::Eq, 3),
                Some(Token::Plus) => (BinOp::Add, 4),
                Some(Token::Minus) => (BinOp::Sub, 4),
                Some(Token::Star) => (BinOp::Mul, 5),
                Some(Token::Slash) => (BinOp::Div, 5),
                Some(Token::Percent) => (BinOp::Mod, 5),
                _ => break,
            };
            if prec < min_prec {
                break;
            }
            self.bump()?;
            let rhs = self.expr(prec + 1)?;
            lhs = self.binop(op, lhs, rhs)?;
        }
        Ok(lhs)
    }
}

fn lex(src: &str) -> Result<Vec<Token>, FragmentError> {
    Token::lexer(src)
        .map(|t| t.map_err(|_| FragmentError::Lex))
        .collect()
}

/// Compile `src` to a typed expression in the scope of the statement at
/// `ctx`. `holes` fills `_` tokens left-to-right.
pub fn parse_expr(
    proc: &Proc,
    ctx: &CursorPath,
    src: &str,
    holes: &[Expr],
) -> Result<Expr, FragmentError> {
    let scope = scope_at(proc, ctx)?;
    let configs = configs_of(proc);
    let mut p = FragParser {
        tokens: lex(src)?,
        pos: 0,
        scope: &scope,
        configs: &configs,
        holes,
        next_hole: 0,
    };
    let e = p.expr(0)?;
    if p.pos != p.tokens.len() {
        return Err(FragmentError::Unexpected(format!("{:?}", p.tokens[p.pos])));
    }
    Ok(e)
}

/// Compile a window expression `B[lo:hi, pt, ...]` in the scope of `ctx`.
pub fn parse_window(
    proc: &Proc,
    ctx: &CursorPath,
    src: &str,
) -> Result<(Sym, LoopType, Vec<WAccess>), FragmentError> {
    let scope = scope_at(proc, ctx)?;
    let configs = configs_of(proc);
    let mut p = FragParser {
        tokens: lex(src)?,
        pos: 0,
        scope: &scope,
        configs: &configs,
        holes: &[],
        next_hole: 0,
    };
    let name = match p.bump()? {
        Token::Ident(n) => n,
        t => return Err(FragmentError::Unexpected(format!("{t:?}"))),
    };
    let (sym, decl) = scope
        .get(&name)
        .cloned()
        .ok_or_else(|| FragmentError::Unresolved(name.clone()))?;
    if !decl.is_tensor() {
        return Err(FragmentError::NotAWindow);
    }
    p.expect(Token::LBracket)?;
    let mut accesses = Vec::new();
    loop {
        let first = p.expr(0)?;
        if p.peek() == Some(&Token::Colon) {
            p.bump()?;
            let hi = p.expr(0)?;
            accesses.push(WAccess::Interval(first, hi));
        } else {
            accesses.push(WAccess::Point(first));
        }
        match p.bump()? {
            Token::Comma => continue,
            Token::RBracket => break,
            t => return Err(FragmentError::Unexpected(format!("{t:?}"))),
        }
    }
    if p.pos != p.tokens.len() {
        return Err(FragmentError::Unexpected(format!("{:?}", p.tokens[p.pos])));
    }
    if accesses.len() != decl.rank() {
        return Err(FragmentError::Arity(name, accesses.len(), decl.rank()));
    }
    Ok((sym, decl, accesses))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursors::Edge;
    use crate::ir::build::*;
    use crate::ir::sym::SymGen;
    use crate::ir::{ProcArg, SrcInfo};

    fn ctx_proc() -> (Proc, Sym, Sym) {
        let mut r#gen = SymGen::starting_at(1);
        let n = r#gen.fresh("n");
        let a = r#gen.fresh("A");
        let i = r#gen.fresh("i");
        let proc = Proc {
            name: "p".to_string(),
            args: vec![
                ProcArg {
                    name: n.clone(),
                    ty: LoopType::Size,
                    mem: None,
                    srcinfo: SrcInfo::default(),
                },
                ProcArg {
                    name: a.clone(),
                    ty: tensor(LoopType::F32, vec![read(&n, LoopType::Size), int(16)]),
                    mem: None,
                    srcinfo: SrcInfo::default(),
                },
            ],
            preds: vec![],
            body: vec![seq_for(
                &i,
                read(&n, LoopType::Size),
                vec![assign(
                    &a,
                    LoopType::F32,
                    vec![read(&i, LoopType::Index), int(0)],
                    float(0.0),
                )],
            )],
            instr: None,
            srcinfo: SrcInfo::default(),
        };
        (proc, n, i)
    }

    #[test]
    fn resolves_scope_names() {
        let (proc, n, i) = ctx_proc();
        let ctx = CursorPath(vec![Edge::Body(0), Edge::Body(0)]);
        let e = parse_expr(&proc, &ctx, "n - i * 4", &[]).unwrap();
        assert!(e.reads_sym(&n));
        assert!(e.reads_sym(&i));
        assert!(e.ty.is_indexable());
    }

    #[test]
    fn rejects_out_of_scope_names() {
        let (proc, _, _) = ctx_proc();
        // at the loop itself, its iterator is not yet bound
        let ctx = CursorPath(vec![Edge::Body(0)]);
        assert!(matches!(
            parse_expr(&proc, &ctx, "i + 1", &[]),
            Err(FragmentError::Unresolved(_))
        ));
    }

    #[test]
    fn fills_holes_in_order() {
        let (proc, _, _) = ctx_proc();
        let ctx = CursorPath(vec![Edge::Body(0)]);
        let e = parse_expr(&proc, &ctx, "_ + _", &[int(1), int(2)]).unwrap();
        assert_eq!(crate::fmt::expr_to_string(&e), "1 + 2");
        assert!(matches!(
            parse_expr(&proc, &ctx, "_ + _", &[int(1)]),
            Err(FragmentError::HoleCount { .. })
        ));
    }

    #[test]
    fn parses_windows() {
        let (proc, _, _) = ctx_proc();
        let ctx = CursorPath(vec![Edge::Body(0)]);
        let (sym, _, acc) = parse_window(&proc, &ctx, "A[0:6, 3]").unwrap();
        assert_eq!(sym.name(), "A");
        assert!(acc[0].is_interval());
        assert!(!acc[1].is_interval());
    }
}
