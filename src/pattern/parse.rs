//! Lexer and recursive-descent parser for the pattern grammar.

use logos::{Lexer, Logos};
use thiserror::Error;

use crate::ir::expr::BinOp;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
pub enum Token {
    #[token("for")]
    For,
    #[token("in")]
    In,
    #[token("if")]
    If,
    #[token("_")]
    Wild,
    #[token("+=")]
    PlusEq,
    #[token("=")]
    Eq,
    #[token(":")]
    Colon,
    #[token(";")]
    Semi,
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
    #[token("#")]
    Hash,
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
    #[regex(r"[A-Za-z][A-Za-z0-9_]*", ident)]
    Ident(String),
    #[regex(r"[0-9]+", number)]
    Int(i64),
}

fn ident(lex: &mut Lexer<Token>) -> String {
    lex.slice().to_owned()
}

fn number(lex: &mut Lexer<Token>) -> Option<i64> {
    lex.slice().parse().ok()
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unrecognized token")]
    Lex,
    #[error("unexpected end of pattern")]
    Eof,
    #[error("unexpected token {0:?}")]
    Unexpected(Token),
    #[error("occurrence selector must be a positive integer")]
    BadOccurrence,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NamePat {
    Any,
    Exact(String),
}

impl NamePat {
    pub fn matches(&self, name: &str) -> bool {
        match self {
            NamePat::Any => true,
            NamePat::Exact(n) => n == name,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IdxPat {
    /// `[_]` or no brackets: any index list.
    Any,
    /// Bracketed expression patterns, matched coordinate-wise.
    Exact(Vec<PatExpr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PatExpr {
    Wild,
    Read { name: NamePat, idx: IdxPat },
    Const(i64),
    BinOp {
        op: BinOp,
        lhs: Box<PatExpr>,
        rhs: Box<PatExpr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum PatStmt {
    Wild,
    Assign { name: NamePat, idx: IdxPat },
    Reduce { name: NamePat, idx: IdxPat },
    ForLoop { iter: NamePat },
    IfStmt,
    Alloc { name: NamePat },
    Call { name: NamePat },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    Stmts(Vec<PatStmt>),
    Expr(PatExpr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPattern {
    pub pattern: Pattern,
    pub occurrence: Option<usize>,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek2(&self) -> Option<&Token> {
        self.tokens.get(self.pos + 1)
    }

    fn next(&mut self) -> Result<Token, ParseError> {
        let t = self.tokens.get(self.pos).cloned().ok_or(ParseError::Eof)?;
        self.pos += 1;
        Ok(t)
    }

    fn expect(&mut self, t: Token) -> Result<(), ParseError> {
        let got = self.next()?;
        if got == t {
            Ok(())
        } else {
            Err(ParseError::Unexpected(got))
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn name_pat(&mut self) -> Result<NamePat, ParseError> {
        match self.next()? {
            Token::Wild => Ok(NamePat::Any),
            Token::Ident(n) => Ok(NamePat::Exact(n)),
            t => Err(ParseError::Unexpected(t)),
        }
    }

    /// `[ p, p, ... ]`; a lone `_` inside brackets means "any index list".
    fn idx_pat(&mut self) -> Result<IdxPat, ParseError> {
        self.expect(Token::LBracket)?;
        let mut pats = vec![self.expr_pat()?];
        while self.peek() == Some(&Token::Comma) {
            self.next()?;
            pats.push(self.expr_pat()?);
        }
        self.expect(Token::RBracket)?;
        if pats.len() == 1 && pats[0] == PatExpr::Wild {
            Ok(IdxPat::Any)
        } else {
            Ok(IdxPat::Exact(pats))
        }
    }

    fn expr_atom(&mut self) -> Result<PatExpr, ParseError> {
        match self.next()? {
            Token::Wild => Ok(PatExpr::Wild),
            Token::Int(v) => Ok(PatExpr::Const(v)),
            Token::Minus => match self.next()? {
                Token::Int(v) => Ok(PatExpr::Const(-v)),
                t => Err(ParseError::Unexpected(t)),
            },
            Token::LParen => {
                let inner = self.expr_pat()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::Ident(n) => {
                let idx = if self.peek() == Some(&Token::LBracket) {
                    self.idx_pat()?
                } else {
                    IdxPat::Exact(vec![])
                };
                Ok(PatExpr::Read {
                    name: NamePat::Exact(n),
                    idx,
                })
            }
            t => Err(ParseError::Unexpected(t)),
        }
    }

    fn expr_mul(&mut self) -> Result<PatExpr, ParseError> {
        let mut lhs = self.expr_atom()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Mod,
                _ => break,
            };
            self.next()?;
            let rhs = self.expr_atom()?;
            lhs = PatExpr::BinOp {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn expr_pat(&mut self) -> Result<PatExpr, ParseError> {
        let mut lhs = self.expr_mul()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.next()?;
            let rhs = self.expr_mul()?;
            lhs = PatExpr::BinOp {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    /// `for i in _: _` | `if _: _` | `x : _` | `f(_)` | `x[...] = _` |
    /// `x += _` | `_`
    fn stmt_pat(&mut self) -> Result<PatStmt, ParseError> {
        match self.peek().ok_or(ParseError::Eof)? {
            Token::For => {
                self.next()?;
                let iter = self.name_pat()?;
                self.expect(Token::In)?;
                self.expect(Token::Wild)?;
                self.expect(Token::Colon)?;
                self.expect(Token::Wild)?;
                Ok(PatStmt::ForLoop { iter })
            }
            Token::If => {
                self.next()?;
                self.expect(Token::Wild)?;
                self.expect(Token::Colon)?;
                self.expect(Token::Wild)?;
                Ok(PatStmt::IfStmt)
            }
            Token::Wild if self.peek2() == Some(&Token::Eq) => {
                self.next()?;
                self.next()?;
                self.expect(Token::Wild)?;
                Ok(PatStmt::Assign {
                    name: NamePat::Any,
                    idx: IdxPat::Any,
                })
            }
            Token::Wild => {
                self.next()?;
                Ok(PatStmt::Wild)
            }
            Token::Ident(_) => {
                let name = self.name_pat()?;
                match self.peek() {
                    Some(Token::Colon) => {
                        self.next()?;
                        self.expect(Token::Wild)?;
                        Ok(PatStmt::Alloc { name })
                    }
                    Some(Token::LParen) => {
                        self.next()?;
                        self.expect(Token::Wild)?;
                        self.expect(Token::RParen)?;
                        Ok(PatStmt::Call { name })
                    }
                    Some(Token::LBracket) => {
                        let idx = self.idx_pat()?;
                        match self.next()? {
                            Token::Eq => {
                                self.expect(Token::Wild)?;
                                Ok(PatStmt::Assign { name, idx })
                            }
                            Token::PlusEq => {
                                self.expect(Token::Wild)?;
                                Ok(PatStmt::Reduce { name, idx })
                            }
                            t => Err(ParseError::Unexpected(t)),
                        }
                    }
                    Some(Token::Eq) => {
                        self.next()?;
                        self.expect(Token::Wild)?;
                        Ok(PatStmt::Assign {
                            name,
                            idx: IdxPat::Any,
                        })
                    }
                    Some(Token::PlusEq) => {
                        self.next()?;
                        self.expect(Token::Wild)?;
                        Ok(PatStmt::Reduce {
                            name,
                            idx: IdxPat::Any,
                        })
                    }
                    Some(t) => Err(ParseError::Unexpected(t.clone())),
                    None => Err(ParseError::Eof),
                }
            }
            t => Err(ParseError::Unexpected(t.clone())),
        }
    }
}

fn lex(src: &str) -> Result<Vec<Token>, ParseError> {
    Token::lexer(src)
        .map(|t| t.map_err(|_| ParseError::Lex))
        .collect()
}

pub fn parse_pattern(src: &str) -> Result<ParsedPattern, ParseError> {
    let mut tokens = lex(src)?;

    // trailing `# k`
    let mut occurrence = None;
    if tokens.len() >= 2
        && tokens[tokens.len() - 2] == Token::Hash
        && let Token::Int(k) = &tokens[tokens.len() - 1]
    {
        if *k < 1 {
            return Err(ParseError::BadOccurrence);
        }
        occurrence = Some(*k as usize);
        tokens.truncate(tokens.len() - 2);
    }

    // statement grammar first; fall back to an expression pattern
    let mut p = Parser {
        tokens: tokens.clone(),
        pos: 0,
    };
    let as_stmts = (|| -> Result<Vec<PatStmt>, ParseError> {
        let mut stmts = vec![p.stmt_pat()?];
        while p.peek() == Some(&Token::Semi) {
            p.next()?;
            stmts.push(p.stmt_pat()?);
        }
        if !p.at_end() {
            return Err(ParseError::Unexpected(p.next()?));
        }
        Ok(stmts)
    })();
    if let Ok(stmts) = as_stmts {
        return Ok(ParsedPattern {
            pattern: Pattern::Stmts(stmts),
            occurrence,
        });
    }

    let mut p = Parser { tokens, pos: 0 };
    let expr = p.expr_pat()?;
    if !p.at_end() {
        return Err(ParseError::Unexpected(p.next()?));
    }
    Ok(ParsedPattern {
        pattern: Pattern::Expr(expr),
        occurrence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_loop_pattern() {
        let p = parse_pattern("for i in _: _").unwrap();
        assert_eq!(
            p.pattern,
            Pattern::Stmts(vec![PatStmt::ForLoop {
                iter: NamePat::Exact("i".to_string())
            }])
        );
        assert_eq!(p.occurrence, None);
    }

    #[test]
    fn parses_occurrence_selector() {
        let p = parse_pattern("x[_] = _ #2").unwrap();
        assert_eq!(p.occurrence, Some(2));
        assert_eq!(
            p.pattern,
            Pattern::Stmts(vec![PatStmt::Assign {
                name: NamePat::Exact("x".to_string()),
                idx: IdxPat::Any,
            }])
        );
    }

    #[test]
    fn parses_alloc_and_call_patterns() {
        assert_eq!(
            parse_pattern("C_reg : _").unwrap().pattern,
            Pattern::Stmts(vec![PatStmt::Alloc {
                name: NamePat::Exact("C_reg".to_string())
            }])
        );
        assert_eq!(
            parse_pattern("vadd4(_)").unwrap().pattern,
            Pattern::Stmts(vec![PatStmt::Call {
                name: NamePat::Exact("vadd4".to_string())
            }])
        );
    }

    #[test]
    fn parses_expr_pattern_with_concrete_index() {
        let p = parse_pattern("A[i, k]").unwrap();
        match p.pattern {
            Pattern::Expr(PatExpr::Read { name, idx }) => {
                assert_eq!(name, NamePat::Exact("A".to_string()));
                assert_eq!(
                    idx,
                    IdxPat::Exact(vec![
                        PatExpr::Read {
                            name: NamePat::Exact("i".to_string()),
                            idx: IdxPat::Exact(vec![])
                        },
                        PatExpr::Read {
                            name: NamePat::Exact("k".to_string()),
                            idx: IdxPat::Exact(vec![])
                        }
                    ])
                );
            }
            p => panic!("unexpected parse {p:?}"),
        }
    }

    #[test]
    fn parses_stmt_sequence() {
        let p = parse_pattern("x = _ ; for i in _: _").unwrap();
        match p.pattern {
            Pattern::Stmts(s) => assert_eq!(s.len(), 2),
            p => panic!("unexpected parse {p:?}"),
        }
    }
}
