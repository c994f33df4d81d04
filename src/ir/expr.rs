use std::rc::Rc;

use strum_macros::{Display, EnumString};

use crate::config::Config;
use crate::ir::srcinfo::SrcInfo;
use crate::ir::sym::Sym;
use crate::ir::types::LoopType;

/// A constant value. Control constants are `Bool`/`Int`; `Float` is a
/// data-value literal.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
pub enum BinOp {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "/")]
    Div,
    #[strum(serialize = "%")]
    Mod,
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = "<=")]
    Le,
    #[strum(serialize = ">=")]
    Ge,
    #[strum(serialize = "==")]
    Eq,
    #[strum(serialize = "and")]
    And,
    #[strum(serialize = "or")]
    Or,
}

impl BinOp {
    pub fn is_comparison(&self) -> bool {
        matches!(self, BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge | BinOp::Eq)
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinOp::And | BinOp::Or)
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod
        )
    }

    /// Operators whose operand swap is semantics-preserving on numerics.
    pub fn commutes(&self) -> bool {
        matches!(self, BinOp::Add | BinOp::Mul)
    }
}

/// The closed set of built-in functions callable from expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum BuiltInFn {
    #[strum(serialize = "min")]
    Min,
    #[strum(serialize = "max")]
    Max,
    #[strum(serialize = "sqrt")]
    Sqrt,
}

impl BuiltInFn {
    pub fn arity(&self) -> usize {
        match self {
            BuiltInFn::Min | BuiltInFn::Max => 2,
            BuiltInFn::Sqrt => 1,
        }
    }
}

/// One coordinate of a windowing expression: a single point collapses the
/// dimension, an interval keeps it.
#[derive(Debug, Clone, PartialEq)]
pub enum WAccess {
    Point(Expr),
    Interval(Expr, Expr),
}

impl WAccess {
    pub fn is_interval(&self) -> bool {
        matches!(self, WAccess::Interval(..))
    }

    /// The origin of this coordinate: `pt` for points, `lo` for intervals.
    pub fn origin(&self) -> &Expr {
        match self {
            WAccess::Point(e) => e,
            WAccess::Interval(lo, _) => lo,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Read {
        name: Sym,
        idx: Vec<Expr>,
    },
    Const(Value),
    USub {
        arg: Box<Expr>,
    },
    BinOp {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    BuiltIn {
        f: BuiltInFn,
        args: Vec<Expr>,
    },
    WindowExpr {
        name: Sym,
        idx: Vec<WAccess>,
    },
    StrideExpr {
        name: Sym,
        dim: usize,
    },
    ReadConfig {
        config: Rc<Config>,
        field: String,
    },
}

/// A typed expression. Every expression carries its type; rewrites that
/// change buffer declarations re-typecheck affected reads.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub data: ExprKind,
    pub ty: LoopType,
    pub srcinfo: SrcInfo,
}

impl Expr {
    pub fn new(data: ExprKind, ty: LoopType) -> Self {
        Expr {
            data,
            ty,
            srcinfo: SrcInfo::default(),
        }
    }

    pub fn with_srcinfo(mut self, srcinfo: SrcInfo) -> Self {
        self.srcinfo = srcinfo;
        self
    }

    pub fn as_const_int(&self) -> Option<i64> {
        match &self.data {
            ExprKind::Const(Value::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn as_const_bool(&self) -> Option<bool> {
        match &self.data {
            ExprKind::Const(Value::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    /// The read symbol, for bare (unindexed) reads only.
    pub fn as_bare_read(&self) -> Option<&Sym> {
        match &self.data {
            ExprKind::Read { name, idx } if idx.is_empty() => Some(name),
            _ => None,
        }
    }

    /// Pre-order traversal over this expression and its children.
    pub fn walk(&self, f: &mut impl FnMut(&Expr)) {
        f(self);
        match &self.data {
            ExprKind::Read { idx, .. } => idx.iter().for_each(|e| e.walk(f)),
            ExprKind::USub { arg } => arg.walk(f),
            ExprKind::BinOp { lhs, rhs, .. } => {
                lhs.walk(f);
                rhs.walk(f);
            }
            ExprKind::BuiltIn { args, .. } => args.iter().for_each(|e| e.walk(f)),
            ExprKind::WindowExpr { idx, .. } => {
                for w in idx {
                    match w {
                        WAccess::Point(e) => e.walk(f),
                        WAccess::Interval(lo, hi) => {
                            lo.walk(f);
                            hi.walk(f);
                        }
                    }
                }
            }
            ExprKind::Const(_) | ExprKind::StrideExpr { .. } | ExprKind::ReadConfig { .. } => {}
        }
    }

    /// True if `sym` is read anywhere inside this expression.
    pub fn reads_sym(&self, sym: &Sym) -> bool {
        let mut found = false;
        self.walk(&mut |e| match &e.data {
            ExprKind::Read { name, .. }
            | ExprKind::WindowExpr { name, .. }
            | ExprKind::StrideExpr { name, .. }
                if name == sym =>
            {
                found = true
            }
            _ => {}
        });
        found
    }

    /// Rebuild this expression bottom-up through `f`.
    pub fn map(&self, f: &impl Fn(Expr) -> Expr) -> Expr {
        let data = match &self.data {
            ExprKind::Read { name, idx } => ExprKind::Read {
                name: name.clone(),
                idx: idx.iter().map(|e| e.map(f)).collect(),
            },
            ExprKind::Const(v) => ExprKind::Const(v.clone()),
            ExprKind::USub { arg } => ExprKind::USub {
                arg: Box::new(arg.map(f)),
            },
            ExprKind::BinOp { op, lhs, rhs } => ExprKind::BinOp {
                op: *op,
                lhs: Box::new(lhs.map(f)),
                rhs: Box::new(rhs.map(f)),
            },
            ExprKind::BuiltIn { f: bf, args } => ExprKind::BuiltIn {
                f: *bf,
                args: args.iter().map(|e| e.map(f)).collect(),
            },
            ExprKind::WindowExpr { name, idx } => ExprKind::WindowExpr {
                name: name.clone(),
                idx: idx
                    .iter()
                    .map(|w| match w {
                        WAccess::Point(e) => WAccess::Point(e.map(f)),
                        WAccess::Interval(lo, hi) => WAccess::Interval(lo.map(f), hi.map(f)),
                    })
                    .collect(),
            },
            ExprKind::StrideExpr { name, dim } => ExprKind::StrideExpr {
                name: name.clone(),
                dim: *dim,
            },
            ExprKind::ReadConfig { config, field } => ExprKind::ReadConfig {
                config: config.clone(),
                field: field.clone(),
            },
        };
        f(Expr {
            data,
            ty: self.ty.clone(),
            srcinfo: self.srcinfo.clone(),
        })
    }
}
