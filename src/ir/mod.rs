//! LoopIR: the typed imperative intermediate representation scheduled by
//! this engine.
//!
//! IR values are immutable. Rewrites construct new trees; nothing in this
//! module mutates in place. Every node carries a [`SrcInfo`]; synthesized
//! nodes inherit the span of the node they were derived from.

pub mod build;
pub mod expr;
pub mod proc;
pub mod srcinfo;
pub mod stmt;
pub mod subst;
pub mod sym;
pub mod typecheck;
pub mod types;
pub mod visit;

pub use expr::{BinOp, BuiltInFn, Expr, ExprKind, Value, WAccess};
pub use proc::{Proc, ProcArg};
pub use srcinfo::SrcInfo;
pub use stmt::{LoopKind, Stmt, StmtKind};
pub use sym::{Sym, SymGen};
pub use types::LoopType;
