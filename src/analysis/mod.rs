//! Effect and bounds analysis over LoopIR.
//!
//! [`effects`] extracts per-buffer read/write/reduce access sets in their
//! binder context; [`affine`] converts index arithmetic into linear forms;
//! [`solver`] decides conjunctions of linear integer constraints; and
//! [`checks`] packages the contracts the rewrites rely on (`safe_access`,
//! `independent`, `idempotent`, `dead_after`, ...).

pub mod affine;
pub mod checks;
pub mod effects;
pub mod solver;

pub use checks::CheckFailure;
pub use effects::{AccessKind, Effects};
pub use solver::Verdict;
