//! The user-visible surface: [`Procedure`], [`Cursor`], scheduling
//! methods, and the argument-processing layer that coerces patterns,
//! shorthands and cursors into validated rewrite inputs.

pub mod args;
pub mod cursor;
pub mod error;
pub mod procedure;

pub use cursor::{Cursor, CursorKind};
pub use error::{ErrorKind, SchedError};
pub use procedure::Procedure;
