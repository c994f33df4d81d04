//! exo-core: a scheduling engine for user-schedulable loop-nest kernels.
//!
//! The crate is organized around an immutable typed intermediate
//! representation ([`ir`]), position-stable cursors that survive rewrites
//! via forwarding maps ([`cursors`]), an affine effect/bounds analyzer
//! ([`analysis`]), and the library of atomic scheduling rewrites
//! ([`rewrites`]) exposed through the [`api::Procedure`] façade.
//!
//! The engine never executes IR and never emits target code: every rewrite
//! is user-directed and either returns a fresh procedure together with a
//! forwarding map, or fails with a typed error and no side effect.

pub mod analysis;
pub mod api;
pub mod config;
pub mod cursors;
pub mod fmt;
pub mod fragment;
pub mod ir;
pub mod memory;
pub mod pattern;
pub mod rewrites;
pub mod unify;

pub use api::{Cursor, CursorKind, Procedure, SchedError};
pub use config::Config;
pub use memory::Memory;
