//! Memory-space annotations.
//!
//! An opaque token per storage class (DRAM, a vector register file, ...).
//! `set_memory` records the annotation on an allocation; the rewrite
//! engine never inspects its semantics.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Memory {
    name: &'static str,
}

impl Memory {
    pub const fn named(name: &'static str) -> Memory {
        Memory { name }
    }

    pub fn name(&self) -> &str {
        self.name
    }
}

impl fmt::Display for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

pub const DRAM: Memory = Memory::named("DRAM");
pub const NEON: Memory = Memory::named("Neon");
pub const AVX2: Memory = Memory::named("AVX2");
