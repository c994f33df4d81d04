use std::fmt;
use std::rc::Rc;

/// An identifier in the IR: a display name plus a numeric id.
///
/// Two symbols are the same binding iff their ids match; the display name
/// is only for rendering. Fresh ids are issued by [`SymGen`].
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sym {
    name: Rc<str>,
    id: u32,
}

impl Sym {
    pub fn new(name: &str, id: u32) -> Self {
        Sym {
            name: Rc::from(name),
            id,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// A copy of this symbol under a different display name, same binding.
    pub fn renamed(&self, name: &str) -> Sym {
        Sym {
            name: Rc::from(name),
            id: self.id,
        }
    }
}

impl fmt::Display for Sym {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl fmt::Debug for Sym {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}${}", self.name, self.id)
    }
}

/// Deterministic fresh-name generator.
///
/// Seeded from the procedure being rewritten (one past the largest id in
/// its tree), never from global state, so two sessions rewriting the same
/// procedure produce identical output.
#[derive(Debug, Clone)]
pub struct SymGen {
    next: u32,
}

impl SymGen {
    pub fn starting_at(next: u32) -> Self {
        SymGen { next }
    }

    /// Seed from a procedure: the generator starts one past the largest
    /// symbol id occurring anywhere in `proc`.
    pub fn for_proc(proc: &crate::ir::Proc) -> Self {
        let mut max = 0u32;
        proc.walk_syms(&mut |s| max = max.max(s.id()));
        SymGen { next: max + 1 }
    }

    pub fn fresh(&mut self, name: &str) -> Sym {
        let id = self.next;
        self.next += 1;
        Sym::new(name, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_symbols_are_distinct_bindings() {
        let mut r#gen = SymGen::starting_at(1);
        let a = r#gen.fresh("i");
        let b = r#gen.fresh("i");
        assert_ne!(a, b);
        assert_eq!(a.name(), b.name());
    }

    #[test]
    fn renamed_keeps_binding() {
        let mut r#gen = SymGen::starting_at(1);
        let a = r#gen.fresh("i");
        let b = a.renamed("outer");
        assert_eq!(a.id(), b.id());
        assert_eq!(b.name(), "outer");
    }
}
