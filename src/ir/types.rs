use crate::ir::expr::Expr;

/// The type of an IR expression or buffer.
///
/// Scalar numerics, index-like control types and tensor/window shapes form
/// disjoint categories; the `is_*` predicates below are the only way the
/// rest of the engine asks category questions.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopType {
    /// Unconstrained real scalar (resolved to a concrete precision late).
    R,
    F32,
    F64,
    I8,
    I32,
    Bool,
    Index,
    Size,
    Stride,
    Tensor {
        elem: Box<LoopType>,
        dims: Vec<Expr>,
        is_window: bool,
    },
}

impl LoopType {
    pub fn is_real_scalar(&self) -> bool {
        matches!(
            self,
            LoopType::R | LoopType::F32 | LoopType::F64 | LoopType::I8 | LoopType::I32
        )
    }

    pub fn is_indexable(&self) -> bool {
        matches!(self, LoopType::Index | LoopType::Size | LoopType::Stride)
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, LoopType::Bool)
    }

    pub fn is_numeric(&self) -> bool {
        self.is_real_scalar() || self.is_indexable()
    }

    pub fn is_tensor(&self) -> bool {
        matches!(self, LoopType::Tensor { .. })
    }

    pub fn is_window(&self) -> bool {
        matches!(self, LoopType::Tensor { is_window: true, .. })
    }

    /// The scalar element type: identity on scalars, the element of a
    /// tensor otherwise.
    pub fn base(&self) -> &LoopType {
        match self {
            LoopType::Tensor { elem, .. } => elem.base(),
            t => t,
        }
    }

    /// Declared dimension extents; empty for scalars.
    pub fn dims(&self) -> &[Expr] {
        match self {
            LoopType::Tensor { dims, .. } => dims,
            _ => &[],
        }
    }

    pub fn rank(&self) -> usize {
        self.dims().len()
    }

    /// Tensor over the same element type with new extents. Scalars with a
    /// non-empty `dims` become tensors; a tensor given no dims collapses to
    /// its element type.
    pub fn with_dims(&self, dims: Vec<Expr>) -> LoopType {
        let elem = self.base().clone();
        if dims.is_empty() {
            elem
        } else {
            LoopType::Tensor {
                elem: Box::new(elem),
                dims,
                is_window: self.is_window(),
            }
        }
    }

    /// Same shape, different scalar element type.
    pub fn with_base(&self, base: LoopType) -> LoopType {
        match self {
            LoopType::Tensor { dims, is_window, .. } => LoopType::Tensor {
                elem: Box::new(base),
                dims: dims.clone(),
                is_window: *is_window,
            },
            _ => base,
        }
    }

    /// Same element and extents, window flag set as given.
    pub fn with_window(&self, is_window: bool) -> LoopType {
        match self {
            LoopType::Tensor { elem, dims, .. } => LoopType::Tensor {
                elem: elem.clone(),
                dims: dims.clone(),
                is_window,
            },
            t => t.clone(),
        }
    }

    /// Parse a user-facing type abbreviation (`"f32"`, `"R"`, `"i8"`, ...).
    pub fn from_abbrev(s: &str) -> Option<LoopType> {
        match s {
            "R" => Some(LoopType::R),
            "f32" => Some(LoopType::F32),
            "f64" => Some(LoopType::F64),
            "i8" => Some(LoopType::I8),
            "i32" => Some(LoopType::I32),
            "bool" => Some(LoopType::Bool),
            "index" => Some(LoopType::Index),
            "size" => Some(LoopType::Size),
            "stride" => Some(LoopType::Stride),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::build::int;

    #[test]
    fn categories_are_disjoint() {
        for t in [LoopType::R, LoopType::F32, LoopType::I32] {
            assert!(t.is_real_scalar() && !t.is_indexable() && !t.is_bool());
        }
        for t in [LoopType::Index, LoopType::Size, LoopType::Stride] {
            assert!(t.is_indexable() && !t.is_real_scalar() && !t.is_bool());
        }
        assert!(LoopType::Bool.is_bool());
    }

    #[test]
    fn tensor_shape_accessors() {
        let t = LoopType::F32.with_dims(vec![int(6), int(16)]);
        assert_eq!(t.rank(), 2);
        assert_eq!(t.base(), &LoopType::F32);
        let w = t.with_window(true);
        assert!(w.is_window());
        assert_eq!(w.with_dims(vec![]).rank(), 0);
    }
}
