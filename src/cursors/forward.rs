//! Forwarding maps: how cursor paths survive rewrites.
//!
//! Every rewrite returns a [`ForwardingMap`] describing how positions in
//! the pre-rewrite tree correspond to positions in the post-rewrite tree.
//! A map is a partial function: paths that land inside deleted or
//! restructured regions forward to ⊥ unless the rewrite recorded an
//! explicit entry for them. Maps compose sequentially along a procedure's
//! provenance chain.

use super::{BlockKind, CursorError, CursorLoc, CursorPath};

/// A statement-list splice: at `(parent, kind)`, `removed` statements
/// starting at index `at` were replaced by `inserted` statements.
///
/// Splice coordinates are in the frame produced by any earlier splices of
/// the same map, so a map's splices apply in order.
#[derive(Debug, Clone)]
pub struct Splice {
    pub parent: CursorPath,
    pub kind: BlockKind,
    pub at: usize,
    pub removed: usize,
    pub inserted: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ForwardingMap {
    /// Explicit prefix relocations, consulted first; longest prefix wins.
    /// `None` is a tombstone: anything under the prefix is invalidated.
    entries: Vec<(CursorPath, Option<CursorPath>)>,
    splices: Vec<Splice>,
    /// A further map applied after this one (sequential composition).
    then: Option<Box<ForwardingMap>>,
}

impl ForwardingMap {
    pub fn identity() -> Self {
        ForwardingMap::default()
    }

    /// Sequential composition: apply `first`, then `second`.
    pub fn chained(mut first: ForwardingMap, second: ForwardingMap) -> ForwardingMap {
        first.then = Some(Box::new(match first.then.take() {
            Some(next) => ForwardingMap::chained(*next, second),
            None => second,
        }));
        first
    }

    /// Relocate everything under `old` to the same position under `new`.
    pub fn relocate(mut self, old: CursorPath, new: CursorPath) -> Self {
        self.entries.push((old, Some(new)));
        self
    }

    /// Invalidate everything under `old`.
    pub fn tombstone(mut self, old: CursorPath) -> Self {
        self.entries.push((old, None));
        self
    }

    pub fn spliced(
        mut self,
        parent: CursorPath,
        kind: BlockKind,
        at: usize,
        removed: usize,
        inserted: usize,
    ) -> Self {
        self.splices.push(Splice {
            parent,
            kind,
            at,
            removed,
            inserted,
        });
        self
    }

    /// Forward a node path. `Err(Invalidated)` when the position no longer
    /// exists in the post-rewrite tree.
    pub fn forward_path(&self, path: &CursorPath) -> Result<CursorPath, CursorError> {
        let stepped = self.step_path(path)?;
        match &self.then {
            Some(next) => next.forward_path(&stepped),
            None => Ok(stepped),
        }
    }

    fn step_path(&self, path: &CursorPath) -> Result<CursorPath, CursorError> {
        // longest explicit prefix wins and is final
        let best = self
            .entries
            .iter()
            .filter(|(old, _)| path.starts_with(old))
            .max_by_key(|(old, _)| old.0.len());
        if let Some((old, new)) = best {
            return match new {
                None => Err(CursorError::Invalidated),
                Some(new) => {
                    let mut edges = new.0.clone();
                    edges.extend_from_slice(&path.0[old.0.len()..]);
                    Ok(CursorPath(edges))
                }
            };
        }

        let mut edges = path.0.clone();
        for sp in &self.splices {
            let depth = sp.parent.0.len();
            if edges.len() <= depth || !CursorPath(edges[..depth].to_vec()).starts_with(&sp.parent)
            {
                continue;
            }
            let Some((kind, i)) = edges[depth].block_index() else {
                continue;
            };
            if kind != sp.kind {
                continue;
            }
            if i >= sp.at + sp.removed {
                edges[depth] = kind.edge(i - sp.removed + sp.inserted);
            } else if i >= sp.at {
                return Err(CursorError::Invalidated);
            }
        }
        Ok(CursorPath(edges))
    }

    fn forward_list_index(
        &self,
        parent: &CursorPath,
        kind: BlockKind,
        at: usize,
        is_gap: bool,
    ) -> Result<usize, CursorError> {
        let mut at = at;
        for sp in &self.splices {
            if sp.parent != *parent || sp.kind != kind {
                continue;
            }
            if is_gap {
                if at <= sp.at {
                    // unchanged
                } else if at >= sp.at + sp.removed {
                    at = at - sp.removed + sp.inserted;
                } else {
                    return Err(CursorError::Invalidated);
                }
            } else if at >= sp.at + sp.removed {
                at = at - sp.removed + sp.inserted;
            } else if at >= sp.at {
                return Err(CursorError::Invalidated);
            }
        }
        Ok(at)
    }

    /// Forward any cursor position.
    pub fn forward_loc(&self, loc: &CursorLoc) -> Result<CursorLoc, CursorError> {
        let stepped = self.step_loc(loc)?;
        match &self.then {
            Some(next) => next.forward_loc(&stepped),
            None => Ok(stepped),
        }
    }

    fn step_loc(&self, loc: &CursorLoc) -> Result<CursorLoc, CursorError> {
        match loc {
            CursorLoc::Node(path) => Ok(CursorLoc::Node(self.step_path(path)?)),
            CursorLoc::Args { parent } => Ok(CursorLoc::Args {
                parent: self.step_path(parent)?,
            }),
            CursorLoc::Gap { parent, kind, at } => {
                let new_parent = self.step_path(parent)?;
                let at = if new_parent == *parent {
                    self.forward_list_index(parent, *kind, *at, true)?
                } else {
                    *at
                };
                Ok(CursorLoc::Gap {
                    parent: new_parent,
                    kind: *kind,
                    at,
                })
            }
            CursorLoc::Block {
                parent,
                kind,
                lo,
                hi,
            } => {
                let new_parent = self.step_path(parent)?;
                let (lo, hi) = if new_parent == *parent {
                    let new_lo = self.forward_list_index(parent, *kind, *lo, false)?;
                    // the end of a block forwards like a gap so pure
                    // insertions at the boundary do not invalidate it
                    let new_hi = self.forward_list_index(parent, *kind, *hi, true)?;
                    if new_hi <= new_lo {
                        return Err(CursorError::Invalidated);
                    }
                    (new_lo, new_hi)
                } else {
                    (*lo, *hi)
                };
                Ok(CursorLoc::Block {
                    parent: new_parent,
                    kind: *kind,
                    lo,
                    hi,
                })
            }
        }
    }
}

/// Apply a chain of maps oldest-first.
pub fn forward_chain<'a>(
    maps: impl IntoIterator<Item = &'a ForwardingMap>,
    loc: &CursorLoc,
) -> Result<CursorLoc, CursorError> {
    let mut loc = loc.clone();
    for m in maps {
        loc = m.forward_loc(&loc)?;
    }
    Ok(loc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursors::Edge;

    fn p(edges: Vec<Edge>) -> CursorPath {
        CursorPath(edges)
    }

    #[test]
    fn splice_shifts_later_siblings() {
        let fwd =
            ForwardingMap::identity().spliced(CursorPath::root(), BlockKind::Body, 1, 1, 3);
        assert_eq!(
            fwd.forward_path(&p(vec![Edge::Body(0)])).unwrap(),
            p(vec![Edge::Body(0)])
        );
        assert_eq!(
            fwd.forward_path(&p(vec![Edge::Body(2)])).unwrap(),
            p(vec![Edge::Body(4)])
        );
        assert_eq!(
            fwd.forward_path(&p(vec![Edge::Body(1)])),
            Err(CursorError::Invalidated)
        );
    }

    #[test]
    fn explicit_entry_beats_splice() {
        let fwd = ForwardingMap::identity()
            .relocate(p(vec![Edge::Body(1)]), p(vec![Edge::Body(2), Edge::Body(0)]))
            .spliced(CursorPath::root(), BlockKind::Body, 1, 1, 2);
        assert_eq!(
            fwd.forward_path(&p(vec![Edge::Body(1), Edge::Rhs])).unwrap(),
            p(vec![Edge::Body(2), Edge::Body(0), Edge::Rhs])
        );
    }

    #[test]
    fn gaps_at_insertion_point_survive() {
        let fwd =
            ForwardingMap::identity().spliced(CursorPath::root(), BlockKind::Body, 1, 0, 2);
        let gap = CursorLoc::Gap {
            parent: CursorPath::root(),
            kind: BlockKind::Body,
            at: 1,
        };
        assert_eq!(fwd.forward_loc(&gap).unwrap(), gap);
        let gap2 = CursorLoc::Gap {
            parent: CursorPath::root(),
            kind: BlockKind::Body,
            at: 2,
        };
        assert_eq!(
            fwd.forward_loc(&gap2).unwrap(),
            CursorLoc::Gap {
                parent: CursorPath::root(),
                kind: BlockKind::Body,
                at: 4,
            }
        );
    }

    #[test]
    fn chains_compose() {
        let f1 = ForwardingMap::identity().spliced(CursorPath::root(), BlockKind::Body, 0, 0, 1);
        let f2 = ForwardingMap::identity().spliced(CursorPath::root(), BlockKind::Body, 0, 0, 1);
        let loc = CursorLoc::Node(p(vec![Edge::Body(0)]));
        let out = forward_chain([&f1, &f2], &loc).unwrap();
        assert_eq!(out, CursorLoc::Node(p(vec![Edge::Body(2)])));
    }
}
