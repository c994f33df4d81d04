pub type SourceId = usize;

/// Positional annotation carried by every IR node.
///
/// Synthesized nodes copy the span of the node they were derived from, so
/// errors about rewritten code still point at the user's original text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SrcInfo {
    pub source: SourceId,
    pub span: core::ops::Range<usize>,
}

impl SrcInfo {
    pub fn new(source: SourceId, span: core::ops::Range<usize>) -> Self {
        SrcInfo { source, span }
    }
}
