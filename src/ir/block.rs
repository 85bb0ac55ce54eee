//! Basic blocks: an ordered instruction list plus predecessor/successor
//! edges (spec.md section 3).

use smallvec::SmallVec;

use super::value::{BlockId, InstId};

/// A basic block. The instruction list is an intrusive doubly-linked list
/// threaded through [`super::instruction::InstData::prev`]/`next`; `first`
/// and `last` are the only cursors this struct itself owns.
///
/// Invariant: if `first` is `Some`, the chain from `first` to `last` via
/// `next` contains every instruction in the block, the last of which is a
/// terminator (`InstKind::is_terminator`), and any prefix of header
/// instructions (`InstKind::is_header`) precedes every non-header
/// instruction ("header instructions precede all others", spec.md section
/// 3). `first_non_header` caches the first instruction past that prefix so
/// passes that skip headers (e.g. Forest, spec.md 4.5) don't rescan it.
#[derive(Clone, Debug, Default)]
pub struct BasicBlock {
    pub(super) first: Option<InstId>,
    pub(super) last: Option<InstId>,
    pub(super) first_non_header: Option<InstId>,
    pub preds: SmallVec<[BlockId; 4]>,
    pub succs: SmallVec<[BlockId; 2]>,
    /// Set by [`super::editor::MethodBody::remove_block`]. The body's
    /// block arena is `Vec`-backed with stable handles (spec.md section 9:
    /// "arena + handle/index"), so a removed block is tombstoned rather
    /// than actually freed; [`super::body::MethodBody::blocks`] and
    /// friends filter these out.
    pub(super) removed: bool,
}

impl BasicBlock {
    #[must_use] pub fn is_empty(&self) -> bool { self.first.is_none() }
    #[must_use] pub fn first(&self) -> Option<InstId> { self.first }
    #[must_use] pub fn last(&self) -> Option<InstId> { self.last }
    #[must_use] pub fn first_non_header(&self) -> Option<InstId> { self.first_non_header }
    #[must_use] pub fn is_removed(&self) -> bool { self.removed }

    #[must_use] pub fn has_header(&self) -> bool { self.first != self.first_non_header }

    #[must_use] pub fn num_preds(&self) -> usize { self.preds.len() }
    #[must_use] pub fn num_succs(&self) -> usize { self.succs.len() }

    pub(super) fn add_pred(&mut self, b: BlockId) { self.preds.push(b); }
    pub(super) fn add_succ(&mut self, b: BlockId) { self.succs.push(b); }

    pub(super) fn remove_pred(&mut self, b: BlockId) {
        if let Some(i) = self.preds.iter().position(|&p| p == b) { self.preds.remove(i); }
    }
    pub(super) fn remove_succ(&mut self, b: BlockId) {
        if let Some(i) = self.succs.iter().position(|&s| s == b) { self.succs.remove(i); }
    }
}
