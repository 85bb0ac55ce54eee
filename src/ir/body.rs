//! `MethodBody`: the arena that owns a method's constants, arguments,
//! variables, instructions and blocks, plus the use-list machinery that
//! operates on them (spec.md 4.2, section 3). Editing primitives that build
//! on this arena live in [`super::editor`].

use crate::idx::IdxVec;
use crate::region::RegionTree;
use crate::types::TypeId;

use super::block::BasicBlock;
use super::instruction::{InstData, InstKind};
use super::value::{ArgData, ArgId, BlockId, ConstData, ConstId, InstId, UseAnchor, UseLink, Value, VarData, VarId};

/// A fully populated method body: the five arenas plus the entry block and
/// the region tree it was imported against. Owns everything its
/// instructions can reference; per spec.md section 5 this whole structure
/// is accessed exclusively through `&mut MethodBody` (it is `!Sync` by
/// construction — no interior mutability anywhere in the arena).
#[derive(Clone, Debug)]
pub struct MethodBody {
    consts: IdxVec<ConstId, ConstData>,
    args: IdxVec<ArgId, ArgData>,
    vars: IdxVec<VarId, VarData>,
    insts: IdxVec<InstId, InstData>,
    blocks: IdxVec<BlockId, BasicBlock>,
    pub entry_block: BlockId,
    pub regions: RegionTree,
}

impl MethodBody {
    /// A fresh body with a single empty entry block and no region table
    /// (callers that import against exception regions build a body with
    /// `regions` already populated via [`Self::with_regions`]).
    #[must_use]
    pub fn new() -> Self {
        let mut blocks = IdxVec::new();
        let entry_block = blocks.push(BasicBlock::default());
        Self { consts: IdxVec::new(), args: IdxVec::new(), vars: IdxVec::new(), insts: IdxVec::new(), blocks, entry_block, regions: RegionTree::default() }
    }

    #[must_use]
    pub fn with_regions(regions: RegionTree) -> Self {
        Self { regions, ..Self::new() }
    }

    // -- arena accessors -----------------------------------------------

    #[must_use] pub fn block(&self, id: BlockId) -> &BasicBlock { &self.blocks[id] }
    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock { &mut self.blocks[id] }
    /// Live blocks only — a block removed via `editor::remove_block` is
    /// tombstoned, not freed, and is filtered out here.
    #[must_use] pub fn blocks(&self) -> impl DoubleEndedIterator<Item = (BlockId, &BasicBlock)> {
        self.blocks.enum_iter().filter(|(_, b)| !b.is_removed())
    }
    #[must_use] pub fn num_blocks(&self) -> usize { self.blocks().count() }

    #[must_use] pub fn inst(&self, id: InstId) -> &InstData { &self.insts[id] }
    pub fn inst_mut(&mut self, id: InstId) -> &mut InstData { &mut self.insts[id] }
    #[must_use] pub fn insts(&self) -> impl DoubleEndedIterator<Item = (InstId, &InstData)> { self.insts.enum_iter() }
    /// The instruction immediately after `inst` in its block's order, if
    /// any — a thin public wrapper around the intrusive link so passes
    /// outside `ir` (e.g. `analysis::forest`'s hazard scan) can walk a
    /// block without reaching into private fields.
    #[must_use] pub fn inst_after(&self, inst: InstId) -> Option<InstId> { self.insts[inst].next }

    #[must_use] pub fn arg(&self, id: ArgId) -> &ArgData { &self.args[id] }
    #[must_use] pub fn var(&self, id: VarId) -> &VarData { &self.vars[id] }
    pub fn var_mut(&mut self, id: VarId) -> &mut VarData { &mut self.vars[id] }
    #[must_use] pub fn konst(&self, id: ConstId) -> &ConstData { &self.consts[id] }
    #[must_use] pub fn vars(&self) -> impl DoubleEndedIterator<Item = (VarId, &VarData)> { self.vars.enum_iter() }

    /// Push a freshly built [`InstData`] into the instruction arena without
    /// linking it into any block's list — callers in [`super::editor`] are
    /// responsible for the link step.
    pub(super) fn push_inst(&mut self, data: InstData) -> InstId { self.insts.push(data) }

    pub fn create_block(&mut self) -> BlockId { self.blocks.push(BasicBlock::default()) }
    pub fn create_const(&mut self, data: ConstData) -> ConstId { self.consts.push(data) }
    pub fn create_arg(&mut self, ty: TypeId, name: Option<Box<str>>) -> ArgId { self.args.push(ArgData::new(ty, name)) }
    pub fn create_var(&mut self, ty: TypeId, name: Option<Box<str>>) -> VarId { self.vars.push(VarData::new(ty, name)) }

    pub fn add_edge(&mut self, from: BlockId, to: BlockId) {
        self.blocks[from].add_succ(to);
        self.blocks[to].add_pred(from);
    }
    pub fn remove_edge(&mut self, from: BlockId, to: BlockId) {
        self.blocks[from].remove_succ(to);
        self.blocks[to].remove_pred(from);
    }

    // -- use-list machinery ----------------------------------------------

    fn anchor(&self, v: Value) -> Option<&UseAnchor> {
        match v {
            Value::Const(_) => None,
            Value::Argument(id) => Some(&self.args[id].anchor),
            Value::Variable(id) => Some(&self.vars[id].anchor),
            Value::Instruction(id) => Some(&self.insts[id].anchor),
        }
    }

    fn anchor_mut(&mut self, v: Value) -> Option<&mut UseAnchor> {
        match v {
            Value::Const(_) => None,
            Value::Argument(id) => Some(&mut self.args[id].anchor),
            Value::Variable(id) => Some(&mut self.vars[id].anchor),
            Value::Instruction(id) => Some(&mut self.insts[id].anchor),
        }
    }

    fn link(&self, node: (InstId, u32)) -> UseLink { self.insts[node.0].use_links[node.1 as usize] }
    fn link_mut(&mut self, node: (InstId, u32)) -> &mut UseLink { &mut self.insts[node.0].use_links[node.1 as usize] }
    fn set_next(&mut self, node: (InstId, u32), next: (InstId, u32)) { self.link_mut(node).next = Some(next); }
    fn set_prev(&mut self, node: (InstId, u32), prev: (InstId, u32)) { self.link_mut(node).prev = Some(prev); }

    /// Register a use of `v` by `user`'s operand slot `idx`. No-op for
    /// untracked values ([`Value::Const`]).
    fn add_use(&mut self, user: InstId, idx: u32, v: Value) {
        if self.anchor(v).is_none() { return; }
        let node = (user, idx);
        let first = self.anchor(v).unwrap().first;
        match first {
            None => {
                *self.link_mut(node) = UseLink { prev: Some(node), next: Some(node) };
                let a = self.anchor_mut(v).unwrap();
                a.first = Some(node);
                a.num_uses = 1;
            }
            Some(head) => {
                let tail = self.link(head).prev.unwrap();
                *self.link_mut(node) = UseLink { prev: Some(tail), next: Some(head) };
                self.set_next(tail, node);
                self.set_prev(head, node);
                self.anchor_mut(v).unwrap().num_uses += 1;
            }
        }
    }

    /// Unregister the use at `user`'s operand slot `idx` of `v`.
    fn remove_use(&mut self, user: InstId, idx: u32, v: Value) {
        if self.anchor(v).is_none() { return; }
        let node = (user, idx);
        let link = self.link(node);
        let (prev, next) = (link.prev.unwrap(), link.next.unwrap());
        if next == node {
            let a = self.anchor_mut(v).unwrap();
            a.first = None;
            a.num_uses = 0;
        } else {
            self.set_next(prev, next);
            self.set_prev(next, prev);
            let a = self.anchor_mut(v).unwrap();
            if a.first == Some(node) { a.first = Some(next); }
            a.num_uses -= 1;
        }
        *self.link_mut(node) = UseLink::default();
    }

    /// Register uses for every operand of `inst` (called once, right after
    /// the instruction is created and its `use_links` array is sized).
    pub(super) fn register_operands(&mut self, inst: InstId) {
        let ops = self.insts[inst].kind.operands();
        for (idx, v) in ops.into_iter().enumerate() {
            self.add_use(inst, idx as u32, v);
        }
    }

    /// Unregister uses for every current operand of `inst` (called before
    /// the instruction's kind is replaced or the instruction is removed).
    pub(super) fn unregister_operands(&mut self, inst: InstId) {
        let ops = self.insts[inst].kind.operands();
        for (idx, v) in ops.into_iter().enumerate() {
            self.remove_use(inst, idx as u32, v);
        }
    }

    /// `NumUses`/`IsEmpty` queries for any tracked value (spec.md section 8).
    #[must_use]
    pub fn num_uses(&self, v: Value) -> u32 { self.anchor(v).map_or(0, UseAnchor::num_uses) }
    #[must_use]
    pub fn has_uses(&self, v: Value) -> bool { self.anchor(v).map_or(false, |a| !a.is_empty()) }

    /// Iterate `(user, operand_index)` for every current use of `v`, in
    /// use-list order (spec.md 4.2: "iteration over users and uses").
    /// Mutating the IR while this iterator is alive is undefined, same as
    /// any other cursor into the intrusive lists (spec.md section 5).
    #[must_use]
    pub fn uses_of(&self, v: Value) -> impl Iterator<Item = (InstId, u32)> + '_ {
        let anchor = self.anchor(v);
        let mut remaining = anchor.map_or(0, UseAnchor::num_uses);
        let mut cur = anchor.and_then(|a| a.first);
        std::iter::from_fn(move || {
            if remaining == 0 { return None; }
            let node = cur?;
            cur = self.link(node).next;
            remaining -= 1;
            Some(node)
        })
    }

    /// Replace every use of `old` with `new`. The per-use operand rewrite is
    /// necessarily O(uses of `old`) — each user's stored `Value` must be
    /// overwritten individually — but the use-list bookkeeping itself
    /// (transferring `old`'s circular use chain onto `new`'s) is a constant
    /// number of pointer writes: the two rings are spliced together rather
    /// than walked and relinked one node at a time. Only meaningful for
    /// tracked values; `old == Value::Const(_)` is a no-op since constants
    /// keep no use list to walk.
    pub fn replace_uses(&mut self, old: Value, new: Value) {
        if old == new { return; }
        let Some(old_anchor) = self.anchor(old) else { return };
        let Some(old_first) = old_anchor.first else { return };
        let old_num = old_anchor.num_uses();

        let mut cur = old_first;
        for _ in 0..old_num {
            let (inst, idx) = cur;
            self.insts[inst].kind.set_operand(idx as usize, new);
            cur = self.link(cur).next.unwrap();
        }

        if new.is_tracked() {
            match self.anchor(new).unwrap().first {
                None => {
                    self.anchor_mut(new).unwrap().first = Some(old_first);
                }
                Some(new_first) => {
                    let new_tail = self.link(new_first).prev.unwrap();
                    let old_tail = self.link(old_first).prev.unwrap();
                    self.set_next(new_tail, old_first);
                    self.set_prev(old_first, new_tail);
                    self.set_next(old_tail, new_first);
                    self.set_prev(new_first, old_tail);
                }
            }
            self.anchor_mut(new).unwrap().num_uses += old_num;
        }

        let a = self.anchor_mut(old).unwrap();
        a.first = None;
        a.num_uses = 0;
    }

    // -- block-local list helpers -----------------------------------------

    pub(super) fn link_into_block(&mut self, block: BlockId, inst: InstId, after: Option<InstId>) {
        let next = match after {
            Some(a) => self.insts[a].next,
            None => self.blocks[block].first,
        };
        self.insts[inst].prev = after;
        self.insts[inst].next = next;
        match after {
            Some(a) => self.insts[a].next = Some(inst),
            None => self.blocks[block].first = Some(inst),
        }
        match next {
            Some(n) => self.insts[n].prev = Some(inst),
            None => self.blocks[block].last = Some(inst),
        }
        self.fixup_first_non_header(block);
    }

    pub(super) fn unlink_from_block(&mut self, block: BlockId, inst: InstId) {
        let prev = self.insts[inst].prev;
        let next = self.insts[inst].next;
        match prev {
            Some(p) => self.insts[p].next = next,
            None => self.blocks[block].first = next,
        }
        match next {
            Some(n) => self.insts[n].prev = prev,
            None => self.blocks[block].last = prev,
        }
        self.insts[inst].prev = None;
        self.insts[inst].next = None;
        self.fixup_first_non_header(block);
    }

    pub(super) fn fixup_first_non_header(&mut self, block: BlockId) {
        let mut cur = self.blocks[block].first;
        while let Some(i) = cur {
            if !self.insts[i].kind.is_header() { break; }
            cur = self.insts[i].next;
        }
        self.blocks[block].first_non_header = cur;
    }

    /// Iterate a block's instructions in order.
    pub fn block_insts(&self, block: BlockId) -> impl Iterator<Item = InstId> + '_ {
        let mut cur = self.blocks[block].first;
        std::iter::from_fn(move || {
            let i = cur?;
            cur = self.insts[i].next;
            Some(i)
        })
    }

}

impl Default for MethodBody {
    fn default() -> Self { Self::new() }
}
