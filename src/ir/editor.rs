//! Editing primitives (spec.md 4.2): `InsertBefore`/`InsertAfter`/
//! `InsertAnteLast`, `Remove`, `ReplaceWith`, block-merge support, and the
//! terminator/phi-redirection helpers that keep the CFG and phi arguments
//! consistent while a pass rewrites the body.

use smallvec::SmallVec;

use crate::types::TypeId;

use super::body::MethodBody;
use super::instruction::{InstData, InstKind, PhiArg};
use super::value::{BlockId, InstId, UseLink, Value};

impl MethodBody {
    /// Create and link a new instruction immediately before `before`,
    /// inheriting its block.
    pub fn insert_before(&mut self, before: InstId, kind: InstKind, result_ty: TypeId) -> InstId {
        let block = self.inst(before).block;
        let after = self.inst(before).prev;
        let id = self.push_inst(InstData::new(kind, result_ty, block));
        self.link_into_block(block, id, after);
        self.register_operands(id);
        id
    }

    /// Create and link a new instruction immediately after `after`.
    pub fn insert_after(&mut self, after: InstId, kind: InstKind, result_ty: TypeId) -> InstId {
        let block = self.inst(after).block;
        let id = self.push_inst(InstData::new(kind, result_ty, block));
        self.link_into_block(block, id, Some(after));
        self.register_operands(id);
        id
    }

    /// Insert immediately before the block's terminator (spec.md 4.4 stage
    /// 4 uses this to materialize guards "before the terminator"). Panics
    /// if `block` is empty (a block with no terminator yet is a transient
    /// state the importer must not expose this call to).
    pub fn insert_ante_last(&mut self, block: BlockId, kind: InstKind, result_ty: TypeId) -> InstId {
        let last = self.block(block).last().expect("insert_ante_last on empty block");
        let before_last = self.inst(last).prev;
        let id = self.push_inst(InstData::new(kind, result_ty, block));
        self.link_into_block(block, id, before_last);
        self.register_operands(id);
        id
    }

    /// Append to the end of `block` (used by the importer for ordinary,
    /// non-terminator instructions as it interprets bytecode linearly).
    pub fn append(&mut self, block: BlockId, kind: InstKind, result_ty: TypeId) -> InstId {
        let last = self.block(block).last();
        let id = self.push_inst(InstData::new(kind, result_ty, block));
        self.link_into_block(block, id, last);
        self.register_operands(id);
        id
    }

    /// Remove `inst` from its block. The instruction must have no
    /// remaining uses of its result (callers run DCE's mark-and-sweep, or
    /// `replace_uses` the result away, first) — asserted, not a `Result`,
    /// per spec.md 7 modeling invariant violations as aborts.
    pub fn remove(&mut self, inst: InstId) {
        assert!(!self.has_uses(Value::Instruction(inst)), "removing instruction still in use");
        self.unregister_operands(inst);
        let block = self.inst(inst).block;
        self.unlink_from_block(block, inst);
    }

    /// Replace `old`'s `InstKind` in place (same `InstId`, so existing
    /// users of `Value::Instruction(old)` remain valid) with `new_kind`,
    /// rewiring the use-list registrations for the operand set change.
    pub fn replace_with(&mut self, old: InstId, new_kind: InstKind, new_result_ty: TypeId) {
        self.unregister_operands(old);
        let n = new_kind.operands().len();
        self.inst_mut(old).kind = new_kind;
        self.inst_mut(old).result_ty = new_result_ty;
        self.inst_mut(old).use_links = smallvec::smallvec![UseLink::default(); n];
        self.register_operands(old);
        let block = self.inst(old).block;
        self.fixup_first_non_header(block);
    }

    /// Move a contiguous run of instructions `[first, last]` (must all
    /// currently belong to the same block, in block order) to the end of
    /// `dest`, preserving their relative order. Used by
    /// `analysis::simplify_cfg` when merging a block into its unique
    /// predecessor.
    pub fn move_range(&mut self, first: InstId, last: InstId, dest: BlockId) {
        let src = self.inst(first).block;
        let mut run = Vec::new();
        let mut cur = Some(first);
        while let Some(i) = cur {
            run.push(i);
            if i == last { break; }
            cur = self.inst(i).next;
        }
        for &i in &run {
            self.unlink_from_block(src, i);
        }
        for &i in &run {
            self.inst_mut(i).block = dest;
            let after = self.block(dest).last();
            self.link_into_block(dest, i, after);
        }
    }

    /// Rewrite a terminator's `InstKind` and update the CFG edges to
    /// match (spec.md 4.2: editing primitives must keep pred/succ sets
    /// consistent). `new_succs` must list every successor the new kind
    /// branches to, in any order.
    pub fn set_branch(&mut self, term: InstId, new_kind: InstKind, new_succs: &[BlockId]) {
        assert!(new_kind.is_terminator());
        let block = self.inst(term).block;
        let result_ty = self.inst(term).result_ty;
        let old_succs: SmallVec<[BlockId; 2]> = self.block(block).succs.clone();
        for &s in &old_succs { self.remove_edge(block, s); }
        self.replace_with(term, new_kind, result_ty);
        for &s in new_succs { self.add_edge(block, s); }
    }

    /// For every [`InstKind::Phi`] at the start of `block`, replace any
    /// incoming edge from `old_pred` with one from `new_pred` (spec.md
    /// 4.2's phi-argument invariant: "every phi has exactly one argument
    /// per predecessor").
    pub fn redirect_phis(&mut self, block: BlockId, old_pred: BlockId, new_pred: BlockId) {
        let mut cur = self.block(block).first();
        while let Some(i) = cur {
            if !self.inst(i).kind.is_phi() { break; }
            if let InstKind::Phi { args } = &mut self.inst_mut(i).kind {
                for a in args.iter_mut() {
                    if a.pred == old_pred { a.pred = new_pred; }
                }
            }
            cur = self.inst(i).next;
        }
    }

    /// Overwrite a single operand slot of `inst` in place, keeping use-list
    /// bookkeeping correct without touching any other operand. Used by SSA
    /// construction to patch a phi argument that was installed as a
    /// placeholder before its defining (back-edge) predecessor had been
    /// visited.
    pub fn set_operand(&mut self, inst: InstId, idx: usize, new_value: Value) {
        if self.inst(inst).kind.operands()[idx] == new_value { return; }
        self.unregister_operands(inst);
        self.inst_mut(inst).kind.set_operand(idx, new_value);
        self.register_operands(inst);
    }

    /// Delete the incoming argument from `pred` in every phi at the start
    /// of `block`, rather than renaming it (spec.md 4.2's `RedirectPhis`
    /// "deleting the argument if newPred is null" case) — used when
    /// `pred` is being removed outright, not merged into another
    /// predecessor.
    pub fn remove_phi_arg(&mut self, block: BlockId, pred: BlockId) {
        let mut cur = self.block(block).first();
        while let Some(i) = cur {
            if !self.inst(i).kind.is_phi() { break; }
            cur = self.inst(i).next;
            let new_args: Option<smallvec::SmallVec<[PhiArg; 4]>> = match &self.inst(i).kind {
                InstKind::Phi { args } => args.iter().position(|a| a.pred == pred).map(|pos| {
                    let mut a = args.clone();
                    a.remove(pos);
                    a
                }),
                _ => None,
            };
            if let Some(args) = new_args {
                let ty = self.inst(i).result_ty;
                self.replace_with(i, InstKind::Phi { args }, ty);
            }
        }
    }

    /// Detach `block` from the body: sever its predecessor/successor
    /// edges and unregister every instruction's operand uses, then
    /// tombstone it (spec.md section 3: "block removal that maintains
    /// predecessor/successor edges"). Callers (`analysis::dce`'s
    /// unreachable-block removal) must first strip this block's
    /// contribution from any surviving successor's phis via
    /// [`Self::remove_phi_arg`] — this call does not touch successors'
    /// phis itself, only the edges.
    ///
    /// Instructions are unregistered in reverse block order so that, for
    /// the common case of straight-line def-before-use within the block,
    /// each instruction's own uses of its siblings are gone before we ask
    /// whether anything still uses *it*.
    pub fn remove_block(&mut self, block: BlockId) {
        let preds: SmallVec<[BlockId; 4]> = self.block(block).preds.clone();
        let succs: SmallVec<[BlockId; 2]> = self.block(block).succs.clone();
        for p in preds { self.block_mut(p).remove_succ(block); }
        for s in succs { self.block_mut(s).remove_pred(block); }

        let insts: Vec<InstId> = {
            let mut cur = self.block(block).first();
            let mut v = Vec::new();
            while let Some(i) = cur { v.push(i); cur = self.inst(i).next; }
            v
        };
        for &i in insts.iter().rev() {
            self.unregister_operands(i);
        }

        let b = self.block_mut(block);
        b.first = None;
        b.last = None;
        b.first_non_header = None;
        b.preds.clear();
        b.succs.clear();
        b.removed = true;
    }

    /// Apply [`Self::redirect_phis`] to every successor of `from` — the
    /// generalization spec_full.md 4.2 calls for so that inserting or
    /// retargeting a terminator fixes up every successor's phis, not just
    /// one.
    pub fn redirect_succ_phis(&mut self, from: BlockId, old_pred: BlockId, new_pred: BlockId) {
        let succs: SmallVec<[BlockId; 2]> = self.block(from).succs.clone();
        for s in succs {
            self.redirect_phis(s, old_pred, new_pred);
        }
    }

    /// Create a fresh, empty block and redirect every real predecessor of
    /// `target` to it instead, retargeting each predecessor's terminator
    /// and the CFG edges behind it. `target`'s own phis come along: with a
    /// single predecessor they are just renamed in place via
    /// [`Self::redirect_phis`]; with more than one, each phi is collapsed
    /// into a fresh phi in the new block that feeds the original phi a
    /// single argument from it. If `target` was the entry block, the new
    /// block becomes the entry instead, so `EntryBlock.NumPreds` stays
    /// zero (spec.md section 3). `target` is left with no predecessors of
    /// its own until the caller wires the returned block to fall through
    /// into it — this primitive only moves the edges that already existed.
    ///
    /// Used by `frontend::import`'s stage 4 to split a fresh dominating
    /// block for a protected region whose try-entry already hosts another
    /// region's guard (spec.md 4.4 stage 4), once the real CFG is known so
    /// the predecessors actually moved are real ones, not a guess from the
    /// raw bytecode.
    pub fn hoist_predecessors(&mut self, target: BlockId) -> BlockId {
        let new_head = self.create_block();
        let is_entry = target == self.entry_block;
        let preds: SmallVec<[BlockId; 4]> = self.block(target).preds.clone();

        match preds.len() {
            0 => {}
            1 => self.redirect_phis(target, preds[0], new_head),
            _ => {
                let phis: Vec<InstId> = self.block_insts(target).take_while(|&i| self.inst(i).kind.is_phi()).collect();
                for phi in phis {
                    let (ty, args) = match &self.inst(phi).kind {
                        InstKind::Phi { args } => (self.inst(phi).result_ty, args.clone()),
                        _ => unreachable!("filtered to phis above"),
                    };
                    let new_phi = self.append(new_head, InstKind::Phi { args }, ty);
                    let collapsed = smallvec::smallvec![PhiArg { pred: new_head, value: Value::Instruction(new_phi) }];
                    self.replace_with(phi, InstKind::Phi { args: collapsed }, ty);
                }
            }
        }

        for p in preds {
            self.retarget_branch(p, target, new_head);
        }
        if is_entry {
            self.entry_block = new_head;
        }
        new_head
    }

    /// Rewrite `p`'s terminator so any block-target field equal to `old`
    /// now names `new`, updating the CFG edges to match. `Branch` is the
    /// only terminator with block-target fields; anything else can't be
    /// naming `old` and is left alone.
    fn retarget_branch(&mut self, p: BlockId, old: BlockId, new: BlockId) {
        let term = self.block(p).last().expect("non-empty block has a terminator");
        let (cond, then_blk, else_blk) = match self.inst(term).kind {
            InstKind::Branch { cond, then_blk, else_blk } => (cond, then_blk, else_blk),
            _ => return,
        };
        let then_blk = if then_blk == old { new } else { then_blk };
        let else_blk = else_blk.map(|e| if e == old { new } else { e });
        let mut new_succs: SmallVec<[BlockId; 2]> = smallvec::smallvec![then_blk];
        new_succs.extend(else_blk);
        self.set_branch(term, InstKind::Branch { cond, then_blk, else_blk }, &new_succs);
    }
}
