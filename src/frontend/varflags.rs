//! Variable analysis (spec.md 4.4 stage 2): a single linear walk over the
//! instruction stream that classifies every argument and local slot with
//! [`VarFlags`], which SSA construction in [`super::import`] then
//! consults to decide whether a slot is SSA-able or must be memory-backed.

use crate::ir::VarFlags;
use crate::region::RegionTree;

use super::bytecode::{OpCode, RawInstruction, RawOperand};

/// Per-slot bookkeeping shared between arguments and locals — the two
/// behave identically for flag purposes, differing only in the `IsArg`/
/// `IsLocal` bit they start from.
struct SlotTracker {
    flags: Vec<VarFlags>,
    block: Vec<Option<usize>>,
    first_offset: Vec<Option<u32>>,
    store_count: Vec<u32>,
}

impl SlotTracker {
    fn new(len: usize, base: VarFlags) -> Self {
        Self { flags: vec![base; len], block: vec![None; len], first_offset: vec![None; len], store_count: vec![0; len] }
    }

    fn touch(&mut self, i: usize, offset: u32, block: usize, regions: &RegionTree) {
        if let Some(prev_block) = self.block[i] {
            if prev_block != block {
                self.flags[i] |= VarFlags::CROSSES_BLOCK;
            }
        }
        self.block[i] = Some(block);
        match self.first_offset[i] {
            Some(prev_offset) => {
                if !regions.are_on_same_region(prev_offset, offset) {
                    self.flags[i] |= VarFlags::CROSSES_REGIONS;
                }
            }
            None => self.first_offset[i] = Some(offset),
        }
    }

    fn load(&mut self, i: usize, offset: u32, block: usize, regions: &RegionTree) {
        self.touch(i, offset, block, regions);
        if self.store_count[i] == 0 {
            self.flags[i] |= VarFlags::LOAD_BEFORE_STORE;
        }
        self.flags[i] |= VarFlags::LOADED;
    }

    fn store(&mut self, i: usize, offset: u32, block: usize, regions: &RegionTree) {
        self.touch(i, offset, block, regions);
        self.store_count[i] += 1;
        if self.store_count[i] > 1 {
            self.flags[i] |= VarFlags::MULTIPLE_STORES;
        }
        self.flags[i] |= VarFlags::STORED;
    }

    fn addr_taken(&mut self, i: usize, offset: u32, block: usize, regions: &RegionTree) {
        self.touch(i, offset, block, regions);
        self.flags[i] |= VarFlags::ADDR_TAKEN;
    }
}

/// The result of the variable-analysis pass: one [`VarFlags`] per argument
/// and per local slot, in declaration order.
pub struct VarAnalysis {
    pub arg_flags: Vec<VarFlags>,
    pub local_flags: Vec<VarFlags>,
}

impl VarAnalysis {
    #[must_use]
    pub fn arg_is_exposed(&self, i: usize) -> bool {
        let f = self.arg_flags[i];
        f.contains(VarFlags::ADDR_TAKEN) || f.contains(VarFlags::CROSSES_REGIONS)
    }

    #[must_use]
    pub fn local_is_exposed(&self, i: usize) -> bool {
        let f = self.local_flags[i];
        f.contains(VarFlags::ADDR_TAKEN) || f.contains(VarFlags::CROSSES_REGIONS)
    }
}

/// Classify every argument/local slot's references. `leaders` must be
/// sorted ascending (as produced by [`super::leaders::find_leaders`]);
/// block index for an offset is the position of the last leader `<=`
/// that offset.
#[must_use]
pub fn analyze_vars(
    instrs: &[RawInstruction],
    leaders: &[u32],
    regions: &RegionTree,
    num_args: usize,
    num_locals: usize,
) -> VarAnalysis {
    let mut args = SlotTracker::new(num_args, VarFlags::IS_ARG);
    let mut locals = SlotTracker::new(num_locals, VarFlags::IS_LOCAL);

    let block_of = |offset: u32| -> usize {
        leaders.partition_point(|&l| l <= offset).saturating_sub(1)
    };

    for inst in instrs {
        let block = block_of(inst.offset);
        let slot = match &inst.operand {
            RawOperand::Var(v) => Some(*v as usize),
            _ => None,
        };
        let Some(slot) = slot else { continue };
        match inst.op {
            OpCode::Ldarg => args.load(slot, inst.offset, block, regions),
            OpCode::Starg => args.store(slot, inst.offset, block, regions),
            OpCode::Ldarga => args.addr_taken(slot, inst.offset, block, regions),
            OpCode::Ldloc => locals.load(slot, inst.offset, block, regions),
            OpCode::Stloc => locals.store(slot, inst.offset, block, regions),
            OpCode::Ldloca => locals.addr_taken(slot, inst.offset, block, regions),
            _ => {}
        }
    }

    VarAnalysis { arg_flags: args.flags, local_flags: locals.flags }
}
