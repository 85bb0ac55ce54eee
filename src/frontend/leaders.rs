//! Leader discovery (spec.md 4.4 stage 1): a bit set indexed by byte
//! offset marking every instruction that starts a basic block — branch
//! and switch targets, the fallthrough after every terminator, and the
//! start offsets named by the exception table.

use bit_set::BitSet;

use super::bytecode::{ExceptionRegion, RawInstruction};
use super::error::ImportError;

/// Return every leader offset, sorted ascending, or the first
/// [`ImportError::InvalidInput`] if some branch/region names an offset
/// that isn't the start of any instruction in `instrs`.
pub fn find_leaders(instrs: &[RawInstruction], regions: &[ExceptionRegion]) -> Result<Vec<u32>, ImportError> {
    let max_offset = instrs.iter().map(|i| i.offset as usize).max().unwrap_or(0);
    let mut marks = BitSet::with_capacity(max_offset + 1);

    if let Some(first) = instrs.first() {
        marks.insert(first.offset as usize);
    }
    for (i, inst) in instrs.iter().enumerate() {
        for target in inst.branch_targets() {
            marks.insert(target as usize);
        }
        if inst.is_terminator() {
            if let Some(next) = instrs.get(i + 1) {
                marks.insert(next.offset as usize);
            }
        }
    }
    for region in regions {
        marks.insert(region.try_start as usize);
        marks.insert(region.handler_start as usize);
        if let Some(filter) = region.filter_start {
            marks.insert(filter as usize);
        }
    }

    let mut leaders: Vec<u32> = marks.iter().map(|o| o as u32).collect();
    leaders.sort_unstable();

    for &offset in &leaders {
        if !instrs.iter().any(|i| i.offset == offset) {
            return Err(ImportError::invalid_input(offset, "leader offset is not the start of any instruction"));
        }
    }

    Ok(leaders)
}
