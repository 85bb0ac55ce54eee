//! `SimplifyCFG` (spec.md 4.5): compare-to-zero branch inversion and
//! single-predecessor jump-chain block merging, run to a fixpoint.

use crate::ir::instruction::CmpOp;
use crate::ir::value::ConstKind;
use crate::ir::{BlockId, InstId, InstKind, MethodBody, Value};

use super::Invalidation;

fn is_zero_const(body: &MethodBody, v: Value) -> bool {
    match v {
        Value::Const(c) => match &body.konst(c).kind {
            ConstKind::Int(n) => *n == 0,
            ConstKind::Float(bits) => f64::from_bits(*bits) == 0.0,
            _ => false,
        },
        _ => false,
    }
}

/// If `term` is a conditional branch whose condition is a single-use
/// `Compare` against a zero constant, drop the compare and branch on the
/// other operand directly, swapping the targets for `Eq` so the branch
/// keeps its original meaning (spec.md 4.5: "branch on `cmp.eq x, 0`
/// becomes branch on `x` with the arms swapped"). The now-unused compare
/// is left for `analysis::dce` to sweep up.
fn invert_compare_to_zero(body: &mut MethodBody, term: InstId, inval: &mut Invalidation) {
    let (cond, then_blk, else_blk) = match body.inst(term).kind {
        InstKind::Branch { cond: Some(c), then_blk, else_blk: Some(e) } => (c, then_blk, e),
        _ => return,
    };
    let Value::Instruction(cmp_id) = cond else { return };
    let (op, left, right) = match body.inst(cmp_id).kind {
        InstKind::Compare { op: op @ (CmpOp::Eq | CmpOp::Ne), left, right } => (op, left, right),
        _ => return,
    };
    if body.num_uses(Value::Instruction(cmp_id)) != 1 {
        return;
    }
    let operand = match (is_zero_const(body, left), is_zero_const(body, right)) {
        (true, false) => right,
        (false, true) => left,
        _ => return,
    };
    let (new_then, new_else) = if op == CmpOp::Eq { (else_blk, then_blk) } else { (then_blk, else_blk) };
    body.set_branch(
        term,
        InstKind::Branch { cond: Some(operand), then_blk: new_then, else_blk: Some(new_else) },
        &[new_then, new_else],
    );
    *inval |= Invalidation::CONTROL_FLOW;
}

/// Merge `b` into its unique predecessor `p` when `p`'s only successor is
/// `b` (spec.md 4.5: "a block with a single predecessor whose terminator
/// is an unconditional jump to it is merged into that predecessor").
/// Returns whether a merge happened.
fn try_merge_into_predecessor(body: &mut MethodBody, b: BlockId) -> bool {
    if b == body.entry_block || body.block(b).num_preds() != 1 {
        return false;
    }
    let p = body.block(b).preds[0];
    if p == b || body.block(p).num_succs() != 1 {
        return false;
    }
    let term = body.block(p).last().expect("non-empty block has a terminator");
    if !matches!(body.inst(term).kind, InstKind::Branch { cond: None, else_blk: None, .. }) {
        return false;
    }
    // A `GuardInst` header marks `b` as the entry of a protected region
    // (spec.md section 3: "guards only appear in blocks that start a
    // protected region"); splicing it into `p` would move the region's
    // entry point without being one. Trivial single-argument phis are
    // resolved below, so only a guard blocks the merge.
    if body.block_insts(b).take_while(|&i| body.inst(i).kind.is_header()).any(|i| body.inst(i).kind.is_guard()) {
        return false;
    }

    for s in body.block(b).succs.clone() {
        body.remove_edge(b, s);
        body.add_edge(p, s);
        body.redirect_phis(s, b, p);
    }
    body.remove_edge(p, b);
    body.remove(term);

    let phis: Vec<InstId> = body.block_insts(b).take_while(|&i| body.inst(i).kind.is_phi()).collect();
    for phi in phis {
        let value = match &body.inst(phi).kind {
            InstKind::Phi { args } => args.iter().find(|a| a.pred == p).map(|a| a.value),
            _ => None,
        };
        if let Some(v) = value {
            body.replace_uses(Value::Instruction(phi), v);
        }
        body.remove(phi);
    }

    if let (Some(first), Some(last)) = (body.block(b).first(), body.block(b).last()) {
        body.move_range(first, last, p);
    }
    body.remove_block(b);
    true
}

/// Invert every compare-to-zero branch once. Separated from
/// [`merge_jump_chains`] so each sub-pass's fixpoint is easy to reason
/// about independently, matching [`super::dce`]'s split between
/// unreachable-block removal and useless-instruction removal.
pub fn invert_compares(body: &mut MethodBody) -> Invalidation {
    let mut inval = Invalidation::empty();
    let terms: Vec<InstId> = body.blocks().filter_map(|(_, blk)| blk.last()).collect();
    for t in terms {
        invert_compare_to_zero(body, t, &mut inval);
    }
    inval
}

/// Merge every eligible single-predecessor jump chain, to a fixpoint (one
/// merge can make the new combined block itself eligible to merge into
/// its own unique predecessor).
pub fn merge_jump_chains(body: &mut MethodBody) -> Invalidation {
    let mut inval = Invalidation::empty();
    loop {
        let candidates: Vec<BlockId> = body.blocks().map(|(id, _)| id).collect();
        let mut changed = false;
        for b in candidates {
            if body.block(b).is_removed() {
                continue;
            }
            if try_merge_into_predecessor(body, b) {
                changed = true;
                inval |= Invalidation::CONTROL_FLOW;
            }
        }
        if !changed {
            break;
        }
    }
    inval
}

/// Run both sub-passes to a fixpoint (spec.md 4.5).
pub fn run(body: &mut MethodBody) -> Invalidation {
    let mut inval = Invalidation::empty();
    loop {
        let round = invert_compares(body) | merge_jump_chains(body);
        inval |= round;
        if round.is_empty() {
            break;
        }
    }
    inval
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::value::{ArgId, ConstData, ConstKind};
    use crate::types::TypeStore;

    #[test]
    fn inverts_a_compare_to_zero_branch_and_swaps_targets() {
        let types = TypeStore::new();
        let mut body = MethodBody::new();
        let entry = body.entry_block;
        let then_blk = body.create_block();
        let else_blk = body.create_block();
        let x = Value::Argument(ArgId(0));
        let zero = body.create_const(ConstData { kind: ConstKind::Int(0), ty: types.i32_ });
        let cmp = body.append(entry, InstKind::Compare { op: CmpOp::Eq, left: x, right: Value::Const(zero) }, types.bool_);
        let term = body.append(
            entry,
            InstKind::Branch { cond: Some(Value::Instruction(cmp)), then_blk, else_blk: Some(else_blk) },
            types.void,
        );
        body.add_edge(entry, then_blk);
        body.add_edge(entry, else_blk);

        invert_compares(&mut body);

        match body.inst(term).kind {
            InstKind::Branch { cond: Some(c), then_blk: t, else_blk: Some(e) } => {
                assert_eq!(c, x, "branch now tests x directly, not the compare result");
                assert_eq!(t, else_blk, "Eq arms swap: the old else becomes the new then");
                assert_eq!(e, then_blk);
            }
            _ => panic!("expected a conditional branch"),
        }
        assert_eq!(body.num_uses(Value::Instruction(cmp)), 0);
    }

    #[test]
    fn leaves_a_multiply_used_compare_alone() {
        let types = TypeStore::new();
        let mut body = MethodBody::new();
        let entry = body.entry_block;
        let then_blk = body.create_block();
        let else_blk = body.create_block();
        let x = Value::Argument(ArgId(0));
        let zero = body.create_const(ConstData { kind: ConstKind::Int(0), ty: types.i32_ });
        let cmp = body.append(entry, InstKind::Compare { op: CmpOp::Eq, left: x, right: Value::Const(zero) }, types.bool_);
        let term = body.append(
            entry,
            InstKind::Branch { cond: Some(Value::Instruction(cmp)), then_blk, else_blk: Some(else_blk) },
            types.void,
        );
        body.add_edge(entry, then_blk);
        body.add_edge(entry, else_blk);
        body.append(then_blk, InstKind::Return { values: smallvec::smallvec![Value::Instruction(cmp)] }, types.void);

        invert_compares(&mut body);

        assert!(matches!(body.inst(term).kind, InstKind::Branch { cond: Some(Value::Instruction(c)), .. } if c == cmp));
    }

    #[test]
    fn merges_a_single_predecessor_jump_chain() {
        let types = TypeStore::new();
        let mut body = MethodBody::new();
        let entry = body.entry_block;
        let mid = body.create_block();
        let zero = body.create_const(ConstData { kind: ConstKind::Int(0), ty: types.i32_ });
        body.append(entry, InstKind::Branch { cond: None, then_blk: mid, else_blk: None }, types.void);
        body.add_edge(entry, mid);
        let add = body.append(mid, InstKind::Unary { op: crate::ir::UnOp::Neg, operand: Value::Const(zero) }, types.i32_);
        body.append(mid, InstKind::Return { values: smallvec::smallvec![Value::Instruction(add)] }, types.void);

        merge_jump_chains(&mut body);

        assert_eq!(body.num_blocks(), 1, "mid merges entirely into entry");
        let insts: Vec<_> = body.block_insts(entry).collect();
        assert_eq!(insts.len(), 2, "the neg and the return both now live in entry");
        assert!(matches!(body.inst(insts[1]).kind, InstKind::Return { .. }));
    }

    #[test]
    fn merges_and_resolves_the_merged_blocks_own_phi() {
        let types = TypeStore::new();
        let mut body = MethodBody::new();
        let entry = body.entry_block;
        let mid = body.create_block();
        let seven = body.create_const(ConstData { kind: ConstKind::Int(7), ty: types.i32_ });
        body.append(entry, InstKind::Branch { cond: None, then_blk: mid, else_blk: None }, types.void);
        body.add_edge(entry, mid);
        let phi = body.append(
            mid,
            InstKind::Phi { args: smallvec::smallvec![crate::ir::PhiArg { pred: entry, value: Value::Const(seven) }] },
            types.i32_,
        );
        body.append(mid, InstKind::Return { values: smallvec::smallvec![Value::Instruction(phi)] }, types.void);

        merge_jump_chains(&mut body);

        assert_eq!(body.num_blocks(), 1);
        let ret = body.block(entry).last().unwrap();
        assert!(matches!(body.inst(ret).kind, InstKind::Return { ref values } if values[0] == Value::Const(seven)));
    }

    #[test]
    fn does_not_merge_a_block_that_starts_a_protected_region() {
        use crate::ir::instruction::GuardKind;

        let types = TypeStore::new();
        let mut body = MethodBody::new();
        let entry = body.entry_block;
        let try_entry = body.create_block();
        let handler = body.create_block();
        body.append(entry, InstKind::Branch { cond: None, then_blk: try_entry, else_blk: None }, types.void);
        body.add_edge(entry, try_entry);
        body.append(
            try_entry,
            InstKind::Guard { kind: GuardKind::Catch, handler, filter: None, catch_type: None },
            types.void,
        );
        let null = body.create_const(ConstData { kind: ConstKind::Null, ty: types.object });
        body.append(try_entry, InstKind::Throw { value: Value::Const(null) }, types.void);
        body.append(handler, InstKind::Return { values: smallvec::smallvec![] }, types.void);

        merge_jump_chains(&mut body);

        assert_eq!(body.num_blocks(), 3, "try_entry must stay separate: it is the entry of a protected region");
        assert!(body.block_insts(try_entry).any(|i| body.inst(i).kind.is_guard()));
    }
}
