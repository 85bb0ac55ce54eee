//! Dead-code elimination (spec.md 4.5): unreachable-block removal
//! (folding constant conditional branches as it goes), mark-and-sweep
//! useless-instruction removal, and trivial-phi peeling.

use hashbrown::HashSet;
use smallvec::SmallVec;

use crate::ir::value::ConstKind;
use crate::ir::{BlockId, InstId, InstKind, MethodBody, Value};

use super::Invalidation;

fn const_bool(body: &MethodBody, v: Value) -> Option<bool> {
    match v {
        Value::Const(c) => Some(match &body.konst(c).kind {
            ConstKind::Int(n) => *n != 0,
            ConstKind::Float(bits) => f64::from_bits(*bits) != 0.0,
            ConstKind::Null => false,
            ConstKind::String(_) => true,
        }),
        _ => None,
    }
}

/// If `b`'s terminator is a conditional branch on a statically known
/// constant, rewrite it to the unconditional jump to the taken target and
/// drop the untaken successor's phi argument for `b` (spec.md 4.5:
/// "fold `BranchInst` whose condition is a constant").
fn fold_constant_branch(body: &mut MethodBody, b: BlockId, inval: &mut Invalidation) {
    let Some(last) = body.block(b).last() else { return };
    let (cond, then_blk, else_blk) = match body.inst(last).kind {
        InstKind::Branch { cond: Some(c), then_blk, else_blk: Some(e) } => (c, then_blk, e),
        _ => return,
    };
    let Some(taken_is_then) = const_bool(body, cond) else { return };
    let (keep, drop) = if taken_is_then { (then_blk, else_blk) } else { (else_blk, then_blk) };
    body.remove_phi_arg(drop, b);
    body.set_branch(last, InstKind::Branch { cond: None, then_blk: keep, else_blk: None }, &[keep]);
    *inval |= Invalidation::CONTROL_FLOW;
}

/// DFS from the entry block following successors (spec.md 4.5
/// "Unreachable-block removal"), folding constant branches as each block
/// is first visited so the walk only ever follows statically-live edges.
/// Any block never reached is removed, after first stripping its
/// contribution from every surviving successor's phis.
pub fn remove_unreachable_blocks(body: &mut MethodBody) -> Invalidation {
    let mut inval = Invalidation::empty();
    let mut visited: HashSet<BlockId> = HashSet::new();
    let mut stack = vec![body.entry_block];
    while let Some(b) = stack.pop() {
        if !visited.insert(b) { continue; }
        fold_constant_branch(body, b, &mut inval);
        for s in body.block(b).succs.clone() {
            if !visited.contains(&s) { stack.push(s); }
        }
    }

    let dead: Vec<BlockId> = body.blocks().map(|(id, _)| id).filter(|id| !visited.contains(id)).collect();
    for d in dead {
        for s in body.block(d).succs.clone() {
            body.remove_phi_arg(s, d);
        }
        body.remove_block(d);
        inval |= Invalidation::CONTROL_FLOW;
    }
    inval
}

/// Mark-and-sweep over the use-def graph (spec.md 4.5
/// "Useless-instruction removal"): seed the worklist with every
/// instruction that is not `SafeToRemove`, transitively keep every
/// operand of a live instruction alive, and remove everything left over.
/// Dead instructions are removed by repeatedly sweeping for zero-use
/// members rather than in a single reverse pass, since a dead phi loop
/// (an induction variable whose only users are themselves dead) only
/// reaches zero uses once its partner in the cycle is gone.
pub fn remove_useless_instructions(body: &mut MethodBody) -> Invalidation {
    let mut inval = Invalidation::empty();
    let all: Vec<InstId> = body.blocks().flat_map(|(id, _)| body.block_insts(id)).collect();

    let mut live: HashSet<InstId> = HashSet::new();
    let mut worklist: Vec<InstId> = Vec::new();
    for &i in &all {
        if !body.inst(i).kind.safe_to_remove() && live.insert(i) {
            worklist.push(i);
        }
    }
    while let Some(i) = worklist.pop() {
        for op in body.inst(i).kind.operands() {
            if let Value::Instruction(d) = op {
                if live.insert(d) { worklist.push(d); }
            }
        }
    }

    let mut dead: Vec<InstId> = all.into_iter().filter(|i| !live.contains(i)).collect();
    loop {
        let before = dead.len();
        dead.retain(|&i| {
            if body.num_uses(Value::Instruction(i)) == 0 {
                body.remove(i);
                false
            } else {
                true
            }
        });
        if dead.len() == before { break; }
        inval |= Invalidation::USE_DEF;
    }
    debug_assert!(dead.is_empty(), "every dead instruction's only users are other dead instructions, so the sweep always clears");
    inval
}

/// Iteratively peel phis whose incoming arguments — ignoring
/// self-references — all resolve to one value (spec.md 4.5: "phis that
/// survive and whose arguments all resolve to a single value... are
/// peeled, iteratively following phi chains").
pub fn peel_trivial_phis(body: &mut MethodBody) -> Invalidation {
    let mut inval = Invalidation::empty();
    loop {
        let phis: Vec<InstId> = body
            .blocks()
            .flat_map(|(id, _)| body.block_insts(id))
            .filter(|&i| body.inst(i).kind.is_phi())
            .collect();
        let mut changed = false;
        for phi in phis {
            let args: SmallVec<[crate::ir::PhiArg; 4]> = match &body.inst(phi).kind {
                InstKind::Phi { args } => args.clone(),
                _ => continue,
            };
            let mut single: Option<Value> = None;
            let mut trivial = true;
            for a in &args {
                if a.value == Value::Instruction(phi) { continue; }
                match single {
                    None => single = Some(a.value),
                    Some(v) if v == a.value => {}
                    _ => { trivial = false; break; }
                }
            }
            if trivial {
                if let Some(v) = single {
                    body.replace_uses(Value::Instruction(phi), v);
                    body.remove(phi);
                    changed = true;
                    inval |= Invalidation::USE_DEF;
                }
            }
        }
        if !changed { break; }
    }
    inval
}

/// Run the full DCE pipeline to a fixpoint: unreachable-block removal,
/// useless-instruction removal, and trivial-phi peeling, repeated until a
/// round makes no further change (spec.md 8: "DCE is idempotent: running
/// it twice has no effect on the second pass" — the second top-level call
/// simply finds an already-empty worklist on its first internal round).
pub fn run(body: &mut MethodBody) -> Invalidation {
    let mut inval = Invalidation::empty();
    loop {
        let round = remove_unreachable_blocks(body) | remove_useless_instructions(body) | peel_trivial_phis(body);
        inval |= round;
        if round.is_empty() { break; }
    }
    inval
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instruction::{BinOp, PhiArg};
    use crate::ir::value::{ConstData, ConstKind};
    use crate::types::TypeStore;

    #[test]
    fn folds_a_constant_conditional_and_removes_the_dead_arm() {
        let types = TypeStore::new();
        let mut body = MethodBody::new();
        let b1 = body.create_block();
        let b2 = body.create_block();
        let entry = body.entry_block;
        let one = body.create_const(ConstData { kind: ConstKind::Int(1), ty: types.bool_ });
        body.append(entry, InstKind::Branch { cond: Some(Value::Const(one)), then_blk: b1, else_blk: Some(b2) }, types.void);
        body.add_edge(entry, b1);
        body.add_edge(entry, b2);
        let one_i = body.create_const(ConstData { kind: ConstKind::Int(1), ty: types.i32_ });
        body.append(b1, InstKind::Return { values: smallvec::smallvec![Value::Const(one_i)] }, types.void);
        let two_i = body.create_const(ConstData { kind: ConstKind::Int(2), ty: types.i32_ });
        body.append(b2, InstKind::Return { values: smallvec::smallvec![Value::Const(two_i)] }, types.void);

        run(&mut body);

        assert_eq!(body.num_blocks(), 2, "B2 must be removed, leaving just entry and B1");
        let entry_last = body.block(entry).last().unwrap();
        assert!(matches!(body.inst(entry_last).kind, InstKind::Branch { cond: None, then_blk, .. } if then_blk == b1));
    }

    #[test]
    fn peels_a_trivial_phi_whose_arms_agree() {
        let types = TypeStore::new();
        let mut body = MethodBody::new();
        let p1 = body.create_block();
        let p2 = body.create_block();
        let merge = body.create_block();
        let seven = body.create_const(ConstData { kind: ConstKind::Int(7), ty: types.i32_ });
        body.append(p1, InstKind::Branch { cond: None, then_blk: merge, else_blk: None }, types.void);
        body.add_edge(p1, merge);
        body.append(p2, InstKind::Branch { cond: None, then_blk: merge, else_blk: None }, types.void);
        body.add_edge(p2, merge);
        let phi = body.append(
            merge,
            InstKind::Phi { args: smallvec::smallvec![
                PhiArg { pred: p1, value: Value::Const(seven) },
                PhiArg { pred: p2, value: Value::Const(seven) },
            ] },
            types.i32_,
        );
        let user = body.append(merge, InstKind::Unary { op: crate::ir::UnOp::Neg, operand: Value::Instruction(phi) }, types.i32_);
        body.append(merge, InstKind::Return { values: smallvec::smallvec![Value::Instruction(user)] }, types.void);

        peel_trivial_phis(&mut body);

        assert!(!body.block_insts(merge).any(|i| body.inst(i).kind.is_phi()));
        assert!(matches!(body.inst(user).kind, InstKind::Unary { operand: Value::Const(c), .. } if c == seven));
    }

    #[test]
    fn removes_a_dead_instruction_chain_with_no_side_effects() {
        let types = TypeStore::new();
        let mut body = MethodBody::new();
        let entry = body.entry_block;
        let zero = body.create_const(ConstData { kind: ConstKind::Int(0), ty: types.i32_ });
        let dead = body.append(entry, InstKind::Binary { op: BinOp::Add, left: Value::Const(zero), right: Value::Const(zero) }, types.i32_);
        body.append(entry, InstKind::Return { values: smallvec::smallvec![] }, types.void);

        run(&mut body);

        assert!(body.block_insts(entry).all(|i| i != dead));
    }

    #[test]
    fn dce_is_idempotent() {
        let types = TypeStore::new();
        let mut body = MethodBody::new();
        let entry = body.entry_block;
        let zero = body.create_const(ConstData { kind: ConstKind::Int(0), ty: types.i32_ });
        body.append(entry, InstKind::Binary { op: BinOp::Add, left: Value::Const(zero), right: Value::Const(zero) }, types.i32_);
        body.append(entry, InstKind::Return { values: smallvec::smallvec![] }, types.void);

        let first = run(&mut body);
        assert!(!first.is_empty());
        let second = run(&mut body);
        assert!(second.is_empty(), "a second DCE pass over an already-clean body must be a no-op");
    }
}
