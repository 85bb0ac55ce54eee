//! Forest analysis (spec.md 4.5): classifies each instruction as a leaf
//! (emitted inline as part of a parent expression tree) or a root (emitted
//! as its own statement). Reconstructing expression trees from linear SSA
//! is what lets a codegen back-end avoid naming a temporary for every
//! intermediate value.

use hashbrown::HashSet;
use if_chain::if_chain;

use crate::ir::{CilIntrinsic, InstId, InstKind, MethodBody, Value};
use crate::types::member::MdArrayOp;

use super::alias;

/// The result of running [`analyze`] over one [`MethodBody`]: the set of
/// instructions classified as leaves. Everything not in this set is a
/// tree root (spec.md 4.5's public contract: `IsLeaf`, `IsTreeRoot`,
/// `SetLeaf`).
#[derive(Default, Debug, Clone)]
pub struct Forest {
    leaves: HashSet<InstId>,
}

impl Forest {
    #[must_use]
    pub fn is_leaf(&self, inst: InstId) -> bool { self.leaves.contains(&inst) }

    #[must_use]
    pub fn is_tree_root(&self, inst: InstId) -> bool { !self.is_leaf(inst) }

    pub fn set_leaf(&mut self, inst: InstId, leaf: bool) {
        if leaf { self.leaves.insert(inst); } else { self.leaves.remove(&inst); }
    }
}

/// `FieldAddrInst`, `ExtractFieldInst`, and the `ArrayLen`/`SizeOf`
/// intrinsics may be inlined at every use site even when used more than
/// once, since recomputing them is free (spec.md 4.5: "Cheap-to-
/// rematerialize").
fn is_cheap_to_rematerialize(kind: &InstKind) -> bool {
    matches!(
        kind,
        InstKind::FieldAddr { .. } | InstKind::ExtractField { .. }
            | InstKind::Intrinsic { op: CilIntrinsic::ArrayLen | CilIntrinsic::SizeOf(_), .. }
    )
}

fn any_user_is_phi(body: &MethodBody, def: InstId) -> bool {
    body.uses_of(Value::Instruction(def)).any(|(u, _)| body.inst(u).kind.is_phi())
}

/// If `inst` reads memory through a nameable address, the address value —
/// used by the hazard check to consult [`alias::may_alias`] against an
/// intervening write. `None` for anything that does not read memory, or
/// reads it in a way this analysis cannot name an address for (a `Call`,
/// which the eligibility check already excludes since it is never
/// single-use-eligible without side effects anyway, but is handled
/// defensively here too).
fn reads_memory_addr(kind: &InstKind) -> Option<Value> {
    match kind {
        InstKind::Load { addr, .. } => Some(*addr),
        InstKind::LoadVar { var, .. } => Some(*var),
        InstKind::MdArray { op: MdArrayOp::Get, array, .. } => Some(*array),
        _ => None,
    }
}

/// The address `kind` writes through, if it is a memory write this
/// analysis can name a target for.
fn write_addr(kind: &InstKind) -> Option<Value> {
    match kind {
        InstKind::Store { addr, .. } => Some(*addr),
        InstKind::StoreVar { var, .. } => Some(*var),
        InstKind::MdArray { op: MdArrayOp::Set | MdArrayOp::SizeCtor | MdArrayOp::RangeCtor, array, .. } => Some(*array),
        _ => None,
    }
}

/// Does `intervening` hazard moving `def`'s computation down to its use,
/// i.e. emitting `def` inline at the use site instead of in its original
/// position (spec.md 4.5 "Hazard check")?
fn conflicts(body: &MethodBody, def: InstId, intervening: InstId) -> bool {
    let ikind = &body.inst(intervening).kind;
    // Opaque control transfer or an arbitrary-effect call always blocks
    // reordering past it, regardless of what `def` does.
    if matches!(
        ikind,
        InstKind::Call { .. } | InstKind::Throw { .. } | InstKind::Branch { .. }
            | InstKind::Guard { .. } | InstKind::Return { .. } | InstKind::Unreachable
    ) {
        return true;
    }
    // A memory write only threatens `def` if `def` itself reads memory; a
    // pure address computation or arithmetic value is unaffected by any
    // write happening to occur between it and its use (spec.md 4.5: "Load
    // vs Store pairs consult the alias analysis"). Two non-writing accesses
    // (ArrayAddr, FieldAddr, Load) are always interchangeable for hazard
    // purposes.
    if_chain! {
        if let Some(wa) = write_addr(ikind);
        if let Some(ra) = reads_memory_addr(&body.inst(def).kind);
        then { return alias::may_alias(body, ra, wa); }
    }
    false
}

/// Walk strictly between `def` and `user` (both already known to be in the
/// same block, `def` preceding `user`), skipping instructions already
/// classified as leaves (they will be emitted past `def`, at their own
/// user, so they cannot hazard this move) and rejecting if any remaining
/// intervening instruction conflicts with inlining `def` at `user`.
fn has_hazard(body: &MethodBody, forest: &Forest, def: InstId, user: InstId) -> bool {
    let mut cur = body.inst_after(def);
    while let Some(i) = cur {
        if i == user { break; }
        if !forest.is_leaf(i) && conflicts(body, def, i) {
            return true;
        }
        cur = body.inst_after(i);
    }
    false
}

/// Run the Forest analysis over every block of `body` (spec.md 4.5).
#[must_use]
pub fn analyze(body: &MethodBody) -> Forest {
    let mut forest = Forest::default();
    for (block_id, _) in body.blocks() {
        let insts: Vec<InstId> = body.block_insts(block_id).collect();
        for &user in insts.iter().rev() {
            consider_operands(body, &mut forest, user);
        }
    }
    forest
}

fn consider_operands(body: &MethodBody, forest: &mut Forest, user: InstId) {
    let user_block = body.inst(user).block;
    for op in body.inst(user).kind.operands() {
        let Value::Instruction(def) = op else { continue };
        if body.inst(def).block != user_block { continue; }
        if body.inst(def).kind.is_phi() { continue; }

        let single_use = body.num_uses(Value::Instruction(def)) == 1;
        let cheap = is_cheap_to_rematerialize(&body.inst(def).kind) && !any_user_is_phi(body, def);
        if !(single_use || cheap) { continue; }
        if has_hazard(body, forest, def, user) { continue; }

        forest.set_leaf(def, true);
        if single_use {
            consider_operands(body, forest, def);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instruction::BinOp;
    use crate::ir::value::{ArgId, ConstData, ConstKind, PhiArg};
    use crate::types::TypeStore;

    #[test]
    fn single_use_chain_is_all_leaves_except_the_root() {
        let types = TypeStore::new();
        let mut body = MethodBody::new();
        let entry = body.entry_block;
        let x = Value::Argument(ArgId(0));
        let y = Value::Argument(ArgId(1));
        let z = Value::Argument(ArgId(2));
        let a = body.append(entry, InstKind::Binary { op: BinOp::Add, left: x, right: y }, types.i32_);
        let b = body.append(entry, InstKind::Binary { op: BinOp::Mul, left: Value::Instruction(a), right: z }, types.i32_);
        body.append(entry, InstKind::Return { values: smallvec::smallvec![Value::Instruction(b)] }, types.void);

        let forest = analyze(&body);
        assert!(forest.is_leaf(a));
        assert!(forest.is_tree_root(b));
    }

    #[test]
    fn a_second_user_disqualifies_a_plain_binary_from_leaf_status() {
        let types = TypeStore::new();
        let mut body = MethodBody::new();
        let entry = body.entry_block;
        let x = Value::Argument(ArgId(0));
        let y = Value::Argument(ArgId(1));
        let z = Value::Argument(ArgId(2));
        let a = body.append(entry, InstKind::Binary { op: BinOp::Add, left: x, right: y }, types.i32_);
        let b = body.append(entry, InstKind::Binary { op: BinOp::Mul, left: Value::Instruction(a), right: z }, types.i32_);
        let c = body.append(entry, InstKind::Binary { op: BinOp::Sub, left: Value::Instruction(a), right: z }, types.i32_);
        body.append(entry, InstKind::Return { values: smallvec::smallvec![Value::Instruction(b), Value::Instruction(c)] }, types.void);

        let forest = analyze(&body);
        assert!(!forest.is_leaf(a), "two users and not cheap-to-rematerialize: must be a root");
    }

    #[test]
    fn aliasing_store_between_a_load_and_its_use_blocks_inlining() {
        let mut types = TypeStore::new();
        let owner = types.define_type(crate::types::member::TypeDefData { name: None, kind: crate::types::Kind::Reference });
        let f = types.define_field(crate::types::member::FieldData { name: None, owner: Some(owner), ty: types.i32_, is_static: false });
        let mut body = MethodBody::new();
        let entry = body.entry_block;
        let base = Value::Argument(ArgId(0));
        let p = body.append(entry, InstKind::FieldAddr { base, field: f }, types.i32_);
        let load_a = body.append(entry, InstKind::Load { addr: Value::Instruction(p), ty: types.i32_ }, types.i32_);
        let q = body.append(entry, InstKind::FieldAddr { base, field: f }, types.i32_); // same field as p: aliases
        let v = Value::Argument(ArgId(1));
        body.append(entry, InstKind::Store { addr: Value::Instruction(q), value: v }, types.void);
        let one = body.create_const(ConstData { kind: ConstKind::Int(1), ty: types.i32_ });
        let add_b = body.append(entry, InstKind::Binary { op: BinOp::Add, left: Value::Instruction(load_a), right: Value::Const(one) }, types.i32_);
        body.append(entry, InstKind::Return { values: smallvec::smallvec![Value::Instruction(add_b)] }, types.void);

        let forest = analyze(&body);
        assert!(!forest.is_leaf(load_a), "the intervening store aliases the load's field, so inlining is unsafe");
        let _ = q;
    }

    #[test]
    fn non_aliasing_store_between_a_load_and_its_use_allows_inlining() {
        let mut types = TypeStore::new();
        let owner = types.define_type(crate::types::member::TypeDefData { name: None, kind: crate::types::Kind::Reference });
        let fx = types.define_field(crate::types::member::FieldData { name: None, owner: Some(owner), ty: types.i32_, is_static: false });
        let fy = types.define_field(crate::types::member::FieldData { name: None, owner: Some(owner), ty: types.i32_, is_static: false });
        let mut body = MethodBody::new();
        let entry = body.entry_block;
        let base = Value::Argument(ArgId(0));
        let p = body.append(entry, InstKind::FieldAddr { base, field: fx }, types.i32_);
        let load_a = body.append(entry, InstKind::Load { addr: Value::Instruction(p), ty: types.i32_ }, types.i32_);
        let q = body.append(entry, InstKind::FieldAddr { base, field: fy }, types.i32_); // distinct field: no alias
        let v = Value::Argument(ArgId(1));
        body.append(entry, InstKind::Store { addr: Value::Instruction(q), value: v }, types.void);
        let one = body.create_const(ConstData { kind: ConstKind::Int(1), ty: types.i32_ });
        let add_b = body.append(entry, InstKind::Binary { op: BinOp::Add, left: Value::Instruction(load_a), right: Value::Const(one) }, types.i32_);
        body.append(entry, InstKind::Return { values: smallvec::smallvec![Value::Instruction(add_b)] }, types.void);

        let forest = analyze(&body);
        assert!(forest.is_leaf(load_a));
    }

    #[test]
    fn phi_arguments_are_never_leaves() {
        let types = TypeStore::new();
        let mut body = MethodBody::new();
        let pred1 = body.create_block();
        let pred2 = body.create_block();
        let merge = body.create_block();
        let one = body.create_const(ConstData { kind: ConstKind::Int(1), ty: types.i32_ });
        let def = body.append(pred1, InstKind::Unary { op: crate::ir::UnOp::Neg, operand: Value::Const(one) }, types.i32_);
        body.append(pred1, InstKind::Branch { cond: None, then_blk: merge, else_blk: None }, types.void);
        body.add_edge(pred1, merge);
        body.append(pred2, InstKind::Branch { cond: None, then_blk: merge, else_blk: None }, types.void);
        body.add_edge(pred2, merge);
        let phi = body.append(
            merge,
            InstKind::Phi { args: smallvec::smallvec![
                PhiArg { pred: pred1, value: Value::Instruction(def) },
                PhiArg { pred: pred2, value: Value::Const(one) },
            ] },
            types.i32_,
        );
        body.append(merge, InstKind::Return { values: smallvec::smallvec![Value::Instruction(phi)] }, types.void);

        let forest = analyze(&body);
        // `def` lives in a different block than the phi, so it is already
        // excluded by the same-block rule; the phi itself is never a leaf
        // candidate either (it has no same-block single user here).
        assert!(!forest.is_leaf(def));
        assert!(!forest.is_leaf(phi));
    }
}
