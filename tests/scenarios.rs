//! End-to-end scenarios driving the public API: build a `MethodBody`
//! directly (bypassing the bytecode importer, which has its own
//! extensive in-module tests) and run the published analyses/transforms
//! over it, checking the externally observable result.

use cilcore::analysis::{alias, dce, forest, simplify_cfg};
use cilcore::ir::instruction::{BinOp, CmpOp};
use cilcore::ir::value::{ArgId, ConstData, ConstKind};
use cilcore::ir::{InstKind, MethodBody, PhiArg, UnOp, Value};
use cilcore::types::TypeStore;

#[test]
fn folding_a_constant_conditional_removes_the_dead_arm() {
    let types = TypeStore::new();
    let mut body = MethodBody::new();
    let entry = body.entry_block;
    let b1 = body.create_block();
    let b2 = body.create_block();

    let truthy = body.create_const(ConstData { kind: ConstKind::Int(1), ty: types.bool_ });
    body.append(entry, InstKind::Branch { cond: Some(Value::Const(truthy)), then_blk: b1, else_blk: Some(b2) }, types.void);
    body.add_edge(entry, b1);
    body.add_edge(entry, b2);
    let one = body.create_const(ConstData { kind: ConstKind::Int(1), ty: types.i32_ });
    body.append(b1, InstKind::Return { values: smallvec::smallvec![Value::Const(one)] }, types.void);
    let two = body.create_const(ConstData { kind: ConstKind::Int(2), ty: types.i32_ });
    body.append(b2, InstKind::Return { values: smallvec::smallvec![Value::Const(two)] }, types.void);

    dce::run(&mut body);

    assert_eq!(body.num_blocks(), 2, "B2 was never reachable once the branch folds");
    let term = body.block(entry).last().unwrap();
    assert!(matches!(body.inst(term).kind, InstKind::Branch { cond: None, then_blk, .. } if then_blk == b1));
}

#[test]
fn trivial_phi_peel_exposes_the_constant_to_users() {
    let types = TypeStore::new();
    let mut body = MethodBody::new();
    let p1 = body.create_block();
    let p2 = body.create_block();
    let m = body.create_block();
    let seven = body.create_const(ConstData { kind: ConstKind::Int(7), ty: types.i32_ });
    body.append(p1, InstKind::Branch { cond: None, then_blk: m, else_blk: None }, types.void);
    body.add_edge(p1, m);
    body.append(p2, InstKind::Branch { cond: None, then_blk: m, else_blk: None }, types.void);
    body.add_edge(p2, m);
    let phi = body.append(
        m,
        InstKind::Phi { args: smallvec::smallvec![PhiArg { pred: p1, value: Value::Const(seven) }, PhiArg { pred: p2, value: Value::Const(seven) }] },
        types.i32_,
    );
    let user = body.append(m, InstKind::Unary { op: UnOp::Neg, operand: Value::Instruction(phi) }, types.i32_);
    body.append(m, InstKind::Return { values: smallvec::smallvec![Value::Instruction(user)] }, types.void);

    dce::run(&mut body);

    assert!(body.block_insts(m).all(|i| !body.inst(i).kind.is_phi()));
    assert!(matches!(body.inst(user).kind, InstKind::Unary { operand: Value::Const(c), .. } if c == seven));
}

#[test]
fn block_merge_appends_the_successor_and_fixes_its_phis() {
    let types = TypeStore::new();
    let mut body = MethodBody::new();
    let b0 = body.entry_block;
    let b1 = body.create_block();
    let tail = body.create_block();
    body.append(b0, InstKind::Branch { cond: None, then_blk: b1, else_blk: None }, types.void);
    body.add_edge(b0, b1);
    let forty_two = body.create_const(ConstData { kind: ConstKind::Int(42), ty: types.i32_ });
    let add = body.append(b1, InstKind::Unary { op: UnOp::Neg, operand: Value::Const(forty_two) }, types.i32_);
    body.append(b1, InstKind::Branch { cond: None, then_blk: tail, else_blk: None }, types.void);
    body.add_edge(b1, tail);
    let phi = body.append(
        tail,
        InstKind::Phi { args: smallvec::smallvec![PhiArg { pred: b1, value: Value::Instruction(add) }] },
        types.i32_,
    );
    body.append(tail, InstKind::Return { values: smallvec::smallvec![Value::Instruction(phi)] }, types.void);

    simplify_cfg::run(&mut body);

    assert_eq!(body.num_blocks(), 1, "B1 and tail both collapse into B0");
    if let InstKind::Phi { args } = &body.inst(phi).kind {
        assert_eq!(args[0].pred, b0, "the surviving phi now names B0, not the removed B1");
    } else {
        panic!("phi should still exist, just retargeted");
    }
}

#[test]
fn forest_marks_a_single_use_chain_as_leaves_except_the_root() {
    let types = TypeStore::new();
    let mut body = MethodBody::new();
    let entry = body.entry_block;
    let x = Value::Argument(body.create_arg(types.i32_, None));
    let y = Value::Argument(body.create_arg(types.i32_, None));
    let z = Value::Argument(body.create_arg(types.i32_, None));
    let a = body.append(entry, InstKind::Binary { op: BinOp::Add, left: x, right: y }, types.i32_);
    let b = body.append(entry, InstKind::Binary { op: BinOp::Mul, left: Value::Instruction(a), right: z }, types.i32_);
    body.append(entry, InstKind::Return { values: smallvec::smallvec![Value::Instruction(b)] }, types.void);

    let f = forest::analyze(&body);
    assert!(f.is_leaf(a));
    assert!(!f.is_leaf(b));

    let extra_user = body.append(entry, InstKind::Unary { op: UnOp::Neg, operand: Value::Instruction(a) }, types.i32_);
    let f2 = forest::analyze(&body);
    assert!(!f2.is_leaf(a), "a second user disqualifies a (plain) add from leaf status");
    let _ = extra_user;
}

#[test]
fn forest_respects_an_aliasing_store_between_a_load_and_its_use() {
    let mut types = TypeStore::new();
    let owner = types.define_type(cilcore::types::member::TypeDefData { name: None, kind: cilcore::types::Kind::Reference });
    let field = types.define_field(cilcore::types::member::FieldData { name: None, owner: Some(owner), ty: types.i32_, is_static: false });
    let mut body = MethodBody::new();
    let entry = body.entry_block;
    let base = Value::Argument(body.create_arg(types.object, None));
    let p = body.append(entry, InstKind::FieldAddr { base, field }, types.i32_);
    let a = body.append(entry, InstKind::Load { addr: Value::Instruction(p), ty: types.i32_ }, types.i32_);
    let one = body.create_const(ConstData { kind: ConstKind::Int(1), ty: types.i32_ });
    let q = body.append(entry, InstKind::FieldAddr { base, field }, types.i32_);
    body.append(entry, InstKind::Store { addr: Value::Instruction(q), value: Value::Const(one) }, types.void);
    let add = body.append(entry, InstKind::Binary { op: BinOp::Add, left: Value::Instruction(a), right: Value::Const(one) }, types.i32_);
    body.append(entry, InstKind::Return { values: smallvec::smallvec![Value::Instruction(add)] }, types.void);

    assert!(alias::may_alias(&body, Value::Instruction(p), Value::Instruction(q)));
    let f = forest::analyze(&body);
    assert!(!f.is_leaf(a), "the intervening store to the same field blocks inlining the load");
}

#[test]
fn compare_to_zero_inversion_drops_the_dead_compare() {
    let types = TypeStore::new();
    let mut body = MethodBody::new();
    let entry = body.entry_block;
    let t = body.create_block();
    let f = body.create_block();
    let x = Value::Argument(ArgId(0));
    let zero = body.create_const(ConstData { kind: ConstKind::Int(0), ty: types.i32_ });
    let cmp = body.append(entry, InstKind::Compare { op: CmpOp::Ne, left: x, right: Value::Const(zero) }, types.bool_);
    body.append(entry, InstKind::Branch { cond: Some(Value::Instruction(cmp)), then_blk: t, else_blk: Some(f) }, types.void);
    body.add_edge(entry, t);
    body.add_edge(entry, f);

    simplify_cfg::invert_compares(&mut body);
    dce::remove_useless_instructions(&mut body);

    let term = body.block(entry).last().unwrap();
    assert!(matches!(body.inst(term).kind, InstKind::Branch { cond: Some(c), then_blk, else_blk: Some(e) } if c == x && then_blk == t && e == f));
    assert!(body.block_insts(entry).all(|i| i != cmp), "the dead compare is swept away");
}
