//! The closed sum of instruction kinds (spec.md section 3) plus the
//! predicate accessors every pass needs (`HasSideEffects`,
//! `MayReadFromMemory`, `MayWriteToMemory`, `SafeToRemove`).
//!
//! Per the Design Notes (spec.md section 9), this is a closed sum type with
//! small accessor functions rather than a class hierarchy with `is`/`as`
//! casts — the instruction set is fixed, so open extension is not needed.

use smallvec::SmallVec;

use crate::types::{member::MdArrayOp, FieldId, MethodId, TypeId};
use super::value::{BlockId, OperandList, UseLink, Value};

/// Binary arithmetic/bitwise operators.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinOp { Add, Sub, Mul, Div, Rem, And, Or, Xor, Shl, Shr, ShrUn }

/// Unary operators, including truncating/non-value-preserving conversions
/// (`conv.*`), grounded on mmcc's `Unop`/`RValue::Unop` split between unary
/// ops and binary ops (`examples/other_examples/.../mm0-mir.rs.rs`).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnOp { Neg, Not, Conv(TypeId) }

/// Comparison operators.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CmpOp { Eq, Ne, Lt, Le, Gt, Ge, LtUn, LeUn, GtUn, GeUn }

/// The kind of exception handler a [`InstKind::Guard`] marks the start of.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GuardKind { Catch, Finally, Fault }

/// The `CilIntrinsic` namespace of opaque builtins (spec.md section 3).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CilIntrinsic { ArrayLen, SizeOf(TypeId) }

/// One incoming edge of a [`InstKind::Phi`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PhiArg {
    pub pred: BlockId,
    pub value: Value,
}

/// The full instruction sum type.
#[derive(Clone, Debug)]
pub enum InstKind {
    Binary { op: BinOp, left: Value, right: Value },
    Unary { op: UnOp, operand: Value },
    Compare { op: CmpOp, left: Value, right: Value },
    /// Unconditional if `cond` is `None` (jumps to `then_blk`); conditional
    /// otherwise (`else_blk` must be `Some` — spec.md section 3).
    Branch { cond: Option<Value>, then_blk: BlockId, else_blk: Option<BlockId> },
    Phi { args: SmallVec<[PhiArg; 4]> },
    Load { addr: Value, ty: TypeId },
    Store { addr: Value, value: Value },
    ArrayAddr { array: Value, index: Value, elem_ty: TypeId },
    FieldAddr { base: Value, field: FieldId },
    ExtractField { base: Value, field: FieldId },
    Guard { kind: GuardKind, handler: BlockId, filter: Option<BlockId>, catch_type: Option<TypeId> },
    StoreVar { var: Value, value: Value },
    LoadVar { var: Value, ty: TypeId },
    /// One of the five synthesized multi-dim-array operations (spec.md 4.1).
    MdArray { op: MdArrayOp, method: MethodId, array: Value, args: SmallVec<[Value; 4]> },
    Intrinsic { op: CilIntrinsic, args: SmallVec<[Value; 2]> },
    Call { method: MethodId, args: SmallVec<[Value; 4]> },
    Return { values: SmallVec<[Value; 2]> },
    Throw { value: Value },
    /// Marks a block as statically unreachable (e.g. the `else` arm of a
    /// constant-folded branch before DCE deletes the block outright).
    Unreachable,
}

impl InstKind {
    /// Operand values in a stable order; [`super::body::MethodBody`] keeps
    /// one [`UseLink`] per entry of this list, at the matching index.
    #[must_use]
    pub fn operands(&self) -> OperandList {
        let mut out = OperandList::new();
        match self {
            InstKind::Binary { left, right, .. } => { out.push(*left); out.push(*right); }
            InstKind::Unary { operand, .. } => out.push(*operand),
            InstKind::Compare { left, right, .. } => { out.push(*left); out.push(*right); }
            InstKind::Branch { cond, .. } => out.extend(*cond),
            InstKind::Phi { args } => out.extend(args.iter().map(|a| a.value)),
            InstKind::Load { addr, .. } => out.push(*addr),
            InstKind::Store { addr, value } => { out.push(*addr); out.push(*value); }
            InstKind::ArrayAddr { array, index, .. } => { out.push(*array); out.push(*index); }
            InstKind::FieldAddr { base, .. } => out.push(*base),
            InstKind::ExtractField { base, .. } => out.push(*base),
            InstKind::Guard { .. } => {}
            InstKind::StoreVar { var, value } => { out.push(*var); out.push(*value); }
            InstKind::LoadVar { var, .. } => out.push(*var),
            InstKind::MdArray { array, args, .. } => { out.push(*array); out.extend(args.iter().copied()); }
            InstKind::Intrinsic { args, .. } => out.extend(args.iter().copied()),
            InstKind::Call { args, .. } => out.extend(args.iter().copied()),
            InstKind::Return { values } => out.extend(values.iter().copied()),
            InstKind::Throw { value } => out.push(*value),
            InstKind::Unreachable => {}
        }
        out
    }

    /// Overwrite the operand at `idx` (as returned by [`Self::operands`])
    /// with `v`. Panics if `idx` is out of range for this instruction.
    pub fn set_operand(&mut self, idx: usize, v: Value) {
        match self {
            InstKind::Binary { left, right, .. } => match idx { 0 => *left = v, 1 => *right = v, _ => panic!("operand index") },
            InstKind::Unary { operand, .. } => { assert_eq!(idx, 0); *operand = v; }
            InstKind::Compare { left, right, .. } => match idx { 0 => *left = v, 1 => *right = v, _ => panic!("operand index") },
            InstKind::Branch { cond, .. } => { assert_eq!(idx, 0); *cond = Some(v); }
            InstKind::Phi { args } => args[idx].value = v,
            InstKind::Load { addr, .. } => { assert_eq!(idx, 0); *addr = v; }
            InstKind::Store { addr, value } => match idx { 0 => *addr = v, 1 => *value = v, _ => panic!("operand index") },
            InstKind::ArrayAddr { array, index, .. } => match idx { 0 => *array = v, 1 => *index = v, _ => panic!("operand index") },
            InstKind::FieldAddr { base, .. } => { assert_eq!(idx, 0); *base = v; }
            InstKind::ExtractField { base, .. } => { assert_eq!(idx, 0); *base = v; }
            InstKind::Guard { .. } => panic!("GuardInst has no operands"),
            InstKind::StoreVar { var, value } => match idx { 0 => *var = v, 1 => *value = v, _ => panic!("operand index") },
            InstKind::LoadVar { var, .. } => { assert_eq!(idx, 0); *var = v; }
            InstKind::MdArray { array, args, .. } => {
                if idx == 0 { *array = v; } else { args[idx - 1] = v; }
            }
            InstKind::Intrinsic { args, .. } => args[idx] = v,
            InstKind::Call { args, .. } => args[idx] = v,
            InstKind::Return { values } => values[idx] = v,
            InstKind::Throw { value } => { assert_eq!(idx, 0); *value = v; }
            InstKind::Unreachable => panic!("UnreachableInst has no operands"),
        }
    }

    /// Is this instruction a block terminator (spec.md block invariant (i))?
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        matches!(self, InstKind::Branch { .. } | InstKind::Return { .. } | InstKind::Throw { .. } | InstKind::Unreachable)
    }

    #[must_use]
    pub fn is_phi(&self) -> bool { matches!(self, InstKind::Phi { .. }) }

    #[must_use]
    pub fn is_guard(&self) -> bool { matches!(self, InstKind::Guard { .. }) }

    /// Header instructions (`PhiInst`, `GuardInst`) must precede all other
    /// instructions in a block (spec.md section 3).
    #[must_use]
    pub fn is_header(&self) -> bool { self.is_phi() || self.is_guard() }

    #[must_use]
    pub fn has_side_effects(&self) -> bool {
        matches!(
            self,
            InstKind::Store { .. } | InstKind::StoreVar { .. } | InstKind::Call { .. }
                | InstKind::Throw { .. } | InstKind::Return { .. } | InstKind::Branch { .. }
                | InstKind::Guard { .. } | InstKind::Unreachable
                | InstKind::MdArray { op: MdArrayOp::Set | MdArrayOp::SizeCtor | MdArrayOp::RangeCtor, .. }
        )
    }

    #[must_use]
    pub fn may_read_from_memory(&self) -> bool {
        matches!(
            self,
            InstKind::Load { .. } | InstKind::LoadVar { .. } | InstKind::Call { .. }
                | InstKind::MdArray { op: MdArrayOp::Get, .. }
        )
    }

    #[must_use]
    pub fn may_write_to_memory(&self) -> bool {
        matches!(
            self,
            InstKind::Store { .. } | InstKind::StoreVar { .. } | InstKind::Call { .. }
                | InstKind::MdArray { op: MdArrayOp::Set | MdArrayOp::SizeCtor | MdArrayOp::RangeCtor, .. }
        )
    }

    /// An instruction is safe to remove (if unused) iff it has no side
    /// effects — the seed set for DCE's mark phase is exactly the
    /// complement of this predicate (spec.md 4.5).
    #[must_use]
    pub fn safe_to_remove(&self) -> bool { !self.has_side_effects() }

    /// The instruction's own result type, independent of the `result_ty`
    /// stored alongside it on [`super::body::InstData`] — used by
    /// constructors before the instruction is inserted. Most kinds are
    /// void; non-void kinds carry their result type explicitly elsewhere
    /// (`result_ty` on the owning `InstData`), so this is only used to
    /// assert consistency in debug builds.
    #[must_use]
    pub fn is_void_kind(&self) -> bool {
        matches!(
            self,
            InstKind::Store { .. } | InstKind::StoreVar { .. } | InstKind::Branch { .. }
                | InstKind::Return { .. } | InstKind::Throw { .. } | InstKind::Unreachable
                | InstKind::MdArray { op: MdArrayOp::Set | MdArrayOp::SizeCtor | MdArrayOp::RangeCtor, .. }
        )
    }
}

/// A fully positioned instruction, owned by a [`super::body::MethodBody`]'s
/// instruction arena.
#[derive(Clone, Debug)]
pub struct InstData {
    pub kind: InstKind,
    pub result_ty: TypeId,
    pub block: BlockId,
    pub(super) prev: Option<super::value::InstId>,
    pub(super) next: Option<super::value::InstId>,
    /// Use-list head for this instruction's *result* (i.e. uses of
    /// `Value::Instruction(this_id)` by other instructions).
    pub(super) anchor: super::value::UseAnchor,
    /// One [`UseLink`] per operand, index-parallel to `kind.operands()`.
    pub(super) use_links: SmallVec<[UseLink; 4]>,
}

impl InstData {
    pub(super) fn new(kind: InstKind, result_ty: TypeId, block: BlockId) -> Self {
        let n = kind.operands().len();
        Self {
            kind, result_ty, block, prev: None, next: None,
            anchor: super::value::UseAnchor::default(),
            use_links: smallvec::smallvec![UseLink::default(); n],
        }
    }

    #[must_use] pub fn num_uses(&self) -> u32 { self.anchor.num_uses() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operands_round_trip_through_set_operand() {
        let mut k = InstKind::Binary { op: BinOp::Add, left: Value::Const(crate::ir::value::ConstId(0)), right: Value::Const(crate::ir::value::ConstId(1)) };
        assert_eq!(k.operands().len(), 2);
        k.set_operand(1, Value::Const(crate::ir::value::ConstId(2)));
        assert_eq!(k.operands()[1], Value::Const(crate::ir::value::ConstId(2)));
    }

    #[test]
    fn terminators_and_headers_are_recognized() {
        let ret = InstKind::Return { values: SmallVec::new() };
        assert!(ret.is_terminator());
        let phi = InstKind::Phi { args: SmallVec::new() };
        assert!(phi.is_header());
        assert!(!ret.is_header());
    }

    #[test]
    fn side_effect_predicates() {
        let store = InstKind::Store { addr: Value::Const(crate::ir::value::ConstId(0)), value: Value::Const(crate::ir::value::ConstId(0)) };
        assert!(store.has_side_effects());
        assert!(!store.safe_to_remove());
        assert!(store.may_write_to_memory());
        let load = InstKind::Load { addr: Value::Const(crate::ir::value::ConstId(0)), ty: crate::types::TypeId(0) };
        assert!(load.may_read_from_memory());
        assert!(!load.has_side_effects());
        assert!(load.safe_to_remove());
    }
}
