//! A minimal, conservative alias analysis (SPEC_FULL.md 4.5): the one
//! "alias analysis" collaborator spec.md 4.5's Forest hazard check
//! consults without naming a module of its own. Two memory locations are
//! classified by the instruction (or variable) that produced the address;
//! unrelated or unrecognized shapes default to "may alias" — this analysis
//! never claims two locations are distinct unless it can prove it from the
//! address-producing instruction's own operands, matching the core's "no
//! silent coercion, no unsound optimism" error-handling stance (spec.md 7).

use crate::ir::{InstKind, MethodBody, Value};
use crate::types::TypeId;

/// The shape an address value was built from, as far as this analysis can
/// tell without a dominator tree or points-to set.
enum Loc {
    /// The address of a specific field, identified by handle.
    Field(crate::types::FieldId),
    /// An array element address, conservatively bucketed only by element
    /// type (spec.md 4.5: "`ArrayAddrInst`s conservatively may-alias any
    /// other `ArrayAddrInst` on the same element type").
    Array(TypeId),
    /// A variable whose address has escaped (`IsExposed`) — may alias
    /// anything (SPEC_FULL.md 4.5).
    ExposedVar,
    /// Anything else: an argument, a non-exposed variable reached through
    /// an unexpected path, or an opaque pointer-typed SSA value. Treated
    /// as aliasing everything, including itself.
    Opaque,
}

fn classify(body: &MethodBody, v: Value) -> Loc {
    match v {
        Value::Variable(id) => {
            if body.var(id).is_exposed { Loc::ExposedVar } else { Loc::Opaque }
        }
        Value::Instruction(id) => match &body.inst(id).kind {
            InstKind::FieldAddr { field, .. } => Loc::Field(*field),
            InstKind::ArrayAddr { elem_ty, .. } => Loc::Array(*elem_ty),
            _ => Loc::Opaque,
        },
        Value::Argument(_) | Value::Const(_) => Loc::Opaque,
    }
}

/// May the memory location named by address `a` alias the one named by
/// address `b`? Used by `analysis::forest`'s hazard check for a candidate
/// leaf that reads memory (`Load`, `LoadVar` of an exposed variable,
/// `MdArray::Get`) against an intervening instruction that writes memory.
#[must_use]
pub fn may_alias(body: &MethodBody, a: Value, b: Value) -> bool {
    if a == b { return true; }
    match (classify(body, a), classify(body, b)) {
        (Loc::Field(fa), Loc::Field(fb)) => fa == fb,
        (Loc::Array(ta), Loc::Array(tb)) => ta == tb,
        // Field storage and array-element storage never overlap: a field
        // address is always relative to an object header's field table, an
        // array element address is always relative to an array's element
        // buffer.
        (Loc::Field(_), Loc::Array(_)) | (Loc::Array(_), Loc::Field(_)) => false,
        (Loc::ExposedVar, _) | (_, Loc::ExposedVar) => true,
        (Loc::Opaque, _) | (_, Loc::Opaque) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::value::{ArgId, ConstData, ConstKind};
    use crate::types::TypeStore;

    #[test]
    fn distinct_fields_never_alias() {
        let mut types = TypeStore::new();
        let owner = types.define_type(crate::types::member::TypeDefData { name: None, kind: crate::types::Kind::Reference });
        let fx = types.define_field(crate::types::member::FieldData { name: None, owner: Some(owner), ty: types.i32_, is_static: false });
        let fy = types.define_field(crate::types::member::FieldData { name: None, owner: Some(owner), ty: types.i32_, is_static: false });
        let mut body = MethodBody::new();
        let entry = body.entry_block;
        let base = Value::Argument(ArgId(0));
        let ax = body.append(entry, InstKind::FieldAddr { base, field: fx }, types.i32_);
        let ay = body.append(entry, InstKind::FieldAddr { base, field: fy }, types.i32_);
        assert!(!may_alias(&body, Value::Instruction(ax), Value::Instruction(ay)));
    }

    #[test]
    fn same_field_always_aliases() {
        let mut types = TypeStore::new();
        let owner = types.define_type(crate::types::member::TypeDefData { name: None, kind: crate::types::Kind::Reference });
        let f = types.define_field(crate::types::member::FieldData { name: None, owner: Some(owner), ty: types.i32_, is_static: false });
        let mut body = MethodBody::new();
        let entry = body.entry_block;
        let a0 = Value::Argument(ArgId(0));
        let a1 = Value::Argument(ArgId(1));
        let ax = body.append(entry, InstKind::FieldAddr { base: a0, field: f }, types.i32_);
        let ay = body.append(entry, InstKind::FieldAddr { base: a1, field: f }, types.i32_);
        assert!(may_alias(&body, Value::Instruction(ax), Value::Instruction(ay)));
    }

    #[test]
    fn opaque_pointers_are_conservatively_assumed_to_alias() {
        let types = TypeStore::new();
        let mut body = MethodBody::new();
        let c = body.create_const(ConstData { kind: ConstKind::Null, ty: types.object });
        let p = Value::Argument(ArgId(0));
        let q = Value::Argument(ArgId(1));
        assert!(may_alias(&body, p, q));
        assert!(may_alias(&body, p, Value::Const(c)));
    }
}
