//! Handles and backing data for user-defined types, methods, fields and
//! parameters (spec.md section 4.1).

use crate::mk_idx;
use super::{Kind, TypeId, TypeStore};

mk_idx! {
    /// A handle to a user-defined type (`TypeDef`, or a resolved
    /// `TypeRef`/`TypeSpec`'s underlying def).
    pub struct TypeDefId("T");
}
mk_idx! {
    /// A handle to a method, either declared by the embedder or
    /// synthesized by this crate (multi-dim-array intrinsics).
    pub struct MethodId("M");
}
mk_idx! {
    /// A handle to a field.
    pub struct FieldId("F");
}
mk_idx! {
    /// A handle to a formal parameter.
    pub struct ParamId("P");
}

/// A method or function-pointer signature.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Signature {
    pub params: Box<[TypeId]>,
    pub ret: TypeId,
}

/// Backing data for a [`TypeDefId`]. Only what downstream passes need:
/// a display name and whether it is a value or reference class. The rest
/// of a type definition (members, layout, base type) lives in the
/// embedder's own metadata tables; this crate only needs enough to print
/// types and to decide `Kind` for `Def`/`Spec`.
#[derive(Clone, Debug)]
pub struct TypeDefData {
    pub name: Option<String>,
    pub kind: Kind,
}

/// The five multi-dim-array intrinsic operations synthesized per
/// `(element type, rank)` (spec.md 4.1, ECMA-335 II.14.2).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MdArrayOp {
    /// `.ctor(int, ..., int)` — construct with `rank` sizes, zero lower bound.
    SizeCtor,
    /// `.ctor(int, int, ..., int, int)` — construct with `rank`
    /// `(lowerBound, size)` pairs.
    RangeCtor,
    /// `Get(int, ..., int) : T`
    Get,
    /// `Set(int, ..., int, T)`
    Set,
    /// `Address(int, ..., int) : &T`
    Address,
}

/// Backing data for a [`MethodId`].
#[derive(Clone, Debug)]
pub struct MethodData {
    pub name: Option<String>,
    pub owner: Option<TypeDefId>,
    pub signature: Signature,
    pub is_static: bool,
    /// `Some` iff this method was synthesized by [`TypeStore::mdarray_method`]
    /// rather than declared by the embedder.
    pub synthesized_mdarray: Option<(TypeId, u32, MdArrayOp)>,
}

/// Backing data for a [`FieldId`].
#[derive(Clone, Debug)]
pub struct FieldData {
    pub name: Option<String>,
    pub owner: Option<TypeDefId>,
    pub ty: TypeId,
    pub is_static: bool,
}

/// Backing data for a [`ParamId`].
#[derive(Clone, Debug)]
pub struct ParamData {
    pub name: Option<String>,
    pub ty: TypeId,
    pub index: u32,
}

/// Build the signature for one of the five synthesized multi-dim-array
/// methods, per ECMA-335 II.14.2: `rank` `int32` index arguments for
/// `Get`/`Address`/`SizeCtor`, `2*rank` for `RangeCtor`, and the element
/// type appended for `Set`.
pub(super) fn mdarray_signature(elem: TypeId, rank: u32, op: MdArrayOp, store: &TypeStore) -> Signature {
    let rank = rank as usize;
    let mut params = Vec::new();
    match op {
        MdArrayOp::SizeCtor => params.extend(std::iter::repeat(store.i32_).take(rank)),
        MdArrayOp::RangeCtor => params.extend(std::iter::repeat(store.i32_).take(2 * rank)),
        MdArrayOp::Get | MdArrayOp::Address => params.extend(std::iter::repeat(store.i32_).take(rank)),
        MdArrayOp::Set => {
            params.extend(std::iter::repeat(store.i32_).take(rank));
            params.push(elem);
        }
    }
    let ret = match op {
        MdArrayOp::SizeCtor | MdArrayOp::RangeCtor | MdArrayOp::Set => store.void,
        MdArrayOp::Get => elem,
        MdArrayOp::Address => elem, // caller wraps in Byref when constructing the call's result type
    };
    Signature { params: params.into_boxed_slice(), ret }
}
