//! Values: the things that can appear as instruction operands (spec.md
//! section 3), and the intrusive use-list machinery shared by every
//! tracked value kind.

use smallvec::SmallVec;

use crate::mk_idx;
use crate::types::TypeId;

mk_idx! { pub struct ConstId("k"); }
mk_idx! { pub struct ArgId("a"); }
mk_idx! { pub struct VarId("v"); }
mk_idx! { pub struct InstId("i"); }
mk_idx! { pub struct BlockId("b"); }

/// Everything that can appear as an instruction operand (spec.md section 3).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Value {
    Const(ConstId),
    Argument(ArgId),
    Variable(VarId),
    Instruction(InstId),
}

impl Value {
    /// [`Const`](Value::Const) values are the only ones that do not
    /// maintain a use list (spec.md section 3: "TrackedValue is any value
    /// that maintains a use list").
    #[must_use]
    pub fn is_tracked(self) -> bool { !matches!(self, Value::Const(_)) }
}

/// A constant value. Stored by handle (`ConstId`) rather than inline in
/// `Value` so that `Value` stays `Copy` even though `String` constants are
/// not.
#[derive(Clone, Debug, PartialEq)]
pub enum ConstKind {
    Int(i64),
    /// Stored as bits so `ConstKind` can derive `PartialEq`/`Hash`-free
    /// equality without fighting `f64`'s lack of `Eq`.
    Float(u64),
    Null,
    String(Box<str>),
}

#[derive(Clone, Debug)]
pub struct ConstData {
    pub kind: ConstKind,
    pub ty: TypeId,
}

/// One cell of the intrusive use list: the back/forward pointers for a
/// single use, identified by `(user instruction, operand index)`. These
/// live inside the user instruction's own operand storage (one `UseLink`
/// per operand slot), per the Design Notes in spec.md section 9 — not in a
/// separately heap-allocated node.
///
/// The list is circular: an in-list `UseLink` always has both `prev` and
/// `next` set (to itself if it is the only use). This is what lets
/// [`crate::ir::body::MethodBody::replace_uses`] merge two values' use
/// lists in O(1) instead of O(uses): splicing two circular lists together
/// is four pointer writes regardless of list length. A detached slot (not
/// currently in any list) has both fields `None`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct UseLink {
    pub prev: Option<(InstId, u32)>,
    pub next: Option<(InstId, u32)>,
}

/// The head of a tracked value's use list, plus the `NumUses` counter
/// required to equal the list's length at all times (spec.md section 8).
#[derive(Copy, Clone, Debug, Default)]
pub struct UseAnchor {
    pub first: Option<(InstId, u32)>,
    pub num_uses: u32,
}

impl UseAnchor {
    #[must_use] pub fn num_uses(&self) -> u32 { self.num_uses }
    #[must_use] pub fn is_empty(&self) -> bool { self.first.is_none() }
}

/// Backing data for an [`ArgId`] (a method's formal parameter as an SSA
/// value, before/unless it is materialized into a memory-backed variable).
#[derive(Clone, Debug)]
pub struct ArgData {
    pub ty: TypeId,
    pub name: Option<Box<str>>,
    pub anchor: UseAnchor,
}

impl ArgData {
    #[must_use] pub fn new(ty: TypeId, name: Option<Box<str>>) -> Self {
        Self { ty, name, anchor: UseAnchor::default() }
    }
}

/// The bit-set of flags the importer's variable-analysis pass (spec.md
/// 4.4 stage 2) accumulates per argument/local slot.
pub mod varflags {
    bitflags::bitflags! {
        #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
        pub struct VarFlags: u16 {
            const LOADED            = 1 << 0;
            const STORED             = 1 << 1;
            const ADDR_TAKEN         = 1 << 2;
            const IS_ARG             = 1 << 3;
            const IS_LOCAL           = 1 << 4;
            const CROSSES_BLOCK      = 1 << 5;
            const CROSSES_REGIONS    = 1 << 6;
            const MULTIPLE_STORES    = 1 << 7;
            const LOAD_BEFORE_STORE  = 1 << 8;
        }
    }
}
pub use varflags::VarFlags;

/// Backing data for a [`VarId`] (a local-like named slot). `is_exposed` is
/// derived from `flags` (set iff `ADDR_TAKEN` or `CROSSES_REGIONS`, per
/// spec.md 4.4 stage 2) once variable analysis completes; the importer
/// reads it to decide whether loads of this slot resolve through SSA or
/// stay as `LoadVarInst`/`StoreVarInst` against memory.
#[derive(Clone, Debug)]
pub struct VarData {
    pub ty: TypeId,
    pub name: Option<Box<str>>,
    pub flags: VarFlags,
    pub is_exposed: bool,
    pub anchor: UseAnchor,
}

impl VarData {
    #[must_use] pub fn new(ty: TypeId, name: Option<Box<str>>) -> Self {
        Self { ty, name, flags: VarFlags::empty(), is_exposed: false, anchor: UseAnchor::default() }
    }

    /// Recompute `is_exposed` from `flags` (spec.md 4.4 stage 2: "Any slot
    /// with `AddrTaken` or `CrossesRegions` is marked `IsExposed`").
    pub fn refresh_exposed(&mut self) {
        self.is_exposed = self.flags.intersects(VarFlags::ADDR_TAKEN | VarFlags::CROSSES_REGIONS);
    }
}

/// A flattened operand list, reused by every instruction kind's
/// `operands()`/`set_operand()` accessor so the use-link array (one
/// [`UseLink`] per slot) can stay a plain index-parallel `SmallVec`.
pub type OperandList = SmallVec<[Value; 4]>;
