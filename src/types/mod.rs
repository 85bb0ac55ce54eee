//! The Type & Member Model (spec.md section 4.1 / SPEC_FULL.md section 4.1).
//!
//! Types are compared structurally; compound types are interned by equality
//! so that comparing two `TypeId`s is a plain integer compare no matter how
//! deeply nested the underlying shape is.

pub mod member;
pub mod provider;

use hashbrown::HashMap;

use crate::mk_idx;
pub use member::{FieldId, MethodId, ParamId, Signature, TypeDefId};
pub use provider::{MetadataReader, RawKind, TypeProvider};

mk_idx! {
    /// A handle to an interned [`TypeKind`]. Cheap to copy and compare.
    pub struct TypeId("t");
}

/// Whether a type's values are stored inline (a value class) or behind a
/// reference (a reference class). Mirrors the CIL distinction between
/// value types and `class`/array/string/object types.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Kind {
    Value,
    Reference,
}

/// The category a value occupies on the abstract evaluation stack. The
/// importer's stack abstraction (SPEC_FULL.md 4.4) is defined entirely in
/// terms of this enum: `Int8/Int16/Bool/Char` all collapse to `Int32`,
/// `NInt` is tracked separately from `Int32`/`Int64`, and `Object`/`ByRef`/
/// `Float`/`Struct` are preserved as-is.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StackType {
    Int32,
    Int64,
    NInt,
    Float,
    Object,
    ByRef,
    Struct,
    Void,
}

/// Integer width in bits, used by [`TypeKind::Int`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum IntWidth { W8, W16, W32, W64 }

/// The generic-parameter kind distinguished by [`TypeKind::GenericParam`]:
/// a parameter of the enclosing type versus a parameter of the enclosing
/// method.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum GenericParamKind { Type, Method }

/// Lower bound and extent of one dimension of a multi-dimensional array.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ArrayDim {
    pub lower_bound: i32,
    pub size: Option<u32>,
}

/// The full sum of type shapes from spec.md section 3.
///
/// `Spec`, `Array`, `MDArray`, `Byref`, `Ptr`, `Pinned`, `FuncPtr` and
/// `GenericParam` are the "compound" variants that get interned by
/// structural equality in [`TypeStore`]; the rest are singletons.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Void,
    Bool,
    Int { signed: bool, width: IntWidth },
    IntPtr,
    UIntPtr,
    Float32,
    Float64,
    Char,
    String,
    Object,
    /// A user-defined, non-generic type.
    Def(TypeDefId),
    /// A generic instantiation `Def<args...>`.
    Spec(TypeDefId, Box<[TypeId]>),
    /// A single-dimensional, zero-based array `T[]`.
    Array(TypeId),
    /// A general multi-dimensional array. Equality compares element type,
    /// rank and every dimension's lower bound and size (spec.md 4.1).
    MDArray { elem: TypeId, rank: u32, dims: Box<[ArrayDim]> },
    Byref(TypeId),
    Ptr(TypeId),
    Pinned(TypeId),
    FuncPtr(Signature),
    GenericParam { kind: GenericParamKind, index: u32 },
}

impl TypeKind {
    /// Value class versus reference class (spec.md section 3: "Each variant
    /// exposes a `Kind`").
    #[must_use]
    pub fn kind(&self) -> Kind {
        match self {
            TypeKind::Void | TypeKind::Bool | TypeKind::Int { .. } | TypeKind::IntPtr
            | TypeKind::UIntPtr | TypeKind::Float32 | TypeKind::Float64 | TypeKind::Char
            | TypeKind::Spec(..) // conservatively: a generic instantiation of a struct is a value;
                                  // of a class is a reference. The type-def table (member.rs)
                                  // records which, so `TypeStore::kind_of` is the source of truth
                                  // for `Def`/`Spec`; this bare match only covers the unambiguous
                                  // cases and is not exposed directly (see `TypeStore::kind_of`).
            => Kind::Value,
            TypeKind::String | TypeKind::Object | TypeKind::Array(_) | TypeKind::MDArray { .. } => {
                Kind::Reference
            }
            TypeKind::Def(_) => Kind::Value, // overridden by TypeStore::kind_of via the typedef table
            TypeKind::Byref(_) | TypeKind::Ptr(_) | TypeKind::Pinned(_) | TypeKind::FuncPtr(_) => {
                Kind::Value
            }
            TypeKind::GenericParam { .. } => Kind::Value,
        }
    }

    /// The evaluation-stack category for a value of this type (spec.md
    /// section 3).
    #[must_use]
    pub fn stack_type(&self) -> StackType {
        match self {
            TypeKind::Void => StackType::Void,
            TypeKind::Bool | TypeKind::Char => StackType::Int32,
            TypeKind::Int { width: IntWidth::W8 | IntWidth::W16 | IntWidth::W32, .. } => {
                StackType::Int32
            }
            TypeKind::Int { width: IntWidth::W64, .. } => StackType::Int64,
            TypeKind::IntPtr | TypeKind::UIntPtr | TypeKind::Ptr(_) | TypeKind::FuncPtr(_) => {
                StackType::NInt
            }
            TypeKind::Float32 | TypeKind::Float64 => StackType::Float,
            TypeKind::String | TypeKind::Object | TypeKind::Array(_) | TypeKind::MDArray { .. } => {
                StackType::Object
            }
            TypeKind::Byref(_) => StackType::ByRef,
            TypeKind::Def(_) | TypeKind::Spec(..) => StackType::Struct, // refined by TypeStore for classes
            TypeKind::GenericParam { .. } => StackType::Struct, // conservative until instantiated
            TypeKind::Pinned(inner) => {
                // Pinned only wraps object-kind types (pinned GC pointers); the payload
                // determines the actual stack type in well-formed input.
                let _ = inner;
                StackType::Object
            }
        }
    }
}

/// Primitive type codes recognized by [`TypeProvider::get_primitive_type`].
/// This is the "code" referenced by spec.md section 4.1's "primitive lookup
/// by code."
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PrimitiveCode {
    Void, Bool, Int8, UInt8, Int16, UInt16, Int32, UInt32, Int64, UInt64,
    IntPtr, UIntPtr, Float32, Float64, Char, String, Object,
}

/// The arena that interns every compound [`TypeKind`] and owns the
/// type-def/method/field/param tables (spec.md section 4.1).
///
/// Primitive types are pre-interned in [`TypeStore::new`] so comparing them
/// is a plain `TypeId` equality check; everything else is interned on first
/// construction via [`TypeStore::intern`].
pub struct TypeStore {
    kinds: crate::idx::IdxVec<TypeId, TypeKind>,
    interned: HashMap<TypeKind, TypeId>,
    typedefs: crate::idx::IdxVec<TypeDefId, member::TypeDefData>,
    methods: crate::idx::IdxVec<MethodId, member::MethodData>,
    fields: crate::idx::IdxVec<FieldId, member::FieldData>,
    params: crate::idx::IdxVec<ParamId, member::ParamData>,
    /// Synthesized multi-dim-array methods, cached per `(element, rank, op)`
    /// so repeated lookups for the same array shape return the same
    /// `MethodId` (spec.md 4.1: "synthesize... on demand").
    mdarray_methods: HashMap<(TypeId, u32, member::MdArrayOp), MethodId>,
    /// Custom modifiers recorded out of band, keyed by the signature slot
    /// they annotate rather than folded into the `Type`'s identity. This
    /// resolves the Open Question in spec.md section 9 (see DESIGN.md).
    modifiers: HashMap<ModifierSite, Vec<(TypeDefId, bool)>>,

    pub void: TypeId,
    pub bool_: TypeId,
    pub i8_: TypeId,
    pub u8_: TypeId,
    pub i16_: TypeId,
    pub u16_: TypeId,
    pub i32_: TypeId,
    pub u32_: TypeId,
    pub i64_: TypeId,
    pub u64_: TypeId,
    pub iptr: TypeId,
    pub uptr: TypeId,
    pub f32_: TypeId,
    pub f64_: TypeId,
    pub char_: TypeId,
    pub string: TypeId,
    pub object: TypeId,
}

/// A site a custom modifier can be attached to: a method signature's
/// return/parameter slot, or a field's type.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ModifierSite {
    Return(MethodId),
    Param(MethodId, u32),
    Field(FieldId),
}

impl Default for TypeStore {
    fn default() -> Self { Self::new() }
}

impl TypeStore {
    #[must_use]
    pub fn new() -> Self {
        let mut kinds = crate::idx::IdxVec::new();
        let mut interned = HashMap::new();
        macro_rules! singleton {
            ($k:expr) => {{
                let id = kinds.push($k.clone());
                interned.insert($k, id);
                id
            }};
        }
        let void = singleton!(TypeKind::Void);
        let bool_ = singleton!(TypeKind::Bool);
        let i8_ = singleton!(TypeKind::Int { signed: true, width: IntWidth::W8 });
        let u8_ = singleton!(TypeKind::Int { signed: false, width: IntWidth::W8 });
        let i16_ = singleton!(TypeKind::Int { signed: true, width: IntWidth::W16 });
        let u16_ = singleton!(TypeKind::Int { signed: false, width: IntWidth::W16 });
        let i32_ = singleton!(TypeKind::Int { signed: true, width: IntWidth::W32 });
        let u32_ = singleton!(TypeKind::Int { signed: false, width: IntWidth::W32 });
        let i64_ = singleton!(TypeKind::Int { signed: true, width: IntWidth::W64 });
        let u64_ = singleton!(TypeKind::Int { signed: false, width: IntWidth::W64 });
        let iptr = singleton!(TypeKind::IntPtr);
        let uptr = singleton!(TypeKind::UIntPtr);
        let f32_ = singleton!(TypeKind::Float32);
        let f64_ = singleton!(TypeKind::Float64);
        let char_ = singleton!(TypeKind::Char);
        let string = singleton!(TypeKind::String);
        let object = singleton!(TypeKind::Object);
        Self {
            kinds, interned,
            typedefs: crate::idx::IdxVec::new(),
            methods: crate::idx::IdxVec::new(),
            fields: crate::idx::IdxVec::new(),
            params: crate::idx::IdxVec::new(),
            mdarray_methods: HashMap::new(),
            modifiers: HashMap::new(),
            void, bool_, i8_, u8_, i16_, u16_, i32_, u32_, i64_, u64_,
            iptr, uptr, f32_, f64_, char_, string, object,
        }
    }

    /// Intern a (possibly compound) type shape, returning the existing
    /// `TypeId` if an equal shape was already interned.
    pub fn intern(&mut self, kind: TypeKind) -> TypeId {
        if let Some(&id) = self.interned.get(&kind) { return id; }
        let id = self.kinds.push(kind.clone());
        self.interned.insert(kind, id);
        id
    }

    #[must_use] pub fn lookup(&self, id: TypeId) -> &TypeKind { &self.kinds[id] }

    #[must_use]
    pub fn get_primitive_type(&self, code: PrimitiveCode) -> TypeId {
        match code {
            PrimitiveCode::Void => self.void,
            PrimitiveCode::Bool => self.bool_,
            PrimitiveCode::Int8 => self.i8_,
            PrimitiveCode::UInt8 => self.u8_,
            PrimitiveCode::Int16 => self.i16_,
            PrimitiveCode::UInt16 => self.u16_,
            PrimitiveCode::Int32 => self.i32_,
            PrimitiveCode::UInt32 => self.u32_,
            PrimitiveCode::Int64 => self.i64_,
            PrimitiveCode::UInt64 => self.u64_,
            PrimitiveCode::IntPtr => self.iptr,
            PrimitiveCode::UIntPtr => self.uptr,
            PrimitiveCode::Float32 => self.f32_,
            PrimitiveCode::Float64 => self.f64_,
            PrimitiveCode::Char => self.char_,
            PrimitiveCode::String => self.string,
            PrimitiveCode::Object => self.object,
        }
    }

    pub fn get_array(&mut self, elem: TypeId) -> TypeId { self.intern(TypeKind::Array(elem)) }

    pub fn get_mdarray(&mut self, elem: TypeId, dims: Box<[ArrayDim]>) -> TypeId {
        let rank = u32::try_from(dims.len()).expect("rank overflow");
        self.intern(TypeKind::MDArray { elem, rank, dims })
    }

    pub fn get_byref(&mut self, elem: TypeId) -> TypeId { self.intern(TypeKind::Byref(elem)) }
    pub fn get_pointer(&mut self, elem: TypeId) -> TypeId { self.intern(TypeKind::Ptr(elem)) }
    pub fn get_pinned(&mut self, elem: TypeId) -> TypeId { self.intern(TypeKind::Pinned(elem)) }
    pub fn get_func_ptr(&mut self, sig: Signature) -> TypeId { self.intern(TypeKind::FuncPtr(sig)) }

    pub fn get_generic_instantiation(&mut self, def: TypeDefId, args: Box<[TypeId]>) -> TypeId {
        self.intern(TypeKind::Spec(def, args))
    }

    pub fn get_generic_type_parameter(&mut self, index: u32) -> TypeId {
        self.intern(TypeKind::GenericParam { kind: GenericParamKind::Type, index })
    }
    pub fn get_generic_method_parameter(&mut self, index: u32) -> TypeId {
        self.intern(TypeKind::GenericParam { kind: GenericParamKind::Method, index })
    }

    /// Returns the unmodified type; the modifier is recorded out of band
    /// against `site` (spec.md section 9's open question — see DESIGN.md).
    pub fn get_modified_type(&mut self, site: ModifierSite, modifier: TypeDefId, unmodified: TypeId, is_required: bool) -> TypeId {
        self.modifiers.entry(site).or_default().push((modifier, is_required));
        unmodified
    }

    #[must_use]
    pub fn modifiers_at(&self, site: ModifierSite) -> &[(TypeDefId, bool)] {
        self.modifiers.get(&site).map_or(&[], |v| v.as_slice())
    }

    /// Register a user-defined type and return its handle. The embedder
    /// (acting through the out-of-scope metadata reader) is expected to
    /// call this once per distinct type definition it decodes.
    pub fn define_type(&mut self, data: member::TypeDefData) -> TypeDefId { self.typedefs.push(data) }
    #[must_use] pub fn typedef(&self, id: TypeDefId) -> &member::TypeDefData { &self.typedefs[id] }

    pub fn define_method(&mut self, data: member::MethodData) -> MethodId { self.methods.push(data) }
    #[must_use] pub fn method(&self, id: MethodId) -> &member::MethodData { &self.methods[id] }

    pub fn define_field(&mut self, data: member::FieldData) -> FieldId { self.fields.push(data) }
    #[must_use] pub fn field(&self, id: FieldId) -> &member::FieldData { &self.fields[id] }

    pub fn define_param(&mut self, data: member::ParamData) -> ParamId { self.params.push(data) }
    #[must_use] pub fn param(&self, id: ParamId) -> &member::ParamData { &self.params[id] }

    /// `Kind` for any `TypeId`, refining the bare `TypeKind::kind()` using
    /// the typedef table for `Def`/`Spec` (a struct typedef is a value
    /// class, anything else registered is a reference class).
    #[must_use]
    pub fn kind_of(&self, id: TypeId) -> Kind {
        match self.lookup(id) {
            TypeKind::Def(def) | TypeKind::Spec(def, _) => self.typedefs[*def].kind,
            other => other.kind(),
        }
    }

    /// Synthesize (or fetch the cached) multi-dim-array intrinsic method,
    /// per ECMA-335 II.14.2 and spec.md 4.1.
    pub fn mdarray_method(&mut self, elem: TypeId, rank: u32, op: member::MdArrayOp) -> MethodId {
        if let Some(&id) = self.mdarray_methods.get(&(elem, rank, op)) { return id; }
        let sig = member::mdarray_signature(elem, rank, op, self);
        let id = self.define_method(member::MethodData {
            name: None,
            owner: None,
            signature: sig,
            is_static: false,
            synthesized_mdarray: Some((elem, rank, op)),
        });
        self.mdarray_methods.insert((elem, rank, op), id);
        id
    }

    /// Textual postfix form for printing (spec.md section 4.1), e.g.
    /// `i32`, `i32[]`, `i32[,]`, `i32&`, `i32*`, `(i32,bool)->bool*`.
    #[must_use]
    pub fn display(&self, id: TypeId) -> String {
        let mut s = String::new();
        self.write_display(id, &mut s);
        s
    }

    fn write_display(&self, id: TypeId, out: &mut String) {
        use std::fmt::Write as _;
        match self.lookup(id) {
            TypeKind::Void => out.push_str("void"),
            TypeKind::Bool => out.push_str("bool"),
            TypeKind::Int { signed, width } => {
                let w = match width { IntWidth::W8 => 8, IntWidth::W16 => 16, IntWidth::W32 => 32, IntWidth::W64 => 64 };
                let _ = write!(out, "{}{w}", if *signed { "i" } else { "u" });
            }
            TypeKind::IntPtr => out.push_str("iptr"),
            TypeKind::UIntPtr => out.push_str("uptr"),
            TypeKind::Float32 => out.push_str("f32"),
            TypeKind::Float64 => out.push_str("f64"),
            TypeKind::Char => out.push_str("char"),
            TypeKind::String => out.push_str("string"),
            TypeKind::Object => out.push_str("object"),
            TypeKind::Def(def) => out.push_str(self.typedefs[*def].name.as_deref().unwrap_or("<type>")),
            TypeKind::Spec(def, args) => {
                out.push_str(self.typedefs[*def].name.as_deref().unwrap_or("<type>"));
                out.push('<');
                for (i, a) in args.iter().enumerate() {
                    if i > 0 { out.push(','); }
                    self.write_display(*a, out);
                }
                out.push('>');
            }
            TypeKind::Array(elem) => { self.write_display(*elem, out); out.push_str("[]"); }
            TypeKind::MDArray { elem, rank, .. } => {
                self.write_display(*elem, out);
                out.push('[');
                out.push_str(&",".repeat((*rank as usize).saturating_sub(1)));
                out.push(']');
            }
            TypeKind::Byref(elem) => { self.write_display(*elem, out); out.push('&'); }
            TypeKind::Ptr(elem) => { self.write_display(*elem, out); out.push('*'); }
            TypeKind::Pinned(elem) => { out.push_str("pinned "); self.write_display(*elem, out); }
            TypeKind::FuncPtr(sig) => {
                out.push('(');
                for (i, p) in sig.params.iter().enumerate() {
                    if i > 0 { out.push(','); }
                    self.write_display(*p, out);
                }
                out.push_str(")->");
                self.write_display(sig.ret, out);
            }
            TypeKind::GenericParam { kind, index } => {
                let _ = write!(out, "{}{index}", if *kind == GenericParamKind::Type { "!" } else { "!!" });
            }
        }
    }
}
