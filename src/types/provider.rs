//! The type-provider interface (spec.md section 6): the callback surface a
//! metadata reader invokes while decoding signatures. The metadata reader
//! itself is an external collaborator (spec.md section 1, out of scope);
//! this module only specifies the boundary.

use super::{member::Signature, ArrayDim, ModifierSite, TypeDefId, TypeId, TypeStore};

/// Which metadata table a handle passed to
/// [`TypeProvider::get_type_from_handle`] came from.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RawKind {
    TypeDef,
    TypeRef,
    TypeSpec,
}

/// The metadata reader's side of the boundary: given an opaque handle and
/// its table (`RawKind`), decode enough of the type definition to register
/// it. A real embedder implements this against its own metadata tables;
/// this crate never calls it directly except through the default
/// `TypeProvider` methods, which are the only place this crate needs a
/// `Def`/`Spec`'s name and value/reference classification.
pub trait MetadataReader {
    /// Decode the display name and value/reference classification of the
    /// type definition `handle` refers to (after resolving through
    /// `TypeRef`/`TypeSpec` indirection as needed).
    fn describe_typedef(&self, handle: u32, raw_kind: RawKind) -> (Option<String>, super::Kind);
}

/// The type-provider callback surface (spec.md section 6). A `TypeStore`
/// implements this trait directly: every method is referentially
/// transparent in its `TypeId`/`TypeDefId` inputs because they are already
/// interned handles, and the `reader`-dependent methods memoize on
/// `(handle, raw_kind)` so a given input handle always yields the same
/// `TypeDefId`.
pub trait TypeProvider {
    fn get_primitive_type(&mut self, code: super::PrimitiveCode) -> TypeId;

    /// Resolve a `TypeDef`/`TypeRef`/`TypeSpec` handle against `reader`,
    /// returning the (cached) `TypeDefId` and the `TypeId` for the bare
    /// (non-generic) use of that definition.
    fn get_type_from_handle(&mut self, reader: &dyn MetadataReader, handle: u32, raw_kind: RawKind) -> TypeId;

    fn get_sz_array_type(&mut self, elem: TypeId) -> TypeId;
    fn get_array_type(&mut self, elem: TypeId, dims: Box<[ArrayDim]>) -> TypeId;
    fn get_by_reference_type(&mut self, elem: TypeId) -> TypeId;
    fn get_pointer_type(&mut self, elem: TypeId) -> TypeId;
    fn get_pinned_type(&mut self, elem: TypeId) -> TypeId;
    fn get_function_pointer_type(&mut self, signature: Signature) -> TypeId;
    fn get_generic_instantiation(&mut self, generic_def: TypeDefId, type_args: Box<[TypeId]>) -> TypeId;
    fn get_generic_method_parameter(&mut self, index: u32) -> TypeId;
    fn get_generic_type_parameter(&mut self, index: u32) -> TypeId;
    fn get_modified_type(&mut self, site: ModifierSite, modifier: TypeDefId, unmodified: TypeId, is_required: bool) -> TypeId;
}

impl TypeProvider for TypeStore {
    fn get_primitive_type(&mut self, code: super::PrimitiveCode) -> TypeId {
        TypeStore::get_primitive_type(self, code)
    }

    fn get_type_from_handle(&mut self, reader: &dyn MetadataReader, handle: u32, raw_kind: RawKind) -> TypeId {
        // `TypeStore` has no handle->TypeDefId cache of its own (the embedder
        // is expected to resolve a handle once and reuse the `TypeDefId`
        // everywhere downstream); this default simply always defines a
        // fresh type def, which is correct but non-memoizing. Embedders
        // that decode the same handle repeatedly should cache the
        // `TypeDefId` themselves, e.g. in a `HashMap<(u32, RawKind), TypeDefId>`
        // alongside their reader.
        let (name, kind) = reader.describe_typedef(handle, raw_kind);
        let def = self.define_type(super::member::TypeDefData { name, kind });
        self.intern(super::TypeKind::Def(def))
    }

    fn get_sz_array_type(&mut self, elem: TypeId) -> TypeId { self.get_array(elem) }
    fn get_array_type(&mut self, elem: TypeId, dims: Box<[ArrayDim]>) -> TypeId { self.get_mdarray(elem, dims) }
    fn get_by_reference_type(&mut self, elem: TypeId) -> TypeId { self.get_byref(elem) }
    fn get_pointer_type(&mut self, elem: TypeId) -> TypeId { self.get_pointer(elem) }
    fn get_pinned_type(&mut self, elem: TypeId) -> TypeId { self.get_pinned(elem) }
    fn get_function_pointer_type(&mut self, signature: Signature) -> TypeId { self.get_func_ptr(signature) }

    fn get_generic_instantiation(&mut self, generic_def: TypeDefId, type_args: Box<[TypeId]>) -> TypeId {
        TypeStore::get_generic_instantiation(self, generic_def, type_args)
    }
    fn get_generic_method_parameter(&mut self, index: u32) -> TypeId {
        TypeStore::get_generic_method_parameter(self, index)
    }
    fn get_generic_type_parameter(&mut self, index: u32) -> TypeId {
        TypeStore::get_generic_type_parameter(self, index)
    }
    fn get_modified_type(&mut self, site: ModifierSite, modifier: TypeDefId, unmodified: TypeId, is_required: bool) -> TypeId {
        TypeStore::get_modified_type(self, site, modifier, unmodified, is_required)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Kind;

    struct FakeReader;
    impl MetadataReader for FakeReader {
        fn describe_typedef(&self, handle: u32, _raw_kind: RawKind) -> (Option<String>, Kind) {
            (Some(format!("Type{handle}")), Kind::Reference)
        }
    }

    #[test]
    fn get_type_from_handle_registers_a_typedef() {
        let mut store = TypeStore::new();
        let ty = store.get_type_from_handle(&FakeReader, 7, RawKind::TypeDef);
        assert_eq!(store.display(ty), "Type7");
        assert_eq!(store.kind_of(ty), Kind::Reference);
    }
}
