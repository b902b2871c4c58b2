//! Structural type hashing.
//!
//! Analyses never compare [`TypeId`]s across modules directly; they compare
//! *keys*. A [`TypeKey`] is a structural hash of a type under a data layout:
//! equal keys identify structurally equal types even when two modules
//! interned them separately. Named structs hash by name only (nominal
//! identity), everything else hashes element-wise; pointer-to-function and
//! composite types can never collide by construction of the kind tags.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use tyflow_ir::{DataLayout, TypeId, TypeKind, TypeTable};

/// Field index standing for "any field" of a container.
pub const ANY_FIELD: i64 = -1;

/// Structural hash of a type under a data layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeKey(pub u64);

/// Hash of a `(type, field-index)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeIndexKey(pub u64);

/// Hash of a call or function signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SignatureKey(pub u64);

/// Computes the structural key of `ty`.
pub fn type_key(types: &TypeTable, layout: &DataLayout, ty: TypeId) -> TypeKey {
    let mut h = DefaultHasher::new();
    hash_type(types, layout, ty, &mut h);
    TypeKey(h.finish())
}

/// Combines a type key with a field index.
pub fn type_index_key(key: TypeKey, index: i64) -> TypeIndexKey {
    let mut h = DefaultHasher::new();
    key.0.hash(&mut h);
    index.hash(&mut h);
    TypeIndexKey(h.finish())
}

pub(crate) fn hash_type(
    types: &TypeTable,
    layout: &DataLayout,
    ty: TypeId,
    h: &mut impl Hasher,
) {
    match types.kind(ty) {
        TypeKind::Void => 0u8.hash(h),
        TypeKind::Integer { bits } => {
            1u8.hash(h);
            bits.hash(h);
        }
        TypeKind::Float { bits } => {
            2u8.hash(h);
            bits.hash(h);
        }
        TypeKind::Pointer { pointee } => {
            3u8.hash(h);
            layout.pointer_bits().hash(h);
            hash_type(types, layout, *pointee, h);
        }
        TypeKind::Function {
            ret,
            params,
            is_vararg,
        } => {
            4u8.hash(h);
            is_vararg.hash(h);
            params.len().hash(h);
            hash_type(types, layout, *ret, h);
            for &p in params {
                hash_type(types, layout, p, h);
            }
        }
        TypeKind::Struct {
            name: Some(name), ..
        } => {
            5u8.hash(h);
            name.hash(h);
        }
        TypeKind::Struct { name: None, fields } => {
            6u8.hash(h);
            fields.len().hash(h);
            for &f in fields {
                hash_type(types, layout, f, h);
            }
        }
        TypeKind::Array { element, length } => {
            7u8.hash(h);
            length.hash(h);
            hash_type(types, layout, *element, h);
        }
        TypeKind::Vector { element, lanes } => {
            8u8.hash(h);
            lanes.hash(h);
            hash_type(types, layout, *element, h);
        }
    }
}
