//! IR type system.
//!
//! Types are hash-consed into a program-wide [`TypeTable`] and referred to by
//! [`TypeId`]. Struct types may be named; named structs are nominal, so two
//! modules that declare the same struct name share one type.

use std::collections::HashMap;
use std::fmt;

/// A handle to an interned type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub(crate) u32);

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ty{}", self.0)
    }
}

/// The shape of a type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// The void type (function returns, store results).
    Void,
    /// Integer of a given bit width.
    Integer {
        /// Width in bits.
        bits: u32,
    },
    /// Floating-point of a given bit width.
    Float {
        /// Width in bits.
        bits: u32,
    },
    /// Pointer to another type.
    Pointer {
        /// The pointed-to type.
        pointee: TypeId,
    },
    /// Function type.
    Function {
        /// Return type.
        ret: TypeId,
        /// Declared parameter types.
        params: Vec<TypeId>,
        /// Whether the function accepts extra arguments.
        is_vararg: bool,
    },
    /// Struct type, optionally named.
    Struct {
        /// Struct name; named structs are nominal.
        name: Option<String>,
        /// Field types in declaration order.
        fields: Vec<TypeId>,
    },
    /// Fixed-length array.
    Array {
        /// Element type.
        element: TypeId,
        /// Number of elements.
        length: u64,
    },
    /// SIMD vector.
    Vector {
        /// Lane type.
        element: TypeId,
        /// Number of lanes.
        lanes: u64,
    },
}

/// Interning table for types.
#[derive(Debug, Default)]
pub struct TypeTable {
    kinds: Vec<TypeKind>,
    interned: HashMap<TypeKind, TypeId>,
}

impl TypeTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    fn intern(&mut self, kind: TypeKind) -> TypeId {
        if let Some(&id) = self.interned.get(&kind) {
            return id;
        }
        let id = TypeId(self.kinds.len() as u32);
        self.kinds.push(kind.clone());
        self.interned.insert(kind, id);
        id
    }

    /// The void type.
    pub fn void(&mut self) -> TypeId {
        self.intern(TypeKind::Void)
    }

    /// An integer type of the given bit width.
    pub fn int(&mut self, bits: u32) -> TypeId {
        self.intern(TypeKind::Integer { bits })
    }

    /// A float type of the given bit width.
    pub fn float(&mut self, bits: u32) -> TypeId {
        self.intern(TypeKind::Float { bits })
    }

    /// A pointer to `pointee`.
    pub fn pointer_to(&mut self, pointee: TypeId) -> TypeId {
        self.intern(TypeKind::Pointer { pointee })
    }

    /// The byte pointer type (`i8*`), the "general pointer" of the fuzzy
    /// matching rules.
    pub fn byte_pointer(&mut self) -> TypeId {
        let i8 = self.int(8);
        self.pointer_to(i8)
    }

    /// A function type.
    pub fn function(&mut self, ret: TypeId, params: Vec<TypeId>, is_vararg: bool) -> TypeId {
        self.intern(TypeKind::Function {
            ret,
            params,
            is_vararg,
        })
    }

    /// A named struct.
    pub fn struct_named(&mut self, name: impl Into<String>, fields: Vec<TypeId>) -> TypeId {
        self.intern(TypeKind::Struct {
            name: Some(name.into()),
            fields,
        })
    }

    /// An anonymous (literal) struct.
    pub fn struct_literal(&mut self, fields: Vec<TypeId>) -> TypeId {
        self.intern(TypeKind::Struct { name: None, fields })
    }

    /// An array of `length` elements.
    pub fn array(&mut self, element: TypeId, length: u64) -> TypeId {
        self.intern(TypeKind::Array { element, length })
    }

    /// A vector of `lanes` lanes.
    pub fn vector(&mut self, element: TypeId, lanes: u64) -> TypeId {
        self.intern(TypeKind::Vector { element, lanes })
    }

    /// Returns the kind of a type.
    pub fn kind(&self, id: TypeId) -> &TypeKind {
        &self.kinds[id.0 as usize]
    }

    /// True for struct, array, and vector types.
    pub fn is_composite(&self, id: TypeId) -> bool {
        matches!(
            self.kind(id),
            TypeKind::Struct { .. } | TypeKind::Array { .. } | TypeKind::Vector { .. }
        )
    }

    /// True for pointer types.
    pub fn is_pointer(&self, id: TypeId) -> bool {
        matches!(self.kind(id), TypeKind::Pointer { .. })
    }

    /// True for integer types.
    pub fn is_integer(&self, id: TypeId) -> bool {
        matches!(self.kind(id), TypeKind::Integer { .. })
    }

    /// True for struct types.
    pub fn is_struct(&self, id: TypeId) -> bool {
        matches!(self.kind(id), TypeKind::Struct { .. })
    }

    /// True for function types.
    pub fn is_function(&self, id: TypeId) -> bool {
        matches!(self.kind(id), TypeKind::Function { .. })
    }

    /// The pointee of a pointer type.
    pub fn pointee(&self, id: TypeId) -> Option<TypeId> {
        match self.kind(id) {
            TypeKind::Pointer { pointee } => Some(*pointee),
            _ => None,
        }
    }

    /// Number of fields/elements of a composite type.
    pub fn element_count(&self, id: TypeId) -> Option<u64> {
        match self.kind(id) {
            TypeKind::Struct { fields, .. } => Some(fields.len() as u64),
            TypeKind::Array { length, .. } => Some(*length),
            TypeKind::Vector { lanes, .. } => Some(*lanes),
            _ => None,
        }
    }

    /// The type of element `index` of a composite. For arrays and vectors the
    /// index is ignored (all elements share a type); for structs an
    /// out-of-range or negative index yields `None`.
    pub fn element_type(&self, id: TypeId, index: i64) -> Option<TypeId> {
        match self.kind(id) {
            TypeKind::Struct { fields, .. } => {
                let i = usize::try_from(index).ok()?;
                fields.get(i).copied()
            }
            TypeKind::Array { element, .. } | TypeKind::Vector { element, .. } => Some(*element),
            _ => None,
        }
    }

    /// Struct field types, if `id` is a struct.
    pub fn struct_fields(&self, id: TypeId) -> Option<&[TypeId]> {
        match self.kind(id) {
            TypeKind::Struct { fields, .. } => Some(fields),
            _ => None,
        }
    }

    /// Struct name, if `id` is a named struct.
    pub fn struct_name(&self, id: TypeId) -> Option<&str> {
        match self.kind(id) {
            TypeKind::Struct {
                name: Some(name), ..
            } => Some(name),
            _ => None,
        }
    }

    /// Number of types in the table.
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    /// True when no types have been interned.
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}
