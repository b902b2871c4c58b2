//! Call signatures and fuzzy type matching.
//!
//! The first layer of resolution is classical signature matching: an indirect
//! call may target any address-taken function whose signature is compatible
//! with the call site. Two mechanisms implement this:
//!
//! - a canonical [`SignatureKey`] hash used to bucket functions in the
//!   [`SignatureIndex`]. "General pointers" (any pointer type, and integers of
//!   pointer width) collapse to one wildcard token so that the bucket groups
//!   every signature the fuzzy rules consider equivalent at those positions;
//! - a per-argument [`fuzzy_type_match`] walk used by the signature-only
//!   resolver, which peels matching pointer pairs, compares struct names and
//!   integer widths, and treats the byte pointer as compatible with any
//!   pointer or pointer-width integer.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use tyflow_ir::{Callee, DataLayout, FunctionId, Program, TypeId, TypeKind, TypeTable, ValueId, ValueKind};

use crate::type_keys::{hash_type, SignatureKey};
use crate::FuncSet;

/// Computes the canonical signature key for an explicit signature.
pub fn signature_key(
    types: &TypeTable,
    layout: &DataLayout,
    ret: TypeId,
    params: &[TypeId],
    is_vararg: bool,
) -> SignatureKey {
    let mut h = DefaultHasher::new();
    9u8.hash(&mut h);
    is_vararg.hash(&mut h);
    params.len().hash(&mut h);
    hash_sig_type(types, layout, ret, &mut h);
    for &p in params {
        hash_sig_type(types, layout, p, &mut h);
    }
    SignatureKey(h.finish())
}

fn hash_sig_type(types: &TypeTable, layout: &DataLayout, ty: TypeId, h: &mut impl Hasher) {
    if is_general_pointer(types, layout, ty) {
        0xb5u8.hash(h);
    } else {
        hash_type(types, layout, ty, h);
    }
}

/// True for types the signature hash treats as wildcards: any pointer, and
/// integers of pointer width.
fn is_general_pointer(types: &TypeTable, layout: &DataLayout, ty: TypeId) -> bool {
    match types.kind(ty) {
        TypeKind::Pointer { .. } => true,
        TypeKind::Integer { bits } => *bits == layout.pointer_bits(),
        _ => false,
    }
}

/// The signature key of a function's declared type.
pub fn function_signature(program: &Program, f: FunctionId) -> SignatureKey {
    let layout = program.layout_of(f);
    match program.types().kind(program.function(f).ty) {
        TypeKind::Function {
            ret,
            params,
            is_vararg,
        } => signature_key(program.types(), layout, *ret, params, *is_vararg),
        // Malformed function type; hash as a nullary signature over its type.
        _ => signature_key(program.types(), layout, program.function(f).ty, &[], false),
    }
}

/// The signature key of a call site, or `None` for inline-assembly calls.
///
/// For calls through a function pointer the pointee function type is hashed
/// (so variadic callee types match their definitions); otherwise the
/// signature is synthesized from the result and actual argument types.
pub fn call_signature(program: &Program, call: ValueId) -> Option<SignatureKey> {
    let data = program.value(call);
    let ValueKind::Call { callee, args } = &data.kind else {
        return None;
    };
    let func = data.parent?;
    let layout = program.layout_of(func);
    match callee {
        Callee::InlineAsm => None,
        Callee::Direct(f) => Some(function_signature(program, *f)),
        Callee::Indirect(cv) => {
            let types = program.types();
            let callee_ty = program.value(*cv).ty;
            if let Some(fn_ty) = types.pointee(callee_ty).filter(|&t| types.is_function(t)) {
                match types.kind(fn_ty) {
                    TypeKind::Function {
                        ret,
                        params,
                        is_vararg,
                    } => Some(signature_key(types, layout, *ret, params, *is_vararg)),
                    _ => None,
                }
            } else {
                let params: Vec<TypeId> = args.iter().map(|&a| program.value(a).ty).collect();
                Some(signature_key(types, layout, data.ty, &params, false))
            }
        }
    }
}

/// Structural type compatibility with general-pointer wildcards.
///
/// Symmetric: `fuzzy_type_match(a, b) == fuzzy_type_match(b, a)` for any pair
/// of types and layouts.
pub fn fuzzy_type_match(
    types: &TypeTable,
    mut a: TypeId,
    a_layout: &DataLayout,
    mut b: TypeId,
    b_layout: &DataLayout,
) -> bool {
    if a == b {
        return true;
    }

    while types.is_pointer(a) && types.is_pointer(b) {
        a = types.pointee(a).unwrap_or(a);
        b = types.pointee(b).unwrap_or(b);
    }
    if a == b {
        return true;
    }

    if let (Some(na), Some(nb)) = (types.struct_name(a), types.struct_name(b)) {
        if na == nb {
            return true;
        }
    }
    if let (TypeKind::Integer { bits: ba }, TypeKind::Integer { bits: bb }) =
        (types.kind(a), types.kind(b))
    {
        if ba == bb {
            return true;
        }
    }

    // General pointers: the byte pointer is equivalent to any pointer and to
    // pointer-width integers.
    let intptr = |ty: TypeId, layout: &DataLayout| {
        matches!(types.kind(ty), TypeKind::Integer { bits } if *bits == layout.pointer_bits())
    };
    if (is_byte_pointer(types, a) && (types.is_pointer(b) || intptr(b, b_layout)))
        || (is_byte_pointer(types, b) && (types.is_pointer(a) || intptr(a, a_layout)))
    {
        return true;
    }

    false
}

fn is_byte_pointer(types: &TypeTable, ty: TypeId) -> bool {
    types
        .pointee(ty)
        .is_some_and(|p| matches!(types.kind(p), TypeKind::Integer { bits: 8 }))
}

/// Whether `f` is a plausible target for `call` under per-argument fuzzy
/// matching. The caller is responsible for restricting candidates to
/// address-taken, non-intrinsic functions.
pub fn signature_matches(program: &Program, call: ValueId, f: FunctionId) -> bool {
    let data = program.value(call);
    let ValueKind::Call { args, .. } = &data.kind else {
        return false;
    };
    let fd = program.function(f);
    if fd.is_intrinsic() {
        return false;
    }
    if program.is_vararg(f) {
        // Variadic: compare only the declared positional parameters.
        if args.len() < fd.arg_count() {
            return false;
        }
    } else if args.len() != fd.arg_count() {
        return false;
    }

    // Identical canonical signatures match outright.
    if call_signature(program, call) == Some(function_signature(program, f)) {
        return true;
    }

    let Some(caller) = data.parent else {
        return false;
    };
    let caller_layout = program.layout_of(caller);
    let callee_layout = program.layout_of(f);
    let types = program.types();

    for i in 0..fd.arg_count() {
        let Some(declared) = program.param_type(f, i) else {
            return false;
        };
        let actual = program.value(args[i]).ty;
        if !fuzzy_type_match(types, declared, callee_layout, actual, caller_layout) {
            return false;
        }
    }

    fuzzy_type_match(
        types,
        program.return_type(f),
        callee_layout,
        data.ty,
        caller_layout,
    )
}

/// Index from canonical signature key to the address-taken functions carrying
/// that signature. This seeds the first resolution layer.
#[derive(Debug, Default)]
pub struct SignatureIndex {
    by_signature: HashMap<SignatureKey, FuncSet>,
}

impl SignatureIndex {
    /// Builds the index over every defined, non-intrinsic, address-taken
    /// function. An address taken through a declaration counts for the
    /// defining module's function. The program must be finalized.
    pub fn build(program: &Program) -> Self {
        let mut by_signature: HashMap<SignatureKey, FuncSet> = HashMap::new();
        for (id, f) in program.functions() {
            if !f.address_taken {
                continue;
            }
            let Some(def) = program.definition_of(id) else {
                continue;
            };
            if program.function(def).is_intrinsic() {
                continue;
            }
            by_signature
                .entry(function_signature(program, def))
                .or_default()
                .insert(def);
        }
        Self { by_signature }
    }

    /// Functions bucketed under `key`.
    pub fn candidates(&self, key: SignatureKey) -> Option<&FuncSet> {
        self.by_signature.get(&key)
    }

    /// Number of distinct signatures indexed.
    pub fn len(&self) -> usize {
        self.by_signature.len()
    }

    /// True when nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.by_signature.is_empty()
    }
}
