//! Property-based tests for the hashing and matching layers.
//!
//! These verify the algebraic properties resolution depends on:
//! - Fuzzy type matching is symmetric
//! - Structural type keys are stable across independently built programs
//! - General-pointer positions collapse to one signature bucket
//! - The layer walk terminates on arbitrary phi graphs

use proptest::prelude::*;

use tyflow_analysis::{fuzzy_type_match, signature_key, type_key, LayerWalker};
use tyflow_ir::{DataLayout, GepIndex, Program, TypeId, TypeTable};

// =============================================================================
// Type Generators
// =============================================================================

/// A buildable description of a type, independent of any type table.
#[derive(Debug, Clone)]
enum TypeDesc {
    Int(u32),
    Float(u32),
    BytePtr,
    Ptr(Box<TypeDesc>),
    Named(u8),
    Struct(Vec<TypeDesc>),
    Array(Box<TypeDesc>, u64),
}

fn materialize(t: &mut TypeTable, d: &TypeDesc) -> TypeId {
    match d {
        TypeDesc::Int(bits) => t.int(*bits),
        TypeDesc::Float(bits) => t.float(*bits),
        TypeDesc::BytePtr => t.byte_pointer(),
        TypeDesc::Ptr(inner) => {
            let inner = materialize(t, inner);
            t.pointer_to(inner)
        }
        TypeDesc::Named(n) => {
            let i32t = t.int(32);
            t.struct_named(format!("s{n}"), vec![i32t])
        }
        TypeDesc::Struct(fields) => {
            let fields = fields.iter().map(|f| materialize(t, f)).collect();
            t.struct_literal(fields)
        }
        TypeDesc::Array(element, length) => {
            let element = materialize(t, element);
            t.array(element, *length)
        }
    }
}

fn arb_type() -> impl Strategy<Value = TypeDesc> {
    let leaf = prop_oneof![
        prop::sample::select(vec![1u32, 8, 16, 32, 64]).prop_map(TypeDesc::Int),
        prop::sample::select(vec![32u32, 64]).prop_map(TypeDesc::Float),
        Just(TypeDesc::BytePtr),
        (0u8..4).prop_map(TypeDesc::Named),
    ];
    leaf.prop_recursive(3, 16, 4, |inner| {
        prop_oneof![
            inner.clone().prop_map(|t| TypeDesc::Ptr(Box::new(t))),
            proptest::collection::vec(inner.clone(), 0..4).prop_map(TypeDesc::Struct),
            (inner, 1u64..5).prop_map(|(t, n)| TypeDesc::Array(Box::new(t), n)),
        ]
    })
}

// =============================================================================
// Hashing and Matching Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    /// fuzzy_type_match(a, b) == fuzzy_type_match(b, a), including across
    /// differing data layouts.
    #[test]
    fn fuzzy_match_is_symmetric(a in arb_type(), b in arb_type(), narrow in any::<bool>()) {
        let mut p = Program::new();
        let ta = materialize(p.types_mut(), &a);
        let tb = materialize(p.types_mut(), &b);
        let l64 = DataLayout::lp64();
        let l32 = DataLayout::ilp32();
        let (la, lb) = if narrow { (&l32, &l64) } else { (&l64, &l64) };
        prop_assert_eq!(
            fuzzy_type_match(p.types(), ta, la, tb, lb),
            fuzzy_type_match(p.types(), tb, lb, ta, la),
            "asymmetric for {:?} vs {:?}", a, b
        );
    }

    /// Structurally equal types built in independent programs hash equally.
    #[test]
    fn type_keys_are_stable_across_programs(d in arb_type()) {
        let dl = DataLayout::lp64();
        let mut p1 = Program::new();
        let t1 = materialize(p1.types_mut(), &d);
        let mut p2 = Program::new();
        // Interleave an unrelated type so the arenas diverge.
        let _ = p2.types_mut().int(7);
        let t2 = materialize(p2.types_mut(), &d);
        prop_assert_eq!(
            type_key(p1.types(), &dl, t1),
            type_key(p2.types(), &dl, t2)
        );
    }

    /// Any mix of general-pointer kinds in a parameter list lands in the
    /// same signature bucket as the all-byte-pointer form.
    #[test]
    fn general_pointer_positions_share_buckets(
        kinds in proptest::collection::vec(0u8..3, 0..5)
    ) {
        let mut p = Program::new();
        let dl = DataLayout::lp64();
        let i32t = p.types_mut().int(32);
        let bp = p.types_mut().byte_pointer();
        let ip = p.types_mut().pointer_to(i32t);
        let iptr = p.types_mut().int(64);

        let mixed: Vec<TypeId> = kinds
            .iter()
            .map(|k| match k {
                0 => bp,
                1 => ip,
                _ => iptr,
            })
            .collect();
        let canonical: Vec<TypeId> = kinds.iter().map(|_| bp).collect();

        prop_assert_eq!(
            signature_key(p.types(), &dl, i32t, &mixed, false),
            signature_key(p.types(), &dl, i32t, &canonical, false)
        );
    }

    /// The chain walk terminates on arbitrary (including cyclic) phi graphs.
    #[test]
    fn chain_walk_terminates_on_phi_graphs(
        edges in proptest::collection::vec((0usize..6, 0usize..6), 0..14)
    ) {
        let mut p = Program::new();
        let m = p.add_module("m", DataLayout::lp64());
        let i32t = p.types_mut().int(32);
        let s = p.types_mut().struct_named("node", vec![i32t, i32t]);
        let ps = p.types_mut().pointer_to(s);
        let void = p.types_mut().void();
        let fnty = p.types_mut().function(void, vec![], false);
        let f = p.define_function(m, "f", fnty);

        let phis: Vec<_> = (0..6)
            .map(|_| p.inst_phi(f, ps, vec![]).unwrap())
            .collect();
        for &(from, to) in &edges {
            p.phi_add_incoming(phis[from], phis[to]).unwrap();
        }
        let gep = p
            .inst_gep(f, phis[0], s, vec![GepIndex::Const(0), GepIndex::Const(1)])
            .unwrap();
        p.finalize();

        let aliases = tyflow_analysis::AliasMap::new();
        let layout = DataLayout::lp64();
        let walker = LayerWalker::new(&p, &layout, &aliases, true, true);
        let (chain, _complete) = walker.base_type_chain(gep);
        // Termination is the property; the gep layer must always survive.
        prop_assert!(chain.contains(&(s, 1)));
        prop_assert!(chain.len() <= 8);
    }
}

// =============================================================================
// Regression cases
// =============================================================================

#[test]
fn byte_pointer_matches_itself_across_layouts() {
    let mut p = Program::new();
    let bp = p.types_mut().byte_pointer();
    let l64 = DataLayout::lp64();
    let l32 = DataLayout::ilp32();
    assert!(fuzzy_type_match(p.types(), bp, &l64, bp, &l32));
}

#[test]
fn named_struct_pointers_match_by_name_at_any_depth() {
    let mut p = Program::new();
    let dl = DataLayout::lp64();
    let i32t = p.types_mut().int(32);
    let a = p.types_mut().struct_named("deep", vec![i32t]);
    let pa = p.types_mut().pointer_to(a);
    let ppa = p.types_mut().pointer_to(pa);
    let i64t = p.types_mut().int(64);
    let b = p.types_mut().struct_named("deep", vec![i64t, i64t]);
    let pb = p.types_mut().pointer_to(b);
    let ppb = p.types_mut().pointer_to(pb);
    assert!(fuzzy_type_match(p.types(), ppa, &dl, ppb, &dl));
}
