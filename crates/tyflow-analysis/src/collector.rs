//! Whole-program type-flow collection.
//!
//! Collection answers one question for resolution: which functions have ever
//! been observed flowing into which `(container type, field index)` slots?
//! Three sub-passes run over every module:
//!
//! 1. *Confinement* walks global initializers and instructions, recording a
//!    function into the slots of every container it is stored into.
//! 2. *Propagation* records directed edges between slots when one container
//!    value flows into another (stores, byte copies), so targets confined in
//!    the source slot are also visible through the destination slot.
//! 3. *Alias recovery* maps opaque byte-pointer call results (allocator
//!    returns) to the composite pointer type they are later cast to.
//!
//! Anything the walker cannot bound widens instead of failing: chains that
//! end opaquely cap their tail type, and pointers of unknown provenance mark
//! their destination slots as escaped.
//!
//! Collection is module-at-a-time and runs per-module work in parallel with
//! rayon; per-module partial graphs are merged afterwards under single
//! ownership. The finished [`TypeFlowGraph`] is read-only.

use std::collections::{HashMap, HashSet, VecDeque};

use rayon::prelude::*;
use tracing::{debug, trace};

use tyflow_ir::{
    Callee, DataLayout, FunctionId, GlobalId, ModuleId, Program, TypeId, TypeKind, ValueId,
    ValueKind,
};

use crate::type_keys::{type_index_key, type_key, TypeIndexKey, TypeKey, ANY_FIELD};
use crate::walker::{AliasMap, LayerWalker};
use crate::FuncSet;

/// The tables produced by collection and consumed by resolution.
#[derive(Debug, Default)]
pub struct TypeFlowGraph {
    /// For container type `T`, the functions ever stored into field `i`.
    pub typeidx_funcs: HashMap<TypeKey, HashMap<i64, FuncSet>>,
    /// Directed propagation edges: targets of the right-hand slots also flow
    /// through the keyed slot.
    pub typeidx_prop: HashMap<TypeKey, HashMap<i64, HashSet<(TypeKey, i64)>>>,
    /// Container types whose deeper layers are untrusted.
    pub type_caps: HashSet<TypeKey>,
    /// Slots whose contents escaped to opaque code.
    pub type_escapes: HashSet<TypeIndexKey>,
    /// Globals recognized as virtual-method tables, with their functions.
    pub vtable_funcs: HashMap<ValueId, FuncSet>,
    /// Per-function byte-pointer alias recovery.
    pub aliases: AliasMap,
}

impl TypeFlowGraph {
    /// Merges another partial graph into this one.
    pub fn merge(&mut self, other: TypeFlowGraph) {
        for (tk, by_idx) in other.typeidx_funcs {
            let entry = self.typeidx_funcs.entry(tk).or_default();
            for (idx, funcs) in by_idx {
                entry.entry(idx).or_default().extend(funcs);
            }
        }
        for (tk, by_idx) in other.typeidx_prop {
            let entry = self.typeidx_prop.entry(tk).or_default();
            for (idx, edges) in by_idx {
                entry.entry(idx).or_default().extend(edges);
            }
        }
        self.type_caps.extend(other.type_caps);
        self.type_escapes.extend(other.type_escapes);
        for (gv, funcs) in other.vtable_funcs {
            self.vtable_funcs.entry(gv).or_default().extend(funcs);
        }
        for (f, map) in other.aliases {
            self.aliases.entry(f).or_default().extend(map);
        }
    }

    /// Direct targets recorded for `(tk, idx)`: the field's own set unioned
    /// with the any-field set; for [`ANY_FIELD`] the union across all fields.
    pub fn targets_for(&self, tk: TypeKey, idx: i64) -> FuncSet {
        let mut out = FuncSet::new();
        let Some(by_idx) = self.typeidx_funcs.get(&tk) else {
            return out;
        };
        if idx == ANY_FIELD {
            for funcs in by_idx.values() {
                out.extend(funcs.iter().copied());
            }
        } else {
            if let Some(funcs) = by_idx.get(&idx) {
                out.extend(funcs.iter().copied());
            }
            if let Some(funcs) = by_idx.get(&ANY_FIELD) {
                out.extend(funcs.iter().copied());
            }
        }
        out
    }

    /// Slots reachable from `(tk, idx)` through propagation edges, following
    /// the any-field edges of every visited type as well.
    pub fn dependent_types(&self, tk: TypeKey, idx: i64) -> HashSet<(TypeKey, i64)> {
        let mut out = HashSet::new();
        let mut visited = HashSet::new();
        let mut work = VecDeque::new();
        work.push_back((tk, idx));
        while let Some(cur) = work.pop_front() {
            if !visited.insert(cur) {
                continue;
            }
            let Some(by_idx) = self.typeidx_prop.get(&cur.0) else {
                continue;
            };
            for key in [cur.1, ANY_FIELD] {
                if let Some(edges) = by_idx.get(&key) {
                    for &edge in edges {
                        out.insert(edge);
                        work.push_back(edge);
                    }
                }
            }
        }
        out
    }

    /// Whether the slot `(tk, idx)` or its any-field form has escaped.
    pub fn is_escaped(&self, tk: TypeKey, idx: i64) -> bool {
        self.type_escapes.contains(&type_index_key(tk, idx))
            || self.type_escapes.contains(&type_index_key(tk, ANY_FIELD))
    }
}

/// Runs the collection passes over a finalized program.
pub struct TypeFlowCollector<'p> {
    program: &'p Program,
    field_sensitive: bool,
    sound: bool,
}

impl<'p> TypeFlowCollector<'p> {
    /// Creates a collector. `field_sensitive` collapses all field indices to
    /// `0` when false; `sound` controls the downcast bail-out in the walker.
    pub fn new(program: &'p Program, field_sensitive: bool, sound: bool) -> Self {
        Self {
            program,
            field_sensitive,
            sound,
        }
    }

    /// Runs all passes and returns the merged graph.
    pub fn run(&self) -> TypeFlowGraph {
        let module_ids: Vec<ModuleId> = self.program.modules().map(|(id, _)| id).collect();

        // Alias maps are function-local but read across modules (direct-call
        // confinement follows callees), so recover them all first.
        let alias_parts: Vec<AliasMap> = module_ids
            .par_iter()
            .map(|&m| self.collect_module_aliases(m))
            .collect();
        let mut aliases = AliasMap::new();
        for part in alias_parts {
            aliases.extend(part);
        }

        let parts: Vec<TypeFlowGraph> = module_ids
            .par_iter()
            .map(|&m| self.collect_module(m, &aliases))
            .collect();
        let mut graph = TypeFlowGraph::default();
        for part in parts {
            graph.merge(part);
        }
        graph.aliases = aliases;

        debug!(
            types = graph.typeidx_funcs.len(),
            prop_types = graph.typeidx_prop.len(),
            caps = graph.type_caps.len(),
            escapes = graph.type_escapes.len(),
            vtables = graph.vtable_funcs.len(),
            "type flow collection finished"
        );
        graph
    }

    fn collect_module(&self, m: ModuleId, aliases: &AliasMap) -> TypeFlowGraph {
        let mut g = TypeFlowGraph::default();
        let module = self.program.module(m);
        let layout = &module.layout;
        let walker = LayerWalker::new(
            self.program,
            layout,
            aliases,
            self.field_sensitive,
            self.sound,
        );

        for &gid in &module.globals {
            self.confine_in_initializer(&mut g, layout, gid);
        }
        for &fid in &module.functions {
            let f = self.program.function(fid);
            if f.is_declaration || f.is_intrinsic() {
                continue;
            }
            self.confine_in_function(&walker, &mut g, layout, fid);
        }
        for &fid in &module.functions {
            if self.program.function(fid).is_declaration {
                continue;
            }
            self.propagate_in_function(&walker, &mut g, layout, fid);
        }
        trace!(
            module = %module.name,
            types = g.typeidx_funcs.len(),
            caps = g.type_caps.len(),
            "module collected"
        );
        g
    }

    // ---- alias recovery ----

    fn collect_module_aliases(&self, m: ModuleId) -> AliasMap {
        let program = self.program;
        let types = program.types();
        let mut out = AliasMap::new();
        for &fid in &program.module(m).functions {
            let f = program.function(fid);
            if f.is_declaration {
                continue;
            }
            let mut map: HashMap<ValueId, ValueId> = HashMap::new();
            let mut dropped: HashSet<ValueId> = HashSet::new();
            for &inst in &f.body {
                let ValueKind::BitCast { operand } = program.value(inst).kind else {
                    continue;
                };
                // Only call results: the typed alias of an opaque allocator
                // return.
                if !matches!(program.value(operand).kind, ValueKind::Call { .. }) {
                    continue;
                }
                if !is_byte_pointer(types, program.value(operand).ty) {
                    continue;
                }
                let Some(pointee) = types.pointee(program.value(inst).ty) else {
                    continue;
                };
                if !types.is_composite(pointee) {
                    continue;
                }
                if map.contains_key(&operand) {
                    // A second cast makes the recovery ambiguous.
                    dropped.insert(operand);
                    continue;
                }
                map.insert(operand, inst);
            }
            for d in dropped {
                map.remove(&d);
            }
            if !map.is_empty() {
                out.insert(fid, map);
            }
        }
        out
    }

    // ---- confinement ----

    fn confine_in_initializer(&self, g: &mut TypeFlowGraph, layout: &DataLayout, gid: GlobalId) {
        let program = self.program;
        let types = program.types();
        let global = program.global(gid);
        let Some(init) = global.initializer else {
            return;
        };
        if !program.value(init).kind.is_constant_aggregate() {
            return;
        }

        let mut worklist: VecDeque<ValueId> = VecDeque::new();
        let mut visited: HashSet<ValueId> = HashSet::new();
        let mut containers: HashMap<ValueId, (ValueId, i64)> = HashMap::new();
        worklist.push_back(init);

        while let Some(u) = worklist.pop_front() {
            if !visited.insert(u) {
                continue;
            }
            let u_data = program.value(u);
            if types.is_struct(u_data.ty) {
                if let ValueKind::ConstantAggregate { elements } = &u_data.kind {
                    assert_eq!(
                        types.element_count(u_data.ty),
                        Some(elements.len() as u64),
                        "struct initializer arity mismatch for {}",
                        global.name
                    );
                }
            }

            let operands: Vec<ValueId> = match &u_data.kind {
                ValueKind::ConstantAggregate { elements } => elements.clone(),
                ValueKind::Global(inner) => {
                    program.global(*inner).initializer.into_iter().collect()
                }
                ValueKind::BitCast { operand } | ValueKind::PtrToInt { operand } => {
                    vec![*operand]
                }
                _ => Vec::new(),
            };

            for (op_idx, &o) in operands.iter().enumerate() {
                containers.insert(o, (u, op_idx as i64));
                let o_data = program.value(o);
                let mut found: Option<FunctionId> = None;

                match &o_data.kind {
                    // A function address assigned to a slot.
                    ValueKind::Function(f) => found = Some(*f),
                    // A nested composite value.
                    _ if types.is_composite(o_data.ty) => worklist.push_back(o),
                    ValueKind::PtrToInt { operand } => {
                        if let ValueKind::Function(f) = program.value(*operand).kind {
                            found = Some(f);
                        } else {
                            worklist.push_back(*operand);
                        }
                    }
                    ValueKind::BitCast { operand } => {
                        if let ValueKind::Function(f) = program.value(*operand).kind {
                            // A cast function pointer outside a struct is the
                            // virtual-table shape.
                            if !types.is_struct(u_data.ty) {
                                g.vtable_funcs.entry(global.value).or_default().insert(f);
                            }
                            found = Some(f);
                        } else {
                            worklist.push_back(*operand);
                        }
                    }
                    // A reference to another object.
                    _ if types.is_pointer(o_data.ty) => {
                        if matches!(o_data.kind, ValueKind::ConstantNull) {
                            continue;
                        }
                        worklist.push_back(o);
                        if matches!(o_data.kind, ValueKind::Global(_)) {
                            if let Some(pointee) = types.pointee(o_data.ty) {
                                // Indirection hides the deeper layers.
                                if types.is_struct(pointee) {
                                    g.type_caps.insert(type_key(types, layout, pointee));
                                }
                            }
                        }
                    }
                    _ => {}
                }

                let Some(f) = found else {
                    continue;
                };
                if program.function(f).is_intrinsic() {
                    continue;
                }

                // Record the function into every enclosing container slot.
                let mut climb_visited: HashSet<ValueId> = HashSet::new();
                let mut cv = o;
                while let Some(&(container, cidx)) = containers.get(&cv) {
                    let ctk = type_key(types, layout, program.value(container).ty);
                    let idx = if self.field_sensitive { cidx } else { 0 };
                    g.typeidx_funcs
                        .entry(ctk)
                        .or_default()
                        .entry(idx)
                        .or_default()
                        .insert(f);
                    climb_visited.insert(cv);
                    if climb_visited.contains(&container) {
                        break;
                    }
                    cv = container;
                }
            }
        }
    }

    fn confine_in_function(
        &self,
        walker: &LayerWalker<'_>,
        g: &mut TypeFlowGraph,
        layout: &DataLayout,
        fid: FunctionId,
    ) {
        let program = self.program;
        for &inst in &program.function(fid).body {
            match &program.value(inst).kind {
                ValueKind::Store { address, value } => {
                    let Some(cf) = self.base_function(program.strip_casts(*value)) else {
                        continue;
                    };
                    self.confine_target(walker, g, layout, *address, cf);
                }
                ValueKind::Call { callee, args } => {
                    for (argno, &a) in args.iter().enumerate() {
                        let ValueKind::Function(af) = program.value(a).kind else {
                            continue;
                        };
                        if program.function(af).is_intrinsic() {
                            continue;
                        }
                        match callee {
                            Callee::Indirect(_) => {
                                self.confine_target(walker, g, layout, a, af);
                            }
                            Callee::Direct(cf) => {
                                // Follow the function address into the
                                // callee's matching parameter.
                                let Some(def) = program.definition_of(*cf) else {
                                    continue;
                                };
                                let Some(&param) = program.function(def).params.get(argno)
                                else {
                                    continue;
                                };
                                for &u in program.users(param) {
                                    if matches!(
                                        program.value(u).kind,
                                        ValueKind::Store { .. } | ValueKind::BitCast { .. }
                                    ) {
                                        self.confine_target(walker, g, layout, u, af);
                                    }
                                }
                            }
                            Callee::InlineAsm => {}
                        }
                    }
                }
                _ => {}
            }
        }
    }

    // ---- propagation ----

    fn propagate_in_function(
        &self,
        walker: &LayerWalker<'_>,
        g: &mut TypeFlowGraph,
        layout: &DataLayout,
        fid: FunctionId,
    ) {
        let program = self.program;
        let types = program.types();
        for &inst in &program.function(fid).body {
            let (po, vo) = match &program.value(inst).kind {
                ValueKind::Store { address, value } => (*address, *value),
                // Aggregate assignment lowered to a byte copy behaves like a
                // store of the source object.
                ValueKind::Call {
                    callee: Callee::Direct(cf),
                    args,
                } if program.function(*cf).is_memcpy() && args.len() >= 2 => (args[0], args[1]),
                _ => continue,
            };

            let vo_kind = &program.value(vo).kind;
            if vo_kind.is_constant_aggregate() || vo_kind.is_constant_data() {
                // Handled by the initializer pass.
                continue;
            }

            let mut layers = Vec::new();
            let mut next = None;
            let mut visited = HashSet::new();
            walker.next_layer(vo, &mut layers, &mut next, &mut visited);
            if !layers.is_empty() {
                for &(ty, idx) in &layers {
                    self.propagate(walker, g, layout, po, ty, idx);
                }
                continue;
            }

            let mut bt_visited = HashSet::new();
            if let Some(base) = walker.base_type(vo, &mut bt_visited) {
                self.propagate(walker, g, layout, po, base, ANY_FIELD);
                continue;
            }

            let stripped = program.strip_casts(vo);
            if let Some(fn_ty) = func_pointer_type(program, stripped) {
                if self.base_function(vo).is_none() {
                    self.propagate(walker, g, layout, po, fn_ty, ANY_FIELD);
                }
                continue;
            }

            if types.is_pointer(program.value(vo).ty) {
                self.escape(walker, g, layout, po);
            }
        }
    }

    // ---- shared helpers ----

    /// Base-type chain with the cap side effect: an incomplete, non-empty
    /// chain caps its tail type.
    fn chain(
        &self,
        walker: &LayerWalker<'_>,
        g: &mut TypeFlowGraph,
        layout: &DataLayout,
        v: ValueId,
    ) -> (Vec<(TypeId, i64)>, bool) {
        let (chain, complete) = walker.base_type_chain(v);
        if !complete {
            if let Some(&(tail, _)) = chain.last() {
                g.type_caps
                    .insert(type_key(self.program.types(), layout, tail));
            }
        }
        (chain, complete)
    }

    fn confine_target(
        &self,
        walker: &LayerWalker<'_>,
        g: &mut TypeFlowGraph,
        layout: &DataLayout,
        v: ValueId,
        target: FunctionId,
    ) {
        let program = self.program;
        if program.function(target).is_intrinsic() {
            return;
        }
        let types = program.types();
        let (chain, complete) = self.chain(walker, g, layout, v);
        for &(ty, idx) in &chain {
            g.typeidx_funcs
                .entry(type_key(types, layout, ty))
                .or_default()
                .entry(idx)
                .or_default()
                .insert(target);
        }
        if !complete && chain.is_empty() {
            // No container to cap; cap the function's own type so resolution
            // stops at the first layer for calls through it.
            g.type_caps
                .insert(type_key(types, layout, program.function(target).ty));
        }
    }

    fn propagate(
        &self,
        walker: &LayerWalker<'_>,
        g: &mut TypeFlowGraph,
        layout: &DataLayout,
        to: ValueId,
        from_ty: TypeId,
        from_idx: i64,
    ) {
        let types = self.program.types();
        let from_key = type_key(types, layout, from_ty);
        let (chain, _) = self.chain(walker, g, layout, to);
        for &(ty, idx) in &chain {
            let tk = type_key(types, layout, ty);
            if tk == from_key && idx == from_idx {
                continue;
            }
            g.typeidx_prop
                .entry(tk)
                .or_default()
                .entry(idx)
                .or_default()
                .insert((from_key, from_idx));
        }
    }

    fn escape(
        &self,
        walker: &LayerWalker<'_>,
        g: &mut TypeFlowGraph,
        layout: &DataLayout,
        v: ValueId,
    ) {
        let types = self.program.types();
        let (chain, _) = self.chain(walker, g, layout, v);
        for &(ty, idx) in &chain {
            g.type_escapes
                .insert(type_index_key(type_key(types, layout, ty), idx));
        }
    }

    /// The concrete function behind a value, looking through bitcasts.
    /// Intrinsics are never reported.
    fn base_function(&self, v: ValueId) -> Option<FunctionId> {
        let program = self.program;
        let as_target = |v: ValueId| match program.value(v).kind {
            ValueKind::Function(f) if !program.function(f).is_intrinsic() => Some(f),
            _ => None,
        };
        if let Some(f) = as_target(v) {
            return Some(f);
        }
        let mut cv = v;
        while let ValueKind::BitCast { operand } = program.value(cv).kind {
            if let Some(f) = as_target(operand) {
                return Some(f);
            }
            cv = operand;
        }
        None
    }
}

fn is_byte_pointer(types: &tyflow_ir::TypeTable, ty: TypeId) -> bool {
    types
        .pointee(ty)
        .is_some_and(|p| matches!(types.kind(p), TypeKind::Integer { bits: 8 }))
}

fn func_pointer_type(program: &Program, v: ValueId) -> Option<TypeId> {
    let types = program.types();
    types
        .pointee(program.value(v).ty)
        .filter(|&t| types.is_function(t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tyflow_ir::{GepIndex, Intrinsic};

    /// One module, an `i32 (i32)` function type, and two defined functions.
    fn setup() -> (Program, ModuleId, TypeId, FunctionId, FunctionId) {
        let mut p = Program::new();
        let m = p.add_module("m", tyflow_ir::DataLayout::lp64());
        let i32t = p.types_mut().int(32);
        let fnty = p.types_mut().function(i32t, vec![i32t], false);
        let f1 = p.define_function(m, "f1", fnty);
        let f2 = p.define_function(m, "f2", fnty);
        (p, m, fnty, f1, f2)
    }

    fn key(p: &Program, ty: TypeId) -> TypeKey {
        type_key(p.types(), &tyflow_ir::DataLayout::lp64(), ty)
    }

    #[test]
    fn initializer_confines_fields() {
        let (mut p, m, fnty, f1, f2) = setup();
        let fptr = p.types_mut().pointer_to(fnty);
        let s = p.types_mut().struct_named("ops", vec![fptr, fptr]);
        let v1 = p.func_value(f1);
        let v2 = p.func_value(f2);
        let init = p.const_aggregate(s, vec![v1, v2]).unwrap();
        p.add_global(m, "g", s, Some(init));
        p.finalize();

        let g = TypeFlowCollector::new(&p, true, true).run();
        let sk = key(&p, s);
        assert_eq!(
            g.targets_for(sk, 0).into_iter().collect::<Vec<_>>(),
            vec![f1]
        );
        assert_eq!(
            g.targets_for(sk, 1).into_iter().collect::<Vec<_>>(),
            vec![f2]
        );
        assert_eq!(g.targets_for(sk, ANY_FIELD).len(), 2);
    }

    #[test]
    fn field_insensitive_initializer_collapses_to_zero() {
        let (mut p, m, fnty, f1, f2) = setup();
        let fptr = p.types_mut().pointer_to(fnty);
        let s = p.types_mut().struct_named("ops", vec![fptr, fptr]);
        let v1 = p.func_value(f1);
        let v2 = p.func_value(f2);
        let init = p.const_aggregate(s, vec![v1, v2]).unwrap();
        p.add_global(m, "g", s, Some(init));
        p.finalize();

        let g = TypeFlowCollector::new(&p, false, true).run();
        let sk = key(&p, s);
        assert_eq!(g.targets_for(sk, 0).len(), 2);
        let by_idx = g.typeidx_funcs.get(&sk).unwrap();
        assert!(by_idx.keys().all(|&i| i == 0));
    }

    #[test]
    fn nested_initializer_climbs_containers() {
        let (mut p, m, fnty, f1, _f2) = setup();
        let fptr = p.types_mut().pointer_to(fnty);
        let i64t = p.types_mut().int(64);
        let inner = p.types_mut().struct_named("inner", vec![fptr]);
        let outer = p.types_mut().struct_named("outer", vec![i64t, inner]);
        let v1 = p.func_value(f1);
        let inner_init = p.const_aggregate(inner, vec![v1]).unwrap();
        let zero = p.const_int(i64t, 0);
        let outer_init = p.const_aggregate(outer, vec![zero, inner_init]).unwrap();
        p.add_global(m, "g", outer, Some(outer_init));
        p.finalize();

        let g = TypeFlowCollector::new(&p, true, true).run();
        assert!(g.targets_for(key(&p, inner), 0).contains(&f1));
        assert!(g.targets_for(key(&p, outer), 1).contains(&f1));
        assert!(!g.targets_for(key(&p, outer), 0).contains(&f1));
    }

    #[test]
    fn bitcast_array_initializer_is_a_vtable() {
        let (mut p, m, _fnty, f1, f2) = setup();
        let bp = p.types_mut().byte_pointer();
        let arr = p.types_mut().array(bp, 2);
        let v1 = p.func_value(f1);
        let v2 = p.func_value(f2);
        let c1 = p.const_bitcast(v1, bp);
        let c2 = p.const_bitcast(v2, bp);
        let init = p.const_aggregate(arr, vec![c1, c2]).unwrap();
        let gid = p.add_global(m, "vt", arr, Some(init));
        let gv = p.global(gid).value;
        p.finalize();

        let g = TypeFlowCollector::new(&p, true, true).run();
        let vt = g.vtable_funcs.get(&gv).expect("vtable recorded");
        assert!(vt.contains(&f1) && vt.contains(&f2));
        assert!(g.targets_for(key(&p, arr), 0).contains(&f1));
        assert!(g.targets_for(key(&p, arr), 1).contains(&f2));
    }

    #[test]
    fn bitcast_inside_struct_is_not_a_vtable() {
        let (mut p, m, _fnty, f1, _f2) = setup();
        let bp = p.types_mut().byte_pointer();
        let s = p.types_mut().struct_named("holder", vec![bp]);
        let v1 = p.func_value(f1);
        let c1 = p.const_bitcast(v1, bp);
        let init = p.const_aggregate(s, vec![c1]).unwrap();
        let gid = p.add_global(m, "h", s, Some(init));
        let gv = p.global(gid).value;
        p.finalize();

        let g = TypeFlowCollector::new(&p, true, true).run();
        assert!(!g.vtable_funcs.contains_key(&gv));
        assert!(g.targets_for(key(&p, s), 0).contains(&f1));
    }

    #[test]
    fn store_confines_and_caps() {
        let (mut p, m, fnty, f1, _f2) = setup();
        let fptr = p.types_mut().pointer_to(fnty);
        let i64t = p.types_mut().int(64);
        let s = p.types_mut().struct_named("cbs", vec![i64t, fptr]);
        let void = p.types_mut().void();
        let hostty = p.types_mut().function(void, vec![], false);
        let host = p.define_function(m, "host", hostty);
        let slot = p.inst_alloca(host, s).unwrap();
        let gep = p
            .inst_gep(host, slot, s, vec![GepIndex::Const(0), GepIndex::Const(1)])
            .unwrap();
        let v1 = p.func_value(f1);
        p.inst_store(host, gep, v1).unwrap();
        p.finalize();

        let g = TypeFlowCollector::new(&p, true, true).run();
        assert!(g.targets_for(key(&p, s), 1).contains(&f1));
        // The chain dead-ends at the alloca, so the tail type is capped.
        assert!(g.type_caps.contains(&key(&p, s)));
    }

    #[test]
    fn memcpy_records_propagation_edge() {
        let (mut p, m, fnty, f1, _f2) = setup();
        let fptr = p.types_mut().pointer_to(fnty);
        let s1 = p.types_mut().struct_named("src_ops", vec![fptr]);
        let s2 = p.types_mut().struct_named("dst_ops", vec![fptr]);
        let v1 = p.func_value(f1);
        let init = p.const_aggregate(s1, vec![v1]).unwrap();
        let g1 = p.add_global(m, "g1", s1, Some(init));
        let g2 = p.add_global(m, "g2", s2, None);

        let bp = p.types_mut().byte_pointer();
        let i64t = p.types_mut().int(64);
        let void = p.types_mut().void();
        let memcpy_ty = p.types_mut().function(void, vec![bp, bp, i64t], false);
        let memcpy = p.declare_intrinsic(m, "memcpy", memcpy_ty, Intrinsic::MemCpy);

        let hostty = p.types_mut().function(void, vec![], false);
        let host = p.define_function(m, "host", hostty);
        let g1v = p.global(g1).value;
        let g2v = p.global(g2).value;
        let dst = p.inst_bitcast(host, g2v, bp).unwrap();
        let src = p.inst_bitcast(host, g1v, bp).unwrap();
        let size = p.const_int(i64t, 8);
        p.inst_call(host, memcpy, vec![dst, src, size]).unwrap();
        p.finalize();

        let g = TypeFlowCollector::new(&p, true, true).run();
        let edges = g
            .typeidx_prop
            .get(&key(&p, s2))
            .and_then(|m| m.get(&0))
            .expect("propagation edge recorded");
        assert!(edges.contains(&(key(&p, s1), ANY_FIELD)));
        // Closure sees the source functions from the destination slot.
        let deps = g.dependent_types(key(&p, s2), 0);
        assert!(deps.contains(&(key(&p, s1), ANY_FIELD)));
        assert!(g.targets_for(key(&p, s1), ANY_FIELD).contains(&f1));
    }

    #[test]
    fn unknown_pointer_store_escapes_the_slot() {
        let (mut p, m, _fnty, _f1, _f2) = setup();
        let bp = p.types_mut().byte_pointer();
        let i64t = p.types_mut().int(64);
        let s = p.types_mut().struct_named("bag", vec![i64t, bp]);
        let void = p.types_mut().void();
        let hostty = p.types_mut().function(void, vec![], false);
        let host = p.define_function(m, "host", hostty);
        let slot = p.inst_alloca(host, s).unwrap();
        let gep = p
            .inst_gep(host, slot, s, vec![GepIndex::Const(0), GepIndex::Const(1)])
            .unwrap();
        let unknown = p.inst_opaque(host, bp).unwrap();
        p.inst_store(host, gep, unknown).unwrap();
        p.finalize();

        let g = TypeFlowCollector::new(&p, true, true).run();
        assert!(g.is_escaped(key(&p, s), 1));
        assert!(!g.is_escaped(key(&p, s), 0));
    }

    #[test]
    fn alias_recovery_drops_duplicates() {
        let (mut p, m, _fnty, _f1, _f2) = setup();
        let bp = p.types_mut().byte_pointer();
        let i32t = p.types_mut().int(32);
        let s = p.types_mut().struct_named("obj", vec![i32t]);
        let ps = p.types_mut().pointer_to(s);
        let i64t = p.types_mut().int(64);
        let malloc_ty = p.types_mut().function(bp, vec![i64t], false);
        let malloc = p.declare_function(m, "malloc", malloc_ty);

        let void = p.types_mut().void();
        let hostty = p.types_mut().function(void, vec![], false);
        let host = p.define_function(m, "host", hostty);
        let size = p.const_int(i64t, 16);
        let raw_ok = p.inst_call(host, malloc, vec![size]).unwrap();
        let cast_ok = p.inst_bitcast(host, raw_ok, ps).unwrap();
        let raw_dup = p.inst_call(host, malloc, vec![size]).unwrap();
        let _dup1 = p.inst_bitcast(host, raw_dup, ps).unwrap();
        let _dup2 = p.inst_bitcast(host, raw_dup, ps).unwrap();
        p.finalize();

        let g = TypeFlowCollector::new(&p, true, true).run();
        let per_fn = g.aliases.get(&host).expect("alias map for host");
        assert_eq!(per_fn.get(&raw_ok), Some(&cast_ok));
        assert!(!per_fn.contains_key(&raw_dup));
    }
}
