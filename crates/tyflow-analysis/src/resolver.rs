//! Indirect call target resolution.
//!
//! [`IndirectCallResolver`] combines the signature index and the type-flow
//! graph. Resolution seeds with the signature bucket of the call site, then
//! walks the callee value backward one container layer at a time, at each
//! layer intersecting the running set with every function known to flow into
//! that `(container type, field index)` slot, directly or through the
//! propagation closure. Descent stops at the layer budget, at capped types,
//! at escaped slots, or when the walker runs out of layers.
//!
//! Resolution is a pure query over the frozen collection state; results are
//! memoized in a shared, lock-guarded cache keyed by signature and slot
//! hashes, and an entry is never updated once materialized.
//!
//! # Example
//!
//! ```ignore
//! use tyflow_analysis::IndirectCallResolver;
//!
//! let mut resolver = IndirectCallResolver::new();
//! resolver.collect(&program);
//! for call in indirect_calls {
//!     let targets = resolver.resolve(&program, call);
//!     println!("{call} -> {} possible targets", targets.len());
//! }
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use tracing::{debug, trace};

use tyflow_ir::{Callee, Program, ValueId, ValueKind};

use crate::collector::{TypeFlowCollector, TypeFlowGraph};
use crate::signature::{call_signature, signature_matches, SignatureIndex};
use crate::type_keys::{type_index_key, type_key};
use crate::walker::LayerWalker;
use crate::FuncSet;

/// Which resolver answers indirect-call queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolutionMode {
    /// Indirect calls resolve to nothing.
    NoIndirectCalls,
    /// Signature matching only.
    MatchSignatures,
    /// Full multi-layer type analysis.
    #[default]
    MultiLayer,
}

/// Resolver for indirect calls.
pub struct IndirectCallResolver {
    mode: ResolutionMode,
    field_sensitive: bool,
    sound: bool,
    max_layers: usize,
    signatures: SignatureIndex,
    flow: TypeFlowGraph,
    cache: RwLock<HashMap<u64, FuncSet>>,
    collected: bool,
}

impl Default for IndirectCallResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl IndirectCallResolver {
    /// Creates a resolver with the default configuration: multi-layer mode,
    /// field sensitive, sound, at most 10 layers.
    pub fn new() -> Self {
        Self {
            mode: ResolutionMode::default(),
            field_sensitive: true,
            sound: true,
            max_layers: 10,
            signatures: SignatureIndex::default(),
            flow: TypeFlowGraph::default(),
            cache: RwLock::new(HashMap::new()),
            collected: false,
        }
    }

    /// Selects the active resolution mode.
    pub fn with_mode(mut self, mode: ResolutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Toggles field sensitivity; when off, all field indices collapse to 0.
    pub fn with_field_sensitivity(mut self, field_sensitive: bool) -> Self {
        self.field_sensitive = field_sensitive;
        self
    }

    /// Toggles sound mode. When sound, capped types and escaped slots are
    /// hard stops during resolution; when unsound they are ignored.
    pub fn with_soundness(mut self, sound: bool) -> Self {
        self.sound = sound;
        self
    }

    /// Bounds the number of container layers walked per query.
    pub fn with_max_layers(mut self, max_layers: usize) -> Self {
        self.max_layers = max_layers;
        self
    }

    /// Runs signature indexing and type-flow collection over a finalized
    /// program. Idempotent: repeated calls are no-ops.
    pub fn collect(&mut self, program: &Program) {
        if self.collected {
            return;
        }
        self.signatures = SignatureIndex::build(program);
        self.flow = TypeFlowCollector::new(program, self.field_sensitive, self.sound).run();
        self.collected = true;
        debug!(
            signatures = self.signatures.len(),
            "indirect call resolver ready"
        );
    }

    /// True once [`IndirectCallResolver::collect`] has run.
    pub fn is_collected(&self) -> bool {
        self.collected
    }

    /// The collected type-flow tables.
    pub fn flow(&self) -> &TypeFlowGraph {
        &self.flow
    }

    /// The signature index.
    pub fn signatures(&self) -> &SignatureIndex {
        &self.signatures
    }

    /// Resolves a call according to the configured mode. Direct calls
    /// resolve to their callee; inline-assembly calls and non-calls resolve
    /// to nothing.
    pub fn resolve(&self, program: &Program, call: ValueId) -> FuncSet {
        match self.mode {
            ResolutionMode::NoIndirectCalls => {
                trivial_targets(program, call).unwrap_or_default()
            }
            ResolutionMode::MatchSignatures => self.resolve_by_signature(program, call),
            ResolutionMode::MultiLayer => self.resolve_multi_layer(program, call),
        }
    }

    /// Signature-only resolution: every address-taken function whose
    /// signature fuzzily matches the call site.
    pub fn resolve_by_signature(&self, program: &Program, call: ValueId) -> FuncSet {
        if let Some(trivial) = trivial_targets(program, call) {
            return trivial;
        }
        let Some(sig) = call_signature(program, call) else {
            return FuncSet::new();
        };
        if let Ok(cache) = self.cache.read() {
            if let Some(hit) = cache.get(&sig.0) {
                return hit.clone();
            }
        }

        let mut out = FuncSet::new();
        let mut seen = FuncSet::new();
        for id in program.address_taken_functions() {
            let Some(def) = program.definition_of(id) else {
                continue;
            };
            if !seen.insert(def) {
                continue;
            }
            if program.function(def).is_intrinsic() {
                continue;
            }
            if signature_matches(program, call, def) {
                out.insert(def);
            }
        }

        if let Ok(mut cache) = self.cache.write() {
            cache.insert(sig.0, out.clone());
        }
        out
    }

    /// Multi-layer resolution: the signature seed intersected with the
    /// per-layer target sets discovered by walking the callee value backward
    /// through its containers.
    pub fn resolve_multi_layer(&self, program: &Program, call: ValueId) -> FuncSet {
        if let Some(trivial) = trivial_targets(program, call) {
            return trivial;
        }
        let Some(sig) = call_signature(program, call) else {
            return FuncSet::new();
        };
        let mut fs = self
            .signatures
            .candidates(sig)
            .cloned()
            .unwrap_or_default();
        if fs.is_empty() {
            // An empty first layer cannot be narrowed further.
            return fs;
        }

        let data = program.value(call);
        let ValueKind::Call {
            callee: Callee::Indirect(callee),
            ..
        } = data.kind
        else {
            return fs;
        };
        let Some(func) = data.parent else {
            return fs;
        };
        let layout = program.layout_of(func);
        let types = program.types();
        let walker = LayerWalker::new(
            program,
            layout,
            &self.flow.aliases,
            self.field_sensitive,
            self.sound,
        );

        let mut cv = callee;
        let mut prev_ty = types
            .pointee(program.value(callee).ty)
            .unwrap_or(program.value(callee).ty);
        let mut layer = 1usize;

        'outer: loop {
            if layer >= self.max_layers {
                break;
            }
            if self.sound
                && self
                    .flow
                    .type_caps
                    .contains(&type_key(types, layout, prev_ty))
            {
                break;
            }

            let mut layers = Vec::new();
            let mut next = None;
            let mut visited = HashSet::new();
            walker.next_layer(cv, &mut layers, &mut next, &mut visited);
            if layers.is_empty() {
                break;
            }

            for (ty, idx) in layers {
                if layer >= self.max_layers {
                    break 'outer;
                }
                layer += 1;

                let tk = type_key(types, layout, ty);
                let tik = type_index_key(tk, idx);

                let cached = self
                    .cache
                    .read()
                    .ok()
                    .and_then(|c| c.get(&tik.0).cloned());
                let layer_targets = match cached {
                    Some(hit) => hit,
                    None => {
                        if self.sound && self.flow.is_escaped(tk, idx) {
                            // The slot leaked; narrowing against it would be
                            // unsound, so stop with what we have.
                            break 'outer;
                        }
                        let mut targets = self.flow.targets_for(tk, idx);
                        for (dep_tk, dep_idx) in self.flow.dependent_types(tk, idx) {
                            targets.extend(self.flow.targets_for(dep_tk, dep_idx));
                        }
                        if let Ok(mut cache) = self.cache.write() {
                            cache.insert(tik.0, targets.clone());
                        }
                        targets
                    }
                };

                // Casting means deeper layers are not always subsets, so
                // intersect rather than replace.
                fs = fs.intersection(&layer_targets).copied().collect();
                trace!(layer, remaining = fs.len(), "narrowed by container layer");

                match next {
                    Some(n) => cv = n,
                    None => break 'outer,
                }
                if self.sound && self.flow.type_caps.contains(&tk) {
                    break 'outer;
                }
                prev_ty = ty;
            }
        }

        fs
    }

    /// The virtual-table function set behind `v`, looking through bitcasts
    /// and address computations to the underlying global.
    pub fn vtable_targets(&self, program: &Program, v: ValueId) -> Option<&FuncSet> {
        let mut cv = v;
        loop {
            if let Some(set) = self.flow.vtable_funcs.get(&cv) {
                return Some(set);
            }
            match program.value(cv).kind {
                ValueKind::BitCast { operand } => cv = operand,
                ValueKind::Gep { base, .. } => cv = base,
                _ => return None,
            }
        }
    }
}

/// Targets that need no analysis: direct calls resolve to their callee,
/// inline assembly and non-calls to nothing. `None` means the call is
/// genuinely indirect.
fn trivial_targets(program: &Program, call: ValueId) -> Option<FuncSet> {
    match &program.value(call).kind {
        ValueKind::Call {
            callee: Callee::Direct(f),
            ..
        } => {
            let mut out = FuncSet::new();
            out.insert(*f);
            Some(out)
        }
        ValueKind::Call {
            callee: Callee::InlineAsm,
            ..
        } => Some(FuncSet::new()),
        ValueKind::Call { .. } => None,
        _ => Some(FuncSet::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tyflow_ir::{DataLayout, FunctionId, GepIndex, TypeId};

    /// One module with two address-taken `i32 (i32)` functions and an
    /// indirect call through a function-pointer global.
    fn setup() -> (Program, ValueId, FunctionId, FunctionId) {
        let mut p = Program::new();
        let m = p.add_module("m", DataLayout::lp64());
        let i32t = p.types_mut().int(32);
        let fnty = p.types_mut().function(i32t, vec![i32t], false);
        let fptr = p.types_mut().pointer_to(fnty);
        let f1 = p.define_function(m, "f1", fnty);
        let f2 = p.define_function(m, "f2", fnty);
        let v1 = p.func_value(f1);
        let g = p.add_global(m, "target", fptr, Some(v1));
        // Keep f2's address taken so it appears in the signature bucket.
        let v2 = p.func_value(f2);
        let g2 = p.add_global(m, "other", fptr, Some(v2));
        let _ = g2;

        let void = p.types_mut().void();
        let hostty = p.types_mut().function(void, vec![], false);
        let host = p.define_function(m, "host", hostty);
        let gv = p.global(g).value;
        let loaded = p.inst_load(host, gv).unwrap();
        let arg = p.const_int(i32t, 1);
        let call = p.inst_call_indirect(host, loaded, vec![arg]).unwrap();
        p.finalize();
        (p, call, f1, f2)
    }

    #[test]
    fn mode_dispatch() {
        let (p, call, f1, f2) = setup();

        let mut none = IndirectCallResolver::new().with_mode(ResolutionMode::NoIndirectCalls);
        none.collect(&p);
        assert!(none.resolve(&p, call).is_empty());

        let mut sigs = IndirectCallResolver::new().with_mode(ResolutionMode::MatchSignatures);
        sigs.collect(&p);
        let by_sig = sigs.resolve(&p, call);
        assert!(by_sig.contains(&f1) && by_sig.contains(&f2));

        let mut mlta = IndirectCallResolver::new();
        mlta.collect(&p);
        let full = mlta.resolve(&p, call);
        // The signature seed holds both; no container layer separates a bare
        // function-pointer global, so both remain.
        assert!(full.contains(&f1) && full.contains(&f2));
    }

    #[test]
    fn direct_calls_are_trivial() {
        let mut p = Program::new();
        let m = p.add_module("m", DataLayout::lp64());
        let void = p.types_mut().void();
        let fnty = p.types_mut().function(void, vec![], false);
        let callee = p.define_function(m, "callee", fnty);
        let caller = p.define_function(m, "caller", fnty);
        let call = p.inst_call(caller, callee, vec![]).unwrap();
        p.finalize();

        let mut r = IndirectCallResolver::new();
        r.collect(&p);
        let targets = r.resolve(&p, call);
        assert_eq!(targets.into_iter().collect::<Vec<_>>(), vec![callee]);
    }

    #[test]
    fn inline_asm_resolves_to_nothing() {
        let mut p = Program::new();
        let m = p.add_module("m", DataLayout::lp64());
        let void = p.types_mut().void();
        let fnty = p.types_mut().function(void, vec![], false);
        let host = p.define_function(m, "host", fnty);
        let call = p.inst_call_asm(host, void, vec![]).unwrap();
        p.finalize();

        let mut r = IndirectCallResolver::new();
        r.collect(&p);
        assert!(r.resolve(&p, call).is_empty());
        assert!(r.resolve_by_signature(&p, call).is_empty());
    }

    #[test]
    fn collect_is_idempotent() {
        let (p, call, _f1, _f2) = setup();
        let mut r = IndirectCallResolver::new();
        r.collect(&p);
        let first = r.resolve(&p, call);
        r.collect(&p);
        assert_eq!(first, r.resolve(&p, call));
    }

    #[test]
    fn signature_cache_serves_repeat_queries() {
        let (p, call, _f1, _f2) = setup();
        let mut r = IndirectCallResolver::new().with_mode(ResolutionMode::MatchSignatures);
        r.collect(&p);
        let first = r.resolve(&p, call);
        let second = r.resolve(&p, call);
        assert_eq!(first, second);
    }

    #[test]
    fn vtable_lookup_walks_wrappers() {
        let mut p = Program::new();
        let m = p.add_module("m", DataLayout::lp64());
        let i32t = p.types_mut().int(32);
        let fnty = p.types_mut().function(i32t, vec![i32t], false);
        let f1 = p.define_function(m, "method", fnty);
        let bp = p.types_mut().byte_pointer();
        let arr: TypeId = p.types_mut().array(bp, 1);
        let v1 = p.func_value(f1);
        let c1 = p.const_bitcast(v1, bp);
        let init = p.const_aggregate(arr, vec![c1]).unwrap();
        let gid = p.add_global(m, "vt", arr, Some(init));

        let void = p.types_mut().void();
        let hostty = p.types_mut().function(void, vec![], false);
        let host = p.define_function(m, "host", hostty);
        let gv = p.global(gid).value;
        let gep = p
            .inst_gep(host, gv, arr, vec![GepIndex::Const(0), GepIndex::Const(0)])
            .unwrap();
        let pbp = p.types_mut().pointer_to(bp);
        let cast = p.inst_bitcast(host, gep, pbp).unwrap();
        p.finalize();

        let mut r = IndirectCallResolver::new();
        r.collect(&p);
        let vt = r.vtable_targets(&p, cast).expect("vtable found");
        assert!(vt.contains(&f1));
        assert!(r.vtable_targets(&p, gep).is_some());
        let stray = p.func_value(f1);
        assert!(r.vtable_targets(&p, stray).is_none());
    }
}
