//! Backward layer walking over the use-def graph.
//!
//! A *layer* is one step of container descent: from a value to the
//! `(container type, field index)` slot it was read from. The walker
//! interprets GEPs (including byte-offset arithmetic over recovered alias
//! types), loads, bitcasts, phis, selects, and unary operators; anything else
//! ends the walk. Descent is a single-step operation ([`LayerWalker::next_layer`])
//! driven in a loop by the collector and the resolver.

use std::collections::{HashMap, HashSet, VecDeque};

use tyflow_ir::{FunctionId, DataLayout, Program, TypeId, ValueId, ValueKind};

/// One layer: a container type and the field index accessed in it.
pub type TypeIndexPair = (TypeId, i64);

/// Per-function alias map: byte-pointer values to the composite-pointer cast
/// that reveals their type.
pub type AliasMap = HashMap<FunctionId, HashMap<ValueId, ValueId>>;

/// Walks values backward toward their containing aggregates.
pub struct LayerWalker<'a> {
    program: &'a Program,
    layout: &'a DataLayout,
    aliases: &'a AliasMap,
    field_sensitive: bool,
    sound: bool,
}

impl<'a> LayerWalker<'a> {
    /// Creates a walker over `program` using `layout` for offset queries.
    pub fn new(
        program: &'a Program,
        layout: &'a DataLayout,
        aliases: &'a AliasMap,
        field_sensitive: bool,
        sound: bool,
    ) -> Self {
        Self {
            program,
            layout,
            aliases,
            field_sensitive,
            sound,
        }
    }

    fn recovered(&self, v: ValueId) -> Option<ValueId> {
        let f = self.program.value(v).parent?;
        self.aliases.get(&f)?.get(&v).copied()
    }

    /// Single-step descent from `v` toward its containing aggregate.
    ///
    /// On success appends the discovered layers to `layers` (outermost last),
    /// sets `next` to the value to continue from, and returns `true`. On
    /// failure returns `false`; `next` then holds the value the walk stopped
    /// at, or `None` when the stop is opaque.
    pub fn next_layer(
        &self,
        v: ValueId,
        layers: &mut Vec<TypeIndexPair>,
        next: &mut Option<ValueId>,
        visited: &mut HashSet<ValueId>,
    ) -> bool {
        if matches!(self.program.value(v).kind, ValueKind::Argument { .. }) {
            *next = Some(v);
            return false;
        }
        if !visited.insert(v) {
            *next = Some(v);
            return false;
        }

        match &self.program.value(v).kind {
            ValueKind::Gep { base, .. } => {
                *next = Some(*base);
                let ok = self.gep_layers(v, layers);
                if !ok {
                    *next = None;
                }
                ok
            }
            ValueKind::Load { address } => {
                *next = Some(*address);
                self.next_layer(*address, layers, next, visited)
            }
            ValueKind::BitCast { operand } => {
                *next = Some(*operand);
                self.next_layer(*operand, layers, next, visited)
            }
            ValueKind::Phi { incoming } => {
                // Try each incoming value on a scratch copy of the state and
                // keep the first that makes progress.
                let mut ok = false;
                let mut n_layers = layers.clone();
                let mut n_visited = visited.clone();
                for &iv in incoming {
                    *next = Some(iv);
                    n_layers = layers.clone();
                    n_visited = visited.clone();
                    ok = self.next_layer(iv, &mut n_layers, next, &mut n_visited);
                    if n_layers.len() > layers.len() {
                        break;
                    }
                }
                *layers = n_layers;
                *visited = n_visited;
                ok
            }
            ValueKind::Select { on_true, .. } => {
                *next = Some(*on_true);
                self.next_layer(*on_true, layers, next, visited)
            }
            ValueKind::Unary { operand } => {
                *next = Some(*operand);
                self.next_layer(*operand, layers, next, visited)
            }
            _ => {
                *next = None;
                false
            }
        }
    }

    /// Extracts the layer list of a GEP. Returns `false` when the GEP cannot
    /// be interpreted (dynamic struct index, downcast in sound mode, no
    /// descent at all).
    fn gep_layers(&self, gep: ValueId, layers: &mut Vec<TypeIndexPair>) -> bool {
        let types = self.program.types();
        let ValueKind::Gep {
            base,
            source,
            indices,
        } = &self.program.value(gep).kind
        else {
            return false;
        };

        let mut ety = *source;
        let mut idx_vec: Vec<i64> = Vec::new();

        if let Some(first) = indices.first().and_then(|i| i.as_const()) {
            if first != 0 {
                if let Some(cast) = self.recovered(*base) {
                    // The base is an opaque byte pointer with a known
                    // composite alias; reinterpret the leading index as a
                    // byte offset into the aliased type.
                    if let Some(pointee) = types.pointee(self.program.value(cast).ty) {
                        if first > 0 {
                            ety = pointee;
                            idx_vec =
                                self.layout
                                    .indices_for_offset(types, pointee, first as u64);
                        }
                    }
                } else if types.is_struct(ety) && self.sound {
                    // A non-zero leading index over a struct whose result is
                    // re-cast is a downcast the walk cannot trust.
                    let has_bitcast_user = self
                        .program
                        .users(gep)
                        .iter()
                        .any(|&u| matches!(self.program.value(u).kind, ValueKind::BitCast { .. }));
                    if has_bitcast_user {
                        return false;
                    }
                }
            }
        }

        if idx_vec.is_empty() {
            idx_vec = indices.iter().map(|i| i.as_const().unwrap_or(-1)).collect();
        }

        let mut pending: VecDeque<TypeIndexPair> = VecDeque::new();
        for &idx in idx_vec.iter().skip(1) {
            pending.push_front((ety, if self.field_sensitive { idx } else { 0 }));
            let sub = if types.is_struct(ety) {
                types.element_type(ety, idx)
            } else if types.is_composite(ety) {
                types.element_type(ety, 0)
            } else {
                None
            };
            match sub {
                Some(s) => ety = s,
                None => return false,
            }
        }

        // Compilers drop the access path for field 0; a base-struct pointer
        // bitcast to its first field's type counts as a field-0 access.
        if let Some(&ty0) = types.struct_fields(ety).and_then(|f| f.first()) {
            let casts_to_first = self.program.users(gep).iter().any(|&u| {
                matches!(self.program.value(u).kind, ValueKind::BitCast { .. })
                    && types.pointee(self.program.value(u).ty) == Some(ty0)
            });
            if casts_to_first {
                pending.push_front((ety, 0));
            }
        }

        if pending.is_empty() {
            return false;
        }
        layers.extend(pending);
        true
    }

    /// The base composite type at the current layer, without descending.
    pub fn base_type(&self, v: ValueId, visited: &mut HashSet<ValueId>) -> Option<TypeId> {
        if !visited.insert(v) {
            return None;
        }
        let types = self.program.types();
        let data = self.program.value(v);
        if types.is_composite(data.ty) {
            return Some(data.ty);
        }
        if let Some(pointee) = types.pointee(data.ty) {
            if types.is_composite(pointee) {
                return Some(pointee);
            }
            if let Some(cast) = self.recovered(v) {
                return types.pointee(self.program.value(cast).ty);
            }
        }
        match &data.kind {
            ValueKind::BitCast { operand } => self.base_type(*operand, visited),
            ValueKind::Select { on_true, .. } => self.base_type(*on_true, visited),
            ValueKind::Phi { incoming } => incoming
                .clone()
                .into_iter()
                .find_map(|iv| self.base_type(iv, visited)),
            ValueKind::Load { address } => self.base_type(*address, visited),
            _ => None,
        }
    }

    /// The chain of containing `(type, index)` layers for `v`, outermost
    /// last, plus a completeness flag.
    ///
    /// The chain is incomplete when the walk dead-ends opaquely, stops at a
    /// pointer-typed argument, or stops at a value that is itself stored to
    /// memory; in those cases the tail type no longer bounds where the value
    /// may flow.
    pub fn base_type_chain(&self, v: ValueId) -> (Vec<TypeIndexPair>, bool) {
        let mut chain = Vec::new();
        let mut visited = HashSet::new();
        if let Some(base) = self.base_type(v, &mut visited) {
            chain.push((base, 0));
        }

        let mut layers = Vec::new();
        let mut walk_visited = HashSet::new();
        let mut next = None;
        let mut cv = v;
        while self.next_layer(cv, &mut layers, &mut next, &mut walk_visited) {
            match next {
                Some(n) => cv = n,
                None => break,
            }
        }
        chain.extend(layers);

        let complete = match next {
            None => false,
            Some(stop) => {
                let data = self.program.value(stop);
                if matches!(data.kind, ValueKind::Argument { .. })
                    && self.program.types().is_pointer(data.ty)
                {
                    false
                } else {
                    // A value written back to memory may keep flowing.
                    !self.program.users(stop).iter().any(|&u| {
                        matches!(self.program.value(u).kind,
                            ValueKind::Store { address, .. } if address == stop)
                    })
                }
            }
        };

        (chain, complete)
    }
}
