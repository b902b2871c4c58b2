//! The program arena and its builder API.
//!
//! A [`Program`] owns every module, function, global, type, and value of a
//! multi-module input. Consumers build a program through the `add_*`,
//! `const_*`, and `inst_*` methods, then call [`Program::finalize`] once;
//! finalization computes use-lists, the address-taken function set, and the
//! cross-module definition map, and freezes the program for analysis.

use std::collections::HashMap;

use crate::error::Error;
use crate::function::{Function, FunctionId, Intrinsic};
use crate::global::{Global, GlobalId};
use crate::layout::DataLayout;
use crate::module::{Module, ModuleId};
use crate::types::{TypeId, TypeKind, TypeTable};
use crate::value::{Callee, GepIndex, ValueData, ValueId, ValueKind};

/// A whole multi-module program.
#[derive(Debug)]
pub struct Program {
    types: TypeTable,
    void_ty: TypeId,
    modules: Vec<Module>,
    functions: Vec<Function>,
    globals: Vec<Global>,
    values: Vec<ValueData>,
    uses: Vec<Vec<ValueId>>,
    definitions: HashMap<String, FunctionId>,
    finalized: bool,
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

impl Program {
    /// Creates an empty program.
    pub fn new() -> Self {
        let mut types = TypeTable::new();
        let void_ty = types.void();
        Self {
            types,
            void_ty,
            modules: Vec::new(),
            functions: Vec::new(),
            globals: Vec::new(),
            values: Vec::new(),
            uses: Vec::new(),
            definitions: HashMap::new(),
            finalized: false,
        }
    }

    /// Read access to the type table.
    pub fn types(&self) -> &TypeTable {
        &self.types
    }

    /// Mutable access to the type table.
    pub fn types_mut(&mut self) -> &mut TypeTable {
        &mut self.types
    }

    fn check_open(&self) -> Result<(), Error> {
        if self.finalized {
            Err(Error::Finalized)
        } else {
            Ok(())
        }
    }

    fn alloc_value(&mut self, ty: TypeId, kind: ValueKind, parent: Option<FunctionId>) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(ValueData { ty, kind, parent });
        id
    }

    // ---- modules, functions, globals ----

    /// Adds a module with its data layout.
    pub fn add_module(&mut self, name: impl Into<String>, layout: DataLayout) -> ModuleId {
        let id = ModuleId(self.modules.len() as u32);
        self.modules.push(Module {
            name: name.into(),
            layout,
            functions: Vec::new(),
            globals: Vec::new(),
        });
        id
    }

    fn add_function_inner(
        &mut self,
        module: ModuleId,
        name: String,
        ty: TypeId,
        is_declaration: bool,
        intrinsic: Option<Intrinsic>,
    ) -> FunctionId {
        let id = FunctionId(self.functions.len() as u32);
        let fn_ptr_ty = self.types.pointer_to(ty);
        let value = self.alloc_value(fn_ptr_ty, ValueKind::Function(id), None);
        let params = match self.types.kind(ty) {
            TypeKind::Function { params, .. } => params.clone(),
            _ => Vec::new(),
        };
        let param_values = params
            .iter()
            .enumerate()
            .map(|(index, &pty)| self.alloc_value(pty, ValueKind::Argument { index }, Some(id)))
            .collect();
        self.functions.push(Function {
            name,
            ty,
            module,
            value,
            params: param_values,
            body: Vec::new(),
            is_declaration,
            intrinsic,
            address_taken: false,
        });
        self.modules[module.index()].functions.push(id);
        id
    }

    /// Defines a function with a body in `module`.
    pub fn define_function(
        &mut self,
        module: ModuleId,
        name: impl Into<String>,
        ty: TypeId,
    ) -> FunctionId {
        self.add_function_inner(module, name.into(), ty, false, None)
    }

    /// Declares a function without a body (defined in another module or
    /// external).
    pub fn declare_function(
        &mut self,
        module: ModuleId,
        name: impl Into<String>,
        ty: TypeId,
    ) -> FunctionId {
        self.add_function_inner(module, name.into(), ty, true, None)
    }

    /// Declares an intrinsic.
    pub fn declare_intrinsic(
        &mut self,
        module: ModuleId,
        name: impl Into<String>,
        ty: TypeId,
        intrinsic: Intrinsic,
    ) -> FunctionId {
        self.add_function_inner(module, name.into(), ty, true, Some(intrinsic))
    }

    /// Adds a global variable holding `value_ty`, optionally initialized.
    pub fn add_global(
        &mut self,
        module: ModuleId,
        name: impl Into<String>,
        value_ty: TypeId,
        initializer: Option<ValueId>,
    ) -> GlobalId {
        let id = GlobalId(self.globals.len() as u32);
        let ptr_ty = self.types.pointer_to(value_ty);
        let value = self.alloc_value(ptr_ty, ValueKind::Global(id), None);
        self.globals.push(Global {
            name: name.into(),
            value_ty,
            module,
            value,
            initializer,
        });
        self.modules[module.index()].globals.push(id);
        id
    }

    // ---- constants ----

    /// A constant integer.
    pub fn const_int(&mut self, ty: TypeId, value: i64) -> ValueId {
        self.alloc_value(ty, ValueKind::ConstantInt { value }, None)
    }

    /// The null pointer of type `ty`.
    pub fn const_null(&mut self, ty: TypeId) -> ValueId {
        self.alloc_value(ty, ValueKind::ConstantNull, None)
    }

    /// Opaque constant data of type `ty` (zero-initializers, strings).
    pub fn const_data(&mut self, ty: TypeId) -> ValueId {
        self.alloc_value(ty, ValueKind::ConstantData, None)
    }

    /// A constant aggregate. Struct constants must supply exactly one element
    /// per field.
    pub fn const_aggregate(
        &mut self,
        ty: TypeId,
        elements: Vec<ValueId>,
    ) -> Result<ValueId, Error> {
        if let Some(expected) = self.types.element_count(ty) {
            if self.types.is_struct(ty) && expected != elements.len() as u64 {
                return Err(Error::AggregateArity {
                    ty,
                    expected,
                    actual: elements.len(),
                });
            }
        }
        Ok(self.alloc_value(ty, ValueKind::ConstantAggregate { elements }, None))
    }

    /// A constant bitcast expression.
    pub fn const_bitcast(&mut self, operand: ValueId, to: TypeId) -> ValueId {
        self.alloc_value(to, ValueKind::BitCast { operand }, None)
    }

    /// A constant pointer-to-integer expression.
    pub fn const_ptr_to_int(&mut self, operand: ValueId, to: TypeId) -> ValueId {
        self.alloc_value(to, ValueKind::PtrToInt { operand }, None)
    }

    // ---- instructions ----

    fn push_inst(
        &mut self,
        func: FunctionId,
        ty: TypeId,
        kind: ValueKind,
    ) -> Result<ValueId, Error> {
        self.check_open()?;
        if self.functions[func.0 as usize].is_declaration {
            return Err(Error::DeclarationBody(
                self.functions[func.0 as usize].name.clone(),
            ));
        }
        let id = self.alloc_value(ty, kind, Some(func));
        self.functions[func.0 as usize].body.push(id);
        Ok(id)
    }

    /// Appends a stack allocation; the result points to `allocated`.
    pub fn inst_alloca(&mut self, func: FunctionId, allocated: TypeId) -> Result<ValueId, Error> {
        let ty = self.types.pointer_to(allocated);
        self.push_inst(func, ty, ValueKind::Alloca { allocated })
    }

    /// Appends a load through `address`.
    pub fn inst_load(&mut self, func: FunctionId, address: ValueId) -> Result<ValueId, Error> {
        let ty = self
            .types
            .pointee(self.value(address).ty)
            .ok_or(Error::NotAPointer(address))?;
        self.push_inst(func, ty, ValueKind::Load { address })
    }

    /// Appends a store of `value` through `address`.
    pub fn inst_store(
        &mut self,
        func: FunctionId,
        address: ValueId,
        value: ValueId,
    ) -> Result<ValueId, Error> {
        if !self.types.is_pointer(self.value(address).ty) {
            return Err(Error::NotAPointer(address));
        }
        let void = self.types.void();
        self.push_inst(func, void, ValueKind::Store { address, value })
    }

    /// Appends an address computation over `source`, rooted at `base`.
    ///
    /// The first index is array-style pointer arithmetic and does not descend;
    /// the remaining indices walk into the source type. A dynamic index is
    /// valid only for arrays and vectors.
    pub fn inst_gep(
        &mut self,
        func: FunctionId,
        base: ValueId,
        source: TypeId,
        indices: Vec<GepIndex>,
    ) -> Result<ValueId, Error> {
        if !self.types.is_pointer(self.value(base).ty) {
            return Err(Error::NotAPointer(base));
        }
        let mut cur = source;
        for idx in indices.iter().skip(1) {
            let i = match idx {
                GepIndex::Const(i) => *i,
                GepIndex::Dynamic if !self.types.is_struct(cur) => 0,
                GepIndex::Dynamic => {
                    return Err(Error::InvalidGepIndex { ty: cur, index: -1 });
                }
            };
            cur = self
                .types
                .element_type(cur, i)
                .ok_or(Error::InvalidGepIndex { ty: cur, index: i })?;
        }
        let ty = self.types.pointer_to(cur);
        self.push_inst(
            func,
            ty,
            ValueKind::Gep {
                base,
                source,
                indices,
            },
        )
    }

    /// Appends a bitcast of `operand` to `to`.
    pub fn inst_bitcast(
        &mut self,
        func: FunctionId,
        operand: ValueId,
        to: TypeId,
    ) -> Result<ValueId, Error> {
        self.push_inst(func, to, ValueKind::BitCast { operand })
    }

    /// Appends a pointer-to-integer cast.
    pub fn inst_ptr_to_int(
        &mut self,
        func: FunctionId,
        operand: ValueId,
        to: TypeId,
    ) -> Result<ValueId, Error> {
        self.push_inst(func, to, ValueKind::PtrToInt { operand })
    }

    /// Appends an integer-to-pointer cast.
    pub fn inst_int_to_ptr(
        &mut self,
        func: FunctionId,
        operand: ValueId,
        to: TypeId,
    ) -> Result<ValueId, Error> {
        self.push_inst(func, to, ValueKind::IntToPtr { operand })
    }

    /// Appends a unary operation; the result keeps the operand's type.
    pub fn inst_unary(&mut self, func: FunctionId, operand: ValueId) -> Result<ValueId, Error> {
        let ty = self.value(operand).ty;
        self.push_inst(func, ty, ValueKind::Unary { operand })
    }

    /// Appends a direct call to `callee`.
    pub fn inst_call(
        &mut self,
        func: FunctionId,
        callee: FunctionId,
        args: Vec<ValueId>,
    ) -> Result<ValueId, Error> {
        let ret = self.return_type(callee);
        self.push_inst(
            func,
            ret,
            ValueKind::Call {
                callee: Callee::Direct(callee),
                args,
            },
        )
    }

    /// Appends an indirect call through `callee`, which must have
    /// pointer-to-function type.
    pub fn inst_call_indirect(
        &mut self,
        func: FunctionId,
        callee: ValueId,
        args: Vec<ValueId>,
    ) -> Result<ValueId, Error> {
        let fn_ty = self
            .types
            .pointee(self.value(callee).ty)
            .filter(|&t| self.types.is_function(t))
            .ok_or(Error::InvalidCallee(callee))?;
        let ret = match self.types.kind(fn_ty) {
            TypeKind::Function { ret, .. } => *ret,
            _ => unreachable!(),
        };
        self.push_inst(
            func,
            ret,
            ValueKind::Call {
                callee: Callee::Indirect(callee),
                args,
            },
        )
    }

    /// Appends an inline-assembly call.
    pub fn inst_call_asm(
        &mut self,
        func: FunctionId,
        ret: TypeId,
        args: Vec<ValueId>,
    ) -> Result<ValueId, Error> {
        self.push_inst(
            func,
            ret,
            ValueKind::Call {
                callee: Callee::InlineAsm,
                args,
            },
        )
    }

    /// Appends a phi of type `ty`.
    pub fn inst_phi(
        &mut self,
        func: FunctionId,
        ty: TypeId,
        incoming: Vec<ValueId>,
    ) -> Result<ValueId, Error> {
        self.push_inst(func, ty, ValueKind::Phi { incoming })
    }

    /// Adds an incoming value to an existing phi. Phis are created before
    /// their back-edge operands exist, so incoming values may be attached
    /// after the fact.
    pub fn phi_add_incoming(&mut self, phi: ValueId, value: ValueId) -> Result<(), Error> {
        self.check_open()?;
        match &mut self.values[phi.0 as usize].kind {
            ValueKind::Phi { incoming } => {
                incoming.push(value);
                Ok(())
            }
            _ => Err(Error::NotAPhi(phi)),
        }
    }

    /// Appends a select; the result takes the true operand's type.
    pub fn inst_select(
        &mut self,
        func: FunctionId,
        condition: ValueId,
        on_true: ValueId,
        on_false: ValueId,
    ) -> Result<ValueId, Error> {
        let ty = self.value(on_true).ty;
        self.push_inst(
            func,
            ty,
            ValueKind::Select {
                condition,
                on_true,
                on_false,
            },
        )
    }

    /// Appends an unmodeled instruction producing a value of type `ty`.
    pub fn inst_opaque(&mut self, func: FunctionId, ty: TypeId) -> Result<ValueId, Error> {
        self.push_inst(func, ty, ValueKind::Opaque)
    }

    // ---- finalization ----

    /// Freezes the program: builds use-lists, marks address-taken functions,
    /// and records the definition for every function name. Idempotent.
    pub fn finalize(&mut self) {
        if self.finalized {
            return;
        }
        self.uses = vec![Vec::new(); self.values.len()];
        for idx in 0..self.values.len() {
            let user = ValueId(idx as u32);
            for op in self.values[idx].kind.operands() {
                self.uses[op.0 as usize].push(user);
            }
        }
        // Globals use their initializers.
        for g in &self.globals {
            if let Some(init) = g.initializer {
                self.uses[init.0 as usize].push(g.value);
            }
        }
        // Direct calls reference callees by id, not by value, so any use of a
        // function's value is an address-taking use.
        for f in &mut self.functions {
            f.address_taken = !self.uses[f.value.0 as usize].is_empty();
        }
        for (idx, f) in self.functions.iter().enumerate() {
            if !f.is_declaration {
                self.definitions
                    .insert(f.name.clone(), FunctionId(idx as u32));
            }
        }
        self.finalized = true;
    }

    /// True once [`Program::finalize`] has run.
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    // ---- queries ----

    /// The data for a value.
    pub fn value(&self, id: ValueId) -> &ValueData {
        &self.values[id.0 as usize]
    }

    /// The data for a function.
    pub fn function(&self, id: FunctionId) -> &Function {
        &self.functions[id.0 as usize]
    }

    /// The data for a global.
    pub fn global(&self, id: GlobalId) -> &Global {
        &self.globals[id.0 as usize]
    }

    /// The data for a module.
    pub fn module(&self, id: ModuleId) -> &Module {
        &self.modules[id.index()]
    }

    /// All modules with their ids.
    pub fn modules(&self) -> impl Iterator<Item = (ModuleId, &Module)> {
        self.modules
            .iter()
            .enumerate()
            .map(|(i, m)| (ModuleId(i as u32), m))
    }

    /// All functions with their ids.
    pub fn functions(&self) -> impl Iterator<Item = (FunctionId, &Function)> {
        self.functions
            .iter()
            .enumerate()
            .map(|(i, f)| (FunctionId(i as u32), f))
    }

    /// All globals with their ids.
    pub fn globals(&self) -> impl Iterator<Item = (GlobalId, &Global)> {
        self.globals
            .iter()
            .enumerate()
            .map(|(i, g)| (GlobalId(i as u32), g))
    }

    /// Users of a value. Empty before finalization.
    pub fn users(&self, id: ValueId) -> &[ValueId] {
        self.uses
            .get(id.0 as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The value representing a function's address.
    pub fn func_value(&self, id: FunctionId) -> ValueId {
        self.functions[id.0 as usize].value
    }

    /// Resolves a function to its definition: itself when defined here, else
    /// the defining module's function of the same name, if any.
    pub fn definition_of(&self, id: FunctionId) -> Option<FunctionId> {
        let f = self.function(id);
        if !f.is_declaration {
            return Some(id);
        }
        self.definitions.get(&f.name).copied()
    }

    /// Looks up a defined function by name.
    pub fn function_by_name(&self, name: &str) -> Option<FunctionId> {
        self.definitions.get(name).copied()
    }

    /// Functions whose address is taken somewhere in the program.
    /// Meaningful after finalization.
    pub fn address_taken_functions(&self) -> impl Iterator<Item = FunctionId> + '_ {
        self.functions()
            .filter(|(_, f)| f.address_taken)
            .map(|(id, _)| id)
    }

    /// The data layout of the module containing `func`.
    pub fn layout_of(&self, func: FunctionId) -> &DataLayout {
        &self.module(self.function(func).module).layout
    }

    /// The return type of a function.
    pub fn return_type(&self, id: FunctionId) -> TypeId {
        match self.types.kind(self.function(id).ty) {
            TypeKind::Function { ret, .. } => *ret,
            _ => self.void_ty,
        }
    }

    /// The declared type of parameter `i`.
    pub fn param_type(&self, id: FunctionId, i: usize) -> Option<TypeId> {
        match self.types.kind(self.function(id).ty) {
            TypeKind::Function { params, .. } => params.get(i).copied(),
            _ => None,
        }
    }

    /// Whether a function is variadic.
    pub fn is_vararg(&self, id: FunctionId) -> bool {
        matches!(
            self.types.kind(self.function(id).ty),
            TypeKind::Function {
                is_vararg: true,
                ..
            }
        )
    }

    /// Strips bitcasts and all-zero-index GEPs off a value.
    pub fn strip_casts(&self, mut v: ValueId) -> ValueId {
        loop {
            match &self.value(v).kind {
                ValueKind::BitCast { operand } => v = *operand,
                ValueKind::Gep { base, indices, .. }
                    if indices.iter().all(|i| i.as_const() == Some(0)) =>
                {
                    v = *base;
                }
                _ => return v,
            }
        }
    }
}
