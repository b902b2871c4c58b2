//! Values: constants, globals, arguments, and instruction results.
//!
//! Every value in the program lives in one arena owned by the
//! [`Program`](crate::Program) and is identified by a stable [`ValueId`].
//! Analyses key their maps by these ids rather than holding references.

use std::fmt;

use crate::function::FunctionId;
use crate::global::GlobalId;
use crate::types::TypeId;

/// A handle to a value in the program arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub(crate) u32);

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A single index of a GEP-style address computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GepIndex {
    /// A compile-time constant index.
    Const(i64),
    /// An index computed at run time.
    Dynamic,
}

impl GepIndex {
    /// The constant value, or `None` for dynamic indices.
    pub fn as_const(self) -> Option<i64> {
        match self {
            GepIndex::Const(v) => Some(v),
            GepIndex::Dynamic => None,
        }
    }
}

/// The callee of a call instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Callee {
    /// A direct call to a named function.
    Direct(FunctionId),
    /// An indirect call through a computed value.
    Indirect(ValueId),
    /// An inline-assembly callee.
    InlineAsm,
}

/// The kind of a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueKind {
    /// A function used as a value (its address).
    Function(FunctionId),
    /// A global variable (the value is the global's address).
    Global(GlobalId),
    /// A formal parameter of a function.
    Argument {
        /// Zero-based parameter position.
        index: usize,
    },
    /// Constant integer.
    ConstantInt {
        /// The integer value.
        value: i64,
    },
    /// The null pointer constant.
    ConstantNull,
    /// Opaque constant data (zero-initializers, strings, floats).
    ConstantData,
    /// A constant struct, array, or vector; the value's type says which.
    ConstantAggregate {
        /// Element values in order.
        elements: Vec<ValueId>,
    },
    /// Stack allocation; the value is a pointer to `allocated`.
    Alloca {
        /// The allocated type.
        allocated: TypeId,
    },
    /// Memory load.
    Load {
        /// Address loaded from.
        address: ValueId,
    },
    /// Memory store; produces no meaningful value (void type).
    Store {
        /// Address stored to.
        address: ValueId,
        /// Value stored.
        value: ValueId,
    },
    /// Address of a field or element inside an aggregate.
    Gep {
        /// Base pointer.
        base: ValueId,
        /// The type the base pointer is indexed as.
        source: TypeId,
        /// Index list; the first index is array-style pointer arithmetic.
        indices: Vec<GepIndex>,
    },
    /// Pointer (or value) reinterpretation without representation change.
    BitCast {
        /// The cast operand.
        operand: ValueId,
    },
    /// Pointer-to-integer conversion.
    PtrToInt {
        /// The cast operand.
        operand: ValueId,
    },
    /// Integer-to-pointer conversion.
    IntToPtr {
        /// The cast operand.
        operand: ValueId,
    },
    /// A call; the value is the call's result.
    Call {
        /// Who is called.
        callee: Callee,
        /// Actual arguments in order.
        args: Vec<ValueId>,
    },
    /// SSA join of several incoming values.
    Phi {
        /// Incoming values, one per predecessor.
        incoming: Vec<ValueId>,
    },
    /// Two-way select between values of the same type.
    Select {
        /// The selection condition.
        condition: ValueId,
        /// Value when the condition holds.
        on_true: ValueId,
        /// Value otherwise.
        on_false: ValueId,
    },
    /// A unary operator (negation and friends).
    Unary {
        /// The operand.
        operand: ValueId,
    },
    /// An unmodeled instruction result.
    Opaque,
}

impl ValueKind {
    /// Operand values, in a fixed order. Used to build use-lists.
    pub fn operands(&self) -> Vec<ValueId> {
        match self {
            ValueKind::Function(_)
            | ValueKind::Global(_)
            | ValueKind::Argument { .. }
            | ValueKind::ConstantInt { .. }
            | ValueKind::ConstantNull
            | ValueKind::ConstantData
            | ValueKind::Alloca { .. }
            | ValueKind::Opaque => Vec::new(),
            ValueKind::ConstantAggregate { elements } => elements.clone(),
            ValueKind::Load { address } => vec![*address],
            ValueKind::Store { address, value } => vec![*value, *address],
            ValueKind::Gep { base, .. } => vec![*base],
            ValueKind::BitCast { operand }
            | ValueKind::PtrToInt { operand }
            | ValueKind::IntToPtr { operand }
            | ValueKind::Unary { operand } => vec![*operand],
            ValueKind::Call { callee, args } => {
                let mut ops = args.clone();
                if let Callee::Indirect(cv) = callee {
                    ops.push(*cv);
                }
                ops
            }
            ValueKind::Phi { incoming } => incoming.clone(),
            ValueKind::Select {
                condition,
                on_true,
                on_false,
            } => vec![*condition, *on_true, *on_false],
        }
    }

    /// True for any constant kind (including constant cast expressions over
    /// constants; callers that need that distinction check operands).
    pub fn is_constant_data(&self) -> bool {
        matches!(
            self,
            ValueKind::ConstantInt { .. } | ValueKind::ConstantNull | ValueKind::ConstantData
        )
    }

    /// True for constant aggregates.
    pub fn is_constant_aggregate(&self) -> bool {
        matches!(self, ValueKind::ConstantAggregate { .. })
    }
}

/// A value: its type, kind, and (for instructions and arguments) the function
/// it belongs to.
#[derive(Debug, Clone)]
pub struct ValueData {
    /// The value's static type.
    pub ty: TypeId,
    /// What the value is.
    pub kind: ValueKind,
    /// Containing function for instructions and arguments.
    pub parent: Option<FunctionId>,
}

impl ValueData {
    /// True when this value is a call instruction with an indirect callee.
    pub fn is_indirect_call(&self) -> bool {
        matches!(
            self.kind,
            ValueKind::Call {
                callee: Callee::Indirect(_),
                ..
            }
        )
    }
}
