//! # tyflow-ir
//!
//! An in-memory, SSA-form, multi-module IR for the tyflow analyses. This
//! crate defines modules with per-module data layouts, a hash-consed type
//! table, a program-wide value arena with stable ids, and a builder API for
//! constructing programs; no parsing or code generation lives here.

pub mod error;
pub mod function;
pub mod global;
pub mod layout;
pub mod module;
pub mod program;
pub mod types;
pub mod value;

pub use error::Error;
pub use function::{Function, FunctionId, Intrinsic};
pub use global::{Global, GlobalId};
pub use layout::DataLayout;
pub use module::{Module, ModuleId};
pub use program::Program;
pub use types::{TypeId, TypeKind, TypeTable};
pub use value::{Callee, GepIndex, ValueData, ValueId, ValueKind};
