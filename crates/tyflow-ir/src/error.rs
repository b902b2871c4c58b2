//! Error types for tyflow-ir.

use thiserror::Error;

use crate::types::TypeId;

/// IR construction error.
#[derive(Error, Debug)]
pub enum Error {
    /// A constant aggregate's element count does not match its type.
    #[error("aggregate constant of type {ty} expects {expected} elements, got {actual}")]
    AggregateArity {
        /// The aggregate type.
        ty: TypeId,
        /// Element count required by the type.
        expected: u64,
        /// Element count supplied.
        actual: usize,
    },

    /// A GEP index sequence does not fit the source type.
    #[error("cannot index type {ty} with index {index}")]
    InvalidGepIndex {
        /// The type being indexed.
        ty: TypeId,
        /// The offending index.
        index: i64,
    },

    /// An operation expected a pointer-typed value.
    #[error("value {0} is not of pointer type")]
    NotAPointer(crate::value::ValueId),

    /// An indirect call through a value that is not a function pointer.
    #[error("value {0} is not a function pointer and cannot be called")]
    InvalidCallee(crate::value::ValueId),

    /// An incoming edge was added to a value that is not a phi.
    #[error("value {0} is not a phi")]
    NotAPhi(crate::value::ValueId),

    /// An instruction was added to a function declaration.
    #[error("function {0:?} is a declaration and cannot hold instructions")]
    DeclarationBody(String),

    /// The program was mutated after finalization.
    #[error("program is finalized and can no longer be modified")]
    Finalized,
}
