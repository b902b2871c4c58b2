//! # tyflow-analysis
//!
//! Multi-layer type analysis for resolving indirect call targets over the
//! tyflow IR.
//!
//! This crate provides:
//! - Structural type and signature hashing
//! - A signature index with fuzzy type matching
//! - Whole-program type-flow collection (confinement, propagation, escape)
//! - Byte-pointer alias recovery
//! - The backward layer walker
//! - The indirect-call resolver and a serializable resolution report

use std::collections::BTreeSet;

pub mod collector;
pub mod report;
pub mod resolver;
pub mod signature;
pub mod type_keys;
pub mod walker;

/// A deterministic set of candidate target functions.
pub type FuncSet = BTreeSet<tyflow_ir::FunctionId>;

pub use collector::{TypeFlowCollector, TypeFlowGraph};
pub use report::{CallSiteReport, ResolutionReport, ResolutionStats};
pub use resolver::{IndirectCallResolver, ResolutionMode};
pub use signature::{
    call_signature, function_signature, fuzzy_type_match, signature_key, signature_matches,
    SignatureIndex,
};
pub use type_keys::{type_index_key, type_key, SignatureKey, TypeIndexKey, TypeKey, ANY_FIELD};
pub use walker::{AliasMap, LayerWalker, TypeIndexPair};
