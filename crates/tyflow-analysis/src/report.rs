//! Resolution reporting.
//!
//! A [`ResolutionReport`] resolves every indirect call site in a program and
//! records the outcome in a serializable form, with aggregate statistics.
//! This is the library's export surface for downstream tooling; the analysis
//! itself keeps no persistent state.

use serde::{Deserialize, Serialize};

use tyflow_ir::Program;

use crate::resolver::IndirectCallResolver;

/// Aggregate statistics over resolved call sites.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolutionStats {
    /// Number of indirect call sites examined.
    pub total_indirect_calls: usize,
    /// Sites with at least one target.
    pub resolved: usize,
    /// Sites with no target.
    pub unresolved: usize,
    /// Sum of target-set sizes across all sites.
    pub total_targets: usize,
}

impl ResolutionStats {
    /// Computes statistics from report entries.
    pub fn from_sites(sites: &[CallSiteReport]) -> Self {
        let mut stats = Self {
            total_indirect_calls: sites.len(),
            ..Self::default()
        };
        for site in sites {
            if site.targets.is_empty() {
                stats.unresolved += 1;
            } else {
                stats.resolved += 1;
                stats.total_targets += site.targets.len();
            }
        }
        stats
    }

    /// Fraction of sites with at least one target, as a percentage.
    pub fn resolution_rate(&self) -> f64 {
        if self.total_indirect_calls == 0 {
            0.0
        } else {
            (self.resolved as f64 / self.total_indirect_calls as f64) * 100.0
        }
    }

    /// Mean target-set size over resolved sites.
    pub fn average_targets(&self) -> f64 {
        if self.resolved == 0 {
            0.0
        } else {
            self.total_targets as f64 / self.resolved as f64
        }
    }
}

/// One resolved indirect call site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSiteReport {
    /// Name of the containing module.
    pub module: String,
    /// Name of the containing function.
    pub function: String,
    /// Position of the call within the function's instruction list.
    pub call_index: usize,
    /// Names of the possible targets, sorted.
    pub targets: Vec<String>,
}

/// A whole-program resolution report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolutionReport {
    /// Per-site outcomes, in program order.
    pub sites: Vec<CallSiteReport>,
    /// Aggregate statistics.
    pub stats: ResolutionStats,
}

impl ResolutionReport {
    /// Resolves every indirect call site in `program` with `resolver`.
    pub fn build(resolver: &IndirectCallResolver, program: &Program) -> Self {
        let mut sites = Vec::new();
        for (fid, f) in program.functions() {
            for (call_index, &inst) in f.body.iter().enumerate() {
                if !program.value(inst).is_indirect_call() {
                    continue;
                }
                let targets = resolver
                    .resolve(program, inst)
                    .into_iter()
                    .map(|t| program.function(t).name.clone())
                    .collect();
                sites.push(CallSiteReport {
                    module: program.module(program.function(fid).module).name.clone(),
                    function: f.name.clone(),
                    call_index,
                    targets,
                });
            }
        }
        let stats = ResolutionStats::from_sites(&sites);
        Self { sites, stats }
    }

    /// Serializes the report as compact JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Serializes the report as pretty-printed JSON.
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
