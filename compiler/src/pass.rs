// pass.rs — Pass descriptor module: metadata, dependency resolution, artifact IDs
//
// Declares the compiler's semantic passes (parsing and resolution happen
// before the runner), their dependency edges, and the artifacts they
// produce. Used by the pipeline runner to compute minimal pass subsets for
// each --emit target.

use std::collections::HashSet;
use std::fmt;

// ── Stage certificates ─────────────────────────────────────────────────────

/// Machine-checkable evidence produced by a verifier.
pub trait StageCert {
    /// True if every obligation holds.
    fn all_pass(&self) -> bool;
    /// Each obligation by name, with its outcome.
    fn obligations(&self) -> Vec<(&'static str, bool)>;

    /// Names of the obligations that failed.
    fn failed(&self) -> Vec<&'static str> {
        self.obligations()
            .into_iter()
            .filter(|(_, ok)| !ok)
            .map(|(name, _)| name)
            .collect()
    }
}

// ── Pass and Artifact identifiers ──────────────────────────────────────────

/// Identifies each compiler pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    Align,
    Layout,
    CopyInsert,
    Allocate,
    Lower,
}

impl fmt::Display for PassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(descriptor(*self).name)
    }
}

/// Machine-readable artifact identifiers. Each maps to a concrete type
/// in the compilation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    Align,      // AlignmentAnalysis
    Layouts,    // LayoutAnalysis
    CopyStats,  // CopyStats (module rewritten in place)
    Allocation, // SharedAllocation
    LowModule,  // LowModule
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a compiler pass.
pub struct PassDescriptor {
    /// Human-readable name for diagnostics/verbose output.
    pub name: &'static str,
    /// Pass dependencies (other passes whose outputs this pass consumes).
    pub inputs: &'static [PassId],
    /// Artifacts this pass produces.
    pub outputs: &'static [ArtifactId],
    /// What invalidates this pass's output.
    pub invalidation_key: &'static str,
    /// Pre/post conditions (documentation only).
    pub invariants: &'static str,
}

/// Return the static descriptor for a given pass.
pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::Align => PassDescriptor {
            name: "align",
            inputs: &[],
            outputs: &[ArtifactId::Align],
            invalidation_key: "module",
            invariants: "one fact per value, phis at fixed point",
        },
        PassId::Layout => PassDescriptor {
            name: "layout",
            inputs: &[PassId::Align],
            outputs: &[ArtifactId::Layouts],
            invalidation_key: "module + align + layout options",
            invariants: "every value in exactly one group",
        },
        PassId::CopyInsert => PassDescriptor {
            name: "copy_insert",
            inputs: &[PassId::Layout],
            outputs: &[ArtifactId::CopyStats, ArtifactId::Align, ArtifactId::Layouts],
            invalidation_key: "module + layouts + arch",
            invariants: "V1-V5 before and after, P1-P3 after re-analysis",
        },
        PassId::Allocate => PassDescriptor {
            name: "allocate",
            inputs: &[PassId::CopyInsert],
            outputs: &[ArtifactId::Allocation],
            invalidation_key: "module + layouts + target",
            invariants: "buffers disjoint, footprint within target capacity",
        },
        PassId::Lower => PassDescriptor {
            name: "lower",
            inputs: &[PassId::Allocate],
            outputs: &[ArtifactId::LowModule],
            invalidation_key: "module + layouts + allocation + lowering",
            invariants: "low module owned by caller",
        },
    }
}

// ── Dependency resolution ──────────────────────────────────────────────────

/// All pass IDs in declaration order (used for iteration).
pub const ALL_PASSES: [PassId; 5] = [
    PassId::Align,
    PassId::Layout,
    PassId::CopyInsert,
    PassId::Allocate,
    PassId::Lower,
];

/// Compute the minimal ordered set of passes needed to produce `terminal`.
/// Returns passes in topological (execution) order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Tests ──────────────────────────────────────────────────────────────────
