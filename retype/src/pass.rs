// pass.rs — Stage descriptors, dependency resolution, certificates
//
// Declares the stages of one conversion run, the stages each one consumes,
// and the invariant each one establishes. The pipeline runner uses this to run
// the minimal prefix for a `--stop-after` target.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

// ── Stage identifiers ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageId {
    Rewrite,
    Materialize,
    EliminateConverts,
    Verify,
}

// ── Stage descriptor ───────────────────────────────────────────────────────

/// Static metadata about a stage.
pub struct StageDescriptor {
    /// Name used in logs and on the command line.
    pub name: &'static str,
    /// Stages whose results this stage consumes.
    pub inputs: &'static [StageId],
    /// What holds once the stage completes. Logged with its timing.
    pub invariants: &'static str,
}

pub fn descriptor(id: StageId) -> StageDescriptor {
    match id {
        StageId::Rewrite => StageDescriptor {
            name: "rewrite",
            inputs: &[],
            invariants: "every mapped value retyped unless its role rejects all candidates",
        },
        StageId::Materialize => StageDescriptor {
            name: "materialize",
            inputs: &[StageId::Rewrite],
            invariants: "every edge satisfies its consumer role",
        },
        StageId::EliminateConverts => StageDescriptor {
            name: "eliminate_converts",
            inputs: &[StageId::Materialize],
            invariants: "no identity converts, no convert chains",
        },
        StageId::Verify => StageDescriptor {
            name: "verify",
            inputs: &[StageId::EliminateConverts],
            invariants: "P1-P5 evaluated",
        },
    }
}

pub const ALL_STAGES: [StageId; 4] = [
    StageId::Rewrite,
    StageId::Materialize,
    StageId::EliminateConverts,
    StageId::Verify,
];

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(descriptor(*self).name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown stage '{0}' (expected rewrite, materialize, eliminate_converts or verify)")]
pub struct UnknownStage(pub String);

impl FromStr for StageId {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().replace('-', "_");
        ALL_STAGES
            .into_iter()
            .find(|&id| descriptor(id).name == wanted)
            .ok_or_else(|| UnknownStage(s.to_string()))
    }
}

// ── Dependency resolution ──────────────────────────────────────────────────

/// Minimal ordered set of stages needed to produce `terminal`.
pub fn required_stages(terminal: StageId) -> Vec<StageId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: StageId, visited: &mut HashSet<StageId>, order: &mut Vec<StageId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Certificates ───────────────────────────────────────────────────────────

/// Machine-checkable evidence for a stage's postconditions.
pub trait StageCert {
    fn all_pass(&self) -> bool;
    /// `(obligation name, holds)` pairs in declaration order.
    fn obligations(&self) -> Vec<(&'static str, bool)>;
}

// ── Tests ──────────────────────────────────────────────────────────────────
