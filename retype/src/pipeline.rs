// pipeline.rs — Stage orchestration for one conversion run
//
// Runs the minimal prefix of stages for a terminal `StageId` over one graph,
// timing and logging each stage, and folds the counters, diagnostics and
// certificate into a `PassReport`.
//
// Preconditions: the graph passes `Graph::validate`.
// Postconditions: the graph is mutated in place; node identity is preserved
//   except for inserted and removed converts.
// Failure modes: a cyclic level or a dangling reference → `PassError`.
//   A failed certificate obligation is reported, never fatal.
// Side effects: `tracing` events per stage.

use std::collections::HashSet;
use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::diag::{codes, Diagnostic, Location};
use crate::graph::{Graph, GraphError};
use crate::id::NodeId;
use crate::lattice::ConversionMap;
use crate::materialize::{eliminate_converts, materialize_edges};
use crate::pass::{descriptor, required_stages, StageCert, StageId};
use crate::rewrite::{rewrite_graph, RewriteContext, ValueKey};
use crate::verify::{verify, PrecisionCert};
use crate::walk::GraphPath;

// ── Error type ─────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum PassError {
    #[error("cycle at {path}: {}", format_nodes(.nodes))]
    Cycle { path: GraphPath, nodes: Vec<NodeId> },
    #[error("invalid graph at {path}: {source}")]
    Graph {
        path: GraphPath,
        #[source]
        source: GraphError,
    },
}

impl PassError {
    /// Attach the graph level a structural error was found at.
    pub fn at(path: &GraphPath, error: GraphError) -> Self {
        match error {
            GraphError::Cycle { nodes } => PassError::Cycle {
                path: path.clone(),
                nodes,
            },
            source => PassError::Graph {
                path: path.clone(),
                source,
            },
        }
    }
}

fn format_nodes(nodes: &[NodeId]) -> String {
    let names: Vec<String> = nodes.iter().map(|n| n.to_string()).collect();
    names.join(" -> ")
}

// ── Report ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct StageTiming {
    pub stage: StageId,
    pub elapsed: Duration,
}

/// Outcome of one conversion run.
#[derive(Debug, Clone, Default)]
pub struct PassReport {
    /// True if any value, attribute, payload or edge changed.
    pub changed: bool,
    pub retyped_values: usize,
    pub promoted_sentinels: usize,
    pub bodies_visited: usize,
    pub inserted_converts: usize,
    pub removed_converts: usize,
    pub stages: Vec<StageTiming>,
    pub diagnostics: Vec<Diagnostic>,
    /// Values that kept a source type because their role rejected every
    /// candidate. Exempt from P1.
    pub rejected: HashSet<ValueKey>,
    /// Present when the run reached `StageId::Verify`.
    pub cert: Option<PrecisionCert>,
}

impl fmt::Display for PassReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "retyped {} values, inserted {} converts, removed {} converts, visited {} bodies",
            self.retyped_values, self.inserted_converts, self.removed_converts, self.bodies_visited
        )?;
        if let Some(cert) = &self.cert {
            let failed: Vec<&str> = cert
                .obligations()
                .into_iter()
                .filter(|(_, ok)| !ok)
                .map(|(name, _)| name)
                .collect();
            if failed.is_empty() {
                write!(f, "; certificate ok")?;
            } else {
                write!(f, "; certificate failed: {}", failed.join(", "))?;
            }
        }
        Ok(())
    }
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the stages needed to produce `terminal`.
pub fn run_pipeline(
    graph: &mut Graph,
    map: &ConversionMap,
    terminal: StageId,
) -> Result<PassReport, PassError> {
    let root = GraphPath::root();
    let mut report = PassReport::default();
    let mut ctx = RewriteContext::new(map);
    info!(rules = %map, terminal = %terminal, "conversion run started");

    for stage in required_stages(terminal) {
        let t = Instant::now();
        match stage {
            StageId::Rewrite => {
                rewrite_graph(graph, &root, &mut ctx)?;
                report.retyped_values = ctx.retyped_values;
                report.promoted_sentinels = ctx.promoted_sentinels;
                report.bodies_visited = ctx.bodies_visited;
                report.diagnostics.append(&mut ctx.diagnostics);
                report.rejected = ctx.rejected().clone();
            }
            StageId::Materialize => {
                report.inserted_converts = materialize_edges(graph, &root, map)?;
            }
            StageId::EliminateConverts => {
                report.removed_converts = eliminate_converts(graph, &root)?;
            }
            StageId::Verify => {
                let cert = verify(graph, map, &report.rejected);
                for (name, holds) in cert.obligations() {
                    if !holds {
                        warn!(obligation = name, "postcondition does not hold");
                        report.diagnostics.push(
                            Diagnostic::warning(
                                Location::level(&root),
                                format!("obligation {name} does not hold"),
                            )
                            .with_code(codes::W0102),
                        );
                    }
                }
                report.cert = Some(cert);
            }
        }
        let elapsed = t.elapsed();
        let described = descriptor(stage);
        debug!(
            stage = described.name,
            invariants = described.invariants,
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "stage complete"
        );
        report.stages.push(StageTiming { stage, elapsed });
    }

    report.changed = report.retyped_values > 0
        || report.promoted_sentinels > 0
        || report.inserted_converts > 0
        || report.removed_converts > 0;
    info!(%report, "conversion run finished");
    Ok(report)
}

/// Apply `map` to `graph` in place. Returns whether anything changed.
pub fn apply(graph: &mut Graph, map: &ConversionMap) -> Result<bool, PassError> {
    run_pipeline(graph, map, StageId::EliminateConverts).map(|report| report.changed)
}

// ── Fingerprint ────────────────────────────────────────────────────────────

/// SHA-256 of a graph's canonical compact JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GraphFingerprint(pub [u8; 32]);

impl GraphFingerprint {
    /// Hex string (64 characters).
    pub fn hex(&self) -> String {
        let mut s = String::with_capacity(64);
        for b in &self.0 {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
        }
        s
    }
}

impl fmt::Display for GraphFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex())
    }
}

pub fn fingerprint(graph: &Graph) -> Result<GraphFingerprint, GraphError> {
    use sha2::{Digest, Sha256};

    let canonical = graph.canonical_json()?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    Ok(GraphFingerprint(hash))
}

// ── Tests ──────────────────────────────────────────────────────────────────
