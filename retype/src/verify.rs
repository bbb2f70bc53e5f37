// verify.rs — Postcondition certificate and structural comparison
//
// `verify` checks the output of a conversion run against P1-P5:
//   P1 no value (at any level) still carries a source type of the map,
//      except values the rewrite reported as unresolvable (W0101),
//   P2 every edge satisfies its consumer's input role,
//   P3 no convert is an identity and no convert reads another convert,
//   P4 every level is acyclic,
//   P5 TensorIterator wiring types agree across the body boundary.
//
// `compare_graphs` compares two graphs structurally (ops, wiring, types,
// shapes), ignoring node names and ids.
//
// Preconditions: none; a malformed graph simply fails obligations.
// Postconditions: none.
// Failure modes: none.
// Side effects: none.

use std::collections::{HashMap, HashSet};

use crate::graph::{Graph, InputRole, Node, OutputRef};
use crate::id::NodeId;
use crate::lattice::ConversionMap;
use crate::materialize::consumer_constraint;
use crate::op::Op;
use crate::pass::StageCert;
use crate::rewrite::ValueKey;
use crate::types::ElementType;
use crate::walk::{for_each_graph, topological_order, GraphPath};

// ── Certificate ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecisionCert {
    /// P1: no residual source types.
    pub p1_no_residual_types: bool,
    /// P2: every edge satisfies its consumer role.
    pub p2_edges_satisfy_roles: bool,
    /// P3: no redundant converts.
    pub p3_no_redundant_converts: bool,
    /// P4: every graph level is acyclic.
    pub p4_acyclic: bool,
    /// P5: body wiring types match.
    pub p5_body_wiring_types: bool,
}

impl StageCert for PrecisionCert {
    fn all_pass(&self) -> bool {
        self.p1_no_residual_types
            && self.p2_edges_satisfy_roles
            && self.p3_no_redundant_converts
            && self.p4_acyclic
            && self.p5_body_wiring_types
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("P1_no_residual_types", self.p1_no_residual_types),
            ("P2_edges_satisfy_roles", self.p2_edges_satisfy_roles),
            ("P3_no_redundant_converts", self.p3_no_redundant_converts),
            ("P4_acyclic", self.p4_acyclic),
            ("P5_body_wiring_types", self.p5_body_wiring_types),
        ]
    }
}

pub fn verify(graph: &Graph, map: &ConversionMap, exempt: &HashSet<ValueKey>) -> PrecisionCert {
    let mut cert = PrecisionCert {
        p1_no_residual_types: residual_types(graph, map, exempt).is_empty(),
        p2_edges_satisfy_roles: true,
        p3_no_redundant_converts: true,
        p4_acyclic: true,
        p5_body_wiring_types: true,
    };
    for_each_graph(graph, &GraphPath::root(), &mut |_, level| {
        cert.p4_acyclic &= topological_order(level).is_ok();
        for node in level.nodes() {
            cert.p2_edges_satisfy_roles &= edges_satisfy_roles(level, node);
            cert.p3_no_redundant_converts &= !is_redundant_convert(level, node);
            cert.p5_body_wiring_types &= body_wiring_matches(level, node);
        }
    });
    cert
}

/// Values still typed with a source of `map`, outside `exempt`.
/// Results mirroring an exempt value are exempt too.
pub fn residual_types(
    graph: &Graph,
    map: &ConversionMap,
    exempt: &HashSet<ValueKey>,
) -> Vec<(GraphPath, OutputRef, ElementType)> {
    let mut residual = Vec::new();
    for_each_graph(graph, &GraphPath::root(), &mut |path, level| {
        for node in level.nodes() {
            for (index, output) in node.outputs.iter().enumerate() {
                if !map.is_source(output.element_type) {
                    continue;
                }
                let value = node.output_ref(index);
                let mirrored = matches!(node.op, Op::Result)
                    && node
                        .inputs
                        .first()
                        .is_some_and(|&input| exempt.contains(&(path.clone(), input)));
                if !mirrored && !exempt.contains(&(path.clone(), value)) {
                    residual.push((path.clone(), value, output.element_type));
                }
            }
        }
    });
    residual
}

/// True if any value at any level carries `element_type`.
pub fn has_type(graph: &Graph, element_type: ElementType) -> bool {
    let mut found = false;
    for_each_graph(graph, &GraphPath::root(), &mut |_, level| {
        found |= level
            .nodes()
            .iter()
            .any(|n| n.outputs.iter().any(|o| o.element_type == element_type));
    });
    found
}

fn edges_satisfy_roles(graph: &Graph, node: &Node) -> bool {
    let Ok(peers) = graph.input_types(node.id) else {
        return false;
    };
    peers
        .iter()
        .enumerate()
        .all(|(i, &t)| consumer_constraint(node, i).accepts(t, &peers))
}

fn is_redundant_convert(graph: &Graph, node: &Node) -> bool {
    let Op::Convert { destination } = node.op else {
        return false;
    };
    let Some(&input) = node.inputs.first() else {
        return false;
    };
    let identity = graph.output_type(input) == Some(destination);
    let chained = graph.node(input.node).is_some_and(|p| p.op.is_convert());
    identity || chained
}

fn body_wiring_matches(graph: &Graph, node: &Node) -> bool {
    let Some(body) = node.op.body() else {
        return true;
    };
    let inputs_match = body.inputs.iter().all(|d| {
        let outer = node.inputs.get(d.input_index).and_then(|&r| graph.output_type(r));
        let parameter = body.graph.parameter_type(d.parameter);
        let merged = match d.role {
            InputRole::Merged { result } => body.graph.result_type(result) == parameter,
            _ => true,
        };
        outer.is_some() && outer == parameter && merged
    });
    let outputs_match = body.outputs.iter().all(|d| {
        let outer = node.outputs.get(d.output_index).map(|o| o.element_type);
        outer.is_some() && outer == body.graph.result_type(d.result)
    });
    inputs_match && outputs_match
}

// ── Structural comparison ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{level}: {detail}")]
pub struct GraphMismatch {
    pub level: GraphPath,
    pub detail: String,
}

/// Compare two graphs up to node names and ids.
pub fn compare_graphs(actual: &Graph, expected: &Graph) -> Result<(), GraphMismatch> {
    compare_level(actual, expected, &GraphPath::root())
}

fn compare_level(actual: &Graph, expected: &Graph, path: &GraphPath) -> Result<(), GraphMismatch> {
    let fail = |detail: String| GraphMismatch {
        level: path.clone(),
        detail,
    };
    let a_order = canonical_order(actual);
    let e_order = canonical_order(expected);
    if a_order.len() != e_order.len() {
        return Err(fail(format!(
            "{} nodes, expected {}",
            a_order.len(),
            e_order.len()
        )));
    }
    let mapping: HashMap<NodeId, NodeId> = a_order.iter().copied().zip(e_order.iter().copied()).collect();
    let mapped = |r: &OutputRef| OutputRef::new(mapping.get(&r.node).copied().unwrap_or(r.node), r.index);

    for (&a_id, &e_id) in a_order.iter().zip(&e_order) {
        let (Some(a), Some(e)) = (actual.node(a_id), expected.node(e_id)) else {
            return Err(fail(format!("{a_id} or {e_id} is missing")));
        };
        match (&a.op, &e.op) {
            (Op::TensorIterator { body: ab }, Op::TensorIterator { body: eb }) => {
                if ab.inputs != eb.inputs || ab.outputs != eb.outputs {
                    return Err(fail(format!("{a_id}: body wiring differs from {e_id}")));
                }
                compare_level(&ab.graph, &eb.graph, &path.child(a_id))?;
            }
            (a_op, e_op) if a_op != e_op => {
                return Err(fail(format!("{a_id}: {a_op} where {e_id} has {e_op}")));
            }
            _ => {}
        }
        if a.outputs != e.outputs {
            let show = |n: &Node| {
                n.outputs
                    .iter()
                    .map(|o| o.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            return Err(fail(format!(
                "{a_id} ({}): outputs [{}], expected [{}]",
                a.op,
                show(a),
                show(e)
            )));
        }
        let a_inputs: Vec<OutputRef> = a.inputs.iter().map(mapped).collect();
        if a_inputs != e.inputs {
            return Err(fail(format!("{a_id} ({}): inputs wired differently from {e_id}", a.op)));
        }
    }

    let a_results: Vec<NodeId> = actual
        .results()
        .iter()
        .map(|id| mapping.get(id).copied().unwrap_or(*id))
        .collect();
    if a_results != expected.results() {
        return Err(fail("result order differs".to_string()));
    }
    Ok(())
}

/// Parameters in order, then a post-order walk from the results in order,
/// then anything unreachable in topological order.
fn canonical_order(graph: &Graph) -> Vec<NodeId> {
    let mut order: Vec<NodeId> = Vec::with_capacity(graph.len());
    let mut seen: HashSet<NodeId> = HashSet::new();
    for &p in graph.parameters() {
        if seen.insert(p) {
            order.push(p);
        }
    }
    for &r in graph.results() {
        post_order(graph, r, &mut seen, &mut order);
    }
    let rest = topological_order(graph).unwrap_or_else(|_| graph.nodes().iter().map(|n| n.id).collect());
    for id in rest {
        if seen.insert(id) {
            order.push(id);
        }
    }
    order
}

fn post_order(graph: &Graph, id: NodeId, seen: &mut HashSet<NodeId>, order: &mut Vec<NodeId>) {
    if !seen.insert(id) {
        return;
    }
    if let Some(node) = graph.node(id) {
        for input in &node.inputs {
            post_order(graph, input.node, seen, order);
        }
    }
    order.push(id);
}

// ── Tests ───────────────────────────────────────────────────────────────────
