// materialize.rs — Edge patching and convert elimination
//
// After rewriting, a producer's type may no longer satisfy a consumer's
// input role (an index input fed by a rejected value, two binary operands
// that diverged, a body parameter whose outer input kept its type, a body
// result whose type no longer matches the parameter it feeds back into).
// This module inserts a `Convert` on exactly those edges, then removes
// converts that no longer do anything.
//
// Preconditions: `rewrite::rewrite_graph` ran on the graph.
// Postconditions: every edge satisfies its consumer's role where some
//   accepted type exists; no convert has input type == destination and no
//   convert reads another convert.
// Failure modes: a cyclic level → `PassError::Cycle`.
// Side effects: logs inserted and removed converts via `tracing`.

use tracing::{debug, trace};

use crate::graph::{Body, Graph, GraphError, InputRole, Node, OutputRef};
use crate::id::NodeId;
use crate::lattice::{ConversionMap, TypeConstraint};
use crate::op::Op;
use crate::pipeline::PassError;
use crate::types::ElementType;
use crate::walk::{for_each_graph_mut, topological_order, GraphPath};

/// Role of input `index` of `node`, including TensorIterator wiring: an
/// outer input must match the body parameter it feeds exactly.
pub fn consumer_constraint(node: &Node, index: usize) -> TypeConstraint {
    if let Some(body) = node.op.body() {
        return body
            .description_of_input(index)
            .and_then(|d| body.graph.parameter_type(d.parameter))
            .map_or(TypeConstraint::Any, TypeConstraint::Exact);
    }
    node.op.input_constraint(index)
}

// ── Edge materialization ────────────────────────────────────────────────────

/// Insert converts on edges whose producer type the consumer rejects.
/// Returns the number of converts inserted, across all levels.
pub fn materialize_edges(
    graph: &mut Graph,
    path: &GraphPath,
    map: &ConversionMap,
) -> Result<usize, PassError> {
    let mut inserted = 0;
    let mut visit = |level_path: &GraphPath, level: &mut Graph| -> Result<(), PassError> {
        let at = |e| PassError::at(level_path, e);
        // Back-edges may retype owner outputs, so they go before the
        // owner's consumers are checked.
        inserted += materialize_back_edges(level, level_path)?;
        for id in topological_order(level).map_err(at)? {
            inserted += materialize_node(level, id, level_path, map).map_err(at)?;
        }
        Ok(())
    };
    for_each_graph_mut(graph, path, &mut visit)?;
    Ok(inserted)
}

/// For every loop at this level, convert each merged body result to the
/// type of the parameter it feeds on the next iteration. Outer outputs
/// mirroring a patched result, and outer Results reading them, follow.
fn materialize_back_edges(graph: &mut Graph, path: &GraphPath) -> Result<usize, PassError> {
    let owners: Vec<NodeId> = graph
        .nodes()
        .iter()
        .filter(|n| n.op.body().is_some())
        .map(|n| n.id)
        .collect();

    let mut inserted = 0;
    let mut retyped = Vec::new();
    for owner in owners {
        let node = graph
            .expect_node_mut(owner)
            .map_err(|e| PassError::at(path, e))?;
        let Some(body) = node.op.body_mut() else {
            continue;
        };
        let body_path = path.child(owner);
        let patched =
            merge_result_types(body, &body_path).map_err(|e| PassError::at(&body_path, e))?;
        for (output_index, element_type) in patched.outputs {
            if let Some(output) = node.outputs.get_mut(output_index) {
                output.element_type = element_type;
                retyped.push((OutputRef::new(owner, output_index), element_type));
            }
        }
        inserted += patched.converts;
    }

    for (value, element_type) in retyped {
        for (consumer, _) in graph.consumers(value) {
            let is_result = graph.node(consumer).is_some_and(|n| n.op == Op::Result);
            if is_result {
                graph
                    .set_output_type(OutputRef::from(consumer), element_type)
                    .map_err(|e| PassError::at(path, e))?;
            }
        }
    }
    Ok(inserted)
}

struct MergedPatch {
    converts: usize,
    /// Owner outputs whose mirrored result changed type.
    outputs: Vec<(usize, ElementType)>,
}

fn merge_result_types(body: &mut Body, path: &GraphPath) -> Result<MergedPatch, GraphError> {
    let merged: Vec<(usize, usize)> = body
        .inputs
        .iter()
        .filter_map(|d| match d.role {
            InputRole::Merged { result } => Some((d.parameter, result)),
            _ => None,
        })
        .collect();

    let mut patch = MergedPatch {
        converts: 0,
        outputs: Vec::new(),
    };
    for (parameter, result) in merged {
        let (Some(wanted), Some(current)) =
            (body.graph.parameter_type(parameter), body.graph.result_type(result))
        else {
            continue;
        };
        if wanted == current {
            continue;
        }
        let Some(&result_id) = body.graph.results().get(result) else {
            continue;
        };
        let Some(&source) = body.graph.expect_node(result_id)?.inputs.first() else {
            continue;
        };
        let convert = body.graph.insert_convert(source, result_id, 0, wanted)?;
        body.graph.set_output_type(OutputRef::from(result_id), wanted)?;
        debug!(level = %path, result = %result_id, from = %current, to = %wanted, convert = %convert, "back-edge convert inserted");
        patch.converts += 1;
        patch.outputs.extend(
            body.outputs
                .iter()
                .filter(|d| d.result == result)
                .map(|d| (d.output_index, wanted)),
        );
    }
    Ok(patch)
}

fn materialize_node(
    graph: &mut Graph,
    id: NodeId,
    path: &GraphPath,
    map: &ConversionMap,
) -> Result<usize, GraphError> {
    let mut peers = graph.input_types(id)?;
    let node = graph.expect_node(id)?;
    let inputs = node.inputs.clone();
    let constraints: Vec<TypeConstraint> = (0..inputs.len())
        .map(|i| consumer_constraint(node, i))
        .collect();

    let mut inserted = 0;
    for (index, (&producer, constraint)) in inputs.iter().zip(constraints).enumerate() {
        let current = peers[index];
        if constraint.accepts(current, &peers) {
            continue;
        }
        let target = match constraint {
            TypeConstraint::SameAs(peer) => peers.get(peer).copied(),
            other => other.nearest_accepted(current, map),
        };
        let Some(target) = target else {
            trace!(level = %path, consumer = %id, input = index, %current, "no acceptable type for edge");
            continue;
        };
        let convert = graph.insert_convert(producer, id, index, target)?;
        debug!(level = %path, consumer = %id, input = index, from = %current, to = %target, convert = %convert, "convert inserted");
        peers[index] = target;
        inserted += 1;
    }
    Ok(inserted)
}

// ── Convert elimination ─────────────────────────────────────────────────────

/// Remove identity converts and collapse convert chains, to a fixed point,
/// at every level. Returns the number of converts removed.
pub fn eliminate_converts(graph: &mut Graph, path: &GraphPath) -> Result<usize, PassError> {
    let mut removed = 0;
    // Bodies first, each level to its own fixed point.
    let mut visit = |level_path: &GraphPath, level: &mut Graph| -> Result<(), PassError> {
        let at = |e| PassError::at(level_path, e);
        loop {
            let mut changed = false;
            for id in topological_order(level).map_err(at)? {
                let outcome = eliminate_one(level, id, level_path).map_err(at)?;
                if let Elimination::Rewired { removed: n } = outcome {
                    changed = true;
                    removed += n;
                }
            }
            if !changed {
                return Ok(());
            }
        }
    };
    for_each_graph_mut(graph, path, &mut visit)?;
    Ok(removed)
}

enum Elimination {
    Kept,
    Rewired { removed: usize },
}

fn eliminate_one(graph: &mut Graph, id: NodeId, path: &GraphPath) -> Result<Elimination, GraphError> {
    let Some(node) = graph.node(id) else {
        return Ok(Elimination::Kept);
    };
    let Op::Convert { destination } = node.op else {
        return Ok(Elimination::Kept);
    };
    let Some(&input) = node.inputs.first() else {
        return Ok(Elimination::Kept);
    };
    let input_type = graph
        .output_type(input)
        .ok_or(GraphError::MissingNode(input.node))?;

    if input_type == destination {
        let uses = graph.replace_uses(OutputRef::from(id), input);
        graph.remove_node(id);
        debug!(level = %path, convert = %id, uses, "identity convert removed");
        return Ok(Elimination::Rewired { removed: 1 });
    }

    let producer = graph.expect_node(input.node)?;
    if let (Op::Convert { .. }, Some(&source)) = (&producer.op, producer.inputs.first()) {
        graph.expect_node_mut(id)?.inputs[0] = source;
        let mut removed = 0;
        if graph.consumers(input).is_empty() {
            graph.remove_node(input.node);
            removed = 1;
        }
        debug!(level = %path, convert = %id, bypassed = %input.node, "convert chain collapsed");
        return Ok(Elimination::Rewired { removed });
    }
    Ok(Elimination::Kept)
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::GraphBuilder;
    use crate::types::ElementType::*;

    fn converts(graph: &Graph) -> usize {
        graph.nodes().iter().filter(|n| n.op.is_convert()).count()
    }

    #[test]
    fn diverged_operands_get_a_convert() {
        let mut b = GraphBuilder::new("main");
        let lhs = b.parameter("lhs", F32, [4]);
        let rhs = b.parameter("rhs", F16, [4]);
        let sum = b
            .node(
                "add",
                Op::Elementwise {
                    function: crate::op::ElementwiseOp::Add,
                },
                vec![lhs, rhs],
                vec![crate::graph::Output::new(F32, [4])],
            )
            .unwrap();
        b.result("out", sum).unwrap();
        let mut g = b.finish().unwrap();
        let inserted =
            materialize_edges(&mut g, &GraphPath::root(), &ConversionMap::default()).unwrap();
        assert_eq!(inserted, 1);
        let rhs_now = g.node(sum.node).unwrap().inputs[1];
        assert_eq!(g.output_type(rhs_now), Some(F32));
        assert_eq!(
            g.node(rhs_now.node).unwrap().op,
            Op::Convert { destination: F32 }
        );
    }

    #[test]
    fn integer_role_fed_by_float_is_patched() {
        let mut b = GraphBuilder::new("main");
        let data = b.parameter("data", F32, [10]);
        let k = b.parameter("k", F32, []);
        let (values, _) = b.top_k(data, k, 0, I32).unwrap();
        b.result("out", values).unwrap();
        let mut g = b.finish().unwrap();
        let map = ConversionMap::from_pairs(&[(I64, I32)]);
        assert_eq!(materialize_edges(&mut g, &GraphPath::root(), &map).unwrap(), 1);
        let k_now = g.node(values.node).unwrap().inputs[1];
        // i64 is a source of the map, so the nearest integer is i32.
        assert_eq!(g.output_type(k_now), Some(I32));
    }

    #[test]
    fn identity_convert_is_removed() {
        let mut b = GraphBuilder::new("main");
        let x = b.parameter("x", F32, [2]);
        let cvt = b.convert(x, F32).unwrap();
        let relu = b.relu(cvt).unwrap();
        b.result("out", relu).unwrap();
        let mut g = b.finish().unwrap();
        assert_eq!(eliminate_converts(&mut g, &GraphPath::root()).unwrap(), 1);
        assert_eq!(converts(&g), 0);
        assert_eq!(g.node(relu.node).unwrap().inputs[0], x);
    }

    #[test]
    fn chain_collapses_to_single_convert() {
        let mut b = GraphBuilder::new("main");
        let x = b.parameter("x", I64, [2]);
        let a = b.convert(x, I32).unwrap();
        let c = b.convert(a, F32).unwrap();
        b.result("out", c).unwrap();
        let mut g = b.finish().unwrap();
        assert_eq!(eliminate_converts(&mut g, &GraphPath::root()).unwrap(), 1);
        assert_eq!(converts(&g), 1);
        assert_eq!(g.node(c.node).unwrap().inputs[0], x);
    }

    #[test]
    fn chain_returning_to_source_type_vanishes() {
        let mut b = GraphBuilder::new("main");
        let x = b.parameter("x", F32, [2]);
        let a = b.convert(x, F16).unwrap();
        let c = b.convert(a, F32).unwrap();
        let relu = b.relu(c).unwrap();
        b.result("out", relu).unwrap();
        let mut g = b.finish().unwrap();
        assert_eq!(eliminate_converts(&mut g, &GraphPath::root()).unwrap(), 2);
        assert_eq!(converts(&g), 0);
        assert_eq!(g.node(relu.node).unwrap().inputs[0], x);
    }

    #[test]
    fn shared_intermediate_convert_survives() {
        let mut b = GraphBuilder::new("main");
        let x = b.parameter("x", I64, [2]);
        let a = b.convert(x, I32).unwrap();
        let c = b.convert(a, F32).unwrap();
        b.result("a", a).unwrap();
        b.result("c", c).unwrap();
        let mut g = b.finish().unwrap();
        assert_eq!(eliminate_converts(&mut g, &GraphPath::root()).unwrap(), 0);
        assert_eq!(converts(&g), 2);
        assert_eq!(g.node(c.node).unwrap().inputs[0], x);
    }

    #[test]
    fn body_parameter_mismatch_is_patched_on_the_outer_edge() {
        let mut g = crate::builder::tests::tensor_iterator_graph();
        let ti = g
            .nodes()
            .iter()
            .find(|n| n.op.body().is_some())
            .map(|n| n.id)
            .unwrap();
        // Retype the body side only.
        let body = g.node_mut(ti).unwrap().op.body_mut().unwrap();
        let xi = body.graph.parameters()[0];
        body.graph.set_output_type(xi.into(), F32).unwrap();

        let inserted =
            materialize_edges(&mut g, &GraphPath::root(), &ConversionMap::default()).unwrap();
        assert!(inserted >= 1);
        let fed = g.node(ti).unwrap().inputs[0];
        assert_eq!(g.output_type(fed), Some(F32));
    }
}
