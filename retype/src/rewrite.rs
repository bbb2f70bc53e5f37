// rewrite.rs — Per-node element-type rewriting
//
// Walks each graph level in topological order and rewrites the element
// types a node produces according to the conversion map. Operations whose
// typing depends on what an input or output *means* get a dedicated rule;
// everything else, including unknown `Custom` ops, maps each output
// independently.
//
// Preconditions: the graph passes `Graph::validate`.
// Postconditions: every produced value whose type has a rule and whose role
//   accepts a replacement carries the replacement. Original types are
//   recorded in the context. Inputs may now disagree with their consumer's
//   roles; `materialize` patches those edges.
// Failure modes: a cyclic level → `PassError::Cycle`.
// Side effects: logs retyping decisions via `tracing`.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::diag::{codes, Diagnostic, Location};
use crate::graph::{Graph, GraphError, OutputRef};
use crate::id::NodeId;
use crate::lattice::{convert_values, ConversionMap, Resolution, TypeConstraint};
use crate::op::{Op, OpKind};
use crate::pipeline::PassError;
use crate::types::ElementType;
use crate::walk::{topological_order, GraphPath};

/// A value at one graph level.
pub type ValueKey = (GraphPath, OutputRef);

// ── Rule table ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteRule {
    /// Each output resolved against its role. Results mirror their input.
    PerValue,
    /// Output resolved; the payload converted with clamping.
    ConstantValues,
    /// Destination attribute and output rewritten together.
    ConvertTarget,
    /// Index type attribute resolved; attribute outputs follow it, the
    /// remaining outputs (values, scores) follow their role.
    TypeAttribute,
    /// PerValue, then begin/end constants keep "unbounded" sentinels at the
    /// extremes of their new type.
    SliceBounds,
    /// Body rewritten first; outputs take the body's result types.
    NestedBody,
}

pub fn rule_for(kind: OpKind) -> RewriteRule {
    match kind {
        OpKind::Constant => RewriteRule::ConstantValues,
        OpKind::Convert => RewriteRule::ConvertTarget,
        OpKind::ShapeOf
        | OpKind::NonZero
        | OpKind::Bucketize
        | OpKind::TopK
        | OpKind::NonMaxSuppression => RewriteRule::TypeAttribute,
        OpKind::StridedSlice => RewriteRule::SliceBounds,
        OpKind::TensorIterator => RewriteRule::NestedBody,
        OpKind::Parameter
        | OpKind::Result
        | OpKind::Elementwise
        | OpKind::Squeeze
        | OpKind::Unsqueeze
        | OpKind::GruCell
        | OpKind::GatherTree
        | OpKind::Custom => RewriteRule::PerValue,
    }
}

// ── Context ─────────────────────────────────────────────────────────────────

/// State shared by every level of one pass invocation.
pub struct RewriteContext<'m> {
    map: &'m ConversionMap,
    original: HashMap<ValueKey, ElementType>,
    rejected: HashSet<ValueKey>,
    pub retyped_values: usize,
    pub bodies_visited: usize,
    pub promoted_sentinels: usize,
    pub diagnostics: Vec<Diagnostic>,
}

impl<'m> RewriteContext<'m> {
    pub fn new(map: &'m ConversionMap) -> Self {
        Self {
            map,
            original: HashMap::new(),
            rejected: HashSet::new(),
            retyped_values: 0,
            bodies_visited: 0,
            promoted_sentinels: 0,
            diagnostics: Vec::new(),
        }
    }

    /// Type a value carried before this invocation changed it.
    pub fn original_type(&self, path: &GraphPath, value: OutputRef) -> Option<ElementType> {
        self.original.get(&(path.clone(), value)).copied()
    }

    /// Values that matched a rule but whose role accepted no replacement.
    pub fn rejected(&self) -> &HashSet<ValueKey> {
        &self.rejected
    }

    fn record(&mut self, path: &GraphPath, value: OutputRef, old: ElementType) {
        self.original.entry((path.clone(), value)).or_insert(old);
        self.retyped_values += 1;
    }

    fn reject(
        &mut self,
        path: &GraphPath,
        value: OutputRef,
        current: ElementType,
        wanted: ElementType,
        label: &str,
    ) {
        warn!(
            level = %path,
            value = %value,
            %current,
            %wanted,
            "role rejects the mapped type; value keeps its type"
        );
        self.rejected.insert((path.clone(), value));
        self.diagnostics.push(
            Diagnostic::warning(
                Location::node(path, value.node),
                format!(
                    "{label} output {} keeps {current}: its role accepts neither {wanted} nor any type outside the map",
                    value.index
                ),
            )
            .with_code(codes::W0101)
            .with_hint("add a rule whose target the role accepts"),
        );
    }
}

// ── Traversal ───────────────────────────────────────────────────────────────

/// Rewrite one graph level and, through TensorIterator nodes, its bodies.
pub fn rewrite_graph(
    graph: &mut Graph,
    path: &GraphPath,
    ctx: &mut RewriteContext<'_>,
) -> Result<(), PassError> {
    let order = topological_order(graph).map_err(|e| PassError::at(path, e))?;
    debug!(level = %path, nodes = order.len(), "rewriting graph level");
    for id in order {
        rewrite_node(graph, id, path, ctx)?;
    }
    Ok(())
}

fn rewrite_node(
    graph: &mut Graph,
    id: NodeId,
    path: &GraphPath,
    ctx: &mut RewriteContext<'_>,
) -> Result<(), PassError> {
    let kind = graph
        .expect_node(id)
        .map_err(|e| PassError::at(path, e))?
        .op
        .kind();
    let result = match rule_for(kind) {
        RewriteRule::PerValue => per_value(graph, id, path, ctx),
        RewriteRule::ConstantValues => constant_values(graph, id, path, ctx),
        RewriteRule::ConvertTarget => convert_target(graph, id, path, ctx),
        RewriteRule::TypeAttribute => type_attribute(graph, id, path, ctx),
        RewriteRule::SliceBounds => slice_bounds(graph, id, path, ctx),
        RewriteRule::NestedBody => return nested_body(graph, id, path, ctx),
    };
    result.map_err(|e| PassError::at(path, e))
}

// ── Value helpers ───────────────────────────────────────────────────────────

fn retype(
    graph: &mut Graph,
    path: &GraphPath,
    value: OutputRef,
    to: ElementType,
    ctx: &mut RewriteContext<'_>,
) -> Result<(), GraphError> {
    let old = graph.set_output_type(value, to)?;
    if old != to {
        ctx.record(path, value, old);
    }
    Ok(())
}

/// Resolve `value` against its role and apply the outcome. Returns the new
/// type when the value changed.
fn resolve_value(
    graph: &mut Graph,
    path: &GraphPath,
    value: OutputRef,
    constraint: TypeConstraint,
    ctx: &mut RewriteContext<'_>,
) -> Result<Option<ElementType>, GraphError> {
    let current = graph
        .output_type(value)
        .ok_or(GraphError::MissingNode(value.node))?;
    match constraint.resolve(ctx.map, current) {
        Resolution::Unchanged => Ok(None),
        Resolution::Mapped(t) => {
            retype(graph, path, value, t, ctx)?;
            Ok(Some(t))
        }
        Resolution::Fallback(t) => {
            debug!(level = %path, value = %value, %current, to = %t, "role fallback");
            retype(graph, path, value, t, ctx)?;
            Ok(Some(t))
        }
        Resolution::Rejected { wanted } => {
            let label = graph.expect_node(value.node)?.op.to_string();
            ctx.reject(path, value, current, wanted, &label);
            Ok(None)
        }
    }
}

// ── Rules ───────────────────────────────────────────────────────────────────

fn per_value(
    graph: &mut Graph,
    id: NodeId,
    path: &GraphPath,
    ctx: &mut RewriteContext<'_>,
) -> Result<(), GraphError> {
    let node = graph.expect_node(id)?;
    if matches!(node.op, Op::Result) {
        // Results always carry whatever their input now carries.
        if let Some(&input) = node.inputs.first() {
            let t = graph
                .output_type(input)
                .ok_or(GraphError::MissingNode(input.node))?;
            retype(graph, path, OutputRef::from(id), t, ctx)?;
        }
        return Ok(());
    }
    let constraints: Vec<TypeConstraint> = (0..node.outputs.len())
        .map(|i| node.op.output_constraint(i))
        .collect();
    for (i, constraint) in constraints.into_iter().enumerate() {
        resolve_value(graph, path, OutputRef::new(id, i), constraint, ctx)?;
    }
    Ok(())
}

fn constant_values(
    graph: &mut Graph,
    id: NodeId,
    path: &GraphPath,
    ctx: &mut RewriteContext<'_>,
) -> Result<(), GraphError> {
    let value = OutputRef::from(id);
    let current = graph
        .output_type(value)
        .ok_or(GraphError::MissingNode(id))?;
    let Some(to) = resolve_value(graph, path, value, TypeConstraint::Any, ctx)? else {
        return Ok(());
    };
    if let Op::Constant { values } = &mut graph.expect_node_mut(id)?.op {
        *values = convert_values(values, current, to);
    }
    Ok(())
}

fn convert_target(
    graph: &mut Graph,
    id: NodeId,
    path: &GraphPath,
    ctx: &mut RewriteContext<'_>,
) -> Result<(), GraphError> {
    let map = ctx.map;
    let node = graph.expect_node_mut(id)?;
    let Op::Convert { destination } = &mut node.op else {
        return Ok(());
    };
    let Some(to) = map.lookup(*destination) else {
        return Ok(());
    };
    *destination = to;
    retype(graph, path, OutputRef::from(id), to, ctx)
}

fn type_attribute(
    graph: &mut Graph,
    id: NodeId,
    path: &GraphPath,
    ctx: &mut RewriteContext<'_>,
) -> Result<(), GraphError> {
    let node = graph.expect_node(id)?;
    let Some(attribute) = node.op.type_attribute() else {
        return per_value(graph, id, path, ctx);
    };
    let attribute_outputs = node.op.attribute_outputs();
    let data_outputs: Vec<(usize, TypeConstraint)> = (0..node.outputs.len())
        .filter(|i| !attribute_outputs.contains(i))
        .map(|i| (i, node.op.output_constraint(i)))
        .collect();
    let label = node.op.to_string();

    match TypeConstraint::Index.resolve(ctx.map, attribute) {
        Resolution::Unchanged => {}
        Resolution::Mapped(to) | Resolution::Fallback(to) => {
            if let Some(slot) = graph.expect_node_mut(id)?.op.type_attribute_mut() {
                *slot = to;
            }
            for &i in attribute_outputs {
                retype(graph, path, OutputRef::new(id, i), to, ctx)?;
            }
        }
        Resolution::Rejected { wanted } => {
            for &i in attribute_outputs {
                ctx.reject(path, OutputRef::new(id, i), attribute, wanted, &label);
            }
        }
    }

    for (i, constraint) in data_outputs {
        resolve_value(graph, path, OutputRef::new(id, i), constraint, ctx)?;
    }
    Ok(())
}

fn slice_bounds(
    graph: &mut Graph,
    id: NodeId,
    path: &GraphPath,
    ctx: &mut RewriteContext<'_>,
) -> Result<(), GraphError> {
    per_value(graph, id, path, ctx)?;

    // Inputs 1 and 2 are begin and end.
    let bounds: Vec<OutputRef> = graph
        .expect_node(id)?
        .inputs
        .iter()
        .skip(1)
        .take(2)
        .copied()
        .collect();
    for bound in bounds {
        let Some(original) = ctx.original_type(path, bound) else {
            continue;
        };
        let Some(now) = graph.output_type(bound) else {
            continue;
        };
        if !original.is_integer() || !now.is_integer() {
            continue;
        }
        // A constant shared with anything but slice bounds keeps its values.
        let only_bounds = graph.consumers(bound).iter().all(|&(consumer, input)| {
            (input == 1 || input == 2)
                && matches!(
                    graph.node(consumer).map(|n| &n.op),
                    Some(Op::StridedSlice { .. })
                )
        });
        if !only_bounds {
            continue;
        }
        if let Op::Constant { values } = &mut graph.expect_node_mut(bound.node)?.op {
            let promoted = values.promote_sentinels(original, now);
            if promoted > 0 {
                debug!(level = %path, constant = %bound, promoted, from = %original, to = %now, "slice bound sentinels moved");
                ctx.promoted_sentinels += promoted;
            }
        }
    }
    Ok(())
}

fn nested_body(
    graph: &mut Graph,
    id: NodeId,
    path: &GraphPath,
    ctx: &mut RewriteContext<'_>,
) -> Result<(), PassError> {
    let child = path.child(id);
    let node = graph.expect_node_mut(id).map_err(|e| PassError::at(path, e))?;
    let output_count = node.outputs.len();
    let Some(body) = node.op.body_mut() else {
        return Ok(());
    };
    rewrite_graph(&mut body.graph, &child, ctx)?;
    ctx.bodies_visited += 1;

    let wired: Vec<(usize, Option<ElementType>)> = body
        .outputs
        .iter()
        .map(|d| (d.output_index, body.graph.result_type(d.result)))
        .collect();

    let at = |e| PassError::at(path, e);
    for &(index, t) in &wired {
        if let Some(t) = t {
            retype(graph, path, OutputRef::new(id, index), t, ctx).map_err(at)?;
        }
    }
    for index in 0..output_count {
        if wired.iter().all(|&(i, _)| i != index) {
            resolve_value(graph, path, OutputRef::new(id, index), TypeConstraint::Any, ctx)
                .map_err(at)?;
        }
    }
    Ok(())
}

// ── Tests ───────────────────────────────────────────────────────────────────
