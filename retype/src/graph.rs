// graph.rs — Typed dataflow graph model
//
// Nodes own their output values; inputs reference a producer's output by
// `(node, index)`. Nodes are stored sorted by id. Id order is allocation
// order, not data-flow order: converts inserted by the pass get fresh ids
// larger than their consumers. Use `walk::topological_order` for data flow.
//
// A `TensorIterator` node owns a nested `Body`: a graph with its own id
// space, plus descriptions of how the outer inputs feed the body parameters
// and how the body results feed the outer outputs.
//
// Preconditions: none.
// Postconditions: a graph obtained from `from_json` or `GraphBuilder` passes
//   `validate` (references resolve, every level is acyclic, body wiring
//   indices are in range).
// Failure modes: `GraphError` on structurally invalid input.
// Side effects: none.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::{IdAllocator, NodeId};
use crate::op::Op;
use crate::types::ElementType;

// ── Values ──────────────────────────────────────────────────────────────────

/// One output value of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    pub element_type: ElementType,
    /// Opaque dimensions; never changed by the pass.
    #[serde(default)]
    pub shape: Vec<usize>,
}

impl Output {
    pub fn new(element_type: ElementType, shape: impl Into<Vec<usize>>) -> Self {
        Self {
            element_type,
            shape: shape.into(),
        }
    }
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self.shape.iter().map(|d| d.to_string()).collect();
        write!(f, "{}[{}]", self.element_type, dims.join(", "))
    }
}

/// Reference to output `index` of `node`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct OutputRef {
    pub node: NodeId,
    #[serde(default)]
    pub index: usize,
}

impl OutputRef {
    pub fn new(node: NodeId, index: usize) -> Self {
        Self { node, index }
    }
}

impl From<NodeId> for OutputRef {
    fn from(node: NodeId) -> Self {
        Self { node, index: 0 }
    }
}

impl fmt::Display for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.index == 0 {
            write!(f, "{}", self.node)
        } else {
            write!(f, "{}.{}", self.node, self.index)
        }
    }
}

// ── Nodes ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub op: Op,
    #[serde(default)]
    pub inputs: Vec<OutputRef>,
    #[serde(default)]
    pub outputs: Vec<Output>,
}

impl Node {
    pub fn output_ref(&self, index: usize) -> OutputRef {
        OutputRef::new(self.id, index)
    }
}

// ── Bodies ──────────────────────────────────────────────────────────────────

/// Iteration slicing along one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceSpec {
    pub axis: i64,
    #[serde(default)]
    pub start: i64,
    #[serde(default = "default_stride")]
    pub stride: i64,
    #[serde(default = "default_stride")]
    pub part_size: i64,
    #[serde(default = "default_end")]
    pub end: i64,
}

fn default_stride() -> i64 {
    1
}

fn default_end() -> i64 {
    -1
}

impl SliceSpec {
    pub fn along(axis: i64) -> Self {
        Self {
            axis,
            start: 0,
            stride: 1,
            part_size: 1,
            end: -1,
        }
    }
}

/// How an outer input feeds a body parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputRole {
    /// One slice of the input per iteration.
    Sliced(SliceSpec),
    /// Initial value on the first iteration, then body result `result`.
    Merged { result: usize },
    /// Same value on every iteration.
    Invariant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputDescription {
    /// Index into the owning node's inputs.
    pub input_index: usize,
    /// Index into the body's parameter list.
    pub parameter: usize,
    pub role: InputRole,
}

/// How a body result feeds an outer output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputRole {
    /// Value of the result at iteration `iteration` (-1 for the last).
    IterationValue { iteration: i64 },
    /// Per-iteration results concatenated along an axis.
    Concatenated(SliceSpec),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDescription {
    /// Index into the owning node's outputs.
    pub output_index: usize,
    /// Index into the body's result list.
    pub result: usize,
    pub role: OutputRole,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Body {
    pub graph: Graph,
    #[serde(default)]
    pub inputs: Vec<InputDescription>,
    #[serde(default)]
    pub outputs: Vec<OutputDescription>,
}

impl Body {
    /// The description of the outer input `input_index`, if any.
    pub fn description_of_input(&self, input_index: usize) -> Option<&InputDescription> {
        self.inputs.iter().find(|d| d.input_index == input_index)
    }
}

// ── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("node {0} does not exist")]
    MissingNode(NodeId),
    #[error("node id {0} is used more than once")]
    DuplicateNode(NodeId),
    #[error("input {input} of {node} references {producer}, which does not exist")]
    DanglingInput {
        node: NodeId,
        input: usize,
        producer: OutputRef,
    },
    #[error("{node} ({op}): {detail}")]
    Malformed {
        node: NodeId,
        op: String,
        detail: String,
    },
    #[error("body of {owner}: {detail}")]
    BodyWiring { owner: NodeId, detail: String },
    #[error("cycle through {}", format_cycle(.nodes))]
    Cycle { nodes: Vec<NodeId> },
    #[error("invalid graph json: {0}")]
    Json(#[from] serde_json::Error),
}

fn format_cycle(nodes: &[NodeId]) -> String {
    let names: Vec<String> = nodes.iter().map(|n| n.to_string()).collect();
    names.join(" -> ")
}

// ── Graph ───────────────────────────────────────────────────────────────────

/// One level of a dataflow graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "GraphData")]
pub struct Graph {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    nodes: Vec<Node>,
    parameters: Vec<NodeId>,
    results: Vec<NodeId>,
    #[serde(skip)]
    ids: IdAllocator,
}

/// Wire form of `Graph`; normalized and validated on conversion.
#[derive(Deserialize)]
struct GraphData {
    #[serde(default)]
    name: String,
    nodes: Vec<Node>,
    #[serde(default)]
    parameters: Option<Vec<NodeId>>,
    #[serde(default)]
    results: Option<Vec<NodeId>>,
}

impl TryFrom<GraphData> for Graph {
    type Error = GraphError;

    fn try_from(data: GraphData) -> Result<Self, Self::Error> {
        let mut nodes = data.nodes;
        nodes.sort_by_key(|n| n.id);
        let mut ids = IdAllocator::new();
        for node in &nodes {
            ids.reserve_past(node.id);
        }
        let by_op = |want: fn(&Op) -> bool| -> Vec<NodeId> {
            nodes.iter().filter(|n| want(&n.op)).map(|n| n.id).collect()
        };
        let parameters = data
            .parameters
            .unwrap_or_else(|| by_op(|op| matches!(op, Op::Parameter)));
        let results = data
            .results
            .unwrap_or_else(|| by_op(|op| matches!(op, Op::Result)));
        let graph = Graph {
            name: data.name,
            nodes,
            parameters,
            results,
            ids,
        };
        graph.validate()?;
        Ok(graph)
    }
}

impl PartialEq for Graph {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.nodes == other.nodes
            && self.parameters == other.parameters
            && self.results == other.results
    }
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn parameters(&self) -> &[NodeId] {
        &self.parameters
    }

    pub fn results(&self) -> &[NodeId] {
        &self.results
    }

    fn position(&self, id: NodeId) -> Option<usize> {
        self.nodes.binary_search_by_key(&id, |n| n.id).ok()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.position(id).map(|i| &self.nodes[i])
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.position(id).map(move |i| &mut self.nodes[i])
    }

    pub(crate) fn expect_node(&self, id: NodeId) -> Result<&Node, GraphError> {
        self.node(id).ok_or(GraphError::MissingNode(id))
    }

    pub(crate) fn expect_node_mut(&mut self, id: NodeId) -> Result<&mut Node, GraphError> {
        self.node_mut(id).ok_or(GraphError::MissingNode(id))
    }

    pub fn output(&self, value: OutputRef) -> Option<&Output> {
        self.node(value.node)?.outputs.get(value.index)
    }

    pub fn output_type(&self, value: OutputRef) -> Option<ElementType> {
        self.output(value).map(|o| o.element_type)
    }

    /// Retype one value. Returns the previous type.
    pub fn set_output_type(
        &mut self,
        value: OutputRef,
        element_type: ElementType,
    ) -> Result<ElementType, GraphError> {
        let node = self.expect_node_mut(value.node)?;
        let op = node.op.to_string();
        let output = node
            .outputs
            .get_mut(value.index)
            .ok_or_else(|| GraphError::Malformed {
                node: value.node,
                op,
                detail: format!("no output {}", value.index),
            })?;
        Ok(std::mem::replace(&mut output.element_type, element_type))
    }

    /// Current element types of `id`'s inputs, in input order.
    pub fn input_types(&self, id: NodeId) -> Result<Vec<ElementType>, GraphError> {
        let node = self.expect_node(id)?;
        node.inputs
            .iter()
            .enumerate()
            .map(|(input, &producer)| {
                self.output_type(producer).ok_or(GraphError::DanglingInput {
                    node: id,
                    input,
                    producer,
                })
            })
            .collect()
    }

    /// Every `(consumer, input index)` reading `value`, in id order.
    pub fn consumers(&self, value: OutputRef) -> Vec<(NodeId, usize)> {
        let mut uses = Vec::new();
        for node in &self.nodes {
            for (i, input) in node.inputs.iter().enumerate() {
                if *input == value {
                    uses.push((node.id, i));
                }
            }
        }
        uses
    }

    /// Rewire every use of `old` to read `new`. Returns the number of uses.
    pub fn replace_uses(&mut self, old: OutputRef, new: OutputRef) -> usize {
        let mut replaced = 0;
        for node in &mut self.nodes {
            for input in &mut node.inputs {
                if *input == old {
                    *input = new;
                    replaced += 1;
                }
            }
        }
        replaced
    }

    // ── Construction ────────────────────────────────────────────────────────

    /// Append a node. Parameter and Result nodes are registered in the
    /// graph's parameter and result lists.
    pub fn add_node(
        &mut self,
        name: impl Into<String>,
        op: Op,
        inputs: Vec<OutputRef>,
        outputs: Vec<Output>,
    ) -> Result<NodeId, GraphError> {
        let id = self.ids.alloc_node();
        for (input, &producer) in inputs.iter().enumerate() {
            if self.output(producer).is_none() {
                return Err(GraphError::DanglingInput {
                    node: id,
                    input,
                    producer,
                });
            }
        }
        match op {
            Op::Parameter => self.parameters.push(id),
            Op::Result => self.results.push(id),
            _ => {}
        }
        // Fresh ids are always the largest, so pushing keeps the order.
        self.nodes.push(Node {
            id,
            name: name.into(),
            op,
            inputs,
            outputs,
        });
        Ok(id)
    }

    pub fn add_parameter(
        &mut self,
        name: impl Into<String>,
        element_type: ElementType,
        shape: impl Into<Vec<usize>>,
    ) -> OutputRef {
        let id = self.ids.alloc_node();
        self.parameters.push(id);
        self.nodes.push(Node {
            id,
            name: name.into(),
            op: Op::Parameter,
            inputs: Vec::new(),
            outputs: vec![Output::new(element_type, shape)],
        });
        OutputRef::from(id)
    }

    /// Append a Result node mirroring `source`'s type and shape.
    pub fn add_result(
        &mut self,
        name: impl Into<String>,
        source: OutputRef,
    ) -> Result<NodeId, GraphError> {
        let output = self
            .output(source)
            .cloned()
            .ok_or(GraphError::MissingNode(source.node))?;
        self.add_node(name, Op::Result, vec![source], vec![output])
    }

    /// Insert `Convert<destination>` between `producer` and input `input`
    /// of `consumer`. Other uses of `producer` are left alone.
    pub fn insert_convert(
        &mut self,
        producer: OutputRef,
        consumer: NodeId,
        input: usize,
        destination: ElementType,
    ) -> Result<NodeId, GraphError> {
        let shape = self
            .output(producer)
            .map(|o| o.shape.clone())
            .ok_or(GraphError::DanglingInput {
                node: consumer,
                input,
                producer,
            })?;
        let name = match self.node(producer.node) {
            Some(n) if !n.name.is_empty() => format!("{}/convert_{destination}", n.name),
            _ => format!("convert_{destination}"),
        };
        let convert = self.add_node(
            name,
            Op::Convert { destination },
            vec![producer],
            vec![Output::new(destination, shape)],
        )?;
        let node = self.expect_node_mut(consumer)?;
        let op = node.op.to_string();
        let slot = node
            .inputs
            .get_mut(input)
            .ok_or_else(|| GraphError::Malformed {
                node: consumer,
                op,
                detail: format!("no input {input}"),
            })?;
        *slot = OutputRef::from(convert);
        Ok(convert)
    }

    /// Remove a node. The caller is responsible for its uses.
    pub fn remove_node(&mut self, id: NodeId) -> Option<Node> {
        let pos = self.position(id)?;
        self.parameters.retain(|&p| p != id);
        self.results.retain(|&r| r != id);
        Some(self.nodes.remove(pos))
    }

    // ── Queries ─────────────────────────────────────────────────────────────

    pub fn parameter_type(&self, index: usize) -> Option<ElementType> {
        let id = *self.parameters.get(index)?;
        self.output_type(OutputRef::from(id))
    }

    pub fn result_type(&self, index: usize) -> Option<ElementType> {
        let id = *self.results.get(index)?;
        self.output_type(OutputRef::from(id))
    }

    /// Check structural well-formedness at this level and every nested body.
    pub fn validate(&self) -> Result<(), GraphError> {
        for pair in self.nodes.windows(2) {
            if pair[0].id == pair[1].id {
                return Err(GraphError::DuplicateNode(pair[0].id));
            }
        }
        for node in &self.nodes {
            for (input, &producer) in node.inputs.iter().enumerate() {
                if self.output(producer).is_none() {
                    return Err(GraphError::DanglingInput {
                        node: node.id,
                        input,
                        producer,
                    });
                }
            }
            self.validate_arity(node)?;
            if let Some(body) = node.op.body() {
                body.graph.validate()?;
                validate_body_wiring(node, body)?;
            }
        }
        for &id in &self.parameters {
            if !matches!(self.expect_node(id)?.op, Op::Parameter) {
                return Err(malformed(self.expect_node(id)?, "listed as a parameter"));
            }
        }
        for &id in &self.results {
            if !matches!(self.expect_node(id)?.op, Op::Result) {
                return Err(malformed(self.expect_node(id)?, "listed as a result"));
            }
        }
        crate::walk::topological_order(self)?;
        Ok(())
    }

    fn validate_arity(&self, node: &Node) -> Result<(), GraphError> {
        let (inputs, outputs) = match &node.op {
            Op::Parameter | Op::Constant { .. } => (Some(0), Some(1)),
            Op::Result | Op::Convert { .. } => (Some(1), Some(1)),
            Op::Elementwise { function } => (Some(function.arity()), Some(1)),
            Op::TopK { .. } => (Some(2), Some(2)),
            Op::GatherTree => (Some(4), Some(1)),
            Op::NonMaxSuppression { version, .. } => {
                let outputs = if *version == crate::op::NmsVersion::V5 { 3 } else { 1 };
                if node.inputs.len() < 2 || node.inputs.len() > 6 {
                    return Err(malformed(node, "expects between 2 and 6 inputs"));
                }
                (None, Some(outputs))
            }
            _ => (None, None),
        };
        if let Some(n) = inputs {
            if node.inputs.len() != n {
                return Err(malformed(
                    node,
                    &format!("expects {n} inputs, has {}", node.inputs.len()),
                ));
            }
        }
        if let Some(n) = outputs {
            if node.outputs.len() != n {
                return Err(malformed(
                    node,
                    &format!("expects {n} outputs, has {}", node.outputs.len()),
                ));
            }
        }
        if let Op::Constant { values } = &node.op {
            let elements = node.outputs[0]
                .shape
                .iter()
                .try_fold(1usize, |n, &d| n.checked_mul(d))
                .ok_or_else(|| malformed(node, "element count overflows usize"))?;
            if values.len() != elements && values.len() != 1 {
                return Err(malformed(
                    node,
                    &format!("holds {} values for {elements} elements", values.len()),
                ));
            }
        }
        Ok(())
    }

    // ── Serialization ───────────────────────────────────────────────────────

    pub fn from_json(text: &str) -> Result<Self, GraphError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, GraphError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Compact JSON, stable for identical graphs. Input to the fingerprint.
    pub fn canonical_json(&self) -> Result<String, GraphError> {
        Ok(serde_json::to_string(self)?)
    }
}

fn malformed(node: &Node, detail: &str) -> GraphError {
    GraphError::Malformed {
        node: node.id,
        op: node.op.to_string(),
        detail: detail.to_string(),
    }
}

fn validate_body_wiring(owner: &Node, body: &Body) -> Result<(), GraphError> {
    let wiring = |detail: String| GraphError::BodyWiring {
        owner: owner.id,
        detail,
    };
    let parameters = body.graph.parameters().len();
    let results = body.graph.results().len();
    for d in &body.inputs {
        if d.input_index >= owner.inputs.len() {
            return Err(wiring(format!("input description uses missing input {}", d.input_index)));
        }
        if d.parameter >= parameters {
            return Err(wiring(format!("input description uses missing parameter {}", d.parameter)));
        }
        if let InputRole::Merged { result } = d.role {
            if result >= results {
                return Err(wiring(format!("merged input uses missing result {result}")));
            }
        }
    }
    for d in &body.outputs {
        if d.output_index >= owner.outputs.len() {
            return Err(wiring(format!("output description uses missing output {}", d.output_index)));
        }
        if d.result >= results {
            return Err(wiring(format!("output description uses missing result {}", d.result)));
        }
    }
    Ok(())
}

// ── Display ─────────────────────────────────────────────────────────────────

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_level(f, 0)
    }
}

impl Graph {
    fn fmt_level(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        let pad = " ".repeat(indent);
        let name = if self.name.is_empty() { "graph" } else { &self.name };
        writeln!(
            f,
            "{pad}{name} ({} parameters, {} results)",
            self.parameters.len(),
            self.results.len()
        )?;
        let order = crate::walk::topological_order(self)
            .unwrap_or_else(|_| self.nodes.iter().map(|n| n.id).collect());
        for id in order {
            let Some(node) = self.node(id) else { continue };
            write!(f, "{pad}  {}", node.id)?;
            if !node.name.is_empty() {
                write!(f, " {}", node.name)?;
            }
            write!(f, " = {}", node.op)?;
            if !node.inputs.is_empty() {
                let inputs: Vec<String> = node.inputs.iter().map(|i| i.to_string()).collect();
                write!(f, "({})", inputs.join(", "))?;
            }
            match node.outputs.as_slice() {
                [] => writeln!(f)?,
                [single] => writeln!(f, " -> {single}")?,
                many => {
                    let outs: Vec<String> = many.iter().map(|o| o.to_string()).collect();
                    writeln!(f, " -> ({})", outs.join(", "))?
                }
            }
            if let Some(body) = node.op.body() {
                body.graph.fmt_level(f, indent + 4)?;
            }
        }
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::ElementwiseOp;

    fn relu_graph() -> (Graph, OutputRef, NodeId) {
        let mut g = Graph::new("main");
        let data = g.add_parameter("data", ElementType::F16, [2, 3]);
        let relu = g
            .add_node(
                "relu",
                Op::Elementwise {
                    function: ElementwiseOp::Relu,
                },
                vec![data],
                vec![Output::new(ElementType::F16, [2, 3])],
            )
            .unwrap();
        g.add_result("out", relu.into()).unwrap();
        (g, data, relu)
    }

    #[test]
    fn construction_registers_parameters_and_results() {
        let (g, data, relu) = relu_graph();
        assert_eq!(g.parameters(), &[data.node]);
        assert_eq!(g.results().len(), 1);
        assert_eq!(g.result_type(0), Some(ElementType::F16));
        assert_eq!(g.consumers(data), vec![(relu, 0)]);
    }

    #[test]
    fn dangling_input_is_rejected() {
        let mut g = Graph::new("main");
        let err = g
            .add_node(
                "bad",
                Op::Result,
                vec![OutputRef::from(NodeId(9))],
                vec![Output::new(ElementType::F32, [])],
            )
            .unwrap_err();
        assert!(matches!(err, GraphError::DanglingInput { .. }));
    }

    #[test]
    fn insert_convert_rewires_one_use() {
        let (mut g, data, relu) = relu_graph();
        let convert = g.insert_convert(data, relu, 0, ElementType::F32).unwrap();
        assert_eq!(g.node(relu).unwrap().inputs[0], OutputRef::from(convert));
        assert_eq!(g.node(convert).unwrap().inputs[0], data);
        assert_eq!(g.node(convert).unwrap().name, "data/convert_f32");
        assert_eq!(g.output(convert.into()).unwrap().shape, vec![2, 3]);
        g.validate().unwrap();
    }

    #[test]
    fn replace_uses_and_remove() {
        let (mut g, data, relu) = relu_graph();
        let out = g.results()[0];
        assert_eq!(g.replace_uses(relu.into(), data), 1);
        g.remove_node(relu).unwrap();
        assert_eq!(g.node(out).unwrap().inputs[0], data);
        g.validate().unwrap();
    }

    #[test]
    fn json_round_trip_normalizes_order_and_ids() {
        let text = r#"{
            "name": "main",
            "nodes": [
                {"id": 4, "op": "result", "inputs": [{"node": 1}],
                 "outputs": [{"element_type": "i64", "shape": [3]}]},
                {"id": 1, "op": {"shape_of": {"output_type": "i64"}},
                 "inputs": [{"node": 0}],
                 "outputs": [{"element_type": "i64", "shape": [3]}]},
                {"id": 0, "name": "x", "op": "parameter",
                 "outputs": [{"element_type": "f32", "shape": [1, 2, 3]}]}
            ]
        }"#;
        let mut g = Graph::from_json(text).unwrap();
        assert_eq!(g.parameters(), &[NodeId(0)]);
        assert_eq!(g.results(), &[NodeId(4)]);
        let ids: Vec<NodeId> = g.nodes().iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![NodeId(0), NodeId(1), NodeId(4)]);
        let fresh = g.add_parameter("y", ElementType::F32, []);
        assert_eq!(fresh.node, NodeId(5));

        let again = Graph::from_json(&g.to_json().unwrap()).unwrap();
        assert_eq!(again, g);
    }

    #[test]
    fn json_constant_with_overflowing_shape_is_rejected() {
        let text = r#"{
            "nodes": [
                {"id": 0, "op": {"constant": {"values": {"integer": [1]}}},
                 "outputs": [{"element_type": "i64",
                              "shape": [4294967296, 4294967296, 2]}]}
            ]
        }"#;
        let err = Graph::from_json(text).unwrap_err();
        assert!(
            matches!(&err, GraphError::Malformed { detail, .. } if detail.contains("overflows")),
            "{err}"
        );
    }

    #[test]
    fn json_with_cycle_is_rejected() {
        let text = r#"{
            "nodes": [
                {"id": 0, "op": {"elementwise": {"function": "relu"}}, "inputs": [{"node": 1}],
                 "outputs": [{"element_type": "f32"}]},
                {"id": 1, "op": {"elementwise": {"function": "relu"}}, "inputs": [{"node": 0}],
                 "outputs": [{"element_type": "f32"}]}
            ]
        }"#;
        let err = Graph::from_json(text).unwrap_err();
        assert!(err.to_string().contains("cycle"), "{err}");
    }

    #[test]
    fn arity_is_checked() {
        let text = r#"{
            "nodes": [
                {"id": 0, "op": "parameter", "outputs": [{"element_type": "f32"}]},
                {"id": 1, "op": {"convert": {"destination": "f16"}},
                 "inputs": [{"node": 0}, {"node": 0}],
                 "outputs": [{"element_type": "f16"}]}
            ]
        }"#;
        let err = Graph::from_json(text).unwrap_err();
        assert!(err.to_string().contains("expects 1 inputs"), "{err}");
    }

    #[test]
    fn display_lists_nodes_in_data_flow_order() {
        let (g, _, _) = relu_graph();
        assert_eq!(
            g.to_string(),
            "main (1 parameters, 1 results)\n  \
             %0 data = parameter -> f16[2, 3]\n  \
             %1 relu = relu(%0) -> f16[2, 3]\n  \
             %2 out = result(%1) -> f16[2, 3]\n"
        );
    }
}
