// builder.rs — Convenience construction of graphs
//
// Thin wrapper over `Graph::add_node` with one method per catalog operation.
// Output element types and shapes follow the operation's usual typing
// (elementwise ops mirror their first input, index-producing ops use their
// type attribute). Shapes are opaque to the pass; the builder fills in
// plausible ones so emitted graphs stay readable.
//
// Preconditions: every `OutputRef` argument was returned by this builder.
// Postconditions: `finish` returns a validated graph.
// Failure modes: dangling references, malformed bodies → `GraphError`.
// Side effects: none.

use crate::graph::{Body, Graph, GraphError, Output, OutputRef};
use crate::id::NodeId;
use crate::lattice::ConstantValues;
use crate::op::{
    BoxEncoding, ElementwiseOp, NmsVersion, Op, TopKMode, TopKSort,
};
use crate::types::ElementType;

pub struct GraphBuilder {
    graph: Graph,
}

impl GraphBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            graph: Graph::new(name),
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Validate and return the graph.
    pub fn finish(self) -> Result<Graph, GraphError> {
        self.graph.validate()?;
        Ok(self.graph)
    }

    fn output(&self, value: OutputRef) -> Result<Output, GraphError> {
        self.graph
            .output(value)
            .cloned()
            .ok_or(GraphError::MissingNode(value.node))
    }

    /// Add an arbitrary node; returns its first output.
    pub fn node(
        &mut self,
        name: impl Into<String>,
        op: Op,
        inputs: Vec<OutputRef>,
        outputs: Vec<Output>,
    ) -> Result<OutputRef, GraphError> {
        self.graph
            .add_node(name, op, inputs, outputs)
            .map(OutputRef::from)
    }

    // ── Leaves ──────────────────────────────────────────────────────────────

    pub fn parameter(
        &mut self,
        name: impl Into<String>,
        element_type: ElementType,
        shape: impl Into<Vec<usize>>,
    ) -> OutputRef {
        self.graph.add_parameter(name, element_type, shape)
    }

    pub fn constant(
        &mut self,
        name: impl Into<String>,
        element_type: ElementType,
        shape: impl Into<Vec<usize>>,
        values: ConstantValues,
    ) -> Result<OutputRef, GraphError> {
        self.node(
            name,
            Op::Constant { values },
            Vec::new(),
            vec![Output::new(element_type, shape)],
        )
    }

    /// Integer constant; values are given at full width.
    pub fn int_constant(
        &mut self,
        name: impl Into<String>,
        element_type: ElementType,
        shape: impl Into<Vec<usize>>,
        values: &[i128],
    ) -> Result<OutputRef, GraphError> {
        self.constant(
            name,
            element_type,
            shape,
            ConstantValues::Integer(values.to_vec()),
        )
    }

    pub fn float_constant(
        &mut self,
        name: impl Into<String>,
        element_type: ElementType,
        shape: impl Into<Vec<usize>>,
        values: &[f64],
    ) -> Result<OutputRef, GraphError> {
        self.constant(
            name,
            element_type,
            shape,
            ConstantValues::Float(values.to_vec()),
        )
    }

    pub fn result(&mut self, name: impl Into<String>, value: OutputRef) -> Result<NodeId, GraphError> {
        self.graph.add_result(name, value)
    }

    // ── Operations ──────────────────────────────────────────────────────────

    pub fn convert(&mut self, value: OutputRef, destination: ElementType) -> Result<OutputRef, GraphError> {
        let shape = self.output(value)?.shape;
        self.node(
            "convert",
            Op::Convert { destination },
            vec![value],
            vec![Output::new(destination, shape)],
        )
    }

    pub fn unary(&mut self, function: ElementwiseOp, value: OutputRef) -> Result<OutputRef, GraphError> {
        let out = self.output(value)?;
        self.node(function.name(), Op::Elementwise { function }, vec![value], vec![out])
    }

    pub fn binary(
        &mut self,
        function: ElementwiseOp,
        lhs: OutputRef,
        rhs: OutputRef,
    ) -> Result<OutputRef, GraphError> {
        let out = self.output(lhs)?;
        self.output(rhs)?;
        self.node(function.name(), Op::Elementwise { function }, vec![lhs, rhs], vec![out])
    }

    pub fn relu(&mut self, value: OutputRef) -> Result<OutputRef, GraphError> {
        self.unary(ElementwiseOp::Relu, value)
    }

    pub fn add(&mut self, lhs: OutputRef, rhs: OutputRef) -> Result<OutputRef, GraphError> {
        self.binary(ElementwiseOp::Add, lhs, rhs)
    }

    pub fn shape_of(&mut self, value: OutputRef, output_type: ElementType) -> Result<OutputRef, GraphError> {
        let rank = self.output(value)?.shape.len();
        self.node(
            "shape_of",
            Op::ShapeOf { output_type },
            vec![value],
            vec![Output::new(output_type, [rank])],
        )
    }

    /// NonMaxSuppression over `boxes` `[batch, boxes, 4]` and `scores`
    /// `[batch, classes, boxes]`. `extra` holds the optional trailing inputs
    /// in order. Returns every output.
    pub fn non_max_suppression(
        &mut self,
        version: NmsVersion,
        boxes: OutputRef,
        scores: OutputRef,
        extra: &[OutputRef],
        output_type: ElementType,
    ) -> Result<Vec<OutputRef>, GraphError> {
        let box_count = self.output(boxes)?.shape.get(1).copied().unwrap_or(0);
        let score_type = self.output(scores)?.element_type;
        let mut inputs = vec![boxes, scores];
        inputs.extend_from_slice(extra);
        let mut outputs = vec![Output::new(output_type, [box_count, 3])];
        if version == NmsVersion::V5 {
            outputs.push(Output::new(score_type, [box_count, 3]));
            outputs.push(Output::new(output_type, [1]));
        }
        let count = outputs.len();
        let id = self.graph.add_node(
            "nms",
            Op::NonMaxSuppression {
                version,
                box_encoding: BoxEncoding::Corner,
                sort_result_descending: true,
                output_type,
            },
            inputs,
            outputs,
        )?;
        Ok((0..count).map(|i| OutputRef::new(id, i)).collect())
    }

    /// Returns `(values, indices)`.
    pub fn top_k(
        &mut self,
        data: OutputRef,
        k: OutputRef,
        axis: i64,
        index_element_type: ElementType,
    ) -> Result<(OutputRef, OutputRef), GraphError> {
        let out = self.output(data)?;
        let id = self.graph.add_node(
            "top_k",
            Op::TopK {
                axis,
                mode: TopKMode::Min,
                sort: TopKSort::Value,
                index_element_type,
            },
            vec![data, k],
            vec![out.clone(), Output::new(index_element_type, out.shape)],
        )?;
        Ok((OutputRef::new(id, 0), OutputRef::new(id, 1)))
    }

    pub fn non_zero(&mut self, value: OutputRef, output_type: ElementType) -> Result<OutputRef, GraphError> {
        let shape = self.output(value)?.shape;
        let elements = shape.iter().product();
        self.node(
            "non_zero",
            Op::NonZero { output_type },
            vec![value],
            vec![Output::new(output_type, [shape.len(), elements])],
        )
    }

    pub fn bucketize(
        &mut self,
        data: OutputRef,
        buckets: OutputRef,
        output_type: ElementType,
    ) -> Result<OutputRef, GraphError> {
        let shape = self.output(data)?.shape;
        self.node(
            "bucketize",
            Op::Bucketize {
                output_type,
                with_right_bound: true,
            },
            vec![data, buckets],
            vec![Output::new(output_type, shape)],
        )
    }

    pub fn strided_slice(
        &mut self,
        data: OutputRef,
        begin: OutputRef,
        end: OutputRef,
        strides: OutputRef,
        begin_mask: Vec<i64>,
        end_mask: Vec<i64>,
        shape: impl Into<Vec<usize>>,
    ) -> Result<OutputRef, GraphError> {
        let element_type = self.output(data)?.element_type;
        self.node(
            "strided_slice",
            Op::StridedSlice {
                begin_mask,
                end_mask,
            },
            vec![data, begin, end, strides],
            vec![Output::new(element_type, shape)],
        )
    }

    pub fn squeeze(
        &mut self,
        data: OutputRef,
        axes: OutputRef,
        shape: impl Into<Vec<usize>>,
    ) -> Result<OutputRef, GraphError> {
        let element_type = self.output(data)?.element_type;
        self.node(
            "squeeze",
            Op::Squeeze,
            vec![data, axes],
            vec![Output::new(element_type, shape)],
        )
    }

    pub fn unsqueeze(
        &mut self,
        data: OutputRef,
        axes: OutputRef,
        shape: impl Into<Vec<usize>>,
    ) -> Result<OutputRef, GraphError> {
        let element_type = self.output(data)?.element_type;
        self.node(
            "unsqueeze",
            Op::Unsqueeze,
            vec![data, axes],
            vec![Output::new(element_type, shape)],
        )
    }

    /// GRU cell over `x` `[batch, input]` and `h` `[batch, hidden]`.
    pub fn gru_cell(
        &mut self,
        x: OutputRef,
        h: OutputRef,
        w: OutputRef,
        r: OutputRef,
        b: OutputRef,
        hidden_size: usize,
    ) -> Result<OutputRef, GraphError> {
        let out = self.output(h)?;
        self.node(
            "gru_cell",
            Op::GruCell { hidden_size },
            vec![x, h, w, r, b],
            vec![out],
        )
    }

    pub fn gather_tree(
        &mut self,
        step_ids: OutputRef,
        parent_ids: OutputRef,
        max_seq_len: OutputRef,
        end_token: OutputRef,
    ) -> Result<OutputRef, GraphError> {
        let out = self.output(step_ids)?;
        self.node(
            "gather_tree",
            Op::GatherTree,
            vec![step_ids, parent_ids, max_seq_len, end_token],
            vec![out],
        )
    }

    pub fn custom(
        &mut self,
        name: impl Into<String>,
        inputs: Vec<OutputRef>,
        outputs: Vec<Output>,
    ) -> Result<OutputRef, GraphError> {
        let name = name.into();
        self.node(name.clone(), Op::Custom { name }, inputs, outputs)
    }

    /// Add a TensorIterator owning `body`. Returns every output.
    pub fn tensor_iterator(
        &mut self,
        inputs: Vec<OutputRef>,
        body: Body,
        outputs: Vec<Output>,
    ) -> Result<Vec<OutputRef>, GraphError> {
        let count = outputs.len();
        let id = self.graph.add_node(
            "tensor_iterator",
            Op::TensorIterator {
                body: Box::new(body),
            },
            inputs,
            outputs,
        )?;
        Ok((0..count).map(|i| OutputRef::new(id, i)).collect())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::graph::{InputDescription, InputRole, OutputDescription, OutputRole, SliceSpec};
    use ElementType::*;

    /// Two-iteration GRU loop: f16 activations and weights, an i64 squeeze
    /// axis, one sliced and one merged input.
    pub(crate) fn tensor_iterator_graph() -> Graph {
        let mut body = GraphBuilder::new("body");
        let xi = body.parameter("xi", F16, [1, 1, 16]);
        let yi = body.parameter("yi", F16, [1, 128]);
        let axis = body.int_constant("axis", I64, [], &[0]).unwrap();
        let squeeze = body.squeeze(xi, axis, [1, 16]).unwrap();
        let w = body.float_constant("w", F16, [384, 16], &[0.0]).unwrap();
        let r = body.float_constant("r", F16, [384, 128], &[0.0]).unwrap();
        let b = body.float_constant("b", F16, [384], &[0.0]).unwrap();
        let gru = body.gru_cell(squeeze, yi, w, r, b, 128).unwrap();
        body.result("res_1", gru).unwrap();
        let unsqueeze = body.unsqueeze(gru, axis, [1, 1, 128]).unwrap();
        body.result("res_2", unsqueeze).unwrap();
        let body = Body {
            graph: body.finish().unwrap(),
            inputs: vec![
                InputDescription {
                    input_index: 0,
                    parameter: 0,
                    role: InputRole::Sliced(SliceSpec::along(0)),
                },
                InputDescription {
                    input_index: 1,
                    parameter: 1,
                    role: InputRole::Merged { result: 0 },
                },
            ],
            outputs: vec![
                OutputDescription {
                    output_index: 0,
                    result: 0,
                    role: OutputRole::IterationValue { iteration: -1 },
                },
                OutputDescription {
                    output_index: 1,
                    result: 1,
                    role: OutputRole::Concatenated(SliceSpec::along(0)),
                },
            ],
        };

        let mut g = GraphBuilder::new("main");
        let x = g.parameter("x", F16, [2, 1, 16]);
        let y = g.parameter("y", F16, [1, 128]);
        let outs = g
            .tensor_iterator(
                vec![x, y],
                body,
                vec![Output::new(F16, [1, 128]), Output::new(F16, [2, 1, 128])],
            )
            .unwrap();
        g.result("out", outs[1]).unwrap();
        g.finish().unwrap()
    }

    #[test]
    fn top_k_outputs_follow_data_and_attribute() {
        let mut b = GraphBuilder::new("main");
        let data = b.parameter("data", F32, [15, 20, 3]);
        let k = b.int_constant("k", I64, [], &[10]).unwrap();
        let (values, indices) = b.top_k(data, k, 1, I64).unwrap();
        let g = b.graph();
        assert_eq!(g.output_type(values), Some(F32));
        assert_eq!(g.output_type(indices), Some(I64));
        assert_eq!(g.output(indices).unwrap().shape, vec![15, 20, 3]);
    }

    #[test]
    fn nms_v5_has_three_outputs() {
        let mut b = GraphBuilder::new("main");
        let boxes = b.parameter("boxes", F16, [1, 1000, 4]);
        let scores = b.parameter("scores", F16, [1, 1, 1000]);
        let outs = b
            .non_max_suppression(NmsVersion::V5, boxes, scores, &[], I64)
            .unwrap();
        assert_eq!(outs.len(), 3);
        assert_eq!(b.graph().output_type(outs[1]), Some(F16));
        assert_eq!(b.graph().output_type(outs[2]), Some(I64));
    }

    #[test]
    fn tensor_iterator_fixture_is_valid() {
        let g = tensor_iterator_graph();
        assert_eq!(g.parameters().len(), 2);
        let ti = g
            .nodes()
            .iter()
            .find(|n| n.op.body().is_some())
            .unwrap();
        let body = ti.op.body().unwrap();
        assert_eq!(body.graph.results().len(), 2);
        assert_eq!(body.graph.parameter_type(1), Some(F16));
    }

    #[test]
    fn finish_rejects_bad_body_wiring() {
        let mut inner = GraphBuilder::new("body");
        let p = inner.parameter("p", F32, [1]);
        inner.result("r", p).unwrap();
        let body = Body {
            graph: inner.finish().unwrap(),
            inputs: vec![InputDescription {
                input_index: 3,
                parameter: 0,
                role: InputRole::Invariant,
            }],
            outputs: Vec::new(),
        };
        let mut b = GraphBuilder::new("main");
        let x = b.parameter("x", F32, [1]);
        b.tensor_iterator(vec![x], body, vec![Output::new(F32, [1])])
            .unwrap();
        assert!(matches!(b.finish(), Err(GraphError::BodyWiring { .. })));
    }
}
