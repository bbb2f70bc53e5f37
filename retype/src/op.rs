// op.rs — Closed operation catalog
//
// Every node carries one `Op`. Besides naming the operation, the catalog
// declares the element-type role of each input and output: which values are
// coordinates or scores (float), which are counts or indices (integer), and
// which results are governed by an explicit output-type attribute.
//
// Operations the rewrite pass has no special knowledge of are expressed as
// `Op::Custom` and follow the default per-value rule.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::graph::Body;
use crate::lattice::{ConstantValues, TypeConstraint};
use crate::types::ElementType;

/// Operation of a graph node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    /// Graph entry point.
    Parameter,
    /// Graph exit point. One input; its output mirrors the input.
    Result,
    Constant {
        values: ConstantValues,
    },
    Convert {
        destination: ElementType,
    },
    ShapeOf {
        output_type: ElementType,
    },
    /// Inputs: boxes, scores, max_output_boxes_per_class, iou_threshold,
    /// score_threshold, and (v5) soft_nms_sigma. All but boxes and scores
    /// are optional.
    NonMaxSuppression {
        version: NmsVersion,
        box_encoding: BoxEncoding,
        sort_result_descending: bool,
        output_type: ElementType,
    },
    /// Inputs: data, k. Outputs: values, indices.
    TopK {
        axis: i64,
        mode: TopKMode,
        sort: TopKSort,
        index_element_type: ElementType,
    },
    NonZero {
        output_type: ElementType,
    },
    /// Inputs: data, buckets.
    Bucketize {
        output_type: ElementType,
        with_right_bound: bool,
    },
    /// Inputs: data, begin, end, strides.
    StridedSlice {
        begin_mask: Vec<i64>,
        end_mask: Vec<i64>,
    },
    TensorIterator {
        body: Box<Body>,
    },
    /// Inputs: step_ids, parent_ids, max_seq_len, end_token.
    GatherTree,
    Elementwise {
        function: ElementwiseOp,
    },
    /// Inputs: data, axes.
    Squeeze,
    /// Inputs: data, axes.
    Unsqueeze,
    /// Inputs: X, H, W, R, B.
    GruCell {
        hidden_size: usize,
    },
    Custom {
        name: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NmsVersion {
    V1,
    V3,
    V4,
    V5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoxEncoding {
    Corner,
    Center,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopKMode {
    Max,
    Min,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopKSort {
    None,
    Index,
    Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementwiseOp {
    Relu,
    Abs,
    Negative,
    Sigmoid,
    Add,
    Subtract,
    Multiply,
    Divide,
    Maximum,
    Minimum,
}

impl ElementwiseOp {
    pub fn arity(self) -> usize {
        match self {
            ElementwiseOp::Relu | ElementwiseOp::Abs | ElementwiseOp::Negative | ElementwiseOp::Sigmoid => 1,
            _ => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ElementwiseOp::Relu => "relu",
            ElementwiseOp::Abs => "abs",
            ElementwiseOp::Negative => "negative",
            ElementwiseOp::Sigmoid => "sigmoid",
            ElementwiseOp::Add => "add",
            ElementwiseOp::Subtract => "subtract",
            ElementwiseOp::Multiply => "multiply",
            ElementwiseOp::Divide => "divide",
            ElementwiseOp::Maximum => "maximum",
            ElementwiseOp::Minimum => "minimum",
        }
    }
}

/// Fieldless mirror of `Op`, used as the key of the rewrite-rule table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Parameter,
    Result,
    Constant,
    Convert,
    ShapeOf,
    NonMaxSuppression,
    TopK,
    NonZero,
    Bucketize,
    StridedSlice,
    TensorIterator,
    GatherTree,
    Elementwise,
    Squeeze,
    Unsqueeze,
    GruCell,
    Custom,
}

impl Op {
    pub fn kind(&self) -> OpKind {
        match self {
            Op::Parameter => OpKind::Parameter,
            Op::Result => OpKind::Result,
            Op::Constant { .. } => OpKind::Constant,
            Op::Convert { .. } => OpKind::Convert,
            Op::ShapeOf { .. } => OpKind::ShapeOf,
            Op::NonMaxSuppression { .. } => OpKind::NonMaxSuppression,
            Op::TopK { .. } => OpKind::TopK,
            Op::NonZero { .. } => OpKind::NonZero,
            Op::Bucketize { .. } => OpKind::Bucketize,
            Op::StridedSlice { .. } => OpKind::StridedSlice,
            Op::TensorIterator { .. } => OpKind::TensorIterator,
            Op::GatherTree => OpKind::GatherTree,
            Op::Elementwise { .. } => OpKind::Elementwise,
            Op::Squeeze => OpKind::Squeeze,
            Op::Unsqueeze => OpKind::Unsqueeze,
            Op::GruCell { .. } => OpKind::GruCell,
            Op::Custom { .. } => OpKind::Custom,
        }
    }

    /// Element-type role of input `index`.
    ///
    /// TensorIterator inputs are constrained by the body parameter they
    /// feed; see `materialize`.
    pub fn input_constraint(&self, index: usize) -> TypeConstraint {
        match self {
            Op::NonMaxSuppression { .. } => match index {
                2 => TypeConstraint::Integer,
                _ => TypeConstraint::Float,
            },
            Op::TopK { .. } if index == 1 => TypeConstraint::Integer,
            Op::StridedSlice { .. } if index > 0 => TypeConstraint::Integer,
            Op::Squeeze | Op::Unsqueeze if index == 1 => TypeConstraint::Integer,
            Op::GatherTree if index > 0 => TypeConstraint::SameAs(0),
            Op::Elementwise { .. } if index > 0 => TypeConstraint::SameAs(0),
            Op::GruCell { .. } => match index {
                0 => TypeConstraint::Float,
                _ => TypeConstraint::SameAs(0),
            },
            _ => TypeConstraint::Any,
        }
    }

    /// Element-type role of output `index`.
    pub fn output_constraint(&self, index: usize) -> TypeConstraint {
        if self.attribute_outputs().contains(&index) {
            return TypeConstraint::Index;
        }
        match self {
            Op::NonMaxSuppression { .. } | Op::GruCell { .. } => TypeConstraint::Float,
            Op::Convert { destination } => TypeConstraint::Exact(*destination),
            _ => TypeConstraint::Any,
        }
    }

    /// The explicit result-index element type attribute, if the op has one.
    pub fn type_attribute(&self) -> Option<ElementType> {
        match self {
            Op::ShapeOf { output_type }
            | Op::NonZero { output_type }
            | Op::Bucketize { output_type, .. }
            | Op::NonMaxSuppression { output_type, .. } => Some(*output_type),
            Op::TopK {
                index_element_type, ..
            } => Some(*index_element_type),
            _ => None,
        }
    }

    pub fn type_attribute_mut(&mut self) -> Option<&mut ElementType> {
        match self {
            Op::ShapeOf { output_type }
            | Op::NonZero { output_type }
            | Op::Bucketize { output_type, .. }
            | Op::NonMaxSuppression { output_type, .. } => Some(output_type),
            Op::TopK {
                index_element_type, ..
            } => Some(index_element_type),
            _ => None,
        }
    }

    /// Outputs whose element type is the type attribute.
    pub fn attribute_outputs(&self) -> &'static [usize] {
        match self {
            Op::ShapeOf { .. } | Op::NonZero { .. } | Op::Bucketize { .. } => &[0],
            Op::TopK { .. } => &[1],
            Op::NonMaxSuppression {
                version: NmsVersion::V5,
                ..
            } => &[0, 2],
            Op::NonMaxSuppression { .. } => &[0],
            _ => &[],
        }
    }

    pub fn body(&self) -> Option<&Body> {
        match self {
            Op::TensorIterator { body } => Some(body),
            _ => None,
        }
    }

    pub fn body_mut(&mut self) -> Option<&mut Body> {
        match self {
            Op::TensorIterator { body } => Some(body),
            _ => None,
        }
    }

    pub fn is_convert(&self) -> bool {
        matches!(self, Op::Convert { .. })
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Parameter => write!(f, "parameter"),
            Op::Result => write!(f, "result"),
            Op::Constant { values } => write!(f, "constant[{}]", values.len()),
            Op::Convert { destination } => write!(f, "convert<{destination}>"),
            Op::ShapeOf { output_type } => write!(f, "shape_of<{output_type}>"),
            Op::NonMaxSuppression {
                version,
                output_type,
                ..
            } => write!(f, "nms_{version:?}<{output_type}>"),
            Op::TopK {
                index_element_type, ..
            } => write!(f, "top_k<{index_element_type}>"),
            Op::NonZero { output_type } => write!(f, "non_zero<{output_type}>"),
            Op::Bucketize { output_type, .. } => write!(f, "bucketize<{output_type}>"),
            Op::StridedSlice { .. } => write!(f, "strided_slice"),
            Op::TensorIterator { .. } => write!(f, "tensor_iterator"),
            Op::GatherTree => write!(f, "gather_tree"),
            Op::Elementwise { function } => write!(f, "{}", function.name()),
            Op::Squeeze => write!(f, "squeeze"),
            Op::Unsqueeze => write!(f, "unsqueeze"),
            Op::GruCell { hidden_size } => write!(f, "gru_cell[{hidden_size}]"),
            Op::Custom { name } => write!(f, "custom:{name}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nms(version: NmsVersion) -> Op {
        Op::NonMaxSuppression {
            version,
            box_encoding: BoxEncoding::Corner,
            sort_result_descending: true,
            output_type: ElementType::I64,
        }
    }

    #[test]
    fn nms_roles_split_by_meaning() {
        let op = nms(NmsVersion::V3);
        assert_eq!(op.input_constraint(0), TypeConstraint::Float);
        assert_eq!(op.input_constraint(1), TypeConstraint::Float);
        assert_eq!(op.input_constraint(2), TypeConstraint::Integer);
        assert_eq!(op.input_constraint(3), TypeConstraint::Float);
        assert_eq!(op.output_constraint(0), TypeConstraint::Index);
    }

    #[test]
    fn nms_v5_has_score_output_between_indices() {
        let op = nms(NmsVersion::V5);
        assert_eq!(op.attribute_outputs(), &[0, 2]);
        assert_eq!(op.output_constraint(1), TypeConstraint::Float);
        assert_eq!(op.output_constraint(2), TypeConstraint::Index);
    }

    #[test]
    fn top_k_attribute_governs_indices_only() {
        let mut op = Op::TopK {
            axis: 1,
            mode: TopKMode::Min,
            sort: TopKSort::Value,
            index_element_type: ElementType::I64,
        };
        assert_eq!(op.attribute_outputs(), &[1]);
        assert_eq!(op.output_constraint(0), TypeConstraint::Any);
        *op.type_attribute_mut().unwrap() = ElementType::I32;
        assert_eq!(op.type_attribute(), Some(ElementType::I32));
    }

    #[test]
    fn binary_elementwise_inputs_must_agree() {
        let op = Op::Elementwise {
            function: ElementwiseOp::Add,
        };
        assert_eq!(op.input_constraint(1), TypeConstraint::SameAs(0));
        assert_eq!(ElementwiseOp::Add.arity(), 2);
        assert_eq!(ElementwiseOp::Relu.arity(), 1);
    }

    #[test]
    fn custom_ops_are_unconstrained() {
        let op = Op::Custom {
            name: "Erf".into(),
        };
        assert_eq!(op.kind(), OpKind::Custom);
        assert_eq!(op.input_constraint(0), TypeConstraint::Any);
        assert_eq!(op.output_constraint(3), TypeConstraint::Any);
    }

    #[test]
    fn display_labels() {
        let op = Op::Convert {
            destination: ElementType::F32,
        };
        assert_eq!(op.to_string(), "convert<f32>");
        assert_eq!(nms(NmsVersion::V4).to_string(), "nms_V4<i64>");
    }
}
