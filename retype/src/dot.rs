// dot.rs — Graphviz DOT output for typed graphs
//
// Renders a graph with one cluster per TensorIterator body. Edges are
// labelled with the element type they carry; converts are highlighted so
// the effect of a conversion run is visible at a glance.
//
// Preconditions: none.
// Postconditions: returns a DOT string; node ids are unique across levels.
// Failure modes: none (pure string formatting).
// Side effects: none.

use std::fmt::{self, Write};

use crate::graph::{Graph, Node};
use crate::id::NodeId;
use crate::op::Op;
use crate::walk::GraphPath;

/// Emit `graph` as a Graphviz DOT string.
pub fn emit_dot(graph: &Graph) -> String {
    let mut buf = String::new();
    // Writing into a String cannot fail.
    let _ = write_dot(&mut buf, graph);
    buf
}

fn write_dot(buf: &mut String, graph: &Graph) -> fmt::Result {
    let name = if graph.name.is_empty() { "graph" } else { &graph.name };
    writeln!(buf, "digraph {} {{", sanitize(name))?;
    writeln!(buf, "    rankdir=TB;")?;
    writeln!(buf, "    node [fontname=\"Helvetica\", fontsize=10];")?;
    writeln!(buf, "    edge [fontname=\"Helvetica\", fontsize=9];")?;
    write_level(buf, graph, &GraphPath::root(), "    ")?;
    writeln!(buf, "}}")
}

fn write_level(buf: &mut String, graph: &Graph, path: &GraphPath, indent: &str) -> fmt::Result {
    for node in graph.nodes() {
        let id = dot_node_id(path, node.id);
        writeln!(buf, "{indent}{id} [{}];", node_attrs(node))?;
    }

    for node in graph.nodes() {
        let target = dot_node_id(path, node.id);
        for input in &node.inputs {
            let source = dot_node_id(path, input.node);
            let label = graph
                .output_type(*input)
                .map(|t| t.to_string())
                .unwrap_or_default();
            writeln!(buf, "{indent}{source} -> {target} [label=\"{label}\"];")?;
        }
    }

    for node in graph.nodes() {
        let Some(body) = node.op.body() else { continue };
        let child = path.child(node.id);
        let inner = format!("{indent}    ");
        writeln!(buf)?;
        writeln!(buf, "{indent}subgraph cluster_{} {{", sanitize(&child.to_string()))?;
        writeln!(buf, "{inner}label=\"body of {}\";", node.id)?;
        writeln!(buf, "{inner}style=rounded;")?;
        writeln!(buf, "{inner}color=gray50;")?;
        write_level(buf, &body.graph, &child, &inner)?;
        writeln!(buf, "{indent}}}")?;

        // Boundary edges: outer input → body parameter, body result → owner.
        let owner = dot_node_id(path, node.id);
        for d in &body.inputs {
            let (Some(input), Some(&param)) = (
                node.inputs.get(d.input_index),
                body.graph.parameters().get(d.parameter),
            ) else {
                continue;
            };
            let source = dot_node_id(path, input.node);
            let target = dot_node_id(&child, param);
            writeln!(buf, "{indent}{source} -> {target} [style=dashed, constraint=false];")?;
        }
        for d in &body.outputs {
            let Some(&result) = body.graph.results().get(d.result) else {
                continue;
            };
            let source = dot_node_id(&child, result);
            writeln!(
                buf,
                "{indent}{source} -> {owner} [style=dashed, constraint=false, label=\"out {}\"];",
                d.output_index
            )?;
        }
    }
    Ok(())
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// Sanitize a name to valid DOT identifier characters.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// `n<id>` at the root, `b<owner>_..._n<id>` inside bodies.
fn dot_node_id(path: &GraphPath, node: NodeId) -> String {
    let mut id = String::new();
    for owner in path.owners() {
        id.push_str(&format!("b{}_", owner.0));
    }
    id.push_str(&format!("n{}", node.0));
    id
}

fn node_attrs(node: &Node) -> String {
    let (shape, color) = match node.op {
        Op::Parameter | Op::Result => ("ellipse", "lightgray"),
        Op::Constant { .. } => ("box", "white"),
        Op::Convert { .. } => ("box", "orange"),
        Op::TensorIterator { .. } => ("box3d", "lightyellow"),
        _ => ("box", "lightblue"),
    };
    let mut label = node.op.to_string();
    if !node.name.is_empty() {
        label = format!("{}\\n{label}", node.name);
    }
    format!("shape={shape}, style=filled, fillcolor={color}, label=\"{}\"", label.replace('"', "'"))
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::GraphBuilder;
    use crate::types::ElementType;

    #[test]
    fn edges_carry_element_types() {
        let mut b = GraphBuilder::new("main");
        let x = b.parameter("x", ElementType::F16, [2]);
        let c = b.convert(x, ElementType::F32).unwrap();
        b.result("out", c).unwrap();
        let dot = emit_dot(&b.finish().unwrap());
        assert!(dot.starts_with("digraph main {"));
        assert!(dot.contains("n0 -> n1 [label=\"f16\"];"));
        assert!(dot.contains("n1 -> n2 [label=\"f32\"];"));
        assert!(dot.contains("fillcolor=orange"));
        assert!(dot.trim_end().ends_with('}'));
    }

    #[test]
    fn bodies_become_clusters() {
        let g = crate::builder::tests::tensor_iterator_graph();
        let dot = emit_dot(&g);
        assert!(dot.contains("subgraph cluster_root__2 {"));
        assert!(dot.contains("label=\"body of %2\";"));
        // x feeds the sliced body parameter.
        assert!(dot.contains("n0 -> b2_n0 [style=dashed, constraint=false];"));
        assert!(dot.contains("b2_n9 -> b2_n10 [label=\"f16\"];"));
    }

    #[test]
    fn sanitize_replaces_punctuation() {
        assert_eq!(sanitize("root/%4"), "root__4");
    }
}
