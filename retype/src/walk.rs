// walk.rs — Deterministic traversal of graph levels
//
// Kahn's algorithm over one graph level, with the ready set ordered by
// NodeId so the visit order is reproducible. Nested bodies are separate
// levels; `for_each_graph` visits them depth-first.
//
// Preconditions: every input reference resolves (see `Graph::validate`).
// Postconditions: `topological_order` lists every node exactly once, producers
//   before consumers.
// Failure modes: a cycle yields `GraphError::Cycle` with one offending loop.
// Side effects: none.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::graph::{Graph, GraphError};
use crate::id::NodeId;

// ── Paths ───────────────────────────────────────────────────────────────────

/// Location of a graph level: the chain of body-owning nodes from the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct GraphPath(Vec<NodeId>);

impl GraphPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn child(&self, owner: NodeId) -> Self {
        let mut path = self.0.clone();
        path.push(owner);
        Self(path)
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn owners(&self) -> &[NodeId] {
        &self.0
    }
}

impl fmt::Display for GraphPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "root")?;
        for owner in &self.0 {
            write!(f, "/{owner}")?;
        }
        Ok(())
    }
}

// ── Topological order ───────────────────────────────────────────────────────

/// Producers-first order of one graph level.
pub fn topological_order(graph: &Graph) -> Result<Vec<NodeId>, GraphError> {
    let mut in_degree: HashMap<NodeId, usize> = HashMap::new();
    let mut successors: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    for node in graph.nodes() {
        in_degree.entry(node.id).or_insert(0);
        for input in &node.inputs {
            *in_degree.entry(node.id).or_insert(0) += 1;
            successors.entry(input.node).or_default().push(node.id);
        }
    }

    let mut ready: BTreeSet<NodeId> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(&id, _)| id)
        .collect();
    let mut order = Vec::with_capacity(graph.len());

    while let Some(id) = ready.pop_first() {
        order.push(id);
        if let Some(next) = successors.get(&id) {
            for &succ in next {
                if let Some(d) = in_degree.get_mut(&succ) {
                    *d -= 1;
                    if *d == 0 {
                        ready.insert(succ);
                    }
                }
            }
        }
    }

    if order.len() != graph.len() {
        let nodes = detect_cycle(graph).unwrap_or_default();
        return Err(GraphError::Cycle { nodes });
    }
    Ok(order)
}

/// Find one cycle in a graph level, if any.
pub fn detect_cycle(graph: &Graph) -> Option<Vec<NodeId>> {
    let mut adj: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    for node in graph.nodes() {
        for input in &node.inputs {
            adj.entry(input.node).or_default().push(node.id);
        }
    }
    let mut visited: HashMap<NodeId, u8> = HashMap::new();
    let mut path = Vec::new();
    for node in graph.nodes() {
        if visited.get(&node.id).copied().unwrap_or(0) == 0 {
            if let Some(cycle) = dfs_cycle(node.id, &adj, &mut visited, &mut path) {
                return Some(cycle);
            }
        }
    }
    None
}

fn dfs_cycle(
    node: NodeId,
    adj: &HashMap<NodeId, Vec<NodeId>>,
    visited: &mut HashMap<NodeId, u8>,
    path: &mut Vec<NodeId>,
) -> Option<Vec<NodeId>> {
    visited.insert(node, 1); // in progress
    path.push(node);

    if let Some(neighbors) = adj.get(&node) {
        for &next in neighbors {
            match visited.get(&next).copied().unwrap_or(0) {
                0 => {
                    if let Some(cycle) = dfs_cycle(next, adj, visited, path) {
                        return Some(cycle);
                    }
                }
                1 => {
                    if let Some(pos) = path.iter().position(|&n| n == next) {
                        return Some(path[pos..].to_vec());
                    }
                }
                _ => {}
            }
        }
    }

    path.pop();
    visited.insert(node, 2); // done
    None
}

// ── Nested levels ───────────────────────────────────────────────────────────

/// Visit `graph` and every nested body, outer level first.
pub fn for_each_graph<'a>(
    graph: &'a Graph,
    path: &GraphPath,
    f: &mut impl FnMut(&GraphPath, &'a Graph),
) {
    f(path, graph);
    for node in graph.nodes() {
        if let Some(body) = node.op.body() {
            for_each_graph(&body.graph, &path.child(node.id), f);
        }
    }
}

/// Mutable variant of `for_each_graph`. Bodies are visited before the level
/// that owns them.
pub fn for_each_graph_mut<E>(
    graph: &mut Graph,
    path: &GraphPath,
    f: &mut impl FnMut(&GraphPath, &mut Graph) -> Result<(), E>,
) -> Result<(), E> {
    let owners: Vec<NodeId> = graph
        .nodes()
        .iter()
        .filter(|n| n.op.body().is_some())
        .map(|n| n.id)
        .collect();
    for owner in owners {
        if let Some(body) = graph.node_mut(owner).and_then(|n| n.op.body_mut()) {
            for_each_graph_mut(&mut body.graph, &path.child(owner), f)?;
        }
    }
    f(path, graph)
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::GraphBuilder;
    use crate::types::ElementType;

    #[test]
    fn order_puts_producers_first_and_breaks_ties_by_id() {
        let mut b = GraphBuilder::new("main");
        let a = b.parameter("a", ElementType::F32, [4]);
        let c = b.parameter("c", ElementType::F32, [4]);
        let sum = b.add(a, c).unwrap();
        b.result("out", sum).unwrap();
        let g = b.finish().unwrap();
        let order = topological_order(&g).unwrap();
        assert_eq!(order, vec![NodeId(0), NodeId(1), NodeId(2), NodeId(3)]);
    }

    #[test]
    fn inserted_convert_is_ordered_before_its_consumer() {
        let mut b = GraphBuilder::new("main");
        let a = b.parameter("a", ElementType::F16, [4]);
        let relu = b.relu(a).unwrap();
        b.result("out", relu).unwrap();
        let mut g = b.finish().unwrap();
        let convert = g.insert_convert(a, relu.node, 0, ElementType::F32).unwrap();
        let order = topological_order(&g).unwrap();
        let pos = |id| order.iter().position(|&n| n == id).unwrap();
        assert!(pos(convert) < pos(relu.node));
    }

    #[test]
    fn path_display() {
        let path = GraphPath::root().child(NodeId(4)).child(NodeId(1));
        assert_eq!(path.to_string(), "root/%4/%1");
        assert_eq!(path.depth(), 2);
    }

    #[test]
    fn nested_levels_are_visited() {
        let g = crate::builder::tests::tensor_iterator_graph();
        let mut seen = Vec::new();
        for_each_graph(&g, &GraphPath::root(), &mut |path, level| {
            seen.push((path.depth(), level.len()));
        });
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, 0);
        assert_eq!(seen[1].0, 1);
    }
}
