// id.rs — Stable node identifiers for graph levels
//
// Every graph level (the outer graph and each nested body) owns its own
// allocator, so node identity never crosses a body boundary. IDs increase
// monotonically in allocation order and are never reused, which keeps
// external references to surviving nodes valid after a pass removes converts.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier for a node within one graph level.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Allocator for node IDs. Produces monotonically increasing IDs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdAllocator {
    next_node: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_node(&mut self) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node += 1;
        id
    }

    /// Make sure future allocations land strictly after `id`.
    ///
    /// Used when a graph is deserialized with explicit IDs.
    pub fn reserve_past(&mut self, id: NodeId) {
        if self.next_node <= id.0 {
            self.next_node = id.0 + 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_is_monotonic() {
        let mut ids = IdAllocator::new();
        assert_eq!(ids.alloc_node(), NodeId(0));
        assert_eq!(ids.alloc_node(), NodeId(1));
    }

    #[test]
    fn reserve_past_skips_taken_ids() {
        let mut ids = IdAllocator::new();
        ids.reserve_past(NodeId(7));
        assert_eq!(ids.alloc_node(), NodeId(8));
        // Reserving an older id never moves the allocator backwards.
        ids.reserve_past(NodeId(2));
        assert_eq!(ids.alloc_node(), NodeId(9));
    }

    #[test]
    fn display_uses_percent_prefix() {
        assert_eq!(NodeId(12).to_string(), "%12");
    }
}
