// retype — element-type rewriting for dataflow tensor graphs
//
// Library root. `pipeline::apply` is the entry point of the pass;
// `gather_tree` is the standalone beam-search reconstruction kernel.

pub mod builder;
pub mod diag;
pub mod dot;
pub mod gather_tree;
pub mod graph;
pub mod id;
pub mod lattice;
pub mod materialize;
pub mod op;
pub mod pass;
pub mod pipeline;
pub mod rewrite;
pub mod types;
pub mod verify;
pub mod walk;

pub use graph::Graph;
pub use lattice::ConversionMap;
pub use pipeline::{apply, run_pipeline, PassError, PassReport};
