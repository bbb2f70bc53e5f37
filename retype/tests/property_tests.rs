// Property-based tests for conversion and kernel invariants.
//
// Two categories:
// 1. Random elementwise/convert chains: after one run no source type
//    remains, the certificate holds, and a second run changes nothing.
// 2. Gather-tree: the parallel kernel agrees with the sequential one and
//    every column is padded with the end token after its first occurrence.
//
// Uses proptest with explicit configuration to prevent CI flakiness.

use proptest::prelude::*;
use retype::builder::GraphBuilder;
use retype::graph::Graph;
use retype::lattice::ConversionMap;
use retype::pass::{StageCert, StageId};
use retype::pipeline::{apply, fingerprint, run_pipeline};
use retype::types::ElementType::{self, *};
use retype::verify::has_type;

use retype::gather_tree::{gather_tree, gather_tree_par, TreeShape};

// ── Chain generator ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum Step {
    Relu,
    Convert(ElementType),
    AddSelf,
}

fn arb_type() -> impl Strategy<Value = ElementType> {
    prop_oneof![Just(F16), Just(F32), Just(F64), Just(I64), Just(I32), Just(I8)]
}

fn arb_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        Just(Step::Relu),
        Just(Step::AddSelf),
        arb_type().prop_map(Step::Convert),
    ]
}

fn build_chain(input: ElementType, steps: &[Step]) -> Graph {
    let mut b = GraphBuilder::new("chain");
    let mut value = b.parameter("x", input, [4, 8]);
    for step in steps {
        value = match *step {
            Step::Relu => b.relu(value),
            Step::Convert(t) => b.convert(value, t),
            Step::AddSelf => b.add(value, value),
        }
        .unwrap();
    }
    b.result("out", value).unwrap();
    b.finish().unwrap()
}

fn precision_map() -> ConversionMap {
    ConversionMap::from_pairs(&[(I64, I32), (F16, F32)])
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 200,
        max_shrink_iters: 200,
        .. ProptestConfig::default()
    })]

    #[test]
    fn chains_are_fully_converted(
        input in arb_type(),
        steps in prop::collection::vec(arb_step(), 0..8),
    ) {
        let mut g = build_chain(input, &steps);
        let report = run_pipeline(&mut g, &precision_map(), StageId::Verify).unwrap();
        let cert = report.cert.unwrap();
        prop_assert!(cert.all_pass(), "{:?}\n{}", cert.obligations(), g);
        prop_assert!(!has_type(&g, I64), "{}", g);
        prop_assert!(!has_type(&g, F16), "{}", g);
    }

    #[test]
    fn second_run_is_a_no_op(
        input in arb_type(),
        steps in prop::collection::vec(arb_step(), 0..8),
    ) {
        let mut g = build_chain(input, &steps);
        apply(&mut g, &precision_map()).unwrap();
        let first = fingerprint(&g).unwrap();
        prop_assert!(!apply(&mut g, &precision_map()).unwrap());
        prop_assert_eq!(fingerprint(&g).unwrap(), first);
    }

    #[test]
    fn surviving_converts_are_not_redundant(
        input in arb_type(),
        steps in prop::collection::vec(arb_step(), 0..8),
    ) {
        let mut g = build_chain(input, &steps);
        apply(&mut g, &precision_map()).unwrap();
        for node in g.nodes().iter().filter(|n| n.op.is_convert()) {
            let source = node.inputs[0];
            let producer = g.node(source.node).unwrap();
            prop_assert!(!producer.op.is_convert(), "chain left at {}\n{}", node.id, g);
            prop_assert_ne!(g.output_type(source), Some(node.outputs[0].element_type));
        }
    }
}

// ── Gather-tree generator ───────────────────────────────────────────────────

/// Shape plus step ids, in-range parent ids and per-batch lengths.
fn arb_tree() -> impl Strategy<Value = (TreeShape, Vec<i32>, Vec<i32>, Vec<i32>)> {
    (1usize..6, 1usize..4, 1usize..4).prop_flat_map(|(time, batch, beam)| {
        let shape = TreeShape::new(time, batch, beam);
        let n = shape.len();
        (
            Just(shape),
            prop::collection::vec(0i32..5, n),
            prop::collection::vec(0..beam as i32, n),
            prop::collection::vec(-1i32..8, batch),
        )
    })
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 200,
        max_shrink_iters: 100,
        .. ProptestConfig::default()
    })]

    #[test]
    fn parallel_kernel_matches_sequential((shape, step, parent, lengths) in arb_tree()) {
        let sequential = gather_tree(&step, &parent, &lengths, 0, shape, -1).unwrap();
        let mut parallel = vec![-1; shape.len()];
        gather_tree_par(&step, &parent, &lengths, 0, shape, &mut parallel).unwrap();
        prop_assert_eq!(parallel, sequential);
    }

    #[test]
    fn end_token_absorbs_the_rest((shape, step, parent, lengths) in arb_tree()) {
        let out = gather_tree(&step, &parent, &lengths, 0, shape, -1).unwrap();
        for batch in 0..shape.batch_size {
            for beam in 0..shape.beam_width {
                let column: Vec<i32> = (0..shape.max_time)
                    .map(|t| out[(t * shape.batch_size + batch) * shape.beam_width + beam])
                    .collect();
                if lengths[batch] <= 0 {
                    prop_assert!(column.iter().all(|&v| v == -1));
                    continue;
                }
                if let Some(first) = column.iter().position(|&v| v == 0) {
                    prop_assert!(column[first..].iter().all(|&v| v == 0), "{:?}", column);
                }
            }
        }
    }
}
