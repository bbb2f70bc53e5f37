use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use retype::builder::GraphBuilder;
use retype::gather_tree::{gather_tree, gather_tree_par, TreeShape};
use retype::graph::Graph;
use retype::lattice::ConversionMap;
use retype::pass::StageId;
use retype::pipeline::{apply, fingerprint, run_pipeline};
use retype::types::ElementType::*;

// Conversion latency over graphs of growing size, and gather-tree
// throughput for the sequential and parallel kernels.

/// `n` blocks of convert -> relu -> add, with an i64 ShapeOf output per block.
fn generate_chain(n_blocks: usize) -> Graph {
    let mut b = GraphBuilder::new("chain");
    let mut value = b.parameter("x", F16, [1, 64, 64]);
    for _ in 0..n_blocks {
        let cvt = b.convert(value, F32).unwrap();
        let relu = b.relu(cvt).unwrap();
        let back = b.convert(relu, F16).unwrap();
        value = b.add(back, value).unwrap();
        let shape = b.shape_of(value, I64).unwrap();
        b.result("shape", shape).unwrap();
    }
    b.result("out", value).unwrap();
    b.finish().unwrap()
}

fn precision_map() -> ConversionMap {
    ConversionMap::from_pairs(&[(I64, I32), (F16, F32)])
}

fn bench_apply_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply_latency");
    let map = precision_map();

    for n in [10usize, 100, 1000] {
        let graph = generate_chain(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &graph, |b, graph| {
            b.iter_batched(
                || graph.clone(),
                |mut g| {
                    apply(&mut g, &map).unwrap();
                    black_box(g);
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

fn bench_stage_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("stage_latency");
    let map = precision_map();
    let graph = generate_chain(200);

    for stage in [StageId::Rewrite, StageId::Materialize, StageId::EliminateConverts, StageId::Verify] {
        group.bench_with_input(BenchmarkId::from_parameter(stage), &graph, |b, graph| {
            b.iter_batched(
                || graph.clone(),
                |mut g| black_box(run_pipeline(&mut g, &map, stage).unwrap()),
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

fn bench_fingerprint(c: &mut Criterion) {
    let graph = generate_chain(200);
    c.bench_function("fingerprint", |b| {
        b.iter(|| black_box(fingerprint(black_box(&graph)).unwrap()));
    });
}

fn bench_gather_tree(c: &mut Criterion) {
    let mut group = c.benchmark_group("gather_tree");

    for (time, batch, beam) in [(32, 8, 4), (128, 32, 8)] {
        let shape = TreeShape::new(time, batch, beam);
        let step_ids: Vec<i32> = (0..shape.len() as i32).map(|i| i % 97 + 1).collect();
        let parent_ids: Vec<i32> = (0..shape.len() as i32).map(|i| (i * 31) % beam as i32).collect();
        let lengths = vec![time as i32; batch];
        let label = format!("{time}x{batch}x{beam}");

        group.bench_function(BenchmarkId::new("sequential", &label), |b| {
            b.iter(|| {
                black_box(gather_tree(&step_ids, &parent_ids, &lengths, 0, shape, -1).unwrap())
            });
        });
        group.bench_function(BenchmarkId::new("parallel", &label), |b| {
            let mut out = vec![-1; shape.len()];
            b.iter(|| {
                gather_tree_par(&step_ids, &parent_ids, &lengths, 0, shape, &mut out).unwrap();
                black_box(&out);
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_apply_latency,
    bench_stage_latency,
    bench_fingerprint,
    bench_gather_tree,
);
criterion_main!(benches);
