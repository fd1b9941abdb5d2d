//! Benchmarks for the schedule primitives.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tensched::analysis::access::{accesses, AccessKind};
use tensched::analysis::region::infer_union_region;
use tensched::prelude::*;

/// `C = A + B` over `[0, n)^2`.
fn elementwise_add(n: i64) -> (Module, NodeId) {
    let mut module = Module::new("add");
    let a = module.declare_tensor(Tensor::new("A", vec![n, n], ElementType::Float));
    let b_t = module.declare_tensor(Tensor::new("B", vec![n, n], ElementType::Float));
    let c = module.declare_tensor(Tensor::new("C", vec![n, n], ElementType::Float));
    let buffer = module.add_buffer(Buffer::new("_C", MemoryScope::Global, vec![n, n]));
    module.bind_alias_group("C", buffer);

    let mut b = IrBuilder::new(&mut module);
    let a_idx = vec![b.var("vi"), b.var("vj")];
    let lhs = b.load(a, a_idx);
    let b_idx = vec![b.var("vi"), b.var("vj")];
    let rhs = b.load(b_t, b_idx);
    let sum = b.add(lhs, rhs);
    let c_idx = vec![b.var("vi"), b.var("vj")];
    let store = b.store(c, c_idx, sum);
    let values = vec![b.var("i"), b.var("j")];
    let block = b.realize(
        "C",
        vec![IterVar::new("vi", 0, n), IterVar::new("vj", 0, n)],
        values,
        vec![store],
    );
    let lj = b.for_loop("j", 0, n, vec![block]);
    let li = b.for_loop("i", 0, n, vec![lj]);
    b.root(vec![li]);
    (module, block)
}

/// Benchmark region inference over the loads of one block.
fn bench_infer_region(c: &mut Criterion) {
    let (module, block) = elementwise_add(128);
    let root = module.exprs()[0];
    let loads = accesses(&module, block, AccessKind::Read);

    c.bench_function("infer_region_128x128", |b| {
        b.iter(|| infer_union_region(black_box(&module), black_box(&loads), root).unwrap())
    });
}

/// Benchmark a full cache_read rewrite, including the module clone.
fn bench_cache_read(c: &mut Criterion) {
    let (module, block) = elementwise_add(128);

    c.bench_function("cache_read_128x128", |b| {
        b.iter(|| {
            let mut sched = Schedule::new(module.clone(), DeviceApi::Gpu);
            sched.cache_read(black_box(block), 0, MemoryScope::Shared).unwrap()
        })
    });
}

/// Benchmark cache_write with its alias sweep.
fn bench_cache_write(c: &mut Criterion) {
    let (module, block) = elementwise_add(128);

    c.bench_function("cache_write_128x128", |b| {
        b.iter(|| {
            let mut sched = Schedule::new(module.clone(), DeviceApi::Gpu);
            sched.cache_write(black_box(block), 0, MemoryScope::Local).unwrap()
        })
    });
}

criterion_group!(benches, bench_infer_region, bench_cache_read, bench_cache_write);
criterion_main!(benches);
