//! Benchmarks for the stencil compiler and the tiled runtime.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use stencilopt::codegen::{self, Format};
use stencilopt::context::CompilationContext;
use stencilopt::runtime::{Executor, NoPrefetch, StencilContext};
use stencilopt::settings::CompilerSettings;

/// Benchmark the full compile pipeline.
fn bench_compile(c: &mut Criterion) {
    let mut ctx = CompilationContext::new(CompilerSettings::default()).unwrap();
    ctx.set_radius("iso3dfd", 8).unwrap();

    c.bench_function("compile_iso3dfd_r8", |b| {
        b.iter(|| ctx.compile(black_box("iso3dfd"), Some(16)).unwrap())
    });

    let compiled = ctx.compile("iso3dfd", Some(16)).unwrap();
    c.bench_function("emit_avx512_iso3dfd_r8", |b| {
        b.iter(|| codegen::generate(black_box(&compiled), Format::Avx512).unwrap())
    });
}

/// Benchmark bundling with many independent and dependent equations.
fn bench_bundling(c: &mut Criterion) {
    let settings = CompilerSettings::new().bundle_target("a", "foo").bundle_target("b", "bar");
    let ctx = CompilationContext::new(settings).unwrap();

    c.bench_function("compile_test_chain", |b| {
        b.iter(|| ctx.compile(black_box("test_chain"), None).unwrap())
    });
}

/// Benchmark the reference and tiled sweeps.
fn bench_runtime(c: &mut Criterion) {
    let ctx = CompilationContext::new(CompilerSettings::default()).unwrap();
    let compiled = ctx.compile("heat2d", Some(8)).unwrap();
    let mut grids = StencilContext::new(&compiled, &[64, 64]).unwrap();
    grids.init_diff();
    let exec = Executor::new(&compiled, &grids).unwrap();

    let mut reference = grids.clone();
    c.bench_function("heat2d_ref_64x64", |b| {
        b.iter(|| exec.calc_steps_ref(&mut reference, 0..1).unwrap())
    });

    let mut tiled = grids.with_block(&[16, 16]).unwrap();
    c.bench_function("heat2d_tiled_64x64", |b| {
        b.iter(|| exec.calc_steps_opt(&mut tiled, 0..1, &NoPrefetch).unwrap())
    });
}

criterion_group!(benches, bench_compile, bench_bundling, bench_runtime);
criterion_main!(benches);
