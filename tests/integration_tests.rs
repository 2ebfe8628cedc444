//! Integration tests for the compile pipeline and the tiled runtime.

use stencilopt::codegen::{self, Format};
use stencilopt::prelude::*;
use stencilopt::runtime::CountingPrefetch;

fn context(settings: CompilerSettings) -> CompilationContext {
    CompilationContext::new(settings).expect("valid settings")
}

fn bundle_names(compiled: &CompiledSolution) -> Vec<String> {
    compiled.bundles.iter().map(|b| b.to_string()).collect()
}

#[test]
fn test_fold_for_avx512() {
    let settings = CompilerSettings::new().fold("x", 4).fold("y", 4);
    let compiled = context(settings)
        .compile("iso3dfd", Format::Avx512.target_len(4))
        .expect("compiles");
    assert_eq!(compiled.geometry.fold.to_string(), "x=4, y=4, z=1");
    assert_eq!(compiled.geometry.vector_len(), 16);
    assert_eq!(compiled.solution.dims.unit_stride_dim(), Some("z"));
}

#[test]
fn test_first_unit_stride() {
    let settings = CompilerSettings::new().first_inner(true);
    let compiled = context(settings)
        .compile("iso3dfd", Format::Avx.target_len(4))
        .expect("compiles");
    assert_eq!(compiled.solution.dims.unit_stride_dim(), Some("x"));
    assert_eq!(compiled.geometry.fold.get("x"), 2);
    assert_eq!(compiled.geometry.vector_len(), 8);
}

#[test]
fn test_targeted_bundles() {
    let settings = CompilerSettings::new().bundle_target("a", "foo").bundle_target("b", "bar");
    let compiled = context(settings).compile("test_bundles", None).expect("compiles");
    assert_eq!(bundle_names(&compiled), vec!["a_0 = {foo1, foo2}", "b_0 = {bar1}"]);
}

#[test]
fn test_dependent_equations_split() {
    let settings = CompilerSettings::new().bundle_target("a", "foo").bundle_target("b", "bar");
    let compiled = context(settings).compile("test_chain", None).expect("compiles");
    assert_eq!(
        bundle_names(&compiled),
        vec!["a_0 = {foo1}", "a_1 = {foo2}", "b_0 = {bar1}"]
    );
    let pos = |name: &str| compiled.bundles.iter().position(|b| b.name == name);
    assert!(pos("a_0") < pos("a_1"));
}

#[test]
fn test_find_deps_disabled_merges() {
    let settings = CompilerSettings::new().bundle_target("a", "foo").find_deps(false);
    let compiled = context(settings).compile("test_chain", None).expect("compiles");
    assert_eq!(compiled.bundle("a_0").map(|b| b.len()), Some(2));
    assert!(compiled.graph.same_step_edges().is_empty());
}

#[test]
fn test_var_filter() {
    let settings = CompilerSettings::new().var_regex("^foo");
    let compiled = context(settings).compile("test_bundles", None).expect("compiles");
    let members: usize = compiled.bundles.iter().map(|b| b.len()).sum();
    assert_eq!(members, 2);
}

#[test]
fn test_cycle_rejected() {
    let err = context(CompilerSettings::default())
        .compile("test_cycle", None)
        .unwrap_err();
    assert_eq!(err.short_name(), "CyclicDependency");
    assert!(err.to_string().contains("ping"));
}

#[test]
fn test_radius_control() {
    let mut ctx = context(CompilerSettings::default());
    let err = ctx.set_radius("iso3dfd", -1).unwrap_err();
    assert_eq!(err.short_name(), "InvalidRadius");

    assert_eq!(ctx.set_radius("iso3dfd", 4).unwrap(), Some(4));
    let compiled = ctx.compile("iso3dfd", None).expect("compiles");
    assert_eq!(compiled.radius, Some(4));
    assert_eq!(compiled.solution.var("pressure").map(|v| v.halo_of("x")), Some(4));

    assert_eq!(ctx.set_radius("heat2d", 4).unwrap(), None);
    assert_eq!(ctx.set_radius("nope", 4).unwrap_err().short_name(), "UnknownSolution");
}

#[test]
fn test_listing_order() {
    let ctx = context(CompilerSettings::default());
    let listing = ctx.registry().listing();
    let first_test = listing
        .iter()
        .position(|(n, _)| n.starts_with("test_"))
        .expect("test solutions registered");
    assert!(listing[..first_test].iter().all(|(n, _)| !n.starts_with("test_")));
    assert!(listing[first_test..].iter().all(|(n, _)| n.starts_with("test_")));
    assert!(listing.contains(&("iso3dfd", true)));
    assert!(listing.contains(&("heat2d", false)));
}

#[test]
fn test_pipeline_is_deterministic() {
    let settings = CompilerSettings::new().bundle_target("a", "foo");
    let ctx = context(settings);
    let first = ctx.compile("test_chain", Some(8)).unwrap().to_json().unwrap();
    let second = ctx.compile("test_chain", Some(8)).unwrap().to_json().unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_every_format_renders() {
    let ctx = context(CompilerSettings::default());
    for format in Format::ALL {
        let compiled = ctx.compile("test_misc", format.target_len(4)).expect("compiles");
        let text = codegen::generate(&compiled, format).expect("renders");
        assert!(text.contains("test_misc"), "{} output names the solution", format);
    }
}

#[test]
fn test_tiled_matches_reference() {
    let mut ctx = context(CompilerSettings::default());
    ctx.set_radius("iso3dfd", 2).unwrap();
    let compiled = ctx.compile("iso3dfd", Format::Avx512.target_len(4)).unwrap();

    let mut reference = StencilContext::new(&compiled, &[8, 8, 8]).unwrap();
    reference.init_diff();
    let mut tiled = reference
        .clone()
        .with_region(&[8, 5, 8])
        .unwrap()
        .with_block(&[3, 5, 8])
        .unwrap();

    let exec = Executor::new(&compiled, &reference).unwrap();
    exec.calc_steps_ref(&mut reference, 0..2).unwrap();
    exec.calc_steps_opt(&mut tiled, 0..2, &NoPrefetch).unwrap();
    assert_eq!(tiled.compare(&reference), 0);
}

#[test]
fn test_same_step_bundles_at_runtime() {
    let compiled = context(CompilerSettings::default()).compile("test_misc", Some(4)).unwrap();
    assert_eq!(compiled.bundles.len(), 2);

    let mut reference = StencilContext::new(&compiled, &[6, 9]).unwrap();
    reference.init_diff();
    let mut tiled = reference.clone().with_block(&[4, 4]).unwrap();

    let exec = Executor::new(&compiled, &reference).unwrap();
    exec.calc_steps_ref(&mut reference, 0..3).unwrap();
    exec.calc_steps_opt(&mut tiled, 0..3, &NoPrefetch).unwrap();
    assert_eq!(tiled.compare(&reference), 0);
}

#[test]
fn test_prefetch_does_not_change_results() {
    let settings = CompilerSettings::new().fold("x", 1).cluster("x", 1);
    let compiled = context(settings).compile("test_reduction", None).unwrap();

    let mut plain = StencilContext::new(&compiled, &[17]).unwrap().with_block(&[8]).unwrap();
    plain.init_diff();
    let mut counted = plain.clone();

    let exec = Executor::new(&compiled, &plain).unwrap();
    let counter = CountingPrefetch::default();
    exec.calc_steps_opt(&mut plain, 0..2, &NoPrefetch).unwrap();
    exec.calc_steps_opt(&mut counted, 0..2, &counter).unwrap();
    assert_eq!(counted.compare(&plain), 0);

    // Blocks of 8, 8 and 1 points; one cluster per point.
    let (l1, l2) = counter.counts();
    let bundles = compiled.bundles.len();
    assert_eq!(l1, 2 * bundles * (7 + 7));
    assert_eq!(l2, 2 * bundles * (6 + 6));
}
