//! Property tests for geometry, tiling, bundling and the runtime.

use proptest::prelude::*;
use std::collections::BTreeMap;
use stencilopt::prelude::*;
use stencilopt::runtime::{TileBox, TilingPlan};
use stencilopt::transform::compute_fold;

fn xyz() -> Dimensions {
    let mut dims = Dimensions::new();
    dims.declare("t", DimKind::Step).unwrap();
    for d in ["x", "y", "z"] {
        dims.declare(d, DimKind::Domain).unwrap();
    }
    dims
}

/// Equation `i` reads every earlier variable listed in `reads[i]` at the same step.
#[derive(Debug, Clone)]
struct RandomChain {
    reads: Vec<Vec<usize>>,
}

impl StencilSolution for RandomChain {
    fn name(&self) -> &str {
        "random_chain"
    }

    fn description(&self) -> String {
        format!("{} chained updates", self.reads.len())
    }

    fn define(&self, b: &mut SolutionBuilder) -> StencilResult<()> {
        b.step_dim("t")?;
        b.domain_dim("x")?;
        let mut vars = Vec::new();
        for i in 0..self.reads.len() {
            vars.push(b.new_var(&format!("v{}", i), &["t", "x"])?);
        }
        for (i, reads) in self.reads.iter().enumerate() {
            let mut terms: Vec<Expr> = vec![vars[i].at(&[0, 0]).into()];
            for &j in reads {
                terms.push(vars[j].at(&[1, 1]).into());
            }
            b.add_eq(vars[i].at(&[1, 0]), Expr::sum(terms) * Expr::Const(0.5))?;
        }
        Ok(())
    }
}

fn random_chain() -> impl Strategy<Value = RandomChain> {
    (1usize..8)
        .prop_flat_map(|n| {
            (0..n)
                .map(|i| proptest::collection::vec(0..i.max(1), 0..3))
                .collect::<Vec<_>>()
        })
        .prop_map(|reads| RandomChain {
            reads: reads
                .into_iter()
                .enumerate()
                .map(|(i, r)| r.into_iter().filter(|&j| j < i).collect())
                .collect(),
        })
}

proptest! {
    #[test]
    fn fold_product_matches_target(
        explicit in proptest::collection::vec(proptest::option::of(1i64..9), 3),
        exp in 0u32..6,
    ) {
        let mut settings = CompilerSettings::new();
        for (d, size) in ["x", "y", "z"].iter().zip(&explicit) {
            if let Some(s) = size {
                settings = settings.fold(d, *s);
            }
        }
        let target = 1usize << exp;
        let fold = compute_fold(&xyz(), &settings, Some(target)).unwrap();
        prop_assert_eq!(fold.product(), target as i64);
        prop_assert!(fold.values().iter().all(|v| *v >= 1));
    }

    #[test]
    fn vectors_cover_domain_once(
        domain in proptest::collection::vec(1i64..20, 2),
        region in proptest::collection::vec(1i64..20, 2),
        block in proptest::collection::vec(1i64..10, 2),
        cluster in proptest::collection::vec(1i64..4, 2),
        fold in proptest::collection::vec(1i64..4, 2),
        inner in 0usize..2,
    ) {
        let lens: Vec<i64> = fold.iter().zip(&cluster).map(|(f, c)| f * c).collect();
        let plan = TilingPlan::new(domain.clone(), fold.clone(), lens)
            .with_region(region)
            .with_block(block)
            .with_inner_dim(inner);
        plan.validate().unwrap();

        let mut seen: BTreeMap<Vec<i64>, usize> = BTreeMap::new();
        for region in plan.regions() {
            for b in plan.blocks(&region) {
                for c in plan.clusters(&b) {
                    for start in plan.vector_starts(&c) {
                        let end = start.iter().zip(&fold).map(|(s, f)| s + f).collect();
                        TileBox::new(start, end).for_each_point(|p| {
                            if c.contains(p) {
                                *seen.entry(p.to_vec()).or_default() += 1;
                            }
                        });
                    }
                }
            }
        }
        prop_assert_eq!(seen.len() as i64, domain[0] * domain[1]);
        prop_assert!(seen.values().all(|n| *n == 1));
    }

    #[test]
    fn bundles_follow_dependences(chain in random_chain()) {
        let settings = CompilerSettings::new()
            .bundle_target("even", "[02468]$")
            .bundle_target("odd", "[13579]$");
        let mut ctx = CompilationContext::new(settings).unwrap();
        ctx.registry_mut().register(Box::new(chain.clone())).unwrap();
        let compiled = ctx.compile("random_chain", None).unwrap();

        let mut position = BTreeMap::new();
        for (i, b) in compiled.bundles.iter().enumerate() {
            for id in &b.members {
                prop_assert!(position.insert(*id, i).is_none());
            }
        }
        prop_assert_eq!(position.len(), chain.reads.len());
        for e in compiled.graph.same_step_edges() {
            prop_assert!(position[&e.producer] < position[&e.consumer]);
        }
    }

    #[test]
    fn tiled_sweep_is_deterministic(
        domain in proptest::collection::vec(1i64..12, 2),
        block in proptest::collection::vec(1i64..7, 2),
        region in proptest::collection::vec(1i64..10, 2),
        steps in 1i64..3,
        first_inner in any::<bool>(),
    ) {
        let settings = CompilerSettings::new().first_inner(first_inner);
        let ctx = CompilationContext::new(settings).unwrap();
        let compiled = ctx.compile("heat2d", Some(4)).unwrap();
        let mut reference = StencilContext::new(&compiled, &domain).unwrap();
        reference.init_diff();
        let mut tiled = reference
            .clone()
            .with_region(&region)
            .unwrap()
            .with_block(&block)
            .unwrap();

        let exec = Executor::new(&compiled, &reference).unwrap();
        exec.calc_steps_ref(&mut reference, 0..steps).unwrap();
        exec.calc_steps_opt(&mut tiled, 0..steps, &NoPrefetch).unwrap();
        prop_assert_eq!(tiled.compare(&reference), 0);
    }
}
