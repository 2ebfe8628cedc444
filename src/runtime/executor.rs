//! Interpreted execution of a compiled solution.
//!
//! [`Executor::calc_steps_ref`] evaluates every bundle point by point over
//! the whole domain. [`Executor::calc_steps_opt`] runs the tiled sweep:
//! regions in order, the blocks of a region in parallel on the rayon pool,
//! clusters in order within a block, and one fold-shaped lane set per vector
//! call with lanes outside the block masked off.
//!
//! Every level reads from the grids as they were when the bundle's sweep
//! began; the writes of all blocks are applied once the sweep is done, so
//! both entry points produce identical grids.

use crate::context::CompiledSolution;
use crate::ir::dims::DimKind;
use crate::ir::expr::{Expr, Index, VarPoint};
use crate::runtime::context::StencilContext;
use crate::runtime::grid::Grid;
use crate::runtime::tiling::{TileBox, TilingPlan};
use crate::utils::errors::{StencilError, StencilResult};
use log::{debug, trace};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Cache level targeted by a prefetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheLevel {
    /// Next cluster
    L1,
    /// Cluster after next
    L2,
}

/// Advisory prefetch hook called before each cluster is computed.
///
/// Implementations must not change grid contents.
pub trait Prefetcher: Sync {
    fn prefetch(&self, level: CacheLevel, step: i64, cluster: &TileBox);
}

/// Prefetcher that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPrefetch;

impl Prefetcher for NoPrefetch {
    #[inline]
    fn prefetch(&self, _level: CacheLevel, _step: i64, _cluster: &TileBox) {}
}

/// Prefetcher that counts requests per level.
#[derive(Debug, Default)]
pub struct CountingPrefetch {
    pub l1: AtomicUsize,
    pub l2: AtomicUsize,
}

impl CountingPrefetch {
    pub fn counts(&self) -> (usize, usize) {
        (self.l1.load(Ordering::Relaxed), self.l2.load(Ordering::Relaxed))
    }
}

impl Prefetcher for CountingPrefetch {
    fn prefetch(&self, level: CacheLevel, _step: i64, _cluster: &TileBox) {
        let counter = match level {
            CacheLevel::L1 => &self.l1,
            CacheLevel::L2 => &self.l2,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Resolved location of a var-point relative to the evaluation point.
#[derive(Debug, Clone)]
struct Access {
    grid: usize,
    step_offset: i64,
    coords: Vec<Coord>,
}

#[derive(Debug, Clone, Copy)]
enum Coord {
    /// Evaluation point along a domain dim plus an offset
    Domain { pos: usize, offset: i64 },
    /// Fixed misc index
    Misc(i64),
}

impl Access {
    fn coords_at(&self, point: &[i64]) -> Vec<i64> {
        self.coords
            .iter()
            .map(|c| match *c {
                Coord::Domain { pos, offset } => point[pos] + offset,
                Coord::Misc(v) => v,
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
struct EqKernel {
    target: Access,
    rhs: Expr,
    reads: BTreeMap<VarPoint, Access>,
}

#[derive(Debug, Clone)]
struct BundleKernel {
    name: String,
    eqs: Vec<EqKernel>,
}

/// A pending store into a grid.
#[derive(Debug, Clone, Copy)]
struct Write {
    grid: usize,
    offset: usize,
    value: f64,
}

/// Bundles of a compiled solution resolved against a context's grids.
#[derive(Debug, Clone)]
pub struct Executor {
    step_dim: String,
    bundles: Vec<BundleKernel>,
}

impl Executor {
    pub fn new(compiled: &CompiledSolution, ctx: &StencilContext) -> StencilResult<Self> {
        let step_dim = compiled.step_dim().to_string();
        let mut bundles = Vec::with_capacity(compiled.bundles.len());
        for bundle in &compiled.bundles {
            let mut eqs = Vec::new();
            for eq in compiled.bundle_equations(bundle) {
                let target = resolve(&eq.target, ctx, &step_dim, compiled)?;
                let mut reads = BTreeMap::new();
                for p in eq.rhs.point_set() {
                    let access = resolve(&p, ctx, &step_dim, compiled)?;
                    reads.insert(p, access);
                }
                eqs.push(EqKernel {
                    target,
                    rhs: eq.rhs.clone(),
                    reads,
                });
            }
            bundles.push(BundleKernel {
                name: bundle.name.clone(),
                eqs,
            });
        }
        Ok(Self { step_dim, bundles })
    }

    pub fn step_dim(&self) -> &str {
        &self.step_dim
    }

    /// Reference sweep: every bundle over the whole domain, point by point.
    pub fn calc_steps_ref(&self, ctx: &mut StencilContext, steps: Range<i64>) -> StencilResult<()> {
        let domain = ctx.plan.domain_box();
        for t in steps {
            for bundle in &self.bundles {
                let mut writes = Vec::new();
                calc_points(bundle, &ctx.grids, t, &domain, None, &mut writes)?;
                apply(&mut ctx.grids, writes);
            }
        }
        Ok(())
    }

    /// Tiled sweep with the given prefetcher.
    pub fn calc_steps_opt<P: Prefetcher>(
        &self,
        ctx: &mut StencilContext,
        steps: Range<i64>,
        prefetcher: &P,
    ) -> StencilResult<()> {
        let plan = ctx.plan.clone();
        let regions = plan.regions();
        for t in steps {
            for bundle in &self.bundles {
                trace!("step {} bundle {}", t, bundle.name);
                let mut pending = Vec::new();
                for region in &regions {
                    let grids = &ctx.grids;
                    let blocks = plan.blocks(region);
                    let writes = blocks
                        .par_iter()
                        .map(|block| calc_block(bundle, grids, t, block, &plan, prefetcher))
                        .collect::<StencilResult<Vec<_>>>()?;
                    pending.extend(writes.into_iter().flatten());
                }
                apply(&mut ctx.grids, pending);
            }
        }
        debug!("finished tiled sweep over {} regions", regions.len());
        Ok(())
    }
}

fn resolve(
    p: &VarPoint,
    ctx: &StencilContext,
    step_dim: &str,
    compiled: &CompiledSolution,
) -> StencilResult<Access> {
    let grid = ctx
        .grid_index(&p.var)
        .ok_or_else(|| StencilError::Internal(format!("no grid for '{}'", p.var)))?;
    let mut step_offset = 0;
    let mut coords = Vec::new();
    for idx in &p.indices {
        match idx {
            Index::Offset { dim, offset } if dim == step_dim => step_offset = *offset,
            Index::Offset { dim, offset } => {
                if compiled.solution.dims.kind_of(dim) != Some(DimKind::Domain) {
                    return Err(StencilError::Internal(format!("'{}' is not a domain dimension", dim)));
                }
                let pos = ctx
                    .dims
                    .iter()
                    .position(|d| d == dim)
                    .ok_or_else(|| StencilError::Internal(format!("no size for dimension '{}'", dim)))?;
                coords.push(Coord::Domain { pos, offset: *offset });
            }
            Index::Const { value, .. } => coords.push(Coord::Misc(*value)),
        }
    }
    Ok(Access {
        grid,
        step_offset,
        coords,
    })
}

fn calc_block<P: Prefetcher>(
    bundle: &BundleKernel,
    grids: &[Grid],
    t: i64,
    block: &TileBox,
    plan: &TilingPlan,
    prefetcher: &P,
) -> StencilResult<Vec<Write>> {
    let clusters = plan.clusters(block);
    let mut out = Vec::with_capacity(block.volume() as usize * bundle.eqs.len());
    for (i, cluster) in clusters.iter().enumerate() {
        if let Some(next) = clusters.get(i + 1) {
            prefetcher.prefetch(CacheLevel::L1, t, next);
        }
        if let Some(after) = clusters.get(i + 2) {
            prefetcher.prefetch(CacheLevel::L2, t, after);
        }
        for start in plan.vector_starts(cluster) {
            calc_vector(bundle, grids, t, &start, &plan.fold, cluster, &mut out)?;
        }
    }
    Ok(out)
}

/// One fold-shaped lane set starting at `start`; lanes outside `mask` are skipped.
fn calc_vector(
    bundle: &BundleKernel,
    grids: &[Grid],
    t: i64,
    start: &[i64],
    fold: &[i64],
    mask: &TileBox,
    out: &mut Vec<Write>,
) -> StencilResult<()> {
    let end = start.iter().zip(fold).map(|(s, f)| s + f).collect();
    let lanes = TileBox::new(start.to_vec(), end);
    calc_points(bundle, grids, t, &lanes, Some(mask), out)
}

fn calc_points(
    bundle: &BundleKernel,
    grids: &[Grid],
    t: i64,
    points: &TileBox,
    mask: Option<&TileBox>,
    out: &mut Vec<Write>,
) -> StencilResult<()> {
    let mut result = Ok(());
    points.for_each_point(|p| {
        if result.is_err() || mask.is_some_and(|m| !m.contains(p)) {
            return;
        }
        for eq in &bundle.eqs {
            match eval_point(eq, grids, t, p) {
                Ok(w) => out.push(w),
                Err(e) => {
                    result = Err(e);
                    return;
                }
            }
        }
    });
    result
}

fn eval_point(eq: &EqKernel, grids: &[Grid], t: i64, point: &[i64]) -> StencilResult<Write> {
    let mut missing: Option<String> = None;
    let value = eq.rhs.eval(&mut |vp: &VarPoint| {
        let found = eq.reads.get(vp).and_then(|acc| {
            grids[acc.grid].get(t + acc.step_offset, &acc.coords_at(point))
        });
        match found {
            Some(v) => v,
            None => {
                missing.get_or_insert_with(|| vp.to_string());
                f64::NAN
            }
        }
    });
    if let Some(vp) = missing {
        return Err(StencilError::Internal(format!(
            "read of {} at step {} point {:?} is outside its grid",
            vp, t, point
        )));
    }

    let target = &eq.target;
    let offset = grids[target.grid]
        .offset(t + target.step_offset, &target.coords_at(point))
        .ok_or_else(|| StencilError::Internal(format!("write at point {:?} is outside its grid", point)))?;
    Ok(Write {
        grid: target.grid,
        offset,
        value,
    })
}

fn apply(grids: &mut [Grid], writes: Vec<Write>) {
    for w in writes {
        grids[w.grid].store(w.offset, w.value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CompilationContext;
    use crate::settings::CompilerSettings;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(CacheLevel, Vec<i64>)>>,
    }

    impl Prefetcher for Recorder {
        fn prefetch(&self, level: CacheLevel, _step: i64, cluster: &TileBox) {
            self.seen.lock().unwrap().push((level, cluster.begin.clone()));
        }
    }

    fn heat(fold_x: i64) -> CompiledSolution {
        let settings = CompilerSettings::new().fold("x", fold_x).fold("y", 1);
        let ctx = CompilationContext::new(settings).unwrap();
        ctx.compile("heat2d", None).unwrap()
    }

    #[test]
    fn test_opt_matches_ref() {
        let compiled = heat(2);
        let mut reference = StencilContext::new(&compiled, &[9, 7]).unwrap();
        reference.init_diff();
        let mut tiled = reference.clone().with_block(&[4, 3]).unwrap().with_region(&[5, 7]).unwrap();

        let exec = Executor::new(&compiled, &reference).unwrap();
        exec.calc_steps_ref(&mut reference, 0..3).unwrap();
        exec.calc_steps_opt(&mut tiled, 0..3, &NoPrefetch).unwrap();
        assert_eq!(tiled.compare(&reference), 0);

        let mut untouched = StencilContext::new(&compiled, &[9, 7]).unwrap();
        untouched.init_diff();
        assert!(untouched.compare(&reference) > 0);
    }

    #[test]
    fn test_first_inner_prefetch_and_layout() {
        let settings = CompilerSettings::new().fold("x", 1).fold("y", 1).first_inner(true);
        let compiled = CompilationContext::new(settings)
            .unwrap()
            .compile("heat2d", None)
            .unwrap();
        let mut reference = StencilContext::new(&compiled, &[4, 1]).unwrap();
        reference.init_diff();
        let mut tiled = reference.clone();

        let exec = Executor::new(&compiled, &reference).unwrap();
        let rec = Recorder::default();
        exec.calc_steps_ref(&mut reference, 0..1).unwrap();
        exec.calc_steps_opt(&mut tiled, 0..1, &rec).unwrap();
        assert_eq!(tiled.compare(&reference), 0);

        // Clusters of one point step along x, the unit-stride dim.
        let seen = rec.seen.into_inner().unwrap();
        assert_eq!(seen[0], (CacheLevel::L1, vec![1, 0]));
        assert_eq!(seen[1], (CacheLevel::L2, vec![2, 0]));

        let grid = tiled.grid("temp").unwrap();
        assert_eq!(grid.offset(0, &[1, 0]).unwrap() - grid.offset(0, &[0, 0]).unwrap(), 1);
    }

    #[test]
    fn test_prefetch_order() {
        let compiled = heat(1);
        let mut ctx = StencilContext::new(&compiled, &[1, 4]).unwrap();
        ctx.init_same();
        let exec = Executor::new(&compiled, &ctx).unwrap();
        let rec = Recorder::default();
        exec.calc_steps_opt(&mut ctx, 0..1, &rec).unwrap();
        let seen = rec.seen.into_inner().unwrap();
        // Four single-point clusters: L1 for 1..=3, L2 for 2..=3.
        assert_eq!(seen.iter().filter(|(l, _)| *l == CacheLevel::L1).count(), 3);
        assert_eq!(seen.iter().filter(|(l, _)| *l == CacheLevel::L2).count(), 2);
        assert_eq!(seen[0], (CacheLevel::L1, vec![0, 1]));
        assert_eq!(seen[1], (CacheLevel::L2, vec![0, 2]));
    }
}
