//! Loop bounds of the tiled sweep.
//!
//! The domain is cut into regions, regions into blocks, blocks into
//! clusters and clusters into fold-shaped vectors:
//! ```text
//! for r in partition(domain, region):        // sequential
//!   for b in partition(r, block):            // parallel
//!     for c in partition(b, cluster_len):    // sequential, prefetch c+1, c+2
//!       for v in partition(c, fold):         // one lane set per call
//! ```
//! All bounds come from integer division and multiplication of the extents;
//! a remainder always becomes a final partial tile.

use crate::utils::errors::{SettingsError, StencilResult};
use serde::{Serialize, Deserialize};
use std::fmt;

/// Half-open `[begin, end)` chunks of `step` covering `[begin, end)`.
///
/// The last chunk is shorter when the extent is not a multiple of `step`.
pub fn partition(begin: i64, end: i64, step: i64) -> Vec<(i64, i64)> {
    if end <= begin || step <= 0 {
        return Vec::new();
    }
    let n = (end - begin + step - 1) / step;
    (0..n)
        .map(|i| {
            let b = begin + i * step;
            (b, (b + step).min(end))
        })
        .collect()
}

/// An N-dimensional half-open box.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileBox {
    pub begin: Vec<i64>,
    pub end: Vec<i64>,
}

impl TileBox {
    pub fn new(begin: Vec<i64>, end: Vec<i64>) -> Self {
        Self { begin, end }
    }

    /// The box `[0, sizes)`.
    pub fn from_sizes(sizes: &[i64]) -> Self {
        Self::new(vec![0; sizes.len()], sizes.to_vec())
    }

    pub fn ndims(&self) -> usize {
        self.begin.len()
    }

    pub fn extent(&self, dim: usize) -> i64 {
        (self.end[dim] - self.begin[dim]).max(0)
    }

    pub fn volume(&self) -> i64 {
        (0..self.ndims()).map(|d| self.extent(d)).product()
    }

    pub fn is_empty(&self) -> bool {
        self.volume() == 0
    }

    pub fn contains(&self, point: &[i64]) -> bool {
        point
            .iter()
            .zip(self.begin.iter().zip(&self.end))
            .all(|(p, (b, e))| b <= p && p < e)
    }

    /// Sub-boxes of `sizes` in row-major order (first dim slowest).
    pub fn tiles(&self, sizes: &[i64]) -> Vec<TileBox> {
        let order: Vec<usize> = (0..self.ndims()).collect();
        self.tiles_in_order(sizes, &order)
    }

    /// Sub-boxes of `sizes`; `order` lists the dims from slowest to fastest.
    pub fn tiles_in_order(&self, sizes: &[i64], order: &[usize]) -> Vec<TileBox> {
        let per_dim: Vec<Vec<(i64, i64)>> = (0..self.ndims())
            .map(|d| partition(self.begin[d], self.end[d], sizes.get(d).copied().unwrap_or(1)))
            .collect();
        if per_dim.iter().any(|p| p.is_empty()) {
            return Vec::new();
        }

        let mut out = Vec::new();
        let mut idx = vec![0usize; self.ndims()];
        loop {
            let begin = idx.iter().enumerate().map(|(d, &i)| per_dim[d][i].0).collect();
            let end = idx.iter().enumerate().map(|(d, &i)| per_dim[d][i].1).collect();
            out.push(TileBox::new(begin, end));
            if !advance(&mut idx, order, |d| per_dim[d].len()) {
                break;
            }
        }
        out
    }

    /// Visit every point in row-major order.
    pub fn for_each_point<F: FnMut(&[i64])>(&self, mut f: F) {
        if self.is_empty() {
            return;
        }
        let mut point = self.begin.clone();
        loop {
            f(&point);
            let mut d = point.len();
            loop {
                if d == 0 {
                    return;
                }
                d -= 1;
                point[d] += 1;
                if point[d] < self.end[d] {
                    break;
                }
                point[d] = self.begin[d];
            }
        }
    }
}

impl fmt::Display for TileBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .begin
            .iter()
            .zip(&self.end)
            .map(|(b, e)| format!("{}..{}", b, e))
            .collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

fn advance(idx: &mut [usize], order: &[usize], len: impl Fn(usize) -> usize) -> bool {
    for &d in order.iter().rev() {
        idx[d] += 1;
        if idx[d] < len(d) {
            return true;
        }
        idx[d] = 0;
    }
    false
}

/// Extents of every level of the sweep, one entry per domain dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TilingPlan {
    pub domain: Vec<i64>,
    pub region: Vec<i64>,
    pub block: Vec<i64>,
    /// fold × cluster per dimension
    pub cluster: Vec<i64>,
    pub fold: Vec<i64>,
    /// Dim index that varies fastest in every loop (the unit-stride dim)
    pub inner: usize,
}

impl TilingPlan {
    /// Regions and blocks default to the whole domain.
    pub fn new(domain: Vec<i64>, fold: Vec<i64>, cluster_len: Vec<i64>) -> Self {
        Self {
            region: domain.clone(),
            block: domain.clone(),
            inner: domain.len().saturating_sub(1),
            domain,
            cluster: cluster_len,
            fold,
        }
    }

    /// Make dimension `inner` the fastest-varying one at every level.
    pub fn with_inner_dim(mut self, inner: usize) -> Self {
        self.inner = inner;
        self
    }

    /// Dims from slowest to fastest.
    pub fn loop_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.domain.len()).filter(|d| *d != self.inner).collect();
        if self.inner < self.domain.len() {
            order.push(self.inner);
        }
        order
    }

    pub fn with_region(mut self, region: Vec<i64>) -> Self {
        self.region = region;
        self
    }

    pub fn with_block(mut self, block: Vec<i64>) -> Self {
        self.block = block;
        self
    }

    /// Every level must have one positive size per domain dimension.
    pub fn validate(&self) -> StencilResult<()> {
        let n = self.domain.len();
        for (what, sizes) in [
            ("domain", &self.domain),
            ("region", &self.region),
            ("block", &self.block),
            ("cluster", &self.cluster),
            ("fold", &self.fold),
        ] {
            if sizes.len() != n {
                return Err(SettingsError::new(
                    what,
                    format!("{} sizes given for {} domain dimensions", sizes.len(), n),
                )
                .into());
            }
            if let Some(bad) = sizes.iter().find(|s| **s <= 0) {
                return Err(SettingsError::new(what, format!("size {} is not positive", bad)).into());
            }
        }
        if n > 0 && self.inner >= n {
            return Err(SettingsError::new(
                "inner",
                format!("dimension index {} out of range for {} domain dimensions", self.inner, n),
            )
            .into());
        }
        Ok(())
    }

    pub fn domain_box(&self) -> TileBox {
        TileBox::from_sizes(&self.domain)
    }

    pub fn regions(&self) -> Vec<TileBox> {
        self.domain_box().tiles_in_order(&self.region, &self.loop_order())
    }

    pub fn blocks(&self, region: &TileBox) -> Vec<TileBox> {
        region.tiles_in_order(&self.block, &self.loop_order())
    }

    /// Clusters of a block; consecutive clusters step along the inner dim.
    pub fn clusters(&self, block: &TileBox) -> Vec<TileBox> {
        block.tiles_in_order(&self.cluster, &self.loop_order())
    }

    /// Start of every fold-shaped vector in a cluster; vectors may extend past
    /// the cluster end and are masked by the caller.
    pub fn vector_starts(&self, cluster: &TileBox) -> Vec<Vec<i64>> {
        cluster
            .tiles_in_order(&self.fold, &self.loop_order())
            .into_iter()
            .map(|v| v.begin)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_remainder() {
        assert_eq!(partition(0, 10, 4), vec![(0, 4), (4, 8), (8, 10)]);
        assert_eq!(partition(0, 8, 4), vec![(0, 4), (4, 8)]);
        assert_eq!(partition(3, 3, 4), Vec::<(i64, i64)>::new());
        assert_eq!(partition(0, 3, 8), vec![(0, 3)]);
    }

    #[test]
    fn test_tiles_cover() {
        let domain = TileBox::from_sizes(&[5, 7]);
        let tiles = domain.tiles(&[2, 3]);
        assert_eq!(tiles.len(), 9);
        assert_eq!(tiles.iter().map(|t| t.volume()).sum::<i64>(), 35);
        assert_eq!(tiles[0].to_string(), "[0..2, 0..3]");
        assert_eq!(tiles[8].to_string(), "[4..5, 6..7]");
    }

    #[test]
    fn test_for_each_point() {
        let b = TileBox::new(vec![1, 0], vec![3, 2]);
        let mut pts = Vec::new();
        b.for_each_point(|p| pts.push(p.to_vec()));
        assert_eq!(pts, vec![vec![1, 0], vec![1, 1], vec![2, 0], vec![2, 1]]);
        assert!(b.contains(&[2, 1]));
        assert!(!b.contains(&[3, 1]));
    }

    #[test]
    fn test_plan_levels() {
        let plan = TilingPlan::new(vec![10, 8], vec![1, 4], vec![1, 8])
            .with_region(vec![10, 8])
            .with_block(vec![3, 8]);
        plan.validate().unwrap();
        let regions = plan.regions();
        assert_eq!(regions.len(), 1);
        let blocks = plan.blocks(&regions[0]);
        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[3].extent(0), 1);
        let clusters = plan.clusters(&blocks[0]);
        assert_eq!(clusters.len(), 3);
        assert_eq!(plan.vector_starts(&clusters[0]), vec![vec![0, 0], vec![0, 4]]);

        let bad = TilingPlan::new(vec![10], vec![0], vec![1]);
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_first_dim_inner() {
        let plan = TilingPlan::new(vec![4, 4], vec![1, 1], vec![2, 2]).with_inner_dim(0);
        plan.validate().unwrap();
        assert_eq!(plan.loop_order(), vec![1, 0]);
        let block = plan.domain_box();
        let clusters = plan.clusters(&block);
        assert_eq!(clusters[0].begin, vec![0, 0]);
        assert_eq!(clusters[1].begin, vec![2, 0]);
        assert_eq!(clusters[2].begin, vec![0, 2]);

        assert!(TilingPlan::new(vec![4], vec![1], vec![1]).with_inner_dim(1).validate().is_err());
    }
}
