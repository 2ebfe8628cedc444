//! Vector folding and clustering.
//!
//! A fold gives the number of SIMD lanes along each domain dimension; the
//! product of the fold must equal the target vector length. A cluster gives
//! the number of folded vectors evaluated together along each dimension.
//!
//! Fold adjustment rule, applied when the requested sizes do not multiply
//! out to the target length:
//! ```text
//! P = product of requested sizes, g = gcd(P, target)
//! shrink by P/g: walk dims from the unit-stride one outward,
//!                dividing each size by gcd(size, remaining factor)
//! grow by target/g: prime factors, largest first, multiplied round-robin
//!                   onto unspecified dims (or all dims if none),
//!                   unit-stride dim first
//! ```

use crate::ir::dims::{DimKind, Dimensions};
use crate::settings::CompilerSettings;
use crate::utils::errors::{GeometryError, GeometryErrorKind, StencilError, StencilResult};
use log::{debug, warn};
use num_integer::Integer;
use serde::{Serialize, Deserialize};
use std::fmt;

/// Ordered (domain dimension, size) pairs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DimTuple {
    pub sizes: Vec<(String, i64)>,
}

impl DimTuple {
    /// All dims set to 1.
    pub fn ones(dims: &[&str]) -> Self {
        Self {
            sizes: dims.iter().map(|d| (d.to_string(), 1)).collect(),
        }
    }

    pub fn get(&self, dim: &str) -> i64 {
        self.sizes
            .iter()
            .find(|(d, _)| d == dim)
            .map(|(_, s)| *s)
            .unwrap_or(1)
    }

    fn get_mut(&mut self, dim: &str) -> Option<&mut i64> {
        self.sizes.iter_mut().find(|(d, _)| d == dim).map(|(_, s)| s)
    }

    pub fn product(&self) -> i64 {
        self.sizes.iter().map(|(_, s)| *s).product()
    }

    /// Product of the sizes, or `None` on overflow.
    pub fn checked_product(&self) -> Option<i64> {
        self.sizes.iter().try_fold(1i64, |acc, (_, s)| acc.checked_mul(*s))
    }

    pub fn dims(&self) -> impl Iterator<Item = &str> {
        self.sizes.iter().map(|(d, _)| d.as_str())
    }

    /// Sizes in dimension order.
    pub fn values(&self) -> Vec<i64> {
        self.sizes.iter().map(|(_, s)| *s).collect()
    }

    /// Number of dimensions with more than one element.
    pub fn num_multi(&self) -> usize {
        self.sizes.iter().filter(|(_, s)| *s > 1).count()
    }
}

impl fmt::Display for DimTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.sizes.iter().map(|(d, s)| format!("{}={}", d, s)).collect();
        write!(f, "{}", parts.join(", "))
    }
}

/// SIMD lanes per domain dimension.
pub type FoldTuple = DimTuple;
/// Vectors per cluster per domain dimension.
pub type ClusterTuple = DimTuple;

/// Fold and cluster chosen for one compilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub fold: FoldTuple,
    pub cluster: ClusterTuple,
}

impl Geometry {
    pub fn new(fold: FoldTuple, cluster: ClusterTuple) -> Self {
        Self { fold, cluster }
    }

    /// Elements per cluster along `dim`.
    pub fn cluster_length(&self, dim: &str) -> i64 {
        self.fold.get(dim) * self.cluster.get(dim)
    }

    /// Cluster lengths in domain-dimension order.
    pub fn cluster_lengths(&self) -> Vec<i64> {
        self.fold.dims().map(|d| self.cluster_length(d)).collect()
    }

    pub fn vector_len(&self) -> i64 {
        self.fold.product()
    }

    pub fn vectors_per_cluster(&self) -> i64 {
        self.cluster.product()
    }
}

/// Compute the fold for a target vector length.
///
/// `target_len` is `None` for formats without a hardware vector length; the
/// requested sizes are then used as given.
pub fn compute_fold(
    dims: &Dimensions,
    settings: &CompilerSettings,
    target_len: Option<usize>,
) -> StencilResult<FoldTuple> {
    let domain = dims.ordered_domain_dims();
    check_options(dims, &settings.fold_options, "fold")?;

    let mut fold = DimTuple::ones(&domain);
    let mut explicit: Vec<&str> = Vec::new();
    for (dim, size) in &settings.fold_options {
        if let Some(s) = fold.get_mut(dim) {
            *s = *size;
            explicit.push(dim.as_str());
        }
    }

    let requested = fold
        .checked_product()
        .ok_or_else(|| overflow_err("fold", &fold))?;
    let target = match target_len {
        Some(t) => i64::try_from(t).map_err(|_| {
            geometry_err(
                GeometryErrorKind::Overflow,
                format!("target vector length {} is too large", t),
            )
        })?,
        None => requested,
    };
    if target <= 0 {
        return Err(geometry_err(
            GeometryErrorKind::NonPositiveSize,
            format!("target vector length {} is not positive", target),
        ));
    }
    if domain.is_empty() {
        if target == 1 {
            return Ok(fold);
        }
        return Err(geometry_err(
            GeometryErrorKind::Inexpressible,
            format!("vector length {} needs at least one domain dimension", target),
        ));
    }
    if requested == target {
        debug!("fold {} matches vector length {}", fold, target);
        return Ok(fold);
    }

    let g = requested.gcd(&target);
    let order = dims.innermost_first();
    if !explicit.is_empty() {
        warn!(
            "fold {} has {} lanes; adjusting to vector length {}",
            fold, requested, target
        );
    }

    let mut shrink = requested / g;
    for dim in &order {
        if shrink == 1 {
            break;
        }
        if let Some(s) = fold.get_mut(dim) {
            let c = s.gcd(&shrink);
            *s /= c;
            shrink /= c;
        }
    }
    if shrink != 1 {
        return Err(StencilError::Internal(format!(
            "fold shrink left factor {} for {}",
            shrink, fold
        )));
    }

    let mut candidates: Vec<&str> = order
        .iter()
        .copied()
        .filter(|d| !explicit.contains(d))
        .collect();
    if candidates.is_empty() {
        candidates = order.clone();
    }
    for (i, p) in prime_factors(target / g).into_iter().enumerate() {
        let dim = candidates[i % candidates.len()];
        if let Some(s) = fold.get_mut(dim) {
            *s *= p;
        }
    }

    debug_assert_eq!(fold.product(), target);
    debug!("fold {} for vector length {}", fold, target);
    Ok(fold)
}

/// Compute the cluster multipliers; unspecified dims default to 1.
pub fn compute_cluster(dims: &Dimensions, settings: &CompilerSettings) -> StencilResult<ClusterTuple> {
    check_options(dims, &settings.cluster_options, "cluster")?;
    let mut cluster = DimTuple::ones(&dims.ordered_domain_dims());
    for (dim, size) in &settings.cluster_options {
        if let Some(s) = cluster.get_mut(dim) {
            *s = *size;
        }
    }
    Ok(cluster)
}

/// Compute both tuples.
pub fn compute_geometry(
    dims: &Dimensions,
    settings: &CompilerSettings,
    target_len: Option<usize>,
) -> StencilResult<Geometry> {
    let fold = compute_fold(dims, settings, target_len)?;
    let cluster = compute_cluster(dims, settings)?;
    cluster
        .checked_product()
        .ok_or_else(|| overflow_err("cluster", &cluster))?;
    for dim in fold.dims() {
        if fold.get(dim).checked_mul(cluster.get(dim)).is_none() {
            return Err(geometry_err(
                GeometryErrorKind::Overflow,
                format!("cluster length along '{}' does not fit in 64 bits", dim),
            ));
        }
    }
    Ok(Geometry::new(fold, cluster))
}

fn check_options(dims: &Dimensions, options: &[(String, i64)], what: &str) -> StencilResult<()> {
    for (dim, size) in options {
        if dims.kind_of(dim) != Some(DimKind::Domain) {
            return Err(geometry_err(
                GeometryErrorKind::UnknownDimension,
                format!("{} size given for '{}', which is not a domain dimension", what, dim),
            ));
        }
        if *size <= 0 {
            return Err(geometry_err(
                GeometryErrorKind::NonPositiveSize,
                format!("{} size {} for '{}' must be positive", what, size, dim),
            ));
        }
    }
    Ok(())
}

fn geometry_err(kind: GeometryErrorKind, message: String) -> StencilError {
    GeometryError { message, kind }.into()
}

fn overflow_err(what: &str, tuple: &DimTuple) -> StencilError {
    geometry_err(
        GeometryErrorKind::Overflow,
        format!("{} {} has more elements than fit in 64 bits", what, tuple),
    )
}

/// Prime factors, largest first.
fn prime_factors(mut n: i64) -> Vec<i64> {
    let mut factors = Vec::new();
    let mut p = 2;
    while p * p <= n {
        while n % p == 0 {
            factors.push(p);
            n /= p;
        }
        p += 1;
    }
    if n > 1 {
        factors.push(n);
    }
    factors.reverse();
    factors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xyz() -> Dimensions {
        let mut dims = Dimensions::new();
        dims.declare("t", DimKind::Step).unwrap();
        for d in ["x", "y", "z"] {
            dims.declare(d, DimKind::Domain).unwrap();
        }
        dims
    }

    #[test]
    fn test_fold_exact() {
        let settings = CompilerSettings::new().fold("x", 4).fold("y", 4);
        let fold = compute_fold(&xyz(), &settings, Some(16)).unwrap();
        assert_eq!(fold.values(), vec![4, 4, 1]);
        assert_eq!(fold.product(), 16);
    }

    #[test]
    fn test_fold_default_fill() {
        let fold = compute_fold(&xyz(), &CompilerSettings::new(), Some(16)).unwrap();
        assert_eq!(fold.values(), vec![2, 2, 4]);

        let fold = compute_fold(&xyz().with_first_inner(true), &CompilerSettings::new(), Some(8)).unwrap();
        assert_eq!(fold.values(), vec![2, 2, 2]);
    }

    #[test]
    fn test_fold_undershoot_fills_unspecified() {
        let settings = CompilerSettings::new().fold("x", 2);
        let fold = compute_fold(&xyz(), &settings, Some(16)).unwrap();
        assert_eq!(fold.values(), vec![2, 2, 4]);
    }

    #[test]
    fn test_fold_overshoot_shrinks_innermost() {
        let settings = CompilerSettings::new().fold("x", 4).fold("y", 4).fold("z", 2);
        let fold = compute_fold(&xyz(), &settings, Some(8)).unwrap();
        assert_eq!(fold.values(), vec![4, 2, 1]);
    }

    #[test]
    fn test_fold_incommensurate() {
        let settings = CompilerSettings::new().fold("x", 3).fold("y", 1).fold("z", 1);
        let fold = compute_fold(&xyz(), &settings, Some(8)).unwrap();
        assert_eq!(fold.product(), 8);
        assert_eq!(fold.values(), vec![2, 2, 2]);
    }

    #[test]
    fn test_fold_overflow_rejected() {
        let huge = CompilerSettings::new().fold("x", 1 << 32).fold("y", 1 << 32);
        let err = compute_fold(&xyz(), &huge, Some(16)).unwrap_err();
        assert_eq!(err.short_name(), "InvalidGeometry");
        assert!(err.to_string().contains("64 bits"), "{}", err);

        let wide = CompilerSettings::new().fold("x", 2).cluster("x", i64::MAX);
        let err = compute_geometry(&xyz(), &wide, None).unwrap_err();
        assert_eq!(err.short_name(), "InvalidGeometry");
    }

    #[test]
    fn test_fold_non_power_of_two_target() {
        let settings = CompilerSettings::new().fold("x", 4).fold("y", 4);
        let fold = compute_fold(&xyz(), &settings, Some(6)).unwrap();
        assert_eq!(fold.product(), 6);
        assert_eq!(fold.values(), vec![2, 1, 3]);
    }

    #[test]
    fn test_fold_without_target() {
        let settings = CompilerSettings::new().fold("y", 3);
        let fold = compute_fold(&xyz(), &settings, None).unwrap();
        assert_eq!(fold.values(), vec![1, 3, 1]);
    }

    #[test]
    fn test_fold_errors() {
        let bad = CompilerSettings::new().fold("x", 0);
        assert_eq!(compute_fold(&xyz(), &bad, Some(8)).unwrap_err().short_name(), "InvalidGeometry");

        let bad = CompilerSettings::new().fold("t", 2);
        assert!(compute_fold(&xyz(), &bad, Some(8)).is_err());

        let mut only_step = Dimensions::new();
        only_step.declare("t", DimKind::Step).unwrap();
        assert!(compute_fold(&only_step, &CompilerSettings::new(), Some(4)).is_err());
        assert!(compute_fold(&only_step, &CompilerSettings::new(), Some(1)).is_ok());
    }

    #[test]
    fn test_prime_target_single_dim() {
        let mut dims = Dimensions::new();
        dims.declare("t", DimKind::Step).unwrap();
        dims.declare("x", DimKind::Domain).unwrap();
        let fold = compute_fold(&dims, &CompilerSettings::new(), Some(7)).unwrap();
        assert_eq!(fold.values(), vec![7]);
    }

    #[test]
    fn test_cluster_and_length() {
        let settings = CompilerSettings::new().fold("x", 4).fold("y", 4).cluster("y", 2);
        let geom = compute_geometry(&xyz(), &settings, Some(16)).unwrap();
        assert_eq!(geom.cluster.values(), vec![1, 2, 1]);
        assert_eq!(geom.cluster_length("y"), 8);
        assert_eq!(geom.cluster_lengths(), vec![4, 8, 1]);
        assert_eq!(geom.vectors_per_cluster(), 2);

        let bad = CompilerSettings::new().cluster("x", -1);
        assert!(compute_cluster(&xyz(), &bad).is_err());
    }

    #[test]
    fn test_prime_factors() {
        assert_eq!(prime_factors(12), vec![3, 2, 2]);
        assert_eq!(prime_factors(1), Vec::<i64>::new());
        assert_eq!(prime_factors(13), vec![13]);
    }
}
