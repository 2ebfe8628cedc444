//! Stencil variables (grids).

use crate::ir::dims::DimKind;
use crate::ir::expr::{Index, VarPoint};
use serde::{Serialize, Deserialize};
use std::collections::BTreeMap;

/// A variable indexed by an ordered list of dimensions.
///
/// Halo, step allocation and padding start at their minimum and are raised
/// during finalization to cover every read of the variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    /// Dimensions in indexing order
    pub dims: Vec<(String, DimKind)>,
    /// Halo width per domain dimension
    pub halo: BTreeMap<String, i64>,
    /// Number of step slots kept in memory
    pub step_alloc: i64,
    /// Halo rounded up to the fold length, per domain dimension
    pub pad: BTreeMap<String, i64>,
    /// Inclusive index range used along each misc dimension
    pub misc_range: BTreeMap<String, (i64, i64)>,
}

impl Variable {
    pub fn new(name: impl Into<String>, dims: Vec<(String, DimKind)>) -> Self {
        let halo = dims
            .iter()
            .filter(|(_, k)| *k == DimKind::Domain)
            .map(|(d, _)| (d.clone(), 0))
            .collect::<BTreeMap<_, _>>();
        let pad = halo.clone();
        let step_alloc = if dims.iter().any(|(_, k)| *k == DimKind::Step) { 1 } else { 0 };
        Self {
            name: name.into(),
            dims,
            halo,
            step_alloc,
            pad,
            misc_range: BTreeMap::new(),
        }
    }

    /// Build a var-point with one value per dimension, in indexing order.
    ///
    /// Step and domain values are offsets from the evaluation point; misc
    /// values are absolute indices. Missing trailing values default to 0.
    pub fn at(&self, values: &[i64]) -> VarPoint {
        let indices = self
            .dims
            .iter()
            .enumerate()
            .map(|(i, (dim, kind))| {
                let v = values.get(i).copied().unwrap_or(0);
                match kind {
                    DimKind::Misc => Index::Const { dim: dim.clone(), value: v },
                    _ => Index::Offset { dim: dim.clone(), offset: v },
                }
            })
            .collect();
        VarPoint::new(self.name.clone(), indices)
    }

    pub fn has_dim(&self, dim: &str) -> bool {
        self.dims.iter().any(|(d, _)| d == dim)
    }

    pub fn has_step_dim(&self) -> bool {
        self.dims.iter().any(|(_, k)| *k == DimKind::Step)
    }

    pub fn domain_dims(&self) -> Vec<&str> {
        self.dims_of(DimKind::Domain)
    }

    pub fn misc_dims(&self) -> Vec<&str> {
        self.dims_of(DimKind::Misc)
    }

    fn dims_of(&self, kind: DimKind) -> Vec<&str> {
        self.dims
            .iter()
            .filter(|(_, k)| *k == kind)
            .map(|(d, _)| d.as_str())
            .collect()
    }

    pub fn halo_of(&self, dim: &str) -> i64 {
        self.halo.get(dim).copied().unwrap_or(0)
    }

    pub fn pad_of(&self, dim: &str) -> i64 {
        self.pad.get(dim).copied().unwrap_or(0)
    }

    /// Raise the halo along `dim` to cover a read at `offset`.
    pub fn require_halo(&mut self, dim: &str, offset: i64) {
        if let Some(h) = self.halo.get_mut(dim) {
            *h = (*h).max(offset.abs());
        }
    }

    /// Raise the step allocation to cover reads `distance` steps back.
    pub fn require_step_distance(&mut self, distance: i64) {
        if self.has_step_dim() {
            self.step_alloc = self.step_alloc.max(distance.abs() + 1);
        }
    }

    /// Widen the misc range to include `value`.
    pub fn require_misc(&mut self, dim: &str, value: i64) {
        let entry = self.misc_range.entry(dim.to_string()).or_insert((value, value));
        entry.0 = entry.0.min(value);
        entry.1 = entry.1.max(value);
    }

    /// Number of indices used along a misc dimension.
    pub fn misc_size(&self, dim: &str) -> i64 {
        self.misc_range
            .get(dim)
            .map(|(lo, hi)| hi - lo + 1)
            .unwrap_or(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field() -> Variable {
        Variable::new(
            "f",
            vec![
                ("t".to_string(), DimKind::Step),
                ("x".to_string(), DimKind::Domain),
                ("c".to_string(), DimKind::Misc),
            ],
        )
    }

    #[test]
    fn test_at() {
        let f = field();
        let p = f.at(&[1, -2, 3]);
        assert_eq!(p.to_string(), "f(t+1, x-2, c=3)");
        assert_eq!(f.at(&[]).to_string(), "f(t, x, c=0)");
    }

    #[test]
    fn test_requirements() {
        let mut f = field();
        assert_eq!(f.step_alloc, 1);
        f.require_halo("x", -3);
        f.require_halo("x", 2);
        f.require_step_distance(1);
        f.require_misc("c", 0);
        f.require_misc("c", 2);
        assert_eq!(f.halo_of("x"), 3);
        assert_eq!(f.step_alloc, 2);
        assert_eq!(f.misc_size("c"), 3);
        assert_eq!(f.domain_dims(), vec!["x"]);
    }
}
