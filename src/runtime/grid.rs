//! Dense storage for one variable.
//!
//! Domain dimensions are allocated with padding on both sides, so index
//! `-pad .. size + pad` is valid. The step dimension is a ring of
//! `step_alloc` slots addressed by `step mod step_alloc`. Misc dimensions
//! cover the range of constant indices used by the equations.

use crate::ir::dims::DimKind;
use crate::ir::var::Variable;
use serde::{Serialize, Deserialize};
use std::collections::BTreeMap;

/// One non-step dimension of a grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridDim {
    pub name: String,
    pub kind: DimKind,
    /// Lowest valid index
    pub first: i64,
    /// Number of valid indices
    pub len: i64,
}

#[derive(Debug, Clone)]
pub struct Grid {
    pub name: String,
    /// Non-step dimensions in the variable's index order
    dims: Vec<GridDim>,
    strides: Vec<usize>,
    step_slots: i64,
    step_stride: usize,
    elem_bytes: usize,
    data: Vec<f64>,
}

impl Grid {
    /// Allocate a zeroed grid for `var` over a domain of `domain_sizes`.
    ///
    /// `unit_stride` is the domain dim laid out innermost among the domain
    /// dims; with `inner_misc` the misc dimensions go inside it.
    pub fn new(
        var: &Variable,
        domain_sizes: &BTreeMap<String, i64>,
        unit_stride: Option<&str>,
        inner_misc: bool,
        elem_bytes: usize,
    ) -> Self {
        let dims: Vec<GridDim> = var
            .dims
            .iter()
            .filter(|(_, k)| *k != DimKind::Step)
            .map(|(name, kind)| match kind {
                DimKind::Misc => {
                    let (lo, hi) = var.misc_range.get(name).copied().unwrap_or((0, 0));
                    GridDim { name: name.clone(), kind: *kind, first: lo, len: hi - lo + 1 }
                }
                _ => {
                    let pad = var.pad_of(name).max(var.halo_of(name));
                    let size = domain_sizes.get(name).copied().unwrap_or(1);
                    GridDim { name: name.clone(), kind: *kind, first: -pad, len: size + 2 * pad }
                }
            })
            .collect();

        let layout = layout_order(&dims, unit_stride, inner_misc);

        let mut strides = vec![0usize; dims.len()];
        let mut stride = 1usize;
        for &i in layout.iter().rev() {
            strides[i] = stride;
            stride *= dims[i].len.max(1) as usize;
        }
        let step_slots = if var.has_step_dim() { var.step_alloc.max(1) } else { 1 };
        let len = stride * step_slots as usize;

        Self {
            name: var.name.clone(),
            dims,
            strides,
            step_slots,
            step_stride: stride,
            elem_bytes,
            data: vec![0.0; len],
        }
    }

    pub fn dims(&self) -> &[GridDim] {
        &self.dims
    }

    pub fn step_slots(&self) -> i64 {
        self.step_slots
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn num_bytes(&self) -> usize {
        self.data.len() * self.elem_bytes
    }

    /// Storage index of `coords` (one per non-step dim) at `step`, or `None`
    /// outside the allocation.
    pub fn offset(&self, step: i64, coords: &[i64]) -> Option<usize> {
        if coords.len() != self.dims.len() {
            return None;
        }
        let mut off = step.rem_euclid(self.step_slots) as usize * self.step_stride;
        for ((c, dim), stride) in coords.iter().zip(&self.dims).zip(&self.strides) {
            let rel = c - dim.first;
            if rel < 0 || rel >= dim.len {
                return None;
            }
            off += rel as usize * stride;
        }
        Some(off)
    }

    pub fn get(&self, step: i64, coords: &[i64]) -> Option<f64> {
        self.offset(step, coords).map(|o| self.data[o])
    }

    pub fn set(&mut self, step: i64, coords: &[i64], value: f64) -> bool {
        match self.offset(step, coords) {
            Some(o) => {
                self.store(o, value);
                true
            }
            None => false,
        }
    }

    /// Write at a raw storage index, rounding to the element precision.
    pub fn store(&mut self, offset: usize, value: f64) {
        let rounded = self.round(value);
        if let Some(slot) = self.data.get_mut(offset) {
            *slot = rounded;
        }
    }

    fn round(&self, value: f64) -> f64 {
        if self.elem_bytes == 4 {
            value as f32 as f64
        } else {
            value
        }
    }

    /// Set every element to `v`.
    pub fn set_same(&mut self, v: f64) {
        let v = self.round(v);
        self.data.iter_mut().for_each(|x| *x = v);
    }

    /// Set elements to distinct, position-dependent values derived from `v`.
    pub fn set_diff(&mut self, v: f64) {
        for i in 0..self.data.len() {
            let x = v * (1.0 + (i % 101) as f64 / 101.0);
            self.data[i] = self.round(x);
        }
    }

    /// Number of elements differing by more than `tolerance`, relative to the
    /// larger magnitude. Grids of different shapes differ everywhere.
    pub fn compare(&self, other: &Grid, tolerance: f64) -> usize {
        if self.data.len() != other.data.len() || self.dims != other.dims {
            return self.data.len().max(other.data.len());
        }
        self.data
            .iter()
            .zip(&other.data)
            .filter(|(a, b)| !within_tolerance(**a, **b, tolerance))
            .count()
    }
}

/// Dim indices from outermost to innermost.
///
/// Misc dims go outermost (or innermost with `inner_misc`). Domain dims keep
/// index order except `unit_stride`, which is the innermost domain dim.
pub fn layout_order(dims: &[GridDim], unit_stride: Option<&str>, inner_misc: bool) -> Vec<usize> {
    let mut layout: Vec<usize> = (0..dims.len()).collect();
    layout.sort_by_key(|&i| {
        let misc = dims[i].kind == DimKind::Misc;
        let unit = !misc && Some(dims[i].name.as_str()) == unit_stride;
        (misc == inner_misc, unit, i)
    });
    layout
}

/// Relative comparison that treats values near zero absolutely.
pub fn within_tolerance(a: f64, b: f64, tolerance: f64) -> bool {
    let diff = (a - b).abs();
    let scale = a.abs().max(b.abs()).max(1.0);
    diff <= tolerance * scale
}
