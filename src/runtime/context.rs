//! Grids and sizes for running a compiled solution.

use crate::context::CompiledSolution;
use crate::runtime::grid::Grid;
use crate::runtime::tiling::TilingPlan;
use crate::utils::errors::{SettingsError, StencilResult};
use log::{info, warn};
use std::collections::BTreeMap;

/// Default relative tolerance of [`StencilContext::compare`].
pub const DEFAULT_TOLERANCE: f64 = 1e-9;

/// Allocated grids plus domain, region and block sizes.
#[derive(Debug, Clone)]
pub struct StencilContext {
    pub name: String,
    /// Domain dimension names in solution order
    pub dims: Vec<String>,
    pub plan: TilingPlan,
    /// One grid per variable, in definition order
    pub grids: Vec<Grid>,
}

impl StencilContext {
    /// Allocate zeroed grids for `compiled` over a domain of `domain` points.
    ///
    /// Regions and blocks start as the whole domain.
    pub fn new(compiled: &CompiledSolution, domain: &[i64]) -> StencilResult<Self> {
        let dims: Vec<String> = compiled.domain_dims().iter().map(|d| d.to_string()).collect();
        if domain.len() != dims.len() {
            return Err(SettingsError::new(
                "domain",
                format!("{} sizes given for dims {}", domain.len(), dims.join(",")),
            )
            .into());
        }
        let geometry = &compiled.geometry;
        let fold: Vec<i64> = dims.iter().map(|d| geometry.fold.get(d)).collect();
        let cluster: Vec<i64> = dims.iter().map(|d| geometry.cluster_length(d)).collect();
        let unit_stride = compiled.solution.dims.unit_stride_dim();
        let inner = unit_stride
            .and_then(|u| dims.iter().position(|d| d == u))
            .unwrap_or(dims.len().saturating_sub(1));
        let plan = TilingPlan::new(domain.to_vec(), fold, cluster).with_inner_dim(inner);
        plan.validate()?;

        let sizes: BTreeMap<String, i64> = dims.iter().cloned().zip(domain.iter().copied()).collect();
        let grids = compiled
            .solution
            .vars
            .iter()
            .map(|v| {
                Grid::new(
                    v,
                    &sizes,
                    unit_stride,
                    compiled.settings.inner_misc,
                    compiled.settings.elem_bytes,
                )
            })
            .collect();

        Ok(Self {
            name: compiled.name.clone(),
            dims,
            plan,
            grids,
        })
    }

    pub fn with_region(mut self, region: &[i64]) -> StencilResult<Self> {
        self.plan = self.plan.with_region(region.to_vec());
        self.plan.validate()?;
        Ok(self)
    }

    pub fn with_block(mut self, block: &[i64]) -> StencilResult<Self> {
        self.plan = self.plan.with_block(block.to_vec());
        self.plan.validate()?;
        Ok(self)
    }

    pub fn grid(&self, name: &str) -> Option<&Grid> {
        self.grids.iter().find(|g| g.name == name)
    }

    pub fn grid_index(&self, name: &str) -> Option<usize> {
        self.grids.iter().position(|g| g.name == name)
    }

    pub fn num_bytes(&self) -> usize {
        self.grids.iter().map(|g| g.num_bytes()).sum()
    }

    /// Each grid gets one constant value, grids slightly apart.
    pub fn init_same(&mut self) {
        info!("initializing grids of '{}'", self.name);
        let mut v = 0.1;
        for g in self.grids.iter_mut() {
            g.set_same(v);
            v += 0.01;
        }
    }

    /// Each grid gets position-dependent values, grids slightly apart.
    pub fn init_diff(&mut self) {
        let mut v = 0.01;
        for g in self.grids.iter_mut() {
            g.set_diff(v);
            v += 0.001;
        }
    }

    /// Number of mismatched elements against `reference`.
    pub fn compare(&self, reference: &StencilContext) -> usize {
        self.compare_with_tolerance(reference, DEFAULT_TOLERANCE)
    }

    pub fn compare_with_tolerance(&self, reference: &StencilContext, tolerance: f64) -> usize {
        let mut errs = 0;
        for g in &self.grids {
            match reference.grid(&g.name) {
                Some(r) => errs += g.compare(r, tolerance),
                None => {
                    warn!("grid '{}' is not in '{}'", g.name, reference.name);
                    errs += 1;
                }
            }
        }
        errs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CompilationContext;
    use crate::settings::CompilerSettings;

    #[test]
    fn test_alloc_and_init() {
        let ctx = CompilationContext::new(CompilerSettings::default()).unwrap();
        let compiled = ctx.compile("heat2d", Some(4)).unwrap();
        let mut a = StencilContext::new(&compiled, &[8, 8]).unwrap();
        assert_eq!(a.grids.len(), 1);
        assert!(a.num_bytes() > 8 * 8 * 4);

        let mut b = a.clone();
        a.init_diff();
        b.init_diff();
        assert_eq!(a.compare(&b), 0);
        b.init_same();
        assert!(a.compare(&b) > 0);

        assert!(StencilContext::new(&compiled, &[8]).is_err());
        assert!(a.with_block(&[0, 4]).is_err());
    }
}
