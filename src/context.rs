//! Compilation context and the compiled plan.
//!
//! A [`CompilationContext`] owns the settings and the solution registry for
//! one invocation. [`CompilationContext::compile`] runs the whole pipeline:
//!
//! ```text
//! define → finalize → expression passes → dependences → geometry → padding → bundles
//! ```

use crate::analysis::dependence::DependencyGraph;
use crate::ir::equation::{EqId, Equation};
use crate::ir::solution::{Solution, SolutionBuilder};
use crate::ir::var::Variable;
use crate::settings::CompilerSettings;
use crate::solutions::Registry;
use crate::transform::bundle::{compute_bundles, Bundle};
use crate::transform::fold::{compute_geometry, Geometry};
use crate::transform::{optimize, OptimizationReport};
use crate::utils::errors::{StencilError, StencilResult};
use log::info;
use serde::Serialize;

/// Settings and registry for one invocation.
pub struct CompilationContext {
    settings: CompilerSettings,
    registry: Registry,
}

impl CompilationContext {
    /// Validate the settings and register the built-in solutions.
    pub fn new(settings: CompilerSettings) -> StencilResult<Self> {
        Self::with_registry(settings, Registry::with_builtins()?)
    }

    pub fn with_registry(settings: CompilerSettings, registry: Registry) -> StencilResult<Self> {
        settings.validate()?;
        Ok(Self { settings, registry })
    }

    pub fn settings(&self) -> &CompilerSettings {
        &self.settings
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// Set the radius of a solution; see [`Registry::set_radius`].
    pub fn set_radius(&mut self, name: &str, radius: i64) -> StencilResult<Option<i64>> {
        self.registry.set_radius(name, radius)
    }

    /// Compile a registered solution for a target vector length.
    ///
    /// `target_len` is `None` for formats without a hardware vector length.
    pub fn compile(&self, name: &str, target_len: Option<usize>) -> StencilResult<CompiledSolution> {
        let stencil = self.registry.lookup(name)?;
        info!("compiling '{}': {}", name, stencil.description());

        let mut builder = SolutionBuilder::new(name, &self.settings)?;
        stencil.define(&mut builder)?;
        let mut solution = builder.finalize(&self.settings)?;
        info!(
            "{} vars, {} equations defined",
            solution.vars.len(),
            solution.equations.len()
        );

        let report = optimize(&mut solution.equations, &self.settings)?;
        let graph = DependencyGraph::build(&solution, self.settings.find_deps)?;
        let geometry = compute_geometry(&solution.dims, &self.settings, target_len)?;
        info!("fold {}; cluster {}", geometry.fold, geometry.cluster);
        for var in solution.vars.iter_mut() {
            apply_padding(var, &geometry);
        }
        let bundles = compute_bundles(&solution, &graph, &self.settings)?;

        Ok(CompiledSolution {
            name: name.to_string(),
            description: stencil.description(),
            radius: stencil.radius(),
            settings: self.settings.clone(),
            solution,
            graph,
            geometry,
            bundles,
            report,
        })
    }
}

/// Round each domain halo up to a multiple of the fold length.
fn apply_padding(var: &mut Variable, geometry: &Geometry) {
    for (dim, halo) in var.halo.iter() {
        let fold = geometry.fold.get(dim).max(1);
        let pad = (halo + fold - 1) / fold * fold;
        var.pad.insert(dim.clone(), pad);
    }
}

/// Everything emitters and the runtime need about one compiled solution.
#[derive(Debug, Clone, Serialize)]
pub struct CompiledSolution {
    pub name: String,
    pub description: String,
    pub radius: Option<i64>,
    pub settings: CompilerSettings,
    pub solution: Solution,
    pub graph: DependencyGraph,
    pub geometry: Geometry,
    /// Bundles in execution order
    pub bundles: Vec<Bundle>,
    pub report: OptimizationReport,
}

impl CompiledSolution {
    pub fn equation(&self, id: EqId) -> Option<&Equation> {
        self.solution.equation(id)
    }

    /// Member equations of a bundle.
    pub fn bundle_equations(&self, bundle: &Bundle) -> Vec<&Equation> {
        bundle.members.iter().filter_map(|id| self.equation(*id)).collect()
    }

    pub fn bundle(&self, name: &str) -> Option<&Bundle> {
        self.bundles.iter().find(|b| b.name == name)
    }

    pub fn domain_dims(&self) -> Vec<&str> {
        self.solution.dims.ordered_domain_dims()
    }

    pub fn step_dim(&self) -> &str {
        self.solution.step_dim()
    }

    /// Scalar floating-point operations per point for one bundle.
    pub fn bundle_fp_ops(&self, bundle: &Bundle) -> usize {
        self.bundle_equations(bundle).iter().map(|e| e.rhs.fp_ops()).sum()
    }

    /// Pretty-printed JSON of the whole plan.
    pub fn to_json(&self) -> StencilResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| StencilError::Internal(format!("cannot serialize plan: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_padding() {
        let settings = CompilerSettings::new().fold("x", 4).fold("y", 4);
        let mut ctx = CompilationContext::new(settings).unwrap();
        assert_eq!(ctx.set_radius("iso3dfd", 2).unwrap(), Some(2));
        let compiled = ctx.compile("iso3dfd", Some(16)).unwrap();
        let p = compiled.solution.var("pressure").unwrap();
        assert_eq!(p.halo_of("x"), 2);
        assert_eq!(p.pad_of("x"), 4);
        assert_eq!(p.pad_of("z"), 2);
        assert_eq!(compiled.radius, Some(2));
        assert_eq!(compiled.bundles.len(), 1);
    }

    #[test]
    fn test_compile_errors() {
        let ctx = CompilationContext::new(CompilerSettings::default()).unwrap();
        assert_eq!(ctx.compile("nope", None).unwrap_err().short_name(), "UnknownSolution");
        assert_eq!(ctx.compile("test_cycle", None).unwrap_err().short_name(), "CyclicDependency");
        assert!(CompilationContext::new(CompilerSettings::new().elem_bytes(3)).is_err());
    }

    #[test]
    fn test_json_dump() {
        let ctx = CompilationContext::new(CompilerSettings::default()).unwrap();
        let compiled = ctx.compile("heat2d", Some(8)).unwrap();
        let json = compiled.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["name"], "heat2d");
        assert_eq!(value["bundles"][0]["name"], "stencil_bundle_0");
    }
}
