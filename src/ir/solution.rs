//! Solution definition and finalization.
//!
//! A [`SolutionBuilder`] is what a stencil's `define` method writes into:
//! dimensions, variables and equations. [`SolutionBuilder::finalize`]
//! applies variable filtering, infers halos and step allocations, and
//! freezes the dimension catalog.

use crate::ir::dims::{DimKind, Dimensions};
use crate::ir::equation::{EqId, EqKind, Equation};
use crate::ir::expr::{Expr, Index, VarPoint};
use crate::ir::var::Variable;
use crate::settings::CompilerSettings;
use crate::utils::errors::{SettingsError, StencilError, StencilResult};
use log::{debug, info, warn};
use regex::Regex;
use serde::{Serialize, Deserialize};
use std::collections::BTreeMap;

/// A dimension as named in a variable definition.
pub trait DimRef {
    /// Look the dimension up, declaring it if the reference carries a kind.
    fn resolve(&self, dims: &mut Dimensions) -> StencilResult<(String, DimKind)>;
}

impl DimRef for &str {
    fn resolve(&self, dims: &mut Dimensions) -> StencilResult<(String, DimKind)> {
        Ok((self.to_string(), dims.require(self)?))
    }
}

impl DimRef for (&str, DimKind) {
    fn resolve(&self, dims: &mut Dimensions) -> StencilResult<(String, DimKind)> {
        dims.declare(self.0, self.1)?;
        Ok((self.0.to_string(), self.1))
    }
}

/// Mutable definition surface for one solution.
#[derive(Debug, Clone)]
pub struct SolutionBuilder {
    name: String,
    dims: Dimensions,
    vars: Vec<Variable>,
    equations: Vec<Equation>,
    print_eqs: bool,
}

impl SolutionBuilder {
    /// Start a definition, declaring any dimensions named in the settings first.
    pub fn new(name: &str, settings: &CompilerSettings) -> StencilResult<Self> {
        let mut dims = Dimensions::new().with_first_inner(settings.first_inner);
        if let Some(ref step) = settings.step_dim {
            dims.declare(step, DimKind::Step)?;
        }
        for d in &settings.domain_dims {
            dims.declare(d, DimKind::Domain)?;
        }
        Ok(Self {
            name: name.to_string(),
            dims,
            vars: Vec::new(),
            equations: Vec::new(),
            print_eqs: settings.print_eqs,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dims(&self) -> &Dimensions {
        &self.dims
    }

    pub fn step_dim(&mut self, name: &str) -> StencilResult<String> {
        self.dims.declare(name, DimKind::Step)?;
        Ok(name.to_string())
    }

    pub fn domain_dim(&mut self, name: &str) -> StencilResult<String> {
        self.dims.declare(name, DimKind::Domain)?;
        Ok(name.to_string())
    }

    pub fn misc_dim(&mut self, name: &str) -> StencilResult<String> {
        self.dims.declare(name, DimKind::Misc)?;
        Ok(name.to_string())
    }

    /// Create a variable.
    ///
    /// Each dimension is either a bare name, which must already be declared,
    /// or a `(name, kind)` pair, which declares the dimension on first use.
    /// Returns a copy of the variable to build var-points with.
    pub fn new_var<D: DimRef>(&mut self, name: &str, dims: &[D]) -> StencilResult<Variable> {
        if self.vars.iter().any(|v| v.name == name) {
            return Err(StencilError::Definition(format!("variable '{}' defined twice", name)));
        }
        let mut typed: Vec<(String, DimKind)> = Vec::with_capacity(dims.len());
        for d in dims {
            let (dim, kind) = d.resolve(&mut self.dims)?;
            if typed.iter().any(|(n, _)| *n == dim) {
                return Err(StencilError::Definition(format!(
                    "variable '{}' uses dimension '{}' twice",
                    name, dim
                )));
            }
            typed.push((dim, kind));
        }
        let var = Variable::new(name, typed);
        self.vars.push(var.clone());
        Ok(var)
    }

    /// Add `target = rhs`.
    pub fn add_eq(&mut self, target: VarPoint, rhs: Expr) -> StencilResult<EqId> {
        self.push_eq(target, rhs, EqKind::Assign)
    }

    /// Add an accumulation that may read the point it writes.
    pub fn add_reduction(&mut self, target: VarPoint, rhs: Expr) -> StencilResult<EqId> {
        self.push_eq(target, rhs, EqKind::Reduction)
    }

    fn push_eq(&mut self, target: VarPoint, rhs: Expr, kind: EqKind) -> StencilResult<EqId> {
        self.check_point(&target)?;
        for idx in &target.indices {
            if let Index::Offset { dim, offset } = idx {
                if *offset != 0 && self.dims.kind_of(dim) == Some(DimKind::Domain) {
                    return Err(StencilError::Definition(format!(
                        "equation target '{}' must not be offset in domain dimension '{}'",
                        target, dim
                    )));
                }
            }
        }
        if self.equations.iter().any(|e| e.target == target) {
            return Err(StencilError::Definition(format!("'{}' is updated by two equations", target)));
        }
        for p in rhs.var_points() {
            self.check_point(p)?;
        }

        let id = EqId(self.equations.len());
        let eq = Equation::new(id, target, rhs).with_kind(kind);
        if self.print_eqs {
            info!("equation {}: {}", id, eq);
        }
        self.equations.push(eq);
        Ok(id)
    }

    fn check_point(&self, p: &VarPoint) -> StencilResult<()> {
        let var = self
            .vars
            .iter()
            .find(|v| v.name == p.var)
            .ok_or_else(|| StencilError::Definition(format!("unknown variable '{}'", p.var)))?;
        let same_dims = var.dims.len() == p.indices.len()
            && var.dims.iter().zip(&p.indices).all(|((d, k), idx)| {
                d == idx.dim() && matches!(idx, Index::Const { .. }) == (*k == DimKind::Misc)
            });
        if !same_dims {
            return Err(StencilError::Definition(format!(
                "'{}' does not match the dimensions of variable '{}'",
                p, var.name
            )));
        }
        Ok(())
    }

    /// Filter, infer sizes, and freeze.
    pub fn finalize(mut self, settings: &CompilerSettings) -> StencilResult<Solution> {
        let step_dim = self.dims.require_step_dim()?.to_string();

        if let Some(ref pattern) = settings.var_regex {
            let re = Regex::new(pattern)
                .map_err(|e| SettingsError::new("vars", format!("bad pattern '{}': {}", pattern, e)))?;
            let before = self.equations.len();
            self.equations.retain(|eq| re.is_match(eq.target_var()));
            for (i, eq) in self.equations.iter_mut().enumerate() {
                eq.id = EqId(i);
            }
            info!(
                "kept {} of {} equations matching '{}'",
                self.equations.len(),
                before,
                pattern
            );
        }

        infer_sizes(&mut self.vars, &self.equations, &step_dim);
        apply_overrides(&mut self.vars, settings)?;

        for eq in &self.equations {
            let size = eq.rhs.size();
            if size > settings.max_expr_size {
                warn!(
                    "equation for '{}' has {} nodes, above the expression-size threshold {}",
                    eq.target, size, settings.max_expr_size
                );
            }
        }

        self.dims.freeze();
        debug!(
            "solution '{}' finalized: {} vars, {} equations",
            self.name,
            self.vars.len(),
            self.equations.len()
        );

        Ok(Solution {
            name: self.name,
            dims: self.dims,
            vars: self.vars,
            equations: self.equations,
        })
    }
}

/// Raise halos, step allocations and misc ranges to cover every access.
fn infer_sizes(vars: &mut [Variable], equations: &[Equation], step_dim: &str) {
    let mut writes: BTreeMap<&str, Vec<i64>> = BTreeMap::new();
    let mut reads: BTreeMap<&str, Vec<i64>> = BTreeMap::new();

    for eq in equations {
        writes
            .entry(eq.target_var())
            .or_default()
            .push(eq.write_step_offset(step_dim));
        for p in std::iter::once(&eq.target).chain(eq.reads()) {
            if let Some(var) = vars.iter_mut().find(|v| v.name == p.var) {
                for idx in &p.indices {
                    match idx {
                        Index::Offset { dim, offset } if dim != step_dim => {
                            var.require_halo(dim, *offset)
                        }
                        Index::Const { dim, value } => var.require_misc(dim, *value),
                        _ => {}
                    }
                }
            }
        }
        for p in eq.reads() {
            if let Some(off) = p.offset_in(step_dim) {
                reads.entry(p.var.as_str()).or_default().push(off);
            }
        }
    }

    for var in vars.iter_mut() {
        let w = writes.get(var.name.as_str());
        let r = reads.get(var.name.as_str());
        let span = match (w, r) {
            (Some(w), Some(r)) => w
                .iter()
                .flat_map(|wo| r.iter().map(move |ro| wo - ro))
                .map(i64::abs)
                .max()
                .unwrap_or(0),
            (None, Some(r)) => {
                r.iter().max().copied().unwrap_or(0) - r.iter().min().copied().unwrap_or(0)
            }
            _ => 0,
        };
        var.require_step_distance(span);
    }
}

fn apply_overrides(vars: &mut [Variable], settings: &CompilerSettings) -> StencilResult<()> {
    for var in vars.iter_mut() {
        if let Some(h) = settings.halo_size {
            for (dim, halo) in var.halo.iter_mut() {
                if h < *halo {
                    return Err(SettingsError::new(
                        "halo",
                        format!(
                            "{} is smaller than the {} needed by '{}' along '{}'",
                            h, halo, var.name, dim
                        ),
                    )
                    .into());
                }
                *halo = h;
            }
        }
        if let Some(s) = settings.step_alloc {
            if var.has_step_dim() {
                if s < var.step_alloc {
                    return Err(SettingsError::new(
                        "step-alloc",
                        format!("{} is smaller than the {} needed by '{}'", s, var.step_alloc, var.name),
                    )
                    .into());
                }
                var.step_alloc = s;
            }
        }
    }
    Ok(())
}

/// A finalized solution: frozen dimensions, sized variables and equations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Solution {
    pub name: String,
    pub dims: Dimensions,
    pub vars: Vec<Variable>,
    pub equations: Vec<Equation>,
}

impl Solution {
    pub fn var(&self, name: &str) -> Option<&Variable> {
        self.vars.iter().find(|v| v.name == name)
    }

    pub fn equation(&self, id: EqId) -> Option<&Equation> {
        self.equations.get(id.0)
    }

    pub fn step_dim(&self) -> &str {
        self.dims.step_dim().unwrap_or("t")
    }
}
