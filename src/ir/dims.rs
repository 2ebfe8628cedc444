//! Dimension catalog.
//!
//! Every solution has exactly one step dimension, an ordered list of domain
//! dimensions swept by the tiling hierarchy, and any number of misc
//! dimensions that are indexed but never tiled. The last declared domain
//! dimension is the unit-stride (innermost) dimension unless the
//! first-unit-stride flag is set.

use crate::utils::errors::{DimensionError, DimensionErrorKind, StencilResult};
use serde::{Serialize, Deserialize};
use std::fmt;

/// Role of a dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DimKind {
    /// Discrete time/iteration
    Step,
    /// Spatial dimension swept by regions, blocks and clusters
    Domain,
    /// Non-tiled index such as a field component
    Misc,
}

impl fmt::Display for DimKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DimKind::Step => "step",
            DimKind::Domain => "domain",
            DimKind::Misc => "misc",
        };
        write!(f, "{}", s)
    }
}

/// A declared dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub kind: DimKind,
    /// Position in declaration order across all kinds
    pub order: usize,
}

/// Ordered catalog of the dimensions of one solution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dimensions {
    dims: Vec<Dimension>,
    first_inner: bool,
    frozen: bool,
}

impl Dimensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the first domain dimension unit-stride instead of the last one.
    pub fn with_first_inner(mut self, first_inner: bool) -> Self {
        self.first_inner = first_inner;
        self
    }

    /// Declare a dimension.
    ///
    /// Repeating an identical declaration is a no-op. Redeclaring a name with
    /// a different kind, adding a second step dimension, or adding any new
    /// dimension after [`Dimensions::freeze`] fails.
    pub fn declare(&mut self, name: &str, kind: DimKind) -> StencilResult<()> {
        if let Some(existing) = self.get(name) {
            if existing.kind == kind {
                return Ok(());
            }
            return Err(DimensionError {
                message: format!(
                    "already declared as a {} dimension, cannot redeclare as {}",
                    existing.kind, kind
                ),
                dim: name.to_string(),
                kind: DimensionErrorKind::DuplicateKind,
            }
            .into());
        }

        if self.frozen {
            return Err(DimensionError {
                message: "dimensions are frozen after finalization".to_string(),
                dim: name.to_string(),
                kind: DimensionErrorKind::Frozen,
            }
            .into());
        }

        if kind == DimKind::Step {
            if let Some(step) = self.step_dim() {
                return Err(DimensionError {
                    message: format!("step dimension is already '{}'", step),
                    dim: name.to_string(),
                    kind: DimensionErrorKind::MultipleStepDims,
                }
                .into());
            }
        }

        let order = self.dims.len();
        self.dims.push(Dimension {
            name: name.to_string(),
            kind,
            order,
        });
        Ok(())
    }

    /// Stop accepting new dimensions.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn get(&self, name: &str) -> Option<&Dimension> {
        self.dims.iter().find(|d| d.name == name)
    }

    pub fn kind_of(&self, name: &str) -> Option<DimKind> {
        self.get(name).map(|d| d.kind)
    }

    /// Look up a dimension's kind, failing for undeclared names.
    pub fn require(&self, name: &str) -> StencilResult<DimKind> {
        self.kind_of(name).ok_or_else(|| {
            DimensionError {
                message: "dimension was never declared".to_string(),
                dim: name.to_string(),
                kind: DimensionErrorKind::Unknown,
            }
            .into()
        })
    }

    pub fn step_dim(&self) -> Option<&str> {
        self.dims
            .iter()
            .find(|d| d.kind == DimKind::Step)
            .map(|d| d.name.as_str())
    }

    /// The step dimension, which must exist once a solution is finalized.
    pub fn require_step_dim(&self) -> StencilResult<&str> {
        self.step_dim().ok_or_else(|| {
            DimensionError {
                message: "solution has no step dimension".to_string(),
                dim: String::new(),
                kind: DimensionErrorKind::MissingStepDim,
            }
            .into()
        })
    }

    /// Domain dimensions in declaration order.
    pub fn ordered_domain_dims(&self) -> Vec<&str> {
        self.names_of(DimKind::Domain)
    }

    pub fn misc_dims(&self) -> Vec<&str> {
        self.names_of(DimKind::Misc)
    }

    fn names_of(&self, kind: DimKind) -> Vec<&str> {
        self.dims
            .iter()
            .filter(|d| d.kind == kind)
            .map(|d| d.name.as_str())
            .collect()
    }

    pub fn num_domain_dims(&self) -> usize {
        self.dims.iter().filter(|d| d.kind == DimKind::Domain).count()
    }

    /// Position of a dimension within the domain dimensions.
    pub fn domain_index(&self, name: &str) -> Option<usize> {
        self.ordered_domain_dims().iter().position(|d| *d == name)
    }

    /// The unit-stride (innermost) domain dimension.
    pub fn unit_stride_dim(&self) -> Option<&str> {
        let domain = self.ordered_domain_dims();
        if self.first_inner {
            domain.first().copied()
        } else {
            domain.last().copied()
        }
    }

    /// Domain dimensions ordered from the unit-stride dimension outward.
    pub fn innermost_first(&self) -> Vec<&str> {
        let mut domain = self.ordered_domain_dims();
        if !self.first_inner {
            domain.reverse();
        }
        domain
    }

    pub fn first_inner(&self) -> bool {
        self.first_inner
    }

    pub fn iter(&self) -> impl Iterator<Item = &Dimension> {
        self.dims.iter()
    }

    pub fn len(&self) -> usize {
        self.dims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dims.is_empty()
    }
}
