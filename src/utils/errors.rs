//! Error types for the stencil compiler.
//!
//! This module defines all error types used throughout the framework,
//! organized by the phase that produces them. Every error is fatal for the
//! compilation that raised it: no partial bundle list or geometry survives.

use thiserror::Error;
use std::fmt;

/// Top-level error type for the compiler.
#[derive(Error, Debug)]
pub enum StencilError {
    /// Error in the dimension catalog
    #[error("Dimension error: {0}")]
    Dimension(#[from] DimensionError),

    /// Error while computing fold/cluster geometry
    #[error("Geometry error: {0}")]
    Geometry(#[from] GeometryError),

    /// Error during dependence analysis
    #[error("Dependence error: {0}")]
    Dependence(#[from] DependenceError),

    /// Error during equation bundling
    #[error("Bundling error: {0}")]
    Bundle(#[from] BundleError),

    /// Error looking up or configuring a solution
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Malformed configuration value
    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    /// Error during code generation
    #[error("Code generation error: {0}")]
    Codegen(#[from] CodegenError),

    /// Malformed solution definition (unknown variable, wrong index list)
    #[error("Definition error: {0}")]
    Definition(String),

    /// Internal compiler error
    #[error("Internal error: {0}")]
    Internal(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StencilError {
    /// Short, stable name of the failed validation.
    pub fn short_name(&self) -> &'static str {
        match self {
            StencilError::Dimension(e) => match e.kind {
                DimensionErrorKind::DuplicateKind => "DuplicateDimensionKind",
                DimensionErrorKind::MultipleStepDims => "MultipleStepDims",
                DimensionErrorKind::MissingStepDim => "MissingStepDim",
                DimensionErrorKind::Frozen => "FrozenDimensions",
                DimensionErrorKind::Unknown => "UnknownDimension",
            },
            StencilError::Geometry(_) => "InvalidGeometry",
            StencilError::Dependence(e) => match e.kind {
                DependenceErrorKind::CyclicDependency => "CyclicDependency",
                DependenceErrorKind::IllegalSelfReference => "CyclicDependency",
            },
            StencilError::Bundle(_) => "UnschedulableBundles",
            StencilError::Registry(e) => match e.kind {
                RegistryErrorKind::UnknownSolution => "UnknownSolution",
                RegistryErrorKind::DuplicateSolution => "DuplicateSolution",
                RegistryErrorKind::InvalidRadius => "InvalidRadius",
            },
            StencilError::Settings(_) => "InvalidOption",
            StencilError::Codegen(_) => "CodegenError",
            StencilError::Definition(_) => "InvalidDefinition",
            StencilError::Internal(_) => "InternalError",
            StencilError::Io(_) => "IoError",
        }
    }
}

/// Error in the dimension catalog.
#[derive(Error, Debug, Clone)]
pub struct DimensionError {
    /// The error message
    pub message: String,
    /// The dimension involved
    pub dim: String,
    /// The kind of dimension error
    pub kind: DimensionErrorKind,
}

impl fmt::Display for DimensionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (dimension '{}')", self.message, self.dim)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimensionErrorKind {
    /// Same name declared with two different kinds
    DuplicateKind,
    /// More than one step dimension
    MultipleStepDims,
    /// No step dimension at finalization
    MissingStepDim,
    /// New dimension after the catalog was frozen
    Frozen,
    /// Reference to an undeclared dimension
    Unknown,
}

/// Error while computing fold or cluster geometry.
#[derive(Error, Debug, Clone)]
pub struct GeometryError {
    /// The error message
    pub message: String,
    /// The kind of geometry error
    pub kind: GeometryErrorKind,
}

impl fmt::Display for GeometryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryErrorKind {
    /// A fold or cluster size is zero or negative
    NonPositiveSize,
    /// A fold or cluster option names a non-domain dimension
    UnknownDimension,
    /// The target vector length cannot be spread over the domain dimensions
    Inexpressible,
    /// A lane or cluster count does not fit in an `i64`
    Overflow,
}

/// Error during dependence analysis.
#[derive(Error, Debug, Clone)]
pub struct DependenceError {
    /// The error message
    pub message: String,
    /// Variables implicated in the failure
    pub vars: Vec<String>,
    /// The kind of dependence error
    pub kind: DependenceErrorKind,
}

impl fmt::Display for DependenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.message, self.vars.join(", "))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependenceErrorKind {
    /// Cycle among same-step dependencies
    CyclicDependency,
    /// Equation reads its own same-step output without a reduction marking
    IllegalSelfReference,
}

/// Error while partitioning equations into bundles.
#[derive(Error, Debug, Clone)]
pub struct BundleError {
    /// The error message
    pub message: String,
    /// Bundles on the offending cycle
    pub bundles: Vec<String>,
    /// The kind of bundling error
    pub kind: BundleErrorKind,
}

impl fmt::Display for BundleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.message, self.bundles.join(", "))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleErrorKind {
    /// Collapsed bundle graph has a cycle
    Unschedulable,
}

/// Error from the solution registry.
#[derive(Error, Debug, Clone)]
pub struct RegistryError {
    /// The error message
    pub message: String,
    /// The solution involved
    pub solution: String,
    /// The kind of registry error
    pub kind: RegistryErrorKind,
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (solution '{}')", self.message, self.solution)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryErrorKind {
    /// No solution registered under the name
    UnknownSolution,
    /// Name already registered
    DuplicateSolution,
    /// Radius rejected by the solution
    InvalidRadius,
}

/// Malformed configuration value.
#[derive(Error, Debug, Clone)]
pub struct SettingsError {
    /// The error message
    pub message: String,
    /// The option that failed
    pub option: String,
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid value for '{}': {}", self.option, self.message)
    }
}

impl SettingsError {
    /// Create a settings error for an option.
    pub fn new(option: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            option: option.into(),
        }
    }
}

/// Error during code generation.
#[derive(Error, Debug, Clone)]
pub struct CodegenError {
    /// The error message
    pub message: String,
    /// The kind of codegen error
    pub kind: CodegenErrorKind,
}

impl fmt::Display for CodegenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodegenErrorKind {
    /// Unknown output format name
    UnknownFormat,
    /// Unaligned loads requested with a multi-dimensional fold
    UnsupportedFeature,
}

/// Result type using StencilError.
pub type StencilResult<T> = Result<T, StencilError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DependenceError {
            message: "Same-step dependency cycle".to_string(),
            vars: vec!["u".to_string(), "v".to_string()],
            kind: DependenceErrorKind::CyclicDependency,
        };
        let s = format!("{}", err);
        assert!(s.contains("cycle"));
        assert!(s.contains("u, v"));
    }

    #[test]
    fn test_short_names() {
        let err: StencilError = RegistryError {
            message: "radius out of range".to_string(),
            solution: "iso3dfd".to_string(),
            kind: RegistryErrorKind::InvalidRadius,
        }
        .into();
        assert_eq!(err.short_name(), "InvalidRadius");

        let err: StencilError = SettingsError::new("elem-bytes", "must be 4 or 8").into();
        assert_eq!(err.short_name(), "InvalidOption");
        assert!(err.to_string().contains("elem-bytes"));
    }
}
