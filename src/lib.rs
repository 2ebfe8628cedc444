//! # stencilopt - Stencil Compiler
//!
//! Turns a symbolic stencil solution (variables indexed by a step
//! dimension, domain dimensions and optional misc dimensions) into a
//! vector-folded, cache-tiled execution plan:
//! - Dimension catalog and solution definition
//! - Fold and cluster geometry
//! - Same-step dependence analysis
//! - Equation bundling
//! - Tiled execution (step → region → block → cluster → vector)
//! - Pseudo-code, GraphViz and C++ output
//!
//! ## Architecture
//!
//! ```text
//! Settings + Solution → Dims → Equations → Deps → Geometry → Bundles → CodeGen / Runtime
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use stencilopt::prelude::*;
//!
//! let mut ctx = CompilationContext::new(CompilerSettings::new().fold("x", 4))?;
//! ctx.set_radius("iso3dfd", 4)?;
//! let compiled = ctx.compile("iso3dfd", Format::Avx512.target_len(4))?;
//! let code = stencilopt::codegen::generate(&compiled, Format::Avx512)?;
//! ```

#![warn(clippy::all)]

pub mod analysis;
pub mod codegen;
pub mod context;
pub mod ir;
pub mod runtime;
pub mod settings;
pub mod solutions;
pub mod transform;
pub mod utils;

// Re-export commonly used types
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use crate::analysis::{DepEdge, DependencyGraph};
    pub use crate::codegen::Format;
    pub use crate::context::{CompilationContext, CompiledSolution};
    pub use crate::ir::*;
    pub use crate::runtime::{Executor, NoPrefetch, Prefetcher, StencilContext};
    pub use crate::settings::CompilerSettings;
    pub use crate::solutions::{RadiusControl, Registry, StencilSolution};
    pub use crate::transform::{Bundle, Geometry};
    pub use crate::utils::errors::*;
}

use crate::codegen::Format;
use crate::context::{CompilationContext, CompiledSolution};
use crate::settings::CompilerSettings;
use crate::utils::errors::StencilResult;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Compile a built-in solution for one output format.
pub fn compile(name: &str, settings: CompilerSettings, format: Format) -> StencilResult<CompiledSolution> {
    let target_len = format.target_len(settings.elem_bytes);
    CompilationContext::new(settings)?.compile(name, target_len)
}

/// Compile a built-in solution and render it in one format.
pub fn compile_to_string(name: &str, settings: CompilerSettings, format: Format) -> StencilResult<String> {
    let compiled = compile(name, settings, format)?;
    codegen::generate(&compiled, format)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_compile_entry_points() {
        let compiled = compile("iso3dfd", CompilerSettings::default(), Format::Avx512).unwrap();
        assert_eq!(compiled.geometry.vector_len(), 16);
        let text = compile_to_string("heat2d", CompilerSettings::default(), Format::Pseudo).unwrap();
        assert!(text.contains("heat2d"));
    }
}
