//! Intermediate representation of a stencil solution.
//!
//! - `dims`: the dimension catalog
//! - `var`: variables with halo/allocation/padding
//! - `expr`: var-points and expression trees
//! - `equation`: single assignments
//! - `solution`: definition surface and finalization

pub mod dims;
pub mod var;
pub mod expr;
pub mod equation;
pub mod solution;

pub use dims::{DimKind, Dimension, Dimensions};
pub use var::Variable;
pub use expr::{Expr, Index, Intrinsic, VarPoint};
pub use equation::{EqId, EqKind, Equation};
pub use solution::{DimRef, Solution, SolutionBuilder};
