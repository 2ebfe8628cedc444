//! Analysis passes over finalized solutions.

pub mod dependence;

pub use dependence::{DepEdge, DependencyGraph, DependencyGraphSummary};

use crate::ir::solution::Solution;
use crate::utils::errors::StencilResult;

/// Find the dependences of a solution.
pub fn analyze_dependencies(solution: &Solution, find_deps: bool) -> StencilResult<DependencyGraph> {
    DependencyGraph::build(solution, find_deps)
}
