//! Transformations from finalized equations to an execution plan.

pub mod fold;
pub mod bundle;
pub mod combine;

pub use fold::{compute_cluster, compute_fold, compute_geometry, ClusterTuple, DimTuple, FoldTuple, Geometry};
pub use bundle::{compute_bundles, order_bundles, partition, Bundle, BundleNamer};
pub use combine::CombineCommutative;

use crate::ir::equation::Equation;
use crate::ir::expr::Expr;
use crate::settings::CompilerSettings;
use crate::utils::errors::{StencilError, StencilResult};
use log::debug;
use serde::{Serialize, Deserialize};

/// A rewrite of right-hand-side expressions.
///
/// A pass may restructure an expression but must leave the set of var-points
/// it reads unchanged, so dependences found before the pass stay valid.
pub trait ExprPass {
    /// Rewrite in place; returns whether anything changed.
    fn run(&self, expr: &mut Expr) -> bool;

    fn name(&self) -> &str;
}

/// Statistics from [`optimize`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizationReport {
    /// Passes that changed at least one equation
    pub applied: Vec<String>,
    /// Equations modified by any pass
    pub modified: usize,
    /// Repeated subexpressions found (with CSE enabled)
    pub common_subexprs: usize,
    /// sin/cos pairs found (with pairing enabled)
    pub pairs: usize,
}

/// Run the enabled expression passes over every equation.
pub fn optimize(equations: &mut [Equation], settings: &CompilerSettings) -> StencilResult<OptimizationReport> {
    let mut passes: Vec<Box<dyn ExprPass>> = Vec::new();
    if settings.do_comb {
        passes.push(Box::new(CombineCommutative));
    }
    let mut report = apply_passes(equations, &passes)?;

    if settings.do_cse {
        report.common_subexprs =
            combine::count_common_subexprs(equations.iter().map(|e| &e.rhs), settings.min_expr_size);
    }
    if settings.do_pairs {
        report.pairs = combine::count_pairable_calls(equations.iter().map(|e| &e.rhs));
    }
    debug!(
        "expression passes: {} equations modified, {} common subexpressions, {} pairs",
        report.modified, report.common_subexprs, report.pairs
    );
    Ok(report)
}

/// Run `passes` in order over every equation, checking that each rewrite
/// keeps the var-points read.
pub fn apply_passes(
    equations: &mut [Equation],
    passes: &[Box<dyn ExprPass>],
) -> StencilResult<OptimizationReport> {
    let mut report = OptimizationReport::default();
    for eq in equations.iter_mut() {
        let mut touched = false;
        for pass in passes {
            let before = eq.rhs.point_set();
            if pass.run(&mut eq.rhs) {
                if eq.rhs.point_set() != before {
                    return Err(StencilError::Internal(format!(
                        "pass '{}' changed the points read by {}",
                        pass.name(),
                        eq.id
                    )));
                }
                touched = true;
                if !report.applied.iter().any(|a| a == pass.name()) {
                    report.applied.push(pass.name().to_string());
                }
            }
        }
        if touched {
            report.modified += 1;
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::equation::EqId;
    use crate::ir::expr::{Index, Intrinsic, VarPoint};

    struct DropPoints;

    impl ExprPass for DropPoints {
        fn run(&self, expr: &mut Expr) -> bool {
            *expr = Expr::Const(0.0);
            true
        }

        fn name(&self) -> &str {
            "drop"
        }
    }

    fn eq() -> Equation {
        let p = |x| VarPoint::new("u", vec![Index::Offset { dim: "x".to_string(), offset: x }]);
        let rhs = (Expr::from(p(-1)) + Expr::Const(1.0)) + Expr::Const(2.0);
        Equation::new(EqId(0), p(0), rhs)
    }

    #[test]
    fn test_optimize_reports() {
        let mut eqs = vec![eq()];
        let report = optimize(&mut eqs, &CompilerSettings::default()).unwrap();
        assert_eq!(report.applied, vec!["combine"]);
        assert_eq!(report.modified, 1);

        let settings = CompilerSettings { do_comb: false, ..CompilerSettings::default() };
        let mut eqs = vec![eq()];
        let report = optimize(&mut eqs, &settings).unwrap();
        assert!(report.applied.is_empty());
    }

    #[test]
    fn test_cse_and_pairs_only_report() {
        let p = |x| VarPoint::new("u", vec![Index::Offset { dim: "x".to_string(), offset: x }]);
        let twice = || Expr::from(p(-1)) * Expr::Const(2.0);
        let rhs = Expr::sum(vec![
            twice(),
            twice(),
            Expr::call(Intrinsic::Sin, vec![p(0).into()]),
            Expr::call(Intrinsic::Cos, vec![p(0).into()]),
        ]);
        let original = Equation::new(EqId(0), p(0), rhs);
        let settings = CompilerSettings {
            do_comb: false,
            do_cse: true,
            do_pairs: true,
            ..CompilerSettings::default()
        };

        let mut eqs = vec![original.clone()];
        let report = optimize(&mut eqs, &settings).unwrap();
        assert_eq!(report.common_subexprs, 1);
        assert_eq!(report.pairs, 1);
        assert_eq!(report.modified, 0);
        assert_eq!(eqs[0], original);
    }

    #[test]
    fn test_point_set_guard() {
        let mut eqs = vec![eq()];
        let passes: Vec<Box<dyn ExprPass>> = vec![Box::new(DropPoints)];
        let err = apply_passes(&mut eqs, &passes).unwrap_err();
        assert_eq!(err.short_name(), "InternalError");
    }
}
