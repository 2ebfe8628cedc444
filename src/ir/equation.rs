//! Stencil equations.

use crate::ir::expr::{Expr, VarPoint};
use serde::{Serialize, Deserialize};
use std::fmt;

/// Identifier of an equation: its position in definition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EqId(pub usize);

impl fmt::Display for EqId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{}", self.0)
    }
}

/// How an equation may reference its own output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EqKind {
    /// Plain assignment; reading its own same-step output is an error
    #[default]
    Assign,
    /// Associative accumulation that may read the point it writes
    Reduction,
}

/// A single assignment `target = rhs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Equation {
    pub id: EqId,
    pub target: VarPoint,
    pub rhs: Expr,
    pub kind: EqKind,
}

impl Equation {
    pub fn new(id: EqId, target: VarPoint, rhs: Expr) -> Self {
        Self {
            id,
            target,
            rhs,
            kind: EqKind::Assign,
        }
    }

    pub fn with_kind(mut self, kind: EqKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn target_var(&self) -> &str {
        &self.target.var
    }

    pub fn is_reduction(&self) -> bool {
        self.kind == EqKind::Reduction
    }

    /// Points read by the right-hand side.
    pub fn reads(&self) -> Vec<&VarPoint> {
        self.rhs.var_points()
    }

    /// Step index written, relative to the evaluation step.
    pub fn write_step_offset(&self, step_dim: &str) -> i64 {
        self.target.offset_in(step_dim).unwrap_or(0)
    }
}

impl fmt::Display for Equation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.kind {
            EqKind::Assign => "=",
            EqKind::Reduction => "+=",
        };
        write!(f, "{} {} {}", self.target, op, self.rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::expr::Index;

    #[test]
    fn test_equation_display() {
        let target = VarPoint::new("u", vec![Index::Offset { dim: "t".to_string(), offset: 1 }]);
        let read = VarPoint::new("u", vec![Index::Offset { dim: "t".to_string(), offset: 0 }]);
        let eq = Equation::new(EqId(0), target, Expr::from(read) * Expr::Const(2.0));
        assert_eq!(eq.to_string(), "u(t+1) = (u(t) * 2.0)");
        assert_eq!(eq.write_step_offset("t"), 1);
        assert_eq!(eq.reads().len(), 1);
        assert!(!eq.is_reduction());
    }
}
