//! Var-points and right-hand-side expressions.
//!
//! A var-point names a variable and gives one index per variable dimension:
//! step and domain dimensions are indexed relative to the evaluation point
//! (`x+1`), misc dimensions by constants (`c=2`). Because every read is
//! relative, dependence analysis never has to solve index equations.

use serde::{Serialize, Deserialize};
use std::collections::BTreeSet;
use std::fmt;
use std::ops;

/// One index of a var-point.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Index {
    /// Evaluation point plus a constant offset (step and domain dims)
    Offset { dim: String, offset: i64 },
    /// Absolute index (misc dims)
    Const { dim: String, value: i64 },
}

impl Index {
    pub fn dim(&self) -> &str {
        match self {
            Index::Offset { dim, .. } | Index::Const { dim, .. } => dim,
        }
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Index::Offset { dim, offset } => match offset.cmp(&0) {
                std::cmp::Ordering::Equal => write!(f, "{}", dim),
                std::cmp::Ordering::Greater => write!(f, "{}+{}", dim, offset),
                std::cmp::Ordering::Less => write!(f, "{}{}", dim, offset),
            },
            Index::Const { dim, value } => write!(f, "{}={}", dim, value),
        }
    }
}

/// A reference to one element of a variable, relative to the evaluation point.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VarPoint {
    pub var: String,
    pub indices: Vec<Index>,
}

impl VarPoint {
    pub fn new(var: impl Into<String>, indices: Vec<Index>) -> Self {
        Self { var: var.into(), indices }
    }

    /// Relative offset along a step or domain dimension.
    pub fn offset_in(&self, dim: &str) -> Option<i64> {
        self.indices.iter().find_map(|i| match i {
            Index::Offset { dim: d, offset } if d == dim => Some(*offset),
            _ => None,
        })
    }

    /// Constant index along a misc dimension.
    pub fn misc_value(&self, dim: &str) -> Option<i64> {
        self.indices.iter().find_map(|i| match i {
            Index::Const { dim: d, value } if d == dim => Some(*value),
            _ => None,
        })
    }

    /// Misc indices in declaration order; two points can only alias if these match.
    pub fn misc_key(&self) -> Vec<(String, i64)> {
        self.indices
            .iter()
            .filter_map(|i| match i {
                Index::Const { dim, value } => Some((dim.clone(), *value)),
                _ => None,
            })
            .collect()
    }
}

impl fmt::Display for VarPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let idx: Vec<String> = self.indices.iter().map(|i| i.to_string()).collect();
        write!(f, "{}({})", self.var, idx.join(", "))
    }
}

/// Intrinsic functions allowed in expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Intrinsic {
    Sqrt,
    Sin,
    Cos,
    Exp,
    Abs,
    Min,
    Max,
}

impl Intrinsic {
    pub fn name(&self) -> &'static str {
        match self {
            Intrinsic::Sqrt => "sqrt",
            Intrinsic::Sin => "sin",
            Intrinsic::Cos => "cos",
            Intrinsic::Exp => "exp",
            Intrinsic::Abs => "abs",
            Intrinsic::Min => "min",
            Intrinsic::Max => "max",
        }
    }

    fn apply(&self, args: &[f64]) -> f64 {
        let a = args.first().copied().unwrap_or(0.0);
        match self {
            Intrinsic::Sqrt => a.sqrt(),
            Intrinsic::Sin => a.sin(),
            Intrinsic::Cos => a.cos(),
            Intrinsic::Exp => a.exp(),
            Intrinsic::Abs => a.abs(),
            Intrinsic::Min => args.iter().copied().fold(f64::INFINITY, f64::min),
            Intrinsic::Max => args.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

/// Right-hand-side expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Const(f64),
    Point(VarPoint),
    Neg(Box<Expr>),
    /// N-ary sum
    Add(Vec<Expr>),
    /// N-ary product
    Mul(Vec<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Call { func: Intrinsic, args: Vec<Expr> },
}

impl Expr {
    pub fn constant(v: f64) -> Self {
        Expr::Const(v)
    }

    pub fn point(p: VarPoint) -> Self {
        Expr::Point(p)
    }

    pub fn call(func: Intrinsic, args: Vec<Expr>) -> Self {
        Expr::Call { func, args }
    }

    /// Sum of a list of terms (a single term is returned as is).
    pub fn sum(mut terms: Vec<Expr>) -> Self {
        match terms.len() {
            0 => Expr::Const(0.0),
            1 => terms.remove(0),
            _ => Expr::Add(terms),
        }
    }

    /// All var-points read by this expression, in traversal order.
    pub fn var_points(&self) -> Vec<&VarPoint> {
        let mut out = Vec::new();
        self.collect_points(&mut out);
        out
    }

    fn collect_points<'a>(&'a self, out: &mut Vec<&'a VarPoint>) {
        match self {
            Expr::Const(_) => {}
            Expr::Point(p) => out.push(p),
            Expr::Neg(e) => e.collect_points(out),
            Expr::Add(terms) | Expr::Mul(terms) => {
                for t in terms {
                    t.collect_points(out);
                }
            }
            Expr::Sub(a, b) | Expr::Div(a, b) => {
                a.collect_points(out);
                b.collect_points(out);
            }
            Expr::Call { args, .. } => {
                for a in args {
                    a.collect_points(out);
                }
            }
        }
    }

    /// Distinct var-points read, for checking that rewrites preserve them.
    pub fn point_set(&self) -> BTreeSet<VarPoint> {
        self.var_points().into_iter().cloned().collect()
    }

    /// Number of nodes in the tree.
    pub fn size(&self) -> usize {
        1 + match self {
            Expr::Const(_) | Expr::Point(_) => 0,
            Expr::Neg(e) => e.size(),
            Expr::Add(terms) | Expr::Mul(terms) => terms.iter().map(|t| t.size()).sum(),
            Expr::Sub(a, b) | Expr::Div(a, b) => a.size() + b.size(),
            Expr::Call { args, .. } => args.iter().map(|a| a.size()).sum(),
        }
    }

    /// Number of floating-point operations for one scalar evaluation.
    pub fn fp_ops(&self) -> usize {
        match self {
            Expr::Const(_) | Expr::Point(_) => 0,
            Expr::Neg(e) => 1 + e.fp_ops(),
            Expr::Add(terms) | Expr::Mul(terms) => {
                terms.len().saturating_sub(1) + terms.iter().map(|t| t.fp_ops()).sum::<usize>()
            }
            Expr::Sub(a, b) | Expr::Div(a, b) => 1 + a.fp_ops() + b.fp_ops(),
            Expr::Call { args, .. } => 1 + args.iter().map(|a| a.fp_ops()).sum::<usize>(),
        }
    }

    /// Evaluate with a caller-supplied var-point lookup.
    pub fn eval<F: FnMut(&VarPoint) -> f64>(&self, lookup: &mut F) -> f64 {
        match self {
            Expr::Const(v) => *v,
            Expr::Point(p) => lookup(p),
            Expr::Neg(e) => -e.eval(lookup),
            Expr::Add(terms) => terms.iter().map(|t| t.eval(lookup)).sum(),
            Expr::Mul(terms) => terms.iter().map(|t| t.eval(lookup)).product(),
            Expr::Sub(a, b) => a.eval(lookup) - b.eval(lookup),
            Expr::Div(a, b) => a.eval(lookup) / b.eval(lookup),
            Expr::Call { func, args } => {
                let vals: Vec<f64> = args.iter().map(|a| a.eval(lookup)).collect();
                func.apply(&vals)
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const(v) => write!(f, "{:?}", v),
            Expr::Point(p) => write!(f, "{}", p),
            Expr::Neg(e) => write!(f, "(-{})", e),
            Expr::Add(terms) => write_joined(f, terms, " + "),
            Expr::Mul(terms) => write_joined(f, terms, " * "),
            Expr::Sub(a, b) => write!(f, "({} - {})", a, b),
            Expr::Div(a, b) => write!(f, "({} / {})", a, b),
            Expr::Call { func, args } => {
                let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "{}({})", func.name(), args.join(", "))
            }
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, terms: &[Expr], sep: &str) -> fmt::Result {
    let parts: Vec<String> = terms.iter().map(|t| t.to_string()).collect();
    write!(f, "({})", parts.join(sep))
}

impl From<f64> for Expr {
    fn from(v: f64) -> Self {
        Expr::Const(v)
    }
}

impl From<VarPoint> for Expr {
    fn from(p: VarPoint) -> Self {
        Expr::Point(p)
    }
}

impl ops::Add for Expr {
    type Output = Expr;
    fn add(self, rhs: Expr) -> Expr {
        Expr::Add(vec![self, rhs])
    }
}

impl ops::Sub for Expr {
    type Output = Expr;
    fn sub(self, rhs: Expr) -> Expr {
        Expr::Sub(Box::new(self), Box::new(rhs))
    }
}

impl ops::Mul for Expr {
    type Output = Expr;
    fn mul(self, rhs: Expr) -> Expr {
        Expr::Mul(vec![self, rhs])
    }
}

impl ops::Div for Expr {
    type Output = Expr;
    fn div(self, rhs: Expr) -> Expr {
        Expr::Div(Box::new(self), Box::new(rhs))
    }
}

impl ops::Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::Neg(Box::new(self))
    }
}
