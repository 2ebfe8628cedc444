//! Expression rewrites and statistics.

use crate::ir::expr::{Expr, Intrinsic};
use crate::transform::ExprPass;
use std::collections::BTreeMap;

/// Flattens nested sums and products and merges their constant terms.
#[derive(Debug, Clone, Copy, Default)]
pub struct CombineCommutative;

impl ExprPass for CombineCommutative {
    fn name(&self) -> &str {
        "combine"
    }

    fn run(&self, expr: &mut Expr) -> bool {
        combine(expr)
    }
}

fn combine(expr: &mut Expr) -> bool {
    let mut changed = match expr {
        Expr::Const(_) | Expr::Point(_) => false,
        Expr::Neg(e) => combine(e),
        Expr::Add(terms) | Expr::Mul(terms) => terms.iter_mut().fold(false, |c, t| combine(t) | c),
        Expr::Sub(a, b) | Expr::Div(a, b) => combine(a) | combine(b),
        Expr::Call { args, .. } => args.iter_mut().fold(false, |c, a| combine(a) | c),
    };

    match expr {
        Expr::Add(terms) => {
            changed |= flatten_sum(terms);
            changed |= merge_constants(terms, 0.0, |a, b| a + b);
        }
        Expr::Mul(terms) => {
            changed |= flatten_product(terms);
            changed |= merge_constants(terms, 1.0, |a, b| a * b);
        }
        _ => {}
    }

    let single = match expr {
        Expr::Add(terms) | Expr::Mul(terms) if terms.len() == 1 => terms.pop(),
        _ => None,
    };
    if let Some(only) = single {
        *expr = only;
        changed = true;
    }
    changed
}

fn flatten_sum(terms: &mut Vec<Expr>) -> bool {
    if !terms.iter().any(|t| matches!(t, Expr::Add(_))) {
        return false;
    }
    let mut flat = Vec::with_capacity(terms.len());
    for t in terms.drain(..) {
        match t {
            Expr::Add(inner) => flat.extend(inner),
            other => flat.push(other),
        }
    }
    *terms = flat;
    true
}

fn flatten_product(terms: &mut Vec<Expr>) -> bool {
    if !terms.iter().any(|t| matches!(t, Expr::Mul(_))) {
        return false;
    }
    let mut flat = Vec::with_capacity(terms.len());
    for t in terms.drain(..) {
        match t {
            Expr::Mul(inner) => flat.extend(inner),
            other => flat.push(other),
        }
    }
    *terms = flat;
    true
}

fn merge_constants(terms: &mut Vec<Expr>, identity: f64, op: impl Fn(f64, f64) -> f64) -> bool {
    let n_const = terms.iter().filter(|t| matches!(t, Expr::Const(_))).count();
    if n_const < 2 {
        return false;
    }
    let mut acc = identity;
    terms.retain(|t| match t {
        Expr::Const(v) => {
            acc = op(acc, *v);
            false
        }
        _ => true,
    });
    terms.push(Expr::Const(acc));
    true
}

/// Number of repeated subexpressions with at least `min_size` nodes.
///
/// Each distinct repeated subtree counts once per extra occurrence.
pub fn count_common_subexprs<'a>(exprs: impl IntoIterator<Item = &'a Expr>, min_size: usize) -> usize {
    let mut seen: BTreeMap<String, usize> = BTreeMap::new();
    for e in exprs {
        visit_subexprs(e, min_size, &mut seen);
    }
    seen.values().map(|n| n.saturating_sub(1)).sum()
}

fn visit_subexprs(expr: &Expr, min_size: usize, seen: &mut BTreeMap<String, usize>) {
    if expr.size() >= min_size.max(2) {
        *seen.entry(expr.to_string()).or_insert(0) += 1;
    }
    match expr {
        Expr::Const(_) | Expr::Point(_) => {}
        Expr::Neg(e) => visit_subexprs(e, min_size, seen),
        Expr::Add(terms) | Expr::Mul(terms) => {
            for t in terms {
                visit_subexprs(t, min_size, seen);
            }
        }
        Expr::Sub(a, b) | Expr::Div(a, b) => {
            visit_subexprs(a, min_size, seen);
            visit_subexprs(b, min_size, seen);
        }
        Expr::Call { args, .. } => {
            for a in args {
                visit_subexprs(a, min_size, seen);
            }
        }
    }
}

/// Number of `sin`/`cos` calls on the same argument that could share one
/// evaluation.
pub fn count_pairable_calls<'a>(exprs: impl IntoIterator<Item = &'a Expr>) -> usize {
    let mut sins: BTreeMap<String, usize> = BTreeMap::new();
    let mut coss: BTreeMap<String, usize> = BTreeMap::new();
    for e in exprs {
        collect_calls(e, &mut sins, &mut coss);
    }
    sins.iter()
        .map(|(arg, n)| (*n).min(coss.get(arg).copied().unwrap_or(0)))
        .sum()
}

fn collect_calls(expr: &Expr, sins: &mut BTreeMap<String, usize>, coss: &mut BTreeMap<String, usize>) {
    match expr {
        Expr::Const(_) | Expr::Point(_) => {}
        Expr::Neg(e) => collect_calls(e, sins, coss),
        Expr::Add(terms) | Expr::Mul(terms) => {
            for t in terms {
                collect_calls(t, sins, coss);
            }
        }
        Expr::Sub(a, b) | Expr::Div(a, b) => {
            collect_calls(a, sins, coss);
            collect_calls(b, sins, coss);
        }
        Expr::Call { func, args } => {
            let key = args.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(",");
            match func {
                Intrinsic::Sin => *sins.entry(key).or_insert(0) += 1,
                Intrinsic::Cos => *coss.entry(key).or_insert(0) += 1,
                _ => {}
            }
            for a in args {
                collect_calls(a, sins, coss);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::expr::{Index, VarPoint};

    fn pt(x: i64) -> Expr {
        Expr::Point(VarPoint::new(
            "u",
            vec![Index::Offset { dim: "x".to_string(), offset: x }],
        ))
    }

    #[test]
    fn test_flatten_and_merge() {
        let mut e = (pt(-1) + Expr::Const(1.0)) + (pt(1) + Expr::Const(2.0));
        let before = e.point_set();
        assert!(CombineCommutative.run(&mut e));
        assert_eq!(e.to_string(), "(u(x-1) + u(x+1) + 3.0)");
        assert_eq!(e.point_set(), before);
        assert!(!CombineCommutative.run(&mut e));
    }

    #[test]
    fn test_single_term_collapses() {
        let mut e = Expr::Mul(vec![Expr::Const(2.0), Expr::Const(3.0)]);
        assert!(CombineCommutative.run(&mut e));
        assert_eq!(e, Expr::Const(6.0));
    }

    #[test]
    fn test_common_subexprs() {
        let shared = pt(-1) + pt(1);
        let a = shared.clone() * Expr::Const(0.5);
        let b = shared - pt(0);
        assert_eq!(count_common_subexprs([&a, &b], 2), 1);
        assert_eq!(count_common_subexprs([&a], 2), 0);
    }

    #[test]
    fn test_pairable_calls() {
        let e = Expr::call(Intrinsic::Sin, vec![pt(0)]) + Expr::call(Intrinsic::Cos, vec![pt(0)]);
        assert_eq!(count_pairable_calls([&e]), 1);
        let f = Expr::call(Intrinsic::Sin, vec![pt(1)]) + Expr::call(Intrinsic::Cos, vec![pt(0)]);
        assert_eq!(count_pairable_calls([&f]), 0);
    }
}
