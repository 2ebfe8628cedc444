//! Built-in solutions.
//!
//! `iso3dfd` and `3axis` take a radius; the `test_*` solutions exist to
//! exercise bundling, misc dimensions and error paths.

use super::{RadiusControl, StencilSolution};
use crate::ir::dims::DimKind;
use crate::ir::expr::Expr;
use crate::ir::solution::SolutionBuilder;
use crate::utils::errors::StencilResult;

/// Largest radius accepted by the radius-aware solutions.
pub const MAX_RADIUS: i64 = 16;

/// Every built-in solution, in no particular order.
pub fn all() -> Vec<Box<dyn StencilSolution>> {
    vec![
        Box::new(Iso3dfd::default()),
        Box::new(ThreeAxis::default()),
        Box::new(Heat2d),
        Box::new(TestBundles),
        Box::new(TestChain),
        Box::new(TestMisc),
        Box::new(TestReduction),
        Box::new(TestCycle),
    ]
}

fn valid_radius(r: i64) -> bool {
    (1..=MAX_RADIUS).contains(&r)
}

/// Finite-difference weight for distance `r` of a stencil of radius `radius`.
fn coefficient(r: i64, radius: i64) -> f64 {
    if r == 0 {
        -2.0 * (1..=radius).map(|i| 1.0 / (i * i) as f64).sum::<f64>()
    } else {
        1.0 / (r * r) as f64
    }
}

fn step_space(b: &mut SolutionBuilder, domain: &[&str]) -> StencilResult<()> {
    b.step_dim("t")?;
    for d in domain {
        b.domain_dim(d)?;
    }
    Ok(())
}

/// Isotropic 3-D finite-difference wave propagation.
#[derive(Debug, Clone)]
pub struct Iso3dfd {
    radius: i64,
}

impl Default for Iso3dfd {
    fn default() -> Self {
        Self { radius: 8 }
    }
}

impl RadiusControl for Iso3dfd {
    fn radius(&self) -> i64 {
        self.radius
    }

    fn set_radius(&mut self, radius: i64) -> bool {
        if !valid_radius(radius) {
            return false;
        }
        self.radius = radius;
        true
    }
}

impl StencilSolution for Iso3dfd {
    fn name(&self) -> &str {
        "iso3dfd"
    }

    fn description(&self) -> String {
        format!("isotropic 3-D wave equation, radius {}", self.radius)
    }

    fn define(&self, b: &mut SolutionBuilder) -> StencilResult<()> {
        step_space(b, &["x", "y", "z"])?;
        let p = b.new_var("pressure", &["t", "x", "y", "z"])?;
        let vel = b.new_var("vel", &["x", "y", "z"])?;

        let r = self.radius;
        let mut lap = vec![Expr::from(p.at(&[0, 0, 0, 0])) * coefficient(0, r).into()];
        for i in 1..=r {
            let sum = Expr::sum(vec![
                p.at(&[0, -i, 0, 0]).into(),
                p.at(&[0, i, 0, 0]).into(),
                p.at(&[0, 0, -i, 0]).into(),
                p.at(&[0, 0, i, 0]).into(),
                p.at(&[0, 0, 0, -i]).into(),
                p.at(&[0, 0, 0, i]).into(),
            ]);
            lap.push(sum * coefficient(i, r).into());
        }
        let next = Expr::Const(2.0) * p.at(&[0, 0, 0, 0]).into() - p.at(&[-1, 0, 0, 0]).into()
            + Expr::from(vel.at(&[0, 0, 0])) * Expr::sum(lap);
        b.add_eq(p.at(&[1, 0, 0, 0]), next)?;
        Ok(())
    }

    fn radius_control(&mut self) -> Option<&mut dyn RadiusControl> {
        Some(self)
    }

    fn radius(&self) -> Option<i64> {
        Some(self.radius)
    }
}

/// Diffusion along the three axes only.
#[derive(Debug, Clone)]
pub struct ThreeAxis {
    radius: i64,
}

impl Default for ThreeAxis {
    fn default() -> Self {
        Self { radius: 4 }
    }
}

impl RadiusControl for ThreeAxis {
    fn radius(&self) -> i64 {
        self.radius
    }

    fn set_radius(&mut self, radius: i64) -> bool {
        if !valid_radius(radius) {
            return false;
        }
        self.radius = radius;
        true
    }
}

impl StencilSolution for ThreeAxis {
    fn name(&self) -> &str {
        "3axis"
    }

    fn description(&self) -> String {
        format!("axis-aligned 3-D average, radius {}", self.radius)
    }

    fn define(&self, b: &mut SolutionBuilder) -> StencilResult<()> {
        step_space(b, &["x", "y", "z"])?;
        let u = b.new_var("data", &["t", "x", "y", "z"])?;
        let r = self.radius;
        let mut terms: Vec<Expr> = vec![u.at(&[0, 0, 0, 0]).into()];
        for i in 1..=r {
            for off in [-i, i] {
                terms.push(u.at(&[0, off, 0, 0]).into());
                terms.push(u.at(&[0, 0, off, 0]).into());
                terms.push(u.at(&[0, 0, 0, off]).into());
            }
        }
        let n = terms.len() as f64;
        b.add_eq(u.at(&[1, 0, 0, 0]), Expr::sum(terms) / Expr::Const(n))?;
        Ok(())
    }

    fn radius_control(&mut self) -> Option<&mut dyn RadiusControl> {
        Some(self)
    }

    fn radius(&self) -> Option<i64> {
        Some(self.radius)
    }
}

/// 2-D explicit heat equation.
#[derive(Debug, Clone, Copy)]
pub struct Heat2d;

impl StencilSolution for Heat2d {
    fn name(&self) -> &str {
        "heat2d"
    }

    fn description(&self) -> String {
        "2-D explicit heat diffusion".to_string()
    }

    fn define(&self, b: &mut SolutionBuilder) -> StencilResult<()> {
        let u = b.new_var(
            "temp",
            &[("t", DimKind::Step), ("x", DimKind::Domain), ("y", DimKind::Domain)],
        )?;
        let neighbors = Expr::sum(vec![
            u.at(&[0, -1, 0]).into(),
            u.at(&[0, 1, 0]).into(),
            u.at(&[0, 0, -1]).into(),
            u.at(&[0, 0, 1]).into(),
        ]);
        let center: Expr = u.at(&[0, 0, 0]).into();
        let next = center.clone() + Expr::Const(0.1) * (neighbors - Expr::Const(4.0) * center);
        b.add_eq(u.at(&[1, 0, 0]), next)?;
        Ok(())
    }
}

/// Three independent 1-D updates named for bundle-targeting tests.
#[derive(Debug, Clone, Copy)]
pub struct TestBundles;

impl StencilSolution for TestBundles {
    fn name(&self) -> &str {
        "test_bundles"
    }

    fn description(&self) -> String {
        "independent foo1, foo2 and bar1".to_string()
    }

    fn define(&self, b: &mut SolutionBuilder) -> StencilResult<()> {
        step_space(b, &["x"])?;
        for name in ["foo1", "foo2", "bar1"] {
            let v = b.new_var(name, &["t", "x"])?;
            let rhs = Expr::sum(vec![v.at(&[0, -1]).into(), v.at(&[0, 1]).into()]) * Expr::Const(0.5);
            b.add_eq(v.at(&[1, 0]), rhs)?;
        }
        Ok(())
    }
}

/// Like `test_bundles`, but foo2 reads foo1 in the same step.
#[derive(Debug, Clone, Copy)]
pub struct TestChain;

impl StencilSolution for TestChain {
    fn name(&self) -> &str {
        "test_chain"
    }

    fn description(&self) -> String {
        "foo2 depends on foo1 within a step".to_string()
    }

    fn define(&self, b: &mut SolutionBuilder) -> StencilResult<()> {
        step_space(b, &["x"])?;
        let foo1 = b.new_var("foo1", &["t", "x"])?;
        let foo2 = b.new_var("foo2", &["t", "x"])?;
        let bar1 = b.new_var("bar1", &["t", "x"])?;
        b.add_eq(
            foo1.at(&[1, 0]),
            Expr::sum(vec![foo1.at(&[0, -1]).into(), foo1.at(&[0, 1]).into()]) * Expr::Const(0.5),
        )?;
        b.add_eq(
            foo2.at(&[1, 0]),
            Expr::from(foo2.at(&[0, 0])) + Expr::from(foo1.at(&[1, 1])),
        )?;
        b.add_eq(bar1.at(&[1, 0]), Expr::from(bar1.at(&[0, 0])) * Expr::Const(0.9))?;
        Ok(())
    }
}

/// Two-component field coupled through a misc dimension.
#[derive(Debug, Clone, Copy)]
pub struct TestMisc;

impl StencilSolution for TestMisc {
    fn name(&self) -> &str {
        "test_misc"
    }

    fn description(&self) -> String {
        "two components of one field along misc dimension c".to_string()
    }

    fn define(&self, b: &mut SolutionBuilder) -> StencilResult<()> {
        step_space(b, &["x", "y"])?;
        b.misc_dim("c")?;
        let f = b.new_var("field", &["t", "x", "y", "c"])?;
        b.add_eq(
            f.at(&[1, 0, 0, 0]),
            Expr::from(f.at(&[0, 0, 0, 0])) - Expr::Const(0.25) * (Expr::from(f.at(&[0, 1, 0, 1])) - f.at(&[0, -1, 0, 1]).into()),
        )?;
        b.add_eq(
            f.at(&[1, 0, 0, 1]),
            Expr::from(f.at(&[0, 0, 0, 1])) - Expr::Const(0.25) * (Expr::from(f.at(&[1, 0, 1, 0])) - f.at(&[1, 0, -1, 0]).into()),
        )?;
        Ok(())
    }
}

/// An accumulation that reads the point it writes.
#[derive(Debug, Clone, Copy)]
pub struct TestReduction;

impl StencilSolution for TestReduction {
    fn name(&self) -> &str {
        "test_reduction"
    }

    fn description(&self) -> String {
        "running sum of a source field".to_string()
    }

    fn define(&self, b: &mut SolutionBuilder) -> StencilResult<()> {
        step_space(b, &["x"])?;
        let src = b.new_var("src", &["t", "x"])?;
        let acc = b.new_var("acc", &["t", "x"])?;
        b.add_eq(src.at(&[1, 0]), Expr::from(src.at(&[0, 1])) * Expr::Const(0.5))?;
        b.add_reduction(
            acc.at(&[1, 0]),
            Expr::from(acc.at(&[1, 0])) + src.at(&[1, 0]).into(),
        )?;
        Ok(())
    }
}

/// Two updates that read each other within a step; always rejected.
#[derive(Debug, Clone, Copy)]
pub struct TestCycle;

impl StencilSolution for TestCycle {
    fn name(&self) -> &str {
        "test_cycle"
    }

    fn description(&self) -> String {
        "same-step cycle between ping and pong".to_string()
    }

    fn define(&self, b: &mut SolutionBuilder) -> StencilResult<()> {
        step_space(b, &["x"])?;
        let ping = b.new_var("ping", &["t", "x"])?;
        let pong = b.new_var("pong", &["t", "x"])?;
        b.add_eq(ping.at(&[1, 0]), pong.at(&[1, -1]).into())?;
        b.add_eq(pong.at(&[1, 0]), ping.at(&[1, 1]).into())?;
        Ok(())
    }
}
