//! Stencil solutions and their registry.
//!
//! A solution is anything that can write its dimensions, variables and
//! equations into a [`SolutionBuilder`]. Solutions that take a radius expose
//! it through [`StencilSolution::radius_control`].

pub mod builtin;

use crate::ir::solution::SolutionBuilder;
use crate::utils::errors::{RegistryError, RegistryErrorKind, StencilResult};
use log::info;
use std::collections::BTreeMap;

/// Prefix of solutions that exist to exercise the compiler.
pub const TEST_PREFIX: &str = "test_";

/// Capability of solutions parameterized by a stencil radius.
pub trait RadiusControl {
    fn radius(&self) -> i64;

    /// Set the radius; returns false if the value is rejected.
    fn set_radius(&mut self, radius: i64) -> bool;
}

/// A named stencil definition.
pub trait StencilSolution: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> String;

    /// Write dimensions, variables and equations.
    fn define(&self, builder: &mut SolutionBuilder) -> StencilResult<()>;

    /// Radius handle, for solutions that have one.
    fn radius_control(&mut self) -> Option<&mut dyn RadiusControl> {
        None
    }

    /// Current radius, for solutions that have one.
    fn radius(&self) -> Option<i64> {
        None
    }
}

/// Solutions by unique name.
#[derive(Default)]
pub struct Registry {
    solutions: BTreeMap<String, Box<dyn StencilSolution>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in solution.
    pub fn with_builtins() -> StencilResult<Self> {
        let mut registry = Self::new();
        for soln in builtin::all() {
            registry.register(soln)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, solution: Box<dyn StencilSolution>) -> StencilResult<()> {
        let name = solution.name().to_string();
        if self.solutions.contains_key(&name) {
            return Err(RegistryError {
                message: "a solution with this name is already registered".to_string(),
                solution: name,
                kind: RegistryErrorKind::DuplicateSolution,
            }
            .into());
        }
        self.solutions.insert(name, solution);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> StencilResult<&dyn StencilSolution> {
        self.solutions
            .get(name)
            .map(|s| s.as_ref())
            .ok_or_else(|| unknown(name))
    }

    pub fn lookup_mut(&mut self, name: &str) -> StencilResult<&mut (dyn StencilSolution + 'static)> {
        self.solutions
            .get_mut(name)
            .map(|s| s.as_mut())
            .ok_or_else(|| unknown(name))
    }

    /// Set the radius of a radius-aware solution and return the new value.
    ///
    /// Solutions without a radius ignore the request and return `None`.
    pub fn set_radius(&mut self, name: &str, radius: i64) -> StencilResult<Option<i64>> {
        let solution = self.lookup_mut(name)?;
        let Some(control) = solution.radius_control() else {
            info!("solution '{}' has no radius; ignoring radius {}", name, radius);
            return Ok(None);
        };
        if !control.set_radius(radius) {
            return Err(RegistryError {
                message: format!("radius {} is not valid", radius),
                solution: name.to_string(),
                kind: RegistryErrorKind::InvalidRadius,
            }
            .into());
        }
        Ok(Some(control.radius()))
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.solutions.keys().map(|k| k.as_str()).collect()
    }

    /// (name, has radius) for every solution, examples before test solutions.
    pub fn listing(&self) -> Vec<(&str, bool)> {
        let (tests, examples): (Vec<_>, Vec<_>) = self
            .solutions
            .iter()
            .map(|(k, v)| (k.as_str(), v.radius().is_some()))
            .partition(|(k, _)| k.starts_with(TEST_PREFIX));
        examples.into_iter().chain(tests).collect()
    }

    pub fn len(&self) -> usize {
        self.solutions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.solutions.is_empty()
    }
}

fn unknown(name: &str) -> crate::utils::errors::StencilError {
    RegistryError {
        message: "no solution registered under this name".to_string(),
        solution: name.to_string(),
        kind: RegistryErrorKind::UnknownSolution,
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_registered() {
        let registry = Registry::with_builtins().unwrap();
        assert!(registry.lookup("iso3dfd").is_ok());
        assert!(registry.lookup("test_bundles").is_ok());
        assert_eq!(registry.lookup("nope").err().unwrap().short_name(), "UnknownSolution");

        let listing = registry.listing();
        let first_test = listing.iter().position(|(n, _)| n.starts_with(TEST_PREFIX)).unwrap();
        assert!(listing[..first_test].iter().all(|(n, _)| !n.starts_with(TEST_PREFIX)));
        assert!(listing.contains(&("iso3dfd", true)));
        assert!(listing.contains(&("heat2d", false)));
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut registry = Registry::with_builtins().unwrap();
        let err = registry
            .register(Box::new(builtin::Iso3dfd::default()))
            .unwrap_err();
        assert_eq!(err.short_name(), "DuplicateSolution");
    }

    #[test]
    fn test_radius() {
        let mut registry = Registry::with_builtins().unwrap();
        let err = registry.set_radius("iso3dfd", -1).unwrap_err();
        assert_eq!(err.short_name(), "InvalidRadius");
        assert_eq!(registry.set_radius("iso3dfd", 4).unwrap(), Some(4));
        assert_eq!(registry.lookup("iso3dfd").unwrap().radius(), Some(4));
        assert_eq!(registry.set_radius("heat2d", 4).unwrap(), None);
    }
}
