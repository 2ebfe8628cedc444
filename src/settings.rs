//! Compiler settings.
//!
//! One `CompilerSettings` value is built per invocation (from the command
//! line or programmatically) and is read-only during compilation.

use crate::utils::errors::{SettingsError, StencilResult};
use serde::{Serialize, Deserialize};

/// Base-name used for bundles that no targeting rule claims.
pub const DEFAULT_BUNDLE_BASENAME: &str = "stencil_bundle";

/// A rule that sends updates of matching variables to bundles named `basename`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleTarget {
    /// Base-name template; may reference the match (see `transform::bundle`)
    pub basename: String,
    /// Regex searched in the target variable's name
    pub pattern: String,
}

/// All recognized compiler options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompilerSettings {
    /// Bytes per floating-point element (4 or 8)
    pub elem_bytes: usize,
    /// Explicit domain dimensions, in order
    pub domain_dims: Vec<String>,
    /// Explicit step dimension
    pub step_dim: Option<String>,
    /// Requested fold sizes
    pub fold_options: Vec<(String, i64)>,
    /// Requested cluster multipliers
    pub cluster_options: Vec<(String, i64)>,
    /// Only keep updates to variables matching this regex
    pub var_regex: Option<String>,
    /// Ordered bundle targeting rules
    pub eq_bundle_targets: Vec<BundleTarget>,
    pub default_bundle_basename: String,
    /// Make the first domain dimension unit-stride
    pub first_inner: bool,
    /// Emit simple unaligned loads (1-D folds only)
    pub allow_unaligned_loads: bool,
    /// Combine commutative operations
    pub do_comb: bool,
    /// Report repeated subexpressions; equations are left unchanged
    pub do_cse: bool,
    /// Report sin/cos calls on a shared argument; equations are left unchanged
    pub do_pairs: bool,
    /// Cross-vector optimization within a cluster; recorded only
    pub do_opt_cluster: bool,
    /// Find dependencies between equations
    pub find_deps: bool,
    /// Log each equation as it is defined
    pub print_eqs: bool,
    /// Bundle scratch equations even if scratch sizes grow
    pub bundle_scratch: bool,
    /// Lay out misc dimensions innermost
    pub inner_misc: bool,
    /// Expression-size threshold above which an equation is reported
    pub max_expr_size: usize,
    /// Minimum expression size considered for reuse
    pub min_expr_size: usize,
    /// Halo width forced on every variable
    pub halo_size: Option<i64>,
    /// Step allocation forced on every variable
    pub step_alloc: Option<i64>,
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self {
            elem_bytes: 4,
            domain_dims: Vec::new(),
            step_dim: None,
            fold_options: Vec::new(),
            cluster_options: Vec::new(),
            var_regex: None,
            eq_bundle_targets: Vec::new(),
            default_bundle_basename: DEFAULT_BUNDLE_BASENAME.to_string(),
            first_inner: false,
            allow_unaligned_loads: false,
            do_comb: true,
            do_cse: true,
            do_pairs: true,
            do_opt_cluster: true,
            find_deps: true,
            print_eqs: false,
            bundle_scratch: true,
            inner_misc: false,
            max_expr_size: 50,
            min_expr_size: 2,
            halo_size: None,
            step_alloc: None,
        }
    }
}

impl CompilerSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn elem_bytes(mut self, n: usize) -> Self {
        self.elem_bytes = n;
        self
    }

    pub fn domain_dims(mut self, dims: &[&str]) -> Self {
        self.domain_dims = dims.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn step_dim(mut self, dim: &str) -> Self {
        self.step_dim = Some(dim.to_string());
        self
    }

    /// Set one fold size, replacing an earlier value for the same dimension.
    pub fn fold(mut self, dim: &str, size: i64) -> Self {
        set_dim_size(&mut self.fold_options, dim, size);
        self
    }

    /// Set one cluster multiplier, replacing an earlier value for the same dimension.
    pub fn cluster(mut self, dim: &str, size: i64) -> Self {
        set_dim_size(&mut self.cluster_options, dim, size);
        self
    }

    pub fn bundle_target(mut self, basename: &str, pattern: &str) -> Self {
        self.eq_bundle_targets.push(BundleTarget {
            basename: basename.to_string(),
            pattern: pattern.to_string(),
        });
        self
    }

    pub fn var_regex(mut self, pattern: &str) -> Self {
        self.var_regex = Some(pattern.to_string());
        self
    }

    pub fn first_inner(mut self, first: bool) -> Self {
        self.first_inner = first;
        self
    }

    pub fn find_deps(mut self, enable: bool) -> Self {
        self.find_deps = enable;
        self
    }

    pub fn halo_size(mut self, size: i64) -> Self {
        self.halo_size = Some(size);
        self
    }

    pub fn step_alloc(mut self, size: i64) -> Self {
        self.step_alloc = Some(size);
        self
    }

    /// Reject values outside the recognized ranges.
    pub fn validate(&self) -> StencilResult<()> {
        if self.elem_bytes != 4 && self.elem_bytes != 8 {
            return Err(SettingsError::new(
                "elem-bytes",
                format!("{} is not supported; use 4 or 8", self.elem_bytes),
            )
            .into());
        }
        if self.min_expr_size > self.max_expr_size {
            return Err(SettingsError::new(
                "min-es",
                format!(
                    "minimum expression size {} exceeds maximum {}",
                    self.min_expr_size, self.max_expr_size
                ),
            )
            .into());
        }
        if let Some(h) = self.halo_size {
            if h < 0 {
                return Err(SettingsError::new("halo", format!("{} is negative", h)).into());
            }
        }
        if let Some(s) = self.step_alloc {
            if s < 1 {
                return Err(SettingsError::new("step-alloc", format!("{} is less than 1", s)).into());
            }
        }
        if self.default_bundle_basename.is_empty() {
            return Err(SettingsError::new("eq-bundles", "default base-name is empty").into());
        }
        for target in &self.eq_bundle_targets {
            regex::Regex::new(&target.pattern).map_err(|e| {
                SettingsError::new("eq-bundles", format!("bad pattern '{}': {}", target.pattern, e))
            })?;
        }
        if let Some(ref pattern) = self.var_regex {
            regex::Regex::new(pattern)
                .map_err(|e| SettingsError::new("vars", format!("bad pattern '{}': {}", pattern, e)))?;
        }
        Ok(())
    }
}

fn set_dim_size(list: &mut Vec<(String, i64)>, dim: &str, size: i64) {
    match list.iter_mut().find(|(d, _)| d == dim) {
        Some(entry) => entry.1 = size,
        None => list.push((dim.to_string(), size)),
    }
}

/// Parse `x=4,y=2` into ordered (dimension, size) pairs.
pub fn parse_dim_sizes(option: &str, text: &str) -> StencilResult<Vec<(String, i64)>> {
    let mut out: Vec<(String, i64)> = Vec::new();
    for (key, value) in parse_key_values(option, text)? {
        let size = value.trim().parse::<i64>().map_err(|_| {
            SettingsError::new(option, format!("'{}' is not an integer for dimension '{}'", value, key))
        })?;
        set_dim_size(&mut out, &key, size);
    }
    Ok(out)
}

/// Parse `a=foo,b=b[aeiou]r` into ordered bundle targeting rules.
pub fn parse_bundle_targets(text: &str) -> StencilResult<Vec<BundleTarget>> {
    parse_key_values("eq-bundles", text)?
        .into_iter()
        .map(|(basename, pattern)| {
            if pattern.is_empty() {
                return Err(SettingsError::new("eq-bundles", format!("empty pattern for '{}'", basename)).into());
            }
            Ok(BundleTarget { basename, pattern })
        })
        .collect()
}

/// Parse `x,y,z` into a list of distinct dimension names.
pub fn parse_dim_list(option: &str, text: &str) -> StencilResult<Vec<String>> {
    let mut out: Vec<String> = Vec::new();
    for name in text.split(',').map(str::trim) {
        if name.is_empty() {
            return Err(SettingsError::new(option, format!("empty dimension name in '{}'", text)).into());
        }
        if !out.iter().any(|d| d == name) {
            out.push(name.to_string());
        }
    }
    Ok(out)
}

fn parse_key_values(option: &str, text: &str) -> StencilResult<Vec<(String, String)>> {
    text.split(',')
        .map(|item| {
            let (key, value) = item
                .split_once('=')
                .ok_or_else(|| SettingsError::new(option, format!("expected name=value, got '{}'", item)))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(SettingsError::new(option, format!("missing name in '{}'", item)).into());
            }
            Ok((key.to_string(), value.trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let s = CompilerSettings::default();
        assert_eq!(s.elem_bytes, 4);
        assert_eq!(s.default_bundle_basename, "stencil_bundle");
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_bad_elem_bytes() {
        let err = CompilerSettings::new().elem_bytes(2).validate().unwrap_err();
        assert_eq!(err.short_name(), "InvalidOption");
    }

    #[test]
    fn test_parse_dim_sizes() {
        let sizes = parse_dim_sizes("fold", "x=4, y=2,x=8").unwrap();
        assert_eq!(sizes, vec![("x".to_string(), 8), ("y".to_string(), 2)]);
        assert!(parse_dim_sizes("fold", "x=four").is_err());
        assert!(parse_dim_sizes("fold", "x4").is_err());
    }

    #[test]
    fn test_parse_bundle_targets() {
        let targets = parse_bundle_targets("a=foo,g_$&=b[aeiou]r").unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[1].basename, "g_$&");
        assert_eq!(targets[1].pattern, "b[aeiou]r");
        assert!(parse_bundle_targets("a=").is_err());
    }

    #[test]
    fn test_parse_dim_list() {
        assert_eq!(parse_dim_list("domain-dims", "x,y,x").unwrap(), vec!["x", "y"]);
        assert!(parse_dim_list("domain-dims", "x,,y").is_err());
    }

    #[test]
    fn test_bad_regex_rejected() {
        let s = CompilerSettings::new().bundle_target("a", "foo(");
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_builder_replaces_dim() {
        let s = CompilerSettings::new().fold("x", 4).fold("x", 2).cluster("y", 2);
        assert_eq!(s.fold_options, vec![("x".to_string(), 2)]);
        assert_eq!(s.cluster_options, vec![("y".to_string(), 2)]);
    }
}
