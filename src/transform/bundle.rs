//! Equation bundling.
//!
//! Equations are grouped into bundles that are evaluated together by one
//! generated routine. A bundle never contains two equations joined by a
//! same-step dependency path, and the bundles are emitted in an order that
//! respects every same-step dependency.
//!
//! Base-names come from ordered targeting rules `(template, pattern)`: the
//! first pattern found in the target variable's name wins and the template
//! is expanded with the match:
//!
//! | token          | expands to                |
//! |----------------|---------------------------|
//! | `$&`, `$0`     | the whole match           |
//! | `$1` .. `$9`   | a numbered capture group  |
//! | `${name}`      | a named capture group     |
//! | `$$`           | a literal `$`             |
//!
//! Unmatched groups expand to the empty string.

use crate::analysis::dependence::DependencyGraph;
use crate::ir::equation::EqId;
use crate::ir::solution::Solution;
use crate::settings::CompilerSettings;
use crate::utils::errors::{BundleError, BundleErrorKind, SettingsError, StencilResult};
use log::{debug, info};
use regex::{Captures, Regex};
use serde::{Serialize, Deserialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A group of mutually independent equations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bundle {
    /// `basename_suffix`
    pub name: String,
    pub basename: String,
    pub suffix: usize,
    /// Position in creation order
    pub creation: usize,
    /// Members in ascending declaration order
    pub members: Vec<EqId>,
    /// Target variable of each member
    pub target_vars: Vec<String>,
}

impl Bundle {
    pub fn new(basename: &str, suffix: usize, creation: usize) -> Self {
        Self {
            name: format!("{}_{}", basename, suffix),
            basename: basename.to_string(),
            suffix,
            creation,
            members: Vec::new(),
            target_vars: Vec::new(),
        }
    }

    pub fn contains(&self, id: EqId) -> bool {
        self.members.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    fn push(&mut self, id: EqId, var: &str) {
        let pos = self.members.partition_point(|m| *m < id);
        self.members.insert(pos, id);
        self.target_vars.insert(pos, var.to_string());
    }
}

impl fmt::Display for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {{{}}}", self.name, self.target_vars.join(", "))
    }
}

/// Resolves the base-name of an equation from its target variable.
#[derive(Debug, Clone)]
pub struct BundleNamer {
    rules: Vec<(String, Regex)>,
    default: String,
}

impl BundleNamer {
    pub fn new(settings: &CompilerSettings) -> StencilResult<Self> {
        let mut rules = Vec::with_capacity(settings.eq_bundle_targets.len());
        for target in &settings.eq_bundle_targets {
            let re = Regex::new(&target.pattern).map_err(|e| {
                SettingsError::new("eq-bundles", format!("bad pattern '{}': {}", target.pattern, e))
            })?;
            rules.push((target.basename.clone(), re));
        }
        Ok(Self {
            rules,
            default: settings.default_bundle_basename.clone(),
        })
    }

    /// Base-name for updates of `var`.
    pub fn basename_for(&self, var: &str) -> String {
        for (template, re) in &self.rules {
            if let Some(caps) = re.captures(var) {
                return expand_template(template, &caps);
            }
        }
        self.default.clone()
    }
}

/// Expand a base-name template against a match.
pub fn expand_template(template: &str, caps: &Captures<'_>) -> String {
    // `$&` is not part of the regex crate's grammar; rewrite it as `${0}`.
    let mut normalized = String::with_capacity(template.len() + 4);
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '$' {
            match chars.peek() {
                Some('$') => {
                    normalized.push_str("$$");
                    chars.next();
                    continue;
                }
                Some('&') => {
                    normalized.push_str("${0}");
                    chars.next();
                    continue;
                }
                _ => {}
            }
        }
        normalized.push(c);
    }
    let mut out = String::new();
    caps.expand(&normalized, &mut out);
    out
}

/// Partition the equations of a solution into bundles, in creation order.
///
/// Equations are visited in same-step topological order. Each joins the
/// earliest bundle with its base-name that was created after every bundle
/// holding one of its same-step ancestors and has no member connected to it;
/// otherwise it opens a new bundle.
pub fn partition(
    solution: &Solution,
    graph: &DependencyGraph,
    settings: &CompilerSettings,
) -> StencilResult<Vec<Bundle>> {
    let namer = BundleNamer::new(settings)?;
    let order = graph.topological_order()?;

    let mut bundles: Vec<Bundle> = Vec::new();
    let mut bundle_of: BTreeMap<EqId, usize> = BTreeMap::new();
    let mut next_suffix: BTreeMap<String, usize> = BTreeMap::new();

    for id in order {
        let Some(eq) = solution.equation(id) else {
            continue;
        };
        let var = eq.target_var();
        let basename = namer.basename_for(var);
        let first_allowed = graph
            .ancestors(id)
            .iter()
            .filter_map(|a| bundle_of.get(a))
            .max()
            .map(|b| b + 1)
            .unwrap_or(0);

        let existing = bundles.iter().position(|b| {
            b.creation >= first_allowed
                && b.basename == basename
                && b.members.iter().all(|m| !graph.connected(*m, id))
        });

        let pos = match existing {
            Some(pos) => pos,
            None => {
                let suffix = next_suffix.entry(basename.clone()).or_insert(0);
                let bundle = Bundle::new(&basename, *suffix, bundles.len());
                *suffix += 1;
                debug!("created bundle {}", bundle.name);
                bundles.push(bundle);
                bundles.len() - 1
            }
        };
        bundles[pos].push(id, var);
        bundle_of.insert(id, pos);
    }

    info!(
        "{} equations in {} bundles",
        solution.equations.len(),
        bundles.len()
    );
    for b in &bundles {
        debug!("{}", b);
    }
    Ok(bundles)
}

/// Order bundles so that every same-step producer's bundle precedes its
/// consumers' bundles; ties keep creation order.
///
/// Fails if two members of one bundle depend on each other or the collapsed
/// bundle graph has a cycle.
pub fn order_bundles(bundles: Vec<Bundle>, graph: &DependencyGraph) -> StencilResult<Vec<Bundle>> {
    let mut bundle_of: BTreeMap<EqId, usize> = BTreeMap::new();
    for (i, b) in bundles.iter().enumerate() {
        for m in &b.members {
            bundle_of.insert(*m, i);
        }
    }

    let mut succs: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); bundles.len()];
    for edge in graph.same_step_edges() {
        let (Some(&p), Some(&c)) = (bundle_of.get(&edge.producer), bundle_of.get(&edge.consumer)) else {
            continue;
        };
        if p == c {
            return Err(BundleError {
                message: format!(
                    "{} and {} share a bundle but {} reads {}",
                    edge.producer, edge.consumer, edge.consumer, edge.var
                ),
                bundles: vec![bundles[p].name.clone()],
                kind: BundleErrorKind::Unschedulable,
            }
            .into());
        }
        succs[p].insert(c);
    }

    let mut in_degree = vec![0usize; bundles.len()];
    for s in &succs {
        for &c in s {
            in_degree[c] += 1;
        }
    }

    let mut ready: BTreeSet<(usize, usize)> = (0..bundles.len())
        .filter(|&i| in_degree[i] == 0)
        .map(|i| (bundles[i].creation, i))
        .collect();
    let mut order = Vec::with_capacity(bundles.len());
    while let Some((_, i)) = ready.pop_first() {
        order.push(i);
        for &c in &succs[i] {
            in_degree[c] -= 1;
            if in_degree[c] == 0 {
                ready.insert((bundles[c].creation, c));
            }
        }
    }

    if order.len() < bundles.len() {
        let stuck: Vec<String> = (0..bundles.len())
            .filter(|i| in_degree[*i] > 0)
            .map(|i| bundles[i].name.clone())
            .collect();
        return Err(BundleError {
            message: "bundle dependencies form a cycle".to_string(),
            bundles: stuck,
            kind: BundleErrorKind::Unschedulable,
        }
        .into());
    }

    let mut slots: Vec<Option<Bundle>> = bundles.into_iter().map(Some).collect();
    Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
}

/// Partition and order in one call.
pub fn compute_bundles(
    solution: &Solution,
    graph: &DependencyGraph,
    settings: &CompilerSettings,
) -> StencilResult<Vec<Bundle>> {
    let bundles = partition(solution, graph, settings)?;
    order_bundles(bundles, graph)
}
