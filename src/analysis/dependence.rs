//! Dependence analysis between stencil equations.
//!
//! Every read is relative to the evaluation point, so an equation B depends
//! on an equation A exactly when B reads the variable A writes with the same
//! misc indices. The edge records the step distance (written step offset
//! minus read step offset) and the domain offsets of the read:
//! - distance 0: B must see A's value from the same step (same-step edge)
//! - any other distance: the value comes from another step (cross-step edge)
//!
//! Only same-step edges constrain bundling and must form a DAG.

use crate::ir::equation::{EqId, Equation};
use crate::ir::solution::Solution;
use crate::utils::errors::{DependenceError, DependenceErrorKind, StencilResult};
use log::{debug, warn};
use serde::{Serialize, Deserialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

/// A dependence of `consumer` on the value written by `producer`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepEdge {
    pub producer: EqId,
    pub consumer: EqId,
    /// Variable carrying the value
    pub var: String,
    /// Written step offset minus read step offset
    pub step_distance: i64,
    /// Domain offsets of the read, in variable dimension order
    pub offsets: Vec<(String, i64)>,
}

impl DepEdge {
    pub fn is_same_step(&self) -> bool {
        self.step_distance == 0
    }

    pub fn is_self_loop(&self) -> bool {
        self.producer == self.consumer
    }

    pub fn description(&self) -> String {
        let offs: Vec<String> = self
            .offsets
            .iter()
            .map(|(d, o)| format!("{}{:+}", d, o))
            .collect();
        format!(
            "{} -> {} on {} dist={} [{}]",
            self.producer,
            self.consumer,
            self.var,
            self.step_distance,
            offs.join(", ")
        )
    }
}

/// Equation-level dependence multigraph.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DependencyGraph {
    /// Equations in declaration order
    pub equations: Vec<EqId>,
    pub edges: Vec<DepEdge>,
    /// Target variable of each equation
    #[serde(skip)]
    targets: BTreeMap<EqId, String>,
    #[serde(skip)]
    successors: BTreeMap<EqId, Vec<usize>>,
    #[serde(skip)]
    predecessors: BTreeMap<EqId, Vec<usize>>,
}

impl DependencyGraph {
    /// A graph with the equations as nodes and no edges.
    pub fn without_edges(equations: &[Equation]) -> Self {
        Self::from_edges(equations, Vec::new())
    }

    /// Build the graph from already-computed edges.
    pub fn from_edges(equations: &[Equation], edges: Vec<DepEdge>) -> Self {
        let ids: Vec<EqId> = equations.iter().map(|e| e.id).collect();
        let targets = equations
            .iter()
            .map(|e| (e.id, e.target_var().to_string()))
            .collect();

        let mut successors: BTreeMap<EqId, Vec<usize>> = BTreeMap::new();
        let mut predecessors: BTreeMap<EqId, Vec<usize>> = BTreeMap::new();
        for id in &ids {
            successors.insert(*id, Vec::new());
            predecessors.insert(*id, Vec::new());
        }
        for (i, edge) in edges.iter().enumerate() {
            if let Some(v) = successors.get_mut(&edge.producer) {
                v.push(i);
            }
            if let Some(v) = predecessors.get_mut(&edge.consumer) {
                v.push(i);
            }
        }

        Self {
            equations: ids,
            edges,
            targets,
            successors,
            predecessors,
        }
    }

    /// Find all dependences of a finalized solution and check them.
    ///
    /// With dependency finding disabled the graph has no edges.
    pub fn build(solution: &Solution, find_deps: bool) -> StencilResult<Self> {
        if !find_deps {
            warn!("dependency finding is disabled; equations are assumed independent");
            return Ok(Self::without_edges(&solution.equations));
        }

        let step_dim = solution.step_dim();
        let mut edges = Vec::new();
        for producer in &solution.equations {
            let written = &producer.target;
            let write_step = producer.write_step_offset(step_dim);
            let misc = written.misc_key();
            for consumer in &solution.equations {
                for read in consumer.rhs.point_set() {
                    if read.var != written.var || read.misc_key() != misc {
                        continue;
                    }
                    let read_step = read.offset_in(step_dim).unwrap_or(0);
                    let offsets = solution
                        .var(&read.var)
                        .map(|v| {
                            v.domain_dims()
                                .into_iter()
                                .map(|d| (d.to_string(), read.offset_in(d).unwrap_or(0)))
                                .collect()
                        })
                        .unwrap_or_default();
                    edges.push(DepEdge {
                        producer: producer.id,
                        consumer: consumer.id,
                        var: read.var.clone(),
                        step_distance: write_step - read_step,
                        offsets,
                    });
                }
            }
        }

        let graph = Self::from_edges(&solution.equations, edges);
        graph.check_self_references(&solution.equations)?;
        graph.check_acyclic()?;
        debug!("{}", graph.summary());
        Ok(graph)
    }

    /// Same-step self-reads are only legal as a zero-offset reduction.
    fn check_self_references(&self, equations: &[Equation]) -> StencilResult<()> {
        for edge in self.edges.iter().filter(|e| e.is_same_step() && e.is_self_loop()) {
            let is_reduction = equations
                .iter()
                .find(|e| e.id == edge.producer)
                .map(|e| e.is_reduction())
                .unwrap_or(false);
            if !is_reduction {
                return Err(DependenceError {
                    message: format!(
                        "equation {} reads the value it writes in the same step without a reduction marking",
                        edge.producer
                    ),
                    vars: vec![edge.var.clone()],
                    kind: DependenceErrorKind::IllegalSelfReference,
                }
                .into());
            }
            if let Some((dim, offset)) = edge.offsets.iter().find(|(_, o)| *o != 0) {
                return Err(DependenceError {
                    message: format!(
                        "reduction {} reads its own '{}' at {}{:+} in the same step",
                        edge.producer, edge.var, dim, offset
                    ),
                    vars: vec![edge.var.clone()],
                    kind: DependenceErrorKind::CyclicDependency,
                }
                .into());
            }
        }
        Ok(())
    }

    /// Fail if the same-step subgraph has a cycle.
    pub fn check_acyclic(&self) -> StencilResult<()> {
        for scc in self.strongly_connected_components() {
            if scc.len() > 1 {
                let vars: BTreeSet<String> = scc
                    .iter()
                    .filter_map(|id| self.targets.get(id).cloned())
                    .collect();
                let mut ids: Vec<EqId> = scc;
                ids.sort();
                let names: Vec<String> = ids.iter().map(|i| i.to_string()).collect();
                return Err(DependenceError {
                    message: format!("same-step dependency cycle among {}", names.join(", ")),
                    vars: vars.into_iter().collect(),
                    kind: DependenceErrorKind::CyclicDependency,
                }
                .into());
            }
        }
        Ok(())
    }

    pub fn get_outgoing(&self, id: EqId) -> Vec<&DepEdge> {
        self.successors
            .get(&id)
            .map(|indices| indices.iter().map(|&i| &self.edges[i]).collect())
            .unwrap_or_default()
    }

    pub fn get_incoming(&self, id: EqId) -> Vec<&DepEdge> {
        self.predecessors
            .get(&id)
            .map(|indices| indices.iter().map(|&i| &self.edges[i]).collect())
            .unwrap_or_default()
    }

    /// Same-step edges between distinct equations.
    pub fn same_step_edges(&self) -> Vec<&DepEdge> {
        self.edges
            .iter()
            .filter(|e| e.is_same_step() && !e.is_self_loop())
            .collect()
    }

    pub fn cross_step_edges(&self) -> Vec<&DepEdge> {
        self.edges.iter().filter(|e| !e.is_same_step()).collect()
    }

    /// Equations whose same-step output `id` reads directly.
    pub fn predecessors(&self, id: EqId) -> BTreeSet<EqId> {
        self.get_incoming(id)
            .into_iter()
            .filter(|e| e.is_same_step() && !e.is_self_loop())
            .map(|e| e.producer)
            .collect()
    }

    /// Equations that read `id`'s same-step output directly.
    pub fn successors(&self, id: EqId) -> BTreeSet<EqId> {
        self.get_outgoing(id)
            .into_iter()
            .filter(|e| e.is_same_step() && !e.is_self_loop())
            .map(|e| e.consumer)
            .collect()
    }

    /// All equations with a same-step path to `id`.
    pub fn ancestors(&self, id: EqId) -> BTreeSet<EqId> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<EqId> = self.predecessors(id).into_iter().collect();
        while let Some(p) = queue.pop_front() {
            if seen.insert(p) {
                queue.extend(self.predecessors(p));
            }
        }
        seen
    }

    /// Whether a non-empty same-step path leads from `from` to `to`.
    pub fn reaches(&self, from: EqId, to: EqId) -> bool {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<EqId> = self.successors(from).into_iter().collect();
        while let Some(s) = queue.pop_front() {
            if s == to {
                return true;
            }
            if seen.insert(s) {
                queue.extend(self.successors(s));
            }
        }
        false
    }

    /// Whether either equation reaches the other.
    pub fn connected(&self, a: EqId, b: EqId) -> bool {
        self.reaches(a, b) || self.reaches(b, a)
    }

    /// Topological order of the same-step subgraph; ready equations are
    /// taken in declaration order.
    pub fn topological_order(&self) -> StencilResult<Vec<EqId>> {
        let mut in_degree: BTreeMap<EqId, usize> = self
            .equations
            .iter()
            .map(|id| (*id, self.predecessors(*id).len()))
            .collect();

        let mut ready: BTreeSet<EqId> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();

        let mut result = Vec::with_capacity(self.equations.len());
        while let Some(id) = ready.pop_first() {
            result.push(id);
            for s in self.successors(id) {
                if let Some(count) = in_degree.get_mut(&s) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(s);
                    }
                }
            }
        }

        if result.len() == self.equations.len() {
            Ok(result)
        } else {
            self.check_acyclic()?;
            Err(DependenceError {
                message: "same-step graph could not be ordered".to_string(),
                vars: Vec::new(),
                kind: DependenceErrorKind::CyclicDependency,
            }
            .into())
        }
    }

    /// Strongly connected components of the same-step subgraph (Tarjan).
    pub fn strongly_connected_components(&self) -> Vec<Vec<EqId>> {
        let mut state = TarjanState::default();
        for &v in &self.equations {
            if !state.indices.contains_key(&v) {
                self.strongconnect(v, &mut state);
            }
        }
        state.sccs
    }

    fn strongconnect(&self, v: EqId, state: &mut TarjanState) {
        state.indices.insert(v, state.index_counter);
        state.lowlinks.insert(v, state.index_counter);
        state.index_counter += 1;
        state.stack.push(v);
        state.on_stack.insert(v);

        for w in self.successors(v) {
            if !state.indices.contains_key(&w) {
                self.strongconnect(w, state);
                let low = state.lowlinks[&v].min(state.lowlinks[&w]);
                state.lowlinks.insert(v, low);
            } else if state.on_stack.contains(&w) {
                let low = state.lowlinks[&v].min(state.indices[&w]);
                state.lowlinks.insert(v, low);
            }
        }

        if state.lowlinks.get(&v) == state.indices.get(&v) {
            let mut scc = Vec::new();
            while let Some(w) = state.stack.pop() {
                state.on_stack.remove(&w);
                scc.push(w);
                if w == v {
                    break;
                }
            }
            state.sccs.push(scc);
        }
    }

    pub fn summary(&self) -> DependencyGraphSummary {
        DependencyGraphSummary {
            num_equations: self.equations.len(),
            num_edges: self.edges.len(),
            num_same_step: self.same_step_edges().len(),
            num_cross_step: self.cross_step_edges().len(),
            num_reductions: self
                .edges
                .iter()
                .filter(|e| e.is_same_step() && e.is_self_loop())
                .count(),
        }
    }
}

#[derive(Default)]
struct TarjanState {
    index_counter: usize,
    stack: Vec<EqId>,
    indices: BTreeMap<EqId, usize>,
    lowlinks: BTreeMap<EqId, usize>,
    on_stack: BTreeSet<EqId>,
    sccs: Vec<Vec<EqId>>,
}

/// Summary of a dependency graph.
#[derive(Debug, Clone)]
pub struct DependencyGraphSummary {
    pub num_equations: usize,
    pub num_edges: usize,
    pub num_same_step: usize,
    pub num_cross_step: usize,
    pub num_reductions: usize,
}

impl fmt::Display for DependencyGraphSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Dependency Graph Summary:")?;
        writeln!(f, "  Equations: {}", self.num_equations)?;
        writeln!(f, "  Total edges: {}", self.num_edges)?;
        writeln!(f, "    Same-step: {}", self.num_same_step)?;
        writeln!(f, "    Cross-step: {}", self.num_cross_step)?;
        writeln!(f, "    Reduction self-edges: {}", self.num_reductions)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::expr::Expr;
    use crate::ir::solution::SolutionBuilder;
    use crate::settings::CompilerSettings;

    fn builder() -> SolutionBuilder {
        let settings = CompilerSettings::default();
        let mut b = SolutionBuilder::new("deps", &settings).unwrap();
        b.step_dim("t").unwrap();
        b.domain_dim("x").unwrap();
        b
    }

    fn finalize(b: SolutionBuilder) -> Solution {
        b.finalize(&CompilerSettings::default()).unwrap()
    }

    #[test]
    fn test_chain_edges() {
        let mut b = builder();
        let u = b.new_var("u", &["t", "x"]).unwrap();
        let v = b.new_var("v", &["t", "x"]).unwrap();
        b.add_eq(u.at(&[1, 0]), Expr::from(u.at(&[0, -1])) + Expr::from(u.at(&[0, 1])))
            .unwrap();
        b.add_eq(v.at(&[1, 0]), Expr::from(u.at(&[1, 2])) * Expr::Const(2.0))
            .unwrap();
        let graph = DependencyGraph::build(&finalize(b), true).unwrap();

        let same = graph.same_step_edges();
        assert_eq!(same.len(), 1);
        assert_eq!(same[0].producer, EqId(0));
        assert_eq!(same[0].consumer, EqId(1));
        assert_eq!(same[0].offsets, vec![("x".to_string(), 2)]);
        assert_eq!(graph.cross_step_edges().len(), 2);
        assert!(graph.reaches(EqId(0), EqId(1)));
        assert!(!graph.reaches(EqId(1), EqId(0)));
        assert_eq!(graph.topological_order().unwrap(), vec![EqId(0), EqId(1)]);
    }

    #[test]
    fn test_topological_tie_break() {
        let mut b = builder();
        let a = b.new_var("a", &["t", "x"]).unwrap();
        let c = b.new_var("c", &["t", "x"]).unwrap();
        let d = b.new_var("d", &["t", "x"]).unwrap();
        b.add_eq(a.at(&[1, 0]), c.at(&[1, 0]).into()).unwrap();
        b.add_eq(d.at(&[1, 0]), d.at(&[0, 0]).into()).unwrap();
        b.add_eq(c.at(&[1, 0]), c.at(&[0, 0]).into()).unwrap();
        let graph = DependencyGraph::build(&finalize(b), true).unwrap();
        assert_eq!(
            graph.topological_order().unwrap(),
            vec![EqId(1), EqId(2), EqId(0)]
        );
        assert_eq!(graph.ancestors(EqId(0)), [EqId(2)].into_iter().collect());
    }

    #[test]
    fn test_cycle_detected() {
        let mut b = builder();
        let a = b.new_var("a", &["t", "x"]).unwrap();
        let c = b.new_var("c", &["t", "x"]).unwrap();
        b.add_eq(a.at(&[1, 0]), c.at(&[1, 0]).into()).unwrap();
        b.add_eq(c.at(&[1, 0]), a.at(&[1, 1]).into()).unwrap();
        let err = DependencyGraph::build(&finalize(b), true).unwrap_err();
        assert_eq!(err.short_name(), "CyclicDependency");
        let msg = err.to_string();
        assert!(msg.contains("a, c"), "{}", msg);
    }

    #[test]
    fn test_self_reference() {
        let mut b = builder();
        let s = b.new_var("s", &["t", "x"]).unwrap();
        b.add_eq(s.at(&[1, 0]), s.at(&[1, -1]).into()).unwrap();
        let err = DependencyGraph::build(&finalize(b), true).unwrap_err();
        assert_eq!(err.short_name(), "CyclicDependency");

        let mut b = builder();
        let s = b.new_var("s", &["t", "x"]).unwrap();
        b.add_reduction(s.at(&[1, 0]), s.at(&[1, 0]).into()).unwrap();
        let graph = DependencyGraph::build(&finalize(b), true).unwrap();
        assert_eq!(graph.summary().num_reductions, 1);
        assert!(graph.same_step_edges().is_empty());
        assert_eq!(graph.topological_order().unwrap(), vec![EqId(0)]);
    }

    #[test]
    fn test_reduction_neighbor_read_rejected() {
        let mut b = builder();
        let s = b.new_var("s", &["t", "x"]).unwrap();
        let u = b.new_var("u", &["t", "x"]).unwrap();
        b.add_reduction(
            s.at(&[1, 0]),
            Expr::from(s.at(&[1, -1])) + Expr::from(u.at(&[0, 0])),
        )
        .unwrap();
        let err = DependencyGraph::build(&finalize(b), true).unwrap_err();
        assert_eq!(err.short_name(), "CyclicDependency");
        assert!(err.to_string().contains("x-1"), "{}", err);
    }

    #[test]
    fn test_misc_indices_must_match() {
        let mut b = builder();
        b.misc_dim("c").unwrap();
        let f = b.new_var("f", &["t", "x", "c"]).unwrap();
        b.add_eq(f.at(&[1, 0, 0]), f.at(&[0, 0, 0]).into()).unwrap();
        b.add_eq(f.at(&[1, 0, 1]), f.at(&[1, 0, 0]).into()).unwrap();
        let graph = DependencyGraph::build(&finalize(b), true).unwrap();
        let same = graph.same_step_edges();
        assert_eq!(same.len(), 1);
        assert_eq!((same[0].producer, same[0].consumer), (EqId(0), EqId(1)));
    }

    #[test]
    fn test_find_deps_disabled() {
        let mut b = builder();
        let a = b.new_var("a", &["t", "x"]).unwrap();
        let c = b.new_var("c", &["t", "x"]).unwrap();
        b.add_eq(a.at(&[1, 0]), c.at(&[1, 0]).into()).unwrap();
        b.add_eq(c.at(&[1, 0]), a.at(&[1, 0]).into()).unwrap();
        let graph = DependencyGraph::build(&finalize(b), false).unwrap();
        assert!(graph.edges.is_empty());
        assert_eq!(graph.topological_order().unwrap(), vec![EqId(0), EqId(1)]);
    }

    #[test]
    fn test_summary_display() {
        let mut b = builder();
        let u = b.new_var("u", &["t", "x"]).unwrap();
        b.add_eq(u.at(&[1, 0]), u.at(&[0, 0]).into()).unwrap();
        let graph = DependencyGraph::build(&finalize(b), true).unwrap();
        let text = graph.summary().to_string();
        assert!(text.contains("Cross-step: 1"));
        assert!(graph.edges[0].description().contains("dist=1"));
    }
}
