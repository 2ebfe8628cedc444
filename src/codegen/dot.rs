//! GraphViz output.
//!
//! The full graph has one node per equation and per variable, with read and
//! write edges; the lite graph has only equations, one cluster per bundle,
//! and the same-step dependences between them.

use crate::context::CompiledSolution;
use crate::ir::equation::Equation;
use crate::utils::pretty::CodeFormatter;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy)]
pub struct DotPrinter {
    with_vars: bool,
}

impl DotPrinter {
    pub fn new(with_vars: bool) -> Self {
        Self { with_vars }
    }

    pub fn print(&self, compiled: &CompiledSolution) -> String {
        let mut f = CodeFormatter::new("  ");
        f.block(&format!("digraph \"{}\"", compiled.name), |f| {
            f.writeln("rankdir=LR;");
            f.writeln("node [shape=box];");
            for (i, bundle) in compiled.bundles.iter().enumerate() {
                f.block(&format!("subgraph cluster_{}", i), |f| {
                    f.writeln(&format!("label=\"{}\";", bundle.name));
                    for eq in compiled.bundle_equations(bundle) {
                        f.writeln(&format!("{} [label=\"{}\"];", eq_node(eq), escape(&eq.target.to_string())));
                    }
                });
            }
            if self.with_vars {
                self.print_var_edges(f, compiled);
            } else {
                for e in compiled.graph.same_step_edges() {
                    f.writeln(&format!("E{} -> E{} [label=\"{}\"];", e.producer.0, e.consumer.0, e.var));
                }
            }
        });
        f.finish()
    }

    fn print_var_edges(&self, f: &mut CodeFormatter, compiled: &CompiledSolution) {
        for v in &compiled.solution.vars {
            f.writeln(&format!("\"{}\" [shape=ellipse];", v.name));
        }
        for eq in &compiled.solution.equations {
            let read_vars: BTreeSet<&str> = eq.reads().iter().map(|p| p.var.as_str()).collect();
            for var in read_vars {
                f.writeln(&format!("\"{}\" -> {};", var, eq_node(eq)));
            }
            f.writeln(&format!("{} -> \"{}\";", eq_node(eq), eq.target_var()));
        }
    }
}

fn eq_node(eq: &Equation) -> String {
    format!("E{}", eq.id.0)
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CompilationContext;
    use crate::settings::CompilerSettings;

    #[test]
    fn test_dot_graphs() {
        let settings = CompilerSettings::new().bundle_target("a", "foo.*");
        let ctx = CompilationContext::new(settings).unwrap();
        let compiled = ctx.compile("test_chain", None).unwrap();

        let full = DotPrinter::new(true).print(&compiled);
        assert!(full.starts_with("digraph \"test_chain\" {"));
        assert!(full.contains("\"foo1\" -> E1;"));
        assert!(full.contains("E1 -> \"foo2\";"));

        let lite = DotPrinter::new(false).print(&compiled);
        assert!(lite.contains("E0 -> E1 [label=\"foo1\"];"));
        assert!(!lite.contains("shape=ellipse"));
        assert!(lite.contains("label=\"a_0\";"));
        assert!(lite.contains("label=\"a_1\";"));
    }
}
