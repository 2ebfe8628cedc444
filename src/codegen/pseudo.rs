//! Pseudo-code listing of a compiled solution.

use crate::context::CompiledSolution;
use crate::ir::dims::DimKind;
use crate::ir::var::Variable;
use crate::utils::pretty::{format_list, CodeFormatter};

/// Prints bundles and their equations; the long form adds variables,
/// dependences and the loop nest.
#[derive(Debug, Clone, Copy)]
pub struct PseudoPrinter {
    long: bool,
}

impl PseudoPrinter {
    pub fn new(long: bool) -> Self {
        Self { long }
    }

    pub fn print(&self, compiled: &CompiledSolution) -> String {
        let mut f = CodeFormatter::new("  ").with_comment_prefix("#");
        f.comment(&format!("Stencil '{}': {}", compiled.name, compiled.description));
        if let Some(r) = compiled.radius {
            f.comment(&format!("Radius: {}", r));
        }
        self.print_dims(&mut f, compiled);
        let geometry = &compiled.geometry;
        f.comment(&format!(
            "Fold: {} ({} elements per vector)",
            geometry.fold,
            geometry.vector_len()
        ));
        f.comment(&format!(
            "Cluster: {} ({} vectors per cluster)",
            geometry.cluster,
            geometry.vectors_per_cluster()
        ));
        f.comment(&format!("Element size: {} bytes", compiled.settings.elem_bytes));

        if self.long {
            f.newline();
            f.comment("Variables:");
            for v in &compiled.solution.vars {
                f.comment(&format!("  {}", describe_var(v)));
            }
            self.print_report(&mut f, compiled);
        }

        for bundle in &compiled.bundles {
            f.newline();
            let eqs = compiled.bundle_equations(bundle);
            let header = format!(
                "bundle {} ({} equation{}, {} FP ops per point)",
                bundle.name,
                eqs.len(),
                if eqs.len() == 1 { "" } else { "s" },
                compiled.bundle_fp_ops(bundle)
            );
            f.block(&header, |f| {
                for eq in &eqs {
                    f.writeln(&format!("{};", eq));
                }
            });
        }

        if self.long {
            self.print_deps(&mut f, compiled);
            self.print_loops(&mut f, compiled);
        }
        f.finish()
    }

    fn print_dims(&self, f: &mut CodeFormatter, compiled: &CompiledSolution) {
        let dims = &compiled.solution.dims;
        let misc = dims.misc_dims();
        f.comment(&format!(
            "Dimensions: step {}; domain {}; misc {}",
            compiled.step_dim(),
            compiled.domain_dims().join(", "),
            if misc.is_empty() { "(none)".to_string() } else { misc.join(", ") }
        ));
        if let Some(unit) = dims.unit_stride_dim() {
            f.comment(&format!("Unit-stride dimension: {}", unit));
        }
    }

    fn print_report(&self, f: &mut CodeFormatter, compiled: &CompiledSolution) {
        let report = &compiled.report;
        if report.applied.is_empty() {
            f.comment("Expression passes: none applied");
        } else {
            f.comment(&format!(
                "Expression passes: {} ({} equations modified)",
                report.applied.join(", "),
                report.modified
            ));
        }
        if compiled.settings.do_cse {
            f.comment(&format!("Common subexpressions: {}", report.common_subexprs));
        }
        if compiled.settings.do_pairs {
            f.comment(&format!("sin/cos pairs: {}", report.pairs));
        }
    }

    fn print_deps(&self, f: &mut CodeFormatter, compiled: &CompiledSolution) {
        f.newline();
        let graph = &compiled.graph;
        let same = graph.same_step_edges();
        f.comment(&format!(
            "Dependences: {} same-step, {} cross-step",
            same.len(),
            graph.cross_step_edges().len()
        ));
        for e in same {
            f.comment(&format!("  {}", e.description()));
        }
        let order = format_list(&compiled.bundles.iter().map(|b| b.name.as_str()).collect::<Vec<_>>(), " -> ");
        f.comment(&format!("Bundle order: {}", order));
    }

    fn print_loops(&self, f: &mut CodeFormatter, compiled: &CompiledSolution) {
        f.newline();
        f.comment("Loop nest:");
        let dims = compiled.domain_dims();
        let step = compiled.step_dim().to_string();
        f.block(&format!("for {} in steps", step), |f| {
            f.block(&format!("for region in partition(domain, region_size) over {}", dims.join(", ")), |f| {
                f.block("parallel for block in partition(region, block_size)", |f| {
                    let lens: Vec<String> = dims
                        .iter()
                        .map(|d| format!("{}={}", d, compiled.geometry.cluster_length(d)))
                        .collect();
                    f.block(&format!("for cluster in partition(block, {})", lens.join(", ")), |f| {
                        let unit = compiled.solution.dims.unit_stride_dim().unwrap_or("-");
                        f.writeln(&format!("prefetch L1 cluster+1; prefetch L2 cluster+2 (along {})", unit));
                        f.writeln(&format!("for vector in partition(cluster, {})", compiled.geometry.fold));
                        f.indent();
                        for bundle in &compiled.bundles {
                            f.writeln(&format!("calc {}(vector)", bundle.name));
                        }
                        f.dedent();
                    });
                });
            });
        });
    }
}

fn describe_var(v: &Variable) -> String {
    let dims: Vec<&str> = v.dims.iter().map(|(d, _)| d.as_str()).collect();
    let mut parts = Vec::new();
    let halos: Vec<String> = v.halo.iter().map(|(d, h)| format!("{}={}", d, h)).collect();
    if !halos.is_empty() {
        parts.push(format!("halo {}", halos.join(", ")));
        let pads: Vec<String> = v.pad.iter().map(|(d, p)| format!("{}={}", d, p)).collect();
        parts.push(format!("pad {}", pads.join(", ")));
    }
    if v.dims.iter().any(|(_, k)| *k == DimKind::Step) {
        parts.push(format!("step alloc {}", v.step_alloc));
    }
    for (d, (lo, hi)) in &v.misc_range {
        parts.push(format!("{} in {}..={}", d, lo, hi));
    }
    format!("{}({}): {}", v.name, dims.join(", "), parts.join("; "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CompilationContext;
    use crate::settings::CompilerSettings;

    fn compiled(name: &str) -> CompiledSolution {
        let ctx = CompilationContext::new(CompilerSettings::default()).unwrap();
        ctx.compile(name, Some(4)).unwrap()
    }

    #[test]
    fn test_short_listing() {
        let out = PseudoPrinter::new(false).print(&compiled("heat2d"));
        assert!(out.starts_with("# Stencil 'heat2d'"));
        assert!(out.contains("bundle stencil_bundle_0 (1 equation,"));
        assert!(out.contains("temp("));
        assert!(!out.contains("Loop nest"));
    }

    #[test]
    fn test_long_listing() {
        let out = PseudoPrinter::new(true).print(&compiled("test_chain"));
        assert!(out.contains("# Variables:"));
        assert!(out.contains("foo1(t, x): halo x=1"));
        assert!(out.contains("1 same-step"));
        assert!(out.contains("prefetch L1 cluster+1"));
    }
}
