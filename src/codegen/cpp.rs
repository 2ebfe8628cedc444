//! C++ loop skeleton.
//!
//! Emits geometry macros, one grid accessor per variable, one scalar kernel
//! per bundle and the step → region → block → cluster → vector loop nest.
//! Vector calls loop over their fold lanes in scalar code; no intrinsics are
//! selected for the vector formats.

use crate::codegen::Format;
use crate::context::CompiledSolution;
use crate::ir::dims::DimKind;
use crate::ir::expr::{Expr, Index, Intrinsic, VarPoint};
use crate::ir::var::Variable;
use crate::runtime::grid::{layout_order, GridDim};
use crate::transform::bundle::Bundle;
use crate::utils::pretty::CodeFormatter;
use std::collections::BTreeSet;

/// C++ code generator.
pub struct CppCodeGen {
    format: Format,
}

impl CppCodeGen {
    pub fn new(format: Format) -> Self {
        Self { format }
    }

    /// Generate a C++ translation unit for a compiled solution.
    pub fn generate(&self, compiled: &CompiledSolution) -> String {
        let mut f = CodeFormatter::new("    ");
        let dims = compiled.domain_dims();

        f.comment(&format!("Stencil '{}': {}", compiled.name, compiled.description));
        f.comment(&format!("Generated by stencilopt {} for {}.", crate::VERSION, self.format));
        f.writeln("#include <algorithm>");
        f.writeln("#include <cmath>");
        f.writeln("#include <cstdint>");
        f.writeln("#include <initializer_list>");
        f.writeln("#include <vector>");
        f.newline();
        let real = if compiled.settings.elem_bytes == 4 { "float" } else { "double" };
        f.writeln(&format!("typedef {} real_t;", real));
        f.writeln("typedef std::int64_t idx_t;");
        f.newline();

        self.emit_macros(&mut f, compiled, &dims);
        f.newline();
        f.writeln(&format!("namespace stencil_{} {{", ident(&compiled.name)));
        f.newline();
        emit_grid_type(&mut f);
        f.newline();
        emit_context(&mut f, compiled, &dims);
        for bundle in &compiled.bundles {
            f.newline();
            emit_bundle(&mut f, compiled, bundle, &dims);
        }
        f.newline();
        emit_steps(&mut f, compiled, &dims);
        f.newline();
        f.writeln(&format!("}} // namespace stencil_{}", ident(&compiled.name)));
        f.finish()
    }

    fn emit_macros(&self, f: &mut CodeFormatter, compiled: &CompiledSolution, dims: &[&str]) {
        let geometry = &compiled.geometry;
        f.comment("Fold: elements per vector in each dimension.");
        for d in dims {
            f.writeln(&format!("#define VLEN_{} ({})", upper(d), geometry.fold.get(d)));
        }
        f.writeln(&format!("#define VLEN ({})", geometry.vector_len()));
        f.comment("Cluster: vectors per cluster in each dimension.");
        for d in dims {
            f.writeln(&format!("#define CMULT_{} ({})", upper(d), geometry.cluster.get(d)));
        }
        f.comment("Elements per cluster in each dimension.");
        for d in dims {
            let u = upper(d);
            f.writeln(&format!("#define CLEN_{} (VLEN_{} * CMULT_{})", u, u, u));
        }
        if let Some(bits) = self.format.vector_bits() {
            f.writeln(&format!("#define VECTOR_BITS ({})", bits));
        }
        f.writeln(&format!(
            "#define ALLOW_UNALIGNED_LOADS ({})",
            u8::from(compiled.settings.allow_unaligned_loads)
        ));
        f.writeln("#define PREFETCH(p, level) __builtin_prefetch((p), 0, (level) == 1 ? 3 : 2)");
    }
}

fn emit_grid_type(f: &mut CodeFormatter) {
    f.comment("Padded grid with a ring of step slots.");
    f.writeln("struct grid_t {");
    f.indent();
    {
        f.writeln("std::vector<idx_t> first, len, stride;");
        f.writeln("idx_t step_slots = 1, step_stride = 1;");
        f.writeln("std::vector<real_t> data;");
        f.newline();
        f.comment("Dims in index order as (first, len); order lists them outermost first.");
        f.block(
            "void alloc(idx_t slots, std::initializer_list<std::pair<idx_t, idx_t>> dims, std::initializer_list<int> order)",
            |f| {
                f.block("for (auto& d : dims)", |f| {
                    f.writeln("first.push_back(d.first);");
                    f.writeln("len.push_back(d.second);");
                });
                f.writeln("stride.assign(len.size(), 0);");
                f.writeln("std::vector<int> ord(order);");
                f.writeln("idx_t s = 1;");
                f.block("for (auto i = ord.rbegin(); i != ord.rend(); ++i)", |f| {
                    f.writeln("stride[*i] = s;");
                    f.writeln("s *= len[*i];");
                });
                f.writeln("step_slots = slots;");
                f.writeln("step_stride = s;");
                f.writeln("data.assign(s * slots, real_t(0));");
            },
        );
        f.newline();
        f.block("real_t& at(idx_t t, std::initializer_list<idx_t> idx)", |f| {
            f.writeln("idx_t slot = ((t % step_slots) + step_slots) % step_slots;");
            f.writeln("idx_t off = slot * step_stride;");
            f.writeln("std::size_t i = 0;");
            f.block("for (idx_t v : idx)", |f| {
                f.writeln("off += (v - first[i]) * stride[i];");
                f.writeln("i++;");
            });
            f.writeln("return data[off];");
        });
    }
    f.dedent();
    f.writeln("};");
}

fn emit_context(f: &mut CodeFormatter, compiled: &CompiledSolution, dims: &[&str]) {
    let unit_stride = compiled.solution.dims.unit_stride_dim();
    f.comment("Domain, region and block sizes plus one grid per variable.");
    f.writeln("struct context_t {");
    f.indent();
    {
        for d in dims {
            f.writeln(&format!("idx_t d_{d} = 1, r_{d} = 1, b_{d} = 1;", d = d));
        }
        for v in &compiled.solution.vars {
            f.writeln(&format!("grid_t {};", v.name));
        }
        f.newline();
        f.comment("Call after setting the domain sizes.");
        f.block("void alloc_grids()", |f| {
            for v in &compiled.solution.vars {
                f.writeln(&alloc_call(v, unit_stride, compiled.settings.inner_misc));
            }
        });
    }
    f.dedent();
    f.writeln("};");
    f.newline();
    for v in &compiled.solution.vars {
        let params: Vec<String> = v.dims.iter().map(|(d, _)| d.clone()).collect();
        let step = v
            .dims
            .iter()
            .find(|(_, k)| *k == DimKind::Step)
            .map(|(d, _)| d.as_str())
            .unwrap_or("0");
        let idx: Vec<&str> = v
            .dims
            .iter()
            .filter(|(_, k)| *k != DimKind::Step)
            .map(|(d, _)| d.as_str())
            .collect();
        f.writeln(&format!(
            "#define {}({}) ctx.{}.at({}, {{{}}})",
            grid_macro(&v.name),
            params.join(", "),
            v.name,
            step,
            idx.join(", ")
        ));
    }
}

fn alloc_call(v: &Variable, unit_stride: Option<&str>, inner_misc: bool) -> String {
    let idx_dims: Vec<&(String, DimKind)> = v.dims.iter().filter(|(_, k)| *k != DimKind::Step).collect();
    let extents: Vec<String> = idx_dims
        .iter()
        .map(|(d, k)| match k {
            DimKind::Misc => {
                let (lo, hi) = v.misc_range.get(d).copied().unwrap_or((0, 0));
                format!("{{{}, {}}}", lo, hi - lo + 1)
            }
            _ => {
                let pad = v.pad_of(d).max(v.halo_of(d));
                format!("{{-{p}, d_{d} + {w}}}", p = pad, d = d, w = 2 * pad)
            }
        })
        .collect();
    let shape: Vec<GridDim> = idx_dims
        .iter()
        .map(|(d, k)| GridDim { name: d.clone(), kind: *k, first: 0, len: 1 })
        .collect();
    let order: Vec<String> = layout_order(&shape, unit_stride, inner_misc)
        .iter()
        .map(|i| i.to_string())
        .collect();
    let slots = if v.has_step_dim() { v.step_alloc.max(1) } else { 1 };
    format!(
        "{}.alloc({}, {{{}}}, {{{}}});",
        v.name,
        slots,
        extents.join(", "),
        order.join(", ")
    )
}

fn emit_bundle(f: &mut CodeFormatter, compiled: &CompiledSolution, bundle: &Bundle, dims: &[&str]) {
    let step = compiled.step_dim();
    let name = ident(&bundle.name);
    let point_params: Vec<String> = dims.iter().map(|d| format!("idx_t {}", d)).collect();
    let eqs = compiled.bundle_equations(bundle);
    let order = loop_dims(compiled);

    f.comment(&format!(
        "Bundle {}: {} FP ops per point.",
        bundle.name,
        compiled.bundle_fp_ops(bundle)
    ));
    f.block(
        &format!(
            "inline void calc_{}(context_t& ctx, idx_t {}, {})",
            name,
            step,
            point_params.join(", ")
        ),
        |f| {
            for eq in &eqs {
                let op = if eq.is_reduction() { "+=" } else { "=" };
                let rhs = if eq.is_reduction() {
                    strip_self(&eq.rhs, &eq.target)
                } else {
                    cpp_expr(&eq.rhs)
                };
                f.writeln(&format!("{} {} {};", cpp_point(&eq.target), op, rhs));
            }
        },
    );
    f.newline();

    // Prefetch every distinct point read by the bundle at a cluster's origin.
    let reads: BTreeSet<&VarPoint> = eqs.iter().flat_map(|e| e.reads()).collect();
    f.block(
        &format!(
            "inline void prefetch_{}(context_t& ctx, int level, idx_t {}, {})",
            name,
            step,
            point_params.join(", ")
        ),
        |f| {
            for p in &reads {
                f.writeln(&format!("PREFETCH(&{}, level);", cpp_point(p)));
            }
        },
    );
    f.newline();

    let ends: Vec<String> = dims.iter().map(|d| format!("idx_t {}_end", d)).collect();
    f.comment("One fold-shaped set of lanes; lanes past the end are masked off.");
    f.block(
        &format!(
            "inline void calc_vector_{}(context_t& ctx, idx_t {}, {}, {})",
            name,
            step,
            point_params.join(", ").replace("idx_t ", "idx_t v0_"),
            ends.join(", ")
        ),
        |f| {
            let loops: Vec<String> = order
                .iter()
                .map(|d| {
                    format!(
                        "for (idx_t {d} = v0_{d}; {d} < std::min(v0_{d} + VLEN_{u}, {d}_end); {d}++)",
                        d = d,
                        u = upper(d)
                    )
                })
                .collect();
            nested(f, &loops, |f| {
                f.writeln(&format!("calc_{}(ctx, {}, {});", name, step, dims.join(", ")));
            });
        },
    );
    f.newline();

    let block_params: Vec<String> = dims.iter().map(|d| format!("idx_t b0_{d}, idx_t b1_{d}", d = d)).collect();
    f.block(
        &format!(
            "void calc_block_{}(context_t& ctx, idx_t {}, {})",
            name,
            step,
            block_params.join(", ")
        ),
        |f| {
            let cluster_loops: Vec<String> = order
                .iter()
                .map(|d| format!("for (idx_t c_{d} = b0_{d}; c_{d} < b1_{d}; c_{d} += CLEN_{u})", d = d, u = upper(d)))
                .collect();
            nested(f, &cluster_loops, |f| {
                if let Some(&inner) = order.last() {
                    let at = |ahead: i64| -> String {
                        let coords: Vec<String> = dims
                            .iter()
                            .map(|d| {
                                if *d == inner {
                                    format!("c_{} + {} * CLEN_{}", d, ahead, upper(d))
                                } else {
                                    format!("c_{}", d)
                                }
                            })
                            .collect();
                        coords.join(", ")
                    };
                    for (level, ahead) in [(1, 1), (2, 2)] {
                        let guard = if ahead == 1 {
                            format!("c_{} + CLEN_{}", inner, upper(inner))
                        } else {
                            format!("c_{} + {} * CLEN_{}", inner, ahead, upper(inner))
                        };
                        f.writeln(&format!(
                            "if ({} < b1_{}) prefetch_{}(ctx, {}, {}, {});",
                            guard,
                            inner,
                            name,
                            level,
                            step,
                            at(ahead)
                        ));
                    }
                }
                for d in dims {
                    f.writeln(&format!(
                        "idx_t e_{d} = std::min(c_{d} + CLEN_{u}, b1_{d});",
                        d = d,
                        u = upper(d)
                    ));
                }
                let vector_loops: Vec<String> = order
                    .iter()
                    .map(|d| format!("for (idx_t v_{d} = c_{d}; v_{d} < e_{d}; v_{d} += VLEN_{u})", d = d, u = upper(d)))
                    .collect();
                nested(f, &vector_loops, |f| {
                    let starts: Vec<String> = dims.iter().map(|d| format!("v_{}", d)).collect();
                    let ends: Vec<String> = dims.iter().map(|d| format!("e_{}", d)).collect();
                    f.writeln(&format!(
                        "calc_vector_{}(ctx, {}, {}, {});",
                        name,
                        step,
                        starts.join(", "),
                        ends.join(", ")
                    ));
                });
            });
        },
    );
}

fn emit_steps(f: &mut CodeFormatter, compiled: &CompiledSolution, dims: &[&str]) {
    let step = compiled.step_dim();
    let order = loop_dims(compiled);
    f.comment("Steps in order; bundles in dependence order; regions in order; blocks in parallel.");
    f.block(
        &format!("void calc_steps(context_t& ctx, idx_t {s}0, idx_t {s}1)", s = step),
        |f| {
            f.block(&format!("for (idx_t {s} = {s}0; {s} < {s}1; {s}++)", s = step), |f| {
                for bundle in &compiled.bundles {
                    f.comment(&bundle.to_string());
                    let region_loops: Vec<String> = order
                        .iter()
                        .map(|d| format!("for (idx_t r_{d} = 0; r_{d} < ctx.d_{d}; r_{d} += ctx.r_{d})", d = d))
                        .collect();
                    nested(f, &region_loops, |f| {
                        for d in dims {
                            f.writeln(&format!("idx_t re_{d} = std::min(r_{d} + ctx.r_{d}, ctx.d_{d});", d = d));
                        }
                        f.writeln(&format!("#pragma omp parallel for collapse({}) schedule(dynamic)", dims.len()));
                        let block_loops: Vec<String> = order
                            .iter()
                            .map(|d| format!("for (idx_t b_{d} = r_{d}; b_{d} < re_{d}; b_{d} += ctx.b_{d})", d = d))
                            .collect();
                        nested(f, &block_loops, |f| {
                            let args: Vec<String> = dims
                                .iter()
                                .map(|d| format!("b_{d}, std::min(b_{d} + ctx.b_{d}, re_{d})", d = d))
                                .collect();
                            f.writeln(&format!(
                                "calc_block_{}(ctx, {}, {});",
                                ident(&bundle.name),
                                step,
                                args.join(", ")
                            ));
                        });
                    });
                }
            });
        },
    );
}

/// Domain dims from outermost to innermost loop; the unit-stride dim is last.
fn loop_dims(compiled: &CompiledSolution) -> Vec<&str> {
    let unit = compiled.solution.dims.unit_stride_dim();
    let mut order: Vec<&str> = compiled.domain_dims().into_iter().filter(|d| Some(*d) != unit).collect();
    order.extend(unit);
    order
}

/// Open one loop per header, run `body` innermost, and close them.
fn nested<F: FnOnce(&mut CodeFormatter)>(f: &mut CodeFormatter, headers: &[String], body: F) {
    for h in headers {
        f.writeln(&format!("{} {{", h));
        f.indent();
    }
    body(f);
    for _ in headers {
        f.dedent();
        f.writeln("}");
    }
}

fn cpp_point(p: &VarPoint) -> String {
    let idx: Vec<String> = p
        .indices
        .iter()
        .map(|i| match i {
            Index::Offset { dim, offset } if *offset == 0 => dim.clone(),
            Index::Offset { dim, offset } if *offset > 0 => format!("{}+{}", dim, offset),
            Index::Offset { dim, offset } => format!("{}{}", dim, offset),
            Index::Const { value, .. } => value.to_string(),
        })
        .collect();
    format!("{}({})", grid_macro(&p.var), idx.join(", "))
}

fn cpp_expr(e: &Expr) -> String {
    match e {
        Expr::Const(v) => format!("real_t({:?})", v),
        Expr::Point(p) => cpp_point(p),
        Expr::Neg(a) => format!("(-{})", cpp_expr(a)),
        Expr::Add(terms) => join(terms, " + "),
        Expr::Mul(terms) => join(terms, " * "),
        Expr::Sub(a, b) => format!("({} - {})", cpp_expr(a), cpp_expr(b)),
        Expr::Div(a, b) => format!("({} / {})", cpp_expr(a), cpp_expr(b)),
        Expr::Call { func, args } => {
            let args: Vec<String> = args.iter().map(cpp_expr).collect();
            match func {
                Intrinsic::Min | Intrinsic::Max => {
                    let name = func.name();
                    let mut it = args.into_iter();
                    let first = it.next().unwrap_or_else(|| "real_t(0)".to_string());
                    it.fold(first, |acc, a| format!("std::{}({}, {})", name, acc, a))
                }
                _ => format!("std::{}({})", func.name(), args.join(", ")),
            }
        }
    }
}

/// A reduction `t = t + rest` is emitted as `t += rest`.
fn strip_self(rhs: &Expr, target: &VarPoint) -> String {
    if let Expr::Add(terms) = rhs {
        let rest: Vec<Expr> = terms
            .iter()
            .filter(|t| !matches!(t, Expr::Point(p) if p == target))
            .cloned()
            .collect();
        if rest.len() + 1 == terms.len() {
            return cpp_expr(&Expr::sum(rest));
        }
    }
    format!("{} - {}", cpp_expr(rhs), cpp_point(target))
}

fn join(terms: &[Expr], sep: &str) -> String {
    let parts: Vec<String> = terms.iter().map(cpp_expr).collect();
    format!("({})", parts.join(sep))
}

fn grid_macro(var: &str) -> String {
    format!("GRID_{}", upper(var))
}

fn upper(s: &str) -> String {
    ident(s).to_uppercase()
}

fn ident(s: &str) -> String {
    s.chars().map(|c| if c.is_ascii_alphanumeric() { c } else { '_' }).collect()
}
