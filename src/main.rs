//! stencilopt Command Line Interface
//!
//! Usage:
//!   stencilopt -s <stencil> [OPTIONS] -p <format> <file|-> ...
//!   stencilopt --list
//!
//! Examples:
//!   stencilopt -s iso3dfd -r 4 -p avx512 iso3dfd.hpp      # C++ skeleton for AVX-512
//!   stencilopt -s heat2d --fold x=4,y=2 -p pseudo -        # Pseudo-code to stdout
//!   stencilopt -s test_chain --eq-bundles a=foo -p dot-lite deps.dot

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{debug, info};
use stencilopt::codegen::{self, Format};
use stencilopt::context::{CompilationContext, CompiledSolution};
use stencilopt::settings::{parse_bundle_targets, parse_dim_list, parse_dim_sizes, CompilerSettings};
use std::fs;
use std::io::Write;
use std::path::PathBuf;

/// stencilopt - Stencil Compiler
#[derive(Parser, Debug)]
#[command(name = "stencilopt")]
#[command(version)]
#[command(about = "Compiles stencil solutions into folded, tiled execution plans", long_about = None)]
struct Cli {
    /// Solution to compile
    #[arg(short, long, value_name = "NAME", required_unless_present = "list")]
    stencil: Option<String>,

    /// Stencil radius, for solutions that take one
    #[arg(short, long)]
    radius: Option<i64>,

    /// List the registered solutions and exit
    #[arg(long)]
    list: bool,

    /// Write a format to a file ('-' for stdout); repeatable
    #[arg(short = 'p', long = "print", num_args = 2, value_names = ["FORMAT", "FILE"], action = clap::ArgAction::Append)]
    print: Vec<String>,

    /// Bytes per grid element (4 or 8)
    #[arg(long, default_value_t = 4)]
    elem_bytes: usize,

    /// Explicit domain dimensions, in order (e.g. x,y,z)
    #[arg(long, value_name = "DIMS")]
    domain_dims: Option<String>,

    /// Name of the step dimension
    #[arg(long, value_name = "DIM")]
    step_dim: Option<String>,

    /// Vector fold sizes (e.g. x=4,y=4)
    #[arg(long, value_name = "SIZES")]
    fold: Option<String>,

    /// Vectors per cluster (e.g. x=2)
    #[arg(long, value_name = "SIZES")]
    cluster: Option<String>,

    /// Only keep equations updating variables matching this regex
    #[arg(long, value_name = "REGEX")]
    vars: Option<String>,

    /// Bundle targeting rules (e.g. a=foo,b=b[aeiou]r)
    #[arg(long, value_name = "RULES")]
    eq_bundles: Option<String>,

    #[arg(long, overrides_with = "no_bundle_scratch")]
    bundle_scratch: bool,
    #[arg(long, overrides_with = "bundle_scratch")]
    no_bundle_scratch: bool,

    /// Halo width forced on every variable
    #[arg(long, value_name = "N")]
    halo: Option<i64>,

    /// Step allocation forced on every variable
    #[arg(long, value_name = "N")]
    step_alloc: Option<i64>,

    /// Lay out misc dimensions innermost
    #[arg(long, overrides_with = "no_interleave_misc")]
    interleave_misc: bool,
    #[arg(long, overrides_with = "interleave_misc")]
    no_interleave_misc: bool,

    /// First domain dimension is unit-stride
    #[arg(long, overrides_with = "lus")]
    fus: bool,
    /// Last domain dimension is unit-stride (default)
    #[arg(long, overrides_with = "fus")]
    lus: bool,

    /// Allow unaligned vector loads
    #[arg(long, overrides_with = "no_ul")]
    ul: bool,
    #[arg(long, overrides_with = "ul")]
    no_ul: bool,

    /// Combine commutative operations
    #[arg(long, overrides_with = "no_opt_comb")]
    opt_comb: bool,
    #[arg(long, overrides_with = "opt_comb")]
    no_opt_comb: bool,

    /// Report repeated subexpressions (no rewrite)
    #[arg(long, overrides_with = "no_opt_cse")]
    opt_cse: bool,
    #[arg(long, overrides_with = "opt_cse")]
    no_opt_cse: bool,

    /// Report sin/cos pairs (no rewrite)
    #[arg(long, overrides_with = "no_opt_pair")]
    opt_pair: bool,
    #[arg(long, overrides_with = "opt_pair")]
    no_opt_pair: bool,

    /// Cross-vector cluster optimization (recorded only)
    #[arg(long, overrides_with = "no_opt_cluster")]
    opt_cluster: bool,
    #[arg(long, overrides_with = "opt_cluster")]
    no_opt_cluster: bool,

    /// Maximum expression size
    #[arg(long = "max-es", value_name = "N")]
    max_expr_size: Option<usize>,

    /// Minimum expression size for reuse
    #[arg(long = "min-es", value_name = "N")]
    min_expr_size: Option<usize>,

    /// Find same-step dependences
    #[arg(long, overrides_with = "no_find_deps")]
    find_deps: bool,
    #[arg(long, overrides_with = "find_deps")]
    no_find_deps: bool,

    /// Log every equation as it is defined
    #[arg(long, overrides_with = "no_print_eqs")]
    print_eqs: bool,
    #[arg(long, overrides_with = "print_eqs")]
    no_print_eqs: bool,

    /// Verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (errors only)
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.quiet {
        log::LevelFilter::Error
    } else {
        match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    info!("stencilopt v{}", stencilopt::VERSION);

    let settings = build_settings(&cli)?;
    debug!("Settings: {:?}", settings);
    let mut ctx = CompilationContext::new(settings).context("Invalid settings")?;

    if cli.list {
        print_listing(&ctx);
        return Ok(());
    }

    let Some(name) = cli.stencil.as_deref() else {
        bail!("no stencil selected; use --stencil or --list");
    };
    if let Some(r) = cli.radius {
        ctx.set_radius(name, r)
            .with_context(|| format!("Failed to set radius of '{}'", name))?;
    }

    let targets = parse_targets(&cli.print)?;
    if targets.is_empty() {
        info!("no output requested; checking '{}' only", name);
    }

    // Render everything before writing anything.
    let mut outputs = Vec::with_capacity(targets.len());
    let formats: Vec<Format> = if targets.is_empty() {
        vec![Format::Pseudo]
    } else {
        targets.iter().map(|(f, _)| *f).collect()
    };
    let mut compiled_for: Vec<(Option<usize>, CompiledSolution)> = Vec::new();
    for format in &formats {
        let target_len = format.target_len(ctx.settings().elem_bytes);
        if !compiled_for.iter().any(|(len, _)| *len == target_len) {
            let compiled = ctx
                .compile(name, target_len)
                .with_context(|| format!("Failed to compile '{}' for {}", name, format))?;
            info!("{} bundle(s): {}", compiled.bundles.len(), bundle_list(&compiled));
            compiled_for.push((target_len, compiled));
        }
    }
    for (format, path) in &targets {
        let target_len = format.target_len(ctx.settings().elem_bytes);
        let compiled = compiled_for
            .iter()
            .find(|(len, _)| *len == target_len)
            .map(|(_, c)| c)
            .context("Missing compiled plan")?;
        let text = codegen::generate(compiled, *format)
            .with_context(|| format!("Failed to generate {}", format))?;
        outputs.push((path.clone(), text));
    }

    for (path, text) in outputs {
        write_output(&path, &text)?;
    }
    Ok(())
}

fn build_settings(cli: &Cli) -> Result<CompilerSettings> {
    let mut s = CompilerSettings::new().elem_bytes(cli.elem_bytes);
    if let Some(ref dims) = cli.domain_dims {
        s.domain_dims = parse_dim_list("domain-dims", dims)?;
    }
    if let Some(ref step) = cli.step_dim {
        s = s.step_dim(step);
    }
    if let Some(ref fold) = cli.fold {
        s.fold_options = parse_dim_sizes("fold", fold)?;
    }
    if let Some(ref cluster) = cli.cluster {
        s.cluster_options = parse_dim_sizes("cluster", cluster)?;
    }
    if let Some(ref vars) = cli.vars {
        s = s.var_regex(vars);
    }
    if let Some(ref rules) = cli.eq_bundles {
        s.eq_bundle_targets = parse_bundle_targets(rules)?;
    }
    s.halo_size = cli.halo;
    s.step_alloc = cli.step_alloc;
    if let Some(n) = cli.max_expr_size {
        s.max_expr_size = n;
    }
    if let Some(n) = cli.min_expr_size {
        s.min_expr_size = n;
    }

    s.bundle_scratch = toggle(cli.bundle_scratch, cli.no_bundle_scratch, s.bundle_scratch);
    s.inner_misc = toggle(cli.interleave_misc, cli.no_interleave_misc, s.inner_misc);
    s.first_inner = toggle(cli.fus, cli.lus, s.first_inner);
    s.allow_unaligned_loads = toggle(cli.ul, cli.no_ul, s.allow_unaligned_loads);
    s.do_comb = toggle(cli.opt_comb, cli.no_opt_comb, s.do_comb);
    s.do_cse = toggle(cli.opt_cse, cli.no_opt_cse, s.do_cse);
    s.do_pairs = toggle(cli.opt_pair, cli.no_opt_pair, s.do_pairs);
    s.do_opt_cluster = toggle(cli.opt_cluster, cli.no_opt_cluster, s.do_opt_cluster);
    s.find_deps = toggle(cli.find_deps, cli.no_find_deps, s.find_deps);
    s.print_eqs = toggle(cli.print_eqs, cli.no_print_eqs, s.print_eqs);
    Ok(s)
}

/// Resolve a `--x`/`--no-x` pair; the last one given wins.
fn toggle(on: bool, off: bool, default: bool) -> bool {
    match (on, off) {
        (true, _) => true,
        (_, true) => false,
        _ => default,
    }
}

fn parse_targets(values: &[String]) -> Result<Vec<(Format, PathBuf)>> {
    values
        .chunks(2)
        .map(|pair| -> Result<(Format, PathBuf)> {
            match pair {
                [format, file] => {
                    let format: Format = format.parse()?;
                    Ok((format, PathBuf::from(file)))
                }
                _ => bail!("-p expects a format and a file"),
            }
        })
        .collect()
}

fn print_listing(ctx: &CompilationContext) {
    println!("Stencil solutions (* = takes a radius):");
    let mut in_tests = false;
    for (name, has_radius) in ctx.registry().listing() {
        if name.starts_with(stencilopt::solutions::TEST_PREFIX) && !in_tests {
            println!("Test solutions:");
            in_tests = true;
        }
        println!("  {}{}", name, if has_radius { " *" } else { "" });
    }
}

fn bundle_list(compiled: &CompiledSolution) -> String {
    compiled
        .bundles
        .iter()
        .map(|b| b.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

fn write_output(path: &PathBuf, text: &str) -> Result<()> {
    if path.as_os_str() == "-" {
        std::io::stdout()
            .write_all(text.as_bytes())
            .context("Failed to write to stdout")?;
    } else {
        fs::write(path, text).with_context(|| format!("Failed to write output file: {:?}", path))?;
        info!("Wrote {:?}", path);
    }
    Ok(())
}
