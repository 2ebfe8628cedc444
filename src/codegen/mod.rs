//! Output formats for compiled solutions.

pub mod cpp;
pub mod dot;
pub mod pseudo;

pub use cpp::CppCodeGen;
pub use dot::DotPrinter;
pub use pseudo::PseudoPrinter;

use crate::context::CompiledSolution;
use crate::utils::errors::{CodegenError, CodegenErrorKind, StencilError, StencilResult};
use std::fmt;
use std::str::FromStr;

/// Output format selected with `-p`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// Human-readable equations per bundle
    Pseudo,
    /// Pseudo-code plus dependences and geometry details
    PseudoLong,
    /// GraphViz graph of equations and variables
    Dot,
    /// GraphViz graph of equations only
    DotLite,
    /// Portable C++ loop skeleton
    Cpp,
    Avx,
    Avx2,
    Avx512,
    /// Knights Corner
    Knc,
}

impl Format {
    pub const ALL: [Format; 9] = [
        Format::Pseudo,
        Format::PseudoLong,
        Format::Dot,
        Format::DotLite,
        Format::Cpp,
        Format::Avx,
        Format::Avx2,
        Format::Avx512,
        Format::Knc,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Format::Pseudo => "pseudo",
            Format::PseudoLong => "pseudo-long",
            Format::Dot => "dot",
            Format::DotLite => "dot-lite",
            Format::Cpp => "cpp",
            Format::Avx => "avx",
            Format::Avx2 => "avx2",
            Format::Avx512 => "avx512",
            Format::Knc => "knc",
        }
    }

    /// Hardware vector width, if the format targets one.
    pub fn vector_bits(&self) -> Option<usize> {
        match self {
            Format::Avx | Format::Avx2 => Some(256),
            Format::Avx512 | Format::Knc => Some(512),
            _ => None,
        }
    }

    /// Elements per vector for the given element size.
    pub fn target_len(&self, elem_bytes: usize) -> Option<usize> {
        self.vector_bits().map(|bits| bits / 8 / elem_bytes.max(1))
    }

    /// Whether the format emits C++.
    pub fn is_cpp(&self) -> bool {
        matches!(
            self,
            Format::Cpp | Format::Avx | Format::Avx2 | Format::Avx512 | Format::Knc
        )
    }

    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|f| f.name()).collect()
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Format {
    type Err = StencilError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.name() == s)
            .ok_or_else(|| {
                CodegenError {
                    message: format!(
                        "unknown format '{}'; expected one of {}",
                        s,
                        Self::names().join(", ")
                    ),
                    kind: CodegenErrorKind::UnknownFormat,
                }
                .into()
            })
    }
}

/// Reject settings the C++ emitters cannot honor.
pub fn check_features(compiled: &CompiledSolution, format: Format) -> StencilResult<()> {
    if format.is_cpp()
        && compiled.settings.allow_unaligned_loads
        && compiled.geometry.fold.num_multi() > 1
    {
        return Err(CodegenError {
            message: format!(
                "unaligned loads are not supported with a multi-dimensional fold ({})",
                compiled.geometry.fold
            ),
            kind: CodegenErrorKind::UnsupportedFeature,
        }
        .into());
    }
    Ok(())
}

/// Render a compiled solution in one format.
pub fn generate(compiled: &CompiledSolution, format: Format) -> StencilResult<String> {
    check_features(compiled, format)?;
    let text = match format {
        Format::Pseudo => PseudoPrinter::new(false).print(compiled),
        Format::PseudoLong => PseudoPrinter::new(true).print(compiled),
        Format::Dot => DotPrinter::new(true).print(compiled),
        Format::DotLite => DotPrinter::new(false).print(compiled),
        _ => CppCodeGen::new(format).generate(compiled),
    };
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CompilationContext;
    use crate::settings::CompilerSettings;

    #[test]
    fn test_format_names() {
        for f in Format::ALL {
            assert_eq!(f.name().parse::<Format>().unwrap(), f);
        }
        let err = "sse".parse::<Format>().unwrap_err();
        assert_eq!(err.short_name(), "CodegenError");
        assert!(err.to_string().contains("avx512"));
    }

    #[test]
    fn test_target_len() {
        assert_eq!(Format::Avx512.target_len(4), Some(16));
        assert_eq!(Format::Avx.target_len(8), Some(4));
        assert_eq!(Format::Pseudo.target_len(4), None);
    }

    #[test]
    fn test_unaligned_loads_check() {
        let mut settings = CompilerSettings::new().fold("x", 4).fold("y", 4);
        settings.allow_unaligned_loads = true;
        let ctx = CompilationContext::new(settings).unwrap();
        let compiled = ctx.compile("iso3dfd", Some(16)).unwrap();
        assert!(generate(&compiled, Format::Pseudo).is_ok());
        let err = generate(&compiled, Format::Avx512).unwrap_err();
        assert!(err.to_string().contains("unaligned"));
    }
}
